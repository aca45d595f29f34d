//! Reliable Transport Layer for Control Channel
//!
//! Two pieces: [`ReliableQueue`], the bounded in-order receive queue
//! described by the wire protocol (§4.5 gap-filling semantics), and
//! [`ReliableTransport`], which layers retransmit-timer bookkeeping for the
//! send side on top of it. The retransmit timer itself is an addition: the
//! wire protocol relies on ACK piggybacking and the caller's polling
//! cadence, but a standards-faithful client needs an explicit bounded timer
//! so an unacknowledged packet is eventually retried even if nothing else
//! is being sent.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::{ProtocolError, Result};

/// One slot in a [`ReliableQueue`]'s receive window.
#[derive(Debug, Clone)]
enum Slot {
    /// Reserved by a gap but not yet filled.
    Pending,
    /// Payload received, not yet dequeued.
    Ready(Bytes),
}

/// Bounded, strictly-ordered receive queue keyed by monotonic packet ID.
///
/// Holds a window `[first_id, last_id]` with `last_id - first_id + 1 <=
/// capacity`. IDs below `first_id` have already been delivered; slots in
/// the window are either `Pending` (gap) or `Ready` (payload waiting to be
/// dequeued in order).
pub struct ReliableQueue {
    capacity: u32,
    first_id: u32,
    slots: VecDeque<Slot>,
}

impl ReliableQueue {
    /// Create a queue with the given capacity, starting at `first_id`.
    pub fn new(capacity: u32, first_id: u32) -> Self {
        Self {
            capacity,
            first_id,
            slots: VecDeque::new(),
        }
    }

    fn last_id(&self) -> u32 {
        self.first_id + self.slots.len() as u32 - 1
    }

    /// Enqueue a packet at `id`. Returns `true` if accepted.
    ///
    /// - `id < first_id`: already delivered or too old; rejected.
    /// - `id` within the current window and `Pending`: fills the gap.
    /// - `id` within the window and already `Ready`: duplicate, rejected.
    /// - `id` beyond the window: extends it with `Pending` placeholders,
    ///   rejected if that would exceed `capacity`.
    pub fn try_enqueue(&mut self, id: u32, packet: Bytes) -> bool {
        if id < self.first_id {
            return false;
        }
        if self.slots.is_empty() {
            let span = id - self.first_id + 1;
            if span > self.capacity {
                return false;
            }
            for _ in 0..span - 1 {
                self.slots.push_back(Slot::Pending);
            }
            self.slots.push_back(Slot::Ready(packet));
            return true;
        }

        let last_id = self.last_id();
        if id <= last_id {
            let idx = (id - self.first_id) as usize;
            match &self.slots[idx] {
                Slot::Ready(_) => false,
                Slot::Pending => {
                    self.slots[idx] = Slot::Ready(packet);
                    true
                }
            }
        } else {
            let new_span = id - self.first_id + 1;
            if new_span > self.capacity {
                return false;
            }
            while self.last_id() < id - 1 {
                self.slots.push_back(Slot::Pending);
            }
            self.slots.push_back(Slot::Ready(packet));
            true
        }
    }

    /// Dequeue the next in-order packet, if the slot at `first_id` is ready.
    pub fn try_dequeue(&mut self) -> Option<Bytes> {
        match self.slots.front() {
            Some(Slot::Ready(_)) => {
                let Some(Slot::Ready(data)) = self.slots.pop_front() else {
                    unreachable!()
                };
                self.first_id = self.first_id.wrapping_add(1);
                Some(data)
            }
            _ => None,
        }
    }

    /// IDs considered acknowledged: every already-delivered ID (below
    /// `first_id`, capped at `capacity` positions back) plus every ready ID
    /// still in the window, descending.
    pub fn received_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Ready(_) => Some(self.first_id + i as u32),
                Slot::Pending => None,
            })
            .collect();
        ids.reverse();

        let delivered_count = self.capacity.saturating_sub(ids.len() as u32);
        for back in 1..=delivered_count {
            if back > self.first_id {
                break;
            }
            ids.push(self.first_id - back);
        }
        ids
    }
}

/// Configuration for reliable transport
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// Initial retransmit timeout
    pub initial_rto: Duration,
    /// Maximum retransmit timeout
    pub max_rto: Duration,
    /// RTO backoff multiplier
    pub rto_backoff: f64,
    /// Maximum retransmit attempts
    pub max_retransmits: u32,
    /// Window size (max outstanding packets)
    pub window_size: u32,
    /// ACK delay (time to wait before sending standalone ACK)
    pub ack_delay: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_secs(2),
            max_rto: Duration::from_secs(60),
            rto_backoff: 2.0,
            max_retransmits: 10,
            window_size: 8,
            ack_delay: Duration::from_millis(100),
        }
    }
}

/// Outgoing packet awaiting acknowledgment
#[derive(Debug)]
struct PendingPacket {
    /// Packet data
    data: Bytes,
    /// Time sent
    sent_at: Instant,
    /// Next retransmit time
    next_retransmit: Instant,
    /// Current RTO
    rto: Duration,
    /// Retransmit count
    retransmits: u32,
}

/// Reliable transport layer
pub struct ReliableTransport {
    /// Configuration
    config: ReliableConfig,
    /// Next packet ID to send
    next_send_id: u32,
    /// Packets awaiting ACK
    pending: BTreeMap<u32, PendingPacket>,
    /// ACKs to send
    pending_acks: VecDeque<u32>,
    /// Strictly-ordered receive queue
    recv_queue: ReliableQueue,
    /// Time of last ACK sent
    last_ack_sent: Option<Instant>,
    /// Smoothed RTT (for RTO calculation)
    srtt: Option<Duration>,
    /// RTT variation
    rttvar: Duration,
}

impl ReliableTransport {
    /// Create a new reliable transport
    pub fn new(config: ReliableConfig) -> Self {
        let window = config.window_size;
        Self {
            config,
            next_send_id: 0,
            pending: BTreeMap::new(),
            pending_acks: VecDeque::new(),
            recv_queue: ReliableQueue::new(window, 0),
            last_ack_sent: None,
            srtt: None,
            rttvar: Duration::from_millis(500),
        }
    }

    /// Queue a packet for sending
    ///
    /// Returns the packet ID and the data to send
    pub fn send(&mut self, data: Bytes) -> Result<(u32, Bytes)> {
        // Check window
        if self.pending.len() >= self.config.window_size as usize {
            return Err(ProtocolError::InvalidPacket("send window full".into()));
        }

        let packet_id = self.next_send_id;
        self.next_send_id = self.next_send_id.wrapping_add(1);

        let now = Instant::now();
        let rto = self.calculate_rto();

        self.pending.insert(
            packet_id,
            PendingPacket {
                data: data.clone(),
                sent_at: now,
                next_retransmit: now + rto,
                rto,
                retransmits: 0,
            },
        );

        Ok((packet_id, data))
    }

    /// Process a received control packet. Enqueues it into the in-order
    /// receive window and returns every payload now ready for contiguous
    /// dequeue (possibly more than one, if this fills a gap). An ACK is
    /// only queued for newly-accepted packets.
    pub fn receive(&mut self, packet_id: u32, data: Bytes) -> Vec<Bytes> {
        if self.recv_queue.try_enqueue(packet_id, data) {
            self.pending_acks.push_back(packet_id);
        }

        let mut ready = Vec::new();
        while let Some(payload) = self.recv_queue.try_dequeue() {
            ready.push(payload);
        }
        ready
    }

    /// IDs to report in the next cumulative ACK (descending, newest first).
    pub fn received_ids(&self) -> Vec<u32> {
        self.recv_queue.received_ids()
    }

    /// Process received ACKs
    pub fn process_acks(&mut self, acks: &[u32]) {
        let now = Instant::now();

        for &ack_id in acks {
            if let Some(pending) = self.pending.remove(&ack_id) {
                // Update RTT estimate
                if pending.retransmits == 0 {
                    let rtt = now.duration_since(pending.sent_at);
                    self.update_rtt(rtt);
                }
            }
        }
    }

    /// Get ACKs to send
    pub fn get_acks(&mut self) -> Vec<u32> {
        self.pending_acks.drain(..).collect()
    }

    /// Check if we should send a standalone ACK
    pub fn should_send_ack(&self) -> bool {
        if self.pending_acks.is_empty() {
            return false;
        }

        match self.last_ack_sent {
            Some(last) => last.elapsed() >= self.config.ack_delay,
            None => true,
        }
    }

    /// Mark ACK as sent
    pub fn ack_sent(&mut self) {
        self.last_ack_sent = Some(Instant::now());
    }

    /// Get packets that need retransmission
    pub fn get_retransmits(&mut self) -> Vec<(u32, Bytes)> {
        let now = Instant::now();
        let mut retransmits = Vec::new();

        for (id, pending) in self.pending.iter_mut() {
            if now >= pending.next_retransmit {
                if pending.retransmits >= self.config.max_retransmits {
                    // TODO: Signal connection failure
                    continue;
                }

                retransmits.push((*id, pending.data.clone()));

                // Update for next retransmit
                pending.retransmits += 1;
                pending.rto = Duration::from_secs_f64(
                    (pending.rto.as_secs_f64() * self.config.rto_backoff)
                        .min(self.config.max_rto.as_secs_f64()),
                );
                pending.next_retransmit = now + pending.rto;
            }
        }

        retransmits
    }

    /// Check if there are pending packets
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Get next timeout (when we need to check for retransmits)
    pub fn next_timeout(&self) -> Option<Duration> {
        self.pending
            .values()
            .map(|p| p.next_retransmit)
            .min()
            .map(|t| t.saturating_duration_since(Instant::now()))
    }

    fn calculate_rto(&self) -> Duration {
        match self.srtt {
            Some(srtt) => {
                // RTO = SRTT + 4 * RTTVAR (RFC 6298)
                let rto = srtt + self.rttvar * 4;
                rto.max(self.config.initial_rto)
                    .min(self.config.max_rto)
            }
            None => self.config.initial_rto,
        }
    }

    fn update_rtt(&mut self, rtt: Duration) {
        match self.srtt {
            Some(srtt) => {
                // RTTVAR = (1 - beta) * RTTVAR + beta * |SRTT - R|
                // SRTT = (1 - alpha) * SRTT + alpha * R
                // where alpha = 1/8, beta = 1/4
                let diff = if rtt > srtt { rtt - srtt } else { srtt - rtt };
                self.rttvar = Duration::from_secs_f64(
                    0.75 * self.rttvar.as_secs_f64() + 0.25 * diff.as_secs_f64(),
                );
                self.srtt = Some(Duration::from_secs_f64(
                    0.875 * srtt.as_secs_f64() + 0.125 * rtt.as_secs_f64(),
                ));
            }
            None => {
                // First RTT measurement
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
        }
    }
}

/// Reassembles fragmented TLS records
pub struct TlsRecordReassembler {
    /// Buffer for partial records
    buffer: Vec<u8>,
    /// Maximum buffer size
    max_size: usize,
}

impl TlsRecordReassembler {
    /// Create a new reassembler
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
        }
    }

    /// Add data to the buffer
    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        if self.buffer.len() + data.len() > self.max_size {
            return Err(ProtocolError::InvalidPacket("TLS record too large".into()));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Try to extract complete TLS records
    pub fn extract_records(&mut self) -> Vec<Bytes> {
        let mut records = Vec::new();

        while self.buffer.len() >= 5 {
            // TLS record header: type (1) + version (2) + length (2)
            let length = u16::from_be_bytes([self.buffer[3], self.buffer[4]]) as usize;

            if self.buffer.len() < 5 + length {
                break; // Incomplete record
            }

            let record = self.buffer.drain(..5 + length).collect::<Vec<_>>();
            records.push(Bytes::from(record));
        }

        records
    }

    /// Get buffer length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_basic() {
        let mut transport = ReliableTransport::new(ReliableConfig::default());

        // Send a packet
        let (id, _) = transport.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(id, 0);
        assert!(transport.has_pending());

        // ACK it
        transport.process_acks(&[0]);
        assert!(!transport.has_pending());
    }

    #[test]
    fn test_reliable_receive() {
        let mut transport = ReliableTransport::new(ReliableConfig::default());

        // Receive packet 0 - delivered immediately
        let ready = transport.receive(0, Bytes::from_static(b"first"));
        assert_eq!(ready, vec![Bytes::from_static(b"first")]);

        // Receive packet 2 (out of order) - buffered, nothing ready yet
        let ready = transport.receive(2, Bytes::from_static(b"third"));
        assert!(ready.is_empty());

        // Receive packet 1 - fills the gap, both 1 and 2 become ready
        let ready = transport.receive(1, Bytes::from_static(b"second"));
        assert_eq!(
            ready,
            vec![Bytes::from_static(b"second"), Bytes::from_static(b"third")]
        );
    }

    #[test]
    fn test_reliable_queue_gap_fill() {
        let mut queue = ReliableQueue::new(8, 0);
        assert!(queue.try_enqueue(0, Bytes::from_static(b"a")));
        assert!(queue.try_enqueue(2, Bytes::from_static(b"c")));
        assert!(queue.try_enqueue(1, Bytes::from_static(b"b")));

        assert_eq!(queue.try_dequeue(), Some(Bytes::from_static(b"a")));
        assert_eq!(queue.try_dequeue(), Some(Bytes::from_static(b"b")));
        assert_eq!(queue.try_dequeue(), Some(Bytes::from_static(b"c")));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_reliable_queue_extends_window_with_pending() {
        let mut queue = ReliableQueue::new(8, 0);
        assert!(queue.try_enqueue(7, Bytes::from_static(b"h")));
        // Window is now exactly full (0..=7); dequeue returns nothing until filled.
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_reliable_queue_rejects_overflow() {
        let mut queue = ReliableQueue::new(8, 0);
        assert!(!queue.try_enqueue(10, Bytes::from_static(b"x")));
    }

    #[test]
    fn test_reliable_queue_rejects_duplicate_ready() {
        let mut queue = ReliableQueue::new(8, 0);
        assert!(queue.try_enqueue(0, Bytes::from_static(b"a")));
        assert!(!queue.try_enqueue(0, Bytes::from_static(b"a-again")));
    }

    #[test]
    fn test_reliable_queue_received_ids_view() {
        let mut queue = ReliableQueue::new(8, 0);
        assert!(queue.try_enqueue(0, Bytes::from_static(b"a")));
        assert!(queue.try_enqueue(1, Bytes::from_static(b"b")));
        queue.try_dequeue();
        queue.try_dequeue();
        assert!(queue.try_enqueue(3, Bytes::from_static(b"d")));

        let ids = queue.received_ids();
        // Descending: ready id 3, then already-delivered 1 and 0.
        assert_eq!(ids, vec![3, 1, 0]);
    }

    #[test]
    fn test_tls_reassembler() {
        let mut reassembler = TlsRecordReassembler::new(16384);

        // Add partial TLS record header
        reassembler.add(&[0x17, 0x03, 0x03, 0x00, 0x05]).unwrap();
        assert!(reassembler.extract_records().is_empty());

        // Add the rest
        reassembler.add(&[1, 2, 3, 4, 5]).unwrap();
        let records = reassembler.extract_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 10); // 5 header + 5 payload
    }
}
