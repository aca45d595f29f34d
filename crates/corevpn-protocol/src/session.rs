//! Control Channel
//!
//! Client-role state machine driving the reliable, in-order control
//! transport: hard-reset handshake, cumulative ACK generation, and
//! session-ID correlation. TLS record framing and data-channel crypto are
//! driven from the orchestrator, which owns this channel.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::packet::ControlPacketData;
use crate::{
    KeyId, OpCode, Packet, PacketHeader, ProtocolError, ReliableConfig, ReliableTransport, Result,
};

/// Control channel state (client role).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Not yet connected.
    Idle,
    /// Hard-reset sent, awaiting the server's hard-reset response.
    AwaitingHardReset,
    /// TLS handshake and key exchange in progress.
    Handshake,
    /// Control channel fully established; TLS application data flows.
    Active,
    /// Fatal error or explicit close; no further I/O is attempted.
    Closed,
}

/// Session ID type (8 bytes).
pub type SessionIdBytes = [u8; 8];

/// Client-role control channel.
pub struct ProtocolSession {
    local_session_id: SessionIdBytes,
    remote_session_id: Option<SessionIdBytes>,
    state: ProtocolState,
    key_id: KeyId,
    reliable: ReliableTransport,
    created_at: Instant,
    last_activity: Instant,
}

impl ProtocolSession {
    /// Create a new client-side control channel with a fresh random session ID.
    pub fn new() -> Self {
        Self {
            local_session_id: corevpn_crypto::generate_session_id(),
            remote_session_id: None,
            state: ProtocolState::Idle,
            key_id: KeyId::default(),
            reliable: ReliableTransport::new(ReliableConfig::default()),
            created_at: Instant::now(),
            last_activity: Instant::now(),
        }
    }

    /// Local (client-chosen) session ID.
    pub fn local_session_id(&self) -> &SessionIdBytes {
        &self.local_session_id
    }

    /// Remote (server-chosen) session ID, once known.
    pub fn remote_session_id(&self) -> Option<&SessionIdBytes> {
        self.remote_session_id.as_ref()
    }

    /// Current control-channel state.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Force a state transition (e.g. on a fatal error elsewhere in the
    /// orchestrator).
    pub fn set_state(&mut self, state: ProtocolState) {
        self.state = state;
        self.last_activity = Instant::now();
    }

    /// Build and send the initial `ControlHardResetClientV2`, transitioning
    /// to `AwaitingHardReset`.
    pub fn create_hard_reset(&mut self) -> Bytes {
        self.state = ProtocolState::AwaitingHardReset;
        let packet = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::HardResetClientV2,
                key_id: self.key_id,
                session_id: Some(self.local_session_id),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: None,
            payload: Bytes::new(),
        };
        Packet::Control(packet).serialize().freeze()
    }

    /// Process one incoming control-record payload (already unwrapped from
    /// any tls-crypt/tls-auth outer envelope, and already demultiplexed by
    /// opcode). Returns bytes ready for the TLS input side, in order, plus
    /// drives ACK/state bookkeeping.
    pub fn process_control_packet(&mut self, ctrl: ControlPacketData) -> Result<ProcessedPacket> {
        self.last_activity = Instant::now();

        if let Some(remote_sid) = self.remote_session_id {
            if let Some(sender_sid) = ctrl.header.session_id {
                if sender_sid != remote_sid && !ctrl.header.opcode.is_hard_reset() {
                    return Err(ProtocolError::InvalidSessionId);
                }
            }
        }

        if !ctrl.acks.is_empty() {
            self.reliable.process_acks(&ctrl.acks);
        }

        match ctrl.header.opcode {
            OpCode::HardResetServerV2 => {
                if let Some(remote_sid) = ctrl.header.session_id {
                    self.remote_session_id = Some(remote_sid);
                }
                // The hard reset still carries a reliable-layer packet ID on
                // the wire; it must be registered so the resulting ACK
                // (§4.7: "emit an ACK") actually reports it instead of
                // `create_ack_packet` finding nothing outstanding.
                if let Some(packet_id) = ctrl.message_packet_id {
                    self.reliable.receive(packet_id, ctrl.payload);
                }
                self.state = ProtocolState::Handshake;
                Ok(ProcessedPacket::HardResetAck)
            }
            OpCode::ControlV1 => {
                if let Some(packet_id) = ctrl.message_packet_id {
                    let ready = self.reliable.receive(packet_id, ctrl.payload.clone());
                    if !ready.is_empty() {
                        return Ok(ProcessedPacket::TlsData(ready));
                    }
                }
                Ok(ProcessedPacket::None)
            }
            OpCode::AckV1 => Ok(ProcessedPacket::None),
            OpCode::SoftResetV1 => Ok(ProcessedPacket::SoftReset),
            other => Err(ProtocolError::UnknownOpcode(other.to_byte(KeyId::default()) >> 3)),
        }
    }

    /// Wrap a chunk of outbound TLS-stack bytes in a control record,
    /// stamped with the next packet ID and the current cumulative ACK list.
    pub fn create_control_packet(&mut self, tls_data: Bytes) -> Result<Bytes> {
        let (packet_id, _) = self.reliable.send(tls_data.clone())?;

        let packet = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::ControlV1,
                key_id: self.key_id,
                session_id: Some(self.local_session_id),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: self.remote_session_id,
            acks: self.reliable.received_ids(),
            message_packet_id: Some(packet_id),
            payload: tls_data,
        };

        Ok(Packet::Control(packet).serialize().freeze())
    }

    /// Build a pure-ACK packet if any ACKs are outstanding.
    pub fn create_ack_packet(&mut self) -> Option<Bytes> {
        let acks = self.reliable.received_ids();
        if acks.is_empty() {
            return None;
        }

        let packet = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::AckV1,
                key_id: self.key_id,
                session_id: Some(self.local_session_id),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: self.remote_session_id,
            acks,
            message_packet_id: None,
            payload: Bytes::new(),
        };

        self.reliable.ack_sent();
        Some(Packet::Control(packet).serialize().freeze())
    }

    /// Packets whose retransmit timer has elapsed, re-stamped with the
    /// current ACK list.
    pub fn get_retransmits(&mut self) -> Vec<Bytes> {
        self.reliable
            .get_retransmits()
            .into_iter()
            .map(|(id, data)| {
                let packet = ControlPacketData {
                    header: PacketHeader {
                        opcode: OpCode::ControlV1,
                        key_id: self.key_id,
                        session_id: Some(self.local_session_id),
                        hmac: None,
                        packet_id: None,
                        timestamp: None,
                    },
                    remote_session_id: self.remote_session_id,
                    acks: self.reliable.received_ids(),
                    message_packet_id: Some(id),
                    payload: data,
                };
                Packet::Control(packet).serialize().freeze()
            })
            .collect()
    }

    /// Whether a standalone ACK is due.
    pub fn should_send_ack(&self) -> bool {
        self.reliable.should_send_ack()
    }

    /// Next time the caller should poll for a retransmit.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.reliable.next_timeout()
    }

    /// Whether the control channel has completed its handshake.
    pub fn is_active(&self) -> bool {
        self.state == ProtocolState::Active
    }

    /// Total session age.
    pub fn duration(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last inbound or outbound activity.
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of processing one inbound control packet.
#[derive(Debug)]
pub enum ProcessedPacket {
    /// Nothing actionable yet (pure ACK, or a gap still open).
    None,
    /// Server's hard-reset response observed; remote session ID now known.
    HardResetAck,
    /// One or more TLS-application byte chunks, in order.
    TlsData(Vec<Bytes>),
    /// Soft reset (key renegotiation) requested.
    SoftReset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_idle() {
        let session = ProtocolSession::new();
        assert_eq!(session.state(), ProtocolState::Idle);
        assert!(session.remote_session_id().is_none());
    }

    #[test]
    fn hard_reset_handshake_sets_remote_session_id() {
        let mut session = ProtocolSession::new();
        let _hard_reset = session.create_hard_reset();
        assert_eq!(session.state(), ProtocolState::AwaitingHardReset);

        let server_hard_reset = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::HardResetServerV2,
                key_id: KeyId::default(),
                session_id: Some([0x11; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: None,
            payload: Bytes::new(),
        };

        let result = session.process_control_packet(server_hard_reset).unwrap();
        assert!(matches!(result, ProcessedPacket::HardResetAck));
        assert_eq!(session.remote_session_id(), Some(&[0x11; 8]));
        assert_eq!(session.state(), ProtocolState::Handshake);
    }

    #[test]
    fn hard_reset_response_is_acked() {
        let mut session = ProtocolSession::new();
        session.create_hard_reset();

        let server_hard_reset = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::HardResetServerV2,
                key_id: KeyId::default(),
                session_id: Some([0x11; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: Some(0),
            payload: Bytes::new(),
        };

        session.process_control_packet(server_hard_reset).unwrap();

        let ack = session.create_ack_packet().expect("hard reset must be acked");
        match Packet::parse(&ack, false).unwrap() {
            Packet::Control(ctrl) => {
                assert_eq!(ctrl.header.opcode, OpCode::AckV1);
                assert_eq!(ctrl.acks, vec![0]);
                assert_eq!(ctrl.remote_session_id, Some([0x11; 8]));
            }
            other => panic!("expected a control packet, got {other:?}"),
        }
    }

    #[test]
    fn control_data_is_acked_and_delivered_in_order() {
        let mut session = ProtocolSession::new();
        session.remote_session_id = Some([0x22; 8]);

        let make = |id: u32, payload: &'static [u8]| ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::ControlV1,
                key_id: KeyId::default(),
                session_id: Some([0x22; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: Some(id),
            payload: Bytes::from_static(payload),
        };

        let result = session.process_control_packet(make(0, b"hello")).unwrap();
        match result {
            ProcessedPacket::TlsData(chunks) => assert_eq!(chunks, vec![Bytes::from_static(b"hello")]),
            _ => panic!("expected TlsData"),
        }
        assert!(session.create_ack_packet().is_some());
    }

    #[test]
    fn mismatched_remote_session_id_is_rejected() {
        let mut session = ProtocolSession::new();
        session.remote_session_id = Some([0x22; 8]);

        let bad = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::ControlV1,
                key_id: KeyId::default(),
                session_id: Some([0x99; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: Some(0),
            payload: Bytes::new(),
        };

        assert!(session.process_control_packet(bad).is_err());
    }
}
