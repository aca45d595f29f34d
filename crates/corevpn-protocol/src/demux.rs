//! Session Demultiplexer
//!
//! Routes incoming session packets to child channels by opcode
//! registration, enforcing that opcode-set assignments are pairwise
//! disjoint.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::{OpCode, ProtocolError, Result};

/// Identifies a registered child channel.
pub type ChannelId = u32;

/// Opcode-keyed packet router with a per-channel inbox.
#[derive(Default)]
pub struct Demultiplexer {
    registrations: Vec<(ChannelId, Vec<OpCode>)>,
    inboxes: HashMap<ChannelId, VecDeque<Bytes>>,
}

impl Demultiplexer {
    /// Create an empty demultiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel's opcode set. Fails if any opcode is already
    /// claimed by another registration.
    pub fn register(&mut self, channel: ChannelId, opcodes: Vec<OpCode>) -> Result<()> {
        for (_, existing) in &self.registrations {
            if existing.iter().any(|o| opcodes.contains(o)) {
                return Err(ProtocolError::InvalidPacket(
                    "opcode set overlaps an existing registration".into(),
                ));
            }
        }
        self.registrations.push((channel, opcodes));
        self.inboxes.entry(channel).or_default();
        Ok(())
    }

    /// Route one incoming wire packet to its owning channel's inbox.
    pub fn dispatch(&mut self, packet: Bytes) -> Result<()> {
        if packet.is_empty() {
            return Err(ProtocolError::PacketTooShort {
                expected: 1,
                got: 0,
            });
        }
        let opcode = OpCode::from_byte(packet[0])?;
        let channel = self
            .registrations
            .iter()
            .find(|(_, ops)| ops.contains(&opcode))
            .map(|(id, _)| *id)
            .ok_or(ProtocolError::UnknownOpcode(packet[0]))?;
        self.inboxes.entry(channel).or_default().push_back(packet);
        Ok(())
    }

    /// Pull the next packet queued for `channel`, FIFO, if any.
    pub fn poll(&mut self, channel: ChannelId) -> Option<Bytes> {
        self.inboxes.get_mut(&channel).and_then(|q| q.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl_opcodes() -> Vec<OpCode> {
        vec![
            OpCode::ControlV1,
            OpCode::AckV1,
            OpCode::HardResetClientV2,
            OpCode::HardResetServerV2,
        ]
    }

    fn data_opcodes() -> Vec<OpCode> {
        vec![OpCode::DataV1, OpCode::DataV2]
    }

    #[test]
    fn disjoint_registrations_succeed() {
        let mut demux = Demultiplexer::new();
        demux.register(1, ctrl_opcodes()).unwrap();
        demux.register(2, data_opcodes()).unwrap();
    }

    #[test]
    fn overlapping_registration_fails() {
        let mut demux = Demultiplexer::new();
        demux.register(1, ctrl_opcodes()).unwrap();
        assert!(demux
            .register(2, vec![OpCode::ControlV1, OpCode::DataV1])
            .is_err());
    }

    #[test]
    fn dispatch_is_fifo_per_channel() {
        let mut demux = Demultiplexer::new();
        demux.register(1, ctrl_opcodes()).unwrap();
        demux.register(2, data_opcodes()).unwrap();

        let control_byte = (OpCode::ControlV1 as u8) << 3;
        let data_byte = (OpCode::DataV2 as u8) << 3;

        demux.dispatch(Bytes::from_static(&[control_byte, 1])).unwrap();
        demux.dispatch(Bytes::from_static(&[data_byte, 2])).unwrap();
        demux.dispatch(Bytes::from_static(&[control_byte, 3])).unwrap();

        assert_eq!(demux.poll(1), Some(Bytes::from_static(&[control_byte, 1])));
        assert_eq!(demux.poll(1), Some(Bytes::from_static(&[control_byte, 3])));
        assert_eq!(demux.poll(1), None);
        assert_eq!(demux.poll(2), Some(Bytes::from_static(&[data_byte, 2])));
    }
}
