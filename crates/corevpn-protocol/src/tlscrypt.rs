//! TLS-crypt Wrapper (outer envelope)
//!
//! Wraps `corevpn_crypto::TlsCryptKey` with packet-ID assignment on send
//! and out-of-order/replay tracking on receive, per the outer-envelope
//! design in the data model.

use std::time::{SystemTime, UNIX_EPOCH};

use corevpn_crypto::TlsCryptKey;

use crate::ooo::OutOfOrderQueue;
use crate::{ProtocolError, Result};

/// Outer session-packet envelope using a pre-shared tls-crypt key.
pub struct TlsCryptWrapper {
    key: TlsCryptKey,
    tx_packet_id: u32,
    replay: OutOfOrderQueue,
}

impl TlsCryptWrapper {
    /// Wrap the given key, tracking up to 256 recently-seen packet IDs for replay detection.
    pub fn new(key: TlsCryptKey) -> Self {
        Self {
            key,
            tx_packet_id: 0,
            replay: OutOfOrderQueue::new(256),
        }
    }

    /// Encrypt and authenticate one outgoing session packet payload.
    pub fn wrap(&mut self, session_header: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.tx_packet_id = self.tx_packet_id.wrapping_add(1);
        let unix_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.key
            .wrap(session_header, self.tx_packet_id, unix_seconds, plaintext)
            .map_err(ProtocolError::from)
    }

    /// Verify, decrypt, and replay-check one incoming session packet payload.
    pub fn unwrap(&mut self, session_header: &[u8], packet: &[u8]) -> Result<Vec<u8>> {
        let (packet_id, plaintext) = self.key.unwrap(session_header, packet)?;
        if !self.replay.observe(packet_id) {
            return Err(ProtocolError::InvalidPacket(
                "tls-crypt packet_id replay".into(),
            ));
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper() -> TlsCryptWrapper {
        TlsCryptWrapper::new(TlsCryptKey::new([0x11u8; 32], [0x22u8; 32]))
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let mut tx = wrapper();
        let mut rx = TlsCryptWrapper::new(TlsCryptKey::new([0x11u8; 32], [0x22u8; 32]));

        let wrapped = tx.wrap(b"hdr", b"control channel bytes").unwrap();
        let plaintext = rx.unwrap(b"hdr", &wrapped).unwrap();
        assert_eq!(plaintext, b"control channel bytes");
    }

    #[test]
    fn replayed_packet_is_rejected() {
        let mut tx = wrapper();
        let mut rx = TlsCryptWrapper::new(TlsCryptKey::new([0x11u8; 32], [0x22u8; 32]));

        let wrapped = tx.wrap(b"hdr", b"hello").unwrap();
        assert!(rx.unwrap(b"hdr", &wrapped).is_ok());
        assert!(rx.unwrap(b"hdr", &wrapped).is_err());
    }
}
