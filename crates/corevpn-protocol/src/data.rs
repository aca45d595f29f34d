//! Data Channel Packet Handling

use bytes::{Bytes, BytesMut, BufMut};
use corevpn_crypto::{DataChannelKey, PacketCipher};

use crate::{KeyId, OpCode, ProtocolError, Result};

/// Data channel packet
#[derive(Debug, Clone)]
pub struct DataPacket {
    /// Key ID
    pub key_id: KeyId,
    /// Peer ID (for P_DATA_V2)
    pub peer_id: Option<u32>,
    /// Payload (IP packet)
    pub payload: Bytes,
}

impl DataPacket {
    /// Create a new data packet
    pub fn new(key_id: KeyId, payload: Bytes) -> Self {
        Self {
            key_id,
            peer_id: None,
            payload,
        }
    }

    /// Create a new data packet with peer ID (V2)
    pub fn new_v2(key_id: KeyId, peer_id: u32, payload: Bytes) -> Self {
        Self {
            key_id,
            peer_id: Some(peer_id),
            payload,
        }
    }

    /// Parse from raw encrypted packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtocolError::PacketTooShort {
                expected: 1,
                got: 0,
            });
        }

        let opcode = OpCode::from_byte(data[0])?;
        let key_id = KeyId::from_byte(data[0]);

        let (peer_id, payload_start) = if opcode == OpCode::DataV2 {
            if data.len() < 4 {
                return Err(ProtocolError::PacketTooShort {
                    expected: 4,
                    got: data.len(),
                });
            }
            let pid = ((data[1] as u32) << 16) | ((data[2] as u32) << 8) | (data[3] as u32);
            (Some(pid), 4)
        } else {
            (None, 1)
        };

        Ok(Self {
            key_id,
            peer_id,
            payload: Bytes::copy_from_slice(&data[payload_start..]),
        })
    }

    /// Serialize to bytes (header + encrypted payload)
    pub fn serialize(&self) -> BytesMut {
        let opcode = if self.peer_id.is_some() {
            OpCode::DataV2
        } else {
            OpCode::DataV1
        };

        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        buf.put_u8(opcode.to_byte(self.key_id));

        if let Some(pid) = self.peer_id {
            buf.put_u8((pid >> 16) as u8);
            buf.put_u8((pid >> 8) as u8);
            buf.put_u8(pid as u8);
        }

        buf.put_slice(&self.payload);
        buf
    }
}

/// Data-channel type-identifier prefix (§4.11): a decrypted payload that is
/// exactly this one byte is a keepalive ping, not tunnel traffic.
pub const PING_IDENTIFIER: u8 = 0xFA;

/// A decrypted data-channel frame, classified by its type-identifier prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrame {
    /// Keepalive ping (identifier `0xFA`); must be echoed back immediately.
    Ping,
    /// Untagged (empty-prefix) raw IP/Ethernet frame.
    Raw(Bytes),
}

/// Data channel encryption/decryption handler
pub struct DataChannel {
    /// Key ID
    key_id: KeyId,
    /// Peer ID (for V2 protocol)
    peer_id: Option<u32>,
    /// Encrypt cipher (outgoing)
    encrypt_cipher: PacketCipher,
    /// Decrypt cipher (incoming)
    decrypt_cipher: PacketCipher,
    /// Whether to use V2 protocol
    use_v2: bool,
}

impl DataChannel {
    /// Create a new data channel
    pub fn new(
        key_id: KeyId,
        encrypt_key: DataChannelKey,
        decrypt_key: DataChannelKey,
        use_v2: bool,
        peer_id: Option<u32>,
    ) -> Self {
        Self {
            key_id,
            peer_id,
            encrypt_cipher: PacketCipher::new(encrypt_key),
            decrypt_cipher: PacketCipher::new(decrypt_key),
            use_v2,
        }
    }

    /// Get the key ID
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Set the peer ID the server assigned via its pushed `peer-id` option.
    /// `P_DATA_V2` framing is only used once this is set.
    pub fn set_peer_id(&mut self, peer_id: u32) {
        self.peer_id = Some(peer_id);
        self.use_v2 = true;
    }

    /// Encrypt an IP packet for transmission. `session_header` is the
    /// session-framing header this packet will carry on the wire; AEAD
    /// suites fold it into the authenticated data.
    pub fn encrypt(&mut self, session_header: &[u8], ip_packet: &[u8]) -> Result<DataPacket> {
        let encrypted = self.encrypt_cipher.encrypt(session_header, ip_packet)?;

        Ok(DataPacket {
            key_id: self.key_id,
            peer_id: if self.use_v2 { self.peer_id } else { None },
            payload: Bytes::from(encrypted),
        })
    }

    /// Decrypt a data packet, rejecting stale key IDs and replays, and
    /// classify the result by its type-identifier prefix (§4.11).
    pub fn decrypt(&mut self, session_header: &[u8], packet: &DataPacket) -> Result<DataFrame> {
        if packet.key_id != self.key_id {
            return Err(ProtocolError::KeyNotAvailable(packet.key_id.0));
        }

        let (_packet_id, decrypted) = self.decrypt_cipher.decrypt(session_header, &packet.payload)?;
        if decrypted.len() == 1 && decrypted[0] == PING_IDENTIFIER {
            Ok(DataFrame::Ping)
        } else {
            Ok(DataFrame::Raw(Bytes::from(decrypted)))
        }
    }

    /// Encrypt a keepalive ping frame for transmission.
    pub fn encrypt_ping(&mut self, session_header: &[u8]) -> Result<DataPacket> {
        self.encrypt(session_header, &[PING_IDENTIFIER])
    }
}

/// Compression stub (compression is disabled for security)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression
    None,
    /// LZO stub (accepts but doesn't decompress)
    LzoStub,
    /// LZ4 stub
    Lz4Stub,
}

impl Compression {
    /// Check if compression byte indicates compressed data
    pub fn is_compressed(byte: u8) -> bool {
        // OpenVPN compression prefixes
        // 0xFA = LZO compressed
        // 0xFB = LZ4 compressed
        byte == 0xFA || byte == 0xFB
    }

    /// Strip compression header if present (stub mode)
    pub fn strip_header(data: &[u8]) -> Result<&[u8]> {
        if data.is_empty() {
            return Ok(data);
        }

        match data[0] {
            0xFA | 0xFB => {
                // Compressed data - we don't support actual decompression
                // for security (VORACLE attacks)
                Err(ProtocolError::InvalidPacket(
                    "compressed data not supported".into(),
                ))
            }
            0x00 => {
                // Uncompressed with compression header
                Ok(&data[1..])
            }
            _ => {
                // No compression header
                Ok(data)
            }
        }
    }

    /// Add compression header (always uncompressed)
    pub fn add_header(data: &[u8], comp: Compression) -> Vec<u8> {
        match comp {
            Compression::None => data.to_vec(),
            Compression::LzoStub | Compression::Lz4Stub => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(0x00); // Uncompressed marker
                out.extend_from_slice(data);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corevpn_crypto::{derive_prf_keys, CipherSuite, KeySource};

    fn test_keys() -> (DataChannelKey, DataChannelKey, DataChannelKey, DataChannelKey) {
        let client_source = KeySource::new(Some([0x10u8; 48]), [0x20u8; 32], [0x30u8; 32]);
        let server_source = KeySource::new(None, [0x40u8; 32], [0x50u8; 32]);
        let material = derive_prf_keys(&client_source, &server_source, 1, 2).unwrap();
        let suite = CipherSuite::from_name("AES-256-GCM", None).unwrap();

        // Client and server each encrypt with their own direction and decrypt
        // with the peer's, so "client" and "server" here share both blocks.
        (
            DataChannelKey::new(&material.client_key, suite),
            DataChannelKey::new(&material.server_key, suite),
            DataChannelKey::new(&material.server_key, suite),
            DataChannelKey::new(&material.client_key, suite),
        )
    }

    #[test]
    fn test_data_packet_v1() {
        let packet = DataPacket::new(KeyId::new(1), Bytes::from_static(&[1, 2, 3, 4]));
        let serialized = packet.serialize();

        let parsed = DataPacket::parse(&serialized).unwrap();
        assert_eq!(parsed.key_id, KeyId::new(1));
        assert!(parsed.peer_id.is_none());
        assert_eq!(&parsed.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_data_packet_v2() {
        let packet = DataPacket::new_v2(KeyId::new(2), 12345, Bytes::from_static(&[5, 6, 7, 8]));
        let serialized = packet.serialize();

        let parsed = DataPacket::parse(&serialized).unwrap();
        assert_eq!(parsed.key_id, KeyId::new(2));
        assert_eq!(parsed.peer_id, Some(12345));
        assert_eq!(&parsed.payload[..], &[5, 6, 7, 8]);
    }

    #[test]
    fn test_data_channel_roundtrip() {
        let (client_enc, client_dec, server_enc, server_dec) = test_keys();

        let mut client = DataChannel::new(KeyId::new(0), client_enc, client_dec, false, None);
        let mut server = DataChannel::new(KeyId::new(0), server_enc, server_dec, false, None);

        let ip_packet = b"Hello, VPN!";
        let encrypted = client.encrypt(b"session-header", ip_packet).unwrap();
        assert_eq!(encrypted.key_id, KeyId::new(0));

        let decrypted = server.decrypt(b"session-header", &encrypted).unwrap();
        assert_eq!(decrypted, DataFrame::Raw(Bytes::from_static(ip_packet)));
    }

    #[test]
    fn test_data_channel_ping_is_classified() {
        let (client_enc, client_dec, server_enc, server_dec) = test_keys();

        let mut client = DataChannel::new(KeyId::new(0), client_enc, client_dec, false, None);
        let mut server = DataChannel::new(KeyId::new(0), server_enc, server_dec, false, None);

        let ping = client.encrypt_ping(b"session-header").unwrap();
        let classified = server.decrypt(b"session-header", &ping).unwrap();
        assert_eq!(classified, DataFrame::Ping);
    }

    #[test]
    fn test_compression_strip() {
        // No compression
        let data = [1, 2, 3, 4];
        assert_eq!(Compression::strip_header(&data).unwrap(), &[1, 2, 3, 4]);

        // Uncompressed with header
        let data = [0x00, 1, 2, 3, 4];
        assert_eq!(Compression::strip_header(&data).unwrap(), &[1, 2, 3, 4]);

        // Compressed (should error)
        let data = [0xFA, 1, 2, 3, 4];
        assert!(Compression::strip_header(&data).is_err());
    }
}
