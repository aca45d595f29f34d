//! HMAC Authentication for OpenVPN tls-crypt
//!
//! Provides pre-shared key authentication for the control channel's outer
//! envelope, protecting against DoS attacks before the TLS handshake starts.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// tls-crypt key: pre-shared 256-bit static key expanded into directional
/// cipher + HMAC keys, wrapping the outer session-packet envelope.
///
/// Wire format: `[ packet_id:u32 | unix_seconds:u32 | MAC:32 | AES-256-CTR(payload) ]`.
/// The MAC is HMAC-SHA256 over `session_header || packet_id || unix_seconds ||
/// plaintext`; its first 16 bytes double as the CTR IV, so the MAC is always
/// computed (and verified) before the IV it produces is used.
#[derive(ZeroizeOnDrop)]
pub struct TlsCryptKey {
    cipher_key: [u8; 32],
    hmac_key: [u8; 32],
}

impl TlsCryptKey {
    /// Create from raw keys
    pub fn new(cipher_key: [u8; 32], hmac_key: [u8; 32]) -> Self {
        Self { cipher_key, hmac_key }
    }

    /// Create from a 512-bit (64-byte) combined key: cipher key then HMAC key.
    pub fn from_combined(key: &[u8; 64]) -> Self {
        let mut cipher_key = [0u8; 32];
        let mut hmac_key = [0u8; 32];
        cipher_key.copy_from_slice(&key[0..32]);
        hmac_key.copy_from_slice(&key[32..64]);
        Self { cipher_key, hmac_key }
    }

    /// Get the cipher key
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    /// Get the HMAC key
    pub fn hmac_key(&self) -> &[u8; 32] {
        &self.hmac_key
    }

    /// Wrap a session packet's payload for the given `packet_id` and
    /// `session_header` (the framing bytes that precede this envelope on the
    /// wire, folded into the MAC but not the output).
    pub fn wrap(&self, session_header: &[u8], packet_id: u32, unix_seconds: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
        use ctr::cipher::{KeyIvInit, StreamCipher};
        type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

        let mac = self.compute_mac(session_header, packet_id, unix_seconds, plaintext);
        let iv: [u8; 16] = mac[..16].try_into().expect("HMAC-SHA256 output is 32 bytes");

        let mut ciphertext = plaintext.to_vec();
        Aes256Ctr::new(&self.cipher_key.into(), &iv.into()).apply_keystream(&mut ciphertext);

        let mut output = Vec::with_capacity(4 + 4 + 32 + ciphertext.len());
        output.extend_from_slice(&packet_id.to_be_bytes());
        output.extend_from_slice(&unix_seconds.to_be_bytes());
        output.extend_from_slice(&mac);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Unwrap a tls-crypt protected session packet. Returns `(packet_id, plaintext)`.
    pub fn unwrap(&self, session_header: &[u8], packet: &[u8]) -> Result<(u32, Vec<u8>)> {
        use ctr::cipher::{KeyIvInit, StreamCipher};
        type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

        const HEADER_LEN: usize = 4 + 4 + 32;
        if packet.len() < HEADER_LEN {
            return Err(CryptoError::DecryptionFailed);
        }

        let packet_id = u32::from_be_bytes(packet[0..4].try_into().unwrap());
        let unix_seconds = u32::from_be_bytes(packet[4..8].try_into().unwrap());
        let mac = &packet[8..40];
        let ciphertext = &packet[40..];

        // The MAC covers the plaintext, so it must be recomputed after
        // decryption; but the IV it yields is needed to decrypt in the first
        // place. Decrypt speculatively, verify, and only then trust the result.
        let iv: [u8; 16] = mac[..16].try_into().expect("slice is 16 bytes");
        let mut plaintext = ciphertext.to_vec();
        Aes256Ctr::new(&self.cipher_key.into(), &iv.into()).apply_keystream(&mut plaintext);

        let expected = self.compute_mac(session_header, packet_id, unix_seconds, &plaintext);
        if !bool::from(expected.ct_eq(mac)) {
            return Err(CryptoError::HmacVerificationFailed);
        }

        Ok((packet_id, plaintext))
    }

    fn compute_mac(&self, session_header: &[u8], packet_id: u32, unix_seconds: u32, plaintext: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("HMAC key size is always valid");
        mac.update(session_header);
        mac.update(&packet_id.to_be_bytes());
        mac.update(&unix_seconds.to_be_bytes());
        mac.update(plaintext);
        mac.finalize().into_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_crypt_roundtrip() {
        let key = TlsCryptKey::new([0x42u8; 32], [0x43u8; 32]);

        let header = b"session-header";
        let plaintext = b"secret control channel data";
        let wrapped = key.wrap(header, 1, 1_700_000_000, plaintext).unwrap();
        let (packet_id, unwrapped) = key.unwrap(header, &wrapped).unwrap();

        assert_eq!(packet_id, 1);
        assert_eq!(plaintext.as_slice(), unwrapped.as_slice());
    }

    #[test]
    fn test_tls_crypt_tamper_detection() {
        let key = TlsCryptKey::new([0x42u8; 32], [0x43u8; 32]);

        let mut wrapped = key.wrap(b"hdr", 1, 1_700_000_000, b"secret data").unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0xFF; // Tamper with ciphertext

        assert!(key.unwrap(b"hdr", &wrapped).is_err());
    }

    #[test]
    fn test_tls_crypt_rejects_truncated_packet() {
        let key = TlsCryptKey::new([0x42u8; 32], [0x43u8; 32]);
        assert!(key.unwrap(b"hdr", &[0u8; 10]).is_err());
    }
}
