//! Key derivation: OpenVPN's TLS-1.0 PRF and the TLS keying-material exporter path.
//!
//! Both paths produce the same shape of output — 256 bytes split into a
//! client-direction and a server-direction `CryptoKey`, each 64 B cipher-key
//! slot followed by a 64 B HMAC-key slot — so the data channel doesn't care
//! which one produced its keys.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

const MASTER_SECRET_LABEL: &[u8] = b"OpenVPN master secret";
const KEY_EXPANSION_LABEL: &[u8] = b"OpenVPN key expansion";
const EKM_LABEL: &str = "EXPORTER-OpenVPN-datakeys";

/// One direction's worth of derived key material: 64 B cipher key, 64 B HMAC key.
///
/// Cipher implementations use only the prefix of their chosen size; the rest
/// of the slot is simply unused.
#[derive(Clone, ZeroizeOnDrop)]
pub struct CryptoKey {
    cipher_slot: [u8; 64],
    hmac_slot: [u8; 64],
}

impl CryptoKey {
    fn from_slice(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), 128);
        let mut cipher_slot = [0u8; 64];
        let mut hmac_slot = [0u8; 64];
        cipher_slot.copy_from_slice(&bytes[0..64]);
        hmac_slot.copy_from_slice(&bytes[64..128]);
        Self { cipher_slot, hmac_slot }
    }

    /// First `n` bytes of the cipher-key slot.
    pub fn cipher_key(&self, n: usize) -> &[u8] {
        &self.cipher_slot[..n]
    }

    /// First `n` bytes of the HMAC-key slot.
    pub fn hmac_key(&self, n: usize) -> &[u8] {
        &self.hmac_slot[..n]
    }
}

/// The 256 B of derived key material, split into the two directional blocks.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Keys this side uses to protect data it sends.
    pub client_key: CryptoKey,
    /// Keys this side uses to verify/decrypt data it receives.
    pub server_key: CryptoKey,
}

impl KeyMaterial {
    fn from_bytes(mut okm: [u8; 256]) -> Self {
        let material = Self {
            client_key: CryptoKey::from_slice(&okm[0..128]),
            server_key: CryptoKey::from_slice(&okm[128..256]),
        };
        okm.zeroize();
        material
    }
}

/// The per-side tuple exchanged during `KeyExchangeMethod2`.
///
/// `pre_master` is only present on the client; the server's key source omits
/// it (it is `None` there). `random1`/`random2` are always present.
#[derive(ZeroizeOnDrop)]
pub struct KeySource {
    pre_master: Option<[u8; 48]>,
    random1: [u8; 32],
    random2: [u8; 32],
}

impl KeySource {
    /// Build a fresh client-side key source from an RNG.
    pub fn generate_client() -> Self {
        Self {
            pre_master: Some(crate::random_bytes()),
            random1: crate::random_bytes(),
            random2: crate::random_bytes(),
        }
    }

    /// Build a key source as received from the peer (server omits pre_master).
    pub fn new(pre_master: Option<[u8; 48]>, random1: [u8; 32], random2: [u8; 32]) -> Self {
        Self { pre_master, random1, random2 }
    }

    /// Serialize as it appears on the wire: `pre_master? || random1 || random2`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(112);
        if let Some(pm) = &self.pre_master {
            out.extend_from_slice(pm);
        }
        out.extend_from_slice(&self.random1);
        out.extend_from_slice(&self.random2);
        out
    }

    /// Parse a wire-format key source. `has_pre_master` distinguishes the
    /// client's 112 B source from the server's 64 B one.
    pub fn from_bytes(bytes: &[u8], has_pre_master: bool) -> Result<Self> {
        let expected = if has_pre_master { 112 } else { 64 };
        if bytes.len() != expected {
            return Err(CryptoError::InvalidKeyLength { expected, got: bytes.len() });
        }
        let mut offset = 0;
        let pre_master = if has_pre_master {
            let mut pm = [0u8; 48];
            pm.copy_from_slice(&bytes[0..48]);
            offset = 48;
            Some(pm)
        } else {
            None
        };
        let mut random1 = [0u8; 32];
        let mut random2 = [0u8; 32];
        random1.copy_from_slice(&bytes[offset..offset + 32]);
        random2.copy_from_slice(&bytes[offset + 32..offset + 64]);
        Ok(Self { pre_master, random1, random2 })
    }
}

/// Derive data-channel key material via the OpenVPN PRF from the two peers'
/// key sources and session IDs, per the master-secret-then-expansion chain.
///
/// `client_session_id`/`server_session_id` are `u64`s; a zero ID is omitted
/// from the expansion seed (OpenVPN only mixes in a session ID once it's
/// known).
pub fn derive_prf_keys(
    client_source: &KeySource,
    server_source: &KeySource,
    client_session_id: u64,
    server_session_id: u64,
) -> Result<KeyMaterial> {
    let pre_master = client_source
        .pre_master
        .ok_or_else(|| CryptoError::KeyDerivationFailed("client key source missing pre_master"))?;

    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(&client_source.random1);
    seed.extend_from_slice(&server_source.random1);
    let master = openvpn_prf(&pre_master, MASTER_SECRET_LABEL, &seed, 48)?;

    let mut expansion_seed = Vec::with_capacity(64 + 16);
    expansion_seed.extend_from_slice(&client_source.random2);
    expansion_seed.extend_from_slice(&server_source.random2);
    if client_session_id != 0 {
        expansion_seed.extend_from_slice(&client_session_id.to_be_bytes());
    }
    if server_session_id != 0 {
        expansion_seed.extend_from_slice(&server_session_id.to_be_bytes());
    }

    let keys = openvpn_prf(&master, KEY_EXPANSION_LABEL, &expansion_seed, 256)?;
    let mut okm = [0u8; 256];
    okm.copy_from_slice(&keys);
    Ok(KeyMaterial::from_bytes(okm))
}

/// Label the TLS control channel must export keying material under.
///
/// The protocol crate owns the `rustls` connection; it calls
/// `export_keying_material(buf, EKM_LABEL, None)` and hands the 256 raw
/// bytes here so this crate stays TLS-library agnostic.
pub const fn ekm_label() -> &'static str {
    EKM_LABEL
}

/// Split 256 bytes already exported via the TLS keying-material exporter
/// into the same directional shape the PRF path produces.
pub fn keys_from_ekm(okm: [u8; 256]) -> KeyMaterial {
    KeyMaterial::from_bytes(okm)
}

/// TLS 1.0 PRF: `P_MD5(S1, label||seed) XOR P_SHA1(S2, label||seed)`, truncated
/// to `n` bytes. `S1`/`S2` are the first/last `ceil(len/2)` bytes of `secret`
/// (they overlap by one byte when `len` is odd, matching the RFC).
pub fn openvpn_prf(secret: &[u8], label: &[u8], seed: &[u8], n: usize) -> Result<Vec<u8>> {
    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let md5_stream = p_hash::<Hmac<Md5>>(s1, &label_seed, n)?;
    let sha1_stream = p_hash::<Hmac<Sha1>>(s2, &label_seed, n)?;

    let mut out = vec![0u8; n];
    for i in 0..n {
        out[i] = md5_stream[i] ^ sha1_stream[i];
    }
    Ok(out)
}

/// `P_hash(secret, seed) = HMAC(secret, A(1)||seed) || HMAC(secret, A(2)||seed) || ...`
/// where `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`.
fn p_hash<M: Mac>(secret: &[u8], seed: &[u8], n: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(n + 64);
    let mut a = seed.to_vec();

    while output.len() < n {
        let mut mac = M::new_from_slice(secret)
            .map_err(|_| CryptoError::KeyDerivationFailed("invalid PRF key length"))?;
        mac.update(&a);
        a = mac.finalize_into_bytes();

        let mut mac = M::new_from_slice(secret)
            .map_err(|_| CryptoError::KeyDerivationFailed("invalid PRF key length"))?;
        mac.update(&a);
        mac.update(seed);
        output.extend_from_slice(&mac.finalize_into_bytes());
    }

    output.truncate(n);
    Ok(output)
}

/// Small helper trait so `p_hash` can call `finalize()` without naming the
/// concrete `CtOutput` type for each digest.
trait FinalizeBytes {
    fn finalize_into_bytes(self) -> Vec<u8>;
}

impl<M: Mac> FinalizeBytes for M {
    fn finalize_into_bytes(self) -> Vec<u8> {
        self.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_is_deterministic() {
        let out1 = openvpn_prf(b"shared secret value", b"label", b"seed material", 96).unwrap();
        let out2 = openvpn_prf(b"shared secret value", b"label", b"seed material", 96).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(out1.len(), 96);
    }

    #[test]
    fn prf_output_depends_on_label() {
        let a = openvpn_prf(b"shared secret value", b"label-a", b"seed", 48).unwrap();
        let b = openvpn_prf(b"shared secret value", b"label-b", b"seed", 48).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn derive_prf_keys_splits_into_two_directions() {
        let client = KeySource::new(Some([7u8; 48]), [1u8; 32], [2u8; 32]);
        let server = KeySource::new(None, [3u8; 32], [4u8; 32]);

        let material = derive_prf_keys(&client, &server, 0x0102030405060708, 0x1111222233334444).unwrap();
        assert_ne!(material.client_key.cipher_key(32), material.server_key.cipher_key(32));
        assert_ne!(material.client_key.cipher_key(32), material.client_key.hmac_key(32));
    }

    #[test]
    fn key_source_roundtrips_through_wire_bytes() {
        let client = KeySource::generate_client();
        let bytes = client.to_bytes();
        assert_eq!(bytes.len(), 112);
        let parsed = KeySource::from_bytes(&bytes, true).unwrap();
        assert_eq!(parsed.to_bytes(), bytes);
    }
}
