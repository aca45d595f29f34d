//! Data-channel cipher suites and per-packet framing.
//!
//! Four families are supported: AEAD (AES-GCM), CBC-then-HMAC,
//! CTR-then-HMAC, and Plain/None. `BF-CBC` is recognized as a cipher name
//! but rejected — Blowfish isn't in the dependency stack and OpenVPN 2.6
//! clients don't need to originate it, only to recognize the name.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{aead::consts::U12, AeadInPlace, Aes128Gcm, Aes256Gcm, AesGcm, KeyInit as GcmKeyInit};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::CryptoKey;
use crate::{CryptoError, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

type Aes192Gcm = AesGcm<Aes192, U12>;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const GCM_IV_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;
const PACKET_ID_SIZE: usize = 4;

/// A data-channel cipher suite, named the way OpenVPN's `--cipher`/`--auth`
/// options name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// AES-GCM, an AEAD mode that carries its own integrity tag.
    Aead(AeadAlgorithm),
    /// AES-CBC, paired with a separate HMAC over ciphertext.
    Cbc(CbcAlgorithm, MacAlgorithm),
    /// AES-CTR, paired with a separate HMAC over ciphertext.
    Ctr(CtrAlgorithm, MacAlgorithm),
    /// No encryption, no authentication.
    Plain,
}

/// AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-128-GCM.
    Aes128Gcm,
    /// AES-192-GCM.
    Aes192Gcm,
    /// AES-256-GCM.
    Aes256Gcm,
}

/// CBC block ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbcAlgorithm {
    /// AES-128-CBC.
    Aes128Cbc,
    /// AES-192-CBC.
    Aes192Cbc,
    /// AES-256-CBC.
    Aes256Cbc,
}

/// CTR block ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrAlgorithm {
    /// AES-128-CTR.
    Aes128Ctr,
    /// AES-192-CTR.
    Aes192Ctr,
    /// AES-256-CTR.
    Aes256Ctr,
}

/// HMAC digest used to authenticate CBC/CTR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// HMAC-SHA1 (20-byte tag).
    Sha1,
    /// HMAC-SHA256 (32-byte tag).
    Sha256,
    /// HMAC-SHA384 (48-byte tag).
    Sha384,
    /// HMAC-SHA512 (64-byte tag).
    Sha512,
}

impl MacAlgorithm {
    /// Tag size in bytes for this digest.
    pub const fn tag_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    fn compute(self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha1 => mac_compute::<Hmac<Sha1>>(key, parts),
            Self::Sha256 => mac_compute::<Hmac<Sha256>>(key, parts),
            Self::Sha384 => mac_compute::<Hmac<Sha384>>(key, parts),
            Self::Sha512 => mac_compute::<Hmac<Sha512>>(key, parts),
        }
    }
}

fn mac_compute<M: Mac>(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = M::new_from_slice(key).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

impl CipherSuite {
    /// Parse an OpenVPN `--cipher`/`--auth` style name, e.g. `"AES-256-GCM"`.
    ///
    /// `mac` supplies the digest for CBC/CTR modes; it's ignored for AEAD
    /// and Plain. Returns `Unsupported` for `BF-CBC` and epoch formats.
    pub fn from_name(cipher: &str, mac: Option<MacAlgorithm>) -> Result<Self> {
        match cipher.to_ascii_uppercase().as_str() {
            "AES-128-GCM" => Ok(Self::Aead(AeadAlgorithm::Aes128Gcm)),
            "AES-192-GCM" => Ok(Self::Aead(AeadAlgorithm::Aes192Gcm)),
            "AES-256-GCM" => Ok(Self::Aead(AeadAlgorithm::Aes256Gcm)),
            "AES-128-CBC" => Ok(Self::Cbc(CbcAlgorithm::Aes128Cbc, require_mac(mac)?)),
            "AES-192-CBC" => Ok(Self::Cbc(CbcAlgorithm::Aes192Cbc, require_mac(mac)?)),
            "AES-256-CBC" => Ok(Self::Cbc(CbcAlgorithm::Aes256Cbc, require_mac(mac)?)),
            "AES-128-CTR" => Ok(Self::Ctr(CtrAlgorithm::Aes128Ctr, require_mac(mac)?)),
            "AES-192-CTR" => Ok(Self::Ctr(CtrAlgorithm::Aes192Ctr, require_mac(mac)?)),
            "AES-256-CTR" => Ok(Self::Ctr(CtrAlgorithm::Aes256Ctr, require_mac(mac)?)),
            "BF-CBC" => Err(CryptoError::Unsupported("BF-CBC".to_string())),
            "PLAIN" | "NONE" => Ok(Self::Plain),
            other => Err(CryptoError::Unsupported(other.to_string())),
        }
    }

    /// Cipher key size in bytes (0 for Plain).
    pub const fn key_size(&self) -> usize {
        match self {
            Self::Aead(AeadAlgorithm::Aes128Gcm) | Self::Cbc(CbcAlgorithm::Aes128Cbc, _) | Self::Ctr(CtrAlgorithm::Aes128Ctr, _) => 16,
            Self::Aead(AeadAlgorithm::Aes192Gcm) | Self::Cbc(CbcAlgorithm::Aes192Cbc, _) | Self::Ctr(CtrAlgorithm::Aes192Ctr, _) => 24,
            Self::Aead(AeadAlgorithm::Aes256Gcm) | Self::Cbc(CbcAlgorithm::Aes256Cbc, _) | Self::Ctr(CtrAlgorithm::Aes256Ctr, _) => 32,
            Self::Plain => 0,
        }
    }

    fn mac(&self) -> Option<MacAlgorithm> {
        match self {
            Self::Cbc(_, mac) | Self::Ctr(_, mac) => Some(*mac),
            _ => None,
        }
    }
}

fn require_mac(mac: Option<MacAlgorithm>) -> Result<MacAlgorithm> {
    mac.ok_or(CryptoError::KeyDerivationFailed("CBC/CTR cipher requires a MAC algorithm"))
}

/// A directional data-channel key: the cipher-key prefix and (for CBC/CTR)
/// HMAC-key prefix this suite needs, sliced from a 128-byte `CryptoKey`.
pub struct DataChannelKey {
    suite: CipherSuite,
    cipher_key: Vec<u8>,
    hmac_key: Vec<u8>,
    /// Implicit IV prefix for AEAD nonce construction: `hmac_key[0..8]`.
    aead_iv_suffix: [u8; 8],
}

impl DataChannelKey {
    /// Slice the cipher/HMAC key material this suite needs out of a
    /// directional `CryptoKey` block.
    pub fn new(key: &CryptoKey, suite: CipherSuite) -> Self {
        let cipher_key = key.cipher_key(suite.key_size()).to_vec();
        let hmac_size = suite.mac().map(MacAlgorithm::tag_size).unwrap_or(0).max(8);
        let hmac_key = key.hmac_key(hmac_size).to_vec();
        let mut aead_iv_suffix = [0u8; 8];
        aead_iv_suffix.copy_from_slice(&key.hmac_key(8)[..8]);
        Self { suite, cipher_key, hmac_key, aead_iv_suffix }
    }

    /// The configured cipher suite.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }
}

impl Drop for DataChannelKey {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.hmac_key.zeroize();
        self.aead_iv_suffix.zeroize();
    }
}

impl ZeroizeOnDrop for DataChannelKey {}

/// A 32-bit sliding-window replay filter keyed on the data-channel packet ID.
///
/// Tracks the last 128 packet IDs relative to the highest seen, as a bitmap.
pub struct ReplayWindow {
    highest: u32,
    bitmap: u128,
}

impl ReplayWindow {
    const WINDOW_SIZE: u32 = 128;

    /// A fresh, empty window.
    pub fn new() -> Self {
        Self { highest: 0, bitmap: 0 }
    }

    /// Accept or reject `packet_id`, updating the window on acceptance.
    pub fn check_and_update(&mut self, packet_id: u32) -> bool {
        if packet_id == 0 {
            return false;
        }

        if packet_id > self.highest {
            let shift = packet_id - self.highest;
            self.bitmap = if shift >= Self::WINDOW_SIZE { 1 } else { (self.bitmap << shift) | 1 };
            self.highest = packet_id;
            true
        } else {
            let diff = self.highest - packet_id;
            if diff >= Self::WINDOW_SIZE {
                return false;
            }
            let mask = 1u128 << diff;
            if self.bitmap & mask != 0 {
                return false;
            }
            self.bitmap |= mask;
            true
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// One direction's packet cipher: encrypts outgoing packets with a monotonic
/// packet ID, or decrypts incoming ones with replay protection. A data
/// channel owns two instances, one per direction, built from different
/// `DataChannelKey`s.
pub struct PacketCipher {
    key: DataChannelKey,
    tx_packet_id: u32,
    rx_window: ReplayWindow,
}

impl PacketCipher {
    /// Build a packet cipher over the given directional key.
    pub fn new(key: DataChannelKey) -> Self {
        Self { key, tx_packet_id: 0, rx_window: ReplayWindow::new() }
    }

    /// Encrypt `plaintext` for sending, consuming the next monotonic packet
    /// ID. `session_header` is the session-framing bytes that precede the
    /// ciphertext on the wire (used as AAD for AEAD suites).
    pub fn encrypt(&mut self, session_header: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.tx_packet_id = self
            .tx_packet_id
            .checked_add(1)
            .ok_or(CryptoError::EncryptionFailed("packet ID counter overflow"))?;
        let packet_id = self.tx_packet_id;

        match self.key.suite {
            CipherSuite::Aead(alg) => encrypt_aead(alg, &self.key, session_header, packet_id, plaintext),
            CipherSuite::Cbc(alg, mac) => encrypt_cbc(alg, mac, &self.key, packet_id, plaintext),
            CipherSuite::Ctr(alg, mac) => encrypt_ctr(alg, mac, &self.key, packet_id, plaintext),
            CipherSuite::Plain => {
                let mut out = Vec::with_capacity(PACKET_ID_SIZE + plaintext.len());
                out.extend_from_slice(&packet_id.to_be_bytes());
                out.extend_from_slice(plaintext);
                Ok(out)
            }
        }
    }

    /// Decrypt an incoming packet, rejecting replays and integrity failures.
    /// Returns `(packet_id, plaintext)`.
    pub fn decrypt(&mut self, session_header: &[u8], packet: &[u8]) -> Result<(u32, Vec<u8>)> {
        let (packet_id, plaintext) = match self.key.suite {
            CipherSuite::Aead(alg) => decrypt_aead(alg, &self.key, session_header, packet)?,
            CipherSuite::Cbc(alg, mac) => decrypt_cbc(alg, mac, &self.key, packet)?,
            CipherSuite::Ctr(alg, mac) => decrypt_ctr(alg, mac, &self.key, packet)?,
            CipherSuite::Plain => {
                if packet.len() < PACKET_ID_SIZE {
                    return Err(CryptoError::DecryptionFailed);
                }
                let packet_id = u32::from_be_bytes(packet[..PACKET_ID_SIZE].try_into().unwrap());
                (packet_id, packet[PACKET_ID_SIZE..].to_vec())
            }
        };

        if !self.rx_window.check_and_update(packet_id) {
            return Err(CryptoError::ReplayDetected);
        }

        Ok((packet_id, plaintext))
    }

    /// Current outgoing packet-ID counter, for diagnostics.
    pub fn tx_packet_id(&self) -> u32 {
        self.tx_packet_id
    }
}

fn aead_nonce(iv_suffix: &[u8; 8], packet_id: u32) -> [u8; GCM_IV_SIZE] {
    let mut nonce = [0u8; GCM_IV_SIZE];
    nonce[..4].copy_from_slice(&packet_id.to_be_bytes());
    nonce[4..].copy_from_slice(iv_suffix);
    nonce
}

fn encrypt_aead(alg: AeadAlgorithm, key: &DataChannelKey, session_header: &[u8], packet_id: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = aead_nonce(&key.aead_iv_suffix, packet_id);
    let mut aad = Vec::with_capacity(session_header.len() + PACKET_ID_SIZE);
    aad.extend_from_slice(session_header);
    aad.extend_from_slice(&packet_id.to_be_bytes());

    let mut buffer = plaintext.to_vec();
    let tag = gcm_encrypt_in_place(alg, &key.cipher_key, &nonce, &aad, &mut buffer)?;

    let mut out = Vec::with_capacity(PACKET_ID_SIZE + GCM_TAG_SIZE + buffer.len());
    out.extend_from_slice(&packet_id.to_be_bytes());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&buffer);
    Ok(out)
}

fn decrypt_aead(alg: AeadAlgorithm, key: &DataChannelKey, session_header: &[u8], packet: &[u8]) -> Result<(u32, Vec<u8>)> {
    if packet.len() < PACKET_ID_SIZE + GCM_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let packet_id = u32::from_be_bytes(packet[..PACKET_ID_SIZE].try_into().unwrap());
    let tag = &packet[PACKET_ID_SIZE..PACKET_ID_SIZE + GCM_TAG_SIZE];
    let ciphertext = &packet[PACKET_ID_SIZE + GCM_TAG_SIZE..];

    let nonce = aead_nonce(&key.aead_iv_suffix, packet_id);
    let mut aad = Vec::with_capacity(session_header.len() + PACKET_ID_SIZE);
    aad.extend_from_slice(session_header);
    aad.extend_from_slice(&packet_id.to_be_bytes());

    let mut buffer = ciphertext.to_vec();
    gcm_decrypt_in_place(alg, &key.cipher_key, &nonce, &aad, tag, &mut buffer)?;
    Ok((packet_id, buffer))
}

fn gcm_encrypt_in_place(alg: AeadAlgorithm, key: &[u8], nonce: &[u8; GCM_IV_SIZE], aad: &[u8], buffer: &mut Vec<u8>) -> Result<Vec<u8>> {
    let err = || CryptoError::EncryptionFailed("AES-GCM encryption failed");
    let tag = match alg {
        AeadAlgorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .encrypt_in_place_detached(nonce.into(), aad, buffer)
            .map_err(|_| err())?,
        AeadAlgorithm::Aes192Gcm => Aes192Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .encrypt_in_place_detached(nonce.into(), aad, buffer)
            .map_err(|_| err())?,
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .encrypt_in_place_detached(nonce.into(), aad, buffer)
            .map_err(|_| err())?,
    };
    Ok(tag.to_vec())
}

fn gcm_decrypt_in_place(alg: AeadAlgorithm, key: &[u8], nonce: &[u8; GCM_IV_SIZE], aad: &[u8], tag: &[u8], buffer: &mut Vec<u8>) -> Result<()> {
    let err = || CryptoError::DecryptionFailed;
    let tag: &[u8; GCM_TAG_SIZE] = tag.try_into().map_err(|_| err())?;
    match alg {
        AeadAlgorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into())
            .map_err(|_| err()),
        AeadAlgorithm::Aes192Gcm => Aes192Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into())
            .map_err(|_| err()),
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| err())?
            .decrypt_in_place_detached(nonce.into(), aad, buffer, tag.into())
            .map_err(|_| err()),
    }
}

fn encrypt_cbc(alg: CbcAlgorithm, mac: MacAlgorithm, key: &DataChannelKey, packet_id: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut payload = Vec::with_capacity(PACKET_ID_SIZE + plaintext.len());
    payload.extend_from_slice(&packet_id.to_be_bytes());
    payload.extend_from_slice(plaintext);

    let ciphertext = cbc_encrypt(alg, &key.cipher_key, &iv, &payload)?;
    let tag = mac.compute(&key.hmac_key, &[iv.as_slice(), ciphertext.as_slice()]);

    let mut out = Vec::with_capacity(tag.len() + iv.len() + ciphertext.len());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_cbc(alg: CbcAlgorithm, mac: MacAlgorithm, key: &DataChannelKey, packet: &[u8]) -> Result<(u32, Vec<u8>)> {
    let tag_size = mac.tag_size();
    if packet.len() < tag_size + 16 {
        return Err(CryptoError::DecryptionFailed);
    }
    let (tag, rest) = packet.split_at(tag_size);
    let (iv, ciphertext) = rest.split_at(16);

    let expected = mac.compute(&key.hmac_key, &[iv, ciphertext]);
    if !bool::from(expected.ct_eq(tag)) {
        return Err(CryptoError::HmacVerificationFailed);
    }

    let payload = cbc_decrypt(alg, &key.cipher_key, iv.try_into().unwrap(), ciphertext)?;
    if payload.len() < PACKET_ID_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let packet_id = u32::from_be_bytes(payload[..PACKET_ID_SIZE].try_into().unwrap());
    Ok((packet_id, payload[PACKET_ID_SIZE..].to_vec()))
}

fn cbc_encrypt(alg: CbcAlgorithm, key: &[u8], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>> {
    let err = || CryptoError::EncryptionFailed("AES-CBC encryption failed");
    match alg {
        CbcAlgorithm::Aes128Cbc => Ok(Aes128CbcEnc::new_from_slices(key, iv).map_err(|_| err())?.encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext)),
        CbcAlgorithm::Aes192Cbc => Ok(Aes192CbcEnc::new_from_slices(key, iv).map_err(|_| err())?.encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext)),
        CbcAlgorithm::Aes256Cbc => Ok(Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| err())?.encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext)),
    }
}

fn cbc_decrypt(alg: CbcAlgorithm, key: &[u8], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let err = CryptoError::DecryptionFailed;
    match alg {
        CbcAlgorithm::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv).map_err(|_| err)?.decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext).map_err(|_| err),
        CbcAlgorithm::Aes192Cbc => Aes192CbcDec::new_from_slices(key, iv).map_err(|_| err)?.decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext).map_err(|_| err),
        CbcAlgorithm::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv).map_err(|_| err)?.decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext).map_err(|_| err),
    }
}

fn encrypt_ctr(alg: CtrAlgorithm, mac: MacAlgorithm, key: &DataChannelKey, packet_id: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut payload = Vec::with_capacity(PACKET_ID_SIZE + plaintext.len());
    payload.extend_from_slice(&packet_id.to_be_bytes());
    payload.extend_from_slice(plaintext);

    let ciphertext = ctr_apply(alg, &key.cipher_key, &iv, &payload)?;
    let tag = mac.compute(&key.hmac_key, &[iv.as_slice(), ciphertext.as_slice()]);

    let mut out = Vec::with_capacity(tag.len() + iv.len() + ciphertext.len());
    out.extend_from_slice(&tag);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_ctr(alg: CtrAlgorithm, mac: MacAlgorithm, key: &DataChannelKey, packet: &[u8]) -> Result<(u32, Vec<u8>)> {
    let tag_size = mac.tag_size();
    if packet.len() < tag_size + 16 {
        return Err(CryptoError::DecryptionFailed);
    }
    let (tag, rest) = packet.split_at(tag_size);
    let (iv, ciphertext) = rest.split_at(16);

    let expected = mac.compute(&key.hmac_key, &[iv, ciphertext]);
    if !bool::from(expected.ct_eq(tag)) {
        return Err(CryptoError::HmacVerificationFailed);
    }

    // CTR is its own inverse.
    let payload = ctr_apply(alg, &key.cipher_key, iv.try_into().unwrap(), ciphertext)?;
    if payload.len() < PACKET_ID_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let packet_id = u32::from_be_bytes(payload[..PACKET_ID_SIZE].try_into().unwrap());
    Ok((packet_id, payload[PACKET_ID_SIZE..].to_vec()))
}

fn ctr_apply(alg: CtrAlgorithm, key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
    use ctr::cipher::StreamCipher;
    let err = || CryptoError::EncryptionFailed("AES-CTR failed");
    let mut buffer = data.to_vec();
    match alg {
        CtrAlgorithm::Aes128Ctr => Aes128Ctr::new_from_slices(key, iv).map_err(|_| err())?.apply_keystream(&mut buffer),
        CtrAlgorithm::Aes192Ctr => Aes192Ctr::new_from_slices(key, iv).map_err(|_| err())?.apply_keystream(&mut buffer),
        CtrAlgorithm::Aes256Ctr => Aes256Ctr::new_from_slices(key, iv).map_err(|_| err())?.apply_keystream(&mut buffer),
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive_prf_keys, KeySource};

    fn test_material() -> crate::kdf::KeyMaterial {
        let client = KeySource::new(Some([0x11u8; 48]), [0x22u8; 32], [0x33u8; 32]);
        let server = KeySource::new(None, [0x44u8; 32], [0x55u8; 32]);
        derive_prf_keys(&client, &server, 1, 2).unwrap()
    }

    fn roundtrip(suite: CipherSuite) {
        let material = test_material();
        let encrypt_key = DataChannelKey::new(&material.client_key, suite);
        let decrypt_key = DataChannelKey::new(&material.client_key, suite);

        let mut encryptor = PacketCipher::new(encrypt_key);
        let mut decryptor = PacketCipher::new(decrypt_key);

        let header = b"session-header";
        for len in [1usize, 8, 64, 512, 4096] {
            let plaintext = vec![0xABu8; len];
            let wire = encryptor.encrypt(header, &plaintext).unwrap();
            let (packet_id, decrypted) = decryptor.decrypt(header, &wire).unwrap();
            assert_eq!(decrypted, plaintext);
            assert_eq!(packet_id, encryptor.tx_packet_id());
        }
    }

    #[test]
    fn aead_roundtrip_all_sizes() {
        roundtrip(CipherSuite::from_name("AES-256-GCM", None).unwrap());
        roundtrip(CipherSuite::from_name("AES-128-GCM", None).unwrap());
    }

    #[test]
    fn cbc_roundtrip_all_macs() {
        for mac in [MacAlgorithm::Sha1, MacAlgorithm::Sha256, MacAlgorithm::Sha384, MacAlgorithm::Sha512] {
            roundtrip(CipherSuite::from_name("AES-256-CBC", Some(mac)).unwrap());
        }
    }

    #[test]
    fn ctr_roundtrip_all_macs() {
        for mac in [MacAlgorithm::Sha1, MacAlgorithm::Sha256, MacAlgorithm::Sha384, MacAlgorithm::Sha512] {
            roundtrip(CipherSuite::from_name("AES-256-CTR", Some(mac)).unwrap());
        }
    }

    #[test]
    fn plain_roundtrip() {
        roundtrip(CipherSuite::from_name("PLAIN", None).unwrap());
    }

    #[test]
    fn bf_cbc_is_recognized_but_unsupported() {
        assert!(matches!(CipherSuite::from_name("BF-CBC", None), Err(CryptoError::Unsupported(_))));
    }

    #[test]
    fn aead_tamper_detection() {
        let material = test_material();
        let suite = CipherSuite::from_name("AES-256-GCM", None).unwrap();
        let mut encryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));
        let mut decryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));

        let mut wire = encryptor.encrypt(b"hdr", b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(decryptor.decrypt(b"hdr", &wire).is_err());
    }

    #[test]
    fn cbc_tag_tamper_detected() {
        let material = test_material();
        let suite = CipherSuite::from_name("AES-256-CBC", Some(MacAlgorithm::Sha256)).unwrap();
        let mut encryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));
        let mut decryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));

        let mut wire = encryptor.encrypt(b"hdr", b"payload").unwrap();
        wire[0] ^= 0xFF;
        assert!(matches!(decryptor.decrypt(b"hdr", &wire), Err(CryptoError::HmacVerificationFailed)));
    }

    #[test]
    fn replay_is_rejected() {
        let material = test_material();
        let suite = CipherSuite::from_name("AES-256-GCM", None).unwrap();
        let mut encryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));
        let mut decryptor = PacketCipher::new(DataChannelKey::new(&material.client_key, suite));

        let p1 = encryptor.encrypt(b"hdr", b"one").unwrap();
        let p2 = encryptor.encrypt(b"hdr", b"two").unwrap();

        assert!(decryptor.decrypt(b"hdr", &p1).is_ok());
        assert!(decryptor.decrypt(b"hdr", &p2).is_ok());
        assert!(matches!(decryptor.decrypt(b"hdr", &p1), Err(CryptoError::ReplayDetected)));
    }

    #[test]
    fn replay_window_basics() {
        let mut window = ReplayWindow::new();
        assert!(window.check_and_update(1));
        assert!(window.check_and_update(2));
        assert!(!window.check_and_update(1));
        assert!(window.check_and_update(200));
        assert!(!window.check_and_update(1));
        assert!(window.check_and_update(199));
        assert!(!window.check_and_update(199));
    }
}
