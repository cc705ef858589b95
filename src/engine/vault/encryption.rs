// ── Vault: Field-Level Content Encryption ──────────────────────────────────
//
// Memory content is sealed with AES-256-CBC + HMAC-SHA256 (encrypt-then-MAC)
// before it reaches SQLite. The record id is bound as associated data, so a
// ciphertext copied into another row fails verification.
//
// Sealed layout:  version(1) ‖ iv(16) ‖ ciphertext(16·n) ‖ tag(32)
//
// The 32-byte master key is supplied from outside (env var, OS keychain or raw
// bytes from the host). It is split with HKDF-SHA256 into independent
// encryption and MAC keys. The vault never generates or persists a key.

use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use log::{error, info};
use rand::Rng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::atoms::constants::MASTER_KEY_LEN;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::KeySource;

type HmacSha256 = Hmac<Sha256>;

const SEAL_VERSION: u8 = 1;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const TAG_LEN: usize = 32;
/// version + iv + one padded block + tag
const MIN_SEALED_LEN: usize = 1 + IV_LEN + BLOCK_LEN + TAG_LEN;

const HKDF_SALT: &[u8] = b"athena-brain-vault";
const HKDF_INFO_ENC: &[u8] = b"athena-brain/content/enc";
const HKDF_INFO_MAC: &[u8] = b"athena-brain/content/mac";

// ═════════════════════════════════════════════════════════════════════════════
// Master key
// ═════════════════════════════════════════════════════════════════════════════

/// The externally supplied 256-bit key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != MASTER_KEY_LEN {
            return Err(EngineError::Encryption(format!(
                "master key must be {MASTER_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(MasterKey(key))
    }

    pub fn from_base64(encoded: &str) -> EngineResult<Self> {
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| EngineError::Encryption(format!("master key is not valid base64: {e}")))?;
        let key = Self::from_bytes(&raw);
        raw.zeroize();
        key
    }

    /// Read the key from its configured source. A missing key is an
    /// `Encryption` error; the caller must provision one.
    pub fn load(source: &KeySource) -> EngineResult<Self> {
        match source {
            KeySource::Env { var } => {
                let mut value = std::env::var(var).map_err(|_| {
                    EngineError::Encryption(format!("environment variable {var} is not set"))
                })?;
                let key = Self::from_base64(&value);
                value.zeroize();
                if key.is_ok() {
                    info!("[vault] Loaded master key from ${}", var);
                }
                key
            }
            KeySource::Keyring { service, user } => {
                let entry = keyring::Entry::new(service, user).map_err(|e| {
                    error!("[vault] Keyring init failed: {}", e);
                    EngineError::Keyring(format!("keyring init failed: {e}"))
                })?;
                match entry.get_password() {
                    Ok(mut value) => {
                        let key = Self::from_base64(&value);
                        value.zeroize();
                        if key.is_ok() {
                            info!("[vault] Loaded master key from OS keychain ({}/{})", service, user);
                        }
                        key
                    }
                    Err(keyring::Error::NoEntry) => Err(EngineError::Encryption(format!(
                        "no key in OS keychain for {service}/{user}"
                    ))),
                    Err(e) => {
                        error!("[vault] OS keychain error: {}", e);
                        Err(EngineError::Keyring(e.to_string()))
                    }
                }
            }
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Field cipher
// ═════════════════════════════════════════════════════════════════════════════

/// Seals and opens record content with keys derived from a `MasterKey`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FieldCipher {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher([REDACTED])")
    }
}

impl FieldCipher {
    pub fn new(master: &MasterKey) -> EngineResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master.as_bytes());
        let mut cipher = FieldCipher {
            enc_key: [0u8; 32],
            mac_key: [0u8; 32],
        };
        hk.expand(HKDF_INFO_ENC, &mut cipher.enc_key)
            .map_err(|e| EngineError::Encryption(format!("key derivation failed: {e}")))?;
        hk.expand(HKDF_INFO_MAC, &mut cipher.mac_key)
            .map_err(|e| EngineError::Encryption(format!("key derivation failed: {e}")))?;
        Ok(cipher)
    }

    fn mac(&self, aad: &[u8], body: &[u8]) -> EngineResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| EngineError::Encryption(format!("HMAC init failed: {e}")))?;
        mac.update(&(aad.len() as u64).to_be_bytes());
        mac.update(aad);
        mac.update(body);
        Ok(mac)
    }

    /// Encrypt `plaintext`, binding `aad` (the record id) into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> EngineResult<Vec<u8>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill(&mut iv[..]);

        // Buffer: plaintext + up to one block of PKCS#7 padding
        let mut buf = vec![0u8; plaintext.len() + BLOCK_LEN];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct_len = cbc::Encryptor::<aes::Aes256>::new_from_slices(&self.enc_key, &iv)
            .map_err(|e| EngineError::Encryption(format!("cipher init failed: {e}")))?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .map_err(|e| EngineError::Encryption(format!("encryption failed: {e}")))?
            .len();

        let mut sealed = Vec::with_capacity(1 + IV_LEN + ct_len + TAG_LEN);
        sealed.push(SEAL_VERSION);
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&buf[..ct_len]);
        buf.zeroize();

        let tag = self.mac(aad, &sealed)?.finalize().into_bytes();
        sealed.extend_from_slice(&tag);
        Ok(sealed)
    }

    /// Verify the tag, then decrypt. Any failure after the key is known to be
    /// usable is an `Integrity` error; unverified plaintext is never returned.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> EngineResult<Vec<u8>> {
        use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

        if sealed.len() < MIN_SEALED_LEN {
            return Err(EngineError::Integrity(format!(
                "sealed content too short ({} bytes)",
                sealed.len()
            )));
        }
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        self.mac(aad, body)?
            .verify_slice(tag)
            .map_err(|_| EngineError::Integrity("authentication tag mismatch".into()))?;

        if body[0] != SEAL_VERSION {
            return Err(EngineError::Integrity(format!(
                "unknown seal version {}",
                body[0]
            )));
        }
        let (iv, ct) = body[1..].split_at(IV_LEN);
        if ct.len() % BLOCK_LEN != 0 {
            return Err(EngineError::Integrity("ciphertext is not block aligned".into()));
        }

        let mut buf = ct.to_vec();
        let plaintext = cbc::Decryptor::<aes::Aes256>::new_from_slices(&self.enc_key, iv)
            .map_err(|e| EngineError::Encryption(format!("cipher init failed: {e}")))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EngineError::Integrity("bad padding after verified tag".into()))?
            .to_vec();
        buf.zeroize();
        Ok(plaintext)
    }
}
