//! Payload codec: serialize, compress, encrypt.
//!
//! The encoding order is fixed (JSON-stringify, then gzip, then AEAD) and
//! `decode` reverses it exactly, driven by the flags recorded in the item's
//! metadata at write time. Both stages are pure except encryption, which
//! consumes the in-memory key handle provisioned at namespace init.
//!
//! Wire shapes:
//! - compressed stage output is base64 of the gzip stream;
//! - encrypted stage output is base64 of `nonce(12) ‖ ciphertext+tag`.

use std::fmt;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;

use strata_common::error::{StoreError, StoreResult};

/// Length of the raw encryption key in bytes.
pub const KEY_LEN: usize = 32;
/// Length of the AEAD nonce prepended to each ciphertext.
pub const NONCE_LEN: usize = 12;

/// A 256-bit namespace encryption key.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a random key from the system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse the base64 form stored in the namespace key record.
    pub fn from_base64(encoded: &str) -> StoreResult<Self> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| StoreError::CryptoFail(format!("malformed key record: {}", e)))?;
        if raw.len() != KEY_LEN {
            return Err(StoreError::CryptoFail(format!(
                "key record has {} bytes, expected {}",
                raw.len(),
                KEY_LEN
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        Ok(Self { bytes })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// The encode/decode pipeline for one namespace.
pub struct Codec {
    key: Option<EncryptionKey>,
}

impl Codec {
    pub fn new(key: Option<EncryptionKey>) -> Self {
        Self { key }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Encode a value for storage. The returned string is what the chunker
    /// splits; its byte length becomes the metadata `size`.
    pub fn encode(&self, value: &Value, compress: bool, encrypt: bool) -> StoreResult<String> {
        let mut text = serde_json::to_string(value)?;
        if compress {
            text = compress_text(&text)?;
        }
        if encrypt {
            text = self.encrypt_text(&text)?;
        }
        Ok(text)
    }

    /// Decode a stored payload back to its JSON text, reversing exactly the
    /// stages recorded in the metadata flags.
    pub fn decode(&self, stored: &str, compressed: bool, encrypted: bool) -> StoreResult<String> {
        let mut text = stored.to_string();
        if encrypted {
            text = self.decrypt_text(&text)?;
        }
        if compressed {
            text = decompress_text(&text)?;
        }
        Ok(text)
    }

    fn encrypt_text(&self, plaintext: &str) -> StoreResult<String> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| StoreError::CryptoFail("encryption key not initialized".into()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::CryptoFail(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    fn decrypt_text(&self, encoded: &str) -> StoreResult<String> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| StoreError::CryptoFail("encryption key not initialized".into()))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| StoreError::CryptoFail(format!("malformed ciphertext: {}", e)))?;
        if raw.len() < NONCE_LEN {
            return Err(StoreError::CryptoFail("ciphertext too short".into()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StoreError::CryptoFail("authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::CryptoFail(format!("plaintext not UTF-8: {}", e)))
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").field("has_key", &self.has_key()).finish()
    }
}

fn compress_text(text: &str) -> StoreResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| StoreError::Serialization(format!("compress failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| StoreError::Serialization(format!("compress failed: {}", e)))?;
    Ok(BASE64.encode(compressed))
}

fn decompress_text(encoded: &str) -> StoreResult<String> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| StoreError::CorruptData(format!("malformed compressed payload: {}", e)))?;
    let mut decoder = GzDecoder::new(&raw[..]);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| StoreError::CorruptData(format!("decompress failed: {}", e)))?;
    Ok(out)
}
