//! Per-file cryptographic header.
//!
//! Every encrypted content file starts with a 68-byte header:
//!
//! ```text
//! nonce (12) ‖ AES-256-GCM(size (8) ‖ content key (32)) (40) ‖ tag (16)
//! ```
//!
//! The payload carries the file's randomly generated content key and the
//! cleartext size at the time the header was last persisted. A size field of
//! all ones means the size has never been persisted; readers then derive it
//! from the ciphertext geometry instead.
//!
//! The header nonce doubles as associated data for every content chunk, so it
//! is fixed for the lifetime of the file and reused when the header is
//! re-persisted with an updated size.

use aead::Payload;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use super::keys::MasterKey;

/// Total size of an encrypted file header in bytes.
pub const HEADER_SIZE: usize = 68;

/// Size of the header nonce in bytes.
pub const HEADER_NONCE_SIZE: usize = 12;

/// Cleartext payload size: 8-byte size field + 32-byte content key.
const HEADER_PAYLOAD_SIZE: usize = 40;

/// Sentinel size field value meaning "size not persisted yet".
const SIZE_UNKNOWN: u64 = u64::MAX;

/// Errors produced by header encryption and decryption.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The buffer is not exactly [`HEADER_SIZE`] bytes.
    #[error("encrypted header has wrong length: expected {HEADER_SIZE}, got {actual}")]
    WrongLength { actual: usize },

    /// The GCM tag did not verify: tampering or wrong masterkey.
    #[error("header authentication failed")]
    AuthenticationFailed,

    /// The decrypted payload has an unexpected shape.
    #[error("decrypted header payload is malformed")]
    Malformed,

    /// Encryption failed unexpectedly.
    #[error("header encryption failed")]
    EncryptionFailed,
}

/// Decrypted per-file header state.
pub struct FileHeader {
    nonce: [u8; HEADER_NONCE_SIZE],
    content_key: Zeroizing<[u8; 32]>,
    cleartext_size: u64,
}

impl std::fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHeader")
            .field("nonce", &hex::encode(self.nonce))
            .field("cleartext_size", &self.cleartext_size())
            .finish_non_exhaustive()
    }
}

impl FileHeader {
    /// Create a fresh header with a random nonce and content key.
    ///
    /// The size field starts out unknown and is filled in when the header is
    /// persisted.
    pub fn create() -> Self {
        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        let mut content_key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut nonce);
        rand::rng().fill_bytes(&mut *content_key);
        FileHeader { nonce, content_key, cleartext_size: SIZE_UNKNOWN }
    }

    /// The header nonce; part of every chunk's associated data.
    #[inline]
    pub fn nonce(&self) -> &[u8; HEADER_NONCE_SIZE] {
        &self.nonce
    }

    /// The file's content key.
    #[inline]
    pub fn content_key(&self) -> &[u8; 32] {
        &self.content_key
    }

    /// The embedded cleartext size, or `None` if never persisted.
    #[inline]
    pub fn cleartext_size(&self) -> Option<u64> {
        if self.cleartext_size == SIZE_UNKNOWN {
            None
        } else {
            Some(self.cleartext_size)
        }
    }

    /// Record the current cleartext size for the next persist.
    #[inline]
    pub fn set_cleartext_size(&mut self, size: u64) {
        debug_assert_ne!(size, SIZE_UNKNOWN);
        self.cleartext_size = size;
    }

    /// Encrypt this header for persistence.
    ///
    /// Reuses the stored nonce so previously written chunks, whose associated
    /// data binds the header nonce, remain valid.
    pub fn encrypt(&self, master_key: &MasterKey) -> Result<Vec<u8>, HeaderError> {
        master_key.with_aes_key(|aes_key| {
            let key: &Key<Aes256Gcm> = aes_key.into();
            let cipher = Aes256Gcm::new(key);

            let mut payload = Zeroizing::new([0u8; HEADER_PAYLOAD_SIZE]);
            payload[..8].copy_from_slice(&self.cleartext_size.to_be_bytes());
            payload[8..].copy_from_slice(&*self.content_key);

            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&self.nonce), payload.as_ref())
                .map_err(|_| HeaderError::EncryptionFailed)?;

            let mut out = Vec::with_capacity(HEADER_SIZE);
            out.extend_from_slice(&self.nonce);
            out.extend_from_slice(&ciphertext);
            debug_assert_eq!(out.len(), HEADER_SIZE);
            Ok(out)
        })
    }

    /// Decrypt a persisted header.
    pub fn decrypt(encrypted: &[u8], master_key: &MasterKey) -> Result<Self, HeaderError> {
        if encrypted.len() != HEADER_SIZE {
            return Err(HeaderError::WrongLength { actual: encrypted.len() });
        }

        let mut nonce = [0u8; HEADER_NONCE_SIZE];
        nonce.copy_from_slice(&encrypted[..HEADER_NONCE_SIZE]);

        master_key.with_aes_key(|aes_key| {
            let key: &Key<Aes256Gcm> = aes_key.into();
            let cipher = Aes256Gcm::new(key);

            let payload = cipher
                .decrypt(Nonce::from_slice(&nonce), &encrypted[HEADER_NONCE_SIZE..])
                .map_err(|_| HeaderError::AuthenticationFailed)?;
            let payload = Zeroizing::new(payload);

            if payload.len() != HEADER_PAYLOAD_SIZE {
                return Err(HeaderError::Malformed);
            }

            let cleartext_size = u64::from_be_bytes(payload[..8].try_into().expect("8 bytes"));
            let mut content_key = Zeroizing::new([0u8; 32]);
            content_key.copy_from_slice(&payload[8..]);

            Ok(FileHeader { nonce, content_key, cleartext_size })
        })
    }
}
