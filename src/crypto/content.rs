//! Chunked content cryptography and ciphertext geometry.
//!
//! File payloads are partitioned into cleartext chunks of at most
//! [`CHUNK_PAYLOAD_SIZE`] bytes. Each chunk encrypts independently with
//! AES-256-GCM under the file's content key:
//!
//! ```text
//! chunk nonce (12) ‖ ciphertext (≤ 32768) ‖ tag (16)
//! ```
//!
//! The associated data of chunk `i` is `i` as a big-endian u64 followed by
//! the header nonce, which pins every chunk to its position in this
//! particular file and defeats chunk reordering or cross-file splicing.

use aead::Payload;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

use super::header::{FileHeader, HEADER_NONCE_SIZE, HEADER_SIZE};

/// Maximum cleartext bytes per chunk.
pub const CHUNK_PAYLOAD_SIZE: usize = 32768;

/// Size of the per-chunk nonce in bytes.
pub const CHUNK_NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Per-chunk ciphertext overhead (nonce + tag).
pub const CHUNK_OVERHEAD: usize = CHUNK_NONCE_SIZE + TAG_SIZE;

/// Maximum ciphertext bytes per chunk.
pub const CHUNK_CIPHERTEXT_SIZE: usize = CHUNK_PAYLOAD_SIZE + CHUNK_OVERHEAD;

/// Errors produced by chunk encryption and decryption.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// A ciphertext chunk is smaller than nonce + tag.
    #[error("chunk {chunk_index} is truncated: {actual} bytes, minimum {CHUNK_OVERHEAD}")]
    Truncated { chunk_index: u64, actual: usize },

    /// The GCM tag did not verify for this chunk.
    #[error("chunk {chunk_index} authentication failed")]
    AuthenticationFailed { chunk_index: u64 },

    /// Encryption failed unexpectedly.
    #[error("chunk {chunk_index} encryption failed")]
    EncryptionFailed { chunk_index: u64 },
}

/// Chunk index containing the given cleartext offset.
#[inline]
pub fn chunk_index(cleartext_offset: u64) -> u64 {
    cleartext_offset / CHUNK_PAYLOAD_SIZE as u64
}

/// Offset within its chunk of the given cleartext offset.
#[inline]
pub fn offset_in_chunk(cleartext_offset: u64) -> usize {
    (cleartext_offset % CHUNK_PAYLOAD_SIZE as u64) as usize
}

/// Ciphertext file offset where the given chunk starts.
#[inline]
pub fn ciphertext_chunk_offset(chunk_index: u64) -> u64 {
    HEADER_SIZE as u64 + chunk_index * CHUNK_CIPHERTEXT_SIZE as u64
}

/// Total ciphertext file size for a given cleartext size, header included.
pub fn ciphertext_file_size(cleartext_size: u64) -> u64 {
    let full_chunks = cleartext_size / CHUNK_PAYLOAD_SIZE as u64;
    let remainder = cleartext_size % CHUNK_PAYLOAD_SIZE as u64;
    let mut total = HEADER_SIZE as u64 + full_chunks * CHUNK_CIPHERTEXT_SIZE as u64;
    if remainder > 0 {
        total += remainder + CHUNK_OVERHEAD as u64;
    }
    total
}

/// Cleartext size for a given total ciphertext size, header included.
///
/// A header-only file is an empty file. When the arithmetic cannot add up
/// (truncated ciphertext, or a total smaller than the header) the result is 0
/// and a warning is emitted, so a damaged file surfaces as empty rather than
/// as garbage.
pub fn cleartext_file_size(ciphertext_size: u64) -> u64 {
    if ciphertext_size < HEADER_SIZE as u64 {
        warn!(
            ciphertext_size,
            "ciphertext smaller than file header, reporting size 0"
        );
        return 0;
    }
    let payload = ciphertext_size - HEADER_SIZE as u64;
    if payload == 0 {
        return 0;
    }
    let remainder = payload % CHUNK_CIPHERTEXT_SIZE as u64;
    if remainder != 0 && remainder < CHUNK_OVERHEAD as u64 {
        warn!(
            ciphertext_size,
            "ciphertext size inconsistent with chunk geometry, reporting size 0"
        );
        return 0;
    }
    let num_chunks = payload.div_ceil(CHUNK_CIPHERTEXT_SIZE as u64);
    payload - num_chunks * CHUNK_OVERHEAD as u64
}

/// Encrypt one cleartext chunk with a fresh random nonce.
pub fn encrypt_chunk(
    cleartext: &[u8],
    chunk_index: u64,
    header: &FileHeader,
) -> Result<Vec<u8>, ChunkError> {
    debug_assert!(cleartext.len() <= CHUNK_PAYLOAD_SIZE);

    let mut chunk_nonce = [0u8; CHUNK_NONCE_SIZE];
    rand::rng().fill_bytes(&mut chunk_nonce);

    let aad = chunk_aad(chunk_index, header.nonce());
    let key = Key::<Aes256Gcm>::from_slice(header.content_key());
    let cipher = Aes256Gcm::new(key);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&chunk_nonce), Payload { msg: cleartext, aad: &aad })
        .map_err(|_| ChunkError::EncryptionFailed { chunk_index })?;

    let mut out = Vec::with_capacity(CHUNK_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&chunk_nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt one ciphertext chunk, verifying its position-binding tag.
pub fn decrypt_chunk(
    encrypted: &[u8],
    chunk_index: u64,
    header: &FileHeader,
) -> Result<Zeroizing<Vec<u8>>, ChunkError> {
    if encrypted.len() < CHUNK_OVERHEAD {
        return Err(ChunkError::Truncated { chunk_index, actual: encrypted.len() });
    }

    let nonce = Nonce::from_slice(&encrypted[..CHUNK_NONCE_SIZE]);
    let ciphertext = &encrypted[CHUNK_NONCE_SIZE..];

    let aad = chunk_aad(chunk_index, header.nonce());
    let key = Key::<Aes256Gcm>::from_slice(header.content_key());
    let cipher = Aes256Gcm::new(key);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &aad })
        .map(Zeroizing::new)
        .map_err(|_| {
            warn!(chunk_index, "chunk authentication failed");
            ChunkError::AuthenticationFailed { chunk_index }
        })
}

/// Encrypt a whole buffer as header + chunks (used for symlink targets).
pub fn encrypt_content(cleartext: &[u8], header: &FileHeader) -> Result<Vec<u8>, ChunkError> {
    let mut out = Vec::with_capacity(ciphertext_file_size(cleartext.len() as u64) as usize);
    for (i, chunk) in cleartext.chunks(CHUNK_PAYLOAD_SIZE).enumerate() {
        out.extend_from_slice(&encrypt_chunk(chunk, i as u64, header)?);
    }
    Ok(out)
}

/// Decrypt a whole chunked buffer (everything after the header).
pub fn decrypt_content(
    ciphertext: &[u8],
    header: &FileHeader,
) -> Result<Zeroizing<Vec<u8>>, ChunkError> {
    let mut out = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
    for (i, chunk) in ciphertext.chunks(CHUNK_CIPHERTEXT_SIZE).enumerate() {
        let cleartext = decrypt_chunk(chunk, i as u64, header)?;
        out.extend_from_slice(&cleartext);
    }
    Ok(out)
}

fn chunk_aad(chunk_index: u64, header_nonce: &[u8; HEADER_NONCE_SIZE]) -> [u8; 8 + HEADER_NONCE_SIZE] {
    let mut aad = [0u8; 8 + HEADER_NONCE_SIZE];
    aad[..8].copy_from_slice(&chunk_index.to_be_bytes());
    aad[8..].copy_from_slice(header_nonce);
    aad
}
