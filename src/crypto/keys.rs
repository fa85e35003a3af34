#![forbid(unsafe_code)]

//! Masterkey material and scoped access to it.
//!
//! The vault masterkey is a pair of 256-bit keys: one for AES encryption and
//! one for MAC/SIV authentication. Key bytes are only ever handed out through
//! scoped callbacks so they cannot leak into long-lived structures, and all
//! buffers are zeroed on drop.

use std::fmt;

use generic_array::{typenum::U64, GenericArray};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

/// Length of the raw combined key material (AES key ‖ MAC key).
pub const RAW_KEY_LEN: usize = 64;

/// Raw 64-byte key material as produced by a [`MasterkeyLoader`].
///
/// Layout is AES key first, MAC key second, matching the on-disk masterkey
/// formats. The buffer is zeroed on drop.
///
/// [`MasterkeyLoader`]: crate::vault::config::MasterkeyLoader
pub struct RawKey(Zeroizing<[u8; RAW_KEY_LEN]>);

impl RawKey {
    pub fn new(bytes: [u8; RAW_KEY_LEN]) -> Self {
        RawKey(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; RAW_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawKey(..)")
    }
}

/// Master key pair for vault operations.
///
/// # Thread safety
///
/// `MasterKey` is `Send + Sync`; share it across threads with `Arc`.
pub struct MasterKey {
    aes_master_key: Zeroizing<[u8; 32]>,
    mac_master_key: Zeroizing<[u8; 32]>,
}

impl Clone for MasterKey {
    fn clone(&self) -> Self {
        MasterKey {
            aes_master_key: self.aes_master_key.clone(),
            mac_master_key: self.mac_master_key.clone(),
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key bytes; a short fingerprint is enough for tracing.
        let fp = ring::digest::digest(&ring::digest::SHA256, &*self.aes_master_key);
        write!(f, "MasterKey(fp={})", hex::encode(&fp.as_ref()[..4]))
    }
}

impl MasterKey {
    /// Create a master key pair from raw key material.
    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Self {
        MasterKey {
            aes_master_key: Zeroizing::new(aes_key),
            mac_master_key: Zeroizing::new(mac_key),
        }
    }

    /// Create a master key pair from combined 64-byte material (AES ‖ MAC).
    pub fn from_raw(raw: &RawKey) -> Self {
        let bytes = raw.as_bytes();
        let mut aes = [0u8; 32];
        let mut mac = [0u8; 32];
        aes.copy_from_slice(&bytes[..32]);
        mac.copy_from_slice(&bytes[32..]);
        MasterKey::new(aes, mac)
    }

    /// Generate a fresh random master key pair.
    pub fn random() -> Self {
        let mut aes = [0u8; 32];
        let mut mac = [0u8; 32];
        rand::rng().fill_bytes(&mut aes);
        rand::rng().fill_bytes(&mut mac);
        MasterKey::new(aes, mac)
    }

    /// Execute a function with access to the AES encryption key.
    pub fn with_aes_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        f(&self.aes_master_key)
    }

    /// Execute a function with the combined 64-byte key (AES ‖ MAC).
    ///
    /// The temporary buffer is zeroed when the callback returns.
    pub fn with_raw_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let mut key = Zeroizing::new([0u8; RAW_KEY_LEN]);
        key[..32].copy_from_slice(&*self.aes_master_key);
        key[32..].copy_from_slice(&*self.mac_master_key);
        f(&*key)
    }

    /// Execute a function with the keys in AES-SIV order (MAC ‖ AES).
    ///
    /// AES-SIV expects the MAC half first; this is the key layout used for
    /// all filename operations.
    pub fn with_siv_key<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        struct ZeroizeOnDrop(GenericArray<u8, U64>);

        impl Drop for ZeroizeOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        let mut key = ZeroizeOnDrop(GenericArray::<u8, U64>::default());
        key.0[..32].copy_from_slice(&*self.mac_master_key);
        key.0[32..].copy_from_slice(&*self.aes_master_key);
        f(&key.0)
    }

    /// Validate and decode a JWT signed with the combined key material.
    pub fn validate_jwt<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, jsonwebtoken::errors::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        self.with_raw_key(|key_bytes| {
            let decoding_key = jsonwebtoken::DecodingKey::from_secret(key_bytes);
            jsonwebtoken::decode::<T>(token, &decoding_key, validation)
                .map(|token_data| token_data.claims)
        })
    }

    /// Sign claims into a JWT with the combined key material.
    pub fn sign_jwt<T>(
        &self,
        header: &jsonwebtoken::Header,
        claims: &T,
    ) -> Result<String, jsonwebtoken::errors::Error>
    where
        T: serde::Serialize,
    {
        self.with_raw_key(|key_bytes| {
            let encoding_key = jsonwebtoken::EncodingKey::from_secret(key_bytes);
            jsonwebtoken::encode(header, claims, &encoding_key)
        })
    }
}
