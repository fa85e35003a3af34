//! Vault configuration token.
//!
//! A vault carries its parameters in `vault.cryptomator`, a compact JWT
//! signed with the raw 64-byte masterkey. The verified payload declares the
//! vault format, the filename shortening threshold and the cipher
//! combination. A signature failure means the supplied masterkey does not
//! belong to this vault; an unexpected format or cipher combination means the
//! vault was written by an incompatible implementation.

use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::crypto::keys::{MasterKey, RawKey};
use crate::error::{VaultError, VaultResult};

/// Default name of the vault configuration file.
pub const DEFAULT_VAULT_CONFIG_FILENAME: &str = "vault.cryptomator";

/// Vault format supported by this implementation.
pub const VAULT_FORMAT: i32 = 8;

/// Default threshold above which encrypted filenames are shortened.
pub const DEFAULT_SHORTENING_THRESHOLD: usize = 220;

/// Cipher combination declared by the vault configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherCombo {
    /// AES-SIV filenames, AES-GCM content.
    SivGcm,
}

impl CipherCombo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIV_GCM" => Some(CipherCombo::SivGcm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherCombo::SivGcm => "SIV_GCM",
        }
    }
}

/// Signed claims of the vault configuration token.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct VaultConfigClaims {
    jti: String,
    format: i32,
    shortening_threshold: usize,
    cipher_combo: String,
}

/// Verified vault configuration.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Unique token id of this vault.
    pub jti: String,
    /// Vault format number.
    pub format: i32,
    /// Maximum host filename length before shortening applies.
    pub shortening_threshold: usize,
    /// Cipher combination for names and content.
    pub cipher_combo: CipherCombo,
}

/// Caller-supplied source of raw masterkey material.
///
/// The `key_id` is the URI from the configuration token's `kid` header; how
/// it maps to key bytes (key file, keychain, hardware token) is up to the
/// implementation.
pub trait MasterkeyLoader {
    fn load_key(&self, key_id: &str) -> VaultResult<RawKey>;
}

impl<F> MasterkeyLoader for F
where
    F: Fn(&str) -> VaultResult<RawKey>,
{
    fn load_key(&self, key_id: &str) -> VaultResult<RawKey> {
        self(key_id)
    }
}

/// Key id recorded in configuration tokens created by [`sign_vault_config`].
const DEFAULT_KEY_ID: &str = "masterkeyfile:masterkey.cryptomator";

/// Extract the `kid` header from an unverified configuration token.
///
/// The key id is needed to load the masterkey before the signature can be
/// checked; nothing else from the token may be trusted at this point.
pub fn unverified_key_id(token: &str) -> VaultResult<String> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| VaultError::corrupted(format!("unreadable vault config header: {e}")))?;
    header.kid.ok_or_else(|| VaultError::corrupted("vault config lacks a key id"))
}

/// Verify a configuration token and return the vault parameters.
#[instrument(level = "debug", skip_all)]
pub fn validate_vault_config(token: &str, master_key: &MasterKey) -> VaultResult<VaultConfig> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| VaultError::corrupted(format!("unreadable vault config header: {e}")))?;

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

    let claims: VaultConfigClaims = master_key
        .validate_jwt(token, &validation)
        .map_err(|_| VaultError::VaultKeyInvalid)?;

    if claims.format != VAULT_FORMAT {
        return Err(VaultError::VaultVersionMismatch {
            detail: format!("vault format {}", claims.format),
        });
    }

    let cipher_combo = CipherCombo::parse(&claims.cipher_combo).ok_or_else(|| {
        VaultError::VaultVersionMismatch {
            detail: format!("cipher combo {}", claims.cipher_combo),
        }
    })?;

    debug!(
        jti = %claims.jti,
        shortening_threshold = claims.shortening_threshold,
        "vault config verified"
    );

    Ok(VaultConfig {
        jti: claims.jti,
        format: claims.format,
        shortening_threshold: claims.shortening_threshold,
        cipher_combo,
    })
}

/// Sign a fresh configuration token for a new vault.
pub fn sign_vault_config(
    jti: &str,
    shortening_threshold: usize,
    master_key: &MasterKey,
) -> VaultResult<String> {
    let claims = VaultConfigClaims {
        jti: jti.to_string(),
        format: VAULT_FORMAT,
        shortening_threshold,
        cipher_combo: CipherCombo::SivGcm.as_str().to_string(),
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(DEFAULT_KEY_ID.to_string());

    master_key
        .sign_jwt(&header, &claims)
        .map_err(|e| VaultError::corrupted(format!("failed to sign vault config: {e}")))
}
