//! `cryptomator://` URIs.
//!
//! A vault URI bundles the host location of a vault and a path inside it:
//!
//! ```text
//! cryptomator://<percent-encoded file URI of the vault>/<path inside the vault>
//! ```
//!
//! The authority component carries the vault's own `file://` URI with every
//! reserved character percent-encoded, so the outer URI stays well-formed
//! regardless of where the vault lives. Query and fragment components are not
//! allowed.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{VaultError, VaultResult};
use crate::vault::path::VaultPath;

/// URI scheme for vault paths.
pub const URI_SCHEME: &str = "cryptomator";

/// Parsed `cryptomator://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultUri {
    path_to_vault: PathBuf,
    path_inside_vault: VaultPath,
}

impl VaultUri {
    /// Build a URI string for a vault location and a path inside it.
    ///
    /// `path_to_vault` must be absolute.
    pub fn create(path_to_vault: &Path, path_inside_vault: &VaultPath) -> VaultResult<String> {
        let vault_url = Url::from_file_path(path_to_vault).map_err(|_| {
            VaultError::invalid_uri(format!(
                "vault path must be absolute: {}",
                path_to_vault.display()
            ))
        })?;
        Ok(format!(
            "{URI_SCHEME}://{}{}",
            encode_authority(vault_url.as_str()),
            path_inside_vault
        ))
    }

    /// Parse a `cryptomator://` URI string.
    pub fn parse(uri: &str) -> VaultResult<VaultUri> {
        let url = Url::parse(uri)
            .map_err(|e| VaultError::invalid_uri(format!("not a valid uri: {e}")))?;

        if url.scheme() != URI_SCHEME {
            return Err(VaultError::invalid_uri(format!(
                "expected scheme '{URI_SCHEME}', got '{}'",
                url.scheme()
            )));
        }
        if url.query().is_some() {
            return Err(VaultError::invalid_uri("query component not allowed"));
        }
        if url.fragment().is_some() {
            return Err(VaultError::invalid_uri("fragment component not allowed"));
        }

        let authority = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| VaultError::invalid_uri("authority component required"))?;
        let vault_url_str = decode_authority(authority)?;
        let vault_url = Url::parse(&vault_url_str)
            .map_err(|e| VaultError::invalid_uri(format!("authority is not a uri: {e}")))?;
        let path_to_vault = vault_url
            .to_file_path()
            .map_err(|_| VaultError::invalid_uri("authority is not a file uri"))?;

        let raw_path = url.path();
        if raw_path.is_empty() {
            return Err(VaultError::invalid_uri("path component required"));
        }
        let path_inside_vault = VaultPath::new(percent_decode(raw_path)?);

        Ok(VaultUri { path_to_vault, path_inside_vault })
    }

    pub fn path_to_vault(&self) -> &Path {
        &self.path_to_vault
    }

    pub fn path_inside_vault(&self) -> &VaultPath {
        &self.path_inside_vault
    }
}

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

fn encode_authority(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        if UNRESERVED.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_authority(s: &str) -> VaultResult<String> {
    percent_decode(s)
}

fn percent_decode(s: &str) -> VaultResult<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1);
            let lo = bytes.get(i + 2);
            let (hi, lo) = match (hi.and_then(hex_val), lo.and_then(hex_val)) {
                (Some(hi), Some(lo)) => (hi, lo),
                _ => return Err(VaultError::invalid_uri("malformed percent encoding")),
            };
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| VaultError::invalid_uri("percent-decoded bytes are not utf-8"))
}

fn hex_val(b: &u8) -> Option<u8> {
    (*b as char).to_digit(16).map(|v| v as u8)
}
