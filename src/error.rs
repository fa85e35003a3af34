//! Crate-wide error type for vault filesystem operations.
//!
//! Lower-level modules (name codec, header cryptor, chunk cryptor) define
//! their own focused error enums and convert into [`VaultError`] at the
//! filesystem boundary, so callers only ever match on one set of kinds.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type VaultResult<T> = Result<T, VaultError>;

/// Error kinds surfaced by vault filesystem operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A cleartext path did not resolve to an existing entry.
    #[error("no such entry: {path}")]
    NotFound { path: String },

    /// A create-new operation collided with an existing entry.
    #[error("entry already exists: {path}")]
    AlreadyExists { path: String },

    /// A directory was expected but something else was found.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// A non-directory was expected but a directory was found.
    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// A directory could not be removed because it still has entries.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// A cleartext name exceeds the configured maximum length.
    #[error("cleartext name of {length} characters exceeds limit of {limit}")]
    NameTooLong { length: usize, limit: usize },

    /// A cleartext name is not encodable (empty, or contains a separator).
    #[error("invalid cleartext name: {reason}")]
    InvalidName { reason: String },

    /// A MAC did not verify: forged or relocated ciphertext, or wrong key.
    #[error("authentication failed: {what}")]
    AuthenticationFailed { what: String },

    /// The masterkey does not verify the vault configuration.
    #[error("vault key does not verify the vault configuration")]
    VaultKeyInvalid,

    /// The vault configuration declares an unsupported format or cipher.
    #[error("unsupported vault configuration: {detail}")]
    VaultVersionMismatch { detail: String },

    /// A mutating operation was attempted on a readonly mount.
    #[error("filesystem is mounted readonly")]
    ReadOnly,

    /// The filesystem or an underlying channel has been closed.
    #[error("filesystem or channel is closed")]
    Closed,

    /// A byte-range lock overlaps one already held on the same channel.
    #[error("byte range lock overlaps an existing lock")]
    Overlap,

    /// Structural inconsistency that is not attributable to forged ciphertext.
    #[error("vault structure corrupted: {reason}")]
    Corrupted { reason: String },

    /// A vault URI could not be parsed.
    #[error("invalid vault uri: {reason}")]
    InvalidUri { reason: String },

    /// Passthrough of a host I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl VaultError {
    pub fn not_found(path: impl AsRef<str>) -> Self {
        VaultError::NotFound { path: path.as_ref().to_string() }
    }

    pub fn already_exists(path: impl AsRef<str>) -> Self {
        VaultError::AlreadyExists { path: path.as_ref().to_string() }
    }

    pub fn not_a_directory(path: impl AsRef<str>) -> Self {
        VaultError::NotADirectory { path: path.as_ref().to_string() }
    }

    pub fn is_a_directory(path: impl AsRef<str>) -> Self {
        VaultError::IsADirectory { path: path.as_ref().to_string() }
    }

    pub fn directory_not_empty(path: impl AsRef<str>) -> Self {
        VaultError::DirectoryNotEmpty { path: path.as_ref().to_string() }
    }

    pub fn authentication_failed(what: impl Into<String>) -> Self {
        VaultError::AuthenticationFailed { what: what.into() }
    }

    pub fn corrupted(reason: impl Into<String>) -> Self {
        VaultError::Corrupted { reason: reason.into() }
    }

    pub fn invalid_uri(reason: impl Into<String>) -> Self {
        VaultError::InvalidUri { reason: reason.into() }
    }

    /// Map a host I/O error observed while touching `path`, turning the
    /// common kinds into their vault-level counterparts.
    pub fn from_host_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VaultError::not_found(path.display().to_string()),
            io::ErrorKind::AlreadyExists => {
                VaultError::already_exists(path.display().to_string())
            }
            _ => VaultError::Io(err),
        }
    }
}
