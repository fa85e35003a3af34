//! Vault-level concerns: configuration, layout probing, paths and URIs.

pub mod config;
pub mod path;
pub mod structure;
pub mod uri;

pub use config::{CipherCombo, MasterkeyLoader, VaultConfig};
pub use path::{DirId, VaultPath};
pub use structure::DirStructure;
pub use uri::VaultUri;
