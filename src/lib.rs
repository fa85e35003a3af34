//! Encrypted virtual filesystem over an untrusted host directory.
//!
//! A *vault* is a plain host directory whose contents are ciphertext:
//! filenames, directory structure, file sizes and file contents are all
//! confidential and authenticated. This crate maps a cleartext view onto
//! that layout:
//!
//! - filenames encrypt deterministically per directory (AES-SIV), with
//!   oversized encoded names replaced by hash-addressed `.c9s` entries
//! - file contents encrypt in 32 KiB chunks (AES-GCM) behind a per-file
//!   header, with chunk tags bound to their position in the file
//! - directories are indirected through opaque directory ids, so moving a
//!   directory never rewrites its subtree
//!
//! Open [`VaultFileSystem`] with a [`MasterkeyLoader`] and operate on
//! [`VaultPath`]s; content I/O goes through [`FileHandle`]s.

pub mod crypto;
pub mod error;
pub mod fs;
pub mod vault;

pub use error::{VaultError, VaultResult};
pub use fs::{
    AttributeView, CiphertextFileType, DirEntry, DirectoryStream, FileHandle, OpenOptions,
    VaultFileAttributes, VaultFileSystem, VaultOptions,
};
pub use vault::{
    CipherCombo, DirId, DirStructure, MasterkeyLoader, VaultConfig, VaultPath, VaultUri,
};
