//! Cleartext file attributes.
//!
//! Attribute reads return immutable snapshots: deleting the entry afterwards
//! does not mutate a snapshot already handed out. Sizes are translated from
//! ciphertext to cleartext via the chunk geometry unless the file is
//! currently open, in which case the live size (and in-memory modification
//! time) win, since dirty chunks may not have reached the host yet.

use std::fs::Metadata;
use std::time::SystemTime;

use crate::crypto::content::cleartext_file_size;
use crate::fs::mapper::CiphertextFileType;
use crate::fs::open_file::OpenFile;

/// Platform-specific attribute bits.
///
/// The variant carried depends on what the host filesystem exposes; common
/// fields live directly in [`VaultFileAttributes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributesKind {
    Basic,
    Posix(PosixBits),
    Dos(DosBits),
}

/// POSIX permission bits and ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixBits {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// DOS attribute flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DosBits {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub archive: bool,
}

/// Immutable snapshot of one entry's cleartext attributes.
#[derive(Debug, Clone)]
pub struct VaultFileAttributes {
    pub kind: CiphertextFileType,
    /// Cleartext size; directories pass the host size through untouched.
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: Option<SystemTime>,
    pub attributes: AttributesKind,
}

impl VaultFileAttributes {
    #[inline]
    pub fn is_regular_file(&self) -> bool {
        self.kind == CiphertextFileType::File
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.kind == CiphertextFileType::Directory
    }

    #[inline]
    pub fn is_symbolic_link(&self) -> bool {
        self.kind == CiphertextFileType::Symlink
    }

    /// Build a snapshot from host metadata and, when available, the live
    /// open-file state.
    pub(crate) fn build(
        kind: CiphertextFileType,
        host_meta: &Metadata,
        open_file: Option<&OpenFile>,
    ) -> Self {
        let size = match kind {
            CiphertextFileType::Directory => host_meta.len(),
            CiphertextFileType::File | CiphertextFileType::Symlink => match open_file {
                Some(open_file) => open_file.size(),
                None => cleartext_file_size(host_meta.len()),
            },
        };
        let modified = match open_file {
            Some(open_file) => open_file.last_modified(),
            None => host_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        };
        let accessed = match open_file {
            Some(_) => SystemTime::now(),
            None => host_meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
        };

        VaultFileAttributes {
            kind,
            size,
            modified,
            accessed,
            created: host_meta.created().ok(),
            attributes: platform_bits(host_meta),
        }
    }
}

#[cfg(unix)]
fn platform_bits(meta: &Metadata) -> AttributesKind {
    use std::os::unix::fs::MetadataExt;
    AttributesKind::Posix(PosixBits { mode: meta.mode(), uid: meta.uid(), gid: meta.gid() })
}

#[cfg(windows)]
fn platform_bits(meta: &Metadata) -> AttributesKind {
    use std::os::windows::fs::MetadataExt;
    let bits = meta.file_attributes();
    AttributesKind::Dos(DosBits {
        read_only: bits & 0x1 != 0,
        hidden: bits & 0x2 != 0,
        system: bits & 0x4 != 0,
        archive: bits & 0x20 != 0,
    })
}

#[cfg(not(any(unix, windows)))]
fn platform_bits(_meta: &Metadata) -> AttributesKind {
    AttributesKind::Basic
}
