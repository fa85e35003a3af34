//! Lazy enumeration of ciphertext directories.
//!
//! A [`DirectoryStream`] walks the host entries of one ciphertext directory
//! and yields decrypted cleartext entries. Entries that do not belong to the
//! vault layout (missing suffix, the `dirid.c9r` backup), entries whose name
//! does not authenticate, and entries whose kind cannot be determined are
//! logged and skipped rather than failing the whole enumeration. Enumeration
//! order is whatever the host delivers.
//!
//! Streams register with a per-filesystem tracker so that closing the
//! filesystem terminates outstanding enumerations.

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{VaultError, VaultResult};
use crate::fs::longname::{C9R_SUFFIX, C9S_SUFFIX};
use crate::fs::mapper::{CiphertextDirectory, CiphertextFileType, PathMapper, DIR_BACKUP_FILE};
use crate::vault::path::VaultPath;

/// One decrypted directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Cleartext name of the entry.
    pub name: String,
    /// Cleartext path of the entry.
    pub path: VaultPath,
    /// Kind of the entry.
    pub kind: CiphertextFileType,
}

/// Tracks open streams of one filesystem.
#[derive(Debug, Default)]
pub struct StreamTracker {
    closed: AtomicBool,
    open: DashMap<u64, ()>,
    next_id: AtomicU64,
}

impl StreamTracker {
    pub fn new() -> Self {
        StreamTracker::default()
    }

    fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.insert(id, ());
        id
    }

    fn deregister(&self, id: u64) {
        self.open.remove(&id);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Terminate all outstanding streams; they fail with `Closed` on their
    /// next step.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

/// Filter applied to cleartext names during enumeration.
pub type NameFilter = Box<dyn Fn(&str) -> bool + Send>;

/// Lazy iterator over the cleartext entries of a directory.
pub struct DirectoryStream {
    id: u64,
    cleartext_dir: VaultPath,
    directory: CiphertextDirectory,
    mapper: Arc<PathMapper>,
    tracker: Arc<StreamTracker>,
    host_entries: fs::ReadDir,
    filter: NameFilter,
    failed: bool,
}

impl DirectoryStream {
    pub(crate) fn open(
        cleartext_dir: VaultPath,
        directory: CiphertextDirectory,
        mapper: Arc<PathMapper>,
        tracker: Arc<StreamTracker>,
        filter: NameFilter,
    ) -> VaultResult<Self> {
        if tracker.is_closed() {
            return Err(VaultError::Closed);
        }
        let host_entries = fs::read_dir(&directory.path)
            .map_err(|e| VaultError::from_host_io(e, &directory.path))?;
        let id = tracker.register();
        debug!(dir = %cleartext_dir, "opened directory stream");
        Ok(DirectoryStream {
            id,
            cleartext_dir,
            directory,
            mapper,
            tracker,
            host_entries,
            filter,
            failed: false,
        })
    }

    /// Decode one host entry; `None` means "skip it".
    fn decode_entry(&self, entry: &fs::DirEntry) -> Option<DirEntry> {
        let host_name = entry.file_name();
        let host_name = match host_name.to_str() {
            Some(name) => name,
            None => {
                warn!(dir = %self.cleartext_dir, "skipping non-utf8 host entry");
                return None;
            }
        };
        if host_name == DIR_BACKUP_FILE {
            return None;
        }

        let full_name = if host_name.ends_with(C9S_SUFFIX) {
            match self.mapper.long_names().resolve(&entry.path()) {
                Ok(full) => full,
                Err(e) => {
                    warn!(dir = %self.cleartext_dir, entry = host_name, error = %e,
                        "skipping shortened entry with unreadable long name");
                    return None;
                }
            }
        } else if host_name.ends_with(C9R_SUFFIX) {
            host_name.to_string()
        } else {
            return None;
        };

        let encoded = full_name.trim_end_matches(C9R_SUFFIX);
        let name = match self.mapper.decrypt_name(&self.directory.id, encoded) {
            Ok(name) => name,
            Err(e) => {
                warn!(dir = %self.cleartext_dir, entry = host_name, error = %e,
                    "skipping entry with unauthentic name");
                return None;
            }
        };

        let ciphertext = match self.mapper.ciphertext_file_path(&self.directory, &name) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                warn!(dir = %self.cleartext_dir, entry = host_name, error = %e,
                    "skipping undecodable entry");
                return None;
            }
        };
        let kind = match self.mapper.classify_at(&ciphertext) {
            Ok(Some(kind)) => kind,
            Ok(None) | Err(_) => {
                warn!(dir = %self.cleartext_dir, entry = host_name,
                    "skipping entry of undeterminable kind");
                return None;
            }
        };

        if !(self.filter)(&name) {
            return None;
        }

        Some(DirEntry { path: self.cleartext_dir.join(&name), name, kind })
    }
}

impl Iterator for DirectoryStream {
    type Item = VaultResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.tracker.is_closed() {
                self.failed = true;
                return Some(Err(VaultError::Closed));
            }
            let entry = match self.host_entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(VaultError::Io(e)));
                }
            };
            if let Some(decoded) = self.decode_entry(&entry) {
                return Some(Ok(decoded));
            }
        }
    }
}

impl Drop for DirectoryStream {
    fn drop(&mut self) {
        self.tracker.deregister(self.id);
    }
}
