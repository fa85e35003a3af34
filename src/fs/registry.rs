//! Process-wide interning of open files.
//!
//! At most one [`OpenFile`] exists per ciphertext path at any time, keyed by
//! the normalized path. Concurrent openers of the same path serialize on the
//! map entry, so the loser of the race reuses the winner's instance instead
//! of opening a second channel. A closing instance removes itself through the
//! callback installed at construction; it holds no reference back to this
//! registry.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use crate::crypto::keys::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::fs::open_file::{OpenFile, OpenOptions};

/// Registry of live [`OpenFile`] instances keyed by normalized path.
pub struct OpenFileRegistry {
    readonly: bool,
    master_key: Arc<MasterKey>,
    files: Arc<DashMap<PathBuf, Arc<OpenFile>>>,
}

impl OpenFileRegistry {
    pub fn new(master_key: Arc<MasterKey>, readonly: bool) -> Self {
        OpenFileRegistry { readonly, master_key, files: Arc::new(DashMap::new()) }
    }

    /// Number of currently open files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a live instance without opening anything.
    pub fn get(&self, path: &Path) -> Option<Arc<OpenFile>> {
        self.files.get(&normalize(path)).map(|entry| entry.clone())
    }

    /// Open (or reuse) the instance for `path` and count a handle onto it.
    ///
    /// Writable opens are refused outright on readonly mounts, before any
    /// host state can change.
    pub fn get_or_open(&self, path: &Path, options: &OpenOptions) -> VaultResult<Arc<OpenFile>> {
        if options.writable() && self.readonly {
            return Err(VaultError::ReadOnly);
        }
        let normalized = normalize(path);

        loop {
            let open_file = match self.files.entry(normalized.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => {
                    trace!(path = %normalized.display(), "reusing open file");
                    entry.get().clone()
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let map = Arc::downgrade(&self.files);
                    let open_file = OpenFile::create(
                        normalized.clone(),
                        self.master_key.clone(),
                        options,
                        Box::new(move |closed: &Path| forget(&map, closed)),
                    )?;
                    entry.insert(open_file.clone());
                    open_file
                }
            };

            match open_file.register(options) {
                Ok(()) => return Ok(open_file),
                // Lost a race against the final close of this instance; its
                // callback removes the entry, so the next round rebuilds.
                Err(VaultError::Closed) => {
                    self.files.remove_if(&normalized, |_, existing| {
                        Arc::ptr_eq(existing, &open_file)
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Flush every open file, reporting the first failure.
    pub fn flush_all(&self) -> VaultResult<()> {
        let mut result = Ok(());
        for entry in self.files.iter() {
            let flushed = entry.value().force(true, !self.readonly);
            if result.is_ok() {
                result = flushed;
            }
        }
        result
    }
}

fn forget(map: &Weak<DashMap<PathBuf, Arc<OpenFile>>>, path: &Path) {
    if let Some(map) = map.upgrade() {
        map.remove(path);
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching disk.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
