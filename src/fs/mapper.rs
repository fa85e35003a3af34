//! Cleartext-to-ciphertext path mapping.
//!
//! Every cleartext directory is backed by a ciphertext directory under
//! `d/<2>/<30>`, located by hashing the directory's id. The mapping from a
//! cleartext path to its ciphertext location therefore walks the path
//! component by component, reading each child's `dir.c9r` to learn the next
//! directory id. Resolved directories are cached; mutations that move or
//! remove directories invalidate the affected prefixes, and a stale entry
//! heals itself on the next cache miss.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{instrument, trace};

use crate::crypto::keys::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::fs::longname::{LongNameStore, C9R_SUFFIX};
use crate::fs::name::{decrypt_filename, encrypt_filename, hash_dir_id};
use crate::vault::path::{DirId, VaultPath};
use crate::vault::structure::DATA_DIR_NAME;

/// Marker file holding a child directory's id.
pub const DIR_FILE: &str = "dir.c9r";

/// Marker file holding an encrypted symlink target.
pub const SYMLINK_FILE: &str = "symlink.c9r";

/// Content file of a shortened regular file.
pub const CONTENTS_FILE: &str = "contents.c9r";

/// Encrypted backup of a ciphertext directory's own id.
pub const DIR_BACKUP_FILE: &str = "dirid.c9r";

/// Kind of a ciphertext entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiphertextFileType {
    File,
    Directory,
    Symlink,
}

/// A resolved ciphertext directory: its id and host location.
#[derive(Debug, Clone)]
pub struct CiphertextDirectory {
    pub id: DirId,
    pub path: PathBuf,
}

/// The ciphertext location(s) of one cleartext entry.
///
/// When the encoded name fits the host limit the entry lives directly at
/// `<parent>/<encName>.c9r`; otherwise it lives in a hash-named `.c9s`
/// directory. Both candidates are derivable without touching the disk, so
/// this type precomputes them and exposes the marker-file locations.
#[derive(Debug, Clone)]
pub struct CiphertextFilePath {
    raw: PathBuf,
    shortened: Option<PathBuf>,
    full_name: String,
}

impl CiphertextFilePath {
    /// Whether this entry uses the shortened representation.
    #[inline]
    pub fn is_shortened(&self) -> bool {
        self.shortened.is_some()
    }

    /// The full encoded name including the `.c9r` suffix.
    #[inline]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Host path of the entry itself (`.c9r` path or `.c9s` directory).
    pub fn container(&self) -> &Path {
        self.shortened.as_deref().unwrap_or(&self.raw)
    }

    /// Host path of the encrypted content file.
    ///
    /// For a shortened entry that is `<hash>.c9s/contents.c9r`, otherwise the
    /// bare `.c9r` file.
    pub fn content_file(&self) -> PathBuf {
        match &self.shortened {
            Some(dir) => dir.join(CONTENTS_FILE),
            None => self.raw.clone(),
        }
    }

    /// Host path of the `dir.c9r` marker inside this entry.
    pub fn dir_file(&self) -> PathBuf {
        self.container().join(DIR_FILE)
    }

    /// Host path of the `symlink.c9r` marker inside this entry.
    pub fn symlink_file(&self) -> PathBuf {
        self.container().join(SYMLINK_FILE)
    }

    /// Host path of the `name.c9s` file, for shortened entries.
    pub fn name_file(&self) -> Option<PathBuf> {
        self.shortened.as_ref().map(|dir| LongNameStore::name_file(dir))
    }
}

/// Resolves cleartext paths to ciphertext locations.
pub struct PathMapper {
    vault_path: PathBuf,
    master_key: Arc<MasterKey>,
    long_names: LongNameStore,
    pepper: Option<Vec<u8>>,
    max_cleartext_name_length: Option<usize>,
    dir_cache: DashMap<VaultPath, CiphertextDirectory>,
}

impl PathMapper {
    pub fn new(
        vault_path: PathBuf,
        master_key: Arc<MasterKey>,
        shortening_threshold: usize,
        pepper: Option<Vec<u8>>,
        max_cleartext_name_length: Option<usize>,
    ) -> Self {
        PathMapper {
            vault_path,
            master_key,
            long_names: LongNameStore::new(shortening_threshold),
            pepper,
            max_cleartext_name_length,
            dir_cache: DashMap::new(),
        }
    }

    #[inline]
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    #[inline]
    pub fn long_names(&self) -> &LongNameStore {
        &self.long_names
    }

    fn pepper(&self) -> Option<&[u8]> {
        self.pepper.as_deref()
    }

    /// Encrypt one path component under its parent directory id.
    pub fn encrypt_name(&self, parent: &DirId, name: &str) -> VaultResult<String> {
        Ok(encrypt_filename(name, parent.as_str(), self.pepper(), &self.master_key)?)
    }

    /// Decrypt one encoded component under its parent directory id.
    pub fn decrypt_name(&self, parent: &DirId, encoded: &str) -> VaultResult<String> {
        Ok(decrypt_filename(encoded, parent.as_str(), self.pepper(), &self.master_key)?)
    }

    /// Host location of the ciphertext directory for a directory id.
    pub fn dir_host_path(&self, dir_id: &DirId) -> VaultResult<PathBuf> {
        let hashed = hash_dir_id(dir_id.as_str(), self.pepper(), &self.master_key)?;
        debug_assert_eq!(hashed.len(), 32);
        Ok(self
            .vault_path
            .join(DATA_DIR_NAME)
            .join(&hashed[..2])
            .join(&hashed[2..]))
    }

    /// The root ciphertext directory.
    pub fn root_directory(&self) -> VaultResult<CiphertextDirectory> {
        let id = DirId::root();
        let path = self.dir_host_path(&id)?;
        Ok(CiphertextDirectory { id, path })
    }

    /// Pre-flight check of a cleartext name against the configured cap.
    ///
    /// Rejecting before any disk mutation prevents partially created entries
    /// whose names the host would refuse.
    pub fn assert_name_ok(&self, name: &str) -> VaultResult<()> {
        if let Some(limit) = self.max_cleartext_name_length {
            let length = name.chars().count();
            if length > limit {
                return Err(VaultError::NameTooLong { length, limit });
            }
        }
        Ok(())
    }

    /// Resolve a cleartext directory path to its ciphertext directory.
    #[instrument(level = "trace", skip(self), fields(path = %cleartext_dir))]
    pub fn ciphertext_dir(&self, cleartext_dir: &VaultPath) -> VaultResult<CiphertextDirectory> {
        if cleartext_dir.is_root() {
            return self.root_directory();
        }
        if let Some(cached) = self.dir_cache.get(cleartext_dir) {
            trace!("dir cache hit");
            return Ok(cached.clone());
        }

        let (parent_path, name) = cleartext_dir.split().expect("non-root path has a parent");
        let parent = self.ciphertext_dir(&parent_path)?;
        let ciphertext = self.ciphertext_file_path(&parent, name)?;

        match self.classify_at(&ciphertext)? {
            Some(CiphertextFileType::Directory) => {}
            Some(_) => return Err(VaultError::not_a_directory(cleartext_dir.as_str())),
            None => return Err(VaultError::not_found(cleartext_dir.as_str())),
        }

        let dir_file = ciphertext.dir_file();
        let id = fs::read_to_string(&dir_file)
            .map(DirId::from_raw)
            .map_err(|e| VaultError::from_host_io(e, &dir_file))?;

        let path = self.dir_host_path(&id)?;
        let resolved = CiphertextDirectory { id, path };
        self.dir_cache.insert(cleartext_dir.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Compute the ciphertext location of a named child of `parent`.
    pub fn ciphertext_file_path(
        &self,
        parent: &CiphertextDirectory,
        name: &str,
    ) -> VaultResult<CiphertextFilePath> {
        let encoded = self.encrypt_name(&parent.id, name)?;
        let full_name = format!("{encoded}{C9R_SUFFIX}");
        let raw = parent.path.join(&full_name);
        let shortened = if self.long_names.needs_shortening(&full_name) {
            Some(parent.path.join(self.long_names.deflate(&full_name)))
        } else {
            None
        };
        Ok(CiphertextFilePath { raw, shortened, full_name })
    }

    /// Resolve a non-root cleartext path to its parent directory and its own
    /// ciphertext location.
    pub fn resolve(
        &self,
        cleartext: &VaultPath,
    ) -> VaultResult<(CiphertextDirectory, CiphertextFilePath)> {
        let (parent_path, name) = cleartext
            .split()
            .ok_or_else(|| VaultError::is_a_directory(cleartext.as_str()))?;
        let parent = self.ciphertext_dir(&parent_path)?;
        let ciphertext = self.ciphertext_file_path(&parent, name)?;
        Ok((parent, ciphertext))
    }

    /// Classify a cleartext path, failing with `NotFound` if nothing exists.
    pub fn classify(&self, cleartext: &VaultPath) -> VaultResult<CiphertextFileType> {
        self.classify_if_exists(cleartext)?
            .ok_or_else(|| VaultError::not_found(cleartext.as_str()))
    }

    /// Classify a cleartext path, `None` if nothing exists there.
    pub fn classify_if_exists(
        &self,
        cleartext: &VaultPath,
    ) -> VaultResult<Option<CiphertextFileType>> {
        if cleartext.is_root() {
            return Ok(Some(CiphertextFileType::Directory));
        }
        let (parent_path, name) = cleartext.split().expect("non-root path has a parent");
        let parent = match self.ciphertext_dir(&parent_path) {
            Ok(parent) => parent,
            Err(VaultError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let ciphertext = self.ciphertext_file_path(&parent, name)?;
        self.classify_at(&ciphertext)
    }

    /// Classify an already computed ciphertext location.
    ///
    /// A `symlink.c9r` marker wins over `dir.c9r` when both are present;
    /// normal operation writes only one, so coexistence is a corruption that
    /// validation tooling flags rather than this lookup path.
    pub fn classify_at(
        &self,
        ciphertext: &CiphertextFilePath,
    ) -> VaultResult<Option<CiphertextFileType>> {
        let container = ciphertext.container();
        let meta = match fs::symlink_metadata(container) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::Io(e)),
        };

        if meta.is_file() && !ciphertext.is_shortened() {
            return Ok(Some(CiphertextFileType::File));
        }
        if !meta.is_dir() {
            return Ok(None);
        }

        if ciphertext.symlink_file().is_file() {
            Ok(Some(CiphertextFileType::Symlink))
        } else if ciphertext.dir_file().is_file() {
            Ok(Some(CiphertextFileType::Directory))
        } else if ciphertext.is_shortened() && container.join(CONTENTS_FILE).is_file() {
            Ok(Some(CiphertextFileType::File))
        } else {
            Ok(None)
        }
    }

    /// Drop cached resolutions at or below `prefix`.
    ///
    /// Called after moves and deletions of directories; the next lookup
    /// re-walks the affected subtree.
    pub fn invalidate_prefix(&self, prefix: &VaultPath) {
        self.dir_cache.retain(|path, _| !path.starts_with(prefix));
    }

    /// Drop the entire directory cache.
    pub fn invalidate_all(&self) {
        self.dir_cache.clear();
    }
}
