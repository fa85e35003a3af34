//! Filesystem façade.
//!
//! [`VaultFileSystem`] dispatches cleartext operations to the path mapper,
//! the open-file registry and the host filesystem. Every mutating entry point
//! checks the readonly flag and the closed flag before touching any state;
//! readonly is a property of this mount, not of host permissions, since the
//! same vault may be opened writable elsewhere.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, instrument, warn};

use crate::crypto::content::encrypt_content;
use crate::crypto::header::FileHeader;
use crate::crypto::keys::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::fs::attr::VaultFileAttributes;
use crate::fs::dir_stream::{DirectoryStream, NameFilter, StreamTracker};
use crate::fs::mapper::{CiphertextFileType, PathMapper, DIR_BACKUP_FILE};
use crate::fs::open_file::{FileRangeLock, OpenFile, OpenOptions};
use crate::fs::registry::OpenFileRegistry;
use crate::vault::config::{
    sign_vault_config, unverified_key_id, validate_vault_config, MasterkeyLoader, VaultConfig,
    DEFAULT_SHORTENING_THRESHOLD, DEFAULT_VAULT_CONFIG_FILENAME,
};
use crate::vault::path::{DirId, VaultPath};
use crate::vault::structure::{check_dir_structure, DirStructure};

/// Upper bound on symlink target length; anything above this is treated as a
/// damaged ciphertext file rather than a link.
const MAX_SYMLINK_TARGET_LEN: u64 = 1 << 20;

/// Mount options for a vault filesystem.
#[derive(Debug, Clone)]
pub struct VaultOptions {
    readonly: bool,
    vault_config_filename: String,
    masterkey_filename: Option<String>,
    max_cleartext_name_length: Option<usize>,
    pepper: Option<Vec<u8>>,
}

impl Default for VaultOptions {
    fn default() -> Self {
        VaultOptions {
            readonly: false,
            vault_config_filename: DEFAULT_VAULT_CONFIG_FILENAME.to_string(),
            masterkey_filename: None,
            max_cleartext_name_length: None,
            pepper: None,
        }
    }
}

impl VaultOptions {
    pub fn new() -> Self {
        VaultOptions::default()
    }

    /// Refuse every mutating operation at the entry points.
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn vault_config_filename(mut self, name: impl Into<String>) -> Self {
        self.vault_config_filename = name.into();
        self
    }

    /// Masterkey filename, used only by the legacy structure probe.
    pub fn masterkey_filename(mut self, name: impl Into<String>) -> Self {
        self.masterkey_filename = Some(name.into());
        self
    }

    /// Reject cleartext names longer than this before touching the host.
    pub fn max_cleartext_name_length(mut self, limit: usize) -> Self {
        self.max_cleartext_name_length = Some(limit);
        self
    }

    /// Extra bytes mixed into name and directory-id hashing.
    pub fn pepper(mut self, pepper: impl Into<Vec<u8>>) -> Self {
        self.pepper = Some(pepper.into());
        self
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[inline]
    pub fn legacy_masterkey_filename(&self) -> Option<&str> {
        self.masterkey_filename.as_deref()
    }
}

struct VaultInner {
    vault_path: PathBuf,
    config: VaultConfig,
    options: VaultOptions,
    master_key: Arc<MasterKey>,
    mapper: Arc<PathMapper>,
    open_files: OpenFileRegistry,
    streams: Arc<StreamTracker>,
    closed: AtomicBool,
}

impl VaultInner {
    fn ensure_open(&self) -> VaultResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(VaultError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> VaultResult<()> {
        if self.options.readonly {
            Err(VaultError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

/// An encrypted filesystem mounted over a host vault directory.
#[derive(Clone)]
pub struct VaultFileSystem {
    inner: Arc<VaultInner>,
}

impl std::fmt::Debug for VaultFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultFileSystem")
            .field("vault_path", &self.inner.vault_path)
            .field("readonly", &self.inner.options.readonly)
            .finish_non_exhaustive()
    }
}

impl VaultFileSystem {
    /// Create the on-disk skeleton of a fresh vault: the signed config token
    /// and the root ciphertext directory.
    #[instrument(level = "info", skip(master_key), fields(vault_path = %vault_path.display()))]
    pub fn initialize(
        vault_path: &Path,
        master_key: &MasterKey,
        options: &VaultOptions,
    ) -> VaultResult<()> {
        fs::create_dir_all(vault_path).map_err(|e| VaultError::from_host_io(e, vault_path))?;

        let jti = uuid::Uuid::new_v4().to_string();
        let token = sign_vault_config(&jti, DEFAULT_SHORTENING_THRESHOLD, master_key)?;
        fs::write(vault_path.join(&options.vault_config_filename), token)?;

        let mapper = PathMapper::new(
            vault_path.to_path_buf(),
            Arc::new(master_key.clone()),
            DEFAULT_SHORTENING_THRESHOLD,
            options.pepper.clone(),
            None,
        );
        let root = mapper.root_directory()?;
        fs::create_dir_all(&root.path)?;
        write_dir_id_backup(&root.path, &root.id, master_key)?;

        info!(jti = %jti, "initialized vault");
        Ok(())
    }

    /// Probe whether `vault_path` holds a vault, per these options.
    pub fn probe(vault_path: &Path, options: &VaultOptions) -> VaultResult<DirStructure> {
        check_dir_structure(
            vault_path,
            &options.vault_config_filename,
            options.masterkey_filename.as_deref(),
        )
    }

    /// Open a vault, loading the masterkey through the caller-supplied
    /// loader and verifying the configuration token with it.
    #[instrument(level = "info", skip(key_loader, options), fields(vault_path = %vault_path.display()))]
    pub fn open(
        vault_path: &Path,
        key_loader: &dyn MasterkeyLoader,
        options: VaultOptions,
    ) -> VaultResult<VaultFileSystem> {
        let config_path = vault_path.join(&options.vault_config_filename);
        let token = fs::read_to_string(&config_path)
            .map_err(|e| VaultError::from_host_io(e, &config_path))?;

        let key_id = unverified_key_id(&token)?;
        let raw_key = key_loader.load_key(&key_id)?;
        let master_key = Arc::new(MasterKey::from_raw(&raw_key));

        let config = validate_vault_config(&token, &master_key)?;

        let mapper = Arc::new(PathMapper::new(
            vault_path.to_path_buf(),
            master_key.clone(),
            config.shortening_threshold,
            options.pepper.clone(),
            options.max_cleartext_name_length,
        ));
        let open_files = OpenFileRegistry::new(master_key.clone(), options.readonly);

        info!(readonly = options.readonly, "vault filesystem opened");
        Ok(VaultFileSystem {
            inner: Arc::new(VaultInner {
                vault_path: vault_path.to_path_buf(),
                config,
                options,
                master_key,
                mapper,
                open_files,
                streams: Arc::new(StreamTracker::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    #[inline]
    pub fn vault_path(&self) -> &Path {
        &self.inner.vault_path
    }

    #[inline]
    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.inner.options.readonly
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether a cleartext path names an existing entry.
    pub fn exists(&self, path: impl Into<VaultPath>) -> VaultResult<bool> {
        self.inner.ensure_open()?;
        Ok(self.inner.mapper.classify_if_exists(&path.into())?.is_some())
    }

    /// Classify a cleartext path.
    pub fn entry_type(&self, path: impl Into<VaultPath>) -> VaultResult<CiphertextFileType> {
        self.inner.ensure_open()?;
        self.inner.mapper.classify(&path.into())
    }

    /// Open an encrypted file and return a handle onto it.
    #[instrument(level = "debug", skip(self, options))]
    pub fn open_file(
        &self,
        path: impl Into<VaultPath> + std::fmt::Debug,
        options: OpenOptions,
    ) -> VaultResult<FileHandle> {
        let path = path.into();
        self.inner.ensure_open()?;
        if options.writable() {
            self.inner.ensure_writable()?;
        }

        let (parent, name) = path
            .split()
            .ok_or_else(|| VaultError::is_a_directory(path.as_str()))?;
        let parent_dir = self.inner.mapper.ciphertext_dir(&parent)?;
        let ciphertext = self.inner.mapper.ciphertext_file_path(&parent_dir, name)?;

        match self.inner.mapper.classify_at(&ciphertext)? {
            Some(CiphertextFileType::Directory) => {
                return Err(VaultError::is_a_directory(path.as_str()))
            }
            Some(CiphertextFileType::Symlink) => {
                return Err(VaultError::Io(io::Error::other(
                    "entry is a symbolic link; use read_symbolic_link",
                )))
            }
            Some(CiphertextFileType::File) => {
                if options.is_create_new() {
                    return Err(VaultError::already_exists(path.as_str()));
                }
            }
            None => {
                if !options.creates() {
                    return Err(VaultError::not_found(path.as_str()));
                }
                self.inner.mapper.assert_name_ok(name)?;
                if ciphertext.is_shortened() {
                    self.inner
                        .mapper
                        .long_names()
                        .install(&parent_dir.path, ciphertext.full_name())?;
                }
            }
        }

        let open_file = self
            .inner
            .open_files
            .get_or_open(&ciphertext.content_file(), &options)?;
        Ok(FileHandle {
            inner: self.inner.clone(),
            path,
            open_file,
            options,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a directory.
    #[instrument(level = "debug", skip(self))]
    pub fn create_directory(&self, path: impl Into<VaultPath> + std::fmt::Debug) -> VaultResult<()> {
        let path = path.into();
        self.inner.ensure_open()?;
        self.inner.ensure_writable()?;

        let (parent, name) = path
            .split()
            .ok_or_else(|| VaultError::already_exists(path.as_str()))?;
        self.inner.mapper.assert_name_ok(name)?;

        let parent_dir = self.inner.mapper.ciphertext_dir(&parent)?;
        let ciphertext = self.inner.mapper.ciphertext_file_path(&parent_dir, name)?;
        if self.inner.mapper.classify_at(&ciphertext)?.is_some() {
            return Err(VaultError::already_exists(path.as_str()));
        }

        if ciphertext.is_shortened() {
            self.inner
                .mapper
                .long_names()
                .install(&parent_dir.path, ciphertext.full_name())?;
        } else {
            fs::create_dir_all(ciphertext.container())
                .map_err(|e| VaultError::from_host_io(e, ciphertext.container()))?;
        }

        let dir_id = DirId::generate();
        let created = (|| -> VaultResult<()> {
            fs::write(ciphertext.dir_file(), dir_id.as_str())?;
            let host_dir = self.inner.mapper.dir_host_path(&dir_id)?;
            fs::create_dir_all(&host_dir)?;
            write_dir_id_backup(&host_dir, &dir_id, &self.inner.master_key)?;
            Ok(())
        })();

        if created.is_err() {
            // Leave no half-created entry behind.
            let _ = fs::remove_dir_all(ciphertext.container());
        }
        created?;
        debug!(path = %path, dir_id = %dir_id, "created directory");
        Ok(())
    }

    /// Delete a file, symlink, or empty directory.
    #[instrument(level = "debug", skip(self))]
    pub fn delete(&self, path: impl Into<VaultPath> + std::fmt::Debug) -> VaultResult<()> {
        let path = path.into();
        self.inner.ensure_open()?;
        self.inner.ensure_writable()?;
        if path.is_root() {
            return Err(VaultError::Io(io::Error::other("the root directory cannot be deleted")));
        }

        let (_parent, ciphertext) = self.inner.mapper.resolve(&path)?;
        match self.inner.mapper.classify_at(&ciphertext)? {
            None => Err(VaultError::not_found(path.as_str())),
            Some(CiphertextFileType::File) => {
                if ciphertext.is_shortened() {
                    fs::remove_dir_all(ciphertext.container())?;
                } else {
                    fs::remove_file(ciphertext.container())?;
                }
                Ok(())
            }
            Some(CiphertextFileType::Symlink) => {
                fs::remove_dir_all(ciphertext.container())?;
                Ok(())
            }
            Some(CiphertextFileType::Directory) => {
                let dir = self.inner.mapper.ciphertext_dir(&path)?;
                if !ciphertext_dir_is_empty(&dir.path)? {
                    return Err(VaultError::directory_not_empty(path.as_str()));
                }
                // Dropping the ciphertext directory destroys the dir id;
                // reads of it afterwards fail authentically.
                match fs::remove_dir_all(&dir.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(VaultError::Io(e)),
                }
                fs::remove_dir_all(ciphertext.container())?;
                self.inner.mapper.invalidate_prefix(&path);
                debug!(path = %path, "deleted directory");
                Ok(())
            }
        }
    }

    /// Move an entry to a new cleartext path.
    ///
    /// The name re-encrypts under the destination parent's directory id, so
    /// the host always sees a rename to different ciphertext bytes.
    #[instrument(level = "debug", skip(self))]
    pub fn rename(
        &self,
        source: impl Into<VaultPath> + std::fmt::Debug,
        target: impl Into<VaultPath> + std::fmt::Debug,
    ) -> VaultResult<()> {
        let source = source.into();
        let target = target.into();
        self.inner.ensure_open()?;
        self.inner.ensure_writable()?;
        if source == target {
            return Ok(());
        }
        if source.is_root() || target.is_root() {
            return Err(VaultError::Io(io::Error::other("the root directory cannot be moved")));
        }
        if target.starts_with(&source) {
            return Err(VaultError::Io(io::Error::other(
                "cannot move a directory below itself",
            )));
        }

        let kind = self.inner.mapper.classify(&source)?;
        if self.inner.mapper.classify_if_exists(&target)?.is_some() {
            return Err(VaultError::already_exists(target.as_str()));
        }
        let (_, target_name) = target.split().expect("non-root");
        self.inner.mapper.assert_name_ok(target_name)?;

        let (_, source_cipher) = self.inner.mapper.resolve(&source)?;
        let (target_parent, target_cipher) = self.inner.mapper.resolve(&target)?;

        match kind {
            CiphertextFileType::File => {
                if target_cipher.is_shortened() {
                    self.inner
                        .mapper
                        .long_names()
                        .install(&target_parent.path, target_cipher.full_name())?;
                }
                fs::rename(source_cipher.content_file(), target_cipher.content_file())?;
                if source_cipher.is_shortened() {
                    fs::remove_dir_all(source_cipher.container())?;
                }
            }
            CiphertextFileType::Directory | CiphertextFileType::Symlink => {
                fs::rename(source_cipher.container(), target_cipher.container())?;
                match (source_cipher.name_file(), target_cipher.name_file()) {
                    // Both shortened: refresh the stored long name.
                    (_, Some(_)) => {
                        let name_file = target_cipher
                            .name_file()
                            .expect("target is shortened");
                        fs::write(name_file, target_cipher.full_name())?;
                    }
                    // Was shortened, no longer is: drop the leftover marker.
                    (Some(_), None) => {
                        let leftover = target_cipher
                            .container()
                            .join(crate::fs::longname::LONG_NAME_FILE);
                        let _ = fs::remove_file(leftover);
                    }
                    (None, None) => {}
                }
                if kind == CiphertextFileType::Directory {
                    self.inner.mapper.invalidate_prefix(&source);
                }
            }
        }
        debug!(source = %source, target = %target, "renamed entry");
        Ok(())
    }

    /// Copy a file's cleartext within this vault.
    pub fn copy_file(
        &self,
        source: impl Into<VaultPath>,
        target: impl Into<VaultPath>,
    ) -> VaultResult<()> {
        self.copy_file_to(source, self, target)
    }

    /// Copy a file's cleartext into `target_fs`, which may be a different
    /// vault under a different key. Content is decrypted from the source and
    /// re-encrypted under the target's cryptor, so the ciphertexts are
    /// unrelated.
    #[instrument(level = "debug", skip(self, source, target_fs, target))]
    pub fn copy_file_to(
        &self,
        source: impl Into<VaultPath>,
        target_fs: &VaultFileSystem,
        target: impl Into<VaultPath>,
    ) -> VaultResult<()> {
        let source = source.into();
        let target = target.into();
        self.inner.ensure_open()?;
        target_fs.inner.ensure_open()?;
        target_fs.inner.ensure_writable()?;

        let src = self.open_file(source, OpenOptions::new().read(true))?;
        let dst = target_fs.open_file(
            target,
            OpenOptions::new().write(true).create(true).truncate_existing(true),
        )?;

        let mut buf = vec![0u8; 32768];
        let mut position = 0u64;
        loop {
            let n = src.read_at(&mut buf, position)?;
            if n == 0 {
                break;
            }
            dst.write_at(&buf[..n], position)?;
            position += n as u64;
        }
        dst.close()?;
        src.close()?;
        Ok(())
    }

    /// Enumerate a directory with an accept-all filter.
    pub fn read_dir(&self, path: impl Into<VaultPath>) -> VaultResult<DirectoryStream> {
        self.directory_stream(path, Box::new(|_| true))
    }

    /// Enumerate a directory, yielding entries whose cleartext name passes
    /// `filter`.
    pub fn directory_stream(
        &self,
        path: impl Into<VaultPath>,
        filter: NameFilter,
    ) -> VaultResult<DirectoryStream> {
        let path = path.into();
        self.inner.ensure_open()?;
        match self.inner.mapper.classify(&path)? {
            CiphertextFileType::Directory => {}
            _ => return Err(VaultError::not_a_directory(path.as_str())),
        }
        let dir = self.inner.mapper.ciphertext_dir(&path)?;
        DirectoryStream::open(
            path,
            dir,
            self.inner.mapper.clone(),
            self.inner.streams.clone(),
            filter,
        )
    }

    /// Create a symbolic link whose target is stored as encrypted content.
    #[instrument(level = "debug", skip(self, target))]
    pub fn create_symbolic_link(
        &self,
        path: impl Into<VaultPath> + std::fmt::Debug,
        target: &str,
    ) -> VaultResult<()> {
        let path = path.into();
        self.inner.ensure_open()?;
        self.inner.ensure_writable()?;

        let (parent, name) = path
            .split()
            .ok_or_else(|| VaultError::already_exists(path.as_str()))?;
        // Validate before creating any on-disk skeleton.
        self.inner.mapper.assert_name_ok(name)?;

        let parent_dir = self.inner.mapper.ciphertext_dir(&parent)?;
        let ciphertext = self.inner.mapper.ciphertext_file_path(&parent_dir, name)?;
        if self.inner.mapper.classify_at(&ciphertext)?.is_some() {
            return Err(VaultError::already_exists(path.as_str()));
        }

        if ciphertext.is_shortened() {
            self.inner
                .mapper
                .long_names()
                .install(&parent_dir.path, ciphertext.full_name())?;
        } else {
            fs::create_dir_all(ciphertext.container())
                .map_err(|e| VaultError::from_host_io(e, ciphertext.container()))?;
        }

        let options = OpenOptions::new().write(true).create_new(true);
        let link_file = self.inner.open_files.get_or_open(&ciphertext.symlink_file(), &options)?;
        let write_result = link_file
            .write_at(target.as_bytes(), 0)
            .and_then(|_| link_file.close(&options));
        if write_result.is_err() {
            let _ = fs::remove_dir_all(ciphertext.container());
        }
        write_result?;
        debug!(path = %path, "created symbolic link");
        Ok(())
    }

    /// Read a symbolic link's target through an ephemeral open file.
    #[instrument(level = "debug", skip(self))]
    pub fn read_symbolic_link(
        &self,
        path: impl Into<VaultPath> + std::fmt::Debug,
    ) -> VaultResult<VaultPath> {
        let path = path.into();
        self.inner.ensure_open()?;

        let (_, ciphertext) = self.inner.mapper.resolve(&path)?;
        match self.inner.mapper.classify_at(&ciphertext)? {
            Some(CiphertextFileType::Symlink) => {}
            Some(_) => {
                return Err(VaultError::Io(io::Error::other("entry is not a symbolic link")))
            }
            None => return Err(VaultError::not_found(path.as_str())),
        }

        let options = OpenOptions::new().read(true);
        let link_file = self.inner.open_files.get_or_open(&ciphertext.symlink_file(), &options)?;
        let read_target = (|| -> VaultResult<String> {
            let size = link_file.size();
            if size > MAX_SYMLINK_TARGET_LEN {
                return Err(VaultError::corrupted(format!(
                    "symlink target of {size} bytes exceeds sanity bound"
                )));
            }
            let mut buf = vec![0u8; size as usize];
            link_file.read_at(&mut buf, 0)?;
            String::from_utf8(buf)
                .map_err(|_| VaultError::corrupted("symlink target is not utf-8"))
        })();
        let close_result = link_file.close(&options);
        let target = read_target?;
        close_result?;
        Ok(VaultPath::new(target))
    }

    /// Read an immutable attribute snapshot for a cleartext path.
    #[instrument(level = "debug", skip(self))]
    pub fn read_attributes(
        &self,
        path: impl Into<VaultPath> + std::fmt::Debug,
    ) -> VaultResult<VaultFileAttributes> {
        let path = path.into();
        self.inner.ensure_open()?;
        read_attributes_at(&self.inner, &path)
    }

    /// A view that re-reads attributes on every call, surfacing `NotFound`
    /// once the entry disappears.
    pub fn attribute_view(&self, path: impl Into<VaultPath>) -> AttributeView {
        AttributeView { inner: self.inner.clone(), path: path.into() }
    }

    /// Flush all open files, terminate outstanding directory streams, and
    /// refuse further operations.
    #[instrument(level = "info", skip(self))]
    pub fn close(&self) -> VaultResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.streams.close_all();
        let flushed = self.inner.open_files.flush_all();
        info!("vault filesystem closed");
        flushed
    }
}

/// Resolve a path to the host locations relevant for attribute reads.
fn read_attributes_at(inner: &VaultInner, path: &VaultPath) -> VaultResult<VaultFileAttributes> {
    if path.is_root() {
        let dir = inner.mapper.ciphertext_dir(path)?;
        let meta = fs::metadata(&dir.path).map_err(|e| VaultError::from_host_io(e, &dir.path))?;
        return Ok(VaultFileAttributes::build(CiphertextFileType::Directory, &meta, None));
    }

    let (_, ciphertext) = inner.mapper.resolve(path)?;
    let kind = inner
        .mapper
        .classify_at(&ciphertext)?
        .ok_or_else(|| VaultError::not_found(path.as_str()))?;

    let host_path = match kind {
        CiphertextFileType::File => ciphertext.content_file(),
        CiphertextFileType::Symlink => ciphertext.symlink_file(),
        CiphertextFileType::Directory => inner.mapper.ciphertext_dir(path)?.path,
    };
    let meta = fs::metadata(&host_path).map_err(|e| VaultError::from_host_io(e, &host_path))?;
    let open_file: Option<Arc<OpenFile>> = match kind {
        CiphertextFileType::Directory => None,
        _ => inner.open_files.get(&host_path),
    };
    Ok(VaultFileAttributes::build(kind, &meta, open_file.as_deref()))
}

/// Attribute view bound to a cleartext path; not a snapshot.
pub struct AttributeView {
    inner: Arc<VaultInner>,
    path: VaultPath,
}

impl AttributeView {
    /// Re-read the entry's attributes.
    pub fn read(&self) -> VaultResult<VaultFileAttributes> {
        self.inner.ensure_open()?;
        read_attributes_at(&self.inner, &self.path)
    }

    /// Update timestamps on the backing host entry (and any live open file).
    pub fn set_times(
        &self,
        modified: Option<SystemTime>,
        accessed: Option<SystemTime>,
    ) -> VaultResult<()> {
        self.inner.ensure_open()?;
        self.inner.ensure_writable()?;

        let (_, ciphertext) = self.inner.mapper.resolve(&self.path)?;
        let kind = self
            .inner
            .mapper
            .classify_at(&ciphertext)?
            .ok_or_else(|| VaultError::not_found(self.path.as_str()))?;
        let host_path = match kind {
            CiphertextFileType::File => ciphertext.content_file(),
            CiphertextFileType::Symlink => ciphertext.symlink_file(),
            CiphertextFileType::Directory => self.inner.mapper.ciphertext_dir(&self.path)?.path,
        };

        let mut times = fs::FileTimes::new();
        if let Some(modified) = modified {
            times = times.set_modified(modified);
        }
        if let Some(accessed) = accessed {
            times = times.set_accessed(accessed);
        }
        let file = fs::File::open(&host_path)
            .map_err(|e| VaultError::from_host_io(e, &host_path))?;
        file.set_times(times)?;

        if let (Some(modified), Some(open_file)) = (modified, self.inner.open_files.get(&host_path))
        {
            open_file.set_last_modified(modified);
        }
        Ok(())
    }
}

/// Handle onto an open encrypted file.
///
/// Dropping the handle closes it best-effort; call [`close`](Self::close) to
/// observe flush errors.
pub struct FileHandle {
    inner: Arc<VaultInner>,
    path: VaultPath,
    open_file: Arc<OpenFile>,
    options: OpenOptions,
    closed: AtomicBool,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("size", &self.open_file.size())
            .finish_non_exhaustive()
    }
}

impl FileHandle {
    fn ensure_usable(&self) -> VaultResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VaultError::Closed);
        }
        self.inner.ensure_open()
    }

    /// Cleartext path this handle was opened for.
    #[inline]
    pub fn path(&self) -> &VaultPath {
        &self.path
    }

    /// Current cleartext size.
    #[inline]
    pub fn size(&self) -> u64 {
        self.open_file.size()
    }

    /// Read at a position; `Ok(0)` signals end of file.
    pub fn read_at(&self, dst: &mut [u8], position: u64) -> VaultResult<usize> {
        self.ensure_usable()?;
        if !self.options.readable() {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle is not open for reading",
            )));
        }
        self.open_file.read_at(dst, position)
    }

    /// Write at a position, growing the file as needed.
    pub fn write_at(&self, src: &[u8], position: u64) -> VaultResult<usize> {
        self.ensure_usable()?;
        if !self.options.writable() {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle is not open for writing",
            )));
        }
        let written = self.open_file.write_at(src, position)?;
        if self.options.wants_sync() {
            self.open_file.force(self.options.wants_metadata_sync(), true)?;
        }
        Ok(written)
    }

    /// Write at the current end of file.
    pub fn append(&self, src: &[u8]) -> VaultResult<usize> {
        self.write_at(src, self.size())
    }

    /// Truncate or zero-extend to `size`.
    pub fn truncate(&self, size: u64) -> VaultResult<()> {
        self.ensure_usable()?;
        if !self.options.writable() {
            return Err(VaultError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle is not open for writing",
            )));
        }
        self.open_file.truncate(size)
    }

    /// Flush dirty state and fsync, with or without metadata.
    pub fn force(&self, metadata: bool) -> VaultResult<()> {
        self.ensure_usable()?;
        self.open_file.force(metadata, self.options.writable())
    }

    /// Acquire an advisory lock over the cleartext range.
    pub fn lock(&self, position: u64, len: u64, shared: bool) -> VaultResult<FileRangeLock> {
        self.ensure_usable()?;
        self.open_file.lock(position, len, shared)
    }

    /// Non-blocking lock acquisition.
    pub fn try_lock(&self, position: u64, len: u64, shared: bool) -> VaultResult<FileRangeLock> {
        self.ensure_usable()?;
        self.open_file.try_lock(position, len, shared)
    }

    /// Release an advisory lock.
    pub fn unlock(&self, lock: &FileRangeLock) {
        self.open_file.unlock(lock);
    }

    /// Close this handle, flushing on the final close of the file.
    pub fn close(&self) -> VaultResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.open_file.close(&self.options)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.open_file.close(&self.options) {
                warn!(path = %self.path, error = %e, "error while closing dropped file handle");
            }
        }
    }
}

/// Write the encrypted backup of a directory's own id into its ciphertext
/// directory. Recovery tooling can restore severed parent links from these.
fn write_dir_id_backup(host_dir: &Path, dir_id: &DirId, master_key: &MasterKey) -> VaultResult<()> {
    let header = FileHeader::create();
    let mut bytes = header
        .encrypt(master_key)
        .map_err(|e| VaultError::corrupted(e.to_string()))?;
    let content = encrypt_content(dir_id.as_str().as_bytes(), &header)
        .map_err(|e| VaultError::corrupted(e.to_string()))?;
    bytes.extend_from_slice(&content);
    fs::write(host_dir.join(DIR_BACKUP_FILE), bytes)?;
    Ok(())
}

/// Whether a ciphertext directory holds no entries besides the id backup.
fn ciphertext_dir_is_empty(host_dir: &Path) -> VaultResult<bool> {
    let entries = match fs::read_dir(host_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(VaultError::Io(e)),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_name() != DIR_BACKUP_FILE {
            return Ok(false);
        }
    }
    Ok(true)
}
