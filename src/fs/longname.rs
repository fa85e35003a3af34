//! Shortened filename store.
//!
//! Host filesystems cap filename length, but encrypted names grow with their
//! cleartext. When an encoded name plus suffix exceeds the vault's
//! shortening threshold, the host-visible name becomes
//! `base64url(sha1(fullEncName)) + ".c9s"`, a directory whose `name.c9s`
//! file preserves the full encoded name for enumeration.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{VaultError, VaultResult};
use crate::fs::name::create_c9s_name;

/// File inside a `.c9s` directory holding the full encoded name.
pub const LONG_NAME_FILE: &str = "name.c9s";

/// Suffix of regular encrypted entries.
pub const C9R_SUFFIX: &str = ".c9r";

/// Suffix of shortened entries.
pub const C9S_SUFFIX: &str = ".c9s";

/// Installs and resolves shortened names within ciphertext directories.
#[derive(Debug, Clone)]
pub struct LongNameStore {
    threshold: usize,
}

impl LongNameStore {
    pub fn new(threshold: usize) -> Self {
        LongNameStore { threshold }
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether a full encoded name (suffix included) needs shortening.
    #[inline]
    pub fn needs_shortening(&self, full_name: &str) -> bool {
        full_name.len() > self.threshold
    }

    /// The host-visible name for a full encoded name, e.g. `xKp…Q=.c9s`.
    pub fn deflate(&self, full_name: &str) -> String {
        debug_assert!(self.needs_shortening(full_name));
        format!("{}{C9S_SUFFIX}", create_c9s_name(full_name))
    }

    /// Persist the mapping for a shortened entry.
    ///
    /// Creates `<hash>.c9s/name.c9s` inside `ciphertext_dir` and returns the
    /// shortened host name. Installing the same name twice is a no-op; a
    /// hash-directory that already exists with a *different* stored name is
    /// reported as corruption.
    pub fn install(&self, ciphertext_dir: &Path, full_name: &str) -> VaultResult<String> {
        let short_name = self.deflate(full_name);
        let entry_dir = ciphertext_dir.join(&short_name);
        fs::create_dir_all(&entry_dir).map_err(|e| VaultError::from_host_io(e, &entry_dir))?;

        let name_file = entry_dir.join(LONG_NAME_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&name_file) {
            Ok(mut file) => {
                file.write_all(full_name.as_bytes())?;
                trace!(short = %short_name, "installed shortened name");
                Ok(short_name)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let existing = fs::read_to_string(&name_file)?;
                if existing == full_name {
                    Ok(short_name)
                } else {
                    Err(VaultError::corrupted(format!(
                        "{} holds a mismatching long name",
                        name_file.display()
                    )))
                }
            }
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    /// Read the full encoded name back from a shortened entry's directory.
    pub fn resolve(&self, c9s_dir: &Path) -> VaultResult<String> {
        let name_file = c9s_dir.join(LONG_NAME_FILE);
        let full_name =
            fs::read_to_string(&name_file).map_err(|e| VaultError::from_host_io(e, &name_file))?;
        if full_name.is_empty() {
            return Err(VaultError::corrupted(format!("{} is empty", name_file.display())));
        }
        Ok(full_name)
    }

    /// Path of the `name.c9s` file within a shortened entry.
    pub fn name_file(c9s_dir: &Path) -> PathBuf {
        c9s_dir.join(LONG_NAME_FILE)
    }
}
