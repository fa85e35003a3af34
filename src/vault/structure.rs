//! Vault directory structure probe.
//!
//! Cheap existence checks to decide whether a host directory looks like a
//! vault before attempting to open it. A current-format vault has a `d/`
//! data directory and a config file; a `d/` directory with only a masterkey
//! file next to it is either a legacy vault awaiting migration or a damaged
//! one, which only parsing the masterkey file can tell apart.

use std::fs;
use std::path::Path;

use crate::error::{VaultError, VaultResult};

/// Name of the ciphertext data directory inside a vault.
pub const DATA_DIR_NAME: &str = "d";

/// Resemblance of a host directory to a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStructure {
    /// Contains `d/` and a readable vault config file.
    Vault,
    /// Contains `d/` and a masterkey file but no vault config file.
    MaybeLegacy,
    /// Does not qualify as a vault.
    Unrelated,
}

/// Probe the structure of `path_to_vault`.
///
/// `masterkey_filename` may be `None` to skip legacy detection. Fails with
/// `NotADirectory` when the path does not name a directory.
pub fn check_dir_structure(
    path_to_vault: &Path,
    vault_config_filename: &str,
    masterkey_filename: Option<&str>,
) -> VaultResult<DirStructure> {
    let meta = fs::metadata(path_to_vault)
        .map_err(|e| VaultError::from_host_io(e, path_to_vault))?;
    if !meta.is_dir() {
        return Err(VaultError::not_a_directory(path_to_vault.display().to_string()));
    }

    let data_dir = path_to_vault.join(DATA_DIR_NAME);
    if data_dir.is_dir() {
        if is_readable_file(&path_to_vault.join(vault_config_filename)) {
            return Ok(DirStructure::Vault);
        }
        if let Some(masterkey) = masterkey_filename {
            if is_readable_file(&path_to_vault.join(masterkey)) {
                return Ok(DirStructure::MaybeLegacy);
            }
        }
    }
    Ok(DirStructure::Unrelated)
}

fn is_readable_file(path: &Path) -> bool {
    fs::File::open(path).map(|f| f.metadata().map(|m| m.is_file()).unwrap_or(false)).unwrap_or(false)
}
