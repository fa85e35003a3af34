//! Shared test harness: builds real vaults in temp directories.
#![allow(dead_code)] // each test binary uses its own subset of the harness

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vaultfs::crypto::keys::{MasterKey, RawKey, RAW_KEY_LEN};
use vaultfs::error::VaultResult;
use vaultfs::{OpenOptions, VaultFileSystem, VaultOptions, VaultPath};

pub const TEST_AES_KEY: [u8; 32] = [0x01; 32];
pub const TEST_MAC_KEY: [u8; 32] = [0x02; 32];

pub fn test_master_key() -> MasterKey {
    MasterKey::new(TEST_AES_KEY, TEST_MAC_KEY)
}

pub fn raw_key_bytes(aes: [u8; 32], mac: [u8; 32]) -> [u8; RAW_KEY_LEN] {
    let mut bytes = [0u8; RAW_KEY_LEN];
    bytes[..32].copy_from_slice(&aes);
    bytes[32..].copy_from_slice(&mac);
    bytes
}

/// Masterkey loader that always hands out the given raw key bytes.
pub fn fixed_key_loader(bytes: [u8; RAW_KEY_LEN]) -> impl Fn(&str) -> VaultResult<RawKey> {
    move |_key_id: &str| Ok(RawKey::new(bytes))
}

/// A vault initialized in a temp directory and opened with the test key.
pub struct TestVault {
    pub dir: TempDir,
    pub fs: VaultFileSystem,
}

impl TestVault {
    pub fn create() -> Self {
        Self::create_with(VaultOptions::new())
    }

    pub fn create_with(options: VaultOptions) -> Self {
        let dir = TempDir::new().unwrap();
        VaultFileSystem::initialize(dir.path(), &test_master_key(), &VaultOptions::new()).unwrap();
        let loader = fixed_key_loader(raw_key_bytes(TEST_AES_KEY, TEST_MAC_KEY));
        let fs = VaultFileSystem::open(dir.path(), &loader, options).unwrap();
        TestVault { dir, fs }
    }

    /// Re-open the same vault directory with fresh filesystem state.
    pub fn reopen(&self) -> VaultFileSystem {
        let loader = fixed_key_loader(raw_key_bytes(TEST_AES_KEY, TEST_MAC_KEY));
        VaultFileSystem::open(self.dir.path(), &loader, VaultOptions::new()).unwrap()
    }
}

/// Write a whole cleartext file, creating or replacing it.
pub fn write_file(fs: &VaultFileSystem, path: &str, content: &[u8]) {
    let handle = fs
        .open_file(
            path,
            OpenOptions::new().write(true).create(true).truncate_existing(true),
        )
        .unwrap();
    handle.write_at(content, 0).unwrap();
    handle.close().unwrap();
}

/// Read a whole cleartext file.
pub fn read_file(fs: &VaultFileSystem, path: &str) -> Vec<u8> {
    let handle = fs.open_file(path, OpenOptions::new().read(true)).unwrap();
    let mut content = vec![0u8; handle.size() as usize];
    let n = handle.read_at(&mut content, 0).unwrap();
    content.truncate(n);
    handle.close().unwrap();
    content
}

/// Deterministic content of an exact size.
pub fn sized_content(size: usize) -> Vec<u8> {
    let pattern = b"0123456789ABCDEF";
    (0..size).map(|i| pattern[i % pattern.len()]).collect()
}

/// List the cleartext names in a directory, sorted.
pub fn list_names(fs: &VaultFileSystem, path: &str) -> Vec<String> {
    let mut names: Vec<String> = fs
        .read_dir(VaultPath::new(path))
        .unwrap()
        .map(|entry| entry.unwrap().name)
        .collect();
    names.sort();
    names
}

/// Recursively collect all regular files under `d/`, ignoring `dirid.c9r`.
pub fn content_files(vault_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_files(&vault_dir.join("d"), &mut files);
    files.retain(|p| p.file_name().is_some_and(|n| n != "dirid.c9r"));
    files.sort();
    files
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}
