//! Vault initialization, opening, and structure probing.

mod common;

use common::*;
use vaultfs::vault::structure::check_dir_structure;
use vaultfs::{DirStructure, VaultError, VaultFileSystem, VaultOptions};

#[test]
fn initialize_then_open() {
    let vault = TestVault::create();
    assert!(!vault.fs.is_readonly());
    assert_eq!(vault.fs.config().shortening_threshold, 220);
    assert!(vault.fs.exists("/").unwrap());
}

#[test]
fn open_with_wrong_key_fails_key_invalid() {
    let vault = TestVault::create();

    let wrong = fixed_key_loader(raw_key_bytes([0xAA; 32], [0xBB; 32]));
    let result = VaultFileSystem::open(vault.dir.path(), &wrong, VaultOptions::new());
    assert!(matches!(result, Err(VaultError::VaultKeyInvalid)));
}

#[test]
fn open_without_config_is_not_found() {
    let dir = tempfile::TempDir::new().unwrap();
    let loader = fixed_key_loader(raw_key_bytes(TEST_AES_KEY, TEST_MAC_KEY));
    let result = VaultFileSystem::open(dir.path(), &loader, VaultOptions::new());
    assert!(matches!(result, Err(VaultError::NotFound { .. })));
}

#[test]
fn initialized_vault_probes_as_vault() {
    let vault = TestVault::create();
    let probe = check_dir_structure(vault.dir.path(), "vault.cryptomator", None).unwrap();
    assert_eq!(probe, DirStructure::Vault);
}

#[test]
fn probe_uses_configured_filenames() {
    let vault = TestVault::create();
    let options = VaultOptions::new().masterkey_filename("masterkey.cryptomator");
    assert_eq!(
        VaultFileSystem::probe(vault.dir.path(), &options).unwrap(),
        DirStructure::Vault
    );

    // Remove the config: with a masterkey file present this looks legacy.
    std::fs::remove_file(vault.dir.path().join("vault.cryptomator")).unwrap();
    std::fs::write(vault.dir.path().join("masterkey.cryptomator"), b"{}").unwrap();
    assert_eq!(
        VaultFileSystem::probe(vault.dir.path(), &options).unwrap(),
        DirStructure::MaybeLegacy
    );
}

#[test]
fn vault_layout_has_data_dir_and_root() {
    let vault = TestVault::create();
    let data_dir = vault.dir.path().join("d");
    assert!(data_dir.is_dir());

    // d/<2 chars>/<30 chars> for the root directory.
    let shard = std::fs::read_dir(&data_dir).unwrap().next().unwrap().unwrap();
    assert_eq!(shard.file_name().to_str().unwrap().len(), 2);
    let root = std::fs::read_dir(shard.path()).unwrap().next().unwrap().unwrap();
    assert_eq!(root.file_name().to_str().unwrap().len(), 30);
}

#[test]
fn loader_receives_key_id_from_token() {
    let vault = TestVault::create();
    let seen = std::sync::Mutex::new(None);
    let loader = |key_id: &str| -> vaultfs::VaultResult<vaultfs::crypto::keys::RawKey> {
        *seen.lock().unwrap() = Some(key_id.to_string());
        Ok(vaultfs::crypto::keys::RawKey::new(raw_key_bytes(TEST_AES_KEY, TEST_MAC_KEY)))
    };
    VaultFileSystem::open(vault.dir.path(), &loader, VaultOptions::new()).unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("masterkeyfile:masterkey.cryptomator"));
}

#[test]
fn custom_config_filename_is_honored() {
    let dir = tempfile::TempDir::new().unwrap();
    let options = VaultOptions::new().vault_config_filename("vault.conf");
    VaultFileSystem::initialize(dir.path(), &test_master_key(), &options).unwrap();
    assert!(dir.path().join("vault.conf").is_file());

    let loader = fixed_key_loader(raw_key_bytes(TEST_AES_KEY, TEST_MAC_KEY));
    let fs = VaultFileSystem::open(dir.path(), &loader, options).unwrap();
    assert!(fs.exists("/").unwrap());
}

#[test]
fn two_vaults_have_unrelated_layouts() {
    // Same key, different vaults: root location is the same (it depends only
    // on the key), but file placements under different names differ.
    let a = TestVault::create();
    let b = TestVault::create();
    write_file(&a.fs, "one.txt", b"payload");
    write_file(&b.fs, "two.txt", b"payload");

    let files_a = content_files(a.dir.path());
    let files_b = content_files(b.dir.path());
    assert_eq!(files_a.len(), 1);
    assert_eq!(files_b.len(), 1);
    assert_ne!(files_a[0].file_name(), files_b[0].file_name());
}
