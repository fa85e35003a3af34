//! Attribute snapshots and re-reading views.

mod common;

use std::time::{Duration, SystemTime};

use common::*;
use vaultfs::{OpenOptions, VaultError};

#[test]
fn snapshot_survives_deletion() {
    let vault = TestVault::create();
    write_file(&vault.fs, "doomed.txt", &sized_content(5000));

    let snapshot = vault.fs.read_attributes("doomed.txt").unwrap();
    vault.fs.delete("doomed.txt").unwrap();

    // The snapshot is immutable; the deletion does not reach into it.
    assert_eq!(snapshot.size, 5000);
    assert!(snapshot.is_regular_file());
}

#[test]
fn view_rereads_and_surfaces_not_found() {
    let vault = TestVault::create();
    write_file(&vault.fs, "watched.txt", &sized_content(100));

    let view = vault.fs.attribute_view("watched.txt");
    assert_eq!(view.read().unwrap().size, 100);

    write_file(&vault.fs, "watched.txt", &sized_content(250));
    assert_eq!(view.read().unwrap().size, 250);

    vault.fs.delete("watched.txt").unwrap();
    assert!(matches!(view.read(), Err(VaultError::NotFound { .. })));
}

#[test]
fn open_file_size_wins_over_geometry() {
    let vault = TestVault::create();
    write_file(&vault.fs, "live.bin", &sized_content(1000));

    let handle = vault
        .fs
        .open_file("live.bin", OpenOptions::new().read(true).write(true))
        .unwrap();
    handle.write_at(&sized_content(9000), 0).unwrap();

    // Dirty chunks may not be on the host yet; the live size must win.
    assert_eq!(vault.fs.read_attributes("live.bin").unwrap().size, 9000);

    handle.close().unwrap();
    assert_eq!(vault.fs.read_attributes("live.bin").unwrap().size, 9000);
}

#[test]
fn directory_attributes_pass_host_size_through() {
    let vault = TestVault::create();
    vault.fs.create_directory("dir").unwrap();
    let attrs = vault.fs.read_attributes("dir").unwrap();
    assert!(attrs.is_directory());

    let root_attrs = vault.fs.read_attributes("/").unwrap();
    assert!(root_attrs.is_directory());
}

#[test]
fn short_ciphertext_reports_size_zero() {
    let vault = TestVault::create();
    write_file(&vault.fs, "victim.bin", &sized_content(5000));

    // Truncate the ciphertext below the header size behind the vault's back.
    let files = content_files(vault.dir.path());
    assert_eq!(files.len(), 1);
    let file = std::fs::OpenOptions::new().write(true).open(&files[0]).unwrap();
    file.set_len(10).unwrap();

    assert_eq!(vault.fs.read_attributes("victim.bin").unwrap().size, 0);
}

#[test]
fn set_times_updates_modified() {
    let vault = TestVault::create();
    write_file(&vault.fs, "stamped.txt", b"x");

    let past = SystemTime::now() - Duration::from_secs(3600);
    vault.fs.attribute_view("stamped.txt").set_times(Some(past), None).unwrap();

    let attrs = vault.fs.read_attributes("stamped.txt").unwrap();
    let delta = past
        .duration_since(attrs.modified)
        .unwrap_or_else(|e| e.duration());
    assert!(delta < Duration::from_secs(2), "modified time not applied");
}

#[test]
fn missing_entry_attributes_are_not_found() {
    let vault = TestVault::create();
    assert!(matches!(
        vault.fs.read_attributes("ghost"),
        Err(VaultError::NotFound { .. })
    ));
}
