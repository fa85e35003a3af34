//! File content round-trips, geometry, sparse writes, persistence.

mod common;

use common::*;
use vaultfs::crypto::content::ciphertext_file_size;
use vaultfs::{OpenOptions, VaultError};

#[test]
fn small_file_roundtrip() {
    let vault = TestVault::create();
    write_file(&vault.fs, "hello.txt", b"hello vault");
    assert_eq!(read_file(&vault.fs, "hello.txt"), b"hello vault");
}

#[test]
fn empty_file_roundtrip() {
    let vault = TestVault::create();
    write_file(&vault.fs, "empty", b"");
    assert_eq!(read_file(&vault.fs, "empty"), b"");
    assert_eq!(vault.fs.read_attributes("empty").unwrap().size, 0);
}

#[test]
fn write_across_chunk_boundary() {
    let vault = TestVault::create();
    let content = sized_content(40_000);
    write_file(&vault.fs, "two-chunks.bin", &content);
    assert_eq!(read_file(&vault.fs, "two-chunks.bin"), content);

    // One full chunk plus one partial chunk behind a 68-byte header.
    let files = content_files(vault.dir.path());
    assert_eq!(files.len(), 1);
    let on_disk = std::fs::metadata(&files[0]).unwrap().len();
    assert_eq!(on_disk, ciphertext_file_size(40_000));
}

#[test]
fn multi_chunk_roundtrip_through_cache_pressure() {
    let vault = TestVault::create();
    // More chunks than the per-file cache holds, forcing eviction write-back.
    let content = sized_content(9 * 32768 + 17);
    write_file(&vault.fs, "big.bin", &content);
    assert_eq!(read_file(&vault.fs, "big.bin"), content);
}

#[test]
fn sparse_write_materializes_zeroes() {
    let vault = TestVault::create();
    let handle = vault
        .fs
        .open_file("sparse.bin", OpenOptions::new().read(true).write(true).create(true))
        .unwrap();
    handle.write_at(b"x", 100_000).unwrap();
    assert_eq!(handle.size(), 100_001);

    let mut probe = vec![0xFFu8; 100_000];
    assert_eq!(handle.read_at(&mut probe, 0).unwrap(), 100_000);
    assert!(probe.iter().all(|b| *b == 0));

    let mut tail = [0u8; 1];
    handle.read_at(&mut tail, 100_000).unwrap();
    assert_eq!(&tail, b"x");
    handle.close().unwrap();

    assert_eq!(vault.fs.read_attributes("sparse.bin").unwrap().size, 100_001);
}

#[test]
fn content_survives_reopen_of_filesystem() {
    let vault = TestVault::create();
    let content = sized_content(70_000);
    write_file(&vault.fs, "persist.bin", &content);

    let reopened = vault.reopen();
    assert_eq!(read_file(&reopened, "persist.bin"), content);
}

#[test]
fn concurrent_handles_share_state() {
    let vault = TestVault::create();
    write_file(&vault.fs, "shared.txt", b"initial");

    let writer = vault
        .fs
        .open_file("shared.txt", OpenOptions::new().read(true).write(true))
        .unwrap();
    let reader = vault.fs.open_file("shared.txt", OpenOptions::new().read(true)).unwrap();

    writer.write_at(b"updated", 0).unwrap();
    let mut buf = vec![0u8; 7];
    reader.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"updated");

    writer.close().unwrap();
    reader.close().unwrap();
}

#[test]
fn create_new_fails_on_existing_file() {
    let vault = TestVault::create();
    write_file(&vault.fs, "taken.txt", b"first");
    let result = vault
        .fs
        .open_file("taken.txt", OpenOptions::new().write(true).create_new(true));
    assert!(matches!(result, Err(VaultError::AlreadyExists { .. })));
}

#[test]
fn open_missing_file_is_not_found() {
    let vault = TestVault::create();
    assert!(matches!(
        vault.fs.open_file("ghost.txt", OpenOptions::new().read(true)),
        Err(VaultError::NotFound { .. })
    ));
}

#[test]
fn open_directory_as_file_is_rejected() {
    let vault = TestVault::create();
    vault.fs.create_directory("dir").unwrap();
    assert!(matches!(
        vault.fs.open_file("dir", OpenOptions::new().read(true)),
        Err(VaultError::IsADirectory { .. })
    ));
}

#[test]
fn truncate_existing_discards_content() {
    let vault = TestVault::create();
    write_file(&vault.fs, "t.bin", &sized_content(50_000));

    let handle = vault
        .fs
        .open_file(
            "t.bin",
            OpenOptions::new().read(true).write(true).truncate_existing(true),
        )
        .unwrap();
    assert_eq!(handle.size(), 0);
    handle.write_at(b"fresh", 0).unwrap();
    handle.close().unwrap();

    assert_eq!(read_file(&vault.fs, "t.bin"), b"fresh");
}

#[test]
fn truncate_then_read_tail_is_gone() {
    let vault = TestVault::create();
    write_file(&vault.fs, "shrink.bin", &sized_content(40_000));

    let handle = vault
        .fs
        .open_file("shrink.bin", OpenOptions::new().read(true).write(true))
        .unwrap();
    handle.truncate(10).unwrap();
    assert_eq!(handle.size(), 10);
    handle.close().unwrap();

    let content = read_file(&vault.fs, "shrink.bin");
    assert_eq!(content, sized_content(40_000)[..10].to_vec());
}

#[test]
fn append_grows_at_end() {
    let vault = TestVault::create();
    write_file(&vault.fs, "log.txt", b"one\n");

    let handle = vault
        .fs
        .open_file("log.txt", OpenOptions::new().read(true).write(true))
        .unwrap();
    handle.append(b"two\n").unwrap();
    handle.append(b"three\n").unwrap();
    handle.close().unwrap();

    assert_eq!(read_file(&vault.fs, "log.txt"), b"one\ntwo\nthree\n");
}

#[test]
fn read_only_handle_rejects_writes() {
    let vault = TestVault::create();
    write_file(&vault.fs, "ro.txt", b"data");
    let handle = vault.fs.open_file("ro.txt", OpenOptions::new().read(true)).unwrap();
    assert!(handle.write_at(b"nope", 0).is_err());
    assert!(handle.truncate(0).is_err());
    handle.close().unwrap();
}

#[test]
fn force_persists_without_close() {
    let vault = TestVault::create();
    let handle = vault
        .fs
        .open_file("forced.bin", OpenOptions::new().read(true).write(true).create(true))
        .unwrap();
    handle.write_at(&sized_content(12_345), 0).unwrap();
    handle.force(true).unwrap();

    // A second filesystem over the same host directory sees the forced state.
    let reopened = vault.reopen();
    assert_eq!(reopened.read_attributes("forced.bin").unwrap().size, 12_345);

    handle.close().unwrap();
}

#[test]
fn closed_handle_refuses_io() {
    let vault = TestVault::create();
    write_file(&vault.fs, "done.txt", b"data");
    let handle = vault.fs.open_file("done.txt", OpenOptions::new().read(true)).unwrap();
    handle.close().unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(handle.read_at(&mut buf, 0), Err(VaultError::Closed)));
    // Closing twice is fine.
    handle.close().unwrap();
}
