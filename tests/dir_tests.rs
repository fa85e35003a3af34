//! Directory creation, enumeration, deletion, and moves.

mod common;

use common::*;
use vaultfs::{CiphertextFileType, VaultError, VaultPath};

#[test]
fn create_and_list_nested_directories() {
    let vault = TestVault::create();
    vault.fs.create_directory("docs").unwrap();
    vault.fs.create_directory("docs/reports").unwrap();
    write_file(&vault.fs, "docs/readme.md", b"# docs");
    write_file(&vault.fs, "docs/reports/q1.txt", b"q1");

    assert_eq!(list_names(&vault.fs, "/"), vec!["docs".to_string()]);
    assert_eq!(
        list_names(&vault.fs, "docs"),
        vec!["readme.md".to_string(), "reports".to_string()]
    );
    assert_eq!(list_names(&vault.fs, "docs/reports"), vec!["q1.txt".to_string()]);
}

#[test]
fn entry_kinds_are_reported() {
    let vault = TestVault::create();
    vault.fs.create_directory("d").unwrap();
    write_file(&vault.fs, "f", b"x");
    vault.fs.create_symbolic_link("l", "f").unwrap();

    let mut entries: Vec<(String, CiphertextFileType)> = vault
        .fs
        .read_dir("/")
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.name, e.kind)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        entries,
        vec![
            ("d".to_string(), CiphertextFileType::Directory),
            ("f".to_string(), CiphertextFileType::File),
            ("l".to_string(), CiphertextFileType::Symlink),
        ]
    );
}

#[test]
fn create_directory_in_missing_parent_fails() {
    let vault = TestVault::create();
    assert!(matches!(
        vault.fs.create_directory("missing/child"),
        Err(VaultError::NotFound { .. })
    ));
}

#[test]
fn create_directory_twice_fails() {
    let vault = TestVault::create();
    vault.fs.create_directory("dup").unwrap();
    assert!(matches!(
        vault.fs.create_directory("dup"),
        Err(VaultError::AlreadyExists { .. })
    ));
}

#[test]
fn delete_empty_directory() {
    let vault = TestVault::create();
    vault.fs.create_directory("gone").unwrap();
    vault.fs.delete("gone").unwrap();
    assert!(!vault.fs.exists("gone").unwrap());

    // The directory id is destroyed with it; recreating yields a fresh,
    // unrelated directory.
    vault.fs.create_directory("gone").unwrap();
    assert_eq!(list_names(&vault.fs, "gone"), Vec::<String>::new());
}

#[test]
fn delete_nonempty_directory_fails() {
    let vault = TestVault::create();
    vault.fs.create_directory("full").unwrap();
    write_file(&vault.fs, "full/file.txt", b"content");
    assert!(matches!(
        vault.fs.delete("full"),
        Err(VaultError::DirectoryNotEmpty { .. })
    ));
    // Deleting the content first unblocks it.
    vault.fs.delete("full/file.txt").unwrap();
    vault.fs.delete("full").unwrap();
}

#[test]
fn delete_missing_entry_is_not_found() {
    let vault = TestVault::create();
    assert!(matches!(vault.fs.delete("ghost"), Err(VaultError::NotFound { .. })));
}

#[test]
fn rename_file_within_directory() {
    let vault = TestVault::create();
    write_file(&vault.fs, "old.txt", b"stable bytes");

    let before = content_files(vault.dir.path());
    vault.fs.rename("old.txt", "new.txt").unwrap();
    let after = content_files(vault.dir.path());

    assert!(!vault.fs.exists("old.txt").unwrap());
    assert_eq!(read_file(&vault.fs, "new.txt"), b"stable bytes");
    // The host sees different ciphertext names for the two cleartext names.
    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 1);
    assert_ne!(before[0].file_name(), after[0].file_name());
}

#[test]
fn move_file_between_directories() {
    let vault = TestVault::create();
    vault.fs.create_directory("a").unwrap();
    vault.fs.create_directory("b").unwrap();
    write_file(&vault.fs, "a/doc.txt", b"relocating");

    vault.fs.rename("a/doc.txt", "b/doc.txt").unwrap();
    assert!(!vault.fs.exists("a/doc.txt").unwrap());
    assert_eq!(read_file(&vault.fs, "b/doc.txt"), b"relocating");
    assert_eq!(list_names(&vault.fs, "a"), Vec::<String>::new());
    assert_eq!(list_names(&vault.fs, "b"), vec!["doc.txt".to_string()]);
}

#[test]
fn rename_directory_keeps_subtree() {
    let vault = TestVault::create();
    vault.fs.create_directory("src").unwrap();
    vault.fs.create_directory("src/sub").unwrap();
    write_file(&vault.fs, "src/sub/deep.txt", b"deep");

    vault.fs.rename("src", "dst").unwrap();
    assert!(!vault.fs.exists("src").unwrap());
    assert_eq!(read_file(&vault.fs, "dst/sub/deep.txt"), b"deep");
    assert_eq!(list_names(&vault.fs, "dst"), vec!["sub".to_string()]);
}

#[test]
fn rename_onto_existing_entry_fails() {
    let vault = TestVault::create();
    write_file(&vault.fs, "one.txt", b"1");
    write_file(&vault.fs, "two.txt", b"2");
    assert!(matches!(
        vault.fs.rename("one.txt", "two.txt"),
        Err(VaultError::AlreadyExists { .. })
    ));
}

#[test]
fn rename_directory_below_itself_fails() {
    let vault = TestVault::create();
    vault.fs.create_directory("outer").unwrap();
    assert!(vault.fs.rename("outer", "outer/inner").is_err());
}

#[test]
fn stream_filter_limits_entries() {
    let vault = TestVault::create();
    write_file(&vault.fs, "a.rs", b"rust");
    write_file(&vault.fs, "b.txt", b"text");
    write_file(&vault.fs, "c.rs", b"rust");

    let mut names: Vec<String> = vault
        .fs
        .directory_stream(VaultPath::root(), Box::new(|name| name.ends_with(".rs")))
        .unwrap()
        .map(|e| e.unwrap().name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.rs".to_string(), "c.rs".to_string()]);
}

#[test]
fn read_dir_on_file_is_not_a_directory() {
    let vault = TestVault::create();
    write_file(&vault.fs, "plain.txt", b"x");
    assert!(matches!(
        vault.fs.read_dir("plain.txt"),
        Err(VaultError::NotADirectory { .. })
    ));
}

#[test]
fn resolution_is_stable_across_instances() {
    let vault = TestVault::create();
    vault.fs.create_directory("stable").unwrap();
    write_file(&vault.fs, "stable/x.bin", &sized_content(1000));

    // A second filesystem instance over the same vault maps the same
    // cleartext path to the same ciphertext file.
    let reopened = vault.reopen();
    let first = content_files(vault.dir.path());
    assert_eq!(read_file(&reopened, "stable/x.bin"), sized_content(1000));
    let second = content_files(vault.dir.path());
    assert_eq!(first, second);
}
