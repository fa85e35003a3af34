//! Cleartext path types.
//!
//! Two distinct types keep the two path namespaces apart:
//!
//! - [`DirId`]: opaque identifiers locating ciphertext directories
//! - [`VaultPath`]: user-facing `/`-separated paths inside the vault

use std::fmt;

use relative_path::{RelativePath, RelativePathBuf};

/// Opaque directory identifier.
///
/// Directory ids are stored in `dir.c9r` files and double as associated data
/// for filename encryption, binding every name to its parent directory. The
/// root directory's id is the empty string. Fresh ids are UUIDs and are never
/// reused within a vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    /// The root directory (empty string id).
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// Generate a fresh random directory id.
    pub fn generate() -> Self {
        DirId(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap a raw id read from a `dir.c9r` file.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// User-facing path inside a vault.
///
/// Always `/`-separated regardless of host OS; leading slashes are stripped
/// on construction, so `"/a/b"` and `"a/b"` are the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultPath(RelativePathBuf);

impl VaultPath {
    /// The root path.
    #[inline]
    pub fn root() -> Self {
        VaultPath(RelativePathBuf::new())
    }

    pub fn new(path: impl AsRef<str>) -> Self {
        let s = path.as_ref().trim_start_matches('/');
        VaultPath(RelativePathBuf::from(s))
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        &self.0
    }

    pub fn join(&self, component: impl AsRef<str>) -> Self {
        VaultPath(self.0.join(component.as_ref()))
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<VaultPath> {
        self.0.parent().map(|p| VaultPath(p.to_relative_path_buf()))
    }

    /// Final component; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.components().map(|c| c.as_str())
    }

    /// Split into parent and final component; `None` for the root.
    pub fn split(&self) -> Option<(VaultPath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// Whether `self` is `other` or lies below it.
    pub fn starts_with(&self, other: &VaultPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl AsRef<str> for VaultPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.0)
        }
    }
}

impl From<&str> for VaultPath {
    fn from(s: &str) -> Self {
        VaultPath::new(s)
    }
}

impl From<String> for VaultPath {
    fn from(s: String) -> Self {
        VaultPath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_dir_id_is_empty() {
        let root = DirId::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "");
        assert_eq!(root.to_string(), "<root>");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DirId::generate(), DirId::generate());
    }

    #[test]
    fn generated_ids_are_uuid_shaped() {
        assert_eq!(DirId::generate().as_str().len(), 36);
    }

    #[test]
    fn leading_slash_is_normalized() {
        assert_eq!(VaultPath::new("/a/b.txt"), VaultPath::new("a/b.txt"));
    }

    #[test]
    fn split_and_join_are_inverse() {
        let path = VaultPath::new("docs/report.txt");
        let (parent, name) = path.split().unwrap();
        assert_eq!(parent.as_str(), "docs");
        assert_eq!(name, "report.txt");
        assert_eq!(parent.join(name), path);
    }

    #[test]
    fn root_has_no_parent() {
        assert!(VaultPath::root().split().is_none());
        assert!(VaultPath::root().parent().is_none());
    }

    #[test]
    fn components_iteration() {
        let path = VaultPath::new("a/b/c");
        let parts: Vec<_> = path.components().collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(VaultPath::root().components().count(), 0);
    }

    #[test]
    fn starts_with_prefix() {
        let deep = VaultPath::new("a/b/c");
        assert!(deep.starts_with(&VaultPath::new("a/b")));
        assert!(deep.starts_with(&VaultPath::root()));
        assert!(!deep.starts_with(&VaultPath::new("a/x")));
    }

    #[test]
    fn display_includes_leading_slash() {
        assert_eq!(VaultPath::new("a/b").to_string(), "/a/b");
        assert_eq!(VaultPath::root().to_string(), "/");
    }
}
