//! Filesystem core: name codec, path mapping, open-file runtime, streams.

pub mod attr;
pub mod chunk_cache;
pub mod dir_stream;
pub mod longname;
pub mod mapper;
pub mod name;
pub mod open_file;
pub mod provider;
pub mod registry;

pub use attr::{AttributesKind, DosBits, PosixBits, VaultFileAttributes};
pub use dir_stream::{DirEntry, DirectoryStream};
pub use mapper::CiphertextFileType;
pub use open_file::{FileRangeLock, OpenOptions};
pub use provider::{AttributeView, FileHandle, VaultFileSystem, VaultOptions};
