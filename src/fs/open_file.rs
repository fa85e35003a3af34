//! Per-file runtime state for open encrypted files.
//!
//! An [`OpenFile`] owns the host channel of one ciphertext file, its
//! decrypted header, the authoritative cleartext size, and a small cache of
//! decrypted chunks. All content operations on the same file serialize on one
//! internal lock, so reads observe prior writes in program order.
//!
//! Writing is chunk-granular: a write that covers a whole chunk installs a
//! fresh buffer without touching the old ciphertext, anything smaller loads
//! and mutates the enclosing chunk. Dirty chunks are re-encrypted and written
//! back when they fall out of the cache, when the file is flushed, and when
//! it closes. Write failures during eviction are queued and surfaced on the
//! next operation that can report them rather than being dropped.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::content::{
    chunk_index, ciphertext_chunk_offset, ciphertext_file_size, cleartext_file_size,
    decrypt_chunk, encrypt_chunk, offset_in_chunk, ChunkError, CHUNK_CIPHERTEXT_SIZE,
    CHUNK_OVERHEAD, CHUNK_PAYLOAD_SIZE,
};
use crate::crypto::header::{FileHeader, HEADER_SIZE};
use crate::crypto::keys::MasterKey;
use crate::error::{VaultError, VaultResult};
use crate::fs::chunk_cache::{Chunk, ChunkCache, MAX_CACHED_CLEARTEXT_CHUNKS};

/// Open options for encrypted files.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    create: bool,
    create_new: bool,
    truncate_existing: bool,
    sync_data: bool,
    sync_metadata: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn create_new(mut self, create_new: bool) -> Self {
        self.create_new = create_new;
        self
    }

    pub fn truncate_existing(mut self, truncate: bool) -> Self {
        self.truncate_existing = truncate;
        self
    }

    /// Force data to the host after every write.
    pub fn sync_data(mut self, sync: bool) -> Self {
        self.sync_data = sync;
        self
    }

    /// Force data and metadata to the host after every write.
    pub fn sync_all(mut self, sync: bool) -> Self {
        self.sync_data = self.sync_data || sync;
        self.sync_metadata = sync;
        self
    }

    #[inline]
    pub fn readable(&self) -> bool {
        self.read || !self.write
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.write
    }

    #[inline]
    pub fn is_create_new(&self) -> bool {
        self.create_new
    }

    #[inline]
    pub fn creates(&self) -> bool {
        self.create || self.create_new
    }

    #[inline]
    pub fn wants_sync(&self) -> bool {
        self.sync_data
    }

    #[inline]
    pub fn wants_metadata_sync(&self) -> bool {
        self.sync_metadata
    }

    /// Host open options for the backing ciphertext file.
    ///
    /// The channel is always readable because partial-chunk writes and header
    /// loads read existing ciphertext even on write-only handles.
    fn host_open_options(&self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options.read(true);
        options.write(self.writable());
        options.create(self.create && self.writable());
        options.create_new(self.create_new && self.writable());
        options.truncate(self.truncate_existing && self.writable());
        options
    }
}

#[derive(Debug, PartialEq)]
enum OpenState {
    JustOpened,
    WasOpen,
    AlreadyClosed,
}

/// Tracks how many handles share an [`OpenFile`].
///
/// Once the count has dropped to zero the instance is dead; late openers race
/// against closing and must build a fresh instance instead.
#[derive(Debug, Default)]
struct OpenCounter {
    open_count: u64,
    closed: bool,
}

impl OpenCounter {
    fn count_open(&mut self) -> OpenState {
        if self.closed {
            OpenState::AlreadyClosed
        } else if self.open_count == 0 {
            self.open_count = 1;
            OpenState::JustOpened
        } else {
            self.open_count += 1;
            OpenState::WasOpen
        }
    }

    fn count_close(&mut self) -> bool {
        self.open_count = self.open_count.saturating_sub(1);
        if self.open_count == 0 {
            self.closed = true;
            true
        } else {
            false
        }
    }
}

/// An advisory byte-range lock on the ciphertext channel.
///
/// Ranges are chunk-aligned ciphertext ranges; see [`ciphertext_lock_range`].
#[derive(Debug, Clone)]
pub struct FileRangeLock {
    id: u64,
    pub start: u64,
    pub end: u64,
    pub shared: bool,
}

#[derive(Debug)]
struct HeldLock {
    id: u64,
    start: u64,
    end: u64,
}

/// Translate a cleartext byte range to the enclosing ciphertext chunk range.
///
/// A cleartext lock must cover every ciphertext byte its chunks occupy,
/// otherwise two disjoint cleartext ranges within one chunk would not
/// conflict even though they contend for the same ciphertext bytes.
pub fn ciphertext_lock_range(position: u64, len: u64) -> (u64, u64) {
    let first_chunk = position / CHUNK_PAYLOAD_SIZE as u64;
    let end_chunk = (position + len).div_ceil(CHUNK_PAYLOAD_SIZE as u64);
    (
        HEADER_SIZE as u64 + first_chunk * CHUNK_CIPHERTEXT_SIZE as u64,
        HEADER_SIZE as u64 + end_chunk * CHUNK_CIPHERTEXT_SIZE as u64,
    )
}

struct FileState {
    channel: File,
    header: FileHeader,
    chunks: ChunkCache,
    write_errors: Vec<io::Error>,
    locks: Vec<HeldLock>,
    next_lock_id: u64,
}

/// Runtime state of one open encrypted file.
///
/// At most one instance exists per ciphertext path; handles share it through
/// the open-file registry and the open counter. The instance never holds a
/// pointer back to the registry: it announces its death through the
/// `on_closed` callback installed at construction.
pub struct OpenFile {
    path: PathBuf,
    master_key: Arc<MasterKey>,
    size: AtomicU64,
    state: Mutex<FileState>,
    counter: Mutex<OpenCounter>,
    last_modified: Mutex<SystemTime>,
    on_closed: Box<dyn Fn(&Path) + Send + Sync>,
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path)
            .field("size", &self.size.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl OpenFile {
    /// Open the ciphertext file and build the runtime state.
    ///
    /// A truncating or newly created file gets a fresh header; otherwise the
    /// existing header is read and decrypted, and its embedded size (falling
    /// back to the ciphertext geometry) becomes the file size.
    #[instrument(level = "debug", skip(master_key, options, on_closed), fields(path = %path.display()))]
    pub(crate) fn create(
        path: PathBuf,
        master_key: Arc<MasterKey>,
        options: &OpenOptions,
        on_closed: Box<dyn Fn(&Path) + Send + Sync>,
    ) -> VaultResult<Arc<OpenFile>> {
        let mut channel = options
            .host_open_options()
            .open(&path)
            .map_err(|e| VaultError::from_host_io(e, &path))?;
        let ciphertext_size = channel.metadata()?.len();

        let fresh = options.truncate_existing
            || options.create_new
            || (options.create && ciphertext_size == 0);

        let (header, size) = if fresh {
            (FileHeader::create(), 0)
        } else {
            if ciphertext_size < HEADER_SIZE as u64 {
                return Err(VaultError::corrupted(format!(
                    "{} is shorter than a file header",
                    path.display()
                )));
            }
            let mut buf = [0u8; HEADER_SIZE];
            read_exact_at(&mut channel, &mut buf, 0)?;
            let header = FileHeader::decrypt(&buf, &master_key).map_err(|e| match e {
                crate::crypto::header::HeaderError::AuthenticationFailed => {
                    VaultError::authentication_failed(format!("header of {}", path.display()))
                }
                other => VaultError::corrupted(other.to_string()),
            })?;
            let size = header
                .cleartext_size()
                .unwrap_or_else(|| cleartext_file_size(ciphertext_size));
            (header, size)
        };

        debug!(size, fresh, "opened encrypted file");
        Ok(Arc::new(OpenFile {
            path,
            master_key,
            size: AtomicU64::new(size),
            state: Mutex::new(FileState {
                channel,
                header,
                chunks: ChunkCache::new(MAX_CACHED_CLEARTEXT_CHUNKS),
                write_errors: Vec::new(),
                locks: Vec::new(),
                next_lock_id: 1,
            }),
            counter: Mutex::new(OpenCounter::default()),
            last_modified: Mutex::new(SystemTime::now()),
            on_closed,
        }))
    }

    /// Count another handle onto this instance.
    pub(crate) fn register(&self, options: &OpenOptions) -> VaultResult<()> {
        match self.counter.lock().count_open() {
            OpenState::AlreadyClosed => Err(VaultError::Closed),
            OpenState::WasOpen if options.is_create_new() => {
                Err(VaultError::already_exists(self.path.display().to_string()))
            }
            _ => Ok(()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current cleartext size.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn last_modified(&self) -> SystemTime {
        *self.last_modified.lock()
    }

    pub fn set_last_modified(&self, time: SystemTime) {
        *self.last_modified.lock() = time;
    }

    /// Read up to `dst.len()` bytes at `position`.
    ///
    /// Returns `Ok(0)` at or past end of file. A chunk that fails to
    /// authenticate aborts the whole read; no partial data is reported as
    /// success.
    #[instrument(level = "trace", skip(self, dst), fields(path = %self.path.display()))]
    pub fn read_at(&self, dst: &mut [u8], position: u64) -> VaultResult<usize> {
        let mut state = self.state.lock();
        let size = self.size();
        if position >= size {
            trace!(position, size, "read at or past eof");
            return Ok(0);
        }
        let want = dst.len().min((size - position) as usize);

        let mut done = 0usize;
        while done < want {
            let pos = position + done as u64;
            let index = chunk_index(pos);
            let offset = offset_in_chunk(pos);
            let len = (want - done).min(CHUNK_PAYLOAD_SIZE - offset);

            self.ensure_chunk(&mut state, index)?;
            let chunk = state.chunks.get_mut(index).expect("chunk ensured");
            let available = chunk.data.len().saturating_sub(offset);
            let n = len.min(available);
            dst[done..done + n].copy_from_slice(&chunk.data[offset..offset + n]);
            if n < len {
                dst[done + n..done + len].fill(0);
            }
            done += len;
        }
        Ok(want)
    }

    /// Write `src` at `position`, materializing any gap with zeroes.
    ///
    /// The size grows eagerly to `position + src.len()`. Deferred write-back
    /// errors from earlier evictions surface here before new data is
    /// accepted.
    #[instrument(level = "trace", skip(self, src), fields(path = %self.path.display()))]
    pub fn write_at(&self, src: &[u8], position: u64) -> VaultResult<usize> {
        let mut state = self.state.lock();
        self.surface_write_errors(&mut state)?;

        let size = self.size();
        if position > size {
            trace!(gap = position - size, "materializing sparse gap with zeroes");
            self.write_zeroes(&mut state, size, position - size)?;
        }
        self.write_span(&mut state, src, position)?;
        *self.last_modified.lock() = SystemTime::now();
        Ok(src.len())
    }

    /// Truncate (or zero-extend) to `new_size`.
    pub fn truncate(&self, new_size: u64) -> VaultResult<()> {
        let mut state = self.state.lock();
        self.surface_write_errors(&mut state)?;

        let size = self.size();
        if new_size >= size {
            if new_size > size {
                self.write_zeroes(&mut state, size, new_size - size)?;
            }
        } else {
            let boundary = chunk_index(new_size);
            let remainder = offset_in_chunk(new_size);
            if remainder == 0 {
                state.chunks.remove_at_or_beyond(boundary);
                self.size.store(new_size, Ordering::SeqCst);
            } else {
                state.chunks.remove_at_or_beyond(boundary + 1);
                self.size.store(new_size, Ordering::SeqCst);
                self.ensure_chunk(&mut state, boundary)?;
                let chunk = state.chunks.get_mut(boundary).expect("chunk ensured");
                if chunk.data.len() > remainder {
                    chunk.data.truncate(remainder);
                }
                chunk.dirty = true;
            }
            state.channel.set_len(ciphertext_file_size(new_size))?;
            self.flush_chunks(&mut state)?;
        }
        *self.last_modified.lock() = SystemTime::now();
        Ok(())
    }

    /// Write back dirty chunks, persist the header, and fsync.
    ///
    /// `writable` handles embed the current cleartext size into the header
    /// before it is written, making it authoritative for the next open.
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    pub fn force(&self, metadata: bool, writable: bool) -> VaultResult<()> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.write_errors);

        let flushed = self.flush_chunks(&mut state);

        if writable {
            let size = self.size();
            state.header.set_cleartext_size(size);
            let encrypted = state
                .header
                .encrypt(&self.master_key)
                .map_err(|e| VaultError::corrupted(e.to_string()))?;
            write_all_at(&mut state.channel, &encrypted, 0)?;
        }

        if metadata {
            state.channel.sync_all()?;
        } else {
            state.channel.sync_data()?;
        }

        if let Some(first) = pending.into_iter().next() {
            return Err(VaultError::Io(first));
        }
        flushed
    }

    /// Acquire an advisory lock on the chunk-aligned ciphertext range.
    ///
    /// Any overlap with a lock already held on this channel fails with
    /// `Overlap`, shared or not, mirroring the host's same-process advisory
    /// model.
    pub fn lock(&self, position: u64, len: u64, shared: bool) -> VaultResult<FileRangeLock> {
        let (start, end) = ciphertext_lock_range(position, len);
        let mut state = self.state.lock();
        if state.locks.iter().any(|held| held.start < end && start < held.end) {
            return Err(VaultError::Overlap);
        }
        let id = state.next_lock_id;
        state.next_lock_id += 1;
        state.locks.push(HeldLock { id, start, end });
        Ok(FileRangeLock { id, start, end, shared })
    }

    /// Non-blocking variant of [`lock`](Self::lock).
    ///
    /// The lock table is in-process and acquisition never blocks, so this has
    /// the same behavior.
    pub fn try_lock(&self, position: u64, len: u64, shared: bool) -> VaultResult<FileRangeLock> {
        self.lock(position, len, shared)
    }

    /// Release a previously acquired range lock.
    pub fn unlock(&self, lock: &FileRangeLock) {
        let mut state = self.state.lock();
        state.locks.retain(|held| held.id != lock.id);
    }

    /// Count down one handle; the final close flushes, persists the header
    /// (for writable handles), fsyncs, and announces the instance's death.
    pub fn close(&self, options: &OpenOptions) -> VaultResult<()> {
        let result = self.force(true, options.writable());
        let fully_closed = self.counter.lock().count_close();
        if fully_closed {
            (self.on_closed)(&self.path);
            debug!(path = %self.path.display(), "closed encrypted file");
        }
        result
    }

    fn surface_write_errors(&self, state: &mut FileState) -> VaultResult<()> {
        if state.write_errors.is_empty() {
            return Ok(());
        }
        let mut errors = std::mem::take(&mut state.write_errors);
        let first = errors.remove(0);
        for dropped in errors {
            warn!(error = %dropped, "dropping additional deferred write error");
        }
        Err(VaultError::Io(first))
    }

    /// Make sure `index` is present in the cache, loading it from the host if
    /// necessary and writing back whatever the load evicts.
    fn ensure_chunk(&self, state: &mut FileState, index: u64) -> VaultResult<()> {
        if state.chunks.contains(index) {
            return Ok(());
        }

        let mut buf = vec![0u8; CHUNK_CIPHERTEXT_SIZE];
        let n = read_at_offset(&mut state.channel, &mut buf, ciphertext_chunk_offset(index))?;
        let chunk = if n == 0 {
            // Writing past the current ciphertext end starts an empty chunk.
            Chunk::new(Zeroizing::new(Vec::new()))
        } else if n < CHUNK_OVERHEAD {
            return Err(VaultError::corrupted(format!(
                "chunk {index} of {} is truncated",
                self.path.display()
            )));
        } else {
            buf.truncate(n);
            trace!(chunk = index, "loading chunk from host");
            let data = decrypt_chunk(&buf, index, &state.header)
                .map_err(|e| self.chunk_error(e))?;
            Chunk::new(data)
        };

        if let Some((evicted_index, evicted)) = state.chunks.insert(index, chunk) {
            self.write_back(state, evicted_index, evicted);
        }
        Ok(())
    }

    /// Persist an evicted chunk if it is dirty and still lies within the
    /// file. Failures are queued, not raised: eviction happens in the middle
    /// of unrelated operations that must not report another chunk's error.
    fn write_back(&self, state: &mut FileState, index: u64, chunk: Chunk) {
        if !chunk.dirty {
            return;
        }
        if index * CHUNK_PAYLOAD_SIZE as u64 >= self.size() {
            return;
        }
        trace!(chunk = index, "writing back evicted chunk");
        match encrypt_chunk(&chunk.data, index, &state.header) {
            Ok(ciphertext) => {
                if let Err(e) =
                    write_all_at(&mut state.channel, &ciphertext, ciphertext_chunk_offset(index))
                {
                    warn!(chunk = index, error = %e, "deferred chunk write-back failure");
                    state.write_errors.push(e);
                }
            }
            Err(e) => {
                warn!(chunk = index, error = %e, "chunk encryption failed during write-back");
                state.write_errors.push(io::Error::other(e.to_string()));
            }
        }
    }

    fn write_span(&self, state: &mut FileState, data: &[u8], position: u64) -> VaultResult<()> {
        let mut written = 0usize;
        while written < data.len() {
            let pos = position + written as u64;
            let index = chunk_index(pos);
            let offset = offset_in_chunk(pos);
            let len = (data.len() - written).min(CHUNK_PAYLOAD_SIZE - offset);

            if offset == 0 && len == CHUNK_PAYLOAD_SIZE {
                // Whole-chunk write: no point decrypting the old ciphertext.
                if let Some((evicted_index, evicted)) =
                    state.chunks.insert(index, Chunk::zeroed(CHUNK_PAYLOAD_SIZE))
                {
                    self.write_back(state, evicted_index, evicted);
                }
            } else {
                self.ensure_chunk(state, index)?;
            }

            self.size.fetch_max(pos + len as u64, Ordering::SeqCst);

            let chunk = state.chunks.get_mut(index).expect("chunk ensured");
            if chunk.data.len() < offset + len {
                chunk.data.resize(offset + len, 0);
            }
            chunk.data[offset..offset + len].copy_from_slice(&data[written..written + len]);
            chunk.dirty = true;
            written += len;
        }
        Ok(())
    }

    fn write_zeroes(&self, state: &mut FileState, mut from: u64, mut remaining: u64) -> VaultResult<()> {
        let zeroes = [0u8; CHUNK_PAYLOAD_SIZE];
        while remaining > 0 {
            let chunk_room = CHUNK_PAYLOAD_SIZE - offset_in_chunk(from);
            let span = remaining.min(chunk_room as u64) as usize;
            self.write_span(state, &zeroes[..span], from)?;
            from += span as u64;
            remaining -= span as u64;
        }
        Ok(())
    }

    fn flush_chunks(&self, state: &mut FileState) -> VaultResult<()> {
        let FileState { channel, header, chunks, .. } = state;
        chunks
            .flush_dirty(|index, data| {
                let ciphertext = encrypt_chunk(data, index, header)
                    .map_err(|e| io::Error::other(e.to_string()))?;
                write_all_at(channel, &ciphertext, ciphertext_chunk_offset(index))
            })
            .map_err(VaultError::Io)
    }

    fn chunk_error(&self, e: ChunkError) -> VaultError {
        match e {
            ChunkError::AuthenticationFailed { chunk_index } => VaultError::authentication_failed(
                format!("chunk {chunk_index} of {}", self.path.display()),
            ),
            other => VaultError::corrupted(other.to_string()),
        }
    }
}

fn read_at_offset(channel: &mut File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    channel.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    while total < buf.len() {
        match channel.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn read_exact_at(channel: &mut File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let n = read_at_offset(channel, buf, offset)?;
    if n < buf.len() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
    }
    Ok(())
}

fn write_all_at(channel: &mut File, buf: &[u8], offset: u64) -> io::Result<()> {
    channel.seek(SeekFrom::Start(offset))?;
    channel.write_all(buf)
}
