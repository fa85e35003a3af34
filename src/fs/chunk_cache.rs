//! Bounded cleartext chunk cache.
//!
//! Each open file keeps a handful of decrypted chunks in memory so that
//! sequential and clustered random access do not decrypt the same chunk over
//! and over. The cache is a plain LRU over chunk indices; it never performs
//! I/O itself. Evicted entries are handed back to the caller, which re-encrypts
//! and persists dirty ones while holding the open file's lock.

use std::collections::{HashMap, VecDeque};

use zeroize::Zeroizing;

/// Number of cleartext chunks cached per open file.
pub const MAX_CACHED_CLEARTEXT_CHUNKS: usize = 5;

/// One cached cleartext chunk.
#[derive(Debug)]
pub struct Chunk {
    /// Decrypted chunk bytes; length is the chunk's current cleartext size.
    pub data: Zeroizing<Vec<u8>>,
    /// Set when the buffer differs from what is on disk.
    pub dirty: bool,
}

impl Chunk {
    pub fn new(data: Zeroizing<Vec<u8>>) -> Self {
        Chunk { data, dirty: false }
    }

    /// A zero-filled chunk of the given size, marked dirty.
    pub fn zeroed(len: usize) -> Self {
        Chunk { data: Zeroizing::new(vec![0u8; len]), dirty: true }
    }
}

/// LRU mapping from chunk index to cleartext chunk.
#[derive(Debug)]
pub struct ChunkCache {
    entries: HashMap<u64, Chunk>,
    // Most recently used at the front.
    order: VecDeque<u64>,
    capacity: usize,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        ChunkCache {
            entries: HashMap::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.entries.contains_key(&index)
    }

    /// Look up a chunk, marking it most recently used.
    pub fn get_mut(&mut self, index: u64) -> Option<&mut Chunk> {
        if self.entries.contains_key(&index) {
            self.touch(index);
        }
        self.entries.get_mut(&index)
    }

    /// Insert a chunk, returning the evicted LRU entry if the cache was full.
    ///
    /// The inserted chunk itself is never the one evicted.
    pub fn insert(&mut self, index: u64, chunk: Chunk) -> Option<(u64, Chunk)> {
        if self.entries.insert(index, chunk).is_some() {
            self.touch(index);
            return None;
        }
        self.order.push_front(index);
        if self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_back() {
                return self.entries.remove(&oldest).map(|c| (oldest, c));
            }
        }
        None
    }

    /// Remove a specific chunk without treating it as an eviction.
    pub fn remove(&mut self, index: u64) -> Option<Chunk> {
        self.order.retain(|i| *i != index);
        self.entries.remove(&index)
    }

    /// Remove every chunk whose index is `first` or beyond (for truncation).
    pub fn remove_at_or_beyond(&mut self, first: u64) {
        self.order.retain(|i| *i < first);
        self.entries.retain(|i, _| *i < first);
    }

    /// Iterate over dirty chunks in index order, clearing their dirty flags.
    ///
    /// The callback persists each chunk; on error the flag stays set so a
    /// later flush retries.
    pub fn flush_dirty<E>(
        &mut self,
        mut persist: impl FnMut(u64, &[u8]) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut dirty: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, chunk)| chunk.dirty)
            .map(|(index, _)| *index)
            .collect();
        dirty.sort_unstable();
        for index in dirty {
            let chunk = self.entries.get_mut(&index).expect("index collected above");
            persist(index, &chunk.data)?;
            chunk.dirty = false;
        }
        Ok(())
    }

    /// Drop every entry, returning them for final write-back.
    pub fn drain(&mut self) -> Vec<(u64, Chunk)> {
        self.order.clear();
        let mut all: Vec<(u64, Chunk)> = self.entries.drain().collect();
        all.sort_unstable_by_key(|(index, _)| *index);
        all
    }

    fn touch(&mut self, index: u64) {
        self.order.retain(|i| *i != index);
        self.order.push_front(index);
    }
}
