//! Bounded least-recently-used cache of hydrated papers.
//!
//! The cache sits in front of the [`Store`](crate::store::Store) and holds
//! non-owning `Arc<Paper>` copies. Every store write invalidates the entries
//! it touches, and a generation counter keeps a reader that loaded a row
//! *before* a write from re-inserting the stale copy afterwards:
//!
//! ```text
//! reader: ticket() ──► load row ─────────────────► insert(ticket)  (dropped: generation moved)
//! writer:                 └─► commit ─► invalidate()  (generation += 1)
//! ```

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use tracing::trace;

use crate::paper::{Paper, PaperId};

/// Default number of cached papers.
pub const DEFAULT_CACHE_ITEMS: usize = 10_000;

/// How the cache bounds its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCapacity {
    /// At most this many papers.
    Items(NonZeroUsize),
    /// At most this many bytes, by [`Paper::approx_size`].
    Bytes(usize),
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self::Items(NonZeroUsize::new(DEFAULT_CACHE_ITEMS).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Observable cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Proof of the cache generation observed before a store read.
#[derive(Debug, Clone, Copy)]
pub struct CacheTicket(u64);

struct CacheState {
    entries: LruCache<PaperId, Arc<Paper>>,
    byte_limit: Option<usize>,
    bytes: usize,
    generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe, cloneable handle to a shared LRU of papers.
#[derive(Clone)]
pub struct FrontCache {
    inner: Arc<Mutex<CacheState>>,
}

impl fmt::Debug for FrontCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("FrontCache")
            .field("entries", &stats.entries)
            .field("bytes", &stats.bytes)
            .finish_non_exhaustive()
    }
}

impl Default for FrontCache {
    fn default() -> Self {
        Self::new(CacheCapacity::default())
    }
}

impl FrontCache {
    /// Creates an empty cache bounded by `capacity`.
    #[must_use]
    pub fn new(capacity: CacheCapacity) -> Self {
        let (entries, byte_limit) = match capacity {
            CacheCapacity::Items(max) => (LruCache::new(max), None),
            CacheCapacity::Bytes(max) => (LruCache::unbounded(), Some(max)),
        };
        Self {
            inner: Arc::new(Mutex::new(CacheState {
                entries,
                byte_limit,
                bytes: 0,
                generation: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a paper, marking it most recently used.
    #[must_use]
    pub fn get(&self, id: &PaperId) -> Option<Arc<Paper>> {
        let mut state = self.lock();
        if let Some(paper) = state.entries.get(id).cloned() {
            state.hits += 1;
            Some(paper)
        } else {
            state.misses += 1;
            None
        }
    }

    /// Captures the current generation before reading from the store.
    #[must_use]
    pub fn ticket(&self) -> CacheTicket {
        CacheTicket(self.lock().generation)
    }

    /// Inserts a freshly loaded paper unless a write happened since `ticket`.
    ///
    /// Returns whether the paper was cached.
    pub fn insert(&self, ticket: CacheTicket, paper: Arc<Paper>) -> bool {
        let mut state = self.lock();
        if state.generation != ticket.0 {
            trace!(paper_id = %paper.id, "skipping cache insert after concurrent write");
            return false;
        }

        let size = paper.approx_size();
        if state.byte_limit.is_some_and(|limit| size > limit) {
            return false;
        }

        let id = paper.id.clone();
        if let Some((old_id, old)) = state.entries.push(id.clone(), paper) {
            state.bytes = state.bytes.saturating_sub(old.approx_size());
            if old_id != id {
                state.evictions += 1;
            }
        }
        state.bytes += size;

        if let Some(limit) = state.byte_limit {
            while state.bytes > limit {
                let Some((_, evicted)) = state.entries.pop_lru() else {
                    break;
                };
                state.bytes = state.bytes.saturating_sub(evicted.approx_size());
                state.evictions += 1;
            }
        }
        true
    }

    /// Drops one paper and advances the generation.
    pub fn invalidate(&self, id: &PaperId) {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(old) = state.entries.pop(id) {
            state.bytes = state.bytes.saturating_sub(old.approx_size());
        }
    }

    /// Drops several papers under one lock acquisition.
    pub fn invalidate_many<'a>(&self, ids: impl IntoIterator<Item = &'a PaperId>) {
        let mut state = self.lock();
        state.generation += 1;
        for id in ids {
            if let Some(old) = state.entries.pop(id) {
                state.bytes = state.bytes.saturating_sub(old.approx_size());
            }
        }
    }

    /// Empties the cache.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.entries.clear();
        state.bytes = 0;
    }

    /// Returns the number of cached papers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
