// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A byte-budget LRU cache of decompressed blocks.
//!
//! Blocks are keyed by their on-disk offset; an image is immutable, so the
//! offset uniquely identifies the content. The cache is shared between all
//! metadata streams and file readers of an image and hands out
//! reference-counted buffers, so eviction never invalidates bytes a reader
//! is still holding.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::Result;
use std::sync::{Arc, RwLock};

/// Turns the on-disk bytes of one block into its decompressed form.
pub trait BlockDecoder {
    fn decode(&self, src: &[u8]) -> Result<Vec<u8>>;
}

/// Fixed byte-budget LRU of decompressed blocks keyed by on-disk offset.
pub struct BlockCache {
    budget: usize,
    inner: RwLock<CacheInner>,
}

struct CacheInner {
    used: usize,
    entries: HashMap<u64, Arc<Vec<u8>>>,
    // Most recently used at the front.
    order: VecDeque<u64>,
}

impl BlockCache {
    /// Create a cache holding at most `budget` bytes of decompressed data.
    /// A zero budget caches nothing and turns every lookup into a miss.
    pub fn new(budget: usize) -> Self {
        BlockCache {
            budget,
            inner: RwLock::new(CacheInner {
                used: 0,
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Fetch the decompressed block stored at `offset`, decoding `src` on a
    /// miss. `decoder` of `None` means the block is stored raw and `src` is
    /// kept verbatim.
    ///
    /// Two threads missing on the same key may both decode; the last one to
    /// insert wins, which is harmless since both decode the same bytes.
    pub fn get(
        &self,
        offset: u64,
        src: &[u8],
        decoder: Option<&dyn BlockDecoder>,
    ) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.lookup(offset) {
            return Ok(data);
        }

        let data = match decoder {
            Some(d) => Arc::new(d.decode(src)?),
            None => Arc::new(src.to_vec()),
        };

        self.insert(offset, &data);

        Ok(data)
    }

    fn lookup(&self, offset: u64) -> Option<Arc<Vec<u8>>> {
        let data = {
            let inner = self.inner.read().unwrap();
            inner.entries.get(&offset)?.clone()
        };

        // Promote outside the read path; a concurrent eviction of this key
        // is fine, the buffer is already ours.
        self.inner.write().unwrap().promote(offset);

        Some(data)
    }

    fn insert(&self, offset: u64, data: &Arc<Vec<u8>>) {
        if data.len() > self.budget {
            // Larger than the whole cache; hand it to the caller only.
            return;
        }

        let mut inner = self.inner.write().unwrap();

        if inner.entries.contains_key(&offset) {
            // Lost a race with another decoder for the same key. Replace the
            // entry so the last writer wins, keeping accounting intact.
            inner.remove(offset);
        }

        while inner.used + data.len() > self.budget {
            let victim = match inner.order.pop_back() {
                Some(v) => v,
                None => break,
            };
            let evicted = inner.entries.remove(&victim).map(|e| e.len()).unwrap_or(0);
            inner.used -= evicted;
            trace!("block cache evicted {} bytes at {:#x}", evicted, victim);
        }

        inner.used += data.len();
        inner.entries.insert(offset, data.clone());
        inner.order.push_front(offset);
    }
}

impl CacheInner {
    fn promote(&mut self, offset: u64) {
        if let Some(pos) = self.order.iter().position(|&o| o == offset) {
            if pos != 0 {
                self.order.remove(pos);
                self.order.push_front(offset);
            }
        }
    }

    fn remove(&mut self, offset: u64) {
        if let Some(data) = self.entries.remove(&offset) {
            self.used -= data.len();
        }
        if let Some(pos) = self.order.iter().position(|&o| o == offset) {
            self.order.remove(pos);
        }
    }
}
