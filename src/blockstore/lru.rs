// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::Blockstore;
use crate::blocks::Block;
use bytes::Bytes;
use cid::Cid;
use hashlink::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A bounded in-memory blockstore evicting the least recently used block once
/// full.
pub struct LruBlockstore {
    cache: Mutex<LruCache<Cid, Bytes>>,
}

impl LruBlockstore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity.get())),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().capacity()
    }
}

impl Blockstore for LruBlockstore {
    fn put(&self, block: &Block) -> anyhow::Result<()> {
        self.cache.lock().insert(*block.cid(), block.data().clone());
        Ok(())
    }

    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Block>> {
        Ok(self
            .cache
            .lock()
            .get(cid)
            .map(|data| Block::new_with_cid(*cid, data.clone(), false))
            .transpose()?)
    }

    /// Does not refresh the entry.
    fn has(&self, cid: &Cid) -> anyhow::Result<bool> {
        Ok(self.cache.lock().contains_key(cid))
    }
}
