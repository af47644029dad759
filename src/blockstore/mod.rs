// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod lru;
mod memory;

pub use lru::LruBlockstore;
pub use memory::MemoryBlockstore;

use crate::blocks::Block;
use cid::Cid;
use std::sync::Arc;

/// Block storage shared by every part of the exchange. Implementations must
/// tolerate concurrent reads and writes.
pub trait Blockstore: Send + Sync + 'static {
    fn put(&self, block: &Block) -> anyhow::Result<()>;
    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Block>>;
    fn has(&self, cid: &Cid) -> anyhow::Result<bool>;
}

impl<T: Blockstore> Blockstore for Arc<T> {
    fn put(&self, block: &Block) -> anyhow::Result<()> {
        self.as_ref().put(block)
    }

    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Block>> {
        self.as_ref().get(cid)
    }

    fn has(&self, cid: &Cid) -> anyhow::Result<bool> {
        self.as_ref().has(cid)
    }
}
