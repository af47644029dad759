// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::Blockstore;
use crate::blocks::Block;
use ahash::HashMap;
use bytes::Bytes;
use cid::Cid;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl Blockstore for MemoryBlockstore {
    fn put(&self, block: &Block) -> anyhow::Result<()> {
        self.blocks
            .write()
            .insert(*block.cid(), block.data().clone());
        Ok(())
    }

    fn get(&self, cid: &Cid) -> anyhow::Result<Option<Block>> {
        Ok(self
            .blocks
            .read()
            .get(cid)
            .map(|data| Block::new_with_cid(*cid, data.clone(), false))
            .transpose()?)
    }

    fn has(&self, cid: &Cid) -> anyhow::Result<bool> {
        Ok(self.blocks.read().contains_key(cid))
    }
}
