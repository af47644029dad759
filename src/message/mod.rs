// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::blocks::Block;
use cid::Cid;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WantlistEntry {
    pub cid: Cid,
    pub priority: i32,
    pub cancel: bool,
}

/// The logical shape of a bitswap message: wantlist deltas plus full blocks.
/// Byte level encoding belongs to the network implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitswapMessage {
    wantlist: IndexMap<Cid, WantlistEntry>,
    blocks: IndexMap<Cid, Block>,
    /// The wantlist replaces whatever the receiver knew about the sender's wants.
    full: bool,
}

impl BitswapMessage {
    pub fn new(full: bool) -> Self {
        Self {
            full,
            ..Default::default()
        }
    }

    pub fn full(&self) -> bool {
        self.full
    }

    pub fn set_full(&mut self, full: bool) {
        self.full = full;
    }

    /// Adds or overwrites the wantlist delta for `cid`.
    pub fn add_entry(&mut self, cid: Cid, priority: i32) {
        self.wantlist.insert(
            cid,
            WantlistEntry {
                cid,
                priority,
                cancel: false,
            },
        );
    }

    pub fn cancel(&mut self, cid: Cid) {
        self.wantlist.insert(
            cid,
            WantlistEntry {
                cid,
                priority: 0,
                cancel: true,
            },
        );
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(*block.cid(), block);
    }

    pub fn wantlist(&self) -> impl Iterator<Item = &WantlistEntry> + '_ {
        self.wantlist.values()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.values()
    }

    pub fn into_blocks(self) -> impl Iterator<Item = Block> {
        self.blocks.into_values()
    }

    /// Total payload size of the carried blocks.
    pub fn blocks_len(&self) -> usize {
        self.blocks.values().map(Block::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.wantlist.is_empty() && self.blocks.is_empty()
    }
}
