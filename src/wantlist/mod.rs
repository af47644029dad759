// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::HashMap;
use cid::Cid;
use itertools::Itertools as _;
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    pub cid: Cid,
    /// Higher is served first.
    pub priority: i32,
}

/// A set of wanted [`Cid`]s, at most one [`Entry`] per key.
///
/// Not synchronized, owners serialize access themselves.
#[derive(Debug, Clone, Default)]
pub struct Wantlist {
    set: HashMap<Cid, Entry>,
}

impl Wantlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `cid` unless it is already present, in which case the existing
    /// priority is kept. Returns `true` if inserted.
    pub fn add(&mut self, cid: Cid, priority: i32) -> bool {
        if self.set.contains_key(&cid) {
            return false;
        }
        self.set.insert(cid, Entry { cid, priority });
        true
    }

    /// Inserts `cid` or overwrites its priority.
    pub fn upsert(&mut self, cid: Cid, priority: i32) {
        self.set.insert(cid, Entry { cid, priority });
    }

    pub fn remove(&mut self, cid: &Cid) -> Option<Entry> {
        self.set.remove(cid)
    }

    pub fn contains(&self, cid: &Cid) -> Option<&Entry> {
        self.set.get(cid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.set.values()
    }

    /// Entries by descending priority.
    pub fn sorted_entries(&self) -> Vec<Entry> {
        self.set
            .values()
            .copied()
            .sorted_by_key(|e| Reverse(e.priority))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn clear(&mut self) {
        self.set.clear()
    }
}
