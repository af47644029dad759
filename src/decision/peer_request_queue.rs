// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::HashMap;
use cid::Cid;
use libp2p::PeerId;
use std::{cmp::Reverse, collections::BTreeMap};

/// A block to send to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub peer: PeerId,
    pub cid: Cid,
    pub priority: i32,
}

type TaskKey = (Reverse<i32>, u64);

#[derive(Debug, Default)]
struct PeerTasks {
    queue: BTreeMap<TaskKey, Cid>,
    index: HashMap<Cid, TaskKey>,
    joined: u64,
    last_served: u64,
    served_round: Option<u64>,
}

impl PeerTasks {
    fn head_priority(&self) -> Option<i32> {
        self.queue.first_key_value().map(|((Reverse(p), _), _)| *p)
    }
}

/// Tasks of all peers.
///
/// A peer's own tasks pop by descending priority, first in first out among
/// equals. Across peers, pops happen in rounds in which every peer with
/// pending tasks is served at most once: the peer with the best head task
/// goes first, ties going to whoever was served longest ago. A peer with
/// pending tasks therefore waits at most one pop per other peer for the rest
/// of the current round and one more for each in the next, `2 * (peers - 1)`
/// pops in all.
#[derive(Debug, Default)]
pub struct PeerRequestQueue {
    peers: HashMap<PeerId, PeerTasks>,
    seq: u64,
    round: u64,
    pops: u64,
    len: usize,
}

impl PeerRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `cid` for `peer`. Re-queuing an existing task updates its
    /// priority but keeps its place among equals.
    pub fn push(&mut self, peer: PeerId, cid: Cid, priority: i32) {
        self.seq += 1;
        let seq = self.seq;
        let tasks = self.peers.entry(peer).or_insert_with(|| PeerTasks {
            joined: seq,
            ..Default::default()
        });
        match tasks.index.get(&cid).copied() {
            Some((Reverse(p), _)) if p == priority => {}
            Some(old) => {
                tasks.queue.remove(&old);
                let key = (Reverse(priority), old.1);
                tasks.queue.insert(key, cid);
                tasks.index.insert(cid, key);
            }
            None => {
                let key = (Reverse(priority), seq);
                tasks.queue.insert(key, cid);
                tasks.index.insert(cid, key);
                self.len += 1;
            }
        }
    }

    pub fn pop(&mut self) -> Option<Task> {
        if self.len == 0 {
            return None;
        }
        let peer = match self.next_peer(self.round) {
            Some(peer) => peer,
            None => {
                self.round += 1;
                self.next_peer(self.round)?
            }
        };
        let tasks = self.peers.get_mut(&peer)?;
        let (key, cid) = tasks.queue.pop_first()?;
        tasks.index.remove(&cid);
        self.pops += 1;
        tasks.last_served = self.pops;
        tasks.served_round = Some(self.round);
        self.len -= 1;
        Some(Task {
            peer,
            cid,
            priority: key.0.0,
        })
    }

    fn next_peer(&self, round: u64) -> Option<PeerId> {
        self.peers
            .iter()
            .filter(|(_, t)| t.served_round != Some(round))
            .filter_map(|(peer, t)| {
                t.head_priority()
                    .map(|p| ((p, Reverse(t.last_served), Reverse(t.joined)), *peer))
            })
            .max_by_key(|(key, _)| *key)
            .map(|(_, peer)| peer)
    }

    pub fn remove(&mut self, peer: &PeerId, cid: &Cid) -> bool {
        let Some(tasks) = self.peers.get_mut(peer) else {
            return false;
        };
        match tasks.index.remove(cid) {
            Some(key) => {
                tasks.queue.remove(&key);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Discards every task of `peer`.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if let Some(tasks) = self.peers.remove(peer) {
            self.len -= tasks.queue.len();
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
