// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use ahash::HashMap;
use cid::Cid;
use libp2p::PeerId;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Provider records, `cid -> peer -> last seen`, expiring after a retention
/// window.
#[derive(Debug)]
pub struct ProviderStore {
    providers: RwLock<HashMap<Cid, HashMap<PeerId, Instant>>>,
    retention: Duration,
}

impl ProviderStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            providers: Default::default(),
            retention,
        }
    }

    /// Records or refreshes `peer` as a provider of `cid`.
    pub fn add_provider(&self, cid: Cid, peer: PeerId) {
        self.providers
            .write()
            .entry(cid)
            .or_default()
            .insert(peer, Instant::now());
    }

    /// Providers of `cid`, most recently seen first.
    pub fn get_providers(&self, cid: &Cid) -> Vec<PeerId> {
        let providers = self.providers.read();
        let Some(peers) = providers.get(cid) else {
            return vec![];
        };
        let mut peers: Vec<_> = peers.iter().map(|(p, seen)| (*p, *seen)).collect();
        peers.sort_by(|a, b| b.1.cmp(&a.1));
        peers.into_iter().map(|(p, _)| p).collect()
    }

    /// Drops records older than the retention window, returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut providers = self.providers.write();
        providers.retain(|_, peers| {
            let before = peers.len();
            peers.retain(|_, seen| now.duration_since(*seen) < self.retention);
            removed += before - peers.len();
            !peers.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Sweeps every `interval` until `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!("pruned {removed} stale provider records");
                        }
                    }
                }
            }
        })
    }
}
