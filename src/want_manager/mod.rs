// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Tracks the blocks this node wants and keeps every connected peer informed
//! of them.

mod message_queue;

use crate::{
    message::WantlistEntry,
    metrics,
    network::BitswapNetwork,
    utils::flume::FlumeSenderExt as _,
    wantlist::{Entry, Wantlist},
};
use ahash::HashMap;
use cid::Cid;
use libp2p::PeerId;
use message_queue::MessageQueue;
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug};

/// Priority of the first key of a request, later keys rank lower.
pub const MAX_PRIORITY: i32 = i32::MAX;

enum WantOp {
    Want(Vec<Cid>),
    Cancel(Vec<Cid>),
    Release(Vec<Cid>),
    Connected(PeerId),
    Disconnected(PeerId),
    Wanted {
        cids: Vec<Cid>,
        response_channel: flume::Sender<Vec<Cid>>,
    },
    Wantlist(flume::Sender<Vec<Entry>>),
    Peers(flume::Sender<Vec<PeerId>>),
}

/// Handle to the want manager actor. Operations sent through one handle are
/// observed in the order they were issued.
#[derive(Debug, Clone)]
pub struct WantManager {
    ops: flume::Sender<WantOp>,
}

impl WantManager {
    /// Starts the actor. Every `rebroadcast_interval` the full wantlist is
    /// resent to all peers in case earlier deltas were lost.
    pub fn spawn<N: BitswapNetwork>(
        network: Arc<N>,
        rebroadcast_interval: Duration,
        shutdown: CancellationToken,
        span: Span,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded();
        let state = WantManagerState {
            network,
            wantlist: Wantlist::new(),
            refs: HashMap::default(),
            peers: HashMap::default(),
            shutdown: shutdown.clone(),
            span: span.clone(),
        };
        let handle = tokio::spawn(state.run(rx, rebroadcast_interval).instrument(span));
        (Self { ops: tx }, handle)
    }

    /// Adds `cids` to the wantlist, broadcasting the ones not already wanted.
    /// Each call holds a reference on every key until the block arrives or
    /// [`WantManager::release_wants`] gives it back.
    pub fn want_blocks(&self, cids: &[Cid]) {
        self.ops.send_or_warn(WantOp::Want(cids.to_vec()));
    }

    /// Removes `cids` regardless of outstanding references and broadcasts
    /// CANCEL for those that were wanted.
    pub fn cancel_wants(&self, cids: &[Cid]) {
        self.ops.send_or_warn(WantOp::Cancel(cids.to_vec()));
    }

    /// Drops one reference on each of `cids`, cancelling keys nobody wants
    /// anymore. Silently ignored once the actor has stopped.
    pub fn release_wants(&self, cids: Vec<Cid>) {
        _ = self.ops.send(WantOp::Release(cids));
    }

    pub fn connected(&self, peer: PeerId) {
        self.ops.send_or_warn(WantOp::Connected(peer));
    }

    pub fn disconnected(&self, peer: PeerId) {
        self.ops.send_or_warn(WantOp::Disconnected(peer));
    }

    /// The subset of `cids` currently wanted.
    pub async fn wanted(&self, cids: Vec<Cid>) -> Vec<Cid> {
        self.query(|response_channel| WantOp::Wanted {
            cids,
            response_channel,
        })
        .await
        .unwrap_or_default()
    }

    /// The wantlist by descending priority.
    pub async fn wantlist(&self) -> Vec<Entry> {
        self.query(WantOp::Wantlist).await.unwrap_or_default()
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.query(WantOp::Peers).await.unwrap_or_default()
    }

    async fn query<T>(&self, op: impl FnOnce(flume::Sender<T>) -> WantOp) -> Option<T> {
        let (tx, rx) = flume::bounded(1);
        self.ops.send(op(tx)).ok()?;
        rx.recv_async().await.ok()
    }
}

struct WantManagerState<N> {
    network: Arc<N>,
    wantlist: Wantlist,
    /// Outstanding requests per wanted key.
    refs: HashMap<Cid, usize>,
    peers: HashMap<PeerId, MessageQueue>,
    shutdown: CancellationToken,
    span: Span,
}

impl<N: BitswapNetwork> WantManagerState<N> {
    async fn run(mut self, ops: flume::Receiver<WantOp>, rebroadcast_interval: Duration) {
        let mut rebroadcast =
            tokio::time::interval_at(Instant::now() + rebroadcast_interval, rebroadcast_interval);
        rebroadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                op = ops.recv_async() => match op {
                    Ok(op) => self.handle(op),
                    Err(_) => break,
                },
                _ = rebroadcast.tick() => self.rebroadcast(),
            }
        }
        for queue in self.peers.values() {
            queue.stop();
        }
        metrics::set_size(&metrics::values::WANTLIST, 0);
        debug!("want manager stopped");
    }

    fn handle(&mut self, op: WantOp) {
        match op {
            WantOp::Want(cids) => {
                let mut entries = vec![];
                for (i, cid) in cids.into_iter().enumerate() {
                    *self.refs.entry(cid).or_default() += 1;
                    let priority =
                        MAX_PRIORITY.saturating_sub(i32::try_from(i).unwrap_or(i32::MAX));
                    if self.wantlist.add(cid, priority) {
                        entries.push(WantlistEntry {
                            cid,
                            priority,
                            cancel: false,
                        });
                    }
                }
                self.broadcast(&entries);
            }
            WantOp::Cancel(cids) => {
                let mut entries = vec![];
                for cid in cids {
                    self.refs.remove(&cid);
                    if self.wantlist.remove(&cid).is_some() {
                        entries.push(cancel_entry(cid));
                    }
                }
                self.broadcast(&entries);
            }
            WantOp::Release(cids) => {
                let mut entries = vec![];
                for cid in cids {
                    let Some(refs) = self.refs.get_mut(&cid) else {
                        continue;
                    };
                    *refs -= 1;
                    if *refs == 0 {
                        self.refs.remove(&cid);
                        if self.wantlist.remove(&cid).is_some() {
                            entries.push(cancel_entry(cid));
                        }
                    }
                }
                self.broadcast(&entries);
            }
            WantOp::Connected(peer) => {
                if let Some(queue) = self.peers.get_mut(&peer) {
                    queue.refcnt += 1;
                    return;
                }
                debug!("peer {peer} connected");
                let queue =
                    MessageQueue::spawn(peer, self.network.clone(), &self.shutdown, &self.span);
                // the peer missed every earlier delta
                if !self.wantlist.is_empty() {
                    queue.send_full(&self.wantlist);
                }
                self.peers.insert(peer, queue);
            }
            WantOp::Disconnected(peer) => {
                let Some(queue) = self.peers.get_mut(&peer) else {
                    return;
                };
                queue.refcnt -= 1;
                if queue.refcnt == 0 {
                    queue.stop();
                    self.peers.remove(&peer);
                    debug!("peer {peer} disconnected");
                }
            }
            WantOp::Wanted {
                cids,
                response_channel,
            } => {
                let wanted = cids
                    .into_iter()
                    .filter(|cid| self.wantlist.contains(cid).is_some())
                    .collect();
                response_channel.send_or_warn(wanted);
            }
            WantOp::Wantlist(response_channel) => {
                response_channel.send_or_warn(self.wantlist.sorted_entries());
            }
            WantOp::Peers(response_channel) => {
                response_channel.send_or_warn(self.peers.keys().copied().collect());
            }
        }
    }

    fn broadcast(&self, entries: &[WantlistEntry]) {
        metrics::set_size(&metrics::values::WANTLIST, self.wantlist.len());
        if entries.is_empty() {
            return;
        }
        for queue in self.peers.values() {
            queue.add_entries(entries);
        }
    }

    fn rebroadcast(&self) {
        if self.wantlist.is_empty() {
            return;
        }
        debug!(
            "rebroadcasting {} wants to {} peers",
            self.wantlist.len(),
            self.peers.len()
        );
        for queue in self.peers.values() {
            queue.send_full(&self.wantlist);
        }
    }
}

fn cancel_entry(cid: Cid) -> WantlistEntry {
    WantlistEntry {
        cid,
        priority: 0,
        cancel: true,
    }
}

#[cfg(test)]
mod tests;
