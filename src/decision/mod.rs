// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Decides which blocks to send to which peers.
//!
//! The [`Engine`] keeps a [`Ledger`] per partner and a fair
//! [`PeerRequestQueue`] of blocks owed to them. All of its state lives in a
//! single actor task fed through an ordered inbox, a pool of sender tasks
//! drains the queue.

mod ledger;
mod peer_request_queue;

pub use ledger::{Ledger, LedgerReceipt};
pub use peer_request_queue::{PeerRequestQueue, Task};

use crate::{
    blockstore::Blockstore,
    message::BitswapMessage,
    metrics,
    network::BitswapNetwork,
    utils::flume::FlumeSenderExt as _,
    wantlist::Entry,
};
use ahash::HashMap;
use cid::Cid;
use libp2p::PeerId;
use std::{collections::VecDeque, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug, trace, warn};

enum EngineOp {
    MessageReceived {
        peer: PeerId,
        message: BitswapMessage,
    },
    MessageSent {
        peer: PeerId,
        cids: Vec<Cid>,
        bytes: usize,
    },
    BlocksAvailable(Vec<Cid>),
    PeerDisconnected(PeerId),
    WantlistForPeer {
        peer: PeerId,
        response_channel: flume::Sender<Vec<Entry>>,
    },
    LedgerForPeer {
        peer: PeerId,
        response_channel: flume::Sender<Option<LedgerReceipt>>,
    },
    Peers(flume::Sender<Vec<PeerId>>),
    NextTask(flume::Sender<Task>),
}

/// Handle to the decision engine actor.
#[derive(Debug, Clone)]
pub struct Engine {
    ops: flume::Sender<EngineOp>,
}

impl Engine {
    /// Starts the engine actor, which runs until `shutdown` is cancelled.
    pub fn spawn<S: Blockstore>(
        store: Arc<S>,
        shutdown: CancellationToken,
        span: Span,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded();
        let state = EngineState {
            store,
            ledgers: HashMap::default(),
            queue: PeerRequestQueue::new(),
            waiting: VecDeque::new(),
        };
        let handle = tokio::spawn(state.run(rx, shutdown).instrument(span));
        (Self { ops: tx }, handle)
    }

    /// Spawns `count` workers sending the blocks the engine schedules.
    pub fn spawn_senders<S: Blockstore, N: BitswapNetwork>(
        &self,
        count: usize,
        store: Arc<S>,
        network: Arc<N>,
        shutdown: CancellationToken,
        span: Span,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|_| {
                tokio::spawn(
                    send_blocks(
                        self.clone(),
                        store.clone(),
                        network.clone(),
                        shutdown.clone(),
                    )
                    .instrument(span.clone()),
                )
            })
            .collect()
    }

    /// Merges a partner's wantlist deltas and accounts for the blocks it sent.
    pub fn message_received(&self, peer: PeerId, message: BitswapMessage) {
        self.ops
            .send_or_warn(EngineOp::MessageReceived { peer, message });
    }

    pub fn message_sent(&self, peer: PeerId, message: &BitswapMessage) {
        self.ops.send_or_warn(EngineOp::MessageSent {
            peer,
            cids: message.blocks().map(|b| *b.cid()).collect(),
            bytes: message.blocks_len(),
        });
    }

    /// Schedules newly stored blocks for partners wanting them.
    pub fn blocks_available(&self, cids: Vec<Cid>) {
        self.ops.send_or_warn(EngineOp::BlocksAvailable(cids));
    }

    pub fn peer_disconnected(&self, peer: PeerId) {
        self.ops.send_or_warn(EngineOp::PeerDisconnected(peer));
    }

    pub async fn wantlist_for_peer(&self, peer: PeerId) -> Vec<Entry> {
        self.query(|response_channel| EngineOp::WantlistForPeer {
            peer,
            response_channel,
        })
        .await
        .unwrap_or_default()
    }

    pub async fn ledger_for_peer(&self, peer: PeerId) -> Option<LedgerReceipt> {
        self.query(|response_channel| EngineOp::LedgerForPeer {
            peer,
            response_channel,
        })
        .await
        .flatten()
    }

    /// Partners with a ledger.
    pub async fn peers(&self) -> Vec<PeerId> {
        self.query(EngineOp::Peers).await.unwrap_or_default()
    }

    /// Waits for the next task, `None` once the engine has stopped.
    pub async fn next_task(&self) -> Option<Task> {
        self.query(EngineOp::NextTask).await
    }

    async fn query<T>(&self, op: impl FnOnce(flume::Sender<T>) -> EngineOp) -> Option<T> {
        let (tx, rx) = flume::bounded(1);
        self.ops.send(op(tx)).ok()?;
        rx.recv_async().await.ok()
    }
}

struct EngineState<S> {
    store: Arc<S>,
    ledgers: HashMap<PeerId, Ledger>,
    queue: PeerRequestQueue,
    /// Senders parked on an empty queue.
    waiting: VecDeque<flume::Sender<Task>>,
}

impl<S: Blockstore> EngineState<S> {
    async fn run(mut self, ops: flume::Receiver<EngineOp>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                op = ops.recv_async() => match op {
                    Ok(op) => self.handle(op),
                    Err(_) => break,
                },
            }
            self.dispatch();
        }
        debug!("decision engine stopped, releasing {} ledgers", self.ledgers.len());
        metrics::set_size(&metrics::values::LEDGERS, 0);
        metrics::set_size(&metrics::values::TASK_QUEUE, 0);
    }

    fn handle(&mut self, op: EngineOp) {
        match op {
            EngineOp::MessageReceived { peer, message } => self.message_received(peer, message),
            EngineOp::MessageSent { peer, cids, bytes } => {
                if let Some(ledger) = self.ledgers.get_mut(&peer) {
                    ledger.sent_bytes(bytes);
                    for cid in &cids {
                        ledger.cancel_want(cid);
                    }
                }
            }
            EngineOp::BlocksAvailable(cids) => {
                for (peer, ledger) in &self.ledgers {
                    for cid in &cids {
                        if let Some(entry) = ledger.wantlist_contains(cid) {
                            self.queue.push(*peer, *cid, entry.priority);
                        }
                    }
                }
            }
            EngineOp::PeerDisconnected(peer) => {
                self.ledgers.remove(&peer);
                self.queue.remove_peer(&peer);
                metrics::set_size(&metrics::values::LEDGERS, self.ledgers.len());
            }
            EngineOp::WantlistForPeer {
                peer,
                response_channel,
            } => {
                let entries = self
                    .ledgers
                    .get(&peer)
                    .map(|l| l.wantlist().sorted_entries())
                    .unwrap_or_default();
                response_channel.send_or_warn(entries);
            }
            EngineOp::LedgerForPeer {
                peer,
                response_channel,
            } => {
                response_channel.send_or_warn(self.ledgers.get(&peer).map(Ledger::receipt));
            }
            EngineOp::Peers(response_channel) => {
                response_channel.send_or_warn(self.ledgers.keys().copied().collect());
            }
            EngineOp::NextTask(response_channel) => self.waiting.push_back(response_channel),
        }
    }

    fn message_received(&mut self, peer: PeerId, message: BitswapMessage) {
        let ledger = self.ledgers.entry(peer).or_insert_with(|| Ledger::new(peer));
        if message.full() {
            for entry in ledger.wantlist().entries() {
                self.queue.remove(&peer, &entry.cid);
            }
            ledger.clear_wantlist();
        }
        for entry in message.wantlist() {
            if entry.cancel {
                trace!("{peer} cancel {}", entry.cid);
                ledger.cancel_want(&entry.cid);
                self.queue.remove(&peer, &entry.cid);
                continue;
            }
            trace!("{peer} wants {} - {}", entry.cid, entry.priority);
            ledger.wants(entry.cid, entry.priority);
            match self.store.has(&entry.cid) {
                Ok(true) => self.queue.push(peer, entry.cid, entry.priority),
                Ok(false) => {}
                Err(e) => warn!("failed to look up {}: {e:#}", entry.cid),
            }
        }
        for block in message.blocks() {
            ledger.received_block(block.len());
        }
        metrics::set_size(&metrics::values::LEDGERS, self.ledgers.len());
    }

    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(waiter) = self.waiting.pop_front() else {
                break;
            };
            if waiter.is_disconnected() {
                continue;
            }
            let Some(task) = self.queue.pop() else {
                self.waiting.push_front(waiter);
                break;
            };
            if let Err(flume::SendError(task)) = waiter.send(task) {
                self.queue.push(task.peer, task.cid, task.priority);
            }
        }
        metrics::set_size(&metrics::values::TASK_QUEUE, self.queue.len());
    }
}

async fn send_blocks<S: Blockstore, N: BitswapNetwork>(
    engine: Engine,
    store: Arc<S>,
    network: Arc<N>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.cancelled() => break,
            task = engine.next_task() => match task {
                Some(task) => task,
                None => break,
            },
        };
        let block = match store.get(&task.cid) {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!("block {} vanished before it could be sent", task.cid);
                continue;
            }
            Err(e) => {
                warn!("failed to load block {}: {e:#}", task.cid);
                continue;
            }
        };
        let mut message = BitswapMessage::new(false);
        message.add_block(block);
        let sent = tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = network.send_message(task.peer, message.clone()) => sent,
        };
        match sent {
            Ok(()) => {
                metrics::inc(&metrics::values::OUTBOUND_BLOCK);
                engine.message_sent(task.peer, &message);
            }
            Err(e) => {
                metrics::inc(&metrics::values::OUTBOUND_FAILURE);
                debug!("failed to send block {} to {}: {e:#}", task.cid, task.peer);
            }
        }
    }
}

#[cfg(test)]
mod tests;
