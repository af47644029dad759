// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fan out of arriving blocks to the callers waiting on them.

use crate::{blocks::Block, metrics, scope::Scope};
use ahash::{HashMap, HashSet};
use cid::Cid;
use futures::{
    FutureExt as _, Stream, StreamExt as _,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use parking_lot::Mutex;
use std::{
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};

type SubscriptionId = u64;

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    topics: HashMap<Cid, HashMap<SubscriptionId, flume::Sender<Block>>>,
    shut_down: bool,
}

impl Registry {
    fn unsubscribe(&mut self, id: SubscriptionId, cids: &[Cid]) {
        for cid in cids {
            if let Some(subs) = self.topics.get_mut(cid) {
                subs.remove(&id);
                if subs.is_empty() {
                    self.topics.remove(cid);
                }
            }
        }
        metrics::set_size(&metrics::values::SUBSCRIPTIONS, self.topics.len());
    }
}

/// Block publication hub. Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct PubSub {
    registry: Arc<Mutex<Registry>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `cids`. The returned [`Subscription`] yields each
    /// matching block published from now on, once, and ends when all keys
    /// were delivered, `scope` ends or the hub shuts down.
    pub fn subscribe(&self, scope: &Scope, cids: &[Cid]) -> Subscription {
        let cids: Vec<Cid> = cids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        // at most one block per key ever reaches a subscription
        let (tx, rx) = flume::bounded(cids.len().max(1));
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        if !registry.shut_down {
            for cid in &cids {
                registry
                    .topics
                    .entry(*cid)
                    .or_default()
                    .insert(id, tx.clone());
            }
        }
        metrics::set_size(&metrics::values::SUBSCRIPTIONS, registry.topics.len());
        drop(registry);
        // the registry holds the only senders left
        drop(tx);

        Subscription {
            id,
            cids,
            blocks: rx.clone().into_stream().boxed(),
            buffered: rx,
            done: scope.clone().into_done().boxed(),
            hub: Arc::downgrade(&self.registry),
            finished: false,
        }
    }

    /// Delivers `block` to every live subscription for its key. Never waits
    /// on subscribers.
    pub fn publish(&self, block: &Block) {
        let subscribers = {
            let mut registry = self.registry.lock();
            let subscribers = registry.topics.remove(block.cid());
            metrics::set_size(&metrics::values::SUBSCRIPTIONS, registry.topics.len());
            subscribers
        };
        for (_, tx) in subscribers.into_iter().flatten() {
            // capacity covers one block per key, so this only fails once the
            // subscriber is gone
            _ = tx.try_send(block.clone());
        }
    }

    /// Ends all outstanding subscriptions, later ones end immediately.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        registry.shut_down = true;
        registry.topics.clear();
        metrics::set_size(&metrics::values::SUBSCRIPTIONS, 0);
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shut_down
    }

    /// Live subscriptions waiting on `cid`.
    pub fn subscriber_count(&self, cid: &Cid) -> usize {
        self.registry
            .lock()
            .topics
            .get(cid)
            .map_or(0, |subs| subs.len())
    }

    /// Number of keys with at least one live subscription.
    pub fn len(&self) -> usize {
        self.registry.lock().topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single consumer stream of the blocks a caller subscribed to.
pub struct Subscription {
    id: SubscriptionId,
    cids: Vec<Cid>,
    blocks: BoxStream<'static, Block>,
    /// Same channel as `blocks`, for taking deliveries without polling.
    buffered: flume::Receiver<Block>,
    done: BoxFuture<'static, crate::scope::ScopeError>,
    hub: Weak<Mutex<Registry>>,
    finished: bool,
}

impl Subscription {
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    /// Removes and returns blocks published to this subscription that were
    /// not polled yet.
    pub fn take_buffered(&mut self) -> Vec<Block> {
        self.buffered.drain().collect()
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.blocks = stream::empty().boxed();
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().unsubscribe(self.id, &self.cids);
        }
    }
}

impl Stream for Subscription {
    type Item = Block;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Block>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.blocks.poll_next_unpin(cx) {
            Poll::Ready(Some(block)) => return Poll::Ready(Some(block)),
            Poll::Ready(None) => {
                self.finish();
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }
        if self.done.poll_unpin(cx).is_ready() {
            self.finish();
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.finish();
    }
}
