// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{
    message::{BitswapMessage, WantlistEntry},
    metrics,
    network::BitswapNetwork,
    scope::Scope,
    wantlist::Wantlist,
};
use libp2p::PeerId;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug, warn};

/// Outgoing wantlist updates for one peer, coalesced while a send is in
/// flight and delivered by a dedicated task.
pub(super) struct MessageQueue {
    outbox: Arc<Mutex<Option<BitswapMessage>>>,
    work: Arc<Notify>,
    done: CancellationToken,
    /// Open connections to the peer.
    pub(super) refcnt: usize,
}

impl MessageQueue {
    pub(super) fn spawn<N: BitswapNetwork>(
        peer: PeerId,
        network: Arc<N>,
        shutdown: &CancellationToken,
        span: &Span,
    ) -> Self {
        let queue = Self {
            outbox: Default::default(),
            work: Default::default(),
            done: shutdown.child_token(),
            refcnt: 1,
        };
        tokio::spawn(
            run(
                peer,
                network,
                queue.outbox.clone(),
                queue.work.clone(),
                queue.done.clone(),
            )
            .instrument(span.clone()),
        );
        queue
    }

    pub(super) fn add_entries(&self, entries: &[WantlistEntry]) {
        {
            let mut outbox = self.outbox.lock();
            let message = outbox.get_or_insert_with(|| BitswapMessage::new(false));
            for entry in entries {
                if entry.cancel {
                    message.cancel(entry.cid);
                } else {
                    message.add_entry(entry.cid, entry.priority);
                }
            }
        }
        self.work.notify_one();
    }

    /// Replaces anything pending with the complete wantlist.
    pub(super) fn send_full(&self, wantlist: &Wantlist) {
        let mut message = BitswapMessage::new(true);
        for entry in wantlist.sorted_entries() {
            message.add_entry(entry.cid, entry.priority);
        }
        *self.outbox.lock() = Some(message);
        self.work.notify_one();
    }

    pub(super) fn stop(&self) {
        self.done.cancel();
    }
}

async fn run<N: BitswapNetwork>(
    peer: PeerId,
    network: Arc<N>,
    outbox: Arc<Mutex<Option<BitswapMessage>>>,
    work: Arc<Notify>,
    done: CancellationToken,
) {
    let scope = Scope::from(done.clone());
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = work.notified() => {}
        }
        let Some(message) = outbox.lock().take() else {
            continue;
        };
        match scope.run(network.connect_to(&scope, peer)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!("can't connect to peer {peer}: {e:#}");
                continue;
            }
            Ok(Ok(())) => {}
        }
        for entry in message.wantlist() {
            metrics::inc(if entry.cancel {
                &metrics::values::OUTBOUND_CANCEL
            } else {
                &metrics::values::OUTBOUND_WANT
            });
        }
        match scope.run(network.send_message(peer, message)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                metrics::inc(&metrics::values::OUTBOUND_FAILURE);
                debug!("failed to send wantlist to {peer}: {e:#}");
            }
            Ok(Ok(())) => {}
        }
    }
    debug!("stopped message queue for {peer}");
}
