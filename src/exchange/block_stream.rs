// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{blocks::Block, notifications::Subscription, want_manager::WantManager};
use ahash::HashSet;
use cid::Cid;
use futures::{Stream, StreamExt as _};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Blocks requested through [`crate::Bitswap::get_blocks`].
///
/// Keys still undelivered when the stream ends or is dropped are handed back
/// to the want manager, which cancels them unless another request still
/// waits on them.
pub struct BlockStream {
    subscription: Subscription,
    pending: HashSet<Cid>,
    want_manager: WantManager,
}

impl BlockStream {
    pub(super) fn new(subscription: Subscription, want_manager: WantManager) -> Self {
        Self {
            pending: subscription.cids().iter().copied().collect(),
            subscription,
            want_manager,
        }
    }

    /// Keys not delivered yet.
    pub fn pending(&self) -> impl Iterator<Item = &Cid> + '_ {
        self.pending.iter()
    }

    fn release(&mut self) {
        // published but never polled, the want was already satisfied
        for block in self.subscription.take_buffered() {
            self.pending.remove(block.cid());
        }
        if !self.pending.is_empty() {
            self.want_manager
                .release_wants(self.pending.drain().collect());
        }
    }
}

impl Stream for BlockStream {
    type Item = Block;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Block>> {
        match self.subscription.poll_next_unpin(cx) {
            Poll::Ready(Some(block)) => {
                self.pending.remove(block.cid());
                Poll::Ready(Some(block))
            }
            Poll::Ready(None) => {
                self.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        self.release();
    }
}
