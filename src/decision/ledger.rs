// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::wantlist::{Entry, Wantlist};
use cid::Cid;
use libp2p::PeerId;
use tokio::time::Instant;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DebtRatio {
    bytes_sent: u64,
    bytes_recv: u64,
}

impl DebtRatio {
    fn value(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_recv as f64 + 1.)
    }
}

/// What this node knows about one partner.
#[derive(Debug)]
pub struct Ledger {
    partner: PeerId,
    accounting: DebtRatio,
    blocks_received: u64,
    exchange_count: u64,
    last_exchange: Option<Instant>,
    wantlist: Wantlist,
}

/// Snapshot of a [`Ledger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReceipt {
    pub peer: PeerId,
    /// Bytes sent per byte received.
    pub value: f64,
    pub sent: u64,
    pub recv: u64,
    pub blocks_received: u64,
    pub exchanged: u64,
}

impl Ledger {
    pub fn new(partner: PeerId) -> Self {
        Self {
            partner,
            accounting: DebtRatio::default(),
            blocks_received: 0,
            exchange_count: 0,
            last_exchange: None,
            wantlist: Wantlist::new(),
        }
    }

    pub fn sent_bytes(&mut self, n: usize) {
        self.exchange_count += 1;
        self.last_exchange = Some(Instant::now());
        self.accounting.bytes_sent += n as u64;
    }

    pub fn received_block(&mut self, n: usize) {
        self.exchange_count += 1;
        self.last_exchange = Some(Instant::now());
        self.blocks_received += 1;
        self.accounting.bytes_recv += n as u64;
    }

    pub fn wants(&mut self, cid: Cid, priority: i32) {
        self.wantlist.upsert(cid, priority);
    }

    pub fn cancel_want(&mut self, cid: &Cid) -> bool {
        self.wantlist.remove(cid).is_some()
    }

    pub fn wantlist_contains(&self, cid: &Cid) -> Option<&Entry> {
        self.wantlist.contains(cid)
    }

    pub fn clear_wantlist(&mut self) {
        self.wantlist.clear()
    }

    pub fn wantlist(&self) -> &Wantlist {
        &self.wantlist
    }

    pub fn last_exchange(&self) -> Option<Instant> {
        self.last_exchange
    }

    pub fn receipt(&self) -> LedgerReceipt {
        LedgerReceipt {
            peer: self.partner,
            value: self.accounting.value(),
            sent: self.accounting.bytes_sent,
            recv: self.accounting.bytes_recv,
            blocks_received: self.blocks_received,
            exchanged: self.exchange_count,
        }
    }
}
