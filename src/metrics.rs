// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use parking_lot::{RwLock, RwLockWriteGuard};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::LazyLock;

static DEFAULT_REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(Default::default);

pub fn default_registry<'a>() -> RwLockWriteGuard<'a, Registry> {
    DEFAULT_REGISTRY.write()
}

pub static MESSAGE_COUNTER: LazyLock<Family<KindLabel, Counter>> = LazyLock::new(|| {
    let metric = Family::default();
    DEFAULT_REGISTRY.write().register(
        "bitswap_message_count",
        "Number of bitswap messages and entries by kind",
        metric.clone(),
    );
    metric
});

pub static CONTAINER_SIZES: LazyLock<Family<KindLabel, Gauge>> = LazyLock::new(|| {
    let metric = Family::default();
    DEFAULT_REGISTRY.write().register(
        "bitswap_container_sizes",
        "Size of each bitswap container",
        metric.clone(),
    );
    metric
});

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet, derive_more::Constructor)]
pub struct KindLabel {
    kind: &'static str,
}

pub mod values {
    use super::KindLabel;

    pub const OUTBOUND_WANT: KindLabel = KindLabel::new("outbound_want");
    pub const OUTBOUND_CANCEL: KindLabel = KindLabel::new("outbound_cancel");
    pub const OUTBOUND_BLOCK: KindLabel = KindLabel::new("outbound_block");
    pub const OUTBOUND_FAILURE: KindLabel = KindLabel::new("outbound_failure");
    pub const INBOUND_BLOCK: KindLabel = KindLabel::new("inbound_block");
    pub const INBOUND_DUPLICATE_BLOCK: KindLabel = KindLabel::new("inbound_duplicate_block");
    pub const INBOUND_INVALID_BLOCK: KindLabel = KindLabel::new("inbound_invalid_block");
    pub const PROVIDE_FAILURE: KindLabel = KindLabel::new("provide_failure");

    /// This node's own wantlist.
    pub const WANTLIST: KindLabel = KindLabel::new("wantlist");
    pub const TASK_QUEUE: KindLabel = KindLabel::new("task_queue");
    pub const LEDGERS: KindLabel = KindLabel::new("ledgers");
    pub const SUBSCRIPTIONS: KindLabel = KindLabel::new("subscriptions");
}

pub(crate) fn inc(kind: &KindLabel) {
    MESSAGE_COUNTER.get_or_create(kind).inc();
}

pub(crate) fn set_size(kind: &KindLabel, size: usize) {
    CONTAINER_SIZES
        .get_or_create(kind)
        .set(i64::try_from(size).unwrap_or(i64::MAX));
}
