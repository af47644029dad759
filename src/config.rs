// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use std::time::Duration;

/// Tunables of a [`crate::Bitswap`] exchange.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, smart_default::SmartDefault)]
#[serde(default)]
pub struct BitswapConfig {
    /// Providers requested from routing per wanted key.
    #[default(3)]
    pub max_providers_per_request: usize,
    #[default(Duration::from_secs(10))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub provider_request_timeout: Duration,
    /// Bound on processing one received block.
    #[default(Duration::from_secs(15))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub has_block_timeout: Duration,
    #[default(Duration::from_secs(15))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub provide_timeout: Duration,
    /// Workers sending blocks out of the decision engine's task queue.
    #[default(8)]
    pub task_workers: usize,
    #[default(4)]
    pub discovery_workers: usize,
    #[default(16)]
    pub provide_workers: usize,
    /// Capacity of the provider discovery queue.
    #[default(32)]
    pub find_request_buffer: usize,
    /// Capacity of the reprovide queue.
    #[default(2048)]
    pub provide_buffer: usize,
    #[default(Duration::from_secs(10))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rebroadcast_interval: Duration,
    #[default(Duration::from_secs(24 * 60 * 60))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub provider_retention: Duration,
    #[default(Duration::from_secs(60 * 60))]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub provider_sweep_interval: Duration,
    /// Blockstore write attempts before giving up on a block.
    #[default(4)]
    pub put_attempts: usize,
    /// First retry delay, doubled for every further attempt.
    #[default(Duration::from_millis(400))]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub put_backoff: Duration,
    /// Re-hash received blocks and drop the ones not matching their CID.
    #[default(true)]
    pub verify_blocks: bool,
}

impl BitswapConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }
}
