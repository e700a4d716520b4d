//! Runtime configuration.

use std::{collections::HashSet, time::Duration};

use mdsync_core::{
    HandshakeConfig,
    config::{DEFAULT_TRANSACTION_TIMEOUT, DEFAULT_TRANSACTION_TTL_SECS},
};
use mdsync_proto::ContentKind;

/// How long to wait for a `ReflectAck`.
pub const DEFAULT_REFLECT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Reflected envelopes in a row that may fail to open before the link closes.
pub const DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 3;

/// Capacity of the command and outbound frame channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Interval of the timeout check.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Deltas per sync transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Time budget per chunk. A sync of `n` chunks fails after `n` times this.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(300);

/// Mediator link configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Handshake parameters
    pub handshake: HandshakeConfig,
    /// Wait for `LockAck` / `UnlockAck`
    pub transaction_timeout: Duration,
    /// Lock lifetime requested from the mediator
    pub transaction_ttl_secs: Option<u32>,
    /// Wait for `ReflectAck`
    pub reflect_ack_timeout: Duration,
    /// Decode failures in a row before the link closes
    pub max_consecutive_decode_failures: u32,
    /// Channel capacity
    pub channel_capacity: usize,
    /// Timeout check interval
    pub tick_interval: Duration,
    /// Which reflected content is applied
    pub dispatch: DispatchConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            transaction_ttl_secs: DEFAULT_TRANSACTION_TTL_SECS,
            reflect_ack_timeout: DEFAULT_REFLECT_ACK_TIMEOUT,
            max_consecutive_decode_failures: DEFAULT_MAX_CONSECUTIVE_DECODE_FAILURES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Content kinds the dispatcher acknowledges without applying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Disabled kinds
    pub disabled: HashSet<ContentKind>,
}

impl DispatchConfig {
    /// Every kind enabled.
    pub fn all_enabled() -> Self {
        Self { disabled: HashSet::new() }
    }

    /// Whether `kind` is applied.
    pub fn is_enabled(&self, kind: ContentKind) -> bool {
        !self.disabled.contains(&kind)
    }
}

impl Default for DispatchConfig {
    /// Distribution lists and MDM parameters have no local store yet.
    fn default() -> Self {
        Self {
            disabled: HashSet::from([
                ContentKind::DistributionListSync,
                ContentKind::MdmParameterSync,
            ]),
        }
    }
}

/// Delta sync batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaSyncConfig {
    /// Deltas per transaction
    pub chunk_size: usize,
    /// Budget per chunk
    pub chunk_timeout: Duration,
}

impl Default for DeltaSyncConfig {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, chunk_timeout: DEFAULT_CHUNK_TIMEOUT }
    }
}
