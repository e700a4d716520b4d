//! Protocol core configuration.

use std::time::Duration;

use mdsync_proto::payloads::devices::Platform;

/// Lowest mediator protocol version this device accepts.
pub const DEFAULT_MIN_PROTOCOL_VERSION: u32 = 0;

/// Highest mediator protocol version this device speaks.
pub const DEFAULT_MAX_PROTOCOL_VERSION: u32 = 1;

/// Parameters for connection establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Servers below this version are rejected
    pub min_protocol_version: u32,
    /// Version offered in `ClientHello` (capped at the server's)
    pub max_protocol_version: u32,
    /// Device label shown on the other devices
    pub device_label: String,
    /// Application version string
    pub app_version: String,
    /// Platform of this device
    pub platform: Platform,
    /// Free-form platform details
    pub platform_details: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            min_protocol_version: DEFAULT_MIN_PROTOCOL_VERSION,
            max_protocol_version: DEFAULT_MAX_PROTOCOL_VERSION,
            device_label: String::from("mdsync"),
            app_version: String::from(env!("CARGO_PKG_VERSION")),
            platform: Platform::Unspecified,
            platform_details: String::new(),
        }
    }
}

/// How long to wait for a `LockAck` or `UnlockAck`.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Lock lifetime requested from the mediator, `None` for its default.
pub const DEFAULT_TRANSACTION_TTL_SECS: Option<u32> = None;
