//! Device list management.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::handshake::DeviceSlotExpirationPolicy;
use crate::{errors::Result, from_cbor, to_cbor};

/// Platform a device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Not reported
    Unspecified,
    /// Android
    Android,
    /// iOS
    Ios,
    /// Desktop application
    Desktop,
    /// Web client
    Web,
}

/// Per-device metadata, sealed under the device-info key before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// User-visible label
    pub label: String,
    /// Application version string
    pub app_version: String,
    /// Platform
    pub platform: Platform,
    /// Free-form platform details (OS version, model)
    pub platform_details: String,
}

impl DeviceInfo {
    /// CBOR encoding, sealed before it leaves the device.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    /// Parse an opened device info plaintext.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are malformed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

/// When the device was last seen by the mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceActivity {
    /// Currently connected since this time (ms)
    ConnectedSince(u64),
    /// Disconnected at this time (ms)
    LastDisconnectAt(u64),
}

/// Device info as stored by the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedDeviceInfo {
    /// Sealed [`DeviceInfo`]
    pub encrypted_device_info: Vec<u8>,
    /// Connection activity
    pub activity: DeviceActivity,
    /// Slot expiration policy the device registered with
    pub device_slot_expiration_policy: DeviceSlotExpirationPolicy,
}

/// Device list, keyed by device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesInfo {
    /// All devices of the group
    pub augmented_device_info: BTreeMap<u64, AugmentedDeviceInfo>,
}

/// Remove a device from the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropDevice {
    /// Device to drop
    pub device_id: u64,
}

/// Confirms a [`DropDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropDeviceAck {
    /// Dropped device
    pub device_id: u64,
}

/// Replace the data shared by all devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSharedDeviceData {
    /// Shared data sealed under the shared-device-data key
    pub encrypted_shared_device_data: Vec<u8>,
}
