//! Connection handshake messages.
//!
//! ```text
//! Mediator                         Device
//!    │── ServerHello(esk, challenge) ──▶│
//!    │◀── ClientHello(response, ...) ───│
//!    │── ServerInfo(slots, ...) ───────▶│
//! ```

use serde::{Deserialize, Serialize};

/// Mediator greeting. Carries the mediator's ephemeral X25519 public key and
/// a random challenge the device must box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Highest protocol version the mediator speaks
    pub version: u32,
    /// Mediator ephemeral public key
    pub esk: [u8; 32],
    /// Random challenge
    pub challenge: Vec<u8>,
}

/// What the mediator does with this device's slot when it stays offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSlotExpirationPolicy {
    /// Slot may expire after inactivity
    Volatile,
    /// Slot never expires
    Persistent,
}

/// What the mediator does when every device slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSlotsExhaustedPolicy {
    /// Refuse the connection
    Reject,
    /// Drop the least recently used device
    DropLeastRecent,
}

/// Whether the device slot is expected to exist already.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSlotState {
    /// Slot is created by this connection
    New,
    /// Slot existed before this connection
    Existing,
}

/// Device authentication response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Negotiated protocol version
    pub version: u32,
    /// `nonce ‖ box(challenge)` under the path key / mediator key pair
    pub response: Vec<u8>,
    /// This device's mediator device id
    pub device_id: u64,
    /// Slot expiration behavior requested by the device
    pub device_slot_expiration_policy: DeviceSlotExpirationPolicy,
    /// Behavior when slots are exhausted
    pub device_slots_exhausted_policy: DeviceSlotsExhaustedPolicy,
    /// Slot state the device expects
    pub expected_device_slot_state: DeviceSlotState,
    /// Device info sealed under the device-info key
    pub encrypted_device_info: Vec<u8>,
}

/// Handshake completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Mediator clock in milliseconds since the Unix epoch
    pub current_time_ms: u64,
    /// Number of devices the group may hold
    pub max_device_slots: u32,
    /// Actual state of this device's slot
    pub device_slot_state: DeviceSlotState,
    /// Shared device data sealed under the shared-device-data key
    pub encrypted_shared_device_data: Vec<u8>,
}
