//! Mediator message type tags.

/// Type byte of the common header.
///
/// Values are fixed by the mediator protocol. `Proxy` wraps chat-protocol
/// frames and is never parsed as a mediator control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Chat-protocol frame tunnelled through the mediator
    Proxy = 0x00,
    /// Mediator greeting with ephemeral key and challenge
    ServerHello = 0x10,
    /// Device authentication response
    ClientHello = 0x11,
    /// Handshake completion with device slot information
    ServerInfo = 0x12,
    /// All queued reflected messages have been delivered
    ReflectionQueueDry = 0x20,
    /// This device became the leader of the device group
    RolePromotedToLeader = 0x21,
    /// Request the list of devices
    GetDeviceInfo = 0x30,
    /// List of devices
    DeviceInfo = 0x31,
    /// Remove a device from the group
    DropDevice = 0x32,
    /// Device removal confirmation
    DropDeviceAck = 0x33,
    /// Replace data shared by all devices
    SetSharedDeviceData = 0x34,
    /// Begin transaction
    Lock = 0x40,
    /// Transaction begun
    LockAck = 0x41,
    /// Commit transaction
    Unlock = 0x42,
    /// Transaction committed
    UnlockAck = 0x43,
    /// Transaction rejected because another scope is held
    Rejected = 0x44,
    /// A held transaction scope was released
    Ended = 0x45,
    /// Envelope sent to the other devices
    Reflect = 0x80,
    /// Mediator stored a reflected envelope
    ReflectAck = 0x81,
    /// Envelope received from another device
    Reflected = 0x82,
    /// Device processed a reflected envelope
    ReflectedAck = 0x83,
}

impl MessageType {
    /// Parse a type byte. `None` for unknown values.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Proxy),
            0x10 => Some(Self::ServerHello),
            0x11 => Some(Self::ClientHello),
            0x12 => Some(Self::ServerInfo),
            0x20 => Some(Self::ReflectionQueueDry),
            0x21 => Some(Self::RolePromotedToLeader),
            0x30 => Some(Self::GetDeviceInfo),
            0x31 => Some(Self::DeviceInfo),
            0x32 => Some(Self::DropDevice),
            0x33 => Some(Self::DropDeviceAck),
            0x34 => Some(Self::SetSharedDeviceData),
            0x40 => Some(Self::Lock),
            0x41 => Some(Self::LockAck),
            0x42 => Some(Self::Unlock),
            0x43 => Some(Self::UnlockAck),
            0x44 => Some(Self::Rejected),
            0x45 => Some(Self::Ended),
            0x80 => Some(Self::Reflect),
            0x81 => Some(Self::ReflectAck),
            0x82 => Some(Self::Reflected),
            0x83 => Some(Self::ReflectedAck),
            _ => None,
        }
    }

    /// Type byte.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Reflect-family messages use a binary body instead of CBOR.
    pub const fn is_reflect_family(self) -> bool {
        matches!(self, Self::Reflect | Self::ReflectAck | Self::Reflected | Self::ReflectedAck)
    }

    /// Messages belonging to the transaction protocol.
    pub const fn is_transaction(self) -> bool {
        matches!(
            self,
            Self::Lock
                | Self::LockAck
                | Self::Unlock
                | Self::UnlockAck
                | Self::Rejected
                | Self::Ended
        )
    }
}
