//! Typed mediator message bodies.
//!
//! Control messages (handshake, device list, transactions) are CBOR. Reflect-
//! family messages use the fixed binary layouts in [`reflect`]. Messages with
//! no body (`ReflectionQueueDry`, `LockAck`, ...) encode to zero bytes.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one [`MessageType`] (enforced by match
//! exhaustiveness). `Proxy` never decodes to a payload.

pub mod devices;
pub mod handshake;
pub mod reflect;
pub mod transaction;

use bytes::{BufMut, Bytes};

pub use self::reflect::ReflectId;
use crate::{
    Frame, MessageType,
    errors::{ProtocolError, Result},
    from_cbor,
};

/// All mediator message bodies.
///
/// The message type lives in the common header, so the body carries no
/// variant tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Handshake
    /// Mediator greeting
    ServerHello(handshake::ServerHello),
    /// Device authentication
    ClientHello(handshake::ClientHello),
    /// Handshake completion
    ServerInfo(handshake::ServerInfo),

    // Queue and role
    /// Reflection queue fully delivered
    ReflectionQueueDry,
    /// Device is now the group leader
    RolePromotedToLeader,

    // Devices
    /// Request device list
    GetDevicesInfo,
    /// Device list
    DevicesInfo(devices::DevicesInfo),
    /// Remove a device
    DropDevice(devices::DropDevice),
    /// Device removed
    DropDeviceAck(devices::DropDeviceAck),
    /// Replace shared device data
    SetSharedDeviceData(devices::SetSharedDeviceData),

    // Transactions
    /// Lock
    BeginTransaction(transaction::BeginTransaction),
    /// Lock granted
    BeginTransactionAck,
    /// Unlock
    CommitTransaction,
    /// Unlock confirmed
    CommitTransactionAck,
    /// Lock refused
    TransactionRejected(transaction::TransactionRejected),
    /// Lock released elsewhere
    TransactionEnded(transaction::TransactionEnded),

    // Reflection
    /// Outgoing envelope
    Reflect(reflect::Reflect),
    /// Outgoing envelope stored
    ReflectAck(reflect::ReflectAck),
    /// Incoming envelope
    Reflected(reflect::Reflected),
    /// Incoming envelope processed
    ReflectedAck(reflect::ReflectedAck),
}

impl Payload {
    /// Message type corresponding to this payload.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::ServerHello(_) => MessageType::ServerHello,
            Self::ClientHello(_) => MessageType::ClientHello,
            Self::ServerInfo(_) => MessageType::ServerInfo,
            Self::ReflectionQueueDry => MessageType::ReflectionQueueDry,
            Self::RolePromotedToLeader => MessageType::RolePromotedToLeader,
            Self::GetDevicesInfo => MessageType::GetDeviceInfo,
            Self::DevicesInfo(_) => MessageType::DeviceInfo,
            Self::DropDevice(_) => MessageType::DropDevice,
            Self::DropDeviceAck(_) => MessageType::DropDeviceAck,
            Self::SetSharedDeviceData(_) => MessageType::SetSharedDeviceData,
            Self::BeginTransaction(_) => MessageType::Lock,
            Self::BeginTransactionAck => MessageType::LockAck,
            Self::CommitTransaction => MessageType::Unlock,
            Self::CommitTransactionAck => MessageType::UnlockAck,
            Self::TransactionRejected(_) => MessageType::Rejected,
            Self::TransactionEnded(_) => MessageType::Ended,
            Self::Reflect(_) => MessageType::Reflect,
            Self::ReflectAck(_) => MessageType::ReflectAck,
            Self::Reflected(_) => MessageType::Reflected,
            Self::ReflectedAck(_) => MessageType::ReflectedAck,
        }
    }

    /// Encode the body (without common header).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::ServerHello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ClientHello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ServerInfo(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DevicesInfo(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DropDevice(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::DropDeviceAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SetSharedDeviceData(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::BeginTransaction(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::TransactionRejected(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::TransactionEnded(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ReflectionQueueDry
            | Self::RolePromotedToLeader
            | Self::GetDevicesInfo
            | Self::BeginTransactionAck
            | Self::CommitTransaction
            | Self::CommitTransactionAck => Ok(()),
            Self::Reflect(inner) => {
                inner.encode(writer.get_mut());
                Ok(())
            },
            Self::ReflectAck(inner) => {
                inner.encode(writer.get_mut());
                Ok(())
            },
            Self::Reflected(inner) => {
                inner.encode(writer.get_mut());
                Ok(())
            },
            Self::ReflectedAck(inner) => {
                inner.encode(writer.get_mut());
                Ok(())
            },
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a body for the given message type.
    ///
    /// Bodies of empty-body messages are not inspected.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::NotMediatorFrame` for `Proxy`
    /// - `ProtocolError::CborDecode` if a CBOR body is malformed
    /// - reflect-family layout errors (`FrameTooShort`,
    ///   `InvalidPayloadHeader`, `HeaderLengthMismatch`)
    pub fn decode(message_type: MessageType, payload: &Bytes) -> Result<Self> {
        if payload.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: Frame::MAX_PAYLOAD_SIZE,
            });
        }

        let decoded = match message_type {
            MessageType::Proxy => return Err(ProtocolError::NotMediatorFrame),
            MessageType::ServerHello => Self::ServerHello(from_cbor(payload)?),
            MessageType::ClientHello => Self::ClientHello(from_cbor(payload)?),
            MessageType::ServerInfo => Self::ServerInfo(from_cbor(payload)?),
            MessageType::ReflectionQueueDry => Self::ReflectionQueueDry,
            MessageType::RolePromotedToLeader => Self::RolePromotedToLeader,
            MessageType::GetDeviceInfo => Self::GetDevicesInfo,
            MessageType::DeviceInfo => Self::DevicesInfo(from_cbor(payload)?),
            MessageType::DropDevice => Self::DropDevice(from_cbor(payload)?),
            MessageType::DropDeviceAck => Self::DropDeviceAck(from_cbor(payload)?),
            MessageType::SetSharedDeviceData => Self::SetSharedDeviceData(from_cbor(payload)?),
            MessageType::Lock => Self::BeginTransaction(from_cbor(payload)?),
            MessageType::LockAck => Self::BeginTransactionAck,
            MessageType::Unlock => Self::CommitTransaction,
            MessageType::UnlockAck => Self::CommitTransactionAck,
            MessageType::Rejected => Self::TransactionRejected(from_cbor(payload)?),
            MessageType::Ended => Self::TransactionEnded(from_cbor(payload)?),
            MessageType::Reflect => Self::Reflect(reflect::Reflect::decode(payload)?),
            MessageType::ReflectAck => Self::ReflectAck(reflect::ReflectAck::decode(payload)?),
            MessageType::Reflected => Self::Reflected(reflect::Reflected::decode(payload)?),
            MessageType::ReflectedAck => {
                Self::ReflectedAck(reflect::ReflectedAck::decode(payload)?)
            },
        };

        Ok(decoded)
    }

    /// Encode into a complete frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(self.message_type(), buf))
    }

    /// Decode the body of a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownMessageType` if the type byte is unknown
    /// - anything [`Payload::decode`] returns
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let message_type = frame
            .message_type()
            .ok_or(ProtocolError::UnknownMessageType(frame.header.message_type_raw()))?;
        Self::decode(message_type, &frame.payload)
    }
}
