//! Mediator handshake state machine.
//!
//! Uses the action pattern: frames go in, actions come out. The driver sends
//! frames, closes the transport and forwards events.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────────────────┐ ServerHello ┌─────────────────┐ ServerInfo ┌─────────────┐
//! │ AwaitingServerHello │────────────>│ SentClientHello │───────────>│ Established │
//! └─────────────────────┘             └─────────────────┘            └─────────────┘
//!            │
//!            │ version < minimum
//!            ↓
//!      ┌──────────┐
//!      │ Rejected │
//!      └──────────┘
//! ```
//!
//! Frames that belong to other components (reflected envelopes, transaction
//! acks, device list replies) are forwarded in every state.

use mdsync_crypto::{DeviceGroupKeys, seal, seal_challenge};
use mdsync_proto::{
    Frame, MessageType, Payload,
    payloads::{
        devices::DeviceInfo,
        handshake::{
            ClientHello, DeviceSlotExpirationPolicy, DeviceSlotState, DeviceSlotsExhaustedPolicy,
            ServerHello, ServerInfo,
        },
    },
};

use crate::{Environment, HandshakeConfig, error::HandshakeError};

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Transport open, waiting for the mediator greeting
    AwaitingServerHello,
    /// `ClientHello` sent, waiting for `ServerInfo`
    SentClientHello,
    /// Handshake complete
    Established,
    /// Mediator speaks an unsupported protocol version
    Rejected,
}

/// WebSocket-style close codes sent when the device ends the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal closure
    Normal,
    /// Mediator protocol version is below the supported minimum
    UnsupportedProtocolVersion,
    /// Mediator sent frames that could not be processed
    ProtocolError,
}

impl CloseCode {
    /// Numeric close code.
    pub const fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ProtocolError => 1002,
            Self::UnsupportedProtocolVersion => 4115,
        }
    }
}

/// Notifications for the driver's delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Multi-device was switched on by this handshake
    MultiDeviceEnabled {
        /// Device slots of the group
        max_device_slots: u32,
    },
    /// Handshake completed
    Established {
        /// Device slots of the group
        max_device_slots: u32,
        /// Slot state reported by the mediator
        device_slot_state: DeviceSlotState,
        /// Negotiated protocol version
        version: u32,
    },
    /// Mediator delivered every queued reflected envelope
    ReflectionQueueDry,
    /// This device became the group leader
    RolePromotedToLeader,
}

/// Actions for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send this frame to the mediator
    Send(Frame),
    /// Close the transport with this code
    Disconnect {
        /// Close code
        code: CloseCode,
    },
    /// Tell the delegate
    Notify(HandshakeEvent),
    /// Payload for another component (dispatcher, transaction coordinator)
    Forward(Payload),
}

/// Handshake state machine for one connection.
///
/// Pure: no I/O, no clock. Randomness for the challenge and device-info
/// nonces comes from the environment passed to [`Handshake::handle_frame`].
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    config: HandshakeConfig,
    device_id: u64,
    multi_device_enabled: bool,
    version: Option<u32>,
    max_device_slots: Option<u32>,
}

impl Handshake {
    /// New handshake for a freshly opened transport.
    ///
    /// `multi_device_enabled` selects the expected device slot state: an
    /// existing slot if this device was linked before, a new one otherwise.
    pub fn new(config: HandshakeConfig, device_id: u64, multi_device_enabled: bool) -> Self {
        Self {
            state: HandshakeState::AwaitingServerHello,
            config,
            device_id,
            multi_device_enabled,
            version: None,
            max_device_slots: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether multi-device is enabled locally.
    pub fn multi_device_enabled(&self) -> bool {
        self.multi_device_enabled
    }

    /// Device slots reported by the mediator, once established.
    pub fn max_device_slots(&self) -> Option<u32> {
        self.max_device_slots
    }

    /// Negotiated protocol version, once `ClientHello` was sent.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// Process one mediator frame.
    ///
    /// Frames with an unknown type are logged and dropped.
    ///
    /// # Errors
    ///
    /// - `HandshakeError::Protocol` if the body cannot be decoded
    /// - `HandshakeError::UnexpectedMessage` for handshake messages in the
    ///   wrong state and for device-to-mediator messages
    /// - `HandshakeError::Envelope` if the session has no keys
    pub fn handle_frame<E: Environment>(
        &mut self,
        env: &E,
        keys: Option<&DeviceGroupKeys>,
        frame: &Frame,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        let Some(message_type) = frame.message_type() else {
            tracing::warn!(
                type_byte = frame.header.message_type_raw(),
                "dropping mediator frame of unknown type"
            );
            return Ok(Vec::new());
        };

        let payload = Payload::decode(message_type, &frame.payload)?;
        self.handle_payload(env, keys, payload)
    }

    fn handle_payload<E: Environment>(
        &mut self,
        env: &E,
        keys: Option<&DeviceGroupKeys>,
        payload: Payload,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        match payload {
            Payload::ServerHello(hello) => self.handle_server_hello(env, keys, &hello),
            Payload::ServerInfo(info) => self.handle_server_info(&info),
            Payload::ReflectionQueueDry => {
                tracing::info!("reflection queue dry");
                Ok(vec![HandshakeAction::Notify(HandshakeEvent::ReflectionQueueDry)])
            },
            Payload::RolePromotedToLeader => {
                tracing::info!("role promoted to leader");
                Ok(vec![HandshakeAction::Notify(HandshakeEvent::RolePromotedToLeader)])
            },
            forwarded @ (Payload::Reflected(_)
            | Payload::ReflectAck(_)
            | Payload::DevicesInfo(_)
            | Payload::DropDeviceAck(_)
            | Payload::BeginTransactionAck
            | Payload::CommitTransactionAck
            | Payload::TransactionRejected(_)
            | Payload::TransactionEnded(_)) => Ok(vec![HandshakeAction::Forward(forwarded)]),
            unexpected @ (Payload::ClientHello(_)
            | Payload::GetDevicesInfo
            | Payload::DropDevice(_)
            | Payload::SetSharedDeviceData(_)
            | Payload::BeginTransaction(_)
            | Payload::CommitTransaction
            | Payload::Reflect(_)
            | Payload::ReflectedAck(_)) => Err(HandshakeError::UnexpectedMessage {
                state: self.state,
                message_type: unexpected.message_type(),
            }),
        }
    }

    fn handle_server_hello<E: Environment>(
        &mut self,
        env: &E,
        keys: Option<&DeviceGroupKeys>,
        hello: &ServerHello,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if self.state != HandshakeState::AwaitingServerHello {
            return Err(HandshakeError::UnexpectedMessage {
                state: self.state,
                message_type: MessageType::ServerHello,
            });
        }

        if hello.version < self.config.min_protocol_version {
            tracing::warn!(
                server_version = hello.version,
                min_version = self.config.min_protocol_version,
                "mediator protocol version unsupported"
            );
            self.state = HandshakeState::Rejected;
            return Ok(vec![HandshakeAction::Disconnect {
                code: CloseCode::UnsupportedProtocolVersion,
            }]);
        }

        let keys = keys.ok_or(crate::EnvelopeError::KeyUnavailable)?;
        let version = self.config.max_protocol_version.min(hello.version);

        let challenge_nonce = env.random_nonce();
        let response = seal_challenge(keys.path(), &hello.esk, &hello.challenge, &challenge_nonce);

        let device_info = DeviceInfo {
            label: self.config.device_label.clone(),
            app_version: self.config.app_version.clone(),
            platform: self.config.platform,
            platform_details: self.config.platform_details.clone(),
        }
        .encode()?;
        let encrypted_device_info = seal(keys.device_info(), &env.random_nonce(), &device_info);

        let expected_device_slot_state = if self.multi_device_enabled {
            DeviceSlotState::Existing
        } else {
            DeviceSlotState::New
        };

        let client_hello = Payload::ClientHello(ClientHello {
            version,
            response,
            device_id: self.device_id,
            device_slot_expiration_policy: DeviceSlotExpirationPolicy::Persistent,
            device_slots_exhausted_policy: DeviceSlotsExhaustedPolicy::DropLeastRecent,
            expected_device_slot_state,
            encrypted_device_info,
        });

        self.state = HandshakeState::SentClientHello;
        self.version = Some(version);
        tracing::info!(version, device_id = self.device_id, "sent client hello");

        Ok(vec![HandshakeAction::Send(client_hello.into_frame()?)])
    }

    fn handle_server_info(
        &mut self,
        info: &ServerInfo,
    ) -> Result<Vec<HandshakeAction>, HandshakeError> {
        if self.state != HandshakeState::SentClientHello {
            return Err(HandshakeError::UnexpectedMessage {
                state: self.state,
                message_type: MessageType::ServerInfo,
            });
        }

        let mut actions = Vec::with_capacity(2);
        if !self.multi_device_enabled {
            self.multi_device_enabled = true;
            actions.push(HandshakeAction::Notify(HandshakeEvent::MultiDeviceEnabled {
                max_device_slots: info.max_device_slots,
            }));
        }

        self.max_device_slots = Some(info.max_device_slots);
        self.state = HandshakeState::Established;
        tracing::info!(max_device_slots = info.max_device_slots, "mediator handshake established");

        actions.push(HandshakeAction::Notify(HandshakeEvent::Established {
            max_device_slots: info.max_device_slots,
            device_slot_state: info.device_slot_state,
            version: self.version.unwrap_or(self.config.max_protocol_version),
        }));

        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use mdsync_crypto::{
        DeviceGroupSecret, SymmetricKey, device_group_public_key, open, open_challenge_response,
    };
    use mdsync_proto::{ReflectId, payloads::reflect::ReflectAck};

    use super::*;

    const SERVER_SECRET: [u8; 32] = [0x5a; 32];

    #[derive(Clone)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        async fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0x11);
        }
    }

    fn keys() -> DeviceGroupKeys {
        DeviceGroupKeys::from_secret(&DeviceGroupSecret::new([3; 32]))
    }

    fn server_hello(version: u32) -> Frame {
        Payload::ServerHello(ServerHello {
            version,
            esk: device_group_public_key(&SymmetricKey::new(SERVER_SECRET)),
            challenge: b"prove it".to_vec(),
        })
        .into_frame()
        .unwrap()
    }

    fn server_info() -> Frame {
        Payload::ServerInfo(ServerInfo {
            current_time_ms: 1,
            max_device_slots: 4,
            device_slot_state: DeviceSlotState::New,
            encrypted_shared_device_data: Vec::new(),
        })
        .into_frame()
        .unwrap()
    }

    fn client_hello(actions: &[HandshakeAction]) -> ClientHello {
        let [HandshakeAction::Send(frame)] = actions else {
            panic!("expected a single Send, got {actions:?}");
        };
        let Payload::ClientHello(hello) = Payload::from_frame(frame).unwrap() else {
            panic!("expected ClientHello");
        };
        hello
    }

    #[test]
    fn server_hello_below_minimum_is_rejected() {
        let config = HandshakeConfig { min_protocol_version: 2, ..HandshakeConfig::default() };
        let mut handshake = Handshake::new(config, 1, false);

        let actions = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(1)).unwrap();

        assert_eq!(actions, vec![HandshakeAction::Disconnect {
            code: CloseCode::UnsupportedProtocolVersion
        }]);
        assert_eq!(handshake.state(), HandshakeState::Rejected);
        assert_eq!(handshake.version(), None);
    }

    #[test]
    fn client_hello_answers_challenge() {
        let keys = keys();
        let mut handshake = Handshake::new(HandshakeConfig::default(), 0xabcd, false);

        let actions = handshake.handle_frame(&FixedEnv, Some(&keys), &server_hello(5)).unwrap();
        let hello = client_hello(&actions);

        assert_eq!(handshake.state(), HandshakeState::SentClientHello);
        assert_eq!(hello.version, HandshakeConfig::default().max_protocol_version);
        assert_eq!(hello.device_id, 0xabcd);
        assert_eq!(hello.device_slot_expiration_policy, DeviceSlotExpirationPolicy::Persistent);
        assert_eq!(hello.device_slots_exhausted_policy, DeviceSlotsExhaustedPolicy::DropLeastRecent);
        assert_eq!(hello.expected_device_slot_state, DeviceSlotState::New);

        let dgpk = device_group_public_key(keys.path());
        let challenge = open_challenge_response(&SERVER_SECRET, &dgpk, &hello.response).unwrap();
        assert_eq!(challenge, b"prove it");

        let info = open(keys.device_info(), &hello.encrypted_device_info).unwrap();
        let info = DeviceInfo::decode(&info).unwrap();
        assert_eq!(info.label, "mdsync");
    }

    #[test]
    fn version_capped_at_server() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, true);
        let actions = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(0)).unwrap();
        let hello = client_hello(&actions);

        assert_eq!(hello.version, 0);
        assert_eq!(hello.expected_device_slot_state, DeviceSlotState::Existing);
    }

    #[test]
    fn server_info_enables_multi_device() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);
        handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(1)).unwrap();

        let actions = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_info()).unwrap();

        assert_eq!(actions, vec![
            HandshakeAction::Notify(HandshakeEvent::MultiDeviceEnabled { max_device_slots: 4 }),
            HandshakeAction::Notify(HandshakeEvent::Established {
                max_device_slots: 4,
                device_slot_state: DeviceSlotState::New,
                version: 1,
            }),
        ]);
        assert_eq!(handshake.state(), HandshakeState::Established);
        assert!(handshake.multi_device_enabled());
        assert_eq!(handshake.max_device_slots(), Some(4));
    }

    #[test]
    fn server_info_when_already_enabled() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, true);
        handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(1)).unwrap();

        let actions = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_info()).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn server_info_before_hello_is_unexpected() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);
        let err = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_info()).unwrap_err();

        assert_eq!(err, HandshakeError::UnexpectedMessage {
            state: HandshakeState::AwaitingServerHello,
            message_type: MessageType::ServerInfo,
        });
    }

    #[test]
    fn second_server_hello_is_unexpected() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);
        handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(1)).unwrap();

        let err = handshake.handle_frame(&FixedEnv, Some(&keys()), &server_hello(1)).unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedMessage { .. }));
    }

    #[test]
    fn missing_keys_fail_transiently() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);
        let err = handshake.handle_frame(&FixedEnv, None, &server_hello(1)).unwrap_err();

        assert!(err.is_transient());
        assert_eq!(handshake.state(), HandshakeState::AwaitingServerHello);
    }

    #[test]
    fn passthrough_in_any_state() {
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);
        let ack = Payload::ReflectAck(ReflectAck { reflect_id: ReflectId([9; 4]) });

        let actions =
            handshake.handle_frame(&FixedEnv, None, &ack.clone().into_frame().unwrap()).unwrap();
        assert_eq!(actions, vec![HandshakeAction::Forward(ack)]);

        let dry = Payload::ReflectionQueueDry.into_frame().unwrap();
        let actions = handshake.handle_frame(&FixedEnv, None, &dry).unwrap();
        assert_eq!(actions, vec![HandshakeAction::Notify(HandshakeEvent::ReflectionQueueDry)]);
    }

    #[test]
    fn unknown_type_is_dropped() {
        let frame = Frame::decode(&[0x55, 0, 0, 0, 1, 2]).unwrap();
        let mut handshake = Handshake::new(HandshakeConfig::default(), 1, false);

        assert!(handshake.handle_frame(&FixedEnv, None, &frame).unwrap().is_empty());
        assert_eq!(handshake.state(), HandshakeState::AwaitingServerHello);
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseCode::Normal.code(), 1000);
        assert_eq!(CloseCode::UnsupportedProtocolVersion.code(), 4115);
    }
}
