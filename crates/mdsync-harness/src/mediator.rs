//! Mediator state machine.
//!
//! Authenticates devices, queues reflected envelopes per device, arbitrates
//! the transaction lock and tracks the group leader. Pure like the device
//! side: connection events go in, [`MediatorAction`]s come out, and
//! [`SimMediator`](crate::SimMediator) does the I/O.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::Duration,
};

use bytes::Bytes;
use mdsync_core::{CloseCode, Environment};
use mdsync_crypto::{SymmetricKey, device_group_public_key, open_challenge_response};
use mdsync_proto::{
    InboundFrame, Payload, ReflectId, extract_chat_message,
    payloads::{
        devices::{
            AugmentedDeviceInfo, DeviceActivity, DevicesInfo, DropDevice, DropDeviceAck,
            SetSharedDeviceData,
        },
        handshake::{
            ClientHello, DeviceSlotExpirationPolicy, DeviceSlotState, DeviceSlotsExhaustedPolicy,
            ServerHello, ServerInfo,
        },
        reflect::{Reflect, ReflectAck, Reflected, ReflectedAck},
        transaction::{BeginTransaction, TransactionEnded, TransactionRejected},
    },
};

/// Mediator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediatorConfig {
    /// Protocol version announced in `ServerHello`
    pub protocol_version: u32,
    /// Device slots of the group
    pub max_device_slots: u32,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self { protocol_version: 1, max_device_slots: 4 }
    }
}

/// Effects for the I/O layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediatorAction {
    /// Write encoded frame bytes to a connection
    Send {
        /// Target connection
        connection: u64,
        /// Encoded frame
        bytes: Bytes,
    },
    /// Close a connection
    Close {
        /// Target connection
        connection: u64,
        /// Close code
        code: CloseCode,
    },
}

#[derive(Debug)]
enum Phase {
    AwaitingClientHello { ephemeral_secret: [u8; 32], challenge: Vec<u8> },
    Established { device_id: u64 },
}

#[derive(Debug)]
struct DeviceSlot {
    encrypted_device_info: Vec<u8>,
    expiration_policy: DeviceSlotExpirationPolicy,
    activity: DeviceActivity,
    connection: Option<u64>,
    queue: VecDeque<Reflected>,
    last_active: u64,
}

#[derive(Debug)]
struct Lock<I> {
    device_id: u64,
    encrypted_scope: Vec<u8>,
    acquired_at: I,
    ttl: Option<Duration>,
}

/// Mediator of one device group.
#[derive(Debug)]
pub struct MediatorState<E: Environment> {
    env: E,
    config: MediatorConfig,
    group_public_key: [u8; 32],
    connections: HashMap<u64, Phase>,
    devices: BTreeMap<u64, DeviceSlot>,
    lock: Option<Lock<E::Instant>>,
    leader: Option<u64>,
    shared_device_data: Vec<u8>,
    chat: Vec<(u64, Bytes)>,
    next_connection: u64,
    next_reflect_id: u32,
    activity_clock: u64,
}

impl<E: Environment> MediatorState<E> {
    /// Mediator for the group whose public key is `group_public_key`.
    pub fn new(env: E, config: MediatorConfig, group_public_key: [u8; 32]) -> Self {
        Self {
            env,
            config,
            group_public_key,
            connections: HashMap::new(),
            devices: BTreeMap::new(),
            lock: None,
            leader: None,
            shared_device_data: Vec::new(),
            chat: Vec::new(),
            next_connection: 1,
            next_reflect_id: 1,
            activity_clock: 0,
        }
    }

    /// Register a new connection. Returns its id and the `ServerHello`.
    pub fn connect(&mut self) -> (u64, Vec<MediatorAction>) {
        let connection = self.next_connection;
        self.next_connection += 1;

        let mut ephemeral_secret = [0u8; 32];
        self.env.random_bytes(&mut ephemeral_secret);
        let mut challenge = vec![0u8; 32];
        self.env.random_bytes(&mut challenge);

        let esk = device_group_public_key(&SymmetricKey::new(ephemeral_secret));
        let hello = ServerHello {
            version: self.config.protocol_version,
            esk,
            challenge: challenge.clone(),
        };
        self.connections
            .insert(connection, Phase::AwaitingClientHello { ephemeral_secret, challenge });

        tracing::debug!(connection, "connection accepted");
        let mut actions = Vec::new();
        send(&mut actions, connection, Payload::ServerHello(hello));
        (connection, actions)
    }

    /// Process bytes received on `connection`.
    pub fn receive(&mut self, connection: u64, bytes: Bytes) -> Vec<MediatorAction> {
        let mut actions = Vec::new();
        let Some(phase) = self.connections.get(&connection) else {
            tracing::debug!(connection, "bytes for unknown connection");
            return actions;
        };
        let established = match phase {
            Phase::Established { device_id } => Some(*device_id),
            Phase::AwaitingClientHello { .. } => None,
        };

        let frame = match InboundFrame::classify(bytes) {
            Ok(InboundFrame::Mediator(frame)) => frame,
            Ok(InboundFrame::Chat(chat)) => {
                match (established, extract_chat_message(&chat)) {
                    (Some(device_id), Ok(body)) => {
                        self.chat.push((device_id, Bytes::copy_from_slice(body)));
                    },
                    _ => reject(&mut actions, connection, "chat frame before handshake"),
                }
                return actions;
            },
            Err(e) => {
                tracing::warn!(connection, error = %e, "undecodable frame");
                reject(&mut actions, connection, "undecodable frame");
                return actions;
            },
        };

        let payload = match Payload::from_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(connection, error = %e, "undecodable payload");
                reject(&mut actions, connection, "undecodable payload");
                return actions;
            },
        };

        match (established, payload) {
            (None, Payload::ClientHello(hello)) => {
                self.handle_client_hello(&mut actions, connection, hello);
            },
            (Some(device_id), payload) => {
                self.handle_payload(&mut actions, connection, device_id, payload);
            },
            (None, other) => {
                tracing::warn!(connection, message_type = ?other.message_type(), "no client hello");
                reject(&mut actions, connection, "expected client hello");
            },
        }
        actions
    }

    /// Forget `connection` after the transport closed.
    pub fn disconnect(&mut self, connection: u64) -> Vec<MediatorAction> {
        let mut actions = Vec::new();
        let Some(Phase::Established { device_id }) = self.connections.remove(&connection) else {
            return actions;
        };

        let now_ms = self.env.wall_clock_millis();
        let Some(slot) = self.devices.get_mut(&device_id) else {
            return actions;
        };
        if slot.connection != Some(connection) {
            return actions;
        }

        slot.connection = None;
        slot.activity = DeviceActivity::LastDisconnectAt(now_ms);
        if slot.expiration_policy == DeviceSlotExpirationPolicy::Volatile {
            tracing::info!(device_id, "volatile device slot released");
            self.devices.remove(&device_id);
        }
        tracing::info!(device_id, connection, "device disconnected");

        self.release_lock_of(&mut actions, device_id);
        if self.leader == Some(device_id) {
            self.leader = None;
            self.promote_leader(&mut actions);
        }
        actions
    }

    /// Send a chat-protocol frame to a device.
    pub fn deliver_chat(&mut self, device_id: u64, chat: &[u8]) -> Vec<MediatorAction> {
        let mut actions = Vec::new();
        if let Some(connection) = self.devices.get(&device_id).and_then(|slot| slot.connection) {
            actions.push(MediatorAction::Send {
                connection,
                bytes: Bytes::from(mdsync_proto::add_proxy_common_header(chat)),
            });
        }
        actions
    }

    /// Devices holding a slot.
    pub fn device_ids(&self) -> Vec<u64> {
        self.devices.keys().copied().collect()
    }

    /// Devices with an open connection.
    pub fn online_devices(&self) -> Vec<u64> {
        self.devices
            .iter()
            .filter(|(_, slot)| slot.connection.is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Device holding the transaction lock.
    pub fn lock_holder(&self) -> Option<u64> {
        self.lock.as_ref().map(|lock| lock.device_id)
    }

    /// Current leader.
    pub fn leader(&self) -> Option<u64> {
        self.leader
    }

    /// Reflected envelopes not yet acknowledged by `device_id`.
    pub fn queued(&self, device_id: u64) -> usize {
        self.devices.get(&device_id).map_or(0, |slot| slot.queue.len())
    }

    /// Chat frames received, with the sending device.
    pub fn chat_received(&self) -> &[(u64, Bytes)] {
        &self.chat
    }

    /// Encrypted shared device data.
    pub fn shared_device_data(&self) -> &[u8] {
        &self.shared_device_data
    }

    fn handle_client_hello(
        &mut self,
        actions: &mut Vec<MediatorAction>,
        connection: u64,
        hello: ClientHello,
    ) {
        let Some(Phase::AwaitingClientHello { ephemeral_secret, challenge }) =
            self.connections.get(&connection)
        else {
            return;
        };

        let verified =
            open_challenge_response(ephemeral_secret, &self.group_public_key, &hello.response)
                .is_ok_and(|opened| opened == *challenge);
        if !verified {
            reject(actions, connection, "challenge response invalid");
            return;
        }
        if hello.version > self.config.protocol_version {
            reject(actions, connection, "unsupported client version");
            return;
        }

        let device_id = hello.device_id;
        let device_slot_state = if self.devices.contains_key(&device_id) {
            DeviceSlotState::Existing
        } else {
            if !self.make_room(actions, hello.device_slots_exhausted_policy) {
                tracing::warn!(device_id, "device slots exhausted");
                actions.push(MediatorAction::Close { connection, code: CloseCode::Normal });
                return;
            }
            DeviceSlotState::New
        };
        if device_slot_state != hello.expected_device_slot_state {
            tracing::info!(device_id, ?device_slot_state, "unexpected device slot state");
        }

        self.activity_clock += 1;
        let now_ms = self.env.wall_clock_millis();
        let slot = self.devices.entry(device_id).or_insert_with(|| DeviceSlot {
            encrypted_device_info: Vec::new(),
            expiration_policy: hello.device_slot_expiration_policy,
            activity: DeviceActivity::ConnectedSince(now_ms),
            connection: None,
            queue: VecDeque::new(),
            last_active: 0,
        });

        if let Some(previous) = slot.connection.replace(connection) {
            tracing::info!(device_id, previous, "device reconnected, closing previous connection");
            self.connections.remove(&previous);
            actions.push(MediatorAction::Close { connection: previous, code: CloseCode::Normal });
        }
        slot.encrypted_device_info = hello.encrypted_device_info;
        slot.expiration_policy = hello.device_slot_expiration_policy;
        slot.activity = DeviceActivity::ConnectedSince(now_ms);
        slot.last_active = self.activity_clock;
        let queued: Vec<Reflected> = slot.queue.iter().cloned().collect();

        self.connections.insert(connection, Phase::Established { device_id });
        tracing::info!(device_id, connection, queued = queued.len(), "device authenticated");

        send(
            actions,
            connection,
            Payload::ServerInfo(ServerInfo {
                current_time_ms: now_ms,
                max_device_slots: self.config.max_device_slots,
                device_slot_state,
                encrypted_shared_device_data: self.shared_device_data.clone(),
            }),
        );
        for reflected in queued {
            send(actions, connection, Payload::Reflected(reflected));
        }
        send(actions, connection, Payload::ReflectionQueueDry);

        if self.leader.is_none() {
            self.promote_leader(actions);
        }
    }

    /// Free a slot for a new device. Returns false if none can be freed.
    fn make_room(
        &mut self,
        actions: &mut Vec<MediatorAction>,
        policy: DeviceSlotsExhaustedPolicy,
    ) -> bool {
        let slots = usize::try_from(self.config.max_device_slots).unwrap_or(usize::MAX);
        if self.devices.len() < slots {
            return true;
        }
        if policy == DeviceSlotsExhaustedPolicy::Reject {
            return false;
        }

        let Some(evicted) = self
            .devices
            .iter()
            .min_by_key(|(_, slot)| (slot.connection.is_some(), slot.last_active))
            .map(|(id, _)| *id)
        else {
            return false;
        };
        tracing::info!(device_id = evicted, "dropping least recently active device");
        self.remove_device(actions, evicted);
        true
    }

    fn remove_device(&mut self, actions: &mut Vec<MediatorAction>, device_id: u64) {
        let Some(slot) = self.devices.remove(&device_id) else {
            return;
        };
        if let Some(connection) = slot.connection {
            self.connections.remove(&connection);
            actions.push(MediatorAction::Close { connection, code: CloseCode::Normal });
        }
        self.release_lock_of(actions, device_id);
        if self.leader == Some(device_id) {
            self.leader = None;
            self.promote_leader(actions);
        }
    }

    fn promote_leader(&mut self, actions: &mut Vec<MediatorAction>) {
        let Some((device_id, connection)) = self
            .devices
            .iter()
            .find_map(|(id, slot)| slot.connection.map(|connection| (*id, connection)))
        else {
            return;
        };
        tracing::info!(device_id, "device promoted to leader");
        self.leader = Some(device_id);
        send(actions, connection, Payload::RolePromotedToLeader);
    }

    fn handle_payload(
        &mut self,
        actions: &mut Vec<MediatorAction>,
        connection: u64,
        device_id: u64,
        payload: Payload,
    ) {
        match payload {
            Payload::Reflect(reflect) => {
                self.handle_reflect(actions, connection, device_id, reflect);
            },
            Payload::ReflectedAck(ReflectedAck { reflect_id }) => {
                if let Some(slot) = self.devices.get_mut(&device_id) {
                    slot.queue.retain(|queued| queued.reflect_id != reflect_id);
                }
            },
            Payload::BeginTransaction(begin) => {
                self.handle_begin(actions, connection, device_id, begin);
            },
            Payload::CommitTransaction => {
                if self.lock_holder() == Some(device_id) {
                    self.release_lock_of(actions, device_id);
                } else {
                    tracing::warn!(device_id, "commit without holding the lock");
                }
                send(actions, connection, Payload::CommitTransactionAck);
            },
            Payload::GetDevicesInfo => {
                let augmented_device_info = self
                    .devices
                    .iter()
                    .map(|(id, slot)| {
                        (*id, AugmentedDeviceInfo {
                            encrypted_device_info: slot.encrypted_device_info.clone(),
                            activity: slot.activity,
                            device_slot_expiration_policy: slot.expiration_policy,
                        })
                    })
                    .collect();
                let info = DevicesInfo { augmented_device_info };
                send(actions, connection, Payload::DevicesInfo(info));
            },
            Payload::DropDevice(DropDevice { device_id: dropped }) => {
                tracing::info!(device_id, dropped, "drop device requested");
                self.remove_device(actions, dropped);
                let ack = DropDeviceAck { device_id: dropped };
                send(actions, connection, Payload::DropDeviceAck(ack));
            },
            Payload::SetSharedDeviceData(SetSharedDeviceData { encrypted_shared_device_data }) => {
                self.shared_device_data = encrypted_shared_device_data;
            },
            other => {
                let message_type = other.message_type();
                tracing::warn!(device_id, ?message_type, "unexpected message");
                reject(actions, connection, "unexpected message");
            },
        }
    }

    fn handle_reflect(
        &mut self,
        actions: &mut Vec<MediatorAction>,
        connection: u64,
        device_id: u64,
        reflect: Reflect,
    ) {
        let timestamp_ms = self.env.wall_clock_millis();
        for (other, slot) in self.devices.iter_mut().filter(|(id, _)| **id != device_id) {
            let reflected = Reflected {
                reflect_id: ReflectId::from_u32(self.next_reflect_id),
                flags: 0,
                timestamp_ms,
                envelope: reflect.envelope.clone(),
            };
            self.next_reflect_id = self.next_reflect_id.wrapping_add(1);

            slot.queue.push_back(reflected.clone());
            if let Some(target) = slot.connection {
                tracing::trace!(from = device_id, to = *other, "forwarding reflected envelope");
                send(actions, target, Payload::Reflected(reflected));
            }
        }
        let ack = ReflectAck { reflect_id: reflect.reflect_id };
        send(actions, connection, Payload::ReflectAck(ack));
    }

    fn handle_begin(
        &mut self,
        actions: &mut Vec<MediatorAction>,
        connection: u64,
        device_id: u64,
        begin: BeginTransaction,
    ) {
        let now = self.env.now();
        let expired = self
            .lock
            .as_ref()
            .filter(|lock| lock.ttl.is_some_and(|ttl| now - lock.acquired_at >= ttl))
            .map(|lock| lock.device_id);
        if let Some(holder) = expired {
            tracing::info!(holder, "transaction lock expired");
            self.release_lock_of(actions, holder);
        }

        let held_by_other = self.lock.as_ref().filter(|lock| lock.device_id != device_id);
        if let Some(lock) = held_by_other {
            tracing::debug!(device_id, holder = lock.device_id, "transaction rejected");
            let rejected = TransactionRejected {
                device_id: lock.device_id,
                encrypted_scope: lock.encrypted_scope.clone(),
            };
            send(actions, connection, Payload::TransactionRejected(rejected));
            return;
        }

        tracing::debug!(device_id, "transaction lock granted");
        self.lock = Some(Lock {
            device_id,
            encrypted_scope: begin.encrypted_scope,
            acquired_at: now,
            ttl: begin.ttl_secs.map(|secs| Duration::from_secs(u64::from(secs))),
        });
        send(actions, connection, Payload::BeginTransactionAck);
    }

    fn release_lock_of(&mut self, actions: &mut Vec<MediatorAction>, device_id: u64) {
        if self.lock_holder() != Some(device_id) {
            return;
        }
        let Some(lock) = self.lock.take() else {
            return;
        };

        for (other, slot) in &self.devices {
            if *other == device_id {
                continue;
            }
            if let Some(connection) = slot.connection {
                send(
                    actions,
                    connection,
                    Payload::TransactionEnded(TransactionEnded {
                        device_id,
                        encrypted_scope: lock.encrypted_scope.clone(),
                    }),
                );
            }
        }
    }
}

fn reject(actions: &mut Vec<MediatorAction>, connection: u64, reason: &str) {
    tracing::warn!(connection, reason, "closing connection");
    actions.push(MediatorAction::Close { connection, code: CloseCode::ProtocolError });
}

fn send(actions: &mut Vec<MediatorAction>, connection: u64, payload: Payload) {
    let encoded = payload.into_frame().and_then(|frame| frame.to_vec());
    match encoded {
        Ok(bytes) => actions.push(MediatorAction::Send { connection, bytes: Bytes::from(bytes) }),
        Err(e) => tracing::error!(connection, error = %e, "could not encode mediator frame"),
    }
}
