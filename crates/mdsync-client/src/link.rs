//! Mediator link runtime.
//!
//! One task per connection owns the transport, the handshake, the
//! transaction coordinator and the reflect tracker. Everything else talks to
//! it through a [`LinkHandle`].
//!
//! Reflected envelopes are opened on the link task and applied on an
//! ordered executor: envelopes about the same entity apply in receive order,
//! unrelated ones run concurrently. The `ReflectedAck` goes out once the
//! dispatcher reports back.
//!
//! Begins are queued so at most one transaction is in flight per device.

use std::{collections::VecDeque, pin::pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use mdsync_core::{
    CloseCode, Environment, Handshake, HandshakeAction, HandshakeEvent, ReflectTracker, Session,
    TransactionCoordinator, TransactionEvent, TransactionState,
};
use mdsync_crypto::DeviceGroupKeys;
use mdsync_proto::{
    EnvelopeContent, Frame, InboundFrame, MessageType, Payload, ReflectId,
    add_proxy_common_header, extract_chat_message,
    payloads::{
        devices::{
            AugmentedDeviceInfo, DeviceActivity, DeviceInfo, DevicesInfo, DropDevice,
            DropDeviceAck, SetSharedDeviceData,
        },
        handshake::{DeviceSlotExpirationPolicy, DeviceSlotState},
        reflect::{Reflect, ReflectAck, Reflected, ReflectedAck},
        transaction::TransactionScope,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    boundary::{Collaborators, EntityId, EntityObserver},
    config::LinkConfig,
    dispatcher::{DispatchOutcome, Dispatcher, ordering_keys},
    error::{LinkError, SyncError},
    ordered::OrderedExecutor,
    outbound::MediatorLink,
    transport::Transport,
};

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

fn answer<T>(reply: Reply<T>, result: Result<T, SyncError>) {
    if reply.send(result).is_err() {
        tracing::debug!("requester gone before answer");
    }
}

/// Another device of the group, as reported by the mediator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedDevice {
    /// Mediator device id
    pub device_id: u64,
    /// Opened device info; `None` if it could not be opened
    pub info: Option<DeviceInfo>,
    /// Connection activity
    pub activity: DeviceActivity,
    /// Slot expiration policy
    pub expiration_policy: DeviceSlotExpirationPolicy,
}

impl LinkedDevice {
    fn open(keys: &DeviceGroupKeys, device_id: u64, augmented: AugmentedDeviceInfo) -> Self {
        let info = mdsync_crypto::open(keys.device_info(), &augmented.encrypted_device_info)
            .map_err(|e| e.to_string())
            .and_then(|plaintext| DeviceInfo::decode(&plaintext).map_err(|e| e.to_string()));

        let info = match info {
            Ok(info) => Some(info),
            Err(error) => {
                tracing::warn!(device_id, %error, "unreadable device info");
                None
            },
        };

        Self {
            device_id,
            info,
            activity: augmented.activity,
            expiration_policy: augmented.device_slot_expiration_policy,
        }
    }
}

/// Notifications from the link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed
    Established {
        /// Device slots of the group
        max_device_slots: u32,
        /// Slot state reported by the mediator
        device_slot_state: DeviceSlotState,
        /// Negotiated protocol version
        version: u32,
    },
    /// Chat-protocol frame, proxy header removed
    ChatFrame(Bytes),
    /// Another device released a transaction
    TransactionEnded {
        /// Device that held the lock
        device_id: u64,
        /// Released scope
        scope: u8,
    },
    /// This device became the group leader
    RolePromotedToLeader,
    /// Every queued reflected envelope was delivered
    ReflectionQueueDry,
    /// A reflected envelope failed to apply and was not acknowledged
    DispatchFailed {
        /// Reflect id of the envelope
        reflect_id: ReflectId,
        /// Why
        error: SyncError,
    },
}

enum Command {
    Begin { scope: TransactionScope, reply: Reply<()> },
    Commit { reply: Option<Reply<()>> },
    Reflect { content: EnvelopeContent, reply: Reply<ReflectId> },
    DevicesInfo { reply: Reply<Vec<LinkedDevice>> },
    DropDevice { device_id: u64, reply: Reply<()> },
    SetSharedDeviceData { data: Vec<u8>, reply: Reply<()> },
    SendChat { chat: Bytes, reply: Reply<()> },
    Shutdown,
}

impl Command {
    fn reject(self, error: SyncError) {
        match self {
            Self::Begin { reply, .. }
            | Self::Commit { reply: Some(reply) }
            | Self::DropDevice { reply, .. }
            | Self::SetSharedDeviceData { reply, .. }
            | Self::SendChat { reply, .. } => answer(reply, Err(error)),
            Self::Reflect { reply, .. } => answer(reply, Err(error)),
            Self::DevicesInfo { reply } => answer(reply, Err(error)),
            Self::Commit { reply: None } | Self::Shutdown => {},
        }
    }
}

struct DispatchDone {
    reflect_id: ReflectId,
    result: Result<DispatchOutcome, SyncError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Cloneable handle to a running link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<Command>,
    established: watch::Receiver<bool>,
}

impl LinkHandle {
    async fn request<T: Send>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command + Send,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| SyncError::LinkClosed)?;
        response.await.map_err(|_| SyncError::LinkClosed)?
    }

    /// Handshake completed and the link is still up.
    pub fn is_established(&self) -> bool {
        *self.established.borrow()
    }

    /// Wait for the handshake.
    ///
    /// # Errors
    ///
    /// - `LinkClosed` if the link ended first
    pub async fn wait_established(&self) -> Result<(), SyncError> {
        let mut established = self.established.clone();
        established.wait_for(|up| *up).await.map(|_| ()).map_err(|_| SyncError::LinkClosed)
    }

    /// Devices of the group, including this one.
    ///
    /// # Errors
    ///
    /// - `NotEstablished` before the handshake
    /// - `LinkClosed` if the link ended before the answer
    pub async fn devices_info(&self) -> Result<Vec<LinkedDevice>, SyncError> {
        self.request(|reply| Command::DevicesInfo { reply }).await
    }

    /// Remove a device from the group. Returns once the mediator acked.
    ///
    /// # Errors
    ///
    /// As [`devices_info`](Self::devices_info).
    pub async fn drop_device(&self, device_id: u64) -> Result<(), SyncError> {
        self.request(|reply| Command::DropDevice { device_id, reply }).await
    }

    /// Replace the data every device receives in `ServerInfo`. Sealed under
    /// the shared-device-data key.
    ///
    /// # Errors
    ///
    /// As [`devices_info`](Self::devices_info), plus `Envelope` without keys.
    pub async fn set_shared_device_data(&self, data: Vec<u8>) -> Result<(), SyncError> {
        self.request(|reply| Command::SetSharedDeviceData { data, reply }).await
    }

    /// Send a chat-protocol frame through the mediator.
    ///
    /// # Errors
    ///
    /// As [`devices_info`](Self::devices_info).
    pub async fn send_chat(&self, chat: Bytes) -> Result<(), SyncError> {
        self.request(|reply| Command::SendChat { chat, reply }).await
    }

    /// Close the link with a normal close code.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            tracing::debug!("link already stopped");
        }
    }
}

#[async_trait]
impl MediatorLink for LinkHandle {
    async fn begin_transaction(&self, scope: TransactionScope) -> Result<(), SyncError> {
        self.request(|reply| Command::Begin { scope, reply }).await
    }

    async fn commit_transaction(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::Commit { reply: Some(reply) }).await
    }

    fn release_transaction(&self) {
        if let Err(e) = self.commands.try_send(Command::Commit { reply: None }) {
            tracing::warn!(error = %e, "could not release transaction");
        }
    }

    async fn reflect(&self, content: EnvelopeContent) -> Result<ReflectId, SyncError> {
        self.request(|reply| Command::Reflect { content, reply }).await
    }
}

/// Link task state. Created and driven by [`Link::spawn`].
pub struct Link<E: Environment, T> {
    env: E,
    transport: T,
    session: Session,
    config: LinkConfig,
    handshake: Handshake,
    coordinator: TransactionCoordinator<E::Instant>,
    transaction_waiter: Option<Reply<()>>,
    pending_begins: VecDeque<(TransactionScope, Reply<()>)>,
    reflects: ReflectTracker<E::Instant, Reply<ReflectId>>,
    devices_waiters: VecDeque<Reply<Vec<LinkedDevice>>>,
    drop_waiters: VecDeque<(u64, Reply<()>)>,
    dispatcher: Arc<Dispatcher>,
    executor: OrderedExecutor<Option<EntityId>>,
    observer: Arc<dyn EntityObserver>,
    events: mpsc::UnboundedSender<LinkEvent>,
    established: watch::Sender<bool>,
    dispatched: mpsc::UnboundedSender<DispatchDone>,
    decode_failures: u32,
}

impl<E, T> Link<E, T>
where
    E: Environment,
    T: Transport,
{
    /// Start a link over a freshly opened transport.
    ///
    /// `multi_device_enabled` tells the handshake whether this device was
    /// linked before. The join handle resolves when the link ends: `Ok` after
    /// [`LinkHandle::shutdown`], the cause otherwise.
    pub fn spawn(
        env: E,
        transport: T,
        session: Session,
        collaborators: Collaborators,
        config: LinkConfig,
        multi_device_enabled: bool,
    ) -> (LinkHandle, mpsc::UnboundedReceiver<LinkEvent>, JoinHandle<Result<(), LinkError>>) {
        let (commands_tx, commands_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (dispatched_tx, dispatched_rx) = mpsc::unbounded_channel();
        let (established_tx, established_rx) = watch::channel(false);

        let link = Self {
            handshake: Handshake::new(
                config.handshake.clone(),
                session.device_id(),
                multi_device_enabled,
            ),
            coordinator: TransactionCoordinator::new(
                config.transaction_timeout,
                config.transaction_ttl_secs,
            ),
            transaction_waiter: None,
            pending_begins: VecDeque::new(),
            reflects: ReflectTracker::new(config.reflect_ack_timeout),
            devices_waiters: VecDeque::new(),
            drop_waiters: VecDeque::new(),
            dispatcher: Arc::new(Dispatcher::new(collaborators.clone(), config.dispatch.clone())),
            executor: OrderedExecutor::new(),
            observer: collaborators.observer,
            events: events_tx,
            established: established_tx,
            dispatched: dispatched_tx,
            decode_failures: 0,
            env,
            transport,
            session,
            config,
        };

        let task = tokio::spawn(link.run(commands_rx, dispatched_rx));
        let handle = LinkHandle { commands: commands_tx, established: established_rx };

        (handle, events_rx, task)
    }

    async fn run(
        mut self,
        commands: mpsc::Receiver<Command>,
        dispatched: mpsc::UnboundedReceiver<DispatchDone>,
    ) -> Result<(), LinkError> {
        let result = self.drive(commands, dispatched).await;
        match &result {
            Ok(()) => tracing::info!(device_id = self.session.device_id(), "link stopped"),
            Err(e) => {
                tracing::warn!(device_id = self.session.device_id(), error = %e, "link ended");
            },
        }

        self.established.send_modify(|up| *up = false);
        self.coordinator.abort();
        self.executor.shutdown();
        result
    }

    async fn drive(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        mut dispatched: mpsc::UnboundedReceiver<DispatchDone>,
    ) -> Result<(), LinkError> {
        let env = self.env.clone();
        let interval = self.config.tick_interval;
        let mut tick = pin!(env.sleep(interval));

        loop {
            tokio::select! {
                frame = self.transport.recv() => match frame? {
                    Some(bytes) => self.handle_inbound(bytes).await?,
                    None => {
                        tracing::info!("mediator closed the connection");
                        return Err(LinkError::ConnectionLost);
                    },
                },
                Some(command) = commands.recv() => {
                    if self.handle_command(command).await? == Flow::Stop {
                        return Ok(());
                    }
                },
                Some(done) = dispatched.recv() => self.handle_dispatched(done).await?,
                () = &mut tick => {
                    self.handle_tick().await?;
                    tick.set(env.sleep(interval));
                },
            }
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("link event receiver dropped");
        }
    }

    fn is_established(&self) -> bool {
        *self.established.borrow()
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        tracing::debug!(message_type = ?frame.message_type(), "sending frame");
        let bytes = frame.to_vec()?;
        self.transport.send(Bytes::from(bytes)).await
    }

    async fn send_payload(&mut self, payload: Payload) -> Result<(), LinkError> {
        let frame = payload.into_frame()?;
        self.send_frame(&frame).await
    }

    async fn handle_inbound(&mut self, bytes: Bytes) -> Result<(), LinkError> {
        let frame = match InboundFrame::classify(bytes) {
            Ok(InboundFrame::Mediator(frame)) => frame,
            Ok(InboundFrame::Chat(chat)) => {
                self.emit(LinkEvent::ChatFrame(strip_proxy_header(chat)));
                return Ok(());
            },
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return Ok(());
            },
        };

        tracing::debug!(message_type = ?frame.message_type(), "received frame");
        let keys = self.session.keys().ok();
        let actions = match self.handshake.handle_frame(&self.env, keys.as_deref(), &frame) {
            Ok(actions) => actions,
            Err(e) if self.is_established() => {
                tracing::warn!(error = %e, message_type = ?frame.message_type(), "dropping frame");
                return Ok(());
            },
            Err(e) => {
                tracing::error!(error = %e, "handshake failed");
                self.transport.close(CloseCode::ProtocolError).await;
                return Err(e.into());
            },
        };

        for action in actions {
            match action {
                HandshakeAction::Send(frame) => self.send_frame(&frame).await?,
                HandshakeAction::Disconnect { code } => {
                    self.transport.close(code).await;
                    return Err(LinkError::Closed { code });
                },
                HandshakeAction::Notify(event) => self.handle_notify(event),
                HandshakeAction::Forward(payload) => self.handle_payload(payload).await?,
            }
        }

        Ok(())
    }

    fn handle_notify(&self, event: HandshakeEvent) {
        match event {
            HandshakeEvent::MultiDeviceEnabled { max_device_slots } => {
                self.observer.on_multi_device_enabled(max_device_slots);
            },
            HandshakeEvent::Established { max_device_slots, device_slot_state, version } => {
                tracing::info!(
                    device_id = self.session.device_id(),
                    max_device_slots,
                    version,
                    "link established"
                );
                self.established.send_modify(|up| *up = true);
                self.emit(LinkEvent::Established { max_device_slots, device_slot_state, version });
            },
            HandshakeEvent::ReflectionQueueDry => {
                self.observer.on_reflection_queue_dry();
                self.emit(LinkEvent::ReflectionQueueDry);
            },
            HandshakeEvent::RolePromotedToLeader => self.emit(LinkEvent::RolePromotedToLeader),
        }
    }

    async fn handle_payload(&mut self, payload: Payload) -> Result<(), LinkError> {
        match payload {
            Payload::Reflected(reflected) => self.handle_reflected(reflected).await,
            Payload::ReflectAck(ReflectAck { reflect_id }) => {
                match self.reflects.acknowledge(&reflect_id) {
                    Some(waiter) => answer(waiter, Ok(reflect_id)),
                    None => tracing::debug!(%reflect_id, "ack for unknown reflect"),
                }
                Ok(())
            },
            Payload::DevicesInfo(info) => {
                self.answer_devices_info(info);
                Ok(())
            },
            Payload::DropDeviceAck(DropDeviceAck { device_id }) => {
                match self.drop_waiters.iter().position(|(id, _)| *id == device_id) {
                    Some(index) => {
                        if let Some((_, waiter)) = self.drop_waiters.remove(index) {
                            answer(waiter, Ok(()));
                        }
                    },
                    None => tracing::debug!(device_id, "unsolicited drop device ack"),
                }
                Ok(())
            },
            other => self.handle_transaction_payload(&other).await,
        }
    }

    async fn handle_reflected(&mut self, reflected: Reflected) -> Result<(), LinkError> {
        let reflect_id = reflected.reflect_id;
        let opened = match self.session.open(&reflected.envelope) {
            Ok(opened) => {
                self.decode_failures = 0;
                opened
            },
            Err(e) => {
                self.decode_failures += 1;
                tracing::warn!(
                    %reflect_id,
                    error = %e,
                    failures = self.decode_failures,
                    "could not open reflected envelope"
                );
                if self.decode_failures >= self.config.max_consecutive_decode_failures {
                    tracing::error!(failures = self.decode_failures, "too many decode failures");
                    self.transport.close(CloseCode::ProtocolError).await;
                    return Err(LinkError::TooManyDecodeFailures { count: self.decode_failures });
                }
                return Ok(());
            },
        };

        let mut keys: Vec<_> =
            ordering_keys(&opened.envelope.content).into_iter().map(Some).collect();
        if keys.is_empty() {
            keys.push(None);
        }
        let reflected_at = reflected.timestamp_ms;
        let dispatcher = Arc::clone(&self.dispatcher);
        let done = self.dispatched.clone();

        self.executor.submit_all(keys, async move {
            let result = dispatcher.dispatch(opened, reflected_at).await;
            if done.send(DispatchDone { reflect_id, result }).is_err() {
                tracing::debug!(%reflect_id, "link gone before dispatch finished");
            }
        });

        Ok(())
    }

    async fn handle_dispatched(&mut self, done: DispatchDone) -> Result<(), LinkError> {
        let reflect_id = done.reflect_id;
        match done.result {
            Ok(outcome) if outcome.should_ack() => {
                self.send_payload(Payload::ReflectedAck(ReflectedAck { reflect_id })).await
            },
            Ok(_) => {
                tracing::debug!(%reflect_id, "duplicate envelope, not acknowledged");
                Ok(())
            },
            Err(error) => {
                if error.is_retryable() {
                    tracing::warn!(%reflect_id, %error, "envelope not applied, awaiting redelivery");
                } else {
                    tracing::error!(%reflect_id, %error, "envelope rejected");
                }
                self.emit(LinkEvent::DispatchFailed { reflect_id, error });
                Ok(())
            },
        }
    }

    fn answer_devices_info(&mut self, info: DevicesInfo) {
        let Some(waiter) = self.devices_waiters.pop_front() else {
            tracing::debug!("unsolicited device info");
            return;
        };

        let devices = self.session.keys().map_err(SyncError::from).map(|keys| {
            info.augmented_device_info
                .into_iter()
                .map(|(device_id, augmented)| LinkedDevice::open(&keys, device_id, augmented))
                .collect()
        });
        answer(waiter, devices);
    }

    async fn handle_transaction_payload(&mut self, payload: &Payload) -> Result<(), LinkError> {
        let keys = match self.session.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, message_type = ?payload.message_type(), "no keys");
                return Ok(());
            },
        };

        match self.coordinator.handle(&keys, payload) {
            Ok(Some(TransactionEvent::Locked { scope })) => {
                let delivered = self
                    .transaction_waiter
                    .take()
                    .is_some_and(|waiter| waiter.send(Ok(())).is_ok());
                if !delivered {
                    tracing::warn!(%scope, "transaction abandoned before lock ack, releasing");
                    self.release_transaction(None).await?;
                }
            },
            Ok(Some(TransactionEvent::Committed { .. })) => {
                if let Some(waiter) = self.transaction_waiter.take() {
                    answer(waiter, Ok(()));
                }
                self.start_next_transaction().await?;
            },
            Ok(Some(TransactionEvent::Ended { device_id, scope })) => {
                self.emit(LinkEvent::TransactionEnded { device_id, scope });
            },
            Ok(None) => {
                tracing::debug!(message_type = ?payload.message_type(), "ignoring payload");
            },
            Err(e) if self.coordinator.state() == TransactionState::Idle => {
                match self.transaction_waiter.take() {
                    Some(waiter) => answer(waiter, Err(e.into())),
                    None => tracing::warn!(error = %e, "transaction error without requester"),
                }
                self.start_next_transaction().await?;
            },
            Err(e) => tracing::warn!(error = %e, "dropping transaction notification"),
        }

        Ok(())
    }

    async fn start_transaction(
        &mut self,
        scope: TransactionScope,
        reply: Reply<()>,
    ) -> Result<(), LinkError> {
        let begun = self
            .session
            .keys()
            .map_err(SyncError::from)
            .and_then(|keys| {
                self.coordinator.begin(&self.env, &keys, scope).map_err(SyncError::from)
            });

        match begun {
            Ok(frame) => {
                self.transaction_waiter = Some(reply);
                self.send_frame(&frame).await
            },
            Err(e) => {
                tracing::warn!(%scope, error = %e, "could not begin transaction");
                answer(reply, Err(e));
                Ok(())
            },
        }
    }

    async fn start_next_transaction(&mut self) -> Result<(), LinkError> {
        while self.coordinator.state() == TransactionState::Idle
            && let Some((scope, reply)) = self.pending_begins.pop_front()
        {
            if reply.is_closed() {
                tracing::debug!(%scope, "queued transaction abandoned");
                continue;
            }
            self.start_transaction(scope, reply).await?;
        }
        Ok(())
    }

    async fn release_transaction(&mut self, reply: Option<Reply<()>>) -> Result<(), LinkError> {
        match self.coordinator.commit(&self.env) {
            Ok(frame) => {
                self.transaction_waiter = reply;
                self.send_frame(&frame).await
            },
            Err(e) => {
                match reply {
                    Some(reply) => answer(reply, Err(e.into())),
                    None => tracing::debug!(error = %e, "nothing to release"),
                }
                Ok(())
            },
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<Flow, LinkError> {
        if !self.is_established() && !matches!(command, Command::Shutdown) {
            command.reject(SyncError::NotEstablished);
            return Ok(Flow::Continue);
        }

        match command {
            Command::Begin { scope, reply } => {
                if self.coordinator.state() == TransactionState::Idle
                    && self.pending_begins.is_empty()
                {
                    self.start_transaction(scope, reply).await?;
                } else {
                    tracing::debug!(%scope, queued = self.pending_begins.len(), "queueing begin");
                    self.pending_begins.push_back((scope, reply));
                }
            },
            Command::Commit { reply } => self.release_transaction(reply).await?,
            Command::Reflect { content, reply } => self.reflect(content, reply).await?,
            Command::DevicesInfo { reply } => {
                self.send_payload(Payload::GetDevicesInfo).await?;
                self.devices_waiters.push_back(reply);
            },
            Command::DropDevice { device_id, reply } => {
                self.send_payload(Payload::DropDevice(DropDevice { device_id })).await?;
                self.drop_waiters.push_back((device_id, reply));
            },
            Command::SetSharedDeviceData { data, reply } => match self.session.keys() {
                Ok(keys) => {
                    let encrypted_shared_device_data = mdsync_crypto::seal(
                        keys.shared_device_data(),
                        &self.env.random_nonce(),
                        &data,
                    );
                    self.send_payload(Payload::SetSharedDeviceData(SetSharedDeviceData {
                        encrypted_shared_device_data,
                    }))
                    .await?;
                    answer(reply, Ok(()));
                },
                Err(e) => {
                    answer(reply, Err(e.into()));
                },
            },
            Command::SendChat { chat, reply } => {
                self.transport.send(Bytes::from(add_proxy_common_header(&chat))).await?;
                answer(reply, Ok(()));
            },
            Command::Shutdown => {
                tracing::info!(device_id = self.session.device_id(), "shutting down link");
                self.transport.close(CloseCode::Normal).await;
                return Ok(Flow::Stop);
            },
        }

        Ok(Flow::Continue)
    }

    async fn reflect(
        &mut self,
        content: EnvelopeContent,
        reply: Reply<ReflectId>,
    ) -> Result<(), LinkError> {
        let kind = content.kind();
        let sealed = match self.session.seal(&self.env, content) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(?kind, error = %e, "could not seal envelope");
                answer(reply, Err(e.into()));
                return Ok(());
            },
        };

        let reflect_id = self.reflects.next_id(&self.env);
        let frame = match Payload::Reflect(Reflect { reflect_id, envelope: sealed.bytes })
            .into_frame()
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(?kind, error = %e, "could not encode reflect");
                answer(reply, Err(e.into()));
                return Ok(());
            },
        };

        tracing::debug!(%reflect_id, ?kind, "reflecting envelope");
        self.reflects.track(reflect_id, self.env.now(), reply);
        self.send_frame(&frame).await
    }

    async fn handle_tick(&mut self) -> Result<(), LinkError> {
        let now = self.env.now();

        for (reflect_id, waiter) in self.reflects.expired(now) {
            tracing::warn!(%reflect_id, "reflect ack timed out");
            answer(waiter, Err(SyncError::ReflectTimeout { reflect_id }));
        }

        if let Err(e) = self.coordinator.check_timeout(now) {
            if let Some(waiter) = self.transaction_waiter.take() {
                answer(waiter, Err(e.into()));
            }
            self.start_next_transaction().await?;
        }

        Ok(())
    }
}

fn strip_proxy_header(chat: Bytes) -> Bytes {
    if chat.first() == Some(&MessageType::Proxy.to_u8()) {
        match extract_chat_message(&chat) {
            Ok(inner) => return chat.slice_ref(inner),
            Err(e) => tracing::debug!(error = %e, "short proxy frame"),
        }
    }
    chat
}
