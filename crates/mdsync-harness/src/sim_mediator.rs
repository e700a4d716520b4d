//! Simulated mediator server for turmoil.
//!
//! Wraps [`MediatorState`] with turmoil TCP. Each accepted connection runs in
//! its own task with a [`StreamTransport`]; actions produced by the state
//! machine are routed to the owning task through an outbox channel.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use mdsync_client::{StreamTransport, Transport, config::DEFAULT_CHANNEL_CAPACITY};
use mdsync_core::{CloseCode, Environment};
use tokio::sync::mpsc;
use turmoil::net::{TcpListener, TcpStream};

use crate::mediator::{MediatorAction, MediatorConfig, MediatorState};

enum Outbound {
    Frame(Bytes),
    Close(CloseCode),
}

struct Hub<E: Environment> {
    state: MediatorState<E>,
    outboxes: HashMap<u64, mpsc::UnboundedSender<Outbound>>,
}

impl<E: Environment> Hub<E> {
    fn route(&mut self, actions: Vec<MediatorAction>) {
        for action in actions {
            let (connection, outbound) = match action {
                MediatorAction::Send { connection, bytes } => (connection, Outbound::Frame(bytes)),
                MediatorAction::Close { connection, code } => (connection, Outbound::Close(code)),
            };
            let delivered =
                self.outboxes.get(&connection).is_some_and(|outbox| outbox.send(outbound).is_ok());
            if !delivered {
                tracing::trace!(connection, "dropping action for closed connection");
            }
        }
    }
}

/// Mediator server. Clones share the same state.
pub struct SimMediator<E: Environment> {
    hub: Arc<Mutex<Hub<E>>>,
}

impl<E: Environment> Clone for SimMediator<E> {
    fn clone(&self) -> Self {
        Self { hub: Arc::clone(&self.hub) }
    }
}

impl<E: Environment> std::fmt::Debug for SimMediator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMediator").finish_non_exhaustive()
    }
}

impl<E: Environment> SimMediator<E> {
    /// Mediator for the group whose public key is `group_public_key`.
    pub fn new(env: E, config: MediatorConfig, group_public_key: [u8; 32]) -> Self {
        let state = MediatorState::new(env, config, group_public_key);
        Self { hub: Arc::new(Mutex::new(Hub { state, outboxes: HashMap::new() })) }
    }

    fn with_hub<R>(&self, f: impl FnOnce(&mut Hub<E>) -> R) -> R {
        let mut hub = self.hub.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut hub)
    }

    /// Read the mediator state.
    pub fn inspect<R>(&self, f: impl FnOnce(&MediatorState<E>) -> R) -> R {
        self.with_hub(|hub| f(&hub.state))
    }

    /// Push a chat-protocol frame to a connected device.
    pub fn deliver_chat(&self, device_id: u64, chat: &[u8]) {
        self.with_hub(|hub| {
            let actions = hub.state.deliver_chat(device_id, chat);
            hub.route(actions);
        });
    }

    /// Accept connections until the listener fails.
    ///
    /// # Errors
    ///
    /// The accept error.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "mediator accepted connection");
            tokio::spawn(self.clone().serve_connection(stream));
        }
    }

    /// Bind `address` and serve.
    ///
    /// # Errors
    ///
    /// Bind or accept errors.
    pub async fn bind_and_serve(self, address: &str) -> io::Result<()> {
        let listener = TcpListener::bind(address).await?;
        self.serve(listener).await
    }

    async fn serve_connection(self, stream: TcpStream) {
        let mut transport = StreamTransport::new(stream, DEFAULT_CHANNEL_CAPACITY);
        let (outbox, mut outbound) = mpsc::unbounded_channel();

        let connection = self.with_hub(|hub| {
            let (connection, actions) = hub.state.connect();
            hub.outboxes.insert(connection, outbox);
            hub.route(actions);
            connection
        });

        loop {
            tokio::select! {
                inbound = transport.recv() => match inbound {
                    Ok(Some(bytes)) => self.with_hub(|hub| {
                        let actions = hub.state.receive(connection, bytes);
                        hub.route(actions);
                    }),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(connection, error = %e, "connection failed");
                        break;
                    },
                },
                Some(next) = outbound.recv() => match next {
                    Outbound::Frame(bytes) => {
                        if let Err(e) = transport.send(bytes).await {
                            tracing::debug!(connection, error = %e, "send failed");
                            break;
                        }
                    },
                    Outbound::Close(code) => {
                        tracing::debug!(connection, code = code.code(), "closing connection");
                        transport.close(code).await;
                        break;
                    },
                },
            }
        }

        self.with_hub(|hub| {
            hub.outboxes.remove(&connection);
            let actions = hub.state.disconnect(connection);
            hub.route(actions);
        });
    }
}
