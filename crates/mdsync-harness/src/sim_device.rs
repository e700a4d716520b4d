//! Simulated device: a [`Link`] over turmoil TCP backed by a [`MemoryStore`].

use std::{sync::Arc, time::Duration};

use mdsync_client::{
    Collaborators, Link, LinkConfig, LinkError, LinkEvent, LinkHandle, StreamTransport,
    config::DEFAULT_CHANNEL_CAPACITY,
};
use mdsync_core::{Environment, Session};
use mdsync_crypto::DeviceGroupSecret;
use tokio::{sync::mpsc, task::JoinHandle};
use turmoil::net::TcpStream;

use crate::{BlobServer, MemoryStore, SimEnv};

/// Address devices connect to.
pub const MEDIATOR_ADDR: &str = "mediator:4443";

/// Address the mediator binds.
pub const MEDIATOR_BIND_ADDR: &str = "0.0.0.0:4443";

/// Interval of [`wait_until`] polls.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Error of a simulated device.
#[derive(Debug, Clone)]
pub struct SimDeviceError(pub String);

impl std::fmt::Display for SimDeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDeviceError: {}", self.0)
    }
}

impl std::error::Error for SimDeviceError {}

/// Poll `condition` in virtual time until it holds.
///
/// # Errors
///
/// `SimDeviceError` naming `what` if `deadline` passed first.
pub async fn wait_until(
    env: &SimEnv,
    deadline: Duration,
    what: &str,
    mut condition: impl FnMut() -> bool,
) -> Result<(), SimDeviceError> {
    let started = env.now();
    while !condition() {
        if env.now() - started >= deadline {
            return Err(SimDeviceError(format!("timed out waiting for {what}")));
        }
        env.sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

/// One connected device.
pub struct SimDevice {
    /// Device id
    pub device_id: u64,
    /// Device environment
    pub env: SimEnv,
    /// Local state
    pub store: Arc<MemoryStore>,
    /// Collaborators the link dispatches into
    pub collaborators: Collaborators,
    /// Link handle
    pub handle: LinkHandle,
    /// Link events
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
    task: JoinHandle<Result<(), LinkError>>,
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice").field("device_id", &self.device_id).finish_non_exhaustive()
    }
}

impl SimDevice {
    /// Connect to the mediator and start the link. Does not wait for the
    /// handshake.
    ///
    /// # Errors
    ///
    /// The TCP connect error.
    pub async fn connect(
        env: SimEnv,
        device_id: u64,
        secret: &DeviceGroupSecret,
        store: Arc<MemoryStore>,
        blobs: &BlobServer,
        config: LinkConfig,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(MEDIATOR_ADDR).await?;
        let transport = StreamTransport::new(stream, DEFAULT_CHANNEL_CAPACITY);
        let collaborators = store.collaborators(blobs);
        let session = Session::with_secret(device_id, secret);

        let (handle, events, task) =
            Link::spawn(env.clone(), transport, session, collaborators.clone(), config, false);
        tracing::debug!(device_id, "device connecting");

        Ok(Self { device_id, env, store, collaborators, handle, events, task })
    }

    /// Connect and wait for the handshake.
    ///
    /// # Errors
    ///
    /// Connect errors, or the link ending before it was established.
    pub async fn connect_established(
        env: SimEnv,
        device_id: u64,
        secret: &DeviceGroupSecret,
        store: Arc<MemoryStore>,
        blobs: &BlobServer,
        config: LinkConfig,
    ) -> turmoil::Result<Self> {
        let device = Self::connect(env, device_id, secret, store, blobs, config).await?;
        device.handle.wait_established().await?;
        Ok(device)
    }

    /// Next link event, or `None` once the link ended.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Wait for the link task to end on its own.
    ///
    /// # Errors
    ///
    /// `SimDeviceError` if the task panicked.
    pub async fn join(self) -> Result<Result<(), LinkError>, SimDeviceError> {
        self.task.await.map_err(|e| SimDeviceError(e.to_string()))
    }

    /// Close the link normally and wait for it to stop.
    ///
    /// # Errors
    ///
    /// The error the link ended with, if it was not a clean shutdown.
    pub async fn shutdown(self) -> turmoil::Result {
        self.handle.shutdown().await;
        self.join().await??;
        Ok(())
    }
}
