//! End-to-end contact sync scenario.
//!
//! One mediator and `devices` devices in a turmoil simulation. Once every
//! device holds a slot, device 1 creates `contacts` contacts and syncs them
//! through a [`ContactDeltaAccumulator`]. The other devices wait until they
//! applied every contact.

use std::{fmt, sync::Arc, time::Duration};

use mdsync_client::{ContactDeltaAccumulator, DeltaSyncConfig, LinkConfig};
use mdsync_core::{Environment, HandshakeConfig};
use mdsync_crypto::{DeviceGroupKeys, DeviceGroupSecret, device_group_public_key};
use mdsync_proto::sync::Contact;

use crate::{
    BlobServer, MemoryStore, SimDevice, SimEnv, SimMediator,
    mediator::MediatorConfig,
    sim_device::{MEDIATOR_BIND_ADDR, wait_until},
};

/// Scenario parameters.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Devices in the group, at least one
    pub devices: usize,
    /// Contacts created on device 1
    pub contacts: usize,
    /// Seed of every random choice
    pub seed: u64,
    /// Contacts per transaction
    pub chunk_size: usize,
    /// Mediator parameters
    pub mediator: MediatorConfig,
    /// Virtual time each device may wait for the others
    pub deadline: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            devices: 3,
            contacts: 250,
            seed: 0,
            chunk_size: DeltaSyncConfig::default().chunk_size,
            mediator: MediatorConfig::default(),
            deadline: Duration::from_secs(120),
        }
    }
}

/// State of one device after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Device id
    pub device_id: u64,
    /// Contacts stored
    pub contacts: usize,
    /// `ReflectionQueueDry` notifications seen
    pub queue_dry: u32,
}

/// Outcome of [`run_scenario`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Contacts created on device 1
    pub contacts_created: usize,
    /// Per-device state
    pub devices: Vec<DeviceSummary>,
    /// Group leader at the end
    pub leader: Option<u64>,
    /// Reflected envelopes still queued at the mediator
    pub undelivered: usize,
}

impl ScenarioReport {
    /// Every device stores every contact.
    pub fn converged(&self) -> bool {
        self.devices.iter().all(|device| device.contacts == self.contacts_created)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "contacts={} converged={} undelivered={}",
            self.contacts_created,
            self.converged(),
            self.undelivered
        )?;
        for device in &self.devices {
            writeln!(
                f,
                "device {}: contacts={} queue_dry={}",
                device.device_id, device.contacts, device.queue_dry
            )?;
        }
        Ok(())
    }
}

/// Contact created by the scenario. Identities sort in creation order.
pub fn scenario_contact(index: usize) -> Contact {
    let mut contact = Contact::new(format!("C{index:07}"));
    contact.public_key = Some([u8::try_from(index % 251).unwrap_or(0); 32]);
    contact.first_name = Some(format!("Contact {index}"));
    contact
}

/// Run the scenario to completion.
///
/// # Errors
///
/// The first device or mediator failure, including devices that did not
/// converge before the deadline.
pub fn run_scenario(config: &ScenarioConfig) -> turmoil::Result<ScenarioReport> {
    let root = SimEnv::new(config.seed);
    let mut secret = [0u8; 32];
    root.random_bytes(&mut secret);
    let secret = DeviceGroupSecret::new(secret);
    let group_public = device_group_public_key(DeviceGroupKeys::from_secret(&secret).path());

    let mediator = SimMediator::new(root.fork(), config.mediator, group_public);
    let blobs = BlobServer::new();
    let device_count = config.devices.max(1);
    let stores: Vec<Arc<MemoryStore>> =
        (0..device_count).map(|_| Arc::new(MemoryStore::new())).collect();

    let mut sim = turmoil::Builder::new()
        .simulation_duration(config.deadline + Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(1))
        .max_message_latency(Duration::from_millis(5))
        .rng_seed(config.seed)
        .build();

    let server = mediator.clone();
    sim.host("mediator", move || {
        let server = server.clone();
        async move {
            server.bind_and_serve(MEDIATOR_BIND_ADDR).await?;
            Ok(())
        }
    });

    for (index, store) in stores.iter().enumerate() {
        let device_id = u64::try_from(index).unwrap_or(u64::MAX - 1) + 1;
        let device_seed = root.random_u64();
        let run = DeviceRun {
            device_id,
            device_count,
            contacts: config.contacts,
            deadline: config.deadline,
            sync: DeltaSyncConfig { chunk_size: config.chunk_size, ..DeltaSyncConfig::default() },
            secret: secret.clone(),
            store: Arc::clone(store),
            blobs: blobs.clone(),
        };
        sim.client(format!("device-{device_id}"), async move {
            run.execute(SimEnv::new(device_seed)).await
        });
    }

    sim.run()?;

    let devices = stores
        .iter()
        .enumerate()
        .map(|(index, store)| DeviceSummary {
            device_id: u64::try_from(index).unwrap_or(u64::MAX - 1) + 1,
            contacts: store.contacts().len(),
            queue_dry: store.queue_dry_count(),
        })
        .collect();
    let (leader, undelivered) = mediator.inspect(|state| {
        let undelivered = state.device_ids().into_iter().map(|id| state.queued(id)).sum();
        (state.leader(), undelivered)
    });

    Ok(ScenarioReport { contacts_created: config.contacts, devices, leader, undelivered })
}

struct DeviceRun {
    device_id: u64,
    device_count: usize,
    contacts: usize,
    deadline: Duration,
    sync: DeltaSyncConfig,
    secret: DeviceGroupSecret,
    store: Arc<MemoryStore>,
    blobs: BlobServer,
}

impl DeviceRun {
    async fn execute(self, env: SimEnv) -> turmoil::Result {
        let config = LinkConfig {
            handshake: HandshakeConfig {
                device_label: format!("device-{}", self.device_id),
                ..HandshakeConfig::default()
            },
            ..LinkConfig::default()
        };
        let device = SimDevice::connect_established(
            env.clone(),
            self.device_id,
            &self.secret,
            Arc::clone(&self.store),
            &self.blobs,
            config,
        )
        .await?;

        if self.device_id == 1 {
            self.create_and_sync(&env, &device).await?;
        } else {
            let store = Arc::clone(&self.store);
            let expected = self.contacts;
            wait_until(&env, self.deadline, "contacts", move || store.contacts().len() >= expected)
                .await?;
        }

        // Let the last acknowledgements go out before closing.
        env.sleep(Duration::from_millis(200)).await;
        tracing::info!(device_id = self.device_id, "device done");
        device.shutdown().await
    }

    async fn create_and_sync(&self, env: &SimEnv, device: &SimDevice) -> turmoil::Result {
        let started = env.now();
        loop {
            if device.handle.devices_info().await?.len() >= self.device_count {
                break;
            }
            if env.now() - started >= self.deadline {
                return Err("timed out waiting for devices".into());
            }
            env.sleep(Duration::from_millis(50)).await;
        }

        let accumulator = ContactDeltaAccumulator::new(self.sync);
        for index in 0..self.contacts {
            let contact = scenario_contact(index);
            accumulator.mark_added(&contact.identity);
            self.store.insert_contact(contact);
        }

        tracing::info!(pending = accumulator.len(), "syncing contacts");
        accumulator.sync(env, &device.handle, &device.collaborators).await?;
        Ok(())
    }
}
