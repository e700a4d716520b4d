//! Deterministic simulation harness for multi-device mediator sync.
//!
//! Turmoil-based mediator and devices with seeded randomness and virtual time,
//! for reproducible end-to-end runs of the device runtime.
//!
//! # Components
//!
//! - [`MediatorState`]: pure mediator (authentication, reflection queues,
//!   transaction lock, leader role); [`SimMediator`] serves it over turmoil TCP
//! - [`SimDevice`]: a device link over turmoil TCP
//! - [`MemoryStore`] / [`BlobServer`]: in-memory collaborators
//! - [`SimEnv`]: seeded environment on tokio's virtual clock
//! - [`run_scenario`]: contact sync across a whole device group

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod mediator;
pub mod memory_store;
pub mod scenario;
pub mod sim_device;
pub mod sim_env;
pub mod sim_mediator;

pub use mediator::{MediatorAction, MediatorConfig, MediatorState};
pub use memory_store::{BlobServer, MemoryStore, Receipt};
pub use scenario::{DeviceSummary, ScenarioConfig, ScenarioReport, run_scenario, scenario_contact};
pub use sim_device::{MEDIATOR_ADDR, MEDIATOR_BIND_ADDR, SimDevice, SimDeviceError, wait_until};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
pub use sim_mediator::SimMediator;
