//! Device runtime for multi-device mediator sync.
//!
//! Drives the [`mdsync_core`] state machines over a real transport and
//! connects them to the application through boundary traits.
//!
//! # Architecture
//!
//! ```text
//!   Transport ──▶ Link task ──▶ OrderedExecutor ──▶ Dispatcher ──▶ handlers
//!       ▲            │                                               │
//!       │            ▼                                               ▼
//!       └──── LinkHandle ◀── outbound tasks ◀── delta accumulators   MessageApplier
//! ```
//!
//! # Components
//!
//! - [`Link`]: owns one mediator connection; [`LinkHandle`] talks to it
//! - [`Dispatcher`]: applies reflected envelopes at most once
//! - [`ContactDeltaAccumulator`] / [`GroupDeltaAccumulator`]: batch local
//!   changes into chunked transactions
//! - [`outbound`]: envelope builders for local changes
//! - [`boundary`]: persistence, blob, call and observer traits
//! - [`Transport`]: frame transports ([`ChannelTransport`],
//!   [`StreamTransport`])

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod boundary;
pub mod config;
pub mod delta;
pub mod dispatcher;
mod error;
mod handlers;
pub mod link;
mod ordered;
pub mod outbound;
mod system_env;
pub mod transport;

pub use boundary::{
    AppliedContent, AppliedMessage, ApplyContext, BlobOrigin, BlobStore, CallEvent,
    CallPayload, CallSignalling, Collaborators, ContactPictures, EntityId, EntityObserver,
    MessageApplier, NoopObserver, PictureChange, PictureOwner,
};
pub use config::{DeltaSyncConfig, DispatchConfig, LinkConfig};
pub use delta::{
    PictureMarker, SyncAction,
    contacts::{ContactDelta, ContactDeltaAccumulator},
    groups::{GroupDelta, GroupDeltaAccumulator},
};
pub use dispatcher::{DispatchOutcome, Dispatcher, ordering_keys};
pub use error::{LinkError, StoreError, SyncError};
pub use link::{Link, LinkEvent, LinkHandle, LinkedDevice};
pub use mdsync_core::{Environment, MemoryNonceGuard, NonceGuard, Session};
pub use outbound::MediatorLink;
pub use system_env::SystemEnv;
pub use transport::{ChannelTransport, StreamTransport, Transport};
