//! Registration-and-liveness control plane of a capability-serving vat.
//!
//! The transport, restorer, peer connections and persisted vat state are
//! ports ([`Transport`], [`Restorer`], [`PeerLink`], [`VatStateStore`]);
//! adapters live in the other workspace crates.

pub mod admin;
pub mod bootstrap;
pub mod capability;
pub mod config;
pub mod errors;
pub mod heartbeat;
pub mod identity;
pub mod peer;
pub mod registration;
pub mod registry;
pub mod resolver;
pub mod restorer;
pub mod time;
pub mod transport;

pub use admin::{Admin, AdminSettings, ExitReason, StopState, Terminator};
pub use bootstrap::{RunningService, ServiceBootstrap};
pub use capability::{AdminLink, Administrable, Capability};
pub use config::{RegistryEntry, ResolverEntry, ServiceConfig};
pub use errors::{BootstrapError, CallError, PeerError, RestorerError, StoreError, TransportError};
pub use heartbeat::{HeartbeatStatus, HeartbeatTasks};
pub use identity::{Identifiable, IdentityCell, IdentityRecord};
pub use peer::PeerLink;
pub use registration::{AdvertiseReport, BindReport, RegistrationCoordinator};
pub use registry::{ExportedService, Registrar, Registration, UnregisterAction, UnregistrationKey};
pub use resolver::{RemoteHeartbeat, Resolver, ResolverBinding, VatRegistration};
pub use restorer::{MemoryVatStore, Restorer, SturdyRef, VatDescription, VatStateStore};
pub use transport::Transport;
