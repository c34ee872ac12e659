//! Host side of a vatwarden vat: configuration, the JSON-RPC transport and
//! the adapters the core control plane runs against.

pub mod config;
pub mod peer;
pub mod restorer;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod telemetry;

pub use config::{AppConfig, ConfigError, TelemetrySection};
pub use peer::RemotePeerLink;
pub use restorer::LocalRestorer;
pub use rpc::JsonRpcTransport;
pub use services::VatInfoService;
pub use shutdown::{ProcessTerminator, watch_signals};
