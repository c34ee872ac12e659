//! Remote registrars, resolvers and vat-state containers reached through
//! `jrpc://` and `sqlite:` sturdy refs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use vatwarden_core::{
    ExportedService, IdentityRecord, PeerError, PeerLink, Registrar, Registration,
    RemoteHeartbeat, Resolver, ResolverBinding, SturdyRef, UnregisterAction, VatRegistration,
    VatStateStore,
};
use vatwarden_db::SqliteVatStore;
use vatwarden_wire::{DEFAULT_CALL_TIMEOUT, Endpoint, WireError, call, probe};

/// Prefix of container tokens backed by a local SQLite file.
pub const SQLITE_SCHEME: &str = "sqlite:";

/// Params of a registrar's `register` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServiceParams {
    /// Sturdy ref of the advertised capability, absent when it isn't served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub identity: IdentityRecord,
    pub reg_name: String,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServiceResult {
    /// Sturdy ref whose `unregister` method withdraws the advertisement.
    pub unregister: String,
    pub reregister: String,
}

/// Params of a resolver's `register` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVatParams {
    pub host: String,
    pub port: u16,
    pub base64_vat_id: String,
    pub identity_proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVatResult {
    /// Sturdy ref whose `beat` method keeps the binding alive.
    pub heartbeat: String,
    pub secs_heartbeat_interval: u64,
}

/// [`PeerLink`] over the JSON-RPC wire. A peer counts as reachable when its
/// endpoint parses and accepts a TCP connection.
pub struct RemotePeerLink {
    call_timeout: Duration,
}

impl RemotePeerLink {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    async fn reach(&self, token: &str) -> Option<RemoteRef> {
        let endpoint = match Endpoint::parse(token) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(error = %err, "cannot reach peer");
                return None;
            }
        };
        if !probe(&endpoint, self.call_timeout).await {
            debug!(%endpoint, "peer did not accept a connection");
            return None;
        }
        Some(RemoteRef {
            endpoint,
            timeout: self.call_timeout,
        })
    }
}

impl Default for RemotePeerLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerLink for RemotePeerLink {
    async fn reach_registrar(&self, token: &str) -> Option<Arc<dyn Registrar>> {
        let remote = self.reach(token).await?;
        Some(Arc::new(remote))
    }

    async fn reach_resolver(&self, token: &str) -> Option<Arc<dyn Resolver>> {
        let remote = self.reach(token).await?;
        Some(Arc::new(remote))
    }

    async fn reach_store(&self, token: &str) -> Option<Arc<dyn VatStateStore>> {
        let Some(path) = token.strip_prefix(SQLITE_SCHEME) else {
            warn!(sturdy_ref = token, "unsupported container sturdy ref");
            return None;
        };
        match SqliteVatStore::open(path) {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                warn!(path, error = %err, "cannot open vat state container");
                None
            }
        }
    }
}

/// A capability on another vat.
#[derive(Debug, Clone)]
struct RemoteRef {
    endpoint: Endpoint,
    timeout: Duration,
}

impl RemoteRef {
    fn from_sturdy_ref(sturdy_ref: &str, timeout: Duration) -> Result<Self, PeerError> {
        let endpoint =
            Endpoint::parse(sturdy_ref).map_err(|err| PeerError::Protocol(err.to_string()))?;
        Ok(Self { endpoint, timeout })
    }

    async fn invoke<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, PeerError> {
        let result = call(&self.endpoint, method, params, self.timeout)
            .await
            .map_err(peer_error)?;
        serde_json::from_value(result).map_err(|err| PeerError::Protocol(err.to_string()))
    }
}

fn peer_error(err: WireError) -> PeerError {
    match err {
        WireError::Remote { message, .. } => PeerError::Rejected(message),
        WireError::Io(_) | WireError::Closed | WireError::Timeout(_) => {
            PeerError::Unreachable(err.to_string())
        }
        WireError::InvalidEndpoint(_)
        | WireError::Malformed(_)
        | WireError::FrameTooLarge(_)
        | WireError::IdMismatch { .. } => {
            PeerError::Protocol(err.to_string())
        }
    }
}

fn to_params<T: Serialize>(params: &T) -> Result<Value, PeerError> {
    serde_json::to_value(params).map_err(|err| PeerError::Protocol(err.to_string()))
}

#[async_trait]
impl Registrar for RemoteRef {
    async fn register(
        &self,
        service: &ExportedService,
        reg_name: &str,
        category_id: &str,
    ) -> Result<Registration, PeerError> {
        let params = to_params(&RegisterServiceParams {
            service: service.sturdy_ref.as_ref().map(SturdyRef::to_string),
            identity: service.capability.identity(),
            reg_name: reg_name.to_string(),
            category_id: category_id.to_string(),
        })?;
        let result: RegisterServiceResult = self.invoke("register", params).await?;
        let unregister = Self::from_sturdy_ref(&result.unregister, self.timeout)?;
        Ok(Registration {
            unregister: Arc::new(unregister),
            reregistration: SturdyRef::new(result.reregister),
        })
    }
}

#[async_trait]
impl UnregisterAction for RemoteRef {
    async fn unregister(&self) -> Result<(), PeerError> {
        self.invoke::<Value>("unregister", Value::Null).await.map(drop)
    }
}

#[async_trait]
impl Resolver for RemoteRef {
    async fn register(&self, registration: VatRegistration) -> Result<ResolverBinding, PeerError> {
        let params = to_params(&RegisterVatParams {
            host: registration.host,
            port: registration.port,
            base64_vat_id: registration.base64_vat_id,
            identity_proof: registration.identity_proof,
            alias: registration.alias,
        })?;
        let result: RegisterVatResult = self.invoke("register", params).await?;
        let heartbeat = Self::from_sturdy_ref(&result.heartbeat, self.timeout)?;
        Ok(ResolverBinding {
            heartbeat: Arc::new(heartbeat),
            interval: Duration::from_secs(result.secs_heartbeat_interval),
        })
    }
}

#[async_trait]
impl RemoteHeartbeat for RemoteRef {
    async fn beat(&self) -> Result<(), PeerError> {
        self.invoke::<Value>("beat", Value::Null).await.map(drop)
    }
}
