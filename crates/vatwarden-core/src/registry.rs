use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::capability::Capability;
use crate::errors::PeerError;
use crate::restorer::SturdyRef;

/// A served capability together with the name it is served under.
#[derive(Clone)]
pub struct ExportedService {
    pub name: String,
    pub capability: Arc<dyn Capability>,
    /// Set once the restorer has exported the capability.
    pub sturdy_ref: Option<SturdyRef>,
}

impl ExportedService {
    pub fn new(name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        Self {
            name: name.into(),
            capability,
            sturdy_ref: None,
        }
    }
}

impl fmt::Debug for ExportedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedService")
            .field("name", &self.name)
            .field("sturdy_ref", &self.sturdy_ref)
            .finish_non_exhaustive()
    }
}

/// Discovery registry that capabilities are advertised to.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(
        &self,
        service: &ExportedService,
        reg_name: &str,
        category_id: &str,
    ) -> Result<Registration, PeerError>;
}

/// Handle returned by a registry to undo an advertisement.
#[async_trait]
pub trait UnregisterAction: Send + Sync {
    async fn unregister(&self) -> Result<(), PeerError>;
}

/// Successful registry response.
#[derive(Clone)]
pub struct Registration {
    pub unregister: Arc<dyn UnregisterAction>,
    pub reregistration: SturdyRef,
}

/// Bookkeeping key of one advertisement: the local service and the registry
/// it went to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnregistrationKey {
    pub service: String,
    pub registry: String,
}

impl UnregistrationKey {
    pub fn new(service: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            registry: registry.into(),
        }
    }
}

impl fmt::Display for UnregistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service, self.registry)
    }
}
