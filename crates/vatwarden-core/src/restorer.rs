use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::capability::Capability;
use crate::errors::{RestorerError, StoreError};

/// Store key of the persisted vat id.
pub const VAT_ID_KEY: &str = "vat_id";
/// Store key of the persisted listen port.
pub const PORT_KEY: &str = "port";

/// Opaque, persistable token that can be exchanged for a live capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SturdyRef(String);

impl SturdyRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SturdyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network identity of this vat as presented to resolvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatDescription {
    pub host: String,
    pub port: u16,
    pub base64_vat_id: String,
    pub identity_proof: String,
}

/// Issues and resolves sturdy refs for the capabilities served by this vat.
#[async_trait]
pub trait Restorer: Send + Sync {
    /// Exports `capability`, reusing `fixed_token` when given.
    async fn export(
        &self,
        capability: Arc<dyn Capability>,
        fixed_token: Option<&str>,
    ) -> Result<SturdyRef, RestorerError>;

    /// Looks up the capability behind a token issued by [`export`].
    ///
    /// [`export`]: Restorer::export
    fn restore(&self, token: &str) -> Option<Arc<dyn Capability>>;

    fn self_description(&self) -> Result<VatDescription, RestorerError>;

    fn port(&self) -> u16;

    fn set_port(&self, port: u16);

    /// Adopts the vat id persisted in `store` (persisting the current one if
    /// none is stored yet) and, when `restore_port` is set, the stored port.
    async fn attach_store(
        &self,
        store: Arc<dyn VatStateStore>,
        restore_port: bool,
    ) -> Result<(), RestorerError>;
}

/// Key/value container the restorer persists vat state into.
#[async_trait]
pub trait VatStateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Process-local [`VatStateStore`].
#[derive(Debug, Default)]
pub struct MemoryVatStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryVatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VatStateStore for MemoryVatStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
