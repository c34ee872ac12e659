use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::admin::Admin;
use crate::errors::CallError;
use crate::identity::Identifiable;

/// A remotely invokable object served by the vat.
///
/// The transport adapter resolves a sturdy ref to a capability and forwards
/// the method name and JSON params of each inbound request to [`call`].
///
/// [`call`]: Capability::call
#[async_trait]
pub trait Capability: Identifiable {
    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError>;

    /// Services that want heartbeat pass-through return themselves here.
    fn as_administrable(&self) -> Option<&dyn Administrable> {
        None
    }
}

/// Optional interface for services that keep a back-reference to the admin.
pub trait Administrable: Send + Sync {
    fn attach_admin(&self, admin: Weak<Admin>);
}

/// Back-reference to the [`Admin`] held by an administrable service.
#[derive(Default)]
pub struct AdminLink {
    admin: RwLock<Weak<Admin>>,
}

impl AdminLink {
    pub fn attach(&self, admin: Weak<Admin>) {
        *self.admin.write().unwrap_or_else(PoisonError::into_inner) = admin;
    }

    pub fn admin(&self) -> Option<Arc<Admin>> {
        self.admin
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Counts as a heartbeat on the admin, if one is attached.
    pub fn refresh_timeout(&self) {
        if let Some(admin) = self.admin() {
            admin.heartbeat();
        }
    }
}

/// Decodes call params, treating a missing payload as `null`.
pub fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, CallError> {
    Ok(serde_json::from_value(params)?)
}
