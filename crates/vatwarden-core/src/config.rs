use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admin::{AdminSettings, DEFAULT_GRACE_PERIOD};

/// Configuration consumed by the service bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub vat: VatSection,
    #[serde(default)]
    pub admin: AdminSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Token to export the main service under instead of a generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_sturdy_ref_token: Option<String>,

    #[serde(default)]
    pub registries: Vec<RegistryEntry>,

    /// Unregister from every registry before exiting on a stop request.
    #[serde(default)]
    pub unregister_on_stop: bool,
}

/// One discovery registry a service is advertised to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sturdy_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

impl RegistryEntry {
    pub fn new(
        sturdy_ref: impl Into<String>,
        name: impl Into<String>,
        category_id: impl Into<String>,
    ) -> Self {
        Self {
            sturdy_ref: Some(sturdy_ref.into()),
            name: Some(name.into()),
            category_id: Some(category_id.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sturdy_ref.is_none() && self.name.is_none() && self.category_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub serve_bootstrap: bool,
    #[serde(default)]
    pub resolvers: Vec<ResolverEntry>,
    /// Token of the container the vat id and port are persisted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restorer_container_sr: Option<String>,
}

impl Default for VatSection {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            serve_bootstrap: true,
            resolvers: Vec::new(),
            restorer_container_sr: None,
        }
    }
}

/// One name resolver the vat binds its identity with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sturdy_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ResolverEntry {
    pub fn new(sturdy_ref: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            sturdy_ref: Some(sturdy_ref.into()),
            alias,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sturdy_ref.is_none() && self.alias.is_none()
    }

    /// Label used in logs and heartbeat statuses.
    pub fn label(&self) -> String {
        match (&self.alias, &self.sturdy_ref) {
            (Some(alias), _) => alias.clone(),
            (None, Some(token)) => token.clone(),
            (None, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSection {
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings {
            timeout_secs: self.admin.timeout_secs,
            grace_period: Duration::from_secs(self.admin.grace_period_secs),
            unregister_on_stop: self.service.unregister_on_stop,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD.as_secs()
}
