use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{Value, json};

use vatwarden_core::{
    Admin, AdminLink, Administrable, CallError, Capability, HeartbeatStatus, Identifiable,
    IdentityCell, IdentityRecord, Restorer,
};

use crate::restorer::LocalRestorer;

/// Main service of the stock server: reports on the vat it runs in. Every
/// call counts as a heartbeat on the admin.
pub struct VatInfoService {
    identity: IdentityCell,
    admin: AdminLink,
    restorer: Arc<LocalRestorer>,
}

impl VatInfoService {
    pub fn new(restorer: Arc<LocalRestorer>) -> Arc<Self> {
        Arc::new(Self {
            identity: IdentityCell::new(IdentityRecord::generated(
                "vat-info",
                "Reports identity, exports and resolver heartbeats of this vat",
            )),
            admin: AdminLink::default(),
            restorer,
        })
    }

    fn info(&self) -> Value {
        json!({
            "vatId": self.restorer.base64_vat_id(),
            "port": self.restorer.port(),
            "exports": self.restorer.exported_tokens(),
        })
    }

    fn heartbeats(&self) -> Value {
        let statuses = self
            .admin
            .admin()
            .map(|admin| admin.tasks().statuses())
            .unwrap_or_default();
        Value::Array(statuses.iter().map(status_json).collect())
    }
}

fn status_json(status: &HeartbeatStatus) -> Value {
    json!({
        "resolver": status.resolver,
        "intervalSecs": status.interval.as_secs(),
        "beats": status.beats,
        "failures": status.failures,
        "lastBeatMillis": status.last_beat_millis,
        "finished": status.finished,
    })
}

impl Identifiable for VatInfoService {
    fn identity(&self) -> IdentityRecord {
        self.identity.get()
    }

    fn set_identity(&self, record: IdentityRecord) {
        self.identity.replace(record);
    }
}

impl Administrable for VatInfoService {
    fn attach_admin(&self, admin: Weak<Admin>) {
        self.admin.attach(admin);
    }
}

#[async_trait]
impl Capability for VatInfoService {
    async fn call(&self, method: &str, _params: Value) -> Result<Value, CallError> {
        self.admin.refresh_timeout();
        match method {
            "ping" => Ok(json!("pong")),
            "info" => Ok(self.info()),
            "heartbeats" => Ok(self.heartbeats()),
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }

    fn as_administrable(&self) -> Option<&dyn Administrable> {
        Some(self)
    }
}
