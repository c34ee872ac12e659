use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Id, name and description of one exported capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl IdentityRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// Record with a fresh random id.
    pub fn generated(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), name, description)
    }
}

/// Something that carries a mutable [`IdentityRecord`].
pub trait Identifiable: Send + Sync {
    fn identity(&self) -> IdentityRecord;

    fn set_identity(&self, record: IdentityRecord);
}

/// Interior-mutable holder capabilities embed to implement [`Identifiable`].
#[derive(Debug)]
pub struct IdentityCell {
    record: RwLock<IdentityRecord>,
}

impl IdentityCell {
    pub fn new(record: IdentityRecord) -> Self {
        Self {
            record: RwLock::new(record),
        }
    }

    pub fn get(&self) -> IdentityRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, record: IdentityRecord) {
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = record;
    }

    pub fn id(&self) -> String {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone()
    }
}

impl Identifiable for IdentityCell {
    fn identity(&self) -> IdentityRecord {
        self.get()
    }

    fn set_identity(&self, record: IdentityRecord) {
        self.replace(record);
    }
}
