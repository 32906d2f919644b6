use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResourceId;
use crate::auth::principal::Principal;
use crate::path::Path;

/// A soft-deleted resource kept in the trash can of its former parent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecoverableResource {
    pub id: String,
    pub resource_id: ResourceId,
    pub parent_id: ResourceId,
    pub name: String,
    pub uri: Path,
    pub deleted_by: Principal,
    pub deleted_time: DateTime<Utc>,
    pub was_inherited_acl: bool,
    pub collection: bool,
    pub resource_type: String,
}

impl RecoverableResource {
    pub fn trash_id(resource_id: ResourceId) -> String {
        format!("trash-{}", resource_id)
    }

    /// Whether the record is older than `retention_days` at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>, retention_days: u32) -> bool {
        now.signed_duration_since(self.deleted_time) > chrono::Duration::days(retention_days as i64)
    }
}
