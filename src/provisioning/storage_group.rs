use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Provisionable;

/// Named container of volumes sharing a provisioning policy.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StorageGroup {
    /// Storage group name.
    #[serde(rename = "storageGroupId")]
    pub storage_group_id: String,
    /// Storage resource pool; absent for non-managed groups.
    #[serde(default)]
    pub srp: Option<String>,
    /// Service level; absent for non-managed groups.
    #[serde(default)]
    pub slo: Option<String>,
    /// Workload type, when set.
    #[serde(default)]
    pub workload: Option<String>,
    /// Number of member volumes.
    #[serde(default)]
    pub num_of_vols: u32,
    /// Total capacity in GB.
    #[serde(default)]
    pub cap_gb: f64,
    /// Masking views the group participates in.
    #[serde(rename = "maskingview", default)]
    pub masking_views: Vec<String>,
    /// `Some(false)` when the group is bound to an RDF group.
    #[serde(default)]
    pub unprotected: Option<bool>,
}

impl StorageGroup {
    /// Returns `true` when the group carries a remote replication binding.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.unprotected == Some(false)
    }

    /// Returns `true` when the group has neither pool nor service level.
    #[must_use]
    pub fn is_non_managed(&self) -> bool {
        self.srp.as_deref().is_none_or(|srp| srp.eq_ignore_ascii_case("none"))
            && self.slo.as_deref().is_none_or(|slo| slo.eq_ignore_ascii_case("none"))
    }
}

/// Attributes for a new storage group. Leave all fields empty for a
/// non-managed group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageGroupSpec {
    /// Storage resource pool.
    pub srp: Option<String>,
    /// Service level.
    pub slo: Option<String>,
    /// Workload type.
    pub workload: Option<String>,
}

impl StorageGroupSpec {
    /// Spec for a group in `srp` at service level `slo`.
    #[must_use]
    pub fn managed(srp: impl Into<String>, slo: impl Into<String>) -> Self {
        Self {
            srp: Some(srp.into()),
            slo: Some(slo.into()),
            workload: None,
        }
    }
}

const NONE: &str = "None";

impl Provisionable for StorageGroup {
    const KIND: &'static str = "storage group";
    const COLLECTION: &'static str = "storagegroup";
    const ID_KEY: &'static str = "storageGroupId";
    type Spec = StorageGroupSpec;

    fn create_payload(name: &str, spec: &Self::Spec) -> Value {
        json!({
            "srpId": spec.srp.as_deref().unwrap_or(NONE),
            "storageGroupId": name,
            "emulation": "FBA",
            "create_empty_storage_group": true,
            "executionOption": "ASYNCHRONOUS",
            "sloBasedStorageGroupParam": [{
                "sloId": spec.slo.as_deref().unwrap_or(NONE),
                "workloadSelection": spec.workload.as_deref().unwrap_or(NONE),
                "volumeAttributes": [{
                    "num_of_vols": 0,
                    "volume_size": "0",
                    "capacityUnit": "GB",
                }],
            }],
        })
    }

    fn name(&self) -> &str {
        &self.storage_group_id
    }
}
