//! Remote replication (RDF) between a local and a partner array.
//!
//! A storage group is protected by binding it to an RDF group and a storage
//! group on the partner; volumes added to or removed from a protected group
//! are paired or unpaired on both sides by the array. Group-level state
//! changes must be issued one at a time per group; this client performs no
//! locking of its own.

mod teardown;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::client::{ArrayClient, Subject, parse};
use crate::error::ArrayError;
use crate::listing::dedup_preserving_order;
use crate::transport::{ApiRequest, Transport};
use crate::types::{ArrayId, VolumeId};
use crate::volume::RemoteGroup;

const RDF_GROUP_KIND: &str = "RDF group";
const SG_REPLICATION_KIND: &str = "storage group replication";

/// Replication mode of a protected storage group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplicationMode {
    /// Writes complete on both arrays before acknowledgement.
    Synchronous,
    /// Writes are shipped to the partner in consistent cycles.
    Asynchronous,
    /// Tracks are copied to the partner in the background.
    AdaptiveCopy,
    /// Both sides are readable and writable (metro).
    Active,
}

impl ReplicationMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synchronous => "Synchronous",
            Self::Asynchronous => "Asynchronous",
            Self::AdaptiveCopy => "Adaptive Copy",
            Self::Active => "Active",
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group-level replication state change.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReplicationAction {
    /// Start copying from local to remote.
    Establish,
    /// Stop copying while keeping the pairing.
    Suspend,
    /// Restart copying after a suspend.
    Resume,
    /// Stop copying and make both sides independently accessible.
    Split,
    /// Move the workload to the remote side.
    Failover,
    /// Return the workload to the local side.
    Failback,
}

impl ReplicationAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Establish => "Establish",
            Self::Suspend => "Suspend",
            Self::Resume => "Resume",
            Self::Split => "Split",
            Self::Failover => "Failover",
            Self::Failback => "Failback",
        }
    }

    const fn parameter_key(self) -> &'static str {
        match self {
            Self::Establish => "establish",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Split => "split",
            Self::Failover => "failover",
            Self::Failback => "failback",
        }
    }

    /// Pair states that show the action has taken effect.
    #[must_use]
    pub const fn target_states(self) -> &'static [&'static str] {
        match self {
            Self::Establish | Self::Resume | Self::Failback => {
                &["Synchronized", "Consistent", "ActiveActive", "ActiveBias"]
            }
            Self::Suspend => &["Suspended"],
            Self::Split => &["Split"],
            Self::Failover => &["Failed Over"],
        }
    }
}

impl fmt::Display for ReplicationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numbered RDF group linking this array to a partner.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RdfGroup {
    /// Local group number.
    pub rdfg_number: u32,
    /// Group label.
    #[serde(default)]
    pub label: Option<String>,
    /// Partner array serial number.
    #[serde(default)]
    pub remote_symmetrix: Option<ArrayId>,
    /// Group number on the partner.
    #[serde(default)]
    pub remote_rdfg_number: Option<u32>,
    /// Number of paired devices.
    #[serde(default)]
    pub num_devices: u32,
    /// Replication modes in use.
    #[serde(default)]
    pub modes: Vec<String>,
}

/// The pairing of one local volume through an RDF group.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePairInfo {
    /// Local volume.
    pub local_volume_name: VolumeId,
    /// Paired volume on the partner.
    pub remote_volume_name: VolumeId,
    /// Partner array serial number.
    pub remote_symmetrix_id: ArrayId,
    /// Pair state, for example `Synchronized`.
    #[serde(rename = "rdfpairState", default)]
    pub pair_state: String,
    /// Replication mode.
    #[serde(default)]
    pub rdf_mode: String,
    /// Local RDF group number.
    #[serde(default)]
    pub local_rdf_group_number: u32,
    /// RDF group number on the partner.
    #[serde(default)]
    pub remote_rdf_group_number: u32,
}

/// Replication state of a protected storage group.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageGroupRdfState {
    /// Storage group name.
    pub storage_group_name: String,
    /// Array reporting the state.
    #[serde(default)]
    pub symmetrix_id: Option<ArrayId>,
    /// RDF group number.
    pub rdf_group_number: u32,
    /// Pair states present in the group.
    #[serde(default)]
    pub states: Vec<String>,
    /// Replication modes present in the group.
    #[serde(default)]
    pub modes: Vec<String>,
}

impl StorageGroupRdfState {
    /// Returns `true` when every reported pair state is one the action
    /// leads to.
    #[must_use]
    pub fn reflects(&self, action: ReplicationAction) -> bool {
        let targets = action.target_states();
        !self.states.is_empty()
            && self.states.iter().all(|state| {
                targets
                    .iter()
                    .any(|target| state.eq_ignore_ascii_case(target))
            })
    }
}

#[derive(Deserialize)]
struct RdfGroupListing {
    #[serde(rename = "rdfGroupID", default)]
    groups: Vec<RdfGroupEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdfGroupEntry {
    rdfg_number: u32,
}

impl<T: Transport> ArrayClient<T> {
    fn sg_rdf_path(&self, group: &str, tail: &str) -> String {
        self.replication_path(&format!("storagegroup/{group}/rdf_group{tail}"))
    }

    /// Binds storage group `group` to `remote_group` on `remote_array`
    /// through RDF group `rdf_group_no` and starts copying.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist and any
    /// job failure reported by the array.
    pub async fn protect_storage_group(
        &self,
        group: &str,
        remote_array: &ArrayId,
        remote_group: &str,
        mode: ReplicationMode,
        rdf_group_no: u32,
    ) -> Result<(), ArrayError> {
        info!(group, remote = %remote_array, rdf_group = rdf_group_no, %mode, "protecting storage group");
        let body = json!({
            "replicationMode": mode.as_str(),
            "remoteSymmId": remote_array,
            "remoteStorageGroupName": remote_group,
            "rdfgNumber": rdf_group_no,
            "establish": true,
            "executionOption": "ASYNCHRONOUS",
        });
        self.execute(
            ApiRequest::post(self.sg_rdf_path(group, ""), body),
            &Subject::new(SG_REPLICATION_KIND, group),
        )
        .await?;
        Ok(())
    }

    /// Fetches the replication state of `group` in RDF group `rdf_group_no`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group is not protected
    /// through that RDF group.
    pub async fn get_storage_group_rdf_state(
        &self,
        group: &str,
        rdf_group_no: u32,
    ) -> Result<StorageGroupRdfState, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.sg_rdf_path(group, &format!("/{rdf_group_no}"))),
                &Subject::new(SG_REPLICATION_KIND, group),
            )
            .await?;
        parse("storage group replication state", body)
    }

    /// Applies `action` to every pair of `group` in RDF group `rdf_group_no`.
    ///
    /// A benign failure (for example "already suspended") is confirmed by
    /// fetching the group state and only counts as success when the state
    /// matches the action's target.
    ///
    /// # Errors
    ///
    /// Returns the array's failure when it is not benign or the observed
    /// state does not confirm it.
    pub async fn execute_replication_action(
        &self,
        action: ReplicationAction,
        group: &str,
        rdf_group_no: u32,
        force: bool,
        star: bool,
    ) -> Result<(), ArrayError> {
        info!(group, rdf_group = rdf_group_no, %action, force, star, "replication action");
        let mut body = json!({
            "action": action.as_str(),
            "executionOption": "ASYNCHRONOUS",
        });
        if let Some(object) = body.as_object_mut() {
            object.insert(
                action.parameter_key().to_owned(),
                json!({ "force": force, "star": star }),
            );
        }
        let request = ApiRequest::put(self.sg_rdf_path(group, &format!("/{rdf_group_no}")), body);
        match self
            .execute(request, &Subject::new(SG_REPLICATION_KIND, group))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if self.settings().benign.matches_error(&err) => {
                let state = self.get_storage_group_rdf_state(group, rdf_group_no).await?;
                if state.reflects(action) {
                    info!(group, %action, states = ?state.states, "benign failure confirmed by state");
                    Ok(())
                } else {
                    warn!(group, %action, states = ?state.states, "benign failure not confirmed by state");
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches RDF group `number`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist.
    pub async fn get_rdf_group(&self, number: u32) -> Result<RdfGroup, ArrayError> {
        let label = number.to_string();
        let body = self
            .fetch(
                ApiRequest::get(self.replication_path(&format!("rdf_group/{number}"))),
                &Subject::new(RDF_GROUP_KIND, &label),
            )
            .await?;
        parse("RDF group", body)
    }

    /// Lists the RDF group numbers configured on this array.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`ArrayError::UnexpectedResponse`] when
    /// the listing has an unexpected shape.
    pub async fn list_rdf_group_numbers(&self) -> Result<Vec<u32>, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.replication_path("rdf_group")),
                &Subject::new(RDF_GROUP_KIND, "*"),
            )
            .await?;
        let listing: RdfGroupListing = parse("RDF group listing", body)?;
        Ok(dedup_preserving_order(
            listing.groups.into_iter().map(|entry| entry.rdfg_number).collect(),
        ))
    }

    /// Fetches the pairing of `volume_id` through RDF group `rdf_group_no`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume has no pair in the
    /// group.
    pub async fn get_device_pair_info(
        &self,
        rdf_group_no: u32,
        volume_id: &VolumeId,
    ) -> Result<DevicePairInfo, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(
                    self.replication_path(&format!("rdf_group/{rdf_group_no}/volume/{volume_id}")),
                ),
                &Subject::new("replication pair", volume_id),
            )
            .await?;
        parse("device pair", body)
    }

    /// Creates volume `name` in the protected `local_group`, paired with a
    /// new volume in `remote_group` on `remote_array`, and returns the local
    /// identity.
    ///
    /// # Errors
    ///
    /// See [`Self::create_in_group`].
    pub async fn create_protected_volume(
        &self,
        remote_array: &ArrayId,
        local_group: &str,
        remote_group: &str,
        name: &str,
        size_gb: u32,
    ) -> Result<VolumeId, ArrayError> {
        let remote = RemoteGroup {
            array: remote_array,
            group: remote_group,
            force: false,
        };
        self.create_volume_in(local_group, name, size_gb, Some(remote))
            .await
    }

    /// Adds existing volumes to the protected `local_group`, pairing them
    /// into `remote_group` on `remote_array`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist and any
    /// job failure reported by the array.
    pub async fn add_volumes_to_protected_group(
        &self,
        local_group: &str,
        remote_array: &ArrayId,
        remote_group: &str,
        ids: &[VolumeId],
        force: bool,
    ) -> Result<(), ArrayError> {
        let remote = RemoteGroup {
            array: remote_array,
            group: remote_group,
            force,
        };
        self.add_volumes_to(local_group, ids, Some(remote)).await
    }

    /// Removes volumes from the protected `local_group` and their partners
    /// from `remote_group` on `remote_array`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist and any
    /// job failure reported by the array.
    pub async fn remove_volumes_from_protected_group(
        &self,
        local_group: &str,
        remote_array: &ArrayId,
        remote_group: &str,
        ids: &[VolumeId],
        force: bool,
    ) -> Result<(), ArrayError> {
        let remote = RemoteGroup {
            array: remote_array,
            group: remote_group,
            force,
        };
        self.remove_volumes_from(local_group, ids, Some(remote))
            .await
    }
}
