//! Volume lifecycle: creation inside a storage group, expansion, rename,
//! group membership, track deallocation, deletion and ordered teardown.

mod teardown;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::client::{ArrayClient, Subject, parse};
use crate::error::ArrayError;
use crate::listing::{dedup_preserving_order, ids_from_body};
use crate::transport::{ApiRequest, Transport};
use crate::types::{ArrayId, VolumeId};

pub use teardown::{DELETION_MARKER_PREFIX, deletion_marker};

const VOLUME_KIND: &str = "volume";
const GROUP_KIND: &str = "storage group";

/// RDF group membership reported on a volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeRdfGroup {
    /// RDF group number.
    pub rdf_group_number: u32,
    /// Group label, when reported.
    #[serde(default)]
    pub label: Option<String>,
}

/// Volume attributes inspected by the lifecycle.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Volume {
    /// Array-assigned device identifier.
    #[serde(rename = "volumeId")]
    pub volume_id: VolumeId,
    /// Volume name, when one is set.
    #[serde(default)]
    pub volume_identifier: Option<String>,
    /// Capacity in GB.
    #[serde(default)]
    pub cap_gb: f64,
    /// Storage groups the volume belongs to.
    #[serde(rename = "storageGroupId", default)]
    pub storage_groups: Vec<String>,
    /// Whether the volume is the source of a snapshot.
    #[serde(default)]
    pub snapvx_source: bool,
    /// Whether the volume is linked as a snapshot target.
    #[serde(default)]
    pub snapvx_target: bool,
    /// RDF groups the volume is paired through.
    #[serde(rename = "rdfGroupId", default)]
    pub rdf_groups: Vec<VolumeRdfGroup>,
    /// Device type, for example `TDEV` or `RDF1+TDEV`.
    #[serde(rename = "type", default)]
    pub volume_type: Option<String>,
}

impl Volume {
    /// Returns `true` when the volume takes part in remote replication.
    #[must_use]
    pub fn is_rdf_member(&self) -> bool {
        !self.rdf_groups.is_empty()
            || self
                .volume_type
                .as_deref()
                .is_some_and(|kind| kind.starts_with("RDF"))
    }

    /// Returns `true` when the volume has an active snapshot relationship.
    #[must_use]
    pub const fn has_snapshot_relationship(&self) -> bool {
        self.snapvx_source || self.snapvx_target
    }
}

/// Remote side of a protected storage group, attached to membership changes
/// so the array mirrors them on the partner.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RemoteGroup<'a> {
    pub(crate) array: &'a ArrayId,
    pub(crate) group: &'a str,
    pub(crate) force: bool,
}

impl RemoteGroup<'_> {
    fn payload(self) -> Value {
        json!({
            "remote_symmetrix_1_id": self.array,
            "remote_symmetrix_1_sgs": [self.group],
            "force": self.force,
        })
    }
}

fn with_remote(mut param: Value, remote: Option<RemoteGroup<'_>>) -> Value {
    if let (Some(remote_group), Some(object)) = (remote, param.as_object_mut()) {
        object.insert(String::from("remoteSymmSGInfoParam"), remote_group.payload());
    }
    param
}

fn group_edit(action: Value) -> Value {
    json!({
        "editStorageGroupActionParam": action,
        "executionOption": "ASYNCHRONOUS",
    })
}

fn volume_edit(action: Value) -> Value {
    json!({
        "editVolumeActionParam": action,
        "executionOption": "ASYNCHRONOUS",
    })
}

fn identifier(name: &str) -> Value {
    json!({
        "identifier_name": name,
        "volumeIdentifierChoice": "identifier_name",
    })
}

fn require_name(name: &str) -> Result<(), ArrayError> {
    if name.trim().is_empty() {
        return Err(ArrayError::Validation(String::from(
            "volume name must not be empty",
        )));
    }
    Ok(())
}

impl<T: Transport> ArrayClient<T> {
    fn volume_path(&self, id: &VolumeId) -> String {
        self.provisioning_path(&format!("volume/{id}"))
    }

    fn group_path(&self, group: &str) -> String {
        self.provisioning_path(&format!("storagegroup/{group}"))
    }

    /// Fetches one volume.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume does not exist.
    pub async fn get_volume(&self, id: &VolumeId) -> Result<Volume, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.volume_path(id)),
                &Subject::new(VOLUME_KIND, id),
            )
            .await?;
        parse("volume", body)
    }

    /// Lists volume identifiers, optionally filtered by name and storage
    /// group. Duplicates are removed; order follows the array.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`ArrayError::UnexpectedResponse`] when
    /// the listing has an unexpected shape.
    pub async fn find_volume_ids(
        &self,
        name: Option<&str>,
        group: Option<&str>,
    ) -> Result<Vec<VolumeId>, ArrayError> {
        let mut request = ApiRequest::get(self.provisioning_path("volume"));
        if let Some(volume_name) = name {
            request = request.with_query("volume_identifier", volume_name);
        }
        if let Some(group_name) = group {
            request = request.with_query("storageGroupId", group_name);
        }
        let body = self
            .fetch(request, &Subject::new(VOLUME_KIND, name.unwrap_or("*")))
            .await?;
        let ids = ids_from_body(&body, "volumeId")?
            .into_iter()
            .map(VolumeId::from)
            .collect();
        Ok(dedup_preserving_order(ids))
    }

    /// Lists the identifiers of volumes called `name`.
    ///
    /// # Errors
    ///
    /// See [`Self::find_volume_ids`].
    pub async fn find_volume_ids_by_name(&self, name: &str) -> Result<Vec<VolumeId>, ArrayError> {
        self.find_volume_ids(Some(name), None).await
    }

    /// Creates a volume called `name` of `size_gb` GB inside `group` and
    /// returns its identity.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Validation`] for an empty name, a zero size, or
    /// when several volumes carry the name afterwards, and
    /// [`ArrayError::VolumeNotFound`] when the created volume cannot be found.
    pub async fn create_in_group(
        &self,
        group: &str,
        name: &str,
        size_gb: u32,
    ) -> Result<VolumeId, ArrayError> {
        self.create_volume_in(group, name, size_gb, None).await
    }

    pub(crate) async fn create_volume_in(
        &self,
        group: &str,
        name: &str,
        size_gb: u32,
        remote: Option<RemoteGroup<'_>>,
    ) -> Result<VolumeId, ArrayError> {
        require_name(name)?;
        if size_gb == 0 {
            return Err(ArrayError::Validation(format!(
                "volume {name} must be at least 1 GB"
            )));
        }
        info!(group, volume = name, size_gb, "creating volume in storage group");
        let add = with_remote(
            json!({
                "emulation": "FBA",
                "create_new_volumes": true,
                "volumeAttributes": [{
                    "num_of_vols": 1,
                    "volume_size": size_gb.to_string(),
                    "capacityUnit": "GB",
                    "volumeIdentifier": identifier(name),
                }],
            }),
            remote,
        );
        let body = group_edit(json!({ "expandStorageGroupParam": { "addVolumeParam": add } }));
        self.execute(
            ApiRequest::put(self.group_path(group), body),
            &Subject::new(GROUP_KIND, group),
        )
        .await?;

        let ids = self.find_volume_ids(Some(name), Some(group)).await?;
        match ids.as_slice() {
            [] => Err(ArrayError::VolumeNotFound {
                name: name.to_owned(),
                group: group.to_owned(),
            }),
            [id] => {
                debug!(group, volume = name, id = %id, "created volume resolved");
                Ok(id.clone())
            }
            many => Err(ArrayError::Validation(format!(
                "{} volumes named {name} in storage group {group}: {}",
                many.len(),
                many.iter()
                    .map(VolumeId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Adds existing volumes to `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist and any
    /// job failure reported by the array.
    pub async fn add_to_group(&self, group: &str, ids: &[VolumeId]) -> Result<(), ArrayError> {
        self.add_volumes_to(group, ids, None).await
    }

    pub(crate) async fn add_volumes_to(
        &self,
        group: &str,
        ids: &[VolumeId],
        remote: Option<RemoteGroup<'_>>,
    ) -> Result<(), ArrayError> {
        info!(group, count = ids.len(), "adding volumes to storage group");
        let add = with_remote(json!({ "volumeId": ids }), remote);
        let body = group_edit(json!({ "expandStorageGroupParam": { "addSpecificVolumeParam": add } }));
        self.execute(
            ApiRequest::put(self.group_path(group), body),
            &Subject::new(GROUP_KIND, group),
        )
        .await?;
        Ok(())
    }

    /// Removes volume `id` from `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the group does not exist and any
    /// job failure reported by the array.
    pub async fn remove_from_group(&self, group: &str, id: &VolumeId) -> Result<(), ArrayError> {
        self.remove_volumes_from(group, std::slice::from_ref(id), None)
            .await
    }

    pub(crate) async fn remove_volumes_from(
        &self,
        group: &str,
        ids: &[VolumeId],
        remote: Option<RemoteGroup<'_>>,
    ) -> Result<(), ArrayError> {
        info!(group, count = ids.len(), "removing volumes from storage group");
        let remove = with_remote(json!({ "volumeId": ids }), remote);
        let body = group_edit(json!({ "removeVolumeParam": remove }));
        self.execute(
            ApiRequest::put(self.group_path(group), body),
            &Subject::new(GROUP_KIND, group),
        )
        .await?;
        Ok(())
    }

    /// Renames volume `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Validation`] for an empty name and
    /// [`ArrayError::NotFound`] when the volume does not exist.
    pub async fn rename_volume(&self, id: &VolumeId, name: &str) -> Result<(), ArrayError> {
        require_name(name)?;
        info!(volume = %id, name, "renaming volume");
        let body = volume_edit(json!({
            "modifyVolumeIdentifierParam": { "volumeIdentifier": identifier(name) },
        }));
        self.execute(
            ApiRequest::put(self.volume_path(id), body),
            &Subject::new(VOLUME_KIND, id),
        )
        .await?;
        Ok(())
    }

    /// Grows volume `id` to `new_size_gb` GB and checks the reported
    /// capacity afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Validation`] when `new_size_gb` does not exceed
    /// the current capacity (no modification is sent), and
    /// [`ArrayError::SizeMismatch`] when the array reports a different
    /// capacity after the expansion.
    pub async fn expand_volume(&self, id: &VolumeId, new_size_gb: u32) -> Result<(), ArrayError> {
        let current = self.get_volume(id).await?;
        let requested = f64::from(new_size_gb);
        if requested <= current.cap_gb {
            return Err(ArrayError::Validation(format!(
                "volume {id} is {} GB; expansion to {new_size_gb} GB must grow it",
                current.cap_gb
            )));
        }
        info!(volume = %id, from_gb = current.cap_gb, to_gb = new_size_gb, "expanding volume");
        let body = volume_edit(json!({
            "expandVolumeParam": {
                "volumeAttribute": {
                    "volume_size": new_size_gb.to_string(),
                    "capacityUnit": "GB",
                },
            },
        }));
        self.execute(
            ApiRequest::put(self.volume_path(id), body),
            &Subject::new(VOLUME_KIND, id),
        )
        .await?;

        let reported = self.get_volume(id).await?.cap_gb;
        #[expect(
            clippy::float_cmp,
            reason = "whole-GB capacities are exactly representable"
        )]
        let matches = reported == requested;
        if matches {
            Ok(())
        } else {
            Err(ArrayError::SizeMismatch {
                volume_id: id.clone(),
                requested: new_size_gb,
                reported,
            })
        }
    }

    /// Releases the physical tracks of volume `id`. A benign "already in the
    /// requested state" failure counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume does not exist and any
    /// non-benign job failure.
    pub async fn deallocate_volume(&self, id: &VolumeId) -> Result<(), ArrayError> {
        info!(volume = %id, "deallocating volume tracks");
        let body = volume_edit(json!({ "freeVolumeParam": { "free_volume": true } }));
        self.execute_tolerating_benign(
            ApiRequest::put(self.volume_path(id), body),
            &Subject::new(VOLUME_KIND, id),
        )
        .await?;
        Ok(())
    }

    /// Deletes volume `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume does not exist.
    pub async fn delete_volume(&self, id: &VolumeId) -> Result<(), ArrayError> {
        info!(volume = %id, "deleting volume");
        self.execute(
            ApiRequest::delete(self.volume_path(id)),
            &Subject::new(VOLUME_KIND, id),
        )
        .await?;
        Ok(())
    }
}
