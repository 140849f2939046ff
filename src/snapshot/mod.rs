//! Point-in-time snapshots of source volumes.
//!
//! A snapshot is identified by its name and source volume. Each new snapshot
//! with the same name becomes generation 0 and pushes older generations up
//! by one, so generation 0 is always the newest. Every modification targets
//! one generation.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::client::{ArrayClient, Subject, parse};
use crate::error::ArrayError;
use crate::listing::{dedup_preserving_order, ids_from_body};
use crate::transport::{ApiRequest, Transport};
use crate::types::VolumeId;

const SNAPSHOT_KIND: &str = "snapshot";

/// Change applied to one snapshot generation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotAction {
    /// Present the generation on target volumes.
    Link {
        /// Target volumes.
        targets: Vec<VolumeId>,
        /// Whether to copy the data to the targets in the background.
        copy: bool,
    },
    /// Remove the presentation from target volumes.
    Unlink {
        /// Target volumes.
        targets: Vec<VolumeId>,
    },
    /// Rename the snapshot. Affects every generation.
    Rename {
        /// New snapshot name.
        new_name: String,
    },
    /// Restore the sources to the generation's contents.
    Restore,
}

impl SnapshotAction {
    const fn verb(&self) -> &'static str {
        match self {
            Self::Link { .. } => "Link",
            Self::Unlink { .. } => "Unlink",
            Self::Rename { .. } => "Rename",
            Self::Restore => "Restore",
        }
    }
}

/// Summary of a snapshot on one source volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    /// Snapshot name.
    pub snapshot_name: String,
    /// Source volume.
    pub device_name: VolumeId,
    /// Number of generations held.
    #[serde(default)]
    pub generation_count: u32,
}

/// A target volume linked to a snapshot generation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDevice {
    /// Linked target volume.
    pub target_device: VolumeId,
    /// Whether the link is active.
    #[serde(default)]
    pub linked: bool,
    /// Whether the link copies data in the background.
    #[serde(default)]
    pub copy: bool,
    /// Whether every track has been defined on the target.
    #[serde(default)]
    pub defined: bool,
}

/// Details of one snapshot generation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInfo {
    /// Snapshot name.
    pub snapshot_name: String,
    /// Source volume.
    pub device_name: VolumeId,
    /// Generation number; 0 is the newest.
    pub generation: u32,
    /// Creation time as reported by the array.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Targets currently linked to this generation.
    #[serde(default)]
    pub linked_devices: Vec<LinkedDevice>,
}

impl GenerationInfo {
    /// Returns `true` when `target` is linked to this generation.
    #[must_use]
    pub fn is_linked_to(&self, target: &VolumeId) -> bool {
        self.linked_devices
            .iter()
            .any(|device| &device.target_device == target && device.linked)
    }
}

fn device_list(ids: &[VolumeId]) -> Value {
    Value::Array(ids.iter().map(|id| json!({ "name": id })).collect())
}

fn require_snapshot_args(name: &str, sources: &[VolumeId]) -> Result<(), ArrayError> {
    if name.trim().is_empty() {
        return Err(ArrayError::Validation(String::from(
            "snapshot name must not be empty",
        )));
    }
    if sources.is_empty() {
        return Err(ArrayError::Validation(format!(
            "snapshot {name} needs at least one source volume"
        )));
    }
    Ok(())
}

fn require_targets(name: &str, targets: &[VolumeId]) -> Result<(), ArrayError> {
    if targets.is_empty() {
        return Err(ArrayError::Validation(format!(
            "snapshot {name} link changes need at least one target volume"
        )));
    }
    Ok(())
}

impl<T: Transport> ArrayClient<T> {
    fn snapshot_path(&self, name: &str) -> String {
        self.replication_path(&format!("snapshot/{name}"))
    }

    fn generation_path(&self, name: &str, generation: u32) -> String {
        self.replication_path(&format!("snapshot/{name}/generation/{generation}"))
    }

    fn source_snapshot_path(&self, source: &VolumeId, tail: &str) -> String {
        self.replication_path(&format!("volume/{source}/snapshot{tail}"))
    }

    /// Creates a snapshot called `name` of `sources`, optionally expiring
    /// after `ttl_hours`. The new snapshot is generation 0.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Validation`] for an empty name or source list,
    /// and any job failure reported by the array.
    pub async fn create_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        ttl_hours: Option<u32>,
    ) -> Result<(), ArrayError> {
        require_snapshot_args(name, sources)?;
        info!(snapshot = name, sources = sources.len(), ?ttl_hours, "creating snapshot");
        let mut body = json!({
            "deviceNameListSource": device_list(sources),
            "executionOption": "ASYNCHRONOUS",
        });
        if let (Some(hours), Some(object)) = (ttl_hours, body.as_object_mut()) {
            object.insert(String::from("timeToLive"), json!(hours));
            object.insert(String::from("timeInHours"), json!(true));
        }
        self.execute(
            ApiRequest::post(self.snapshot_path(name), body),
            &Subject::new(SNAPSHOT_KIND, name),
        )
        .await?;
        Ok(())
    }

    /// Lists the names of snapshots taken of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume does not exist.
    pub async fn list_snapshot_names(&self, source: &VolumeId) -> Result<Vec<String>, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.source_snapshot_path(source, "")),
                &Subject::new("volume", source),
            )
            .await?;
        Ok(dedup_preserving_order(ids_from_body(&body, "snapshotName")?))
    }

    /// Fetches the summary of snapshot `name` on `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when no such snapshot exists.
    pub async fn get_snapshot_info(
        &self,
        name: &str,
        source: &VolumeId,
    ) -> Result<SnapshotInfo, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.source_snapshot_path(source, &format!("/{name}"))),
                &Subject::new(SNAPSHOT_KIND, name),
            )
            .await?;
        parse("snapshot", body)
    }

    /// Lists the generation numbers of snapshot `name` on `source`, ascending
    /// and without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when no such snapshot exists.
    pub async fn get_snapshot_generations(
        &self,
        name: &str,
        source: &VolumeId,
    ) -> Result<Vec<u32>, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.source_snapshot_path(source, &format!("/{name}/generation"))),
                &Subject::new(SNAPSHOT_KIND, name),
            )
            .await?;
        let mut generations = ids_from_body(&body, "generation")?
            .iter()
            .map(|raw| {
                raw.parse::<u32>().map_err(|err| {
                    ArrayError::unexpected("snapshot generations", format!("{raw:?}: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        generations.sort_unstable();
        generations.dedup();
        Ok(generations)
    }

    /// Fetches one generation of snapshot `name` on `source`, including its
    /// linked targets.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the generation does not exist.
    pub async fn get_generation_info(
        &self,
        name: &str,
        source: &VolumeId,
        generation: u32,
    ) -> Result<GenerationInfo, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(
                    self.source_snapshot_path(source, &format!("/{name}/generation/{generation}")),
                ),
                &Subject::new(SNAPSHOT_KIND, name),
            )
            .await?;
        parse("snapshot generation", body)
    }

    /// Applies `action` to `generation` of snapshot `name` on `sources`.
    ///
    /// Renaming a snapshot to its current name sends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::Validation`] for empty names, sources or
    /// targets, [`ArrayError::NotFound`] when the snapshot does not exist, and
    /// any job failure reported by the array.
    pub async fn modify_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
        action: &SnapshotAction,
    ) -> Result<(), ArrayError> {
        require_snapshot_args(name, sources)?;
        let mut body = json!({
            "deviceNameListSource": device_list(sources),
            "action": action.verb(),
            "generation": generation,
            "executionOption": "ASYNCHRONOUS",
        });
        let extra = match action {
            SnapshotAction::Link { targets, copy } => {
                require_targets(name, targets)?;
                json!({ "deviceNameListTarget": device_list(targets), "copy": copy })
            }
            SnapshotAction::Unlink { targets } => {
                require_targets(name, targets)?;
                json!({ "deviceNameListTarget": device_list(targets) })
            }
            SnapshotAction::Rename { new_name } => {
                if new_name.trim().is_empty() {
                    return Err(ArrayError::Validation(String::from(
                        "new snapshot name must not be empty",
                    )));
                }
                if new_name == name {
                    debug!(snapshot = name, "rename to current name is a no-op");
                    return Ok(());
                }
                json!({ "newsnapshotname": new_name })
            }
            SnapshotAction::Restore => json!({}),
        };
        if let (Some(object), Value::Object(additions)) = (body.as_object_mut(), extra) {
            object.extend(additions);
        }
        info!(snapshot = name, generation, action = action.verb(), "modifying snapshot");
        self.execute(
            ApiRequest::put(self.generation_path(name, generation), body),
            &Subject::new(SNAPSHOT_KIND, name),
        )
        .await?;
        Ok(())
    }

    /// Links `generation` of snapshot `name` to `targets`.
    ///
    /// # Errors
    ///
    /// See [`Self::modify_snapshot`].
    pub async fn link_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
        targets: &[VolumeId],
        copy: bool,
    ) -> Result<(), ArrayError> {
        let action = SnapshotAction::Link {
            targets: targets.to_vec(),
            copy,
        };
        self.modify_snapshot(name, sources, generation, &action)
            .await
    }

    /// Unlinks `generation` of snapshot `name` from `targets`.
    ///
    /// # Errors
    ///
    /// See [`Self::modify_snapshot`].
    pub async fn unlink_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
        targets: &[VolumeId],
    ) -> Result<(), ArrayError> {
        let action = SnapshotAction::Unlink {
            targets: targets.to_vec(),
        };
        self.modify_snapshot(name, sources, generation, &action)
            .await
    }

    /// Renames snapshot `name` to `new_name`.
    ///
    /// # Errors
    ///
    /// See [`Self::modify_snapshot`].
    pub async fn rename_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
        new_name: &str,
    ) -> Result<(), ArrayError> {
        let action = SnapshotAction::Rename {
            new_name: new_name.to_owned(),
        };
        self.modify_snapshot(name, sources, generation, &action)
            .await
    }

    /// Restores `sources` from `generation` of snapshot `name`.
    ///
    /// # Errors
    ///
    /// See [`Self::modify_snapshot`].
    pub async fn restore_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
    ) -> Result<(), ArrayError> {
        self.modify_snapshot(name, sources, generation, &SnapshotAction::Restore)
            .await
    }

    /// Deletes `generation` of snapshot `name` on `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the generation does not exist
    /// and any job failure reported by the array.
    pub async fn delete_snapshot(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
    ) -> Result<(), ArrayError> {
        require_snapshot_args(name, sources)?;
        info!(snapshot = name, generation, "deleting snapshot generation");
        let body = json!({
            "deviceNameListSource": device_list(sources),
            "generation": generation,
            "executionOption": "ASYNCHRONOUS",
        });
        self.execute(
            ApiRequest::delete(self.generation_path(name, generation)).with_body(body),
            &Subject::new(SNAPSHOT_KIND, name),
        )
        .await?;
        Ok(())
    }

    /// Links `generation` of snapshot `name` to `targets`, runs `step`, and
    /// unlinks again whether or not `step` succeeded.
    ///
    /// # Errors
    ///
    /// Returns the link error when linking fails (`step` does not run). When
    /// exactly one of `step` and the unlink fails, that error is returned;
    /// when both fail, [`ArrayError::Teardown`] carries both.
    pub async fn link_for_operation<F, Fut, R>(
        &self,
        name: &str,
        sources: &[VolumeId],
        generation: u32,
        targets: &[VolumeId],
        step: F,
    ) -> Result<R, ArrayError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, ArrayError>> + Send,
        R: Send,
    {
        self.link_snapshot(name, sources, generation, targets, false)
            .await?;
        let outcome = step().await;
        let unlinked = self
            .unlink_snapshot(name, sources, generation, targets)
            .await;
        match (outcome, unlinked) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(step_err), Ok(())) => Err(step_err),
            (Ok(_), Err(unlink_err)) => {
                warn!(snapshot = name, generation, error = %unlink_err, "unlink after operation failed");
                Err(unlink_err)
            }
            (Err(step_err), Err(unlink_err)) => {
                warn!(snapshot = name, generation, error = %unlink_err, "unlink after failed operation failed");
                Err(ArrayError::Teardown {
                    resource: format!("link of snapshot {name} generation {generation}"),
                    deleted: false,
                    errors: vec![step_err, unlink_err],
                })
            }
        }
    }
}
