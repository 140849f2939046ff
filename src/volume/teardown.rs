use tracing::{debug, info, warn};

use crate::client::ArrayClient;
use crate::error::ArrayError;
use crate::transport::Transport;
use crate::types::VolumeId;

/// Prefix of the name a volume is given before it is torn down.
pub const DELETION_MARKER_PREFIX: &str = "_DEL";

/// Name marking volume `id` as being torn down, so concurrent discovery by
/// name no longer finds it.
#[must_use]
pub fn deletion_marker(id: &VolumeId) -> String {
    format!("{DELETION_MARKER_PREFIX}{id}")
}

impl<T: Transport> ArrayClient<T> {
    /// Tears volume `id` down in strict order: mark it for deletion, remove
    /// it from every storage group, release its tracks, then delete it.
    ///
    /// Marking and group removal run best-effort. Deallocation only runs
    /// once the volume has left every group, and the delete only runs when
    /// deallocation succeeded too.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::NotFound`] when the volume does not exist (so a
    /// repeated teardown fails), and [`ArrayError::Teardown`] listing every
    /// failure when any step failed.
    pub async fn teardown_volume(&self, id: &VolumeId) -> Result<(), ArrayError> {
        let volume = self.get_volume(id).await?;
        info!(volume = %id, groups = volume.storage_groups.len(), "tearing down volume");
        if volume.has_snapshot_relationship() {
            warn!(volume = %id, "volume has snapshot relationships, the delete may be refused");
        }
        let mut errors = Vec::new();

        let marker = deletion_marker(id);
        if volume.volume_identifier.as_deref() == Some(marker.as_str()) {
            debug!(volume = %id, "volume already carries deletion marker");
        } else if let Err(err) = self.rename_volume(id, &marker).await {
            warn!(volume = %id, error = %err, "failed to mark volume for deletion");
            errors.push(err);
        }

        let mut detached = true;
        for group in &volume.storage_groups {
            match self.remove_from_group(group, id).await {
                Ok(()) => debug!(volume = %id, group = %group, "removed volume from group"),
                Err(err) if err.is_not_found() => {
                    debug!(volume = %id, group = %group, "storage group already gone");
                }
                Err(err) => {
                    warn!(volume = %id, group = %group, error = %err, "failed to remove volume from group");
                    detached = false;
                    errors.push(err);
                }
            }
        }

        let deallocated = if detached {
            match self.deallocate_volume(id).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(volume = %id, error = %err, "failed to deallocate volume");
                    errors.push(err);
                    false
                }
            }
        } else {
            warn!(volume = %id, "volume still in a storage group, keeping its tracks");
            false
        };

        let deleted = if detached && deallocated {
            match self.delete_volume(id).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(volume = %id, error = %err, "failed to delete volume");
                    errors.push(err);
                    false
                }
            }
        } else {
            warn!(volume = %id, "skipping delete after failed teardown steps");
            false
        };

        if errors.is_empty() {
            info!(volume = %id, "volume torn down");
            Ok(())
        } else {
            Err(ArrayError::Teardown {
                resource: format!("volume {id}"),
                deleted,
                errors,
            })
        }
    }
}
