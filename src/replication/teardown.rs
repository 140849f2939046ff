use tracing::{info, warn};

use crate::client::ArrayClient;
use crate::error::ArrayError;
use crate::transport::Transport;
use crate::types::VolumeId;
use crate::volume::RemoteGroup;

impl<T: Transport> ArrayClient<T> {
    /// Tears down a replicated volume and its partner.
    ///
    /// The pair is looked up first and the teardown stops there when none
    /// exists. The volume is then removed from the protected group on both
    /// sides, after which the local volume and the partner volume (through
    /// `remote`) are each torn down best-effort. On failure the error's
    /// `deleted` flag reflects the local volume and its resource names the
    /// partner's fate.
    ///
    /// # Errors
    ///
    /// Returns [`ArrayError::PairNotFound`] when the volume has no pair in
    /// `rdf_group_no`, [`ArrayError::Validation`] when `remote` manages a
    /// different array than the pair's partner, the removal error when the
    /// volume cannot be unpaired, and [`ArrayError::Teardown`] listing every
    /// deletion failure.
    pub async fn teardown_protected_volume<R: Transport>(
        &self,
        remote: &ArrayClient<R>,
        rdf_group_no: u32,
        local_group: &str,
        remote_group: &str,
        volume_id: &VolumeId,
    ) -> Result<(), ArrayError> {
        let pair = match self.get_device_pair_info(rdf_group_no, volume_id).await {
            Ok(pair) => pair,
            Err(err) if err.is_not_found() => {
                return Err(ArrayError::PairNotFound {
                    volume_id: volume_id.clone(),
                    rdf_group: rdf_group_no,
                });
            }
            Err(err) => return Err(err),
        };
        if &pair.remote_symmetrix_id != remote.array_id() {
            return Err(ArrayError::Validation(format!(
                "volume {volume_id} is paired with array {}, not {}",
                pair.remote_symmetrix_id,
                remote.array_id()
            )));
        }
        info!(
            volume = %volume_id,
            remote_volume = %pair.remote_volume_name,
            rdf_group = rdf_group_no,
            "tearing down replicated volume"
        );

        let partner = RemoteGroup {
            array: remote.array_id(),
            group: remote_group,
            force: true,
        };
        self.remove_volumes_from(local_group, std::slice::from_ref(volume_id), Some(partner))
            .await?;

        let mut errors = Vec::new();
        let local_deleted = settle(self.teardown_volume(volume_id).await, &mut errors);
        let remote_deleted = settle(
            remote.teardown_volume(&pair.remote_volume_name).await,
            &mut errors,
        );

        if errors.is_empty() {
            info!(volume = %volume_id, "replicated volume torn down");
            Ok(())
        } else {
            warn!(
                volume = %volume_id,
                remote_volume = %pair.remote_volume_name,
                local_deleted,
                remote_deleted,
                "replicated volume teardown incomplete"
            );
            Err(ArrayError::Teardown {
                resource: format!(
                    "replicated volume {volume_id} (partner {} {})",
                    pair.remote_volume_name,
                    if remote_deleted { "deleted" } else { "kept" }
                ),
                deleted: local_deleted,
                errors,
            })
        }
    }
}

/// Records a failed volume teardown and reports whether the volume is gone.
fn settle(result: Result<(), ArrayError>, errors: &mut Vec<ArrayError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            let deleted = matches!(err, ArrayError::Teardown { deleted: true, .. });
            errors.push(err);
            deleted
        }
    }
}
