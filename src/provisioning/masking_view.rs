use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Provisionable;
use crate::client::{ArrayClient, Subject};
use crate::error::ArrayError;
use crate::listing::ids_from_body;
use crate::transport::{ApiRequest, Transport};

/// Binding of a storage group, host and port group that grants access.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MaskingView {
    /// Masking view name.
    #[serde(rename = "maskingViewId")]
    pub masking_view_id: String,
    /// Host granted access.
    #[serde(rename = "hostId", default)]
    pub host_id: Option<String>,
    /// Ports the access is exposed through.
    #[serde(rename = "portGroupId")]
    pub port_group_id: String,
    /// Volumes exposed.
    #[serde(rename = "storageGroupId")]
    pub storage_group_id: String,
}

/// Referents of a new masking view. All three must already exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaskingViewSpec {
    /// Existing host name.
    pub host: String,
    /// Existing port group name.
    pub port_group: String,
    /// Existing storage group name.
    pub storage_group: String,
}

impl Provisionable for MaskingView {
    const KIND: &'static str = "masking view";
    const COLLECTION: &'static str = "maskingview";
    const ID_KEY: &'static str = "maskingViewId";
    type Spec = MaskingViewSpec;

    fn create_payload(name: &str, spec: &Self::Spec) -> Value {
        json!({
            "maskingViewId": name,
            "hostOrHostGroupSelection": {
                "useExistingHostParam": { "hostId": spec.host },
            },
            "portGroupSelection": {
                "useExistingPortGroupParam": { "portGroupId": spec.port_group },
            },
            "storageGroupSelection": {
                "useExistingStorageGroupParam": { "storageGroupId": spec.storage_group },
            },
            "executionOption": "ASYNCHRONOUS",
        })
    }

    fn name(&self) -> &str {
        &self.masking_view_id
    }
}

impl<T: Transport> ArrayClient<T> {
    /// Lists the masking views that expose `storage_group`.
    ///
    /// # Errors
    ///
    /// Returns transport errors and [`ArrayError::UnexpectedResponse`] when
    /// the listing has an unexpected shape.
    pub async fn list_masking_views_for_storage_group(
        &self,
        storage_group: &str,
    ) -> Result<Vec<String>, ArrayError> {
        let body = self
            .fetch(
                ApiRequest::get(self.provisioning_path(MaskingView::COLLECTION))
                    .with_query("storage_group_name", storage_group),
                &Subject::new(MaskingView::KIND, storage_group),
            )
            .await?;
        ids_from_body(&body, MaskingView::ID_KEY)
    }
}
