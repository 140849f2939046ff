use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Provisionable;
use crate::error::ArrayError;

/// One front-end port, written `director:port` (for example `FA-1D:4`).
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PortKey {
    /// Director identifier.
    #[serde(rename = "directorId")]
    pub director_id: String,
    /// Port number on the director.
    #[serde(rename = "portId")]
    pub port_id: String,
}

impl FromStr for PortKey {
    type Err = ArrayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (director, port) = value
            .split_once(':')
            .filter(|(director, port)| !director.trim().is_empty() && !port.trim().is_empty())
            .ok_or_else(|| {
                ArrayError::Validation(format!("port key {value:?} is not director:port"))
            })?;
        Ok(Self {
            director_id: director.trim().to_owned(),
            port_id: port.trim().to_owned(),
        })
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.director_id, self.port_id)
    }
}

/// A named set of front-end ports.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortGroup {
    /// Port group name.
    #[serde(rename = "portGroupId")]
    pub port_group_id: String,
    /// Member ports.
    #[serde(rename = "symmetrixPortKey", default)]
    pub ports: Vec<PortKey>,
    /// Masking views referencing this port group.
    #[serde(rename = "maskingview", default)]
    pub masking_views: Vec<String>,
}

/// Attributes for a new port group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortGroupSpec {
    /// Member ports.
    pub ports: Vec<PortKey>,
}

impl Provisionable for PortGroup {
    const KIND: &'static str = "port group";
    const COLLECTION: &'static str = "portgroup";
    const ID_KEY: &'static str = "portGroupId";
    type Spec = PortGroupSpec;

    fn create_payload(name: &str, spec: &Self::Spec) -> Value {
        json!({
            "portGroupId": name,
            "symmetrixPortKey": spec.ports,
            "executionOption": "ASYNCHRONOUS",
        })
    }

    fn name(&self) -> &str {
        &self.port_group_id
    }
}
