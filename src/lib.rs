//! Core library for the `arrayctl` storage array client.
//!
//! The crate drives a block-storage array through its REST management API.
//! An [`ArrayClient`] wraps a [`Transport`] and exposes idempotent
//! provisioning of storage groups, hosts, port groups and masking views,
//! the volume lifecycle (create → expand → teardown), snapshots, and remote
//! replication between two arrays. Requests the array defers as jobs are
//! polled to completion before an operation returns.

pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod listing;
pub mod provisioning;
pub mod replication;
pub mod snapshot;
pub mod test_support;
pub mod transport;
pub mod types;
pub mod volume;

pub use client::{ArrayClient, ClientSettings};
pub use config::{ArrayConfig, ConfigError};
pub use error::ArrayError;
pub use job::{BenignFailures, JobRecord, JobStatus};
pub use provisioning::{
    Host, HostSpec, MaskingView, MaskingViewSpec, PortGroup, PortGroupSpec, PortKey,
    Provisionable, StorageGroup, StorageGroupSpec,
};
pub use replication::{
    DevicePairInfo, RdfGroup, ReplicationAction, ReplicationMode, StorageGroupRdfState,
};
pub use snapshot::{GenerationInfo, LinkedDevice, SnapshotAction, SnapshotInfo};
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, HttpTransportSettings, Method, Transport,
    TransportError, TransportFuture,
};
pub use types::{ArrayId, JobId, VolumeId};
pub use volume::{Volume, VolumeRdfGroup};
