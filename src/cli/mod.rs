//! Command-line interface definitions for the `arrayctl` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `arrayctl` binary.
#[derive(Debug, Parser)]
#[command(
    name = "arrayctl",
    about = "Provision storage groups and volumes on a block-storage array",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Inspect asynchronous jobs.
    #[command(subcommand)]
    Job(JobCommand),
    /// Manage storage groups.
    #[command(subcommand, name = "sg")]
    StorageGroup(StorageGroupCommand),
    /// Inspect and tear down volumes.
    #[command(subcommand)]
    Volume(VolumeCommand),
}

/// Subcommands of `arrayctl job`.
#[derive(Debug, Subcommand)]
pub(crate) enum JobCommand {
    /// Print the current record of a job.
    Show {
        /// Job identifier.
        job_id: String,
    },
    /// Wait for a job to finish and print its final record.
    Wait {
        /// Job identifier.
        job_id: String,
    },
}

/// Subcommands of `arrayctl sg`.
#[derive(Debug, Subcommand)]
pub(crate) enum StorageGroupCommand {
    /// Print a storage group.
    Show {
        /// Storage group name.
        name: String,
    },
    /// Create a storage group unless one with the same name exists.
    ///
    /// An existing group is printed unchanged, even when its pool or service
    /// level differ from the flags.
    Create {
        /// Storage group name.
        name: String,
        /// Storage resource pool; omit for a non-managed group.
        #[arg(long, value_name = "SRP")]
        srp: Option<String>,
        /// Service level, for example `Diamond`.
        #[arg(long, value_name = "SLO", requires = "srp")]
        slo: Option<String>,
        /// Workload type.
        #[arg(long, value_name = "WORKLOAD", requires = "slo")]
        workload: Option<String>,
    },
    /// Delete a storage group.
    Delete {
        /// Storage group name.
        name: String,
        /// Succeed when the group does not exist.
        #[arg(long)]
        if_exists: bool,
    },
}

/// Subcommands of `arrayctl volume`.
#[derive(Debug, Subcommand)]
pub(crate) enum VolumeCommand {
    /// List volume identifiers.
    List {
        /// Only volumes with this name.
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Only volumes in this storage group.
        #[arg(long, value_name = "GROUP")]
        group: Option<String>,
    },
    /// Remove a volume from its groups, release its tracks and delete it.
    Teardown {
        /// Volume identifier, for example `0012A`.
        volume_id: String,
    },
}
