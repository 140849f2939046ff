//! Binary entry point for the `arrayctl` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use arrayctl::{
    ArrayClient, ArrayConfig, ArrayError, HttpTransport, JobId, StorageGroup, StorageGroupSpec,
    VolumeId,
};

mod cli;

use cli::{Cli, JobCommand, StorageGroupCommand, VolumeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Array(#[from] ArrayError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .try_init()
        .ok();
}

fn connect() -> Result<ArrayClient<HttpTransport>, CliError> {
    let config =
        ArrayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    Ok(ArrayClient::from_config(&config)?)
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let client = connect()?;
    match cli {
        Cli::Job(command) => run_job(&client, command).await,
        Cli::StorageGroup(command) => run_storage_group(&client, command).await,
        Cli::Volume(command) => run_volume(&client, command).await,
    }
}

async fn run_job(client: &ArrayClient<HttpTransport>, command: JobCommand) -> Result<(), CliError> {
    match command {
        JobCommand::Show { job_id } => print_json(&client.get_job(&JobId::new(job_id)).await?),
        JobCommand::Wait { job_id } => print_json(
            &client
                .wait_on_job_completion(&JobId::new(job_id))
                .await?,
        ),
    }
}

async fn run_storage_group(
    client: &ArrayClient<HttpTransport>,
    command: StorageGroupCommand,
) -> Result<(), CliError> {
    match command {
        StorageGroupCommand::Show { name } => {
            print_json(&client.get_resource::<StorageGroup>(&name).await?)
        }
        StorageGroupCommand::Create {
            name,
            srp,
            slo,
            workload,
        } => {
            let spec = StorageGroupSpec { srp, slo, workload };
            print_json(&client.create_or_get::<StorageGroup>(&name, &spec).await?)
        }
        StorageGroupCommand::Delete { name, if_exists } => {
            let deleted = if if_exists {
                client.delete_if_exists::<StorageGroup>(&name).await?
            } else {
                client.delete_resource::<StorageGroup>(&name).await?;
                true
            };
            print_json(&json!({ "storageGroupId": name, "deleted": deleted }))
        }
    }
}

async fn run_volume(
    client: &ArrayClient<HttpTransport>,
    command: VolumeCommand,
) -> Result<(), CliError> {
    match command {
        VolumeCommand::List { name, group } => print_json(
            &client
                .find_volume_ids(name.as_deref(), group.as_deref())
                .await?,
        ),
        VolumeCommand::Teardown { volume_id } => {
            let id = VolumeId::new(volume_id);
            client.teardown_volume(&id).await?;
            print_json(&json!({ "volumeId": id, "deleted": true }))
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
