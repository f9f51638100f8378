// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Standalone Worker binary: fetches its [`UserData`](batchfleet_common::UserData)
//! from the Object Store, registers, runs the claim loop alongside a
//! heartbeat task, then deregisters.

use batchfleet_common::config::ConfigLoader;
use batchfleet_common::shutdown::shutdown_signal;
use batchfleet_common::{RunId, UserData, WorkerId};
use batchfleet_coordination::fleet::process::ProcessFleet;
use batchfleet_coordination::objects::retrying::RetryingObjectStore;
use batchfleet_coordination::objects::s3::S3ObjectStore;
use batchfleet_coordination::store::redis::RedisCoordinationStore;
use batchfleet_coordination::ObjectStore;
use batchfleet_worker::{claim, config::parallelism, heartbeat, Environment, WorkerConfig};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "batchfleet-worker")]
struct Args {
    #[arg(long)]
    run_id: String,
    #[arg(long)]
    bucket: String,
    #[arg(long)]
    coordination_endpoint: String,
    #[arg(long, default_value_t = 6379)]
    coordination_port: u16,
    #[arg(long, default_value = "worker.toml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config: WorkerConfig = match ConfigLoader::new(&args.config, "BATCHFLEET_WORKER").load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let log_capture = config.tracing.init();

    let run_id = match args.run_id.parse::<uuid::Uuid>() {
        Ok(uuid) => RunId(uuid),
        Err(e) => {
            eprintln!("invalid run id {}: {e}", args.run_id);
            return ExitCode::FAILURE;
        }
    };

    let objects: Arc<dyn ObjectStore> = Arc::new(RetryingObjectStore::new(
        Arc::new(S3ObjectStore::new(args.bucket.clone()).await),
        config.retries.clone(),
    ));
    let user_data: UserData = match objects.get(&UserData::object_key(run_id)).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(user_data) => user_data,
            Err(e) => {
                eprintln!("malformed user data: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            eprintln!("failed to fetch user data: {e}");
            return ExitCode::FAILURE;
        }
    };

    let coordination = match RedisCoordinationStore::connect(
        &args.coordination_endpoint,
        args.coordination_port,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to coordination store");
            return ExitCode::FAILURE;
        }
    };
    let fleet = Arc::new(ProcessFleet::new("/bin/sh"));
    let id = WorkerId(worker_id());

    let env = Environment::new(id, user_data, config, coordination, fleet, objects);

    // Process-level shutdown drains in-flight CS transactions by letting
    // `run` exit on its own terms; a losing `run` future leaves whatever
    // sub-workers it had spawned to finish their current claimed item,
    // and we still attempt a best-effort deregister so the Manager's stall
    // detector isn't left waiting on a worker that is already gone.
    tokio::select! {
        result = run(&env, &log_capture) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, worker = %env.id, "worker failed");
                ExitCode::FAILURE
            }
        },
        () = shutdown_signal() => {
            warn!(worker = %env.id, "shutting down, deregistering best-effort");
            if let Err(e) = claim::deregister(&env, &log_capture.contents()).await {
                error!(error = %e, worker = %env.id, "failed to deregister on shutdown");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    env: &Environment,
    log_capture: &batchfleet_common::LogCapture,
) -> Result<(), batchfleet_worker::WorkerError> {
    claim::register(env).await?;

    let logical_cpus = num_cpus();
    let p = parallelism(logical_cpus, &env.user_data);

    let scratch_dir = std::env::temp_dir().join(format!("batchfleet-worker-{}", env.id));

    let heartbeat_env = env.clone();
    let heartbeat_handle = tokio::spawn(async move { heartbeat::run(&heartbeat_env).await });

    let claim_result = claim::claim_loop(env, p, &scratch_dir).await;

    heartbeat_handle.abort();

    claim::deregister(env, &log_capture.contents()).await?;

    claim_result.map(|_| ())
}

fn num_cpus() -> u32 {
    sysinfo::System::new_all().cpus().len().max(1) as u32
}

/// `<hostname>-<short-uuid>`: the hostname ties a `WorkerId` back to the
/// launched instance for operator debugging, the uuid suffix keeps it
/// unique if the Cloud Fleet ever reuses a hostname across instances.
fn worker_id() -> String {
    let host = gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string());
    let suffix = uuid::Uuid::new_v4().to_string();
    format!("{host}-{}", &suffix[..8])
}
