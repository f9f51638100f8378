// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Standalone Manager binary wiring the reference implementations
//! (Redis coordination store, S3 object store, process-local fleet) into
//! [`batchfleet_manager`]. Jobs with bespoke `getPoints`/`combine` logic
//! embed the library in their own binary instead.

use batchfleet_common::config::ConfigLoader;
use batchfleet_common::shutdown::shutdown_signal;
use batchfleet_common::{RunId, WorkItem};
use batchfleet_coordination::fleet::process::ProcessFleet;
use batchfleet_coordination::objects::retrying::RetryingObjectStore;
use batchfleet_coordination::objects::s3::S3ObjectStore;
use batchfleet_coordination::store::redis::RedisCoordinationStore;
use batchfleet_coordination::ObjectStore;
use batchfleet_manager::{aggregator, supervisor, ConcatCombine, Environment, ManagerConfig};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "batchfleet-manager")]
struct Args {
    #[arg(long, default_value = "manager.toml")]
    config: PathBuf,
    /// JSON file containing the seed work items (the default `getPoints`
    /// producer; a job with a programmatic producer embeds the library
    /// instead of using this binary).
    #[arg(long)]
    items: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config: ManagerConfig = match ConfigLoader::new(&args.config, "BATCHFLEET_MANAGER").load()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let log_capture = config.tracing.init();

    let run_id = config
        .run_id
        .as_deref()
        .and_then(|id| id.parse::<uuid::Uuid>().ok())
        .map(RunId)
        .unwrap_or_default();

    let items: Vec<WorkItem> = match std::fs::read(&args.items)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
    {
        Ok(items) => items,
        Err(e) => {
            eprintln!("failed to read seed items from {:?}: {e}", args.items);
            return ExitCode::FAILURE;
        }
    };

    let coordination = match RedisCoordinationStore::connect(
        &config.coordination_endpoint,
        config.coordination_port,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to coordination store");
            return ExitCode::FAILURE;
        }
    };
    let objects: Arc<dyn ObjectStore> = Arc::new(RetryingObjectStore::new(
        Arc::new(S3ObjectStore::new(config.bucket.clone()).await),
        config.retries.clone(),
    ));
    let fleet = Arc::new(ProcessFleet::new("/bin/sh"));

    let env = Environment::new(run_id, config, coordination, fleet, objects);

    // Process-level shutdown drains in-flight CS transactions by simply
    // letting `run` exit on its own terms when raced against the signal;
    // only the best-effort manager log upload is a side effect of the
    // signal winning.
    tokio::select! {
        result = run(&env, items, &log_capture) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, run_id = %env.run_id, "run failed");
                ExitCode::from(e.exit_code() as u8)
            }
        },
        () = shutdown_signal() => {
            warn!(run_id = %env.run_id, "shutting down, uploading manager log best-effort");
            if let Err(e) = env
                .objects
                .put(
                    &format!("results/{}_manager.log", env.run_id),
                    Bytes::from(log_capture.contents()),
                )
                .await
            {
                error!(error = %e, "failed to upload manager log on shutdown");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(
    env: &Environment,
    items: Vec<WorkItem>,
    log_capture: &batchfleet_common::LogCapture,
) -> Result<(), batchfleet_manager::ManagerError> {
    let item_count = items.len();
    let run = supervisor::seed(env, items).await?;
    info!(run_id = %env.run_id, fleet = run.fleet.len(), "seeded run");

    supervisor::supervise(env, item_count).await?;

    let scratch_dir = std::env::temp_dir().join(format!("batchfleet-{}", env.run_id));
    aggregator::finalize(
        env,
        &ConcatCombine,
        &scratch_dir,
        &run.fleet,
        &log_capture.contents(),
    )
    .await
}
