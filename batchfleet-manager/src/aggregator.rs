// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Final aggregation and run teardown (`finalize`). Runs once, after
//! [`crate::supervisor::supervise`] observes `|completed| == |all|`.

use crate::environment::Environment;
use crate::error::ManagerError;
use async_trait::async_trait;
use batchfleet_common::protocol::Key;
use batchfleet_common::SafeDisplay;
use bytes::Bytes;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// User-supplied aggregation hook: combine downloaded partials into a
/// single artifact at `out_path`.
#[async_trait]
pub trait Combine: Send + Sync {
    async fn combine(&self, files: &[PathBuf], out_path: &Path) -> Result<(), String>;
}

fn results_prefix(run_id: batchfleet_common::RunId) -> String {
    format!("results/{run_id}/")
}

/// Steps 1-4: enumerate, download, combine, upload. Returns the final
/// artifact's Object Store key.
#[instrument(skip(env, combine, scratch_dir), fields(run_id = %env.run_id))]
pub async fn aggregate(
    env: &Environment,
    combine: &dyn Combine,
    scratch_dir: &Path,
) -> Result<String, ManagerError> {
    let run_id = env.run_id;
    let prefix = results_prefix(run_id);

    let candidate_keys = env.objects.list(&prefix).await?;
    let partial_keys: Vec<String> = candidate_keys
        .into_iter()
        .filter(|key| {
            env.config
                .file_extensions
                .iter()
                .any(|ext| key.ends_with(&format!(".{ext}")))
        })
        .sorted()
        .collect();

    tokio::fs::create_dir_all(scratch_dir)
        .await
        .map_err(|e| ManagerError::AggregationFailed(e.to_string()))?;

    let downloads = partial_keys.iter().map(|key| async move {
        let bytes = env.objects.get(key).await?;
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let local_path = scratch_dir.join(file_name);
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|e| ManagerError::AggregationFailed(e.to_string()))?;
        Ok::<PathBuf, ManagerError>(local_path)
    });
    let local_files: Vec<PathBuf> = futures::future::try_join_all(downloads).await?;

    let out_path = scratch_dir.join(&env.config.output_file);
    combine
        .combine(&local_files, &out_path)
        .await
        .map_err(ManagerError::AggregationFailed)?;

    let artifact_bytes = tokio::fs::read(&out_path)
        .await
        .map_err(|e| ManagerError::AggregationFailed(e.to_string()))?;
    let artifact_key = format!("results/{run_id}_{}", env.config.output_file);
    env.objects
        .put(&artifact_key, Bytes::from(artifact_bytes))
        .await?;

    for key in &partial_keys {
        env.objects.delete(key).await?;
    }

    info!(artifact_key, partials = local_files.len(), "aggregation complete");
    Ok(artifact_key)
}

/// Step 5: merge every worker log under the run's prefix into one
/// deterministically (timestamp-)ordered log, since every line is prefixed
/// with an ISO timestamp.
#[instrument(skip(env), fields(run_id = %env.run_id))]
pub async fn merge_worker_logs(env: &Environment) -> Result<String, ManagerError> {
    let run_id = env.run_id;
    let prefix = results_prefix(run_id);
    let log_keys: Vec<String> = env
        .objects
        .list(&prefix)
        .await?
        .into_iter()
        .filter(|key| key.ends_with(".log"))
        .sorted()
        .collect();

    let mut lines = Vec::new();
    for key in &log_keys {
        let bytes = env.objects.get(key).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        lines.extend(text.lines().map(str::to_string));
    }
    lines.sort();

    let merged_key = format!("results/{run_id}_workers.log");
    env.objects
        .put(&merged_key, Bytes::from(lines.join("\n")))
        .await?;
    Ok(merged_key)
}

/// `finalize()`: delete the four per-run keys, aggregate, upload manager
/// log, terminate remaining fleet members.
#[instrument(skip(env, combine, scratch_dir, manager_log), fields(run_id = %env.run_id))]
pub async fn finalize(
    env: &Environment,
    combine: &dyn Combine,
    scratch_dir: &Path,
    fleet: &[batchfleet_common::WorkerId],
    manager_log: &str,
) -> Result<(), ManagerError> {
    let run_id = env.run_id;

    for key in Key::ALL_KEYS {
        env.coordination.delete(&key.namespaced(run_id)).await?;
    }

    let aggregation_result = aggregate(env, combine, scratch_dir).await;
    merge_worker_logs(env).await?;

    env.objects
        .put(
            &format!("results/{run_id}_manager.log"),
            Bytes::from(manager_log.to_string()),
        )
        .await?;

    for worker in fleet {
        if let Err(e) = env.fleet.terminate(worker).await {
            warn!(worker = %worker, error = %e.to_safe_string(), "failed to terminate worker during finalize");
        }
    }

    aggregation_result.map(|_| ())
}

/// A byte-concatenation fallback [`Combine`], in declared-key order, for
/// jobs that don't need bespoke merge logic. The standalone
/// `batchfleet-manager` binary uses this by default; a job with real
/// aggregation semantics supplies its own `Combine` by embedding this
/// crate in its own binary instead.
pub struct ConcatCombine;

#[async_trait]
impl Combine for ConcatCombine {
    async fn combine(&self, files: &[PathBuf], out_path: &Path) -> Result<(), String> {
        let mut combined = Vec::new();
        for file in files {
            combined.extend(tokio::fs::read(file).await.map_err(|e| e.to_string())?);
        }
        tokio::fs::write(out_path, combined)
            .await
            .map_err(|e| e.to_string())
    }
}
