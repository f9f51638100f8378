// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Manager operations: `seed`, `supervise`, `finalize`. The sole writer of
//! `all` and the sole evictor of stalled workers; claims and completions
//! are worker-driven.

use crate::environment::Environment;
use crate::error::ManagerError;
use batchfleet_coordination::{optimistic_update, CoordinationStore, LaunchTemplate, Outcome};
use batchfleet_common::model::{InProgress, Run, UserData};
use batchfleet_common::protocol::{decode, encode, Key};
use batchfleet_common::{RunId, WorkItem, WorkerId};
use bytes::Bytes;
use std::collections::HashSet;
use tracing::{info, instrument, warn};

/// Writes the four per-run keys (`all`, `remaining`, empty `completed`,
/// empty `in_progress`) and launches the initial fleet. A `QuotaExceeded`
/// shrinks the fleet rather than failing the run; zero launched workers is
/// fatal (`FleetEmpty`).
#[instrument(skip(env, items), fields(run_id = %env.run_id))]
pub async fn seed(env: &Environment, items: Vec<WorkItem>) -> Result<Run, ManagerError> {
    let run_id = env.run_id;

    env.coordination
        .set(Key::All.namespaced(run_id), encode(&items)?)
        .await?;
    env.coordination
        .set(Key::Remaining.namespaced(run_id), encode(&items)?)
        .await?;
    env.coordination
        .set(
            Key::Completed.namespaced(run_id),
            encode(&Vec::<WorkItem>::new())?,
        )
        .await?;
    env.coordination
        .set(
            Key::InProgress.namespaced(run_id),
            encode(&InProgress::new())?,
        )
        .await?;

    let user_data = build_user_data(env);
    env.objects
        .put(
            &UserData::object_key(run_id),
            Bytes::from(serde_json::to_vec(&user_data).map_err(|e| {
                batchfleet_common::error::ProtocolError::Encode(e.to_string())
            })?),
        )
        .await?;

    let requested = env.config.fleet_size(items.len());
    let template = LaunchTemplate {
        instance_type: env.config.worker_instance_type.clone(),
        user_data: bootstrap_script(&user_data),
    };

    let launched = match env.fleet.launch(&template, requested).await {
        Ok(ids) => ids,
        Err(batchfleet_coordination::FleetError::QuotaExceeded { instance_type }) => {
            warn!(instance_type, requested, "quota exceeded launching initial fleet");
            Vec::new()
        }
        Err(other) => return Err(other.into()),
    };

    if launched.is_empty() {
        return Err(ManagerError::FleetEmpty);
    }

    info!(
        launched = launched.len(),
        requested, "Manager launched {} Instances.", launched.len()
    );

    let mut run = Run::new(run_id, items);
    run.fleet = launched;
    Ok(run)
}

/// The fixed bootstrap script every launched instance runs: fetch this
/// run's [`UserData`] from the Object Store and hand off to the worker
/// binary. The script text itself never varies per worker — only the CLI
/// arguments do — so there is no `{{placeholder}}` substitution (Design
/// Notes: "Template-substituted executable scripts").
fn build_user_data(env: &Environment) -> UserData {
    UserData {
        run_id: env.run_id,
        coordination_endpoint: env.config.coordination_endpoint.clone(),
        coordination_port: env.config.coordination_port,
        bucket: env.config.bucket.clone(),
        entry_point: env.config.entry_point.clone(),
        hyperthread_const: env.config.hyperthread_const.0,
        heartbeat_interval: std::time::Duration::from_secs(15),
        quiescence_cpu_pct: 25.0,
        result_extension: env
            .config
            .file_extensions
            .first()
            .cloned()
            .unwrap_or_else(|| "json".to_string()),
        heartbeat_tracks_claim_loop: env.config.heartbeat_tracks_claim_loop,
    }
}

fn bootstrap_script(user_data: &UserData) -> Vec<u8> {
    format!(
        "batchfleet-worker --run-id {} --bucket {} --coordination-endpoint {} --coordination-port {}\n",
        user_data.run_id, user_data.bucket, user_data.coordination_endpoint, user_data.coordination_port
    )
    .into_bytes()
}

/// Per-tick loop. Returns once `|completed| == |all|`; the caller is
/// responsible for calling [`crate::aggregator::finalize`] afterwards.
#[instrument(skip(env), fields(run_id = %env.run_id))]
pub async fn supervise(env: &Environment, total_items: usize) -> Result<(), ManagerError> {
    let run_id = env.run_id;
    let mut last_in_progress_count = usize::MAX;
    let mut last_completed_count = usize::MAX;
    let mut last_stalled_count = usize::MAX;

    loop {
        let completed: Vec<WorkItem> = read(env, Key::Completed).await?;
        if completed.len() >= total_items {
            info!(completed = completed.len(), "run complete");
            return Ok(());
        }

        let in_progress: InProgress = read(env, Key::InProgress).await?;
        let now = chrono::Utc::now();
        let stalled: Vec<WorkerId> = in_progress
            .iter()
            .filter(|(_, record)| {
                !record.items.is_empty() && record.age(now) > env.config.stall_threshold
            })
            .map(|(id, _)| id.clone())
            .collect();

        for worker in &stalled {
            evict_stalled_worker(env, worker.clone()).await?;
        }

        let in_progress_count: usize = in_progress.values().map(|r| r.items.len()).sum();
        if in_progress_count != last_in_progress_count
            || completed.len() != last_completed_count
            || stalled.len() != last_stalled_count
        {
            info!(
                in_progress = in_progress_count,
                completed = completed.len(),
                stalled = stalled.len(),
                "run status"
            );
            last_in_progress_count = in_progress_count;
            last_completed_count = completed.len();
            last_stalled_count = stalled.len();
        }

        tokio::time::sleep(env.config.tick_interval).await;
    }
}

#[instrument(skip(env), fields(run_id = %env.run_id, worker = %worker))]
async fn evict_stalled_worker(env: &Environment, worker: WorkerId) -> Result<(), ManagerError> {
    env.fleet.terminate(&worker).await?;
    env.fleet.wait_terminated(&worker).await?;

    let run_id = env.run_id;
    let remaining_key = Key::Remaining.namespaced(run_id);
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let keys = vec![remaining_key.clone(), in_progress_key.clone()];

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut remaining: Vec<WorkItem> = decode_or_default(values.get(&remaining_key))?;
        let mut in_progress: InProgress = decode_or_default(values.get(&in_progress_key))?;

        let Some(record) = in_progress.remove(&worker) else {
            return Ok(Outcome::NoOp(()));
        };
        remaining.extend(record.items);

        Ok(Outcome::Commit {
            writes: vec![
                (remaining_key.clone(), encode(&remaining)?),
                (in_progress_key.clone(), encode(&in_progress)?),
            ],
            deletes: vec![],
            result: (),
        })
    })
    .await?;

    warn!("terminated stalled worker and requeued its items");

    match env
        .fleet
        .launch(
            &LaunchTemplate {
                instance_type: env.config.worker_instance_type.clone(),
                user_data: bootstrap_script(&build_user_data(env)),
            },
            1,
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(batchfleet_coordination::FleetError::QuotaExceeded { instance_type }) => {
            warn!(instance_type, "quota exceeded launching replacement worker, continuing without it");
            Ok(())
        }
        Err(other) => Err(other.into()),
    }
}

async fn read<T: serde::de::DeserializeOwned + Default>(
    env: &Environment,
    key: Key,
) -> Result<T, ManagerError> {
    let raw = env.coordination.get(&key.namespaced(env.run_id)).await?;
    Ok(decode_or_default(raw.as_ref())?)
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(
    raw: Option<&Vec<u8>>,
) -> Result<T, batchfleet_common::error::ProtocolError> {
    match raw {
        Some(bytes) => decode(bytes),
        None => Ok(T::default()),
    }
}

/// `⋃_w inProgress[w].items`, used by tests asserting that `all`, `remaining`,
/// `completed`, and in-progress items always partition the work item set.
pub fn points_in_progress(in_progress: &InProgress) -> HashSet<WorkItem> {
    in_progress
        .values()
        .flat_map(|record| record.items.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchfleet_common::Scalar;
    use batchfleet_common::WorkerRecord;
    use std::collections::HashMap;
    use test_r::test;

    #[test]
    fn points_in_progress_flattens_every_worker() {
        let mut in_progress = InProgress::new();
        let mut records = HashMap::new();
        records.insert(
            WorkerId("a".to_string()),
            WorkerRecord {
                items: vec![WorkItem::new([Scalar::from(1i64)])],
                check_in: chrono::Utc::now(),
            },
        );
        records.insert(
            WorkerId("b".to_string()),
            WorkerRecord {
                items: vec![WorkItem::new([Scalar::from(2i64)])],
                check_in: chrono::Utc::now(),
            },
        );
        in_progress.extend(records);

        let points = points_in_progress(&in_progress);
        assert_eq!(points.len(), 2);
    }
}
