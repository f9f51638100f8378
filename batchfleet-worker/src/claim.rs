// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Worker operations (§4.3): `register`, the claim loop's P cooperative
//! sub-workers, and `deregister`.

use crate::environment::Environment;
use crate::error::WorkerError;
use batchfleet_common::model::InProgress;
use batchfleet_common::protocol::{decode, encode, Key};
use batchfleet_common::{WorkItem, WorkerRecord};
use batchfleet_coordination::{optimistic_update, Outcome};
use bytes::Bytes;
use std::path::Path;
use tracing::{info, instrument, warn};

/// `register()` (§4.3): insert `self → { items: ∅, check_in: now }`.
#[instrument(skip(env), fields(worker = %env.id))]
pub async fn register(env: &Environment) -> Result<(), WorkerError> {
    let run_id = env.user_data.run_id;
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let keys = vec![in_progress_key.clone()];
    let worker_id = env.id.clone();

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut in_progress: InProgress = decode_or_default(values.get(&in_progress_key))?;
        in_progress.insert(worker_id.clone(), WorkerRecord::new_registering(chrono::Utc::now()));
        Ok(Outcome::Commit {
            writes: vec![(in_progress_key.clone(), encode(&in_progress)?)],
            deletes: vec![],
            result: (),
        })
    })
    .await?;
    info!("registered");
    Ok(())
}

/// One claim-transaction attempt (§4.3 step 1): pop one item from
/// `remaining`, append it to this worker's `in_progress` entry, refresh
/// `check_in`. `None` means `remaining` was already empty.
async fn claim_one(env: &Environment) -> Result<Option<WorkItem>, WorkerError> {
    let run_id = env.user_data.run_id;
    let remaining_key = Key::Remaining.namespaced(run_id);
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let keys = vec![remaining_key.clone(), in_progress_key.clone()];
    let worker_id = env.id.clone();

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut remaining: Vec<WorkItem> = decode_or_default(values.get(&remaining_key))?;
        let mut in_progress: InProgress = decode_or_default(values.get(&in_progress_key))?;

        let Some(item) = remaining.pop() else {
            return Ok(Outcome::NoOp(None));
        };

        let record = in_progress
            .entry(worker_id.clone())
            .or_insert_with(|| WorkerRecord::new_registering(chrono::Utc::now()));
        record.items.push(item.clone());
        record.check_in = chrono::Utc::now();

        Ok(Outcome::Commit {
            writes: vec![
                (remaining_key.clone(), encode(&remaining)?),
                (in_progress_key.clone(), encode(&in_progress)?),
            ],
            deletes: vec![],
            result: Some(item),
        })
    })
    .await
    .map_err(Into::into)
}

/// Records a finished item (§4.3 step 3): remove it from this worker's
/// `in_progress` items, append it to `completed`.
async fn mark_completed(env: &Environment, item: &WorkItem) -> Result<(), WorkerError> {
    let run_id = env.user_data.run_id;
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let completed_key = Key::Completed.namespaced(run_id);
    let keys = vec![in_progress_key.clone(), completed_key.clone()];
    let worker_id = env.id.clone();

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut in_progress: InProgress = decode_or_default(values.get(&in_progress_key))?;
        let mut completed: Vec<WorkItem> = decode_or_default(values.get(&completed_key))?;

        if let Some(record) = in_progress.get_mut(&worker_id) {
            if let Some(pos) = record.items.iter().position(|i| i == item) {
                record.items.remove(pos);
            }
        }
        completed.push(item.clone());

        Ok(Outcome::Commit {
            writes: vec![
                (in_progress_key.clone(), encode(&in_progress)?),
                (completed_key.clone(), encode(&completed)?),
            ],
            deletes: vec![],
            result: (),
        })
    })
    .await?;
    Ok(())
}

/// Invokes the user entry-point as `entryPoint outPath item_scalars...`
/// (§6). A non-zero exit is `UserEntryPointFailed` (§7); the caller leaves
/// the item out of `completed` so the Manager's stall detector re-queues it
/// (Design Notes Open Question 1).
async fn run_entry_point(env: &Environment, item: &WorkItem, out_path: &Path) -> Result<(), WorkerError> {
    let mut args: Vec<String> = vec![out_path.to_string_lossy().into_owned()];
    args.extend(item.as_args());

    let status = tokio::process::Command::new(&env.user_data.entry_point)
        .args(&args)
        .status()
        .await
        .map_err(|e| WorkerError::UserEntryPointFailed(e.raw_os_error().unwrap_or(-1)))?;

    if status.success() {
        Ok(())
    } else {
        Err(WorkerError::UserEntryPointFailed(status.code().unwrap_or(-1)))
    }
}

/// One cooperative sub-worker (§4.3): claim → invoke entry-point → upload
/// partial → mark complete, until `remaining` is empty.
async fn sub_worker_loop(env: &Environment, sub_id: usize, scratch_dir: &Path) -> Result<usize, WorkerError> {
    let mut completed_count = 0;
    let mut attempt: u64 = 0;
    loop {
        let Some(item) = claim_one(env).await? else {
            break;
        };

        attempt += 1;
        let file_name = format!("{}_{sub_id}-{attempt}.{}", env.id, env.user_data.result_extension);
        let out_path = scratch_dir.join(&file_name);

        match run_entry_point(env, &item, &out_path).await {
            Ok(()) => {
                if let Ok(bytes) = tokio::fs::read(&out_path).await {
                    let object_key = format!(
                        "results/{}/{}",
                        env.user_data.run_id, file_name
                    );
                    env.objects.put(&object_key, Bytes::from(bytes)).await?;
                }
                mark_completed(env, &item).await?;
                completed_count += 1;
            }
            Err(e) => {
                warn!(error = %e, item = %item, "user entry-point failed, leaving item for stall recovery");
            }
        }
    }
    Ok(completed_count)
}

/// `claimLoop(P)` (§4.3): spawn P cooperative sub-workers and wait for all
/// of them to observe an empty `remaining`.
#[instrument(skip(env), fields(worker = %env.id, parallelism = parallelism))]
pub async fn claim_loop(env: &Environment, parallelism: u32, scratch_dir: &Path) -> Result<usize, WorkerError> {
    tokio::fs::create_dir_all(scratch_dir)
        .await
        .map_err(|e| WorkerError::ObjectStore(batchfleet_coordination::ObjectStoreError::Io(e.to_string())))?;

    let mut handles = Vec::with_capacity(parallelism as usize);
    for sub_id in 0..parallelism {
        let env = env.clone();
        let scratch_dir = scratch_dir.to_path_buf();
        handles.push(tokio::spawn(async move {
            sub_worker_loop(&env, sub_id as usize, &scratch_dir).await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle
            .await
            .map_err(|e| WorkerError::UserEntryPointFailed(e.is_panic() as i32))??;
    }
    Ok(total)
}

/// `deregister()` (§4.3): remove `self` from `in_progress`, upload the
/// worker log, request self-termination.
#[instrument(skip(env, worker_log), fields(worker = %env.id))]
pub async fn deregister(env: &Environment, worker_log: &str) -> Result<(), WorkerError> {
    let run_id = env.user_data.run_id;
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let keys = vec![in_progress_key.clone()];
    let worker_id = env.id.clone();

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut in_progress: InProgress = decode_or_default(values.get(&in_progress_key))?;
        in_progress.remove(&worker_id);
        Ok(Outcome::Commit {
            writes: vec![(in_progress_key.clone(), encode(&in_progress)?)],
            deletes: vec![],
            result: (),
        })
    })
    .await?;

    let log_key = format!("results/{run_id}/{}.log", env.id);
    env.objects
        .put(&log_key, Bytes::from(worker_log.to_string()))
        .await?;

    env.fleet.terminate(&env.id).await?;
    info!("deregistered");
    Ok(())
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(
    raw: Option<&Vec<u8>>,
) -> Result<T, batchfleet_common::error::ProtocolError> {
    match raw {
        Some(bytes) => decode(bytes),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchfleet_common::Scalar;
    use test_r::test;

    #[test]
    fn entry_point_args_lead_with_out_path_then_scalars() {
        let item = WorkItem::new([Scalar::from(1i64), Scalar::from("x")]);
        let mut args = vec!["/tmp/out.json".to_string()];
        args.extend(item.as_args());
        assert_eq!(args, vec!["/tmp/out.json", "1", "x"]);
    }
}
