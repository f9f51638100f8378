// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! CPU-sampling heartbeat (§4.3, Design Notes Open Question 2). Runs on a
//! dedicated background task; refreshes `check_in` only when the host is
//! busy enough to be trusted as "alive", and exits silently once it
//! observes its own eviction from `in_progress`.

use crate::environment::Environment;
use crate::error::WorkerError;
use batchfleet_common::model::InProgress;
use batchfleet_common::protocol::{decode, encode, Key};
use batchfleet_coordination::{optimistic_update, Outcome};
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, info, instrument};

const SAMPLE_COUNT: usize = 10;
const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// 10 short samples, max across cores of the mean — mirrors the source's
/// `psutil.cpu_percent` sampling strategy (Design Notes Open Question 2).
async fn sample_max_mean_cpu_usage(system: &mut System) -> f32 {
    let mut sums = vec![0f32; system.cpus().len().max(1)];
    for _ in 0..SAMPLE_COUNT {
        system.refresh_cpu_usage();
        for (i, cpu) in system.cpus().iter().enumerate() {
            sums[i] += cpu.cpu_usage();
        }
        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }
    sums.into_iter()
        .map(|sum| sum / SAMPLE_COUNT as f32)
        .fold(0f32, f32::max)
}

/// Runs until the worker's own entry disappears from `in_progress` (it has
/// been evicted) — exits silently, per §5 "The heartbeat observing its own
/// eviction exits silently."
#[instrument(skip(env), fields(worker = %env.id))]
pub async fn run(env: &Environment) -> Result<(), WorkerError> {
    let mut system = System::new_all();

    loop {
        tokio::time::sleep(env.user_data.heartbeat_interval).await;

        let usage = sample_max_mean_cpu_usage(&mut system).await;
        debug!(usage, "sampled cpu utilization");

        if usage <= env.user_data.quiescence_cpu_pct {
            continue;
        }

        let worker_still_registered = if env.user_data.heartbeat_tracks_claim_loop {
            still_registered(env).await?
        } else {
            refresh_check_in(env).await?
        };

        if !worker_still_registered {
            info!("worker record gone from in_progress, heartbeat exiting");
            return Ok(());
        }
    }
}

/// Design Notes Open Question 1, `heartbeatTracksClaimLoop = true`: a
/// read-only existence check. Never writes `check_in` — only the claim
/// loop's own claim/complete transactions do — so a repeatedly-failing
/// entry point that merely burns CPU cannot keep the worker looking alive
/// on CPU usage alone.
async fn still_registered(env: &Environment) -> Result<bool, WorkerError> {
    let run_id = env.user_data.run_id;
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let raw = env.coordination.get(&in_progress_key).await?;
    let in_progress: InProgress = match raw {
        Some(bytes) => decode(&bytes)?,
        None => InProgress::new(),
    };
    Ok(in_progress.contains_key(&env.id))
}

/// Returns `Ok(true)` if `check_in` was refreshed, `Ok(false)` if this
/// worker's record no longer exists.
async fn refresh_check_in(env: &Environment) -> Result<bool, WorkerError> {
    let run_id = env.user_data.run_id;
    let in_progress_key = Key::InProgress.namespaced(run_id);
    let keys = vec![in_progress_key.clone()];
    let worker_id = env.id.clone();

    optimistic_update(env.coordination.as_ref(), &keys, |values| {
        let mut in_progress: InProgress = match values.get(&in_progress_key) {
            Some(bytes) => decode(bytes)?,
            None => InProgress::new(),
        };

        let Some(record) = in_progress.get_mut(&worker_id) else {
            return Ok(Outcome::NoOp(false));
        };
        record.check_in = chrono::Utc::now();

        Ok(Outcome::Commit {
            writes: vec![(in_progress_key.clone(), encode(&in_progress)?)],
            deletes: vec![],
            result: true,
        })
    })
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use async_trait::async_trait;
    use batchfleet_common::{RunId, UserData, WorkerId, WorkerRecord};
    use batchfleet_coordination::{CoordinationError, Snapshot};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::Arc;
    use test_r::test;

    #[tokio::test]
    async fn sampling_reports_a_non_negative_usage_value() {
        let mut system = System::new_all();
        let usage = sample_max_mean_cpu_usage(&mut system).await;
        assert!(usage >= 0.0);
    }

    /// A minimal store standing in for the in-memory fakes used by
    /// scenario tests — just enough `get`/`set` to exercise the two
    /// `heartbeatTracksClaimLoop` branches without pulling in a live store.
    struct StubStore {
        values: StdMutex<HashMap<String, Vec<u8>>>,
    }

    impl StubStore {
        fn new() -> Self {
            Self {
                values: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl batchfleet_coordination::CoordinationStore for StubStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CoordinationError> {
            self.values.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn watch_and_read(
            &self,
            _keys: &[String],
        ) -> Result<(Snapshot, HashMap<String, Option<Vec<u8>>>), CoordinationError> {
            unimplemented!("still_registered never watches")
        }

        async fn commit(
            &self,
            _snapshot: Snapshot,
            _writes: Vec<(String, Vec<u8>)>,
            _deletes: Vec<String>,
        ) -> Result<bool, CoordinationError> {
            unimplemented!("still_registered never commits")
        }
    }

    fn test_env(coordination: Arc<StubStore>, heartbeat_tracks_claim_loop: bool) -> Environment {
        let user_data = UserData {
            run_id: RunId::new(),
            coordination_endpoint: "localhost".to_string(),
            coordination_port: 6379,
            bucket: "bucket".to_string(),
            entry_point: "/bin/true".to_string(),
            hyperthread_const: 2,
            heartbeat_interval: std::time::Duration::from_secs(15),
            quiescence_cpu_pct: 0.0,
            result_extension: "json".to_string(),
            heartbeat_tracks_claim_loop,
        };
        let scratch = tempfile::tempdir().expect("scratch dir");
        Environment::new(
            WorkerId("w-1".to_string()),
            user_data,
            WorkerConfig::default(),
            coordination.clone() as Arc<dyn batchfleet_coordination::CoordinationStore>,
            Arc::new(batchfleet_coordination::fleet::process::ProcessFleet::new("/bin/sh")),
            Arc::new(batchfleet_coordination::objects::local::LocalObjectStore::new(
                scratch.path().to_path_buf(),
            )),
        )
    }

    #[tokio::test]
    async fn still_registered_is_true_while_the_worker_entry_exists() {
        let store = Arc::new(StubStore::new());
        let env = test_env(store.clone(), true);
        let run_id = env.user_data.run_id;

        let mut in_progress = InProgress::new();
        in_progress.insert(env.id.clone(), WorkerRecord::new_registering(chrono::Utc::now()));
        store
            .set(&Key::InProgress.namespaced(run_id), encode(&in_progress).unwrap())
            .await
            .unwrap();

        assert!(still_registered(&env).await.unwrap());
    }

    #[tokio::test]
    async fn still_registered_is_false_once_evicted() {
        let store = Arc::new(StubStore::new());
        let env = test_env(store.clone(), true);
        let run_id = env.user_data.run_id;
        store
            .set(&Key::InProgress.namespaced(run_id), encode(&InProgress::new()).unwrap())
            .await
            .unwrap();

        assert!(!still_registered(&env).await.unwrap());
    }
}
