// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! In-memory fakes for the three external contracts, used by property tests
//! and end-to-end scenarios in place of a live Redis / S3-compatible store /
//! cloud provider.

use async_trait::async_trait;
use batchfleet_coordination::{
    CloudFleet, CoordinationError, CoordinationStore, FleetError, InstanceState, LaunchTemplate,
    ObjectStore, ObjectStoreError, Snapshot,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A version-stamped in-memory [`CoordinationStore`] that can be told to
/// inject a fixed number of watch conflicts before letting a commit
/// through — used by the watch-conflict-storm scenario (S4) and the
/// partition-invariant property tests.
pub struct FakeCoordinationStore {
    state: Mutex<HashMap<String, (u64, Vec<u8>)>>,
    injected_conflicts: AtomicUsize,
}

impl FakeCoordinationStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            injected_conflicts: AtomicUsize::new(0),
        }
    }

    /// The next `count` commits against any watched key will be reported
    /// as conflicts (`Ok(false)`), regardless of whether the watched keys
    /// actually changed — a deterministic conflict injector for tests.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }
}

impl Default for FakeCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for FakeCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        Ok(self.state.lock().unwrap().get(key).map(|(_, v)| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().unwrap();
        let version = state.get(key).map(|(v, _)| *v).unwrap_or(0) + 1;
        state.insert(key.to_string(), (version, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
        self.state.lock().unwrap().remove(key);
        Ok(())
    }

    async fn watch_and_read(
        &self,
        keys: &[String],
    ) -> Result<(Snapshot, HashMap<String, Option<Vec<u8>>>), CoordinationError> {
        let state = self.state.lock().unwrap();
        let mut versions = HashMap::with_capacity(keys.len());
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            match state.get(key) {
                Some((version, value)) => {
                    versions.insert(key.clone(), *version);
                    values.insert(key.clone(), Some(value.clone()));
                }
                None => {
                    versions.insert(key.clone(), 0);
                    values.insert(key.clone(), None);
                }
            }
        }
        Ok((
            Snapshot::InMemory(batchfleet_coordination::store::InMemoryWatch { versions }),
            values,
        ))
    }

    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, Vec<u8>)>,
        deletes: Vec<String>,
    ) -> Result<bool, CoordinationError> {
        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .is_ok()
        {
            return Ok(false);
        }

        let Snapshot::InMemory(watch) = snapshot else {
            return Err(CoordinationError::Io(
                "commit called with a snapshot from a different backend".to_string(),
            ));
        };
        let mut state = self.state.lock().unwrap();
        for (key, expected_version) in &watch.versions {
            let current_version = state.get(key).map(|(v, _)| *v).unwrap_or(0);
            if current_version != *expected_version {
                return Ok(false);
            }
        }
        for (key, value) in writes {
            let version = state.get(&key).map(|(v, _)| *v).unwrap_or(0) + 1;
            state.insert(key, (version, value));
        }
        for key in deletes {
            state.remove(&key);
        }
        Ok(true)
    }
}

/// An in-memory [`ObjectStore`]; never errors except `NotFound`.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// A [`CloudFleet`] that never spawns real processes: `launch` mints ids
/// and tracks liveness purely in memory, and `quota` limits how many
/// instances may ever be granted across the fleet's lifetime — used by the
/// quota-exhaustion scenario (S3) and the empty-fleet scenario (S6).
pub struct FakeCloudFleet {
    quota_remaining: AtomicU32,
    instances: Mutex<HashMap<String, InstanceState>>,
    next_id: AtomicU32,
}

impl FakeCloudFleet {
    pub fn new(quota: u32) -> Self {
        Self {
            quota_remaining: AtomicU32::new(quota),
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }
}

#[async_trait]
impl CloudFleet for FakeCloudFleet {
    async fn launch(
        &self,
        template: &LaunchTemplate,
        count: u32,
    ) -> Result<Vec<batchfleet_common::WorkerId>, FleetError> {
        let mut launched = Vec::new();
        for _ in 0..count {
            if self
                .quota_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n > 0 {
                        Some(n - 1)
                    } else {
                        None
                    }
                })
                .is_err()
            {
                if launched.is_empty() {
                    return Err(FleetError::QuotaExceeded {
                        instance_type: template.instance_type.clone(),
                    });
                }
                break;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let worker_id = batchfleet_common::WorkerId(format!("fake-{id}"));
            self.instances
                .lock()
                .unwrap()
                .insert(worker_id.0.clone(), InstanceState::Running);
            launched.push(worker_id);
        }
        Ok(launched)
    }

    async fn terminate(&self, id: &batchfleet_common::WorkerId) -> Result<(), FleetError> {
        self.instances
            .lock()
            .unwrap()
            .insert(id.0.clone(), InstanceState::Terminated);
        Ok(())
    }

    async fn wait_running(&self, _id: &batchfleet_common::WorkerId) -> Result<(), FleetError> {
        Ok(())
    }

    async fn wait_terminated(&self, _id: &batchfleet_common::WorkerId) -> Result<(), FleetError> {
        Ok(())
    }

    async fn describe(&self, id: &batchfleet_common::WorkerId) -> Result<InstanceState, FleetError> {
        self.instances
            .lock()
            .unwrap()
            .get(&id.0)
            .copied()
            .ok_or_else(|| FleetError::Other(format!("unknown instance {}", id.0)))
    }
}
