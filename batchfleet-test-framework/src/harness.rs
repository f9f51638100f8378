// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Wires the in-memory fakes into a real `Environment` for both the
//! Manager and a handful of Workers, standing in for a live Redis +
//! S3-compatible store + cloud provider in scenario tests.

use crate::fakes::{FakeCloudFleet, FakeCoordinationStore, FakeObjectStore};
use batchfleet_common::{RunId, Scalar, UserData, WorkItem, WorkerId};
use batchfleet_coordination::{CloudFleet, CoordinationStore, ObjectStore};
use batchfleet_manager::config::ManagerConfig;
use batchfleet_manager::Environment as ManagerEnvironment;
use batchfleet_worker::Environment as WorkerEnvironment;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A self-contained run: shared fakes, a Manager `Environment`, and a
/// factory for Worker `Environment`s, all pointed at the same in-memory
/// backends. `_scratch` keeps the temp directory (and the entry-point
/// stub inside it) alive for the harness's lifetime.
pub struct Harness {
    pub run_id: RunId,
    pub coordination: Arc<FakeCoordinationStore>,
    pub objects: Arc<FakeObjectStore>,
    pub fleet: Arc<FakeCloudFleet>,
    pub manager_config: ManagerConfig,
    _scratch: TempDir,
    entry_point: PathBuf,
}

impl Harness {
    /// `quota` caps how many instances `FakeCloudFleet::launch` will ever
    /// grant — pass `u32::MAX` for an unconstrained fleet.
    pub fn new(quota: u32) -> Self {
        let scratch = tempfile::tempdir().expect("create scratch dir");
        let entry_point = scratch.path().join("entry-point.sh");
        std::fs::write(
            &entry_point,
            "#!/bin/sh\nout=\"$1\"\nshift\nprintf '%s' \"$*\" > \"$out\"\n",
        )
        .expect("write entry-point stub");
        let mut permissions = std::fs::metadata(&entry_point)
            .expect("stat entry-point stub")
            .permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&entry_point, permissions).expect("chmod entry-point stub");

        let run_id = RunId::new();
        let mut manager_config = ManagerConfig {
            vcpus_per_node: 4,
            entry_point: entry_point.to_string_lossy().into_owned(),
            run_id: Some(run_id.to_string()),
            ..ManagerConfig::default()
        };
        manager_config.stall_threshold = std::time::Duration::from_millis(50);
        manager_config.tick_interval = std::time::Duration::from_millis(5);

        Self {
            run_id,
            coordination: Arc::new(FakeCoordinationStore::new()),
            objects: Arc::new(FakeObjectStore::new()),
            fleet: Arc::new(FakeCloudFleet::new(quota)),
            manager_config,
            _scratch: scratch,
            entry_point,
        }
    }

    pub fn items(count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|i| WorkItem::new([Scalar::from(i as i64)]))
            .collect()
    }

    pub fn manager_env(&self) -> ManagerEnvironment {
        ManagerEnvironment::new(
            self.run_id,
            self.manager_config.clone(),
            self.coordination.clone() as Arc<dyn CoordinationStore>,
            self.fleet.clone() as Arc<dyn CloudFleet>,
            self.objects.clone() as Arc<dyn ObjectStore>,
        )
    }

    /// A fresh Worker `Environment` bound to `worker_id`, matching what the
    /// standalone worker binary would build after fetching `UserData`.
    pub fn worker_env(&self, worker_id: WorkerId) -> WorkerEnvironment {
        let user_data = UserData {
            run_id: self.run_id,
            coordination_endpoint: self.manager_config.coordination_endpoint.clone(),
            coordination_port: self.manager_config.coordination_port,
            bucket: self.manager_config.bucket.clone(),
            entry_point: self.entry_point.to_string_lossy().into_owned(),
            hyperthread_const: self.manager_config.hyperthread_const.0,
            heartbeat_interval: std::time::Duration::from_millis(20),
            quiescence_cpu_pct: 100.0,
            result_extension: self
                .manager_config
                .file_extensions
                .first()
                .cloned()
                .unwrap_or_else(|| "json".to_string()),
            heartbeat_tracks_claim_loop: self.manager_config.heartbeat_tracks_claim_loop,
        };

        WorkerEnvironment::new(
            worker_id,
            user_data,
            batchfleet_worker::WorkerConfig::default(),
            self.coordination.clone() as Arc<dyn CoordinationStore>,
            self.fleet.clone() as Arc<dyn CloudFleet>,
            self.objects.clone() as Arc<dyn ObjectStore>,
        )
    }
}
