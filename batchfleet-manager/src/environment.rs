// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The Manager's explicit dependency context: the coordination store, fleet
//! and object store clients threaded through every operation instead of
//! living as ambient globals or default-argument singletons.

use crate::config::ManagerConfig;
use batchfleet_coordination::{CloudFleet, CoordinationStore, ObjectStore};
use batchfleet_common::RunId;
use std::sync::Arc;

#[derive(Clone)]
pub struct Environment {
    pub run_id: RunId,
    pub config: Arc<ManagerConfig>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub fleet: Arc<dyn CloudFleet>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Environment {
    pub fn new(
        run_id: RunId,
        config: ManagerConfig,
        coordination: Arc<dyn CoordinationStore>,
        fleet: Arc<dyn CloudFleet>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            run_id,
            config: Arc::new(config),
            coordination,
            fleet,
            objects,
        }
    }
}
