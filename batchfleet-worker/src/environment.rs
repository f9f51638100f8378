// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use crate::config::WorkerConfig;
use batchfleet_common::{UserData, WorkerId};
use batchfleet_coordination::{CloudFleet, CoordinationStore, ObjectStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct Environment {
    pub id: WorkerId,
    pub user_data: UserData,
    pub config: Arc<WorkerConfig>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub fleet: Arc<dyn CloudFleet>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Environment {
    pub fn new(
        id: WorkerId,
        user_data: UserData,
        config: WorkerConfig,
        coordination: Arc<dyn CoordinationStore>,
        fleet: Arc<dyn CloudFleet>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            id,
            user_data,
            config: Arc::new(config),
            coordination,
            fleet,
            objects,
        }
    }
}
