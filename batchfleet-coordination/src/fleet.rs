// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The Cloud Fleet contract (§6): launch, describe, wait and terminate
//! compute instances from a pre-baked launch template. The actual
//! cloud-provider binding (EC2 launch templates, image baking, quota
//! queries) is explicitly out of scope (§1) — only the trait and the
//! process-local reference implementation used for local runs and tests
//! live in this crate.

pub mod process;

use async_trait::async_trait;
use batchfleet_common::WorkerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub instance_type: String,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Terminating,
    Terminated,
}

#[derive(Debug, Error)]
pub enum FleetError {
    /// The provider rejected a launch with a transient capacity/quota
    /// error (§7 `QuotaExceeded`). Never fatal: the caller proceeds with
    /// whatever did launch, or skips the replacement.
    #[error("cloud fleet quota exceeded for instance type {instance_type}")]
    QuotaExceeded { instance_type: String },
    #[error("cloud fleet error: {0}")]
    Other(String),
}

impl batchfleet_common::SafeDisplay for FleetError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

#[async_trait]
pub trait CloudFleet: Send + Sync {
    /// Attempts to launch `count` instances from `template`. A provider
    /// that can only launch some of `count` returns the ids it managed and
    /// reports the remainder as a `QuotaExceeded` error via the returned
    /// `Vec` being shorter than `count` — callers must not treat a partial
    /// result as failure (§4.2 `seed`).
    async fn launch(
        &self,
        template: &LaunchTemplate,
        count: u32,
    ) -> Result<Vec<WorkerId>, FleetError>;

    async fn terminate(&self, id: &WorkerId) -> Result<(), FleetError>;

    async fn wait_running(&self, id: &WorkerId) -> Result<(), FleetError>;

    async fn wait_terminated(&self, id: &WorkerId) -> Result<(), FleetError>;

    async fn describe(&self, id: &WorkerId) -> Result<InstanceState, FleetError>;
}
