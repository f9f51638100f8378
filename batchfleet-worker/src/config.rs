// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Worker launch configuration. Most of this is provided by the
//! [`UserData`](batchfleet_common::UserData) the Manager writes at seed
//! time (§9 "Template-substituted executable scripts"); only the
//! parallelism knob and retry tuning are locally configurable.

use batchfleet_common::{RetryConfig, SafeDisplay, TracingConfig, UserData};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub tracing: TracingConfig,
    pub retries: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("batchfleet-worker"),
            retries: RetryConfig::default(),
        }
    }
}

impl SafeDisplay for WorkerConfig {
    fn to_safe_string(&self) -> String {
        self.tracing.to_safe_string()
    }
}

/// Cooperative sub-worker count P (§4.3): one per core, with
/// `hyperthread_const` controlling whether sibling hyperthreads count as
/// one core or two. A host reporting a single logical CPU always gets
/// `P = 1`.
pub fn parallelism(logical_cpus: u32, user_data: &UserData) -> u32 {
    if logical_cpus <= 1 {
        1
    } else {
        (logical_cpus / user_data.hyperthread_const.max(1)).max(1)
    }
}
