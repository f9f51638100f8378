// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Manager launch configuration, loaded through the shared layered
//! [`ConfigLoader`](batchfleet_common::config::ConfigLoader).

use batchfleet_common::{RetryConfig, SafeDisplay, TracingConfig};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// `hyperthreading = true` counts sibling hyperthreads as one core
/// (`hyperthread_const = 2`); `false` counts every logical CPU as a core
/// (`hyperthread_const = 1`). The field on the wire is always
/// `hyperthread_const`: the alternate spelling `hyperthread_cost` is a typo,
/// not an alias, and is rejected rather than silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperthreadConst(pub u32);

impl Default for HyperthreadConst {
    fn default() -> Self {
        Self(2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    pub tracing: TracingConfig,
    pub retries: RetryConfig,
    /// Explicit run id override; when absent a fresh one is generated at
    /// startup.
    pub run_id: Option<String>,

    pub instance_type: String,
    pub worker_instance_type: String,
    pub vcpus_per_node: u32,
    pub hyperthread_const: HyperthreadConst,

    #[serde(with = "humantime_serde")]
    pub stall_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    pub coordination_endpoint: String,
    pub coordination_port: u16,

    pub bucket: String,
    pub entry_point: String,
    pub file_extensions: Vec<String>,
    pub output_file: String,

    /// When set, a claim loop that keeps completing items (even if some
    /// fail) also counts as liveness, independent of the CPU-sampling
    /// heartbeat.
    pub heartbeat_tracks_claim_loop: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("batchfleet-manager"),
            retries: RetryConfig::default(),
            run_id: None,
            instance_type: "m5.large".to_string(),
            worker_instance_type: "m5.large".to_string(),
            vcpus_per_node: 2,
            hyperthread_const: HyperthreadConst::default(),
            stall_threshold: Duration::from_secs(240),
            tick_interval: Duration::from_secs(30),
            coordination_endpoint: "127.0.0.1".to_string(),
            coordination_port: 6379,
            bucket: "batchfleet".to_string(),
            entry_point: "/usr/local/bin/batchfleet-job".to_string(),
            file_extensions: vec!["json".to_string()],
            output_file: "output.json".to_string(),
            heartbeat_tracks_claim_loop: false,
        }
    }
}

impl ManagerConfig {
    /// Initial fleet size: `⌈|items| / vcpusPerNode⌉ * hyperthreadConst + 1`,
    /// where the `+1` node runs the Manager itself.
    pub fn fleet_size(&self, item_count: usize) -> u32 {
        let nodes = (item_count as u32).div_ceil(self.vcpus_per_node.max(1));
        nodes * self.hyperthread_const.0 + 1
    }
}

impl SafeDisplay for ManagerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "instance type: {}", self.instance_type);
        let _ = writeln!(
            &mut result,
            "worker instance type: {}",
            self.worker_instance_type
        );
        let _ = writeln!(&mut result, "vcpus per node: {}", self.vcpus_per_node);
        let _ = writeln!(&mut result, "stall threshold: {:?}", self.stall_threshold);
        let _ = writeln!(&mut result, "tick interval: {:?}", self.tick_interval);
        let _ = writeln!(
            &mut result,
            "coordination: {}:{}",
            self.coordination_endpoint, self.coordination_port
        );
        let _ = writeln!(&mut result, "bucket: {}", self.bucket);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn fleet_size_rounds_up_and_adds_the_manager_node() {
        let mut config = ManagerConfig::default();
        config.vcpus_per_node = 4;
        config.hyperthread_const = HyperthreadConst(2);

        assert_eq!(config.fleet_size(8), 8 / 4 * 2 + 1);
        assert_eq!(config.fleet_size(9), 3 * 2 + 1);
        assert_eq!(config.fleet_size(0), 1);
    }

    #[test]
    fn hyperthread_const_defaults_to_counting_pairs_as_one_core() {
        assert_eq!(HyperthreadConst::default().0, 2);
    }
}
