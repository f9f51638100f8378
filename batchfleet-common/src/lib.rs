// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Shared protocol model, wire encoding, configuration, tracing and retry
//! helpers used by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod retries;
pub mod shutdown;
pub mod tracing_config;

pub use error::SafeDisplay;
pub use model::{InProgress, Run, RunId, Scalar, UserData, WorkItem, WorkerId, WorkerRecord};
pub use retries::RetryConfig;
pub use tracing_config::{LogCapture, TracingConfig};

#[cfg(test)]
test_r::enable!();
