// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use batchfleet_common::SafeDisplay;
use batchfleet_coordination::{CoordinationError, FleetError, ObjectStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),
    #[error("cloud fleet error: {0}")]
    Fleet(#[from] FleetError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("protocol error: {0}")]
    Protocol(#[from] batchfleet_common::error::ProtocolError),
    /// §7 `UserEntryPointFailed`: the item stays out of `completed` and is
    /// re-queued by the Manager's stall detector (Design Notes Open
    /// Question 1) rather than being silently dropped or retried locally.
    #[error("user entry-point exited with status {0}")]
    UserEntryPointFailed(i32),
}

impl SafeDisplay for WorkerError {
    fn to_safe_string(&self) -> String {
        match self {
            WorkerError::Coordination(e) => e.to_safe_string(),
            WorkerError::Fleet(e) => e.to_safe_string(),
            WorkerError::ObjectStore(e) => e.to_safe_string(),
            WorkerError::Protocol(e) => e.to_safe_string(),
            WorkerError::UserEntryPointFailed(_) => self.to_string(),
        }
    }
}
