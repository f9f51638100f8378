// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

use batchfleet_common::SafeDisplay;
use batchfleet_coordination::{CoordinationError, FleetError, ObjectStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),
    #[error("cloud fleet error: {0}")]
    Fleet(#[from] FleetError),
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("protocol error: {0}")]
    Protocol(#[from] batchfleet_common::error::ProtocolError),
    /// The initial launch yielded zero workers. Fatal — the Manager
    /// self-terminates after uploading its log (exit code 1).
    #[error("initial fleet launch yielded zero workers")]
    FleetEmpty,
    /// Aggregation of downloaded partials failed. Fatal to the run (exit code 2).
    #[error("aggregation failed: {0}")]
    AggregationFailed(String),
}

impl SafeDisplay for ManagerError {
    fn to_safe_string(&self) -> String {
        match self {
            ManagerError::Coordination(e) => e.to_safe_string(),
            ManagerError::Fleet(e) => e.to_safe_string(),
            ManagerError::ObjectStore(e) => e.to_safe_string(),
            ManagerError::Protocol(e) => e.to_safe_string(),
            ManagerError::FleetEmpty => self.to_string(),
            ManagerError::AggregationFailed(_) => "aggregation failed".to_string(),
        }
    }
}

impl ManagerError {
    /// Process exit code the Manager binary returns on failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ManagerError::FleetEmpty => 1,
            ManagerError::AggregationFailed(_) => 2,
            _ => 1,
        }
    }
}
