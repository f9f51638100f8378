// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The Object Store contract (§6): where per-item result files land and
//! where the Manager's aggregation pass (§4.4) lists/reads/deletes them
//! from. `s3` is the reference implementation; `local` backs tests and
//! single-host demos without a bucket.

pub mod local;
pub mod retrying;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store I/O error: {0}")]
    Io(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl batchfleet_common::SafeDisplay for ObjectStoreError {
    fn to_safe_string(&self) -> String {
        match self {
            ObjectStoreError::Io(_) => "object store I/O error".to_string(),
            ObjectStoreError::NotFound(key) => format!("object not found: {key}"),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Lists every key under `prefix`, used by aggregation (§4.4) to discover
    /// all per-worker result files for a run without the Manager having to
    /// track them itself.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}
