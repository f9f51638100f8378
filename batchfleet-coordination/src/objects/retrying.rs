// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Bounded-retry decorator around an [`ObjectStore`] (§7 `ObjectStoreIOFailed`):
//! wraps every call in `with_retries`, retrying `Io` failures and giving up
//! immediately on `NotFound` since retrying a missing key can never succeed.

use super::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use batchfleet_common::retries::{with_retries, RetryConfig};
use bytes::Bytes;
use std::sync::Arc;

fn is_retriable(err: &ObjectStoreError) -> bool {
    matches!(err, ObjectStoreError::Io(_))
}

/// Wraps `inner` so every operation is retried up to `retries.max_attempts`
/// times on transient I/O failure before the caller sees an error.
pub struct RetryingObjectStore {
    inner: Arc<dyn ObjectStore>,
    retries: RetryConfig,
}

impl RetryingObjectStore {
    pub fn new(inner: Arc<dyn ObjectStore>, retries: RetryConfig) -> Self {
        Self { inner, retries }
    }
}

#[async_trait]
impl ObjectStore for RetryingObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        with_retries(
            "object_store",
            "put",
            &self.retries,
            || {
                let inner = self.inner.clone();
                let key = key.to_string();
                let data = data.clone();
                Box::pin(async move { inner.put(&key, data).await })
            },
            is_retriable,
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        with_retries(
            "object_store",
            "get",
            &self.retries,
            || {
                let inner = self.inner.clone();
                let key = key.to_string();
                Box::pin(async move { inner.get(&key).await })
            },
            is_retriable,
        )
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        with_retries(
            "object_store",
            "list",
            &self.retries,
            || {
                let inner = self.inner.clone();
                let prefix = prefix.to_string();
                Box::pin(async move { inner.list(&prefix).await })
            },
            is_retriable,
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        with_retries(
            "object_store",
            "delete",
            &self.retries,
            || {
                let inner = self.inner.clone();
                let key = key.to_string();
                Box::pin(async move { inner.delete(&key).await })
            },
            is_retriable,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::local::LocalObjectStore;
    use std::time::Duration;
    use test_r::test;

    #[tokio::test]
    async fn get_on_missing_key_does_not_retry_and_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(LocalObjectStore::new(dir.path().to_path_buf()));
        let store = RetryingObjectStore::new(
            inner,
            RetryConfig {
                max_attempts: 3,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        );

        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_decorator() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(LocalObjectStore::new(dir.path().to_path_buf()));
        let store = RetryingObjectStore::new(inner, RetryConfig::default());

        store.put("a/b", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Bytes::from_static(b"hi"));
    }
}
