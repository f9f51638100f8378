// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! A filesystem-backed [`ObjectStore`] rooted at a local directory, used by
//! single-host demos and tests that would otherwise need a real bucket.

use crate::objects::{ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStoreError::Io(e.to_string()))?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| ObjectStoreError::Io(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(ObjectStoreError::Io(e.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let base = self.path_for(prefix);
        let scan_root = if base.is_dir() { base } else { self.root.clone() };
        let mut keys = Vec::new();
        walk(&scan_root, &self.root, prefix, &mut keys)
            .await
            .map_err(|e| ObjectStoreError::Io(e.to_string()))?;
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ObjectStoreError::Io(e.to_string())),
        }
    }
}

async fn walk(
    dir: &Path,
    root: &Path,
    prefix: &str,
    keys: &mut Vec<String>,
) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            Box::pin(walk(&path, root, prefix, keys)).await?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            if relative.starts_with(prefix) {
                keys.push(relative);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[tokio::test]
    async fn round_trips_and_lists_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store
            .put("runs/abc/worker-1.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        store
            .put("runs/abc/worker-2.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        store
            .put("runs/other/worker-1.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let mut keys = store.list("runs/abc").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "runs/abc/worker-1.json".to_string(),
                "runs/abc/worker-2.json".to_string(),
            ]
        );

        let data = store.get("runs/abc/worker-1.json").await.unwrap();
        assert_eq!(&data[..], b"{}");

        store.delete("runs/abc/worker-1.json").await.unwrap();
        assert!(matches!(
            store.get("runs/abc/worker-1.json").await,
            Err(ObjectStoreError::NotFound(_))
        ));
    }
}
