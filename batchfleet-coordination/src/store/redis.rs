// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Redis-backed [`CoordinationStore`], the reference implementation of the
//! Coordination Store contract (§6). Uses `fred`'s native `WATCH`/`MULTI`/
//! `EXEC` so that the retry loop in [`crate::store::optimistic_update`] is a
//! real optimistic transaction, not a hand-rolled compare-and-swap.

use crate::store::{CoordinationError, CoordinationStore, Snapshot};
use async_trait::async_trait;
use fred::prelude::*;
use std::collections::HashMap;

pub struct RedisWatch {
    pub(crate) keys: Vec<String>,
}

pub struct RedisCoordinationStore {
    client: Client,
}

impl RedisCoordinationStore {
    pub async fn connect(endpoint: &str, port: u16) -> Result<Self, CoordinationError> {
        let config = Config::from_url(&format!("redis://{endpoint}:{port}"))
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        let client = Builder::from_config(config)
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2))
            .build()
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        client
            .init()
            .await
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        let value: Option<Vec<u8>> = self
            .client
            .get(key)
            .await
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CoordinationError> {
        let _: () = self
            .client
            .set(key, value, None, None, false)
            .await
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
        let _: () = self
            .client
            .del(key)
            .await
            .map_err(|e| CoordinationError::Io(e.to_string()))?;
        Ok(())
    }

    async fn watch_and_read(
        &self,
        keys: &[String],
    ) -> Result<(Snapshot, HashMap<String, Option<Vec<u8>>>), CoordinationError> {
        self.client
            .watch(keys.to_vec())
            .await
            .map_err(|e| CoordinationError::Io(e.to_string()))?;

        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let value: Option<Vec<u8>> = self
                .client
                .get(key)
                .await
                .map_err(|e| CoordinationError::Io(e.to_string()))?;
            values.insert(key.clone(), value);
        }

        Ok((
            Snapshot::Redis(RedisWatch {
                keys: keys.to_vec(),
            }),
            values,
        ))
    }

    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, Vec<u8>)>,
        deletes: Vec<String>,
    ) -> Result<bool, CoordinationError> {
        let Snapshot::Redis(_watch) = snapshot else {
            return Err(CoordinationError::Io(
                "commit called with a snapshot from a different backend".to_string(),
            ));
        };

        let transaction = self.client.multi();
        for (key, value) in writes {
            transaction
                .set::<(), _, _>(key, value, None, None, false)
                .await
                .map_err(|e| CoordinationError::Io(e.to_string()))?;
        }
        for key in deletes {
            transaction
                .del::<(), _>(key)
                .await
                .map_err(|e| CoordinationError::Io(e.to_string()))?;
        }

        // `exec` resolves to `None` when the transaction was aborted because
        // a watched key changed — that is the commit-conflict signal the
        // `optimistic_update` loop retries on, not an error.
        match transaction.exec::<Option<()>>(true).await {
            Ok(Some(())) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(CoordinationError::Io(e.to_string())),
        }
    }
}
