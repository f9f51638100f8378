// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The Coordination Store contract (§6) and the `optimistic_update`
//! combinator (§4.1) that is the *only* admitted way to mutate `remaining`,
//! `in_progress` and `completed`. No call site in the Manager or Worker is
//! allowed to hand-roll watch/read/stage/commit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod redis;

#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Network/backend hiccup talking to the store. Always retriable —
    /// classified as `TransientCoordination` in §7.
    #[error("coordination store I/O error: {0}")]
    Io(String),
    /// Permanent failure decoding/encoding a stored value (§3.1). Never
    /// retried: retrying cannot fix a protocol mismatch.
    #[error("protocol error: {0}")]
    Protocol(#[from] batchfleet_common::error::ProtocolError),
}

impl batchfleet_common::SafeDisplay for CoordinationError {
    fn to_safe_string(&self) -> String {
        match self {
            CoordinationError::Io(_) => "coordination store I/O error".to_string(),
            CoordinationError::Protocol(e) => e.to_string(),
        }
    }
}

/// A point-in-time read of a set of watched keys, tied to whatever
/// connection/version bookkeeping the backend needs to detect a concurrent
/// write before [`CoordinationStore::commit`].
pub enum Snapshot {
    Redis(redis::RedisWatch),
    InMemory(InMemoryWatch),
}

pub struct InMemoryWatch {
    pub versions: HashMap<String, u64>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Reads a single key outside of any transaction (used for the
    /// Manager's plain status polling in `supervise()`, which only reads).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

    /// Unconditional write, used only at `seed()` time for `all`, which is
    /// immutable thereafter and so never needs optimistic protection.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CoordinationError>;

    async fn delete(&self, key: &str) -> Result<(), CoordinationError>;

    /// Begins watching `keys` and returns their current raw values.
    async fn watch_and_read(
        &self,
        keys: &[String],
    ) -> Result<(Snapshot, HashMap<String, Option<Vec<u8>>>), CoordinationError>;

    /// Commits `writes`/`deletes` iff none of the keys watched for
    /// `snapshot` changed since `watch_and_read`. `Ok(true)` means
    /// committed; `Ok(false)` means a concurrent writer won the race and the
    /// caller must retry from `watch_and_read`.
    async fn commit(
        &self,
        snapshot: Snapshot,
        writes: Vec<(String, Vec<u8>)>,
        deletes: Vec<String>,
    ) -> Result<bool, CoordinationError>;
}

/// The outcome a closure passed to [`optimistic_update`] returns.
pub enum Outcome<T> {
    /// Stage `writes`/`deletes` and attempt to commit; on conflict the whole
    /// closure re-runs against a fresh read.
    Commit {
        writes: Vec<(String, Vec<u8>)>,
        deletes: Vec<String>,
        result: T,
    },
    /// Nothing to write this round (e.g. `remaining` was already empty) —
    /// return `result` without a commit attempt.
    NoOp(T),
}

const IO_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Runs the watch → read → compute → stage → commit loop (§4.1), retrying on
/// watch conflict and on transient `CoordinationError::Io` unconditionally,
/// per the `TransientCoordination` policy (§7). `f` must be a pure function
/// of the current raw values: it may be invoked more than once per call.
pub async fn optimistic_update<S, F, T>(
    store: &S,
    keys: &[String],
    mut f: F,
) -> Result<T, CoordinationError>
where
    S: CoordinationStore + ?Sized,
    F: FnMut(&HashMap<String, Option<Vec<u8>>>) -> Result<Outcome<T>, CoordinationError>,
{
    loop {
        let (snapshot, values) = match store.watch_and_read(keys).await {
            Ok(pair) => pair,
            Err(CoordinationError::Io(msg)) => {
                warn!(error = %msg, "transient coordination store error on watch, retrying");
                tokio::time::sleep(IO_RETRY_DELAY).await;
                continue;
            }
            Err(other) => return Err(other),
        };

        match f(&values)? {
            Outcome::NoOp(result) => return Ok(result),
            Outcome::Commit {
                writes,
                deletes,
                result,
            } => match store.commit(snapshot, writes, deletes).await {
                Ok(true) => return Ok(result),
                Ok(false) => continue,
                Err(CoordinationError::Io(msg)) => {
                    warn!(error = %msg, "transient coordination store error on commit, retrying");
                    tokio::time::sleep(IO_RETRY_DELAY).await;
                    continue;
                }
                Err(other) => return Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use test_r::test;

    /// A version-stamped in-memory store used to exercise `optimistic_update`
    /// itself without a live Redis instance.
    struct FakeStore {
        state: StdMutex<HashMap<String, (u64, Vec<u8>)>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                state: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl CoordinationStore for FakeStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
            Ok(self.state.lock().unwrap().get(key).map(|(_, v)| v.clone()))
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CoordinationError> {
            let mut state = self.state.lock().unwrap();
            let version = state.get(key).map(|(v, _)| *v).unwrap_or(0) + 1;
            state.insert(key.to_string(), (version, value));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CoordinationError> {
            self.state.lock().unwrap().remove(key);
            Ok(())
        }

        async fn watch_and_read(
            &self,
            keys: &[String],
        ) -> Result<(Snapshot, HashMap<String, Option<Vec<u8>>>), CoordinationError> {
            let state = self.state.lock().unwrap();
            let mut versions = HashMap::with_capacity(keys.len());
            let mut values = HashMap::with_capacity(keys.len());
            for key in keys {
                match state.get(key) {
                    Some((version, value)) => {
                        versions.insert(key.clone(), *version);
                        values.insert(key.clone(), Some(value.clone()));
                    }
                    None => {
                        versions.insert(key.clone(), 0);
                        values.insert(key.clone(), None);
                    }
                }
            }
            Ok((Snapshot::InMemory(InMemoryWatch { versions }), values))
        }

        async fn commit(
            &self,
            snapshot: Snapshot,
            writes: Vec<(String, Vec<u8>)>,
            deletes: Vec<String>,
        ) -> Result<bool, CoordinationError> {
            let Snapshot::InMemory(watch) = snapshot else {
                return Err(CoordinationError::Io(
                    "commit called with a snapshot from a different backend".to_string(),
                ));
            };
            let mut state = self.state.lock().unwrap();
            for (key, expected_version) in &watch.versions {
                let current_version = state.get(key).map(|(v, _)| *v).unwrap_or(0);
                if current_version != *expected_version {
                    return Ok(false);
                }
            }
            for (key, value) in writes {
                let version = state.get(&key).map(|(v, _)| *v).unwrap_or(0) + 1;
                state.insert(key, (version, value));
            }
            for key in deletes {
                state.remove(&key);
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn commits_a_write_when_nothing_else_changed() {
        let store = FakeStore::new();
        let keys = vec!["k".to_string()];

        let result = optimistic_update(&store, &keys, |values| {
            assert!(values.get("k").unwrap().is_none());
            Ok(Outcome::Commit {
                writes: vec![("k".to_string(), b"v1".to_vec())],
                deletes: vec![],
                result: (),
            })
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn retries_when_a_concurrent_writer_wins_the_race() {
        let store = FakeStore::new();
        let keys = vec!["k".to_string()];
        store.set("k", b"v0".to_vec()).await.unwrap();

        let mut attempts = 0;
        let result: Result<(), CoordinationError> = optimistic_update(&store, &keys, |_values| {
            attempts += 1;
            if attempts == 1 {
                // Simulate a concurrent writer landing between our read and
                // our commit by mutating state directly, bypassing the watch.
                write_behind_the_watch(&store, "k", b"v1".to_vec());
            }
            Ok(Outcome::Commit {
                writes: vec![("k".to_string(), b"v2".to_vec())],
                deletes: vec![],
                result: (),
            })
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    fn write_behind_the_watch(store: &FakeStore, key: &str, value: Vec<u8>) {
        let mut state = store.state.lock().unwrap();
        let version = state.get(key).map(|(v, _)| *v).unwrap_or(0) + 1;
        state.insert(key.to_string(), (version, value));
    }

    #[tokio::test]
    async fn no_op_returns_without_committing() {
        let store = FakeStore::new();
        let keys = vec!["k".to_string()];

        let result = optimistic_update(&store, &keys, |_values| Ok(Outcome::NoOp(42))).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
