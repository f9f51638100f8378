// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Core protocol entities shared by the Manager and Worker: work items, worker
//! records, and the run identifier that namespaces every coordination-store key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A single scalar component of a [`WorkItem`]. Equality and hashing are by
/// value; floats compare by bit pattern so `WorkItem` can live in `HashSet`s
/// without pulling in an extra ordered-float dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl std::hash::Hash for Scalar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Scalar::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Scalar::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Scalar::Text(v) => {
                2u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

/// An opaque unit of user computation: a tuple of scalars, identical in
/// shape to every other item in the same run. Equality is by value so the
/// same point popped twice (e.g. after a stall re-queue) is recognized as a
/// duplicate at aggregation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem(pub Vec<Scalar>);

impl WorkItem {
    pub fn new(scalars: impl IntoIterator<Item = Scalar>) -> Self {
        Self(scalars.into_iter().collect())
    }

    /// Scalars rendered as CLI arguments, in order — used to invoke
    /// `entryPoint outPath item_scalars...`.
    pub fn as_args(&self) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.as_args().join(","))
    }
}

/// Opaque identifier for a Worker instance, as assigned by the Cloud Fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one supervised Run; also the Manager's own instance id and the
/// namespace prefix for every coordination-store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutable per-worker record held in `in_progress`. Created once at
/// [`register`](crate::protocol::Key::in_progress), mutated in place by claim,
/// heartbeat and completion transactions, removed exactly once — by the
/// worker on clean exit, or by the Manager on stall eviction, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub items: Vec<WorkItem>,
    pub check_in: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new_registering(now: DateTime<Utc>) -> Self {
        Self {
            items: Vec::new(),
            check_in: now,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.check_in
    }
}

/// `in_progress`'s decoded shape: one record per live worker.
pub type InProgress = HashMap<WorkerId, WorkerRecord>;

/// Per-run bookkeeping the Manager holds locally (never itself serialized
/// into the coordination store — only `all`/`remaining`/`in_progress`/
/// `completed` are).
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub seed: Vec<WorkItem>,
    pub fleet: Vec<WorkerId>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: RunId, seed: Vec<WorkItem>) -> Self {
        Self {
            id,
            seed,
            fleet: Vec::new(),
            start: Utc::now(),
            end: None,
        }
    }
}

/// Everything a freshly-launched Worker needs to boot, written once by the
/// Manager to a well-known Object Store key and read by the Worker at
/// startup. A typed struct rather than a template-substituted script, so
/// there is no textual substitution of source at launch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub run_id: RunId,
    pub coordination_endpoint: String,
    pub coordination_port: u16,
    pub bucket: String,
    pub entry_point: String,
    pub hyperthread_const: u32,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: std::time::Duration,
    pub quiescence_cpu_pct: f32,
    /// File extension the entry-point must write its partial under (the
    /// first of the Manager's configured `fileExtensions`), so a Worker
    /// writing a partial and an Aggregator listing partials agree on what
    /// counts as a result file without either side guessing.
    pub result_extension: String,
    /// When `true`, the CPU-sampling heartbeat never refreshes `check_in`
    /// on its own — only the claim loop's own claim/complete transactions
    /// do — so a repeatedly-failing entry point that merely burns CPU
    /// cannot keep the worker looking alive forever. `false` (the default)
    /// keeps CPU sampling as the sole liveness proxy.
    pub heartbeat_tracks_claim_loop: bool,
}

impl UserData {
    /// The Object Store key a Worker fetches at boot.
    pub fn object_key(run_id: RunId) -> String {
        format!("script/userdata_{run_id}.json")
    }
}
