// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Coordination-store key namespacing and the versioned wire envelope.
//! Every value written to the coordination store goes through
//! [`Envelope::encode`]/[`Envelope::decode`] so that no call site
//! hand-rolls JSON and no reader has to guess at schema compatibility.

use crate::error::ProtocolError;
use crate::model::RunId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The only envelope version this build understands. Bumping this is a
/// breaking protocol change: old values must be migrated out-of-band, never
/// silently reinterpreted.
pub const ENVELOPE_VERSION: u16 = 1;

/// The four per-run keys, namespaced by [`RunId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    All,
    Remaining,
    InProgress,
    Completed,
}

impl Key {
    fn suffix(self) -> &'static str {
        match self {
            Key::All => "all",
            Key::Remaining => "remaining",
            Key::InProgress => "in_progress",
            Key::Completed => "completed",
        }
    }

    pub fn namespaced(self, run: RunId) -> String {
        format!("{run}_{}", self.suffix())
    }

    pub const ALL_KEYS: [Key; 4] = [Key::All, Key::Remaining, Key::InProgress, Key::Completed];
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u16,
    payload: T,
}

/// Encode a value as a versioned envelope.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&Envelope {
        version: ENVELOPE_VERSION,
        payload: value,
    })
    .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a versioned envelope, rejecting anything not written at
/// [`ENVELOPE_VERSION`] rather than attempting best-effort compatibility.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: envelope.version,
            supported: ENVELOPE_VERSION,
        });
    }
    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn round_trips_a_value() {
        let bytes = encode(&vec![1i64, 2, 3]).unwrap();
        let value: Vec<i64> = decode(&bytes).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes = serde_json::to_vec(&serde_json::json!({"version": 99, "payload": []})).unwrap();
        let result: Result<Vec<i64>, _> = decode(&bytes);
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedVersion {
                found: 99,
                supported: ENVELOPE_VERSION
            })
        ));
    }

    #[test]
    fn namespaces_keys_by_run() {
        let run = RunId::new();
        assert_eq!(Key::All.namespaced(run), format!("{run}_all"));
        assert_eq!(Key::Remaining.namespaced(run), format!("{run}_remaining"));
        assert_eq!(
            Key::InProgress.namespaced(run),
            format!("{run}_in_progress")
        );
        assert_eq!(Key::Completed.namespaced(run), format!("{run}_completed"));
    }
}
