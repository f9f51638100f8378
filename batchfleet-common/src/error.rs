// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `SafeDisplay` split used across every error enum in the workspace:
//! `Display` renders full diagnostic detail for internal logs, `to_safe_string`
//! renders a redacted summary fit for a user-visible manager log or exit
//! message.

use thiserror::Error;

pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Errors from encoding/decoding the versioned wire envelope (§3.1).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
    #[error("unsupported envelope version {found}, this build only understands {supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
}

impl SafeDisplay for ProtocolError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}
