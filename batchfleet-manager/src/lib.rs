// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Run supervisor: seeds the coordination store, launches the initial
//! fleet, detects and replaces stalled workers, and aggregates results
//! once the run completes.

pub mod aggregator;
pub mod config;
pub mod environment;
pub mod error;
pub mod supervisor;

pub use aggregator::{Combine, ConcatCombine};
pub use config::ManagerConfig;
pub use environment::Environment;
pub use error::ManagerError;

#[cfg(test)]
test_r::enable!();
