// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Claims work items from the coordination store, runs the user
//! entry-point, heartbeats, and uploads partials (§4.3).

pub mod claim;
pub mod config;
pub mod environment;
pub mod error;
pub mod heartbeat;

pub use config::WorkerConfig;
pub use environment::Environment;
pub use error::WorkerError;

#[cfg(test)]
test_r::enable!();
