// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! In-memory fakes and test-rig helpers shared by the property tests and
//! end-to-end scenario tests in `tests/`. Not published; depended on only
//! as a dev-dependency-style workspace crate.

pub mod fakes;
pub mod harness;

pub use fakes::{FakeCloudFleet, FakeCoordinationStore, FakeObjectStore};
pub use harness::Harness;

#[cfg(test)]
test_r::enable!();
