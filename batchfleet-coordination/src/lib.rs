// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The three external contracts the Manager and Worker are built against
//! (§6): the Coordination Store, the Cloud Fleet, and the Object Store,
//! plus the reference implementations used outside of tests.

pub mod fleet;
pub mod objects;
pub mod store;

pub use fleet::{CloudFleet, FleetError, InstanceState, LaunchTemplate};
pub use objects::{ObjectStore, ObjectStoreError};
pub use store::{
    optimistic_update, CoordinationError, CoordinationStore, InMemoryWatch, Outcome, Snapshot,
};

#[cfg(test)]
test_r::enable!();
