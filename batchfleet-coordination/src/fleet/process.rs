// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! A process-local [`CloudFleet`]: "launching an instance" spawns the
//! launch template's user-data as a child process on the local machine.
//! This is the reference implementation used for single-host demos and
//! tests (§8) in place of a real cloud provider binding, which is out of
//! scope (§1).

use crate::fleet::{CloudFleet, FleetError, InstanceState, LaunchTemplate};
use async_trait::async_trait;
use batchfleet_common::WorkerId;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

enum Handle {
    Running(Child),
    Terminated,
}

/// Spawns launch-template user-data as a local child process per instance.
/// `shell` is the interpreter invoked with the user-data on stdin (e.g.
/// `"/bin/sh"`), matching the way both the manager and worker user-data
/// scripts in the original system were plain shell.
pub struct ProcessFleet {
    shell: String,
    instances: Mutex<HashMap<WorkerId, Handle>>,
}

impl ProcessFleet {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            instances: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CloudFleet for ProcessFleet {
    async fn launch(
        &self,
        template: &LaunchTemplate,
        count: u32,
    ) -> Result<Vec<WorkerId>, FleetError> {
        let mut launched = Vec::with_capacity(count as usize);
        let mut instances = self.instances.lock().await;
        for _ in 0..count {
            let id = WorkerId(uuid::Uuid::new_v4().to_string());
            let mut command = Command::new(&self.shell);
            command
                .arg("-c")
                .arg(String::from_utf8_lossy(&template.user_data).into_owned())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let child = command.spawn().map_err(|e| FleetError::Other(e.to_string()))?;
            debug!(worker_id = %id.0, instance_type = %template.instance_type, "launched local process instance");
            instances.insert(id.clone(), Handle::Running(child));
            launched.push(id);
        }
        info!(count = launched.len(), "fleet launch complete");
        Ok(launched)
    }

    async fn terminate(&self, id: &WorkerId) -> Result<(), FleetError> {
        let mut instances = self.instances.lock().await;
        if let Some(Handle::Running(mut child)) = instances.remove(id) {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        instances.insert(id.clone(), Handle::Terminated);
        Ok(())
    }

    async fn wait_running(&self, _id: &WorkerId) -> Result<(), FleetError> {
        // A spawned process is running as soon as `spawn` succeeds.
        Ok(())
    }

    async fn wait_terminated(&self, id: &WorkerId) -> Result<(), FleetError> {
        let mut instances = self.instances.lock().await;
        if let Some(Handle::Running(child)) = instances.get_mut(id) {
            let _ = child
                .wait()
                .await
                .map_err(|e| FleetError::Other(e.to_string()))?;
        }
        instances.insert(id.clone(), Handle::Terminated);
        Ok(())
    }

    async fn describe(&self, id: &WorkerId) -> Result<InstanceState, FleetError> {
        let mut instances = self.instances.lock().await;
        match instances.get_mut(id) {
            None => Err(FleetError::Other(format!("unknown instance {}", id.0))),
            Some(Handle::Terminated) => Ok(InstanceState::Terminated),
            Some(Handle::Running(child)) => match child.try_wait() {
                Ok(Some(_)) => Ok(InstanceState::Terminated),
                Ok(None) => Ok(InstanceState::Running),
                Err(e) => Err(FleetError::Other(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[tokio::test]
    async fn launches_and_terminates_a_process() {
        let fleet = ProcessFleet::new("/bin/sh");
        let template = LaunchTemplate {
            instance_type: "local".to_string(),
            user_data: b"sleep 5".to_vec(),
        };

        let ids = fleet.launch(&template, 1).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(fleet.describe(&ids[0]).await.unwrap(), InstanceState::Running);

        fleet.terminate(&ids[0]).await.unwrap();
        assert_eq!(
            fleet.describe(&ids[0]).await.unwrap(),
            InstanceState::Terminated
        );
    }

    #[tokio::test]
    async fn a_short_lived_process_is_observed_as_terminated() {
        let fleet = ProcessFleet::new("/bin/sh");
        let template = LaunchTemplate {
            instance_type: "local".to_string(),
            user_data: b"true".to_vec(),
        };
        let ids = fleet.launch(&template, 1).await.unwrap();
        fleet.wait_terminated(&ids[0]).await.unwrap();
        assert_eq!(
            fleet.describe(&ids[0]).await.unwrap(),
            InstanceState::Terminated
        );
    }
}
