//! `ProcessDispatcher`: runs each payload's script as a local subprocess.
//!
//! The script is executed through the configured shell (`sh -c` by default)
//! with the payload exposed as environment variables:
//!
//! | variable            | value                                   |
//! |---------------------|-----------------------------------------|
//! | `WORK_NAME`         | `payload.name`                          |
//! | `WORK_TARGET`       | `payload.target`                        |
//! | `WORK_DRY_RUN`      | `1` or `0`                              |
//! | `WORK_PARAM_<KEY>`  | each entry of `payload.params`          |

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{DispatchError, WorkDispatcher, WorkItemId, WorkPayload, WorkStatus};

/// Once reaped or killed, only the outcome is kept.
enum ChildEntry {
    Live { name: String, child: Child },
    Done(WorkStatus),
}

/// Dispatcher backed by `tokio::process`.
pub struct ProcessDispatcher {
    shell: String,
    children: Mutex<HashMap<WorkItemId, ChildEntry>>,
}

impl ProcessDispatcher {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Use a different shell binary; it must accept `-c <script>`.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn command_for(&self, payload: &WorkPayload) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&payload.script)
            .env("WORK_NAME", &payload.name)
            .env("WORK_TARGET", &payload.target)
            .env("WORK_DRY_RUN", if payload.dry_run { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if let Value::Object(params) = &payload.params {
            for (key, value) in params {
                cmd.env(param_env_name(key), param_env_value(value));
            }
        }
        cmd
    }
}

impl Default for ProcessDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// `release-tag` → `WORK_PARAM_RELEASE_TAG`.
fn param_env_name(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("WORK_PARAM_{normalized}")
}

fn param_env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl WorkDispatcher for ProcessDispatcher {
    async fn dispatch(&self, payload: &WorkPayload) -> Result<WorkItemId, DispatchError> {
        let child = self
            .command_for(payload)
            .spawn()
            .map_err(|e| DispatchError::Spawn {
                name: payload.name.clone(),
                message: e.to_string(),
            })?;

        let id = WorkItemId::new();
        info!(work_item = %id, name = %payload.name, pid = ?child.id(), "work process started");

        self.children.lock().await.insert(
            id,
            ChildEntry::Live {
                name: payload.name.clone(),
                child,
            },
        );
        Ok(id)
    }

    async fn poll_status(&self, id: &WorkItemId) -> Result<WorkStatus, DispatchError> {
        let mut children = self.children.lock().await;
        let entry = children
            .get_mut(id)
            .ok_or(DispatchError::UnknownWorkItem(*id))?;

        let (name, child) = match &mut *entry {
            ChildEntry::Done(outcome) => return Ok(outcome.clone()),
            ChildEntry::Live { name, child } => (name, child),
        };

        let exit = child.try_wait().map_err(|e| DispatchError::Poll {
            id: *id,
            message: e.to_string(),
        })?;

        let Some(exit) = exit else {
            return Ok(WorkStatus::Running);
        };

        let outcome = if exit.success() {
            WorkStatus::Succeeded
        } else {
            let reason = match exit.code() {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            };
            WorkStatus::Failed { reason }
        };
        debug!(work_item = %id, name = %name, ?outcome, "work process finished");
        *entry = ChildEntry::Done(outcome.clone());
        Ok(outcome)
    }

    async fn cancel(&self, id: &WorkItemId) -> Result<(), DispatchError> {
        let mut children = self.children.lock().await;
        let entry = children
            .get_mut(id)
            .ok_or(DispatchError::UnknownWorkItem(*id))?;

        let ChildEntry::Live { name, child } = &mut *entry else {
            return Ok(());
        };

        // Kills and reaps; an already exited child is just reaped.
        if let Err(e) = child.kill().await {
            warn!(work_item = %id, error = %e, "kill failed");
        }
        info!(work_item = %id, name = %name, "work process cancelled");
        *entry = ChildEntry::Done(WorkStatus::Cancelled);
        Ok(())
    }
}
