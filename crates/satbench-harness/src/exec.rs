//! Endpoint command execution seam.
//!
//! Every interaction with a network endpoint (route changes, overlay
//! launches, measurement tool invocations) goes through [`EndpointExec`].
//! The production implementation shells out to `docker exec`; tests use
//! the scripted double in [`crate::test_util`].

use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config::RoleBindings;
use crate::error::{HarnessError, Result};

/// An addressable network role at which commands execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Satellite,
    Gateway,
    Terminal,
    /// Workstation behind the gateway (throughput listener end).
    GatewayWorkstation,
    /// Workstation behind the terminal (throughput sender end).
    ClientWorkstation,
    /// Workstation running browser automation.
    BrowserWorkstation,
}

/// Captured result of an endpoint command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Blocking command execution at a named endpoint.
///
/// `detached` launches the command in the background and returns as
/// soon as the launch itself has been handed off; the output of a
/// detached command is not observable.
pub trait EndpointExec {
    fn exec(&mut self, role: Role, command: &str, detached: bool) -> Result<CommandOutput>;
}

/// Runs endpoint commands inside the containers bound to each role via
/// `docker exec`.
#[derive(Debug, Clone)]
pub struct DockerExec {
    bindings: RoleBindings,
}

impl DockerExec {
    pub fn new(bindings: RoleBindings) -> Self {
        Self { bindings }
    }
}

impl EndpointExec for DockerExec {
    fn exec(&mut self, role: Role, command: &str, detached: bool) -> Result<CommandOutput> {
        let container = self.bindings.name_for(role);
        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if detached {
            cmd.arg("-d");
        }
        cmd.args([container, "sh", "-c", command]);

        tracing::trace!(container, command, detached, "endpoint exec");
        let out = cmd.output().map_err(HarnessError::Io)?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(CommandOutput {
            exit_code: out.status.code().unwrap_or(-1),
            output,
        })
    }
}
