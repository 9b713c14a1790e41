//! Overlay scenario deployment.
//!
//! Each overlay variant expands to an ordered list of endpoint
//! deployment steps; [`ScenarioDeployer`] brings the session up when
//! needed, connects the client side to the emulated path, and then
//! walks the step list. Deployment is side-effecting and
//! non-transactional: a failure partway through leaves whatever was
//! already done in place, and recovery is a full re-deploy.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::control::SessionController;
use crate::error::{HarnessError, Result};
use crate::exec::{EndpointExec, Role};

/// A performance-enhancing overlay under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioVariant {
    /// No overlay; traffic crosses the emulated link untouched.
    Plain,
    /// Split-TCP proxy on the terminal only.
    ProxyIntegrated,
    /// Split-TCP proxy on either or both ends of the link.
    ProxyDistributed { gateway: bool, terminal: bool },
    /// Encrypted tunnel pair spanning the link.
    TunnelOverlay,
}

impl ScenarioVariant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::ProxyIntegrated => "proxy-integrated",
            Self::ProxyDistributed { .. } => "proxy-distributed",
            Self::TunnelOverlay => "tunnel",
        }
    }

    /// Overlays with a high first-connection cost get one unrecorded
    /// warm-up transfer after deployment.
    pub fn needs_warmup(&self) -> bool {
        matches!(self, Self::TunnelOverlay | Self::ProxyDistributed { .. })
    }

    /// Expand this variant into its ordered deployment steps.
    ///
    /// `session_up` selects the redeploy flavour, which first kills any
    /// previously launched overlay processes.
    pub fn steps(&self, cfg: &DeployConfig, session_up: bool) -> Vec<DeployStep> {
        match self {
            Self::Plain => Vec::new(),
            Self::TunnelOverlay => {
                let mut steps = Vec::new();
                if session_up {
                    steps.push(DeployStep::kill(
                        Role::ClientWorkstation,
                        &cfg.tunnel_process,
                    ));
                    steps.push(
                        DeployStep::kill(Role::GatewayWorkstation, &cfg.tunnel_process)
                            .settle(cfg.kill_grace()),
                    );
                }
                steps.push(DeployStep::launch(
                    Role::ClientWorkstation,
                    &cfg.tunnel_client_cmd,
                ));
                // No liveness probe exists for the tunnel; the fixed
                // settle covers the handshake over the long-delay path.
                steps.push(
                    DeployStep::launch(Role::GatewayWorkstation, &cfg.tunnel_server_cmd)
                        .settle(cfg.tunnel_settle()),
                );
                steps
            }
            Self::ProxyIntegrated => proxy_steps(cfg, &[Role::Terminal], session_up),
            Self::ProxyDistributed { gateway, terminal } => {
                let mut roles = Vec::new();
                if *terminal {
                    roles.push(Role::Terminal);
                }
                if *gateway {
                    roles.push(Role::Gateway);
                }
                proxy_steps(cfg, &roles, session_up)
            }
        }
    }
}

fn proxy_steps(cfg: &DeployConfig, roles: &[Role], session_up: bool) -> Vec<DeployStep> {
    let mut steps = Vec::new();
    if session_up {
        for (i, role) in roles.iter().enumerate() {
            let mut step = DeployStep::kill(*role, &cfg.proxy_process);
            if i == roles.len() - 1 {
                step = step.settle(cfg.kill_grace());
            }
            steps.push(step);
        }
    }
    for role in roles {
        steps.push(DeployStep::run(*role, &cfg.proxy_setup_cmd));
        steps.push(DeployStep::launch(*role, &cfg.proxy_launch_cmd));
    }
    steps
}

/// One endpoint command in a deployment sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStep {
    pub role: Role,
    pub command: String,
    pub detached: bool,
    /// Failures tolerated (e.g. killing a process that is not there).
    pub best_effort: bool,
    pub settle_after: Option<Duration>,
}

impl DeployStep {
    fn run(role: Role, command: &str) -> Self {
        Self {
            role,
            command: command.to_string(),
            detached: false,
            best_effort: false,
            settle_after: None,
        }
    }

    fn launch(role: Role, command: &str) -> Self {
        Self {
            detached: true,
            ..Self::run(role, command)
        }
    }

    fn kill(role: Role, process: &str) -> Self {
        Self {
            best_effort: true,
            ..Self::run(role, &format!("pkill -9 {process}"))
        }
    }

    fn settle(mut self, after: Duration) -> Self {
        self.settle_after = Some(after);
        self
    }
}

/// Prepares and launches the overlay-under-test at the link endpoints.
pub struct ScenarioDeployer {
    cfg: DeployConfig,
}

impl ScenarioDeployer {
    pub fn new(cfg: DeployConfig) -> Self {
        Self { cfg }
    }

    /// Deploy `variant`, bringing the session up first when it is not
    /// already.
    ///
    /// Success for a detached launch means the launch command itself
    /// returned without error; nothing verifies that the overlay is
    /// actually listening. On partial failure nothing is rolled back —
    /// call `deploy` again in full to recover.
    pub fn deploy(
        &self,
        variant: &ScenarioVariant,
        controller: &mut SessionController,
        exec: &mut dyn EndpointExec,
        session_up: bool,
    ) -> Result<()> {
        tracing::info!(scenario = variant.label(), session_up, "deploying scenario");
        if !session_up {
            controller.start()?;
            self.connect_client_route(exec)?;
        }
        for step in variant.steps(&self.cfg, session_up) {
            self.run_step(exec, &step)?;
        }
        tracing::info!(scenario = variant.label(), "scenario deployed");
        Ok(())
    }

    /// Point the terminal and the client workstation at the emulated
    /// path.
    fn connect_client_route(&self, exec: &mut dyn EndpointExec) -> Result<()> {
        tracing::debug!("connecting client endpoints to the emulated path");
        // The delete may legitimately fail (no default route yet); a
        // failed add leaves the endpoint off the emulated path.
        let _ = exec.exec(Role::Terminal, "ip route delete default", false)?;
        self.add_default_route(exec, Role::Terminal, &self.cfg.terminal_route_via)?;

        let _ = exec.exec(Role::ClientWorkstation, "ip route delete default", false)?;
        self.add_default_route(exec, Role::ClientWorkstation, &self.cfg.client_route_via)?;
        Ok(())
    }

    fn add_default_route(
        &self,
        exec: &mut dyn EndpointExec,
        role: Role,
        via: &str,
    ) -> Result<()> {
        let cmd = format!("ip route add default via {via}");
        let out = exec.exec(role, &cmd, false)?;
        if !out.success() {
            tracing::warn!(?role, via, output = %out.output, "default route add failed");
        }
        Ok(())
    }

    fn run_step(&self, exec: &mut dyn EndpointExec, step: &DeployStep) -> Result<()> {
        tracing::debug!(role = ?step.role, command = %step.command, "deploy step");
        let out = exec.exec(step.role, &step.command, step.detached)?;
        if !out.success() && !step.best_effort {
            return Err(HarnessError::CommandFailed {
                command: step.command.clone(),
                output: out.output,
            });
        }
        if let Some(settle) = step.settle_after {
            if !settle.is_zero() {
                tracing::debug!(settle_ms = settle.as_millis() as u64, "settling");
            }
            thread::sleep(settle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::test_util::{fast_session_config, NullBackend, ScriptedExec, ScriptedLink};

    fn fast_deploy_config() -> DeployConfig {
        DeployConfig {
            tunnel_settle_ms: 0,
            kill_grace_ms: 0,
            ..DeployConfig::default()
        }
    }

    fn running_controller(cfg: SessionConfig) -> SessionController {
        SessionController::new(
            Box::new(ScriptedLink::with_replies(vec![
                "SAT GW0 ST1 RUNNING RUNNING RUNNING RUNNING OK".into(),
            ])),
            Box::new(NullBackend::default()),
            cfg,
        )
    }

    #[test]
    fn plain_variant_has_no_steps() {
        assert!(ScenarioVariant::Plain
            .steps(&fast_deploy_config(), false)
            .is_empty());
        assert!(ScenarioVariant::Plain
            .steps(&fast_deploy_config(), true)
            .is_empty());
    }

    #[test]
    fn tunnel_fresh_deploy_launches_both_ends_detached() {
        let steps = ScenarioVariant::TunnelOverlay.steps(&fast_deploy_config(), false);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].role, Role::ClientWorkstation);
        assert!(steps[0].detached);
        assert_eq!(steps[1].role, Role::GatewayWorkstation);
        assert!(steps[1].detached);
        assert!(steps[1].settle_after.is_some());
    }

    #[test]
    fn tunnel_redeploy_kills_old_processes_first() {
        let steps = ScenarioVariant::TunnelOverlay.steps(&fast_deploy_config(), true);
        assert_eq!(steps.len(), 4);
        assert!(steps[0].command.starts_with("pkill"));
        assert!(steps[0].best_effort);
        assert!(steps[1].command.starts_with("pkill"));
    }

    #[test]
    fn distributed_proxy_honours_endpoint_flags() {
        let cfg = fast_deploy_config();
        let gateway_only = ScenarioVariant::ProxyDistributed {
            gateway: true,
            terminal: false,
        };
        let steps = gateway_only.steps(&cfg, false);
        assert!(steps.iter().all(|s| s.role == Role::Gateway));
        // setup then launch
        assert_eq!(steps.len(), 2);
        assert!(!steps[0].detached);
        assert!(steps[1].detached);

        let both = ScenarioVariant::ProxyDistributed {
            gateway: true,
            terminal: true,
        };
        assert_eq!(both.steps(&cfg, false).len(), 4);
    }

    #[test]
    fn deploy_starts_session_and_configures_routes_when_down() {
        let deployer = ScenarioDeployer::new(fast_deploy_config());
        let mut controller = running_controller(fast_session_config());
        let mut exec = ScriptedExec::new();

        deployer
            .deploy(&ScenarioVariant::Plain, &mut controller, &mut exec, false)
            .expect("deploy");

        let calls = exec.calls();
        let calls = calls.borrow();
        let routes: Vec<_> = calls
            .iter()
            .filter(|c| c.command.contains("ip route add default"))
            .collect();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].role, Role::Terminal);
        assert_eq!(routes[1].role, Role::ClientWorkstation);
    }

    #[test]
    fn failed_route_add_is_reported_but_not_fatal() {
        use crate::exec::CommandOutput;

        let deployer = ScenarioDeployer::new(fast_deploy_config());
        let mut controller = running_controller(fast_session_config());
        let mut exec = ScriptedExec::new();
        exec.push_response(
            "ip route add",
            CommandOutput {
                exit_code: 2,
                output: "RTNETLINK answers: File exists".into(),
            },
        );

        deployer
            .deploy(&ScenarioVariant::Plain, &mut controller, &mut exec, false)
            .expect("route add failure must not abort the deploy");

        let calls = exec.calls();
        let calls = calls.borrow();
        // Both adds were still attempted.
        let adds = calls
            .iter()
            .filter(|c| c.command.contains("ip route add default"))
            .count();
        assert_eq!(adds, 2);
    }

    #[test]
    fn deploy_onto_live_session_skips_bring_up() {
        let deployer = ScenarioDeployer::new(fast_deploy_config());
        let mut controller = running_controller(fast_session_config());
        let mut exec = ScriptedExec::new();

        deployer
            .deploy(
                &ScenarioVariant::ProxyIntegrated,
                &mut controller,
                &mut exec,
                true,
            )
            .expect("deploy");

        let calls = exec.calls();
        let calls = calls.borrow();
        assert!(calls.iter().all(|c| !c.command.contains("ip route")));
        // kill, setup, launch
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn failed_setup_step_aborts_the_deploy() {
        use crate::exec::CommandOutput;

        let deployer = ScenarioDeployer::new(fast_deploy_config());
        let mut controller = running_controller(fast_session_config());
        let mut exec = ScriptedExec::new();
        exec.push_response(
            "configure_proxy",
            CommandOutput {
                exit_code: 1,
                output: "No such file".into(),
            },
        );

        let err = deployer
            .deploy(
                &ScenarioVariant::ProxyIntegrated,
                &mut controller,
                &mut exec,
                true,
            )
            .expect_err("setup failure should propagate");
        assert!(matches!(err, HarnessError::CommandFailed { .. }));
    }
}
