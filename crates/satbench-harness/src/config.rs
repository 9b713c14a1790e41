//! Harness configuration.
//!
//! Every address, container binding, command template, and wait bound
//! that the original deployment baked into call sites lives here as an
//! explicit value. The core consumes only validated values; loading
//! (TOML file, flags) is the caller's job.

use std::time::Duration;

use serde::Deserialize;

use crate::exec::Role;

/// Bounded retry with exponential backoff.
///
/// Replaces the emulator's historical "poll until it answers" loops: a
/// wait that exhausts `max_attempts` yields a `Timeout` error instead
/// of spinning forever.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given zero-based attempt, doubling up
    /// to the configured ceiling.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Control-socket and session bring-up parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address of the emulation daemon's control socket.
    pub control_addr: String,
    /// Role tokens the `status` banner must report before the session
    /// may be started.
    pub expected_roles: Vec<String>,
    /// Token the daemon prints once per running host.
    pub running_token: String,
    /// Greeting the daemon sends on a fresh control connection.
    pub banner_token: String,
    /// Retry bound for the control socket to accept connections and for
    /// the roles to register.
    pub readiness: RetryPolicy,
    /// Retry bound for all roles to reach the running state.
    pub running: RetryPolicy,
    /// Per-read timeout on the control socket.
    pub read_timeout_ms: u64,
    /// Upper bound on waiting for an `OK` acknowledgement.
    pub ack_timeout_ms: u64,
    /// Settle after the daemon acknowledges `stop`; it acks a little
    /// before the platform has actually wound down.
    pub stop_grace_ms: u64,
    /// Settle between the roles registering and issuing `start`.
    pub start_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_addr: "127.0.0.1:5656".into(),
            expected_roles: vec!["SAT".into(), "GW0".into(), "ST1".into()],
            running_token: "RUNNING".into(),
            banner_token: "help".into(),
            readiness: RetryPolicy::default(),
            running: RetryPolicy::default(),
            read_timeout_ms: 2_000,
            ack_timeout_ms: 15_000,
            stop_grace_ms: 1_000,
            start_grace_ms: 1_000,
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }
}

/// Container names behind each network role.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoleBindings {
    pub satellite: String,
    pub gateway: String,
    pub terminal: String,
    pub gateway_workstation: String,
    pub client_workstation: String,
    pub browser_workstation: String,
}

impl Default for RoleBindings {
    fn default() -> Self {
        Self {
            satellite: "satellite".into(),
            gateway: "gateway".into(),
            terminal: "terminal".into(),
            gateway_workstation: "ws-gw".into(),
            client_workstation: "ws-st".into(),
            browser_workstation: "ws-browser".into(),
        }
    }
}

impl RoleBindings {
    pub fn name_for(&self, role: Role) -> &str {
        match role {
            Role::Satellite => &self.satellite,
            Role::Gateway => &self.gateway,
            Role::Terminal => &self.terminal,
            Role::GatewayWorkstation => &self.gateway_workstation,
            Role::ClientWorkstation => &self.client_workstation,
            Role::BrowserWorkstation => &self.browser_workstation,
        }
    }
}

/// Overlay deployment parameters: route configuration for connecting
/// the client side to the emulated path, and the per-variant commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Next hop for the terminal's default route into the spot beam.
    pub terminal_route_via: String,
    /// Next hop for the client workstation's default route.
    pub client_route_via: String,
    /// Launches the tunnel client on the client workstation.
    pub tunnel_client_cmd: String,
    /// Launches the paired tunnel server on the gateway workstation.
    pub tunnel_server_cmd: String,
    /// Process name used to kill a previously launched tunnel.
    pub tunnel_process: String,
    /// One-time proxy configuration step.
    pub proxy_setup_cmd: String,
    /// Launches the proxy, detached.
    pub proxy_launch_cmd: String,
    /// Process name used to kill a previously launched proxy.
    pub proxy_process: String,
    /// Wait after launching the tunnel pair. The handshake over the
    /// long-delay path is slow and there is no liveness probe to poll.
    pub tunnel_settle_ms: u64,
    /// Wait after killing prior overlay processes.
    pub kill_grace_ms: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            terminal_route_via: "172.22.0.3".into(),
            client_route_via: "172.21.0.4".into(),
            tunnel_client_cmd: "pep-tunnel -client -gateway 172.22.0.9".into(),
            tunnel_server_cmd: "pep-tunnel".into(),
            tunnel_process: "pep-tunnel".into(),
            proxy_setup_cmd: "bash /opensand_config/configure_proxy.sh".into(),
            proxy_launch_cmd: "bash /opensand_config/launch_proxy.sh".into(),
            proxy_process: "pepsal".into(),
            tunnel_settle_ms: 20_000,
            kill_grace_ms: 1_000,
        }
    }
}

impl DeployConfig {
    pub fn tunnel_settle(&self) -> Duration {
        Duration::from_millis(self.tunnel_settle_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Measurement tool invocation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Throughput tool binary (server and client ends).
    pub throughput_tool: String,
    /// Address of the throughput listener as seen from the client.
    pub server_addr: String,
    /// Browser-automation binary on the browser workstation.
    pub browser_cmd: String,
    /// Route the browser workstation onto the emulated path before a
    /// page-load trial, when set.
    pub browser_route_via: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            throughput_tool: "iperf3".into(),
            server_addr: "172.22.0.9".into(),
            browser_cmd: "/usr/src/app/bin/browsertime.js".into(),
            browser_route_via: Some("172.21.0.4".into()),
        }
    }
}

/// Impairment injection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    /// Named emulation scenario whose channel profiles carry the
    /// attenuation tables. Reloaded after every profile rewrite since
    /// the daemon only reads it at scenario load.
    pub attenuation_scenario: String,
    /// Device carrying the emulated traffic on loss-target endpoints.
    pub loss_device: String,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            attenuation_scenario: "attenuation_scenario".into(),
            loss_device: "eth0".into(),
        }
    }
}

/// Trial supervision parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Cap on redeploy-and-retry recoveries per impairment level. The
    /// recovery heuristic itself is best effort; the cap keeps a dead
    /// link from looping forever.
    pub max_recoveries: u32,
    /// Size of the unrecorded warm-up transfer run after deploying an
    /// overlay with a high first-connection cost.
    pub warmup_bytes: u64,
    /// Timeout for the warm-up transfer.
    pub warmup_timeout_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            max_recoveries: 5,
            warmup_bytes: 50_000,
            warmup_timeout_secs: 120,
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub session: SessionConfig,
    pub roles: RoleBindings,
    pub deploy: DeployConfig,
    pub benchmark: BenchmarkConfig,
    pub injector: InjectorConfig,
    pub campaign: CampaignConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(5_000));
        assert_eq!(policy.backoff(63), Duration::from_millis(5_000));
    }

    #[test]
    fn config_parses_from_partial_toml() {
        let cfg: HarnessConfig = toml::from_str(
            r#"
            [session]
            control_addr = "10.0.0.1:5656"

            [campaign]
            max_recoveries = 2
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.session.control_addr, "10.0.0.1:5656");
        assert_eq!(cfg.campaign.max_recoveries, 2);
        // untouched sections keep their defaults
        assert_eq!(cfg.roles.terminal, "terminal");
        assert_eq!(cfg.deploy.tunnel_settle_ms, 20_000);
    }
}
