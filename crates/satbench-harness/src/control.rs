//! Emulation session control.
//!
//! The emulation daemon is driven over a persistent line-oriented text
//! connection: `status`, `start`, `stop`, and `scenario <name>` go out
//! as single lines; responses carry role/state tokens and an `OK`
//! acknowledgement sentinel that must be read before any payload.
//!
//! [`SessionController`] owns the session state machine. Backing
//! process lifecycle (container orchestration) is an external
//! collaborator behind [`SessionBackend`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{RetryPolicy, SessionConfig};
use crate::error::{HarnessError, Result};

/// Acknowledgement sentinel preceding any command-specific payload.
pub const ACK_TOKEN: &str = "OK";

/// Lifecycle of the emulated platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Initializing,
    Ready,
    Running,
}

/// Blocking, line-oriented connection to the daemon's control socket.
///
/// `open` (re)establishes the connection; the daemon drops the socket
/// whenever the backing processes restart, so every bring-up starts
/// with a fresh connect.
pub trait ControlLink {
    fn open(&mut self) -> Result<()>;
    fn send_line(&mut self, line: &str) -> Result<()>;
    /// Read until the accumulated response contains `token`; returns
    /// everything read. Bounded by the acknowledgement timeout.
    fn recv_until(&mut self, token: &str) -> Result<String>;
    /// One read's worth of response text; empty when the daemon had
    /// nothing to say within the read timeout.
    fn recv_chunk(&mut self) -> Result<String>;
    fn close(&mut self) {}
}

/// Launches and tears down the processes backing the emulated platform.
pub trait SessionBackend {
    fn launch(&mut self) -> Result<()>;
    fn teardown(&mut self) -> Result<()>;
}

/// TCP implementation of [`ControlLink`].
#[derive(Debug)]
pub struct TcpControlLink {
    addr: String,
    connect_policy: RetryPolicy,
    read_timeout: Duration,
    ack_timeout: Duration,
    banner_token: String,
    stream: Option<TcpStream>,
}

impl TcpControlLink {
    pub fn new(cfg: &SessionConfig) -> Self {
        Self {
            addr: cfg.control_addr.clone(),
            connect_policy: cfg.readiness.clone(),
            read_timeout: cfg.read_timeout(),
            ack_timeout: cfg.ack_timeout(),
            banner_token: cfg.banner_token.clone(),
            stream: None,
        }
    }

    fn read_some(&mut self) -> Result<String> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HarnessError::Protocol("control link is not open".into()))?;
        let mut buf = [0u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => Err(HarnessError::Protocol(
                "control connection closed by daemon".into(),
            )),
            Ok(n) => Ok(String::from_utf8_lossy(&buf[..n]).into_owned()),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ControlLink for TcpControlLink {
    fn open(&mut self) -> Result<()> {
        self.stream = None;
        let started = Instant::now();
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(&self.addr) {
                Ok(s) => break s,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.connect_policy.max_attempts {
                        return Err(HarnessError::Timeout {
                            what: format!("control socket at {}", self.addr),
                            waited: started.elapsed(),
                        });
                    }
                    tracing::debug!(%err, attempt, "control socket not accepting yet");
                    thread::sleep(self.connect_policy.backoff(attempt));
                }
            }
        };
        stream.set_read_timeout(Some(self.read_timeout))?;
        self.stream = Some(stream);
        tracing::debug!(addr = %self.addr, "control socket connected");

        // The daemon greets every fresh connection with a help banner;
        // consume it before issuing commands.
        let banner = self.banner_token.clone();
        let _ = self.recv_until(&banner)?;
        let _ = self.recv_chunk()?;
        Ok(())
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| HarnessError::Protocol("control link is not open".into()))?;
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        tracing::trace!(line, "control >");
        Ok(())
    }

    fn recv_until(&mut self, token: &str) -> Result<String> {
        let started = Instant::now();
        let mut acc = String::new();
        loop {
            acc.push_str(&self.read_some()?);
            if acc.contains(token) {
                tracing::trace!(token, "control <");
                return Ok(acc);
            }
            if started.elapsed() >= self.ack_timeout {
                return Err(HarnessError::Timeout {
                    what: format!("`{token}` from control daemon"),
                    waited: started.elapsed(),
                });
            }
        }
    }

    fn recv_chunk(&mut self) -> Result<String> {
        self.read_some()
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

/// Brings the emulated platform up and down with `docker-compose`.
#[derive(Debug, Clone)]
pub struct ComposeBackend {
    project_dir: PathBuf,
}

impl ComposeBackend {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    fn compose(&self, args: &[&str]) -> Result<std::process::Output> {
        Ok(Command::new("docker-compose")
            .args(args)
            .current_dir(&self.project_dir)
            .output()?)
    }
}

impl SessionBackend for ComposeBackend {
    fn launch(&mut self) -> Result<()> {
        // Shut down any leftover session first.
        let _ = self.compose(&["down"]);
        let out = self.compose(&["up", "-d"])?;
        if !out.status.success() {
            return Err(HarnessError::CommandFailed {
                command: "docker-compose up -d".into(),
                output: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        let out = self.compose(&["down"])?;
        if !out.status.success() {
            return Err(HarnessError::CommandFailed {
                command: "docker-compose down".into(),
                output: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Drives the emulation daemon's session state machine.
///
/// Created once per harness run and torn down at run end. Overlay
/// processes deployed on top of a session are *not* tracked here;
/// re-establishing them after a restart is the deployer's job.
pub struct SessionController {
    link: Box<dyn ControlLink>,
    backend: Box<dyn SessionBackend>,
    cfg: SessionConfig,
    state: SessionState,
    active_scenario: Option<String>,
}

impl SessionController {
    pub fn new(
        link: Box<dyn ControlLink>,
        backend: Box<dyn SessionBackend>,
        cfg: SessionConfig,
    ) -> Self {
        Self {
            link,
            backend,
            cfg,
            state: SessionState::Stopped,
            active_scenario: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_scenario(&self) -> Option<&str> {
        self.active_scenario.as_deref()
    }

    /// Launch the backing processes and start the emulation.
    ///
    /// Polls `status` until all expected roles have registered, then
    /// issues `start` and polls again until every role reports the
    /// running state. `start` is never sent before a `status` response
    /// has shown all roles present.
    pub fn start(&mut self) -> Result<()> {
        tracing::info!("starting emulation session");
        self.state = SessionState::Initializing;
        self.active_scenario = None;
        self.backend.launch()?;
        self.link.open()?;

        self.await_roles()?;
        self.state = SessionState::Ready;

        // Hosts register slightly before the daemon will accept `start`.
        thread::sleep(self.cfg.start_grace());
        self.link.send_line("start")?;
        self.await_running()?;
        self.state = SessionState::Running;
        tracing::info!("emulation session running");
        Ok(())
    }

    /// Tear the session down. Idempotent: stopping a stopped session is
    /// a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Stopped {
            tracing::debug!("session already stopped");
            return Ok(());
        }
        tracing::info!("stopping emulation session");
        self.backend.teardown()?;
        self.link.close();
        self.state = SessionState::Stopped;
        self.active_scenario = None;
        Ok(())
    }

    /// Reload the emulated profile by cycling the daemon through
    /// `stop` → `scenario <name>` → `start`.
    ///
    /// Impairment values in channel profiles are only read at scenario
    /// load, so every profile rewrite is followed by a call here.
    pub fn load_scenario(&mut self, name: &str) -> Result<()> {
        tracing::debug!(scenario = name, "reloading emulation scenario");
        self.link.open()?;

        self.link.send_line("stop")?;
        self.link.recv_until(ACK_TOKEN)?;
        let _ = self.link.recv_chunk()?;
        self.state = SessionState::Stopped;

        // The daemon acks the stop a little before the platform has
        // actually wound down.
        thread::sleep(self.cfg.stop_grace());

        self.link.send_line(&format!("scenario {name}"))?;
        self.link.recv_until(ACK_TOKEN)?;
        let _ = self.link.recv_chunk()?;
        self.state = SessionState::Ready;

        self.link.send_line("start")?;
        self.link.recv_until(ACK_TOKEN)?;
        let _ = self.link.recv_chunk()?;
        self.state = SessionState::Running;
        self.active_scenario = Some(name.to_string());
        tracing::debug!(scenario = name, "scenario running");
        Ok(())
    }

    fn await_roles(&mut self) -> Result<()> {
        let policy = self.cfg.readiness.clone();
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            self.link.send_line("status")?;
            let response = self.link.recv_chunk()?;
            if self
                .cfg
                .expected_roles
                .iter()
                .all(|role| response.contains(role.as_str()))
            {
                tracing::debug!(elapsed = ?started.elapsed(), "all roles registered");
                return Ok(());
            }
            attempt += 1;
            if attempt >= policy.max_attempts {
                return Err(HarnessError::Timeout {
                    what: "emulation roles to register".into(),
                    waited: started.elapsed(),
                });
            }
            thread::sleep(policy.backoff(attempt));
        }
    }

    fn await_running(&mut self) -> Result<()> {
        let policy = self.cfg.running.clone();
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            self.link.send_line("status")?;
            let response = self.link.recv_chunk()?;
            // The status banner repeats the running token once per
            // active host, plus once for the platform itself.
            let running = response.matches(self.cfg.running_token.as_str()).count();
            if running > self.cfg.expected_roles.len() {
                tracing::debug!(elapsed = ?started.elapsed(), "all roles running");
                return Ok(());
            }
            attempt += 1;
            if attempt >= policy.max_attempts {
                return Err(HarnessError::Timeout {
                    what: "all roles to report running".into(),
                    waited: started.elapsed(),
                });
            }
            thread::sleep(policy.backoff(attempt));
        }
    }
}
