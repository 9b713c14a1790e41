//! Impairment injection into the live emulated path.
//!
//! Attenuation is not live-patchable: the daemon only reads channel
//! profiles at scenario load, so applying a new attenuation value
//! rewrites the profiles (through the [`AttenuationProfiles`]
//! collaborator) and reloads the attenuation scenario. Packet loss is
//! applied dynamically with a netem queue-discipline change on the
//! target endpoints.

use serde::{Deserialize, Serialize};

use crate::config::InjectorConfig;
use crate::control::SessionController;
use crate::error::{HarnessError, Result};
use crate::exec::{EndpointExec, Role};

/// Direction of an attenuated link, viewed from the satellite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    Down,
    Up,
}

/// One induced link degradation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpairmentLevel {
    /// Attenuation in dB on one direction of the emulated channel.
    Attenuation { db: f64, link: LinkDirection },
    /// Random packet loss in percent on the selected endpoints.
    PacketLoss { percent: f64, targets: Vec<Role> },
}

impl ImpairmentLevel {
    pub fn down_attenuation(db: f64) -> Self {
        Self::Attenuation {
            db,
            link: LinkDirection::Down,
        }
    }

    /// Short label for logs and reports, e.g. `atten_down_2.5dB`.
    pub fn label(&self) -> String {
        match self {
            Self::Attenuation { db, link } => {
                let dir = match link {
                    LinkDirection::Down => "down",
                    LinkDirection::Up => "up",
                };
                format!("atten_{dir}_{db}dB")
            }
            Self::PacketLoss { percent, .. } => format!("loss_{percent}pct"),
        }
    }
}

/// Rewrites attenuation parameters in the endpoints' channel profiles.
///
/// The actual rewrite is file substitution in the emulator's profile
/// tree and lives outside the core.
pub trait AttenuationProfiles {
    fn set_attenuation(&mut self, link: LinkDirection, db: f64) -> Result<()>;
}

/// Substrings in `tc` output meaning the loss discipline has not been
/// installed yet, so `change` must fall back to `add`.
const QDISC_MISSING_MARKERS: &[&str] = &["No such file or directory", "Qdisc not found"];

/// Applies impairment levels to the emulated path.
///
/// Idempotent: re-applying the level that is already in effect is a
/// no-op and in particular does not trigger a scenario reload.
pub struct ImpairmentInjector {
    profiles: Box<dyn AttenuationProfiles>,
    cfg: InjectorConfig,
    applied: Option<ImpairmentLevel>,
}

impl ImpairmentInjector {
    pub fn new(profiles: Box<dyn AttenuationProfiles>, cfg: InjectorConfig) -> Self {
        Self {
            profiles,
            cfg,
            applied: None,
        }
    }

    /// The level currently in effect, if any.
    pub fn applied(&self) -> Option<&ImpairmentLevel> {
        self.applied.as_ref()
    }

    /// Apply `level`, reloading the emulation scenario when required.
    pub fn apply(
        &mut self,
        level: &ImpairmentLevel,
        controller: &mut SessionController,
        exec: &mut dyn EndpointExec,
    ) -> Result<()> {
        if self.applied.as_ref() == Some(level) {
            tracing::debug!(level = %level.label(), "impairment already in effect");
            return Ok(());
        }
        match level {
            ImpairmentLevel::Attenuation { db, link } => {
                tracing::debug!(db, ?link, "setting attenuation");
                self.profiles.set_attenuation(*link, *db)?;
                // Profiles are only read at scenario load.
                controller.load_scenario(&self.cfg.attenuation_scenario)?;
            }
            ImpairmentLevel::PacketLoss { percent, targets } => {
                for role in targets {
                    self.set_loss_on(exec, *role, *percent)?;
                }
            }
        }
        self.applied = Some(level.clone());
        Ok(())
    }

    /// Re-apply `level` unconditionally.
    ///
    /// Used after a recovery redeploy, where the session restart has
    /// discarded whatever was in effect even though the injector's
    /// book-keeping still matches.
    pub fn reapply(
        &mut self,
        level: &ImpairmentLevel,
        controller: &mut SessionController,
        exec: &mut dyn EndpointExec,
    ) -> Result<()> {
        self.applied = None;
        self.apply(level, controller, exec)
    }

    fn set_loss_on(&self, exec: &mut dyn EndpointExec, role: Role, percent: f64) -> Result<()> {
        let dev = &self.cfg.loss_device;
        let change = format!("tc qdisc change dev {dev} root netem loss {percent}%");
        let out = exec.exec(role, &change, false)?;
        if out.success() {
            tracing::debug!(?role, percent, "loss discipline changed");
            return Ok(());
        }
        if QDISC_MISSING_MARKERS.iter().any(|m| out.output.contains(m)) {
            // First application on this endpoint: the discipline does
            // not exist yet.
            let add = format!("tc qdisc add dev {dev} root netem loss {percent}%");
            let out = exec.exec(role, &add, false)?;
            if out.success() {
                tracing::debug!(?role, percent, "loss discipline added");
                return Ok(());
            }
            return Err(HarnessError::CommandFailed {
                command: add,
                output: out.output,
            });
        }
        Err(HarnessError::CommandFailed {
            command: change,
            output: out.output,
        })
    }
}
