//! Orchestration core for evaluating performance-enhancing proxies and
//! tunnels over an emulated long-delay satellite link.
//!
//! The harness drives an external network-emulation daemon through its
//! line-oriented control socket, injects link impairments (attenuation,
//! packet loss) into the emulated path, deploys one of several overlay
//! variants at the link endpoints, and supervises repeated measurement
//! trials with automatic recovery from broken connections.
//!
//! Execution is single-threaded and fully synchronous: every external
//! call blocks the orchestration thread and trials are strictly
//! serialized. Container lifecycle, configuration-file substitution, and
//! CLI plumbing are external collaborators reached through the seams in
//! [`exec`], [`control`], and [`impairment`].

pub mod benchmark;
pub mod campaign;
pub mod config;
pub mod control;
pub mod error;
pub mod exec;
pub mod impairment;
pub mod results;
pub mod scenario;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use benchmark::{BenchmarkRunner, MeasurementResult, PageLoadStats, ThroughputStats};
pub use campaign::{Campaign, TrialSpec};
pub use config::HarnessConfig;
pub use control::{SessionController, SessionState};
pub use error::{HarnessError, Result};
pub use exec::{EndpointExec, Role};
pub use impairment::{ImpairmentInjector, ImpairmentLevel, LinkDirection};
pub use results::{ResultSet, TrialRecord};
pub use scenario::{ScenarioDeployer, ScenarioVariant};
