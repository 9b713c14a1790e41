//! Harness error taxonomy.
//!
//! Protocol and parse failures are recovered locally at the measurement
//! boundary (they become a `Failed` trial result plus a diagnostic log
//! line); a broken link triggers one redeploy-and-retry per occurrence;
//! timeouts are enforced uniformly for session bring-up, scenario
//! reloads, and throughput trials. None of these abort a whole run.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The control socket response was missing an expected token.
    #[error("control protocol error: {0}")]
    Protocol(String),

    /// A measurement tool's output was not in the expected shape.
    #[error("unable to parse measurement output: {0}")]
    MeasurementParse(String),

    /// The emulated path reported zero throughput; the link is
    /// presumed broken and must be redeployed.
    #[error("emulated link reported zero throughput")]
    LinkBroken,

    /// A bounded wait elapsed without the expected condition.
    #[error("timed out waiting for {what} after {waited:?}")]
    Timeout { what: String, waited: Duration },

    /// An endpoint command ran but exited with a failure it could not
    /// recover from.
    #[error("endpoint command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid harness configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
