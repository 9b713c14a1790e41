//! Measurement trials.
//!
//! A trial is one throughput transfer or one page-load batch executed
//! under a fixed scenario/impairment condition. Trial-level failures
//! never propagate as errors: a broken control channel, unparseable
//! tool output, or an elapsed timeout all classify the trial as
//! [`MeasurementResult::Failed`] with a diagnostic log line, so the
//! surrounding aggregation loop keeps running.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::BenchmarkConfig;
use crate::error::{HarnessError, Result};
use crate::exec::{EndpointExec, Role};

/// End-of-test summary of a throughput transfer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub sent_bytes: u64,
    pub sent_bps: f64,
    pub received_bytes: u64,
    pub received_bps: f64,
}

impl ThroughputStats {
    pub fn sent_mbps(&self) -> f64 {
        self.sent_bps / 1_000_000.0
    }

    pub fn received_mbps(&self) -> f64 {
        self.received_bps / 1_000_000.0
    }
}

/// Timing samples from one page-load batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageLoadStats {
    /// One sample per `Load:` token, in milliseconds.
    pub samples_ms: Vec<f64>,
    /// Count of explicit load-error tokens; independent of the samples.
    pub errors: u32,
}

/// Outcome of a single measurement trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementResult {
    Throughput(ThroughputStats),
    PageLoad(PageLoadStats),
    /// The trial produced nothing usable; carries zero-valued
    /// semantics for aggregation.
    Failed,
}

impl MeasurementResult {
    pub fn throughput(&self) -> Option<&ThroughputStats> {
        match self {
            Self::Throughput(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn page_load(&self) -> Option<&PageLoadStats> {
        match self {
            Self::PageLoad(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Marker the throughput tool prints when its control connection dies
/// mid-transfer.
const CONTROL_CLOSED_MARKER: &str = "control socket has closed unexpectedly";

/// Exit code of `timeout(1)` when the bounded command overran.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Executes measurement trials at the endpoints.
pub struct BenchmarkRunner {
    cfg: BenchmarkConfig,
}

impl BenchmarkRunner {
    pub fn new(cfg: BenchmarkConfig) -> Self {
        Self { cfg }
    }

    /// Run one bounded throughput transfer across the emulated link.
    ///
    /// Starts a fresh listener on the gateway workstation, then runs a
    /// reverse transfer of `transfer_bytes` from the client
    /// workstation, bounded by `timeout`.
    pub fn run_throughput_trial(
        &self,
        exec: &mut dyn EndpointExec,
        transfer_bytes: u64,
        timeout: Duration,
    ) -> MeasurementResult {
        tracing::debug!(transfer_bytes, "starting throughput trial");
        let tool = &self.cfg.throughput_tool;

        // A stale listener from the previous trial would refuse the
        // new connection.
        let kill = format!("pkill -9 {tool}");
        if let Err(err) = exec.exec(Role::GatewayWorkstation, &kill, false) {
            tracing::error!(%err, "could not reset throughput listener");
            return MeasurementResult::Failed;
        }
        if let Err(err) = exec.exec(Role::GatewayWorkstation, &format!("{tool} -s"), true) {
            tracing::error!(%err, "could not start throughput listener");
            return MeasurementResult::Failed;
        }

        let transfer = format!(
            "timeout {} {tool} -c {} -R --json -n {transfer_bytes}",
            timeout.as_secs(),
            self.cfg.server_addr,
        );
        let out = match exec.exec(Role::ClientWorkstation, &transfer, false) {
            Ok(out) => out,
            Err(err) => {
                tracing::error!(%err, "throughput transfer did not execute");
                return MeasurementResult::Failed;
            }
        };
        if out.exit_code == TIMEOUT_EXIT_CODE {
            tracing::warn!(timeout_s = timeout.as_secs(), "throughput trial timed out");
            return MeasurementResult::Failed;
        }

        match parse_throughput_summary(&out.output) {
            Ok(stats) => {
                tracing::debug!(
                    sent_bps = stats.sent_bps,
                    received_bps = stats.received_bps,
                    "throughput trial complete"
                );
                MeasurementResult::Throughput(stats)
            }
            Err(HarnessError::LinkBroken) => {
                tracing::warn!("throughput control connection lost, transfer failed");
                MeasurementResult::Failed
            }
            Err(err) => {
                tracing::error!(%err, raw = %out.output, "unable to parse throughput summary");
                MeasurementResult::Failed
            }
        }
    }

    /// Run browser automation against `url` and collect one timing
    /// sample per reported page load.
    ///
    /// An empty sample set is recorded with a warning, not treated as
    /// fatal; explicit load-error tokens are counted separately and do
    /// not suppress good samples from the same batch.
    pub fn run_page_load_trial(
        &self,
        exec: &mut dyn EndpointExec,
        url: &str,
        iterations: u32,
    ) -> MeasurementResult {
        tracing::debug!(url, iterations, "starting page-load trial");

        // The browser workstation may still have its default route on
        // the management network.
        if let Some(via) = &self.cfg.browser_route_via {
            let _ = exec.exec(Role::BrowserWorkstation, "ip route del default", false);
            let _ = exec.exec(
                Role::BrowserWorkstation,
                &format!("ip route add default via {via}"),
                false,
            );
        }

        let cmd = format!(
            "{} -n {iterations} --headless --video false --visualElements false {url}",
            self.cfg.browser_cmd,
        );
        let out = match exec.exec(Role::BrowserWorkstation, &cmd, false) {
            Ok(out) => out,
            Err(err) => {
                tracing::error!(%err, url, "browser automation did not execute");
                return MeasurementResult::Failed;
            }
        };

        let stats = parse_page_load_output(&out.output);
        if stats.samples_ms.is_empty() {
            tracing::warn!(url, raw = %out.output, "no page-load samples in browser output");
        } else {
            tracing::debug!(
                url,
                samples = stats.samples_ms.len(),
                errors = stats.errors,
                "page-load trial complete"
            );
        }
        MeasurementResult::PageLoad(stats)
    }
}

/// Parse the throughput tool's JSON end-of-test summary.
fn parse_throughput_summary(raw: &str) -> Result<ThroughputStats> {
    if raw.contains(CONTROL_CLOSED_MARKER) {
        return Err(HarnessError::LinkBroken);
    }

    // The tool's JSON output embeds a stray newline after the host OS
    // name; scrub it before parsing.
    let cleaned = raw.trim_end_matches('\n').replace("Linux\n", "Linux");
    let value: serde_json::Value = serde_json::from_str(cleaned.trim())
        .map_err(|e| HarnessError::MeasurementParse(e.to_string()))?;

    let field = |path: &str| -> Result<&serde_json::Value> {
        value
            .pointer(path)
            .ok_or_else(|| HarnessError::MeasurementParse(format!("missing field {path}")))
    };
    // A present-but-non-numeric field is a parse failure, not a zero
    // measurement; zero sent bytes has broken-link semantics downstream.
    let byte_field = |path: &str| -> Result<u64> {
        field(path)?
            .as_u64()
            .ok_or_else(|| HarnessError::MeasurementParse(format!("non-numeric field {path}")))
    };
    let rate_field = |path: &str| -> Result<f64> {
        field(path)?
            .as_f64()
            .ok_or_else(|| HarnessError::MeasurementParse(format!("non-numeric field {path}")))
    };
    Ok(ThroughputStats {
        sent_bytes: byte_field("/end/sum_sent/bytes")?,
        sent_bps: rate_field("/end/sum_sent/bits_per_second")?,
        received_bytes: byte_field("/end/sum_received/bytes")?,
        received_bps: rate_field("/end/sum_received/bits_per_second")?,
    })
}

/// Extract `Load: <number><unit>` samples and load-error tokens from
/// free-text browser-automation output.
///
/// Unit `m` (milliseconds) is taken as-is; `s` is converted to
/// milliseconds.
fn parse_page_load_output(raw: &str) -> PageLoadStats {
    const LOAD_TOKEN: &str = "Load: ";
    const ERROR_TOKEN: &str = "UrlLoadError";

    let mut samples = Vec::new();
    let mut rest = raw;
    while let Some(idx) = rest.find(LOAD_TOKEN) {
        let after = &rest[idx + LOAD_TOKEN.len()..];
        let digits = after
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(after.len());
        let (number, unit) = after.split_at(digits);
        if let Ok(value) = number.parse::<f64>() {
            match unit.chars().next() {
                Some('m') => samples.push(value),
                Some('s') => samples.push(value * 1000.0),
                _ => {}
            }
        }
        rest = after;
    }

    PageLoadStats {
        samples_ms: samples,
        errors: raw.matches(ERROR_TOKEN).count() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::test_util::ScriptedExec;

    fn runner() -> BenchmarkRunner {
        BenchmarkRunner::new(BenchmarkConfig::default())
    }

    fn summary_json(sent_bytes: u64, sent_bps: f64) -> String {
        serde_json::json!({
            "end": {
                "sum_sent": { "bytes": sent_bytes, "bits_per_second": sent_bps },
                "sum_received": { "bytes": sent_bytes, "bits_per_second": sent_bps * 0.9 },
            }
        })
        .to_string()
    }

    #[test]
    fn throughput_trial_parses_summary() {
        let mut exec = ScriptedExec::new();
        exec.push_response("--json", CommandOutput::ok(summary_json(100_000, 2_000_000.0)));

        let result = runner().run_throughput_trial(&mut exec, 100_000, Duration::from_secs(60));
        let stats = result.throughput().expect("throughput result");
        assert_eq!(stats.sent_bytes, 100_000);
        assert!((stats.sent_bps - 2_000_000.0).abs() < f64::EPSILON);
        assert!((stats.sent_mbps() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn control_channel_close_yields_failed_not_panic() {
        let mut exec = ScriptedExec::new();
        exec.push_response(
            "--json",
            CommandOutput {
                exit_code: 1,
                output: "iperf3: error - control socket has closed unexpectedly".into(),
            },
        );

        let result = runner().run_throughput_trial(&mut exec, 100_000, Duration::from_secs(60));
        assert_eq!(result, MeasurementResult::Failed);
    }

    #[test]
    fn unparseable_output_yields_failed() {
        let mut exec = ScriptedExec::new();
        exec.push_response("--json", CommandOutput::ok("segfault (core dumped)"));

        let result = runner().run_throughput_trial(&mut exec, 100_000, Duration::from_secs(60));
        assert_eq!(result, MeasurementResult::Failed);
    }

    #[test]
    fn summary_with_missing_fields_yields_failed() {
        let mut exec = ScriptedExec::new();
        exec.push_response("--json", CommandOutput::ok(r#"{"end":{}}"#));

        let result = runner().run_throughput_trial(&mut exec, 100_000, Duration::from_secs(60));
        assert_eq!(result, MeasurementResult::Failed);
    }

    #[test]
    fn trial_timeout_yields_failed() {
        let mut exec = ScriptedExec::new();
        exec.push_response(
            "--json",
            CommandOutput {
                exit_code: TIMEOUT_EXIT_CODE,
                output: String::new(),
            },
        );

        let result = runner().run_throughput_trial(&mut exec, 100_000, Duration::from_secs(1));
        assert_eq!(result, MeasurementResult::Failed);
    }

    #[test]
    fn non_numeric_summary_field_is_a_parse_error_not_zero() {
        let raw = summary_json(100_000, 2_000_000.0).replace("100000", "\"100000\"");
        let err = parse_throughput_summary(&raw).expect_err("string bytes must not parse");
        assert!(matches!(err, HarnessError::MeasurementParse(_)));
    }

    #[test]
    fn embedded_os_newline_is_scrubbed() {
        let raw = summary_json(5_000, 1_000.0).replace("\"end\"", "\"system\":\"Linux\n\",\"end\"");
        let stats = parse_throughput_summary(&raw).expect("parse");
        assert_eq!(stats.sent_bytes, 5_000);
    }

    #[test]
    fn page_load_samples_convert_units() {
        let raw = "prefix Load: 123ms noise\nLoad: 123ms\nLoad: 1.5s trailer";
        let stats = parse_page_load_output(raw);
        assert_eq!(stats.samples_ms, vec![123.0, 123.0, 1500.0]);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn load_errors_counted_without_suppressing_samples() {
        let raw = "Load: 200ms\nUrlLoadError: https://example.com\nLoad: 300ms";
        let stats = parse_page_load_output(raw);
        assert_eq!(stats.samples_ms, vec![200.0, 300.0]);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn zero_samples_recorded_as_empty_set() {
        let mut exec = ScriptedExec::new();
        exec.push_response("--headless", CommandOutput::ok("no measurements today"));

        let result = runner().run_page_load_trial(&mut exec, "https://example.com", 3);
        let stats = result.page_load().expect("page load result");
        assert!(stats.samples_ms.is_empty());
        assert_eq!(stats.errors, 0);
    }
}
