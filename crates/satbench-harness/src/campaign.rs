//! Top-level trial supervision.
//!
//! A campaign walks scenario × impairment level × iteration in order:
//! deploy → impair → measure → record, recovering from broken links
//! with a full redeploy plus impairment re-application. The run never
//! aborts because a single trial failed; broken trials are recorded
//! with zero-valued results and retried until the per-level recovery
//! budget is spent.

use std::time::Duration;

use crate::benchmark::{BenchmarkRunner, MeasurementResult};
use crate::config::CampaignConfig;
use crate::control::SessionController;
use crate::error::Result;
use crate::exec::EndpointExec;
use crate::impairment::{ImpairmentInjector, ImpairmentLevel};
use crate::results::{LevelSummary, ResultSet, TrialRecord};
use crate::scenario::{ScenarioDeployer, ScenarioVariant};

/// What to measure in each iteration. A fresh value per condition —
/// trial specifications are never aliased across iterations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialSpec {
    Throughput {
        transfer_bytes: u64,
        timeout: Duration,
    },
    PageLoad {
        url: String,
        iterations: u32,
    },
}

/// Receives records and per-level summaries as they are produced.
/// Persistence beyond in-memory accumulation lives behind this seam.
pub trait ReportSink {
    fn on_record(&mut self, record: &TrialRecord);
    fn on_level_complete(&mut self, level: &ImpairmentLevel, summary: &LevelSummary);
}

/// Sink that reports through the log stream.
#[derive(Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn on_record(&mut self, record: &TrialRecord) {
        match &record.result {
            MeasurementResult::Throughput(stats) => tracing::info!(
                scenario = %record.scenario,
                level = %record.level.label(),
                iteration = record.iteration,
                sent_mbps = %format_args!("{:.3}", stats.sent_mbps()),
                received_mbps = %format_args!("{:.3}", stats.received_mbps()),
                "trial recorded"
            ),
            MeasurementResult::PageLoad(stats) => tracing::info!(
                scenario = %record.scenario,
                level = %record.level.label(),
                iteration = record.iteration,
                samples = stats.samples_ms.len(),
                errors = stats.errors,
                "trial recorded"
            ),
            MeasurementResult::Failed => tracing::warn!(
                scenario = %record.scenario,
                level = %record.level.label(),
                iteration = record.iteration,
                "failed trial recorded"
            ),
        }
    }

    fn on_level_complete(&mut self, level: &ImpairmentLevel, summary: &LevelSummary) {
        tracing::info!(
            level = %level.label(),
            trials = summary.trials,
            recoveries = summary.recoveries,
            mean_sent_bps = ?summary.mean_sent_bps,
            mean_received_bps = ?summary.mean_received_bps,
            mean_load_time_ms = ?summary.mean_load_time_ms,
            "impairment level complete"
        );
    }
}

/// Orchestrates a full measurement campaign.
pub struct Campaign {
    controller: SessionController,
    exec: Box<dyn EndpointExec>,
    injector: ImpairmentInjector,
    deployer: ScenarioDeployer,
    runner: BenchmarkRunner,
    sink: Box<dyn ReportSink>,
    cfg: CampaignConfig,
}

impl Campaign {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: SessionController,
        exec: Box<dyn EndpointExec>,
        injector: ImpairmentInjector,
        deployer: ScenarioDeployer,
        runner: BenchmarkRunner,
        sink: Box<dyn ReportSink>,
        cfg: CampaignConfig,
    ) -> Self {
        Self {
            controller,
            exec,
            injector,
            deployer,
            runner,
            sink,
            cfg,
        }
    }

    /// Run `iterations_per_level` trials of `spec` under `variant` for
    /// each impairment level in order.
    ///
    /// A throughput trial with zero sent bytes marks the path as
    /// broken: the scenario is fully redeployed and the level
    /// re-applied before the iteration is retried. The zero-result
    /// heuristic is best effort — it came from observed failures, not
    /// a protocol guarantee — so recoveries are capped per level and
    /// exhausting the cap just moves on to the next level.
    pub fn run(
        &mut self,
        variant: &ScenarioVariant,
        spec: &TrialSpec,
        levels: &[ImpairmentLevel],
        iterations_per_level: u32,
    ) -> Result<ResultSet> {
        tracing::info!(
            scenario = variant.label(),
            levels = levels.len(),
            iterations_per_level,
            "campaign starting"
        );
        self.deploy_fresh(variant)?;

        let mut results = ResultSet::default();
        for level in levels {
            self.injector
                .apply(level, &mut self.controller, self.exec.as_mut())?;

            let mut recoveries = 0u32;
            let mut usable = 0u32;
            let mut iteration = 0u32;
            while usable < iterations_per_level {
                let result = self.run_trial(spec);
                let broken = is_broken_link(spec, &result);

                let record = TrialRecord {
                    scenario: variant.label().to_string(),
                    level: level.clone(),
                    iteration,
                    result,
                };
                self.sink.on_record(&record);
                results.record(record);
                iteration += 1;

                if broken {
                    if recoveries >= self.cfg.max_recoveries {
                        tracing::warn!(
                            level = %level.label(),
                            recoveries,
                            "recovery budget exhausted, moving to next level"
                        );
                        break;
                    }
                    recoveries += 1;
                    tracing::warn!(
                        level = %level.label(),
                        recoveries,
                        "zero throughput, redeploying scenario"
                    );
                    self.deploy_fresh(variant)?;
                    self.injector
                        .reapply(level, &mut self.controller, self.exec.as_mut())?;
                    continue;
                }
                usable += 1;
            }

            let summary = results.summary(level, recoveries);
            self.sink.on_level_complete(level, &summary);
        }

        tracing::info!(scenario = variant.label(), "campaign complete");
        Ok(results)
    }

    /// Tear down the emulation session. Safe to call repeatedly.
    pub fn shutdown(&mut self) -> Result<()> {
        self.controller.stop()
    }

    /// Full (re)deploy: session bring-up, route configuration, overlay
    /// launch, and an unrecorded warm-up transfer for overlays with a
    /// high first-connection cost.
    fn deploy_fresh(&mut self, variant: &ScenarioVariant) -> Result<()> {
        self.deployer
            .deploy(variant, &mut self.controller, self.exec.as_mut(), false)?;
        if variant.needs_warmup() && self.cfg.warmup_bytes > 0 {
            tracing::debug!(bytes = self.cfg.warmup_bytes, "running warm-up transfer");
            let _ = self.runner.run_throughput_trial(
                self.exec.as_mut(),
                self.cfg.warmup_bytes,
                Duration::from_secs(self.cfg.warmup_timeout_secs),
            );
        }
        Ok(())
    }

    fn run_trial(&mut self, spec: &TrialSpec) -> MeasurementResult {
        match spec {
            TrialSpec::Throughput {
                transfer_bytes,
                timeout,
            } => self
                .runner
                .run_throughput_trial(self.exec.as_mut(), *transfer_bytes, *timeout),
            TrialSpec::PageLoad { url, iterations } => {
                self.runner
                    .run_page_load_trial(self.exec.as_mut(), url, *iterations)
            }
        }
    }
}

/// The broken-path heuristic only applies to throughput trials: zero
/// sent bytes (or an outright failure) means the emulated link needs a
/// restart before further trials can succeed.
fn is_broken_link(spec: &TrialSpec, result: &MeasurementResult) -> bool {
    if !matches!(spec, TrialSpec::Throughput { .. }) {
        return false;
    }
    match result {
        MeasurementResult::Failed => true,
        MeasurementResult::Throughput(stats) => stats.sent_bytes == 0,
        MeasurementResult::PageLoad(_) => false,
    }
}
