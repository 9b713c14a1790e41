//! Trial records and in-memory result aggregation.

use serde::Serialize;

use crate::benchmark::MeasurementResult;
use crate::impairment::ImpairmentLevel;

/// One trial's outcome under a fixed condition. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRecord {
    pub scenario: String,
    pub level: ImpairmentLevel,
    pub iteration: u32,
    pub result: MeasurementResult,
}

impl TrialRecord {
    /// Whether this record came from a usable (non-broken) trial.
    pub fn is_usable(&self) -> bool {
        match &self.result {
            MeasurementResult::Failed => false,
            MeasurementResult::Throughput(stats) => stats.sent_bytes > 0,
            MeasurementResult::PageLoad(_) => true,
        }
    }
}

/// Per-level summary statistics for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub trials: usize,
    pub recoveries: u32,
    pub mean_sent_bps: Option<f64>,
    pub mean_received_bps: Option<f64>,
    pub mean_load_time_ms: Option<f64>,
}

/// All trial records of a run, keyed by impairment level in the order
/// the levels were first seen.
///
/// Every raw per-trial value is kept, including zero-valued records
/// from broken links; means are computed over the raw values. Queries
/// over a level with no data return `None` rather than a numeric
/// default.
#[derive(Debug, Default)]
pub struct ResultSet {
    buckets: Vec<(ImpairmentLevel, Vec<TrialRecord>)>,
}

impl ResultSet {
    pub fn record(&mut self, record: TrialRecord) {
        match self
            .buckets
            .iter_mut()
            .find(|(level, _)| *level == record.level)
        {
            Some((_, records)) => records.push(record),
            None => self.buckets.push((record.level.clone(), vec![record])),
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = &ImpairmentLevel> {
        self.buckets.iter().map(|(level, _)| level)
    }

    /// Records for `level`, in trial order; empty for unseen levels.
    pub fn records(&self, level: &ImpairmentLevel) -> &[TrialRecord] {
        self.buckets
            .iter()
            .find(|(l, _)| l == level)
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[])
    }

    pub fn usable_count(&self, level: &ImpairmentLevel) -> usize {
        self.records(level).iter().filter(|r| r.is_usable()).count()
    }

    /// Mean upstream rate over all throughput records at `level`
    /// (failed trials count as zero), or `None` when there is no data.
    pub fn mean_sent_bps(&self, level: &ImpairmentLevel) -> Option<f64> {
        mean(self.throughput_values(level, |sent, _| sent))
    }

    pub fn mean_received_bps(&self, level: &ImpairmentLevel) -> Option<f64> {
        mean(self.throughput_values(level, |_, received| received))
    }

    /// Sample variance of the upstream rate, or `None` with fewer than
    /// two data points.
    pub fn variance_sent_bps(&self, level: &ImpairmentLevel) -> Option<f64> {
        variance(self.throughput_values(level, |sent, _| sent))
    }

    /// Mean page-load time over every timing sample recorded at
    /// `level`, or `None` when no samples exist.
    pub fn mean_load_time_ms(&self, level: &ImpairmentLevel) -> Option<f64> {
        let samples: Vec<f64> = self
            .records(level)
            .iter()
            .filter_map(|r| r.result.page_load())
            .flat_map(|stats| stats.samples_ms.iter().copied())
            .collect();
        mean(samples)
    }

    /// Total page-load error-token count at `level`.
    pub fn load_errors(&self, level: &ImpairmentLevel) -> u32 {
        self.records(level)
            .iter()
            .filter_map(|r| r.result.page_load())
            .map(|stats| stats.errors)
            .sum()
    }

    pub fn summary(&self, level: &ImpairmentLevel, recoveries: u32) -> LevelSummary {
        LevelSummary {
            trials: self.records(level).len(),
            recoveries,
            mean_sent_bps: self.mean_sent_bps(level),
            mean_received_bps: self.mean_received_bps(level),
            mean_load_time_ms: self.mean_load_time_ms(level),
        }
    }

    fn throughput_values(
        &self,
        level: &ImpairmentLevel,
        pick: fn(f64, f64) -> f64,
    ) -> Vec<f64> {
        self.records(level)
            .iter()
            .filter_map(|r| match &r.result {
                MeasurementResult::Throughput(stats) => {
                    Some(pick(stats.sent_bps, stats.received_bps))
                }
                MeasurementResult::Failed => Some(0.0),
                MeasurementResult::PageLoad(_) => None,
            })
            .collect()
    }
}

fn mean(values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn variance(values: Vec<f64>) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(sum_sq / (values.len() - 1) as f64)
}
