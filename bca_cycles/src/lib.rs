//! Core battery cycling analysis: cycle boundaries, per-cycle capacities and
//! differential capacity (dQ/dU) curves computed from normalized tester samples.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod aggregate;
pub mod boundary;
pub mod capacity;
pub mod dqdu;
pub mod peaks;
pub mod smoothing;
pub mod source;
pub mod spline;
pub mod testplan;

pub use aggregate::{
    aggregate, summarize_cycles, AggregateParams, CycleRecord, CycleRow, CycleSummary,
    HalfCycleRecord, QualityFlag, QualityLimits,
};
pub use boundary::{detect_boundaries, BoundaryMethod, Segment};
pub use capacity::{
    cumulative_capacity, integrate_capacity, summarize_segment, summarize_segments,
    SegmentSummary,
};
pub use dqdu::{
    common_voltage_range, compute_dqdu, compute_dqdu_batch, extract_half_cycle,
    resolve_common_range, DifferentialCurve, DqduParams, DqduPoint, DqduSelection, HalfCycleData,
};
pub use peaks::{find_peaks, Peak, PeakParams};
pub use smoothing::Smoothing;
pub use source::{
    parse_samples, BasytecAdapter, BiologicAdapter, CsvAdapter, DeviceAdapter, FileMetadata,
    ParsedFile,
};
pub use testplan::{parse_test_plan, CRatePeriod, TestPlan};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BcaError {
    #[error("data integrity violation at sample {index}: {reason}")]
    DataIntegrity { index: usize, reason: String },
    #[error("empty result: {0}")]
    EmptyResult(String),
    #[error("insufficient data: {found} distinct points, at least {required} required")]
    InsufficientData { found: usize, required: usize },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Tester command attached to each sample.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Charge,
    Discharge,
    Pause,
    Rest,
}

impl Command {
    /// Map a device label onto a command. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "charge" | "chg" | "cc_chg" | "cccv_chg" | "cv_chg" => Some(Command::Charge),
            "discharge" | "dchg" | "cc_dchg" | "dis" => Some(Command::Discharge),
            "pause" | "wait" | "start" | "stop" | "end" => Some(Command::Pause),
            "rest" | "ocv" => Some(Command::Rest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Charge => "charge",
            Command::Discharge => "discharge",
            Command::Pause => "pause",
            Command::Rest => "rest",
        }
    }

    pub fn half_cycle(self) -> Option<HalfCycleType> {
        match self {
            Command::Charge => Some(HalfCycleType::Charge),
            Command::Discharge => Some(HalfCycleType::Discharge),
            Command::Pause | Command::Rest => None,
        }
    }

    pub fn is_active(self) -> bool {
        self.half_cycle().is_some()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Charge or discharge half of a full cycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HalfCycleType {
    Charge,
    Discharge,
}

impl HalfCycleType {
    pub fn as_str(self) -> &'static str {
        match self {
            HalfCycleType::Charge => "charge",
            HalfCycleType::Discharge => "discharge",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            HalfCycleType::Charge => HalfCycleType::Discharge,
            HalfCycleType::Discharge => HalfCycleType::Charge,
        }
    }

    pub fn command(self) -> Command {
        match self {
            HalfCycleType::Charge => Command::Charge,
            HalfCycleType::Discharge => Command::Discharge,
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Command::from_label(label).and_then(Command::half_cycle)
    }
}

impl fmt::Display for HalfCycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measured point of a normalized time series.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub time_h: f64,
    pub voltage_v: f64,
    /// Positive while charging, negative while discharging.
    pub current_a: f64,
    pub state_code: i64,
    pub command: Command,
    /// Device-reported cycle counter; restarts with each test-plan step.
    pub cycle_index: i64,
    pub temperature_c: Option<f64>,
    /// Device amp-hour counter, when the export carries one.
    pub charge_ah: Option<f64>,
}

impl Sample {
    pub fn new(
        time_h: f64,
        voltage_v: f64,
        current_a: f64,
        state_code: i64,
        command: Command,
        cycle_index: i64,
    ) -> Self {
        Self {
            time_h,
            voltage_v,
            current_a,
            state_code,
            command,
            cycle_index,
            temperature_c: None,
            charge_ah: None,
        }
    }

    pub fn with_temperature(mut self, temperature_c: f64) -> Self {
        self.temperature_c = Some(temperature_c);
        self
    }

    pub fn with_charge_ah(mut self, charge_ah: f64) -> Self {
        self.charge_ah = Some(charge_ah);
        self
    }
}

/// Reject non-finite measurements and decreasing timestamps.
pub fn validate_samples(samples: &[Sample]) -> Result<(), BcaError> {
    let mut prev_time = f64::NEG_INFINITY;
    for (index, sample) in samples.iter().enumerate() {
        let fields = [
            ("time_h", sample.time_h),
            ("voltage_v", sample.voltage_v),
            ("current_a", sample.current_a),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(BcaError::DataIntegrity {
                    index,
                    reason: format!("{name} is not finite ({value})"),
                });
            }
        }
        if sample.time_h < prev_time {
            return Err(BcaError::DataIntegrity {
                index,
                reason: format!(
                    "time decreases from {:.6} h to {:.6} h",
                    prev_time, sample.time_h
                ),
            });
        }
        prev_time = sample.time_h;
    }
    Ok(())
}

/// Result of the detection → integration → aggregation pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleAnalysis {
    pub segments: Vec<Segment>,
    pub cycles: Vec<CycleRecord>,
    pub summary: CycleSummary,
}

/// Detect segments, integrate their capacities and aggregate them into cycles.
pub fn analyze_cycles(
    samples: &[Sample],
    method: &BoundaryMethod,
    params: &AggregateParams,
) -> Result<CycleAnalysis, BcaError> {
    params.validate()?;
    let segments = detect_boundaries(samples, method)?;
    let summaries = summarize_segments(samples, &segments)?;
    let cycles = aggregate(&summaries, params)?;
    let summary = summarize_cycles(&cycles);
    info!(
        "Analyzed {} samples: {} segments, {} cycles ({})",
        samples.len(),
        segments.len(),
        cycles.len(),
        method.id()
    );
    Ok(CycleAnalysis {
        segments,
        cycles,
        summary,
    })
}
