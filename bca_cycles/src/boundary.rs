use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{validate_samples, BcaError, Command, Sample};

/// State code Basytec firmware stamps on the last sample of a step.
pub const DEFAULT_END_STATE_CODE: i64 = 2;
pub const DEFAULT_DEAD_BAND_A: f64 = 1e-9;

/// Strategy used to split a sample sequence into segments.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum BoundaryMethod {
    #[serde(rename = "state_based")]
    StateBased { end_state_code: i64 },
    #[serde(rename = "zero_crossing")]
    ZeroCrossing { dead_band_a: f64 },
}

impl Default for BoundaryMethod {
    fn default() -> Self {
        BoundaryMethod::StateBased {
            end_state_code: DEFAULT_END_STATE_CODE,
        }
    }
}

impl BoundaryMethod {
    pub fn id(&self) -> &'static str {
        match self {
            BoundaryMethod::StateBased { .. } => "state_based",
            BoundaryMethod::ZeroCrossing { .. } => "zero_crossing",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BoundaryMethod::StateBased { .. } => {
                "Split where the state code enters the end-of-step value or the command changes."
            }
            BoundaryMethod::ZeroCrossing { .. } => {
                "Split where the current changes sign, treating the dead band as zero current."
            }
        }
    }

    pub fn default_for_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "state_based" | "state" => Some(BoundaryMethod::default()),
            "zero_crossing" | "current" => Some(BoundaryMethod::ZeroCrossing {
                dead_band_a: DEFAULT_DEAD_BAND_A,
            }),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), BcaError> {
        match self {
            BoundaryMethod::StateBased { .. } => Ok(()),
            BoundaryMethod::ZeroCrossing { dead_band_a } => {
                if dead_band_a.is_finite() && *dead_band_a >= 0.0 {
                    Ok(())
                } else {
                    Err(BcaError::Configuration(format!(
                        "dead band must be a non-negative finite current, got {dead_band_a}"
                    )))
                }
            }
        }
    }
}

/// Contiguous run of samples `start..end` sharing one command.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub command: Command,
    /// Device cycle index of the first sample.
    pub cycle_index: i64,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self) -> bool {
        self.command.is_active()
    }
}

/// Split `samples` into segments covering every sample exactly once.
pub fn detect_boundaries(
    samples: &[Sample],
    method: &BoundaryMethod,
) -> Result<Vec<Segment>, BcaError> {
    if samples.is_empty() {
        return Err(BcaError::EmptyResult("no samples to segment".into()));
    }
    method.validate()?;
    validate_samples(samples)?;

    let segments = match method {
        BoundaryMethod::StateBased { end_state_code } => split_by_state(samples, *end_state_code),
        BoundaryMethod::ZeroCrossing { dead_band_a } => split_by_current(samples, *dead_band_a),
    };

    let active = segments.iter().filter(|s| s.is_active()).count();
    if active == 0 {
        return Err(BcaError::EmptyResult(format!(
            "{} segments found by {} but none is a charge or discharge",
            segments.len(),
            method.id()
        )));
    }
    debug!(
        "{}: {} segments ({} active) over {} samples",
        method.id(),
        segments.len(),
        active,
        samples.len()
    );
    Ok(segments)
}

fn split_by_state(samples: &[Sample], end_state_code: i64) -> Vec<Segment> {
    let enters_end = |i: usize| {
        samples[i].state_code == end_state_code
            && (i == 0 || samples[i - 1].state_code != end_state_code)
    };
    split_where(
        samples,
        |i| enters_end(i - 1) || samples[i].command != samples[i - 1].command,
        |range| samples[range.start].command,
    )
}

fn split_by_current(samples: &[Sample], dead_band_a: f64) -> Vec<Segment> {
    let polarity = |i: usize| {
        let current = samples[i].current_a;
        if current > dead_band_a {
            1
        } else if current < -dead_band_a {
            -1
        } else {
            0
        }
    };
    split_where(
        samples,
        |i| polarity(i) != polarity(i - 1),
        |range| match polarity(range.start) {
            1 => Command::Charge,
            -1 => Command::Discharge,
            _ => Command::Pause,
        },
    )
}

/// `breaks_before(i)` decides whether sample `i` opens a new segment.
fn split_where<B, C>(samples: &[Sample], breaks_before: B, command_of: C) -> Vec<Segment>
where
    B: Fn(usize) -> bool,
    C: Fn(Range<usize>) -> Command,
{
    let mut segments = Vec::new();
    let mut start = 0usize;
    for i in 1..=samples.len() {
        if i == samples.len() || breaks_before(i) {
            segments.push(Segment {
                start,
                end: i,
                command: command_of(start..i),
                cycle_index: samples[start].cycle_index,
            });
            start = i;
        }
    }
    segments
}
