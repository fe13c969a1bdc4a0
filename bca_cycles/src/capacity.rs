use serde::{Deserialize, Serialize};

use super::{BcaError, Sample, Segment};

/// Charge passed over a segment, in Ah, by the trapezoidal rule on |I|.
///
/// Segments with fewer than two samples carry no charge.
pub fn integrate_capacity(samples: &[Sample], segment: &Segment) -> Result<f64, BcaError> {
    let slice = segment_slice(samples, segment)?;
    let mut total = 0.0;
    for (offset, pair) in slice.windows(2).enumerate() {
        let dt = pair[1].time_h - pair[0].time_h;
        if dt < 0.0 || !dt.is_finite() {
            return Err(BcaError::DataIntegrity {
                index: segment.start + offset + 1,
                reason: format!("time step {dt} h inside segment"),
            });
        }
        total += 0.5 * (pair[0].current_a.abs() + pair[1].current_a.abs()) * dt;
    }
    Ok(total)
}

/// Running trapezoidal |I| integral; element `k` is the charge passed up to sample `k`.
pub fn cumulative_capacity(samples: &[Sample]) -> Result<Vec<f64>, BcaError> {
    let mut out = Vec::with_capacity(samples.len());
    let mut acc = 0.0;
    for (idx, sample) in samples.iter().enumerate() {
        if idx > 0 {
            let prev = &samples[idx - 1];
            let dt = sample.time_h - prev.time_h;
            if dt < 0.0 || !dt.is_finite() {
                return Err(BcaError::DataIntegrity {
                    index: idx,
                    reason: format!("time step {dt} h"),
                });
            }
            acc += 0.5 * (prev.current_a.abs() + sample.current_a.abs()) * dt;
        }
        out.push(acc);
    }
    Ok(out)
}

fn segment_slice<'a>(samples: &'a [Sample], segment: &Segment) -> Result<&'a [Sample], BcaError> {
    if segment.start > segment.end || segment.end > samples.len() {
        return Err(BcaError::DataIntegrity {
            index: segment.start.min(samples.len()),
            reason: format!(
                "segment {}..{} outside {} samples",
                segment.start,
                segment.end,
                samples.len()
            ),
        });
    }
    Ok(&samples[segment.range()])
}

/// Per-segment figures the aggregator builds cycles from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub capacity_ah: f64,
    pub voltage_min_v: f64,
    pub voltage_max_v: f64,
    pub voltage_mean_v: f64,
    pub start_time_h: f64,
    pub end_time_h: f64,
    pub duration_h: f64,
    pub mean_temperature_c: Option<f64>,
    pub n_samples: usize,
}

pub fn summarize_segment(
    samples: &[Sample],
    segment: &Segment,
) -> Result<SegmentSummary, BcaError> {
    let slice = segment_slice(samples, segment)?;
    let (first, last) = match (slice.first(), slice.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(BcaError::EmptyResult(format!(
                "segment {}..{} has no samples",
                segment.start, segment.end
            )))
        }
    };
    let capacity_ah = integrate_capacity(samples, segment)?;

    let mut v_min = f64::INFINITY;
    let mut v_max = f64::NEG_INFINITY;
    let mut v_sum = 0.0;
    let mut t_sum = 0.0;
    let mut t_count = 0usize;
    for sample in slice {
        v_min = v_min.min(sample.voltage_v);
        v_max = v_max.max(sample.voltage_v);
        v_sum += sample.voltage_v;
        if let Some(t) = sample.temperature_c.filter(|t| t.is_finite()) {
            t_sum += t;
            t_count += 1;
        }
    }

    Ok(SegmentSummary {
        segment: segment.clone(),
        capacity_ah,
        voltage_min_v: v_min,
        voltage_max_v: v_max,
        voltage_mean_v: v_sum / slice.len() as f64,
        start_time_h: first.time_h,
        end_time_h: last.time_h,
        duration_h: last.time_h - first.time_h,
        mean_temperature_c: (t_count > 0).then(|| t_sum / t_count as f64),
        n_samples: slice.len(),
    })
}

pub fn summarize_segments(
    samples: &[Sample],
    segments: &[Segment],
) -> Result<Vec<SegmentSummary>, BcaError> {
    segments
        .iter()
        .map(|segment| summarize_segment(samples, segment))
        .collect()
}
