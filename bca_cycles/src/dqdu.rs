//! Differential capacity (dQ/dU) of single half-cycles.
//!
//! A half-cycle's (voltage, capacity) trace is deduplicated per voltage, fitted with
//! a natural cubic spline Q(V), resampled on a uniform voltage grid and differentiated.
//! Charge curves come out positive; discharge curves, whose capacity grows as the
//! voltage falls, come out negative.

use std::collections::BTreeMap;

use ndarray::Array1;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::capacity::cumulative_capacity;
use super::peaks::{find_peaks, Peak, PeakParams};
use super::smoothing::Smoothing;
use super::spline::CubicSpline;
use super::{BcaError, CycleRecord, HalfCycleType, Sample};

pub const DEFAULT_N_POINTS: usize = 333;
pub const MIN_DISTINCT_POINTS: usize = 4;
/// Voltages closer than this to the previous knot count as duplicates.
pub const VOLTAGE_TOLERANCE_V: f64 = 1e-10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DqduParams {
    pub n_points: usize,
    /// Inclusive (min, max) clip window in volts.
    pub voltage_range: Option<(f64, f64)>,
    pub smoothing: Smoothing,
    /// Peak detection settings; `None` skips detection.
    pub peaks: Option<PeakParams>,
    /// Extend each half-cycle to the cutoff voltage of the opposite half.
    pub bridge_ir_drop: bool,
    /// When set, points also carry dQ/dU per gram of active material.
    pub active_material_mass_g: Option<f64>,
}

impl Default for DqduParams {
    fn default() -> Self {
        Self {
            n_points: DEFAULT_N_POINTS,
            voltage_range: None,
            smoothing: Smoothing::None,
            peaks: Some(PeakParams::default()),
            bridge_ir_drop: false,
            active_material_mass_g: None,
        }
    }
}

impl DqduParams {
    pub fn validate(&self) -> Result<(), BcaError> {
        if self.n_points < 3 {
            return Err(BcaError::Configuration(format!(
                "grid needs at least 3 points, got {}",
                self.n_points
            )));
        }
        if let Some((lo, hi)) = self.voltage_range {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(BcaError::Configuration(format!(
                    "voltage range must be finite with min < max, got ({lo}, {hi})"
                )));
            }
        }
        if let Some(mass) = self.active_material_mass_g {
            if !(mass.is_finite() && mass > 0.0) {
                return Err(BcaError::Configuration(format!(
                    "active material mass must be positive, got {mass} g"
                )));
            }
        }
        self.smoothing.validate(self.n_points)?;
        if let Some(peaks) = &self.peaks {
            peaks.validate()?;
        }
        Ok(())
    }

    pub fn params_hash_sha256(&self) -> Result<String, BcaError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| BcaError::Configuration(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Raw (voltage, capacity) trace of one half-cycle in acquisition order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HalfCycleData {
    pub global_cycle_number: u32,
    pub half_cycle_type: HalfCycleType,
    pub voltage_v: Vec<f64>,
    /// Charge passed since the start of the half-cycle, Ah.
    pub capacity_ah: Vec<f64>,
}

impl HalfCycleData {
    pub fn voltage_range(&self) -> Option<(f64, f64)> {
        let finite = self.voltage_v.iter().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        (lo <= hi).then_some((lo, hi))
    }

    pub fn len(&self) -> usize {
        self.voltage_v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage_v.is_empty()
    }
}

/// Gather the samples of one half of a global cycle with their running capacity.
///
/// The device amp-hour counter is used when every sample of the half-cycle has one,
/// taken relative to its first value; otherwise |I| is integrated over time.
pub fn extract_half_cycle(
    samples: &[Sample],
    cycles: &[CycleRecord],
    global_cycle_number: u32,
    half_cycle_type: HalfCycleType,
    bridge_ir_drop: bool,
) -> Result<HalfCycleData, BcaError> {
    let cycle = cycles
        .iter()
        .find(|c| c.global_cycle_number == global_cycle_number)
        .ok_or_else(|| {
            BcaError::EmptyResult(format!(
                "cycle {global_cycle_number} not found ({} cycles available)",
                cycles.len()
            ))
        })?;
    let half = cycle.half(half_cycle_type).ok_or_else(|| {
        BcaError::EmptyResult(format!(
            "cycle {global_cycle_number} has no {half_cycle_type} half"
        ))
    })?;

    let mut slices = Vec::with_capacity(half.sample_ranges.len());
    for &(start, end) in &half.sample_ranges {
        if start > end || end > samples.len() {
            return Err(BcaError::DataIntegrity {
                index: start.min(samples.len()),
                reason: format!(
                    "half-cycle range {start}..{end} outside {} samples",
                    samples.len()
                ),
            });
        }
        slices.push(&samples[start..end]);
    }

    let mut voltage_v = Vec::new();
    let mut capacity_ah = Vec::new();
    let device_counter = slices
        .iter()
        .flat_map(|s| s.iter())
        .all(|s| s.charge_ah.is_some_and(f64::is_finite));
    if device_counter {
        let first = slices
            .iter()
            .flat_map(|s| s.iter())
            .find_map(|s| s.charge_ah)
            .unwrap_or(0.0);
        for sample in slices.iter().flat_map(|s| s.iter()) {
            voltage_v.push(sample.voltage_v);
            capacity_ah.push((sample.charge_ah.unwrap_or(first) - first).abs());
        }
    } else {
        let mut offset = 0.0;
        for slice in &slices {
            let cumulative = cumulative_capacity(slice)?;
            for (sample, q) in slice.iter().zip(&cumulative) {
                voltage_v.push(sample.voltage_v);
                capacity_ah.push(offset + q);
            }
            offset += cumulative.last().copied().unwrap_or(0.0);
        }
    }
    if voltage_v.is_empty() {
        return Err(BcaError::EmptyResult(format!(
            "cycle {global_cycle_number} {half_cycle_type} has no samples"
        )));
    }

    if bridge_ir_drop {
        if let (Some(other), Some(&first_q)) =
            (cycle.half(half_cycle_type.opposite()), capacity_ah.first())
        {
            let (lo, hi) = voltage_v
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let cutoff = match half_cycle_type {
                HalfCycleType::Charge => (other.voltage_min_v < lo).then_some(other.voltage_min_v),
                HalfCycleType::Discharge => {
                    (other.voltage_max_v > hi).then_some(other.voltage_max_v)
                }
            };
            if let Some(cutoff) = cutoff {
                debug!(
                    "Cycle {} {}: bridging IR drop to {:.4} V",
                    global_cycle_number, half_cycle_type, cutoff
                );
                voltage_v.insert(0, cutoff);
                capacity_ah.insert(0, first_q);
            }
        }
    }

    debug!(
        "Cycle {} {}: {} points ({})",
        global_cycle_number,
        half_cycle_type,
        voltage_v.len(),
        if device_counter { "device counter" } else { "integrated current" }
    );
    Ok(HalfCycleData {
        global_cycle_number,
        half_cycle_type,
        voltage_v,
        capacity_ah,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DqduPoint {
    pub voltage_v: f64,
    pub capacity_ah: f64,
    pub dq_du_mah_per_v: f64,
    pub dq_du_mah_per_g_v: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DifferentialCurve {
    pub global_cycle_number: u32,
    pub half_cycle_type: HalfCycleType,
    pub smoothing: Smoothing,
    pub points: Vec<DqduPoint>,
    pub peaks: Vec<Peak>,
    pub params_hash: String,
}

impl DifferentialCurve {
    pub fn voltage_range(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.voltage_v, self.points.last()?.voltage_v))
    }
}

/// Central differences inside, one-sided differences at both ends.
fn gradient(y: &Array1<f64>, x: &Array1<f64>) -> Array1<f64> {
    let n = y.len();
    Array1::from_shape_fn(n, |i| {
        let (a, b) = if i == 0 {
            (0, 1)
        } else if i == n - 1 {
            (n - 2, n - 1)
        } else {
            (i - 1, i + 1)
        };
        (y[b] - y[a]) / (x[b] - x[a])
    })
}

/// Collapse sorted voltages within [`VOLTAGE_TOLERANCE_V`] of the group's first
/// voltage into one knot holding the highest capacity.
fn merge_close_voltages(by_voltage: &BTreeMap<OrderedFloat<f64>, f64>) -> (Vec<f64>, Vec<f64>) {
    let mut knots_v: Vec<f64> = Vec::with_capacity(by_voltage.len());
    let mut knots_q: Vec<f64> = Vec::with_capacity(by_voltage.len());
    for (v, &q) in by_voltage {
        match (knots_v.last(), knots_q.last_mut()) {
            (Some(&prev), Some(prev_q)) if v.0 - prev <= VOLTAGE_TOLERANCE_V => {
                *prev_q = prev_q.max(q);
            }
            _ => {
                knots_v.push(v.0);
                knots_q.push(q);
            }
        }
    }
    (knots_v, knots_q)
}

pub fn compute_dqdu(
    half: &HalfCycleData,
    params: &DqduParams,
) -> Result<DifferentialCurve, BcaError> {
    params.validate()?;
    let label = format!("cycle {} {}", half.global_cycle_number, half.half_cycle_type);

    let in_range = |v: f64| match params.voltage_range {
        Some((lo, hi)) => v >= lo && v <= hi,
        None => true,
    };
    let mut by_voltage: BTreeMap<OrderedFloat<f64>, f64> = BTreeMap::new();
    let mut kept = 0usize;
    for (&v, &q) in half.voltage_v.iter().zip(&half.capacity_ah) {
        if !(v.is_finite() && q.is_finite()) || !in_range(v) {
            continue;
        }
        kept += 1;
        by_voltage
            .entry(OrderedFloat(v))
            .and_modify(|existing| *existing = existing.max(q))
            .or_insert(q);
    }
    if kept == 0 {
        return Err(BcaError::EmptyResult(match params.voltage_range {
            Some((lo, hi)) => format!("{label}: no samples between {lo} V and {hi} V"),
            None => format!("{label}: no finite samples"),
        }));
    }
    let (knots_v, knots_q) = merge_close_voltages(&by_voltage);
    if knots_v.len() < MIN_DISTINCT_POINTS {
        return Err(BcaError::InsufficientData {
            found: knots_v.len(),
            required: MIN_DISTINCT_POINTS,
        });
    }

    let spline = CubicSpline::natural(&knots_v, &knots_q)?;
    let (v_min, v_max) = spline.domain();

    let mut grid = Array1::linspace(v_min, v_max, params.n_points);
    grid[params.n_points - 1] = v_max;
    let (voltages, capacities): (Vec<f64>, Vec<f64>) = grid
        .iter()
        .filter_map(|&v| spline.evaluate(v).map(|q| (v, q)))
        .unzip();
    if voltages.len() < 2 {
        return Err(BcaError::InsufficientData {
            found: voltages.len(),
            required: 2,
        });
    }
    let voltages = Array1::from(voltages);
    let capacities = Array1::from(capacities);

    let raw = gradient(&capacities, &voltages) * 1000.0;
    let dq_du = params.smoothing.apply(&raw.to_vec())?;
    if dq_du.iter().all(|d| d.abs() < 1e-6) {
        warn!("{label}: all dQ/dU values are near zero, check the capacity data");
    }

    let peaks = match &params.peaks {
        Some(peak_params) => {
            let sign = match half.half_cycle_type {
                HalfCycleType::Charge => 1.0,
                HalfCycleType::Discharge => -1.0,
            };
            let magnitude: Vec<f64> = dq_du.iter().map(|d| sign * d).collect();
            find_peaks(&magnitude, voltages.as_slice().unwrap_or(&[]), peak_params)
                .into_iter()
                .map(|p| Peak {
                    intensity: sign * p.intensity,
                    ..p
                })
                .collect()
        }
        None => Vec::new(),
    };

    let points = voltages
        .iter()
        .zip(capacities.iter())
        .zip(&dq_du)
        .map(|((&v, &q), &d)| DqduPoint {
            voltage_v: v,
            capacity_ah: q,
            dq_du_mah_per_v: d,
            dq_du_mah_per_g_v: params.active_material_mass_g.map(|m| d / m),
        })
        .collect::<Vec<_>>();

    info!(
        "{}: {} distinct voltages -> {} grid points over {:.3}-{:.3} V, {} peaks",
        label,
        knots_v.len(),
        points.len(),
        v_min,
        v_max,
        peaks.len()
    );
    Ok(DifferentialCurve {
        global_cycle_number: half.global_cycle_number,
        half_cycle_type: half.half_cycle_type,
        smoothing: params.smoothing.clone(),
        points,
        peaks,
        params_hash: params.params_hash_sha256()?,
    })
}

/// One requested (cycle, half) pair.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DqduSelection {
    pub global_cycle_number: u32,
    pub half_cycle_type: HalfCycleType,
}

impl DqduSelection {
    pub fn new(global_cycle_number: u32, half_cycle_type: HalfCycleType) -> Self {
        Self {
            global_cycle_number,
            half_cycle_type,
        }
    }
}

/// Intersection of the voltage ranges of all half-cycles, if non-empty.
pub fn common_voltage_range(halves: &[HalfCycleData]) -> Option<(f64, f64)> {
    let mut ranges = halves.iter().filter_map(HalfCycleData::voltage_range);
    let first = ranges.next()?;
    let (lo, hi) = ranges.fold(first, |(lo, hi), (a, b)| (lo.max(a), hi.min(b)));
    (lo < hi).then_some((lo, hi))
}

/// Compute several selections; each keeps its own result.
///
/// With `use_common_voltage_range` and no explicit range, every selection is
/// clipped to the intersection of the extracted half-cycles' ranges.
pub fn compute_dqdu_batch(
    samples: &[Sample],
    cycles: &[CycleRecord],
    selections: &[DqduSelection],
    params: &DqduParams,
    use_common_voltage_range: bool,
) -> Vec<(DqduSelection, Result<DifferentialCurve, BcaError>)> {
    let extracted: Vec<Result<HalfCycleData, BcaError>> = selections
        .iter()
        .map(|sel| {
            extract_half_cycle(
                samples,
                cycles,
                sel.global_cycle_number,
                sel.half_cycle_type,
                params.bridge_ir_drop,
            )
        })
        .collect();

    let params = resolve_common_range(&extracted, params, use_common_voltage_range);

    selections
        .iter()
        .zip(extracted)
        .map(|(sel, half)| {
            let result = half.and_then(|h| compute_dqdu(&h, &params));
            if let Err(e) = &result {
                warn!(
                    "dQ/dU for cycle {} {} failed: {}",
                    sel.global_cycle_number, sel.half_cycle_type, e
                );
            }
            (*sel, result)
        })
        .collect()
}

/// Parameters with the common voltage range filled in when requested and possible.
pub fn resolve_common_range(
    extracted: &[Result<HalfCycleData, BcaError>],
    params: &DqduParams,
    use_common_voltage_range: bool,
) -> DqduParams {
    let mut params = params.clone();
    if !use_common_voltage_range || params.voltage_range.is_some() {
        return params;
    }
    let halves: Vec<HalfCycleData> = extracted
        .iter()
        .filter_map(|h| h.as_ref().ok().cloned())
        .collect();
    match common_voltage_range(&halves) {
        Some(range) => {
            info!("Using common voltage range {:.3}-{:.3} V", range.0, range.1);
            params.voltage_range = Some(range);
        }
        None if !halves.is_empty() => {
            warn!("Common voltage range of the selections is empty, keeping full ranges");
        }
        None => {}
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate, detect_boundaries, summarize_segments, AggregateParams, BoundaryMethod, Command,
    };

    fn half(voltage_v: Vec<f64>, capacity_ah: Vec<f64>, t: HalfCycleType) -> HalfCycleData {
        HalfCycleData {
            global_cycle_number: 1,
            half_cycle_type: t,
            voltage_v,
            capacity_ah,
        }
    }

    /// Linear charge 3.0 -> 4.2 V at 1 A over 1 h, then linear discharge back.
    fn linear_cycle(n: usize) -> Vec<Sample> {
        let mut samples = Vec::new();
        for i in 0..n {
            let f = i as f64 / (n - 1) as f64;
            samples.push(Sample::new(f, 3.0 + 1.2 * f, 1.0, 1, Command::Charge, 1));
        }
        for i in 0..n {
            let f = i as f64 / (n - 1) as f64;
            samples.push(Sample::new(1.0 + f, 4.1 - 1.0 * f, -1.0, 1, Command::Discharge, 1));
        }
        samples
    }

    fn cycles_for(samples: &[Sample]) -> Vec<CycleRecord> {
        let segments = detect_boundaries(samples, &BoundaryMethod::default()).unwrap();
        let summaries = summarize_segments(samples, &segments).unwrap();
        aggregate(&summaries, &AggregateParams::new(1.0)).unwrap()
    }

    #[test]
    fn test_linear_charge_gives_flat_curve() {
        let v: Vec<f64> = (0..50).map(|i| 3.0 + 1.2 * i as f64 / 49.0).collect();
        let q: Vec<f64> = (0..50).map(|i| i as f64 / 49.0).collect();
        let curve =
            compute_dqdu(&half(v, q, HalfCycleType::Charge), &DqduParams::default()).unwrap();
        assert_eq!(curve.points.len(), DEFAULT_N_POINTS);
        assert_eq!(curve.points[0].voltage_v, 3.0);
        assert!((curve.points[DEFAULT_N_POINTS - 1].voltage_v - 4.2).abs() < 1e-12);
        assert!(curve.points.iter().all(|p| p.dq_du_mah_per_v.is_finite()));
        for p in &curve.points {
            assert!((p.dq_du_mah_per_v - 1000.0 / 1.2).abs() < 1e-6);
        }
        assert!(curve.peaks.is_empty());
        assert_eq!(curve.params_hash.len(), 64);
    }

    #[test]
    fn test_discharge_is_negative() {
        let v: Vec<f64> = (0..40).map(|i| 4.0 - i as f64 * 0.02).collect();
        let q: Vec<f64> = (0..40).map(|i| i as f64 * 0.01).collect();
        let curve =
            compute_dqdu(&half(v, q, HalfCycleType::Discharge), &DqduParams::default()).unwrap();
        assert!(curve.points.iter().all(|p| p.dq_du_mah_per_v < 0.0));
        assert!((curve.points[100].dq_du_mah_per_v + 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_voltage_keeps_higher_capacity() {
        let v = vec![3.0, 3.1, 3.2, 3.2, 3.3, 3.4];
        let q = vec![0.0, 0.1, 0.2, 0.25, 0.35, 0.45];
        let params = DqduParams {
            n_points: 5,
            peaks: None,
            ..DqduParams::default()
        };
        let curve = compute_dqdu(&half(v, q, HalfCycleType::Charge), &params).unwrap();
        let at_32 = curve
            .points
            .iter()
            .find(|p| (p.voltage_v - 3.2).abs() < 1e-9)
            .unwrap();
        assert!((at_32.capacity_ah - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_near_duplicate_voltages_merge() {
        let h = half(
            vec![3.0, 3.0 + 5e-11, 3.1, 3.1 + 1e-11, 3.2, 3.2 + 2e-11],
            vec![0.0, 0.05, 0.1, 0.15, 0.2, 0.3],
            HalfCycleType::Charge,
        );
        assert_eq!(
            compute_dqdu(&h, &DqduParams::default()),
            Err(BcaError::InsufficientData {
                found: 3,
                required: MIN_DISTINCT_POINTS
            })
        );

        let mut by_voltage = BTreeMap::new();
        for (v, q) in [(3.0, 0.0), (3.2, 0.2), (3.2 + 5e-11, 0.25), (3.2 + 1e-9, 0.3)] {
            by_voltage.insert(OrderedFloat(v), q);
        }
        let (knots_v, knots_q) = merge_close_voltages(&by_voltage);
        assert_eq!(knots_v, vec![3.0, 3.2, 3.2 + 1e-9]);
        assert_eq!(knots_q, vec![0.0, 0.25, 0.3]);
    }

    #[test]
    fn test_insufficient_and_empty() {
        let h = half(vec![3.0, 3.0, 3.1, 3.2], vec![0.0, 0.1, 0.2, 0.3], HalfCycleType::Charge);
        assert_eq!(
            compute_dqdu(&h, &DqduParams::default()),
            Err(BcaError::InsufficientData {
                found: 3,
                required: MIN_DISTINCT_POINTS
            })
        );
        let params = DqduParams {
            voltage_range: Some((4.5, 5.0)),
            ..DqduParams::default()
        };
        assert!(matches!(compute_dqdu(&h, &params), Err(BcaError::EmptyResult(_))));
    }

    #[test]
    fn test_invalid_params() {
        let h = half(vec![3.0, 3.1, 3.2, 3.3], vec![0.0, 0.1, 0.2, 0.3], HalfCycleType::Charge);
        let bad = [
            DqduParams {
                voltage_range: Some((4.0, 3.0)),
                ..DqduParams::default()
            },
            DqduParams {
                smoothing: Smoothing::MovingAverage { window: 4 },
                ..DqduParams::default()
            },
            DqduParams {
                smoothing: Smoothing::SavitzkyGolay {
                    window: 401,
                    polynomial_order: 3,
                },
                ..DqduParams::default()
            },
            DqduParams {
                n_points: 1,
                ..DqduParams::default()
            },
        ];
        for params in bad {
            assert!(matches!(compute_dqdu(&h, &params), Err(BcaError::Configuration(_))));
        }
    }

    #[test]
    fn test_peak_on_charge_plateau() {
        // Capacity rises steeply around 3.7 V: a logistic step gives one dQ/dU peak.
        let v: Vec<f64> = (0..400).map(|i| 3.0 + i as f64 * 0.003).collect();
        let q: Vec<f64> = v.iter().map(|x| 1.0 / (1.0 + (-(x - 3.7) / 0.03).exp())).collect();
        let curve = compute_dqdu(
            &half(v.clone(), q.clone(), HalfCycleType::Charge),
            &DqduParams::default(),
        )
        .unwrap();
        assert_eq!(curve.peaks.len(), 1);
        assert!((curve.peaks[0].voltage_v - 3.7).abs() < 0.01);
        assert!(curve.peaks[0].intensity > 0.0);

        let mut v_dis = v;
        v_dis.reverse();
        let q_dis: Vec<f64> = q.iter().rev().map(|x| 1.0 - x).collect();
        let curve = compute_dqdu(
            &half(v_dis, q_dis, HalfCycleType::Discharge),
            &DqduParams::default(),
        )
        .unwrap();
        assert_eq!(curve.peaks.len(), 1);
        assert!(curve.peaks[0].intensity < 0.0);
    }

    #[test]
    fn test_extract_uses_integrated_current() {
        let samples = linear_cycle(21);
        let cycles = cycles_for(&samples);
        let data = extract_half_cycle(&samples, &cycles, 1, HalfCycleType::Charge, false).unwrap();
        assert_eq!(data.len(), 21);
        assert!((data.capacity_ah[20] - 1.0).abs() < 1e-12);

        assert!(matches!(
            extract_half_cycle(&samples, &cycles, 2, HalfCycleType::Charge, false),
            Err(BcaError::EmptyResult(_))
        ));
    }

    #[test]
    fn test_extract_prefers_device_counter_and_bridges() {
        let samples: Vec<Sample> = linear_cycle(11)
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.with_charge_ah(5.0 + 0.2 * i as f64))
            .collect();
        let cycles = cycles_for(&samples);
        let data =
            extract_half_cycle(&samples, &cycles, 1, HalfCycleType::Discharge, false).unwrap();
        assert!((data.capacity_ah[10] - 2.0).abs() < 1e-12);

        let bridged =
            extract_half_cycle(&samples, &cycles, 1, HalfCycleType::Discharge, true).unwrap();
        assert_eq!(bridged.len(), 12);
        assert!((bridged.voltage_v[0] - 4.2).abs() < 1e-12);
        assert_eq!(bridged.capacity_ah[0], bridged.capacity_ah[1]);
    }

    #[test]
    fn test_common_range_and_batch() {
        let samples = linear_cycle(41);
        let cycles = cycles_for(&samples);
        let selections = [
            DqduSelection::new(1, HalfCycleType::Charge),
            DqduSelection::new(1, HalfCycleType::Discharge),
            DqduSelection::new(9, HalfCycleType::Charge),
        ];
        let results =
            compute_dqdu_batch(&samples, &cycles, &selections, &DqduParams::default(), true);
        assert_eq!(results.len(), 3);
        // Charge samples sit on a 0.03 V grid, so the clipped charge starts at 3.12 V.
        for (_, result) in &results[..2] {
            let (lo, hi) = result.as_ref().unwrap().voltage_range().unwrap();
            assert!(lo > 3.1 - 1e-9 && lo < 3.13);
            assert!(hi < 4.1 + 1e-9 && hi > 4.07);
        }
        assert!(matches!(results[2].1, Err(BcaError::EmptyResult(_))));
    }

    #[test]
    fn test_idempotent() {
        let v: Vec<f64> = (0..60).map(|i| 3.0 + (i as f64 * 0.02)).collect();
        let q: Vec<f64> = v.iter().map(|x| (x - 3.0).powi(2)).collect();
        let h = half(v, q, HalfCycleType::Charge);
        let params = DqduParams {
            smoothing: Smoothing::SavitzkyGolay {
                window: 11,
                polynomial_order: 3,
            },
            ..DqduParams::default()
        };
        assert_eq!(compute_dqdu(&h, &params), compute_dqdu(&h, &params));
    }
}
