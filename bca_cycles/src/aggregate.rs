use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::testplan::{period_for_cycle, CRatePeriod};
use super::{BcaError, HalfCycleType, SegmentSummary};

/// Bounds outside which a half-cycle is flagged as implausible.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityLimits {
    pub min_duration_h: f64,
    pub min_capacity_ah: f64,
    pub max_capacity_ah: f64,
}

impl Default for QualityLimits {
    fn default() -> Self {
        Self {
            min_duration_h: 0.01,
            min_capacity_ah: 1e-5,
            max_capacity_ah: 10.0,
        }
    }
}

impl QualityLimits {
    pub fn check(&self, capacity_ah: f64, duration_h: f64) -> Vec<QualityFlag> {
        let mut flags = Vec::new();
        if duration_h < self.min_duration_h {
            flags.push(QualityFlag::TooShort);
        }
        if capacity_ah < self.min_capacity_ah {
            flags.push(QualityFlag::TooSmall);
        }
        if capacity_ah > self.max_capacity_ah {
            flags.push(QualityFlag::TooLarge);
        }
        flags
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    TooShort,
    TooSmall,
    TooLarge,
}

impl QualityFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityFlag::TooShort => "too_short",
            QualityFlag::TooSmall => "too_small",
            QualityFlag::TooLarge => "too_large",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregateParams {
    pub active_material_mass_g: f64,
    /// Global cycle whose discharge capacity is 100 % retention.
    pub baseline_cycle: Option<u32>,
    pub c_rate_periods: Vec<CRatePeriod>,
    pub quality: QualityLimits,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AggregateParams {
    pub fn new(active_material_mass_g: f64) -> Self {
        Self {
            active_material_mass_g,
            baseline_cycle: None,
            c_rate_periods: Vec::new(),
            quality: QualityLimits::default(),
        }
    }

    pub fn validate(&self) -> Result<(), BcaError> {
        let mass = self.active_material_mass_g;
        if !mass.is_finite() || mass <= 0.0 {
            return Err(BcaError::Configuration(format!(
                "active material mass must be positive, got {mass} g"
            )));
        }
        if self.baseline_cycle == Some(0) {
            return Err(BcaError::Configuration(
                "baseline cycle numbers start at 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HalfCycleRecord {
    pub half_cycle_type: HalfCycleType,
    pub capacity_ah: f64,
    pub specific_capacity_mah_g: f64,
    pub voltage_min_v: f64,
    pub voltage_max_v: f64,
    /// Summed duration of the merged segments; pauses in between are not counted.
    pub duration_h: f64,
    pub start_time_h: f64,
    pub end_time_h: f64,
    pub mean_temperature_c: Option<f64>,
    pub n_samples: usize,
    /// Half-open sample ranges of the merged segments.
    pub sample_ranges: Vec<(usize, usize)>,
    pub c_rate: Option<f64>,
    /// Specific capacity relative to the same half of the baseline cycle, percent.
    pub retention_pct: Option<f64>,
    pub quality_flags: Vec<QualityFlag>,
}

impl HalfCycleRecord {
    pub fn is_plausible(&self) -> bool {
        self.quality_flags.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub global_cycle_number: u32,
    /// Device index the cycle was reported under.
    pub cycle_index: i64,
    /// Test-plan step, counted from 1 and advanced at each index reset.
    pub step: u32,
    pub charge: Option<HalfCycleRecord>,
    pub discharge: Option<HalfCycleRecord>,
    /// Discharge over charge capacity, as a ratio.
    pub coulombic_efficiency: Option<f64>,
}

impl CycleRecord {
    fn new(global_cycle_number: u32, cycle_index: i64, step: u32) -> Self {
        Self {
            global_cycle_number,
            cycle_index,
            step,
            charge: None,
            discharge: None,
            coulombic_efficiency: None,
        }
    }

    pub fn half(&self, half: HalfCycleType) -> Option<&HalfCycleRecord> {
        match half {
            HalfCycleType::Charge => self.charge.as_ref(),
            HalfCycleType::Discharge => self.discharge.as_ref(),
        }
    }

    fn half_slot(&mut self, half: HalfCycleType) -> &mut Option<HalfCycleRecord> {
        match half {
            HalfCycleType::Charge => &mut self.charge,
            HalfCycleType::Discharge => &mut self.discharge,
        }
    }

    /// One row per present half, charge first.
    pub fn rows(&self) -> Vec<CycleRow> {
        [&self.charge, &self.discharge]
            .into_iter()
            .flatten()
            .map(|h| CycleRow {
                global_cycle_number: self.global_cycle_number,
                step: self.step,
                cycle_index: self.cycle_index,
                half_cycle_type: h.half_cycle_type,
                capacity_ah: h.capacity_ah,
                specific_capacity_mah_g: h.specific_capacity_mah_g,
                voltage_min_v: h.voltage_min_v,
                voltage_max_v: h.voltage_max_v,
                duration_h: h.duration_h,
                mean_temperature_c: h.mean_temperature_c,
                c_rate: h.c_rate,
                coulombic_efficiency: self.coulombic_efficiency,
                retention_pct: h.retention_pct,
                quality_flags: h
                    .quality_flags
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(";"),
            })
            .collect()
    }
}

/// Flat export row, one per (global cycle, half-cycle type).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CycleRow {
    pub global_cycle_number: u32,
    pub step: u32,
    pub cycle_index: i64,
    pub half_cycle_type: HalfCycleType,
    pub capacity_ah: f64,
    pub specific_capacity_mah_g: f64,
    pub voltage_min_v: f64,
    pub voltage_max_v: f64,
    pub duration_h: f64,
    pub mean_temperature_c: Option<f64>,
    pub c_rate: Option<f64>,
    pub coulombic_efficiency: Option<f64>,
    pub retention_pct: Option<f64>,
    pub quality_flags: String,
}

/// Consecutive active segments of one command under one device index.
struct HalfGroup<'a> {
    half: HalfCycleType,
    cycle_index: i64,
    members: Vec<&'a SegmentSummary>,
}

fn group_halves(summaries: &[SegmentSummary]) -> Vec<HalfGroup<'_>> {
    let mut groups: Vec<HalfGroup<'_>> = Vec::new();
    for summary in summaries {
        let Some(half) = summary.segment.command.half_cycle() else {
            continue;
        };
        let cycle_index = summary.segment.cycle_index;
        match groups.last_mut() {
            Some(last) if last.half == half && last.cycle_index == cycle_index => {
                last.members.push(summary);
            }
            _ => groups.push(HalfGroup {
                half,
                cycle_index,
                members: vec![summary],
            }),
        }
    }
    groups
}

fn build_half(group: &HalfGroup<'_>, mass_g: f64) -> HalfCycleRecord {
    let mut capacity_ah = 0.0;
    let mut duration_h = 0.0;
    let mut voltage_min_v = f64::INFINITY;
    let mut voltage_max_v = f64::NEG_INFINITY;
    let mut n_samples = 0usize;
    let mut temp_weighted = 0.0;
    let mut temp_weight = 0usize;
    for m in &group.members {
        capacity_ah += m.capacity_ah;
        duration_h += m.duration_h;
        voltage_min_v = voltage_min_v.min(m.voltage_min_v);
        voltage_max_v = voltage_max_v.max(m.voltage_max_v);
        n_samples += m.n_samples;
        if let Some(t) = m.mean_temperature_c {
            temp_weighted += t * m.n_samples as f64;
            temp_weight += m.n_samples;
        }
    }
    let first = group.members.first();
    let last = group.members.last();
    HalfCycleRecord {
        half_cycle_type: group.half,
        capacity_ah,
        specific_capacity_mah_g: capacity_ah * 1000.0 / mass_g,
        voltage_min_v,
        voltage_max_v,
        duration_h,
        start_time_h: first.map_or(0.0, |m| m.start_time_h),
        end_time_h: last.map_or(0.0, |m| m.end_time_h),
        mean_temperature_c: (temp_weight > 0).then(|| temp_weighted / temp_weight as f64),
        n_samples,
        sample_ranges: group
            .members
            .iter()
            .map(|m| (m.segment.start, m.segment.end))
            .collect(),
        c_rate: None,
        retention_pct: None,
        quality_flags: Vec::new(),
    }
}

/// Segments must follow each other without overlapping.
fn check_order(summaries: &[SegmentSummary]) -> Result<(), BcaError> {
    for pair in summaries.windows(2) {
        let (prev, next) = (&pair[0].segment, &pair[1].segment);
        if next.start < prev.end {
            return Err(BcaError::DataIntegrity {
                index: next.start,
                reason: format!(
                    "segment {}..{} starts before the previous segment {}..{} ends",
                    next.start, next.end, prev.start, prev.end
                ),
            });
        }
    }
    Ok(())
}

/// Build the per-cycle table from segment summaries, ordered by global cycle number.
///
/// Any decrease of the device cycle index starts a new test-plan step; global
/// numbers keep counting across steps.
pub fn aggregate(
    summaries: &[SegmentSummary],
    params: &AggregateParams,
) -> Result<Vec<CycleRecord>, BcaError> {
    params.validate()?;
    check_order(summaries)?;
    let mass_g = params.active_material_mass_g;
    let groups = group_halves(summaries);
    if groups.is_empty() {
        return Err(BcaError::EmptyResult(
            "no charge or discharge segments to aggregate".into(),
        ));
    }

    let mut cycles: Vec<CycleRecord> = Vec::new();
    let mut step = 1u32;
    for group in &groups {
        let starts_cycle = match cycles.last() {
            None => true,
            Some(current) if group.cycle_index > current.cycle_index => true,
            Some(current) if group.cycle_index == current.cycle_index => {
                current.half(group.half).is_some()
            }
            Some(current) => {
                step += 1;
                info!(
                    "Device cycle index reset {} -> {}; starting step {}",
                    current.cycle_index, group.cycle_index, step
                );
                true
            }
        };
        if starts_cycle {
            let global = cycles.len() as u32 + 1;
            cycles.push(CycleRecord::new(global, group.cycle_index, step));
        }

        let mut half = build_half(group, mass_g);
        if let Some(current) = cycles.last_mut() {
            half.c_rate = period_for_cycle(&params.c_rate_periods, current.global_cycle_number)
                .map(|p| match group.half {
                    HalfCycleType::Charge => p.charge_rate,
                    HalfCycleType::Discharge => p.discharge_rate,
                });
            half.quality_flags = params.quality.check(half.capacity_ah, half.duration_h);
            if !half.is_plausible() {
                warn!(
                    "Cycle {} {}: implausible half-cycle ({:.6} Ah over {:.4} h) flagged {:?}",
                    current.global_cycle_number,
                    group.half,
                    half.capacity_ah,
                    half.duration_h,
                    half.quality_flags
                );
            }
            *current.half_slot(group.half) = Some(half);
        }
    }

    for cycle in &mut cycles {
        cycle.coulombic_efficiency = match (&cycle.charge, &cycle.discharge) {
            (Some(c), Some(d)) if c.capacity_ah > 0.0 => Some(d.capacity_ah / c.capacity_ah),
            _ => None,
        };
    }

    if let Some(baseline) = params.baseline_cycle {
        let reference = cycles
            .iter()
            .find(|c| c.global_cycle_number == baseline)
            .ok_or_else(|| {
                BcaError::Configuration(format!(
                    "baseline cycle {baseline} not found ({} cycles)",
                    cycles.len()
                ))
            })?;
        let reference_of = |half: HalfCycleType| {
            reference
                .half(half)
                .map(|h| h.specific_capacity_mah_g)
                .filter(|q| *q > 0.0)
        };
        let discharge_ref = reference_of(HalfCycleType::Discharge).ok_or_else(|| {
            BcaError::Configuration(format!(
                "baseline cycle {baseline} has no positive discharge capacity"
            ))
        })?;
        let charge_ref = reference_of(HalfCycleType::Charge);
        if charge_ref.is_none() {
            warn!(
                "Baseline cycle {baseline} has no positive charge capacity; \
                 charge retention left empty"
            );
        }
        for cycle in &mut cycles {
            if let (Some(h), Some(r)) = (cycle.charge.as_mut(), charge_ref) {
                h.retention_pct = Some(100.0 * h.specific_capacity_mah_g / r);
            }
            if let Some(h) = cycle.discharge.as_mut() {
                h.retention_pct = Some(100.0 * h.specific_capacity_mah_g / discharge_ref);
            }
        }
    }

    debug!(
        "Aggregated {} half-cycles into {} cycles over {} steps",
        groups.len(),
        cycles.len(),
        step
    );
    Ok(cycles)
}

/// Whole-test figures derived from the cycle table.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleSummary {
    pub total_cycles: usize,
    pub charge_half_cycles: usize,
    pub discharge_half_cycles: usize,
    pub mean_charge_specific_mah_g: Option<f64>,
    pub mean_discharge_specific_mah_g: Option<f64>,
    pub mean_coulombic_efficiency: Option<f64>,
    pub mean_voltage_window_v: Option<f64>,
    pub final_charge_retention_pct: Option<f64>,
    pub final_discharge_retention_pct: Option<f64>,
    /// Discharge retention lost per cycle, percent.
    pub fade_per_cycle_pct: Option<f64>,
    /// Wall-clock span from the first half-cycle start to the last half-cycle end.
    pub total_duration_h: f64,
    pub implausible_half_cycles: usize,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

pub fn summarize_cycles(cycles: &[CycleRecord]) -> CycleSummary {
    let halves = || {
        cycles
            .iter()
            .flat_map(|c| [c.charge.as_ref(), c.discharge.as_ref()])
            .flatten()
    };
    let final_retention = |half: HalfCycleType| {
        cycles
            .iter()
            .rev()
            .find_map(|c| c.half(half).and_then(|h| h.retention_pct))
    };
    let final_discharge_retention_pct = final_retention(HalfCycleType::Discharge);
    let start = halves().map(|h| h.start_time_h).fold(f64::INFINITY, f64::min);
    let end = halves().map(|h| h.end_time_h).fold(f64::NEG_INFINITY, f64::max);
    CycleSummary {
        total_cycles: cycles.len(),
        charge_half_cycles: cycles.iter().filter(|c| c.charge.is_some()).count(),
        discharge_half_cycles: cycles.iter().filter(|c| c.discharge.is_some()).count(),
        mean_charge_specific_mah_g: mean(
            cycles
                .iter()
                .filter_map(|c| c.charge.as_ref().map(|h| h.specific_capacity_mah_g)),
        ),
        mean_discharge_specific_mah_g: mean(
            cycles
                .iter()
                .filter_map(|c| c.discharge.as_ref().map(|h| h.specific_capacity_mah_g)),
        ),
        mean_coulombic_efficiency: mean(cycles.iter().filter_map(|c| c.coulombic_efficiency)),
        mean_voltage_window_v: mean(halves().map(|h| h.voltage_max_v - h.voltage_min_v)),
        final_charge_retention_pct: final_retention(HalfCycleType::Charge),
        final_discharge_retention_pct,
        fade_per_cycle_pct: final_discharge_retention_pct
            .filter(|_| !cycles.is_empty())
            .map(|r| (100.0 - r) / cycles.len() as f64),
        total_duration_h: if end >= start { end - start } else { 0.0 },
        implausible_half_cycles: halves().filter(|h| !h.is_plausible()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, Segment};

    pub(super) fn summary(
        start: usize,
        command: Command,
        cycle_index: i64,
        capacity_ah: f64,
    ) -> SegmentSummary {
        SegmentSummary {
            segment: Segment {
                start,
                end: start + 10,
                command,
                cycle_index,
            },
            capacity_ah,
            voltage_min_v: 3.0,
            voltage_max_v: 4.2,
            voltage_mean_v: 3.6,
            start_time_h: start as f64,
            end_time_h: start as f64 + 1.0,
            duration_h: 1.0,
            mean_temperature_c: None,
            n_samples: 10,
        }
    }

    fn cycle_pair(start: usize, index: i64, charge: f64, discharge: f64) -> [SegmentSummary; 2] {
        [
            summary(start, Command::Charge, index, charge),
            summary(start + 10, Command::Discharge, index, discharge),
        ]
    }

    #[test]
    fn test_basic_cycles_and_efficiency() {
        let mut summaries = Vec::new();
        summaries.extend(cycle_pair(0, 1, 0.0010, 0.0009));
        summaries.extend(cycle_pair(20, 2, 0.0010, 0.0008));
        let cycles = aggregate(&summaries, &AggregateParams::new(0.01)).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].global_cycle_number, 1);
        assert_eq!(cycles[1].global_cycle_number, 2);
        let eff = cycles[0].coulombic_efficiency.unwrap();
        assert!((eff - 0.9).abs() < 1e-12);
        let specific = cycles[1].discharge.as_ref().unwrap().specific_capacity_mah_g;
        assert!((specific - 80.0).abs() < 1e-9);
        assert_eq!(cycles[0].rows().len(), 2);
    }

    #[test]
    fn test_cc_cv_segments_merge() {
        let summaries = vec![
            summary(0, Command::Charge, 1, 0.8),
            summary(10, Command::Pause, 1, 0.0),
            summary(20, Command::Charge, 1, 0.2),
            summary(30, Command::Discharge, 1, 0.95),
        ];
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        assert_eq!(cycles.len(), 1);
        let charge = cycles[0].charge.as_ref().unwrap();
        assert!((charge.capacity_ah - 1.0).abs() < 1e-12);
        assert_eq!(charge.sample_ranges, vec![(0, 10), (20, 30)]);
        assert!((charge.duration_h - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_half_type_starts_new_cycle() {
        let summaries = vec![
            summary(0, Command::Discharge, 0, 0.5),
            summary(10, Command::Charge, 0, 0.5),
            summary(20, Command::Discharge, 0, 0.5),
        ];
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        assert_eq!(cycles.len(), 2);
        assert!(cycles[1].charge.is_none());
        assert!(cycles[1].discharge.is_some());
    }

    #[test]
    fn test_partial_cycle_keeps_missing_half_null() {
        let summaries = vec![summary(0, Command::Charge, 1, 1.0)];
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].discharge.is_none());
        assert_eq!(cycles[0].coulombic_efficiency, None);
    }

    #[test]
    fn test_zero_charge_capacity_gives_no_efficiency() {
        let summaries = cycle_pair(0, 1, 0.0, 0.5);
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        assert_eq!(cycles[0].coulombic_efficiency, None);
    }

    #[test]
    fn test_resets_renumber_continuously() {
        let mut summaries = Vec::new();
        let mut start = 0;
        for step in 0..3 {
            for index in 1..=10 {
                summaries.extend(cycle_pair(start, index, 1.0, 0.9 - 0.01 * step as f64));
                start += 20;
            }
        }
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        let numbers: Vec<u32> = cycles.iter().map(|c| c.global_cycle_number).collect();
        assert_eq!(numbers, (1..=30).collect::<Vec<_>>());
        assert_eq!(cycles[9].step, 1);
        assert_eq!(cycles[10].step, 2);
        assert_eq!(cycles[29].step, 3);
    }

    #[test]
    fn test_any_index_decrease_starts_new_step() {
        let mut summaries = Vec::new();
        for (k, index) in [1, 2, 3, 2, 3, 4].into_iter().enumerate() {
            summaries.extend(cycle_pair(k * 20, index, 1.0, 1.0));
        }
        let cycles = aggregate(&summaries, &AggregateParams::new(1.0)).unwrap();
        let numbers: Vec<u32> = cycles.iter().map(|c| c.global_cycle_number).collect();
        assert_eq!(numbers, (1..=6).collect::<Vec<_>>());
        let steps: Vec<u32> = cycles.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_overlapping_segments_are_data_integrity() {
        let mut summaries = Vec::new();
        summaries.extend(cycle_pair(0, 1, 1.0, 1.0));
        summaries.extend(cycle_pair(40, 2, 1.0, 1.0));
        summaries.extend(cycle_pair(45, 3, 1.0, 1.0));
        match aggregate(&summaries, &AggregateParams::new(1.0)) {
            Err(BcaError::DataIntegrity { index, .. }) => assert_eq!(index, 45),
            other => panic!("expected data integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_retention_against_baseline() {
        let mut summaries = Vec::new();
        summaries.extend(cycle_pair(0, 1, 1.0, 0.5));
        summaries.extend(cycle_pair(20, 2, 1.0, 1.0));
        summaries.extend(cycle_pair(40, 3, 1.0, 0.9));
        let mut params = AggregateParams::new(2.0);
        params.baseline_cycle = Some(2);
        let cycles = aggregate(&summaries, &params).unwrap();
        let discharge = |i: usize| cycles[i].discharge.as_ref().unwrap().retention_pct.unwrap();
        assert!((discharge(2) - 90.0).abs() < 1e-9);
        assert!((discharge(0) - 50.0).abs() < 1e-9);

        let summary = summarize_cycles(&cycles);
        assert_eq!(summary.total_cycles, 3);
        assert!((summary.final_discharge_retention_pct.unwrap() - 90.0).abs() < 1e-9);
        assert!((summary.final_charge_retention_pct.unwrap() - 100.0).abs() < 1e-9);
        assert!((summary.fade_per_cycle_pct.unwrap() - 10.0 / 3.0).abs() < 1e-9);
        // First charge starts at 0 h, last discharge ends at 51 h.
        assert!((summary.total_duration_h - 51.0).abs() < 1e-12);
    }

    #[test]
    fn test_retention_per_half_cycle() {
        let mut summaries = Vec::new();
        summaries.extend(cycle_pair(0, 1, 1.0, 1.0));
        summaries.extend(cycle_pair(20, 2, 0.5, 0.9));
        let params = AggregateParams {
            baseline_cycle: Some(1),
            ..AggregateParams::new(1.0)
        };
        let cycles = aggregate(&summaries, &params).unwrap();
        let rows = cycles[1].rows();
        assert_eq!(rows[0].half_cycle_type, HalfCycleType::Charge);
        assert!((rows[0].retention_pct.unwrap() - 50.0).abs() < 1e-9);
        assert!((rows[1].retention_pct.unwrap() - 90.0).abs() < 1e-9);

        let summary = summarize_cycles(&cycles);
        assert!((summary.final_charge_retention_pct.unwrap() - 50.0).abs() < 1e-9);
        assert!((summary.final_discharge_retention_pct.unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_baseline_errors() {
        let summaries = vec![summary(0, Command::Charge, 1, 1.0)];
        let mut params = AggregateParams::new(1.0);
        params.baseline_cycle = Some(1);
        assert!(matches!(
            aggregate(&summaries, &params),
            Err(BcaError::Configuration(_))
        ));
        params.baseline_cycle = Some(7);
        assert!(matches!(
            aggregate(&summaries, &params),
            Err(BcaError::Configuration(_))
        ));
    }

    #[test]
    fn test_non_positive_mass_rejected() {
        let summaries = cycle_pair(0, 1, 1.0, 1.0);
        for mass in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                aggregate(&summaries, &AggregateParams::new(mass)),
                Err(BcaError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_c_rates_and_quality_flags() {
        let mut summaries = Vec::new();
        summaries.extend(cycle_pair(0, 1, 1.0, 20.0));
        summaries.extend(cycle_pair(20, 2, 1.0, 1e-7));
        let mut params = AggregateParams::new(1.0);
        params.c_rate_periods = vec![CRatePeriod {
            start_cycle: 1,
            end_cycle: 1,
            charge_rate: 0.1,
            discharge_rate: 0.2,
        }];
        let cycles = aggregate(&summaries, &params).unwrap();
        assert_eq!(cycles[0].charge.as_ref().unwrap().c_rate, Some(0.1));
        assert_eq!(cycles[1].discharge.as_ref().unwrap().c_rate, Some(0.2));
        assert_eq!(
            cycles[0].discharge.as_ref().unwrap().quality_flags,
            vec![QualityFlag::TooLarge]
        );
        assert_eq!(
            cycles[1].discharge.as_ref().unwrap().quality_flags,
            vec![QualityFlag::TooSmall]
        );
        assert_eq!(summarize_cycles(&cycles).implausible_half_cycles, 2);
    }
}
