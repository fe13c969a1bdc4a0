//! Extraction of C-rate periods from tester test-plan text.
//!
//! Plans list `Charge ... I=0.1CA` / `Discharge ... I=0.1CA` steps followed by a
//! `Cycle-end ... Count=N` line that repeats the block N times. Each completed
//! block becomes one [`CRatePeriod`]; cycles are numbered continuously across blocks.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_C_RATE: f64 = 0.333;
pub const DEFAULT_PERIOD_END: u32 = 1000;

static CHARGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)Charge.*?I=([0-9.,]+)CA").ok());
static DISCHARGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)Discharge.*?I=([0-9.,]+)CA").ok());
static CYCLE_END: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)Cycle-?end.*?Count=([0-9]+)").ok());
static CYCLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)Cycle.*?Count=([0-9]+)").ok());
static CHARGE_ALT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)CC.*?charge.*?([0-9.,]+)\s*C").ok());
static DISCHARGE_ALT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)CC.*?discharge.*?([0-9.,]+)\s*C").ok());

/// Rates, in multiples of nominal capacity, for an inclusive range of global cycles.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CRatePeriod {
    pub start_cycle: u32,
    pub end_cycle: u32,
    pub charge_rate: f64,
    pub discharge_rate: f64,
}

impl CRatePeriod {
    pub fn contains(&self, cycle: u32) -> bool {
        (self.start_cycle..=self.end_cycle).contains(&cycle)
    }

    pub fn default_period() -> Self {
        Self {
            start_cycle: 1,
            end_cycle: DEFAULT_PERIOD_END,
            charge_rate: DEFAULT_C_RATE,
            discharge_rate: DEFAULT_C_RATE,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TestPlan {
    pub c_rate_periods: Vec<CRatePeriod>,
    pub total_cycles: Option<u32>,
    pub test_name: Option<String>,
}

impl TestPlan {
    /// Period containing `cycle`, falling back to the last period.
    pub fn period_for_cycle(&self, cycle: u32) -> Option<&CRatePeriod> {
        period_for_cycle(&self.c_rate_periods, cycle)
    }

    pub fn format_periods(&self) -> String {
        if self.c_rate_periods.is_empty() {
            return "No C-rate periods defined".to_string();
        }
        self.c_rate_periods
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "Period {}: Cycles {}-{} | Charge: {:.3}C | Discharge: {:.3}C",
                    i + 1,
                    p.start_cycle,
                    p.end_cycle,
                    p.charge_rate,
                    p.discharge_rate
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn period_for_cycle(periods: &[CRatePeriod], cycle: u32) -> Option<&CRatePeriod> {
    periods
        .iter()
        .find(|p| p.contains(cycle))
        .or_else(|| periods.last())
}

fn capture<'a>(re: &LazyLock<Option<Regex>>, line: &'a str) -> Option<&'a str> {
    re.as_ref()?
        .captures(line)?
        .get(1)
        .map(|m| m.as_str())
}

fn parse_rate(token: &str) -> Option<f64> {
    token
        .trim_end_matches(['.', ','])
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite() && *r > 0.0)
}

/// Parse a test plan. Plans without any complete block yield the default period.
pub fn parse_test_plan(text: &str) -> TestPlan {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let test_name = lines.iter().take(10).find_map(|line| {
        if line.contains("Test:") || line.contains("Name:") {
            line.split_once(':').map(|(_, v)| v.trim().to_string())
        } else {
            None
        }
    });

    let mut periods = Vec::new();
    let mut next_cycle = 1u32;
    let mut charge_rate: Option<f64> = None;
    let mut discharge_rate: Option<f64> = None;
    let mut in_block = false;

    for (line_no, line) in lines.iter().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // "Discharge" contains "charge", so discharge steps are matched first.
        if let Some(token) = capture(&DISCHARGE, line).or_else(|| capture(&DISCHARGE_ALT, line)) {
            match parse_rate(token) {
                Some(rate) => {
                    discharge_rate = Some(rate);
                    in_block = true;
                }
                None => warn!("line {}: unreadable discharge rate '{}'", line_no + 1, token),
            }
        } else if let Some(token) = capture(&CHARGE, line).or_else(|| capture(&CHARGE_ALT, line)) {
            match parse_rate(token) {
                Some(rate) => {
                    charge_rate = Some(rate);
                    in_block = true;
                }
                None => warn!("line {}: unreadable charge rate '{}'", line_no + 1, token),
            }
        }

        let Some(count) = capture(&CYCLE_END, line).or_else(|| capture(&CYCLE, line)) else {
            continue;
        };
        if !in_block {
            continue;
        }
        let Some(count) = count.parse::<u32>().ok().filter(|c| *c > 0) else {
            warn!("line {}: unreadable cycle count '{}'", line_no + 1, count);
            continue;
        };
        if let (Some(charge), Some(discharge)) = (charge_rate, discharge_rate) {
            let period = CRatePeriod {
                start_cycle: next_cycle,
                end_cycle: next_cycle + count - 1,
                charge_rate: charge,
                discharge_rate: discharge,
            };
            debug!(
                "C-rate period: cycles {}-{}, charge {}C, discharge {}C",
                period.start_cycle, period.end_cycle, period.charge_rate, period.discharge_rate
            );
            next_cycle += count;
            periods.push(period);
            charge_rate = None;
            discharge_rate = None;
            in_block = false;
        }
    }

    if periods.is_empty() {
        info!("No C-rate periods found in test plan, using default");
        periods.push(CRatePeriod::default_period());
    }
    let total_cycles = periods.iter().map(|p| p.end_cycle).max();
    info!(
        "Parsed test plan: {} C-rate periods, total cycles {:?}",
        periods.len(),
        total_cycles
    );

    TestPlan {
        c_rate_periods: periods,
        total_cycles,
        test_name,
    }
}
