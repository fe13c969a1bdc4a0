use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use bca_cycles::{
    analyze_cycles, detect_boundaries, extract_half_cycle, parse_samples, parse_test_plan,
    resolve_common_range, AggregateParams, BoundaryMethod, CycleAnalysis, CycleRecord,
    CycleSummary, DifferentialCurve, DqduParams, DqduSelection, FileMetadata, HalfCycleType,
    ParsedFile, PeakParams, Smoothing,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Battery cycling analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect cycles and export per-half-cycle capacities
    Cycles(CyclesArgs),
    /// Compute dQ/dU curves and peaks for selected half-cycles
    Dqdu(DqduArgs),
    /// Print metadata, segment counts and cycle-index resets of a data file
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Tester export to analyze
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Input format (basytec, biologic, csv); inferred from the extension or content when omitted
    #[arg(long)]
    format: Option<String>,

    /// Cycle boundary detection method
    #[arg(long, value_enum, default_value_t = MethodOpt::StateBased)]
    method: MethodOpt,

    /// State code that marks the end of a step (state-based detection)
    #[arg(long, default_value_t = bca_cycles::boundary::DEFAULT_END_STATE_CODE)]
    end_state: i64,

    /// Currents with |I| at or below this many amps count as zero (zero-crossing detection)
    #[arg(long, default_value_t = bca_cycles::boundary::DEFAULT_DEAD_BAND_A)]
    dead_band: f64,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct CyclesArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Active material mass in grams
    #[arg(long)]
    mass: f64,

    /// Global cycle whose discharge capacity is the retention reference
    #[arg(long)]
    baseline: Option<u32>,

    /// Test plan file providing C-rate periods
    #[arg(long, value_hint = ValueHint::FilePath)]
    test_plan: Option<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "cycles.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional JSON summary output
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary_json: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct DqduArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Global cycle numbers to analyze (repeatable)
    #[arg(long = "cycle")]
    cycles: Vec<u32>,

    /// Half-cycle for each `--cycle`; a single value applies to all of them
    #[arg(long = "half", value_enum)]
    halves: Vec<HalfOpt>,

    /// Explicit selections such as `5:charge` (repeatable)
    #[arg(long = "select")]
    selections: Vec<String>,

    /// JSON file with dQ/dU parameters; command-line options override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Number of points on the uniform voltage grid
    #[arg(long)]
    points: Option<usize>,

    /// Lower clip voltage
    #[arg(long, requires = "v_max")]
    v_min: Option<f64>,

    /// Upper clip voltage
    #[arg(long, requires = "v_min")]
    v_max: Option<f64>,

    /// Clip all selections to their shared voltage window
    #[arg(long, action = ArgAction::SetTrue)]
    common_range: bool,

    /// Smoothing filter applied after differentiation
    #[arg(long, value_enum)]
    smoothing: Option<SmoothingOpt>,

    /// Smoothing window in points (Savitzky-Golay, moving average)
    #[arg(long, default_value_t = 11)]
    window: usize,

    /// Savitzky-Golay polynomial order
    #[arg(long, default_value_t = 3)]
    polyorder: usize,

    /// Gaussian sigma in points
    #[arg(long, default_value_t = 2.0)]
    sigma: f64,

    /// Skip peak detection
    #[arg(long, action = ArgAction::SetTrue)]
    no_peaks: bool,

    /// Minimum peak prominence as a fraction of the curve maximum
    #[arg(long)]
    prominence: Option<f64>,

    /// Minimum peak width in grid points
    #[arg(long)]
    min_width: Option<f64>,

    /// Bridge the IR drop to the opposite half-cycle's cutoff voltage
    #[arg(long, action = ArgAction::SetTrue)]
    bridge_ir_drop: bool,

    /// Active material mass in grams; adds mass-normalized dQ/dU columns
    #[arg(long)]
    mass: Option<f64>,

    /// Output curve CSV path (`-` for stdout)
    #[arg(short, long, default_value = "dqdu.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional peak table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    peaks_output: Option<PathBuf>,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[command(flatten)]
    input: InputArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MethodOpt {
    StateBased,
    ZeroCrossing,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HalfOpt {
    Charge,
    Discharge,
}

impl From<HalfOpt> for HalfCycleType {
    fn from(value: HalfOpt) -> Self {
        match value {
            HalfOpt::Charge => HalfCycleType::Charge,
            HalfOpt::Discharge => HalfCycleType::Discharge,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SmoothingOpt {
    None,
    Savgol,
    MovingAverage,
    Gaussian,
}

impl InputArgs {
    fn boundary_method(&self) -> BoundaryMethod {
        match self.method {
            MethodOpt::StateBased => BoundaryMethod::StateBased {
                end_state_code: self.end_state,
            },
            MethodOpt::ZeroCrossing => BoundaryMethod::ZeroCrossing {
                dead_band_a: self.dead_band,
            },
        }
    }

    fn format_hint(&self) -> Option<String> {
        self.format.clone().or_else(|| {
            self.input
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase())
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Cycles(args) => args.input.verbose,
        Command::Dqdu(args) => args.input.verbose,
        Command::Inspect(args) => args.input.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Cycles(args) => handle_cycles(args),
        Command::Dqdu(args) => handle_dqdu(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn load_input(args: &InputArgs) -> Result<ParsedFile> {
    let path = &args.input;
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&data);
    let hint = args.format_hint();
    parse_samples(&text, hint.as_deref())
        .with_context(|| format!("failed to parse {}", path.display()))
}

fn run_analysis(
    args: &InputArgs,
    parsed: &ParsedFile,
    params: &AggregateParams,
) -> Result<CycleAnalysis> {
    let method = args.boundary_method();
    debug!("Boundary detection: {} ({})", method.id(), method.description());
    analyze_cycles(&parsed.samples, &method, params)
        .with_context(|| format!("cycle analysis of {} failed", args.input.display()))
}

#[derive(Serialize)]
struct CyclesReport<'a> {
    input: String,
    adapter: &'a str,
    metadata: &'a FileMetadata,
    method: BoundaryMethod,
    params: &'a AggregateParams,
    summary: &'a CycleSummary,
}

fn handle_cycles(args: CyclesArgs) -> Result<()> {
    let parsed = load_input(&args.input)?;

    let mut params = AggregateParams::new(args.mass);
    params.baseline_cycle = args.baseline;
    if let Some(plan_path) = args.test_plan.as_ref() {
        let data = fs::read(plan_path)
            .with_context(|| format!("failed to read {}", plan_path.display()))?;
        let plan = parse_test_plan(&String::from_utf8_lossy(&data));
        info!("Test plan C-rate periods: {}", plan.format_periods());
        params.c_rate_periods = plan.c_rate_periods;
    }

    let analysis = run_analysis(&args.input, &parsed, &params)?;
    if analysis.cycles.is_empty() {
        warn!("No complete half-cycles found in {}", args.input.input.display());
    }

    if args.output.as_os_str() == "-" {
        write_cycles_stdout(&analysis.cycles)?;
    } else {
        write_cycles_csv(&analysis.cycles, &args.output)?;
        info!("Cycle table written: {}", args.output.display());
    }

    if let Some(path) = args.summary_json.as_ref() {
        let report = CyclesReport {
            input: args.input.input.display().to_string(),
            adapter: &parsed.adapter,
            metadata: &parsed.metadata,
            method: args.input.boundary_method(),
            params: &params,
            summary: &analysis.summary,
        };
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Summary written: {}", path.display());
    }

    let s = &analysis.summary;
    info!(
        "{} cycles, mean discharge {} mAh/g, final discharge retention {}",
        s.total_cycles,
        fmt_opt(s.mean_discharge_specific_mah_g, 2),
        s.final_discharge_retention_pct
            .map(|v| format!("{:.1}%", v))
            .unwrap_or_else(|| "n/a".into())
    );
    Ok(())
}

fn write_cycles_stdout(cycles: &[CycleRecord]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_cycle_rows(cycles, &mut writer)
}

fn write_cycles_csv(cycles: &[CycleRecord], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_cycle_rows(cycles, &mut writer)
}

fn write_cycle_rows<W: Write>(cycles: &[CycleRecord], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "global_cycle",
        "step",
        "cycle_index",
        "half_cycle",
        "capacity_ah",
        "specific_capacity_mah_g",
        "voltage_min_v",
        "voltage_max_v",
        "duration_h",
        "mean_temperature_c",
        "c_rate",
        "coulombic_efficiency",
        "retention_pct",
        "quality_flags",
    ])?;

    for row in cycles.iter().flat_map(CycleRecord::rows) {
        writer.write_record([
            row.global_cycle_number.to_string(),
            row.step.to_string(),
            row.cycle_index.to_string(),
            row.half_cycle_type.to_string(),
            format!("{:.6}", row.capacity_ah),
            format!("{:.3}", row.specific_capacity_mah_g),
            format!("{:.4}", row.voltage_min_v),
            format!("{:.4}", row.voltage_max_v),
            format!("{:.4}", row.duration_h),
            fmt_opt(row.mean_temperature_c, 2),
            fmt_opt(row.c_rate, 3),
            fmt_opt(row.coulombic_efficiency, 5),
            fmt_opt(row.retention_pct, 2),
            row.quality_flags,
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn handle_dqdu(args: DqduArgs) -> Result<()> {
    let selections = collect_selections(&args)?;
    let params = build_dqdu_params(&args)?;
    params
        .validate()
        .context("invalid dQ/dU parameters")?;

    let t0 = Instant::now();
    let parsed = load_input(&args.input)?;
    // Mass only scales specific capacities, which dQ/dU does not read.
    let aggregate_params = AggregateParams::new(args.mass.unwrap_or(1.0));
    let analysis = run_analysis(&args.input, &parsed, &aggregate_params)?;
    let t_analysis = t0.elapsed();

    let t1 = Instant::now();
    let extracted: Vec<_> = selections
        .iter()
        .map(|sel| {
            extract_half_cycle(
                &parsed.samples,
                &analysis.cycles,
                sel.global_cycle_number,
                sel.half_cycle_type,
                params.bridge_ir_drop,
            )
        })
        .collect();
    let params = resolve_common_range(&extracted, &params, args.common_range);

    let results: Vec<(DqduSelection, Result<DifferentialCurve, bca_cycles::BcaError>)> =
        selections
            .par_iter()
            .zip(extracted.par_iter())
            .map(|(sel, half)| {
                let result = half
                    .clone()
                    .and_then(|h| bca_cycles::compute_dqdu(&h, &params));
                (*sel, result)
            })
            .collect();
    let t_dqdu = t1.elapsed();

    let mut curves = Vec::with_capacity(results.len());
    for (sel, result) in results {
        match result {
            Ok(curve) => {
                debug!(
                    "cycle {} {}: {} points, {} peaks",
                    sel.global_cycle_number,
                    sel.half_cycle_type,
                    curve.points.len(),
                    curve.peaks.len()
                );
                curves.push(curve);
            }
            Err(e) => warn!(
                "Skipping cycle {} {}: {}",
                sel.global_cycle_number, sel.half_cycle_type, e
            ),
        }
    }
    if curves.is_empty() {
        return Err(anyhow!("none of the {} selections produced a curve", selections.len()));
    }

    if args.output.as_os_str() == "-" {
        write_curves_stdout(&curves)?;
    } else {
        write_curves_csv(&curves, &args.output)?;
        info!("dQ/dU curves written: {}", args.output.display());
    }

    if let Some(path) = args.peaks_output.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_peak_rows(&curves, &mut writer)?;
        info!("Peak table written: {}", path.display());
    }

    if args.profile {
        info!(
            "Profile: analysis {:.1} ms, dQ/dU {:.1} ms",
            t_analysis.as_secs_f64() * 1000.0,
            t_dqdu.as_secs_f64() * 1000.0
        );
    }
    info!(
        "{} of {} selections computed (params {})",
        curves.len(),
        selections.len(),
        &curves[0].params_hash[..12]
    );
    Ok(())
}

fn collect_selections(args: &DqduArgs) -> Result<Vec<DqduSelection>> {
    let mut selections = Vec::new();
    if !args.cycles.is_empty() {
        let halves: Vec<HalfCycleType> = match args.halves.len() {
            0 => bail!("--cycle needs --half charge|discharge"),
            1 => vec![args.halves[0].into(); args.cycles.len()],
            n if n == args.cycles.len() => args.halves.iter().map(|&h| h.into()).collect(),
            n => bail!(
                "got {} --half values for {} --cycle values; pass one or one per cycle",
                n,
                args.cycles.len()
            ),
        };
        selections.extend(
            args.cycles
                .iter()
                .zip(halves)
                .map(|(&cycle, half)| DqduSelection::new(cycle, half)),
        );
    } else if !args.halves.is_empty() {
        bail!("--half given without --cycle");
    }
    for token in &args.selections {
        selections.push(parse_selection(token)?);
    }
    if selections.is_empty() {
        bail!("no selections; pass --cycle/--half or --select CYCLE:HALF");
    }
    Ok(selections)
}

fn parse_selection(token: &str) -> Result<DqduSelection> {
    let (cycle, half) = token
        .split_once(':')
        .ok_or_else(|| anyhow!("selection '{}' is not CYCLE:HALF", token))?;
    let cycle: u32 = cycle
        .trim()
        .parse()
        .with_context(|| format!("invalid cycle number in selection '{}'", token))?;
    let half = HalfCycleType::parse(half)
        .ok_or_else(|| anyhow!("unknown half-cycle '{}' in selection '{}'", half, token))?;
    Ok(DqduSelection::new(cycle, half))
}

fn build_dqdu_params(args: &DqduArgs) -> Result<DqduParams> {
    let mut params = match args.config.as_ref() {
        Some(path) => {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_slice::<DqduParams>(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => DqduParams::default(),
    };

    if let Some(points) = args.points {
        params.n_points = points;
    }
    if let (Some(lo), Some(hi)) = (args.v_min, args.v_max) {
        params.voltage_range = Some((lo, hi));
    }
    if let Some(opt) = args.smoothing {
        params.smoothing = match opt {
            SmoothingOpt::None => Smoothing::None,
            SmoothingOpt::Savgol => Smoothing::SavitzkyGolay {
                window: args.window,
                polynomial_order: args.polyorder,
            },
            SmoothingOpt::MovingAverage => Smoothing::MovingAverage {
                window: args.window,
            },
            SmoothingOpt::Gaussian => Smoothing::Gaussian { sigma: args.sigma },
        };
    }
    if args.no_peaks {
        params.peaks = None;
    } else if args.prominence.is_some() || args.min_width.is_some() {
        let mut peaks = params.peaks.take().unwrap_or_default();
        if let Some(p) = args.prominence {
            peaks.prominence_fraction = p;
        }
        if let Some(w) = args.min_width {
            peaks.min_width_points = w;
        }
        params.peaks = Some(peaks);
    } else if params.peaks.is_none() && args.config.is_none() {
        params.peaks = Some(PeakParams::default());
    }
    if args.bridge_ir_drop {
        params.bridge_ir_drop = true;
    }
    if args.mass.is_some() {
        params.active_material_mass_g = args.mass;
    }
    Ok(params)
}

fn write_curves_stdout(curves: &[DifferentialCurve]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_curve_rows(curves, &mut writer)
}

fn write_curves_csv(curves: &[DifferentialCurve], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_curve_rows(curves, &mut writer)
}

fn write_curve_rows<W: Write>(
    curves: &[DifferentialCurve],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "global_cycle",
        "half_cycle",
        "smoothing",
        "voltage_v",
        "capacity_ah",
        "dq_du_mah_per_v",
        "dq_du_mah_per_g_v",
    ])?;

    for curve in curves {
        let smoothing = curve.smoothing.to_string();
        for point in &curve.points {
            writer.write_record([
                curve.global_cycle_number.to_string(),
                curve.half_cycle_type.to_string(),
                smoothing.clone(),
                format!("{:.5}", point.voltage_v),
                format!("{:.6}", point.capacity_ah),
                format!("{:.4}", point.dq_du_mah_per_v),
                fmt_opt(point.dq_du_mah_per_g_v, 4),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn write_peak_rows<W: Write>(
    curves: &[DifferentialCurve],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "global_cycle",
        "half_cycle",
        "voltage_v",
        "intensity_mah_per_v",
        "prominence",
        "width_points",
        "width_v",
    ])?;

    for curve in curves {
        for peak in &curve.peaks {
            writer.write_record([
                curve.global_cycle_number.to_string(),
                curve.half_cycle_type.to_string(),
                format!("{:.4}", peak.voltage_v),
                format!("{:.4}", peak.intensity),
                format!("{:.4}", peak.prominence),
                format!("{:.2}", peak.width),
                format!("{:.4}", peak.width_v),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let parsed = load_input(&args.input)?;
    let samples = &parsed.samples;
    let mut report = String::new();

    report.push_str(&format!("FILE: {}\n", args.input.input.display()));
    report.push_str(&format!("  adapter: {}\n", parsed.adapter));
    let meta = &parsed.metadata;
    let labeled = [
        ("test_name", meta.test_name.clone()),
        ("battery", meta.battery_name.clone()),
        ("channel", meta.test_channel.clone()),
        ("test_plan", meta.test_plan.clone()),
        ("start", meta.test_start.map(|t| t.to_string())),
        ("end", meta.test_end.map(|t| t.to_string())),
    ];
    for (label, value) in labeled {
        if let Some(value) = value {
            report.push_str(&format!("  {}: {}\n", label, value));
        }
    }
    if !meta.entries.is_empty() {
        report.push_str(&format!("  header_entries: {}\n", meta.entries.len()));
    }

    report.push_str(&format!("  samples: {}\n", samples.len()));
    if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
        report.push_str(&format!("  timespan_h: {:.3}\n", last.time_h - first.time_h));
        let (v_lo, v_hi) = samples.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), s| (lo.min(s.voltage_v), hi.max(s.voltage_v)),
        );
        report.push_str(&format!("  voltage_v: {:.4}..{:.4}\n", v_lo, v_hi));
        let with_temp = samples.iter().filter(|s| s.temperature_c.is_some()).count();
        let with_ah = samples.iter().filter(|s| s.charge_ah.is_some()).count();
        report.push_str(&format!(
            "  temperature_samples: {}\n  counter_samples: {}\n",
            with_temp, with_ah
        ));
    }

    let resets: Vec<(usize, i64, i64)> = samples
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1].cycle_index < w[0].cycle_index)
        .map(|(i, w)| (i + 1, w[0].cycle_index, w[1].cycle_index))
        .collect();
    report.push_str(&format!("  cycle_index_resets: {}\n", resets.len()));
    for (index, from, to) in resets.iter().take(20) {
        report.push_str(&format!("    - sample {}: {} -> {}\n", index, from, to));
    }

    let method = args.input.boundary_method();
    match detect_boundaries(samples, &method) {
        Ok(segments) => {
            report.push_str(&format!("  segments ({}): {}\n", method.id(), segments.len()));
            let mut counts = std::collections::BTreeMap::new();
            for seg in &segments {
                *counts.entry(seg.command.as_str()).or_insert(0usize) += 1;
            }
            for (command, count) in counts {
                report.push_str(&format!("    - {}: {}\n", command, count));
            }
        }
        Err(e) => report.push_str(&format!("  segments: error: {}\n", e)),
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(report.as_bytes())?;
    handle.flush()?;
    Ok(())
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_default()
}
