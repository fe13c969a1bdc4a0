//! Device adapters turning raw tester exports into normalized [`Sample`] sequences.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BcaError, Command, Sample};

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%d.%m.%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S%.f",
];

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Header information found ahead of the data block.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    /// Every `key: value` pair of the header, verbatim.
    pub entries: BTreeMap<String, String>,
    pub test_name: Option<String>,
    pub battery_name: Option<String>,
    pub test_start: Option<NaiveDateTime>,
    pub test_end: Option<NaiveDateTime>,
    pub test_channel: Option<String>,
    pub test_plan: Option<String>,
}

impl FileMetadata {
    fn from_entries(entries: BTreeMap<String, String>) -> Self {
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| entries.get(*k))
                .filter(|v| !v.is_empty())
                .cloned()
        };
        Self {
            test_name: pick(&["Name of Test", "Electrode material"]),
            battery_name: pick(&["Battery"]),
            test_start: pick(&["Start of Test", "Acquisition started on"])
                .as_deref()
                .and_then(parse_timestamp),
            test_end: pick(&["End of Test"]).as_deref().and_then(parse_timestamp),
            test_channel: pick(&["Testchannel", "Run on channel"]),
            test_plan: pick(&["Testplan"]),
            entries,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParsedFile {
    pub adapter: String,
    pub metadata: FileMetadata,
    pub samples: Vec<Sample>,
}

pub trait DeviceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    /// Cheap check whether `text` looks like this device's export.
    fn sniff(&self, text: &str) -> bool;
    fn parse(&self, text: &str) -> Result<ParsedFile, BcaError>;
}

fn parse_decimal(token: &str, line: usize, column: &str) -> Result<f64, BcaError> {
    token
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| BcaError::Parse {
            line,
            reason: format!("column {column}: '{token}' is not a number"),
        })
}

/// Index of the first header matching one of `names`.
fn find_column(columns: &[String], names: &[&str]) -> Option<usize> {
    names
        .iter()
        .find_map(|name| columns.iter().position(|c| c == name))
}

fn require_column(
    columns: &[String],
    names: &[&str],
    header_line: usize,
) -> Result<usize, BcaError> {
    find_column(columns, names).ok_or_else(|| BcaError::Parse {
        line: header_line,
        reason: format!("missing required column {}", names.join(" / ")),
    })
}

/// Field `idx` of a record, rejecting blanks.
fn field<'a>(
    parts: &[&'a str],
    idx: usize,
    record: usize,
    column: &str,
) -> Result<&'a str, BcaError> {
    parts
        .get(idx)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BcaError::DataIntegrity {
            index: record,
            reason: format!("record {record}: missing {column}"),
        })
}

/// Basytec exports: `~`-prefixed header, tab or whitespace separated data, comma decimals.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasytecAdapter;

impl BasytecAdapter {
    /// Split a data row whose `DateTime` may span two whitespace-separated tokens.
    fn split_row<'a>(line: &'a str, expected: usize, datetime_idx: Option<usize>) -> Vec<&'a str> {
        // Only the line ending goes: a trailing tab is an empty last field.
        let parts: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if parts.len() == expected {
            return parts;
        }
        let mut parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(dt) = datetime_idx {
            if parts.len() == expected + 1 && dt + 1 < parts.len() {
                // DateTime is never read, so its time half is simply dropped.
                parts.remove(dt + 1);
            }
        }
        parts
    }
}

impl DeviceAdapter for BasytecAdapter {
    fn name(&self) -> &'static str {
        "basytec"
    }

    fn sniff(&self, text: &str) -> bool {
        text.lines()
            .take(64)
            .any(|l| l.starts_with("~Time[h]") || l.starts_with("~Name of Test"))
    }

    fn parse(&self, text: &str) -> Result<ParsedFile, BcaError> {
        let mut entries = BTreeMap::new();
        let mut columns: Option<(usize, Vec<String>)> = None;
        let mut data_start = 0usize;

        for (i, line) in text.lines().enumerate() {
            let Some(body) = line.strip_prefix('~') else {
                data_start = i;
                break;
            };
            data_start = i + 1;
            let body = body.trim();
            if body.starts_with("Time[h]") {
                let cols = if body.contains('\t') {
                    body.split('\t').map(|c| c.trim().to_string()).collect()
                } else {
                    body.split_whitespace().map(str::to_string).collect()
                };
                columns = Some((i + 1, cols));
            } else if let Some((key, value)) = body.split_once(':') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let (header_line, columns) = columns.ok_or_else(|| BcaError::Parse {
            line: data_start,
            reason: "no ~Time[h] column header found".into(),
        })?;
        let time = require_column(&columns, &["Time[h]"], header_line)?;
        let voltage = require_column(&columns, &["U[V]"], header_line)?;
        let current = require_column(&columns, &["I[A]"], header_line)?;
        let state = require_column(&columns, &["State"], header_line)?;
        let command = require_column(&columns, &["Command"], header_line)?;
        let cycle = require_column(&columns, &["Cyc-Count", "Cyc", "Count"], header_line)?;
        let temperature = columns.iter().position(|c| c.starts_with("T1["));
        let charge = find_column(&columns, &["Ah[Ah]"]);
        let datetime = find_column(&columns, &["DateTime"]);

        let mut samples = Vec::new();
        for (offset, line) in text.lines().skip(data_start).enumerate() {
            let line_no = data_start + offset + 1;
            if line.trim().is_empty() || line.starts_with('~') {
                continue;
            }
            let parts = Self::split_row(line, columns.len(), datetime);
            if parts.len() != columns.len() {
                return Err(BcaError::Parse {
                    line: line_no,
                    reason: format!("expected {} fields, found {}", columns.len(), parts.len()),
                });
            }
            let record = samples.len();
            let num = |idx: usize, name: &str| -> Result<f64, BcaError> {
                parse_decimal(field(&parts, idx, record, name)?, line_no, name)
            };
            let label = field(&parts, command, record, "Command")?;
            let cmd = Command::from_label(label).ok_or_else(|| BcaError::DataIntegrity {
                index: record,
                reason: format!("record {record}: unknown command '{label}'"),
            })?;
            let mut sample = Sample::new(
                num(time, "Time[h]")?,
                num(voltage, "U[V]")?,
                num(current, "I[A]")?,
                num(state, "State")?.round() as i64,
                cmd,
                num(cycle, "Cyc-Count")?.round() as i64,
            );
            if let Some(idx) = temperature {
                if let Some(token) = parts.get(idx).filter(|t| !t.trim().is_empty()) {
                    sample = sample.with_temperature(parse_decimal(token, line_no, "T1")?);
                }
            }
            if let Some(idx) = charge {
                if let Some(token) = parts.get(idx).filter(|t| !t.trim().is_empty()) {
                    sample = sample.with_charge_ah(parse_decimal(token, line_no, "Ah[Ah]")?);
                }
            }
            samples.push(sample);
        }

        debug!(
            "basytec: {} header entries, {} columns, {} samples",
            entries.len(),
            columns.len(),
            samples.len()
        );
        Ok(ParsedFile {
            adapter: self.name().to_string(),
            metadata: FileMetadata::from_entries(entries),
            samples,
        })
    }
}

/// BioLogic BT-Lab text exports: `Nb header lines : N` preamble, tab separated,
/// comma decimals, currents in mA and charge in mAh.
#[derive(Clone, Copy, Debug, Default)]
pub struct BiologicAdapter;

const BIOLOGIC_CURRENT_EPS_A: f64 = 1e-9;

impl BiologicAdapter {
    fn header_lines(lines: &[&str]) -> Option<usize> {
        let declared = lines.iter().take(10).find_map(|l| {
            l.contains("Nb header lines")
                .then(|| l.split_once(':'))
                .flatten()
                .and_then(|(_, n)| n.trim().parse::<usize>().ok())
        });
        declared.filter(|n| *n > 0).or_else(|| {
            lines
                .iter()
                .position(|l| l.contains("Ecell/V") || l.contains("Ewe/V"))
                .map(|i| i + 1)
        })
    }

    /// `ox/red` is 1 while oxidizing (charge) and 0 while reducing (discharge).
    fn command_for(ox_red: Option<f64>, current_a: f64) -> Command {
        if current_a.abs() <= BIOLOGIC_CURRENT_EPS_A {
            return Command::Pause;
        }
        match ox_red.map(|v| v.round() as i64) {
            Some(1) => Command::Charge,
            Some(0) => Command::Discharge,
            _ if current_a > 0.0 => Command::Charge,
            _ => Command::Discharge,
        }
    }
}

impl DeviceAdapter for BiologicAdapter {
    fn name(&self) -> &'static str {
        "biologic"
    }

    fn sniff(&self, text: &str) -> bool {
        let head = text.get(..500).unwrap_or(text);
        head.contains("BT-Lab ASCII FILE")
            || head.contains("EC-Lab ASCII FILE")
            || head.contains("Nb header lines")
    }

    fn parse(&self, text: &str) -> Result<ParsedFile, BcaError> {
        let lines: Vec<&str> = text.lines().collect();
        let header_lines = Self::header_lines(&lines)
            .filter(|n| *n <= lines.len())
            .ok_or_else(|| BcaError::Parse {
                line: 1,
                reason: "no BT-Lab column header found".into(),
            })?;

        let mut entries = BTreeMap::new();
        for line in &lines[..header_lines - 1] {
            if line.starts_with('\t') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let columns: Vec<String> = lines[header_lines - 1]
            .split('\t')
            .map(|c| c.trim().to_string())
            .collect();
        let time = require_column(&columns, &["time/s"], header_lines)?;
        let voltage = require_column(&columns, &["Ewe/V", "Ecell/V"], header_lines)?;
        let current = require_column(&columns, &["I/mA", "<I>/mA"], header_lines)?;
        let cycle = require_column(&columns, &["cycle number"], header_lines)?;
        let ox_red = find_column(&columns, &["ox/red"]);
        let charge = find_column(&columns, &["(Q-Qo)/mA.h", "Capacity/mA.h"]);
        let temperature = columns.iter().position(|c| c.starts_with("Temperature/"));

        let mut samples = Vec::new();
        for (offset, line) in lines[header_lines..].iter().enumerate() {
            let line_no = header_lines + offset + 1;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
            let record = samples.len();
            let num = |idx: usize, name: &str| -> Result<f64, BcaError> {
                parse_decimal(field(&parts, idx, record, name)?, line_no, name)
            };
            let optional = |idx: Option<usize>, name: &str| -> Result<Option<f64>, BcaError> {
                match idx.and_then(|i| parts.get(i)).filter(|t| !t.trim().is_empty()) {
                    Some(token) => parse_decimal(token, line_no, name).map(Some),
                    None => Ok(None),
                }
            };
            let current_a = num(current, "I/mA")? / 1000.0;
            let command = Self::command_for(optional(ox_red, "ox/red")?, current_a);
            let mut sample = Sample::new(
                num(time, "time/s")? / 3600.0,
                num(voltage, "Ewe/V")?,
                current_a,
                0,
                command,
                num(cycle, "cycle number")?.round() as i64,
            );
            if let Some(q) = optional(charge, "Q/mA.h")? {
                sample = sample.with_charge_ah(q / 1000.0);
            }
            if let Some(t) = optional(temperature, "Temperature")? {
                sample = sample.with_temperature(t);
            }
            samples.push(sample);
        }

        debug!(
            "biologic: {} header lines, {} columns, {} samples",
            header_lines,
            columns.len(),
            samples.len()
        );
        Ok(ParsedFile {
            adapter: self.name().to_string(),
            metadata: FileMetadata::from_entries(entries),
            samples,
        })
    }
}

/// Normalized CSV with one column per [`Sample`] field.
#[derive(Clone, Copy, Debug, Default)]
pub struct CsvAdapter;

#[derive(Debug, Deserialize)]
struct CsvRecord {
    time_h: Option<f64>,
    voltage_v: Option<f64>,
    current_a: Option<f64>,
    state_code: Option<i64>,
    command: Option<String>,
    cycle_index: Option<i64>,
    #[serde(default)]
    temperature_c: Option<f64>,
    #[serde(default)]
    charge_ah: Option<f64>,
}

const CSV_COLUMNS: [&str; 6] = [
    "time_h",
    "voltage_v",
    "current_a",
    "state_code",
    "command",
    "cycle_index",
];

fn required<T>(value: Option<T>, record: usize, name: &str) -> Result<T, BcaError> {
    value.ok_or_else(|| BcaError::DataIntegrity {
        index: record,
        reason: format!("record {record}: missing {name}"),
    })
}

impl DeviceAdapter for CsvAdapter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn sniff(&self, text: &str) -> bool {
        text.lines()
            .find(|l| !l.trim().is_empty())
            .is_some_and(|l| l.contains(',') && l.contains("time_h") && l.contains("current_a"))
    }

    fn parse(&self, text: &str) -> Result<ParsedFile, BcaError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader.headers().map_err(|e| BcaError::Parse {
            line: 1,
            reason: e.to_string(),
        })?;
        if let Some(name) = CSV_COLUMNS.iter().find(|c| !headers.iter().any(|h| h == **c)) {
            return Err(BcaError::Parse {
                line: 1,
                reason: format!("missing required column '{name}'"),
            });
        }
        let mut samples = Vec::new();
        for (record, row) in reader.deserialize::<CsvRecord>().enumerate() {
            let row = row.map_err(|e| BcaError::Parse {
                line: e.position().map_or(0, |p| p.line() as usize),
                reason: e.to_string(),
            })?;
            let label = required(row.command, record, "command")?;
            let command = Command::from_label(&label).ok_or_else(|| BcaError::DataIntegrity {
                index: record,
                reason: format!("record {record}: unknown command '{label}'"),
            })?;
            let mut sample = Sample::new(
                required(row.time_h, record, "time_h")?,
                required(row.voltage_v, record, "voltage_v")?,
                required(row.current_a, record, "current_a")?,
                required(row.state_code, record, "state_code")?,
                command,
                required(row.cycle_index, record, "cycle_index")?,
            );
            sample.temperature_c = row.temperature_c;
            sample.charge_ah = row.charge_ah;
            samples.push(sample);
        }
        Ok(ParsedFile {
            adapter: self.name().to_string(),
            metadata: FileMetadata::default(),
            samples,
        })
    }
}

fn adapter_for_hint(hint: &str) -> Option<&'static dyn DeviceAdapter> {
    match hint.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
        "csv" => Some(&CsvAdapter),
        "basytec" => Some(&BasytecAdapter),
        "biologic" | "bt-lab" | "mpt" => Some(&BiologicAdapter),
        _ => None,
    }
}

/// Parse `text` with the adapter named by `format_hint`, or the first adapter whose
/// sniff test accepts it. Hints such as `txt` that name no device fall back to sniffing.
pub fn parse_samples(text: &str, format_hint: Option<&str>) -> Result<ParsedFile, BcaError> {
    let adapters: [&dyn DeviceAdapter; 3] = [&BasytecAdapter, &BiologicAdapter, &CsvAdapter];
    let adapter = match format_hint.and_then(adapter_for_hint) {
        Some(adapter) => adapter,
        None => adapters
            .into_iter()
            .find(|a| a.sniff(text))
            .ok_or_else(|| {
                BcaError::UnsupportedFormat(match format_hint {
                    Some(hint) => format!("no adapter recognizes this '{hint}' input"),
                    None => "no adapter recognizes this input".to_string(),
                })
            })?,
    };
    let parsed = adapter.parse(text)?;
    info!(
        "Parsed {} samples with the {} adapter",
        parsed.samples.len(),
        parsed.adapter
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASYTEC: &str = "~Name of Test: NMC half cell 01
~Battery: coin cell
~Start of Test: 03.02.2024 10:15:00
~End of Test: 10.02.2024 08:00:12
~Testchannel: CTS-07
~Testplan: formation_3x.pln
~
~Time[h]\tDateTime\tCommand\tU[V]\tI[A]\tAh[Ah]\tState\tCyc-Count\tT1[°C]
0,0000\t03.02.2024 10:15:00\tPause\t3,0012\t0,0000\t0,0000\t0\t1\t25,1
0,1000\t03.02.2024 10:21:00\tCharge\t3,4501\t0,0010\t0,0001\t1\t1\t25,2
0,2000\t03.02.2024 10:27:00\tCharge\t4,2000\t0,0010\t0,0002\t2\t1\t25,3
0,3000\t03.02.2024 10:33:00\tDischarge\t3,9000\t-0,0010\t0,0001\t1\t1\t25,2
";

    #[test]
    fn test_basytec_metadata_and_rows() {
        let parsed = BasytecAdapter.parse(BASYTEC).unwrap();
        let meta = &parsed.metadata;
        assert_eq!(meta.test_name.as_deref(), Some("NMC half cell 01"));
        assert_eq!(meta.battery_name.as_deref(), Some("coin cell"));
        assert_eq!(meta.test_channel.as_deref(), Some("CTS-07"));
        assert_eq!(
            meta.test_start.map(|t| t.to_string()).as_deref(),
            Some("2024-02-03 10:15:00")
        );
        assert!(meta.test_end.is_some());
        assert_eq!(parsed.samples.len(), 4);
        let s = &parsed.samples[2];
        assert_eq!(s.command, Command::Charge);
        assert_eq!(s.state_code, 2);
        assert!((s.voltage_v - 4.2).abs() < 1e-12);
        assert_eq!(s.temperature_c, Some(25.3));
        assert_eq!(s.charge_ah, Some(0.0002));
        assert!((parsed.samples[3].current_a + 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_basytec_space_separated_datetime() {
        let text = "~Time[h] DateTime Command U[V] I[A] State Cyc\n\
                    0,5 03.02.2024 10:15:00 Charge 3,7 0,5 1 4\n";
        let parsed = BasytecAdapter.parse(text).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].cycle_index, 4);
        assert!((parsed.samples[0].time_h - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_basytec_missing_column_and_value() {
        let no_state = "~Time[h]\tCommand\tU[V]\tI[A]\tCyc\n0\tCharge\t3,7\t1\t1\n";
        assert!(matches!(
            BasytecAdapter.parse(no_state),
            Err(BcaError::Parse { line: 1, .. })
        ));
        let blank_voltage = "~Time[h]\tCommand\tU[V]\tI[A]\tState\tCyc\n\
                             0\tCharge\t3,7\t1\t0\t1\n\
                             0,1\tCharge\t \t1\t0\t1\n";
        assert!(matches!(
            BasytecAdapter.parse(blank_voltage),
            Err(BcaError::DataIntegrity { index: 1, .. })
        ));
        let unknown = "~Time[h]\tCommand\tU[V]\tI[A]\tState\tCyc\n0\tCalibrate\t3,7\t1\t0\t1\n";
        assert!(matches!(
            BasytecAdapter.parse(unknown),
            Err(BcaError::DataIntegrity { index: 0, .. })
        ));
    }

    #[test]
    fn test_csv_adapter() {
        let text = "time_h,voltage_v,current_a,state_code,command,cycle_index,temperature_c\n\
                    0.0,3.0,1.0,0,charge,1,\n\
                    0.5,3.5,1.0,2,charge,1,24.5\n";
        let parsed = parse_samples(text, None).unwrap();
        assert_eq!(parsed.adapter, "csv");
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[0].temperature_c, None);
        assert_eq!(parsed.samples[1].temperature_c, Some(24.5));
        assert_eq!(parsed.samples[1].charge_ah, None);

        let missing = "time_h,voltage_v,current_a,state_code,command,cycle_index\n\
                       0.0,,1.0,0,charge,1\n";
        match CsvAdapter.parse(missing) {
            Err(BcaError::DataIntegrity { index, reason }) => {
                assert_eq!(index, 0);
                assert!(reason.contains("voltage_v"));
            }
            other => panic!("expected data integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_basytec_empty_trailing_field() {
        let text = "~Time[h]\tCommand\tU[V]\tI[A]\tState\tCyc\tT1[\u{b0}C]\r\n\
                    0\tCharge\t3,7\t1\t0\t1\t25,0\r\n\
                    0,1\tCharge\t3,8\t1\t0\t1\t\r\n";
        let parsed = BasytecAdapter.parse(text).unwrap();
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[0].temperature_c, Some(25.0));
        assert_eq!(parsed.samples[1].temperature_c, None);
        assert!((parsed.samples[1].voltage_v - 3.8).abs() < 1e-12);
    }

    #[test]
    fn test_csv_missing_header_is_parse_error() {
        let text = "time_h,voltage_v,current_a,command,cycle_index\n0.0,3.0,1.0,charge,1\n";
        match CsvAdapter.parse(text) {
            Err(BcaError::Parse { line, reason }) => {
                assert_eq!(line, 1);
                assert!(reason.contains("state_code"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
        let header_only = "time_h,current_a,state_code,command,cycle_index\n";
        assert!(matches!(
            CsvAdapter.parse(header_only),
            Err(BcaError::Parse { line: 1, .. })
        ));
        let empty = "";
        assert!(matches!(
            CsvAdapter.parse(empty),
            Err(BcaError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_biologic_adapter() {
        let text = "BT-Lab ASCII FILE\n\
                    Nb header lines : 4\n\
                    Acquisition started on : 02/03/2024 10:15:00\n\
                    time/s\tEcell/V\t<I>/mA\tcycle number\tox/red\t(Q-Qo)/mA.h\n\
                    0\t3,0\t0\t1\t0\t0\n\
                    360\t3,5\t1,5\t1\t1\t0,15\n\
                    720\t3,9\t-1,5\t1\t0\t0,0\n";
        let parsed = parse_samples(text, Some("txt")).unwrap();
        assert_eq!(parsed.adapter, "biologic");
        let commands: Vec<Command> = parsed.samples.iter().map(|s| s.command).collect();
        assert_eq!(commands, vec![Command::Pause, Command::Charge, Command::Discharge]);
        assert!((parsed.samples[1].time_h - 0.1).abs() < 1e-12);
        assert!((parsed.samples[1].current_a - 0.0015).abs() < 1e-12);
        assert!((parsed.samples[1].charge_ah.unwrap() - 0.00015).abs() < 1e-15);
        assert!(parsed.metadata.test_start.is_some());
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            parse_samples("hello world", None),
            Err(BcaError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            parse_samples("hello world", Some("xlsx")),
            Err(BcaError::UnsupportedFormat(_))
        ));
    }
}
