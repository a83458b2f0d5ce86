//! CSV export of the electric meter's sampled power-flow history.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema v1 column header for meter telemetry export.
pub const METER_SCHEMA_V1_HEADER: &str =
    "time,consumption_w,production_w,net_w,energy_consumed_wh";

/// One sampled row of the electric meter's power balance.
#[derive(Clone, Debug, PartialEq)]
pub struct MeterRow {
    /// Simulated instant of the sample, in the scenario's time unit.
    pub time: f64,
    /// Total household consumption in watts.
    pub consumption_w: f64,
    /// Local production in watts.
    pub production_w: f64,
    /// Net draw from the grid in watts (consumption minus production).
    pub net_w: f64,
    /// Cumulative consumed energy in watt-hours.
    pub energy_consumed_wh: f64,
}

/// Shared row buffer the meter model appends to during a run.
///
/// The buffer lives outside the model tree so the runner can read it after
/// the simulation ends; the mutex makes it safe to fill from a real-time
/// engine thread.
pub type TelemetryLog = Arc<Mutex<Vec<MeterRow>>>;

/// Creates an empty shared telemetry buffer.
pub fn telemetry_log() -> TelemetryLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Writes meter rows as CSV to any writer.
///
/// Writes a header row followed by one data row per sample using the schema
/// v1 column layout. Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns a `csv::Error` if writing fails.
pub fn write_csv(rows: &[MeterRow], writer: impl Write) -> csv::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(METER_SCHEMA_V1_HEADER.split(','))?;
    for row in rows {
        wtr.write_record(&[
            format!("{:.3}", row.time),
            format!("{:.3}", row.consumption_w),
            format!("{:.3}", row.production_w),
            format!("{:.3}", row.net_w),
            format!("{:.3}", row.energy_consumed_wh),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Exports meter rows to a CSV file at the given path.
///
/// # Errors
///
/// Returns a `csv::Error` if file creation or writing fails.
pub fn export_csv(rows: &[MeterRow], path: &Path) -> csv::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(rows, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(t: f64) -> MeterRow {
        MeterRow {
            time: t,
            consumption_w: 150.0,
            production_w: 40.0,
            net_w: 110.0,
            energy_consumed_wh: 2.5 * t,
        }
    }

    #[test]
    fn csv_has_schema_v1_header_and_one_row_per_sample() {
        let rows: Vec<MeterRow> = (0..24).map(|t| row(t as f64)).collect();
        let mut out = Vec::new();
        write_csv(&rows, &mut out).expect("csv export should succeed");

        let csv = String::from_utf8(out).expect("csv output should be valid UTF-8");
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(METER_SCHEMA_V1_HEADER));
        assert_eq!(lines.count(), 24);
    }

    #[test]
    fn csv_export_is_deterministic() {
        let rows: Vec<MeterRow> = (0..5).map(|t| row(t as f64)).collect();
        let mut out_a = Vec::new();
        let mut out_b = Vec::new();
        write_csv(&rows, &mut out_a).expect("first export should succeed");
        write_csv(&rows, &mut out_b).expect("second export should succeed");
        assert_eq!(out_a, out_b);
    }
}
