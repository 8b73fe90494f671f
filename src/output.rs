use anyhow::{anyhow, Result};
use log::{error, info};
use reaction_common::SweepReport;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes the sweep report as `<base>_report.<ext>` and returns the path.
///
/// `format` is one of "json", "bincode", "messagepack" or "csv"; anything
/// else falls back to JSON.
pub fn save_report(report: &SweepReport, base: &str, format: &str) -> Result<PathBuf> {
    match format {
        "json" => write_json(report, base),
        "bincode" => {
            // Binary format (compact, read back by the visualizer)
            let path = PathBuf::from(format!("{}_report.bin", base));
            let mut file = BufWriter::new(create(&path)?);
            bincode::serialize_into(&mut file, report)
                .map_err(|e| anyhow!("Error serializing report to bincode: {}", e))?;
            file.flush()?;
            info!("Report saved to {} (binary format)", path.display());
            Ok(path)
        }
        "messagepack" => {
            let path = PathBuf::from(format!("{}_report.msgpack", base));
            let mut file = BufWriter::new(create(&path)?);
            rmp_serde::encode::write(&mut file, report)
                .map_err(|e| anyhow!("Error serializing report to MessagePack: {}", e))?;
            file.flush()?;
            info!("Report saved to {} (MessagePack format)", path.display());
            Ok(path)
        }
        "csv" => write_csv(report, base),
        _ => {
            error!("Unknown output format: {}. Using JSON instead.", format);
            write_json(report, base)
        }
    }
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| anyhow!("Error creating report file '{}': {}", path.display(), e))
}

fn write_json(report: &SweepReport, base: &str) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_report.json", base));
    let json_string = serde_json::to_string_pretty(report)
        .map_err(|e| anyhow!("Error serializing report to JSON: {}", e))?;
    let mut file = create(&path)?;
    file.write_all(json_string.as_bytes())
        .map_err(|e| anyhow!("Error writing report JSON to file '{}': {}", path.display(), e))?;
    info!("Report saved to {}", path.display());
    Ok(path)
}

// One row per measurement; the sweep geometry lives in the other formats.
fn write_csv(report: &SweepReport, base: &str) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_measurements.csv", base));
    let mut writer = csv::Writer::from_path(&path)
        .map_err(|e| anyhow!("Error creating CSV file '{}': {}", path.display(), e))?;
    writer.write_record(["run_index", "sweep_index", "repetition", "control_value", "ticks", "elapsed_ms", "arrived"])?;
    for m in &report.measurements {
        writer.write_record(&[
            m.run_index.to_string(),
            m.sweep_index.to_string(),
            m.repetition.to_string(),
            format!("{:.6}", m.control_value),
            m.ticks.to_string(),
            format!("{:.3}", m.elapsed_ms),
            m.arrived.to_string(),
        ])?;
    }
    writer.flush()?;
    info!("Measurements saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaction_common::{load_report, Measurement, UVec2};

    fn report() -> SweepReport {
        SweepReport {
            width: 256,
            height: 256,
            start: UVec2::new(210, 98),
            end: UVec2::new(137, 98),
            measurements: vec![
                Measurement {
                    run_index: 0,
                    sweep_index: 0,
                    repetition: 0,
                    control_value: 0.10613,
                    ticks: 69,
                    elapsed_ms: 12.5,
                    arrived: true,
                },
                Measurement {
                    run_index: 1,
                    sweep_index: 0,
                    repetition: 1,
                    control_value: 0.10613,
                    ticks: 400,
                    elapsed_ms: 80.0,
                    arrived: false,
                },
            ],
            completed: true,
            total_ticks: 600,
        }
    }

    fn base(dir: &tempfile::TempDir) -> String {
        dir.path().join("run").to_string_lossy().into_owned()
    }

    #[test]
    fn saved_reports_load_back() {
        let dir = tempfile::tempdir().unwrap();
        for format in ["json", "bincode", "messagepack"] {
            let path = save_report(&report(), &base(&dir), format).unwrap();
            let loaded = load_report(&path).unwrap();
            assert_eq!(loaded.measurements, report().measurements, "format {}", format);
            assert_eq!(loaded.end, UVec2::new(137, 98));
            assert!(loaded.completed);
        }
    }

    #[test]
    fn unknown_format_falls_back_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_report(&report(), &base(&dir), "yaml").unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));
        assert_eq!(load_report(&path).unwrap().total_ticks, 600);
    }

    #[test]
    fn csv_has_one_row_per_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_report(&report(), &base(&dir), "csv").unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][4], "69");
        assert_eq!(&rows[1][6], "false");
    }
}
