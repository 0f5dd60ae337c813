use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::utils::DynError;

/// One report line: a witness channel whose band maximum cleared the
/// threshold, with the value already rounded to two decimals.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub channel: String,
    pub max_coherence: f64,
}

/// All surviving rows for one start time. A group with no rows still
/// contributes its separator line to the report.
#[derive(Debug, Clone)]
pub struct StartTimeGroup {
    pub start_time: f64,
    pub duration: f64,
    pub rows: Vec<ResultRow>,
}

pub fn report_path(
    output_dir: &Path,
    which_channels: &str,
    fl: f64,
    fh: f64,
    first_start: f64,
) -> PathBuf {
    output_dir.join(format!(
        "max_coherence_values_of_{which_channels}_channels_{fl}Hz-{fh}Hz-{first_start}.txt"
    ))
}

/// Writes the tab-separated report, replacing any previous file. Every group
/// ends with a blank line, the last one included, so reruns with the same
/// inputs produce byte-identical output.
pub fn write_report(path: &Path, groups: &[StartTimeGroup]) -> Result<(), DynError> {
    let file = File::create(path)
        .map_err(|e| format!("Failed to create report {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "Start Time\tDuration\tChannel\tMax Coherence")?;
    for group in groups {
        for row in &group.rows {
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.2}",
                group.start_time, group.duration, row.channel, row.max_coherence
            )?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}
