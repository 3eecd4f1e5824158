// ========================================================================================
//
//                          End-to-end munging of one input file
//
// ========================================================================================

use crate::canonicalize::{MungeError, canonicalize};
use crate::columns::ColumnMap;
use crate::config::RunConfig;
use crate::io::{LoadOptions, SaveOptions, load_sumstats, save_sumstats};
use crate::report::RunReport;
use crate::types::{RawTable, SumstatTable};
use log::info;
use std::path::{Path, PathBuf};

/// What a completed munging run produced.
#[derive(Debug, Clone)]
pub struct MungeOutcome {
    /// The final canonical artifact (compressed when an index was built).
    pub output: PathBuf,
    pub report_path: PathBuf,
    pub report: RunReport,
}

/// Maps and canonicalizes an in-memory raw table.
pub fn munge_table(
    raw: &RawTable,
    colmap: &ColumnMap,
    config: &RunConfig,
) -> Result<(SumstatTable, RunReport), MungeError> {
    let mapped = colmap.apply(raw);
    let input_rows = mapped.len();
    let table = canonicalize(mapped)?;
    let report = RunReport::summarize(input_rows, &table, config.munge.significance_threshold);
    Ok((table, report))
}

/// The report sits next to the plain-text output, e.g. `out.tsv.report.json`.
fn report_path_for(output: &Path) -> PathBuf {
    let text = output.to_string_lossy();
    let stem = text.strip_suffix(".gz").unwrap_or(&text);
    PathBuf::from(format!("{stem}.report.json"))
}

/// Loads `input`, applies `colmap`, canonicalizes, saves the canonical table to
/// `output` and writes the run report. Any failure aborts the run; partial files
/// already written are left in place.
pub fn run_munge(
    input: &Path,
    output: &Path,
    colmap: &ColumnMap,
    config: &RunConfig,
) -> Result<MungeOutcome, MungeError> {
    info!("Munging {}", input.display());
    let raw = load_sumstats(input, &LoadOptions::from(&config.munge))?;
    let (mut table, report) = munge_table(&raw, colmap, config)?;

    let written = save_sumstats(
        &mut table,
        output,
        SaveOptions {
            build_index: config.munge.build_index,
        },
    )?;

    let report_path = report_path_for(output);
    report
        .write_json(&report_path)
        .map_err(|source| MungeError::Report {
            path: report_path.clone(),
            source,
        })?;
    info!(
        "{} of {} rows survived; {} significant at p < {}.",
        report.output_rows, report.input_rows, report.significant_rows,
        report.significance_threshold
    );

    Ok(MungeOutcome {
        output: written,
        report_path,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_path_strips_compression_suffix() {
        assert_eq!(
            report_path_for(Path::new("/tmp/out.tsv.gz")),
            PathBuf::from("/tmp/out.tsv.report.json")
        );
        assert_eq!(
            report_path_for(Path::new("out.tsv")),
            PathBuf::from("out.tsv.report.json")
        );
    }
}
