//! Per-run summary of a munging invocation.

use crate::types::SumstatTable;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Expected median of a 1-df chi-squared statistic under the null.
const CHISQ_NULL_MEDIAN: f64 = 0.454936423119572;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub significant_rows: usize,
    pub significance_threshold: f64,
    pub non_null_columns: Vec<String>,
    /// Genomic inflation factor; present only when BETA and SE are available.
    pub lambda_gc: Option<f64>,
}

impl RunReport {
    pub fn summarize(input_rows: usize, table: &SumstatTable, threshold: f64) -> Self {
        Self {
            input_rows,
            output_rows: table.len(),
            significant_rows: significant_rows(table, threshold),
            significance_threshold: threshold,
            non_null_columns: table
                .non_null_columns()
                .iter()
                .map(|field| field.label().to_string())
                .collect(),
            lambda_gc: genomic_inflation(table),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), serde_json::Error> {
        let file = File::create(path).map_err(serde_json::Error::io)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(serde_json::Error::io)
    }
}

/// Rows whose p-value is strictly below `threshold`.
pub fn significant_rows(table: &SumstatTable, threshold: f64) -> usize {
    table
        .rows
        .iter()
        .filter(|row| row.p.is_some_and(|p| p < threshold))
        .count()
}

/// λGC = median((β/se)²) / median of χ²(1). `None` when no row carries both values.
pub fn genomic_inflation(table: &SumstatTable) -> Option<f64> {
    let mut chisq: Vec<f64> = table
        .rows
        .iter()
        .filter_map(|row| match (row.beta, row.se) {
            (Some(beta), Some(se)) if se > 0.0 => Some((beta / se).powi(2)),
            _ => None,
        })
        .collect();
    if chisq.is_empty() {
        return None;
    }
    chisq.sort_by(f64::total_cmp);
    let mid = chisq.len() / 2;
    let median = if chisq.len() % 2 == 0 {
        (chisq[mid - 1] + chisq[mid]) / 2.0
    } else {
        chisq[mid]
    };
    Some(median / CHISQ_NULL_MEDIAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SumstatRow;
    use approx::assert_relative_eq;

    fn row(pos: u32, beta: f64, se: f64, p: f64) -> SumstatRow {
        let mut r = SumstatRow::new(1, pos, "A", "G");
        r.beta = Some(beta);
        r.se = Some(se);
        r.p = Some(p);
        r
    }

    #[test]
    fn counts_rows_below_threshold() {
        let table = SumstatTable::new(vec![
            row(1, 0.1, 0.1, 1e-9),
            row(2, 0.1, 0.1, 5e-8),
            row(3, 0.1, 0.1, 0.2),
        ]);
        assert_eq!(significant_rows(&table, 5e-8), 1);
    }

    #[test]
    fn lambda_uses_even_median_average() {
        // z^2 values: 1, 4, 9, 16 → median 6.5
        let table = SumstatTable::new(vec![
            row(1, 1.0, 1.0, 0.3),
            row(2, 2.0, 1.0, 0.05),
            row(3, -3.0, 1.0, 0.003),
            row(4, 4.0, 1.0, 1e-4),
        ]);
        assert_relative_eq!(
            genomic_inflation(&table).unwrap(),
            6.5 / CHISQ_NULL_MEDIAN,
            max_relative = 1e-12
        );
    }

    #[test]
    fn lambda_is_absent_without_effect_sizes() {
        let table = SumstatTable::new(vec![SumstatRow::new(1, 10, "A", "C")]);
        assert_eq!(genomic_inflation(&table), None);
    }

    #[test]
    fn report_serializes_to_json() {
        let table = SumstatTable::new(vec![row(1, 0.5, 0.1, 1e-10)]);
        let report = RunReport::summarize(3, &table, 5e-8);
        assert_eq!(report.output_rows, 1);
        assert_eq!(report.significant_rows, 1);
        assert_eq!(
            report.non_null_columns,
            vec!["CHR", "BP", "EA", "NEA", "BETA", "SE", "P"]
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["input_rows"], 3);
        assert_eq!(value["output_rows"], 1);
    }
}
