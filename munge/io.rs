// ========================================================================================
//
//                     Summary-statistics table loading and saving
//
// ========================================================================================

use crate::config::MungeConfig;
use crate::identity::{normalize_allele, parse_chromosome, parse_float, parse_position};
use crate::shared::files::{FileError, has_gzip_suffix, open_reader, open_text_source};
use crate::shared::tools::{IndexFlavor, IndexSpec, ToolError, compress_and_index};
use crate::types::{Field, RawTable, SumstatRow, SumstatTable};
use log::info;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

// ========================================================================================
//                                   Error type
// ========================================================================================

#[derive(Debug)]
pub enum TableError {
    File(FileError),
    /// The input contained no header line.
    Empty { path: PathBuf },
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    Write {
        path: PathBuf,
        source: io::Error,
    },
    /// A canonical table that does not conform to the canonical schema.
    Parse {
        path: PathBuf,
        line_number: usize,
        line_content: String,
        details: String,
    },
    Tool(ToolError),
}

impl Display for TableError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            TableError::File(e) => write!(f, "{e}"),
            TableError::Empty { path } => {
                write!(f, "{} contains no header line.", path.display())
            }
            TableError::Csv { path, source } => {
                write!(f, "Malformed delimited text in {}: {source}", path.display())
            }
            TableError::Write { path, source } => {
                write!(f, "Could not write {}: {source}", path.display())
            }
            TableError::Parse {
                path,
                line_number,
                line_content,
                details,
            } => {
                writeln!(f, "Invalid canonical table.")?;
                writeln!(f, "File:         {}", path.display())?;
                writeln!(f, "Line Number:  {line_number}")?;
                writeln!(f, "Line Content: \"{}\"", line_content.trim())?;
                write!(f, "Details:      {details}")
            }
            TableError::Tool(e) => write!(f, "{e}"),
        }
    }
}

impl Error for TableError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TableError::File(e) => Some(e),
            TableError::Csv { source, .. } => Some(source),
            TableError::Write { source, .. } => Some(source),
            TableError::Tool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for TableError {
    fn from(e: FileError) -> Self {
        TableError::File(e)
    }
}

impl From<ToolError> for TableError {
    fn from(e: ToolError) -> Self {
        TableError::Tool(e)
    }
}

// ========================================================================================
//                                  Raw input
// ========================================================================================

/// How to read a raw summary-statistics file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub separator: Option<char>,
    pub skip_rows: usize,
    pub comment: Option<char>,
    pub gzipped: Option<bool>,
    /// Stop after this many data rows.
    pub nrows: Option<usize>,
}

impl From<&MungeConfig> for LoadOptions {
    fn from(config: &MungeConfig) -> Self {
        Self {
            separator: config.separator,
            skip_rows: config.skip_rows,
            comment: config.comment,
            gzipped: config.gzipped,
            nrows: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Byte(u8),
    Whitespace,
}

/// Tab wins over comma; a header containing neither is split on runs of whitespace.
fn detect_separator(header: &str) -> Separator {
    if header.contains('\t') {
        Separator::Byte(b'\t')
    } else if header.contains(',') {
        Separator::Byte(b',')
    } else {
        Separator::Whitespace
    }
}

fn separator_from_char(c: char) -> Separator {
    if c.is_whitespace() && c != '\t' {
        Separator::Whitespace
    } else if c.is_ascii() {
        Separator::Byte(c as u8)
    } else {
        Separator::Whitespace
    }
}

fn split_header(line: &str, separator: Separator) -> Vec<String> {
    match separator {
        Separator::Whitespace => line.split_whitespace().map(str::to_string).collect(),
        Separator::Byte(b) => line
            .split(b as char)
            .map(|cell| cell.trim().trim_matches('"').to_string())
            .collect(),
    }
}

/// Reads a raw delimited table. Leading rows are skipped, comment lines ignored, and the
/// first remaining line is the header.
pub fn load_sumstats(path: &Path, options: &LoadOptions) -> Result<RawTable, TableError> {
    let mut reader = open_reader(path, options.gzipped)?;
    let read_error = |source: io::Error| {
        TableError::File(FileError::Read {
            path: path.display().to_string(),
            source,
        })
    };

    let mut line = String::new();
    let mut skipped = 0usize;
    let header_line = loop {
        line.clear();
        if reader.read_line(&mut line).map_err(read_error)? == 0 {
            return Err(TableError::Empty {
                path: path.to_path_buf(),
            });
        }
        if skipped < options.skip_rows {
            skipped += 1;
            continue;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            continue;
        }
        if options.comment.is_some_and(|c| trimmed.starts_with(c)) {
            continue;
        }
        break trimmed.to_string();
    };

    let separator = options
        .separator
        .map(separator_from_char)
        .unwrap_or_else(|| detect_separator(&header_line));
    let header = split_header(&header_line, separator);
    let limit = options.nrows.unwrap_or(usize::MAX);

    let rows = match separator {
        Separator::Whitespace => {
            let mut rows = Vec::new();
            while rows.len() < limit {
                line.clear();
                if reader.read_line(&mut line).map_err(read_error)? == 0 {
                    break;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() || options.comment.is_some_and(|c| trimmed.starts_with(c))
                {
                    continue;
                }
                rows.push(trimmed.split_whitespace().map(str::to_string).collect());
            }
            rows
        }
        Separator::Byte(delimiter) => {
            let mut builder = csv::ReaderBuilder::new();
            builder
                .delimiter(delimiter)
                .has_headers(false)
                .flexible(true)
                .trim(csv::Trim::All);
            if let Some(c) = options.comment.filter(char::is_ascii) {
                builder.comment(Some(c as u8));
            }
            let mut csv_reader = builder.from_reader(reader);
            let mut rows = Vec::new();
            for record in csv_reader.records() {
                if rows.len() >= limit {
                    break;
                }
                let record = record.map_err(|source| TableError::Csv {
                    path: path.to_path_buf(),
                    source,
                })?;
                if record.iter().all(str::is_empty) {
                    continue;
                }
                rows.push(record.iter().map(str::to_string).collect());
            }
            rows
        }
    };

    info!(
        "Loaded {} rows and {} columns from {}",
        rows.len(),
        header.len(),
        path.display()
    );
    Ok(RawTable { header, rows })
}

// ========================================================================================
//                               Canonical output
// ========================================================================================

fn push_float(line: &mut String, buffer: &mut ryu::Buffer, value: Option<f64>) {
    if let Some(v) = value {
        line.push_str(buffer.format(v));
    }
}

/// Renders one row in canonical column order. Missing values are empty fields.
pub fn format_row(row: &SumstatRow, buffer: &mut ryu::Buffer, line: &mut String) {
    line.clear();
    line.push_str(&row.chrom.to_string());
    line.push('\t');
    line.push_str(&row.pos.to_string());
    line.push('\t');
    line.push_str(row.rsid.as_deref().unwrap_or(""));
    line.push('\t');
    line.push_str(&row.ea);
    line.push('\t');
    line.push_str(&row.nea);
    for value in [row.eaf, row.maf, row.beta, row.se, row.p] {
        line.push('\t');
        push_float(line, buffer, value);
    }
}

pub fn canonical_header() -> String {
    Field::OUTPUT
        .iter()
        .map(|field| field.label())
        .collect::<Vec<_>>()
        .join("\t")
}

/// Writes the header and every row, in the table's current order.
pub fn write_canonical<W: Write>(table: &SumstatTable, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "{}", canonical_header())?;
    let mut buffer = ryu::Buffer::new();
    let mut line = String::with_capacity(128);
    for row in &table.rows {
        format_row(row, &mut buffer, &mut line);
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

/// Options for persisting a canonical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Block-compress the TSV and build a range index next to it.
    pub build_index: bool,
}

/// Sorts by (chromosome, position), writes the TSV and optionally compresses and indexes
/// it. Returns the path of the final artifact. A `.gz` suffix on `path` is stripped for
/// the intermediate plain-text file.
pub fn save_sumstats(
    table: &mut SumstatTable,
    path: &Path,
    options: SaveOptions,
) -> Result<PathBuf, TableError> {
    table.sort_by_position();
    let plain = if has_gzip_suffix(path) {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };

    let write_error = |source: io::Error| TableError::Write {
        path: plain.clone(),
        source,
    };
    let file = File::create(&plain).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    write_canonical(table, &mut writer).map_err(write_error)?;
    writer.flush().map_err(write_error)?;
    drop(writer);
    info!("Wrote {} rows to {}", table.len(), plain.display());

    if !options.build_index {
        return Ok(plain);
    }
    // Canonical positions are below 3e8, well inside what TBI addresses.
    let spec = IndexSpec::point(1, IndexFlavor::Tbi);
    Ok(compress_and_index(&plain, &spec)?)
}

/// Reads a canonical table back, failing on the first row that violates the schema.
pub fn read_canonical(path: &Path) -> Result<SumstatTable, TableError> {
    let mut source = open_text_source(path)?;
    let header: Vec<String> = match source.next_line()? {
        Some(line) => line.split('\t').map(str::to_string).collect(),
        None => {
            return Err(TableError::Empty {
                path: path.to_path_buf(),
            });
        }
    };
    let column = |field: Field| header.iter().position(|h| h == field.label());
    let columns: Vec<Option<usize>> = Field::OUTPUT.iter().map(|f| column(*f)).collect();
    for (field, idx) in Field::OUTPUT.iter().zip(&columns) {
        if Field::REQUIRED.contains(field) && idx.is_none() {
            return Err(TableError::Parse {
                path: path.to_path_buf(),
                line_number: 1,
                line_content: header.join("\t"),
                details: format!("Required column '{field}' is missing from the header."),
            });
        }
    }

    let mut rows = Vec::new();
    let mut line_number = 1usize;
    while let Some(line) = source.next_line()? {
        line_number += 1;
        if line.is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        let cell = |slot: usize| columns[slot].and_then(|idx| cells.get(idx).copied());
        let parse_error = |details: String| TableError::Parse {
            path: path.to_path_buf(),
            line_number,
            line_content: line.to_string(),
            details,
        };

        let chrom = cell(0)
            .and_then(parse_chromosome)
            .ok_or_else(|| parse_error("CHR is missing or out of range.".to_string()))?;
        let pos = cell(1)
            .and_then(parse_position)
            .ok_or_else(|| parse_error("BP is missing or out of range.".to_string()))?;
        let ea = cell(3)
            .and_then(normalize_allele)
            .ok_or_else(|| parse_error("EA is not a run of A/C/G/T.".to_string()))?;
        let nea = cell(4)
            .and_then(normalize_allele)
            .ok_or_else(|| parse_error("NEA is not a run of A/C/G/T.".to_string()))?;

        let mut row = SumstatRow::new(chrom, pos, &ea, &nea);
        row.rsid = cell(2)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        row.eaf = cell(5).and_then(parse_float);
        row.maf = cell(6).and_then(parse_float);
        row.beta = cell(7).and_then(parse_float);
        row.se = cell(8).and_then(parse_float);
        row.p = cell(9).and_then(parse_float);
        rows.push(row);
    }
    Ok(SumstatTable::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn separator_detection_prefers_tab_then_comma() {
        assert_eq!(detect_separator("a\tb,c"), Separator::Byte(b'\t'));
        assert_eq!(detect_separator("a,b"), Separator::Byte(b','));
        assert_eq!(detect_separator("a  b"), Separator::Whitespace);
    }

    #[test]
    fn loads_comma_separated_input_with_comments_and_skipped_rows() {
        let file = write_temp("generated by tool\n#note\nSNP,CHR,BP\nrs1,1,100\n\nrs2,2,200\n");
        let options = LoadOptions {
            skip_rows: 1,
            comment: Some('#'),
            ..LoadOptions::default()
        };
        let table = load_sumstats(file.path(), &options).unwrap();
        assert_eq!(table.header, vec!["SNP", "CHR", "BP"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["rs2", "2", "200"]);
    }

    #[test]
    fn loads_whitespace_separated_input_and_honors_nrows() {
        let file = write_temp("CHR  BP   P\n1 10 0.1\n1   20 0.2\n1 30 0.3\n");
        let options = LoadOptions {
            nrows: Some(2),
            ..LoadOptions::default()
        };
        let table = load_sumstats(file.path(), &options).unwrap();
        assert_eq!(table.header, vec!["CHR", "BP", "P"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["1", "20", "0.2"]);
    }

    #[test]
    fn empty_input_is_an_error() {
        let file = write_temp("");
        assert!(matches!(
            load_sumstats(file.path(), &LoadOptions::default()),
            Err(TableError::Empty { .. })
        ));
    }

    #[test]
    fn canonical_rows_render_missing_values_as_empty_fields() {
        let mut row = SumstatRow::new(7, 100, "A", "G");
        row.p = Some(0.01);
        row.beta = Some(0.5);
        let mut buffer = ryu::Buffer::new();
        let mut line = String::new();
        format_row(&row, &mut buffer, &mut line);
        assert_eq!(line, "7\t100\t\tA\tG\t\t\t0.5\t\t0.01");
        assert_eq!(canonical_header(), "CHR\tBP\trsID\tEA\tNEA\tEAF\tMAF\tBETA\tSE\tP");
    }

    #[test]
    fn saved_tables_are_sorted_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv.gz");
        let mut first = SumstatRow::new(2, 50, "C", "T");
        first.rsid = Some("rs9".to_string());
        let mut second = SumstatRow::new(1, 900, "A", "G");
        second.se = Some(0.25);
        let mut table = SumstatTable::new(vec![first, second]);

        let written = save_sumstats(&mut table, &path, SaveOptions { build_index: false }).unwrap();
        assert_eq!(written, dir.path().join("out.tsv"));

        let reread = read_canonical(&written).unwrap();
        assert_eq!(reread.len(), 2);
        assert_eq!(reread.rows[0].chrom, 1);
        assert_eq!(reread.rows[0].se, Some(0.25));
        assert_eq!(reread.rows[1].rsid.as_deref(), Some("rs9"));
    }

    #[test]
    fn reading_a_malformed_canonical_row_reports_the_line() {
        let file = write_temp("CHR\tBP\trsID\tEA\tNEA\tEAF\tMAF\tBETA\tSE\tP\n1\t100\t\tA\tN\t\t\t\t\t\n");
        match read_canonical(file.path()) {
            Err(TableError::Parse { line_number, .. }) => assert_eq!(line_number, 2),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
