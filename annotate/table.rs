//! Streamed tab-separated variant tables: read in bounded chunks, written chunk by chunk.

use super::AnnotateError;
use crate::shared::files::{TextSource, open_text_source};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Names of the columns the annotation algorithms read and fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantColumns {
    pub chrom: String,
    pub pos: String,
    pub rsid: String,
    pub ea: String,
    pub nea: String,
}

impl Default for VariantColumns {
    fn default() -> Self {
        Self {
            chrom: "CHR".to_string(),
            pos: "BP".to_string(),
            rsid: "rsID".to_string(),
            ea: "EA".to_string(),
            nea: "NEA".to_string(),
        }
    }
}

/// Indices of the variant columns within the (possibly extended) header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub chrom: usize,
    pub pos: usize,
    pub rsid: usize,
    pub ea: usize,
    pub nea: usize,
}

pub struct ChunkedTableReader {
    source: Box<dyn TextSource>,
    header: Vec<String>,
    /// Header columns present in the input, before missing variant columns were added.
    input_width: usize,
    columns: ResolvedColumns,
    chunk_rows: usize,
}

impl ChunkedTableReader {
    /// Reads the header. Variant columns absent from it are appended, so every row can
    /// be filled in place.
    pub fn open(
        path: &Path,
        names: &VariantColumns,
        chunk_rows: usize,
    ) -> Result<Self, AnnotateError> {
        let mut source = open_text_source(path)?;
        let mut header: Vec<String> = match source.next_line()? {
            Some(line) => line.split('\t').map(str::to_string).collect(),
            None => {
                return Err(AnnotateError::EmptyInput {
                    path: path.to_path_buf(),
                });
            }
        };
        let input_width = header.len();
        let mut resolve = |name: &str| match header.iter().position(|h| h == name) {
            Some(idx) => idx,
            None => {
                header.push(name.to_string());
                header.len() - 1
            }
        };
        let columns = ResolvedColumns {
            chrom: resolve(&names.chrom),
            pos: resolve(&names.pos),
            rsid: resolve(&names.rsid),
            ea: resolve(&names.ea),
            nea: resolve(&names.nea),
        };
        Ok(Self {
            source,
            header,
            input_width,
            columns,
            chunk_rows: chunk_rows.max(1),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn columns(&self) -> ResolvedColumns {
        self.columns
    }

    /// Whether the input itself carried column `idx` (rather than it being appended).
    pub fn has_input_column(&self, idx: usize) -> bool {
        idx < self.input_width
    }

    /// The next chunk of at most `chunk_rows` rows, each padded to the header width.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<Vec<String>>>, AnnotateError> {
        let width = self.header.len();
        let mut rows = Vec::with_capacity(self.chunk_rows.min(1 << 16));
        while rows.len() < self.chunk_rows {
            let Some(line) = self.source.next_line()? else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            let mut row: Vec<String> = line.split('\t').map(str::to_string).collect();
            row.resize(width.max(row.len()), String::new());
            rows.push(row);
        }
        Ok(if rows.is_empty() { None } else { Some(rows) })
    }
}

/// Writes the header once, then appends rows chunk by chunk. Each chunk is flushed
/// before the next is processed, so an aborted run leaves a prefix of whole rows.
pub struct TableWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TableWriter {
    pub fn create(path: &Path, header: &[String]) -> Result<Self, AnnotateError> {
        let write_error = |source| AnnotateError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_error)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", header.join("\t")).map_err(write_error)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn write_rows(&mut self, rows: &[Vec<String>]) -> Result<(), AnnotateError> {
        let write_error = |source| AnnotateError::Write {
            path: self.path.clone(),
            source,
        };
        for row in rows {
            writeln!(self.writer, "{}", row.join("\t")).map_err(write_error)?;
        }
        self.writer.flush().map_err(write_error)
    }
}
