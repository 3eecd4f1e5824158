use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const READ_BUFFER_CAPACITY: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("Opening {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A trait that abstracts sequential, line-oriented access to text data such as
/// summary-statistics tables and reference feeds, regardless of compression.
pub trait TextSource {
    fn path_display(&self) -> &str;

    /// Returns the next line with its trailing newline removed, or `None` at EOF.
    fn next_line(&mut self) -> Result<Option<&str>, FileError>;
}

/// Returns true if the path carries a gzip-style suffix (`.gz`, `.bgz`).
pub fn has_gzip_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"))
}

/// Opens a buffered reader over a local file, transparently decompressing gzip and
/// BGZF input. When `gzipped` is `None` the decision is made by sniffing the magic
/// bytes, so misnamed files still decode correctly.
pub fn open_reader(path: &Path, gzipped: Option<bool>) -> Result<Box<dyn BufRead>, FileError> {
    let file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buffered = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);

    let is_gzip = match gzipped {
        Some(flag) => flag,
        None => {
            let head = buffered.fill_buf().map_err(|source| FileError::Read {
                path: path.display().to_string(),
                source,
            })?;
            head.starts_with(&GZIP_MAGIC)
        }
    };

    if is_gzip {
        let decoder: Box<dyn Read> = Box::new(MultiGzDecoder::new(buffered));
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_CAPACITY, decoder)))
    } else {
        Ok(Box::new(buffered))
    }
}

pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, FileError> {
    let reader = open_reader(path, None)?;
    Ok(Box::new(LocalTextSource::new(
        path.display().to_string(),
        reader,
    )))
}

struct LocalTextSource {
    reader: Box<dyn BufRead>,
    line: String,
    path_display: String,
}

impl LocalTextSource {
    fn new(path_display: String, reader: Box<dyn BufRead>) -> Self {
        Self {
            reader,
            line: String::with_capacity(1024),
            path_display,
        }
    }
}

impl TextSource for LocalTextSource {
    fn path_display(&self) -> &str {
        &self.path_display
    }

    fn next_line(&mut self) -> Result<Option<&str>, FileError> {
        self.line.clear();
        let bytes_read = self
            .reader
            .read_line(&mut self.line)
            .map_err(|source| FileError::Read {
                path: self.path_display.clone(),
                source,
            })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.ends_with('\n') {
            self.line.pop();
        }
        if self.line.ends_with('\r') {
            self.line.pop();
        }

        Ok(Some(&self.line))
    }
}
