// ========================================================================================
//
//                        Range query client over reference stores
//
// ========================================================================================
//
// A store answers one question: which rows lie on `chrom` with a coordinate in the
// half-open window [start, end)? Rows come back in ascending coordinate order, which is
// the order every "first occurrence wins" rule downstream relies on.

use crate::shared::files::open_text_source;
use crate::shared::tools::run_tool;
use ahash::AHashMap;
use log::debug;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Reference store {path} is unavailable: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },
}

/// One raw tab-separated row of a reference store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub fields: Vec<String>,
}

impl StoreRow {
    pub fn from_line(line: &str) -> Self {
        Self {
            fields: line.split('\t').map(str::to_string).collect(),
        }
    }

    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }

    #[inline]
    pub fn field(&self, idx: usize) -> Option<&str> {
        self.fields.get(idx).map(String::as_str)
    }

    /// The store coordinate, always the second column.
    pub fn coordinate(&self) -> Option<u64> {
        self.field(1)
            .and_then(|v| lexical_core::parse::<u64>(v.as_bytes()).ok())
    }
}

/// `query(chromosome, start, end)` over a position-sorted store.
pub trait RangeQuery {
    /// Rows on `chrom` whose coordinate lies in `[start, end)`, ascending. An empty or
    /// inverted window yields no rows.
    fn query(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<StoreRow>, StoreError>;
}

impl<T: RangeQuery + ?Sized> RangeQuery for &T {
    fn query(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<StoreRow>, StoreError> {
        (**self).query(chrom, start, end)
    }
}

impl<T: RangeQuery + ?Sized> RangeQuery for Box<T> {
    fn query(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<StoreRow>, StoreError> {
        (**self).query(chrom, start, end)
    }
}

fn index_path(path: &Path, extension: &str) -> PathBuf {
    let mut index = path.as_os_str().to_os_string();
    index.push(".");
    index.push(extension);
    PathBuf::from(index)
}

/// Returns the companion `.tbi` or `.csi` index, if present.
pub fn find_index(path: &Path) -> Option<PathBuf> {
    ["tbi", "csi"]
        .iter()
        .map(|ext| index_path(path, ext))
        .find(|candidate| candidate.is_file())
}

// ========================================================================================
//                            Block-compressed, indexed store
// ========================================================================================

/// A bgzip-compressed store queried through the `tabix` executable.
#[derive(Debug, Clone)]
pub struct TabixStore {
    path: PathBuf,
}

impl TabixStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::StoreUnavailable {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        if find_index(path).is_none() {
            return Err(StoreError::StoreUnavailable {
                path: path.to_path_buf(),
                reason: "no .tbi or .csi index next to it".to_string(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeQuery for TabixStore {
    fn query(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<StoreRow>, StoreError> {
        let first = start.max(1);
        if end <= first {
            return Ok(Vec::new());
        }
        // tabix regions are 1-based and inclusive.
        let region = format!("{chrom}:{first}-{}", end - 1);
        debug!("tabix {} {region}", self.path.display());
        let output = run_tool("tabix", [self.path.as_os_str(), OsStr::new(&region)]).map_err(|e| {
            StoreError::StoreUnavailable {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(StoreRow::from_line)
            .filter(|row| row.coordinate().is_some_and(|c| c >= start && c < end))
            .collect())
    }
}

// ========================================================================================
//                                  In-memory store
// ========================================================================================

/// A store held fully in memory, for plain-text stores and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    by_chrom: AHashMap<String, Vec<(u64, StoreRow)>>,
}

impl MemoryStore {
    /// Rows without a numeric coordinate are skipped. Order among equal coordinates
    /// follows input order.
    pub fn from_rows(rows: impl IntoIterator<Item = StoreRow>) -> Self {
        let mut by_chrom: AHashMap<String, Vec<(u64, StoreRow)>> = AHashMap::new();
        for row in rows {
            let (Some(chrom), Some(coord)) = (row.field(0), row.coordinate()) else {
                continue;
            };
            by_chrom
                .entry(chrom.to_string())
                .or_default()
                .push((coord, row));
        }
        for rows in by_chrom.values_mut() {
            rows.sort_by_key(|(coord, _)| *coord);
        }
        Self { by_chrom }
    }

    /// Loads a plain or gzip-compressed store. `#` lines and a non-numeric first line
    /// (a header) are skipped.
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let unavailable = |reason: String| StoreError::StoreUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let mut source = open_text_source(path).map_err(|e| unavailable(e.to_string()))?;
        let mut rows = Vec::new();
        while let Some(line) = source.next_line().map_err(|e| unavailable(e.to_string()))? {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            rows.push(StoreRow::from_line(line));
        }
        let loaded = rows.len();
        let store = Self::from_rows(rows);
        debug!(
            "Loaded {} of {loaded} rows from {} into memory.",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RangeQuery for MemoryStore {
    fn query(&self, chrom: &str, start: u64, end: u64) -> Result<Vec<StoreRow>, StoreError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let Some(rows) = self.by_chrom.get(chrom) else {
            return Ok(Vec::new());
        };
        let lo = rows.partition_point(|(coord, _)| *coord < start);
        let hi = rows.partition_point(|(coord, _)| *coord < end);
        Ok(rows[lo..hi].iter().map(|(_, row)| row.clone()).collect())
    }
}

/// Opens an indexed store through `tabix` when an index is present, otherwise loads the
/// file into memory.
pub fn open_store(path: &Path) -> Result<Box<dyn RangeQuery>, StoreError> {
    if find_index(path).is_some() {
        Ok(Box::new(TabixStore::open(path)?))
    } else {
        Ok(Box::new(MemoryStore::from_path(path)?))
    }
}
