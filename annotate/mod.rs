// ========================================================================================
//
//                 Annotation engine: chunked joins against reference stores
//
// ========================================================================================
//
// Every algorithm here follows the same shape. Rows of one input chunk are keyed by a
// (chromosome label, coordinate) pair, grouped by label in first-seen order and sorted
// by coordinate. A fixed-width window grid anchored at the smallest coordinate is laid
// over each group; every non-empty window costs exactly one range query, empty windows
// cost none. Output rows follow that window order, with rows that could not be keyed
// appended at the end of the chunk.

pub mod identifier;
pub mod position;
pub mod table;

use crate::config::AnnotateConfig;
use crate::reference::store::{RangeQuery, StoreError, StoreRow};
use crate::shared::files::FileError;
use ahash::AHashMap;
use itertools::Itertools;
use log::{debug, info, warn};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use table::{ChunkedTableReader, ResolvedColumns, TableWriter, VariantColumns};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Reference store failed on the first query; check the store path and its index: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} has no header line")]
    EmptyInput { path: PathBuf },
    #[error("Input {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },
}

/// Which annotation to run over a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationMode {
    /// Position → identifier, against the pos→id store.
    AssignIdentifier,
    /// Identifier → position and alleles, against the id→pos store.
    AssignCoordinates,
    /// Obsolete identifier → current identifier, against the merged store.
    UpdateMerged,
}

/// Counters accumulated over a whole annotation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub input_rows: usize,
    pub output_rows: usize,
    pub queries: usize,
    pub failed_queries: usize,
    /// Rows that received (or confirmed) a value from the reference.
    pub annotated: usize,
    /// Keyed rows with no reference match.
    pub unmatched: usize,
    /// Rows the algorithm could not key at all (missing or malformed input fields).
    pub unkeyed: usize,
    /// Rows whose supplied values disagree with the reference.
    pub mismatches: usize,
    /// Rows dropped because they still lack coordinates or alleles.
    pub removed: usize,
}

// ========================================================================================
//                                   Windowing
// ========================================================================================

/// One range query's worth of input: the half-open coordinate window and the slice of
/// the sorted group it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: u64,
    pub members: Range<usize>,
}

/// Lays a grid of `width`-wide windows anchored at the first (smallest) coordinate over
/// ascending `positions` and returns only the windows that contain at least one
/// position. The largest coordinate is always covered.
pub fn plan_windows(positions: &[u64], width: u64) -> Vec<Window> {
    let width = width.max(1);
    let Some(&anchor) = positions.first() else {
        return Vec::new();
    };
    let mut windows = Vec::new();
    let mut i = 0;
    while i < positions.len() {
        let k = (positions[i] - anchor) / width;
        let start = anchor + k * width;
        let (end, j) = match start.checked_add(width) {
            Some(end) => (end, i + positions[i..].partition_point(|&p| p < end)),
            // The grid runs past the coordinate space; one window takes the rest.
            None => (u64::MAX, positions.len()),
        };
        windows.push(Window {
            start,
            end,
            members: i..j,
        });
        i = j;
    }
    windows
}

/// An input row keyed for a windowed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedRow<K> {
    pub row: usize,
    pub chrom: String,
    pub coordinate: u64,
    pub key: K,
}

/// Tracks queries against one store over a run. A failure on the very first query is
/// fatal; later failures leave their window unannotated and are counted.
pub struct QuerySession<'s> {
    store: &'s dyn RangeQuery,
    queries: usize,
    failures: usize,
}

impl<'s> QuerySession<'s> {
    pub fn new(store: &'s dyn RangeQuery) -> Self {
        Self {
            store,
            queries: 0,
            failures: 0,
        }
    }

    pub fn query(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
    ) -> Result<Option<Vec<StoreRow>>, AnnotateError> {
        self.queries += 1;
        match self.store.query(chrom, start, end) {
            Ok(rows) => Ok(Some(rows)),
            Err(e) if self.queries == 1 => Err(AnnotateError::Store(e)),
            Err(e) => {
                self.failures += 1;
                warn!("Skipping window {chrom}:{start}-{end}: {e}");
                Ok(None)
            }
        }
    }

    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn failures(&self) -> usize {
        self.failures
    }
}

/// Groups keyed rows by chromosome label (first-seen order), sorts each group by
/// coordinate, and runs one query per non-empty window. `visit` receives the window's
/// rows and the store's answer; windows whose query failed are not visited. Returns the
/// row indices in output order.
pub fn for_each_window<K>(
    keyed: Vec<KeyedRow<K>>,
    width: u64,
    session: &mut QuerySession<'_>,
    mut visit: impl FnMut(&[KeyedRow<K>], &[StoreRow]),
) -> Result<Vec<usize>, AnnotateError> {
    let mut order = Vec::with_capacity(keyed.len());
    let mut slots: AHashMap<String, usize> = AHashMap::new();
    let mut groups: Vec<Vec<KeyedRow<K>>> = Vec::new();
    for row in keyed {
        let slot = *slots.entry(row.chrom.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }

    for group in groups {
        let group: Vec<KeyedRow<K>> = group
            .into_iter()
            .sorted_by_key(|r| r.coordinate)
            .collect();
        let positions: Vec<u64> = group.iter().map(|r| r.coordinate).collect();
        for window in plan_windows(&positions, width) {
            let members = &group[window.members.clone()];
            let chrom = &members[0].chrom;
            debug!(
                "Querying {chrom}:{}-{} for {} rows.",
                window.start,
                window.end,
                members.len()
            );
            if let Some(reference) = session.query(chrom, window.start, window.end)? {
                visit(members, &reference);
            }
            order.extend(members.iter().map(|r| r.row));
        }
    }
    Ok(order)
}

/// Rebuilds a chunk in window order followed by the unkeyed rows, dropping any row for
/// which `keep` returns false.
pub(crate) fn assemble_chunk(
    rows: Vec<Vec<String>>,
    order: &[usize],
    unkeyed: &[usize],
    mut keep: impl FnMut(&[String]) -> bool,
) -> (Vec<Vec<String>>, usize) {
    let mut slots: Vec<Option<Vec<String>>> = rows.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    let mut removed = 0;
    for &idx in order.iter().chain(unkeyed) {
        if let Some(row) = slots[idx].take() {
            if keep(&row) {
                out.push(row);
            } else {
                removed += 1;
            }
        }
    }
    (out, removed)
}

// ========================================================================================
//                                    File driver
// ========================================================================================

fn require_column(
    reader: &ChunkedTableReader,
    idx: usize,
    name: &str,
    path: &Path,
) -> Result<(), AnnotateError> {
    if reader.has_input_column(idx) {
        Ok(())
    } else {
        Err(AnnotateError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
    }
}

/// Annotates `input` chunk by chunk against `store`, appending each finished chunk to
/// `output`.
pub fn annotate_file(
    mode: AnnotationMode,
    input: &Path,
    output: &Path,
    store: &dyn RangeQuery,
    names: &VariantColumns,
    config: &AnnotateConfig,
) -> Result<AnnotationStats, AnnotateError> {
    let mut reader = ChunkedTableReader::open(input, names, config.read_chunk_rows)?;
    let cols: ResolvedColumns = reader.columns();
    match mode {
        AnnotationMode::AssignIdentifier => {
            require_column(&reader, cols.chrom, &names.chrom, input)?;
            require_column(&reader, cols.pos, &names.pos, input)?;
            require_column(&reader, cols.ea, &names.ea, input)?;
            require_column(&reader, cols.nea, &names.nea, input)?;
        }
        AnnotationMode::AssignCoordinates | AnnotationMode::UpdateMerged => {
            require_column(&reader, cols.rsid, &names.rsid, input)?;
        }
    }

    let mut writer = TableWriter::create(output, reader.header())?;
    let mut session = QuerySession::new(store);
    let mut stats = AnnotationStats::default();
    let mut chunk_no = 0usize;

    while let Some(rows) = reader.next_chunk()? {
        chunk_no += 1;
        stats.input_rows += rows.len();
        let out = match mode {
            AnnotationMode::AssignIdentifier => position::assign_identifier(
                rows,
                &cols,
                &mut session,
                config,
                &mut stats,
            )?,
            AnnotationMode::AssignCoordinates => identifier::assign_coordinates(
                rows,
                &cols,
                &mut session,
                config,
                &mut stats,
            )?,
            AnnotationMode::UpdateMerged => {
                identifier::update_merged(rows, &cols, &mut session, config, &mut stats)?
            }
        };
        stats.output_rows += out.len();
        writer.write_rows(&out)?;
        info!(
            "Processed chunk No.{chunk_no}: {} rows written, {} queries so far.",
            out.len(),
            session.queries()
        );
    }

    stats.queries = session.queries();
    stats.failed_queries = session.failures();
    if stats.mismatches > 0 {
        warn!(
            "{} rows disagree with the reference.",
            stats.mismatches
        );
    }
    if stats.failed_queries > 0 {
        warn!(
            "{} of {} range queries failed; their rows were left unannotated.",
            stats.failed_queries, stats.queries
        );
    }
    info!(
        "Annotated {} of {} rows ({} unmatched, {} unkeyed, {} removed).",
        stats.annotated, stats.input_rows, stats.unmatched, stats.unkeyed, stats.removed
    );
    Ok(stats)
}
