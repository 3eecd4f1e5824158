// ========================================================================================
//
//                          Reference index builder (offline batch job)
//
// ========================================================================================
//
// Consumes a VCF-like reference-variant feed and, optionally, a JSON-lines merge-history
// feed. Emits three position-sorted, tab-separated stores:
//
//   pos→id     chrom  pos  id  ref  alt
//   id→pos     synth_chrom  synth_pos  id  chrom  pos  ref  alt
//   merged     synth_chrom  synth_pos  obsolete_id  current_id
//
// Multi-allelic rows are decomposed into one row per alternate allele. Malformed lines
// are warnings, never fatal. The variant stores are sorted externally so a full release
// never has to fit in memory.

use super::synthetic::SyntheticCoordinate;
use crate::config::ReferenceConfig;
use crate::shared::files::{FileError, open_text_source};
use crate::shared::tools::{IndexFlavor, IndexSpec, ToolError, compress_and_index};
use ahash::{AHashMap, AHashSet};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

/// Lines held in memory per sorted run before spilling to disk.
const DEFAULT_RUN_CAPACITY: usize = 2_000_000;
/// Malformed lines reported individually before the log goes quiet.
const MALFORMED_WARN_LIMIT: usize = 20;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ========================================================================================
//                                   Contig naming
// ========================================================================================

/// Maps feed contig names to the chromosome labels `1..22`, `X`, `Y`.
#[derive(Debug, Clone, Default)]
pub struct ContigMap {
    aliases: AHashMap<String, String>,
}

impl ContigMap {
    pub fn with_aliases<'a>(aliases: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut map = AHashMap::new();
        for (contig, label) in aliases {
            match standard_label(label) {
                Some(standard) => {
                    map.insert(contig.clone(), standard);
                }
                None => warn!("Ignoring contig alias {contig} → {label}: not one of 1..22, X, Y."),
            }
        }
        Self { aliases: map }
    }

    /// The chromosome label and its numeric code (X = 23, Y = 24), or `None` for contigs
    /// outside the standard set.
    pub fn resolve(&self, contig: &str) -> Option<(String, u8)> {
        let label = match self.aliases.get(contig) {
            Some(label) => label.clone(),
            None => standard_label(contig).or_else(|| refseq_label(contig))?,
        };
        let code = label_code(&label)?;
        Some((label, code))
    }
}

fn label_for_code(code: u64) -> Option<String> {
    match code {
        1..=22 => Some(code.to_string()),
        23 => Some("X".to_string()),
        24 => Some("Y".to_string()),
        _ => None,
    }
}

fn label_code(label: &str) -> Option<u8> {
    match label {
        "X" => Some(23),
        "Y" => Some(24),
        _ => label.parse::<u8>().ok().filter(|c| (1..=22).contains(c)),
    }
}

/// `1..22`, `X`, `Y`, optionally `chr`-prefixed, and the numeric aliases 23/24.
fn standard_label(contig: &str) -> Option<String> {
    let mut name = contig.trim();
    if name.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("chr")) {
        name = &name[3..];
    }
    if name.eq_ignore_ascii_case("X") {
        return Some("X".to_string());
    }
    if name.eq_ignore_ascii_case("Y") {
        return Some("Y".to_string());
    }
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    label_for_code(name.parse::<u64>().ok()?)
}

/// RefSeq chromosome accessions, `NC_0000NN.v`.
fn refseq_label(contig: &str) -> Option<String> {
    let rest = contig.strip_prefix("NC_")?;
    let number = rest.split('.').next()?;
    if number.len() != 6 || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    label_for_code(number.parse::<u64>().ok()?)
}

// ========================================================================================
//                                    Feed parsing
// ========================================================================================

/// One decomposed reference variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRecord {
    pub chrom: String,
    pub chrom_code: u8,
    pub pos: u64,
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLine {
    Header,
    /// A contig outside the 1..22/X/Y set.
    OffTarget,
    Records(Vec<ReferenceRecord>),
    Malformed(String),
}

/// Parses one feed line (`CHROM POS ID REF ALT ...`), decomposing a comma-separated ALT.
pub fn parse_feed_line(line: &str, contigs: &ContigMap) -> FeedLine {
    if line.is_empty() || line.starts_with('#') {
        return FeedLine::Header;
    }
    let mut fields = line.split('\t');
    let (Some(contig), Some(pos), Some(id), Some(ref_allele), Some(alts)) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return FeedLine::Malformed("fewer than 5 tab-separated columns".to_string());
    };

    let Some((chrom, chrom_code)) = contigs.resolve(contig) else {
        return FeedLine::OffTarget;
    };
    let pos = match lexical_core::parse::<u64>(pos.as_bytes()) {
        Ok(p) if p > 0 => p,
        _ => return FeedLine::Malformed(format!("invalid position '{pos}'")),
    };
    if id.is_empty() || ref_allele.is_empty() || alts.is_empty() {
        return FeedLine::Malformed("empty ID, REF or ALT".to_string());
    }

    let records = alts
        .split(',')
        .filter(|alt| !alt.is_empty())
        .map(|alt| ReferenceRecord {
            chrom: chrom.clone(),
            chrom_code,
            pos,
            id: id.to_string(),
            ref_allele: ref_allele.to_string(),
            alt_allele: alt.to_string(),
        })
        .collect();
    FeedLine::Records(records)
}

// ========================================================================================
//                                Merge-history feed
// ========================================================================================

#[derive(Debug, Deserialize)]
struct MergeRecordJson {
    refsnp_id: String,
    #[serde(default)]
    merged_snapshot_data: Option<MergedSnapshotJson>,
    #[serde(default)]
    dbsnp1_merges: Vec<Dbsnp1MergeJson>,
}

#[derive(Debug, Deserialize)]
struct MergedSnapshotJson {
    #[serde(default)]
    merged_into: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Dbsnp1MergeJson {
    merged_rsid: String,
}

/// Numeric id of `rs123` or `123`.
fn numeric_id(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let digits = match trimmed.get(..2) {
        Some(p) if p.eq_ignore_ascii_case("rs") => &trimmed[2..],
        _ => trimmed,
    };
    SyntheticCoordinate::from_numeric_suffix(digits).map(|c| c.pos)
}

/// Parses one JSON line into `(obsolete, current)` hops. A line without `merged_into`
/// yields no hops.
pub fn parse_merge_line(line: &str) -> Result<Vec<(u64, u64)>, serde_json::Error> {
    let record: MergeRecordJson = serde_json::from_str(line)?;
    let Some(current) = record
        .merged_snapshot_data
        .as_ref()
        .and_then(|s| s.merged_into.first())
        .and_then(|id| numeric_id(id))
    else {
        return Ok(Vec::new());
    };

    let mut hops = Vec::with_capacity(1 + record.dbsnp1_merges.len());
    if let Some(obsolete) = numeric_id(&record.refsnp_id) {
        hops.push((obsolete, current));
    }
    for merge in &record.dbsnp1_merges {
        if let Some(obsolete) = numeric_id(&merge.merged_rsid) {
            hops.push((obsolete, current));
        }
    }
    Ok(hops)
}

/// Follows every obsolete id to its final destination. Cycles stop at the last id
/// before the repeat. Output is sorted by the obsolete id's synthetic coordinate.
pub fn resolve_merge_chains(hops: &AHashMap<u64, u64>) -> Vec<(u64, u64)> {
    let mut resolved = Vec::with_capacity(hops.len());
    let mut visited = AHashSet::new();
    for (&obsolete, &first) in hops {
        visited.clear();
        visited.insert(obsolete);
        visited.insert(first);
        let mut current = first;
        while let Some(&next) = hops.get(&current) {
            if !visited.insert(next) {
                break;
            }
            current = next;
        }
        if current != obsolete {
            resolved.push((obsolete, current));
        }
    }
    resolved.sort_unstable_by_key(|&(obsolete, _)| (leading_digit(obsolete), obsolete));
    resolved
}

/// Synthetic chromosome of a numeric id: its first decimal digit.
fn leading_digit(mut id: u64) -> u8 {
    while id >= 10 {
        id /= 10;
    }
    id as u8
}

// ========================================================================================
//                                  External sorting
// ========================================================================================

/// Sort key of one output line: (chromosome code, coordinate, insertion sequence).
/// The sequence number keeps the sort stable across runs.
type SortKey = (u8, u64, u64);

struct HeapItem {
    key: SortKey,
    line: String,
    run_idx: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on the key.
        other.key.cmp(&self.key)
    }
}

/// Collects keyed lines, spilling sorted runs to a scratch directory, and writes them
/// back in key order through a k-way merge.
struct ExternalSorter {
    scratch: TempDir,
    capacity: usize,
    buffer: Vec<(SortKey, String)>,
    runs: Vec<PathBuf>,
    next_seq: u64,
    max_coordinate: u64,
}

impl ExternalSorter {
    fn new(scratch_parent: &Path, capacity: usize) -> Result<Self, BuildError> {
        let scratch = tempfile::tempdir_in(scratch_parent).map_err(io_error(scratch_parent))?;
        Ok(Self {
            scratch,
            capacity: capacity.max(1),
            buffer: Vec::new(),
            runs: Vec::new(),
            next_seq: 0,
            max_coordinate: 0,
        })
    }

    fn push(&mut self, chrom: u8, coordinate: u64, line: String) -> Result<(), BuildError> {
        self.buffer.push(((chrom, coordinate, self.next_seq), line));
        self.next_seq += 1;
        self.max_coordinate = self.max_coordinate.max(coordinate);
        if self.buffer.len() >= self.capacity {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), BuildError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable_by_key(|(key, _)| *key);
        let path = self.scratch.path().join(format!("run_{}.txt", self.runs.len()));
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        for ((chrom, coord, seq), line) in self.buffer.drain(..) {
            writeln!(writer, "{chrom}\t{coord}\t{seq}\t{line}").map_err(io_error(&path))?;
        }
        writer.flush().map_err(io_error(&path))?;
        debug!("Spilled sorted run {}", path.display());
        self.runs.push(path);
        Ok(())
    }

    /// Writes every line in key order. Returns (lines written, largest coordinate).
    fn finish<W: Write>(mut self, writer: &mut W, out_path: &Path) -> Result<(u64, u64), BuildError> {
        let mut written = 0u64;
        if self.runs.is_empty() {
            self.buffer.sort_unstable_by_key(|(key, _)| *key);
            for (_, line) in &self.buffer {
                writeln!(writer, "{line}").map_err(io_error(out_path))?;
                written += 1;
            }
            return Ok((written, self.max_coordinate));
        }

        self.spill()?;
        let mut readers = Vec::with_capacity(self.runs.len());
        for path in &self.runs {
            let file = File::open(path).map_err(io_error(path))?;
            readers.push(BufReader::new(file));
        }

        let mut heap = BinaryHeap::with_capacity(readers.len());
        for run_idx in 0..readers.len() {
            if let Some(item) = read_run_line(&mut readers[run_idx], run_idx, &self.runs[run_idx])? {
                heap.push(item);
            }
        }
        while let Some(item) = heap.pop() {
            writeln!(writer, "{}", item.line).map_err(io_error(out_path))?;
            written += 1;
            let run_idx = item.run_idx;
            if let Some(next) = read_run_line(&mut readers[run_idx], run_idx, &self.runs[run_idx])? {
                heap.push(next);
            }
        }
        Ok((written, self.max_coordinate))
    }
}

fn read_run_line(
    reader: &mut BufReader<File>,
    run_idx: usize,
    path: &Path,
) -> Result<Option<HeapItem>, BuildError> {
    let mut raw = String::new();
    if reader.read_line(&mut raw).map_err(io_error(path))? == 0 {
        return Ok(None);
    }
    let raw = raw.trim_end_matches(['\n', '\r']);
    let mut parts = raw.splitn(4, '\t');
    let corrupt = || BuildError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, "corrupt sorted run"),
    };
    let chrom = parts.next().and_then(|v| v.parse::<u8>().ok()).ok_or_else(corrupt)?;
    let coord = parts.next().and_then(|v| v.parse::<u64>().ok()).ok_or_else(corrupt)?;
    let seq = parts.next().and_then(|v| v.parse::<u64>().ok()).ok_or_else(corrupt)?;
    let line = parts.next().ok_or_else(corrupt)?.to_string();
    Ok(Some(HeapItem {
        key: (chrom, coord, seq),
        line,
        run_idx,
    }))
}

// ========================================================================================
//                                   Build driver
// ========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub feed_lines: u64,
    pub malformed_lines: u64,
    pub off_target_lines: u64,
    pub records: u64,
    /// Records whose identifier has no synthetic coordinate and so are absent from id→pos.
    pub unkeyed_identifiers: u64,
    pub merge_lines: u64,
    pub malformed_merge_lines: u64,
    pub merged_identifiers: u64,
}

/// Where the builder put each store. Paths point at the compressed files when
/// compression was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutputs {
    pub pos_to_id: PathBuf,
    pub id_to_pos: PathBuf,
    pub merged: Option<PathBuf>,
    pub stats: BuildStats,
}

pub struct ReferenceBuilder<'a> {
    config: &'a ReferenceConfig,
    contigs: ContigMap,
    run_capacity: usize,
}

fn create_spinner(message: &str) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) = ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {pos} lines {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb
}

impl<'a> ReferenceBuilder<'a> {
    pub fn new(config: &'a ReferenceConfig) -> Self {
        Self {
            config,
            contigs: ContigMap::with_aliases(&config.contig_aliases),
            run_capacity: DEFAULT_RUN_CAPACITY,
        }
    }

    /// Overrides how many lines are sorted in memory before spilling a run.
    pub fn with_run_capacity(mut self, capacity: usize) -> Self {
        self.run_capacity = capacity;
        self
    }

    fn output_path(&self, stem: &str) -> PathBuf {
        self.config
            .out_dir
            .join(format!("{stem}_{}.txt", self.config.release))
    }

    pub fn build(&self, feed: &Path, merges: Option<&Path>) -> Result<BuildOutputs, BuildError> {
        let out_dir = &self.config.out_dir;
        std::fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;
        let mut stats = BuildStats::default();

        let mut by_position = ExternalSorter::new(out_dir, self.run_capacity)?;
        let mut by_identifier = ExternalSorter::new(out_dir, self.run_capacity)?;

        info!("Reading reference feed {}", feed.display());
        let pb = create_spinner("reading reference feed");
        let mut source = open_text_source(feed)?;
        while let Some(line) = source.next_line()? {
            stats.feed_lines += 1;
            if stats.feed_lines % 100_000 == 0 {
                pb.set_position(stats.feed_lines);
            }
            match parse_feed_line(line, &self.contigs) {
                FeedLine::Header => {}
                FeedLine::OffTarget => stats.off_target_lines += 1,
                FeedLine::Malformed(reason) => {
                    stats.malformed_lines += 1;
                    if stats.malformed_lines <= MALFORMED_WARN_LIMIT as u64 {
                        warn!(
                            "Skipping malformed line {} of {}: {reason}",
                            stats.feed_lines,
                            source.path_display()
                        );
                    }
                }
                FeedLine::Records(records) => {
                    for record in records {
                        stats.records += 1;
                        by_position.push(
                            record.chrom_code,
                            record.pos,
                            format!(
                                "{}\t{}\t{}\t{}\t{}",
                                record.chrom,
                                record.pos,
                                record.id,
                                record.ref_allele,
                                record.alt_allele
                            ),
                        )?;
                        match SyntheticCoordinate::from_identifier(&record.id) {
                            Some(coord) => by_identifier.push(
                                coord.chrom,
                                coord.pos,
                                format!(
                                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                                    coord.chrom,
                                    coord.pos,
                                    record.id,
                                    record.chrom,
                                    record.pos,
                                    record.ref_allele,
                                    record.alt_allele
                                ),
                            )?,
                            None => stats.unkeyed_identifiers += 1,
                        }
                    }
                }
            }
        }
        pb.finish_and_clear();
        if stats.malformed_lines > MALFORMED_WARN_LIMIT as u64 {
            warn!(
                "{} malformed feed lines were skipped in total.",
                stats.malformed_lines
            );
        }
        info!(
            "Feed: {} lines, {} records, {} off-target, {} malformed.",
            stats.feed_lines, stats.records, stats.off_target_lines, stats.malformed_lines
        );

        let pos_to_id = self.write_store("pos2id", by_position)?;
        let id_to_pos = self.write_store("id2pos", by_identifier)?;
        let merged = match merges {
            Some(path) => Some(self.build_merged(path, &mut stats)?),
            None => None,
        };

        Ok(BuildOutputs {
            pos_to_id,
            id_to_pos,
            merged,
            stats,
        })
    }

    fn write_store(&self, stem: &str, sorter: ExternalSorter) -> Result<PathBuf, BuildError> {
        let path = self.output_path(stem);
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        let (written, max_coordinate) = sorter.finish(&mut writer, &path)?;
        writer.flush().map_err(io_error(&path))?;
        drop(writer);
        info!("Wrote {written} rows to {}", path.display());
        self.finalize(&path, max_coordinate)
    }

    fn finalize(&self, path: &Path, max_coordinate: u64) -> Result<PathBuf, BuildError> {
        if !self.config.compress {
            return Ok(path.to_path_buf());
        }
        let spec = IndexSpec::point(0, IndexFlavor::for_max_coordinate(max_coordinate));
        Ok(compress_and_index(path, &spec)?)
    }

    fn build_merged(&self, merges: &Path, stats: &mut BuildStats) -> Result<PathBuf, BuildError> {
        info!("Reading merge history {}", merges.display());
        let mut hops: AHashMap<u64, u64> = AHashMap::new();
        let mut source = open_text_source(merges)?;
        while let Some(line) = source.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            stats.merge_lines += 1;
            match parse_merge_line(line) {
                Ok(pairs) => {
                    for (obsolete, current) in pairs {
                        hops.entry(obsolete).or_insert(current);
                    }
                }
                Err(e) => {
                    stats.malformed_merge_lines += 1;
                    if stats.malformed_merge_lines <= MALFORMED_WARN_LIMIT as u64 {
                        warn!(
                            "Skipping malformed merge line {}: {e}",
                            stats.merge_lines
                        );
                    }
                }
            }
        }

        let resolved = resolve_merge_chains(&hops);
        stats.merged_identifiers = resolved.len() as u64;

        let path = self.output_path("merged");
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        let mut max_coordinate = 0u64;
        for (obsolete, current) in &resolved {
            let chrom = leading_digit(*obsolete);
            max_coordinate = max_coordinate.max(*obsolete);
            writeln!(writer, "{chrom}\t{obsolete}\trs{obsolete}\trs{current}")
                .map_err(io_error(&path))?;
        }
        writer.flush().map_err(io_error(&path))?;
        drop(writer);
        info!(
            "Wrote {} merged identifiers to {}",
            resolved.len(),
            path.display()
        );
        self.finalize(&path, max_coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    #[test]
    fn contigs_map_to_standard_labels() {
        let contigs = ContigMap::default();
        assert_eq!(contigs.resolve("1"), Some(("1".to_string(), 1)));
        assert_eq!(contigs.resolve("chr22"), Some(("22".to_string(), 22)));
        assert_eq!(contigs.resolve("chrx"), Some(("X".to_string(), 23)));
        assert_eq!(contigs.resolve("NC_000023.11"), Some(("X".to_string(), 23)));
        assert_eq!(contigs.resolve("NC_000024.10"), Some(("Y".to_string(), 24)));
        assert_eq!(contigs.resolve("NC_000007.14"), Some(("7".to_string(), 7)));
        assert_eq!(contigs.resolve("NC_012920.1"), None);
        assert_eq!(contigs.resolve("NT_187361.1"), None);
        assert_eq!(contigs.resolve("MT"), None);
        assert_eq!(contigs.resolve("25"), None);
    }

    #[test]
    fn configured_aliases_take_precedence() {
        let mut aliases = BTreeMap::new();
        aliases.insert("CM000663.2".to_string(), "1".to_string());
        aliases.insert("bogus".to_string(), "MT".to_string());
        let contigs = ContigMap::with_aliases(&aliases);
        assert_eq!(contigs.resolve("CM000663.2"), Some(("1".to_string(), 1)));
        assert_eq!(contigs.resolve("bogus"), None);
    }

    #[test]
    fn multi_allelic_rows_are_decomposed() {
        let line = "NC_000001.11\t10019\trs775809821\tTA\tT,TAA\t.\t.\tRS=775809821";
        match parse_feed_line(line, &ContigMap::default()) {
            FeedLine::Records(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0].alt_allele, "T");
                assert_eq!(records[1].alt_allele, "TAA");
                assert!(records.iter().all(|r| r.chrom == "1" && r.pos == 10019));
            }
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[test]
    fn malformed_and_off_target_lines_are_classified() {
        let contigs = ContigMap::default();
        assert_eq!(parse_feed_line("##fileformat=VCFv4.2", &contigs), FeedLine::Header);
        assert_eq!(
            parse_feed_line("NC_012920.1\t5\trs1\tA\tG", &contigs),
            FeedLine::OffTarget
        );
        assert!(matches!(
            parse_feed_line("1\tabc\trs1\tA\tG", &contigs),
            FeedLine::Malformed(_)
        ));
        assert!(matches!(
            parse_feed_line("1\t100\trs1", &contigs),
            FeedLine::Malformed(_)
        ));
    }

    #[test]
    fn merge_lines_yield_hops_to_the_current_identifier() {
        let line = r#"{"refsnp_id":"1234","merged_snapshot_data":{"merged_into":["5678"]},"dbsnp1_merges":[{"merged_rsid":"99"},{"merged_rsid":"4"}]}"#;
        let hops = parse_merge_line(line).unwrap();
        // "4" has a single-digit suffix and is not a well-formed identifier.
        assert_eq!(hops, vec![(1234, 5678), (99, 5678)]);
        assert!(parse_merge_line(r#"{"refsnp_id":"12","merged_snapshot_data":{"merged_into":[]}}"#)
            .unwrap()
            .is_empty());
        assert!(parse_merge_line("not json").is_err());
    }

    #[test]
    fn merge_chains_resolve_to_final_destination() {
        let mut hops = AHashMap::new();
        hops.insert(11, 22);
        hops.insert(22, 33);
        hops.insert(33, 44);
        hops.insert(70, 80);
        hops.insert(80, 70);
        let resolved: AHashMap<u64, u64> = resolve_merge_chains(&hops).into_iter().collect();
        assert_eq!(resolved[&11], 44);
        assert_eq!(resolved[&22], 44);
        assert_eq!(resolved[&33], 44);
        assert_eq!(resolved[&70], 80);
        assert_eq!(resolved[&80], 70);
    }

    #[test]
    fn builder_writes_sorted_stores_across_spilled_runs() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("feed.vcf");
        fs::write(
            &feed,
            "##fileformat=VCFv4.2\n\
             #CHROM\tPOS\tID\tREF\tALT\n\
             NC_000002.12\t500\trs30\tA\tG\n\
             NC_000001.11\t200\trs21\tC\tT,A\n\
             NC_000001.11\t100\trs555\tG\tA\n\
             NC_012920.1\t10\trs77\tA\tG\n\
             NC_000001.11\tbroken\n\
             NC_000023.11\t50\tss1\tA\tC\n",
        )
        .unwrap();
        let merges = dir.path().join("merged.json");
        fs::write(
            &merges,
            "{\"refsnp_id\":\"40\",\"merged_snapshot_data\":{\"merged_into\":[\"30\"]},\"dbsnp1_merges\":[]}\n\
             {\"refsnp_id\":\"50\",\"merged_snapshot_data\":{\"merged_into\":[\"40\"]},\"dbsnp1_merges\":[]}\n",
        )
        .unwrap();

        let config = ReferenceConfig {
            release: "test".to_string(),
            out_dir: dir.path().join("out"),
            compress: false,
            ..ReferenceConfig::default()
        };
        let outputs = ReferenceBuilder::new(&config)
            .with_run_capacity(2)
            .build(&feed, Some(&merges))
            .unwrap();

        assert_eq!(outputs.stats.records, 5);
        assert_eq!(outputs.stats.malformed_lines, 1);
        assert_eq!(outputs.stats.off_target_lines, 1);
        assert_eq!(outputs.stats.unkeyed_identifiers, 1);

        let pos2id = fs::read_to_string(&outputs.pos_to_id).unwrap();
        assert_eq!(
            pos2id.lines().collect::<Vec<_>>(),
            vec![
                "1\t100\trs555\tG\tA",
                "1\t200\trs21\tC\tT",
                "1\t200\trs21\tC\tA",
                "2\t500\trs30\tA\tG",
                "X\t50\tss1\tA\tC",
            ]
        );

        let id2pos = fs::read_to_string(&outputs.id_to_pos).unwrap();
        assert_eq!(
            id2pos.lines().collect::<Vec<_>>(),
            vec![
                "2\t21\trs21\t1\t200\tC\tT",
                "2\t21\trs21\t1\t200\tC\tA",
                "3\t30\trs30\t2\t500\tA\tG",
                "5\t555\trs555\t1\t100\tG\tA",
            ]
        );

        let merged = fs::read_to_string(outputs.merged.unwrap()).unwrap();
        assert_eq!(
            merged.lines().collect::<Vec<_>>(),
            vec!["4\t40\trs40\trs30", "5\t50\trs50\trs30"]
        );
    }
}
