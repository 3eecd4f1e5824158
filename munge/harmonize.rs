// ========================================================================================
//
//                Harmonization of two canonical tables on variant identity
//
// ========================================================================================
//
// An inner join on the order-independent identity key. Because the key does not record
// which allele is the effect allele, the second table's effect direction is re-derived
// against the first table's after the join.

use crate::io::TableError;
use crate::types::{SumstatRow, SumstatTable};
use ahash::AHashMap;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Per-study columns carried for each side of the join.
#[derive(Debug, Clone, PartialEq)]
pub struct SideStats {
    pub rsid: Option<String>,
    pub eaf: Option<f64>,
    pub maf: Option<f64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub p: Option<f64>,
}

impl SideStats {
    fn from_row(row: &SumstatRow) -> Self {
        Self {
            rsid: row.rsid.clone(),
            eaf: row.eaf,
            maf: row.maf,
            beta: row.beta,
            se: row.se,
            p: row.p,
        }
    }
}

/// One joined variant. Chromosome, position and alleles come from the first table.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedRow {
    pub chrom: u8,
    pub pos: u32,
    pub ea: String,
    pub nea: String,
    pub key: String,
    pub first: SideStats,
    pub second: SideStats,
    /// The second study reported the opposite allele as its effect allele.
    pub flipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarmonizedTable {
    pub rows: Vec<HarmonizedRow>,
}

impl HarmonizedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Joins `first` and `second` on identity key, in `first`'s row order. A key repeated in
/// `second` yields one output row per match. When the effect alleles differ, the second
/// effect size is negated and its effect-allele frequency mirrored (`1 - eaf`) so both
/// sides describe the first table's effect allele.
pub fn harmonize(first: &SumstatTable, second: &SumstatTable) -> HarmonizedTable {
    let mut by_key: AHashMap<String, Vec<usize>> = AHashMap::with_capacity(second.len());
    for (idx, row) in second.rows.iter().enumerate() {
        by_key.entry(row.identity_key()).or_default().push(idx);
    }

    let mut rows = Vec::new();
    let mut flips = 0usize;
    for row in &first.rows {
        let key = row.identity_key();
        let Some(matches) = by_key.get(&key) else {
            continue;
        };
        for &idx in matches {
            let other = &second.rows[idx];
            let mut stats = SideStats::from_row(other);
            let flipped = other.ea != row.ea;
            if flipped {
                stats.beta = stats.beta.map(|b| -b);
                stats.eaf = stats.eaf.map(|f| 1.0 - f);
                flips += 1;
            }
            rows.push(HarmonizedRow {
                chrom: row.chrom,
                pos: row.pos,
                ea: row.ea.clone(),
                nea: row.nea.clone(),
                key: key.clone(),
                first: SideStats::from_row(row),
                second: stats,
                flipped,
            });
        }
    }

    info!(
        "Harmonized {} of {} / {} variants; {flips} effect directions flipped.",
        rows.len(),
        first.len(),
        second.len()
    );
    HarmonizedTable { rows }
}

const HARMONIZED_HEADER: &str = "CHR\tBP\tEA\tNEA\trsID_1\tEAF_1\tMAF_1\tBETA_1\tSE_1\tP_1\trsID_2\tEAF_2\tMAF_2\tBETA_2\tSE_2\tP_2";

fn push_side(line: &mut String, buffer: &mut ryu::Buffer, side: &SideStats) {
    line.push('\t');
    line.push_str(side.rsid.as_deref().unwrap_or(""));
    for value in [side.eaf, side.maf, side.beta, side.se, side.p] {
        line.push('\t');
        if let Some(v) = value {
            line.push_str(buffer.format(v));
        }
    }
}

pub fn write_harmonized<W: Write>(table: &HarmonizedTable, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "{HARMONIZED_HEADER}")?;
    let mut buffer = ryu::Buffer::new();
    let mut line = String::with_capacity(160);
    for row in &table.rows {
        line.clear();
        line.push_str(&format!("{}\t{}\t{}\t{}", row.chrom, row.pos, row.ea, row.nea));
        push_side(&mut line, &mut buffer, &row.first);
        push_side(&mut line, &mut buffer, &row.second);
        writeln!(writer, "{line}")?;
    }
    Ok(())
}

pub fn save_harmonized(table: &HarmonizedTable, path: &Path) -> Result<(), TableError> {
    let write_error = |source: io::Error| TableError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    write_harmonized(table, &mut writer).map_err(write_error)?;
    writer.flush().map_err(write_error)
}
