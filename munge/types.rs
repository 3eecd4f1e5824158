// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Smallest valid chromosome code.
pub const CHR_MIN: u8 = 1;
/// Largest valid chromosome code in the canonical schema (X is encoded as 23).
pub const CHR_MAX: u8 = 23;
/// Exclusive upper bound on a valid base-pair position.
pub const BP_MAX: u32 = 300_000_000;

/// A canonical field name that raw columns can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Chr,
    Bp,
    RsId,
    Ea,
    Nea,
    P,
    NegLogP,
    Beta,
    Se,
    Or,
    OrSe,
    Eaf,
    Maf,
    Z,
    N,
    Info,
}

impl Field {
    pub const COUNT: usize = 16;

    pub const ALL: [Field; Field::COUNT] = [
        Field::Chr,
        Field::Bp,
        Field::RsId,
        Field::Ea,
        Field::Nea,
        Field::P,
        Field::NegLogP,
        Field::Beta,
        Field::Se,
        Field::Or,
        Field::OrSe,
        Field::Eaf,
        Field::Maf,
        Field::Z,
        Field::N,
        Field::Info,
    ];

    /// The fixed column order of a canonical table on disk.
    pub const OUTPUT: [Field; 10] = [
        Field::Chr,
        Field::Bp,
        Field::RsId,
        Field::Ea,
        Field::Nea,
        Field::Eaf,
        Field::Maf,
        Field::Beta,
        Field::Se,
        Field::P,
    ];

    /// Fields without which a row has no variant identity.
    pub const REQUIRED: [Field; 4] = [Field::Chr, Field::Bp, Field::Ea, Field::Nea];

    pub fn label(self) -> &'static str {
        match self {
            Field::Chr => "CHR",
            Field::Bp => "BP",
            Field::RsId => "rsID",
            Field::Ea => "EA",
            Field::Nea => "NEA",
            Field::P => "P",
            Field::NegLogP => "NEGLOGP",
            Field::Beta => "BETA",
            Field::Se => "SE",
            Field::Or => "OR",
            Field::OrSe => "ORSE",
            Field::Eaf => "EAF",
            Field::Maf => "MAF",
            Field::Z => "Z",
            Field::N => "N",
            Field::Info => "INFO",
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("'{trimmed}' is not a canonical column name"))
    }
}

/// Renders a chromosome code as the textual label used by the reference stores.
pub fn chromosome_label(chrom: u8) -> String {
    match chrom {
        23 => "X".to_string(),
        24 => "Y".to_string(),
        n => n.to_string(),
    }
}

/// A raw delimited table exactly as read from disk: a header and string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|col| col == name)
    }
}

/// One input row after column mapping: the raw, still-untyped value of every
/// canonical field, `None` where the value is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRecord {
    values: Vec<Option<String>>,
}

impl Default for MappedRecord {
    fn default() -> Self {
        Self {
            values: vec![None; Field::COUNT],
        }
    }
}

impl MappedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from `(field, value)` pairs; missing-value tokens become `None`.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (Field, &'a str)>) -> Self {
        let mut record = Self::new();
        for (field, value) in pairs {
            record.set(field, value);
        }
        record
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    pub fn set(&mut self, field: Field, value: &str) {
        self.values[field.index()] = if crate::identity::is_missing(value) {
            None
        } else {
            Some(value.trim().to_string())
        };
    }
}

/// A column-mapped table, the input of canonicalization. `present` holds the fields
/// with at least one non-missing value; all-missing columns count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedTable {
    pub present: BTreeSet<Field>,
    pub records: Vec<MappedRecord>,
}

impl MappedTable {
    pub fn from_records(records: Vec<MappedRecord>) -> Self {
        let present = Field::ALL
            .iter()
            .copied()
            .filter(|field| records.iter().any(|r| r.get(*field).is_some()))
            .collect();
        Self { present, records }
    }

    #[inline]
    pub fn has(&self, field: Field) -> bool {
        self.present.contains(&field)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A validated row of the canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SumstatRow {
    pub chrom: u8,
    pub pos: u32,
    pub rsid: Option<String>,
    pub ea: String,
    pub nea: String,
    pub eaf: Option<f64>,
    pub maf: Option<f64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub p: Option<f64>,
}

impl SumstatRow {
    pub fn new(chrom: u8, pos: u32, ea: &str, nea: &str) -> Self {
        Self {
            chrom,
            pos,
            rsid: None,
            ea: ea.to_string(),
            nea: nea.to_string(),
            eaf: None,
            maf: None,
            beta: None,
            se: None,
            p: None,
        }
    }

    pub fn identity_key(&self) -> String {
        crate::identity::identity_key(self.chrom, self.pos, &self.ea, &self.nea)
    }

    /// Whether the given output column holds a value in this row.
    pub fn has_value(&self, field: Field) -> bool {
        match field {
            Field::Chr | Field::Bp | Field::Ea | Field::Nea => true,
            Field::RsId => self.rsid.is_some(),
            Field::Eaf => self.eaf.is_some(),
            Field::Maf => self.maf.is_some(),
            Field::Beta => self.beta.is_some(),
            Field::Se => self.se.is_some(),
            Field::P => self.p.is_some(),
            _ => false,
        }
    }
}

/// The canonical table: validated rows ordered by (chromosome, position).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SumstatTable {
    pub rows: Vec<SumstatRow>,
}

impl SumstatTable {
    pub fn new(rows: Vec<SumstatRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stable sort by (chromosome, position).
    pub fn sort_by_position(&mut self) {
        self.rows.sort_by_key(|row| (row.chrom, row.pos));
    }

    /// Output columns that hold at least one value.
    pub fn non_null_columns(&self) -> Vec<Field> {
        Field::OUTPUT
            .iter()
            .copied()
            .filter(|field| self.rows.iter().any(|row| row.has_value(*field)))
            .collect()
    }
}
