//! Column mapping: turns a raw table with arbitrary headers into a [`MappedTable`]
//! keyed by canonical [`Field`]s.
//!
//! The mapping itself is an artifact produced outside the core (by [`guess`] or by a
//! person editing a JSON file). This module only loads, applies and serializes it.

use crate::identity::is_missing;
use crate::types::{Field, MappedRecord, MappedTable, RawTable};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ColumnMapError {
    #[error("Could not open column map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Column map is not a JSON object of column-name pairs: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw column name → canonical field, in the order the mapping was given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    entries: Vec<(String, Field)>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping. A field that is already the target of another raw column keeps
    /// its first source.
    pub fn insert(&mut self, raw: &str, field: Field) {
        if self.entries.iter().any(|(_, f)| *f == field) {
            warn!("Column '{raw}' also maps to {field}; keeping the first mapping.");
            return;
        }
        if self.entries.iter().any(|(r, _)| r == raw) {
            return;
        }
        self.entries.push((raw.to_string(), field));
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Field)>) -> Self {
        let mut map = Self::new();
        for (raw, field) in pairs {
            map.insert(raw, field);
        }
        map
    }

    pub fn from_json_str(text: &str) -> Result<Self, ColumnMapError> {
        let raw: BTreeMap<String, String> = serde_json::from_str(text)?;
        Ok(Self::from_string_pairs(raw))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ColumnMapError> {
        let file = File::open(path).map_err(|source| ColumnMapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, String> = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self::from_string_pairs(raw))
    }

    fn from_string_pairs(raw: BTreeMap<String, String>) -> Self {
        let mut map = Self::new();
        for (column, target) in raw {
            match target.parse::<Field>() {
                Ok(field) => map.insert(&column, field),
                Err(reason) => warn!("Ignoring mapping for column '{column}': {reason}"),
            }
        }
        map
    }

    pub fn to_json_string(&self) -> Result<String, ColumnMapError> {
        let raw: BTreeMap<&str, &str> = self
            .entries
            .iter()
            .map(|(column, field)| (column.as_str(), field.label()))
            .collect();
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    pub fn entries(&self) -> &[(String, Field)] {
        &self.entries
    }

    pub fn target_of(&self, raw: &str) -> Option<Field> {
        self.entries
            .iter()
            .find(|(column, _)| column == raw)
            .map(|(_, field)| *field)
    }

    /// Output fields no raw column maps to.
    pub fn unmapped_output_fields(&self) -> Vec<Field> {
        Field::OUTPUT
            .iter()
            .copied()
            .filter(|field| !self.entries.iter().any(|(_, f)| f == field))
            .collect()
    }

    /// Renames and selects columns. Mappings for columns the table lacks are ignored;
    /// columns whose every value is missing end up absent from the result.
    pub fn apply(&self, table: &RawTable) -> MappedTable {
        let selected: Vec<(usize, Field)> = self
            .entries
            .iter()
            .filter_map(|(column, field)| table.column_index(column).map(|idx| (idx, *field)))
            .collect();

        for (column, _) in &self.entries {
            if table.column_index(column).is_none() {
                debug!("Column '{column}' from the mapping is not in the input table.");
            }
        }

        let records = table
            .rows
            .iter()
            .map(|row| {
                let mut record = MappedRecord::new();
                for &(idx, field) in &selected {
                    if let Some(value) = row.get(idx) {
                        record.set(field, value);
                    }
                }
                record
            })
            .collect();

        let mapped = MappedTable::from_records(records);
        for &(_, field) in &selected {
            if !mapped.has(field) {
                debug!("Remove column {field} because it is all NA.");
            }
        }
        mapped
    }
}

/// Common spellings of each canonical field, compared case-insensitively.
const COMMON_COLUMN_NAMES: &[(&str, Field)] = &[
    ("chr", Field::Chr),
    ("#chr", Field::Chr),
    ("chrom", Field::Chr),
    ("#chrom", Field::Chr),
    ("chromosome", Field::Chr),
    ("chr_name", Field::Chr),
    ("hm_chr", Field::Chr),
    ("bp", Field::Bp),
    ("pos", Field::Bp),
    ("position", Field::Bp),
    ("base_pair_location", Field::Bp),
    ("chr_position", Field::Bp),
    ("hm_pos", Field::Bp),
    ("genpos", Field::Bp),
    ("rsid", Field::RsId),
    ("rs_id", Field::RsId),
    ("snp", Field::RsId),
    ("snpid", Field::RsId),
    ("markername", Field::RsId),
    ("variant_id", Field::RsId),
    ("ea", Field::Ea),
    ("a1", Field::Ea),
    ("allele1", Field::Ea),
    ("effect_allele", Field::Ea),
    ("tested_allele", Field::Ea),
    ("alt", Field::Ea),
    ("nea", Field::Nea),
    ("a2", Field::Nea),
    ("allele2", Field::Nea),
    ("other_allele", Field::Nea),
    ("non_effect_allele", Field::Nea),
    ("noneffect_allele", Field::Nea),
    ("ref", Field::Nea),
    ("p", Field::P),
    ("pval", Field::P),
    ("pvalue", Field::P),
    ("p_value", Field::P),
    ("p-value", Field::P),
    ("p.value", Field::P),
    ("neglogp", Field::NegLogP),
    ("neg_log_10_p_value", Field::NegLogP),
    ("log10p", Field::NegLogP),
    ("mlogp", Field::NegLogP),
    ("beta", Field::Beta),
    ("b", Field::Beta),
    ("effect", Field::Beta),
    ("effect_size", Field::Beta),
    ("se", Field::Se),
    ("stderr", Field::Se),
    ("standard_error", Field::Se),
    ("sebeta", Field::Se),
    ("or", Field::Or),
    ("odds_ratio", Field::Or),
    ("orse", Field::OrSe),
    ("or_se", Field::OrSe),
    ("se_or", Field::OrSe),
    ("eaf", Field::Eaf),
    ("freq", Field::Eaf),
    ("frq", Field::Eaf),
    ("af", Field::Eaf),
    ("a1freq", Field::Eaf),
    ("freq1", Field::Eaf),
    ("effect_allele_frequency", Field::Eaf),
    ("maf", Field::Maf),
    ("minor_allele_frequency", Field::Maf),
    ("z", Field::Z),
    ("zscore", Field::Z),
    ("z_score", Field::Z),
    ("n", Field::N),
    ("n_total", Field::N),
    ("samplesize", Field::N),
    ("info", Field::Info),
];

/// Guesses a partial column map from header names alone. Each field is claimed by the
/// first column whose name is a known spelling of it.
pub fn guess(columns: &[String]) -> ColumnMap {
    let mut map = ColumnMap::new();
    for column in columns {
        let lowered = column.trim().to_ascii_lowercase();
        let Some(&(_, field)) = COMMON_COLUMN_NAMES
            .iter()
            .find(|(alias, _)| *alias == lowered)
        else {
            continue;
        };
        if map.entries.iter().any(|(_, f)| *f == field) {
            continue;
        }
        map.entries.push((column.clone(), field));
    }
    map
}

/// True when a raw cell holds a value (not a missing-value token).
pub fn has_value(cell: &str) -> bool {
    !is_missing(cell)
}
