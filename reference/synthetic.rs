//! Synthetic coordinates: an identifier's numeric suffix encoded as a
//! (chromosome, position) pair so identifier lookups can go through a
//! position-range index.
//!
//! `rs12345` maps to synthetic chromosome `1` (first digit of the suffix) at synthetic
//! position `12345` (the suffix itself). The mapping depends only on the identifier, so
//! it is stable within one identifier-numbering epoch.

use std::fmt;

pub const IDENTIFIER_PREFIX: &str = "rs";
/// Suffixes shorter than this are not treated as well-formed identifiers.
pub const MIN_SUFFIX_DIGITS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntheticCoordinate {
    pub chrom: u8,
    pub pos: u64,
}

impl SyntheticCoordinate {
    /// Parses a well-formed identifier: the `rs` prefix (case-insensitive) followed by at
    /// least two digits, the first non-zero.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let trimmed = identifier.trim();
        let prefix = trimmed.get(..IDENTIFIER_PREFIX.len())?;
        if !prefix.eq_ignore_ascii_case(IDENTIFIER_PREFIX) {
            return None;
        }
        Self::from_numeric_suffix(&trimmed[IDENTIFIER_PREFIX.len()..])
    }

    /// Same as [`from_identifier`](Self::from_identifier) for a bare numeric suffix.
    pub fn from_numeric_suffix(suffix: &str) -> Option<Self> {
        let bytes = suffix.as_bytes();
        if bytes.len() < MIN_SUFFIX_DIGITS
            || !bytes.iter().all(u8::is_ascii_digit)
            || bytes[0] == b'0'
        {
            return None;
        }
        let pos = lexical_core::parse::<u64>(bytes)
            .ok()
            .filter(|&pos| pos < u64::MAX)?;
        Some(Self {
            chrom: bytes[0] - b'0',
            pos,
        })
    }

    /// The canonical identifier this coordinate encodes.
    pub fn identifier(&self) -> String {
        format!("{IDENTIFIER_PREFIX}{}", self.pos)
    }

    /// The chromosome label under which the coordinate is stored.
    pub fn chrom_label(&self) -> String {
        self.chrom.to_string()
    }
}

impl fmt::Display for SyntheticCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chrom, self.pos)
    }
}

/// Whether `identifier` follows the prefix-plus-numeric-suffix convention.
pub fn is_well_formed_identifier(identifier: &str) -> bool {
    SyntheticCoordinate::from_identifier(identifier).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_digits_become_chromosome_and_position() {
        let coord = SyntheticCoordinate::from_identifier("rs12345").unwrap();
        assert_eq!(coord, SyntheticCoordinate { chrom: 1, pos: 12345 });
        assert_eq!(coord.identifier(), "rs12345");
        assert_eq!(coord.chrom_label(), "1");
        assert_eq!(
            SyntheticCoordinate::from_identifier("RS987"),
            Some(SyntheticCoordinate { chrom: 9, pos: 987 })
        );
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        for bad in [
            "rs1",
            "rs",
            "12345",
            "rs12a",
            "rs012",
            "ss12345",
            "",
            "rs-12",
            "rs18446744073709551615",
            "rs99999999999999999999",
        ] {
            assert_eq!(SyntheticCoordinate::from_identifier(bad), None, "{bad}");
        }
    }

    #[test]
    fn mapping_is_deterministic() {
        for id in ["rs10", "rs7412", "rs429358", "rs1234567890123"] {
            assert_eq!(
                SyntheticCoordinate::from_identifier(id),
                SyntheticCoordinate::from_identifier(id)
            );
            let coord = SyntheticCoordinate::from_identifier(id).unwrap();
            assert_eq!(coord.identifier(), id);
        }
    }
}
