// ========================================================================================
//
//                       Variant identity and field coercion
//
// ========================================================================================
//
// The identity key `chrom-pos-A1-A2` sorts the allele pair before concatenation, so a
// variant has the same key whichever allele a study reports as "effect". Any join on the
// key must therefore re-derive effect direction afterwards.

use crate::types::{BP_MAX, CHR_MAX, CHR_MIN};

/// Tokens that denote an absent value in a raw cell.
const MISSING_TOKENS: [&str; 8] = ["", "na", "nan", ".", "none", "null", "n/a", "-"];

/// Builds the order-independent identity key for a variant.
pub fn identity_key(chrom: u8, pos: u32, allele1: &str, allele2: &str) -> String {
    let (lo, hi) = if allele1 <= allele2 {
        (allele1, allele2)
    } else {
        (allele2, allele1)
    };
    format!("{chrom}-{pos}-{lo}-{hi}")
}

pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    MISSING_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Coerces a cell to a finite float, `None` on absence or parse failure.
pub fn parse_float(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if is_missing(trimmed) {
        return None;
    }
    lexical_core::parse::<f64>(trimmed.as_bytes())
        .ok()
        .filter(|value| value.is_finite())
}

/// Coerces a cell to a non-negative integer, accepting integral float spellings
/// such as `100.0` or `1e5`.
pub fn parse_integral(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(value) = lexical_core::parse::<u64>(trimmed.as_bytes()) {
        return Some(value);
    }
    let value = parse_float(trimmed)?;
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some(value as u64)
}

/// Maps any chromosome spelling to its numeric code: a case-insensitive `chr` prefix is
/// stripped, `X` becomes 23 and `Y` becomes 24. No range restriction beyond 1..=24.
pub fn chromosome_code(raw: &str) -> Option<u8> {
    let mut trimmed = raw.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("chr")) {
        trimmed = &trimmed[3..];
    }
    if trimmed.eq_ignore_ascii_case("X") {
        return Some(23);
    }
    if trimmed.eq_ignore_ascii_case("Y") {
        return Some(24);
    }
    let code = parse_integral(trimmed)?;
    if (1..=24).contains(&code) {
        Some(code as u8)
    } else {
        None
    }
}

/// Canonical chromosome coercion: like [`chromosome_code`] but only 1..=23 survive.
pub fn parse_chromosome(raw: &str) -> Option<u8> {
    chromosome_code(raw).filter(|code| is_valid_chromosome(*code))
}

#[inline]
pub fn is_valid_chromosome(chrom: u8) -> bool {
    (CHR_MIN..=CHR_MAX).contains(&chrom)
}

/// Canonical position coercion: integral and strictly inside (0, 3e8).
pub fn parse_position(raw: &str) -> Option<u32> {
    let value = parse_integral(raw)?;
    u32::try_from(value).ok().filter(|pos| is_valid_position(*pos))
}

#[inline]
pub fn is_valid_position(pos: u32) -> bool {
    pos > 0 && pos < BP_MAX
}

/// Uppercases an allele and requires it to be a non-empty run of A/C/G/T.
pub fn normalize_allele(raw: &str) -> Option<String> {
    let allele = raw.trim().to_ascii_uppercase();
    if !allele.is_empty()
        && allele
            .bytes()
            .all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
    {
        Some(allele)
    } else {
        None
    }
}

/// Folds an allele frequency onto the minor-allele scale. Idempotent on [0, 0.5].
#[inline]
pub fn fold_frequency(freq: f64) -> f64 {
    if freq > 0.5 { 1.0 - freq } else { freq }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const BASES: [&str; 4] = ["A", "C", "G", "T"];

    #[test]
    fn identity_key_ignores_allele_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let a = BASES[rng.gen_range(0..4)];
            let b = BASES[rng.gen_range(0..4)];
            if a == b {
                continue;
            }
            let chrom = rng.gen_range(1..=23);
            let pos = rng.gen_range(1..BP_MAX);
            assert_eq!(identity_key(chrom, pos, a, b), identity_key(chrom, pos, b, a));
        }
        assert_eq!(identity_key(7, 100, "G", "A"), "7-100-A-G");
    }

    #[test]
    fn identity_key_sorts_multibase_alleles_lexicographically() {
        assert_eq!(identity_key(1, 5, "T", "AC"), "1-5-AC-T");
    }

    #[test]
    fn chromosome_spellings_normalize() {
        assert_eq!(parse_chromosome("chrX"), Some(23));
        assert_eq!(parse_chromosome("x"), Some(23));
        assert_eq!(parse_chromosome("CHR7"), Some(7));
        assert_eq!(parse_chromosome("7.0"), Some(7));
        assert_eq!(parse_chromosome("25"), None);
        assert_eq!(parse_chromosome("0"), None);
        assert_eq!(parse_chromosome("Y"), None);
        assert_eq!(chromosome_code("Y"), Some(24));
        assert_eq!(parse_chromosome("MT"), None);
    }

    #[test]
    fn positions_must_be_strictly_inside_range() {
        assert_eq!(parse_position("100"), Some(100));
        assert_eq!(parse_position("1e3"), Some(1000));
        assert_eq!(parse_position("0"), None);
        assert_eq!(parse_position("300000000"), None);
        assert_eq!(parse_position("12.5"), None);
        assert_eq!(parse_position("-4"), None);
        assert_eq!(parse_position("abc"), None);
    }

    #[test]
    fn alleles_are_uppercased_and_restricted_to_acgt() {
        assert_eq!(normalize_allele(" a ").as_deref(), Some("A"));
        assert_eq!(normalize_allele("acgt").as_deref(), Some("ACGT"));
        assert_eq!(normalize_allele("N"), None);
        assert_eq!(normalize_allele("<DEL>"), None);
        assert_eq!(normalize_allele(""), None);
    }

    #[test]
    fn missing_tokens_parse_to_none() {
        for token in ["", "NA", "nan", ".", "NULL"] {
            assert!(is_missing(token));
            assert_eq!(parse_float(token), None);
        }
        assert_eq!(parse_float("5e-8"), Some(5e-8));
        assert_eq!(parse_float("inf"), None);
    }

    #[test]
    fn frequency_folding_is_bounded_and_idempotent() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let eaf: f64 = rng.gen_range(0.0..=1.0);
            let maf = fold_frequency(eaf);
            assert!((0.0..=0.5).contains(&maf));
            assert_eq!(fold_frequency(maf), maf);
        }
        assert_eq!(fold_frequency(1.0), 0.0);
        assert_eq!(fold_frequency(0.5), 0.5);
    }
}
