// ========================================================================================
//
//                     Canonicalization: mapped table → canonical table
//
// ========================================================================================
//
// The pipeline is a fixed sequence of steps over the whole table. Each step is a total
// function that may drop rows but never fails; the only fatal condition is a required
// column that is absent altogether, which is checked before the first step runs.

use crate::columns::ColumnMapError;
use crate::identity::{
    fold_frequency, identity_key, normalize_allele, parse_chromosome, parse_float,
    parse_position,
};
use crate::io::TableError;
use crate::types::{Field, MappedRecord, MappedTable, SumstatRow, SumstatTable};
use ahash::AHashSet;
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MungeError {
    #[error("Required column {field} is absent; variant identity cannot be resolved.")]
    MissingRequiredColumn { field: Field },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    ColumnMap(#[from] ColumnMapError),
    #[error("Could not write run report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A row in flight: the raw mapped values plus whatever has been validated so far.
struct WorkingRow {
    record: MappedRecord,
    row: SumstatRow,
    key: String,
}

type Step = fn(&mut Vec<WorkingRow>, &BTreeSet<Field>);

/// The canonicalization states, in execution order.
const STEPS: [(&str, Step); 9] = [
    ("validate-chromosome", validate_chromosome),
    ("validate-position", validate_position),
    ("validate-alleles", validate_alleles),
    ("build-identity-key", build_identity_key),
    ("resolve-significance", resolve_significance),
    ("dedup", dedup_step),
    ("resolve-effect-size", resolve_effect_size),
    ("validate-frequency", validate_frequency),
    ("validate-z", validate_z),
];

/// Fails if any of chromosome, position or the allele pair has no resolvable column.
pub fn check_required_columns(table: &MappedTable) -> Result<(), MungeError> {
    match Field::REQUIRED.iter().find(|field| !table.has(**field)) {
        Some(field) => Err(MungeError::MissingRequiredColumn { field: *field }),
        None => Ok(()),
    }
}

/// Runs every step and projects the survivors onto the canonical schema.
pub fn canonicalize(table: MappedTable) -> Result<SumstatTable, MungeError> {
    check_required_columns(&table)?;
    let MappedTable { present, records } = table;
    let input_rows = records.len();

    let mut rows: Vec<WorkingRow> = records
        .into_iter()
        .map(|record| WorkingRow {
            record,
            row: SumstatRow::new(0, 0, "", ""),
            key: String::new(),
        })
        .collect();

    for (name, step) in STEPS {
        let before = rows.len();
        step(&mut rows, &present);
        let after = rows.len();
        if before != after {
            debug!("{name}: removed {} rows, {after} remain.", before - after);
        } else {
            debug!("{name}: all {after} rows kept.");
        }
    }

    let output = project(rows);
    info!(
        "Canonicalized {input_rows} input rows into {} variants.",
        output.len()
    );
    Ok(output)
}

fn validate_chromosome(rows: &mut Vec<WorkingRow>, _present: &BTreeSet<Field>) {
    rows.retain_mut(|w| match w.record.get(Field::Chr).and_then(parse_chromosome) {
        Some(chrom) => {
            w.row.chrom = chrom;
            true
        }
        None => false,
    });
}

fn validate_position(rows: &mut Vec<WorkingRow>, _present: &BTreeSet<Field>) {
    rows.retain_mut(|w| match w.record.get(Field::Bp).and_then(parse_position) {
        Some(pos) => {
            w.row.pos = pos;
            true
        }
        None => false,
    });
}

fn validate_alleles(rows: &mut Vec<WorkingRow>, _present: &BTreeSet<Field>) {
    rows.retain_mut(|w| {
        let ea = w.record.get(Field::Ea).and_then(normalize_allele);
        let nea = w.record.get(Field::Nea).and_then(normalize_allele);
        match (ea, nea) {
            (Some(ea), Some(nea)) if ea != nea => {
                w.row.ea = ea;
                w.row.nea = nea;
                true
            }
            _ => false,
        }
    });
}

fn build_identity_key(rows: &mut Vec<WorkingRow>, present: &BTreeSet<Field>) {
    let carry_rsid = present.contains(&Field::RsId);
    for w in rows.iter_mut() {
        w.key = identity_key(w.row.chrom, w.row.pos, &w.row.ea, &w.row.nea);
        if carry_rsid {
            w.row.rsid = w.record.get(Field::RsId).map(str::to_string);
        }
    }
}

fn resolve_significance(rows: &mut Vec<WorkingRow>, present: &BTreeSet<Field>) {
    if present.contains(&Field::P) {
        rows.retain_mut(|w| {
            match w.record.get(Field::P).and_then(parse_float) {
                Some(p) if is_probability(p) => {
                    w.row.p = Some(p);
                    true
                }
                _ => false,
            }
        });
    } else if present.contains(&Field::NegLogP) {
        rows.retain_mut(|w| {
            // x = 0 gives p = 1 and very large x underflow to p = 0; both are dropped.
            let p = w
                .record
                .get(Field::NegLogP)
                .and_then(parse_float)
                .map(|x| 10f64.powf(-x));
            match p {
                Some(p) if is_probability(p) => {
                    w.row.p = Some(p);
                    true
                }
                _ => false,
            }
        });
    } else {
        debug!("No P or NEGLOGP column; continuing without significance.");
    }
}

#[inline]
fn is_probability(p: f64) -> bool {
    p > 0.0 && p < 1.0
}

fn dedup_step(rows: &mut Vec<WorkingRow>, _present: &BTreeSet<Field>) {
    let taken = std::mem::take(rows);
    *rows = dedup_by_identity(
        taken,
        |w| w.row.p,
        |w| w.key.as_str(),
        |w| (w.row.chrom, w.row.pos),
    );
}

fn resolve_effect_size(rows: &mut Vec<WorkingRow>, present: &BTreeSet<Field>) {
    let has = |field: Field| present.contains(&field);
    if has(Field::Beta) && has(Field::Se) {
        rows.retain_mut(|w| {
            let beta = w.record.get(Field::Beta).and_then(parse_float);
            let se = w.record.get(Field::Se).and_then(parse_float);
            match (beta, se) {
                (Some(beta), Some(se)) if se > 0.0 => {
                    w.row.beta = Some(beta);
                    w.row.se = Some(se);
                    true
                }
                _ => false,
            }
        });
    } else if has(Field::Or) && has(Field::OrSe) {
        rows.retain_mut(|w| {
            let or = w.record.get(Field::Or).and_then(parse_float);
            let or_se = w.record.get(Field::OrSe).and_then(parse_float);
            match (or, or_se) {
                (Some(or), Some(or_se)) if or > 0.0 && or_se > 0.0 => {
                    let (beta, se) = odds_ratio_to_beta(or, or_se);
                    if se.is_finite() && se > 0.0 {
                        w.row.beta = Some(beta);
                        w.row.se = Some(se);
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        });
    } else {
        warn!("Missing effect-size information.");
        // A lone BETA or SE column is still validated and carried through.
        if has(Field::Beta) {
            rows.retain_mut(|w| match w.record.get(Field::Beta).and_then(parse_float) {
                Some(beta) => {
                    w.row.beta = Some(beta);
                    true
                }
                None => false,
            });
        }
        if has(Field::Se) {
            rows.retain_mut(|w| match w.record.get(Field::Se).and_then(parse_float) {
                Some(se) if se > 0.0 => {
                    w.row.se = Some(se);
                    true
                }
                _ => false,
            });
        }
    }
}

/// Converts an odds ratio and its standard error to the (beta, se) pair carried in the
/// canonical table: beta = OR and se = ORse / OR.
#[inline]
pub fn odds_ratio_to_beta(or: f64, or_se: f64) -> (f64, f64) {
    (or, or_se / or)
}

fn validate_frequency(rows: &mut Vec<WorkingRow>, present: &BTreeSet<Field>) {
    if present.contains(&Field::Eaf) {
        rows.retain_mut(|w| match w.record.get(Field::Eaf).and_then(parse_float) {
            Some(eaf) if (0.0..=1.0).contains(&eaf) => {
                w.row.eaf = Some(eaf);
                true
            }
            _ => false,
        });
    }

    if present.contains(&Field::Maf) {
        rows.retain_mut(|w| {
            match w.record.get(Field::Maf).and_then(parse_float).map(fold_frequency) {
                Some(maf) if (0.0..=0.5).contains(&maf) => {
                    w.row.maf = Some(maf);
                    true
                }
                _ => false,
            }
        });
    } else if present.contains(&Field::Eaf) {
        for w in rows.iter_mut() {
            w.row.maf = w.row.eaf.map(fold_frequency);
        }
    }
}

fn validate_z(rows: &mut Vec<WorkingRow>, present: &BTreeSet<Field>) {
    if present.contains(&Field::Z) {
        rows.retain(|w| w.record.get(Field::Z).and_then(parse_float).is_some());
    }
}

fn project(rows: Vec<WorkingRow>) -> SumstatTable {
    SumstatTable::new(rows.into_iter().map(|w| w.row).collect())
}

// ========================================================================================
//                                   Deduplication
// ========================================================================================

/// Missing p-values sort after every present one.
fn compare_p(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn dedup_by_identity<T>(
    mut items: Vec<T>,
    p_value: impl Fn(&T) -> Option<f64>,
    key: impl Fn(&T) -> &str,
    position: impl Fn(&T) -> (u8, u32),
) -> Vec<T> {
    items.sort_by(|a, b| compare_p(p_value(a), p_value(b)));
    let mut seen: AHashSet<String> = AHashSet::with_capacity(items.len());
    let mut kept: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(key(item).to_string()))
        .collect();
    kept.sort_by_key(|item| position(item));
    kept
}

/// Keeps the smallest-p row per identity key (first input occurrence on ties), then
/// orders the result by (chromosome, position). Idempotent.
pub fn dedup(table: SumstatTable) -> SumstatTable {
    let keyed: Vec<(String, SumstatRow)> = table
        .rows
        .into_iter()
        .map(|row| (row.identity_key(), row))
        .collect();
    let kept = dedup_by_identity(
        keyed,
        |(_, row)| row.p,
        |(key, _)| key.as_str(),
        |(_, row)| (row.chrom, row.pos),
    );
    SumstatTable::new(kept.into_iter().map(|(_, row)| row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mapped(rows: &[&[(Field, &str)]]) -> MappedTable {
        MappedTable::from_records(
            rows.iter()
                .map(|pairs| MappedRecord::from_pairs(pairs.iter().copied()))
                .collect(),
        )
    }

    fn base(chrom: &'static str, pos: &'static str) -> Vec<(Field, &'static str)> {
        vec![
            (Field::Chr, chrom),
            (Field::Bp, pos),
            (Field::Ea, "A"),
            (Field::Nea, "G"),
        ]
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let table = mapped(&[&[(Field::Chr, "1"), (Field::Bp, "10"), (Field::Ea, "A")]]);
        match canonicalize(table) {
            Err(MungeError::MissingRequiredColumn { field }) => assert_eq!(field, Field::Nea),
            other => panic!("expected MissingRequiredColumn, got {other:?}"),
        }
    }

    #[test]
    fn scenario_row_is_canonicalized_and_worse_duplicate_dropped() {
        let table = mapped(&[
            &[
                (Field::Chr, "7"),
                (Field::Bp, "100"),
                (Field::Ea, "g"),
                (Field::Nea, "a"),
                (Field::P, "0.5"),
                (Field::Beta, "-0.2"),
                (Field::Se, "0.3"),
            ],
            &[
                (Field::Chr, "7"),
                (Field::Bp, "100"),
                (Field::Ea, "a"),
                (Field::Nea, "g"),
                (Field::P, "0.01"),
                (Field::Beta, "0.5"),
                (Field::Se, "0.1"),
            ],
        ]);
        let out = canonicalize(table).unwrap();
        assert_eq!(out.len(), 1);
        let row = &out.rows[0];
        assert_eq!((row.chrom, row.pos), (7, 100));
        assert_eq!((row.ea.as_str(), row.nea.as_str()), ("A", "G"));
        assert_eq!(row.p, Some(0.01));
        assert_eq!(row.beta, Some(0.5));
        assert_eq!(row.se, Some(0.1));
        assert_eq!(row.eaf, None);
        assert_eq!(row.rsid, None);
    }

    #[test]
    fn chromosome_x_normalizes_and_out_of_range_rows_drop() {
        let a = base("chrX", "10");
        let b = base("25", "10");
        let c = base("3", "300000000");
        let out = canonicalize(mapped(&[&a, &b, &c])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].chrom, 23);
    }

    #[test]
    fn identical_or_non_acgt_alleles_are_dropped() {
        let same = vec![
            (Field::Chr, "1"),
            (Field::Bp, "10"),
            (Field::Ea, "A"),
            (Field::Nea, "a"),
        ];
        let indel = vec![
            (Field::Chr, "1"),
            (Field::Bp, "11"),
            (Field::Ea, "A"),
            (Field::Nea, "-"),
        ];
        let ok = base("1", "12");
        let out = canonicalize(mapped(&[&same, &indel, &ok])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].pos, 12);
    }

    #[test]
    fn neglogp_is_converted_when_p_is_absent() {
        let mut row = base("1", "10");
        row.push((Field::NegLogP, "2"));
        let mut bad = base("1", "20");
        bad.push((Field::NegLogP, "-1"));
        let mut strong = base("1", "30");
        strong.push((Field::NegLogP, "300"));
        let out = canonicalize(mapped(&[&row, &bad, &strong])).unwrap();
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out.rows[0].p.unwrap(), 0.01, max_relative = 1e-12);
        assert_relative_eq!(out.rows[1].p.unwrap(), 1e-300, max_relative = 1e-9);
    }

    #[test]
    fn neglogp_mapping_to_the_unit_interval_edges_is_dropped() {
        let mut null = base("1", "10");
        null.push((Field::NegLogP, "0"));
        let mut underflow = base("1", "20");
        underflow.push((Field::NegLogP, "400"));
        let mut kept = base("1", "30");
        kept.push((Field::NegLogP, "5"));
        let out = canonicalize(mapped(&[&null, &underflow, &kept])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].pos, 30);
        let p = out.rows[0].p.unwrap();
        assert!(p > 0.0 && p < 1.0);
        assert_relative_eq!(p, 1e-5, max_relative = 1e-12);
    }

    #[test]
    fn p_values_outside_open_unit_interval_are_dropped() {
        let rows: Vec<Vec<(Field, &str)>> = ["0", "1", "0.2", "abc"]
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let pos: &'static str = ["10", "20", "30", "40"][i];
                let mut r = base("1", pos);
                r.push((Field::P, p));
                r
            })
            .collect();
        let refs: Vec<&[(Field, &str)]> = rows.iter().map(Vec::as_slice).collect();
        let out = canonicalize(mapped(&refs)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].p, Some(0.2));
    }

    #[test]
    fn odds_ratio_conversion_round_trips() {
        let mut row = base("2", "500");
        row.extend([(Field::Or, "1.25"), (Field::OrSe, "0.05")]);
        let out = canonicalize(mapped(&[&row])).unwrap();
        let (beta, se) = (out.rows[0].beta.unwrap(), out.rows[0].se.unwrap());
        assert_relative_eq!(beta, 1.25);
        assert_relative_eq!(se * beta, 0.05, max_relative = 1e-12);

        for (or, or_se) in [(0.5, 0.01), (2.0, 0.3), (1.0, 1.0)] {
            let (b, s) = odds_ratio_to_beta(or, or_se);
            assert_relative_eq!(b, or);
            assert_relative_eq!(s * b, or_se, max_relative = 1e-12);
        }
    }

    #[test]
    fn non_positive_standard_errors_are_dropped() {
        let mut good = base("1", "10");
        good.extend([(Field::Beta, "0.1"), (Field::Se, "0.2")]);
        let mut zero = base("1", "20");
        zero.extend([(Field::Beta, "0.1"), (Field::Se, "0")]);
        let out = canonicalize(mapped(&[&good, &zero])).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn maf_is_derived_by_folding_eaf() {
        let mut high = base("1", "10");
        high.push((Field::Eaf, "0.8"));
        let mut invalid = base("1", "20");
        invalid.push((Field::Eaf, "1.5"));
        let out = canonicalize(mapped(&[&high, &invalid])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].eaf, Some(0.8));
        assert_relative_eq!(out.rows[0].maf.unwrap(), 0.2, max_relative = 1e-12);
    }

    #[test]
    fn supplied_maf_is_folded_validated_and_preferred() {
        let rows: Vec<Vec<(Field, &str)>> = [
            ("10", "0.5", "0.7"),
            ("20", "0.5", "1.2"),
            ("30", "0.5", "-0.1"),
            ("40", "0.9", "0.2"),
        ]
        .into_iter()
        .map(|(pos, eaf, maf)| {
            let mut r = base("1", pos);
            r.push((Field::Eaf, eaf));
            r.push((Field::Maf, maf));
            r
        })
        .collect();
        let refs: Vec<&[(Field, &str)]> = rows.iter().map(Vec::as_slice).collect();
        let out = canonicalize(mapped(&refs)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.rows[0].pos, 10);
        assert_relative_eq!(out.rows[0].maf.unwrap(), 0.3, max_relative = 1e-12);
        assert_eq!(out.rows[1].pos, 40);
        assert_eq!(out.rows[1].eaf, Some(0.9));
        assert_relative_eq!(out.rows[1].maf.unwrap(), 0.2, max_relative = 1e-12);
    }

    #[test]
    fn non_numeric_z_drops_the_row() {
        let mut good = base("1", "10");
        good.push((Field::Z, "1.96"));
        let mut bad = base("1", "20");
        bad.push((Field::Z, "big"));
        let out = canonicalize(mapped(&[&good, &bad])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].pos, 10);
    }

    #[test]
    fn survivors_respect_schema_bounds() {
        let out = canonicalize(mapped(&[
            &base("1", "1"),
            &base("23", "299999999"),
            &base("0", "5"),
            &base("x", "0"),
        ]))
        .unwrap();
        assert_eq!(out.len(), 2);
        for row in &out.rows {
            assert!((1..=23).contains(&row.chrom));
            assert!(row.pos > 0 && row.pos < 300_000_000);
            assert_ne!(row.ea, row.nea);
        }
    }

    #[test]
    fn dedup_is_idempotent_and_position_sorted() {
        let mut rows = Vec::new();
        for (chrom, pos, ea, nea, p) in [
            (2, 10, "A", "G", Some(0.3)),
            (1, 50, "C", "T", None),
            (2, 10, "G", "A", Some(0.1)),
            (1, 50, "T", "C", Some(0.9)),
            (1, 5, "A", "C", Some(0.2)),
        ] {
            let mut row = SumstatRow::new(chrom, pos, ea, nea);
            row.p = p;
            rows.push(row);
        }
        let once = dedup(SumstatTable::new(rows));
        assert_eq!(once.len(), 3);
        let positions: Vec<(u8, u32)> = once.rows.iter().map(|r| (r.chrom, r.pos)).collect();
        assert_eq!(positions, vec![(1, 5), (1, 50), (2, 10)]);
        assert_eq!(once.rows[1].p, Some(0.9));
        assert_eq!(once.rows[2].p, Some(0.1));

        let twice = dedup(once.clone());
        assert_eq!(once, twice);
    }
}
