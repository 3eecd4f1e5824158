//! Position → identifier annotation against the `pos→id` store.

use super::{AnnotateError, AnnotationStats, KeyedRow, QuerySession, assemble_chunk, for_each_window};
use super::table::ResolvedColumns;
use crate::config::AnnotateConfig;
use crate::identity::{chromosome_code, identity_key, is_missing, normalize_allele, parse_position};
use crate::reference::store::StoreRow;
use crate::types::chromosome_label;
use ahash::AHashMap;

/// Identity key of an input row, if its chromosome, position and both alleles coerce.
fn row_key(row: &[String], cols: &ResolvedColumns) -> Option<(u8, u32, String)> {
    let chrom = chromosome_code(&row[cols.chrom])?;
    let pos = parse_position(&row[cols.pos])?;
    let ea = normalize_allele(&row[cols.ea])?;
    let nea = normalize_allele(&row[cols.nea])?;
    Some((chrom, pos, identity_key(chrom, pos, &ea, &nea)))
}

/// Decomposes reference rows (`chrom pos id ref alt[,alt...]`) into identity keys.
/// Rows that do not coerce are skipped; the first identifier seen for a key wins.
pub fn reference_identifiers(reference: &[StoreRow]) -> AHashMap<String, String> {
    let mut by_key = AHashMap::with_capacity(reference.len());
    for row in reference {
        let (Some(chrom), Some(pos), Some(id), Some(ref_allele), Some(alts)) = (
            row.field(0).and_then(chromosome_code),
            row.field(1).and_then(parse_position),
            row.field(2).filter(|id| !is_missing(id)),
            row.field(3).and_then(normalize_allele),
            row.field(4),
        ) else {
            continue;
        };
        for alt in alts.split(',').filter_map(normalize_allele) {
            by_key
                .entry(identity_key(chrom, pos, &ref_allele, &alt))
                .or_insert_with(|| id.to_string());
        }
    }
    by_key
}

/// Fills the identifier column of one chunk. Without `overwrite`, rows that already
/// carry an identifier keep it. Rows that cannot be keyed pass through unchanged at the
/// end of the chunk.
pub fn assign_identifier(
    mut rows: Vec<Vec<String>>,
    cols: &ResolvedColumns,
    session: &mut QuerySession<'_>,
    config: &AnnotateConfig,
    stats: &mut AnnotationStats,
) -> Result<Vec<Vec<String>>, AnnotateError> {
    let mut keyed = Vec::with_capacity(rows.len());
    let mut unkeyed = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        match row_key(row, cols) {
            Some((chrom, pos, key)) => keyed.push(KeyedRow {
                row: idx,
                chrom: chromosome_label(chrom),
                coordinate: u64::from(pos),
                key,
            }),
            None => unkeyed.push(idx),
        }
    }
    stats.unkeyed += unkeyed.len();

    let order = for_each_window(keyed, config.window, session, |members, reference| {
        let identifiers = reference_identifiers(reference);
        for member in members {
            let row = &mut rows[member.row];
            if !config.overwrite && !is_missing(&row[cols.rsid]) {
                continue;
            }
            match identifiers.get(&member.key) {
                Some(id) => {
                    row[cols.rsid] = id.clone();
                    stats.annotated += 1;
                }
                None => stats.unmatched += 1,
            }
        }
    })?;

    let (out, _) = assemble_chunk(rows, &order, &unkeyed, |_| true);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::test_support::{CountingStore, row};

    const COLS: ResolvedColumns = ResolvedColumns {
        chrom: 0,
        pos: 1,
        ea: 2,
        nea: 3,
        rsid: 4,
    };

    fn store() -> CountingStore {
        CountingStore::new(&[
            &["1", "100", "rs100", "A", "G,T"],
            &["1", "100", "rs999", "A", "G"],
            &["1", "200", "rs200", "C", "T"],
            &["1", "3000000", "rs300", "C", "T"],
            &["X", "50", "rs50", "G", "A"],
        ])
    }

    fn run(rows: Vec<Vec<String>>, store: &CountingStore, config: &AnnotateConfig) -> (Vec<Vec<String>>, AnnotationStats) {
        let mut session = QuerySession::new(store);
        let mut stats = AnnotationStats::default();
        let out = assign_identifier(rows, &COLS, &mut session, config, &mut stats).unwrap();
        (out, stats)
    }

    #[test]
    fn fills_missing_identifiers_on_allele_order_independent_keys() {
        let store = store();
        let rows = vec![
            row(&["1", "200", "T", "C", ""]),
            row(&["1", "100", "t", "a", "NA"]),
            row(&["chrX", "50", "A", "G", ""]),
            row(&["1", "100", "G", "A", ""]),
        ];
        let (out, stats) = run(rows, &store, &AnnotateConfig::default());
        assert_eq!(
            out,
            vec![
                row(&["1", "100", "t", "a", "rs100"]),
                row(&["1", "100", "G", "A", "rs100"]),
                row(&["1", "200", "T", "C", "rs200"]),
                row(&["chrX", "50", "A", "G", "rs50"]),
            ]
        );
        assert_eq!(stats.annotated, 4);
        assert_eq!(store.calls.get(), 2);
    }

    #[test]
    fn existing_identifiers_are_kept_unless_overwriting() {
        let store = store();
        let rows = vec![row(&["1", "200", "C", "T", "rs1"])];
        let (out, _) = run(rows.clone(), &store, &AnnotateConfig::default());
        assert_eq!(out[0][4], "rs1");

        let config = AnnotateConfig {
            overwrite: true,
            ..AnnotateConfig::default()
        };
        let (out, _) = run(rows, &store, &config);
        assert_eq!(out[0][4], "rs200");
    }

    #[test]
    fn empty_windows_cost_no_query() {
        let store = store();
        let rows = vec![
            row(&["1", "5000000", "C", "T", ""]),
            row(&["1", "100", "A", "C", ""]),
        ];
        let (out, stats) = run(rows, &store, &AnnotateConfig::default());
        assert_eq!(store.calls.get(), 2);
        assert_eq!(
            *store.windows.borrow(),
            vec![
                ("1".to_string(), 100, 2_000_100),
                ("1".to_string(), 4_000_100, 6_000_100),
            ]
        );
        assert!(out.iter().all(|r| r[4].is_empty()));
        assert_eq!(stats.unmatched, 2);
    }

    #[test]
    fn unkeyable_chunk_issues_no_query() {
        let store = store();
        let rows = vec![
            row(&["25", "100", "A", "G", ""]),
            row(&["1", "abc", "A", "G", ""]),
            row(&["1", "100", "N", "G", ""]),
        ];
        let (out, stats) = run(rows.clone(), &store, &AnnotateConfig::default());
        assert_eq!(store.calls.get(), 0);
        assert_eq!(out, rows);
        assert_eq!(stats.unkeyed, 3);
    }

    #[test]
    fn failed_later_window_leaves_rows_unannotated() {
        let mut store = store();
        store.fail_on = vec![2];
        let rows = vec![
            row(&["1", "100", "A", "G", ""]),
            row(&["X", "50", "A", "G", ""]),
        ];
        let (out, _) = run(rows, &store, &AnnotateConfig::default());
        assert_eq!(out[0][4], "rs100");
        assert_eq!(out[1][4], "");
    }
}
