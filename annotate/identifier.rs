//! Identifier-keyed annotation through synthetic coordinates: recovering positions and
//! alleles from the `id→pos` store, and replacing obsolete identifiers from the
//! `merged→current` store.
//!
//! Rows are joined on the exact synthetic coordinate of their identifier, not on the
//! identity key, since chromosome and position are what is being recovered.

use super::table::ResolvedColumns;
use super::{
    AnnotateError, AnnotationStats, KeyedRow, QuerySession, assemble_chunk, for_each_window,
};
use crate::config::AnnotateConfig;
use crate::identity::{chromosome_code, identity_key, is_missing, normalize_allele, parse_position};
use crate::reference::store::StoreRow;
use crate::reference::synthetic::SyntheticCoordinate;
use ahash::{AHashMap, AHashSet};
use log::debug;

/// One reference placement of an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub chrom: u8,
    pub pos: u32,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl Placement {
    fn carries(&self, allele: &str) -> bool {
        allele == self.ref_allele || allele == self.alt_allele
    }

    /// The other member of the reference pair, if `allele` is one of them.
    fn partner(&self, allele: &str) -> Option<&str> {
        if allele == self.ref_allele {
            Some(self.alt_allele.as_str())
        } else if allele == self.alt_allele {
            Some(self.ref_allele.as_str())
        } else {
            None
        }
    }
}

/// Groups `id→pos` rows (`synth_chrom synth_pos id chrom pos ref alt`) by synthetic
/// position. Placements sharing an identity key are kept once, first occurrence first.
pub fn reference_placements(reference: &[StoreRow]) -> AHashMap<u64, Vec<Placement>> {
    let mut by_coordinate: AHashMap<u64, Vec<Placement>> = AHashMap::new();
    let mut seen = AHashSet::new();
    for row in reference {
        let (Some(coordinate), Some(chrom), Some(pos), Some(ref_allele), Some(alts)) = (
            row.coordinate(),
            row.field(3).and_then(chromosome_code),
            row.field(4).and_then(parse_position),
            row.field(5).and_then(normalize_allele),
            row.field(6),
        ) else {
            continue;
        };
        for alt_allele in alts.split(',').filter_map(normalize_allele) {
            if !seen.insert((coordinate, identity_key(chrom, pos, &ref_allele, &alt_allele))) {
                continue;
            }
            by_coordinate.entry(coordinate).or_default().push(Placement {
                chrom,
                pos,
                ref_allele: ref_allele.clone(),
                alt_allele,
            });
        }
    }
    by_coordinate
}

fn synthetic_keys(
    rows: &[Vec<String>],
    rsid: usize,
) -> (Vec<KeyedRow<SyntheticCoordinate>>, Vec<usize>) {
    let mut keyed = Vec::with_capacity(rows.len());
    let mut unkeyed = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        match SyntheticCoordinate::from_identifier(&row[rsid]) {
            Some(coord) => keyed.push(KeyedRow {
                row: idx,
                chrom: coord.chrom_label(),
                coordinate: coord.pos,
                key: coord,
            }),
            None => unkeyed.push(idx),
        }
    }
    (keyed, unkeyed)
}

/// An allele cell as supplied: `None` when missing, otherwise trimmed and uppercased.
fn supplied_allele(cell: &str) -> Option<String> {
    (!is_missing(cell)).then(|| cell.trim().to_ascii_uppercase())
}

/// Reconciles one row with a reference placement. Returns whether any supplied value
/// disagrees with the reference.
fn reconcile(row: &mut [String], cols: &ResolvedColumns, hit: &Placement, overwrite: bool) -> bool {
    let mut mismatch = false;

    let chrom = (!is_missing(&row[cols.chrom])).then(|| chromosome_code(&row[cols.chrom]));
    match chrom {
        Some(Some(code)) if code == hit.chrom => {}
        Some(_) if !overwrite => mismatch = true,
        _ => row[cols.chrom] = hit.chrom.to_string(),
    }
    let pos = (!is_missing(&row[cols.pos])).then(|| parse_position(&row[cols.pos]));
    match pos {
        Some(Some(p)) if p == hit.pos => {}
        Some(_) if !overwrite => mismatch = true,
        _ => row[cols.pos] = hit.pos.to_string(),
    }

    let ea = supplied_allele(&row[cols.ea]);
    let nea = supplied_allele(&row[cols.nea]);
    let (new_ea, new_nea) = match (ea.as_deref(), nea.as_deref()) {
        (None, None) => (Some(hit.alt_allele.clone()), Some(hit.ref_allele.clone())),
        (Some(a), None) => match hit.partner(a) {
            Some(other) => (None, Some(other.to_string())),
            None => {
                mismatch = true;
                (None, None)
            }
        },
        (None, Some(b)) => match hit.partner(b) {
            Some(other) => (Some(other.to_string()), None),
            None => {
                mismatch = true;
                (None, None)
            }
        },
        (Some(a), Some(b)) => {
            if hit.partner(a) != Some(b) {
                mismatch = true;
            }
            (None, None)
        }
    };
    if let Some(v) = new_ea {
        row[cols.ea] = v;
    }
    if let Some(v) = new_nea {
        row[cols.nea] = v;
    }

    // With overwrite the reference pair replaces inconsistent alleles; a consistent
    // pair keeps the supplied effect orientation.
    if overwrite {
        let ea = supplied_allele(&row[cols.ea]);
        let nea = supplied_allele(&row[cols.nea]);
        let consistent = matches!(
            (ea.as_deref(), nea.as_deref()),
            (Some(a), Some(b)) if hit.partner(a) == Some(b)
        );
        if !consistent {
            row[cols.ea] = hit.alt_allele.clone();
            row[cols.nea] = hit.ref_allele.clone();
        }
        mismatch = false;
    }
    mismatch
}

/// The first placement consistent with every supplied allele, else the first placement.
fn choose<'p>(placements: &'p [Placement], row: &[String], cols: &ResolvedColumns) -> &'p Placement {
    let ea = supplied_allele(&row[cols.ea]);
    let nea = supplied_allele(&row[cols.nea]);
    placements
        .iter()
        .find(|p| {
            ea.as_deref().is_none_or(|a| p.carries(a))
                && nea.as_deref().is_none_or(|b| p.carries(b))
        })
        .unwrap_or(&placements[0])
}

fn is_complete(row: &[String], cols: &ResolvedColumns) -> bool {
    chromosome_code(&row[cols.chrom]).is_some()
        && parse_position(&row[cols.pos]).is_some()
        && normalize_allele(&row[cols.ea]).is_some()
        && normalize_allele(&row[cols.nea]).is_some()
}

/// Backfills and checks chromosome, position and alleles of one chunk from the `id→pos`
/// store. Disagreements are counted and logged, never dropped; with `overwrite` the
/// reference wins. With `remove_failed`, rows still lacking any of the four fields are
/// dropped.
pub fn assign_coordinates(
    mut rows: Vec<Vec<String>>,
    cols: &ResolvedColumns,
    session: &mut QuerySession<'_>,
    config: &AnnotateConfig,
    stats: &mut AnnotationStats,
) -> Result<Vec<Vec<String>>, AnnotateError> {
    let (keyed, unkeyed) = synthetic_keys(&rows, cols.rsid);
    stats.unkeyed += unkeyed.len();

    let order = for_each_window(keyed, config.window, session, |members, reference| {
        let placements = reference_placements(reference);
        for member in members {
            let Some(candidates) = placements.get(&member.coordinate) else {
                stats.unmatched += 1;
                continue;
            };
            let row = &mut rows[member.row];
            let hit = choose(candidates, row, cols).clone();
            stats.annotated += 1;
            if reconcile(row, cols, &hit, config.overwrite) {
                stats.mismatches += 1;
                debug!(
                    "{} disagrees with reference placement {}:{} {}/{}",
                    member.key.identifier(),
                    hit.chrom,
                    hit.pos,
                    hit.ref_allele,
                    hit.alt_allele
                );
            }
        }
    })?;

    let (out, removed) = assemble_chunk(rows, &order, &unkeyed, |row| {
        !config.remove_failed || is_complete(row, cols)
    });
    stats.removed += removed;
    Ok(out)
}

/// Replaces obsolete identifiers with their current one from the `merged→current` store
/// (`synth_chrom synth_pos obsolete_id current_id`).
pub fn update_merged(
    mut rows: Vec<Vec<String>>,
    cols: &ResolvedColumns,
    session: &mut QuerySession<'_>,
    config: &AnnotateConfig,
    stats: &mut AnnotationStats,
) -> Result<Vec<Vec<String>>, AnnotateError> {
    let (keyed, unkeyed) = synthetic_keys(&rows, cols.rsid);
    stats.unkeyed += unkeyed.len();

    let order = for_each_window(keyed, config.window, session, |members, reference| {
        let mut current: AHashMap<u64, &str> = AHashMap::with_capacity(reference.len());
        for row in reference {
            if let (Some(coordinate), Some(id)) = (row.coordinate(), row.field(3)) {
                current.entry(coordinate).or_insert(id);
            }
        }
        for member in members {
            match current.get(&member.coordinate) {
                Some(id) => {
                    rows[member.row][cols.rsid] = (*id).to_string();
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

    fn id2pos() -> CountingStore {
        CountingStore::new(&[
            &["2", "21", "rs21", "1", "200", "C", "T"],
            &["2", "21", "rs21", "1", "200", "C", "A"],
            &["3", "30", "rs30", "2", "500", "A", "G"],
            &["5", "555", "rs555", "X", "100", "G", "A"],
        ])
    }

    fn run(
        rows: Vec<Vec<String>>,
        store: &CountingStore,
        config: &AnnotateConfig,
    ) -> (Vec<Vec<String>>, AnnotationStats) {
        let mut session = QuerySession::new(store);
        let mut stats = AnnotationStats::default();
        let out = assign_coordinates(rows, &COLS, &mut session, config, &mut stats).unwrap();
        (out, stats)
    }

    #[test]
    fn recovers_coordinates_and_alleles() {
        let store = id2pos();
        let rows = vec![
            row(&["", "", "", "", "rs555"]),
            row(&["", "", "A", "", "rs21"]),
            row(&["", "", "", "G", "rs30"]),
        ];
        let (out, stats) = run(rows, &store, &AnnotateConfig::default());
        assert_eq!(
            out,
            vec![
                row(&["23", "100", "A", "G", "rs555"]),
                row(&["1", "200", "A", "C", "rs21"]),
                row(&["2", "500", "A", "G", "rs30"]),
            ]
        );
        assert_eq!(stats.annotated, 3);
        assert_eq!(stats.mismatches, 0);
    }

    #[test]
    fn mismatches_are_counted_not_dropped() {
        let store = id2pos();
        let rows = vec![
            row(&["3", "200", "C", "T", "rs21"]),
            row(&["2", "500", "C", "", "rs30"]),
        ];
        let (out, stats) = run(rows.clone(), &store, &AnnotateConfig::default());
        assert_eq!(out, rows);
        assert_eq!(stats.mismatches, 2);

        let config = AnnotateConfig {
            overwrite: true,
            ..AnnotateConfig::default()
        };
        let (out, stats) = run(rows, &store, &config);
        assert_eq!(
            out,
            vec![
                row(&["1", "200", "C", "T", "rs21"]),
                row(&["2", "500", "G", "A", "rs30"]),
            ]
        );
        assert_eq!(stats.mismatches, 0);
    }

    #[test]
    fn malformed_identifiers_pass_through_or_are_removed() {
        let store = id2pos();
        let rows = vec![
            row(&["", "", "", "", "rs1"]),
            row(&["", "", "", "", "rs30"]),
            row(&["", "", "", "", "rs999"]),
        ];
        let (out, stats) = run(rows.clone(), &store, &AnnotateConfig::default());
        assert_eq!(out[0], row(&["2", "500", "G", "A", "rs30"]));
        assert_eq!(out[1], rows[2]);
        assert_eq!(out[2], rows[0]);
        assert_eq!((stats.unkeyed, stats.unmatched), (1, 1));

        let config = AnnotateConfig {
            remove_failed: true,
            ..AnnotateConfig::default()
        };
        let (out, stats) = run(rows, &store, &config);
        assert_eq!(out, vec![row(&["2", "500", "G", "A", "rs30"])]);
        assert_eq!(stats.removed, 2);
    }

    #[test]
    fn merged_identifiers_are_replaced() {
        let store = CountingStore::new(&[
            &["4", "40", "rs40", "rs30"],
            &["5", "50", "rs50", "rs30"],
        ]);
        let rows = vec![
            row(&["1", "10", "A", "G", "rs50"]),
            row(&["1", "11", "A", "G", "rs7412"]),
            row(&["1", "12", "A", "G", "."]),
        ];
        let mut session = QuerySession::new(&store);
        let mut stats = AnnotationStats::default();
        let out = update_merged(rows, &COLS, &mut session, &AnnotateConfig::default(), &mut stats)
            .unwrap();
        assert_eq!(out[0][4], "rs30");
        assert_eq!(out[1][4], "rs7412");
        assert_eq!(out[2][4], ".");
        assert_eq!((stats.annotated, stats.unmatched, stats.unkeyed), (1, 1, 1));
        assert_eq!(store.calls.get(), 2);
    }
}
