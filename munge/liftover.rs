//! Coordinate transform between genome assemblies. Only the interface and the driver
//! live here; an actual chain-file lifter is supplied by the caller.

use crate::identity::{is_valid_chromosome, is_valid_position};
use crate::types::SumstatTable;
use log::info;

/// Maps one (chromosome, position) to the target assembly, `None` if unmappable.
pub trait CoordinateLifter {
    fn lift(&self, chrom: u8, pos: u32) -> Option<(u8, u32)>;
}

impl<F> CoordinateLifter for F
where
    F: Fn(u8, u32) -> Option<(u8, u32)>,
{
    fn lift(&self, chrom: u8, pos: u32) -> Option<(u8, u32)> {
        self(chrom, pos)
    }
}

/// Lifts every row, drops rows that fail to map or land outside the valid chromosome
/// and position ranges, then restores (chromosome, position) order. Returns the number
/// of rows dropped.
pub fn liftover_table(table: &mut SumstatTable, lifter: &dyn CoordinateLifter) -> usize {
    let before = table.len();
    table.rows.retain_mut(|row| match lifter.lift(row.chrom, row.pos) {
        Some((chrom, pos)) if is_valid_chromosome(chrom) && is_valid_position(pos) => {
            row.chrom = chrom;
            row.pos = pos;
            true
        }
        _ => false,
    });
    table.sort_by_position();
    let dropped = before - table.len();
    info!("Liftover kept {} of {before} rows.", table.len());
    dropped
}
