//! Bit-parallel column kernel.
//!
//! Each output column is computed in one pass over three input words: the
//! column itself and its west/east neighbors (wrapped). Every bit lane of a
//! word is an independent cell, so a whole strip advances at once.
//!
//! Neighbor counting uses a fixed carry-save network over the eight neighbor
//! planes:
//!
//! ```text
//! (a0, a1) = full_add(west_above, west, west_below)     west column, 0..=3
//! (s0, s1) = half_add(above, below)                      own column, 0..=2
//! (b0, b1) = full_add(east_above, east, east_below)      east column, 0..=3
//! (t0, c0) = full_add(a0, s0, b0)                         ones
//! (u0, u1) = full_add(a1, s1, b1)                         twos
//! (t1, c1) = half_add(u0, c0)
//! (t2, _)  = half_add(u1, c1)
//! count    = t0 + 2*t1 + 4*t2  (+8 for the dropped carry)
//! ```
//!
//! A count of 2 or 3 is exactly `t1 & !t2`; 8 drops into the carry and leaves
//! `t1 == 0`. The next state is `(2|3) & (t0 | self)`.

use rayon::prelude::*;

use super::board::ColumnWord;

/// Columns per parallel work item.
pub const PARALLEL_CHUNK_COLUMNS: usize = 64;

#[inline(always)]
fn full_add<W: ColumnWord>(a: W, b: W, c: W) -> (W, W) {
    let sum = a ^ b ^ c;
    let carry = (a & b) | (b & c) | (a & c);
    (sum, carry)
}

#[inline(always)]
fn half_add<W: ColumnWord>(a: W, b: W) -> (W, W) {
    (a ^ b, a & b)
}

/// Three-row sum of a neighboring column as a 2-bit count.
#[inline(always)]
fn side_sum<W: ColumnWord>(column: W) -> (W, W) {
    full_add(column.rows_above(), column, column.rows_below())
}

/// Next state of `column` given its west and east neighbors.
#[inline(always)]
pub fn next_column<W: ColumnWord>(west: W, column: W, east: W) -> W {
    let (a0, a1) = side_sum(west);
    let (s0, s1) = half_add(column.rows_above(), column.rows_below());
    let (b0, b1) = side_sum(east);
    let (t0, c0) = full_add(a0, s0, b0);
    let (u0, u1) = full_add(a1, s1, b1);
    let (t1, c1) = half_add(u0, c0);
    let (t2, _) = half_add(u1, c1);

    let two_or_three = t1 & !t2;
    two_or_three & (t0 | column)
}

/// Advance `out`, which holds the columns starting at `first` of the next
/// generation, reading from the full `current` board.
#[inline]
pub fn advance_span<W: ColumnWord>(current: &[W], out: &mut [W], first: usize) {
    let width = current.len();
    debug_assert!(first + out.len() <= width);
    for (offset, slot) in out.iter_mut().enumerate() {
        let x = first + offset;
        let west = current[(x + width - 1) % width];
        let east = current[(x + 1) % width];
        *slot = next_column(west, current[x], east);
    }
}

/// Advance every column serially.
pub fn advance_serial<W: ColumnWord>(current: &[W], next: &mut [W]) {
    debug_assert_eq!(current.len(), next.len());
    advance_span(current, next, 0);
}

/// Advance every column with rayon, chunked by `PARALLEL_CHUNK_COLUMNS`.
/// Must be called inside the engine's pool.
pub fn advance_parallel<W: ColumnWord>(current: &[W], next: &mut [W]) {
    debug_assert_eq!(current.len(), next.len());
    next.par_chunks_mut(PARALLEL_CHUNK_COLUMNS)
        .enumerate()
        .for_each(|(chunk, out)| {
            advance_span(current, out, chunk * PARALLEL_CHUNK_COLUMNS);
        });
}
