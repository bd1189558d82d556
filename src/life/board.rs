//! Board storage for the toroidal automaton.
//!
//! The grid is a vector of column words. Bit `r` of column `x` is the cell at
//! `(x, r)`; the extent is `columns × W::BITS` and every coordinate wraps on
//! both axes.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, BitXor, Not};

use rand::Rng;

/// A fixed-width unsigned word holding one vertical strip of cells.
pub trait ColumnWord:
    Copy
    + Default
    + Eq
    + Send
    + Sync
    + fmt::Debug
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + Not<Output = Self>
    + BitOrAssign
{
    const BITS: u32;
    const ZERO: Self;

    /// Plane of the row above each cell: bit `r` holds row `r + 1`.
    fn rows_above(self) -> Self;
    /// Plane of the row below each cell: bit `r` holds row `r - 1`.
    fn rows_below(self) -> Self;
    fn count_ones(self) -> u32;
    fn bit(self, row: usize) -> bool;
    fn single(row: usize) -> Self;
    /// Truncating conversion used for random fills.
    fn from_bits(bits: u64) -> Self;
    /// Fold the word into a 32-bit multiply-xor accumulator, low half first.
    fn fold_hash(self, hash: u32) -> u32;
}

pub(crate) const HASH_PRIME: u32 = 0x0100_0193;

macro_rules! impl_column_word {
    ($ty:ty) => {
        impl ColumnWord for $ty {
            const BITS: u32 = <$ty>::BITS;
            const ZERO: Self = 0;

            #[inline(always)]
            fn rows_above(self) -> Self {
                self.rotate_right(1)
            }

            #[inline(always)]
            fn rows_below(self) -> Self {
                self.rotate_left(1)
            }

            #[inline(always)]
            fn count_ones(self) -> u32 {
                <$ty>::count_ones(self)
            }

            #[inline(always)]
            fn bit(self, row: usize) -> bool {
                (self >> row) & 1 != 0
            }

            #[inline(always)]
            fn single(row: usize) -> Self {
                1 << row
            }

            #[inline(always)]
            fn from_bits(bits: u64) -> Self {
                bits as $ty
            }

            #[inline]
            fn fold_hash(self, mut hash: u32) -> u32 {
                let mut word = self as u64;
                for _ in 0..(<$ty>::BITS / 32) {
                    hash = (hash ^ (word as u32)).wrapping_mul(HASH_PRIME);
                    word >>= 32;
                }
                hash
            }
        }
    };
}

impl_column_word!(u32);
impl_column_word!(u64);

#[derive(Clone, PartialEq, Eq)]
pub struct Board<W: ColumnWord = u64> {
    columns: Vec<W>,
}

impl<W: ColumnWord> Board<W> {
    /// An empty board. A zero column count is raised to one.
    pub fn new(columns: usize) -> Self {
        Self {
            columns: vec![W::ZERO; columns.max(1)],
        }
    }

    pub fn from_columns(columns: Vec<W>) -> Self {
        if columns.is_empty() {
            return Self::new(1);
        }
        Self { columns }
    }

    /// Build a board from text rows (`#` live, anything else dead).
    ///
    /// Row `i` of the text becomes board row `i`; the width is the longest
    /// row. Returns `None` when there are more rows than `W::BITS`.
    pub fn from_rows(rows: &[&str]) -> Option<Self> {
        if rows.len() > W::BITS as usize {
            return None;
        }
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(1);
        let mut board = Self::new(width);
        for (y, row) in rows.iter().enumerate() {
            for (x, byte) in row.bytes().enumerate() {
                if byte == b'#' {
                    board.columns[x] |= W::single(y);
                }
            }
        }
        Some(board)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub const fn height() -> usize {
        W::BITS as usize
    }

    #[inline]
    pub fn columns(&self) -> &[W] {
        &self.columns
    }

    /// Exchange the column storage with a scratch buffer of the same width.
    #[inline]
    pub(crate) fn swap_columns(&mut self, other: &mut Vec<W>) {
        debug_assert_eq!(self.columns.len(), other.len());
        std::mem::swap(&mut self.columns, other);
    }

    /// Reduce a signed coordinate to its toroidal position.
    #[inline]
    pub fn wrap(&self, x: i64, y: i64) -> (usize, usize) {
        (
            x.rem_euclid(self.columns.len() as i64) as usize,
            y.rem_euclid(W::BITS as i64) as usize,
        )
    }

    pub fn get(&self, x: i64, y: i64) -> bool {
        let (x, y) = self.wrap(x, y);
        self.columns[x].bit(y)
    }

    pub fn set(&mut self, x: i64, y: i64, alive: bool) {
        let (x, y) = self.wrap(x, y);
        let mask = W::single(y);
        let column = &mut self.columns[x];
        if alive {
            *column = *column | mask;
        } else {
            *column = *column & !mask;
        }
    }

    pub fn population(&self) -> u64 {
        self.columns.iter().map(|c| c.count_ones() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(|&c| c == W::ZERO)
    }

    pub fn clear(&mut self) {
        self.columns.fill(W::ZERO);
    }

    /// Replace every column with random bits at roughly `density`.
    pub fn fill_random<R: Rng + ?Sized>(&mut self, rng: &mut R, density: f64) {
        let density = density.clamp(0.0, 1.0);
        for column in &mut self.columns {
            let mut word = W::ZERO;
            for row in 0..W::BITS as usize {
                if rng.random::<f64>() < density {
                    word |= W::single(row);
                }
            }
            *column = word;
        }
    }

    pub fn for_each_live<F: FnMut(usize, usize)>(&self, mut f: F) {
        for (x, &column) in self.columns.iter().enumerate() {
            for y in 0..W::BITS as usize {
                if column.bit(y) {
                    f(x, y);
                }
            }
        }
    }
}

impl<W: ColumnWord> fmt::Debug for Board<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Board {}x{}", self.width(), W::BITS)?;
        for y in 0..W::BITS as usize {
            for column in &self.columns {
                f.write_str(if column.bit(y) { "#" } else { "." })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
