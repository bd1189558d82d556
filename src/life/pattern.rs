//! Seed patterns stamped into the board by entropy coupling.

/// Cells of a glider heading toward +x/+y, relative to its origin.
const GLIDER: [(i64, i64); 5] = [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)];
const BLOCK: [(i64, i64); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Side of the square scattered by [`SeedPattern::Sparse`].
pub const SPARSE_SIDE: i64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeedPattern {
    /// Short diagonal mover.
    Glider,
    /// Symmetric 2×2 still life.
    Block,
    /// Point noise: one cell per set bit of a 16-bit mask over a 4×4 square.
    Sparse,
}

impl SeedPattern {
    pub const ALL: [SeedPattern; 3] = [SeedPattern::Glider, SeedPattern::Block, SeedPattern::Sparse];

    /// Pick a pattern from a two-bit selector.
    pub fn from_selector(selector: u16) -> Self {
        Self::ALL[selector as usize % Self::ALL.len()]
    }
}

/// A placed pattern, ready to stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub pattern: SeedPattern,
    pub origin: (i64, i64),
    /// Mirror the glider horizontally / vertically.
    pub flip_x: bool,
    pub flip_y: bool,
    /// Cell mask for `Sparse`.
    pub mask: u16,
}

impl Stamp {
    /// Board offsets (before wrapping) of every cell this stamp sets.
    pub fn cells(&self) -> Vec<(i64, i64)> {
        let (ox, oy) = self.origin;
        match self.pattern {
            SeedPattern::Glider => GLIDER
                .iter()
                .map(|&(dx, dy)| {
                    let dx = if self.flip_x { 2 - dx } else { dx };
                    let dy = if self.flip_y { 2 - dy } else { dy };
                    (ox + dx, oy + dy)
                })
                .collect(),
            SeedPattern::Block => BLOCK.iter().map(|&(dx, dy)| (ox + dx, oy + dy)).collect(),
            SeedPattern::Sparse => (0..16)
                .filter(|bit| (self.mask >> bit) & 1 == 1)
                .map(|bit| (ox + bit % SPARSE_SIDE, oy + bit / SPARSE_SIDE))
                .collect(),
        }
    }
}
