//! Board regions tied to remote nodes.
//!
//! Each node owns a rectangular area of the board for bias injection and
//! pattern stamping. The default assignment walks the four quadrants in
//! order; any other assignment can be configured.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quadrant {
    Nw,
    Ne,
    Sw,
    Se,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::Nw, Quadrant::Ne, Quadrant::Sw, Quadrant::Se];

    /// The quadrant's rectangle on a `width × height` board. Odd extents give
    /// the extra column/row to the east/south half.
    pub fn region(self, width: usize, height: usize) -> Region {
        let west = width / 2;
        let north = height / 2;
        let (x, w) = match self {
            Quadrant::Nw | Quadrant::Sw => (0, west),
            Quadrant::Ne | Quadrant::Se => (west, width - west),
        };
        let (y, h) = match self {
            Quadrant::Nw | Quadrant::Ne => (0, north),
            Quadrant::Sw | Quadrant::Se => (north, height - north),
        };
        Region {
            x,
            y,
            width: w.max(1),
            height: h.max(1),
        }
    }
}

/// A rectangle of cells; coordinates inside it still wrap on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// Node index to quadrant assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionMap {
    quadrants: Vec<Quadrant>,
}

impl Default for RegionMap {
    fn default() -> Self {
        Self {
            quadrants: Quadrant::ALL.to_vec(),
        }
    }
}

impl RegionMap {
    pub fn new(quadrants: Vec<Quadrant>) -> Self {
        Self { quadrants }
    }

    pub fn is_empty(&self) -> bool {
        self.quadrants.is_empty()
    }

    /// Quadrant for `node`; the list repeats when there are more nodes than
    /// entries.
    pub fn quadrant(&self, node: usize) -> Option<Quadrant> {
        if self.quadrants.is_empty() {
            return None;
        }
        Some(self.quadrants[node % self.quadrants.len()])
    }

    pub fn region(&self, node: usize, width: usize, height: usize) -> Option<Region> {
        self.quadrant(node).map(|q| q.region(width, height))
    }
}

/// Default injection threshold; at or below it no bit is ever set.
pub const BIAS_EPSILON: f32 = 1e-3;

/// Regions that may receive extra live cells during the next advance.
#[derive(Clone, Debug)]
pub struct Bias {
    pub regions: Vec<Region>,
    /// Per-bit probability, the global injection scalar.
    pub injection: f32,
    /// Upper bound on bits set per region per generation.
    pub max_bits_per_region: u32,
    /// Injection at or below this is treated as zero.
    pub epsilon: f32,
}

impl Default for Bias {
    fn default() -> Self {
        Self::none()
    }
}

impl Bias {
    pub fn none() -> Self {
        Self::new(0.0, 0)
    }

    pub fn new(injection: f32, max_bits_per_region: u32) -> Self {
        Self {
            regions: Vec::new(),
            injection: injection.clamp(0.0, 1.0),
            max_bits_per_region,
            epsilon: BIAS_EPSILON,
        }
    }

    /// Use the same threshold as the stamp coupling.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon.max(0.0);
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Whether this bias can set any bit at all.
    pub fn is_active(&self) -> bool {
        !self.regions.is_empty() && self.max_bits_per_region > 0 && self.injection > self.epsilon
    }
}

#[cfg(test)]
mod tests {
    use super::{BIAS_EPSILON, Bias, Quadrant, Region, RegionMap};

    #[test]
    fn quadrants_tile_the_board() {
        let (w, h) = (33, 64);
        let mut covered = 0;
        for q in Quadrant::ALL {
            covered += q.region(w, h).area();
        }
        assert_eq!(covered, w * h);
        assert_eq!(
            Quadrant::Se.region(w, h),
            Region {
                x: 16,
                y: 32,
                width: 17,
                height: 32
            }
        );
    }

    #[test]
    fn region_map_wraps_node_index() {
        let map = RegionMap::new(vec![Quadrant::Se, Quadrant::Nw]);
        assert_eq!(map.quadrant(0), Some(Quadrant::Se));
        assert_eq!(map.quadrant(3), Some(Quadrant::Nw));
        assert_eq!(RegionMap::new(Vec::new()).quadrant(0), None);
    }

    #[test]
    fn bias_threshold_follows_epsilon() {
        let region = Quadrant::Nw.region(32, 64);
        let bias = Bias::new(0.005, 4).with_region(region);
        assert_eq!(bias.epsilon, BIAS_EPSILON);
        assert!(bias.is_active());
        assert!(!bias.clone().with_epsilon(0.01).is_active());
        assert!(!Bias::new(0.5, 4).is_active());
        assert!(!Bias::none().with_region(region).is_active());
    }
}
