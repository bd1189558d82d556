//! Turns accepted node reports into pattern stamps on the board.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::life::{Region, RegionMap, SPARSE_SIDE, SeedPattern, Stamp};
use crate::link::NodeSlot;

pub struct EntropyCoupling {
    regions: RegionMap,
    epsilon: f32,
    selector_shift: u32,
    rng: StdRng,
    fired: u64,
}

impl EntropyCoupling {
    pub fn new(regions: RegionMap, epsilon: f32, selector_shift: u32, seed: u64) -> Self {
        Self {
            regions,
            epsilon,
            selector_shift: selector_shift.min(14),
            rng: StdRng::seed_from_u64(seed),
            fired: 0,
        }
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Stamps produced so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Decide whether `node` perturbs the board this round.
    ///
    /// Only a valid slot can fire, only when `injection` exceeds epsilon, and
    /// then with probability `injection`. Two bitmask bits at
    /// `selector_shift` pick the pattern; the rest of the mask, mixed with
    /// the rng, places it inside the node's region.
    pub fn couple(
        &mut self,
        node: usize,
        slot: &NodeSlot,
        injection: f32,
        width: usize,
        height: usize,
    ) -> Option<Stamp> {
        if !slot.valid || injection <= self.epsilon {
            return None;
        }
        if self.rng.random::<f32>() >= injection {
            return None;
        }
        let region = self.regions.region(node, width, height)?;

        let mask = slot.bitmask;
        let pattern = SeedPattern::from_selector((mask >> self.selector_shift) & 0b11);
        let mix = u32::from(mask).rotate_left(16) ^ self.rng.random::<u32>();
        let origin = place(region, mix);
        let stamp = Stamp {
            pattern,
            origin,
            flip_x: mask & 0b01 != 0,
            flip_y: mask & 0b10 != 0,
            mask: match mask ^ self.rng.random::<u16>() {
                0 => 1,
                m => m,
            },
        };
        self.fired += 1;
        Some(stamp)
    }
}

/// Origin inside `region`, leaving room for the widest pattern where the
/// region allows it.
fn place(region: Region, mix: u32) -> (i64, i64) {
    let side = SPARSE_SIDE as usize;
    let span_x = region.width.saturating_sub(side - 1).max(1);
    let span_y = region.height.saturating_sub(side - 1).max(1);
    let x = region.x + (mix & 0xFFFF) as usize % span_x;
    let y = region.y + (mix >> 16) as usize % span_y;
    (x as i64, y as i64)
}

#[cfg(test)]
mod tests {
    use super::EntropyCoupling;
    use crate::life::{Quadrant, RegionMap, SeedPattern};
    use crate::link::NodeSlot;

    fn slot(bitmask: u16) -> NodeSlot {
        NodeSlot {
            valid: true,
            bitmask,
            ..NodeSlot::default()
        }
    }

    #[test]
    fn invalid_slot_or_low_injection_never_fires() {
        let mut coupling = EntropyCoupling::new(RegionMap::default(), 0.01, 4, 1);
        let mut offline = slot(0xFFFF);
        offline.valid = false;
        for _ in 0..100 {
            assert!(coupling.couple(0, &offline, 1.0, 64, 64).is_none());
            assert!(coupling.couple(0, &slot(0xFFFF), 0.01, 64, 64).is_none());
        }
        assert_eq!(coupling.fired(), 0);
    }

    #[test]
    fn full_injection_always_fires_inside_region() {
        let mut coupling = EntropyCoupling::new(RegionMap::default(), 0.01, 4, 9);
        let region = Quadrant::Sw.region(64, 64);
        for mask in 0..200u16 {
            let stamp = coupling.couple(2, &slot(mask), 1.0, 64, 64).expect("fires");
            let (x, y) = stamp.origin;
            assert!(region.contains(x as usize, y as usize), "{stamp:?}");
            assert_ne!(stamp.mask, 0);
        }
        assert_eq!(coupling.fired(), 200);
    }

    #[test]
    fn selector_bits_choose_pattern() {
        let mut coupling = EntropyCoupling::new(RegionMap::default(), 0.0, 4, 2);
        let pick = |c: &mut EntropyCoupling, mask| {
            c.couple(0, &slot(mask), 1.0, 32, 64)
                .expect("fires")
                .pattern
        };
        assert_eq!(pick(&mut coupling, 0x0000), SeedPattern::Glider);
        assert_eq!(pick(&mut coupling, 0x0010), SeedPattern::Block);
        assert_eq!(pick(&mut coupling, 0x0020), SeedPattern::Sparse);
        assert_eq!(pick(&mut coupling, 0x0030), SeedPattern::Glider);
    }

    #[test]
    fn empty_region_map_disables_coupling() {
        let mut coupling = EntropyCoupling::new(RegionMap::new(Vec::new()), 0.0, 4, 2);
        assert!(coupling.couple(0, &slot(1), 1.0, 32, 64).is_none());
    }
}
