//! Level sizes of a multigrid hierarchy.

use glam::UVec2;

use crate::error::{Result, SolverError};

/// Grid sizes from the finest level (0) down to the coarsest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Depth {
    depths: Vec<UVec2>,
}

impl Depth {
    /// Levels are halved while both dimensions exceed this.
    pub const MIN_SIZE: u32 = 16;

    /// Every level that gets halved must have even dimensions.
    pub fn new(size: UVec2) -> Result<Self> {
        let mut depths = vec![size];
        let mut s = size;
        while s.x > Self::MIN_SIZE && s.y > Self::MIN_SIZE {
            if s.x % 2 != 0 || s.y % 2 != 0 {
                return Err(SolverError::InvalidMultigridSize {
                    width: size.x,
                    height: size.y,
                });
            }
            s /= 2;
            depths.push(s);
        }
        Ok(Self { depths })
    }

    /// Index of the coarsest level.
    pub fn max_depth(&self) -> usize {
        self.depths.len() - 1
    }

    /// Size of level `depth`; panics when out of range.
    pub fn depth_size(&self, depth: usize) -> UVec2 {
        self.depths[depth]
    }

    pub fn iter(&self) -> impl Iterator<Item = UVec2> + '_ {
        self.depths.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn square_256_has_four_coarse_levels() {
        let depth = Depth::new(UVec2::splat(256)).unwrap();
        assert_eq!(depth.max_depth(), 4);
        assert_eq!(depth.depth_size(4), UVec2::splat(16));
    }

    #[test]
    fn small_grid_has_no_coarse_levels() {
        let depth = Depth::new(UVec2::new(16, 64)).unwrap();
        assert_eq!(depth.max_depth(), 0);
    }

    #[test]
    fn odd_dimension_is_rejected() {
        assert!(matches!(
            Depth::new(UVec2::new(250, 250)),
            Err(SolverError::InvalidMultigridSize { width: 250, height: 250 })
        ));
    }

    #[test]
    fn stops_when_one_side_reaches_minimum() {
        let depth = Depth::new(UVec2::new(128, 32)).unwrap();
        assert_eq!(depth.iter().collect::<Vec<_>>(), vec![UVec2::new(128, 32), UVec2::new(64, 16)]);
    }

    proptest! {
        #[test]
        fn each_level_halves_the_previous(x in 1u32..12, y in 1u32..12, sx in 0u32..5, sy in 0u32..5) {
            let size = UVec2::new(x << sx, y << sy) * 16;
            if let Ok(depth) = Depth::new(size) {
                let levels: Vec<_> = depth.iter().collect();
                for pair in levels.windows(2) {
                    prop_assert_eq!(pair[1] * 2, pair[0]);
                }
                let last = levels[levels.len() - 1];
                prop_assert!(last.x <= Depth::MIN_SIZE || last.y <= Depth::MIN_SIZE);
            }
        }
    }
}
