use cubic_utils::{BlockStateId, CUBE_SIZE, LocalPos};

use crate::cube::Cube;

use super::CubeGenerator;

/// A generator that produces flat ground.
///
/// Everything at or above `surface_y` is air. Directly below it come
/// `layers` from the top down, and everything deeper is `base`.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    surface_y: i32,
    layers: Vec<BlockStateId>,
    base: BlockStateId,
}

impl FlatGenerator {
    /// Creates a new `FlatGenerator`.
    #[must_use]
    pub fn new(surface_y: i32, layers: Vec<BlockStateId>, base: BlockStateId) -> Self {
        Self {
            surface_y,
            layers,
            base,
        }
    }

    /// The block at world height `y`.
    #[must_use]
    pub fn block_at_height(&self, y: i32) -> BlockStateId {
        if y >= self.surface_y {
            return BlockStateId::AIR;
        }
        let depth = (self.surface_y - 1 - y) as usize;
        self.layers.get(depth).copied().unwrap_or(self.base)
    }
}

impl CubeGenerator for FlatGenerator {
    fn populate(&self, cube: &mut Cube) -> anyhow::Result<()> {
        let min_y = cube.coord().origin().0.y;
        if min_y >= self.surface_y {
            return Ok(());
        }
        let blocks = cube.blocks_mut();
        if min_y + CUBE_SIZE as i32 <= self.surface_y - self.layers.len() as i32 {
            blocks.fill(self.base);
            return Ok(());
        }

        for y in 0..CUBE_SIZE {
            let state = self.block_at_height(min_y + y as i32);
            if state == BlockStateId::AIR {
                continue;
            }
            for z in 0..CUBE_SIZE {
                for x in 0..CUBE_SIZE {
                    blocks.set(LocalPos::new(x, y, z), state);
                }
            }
        }
        Ok(())
    }
}
