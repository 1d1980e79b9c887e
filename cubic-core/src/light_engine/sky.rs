//! Vertical sky light pass for freshly materialized cubes.

use cubic_utils::{CUBE_SIZE, CubeCoord, LocalPos};

use super::{direction::Direction, propagation::attenuate};
use crate::{
    block::{BlockProperties, MAX_LIGHT},
    cache::ResidentCubes,
    cube::{Cube, LightField},
};

const COLUMNS: usize = CUBE_SIZE * CUBE_SIZE;

/// Sky light entering the top face of a cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkyEntry {
    /// Full sky light on every column.
    Open,
    /// Copied from the bottom row of the resident cube above, indexed `z * 16 + x`.
    FromAbove(Box<[u8; COLUMNS]>),
    /// Nothing known yet. Fixed up once the cube above materializes.
    Deferred,
}

impl SkyEntry {
    /// Works out what enters the cube at `coord` given what is resident.
    #[must_use]
    pub fn resolve(resident: &ResidentCubes, coord: CubeCoord, open_sky_cube_y: i32) -> Self {
        if coord.0.y >= open_sky_cube_y || !resident.has_cube_above(coord) {
            return Self::Open;
        }
        let Some(above) = resident.get(coord.offset(0, 1, 0)) else {
            return Self::Deferred;
        };
        let mut row = Box::new([0; COLUMNS]);
        above.with_light(LightField::Sky, |light| {
            for (index, level) in row.iter_mut().enumerate() {
                *level = light.get(LocalPos::new(index % CUBE_SIZE, 0, index / CUBE_SIZE));
            }
        });
        Self::FromAbove(row)
    }

    fn level(&self, x: usize, z: usize) -> u8 {
        match self {
            Self::Open => MAX_LIGHT,
            Self::FromAbove(row) => row[z * CUBE_SIZE + x],
            Self::Deferred => 0,
        }
    }
}

/// Fills every column of `cube` from the top down.
///
/// Returns false when the cube came out uniformly lit, in which case there is
/// nothing left to spread sideways.
pub fn fill_columns(cube: &Cube, blocks: &dyn BlockProperties, entry: &SkyEntry) -> bool {
    let uniform = cube.with_blocks(|storage| storage.uniform_state());

    let open_air = *entry == SkyEntry::Open
        && uniform.is_some_and(|state| blocks.is_air(state) && blocks.opacity(state) == 0);
    if open_air {
        cube.with_light_mut(LightField::Sky, |light| light.fill(MAX_LIGHT));
        return false;
    }
    if *entry == SkyEntry::Deferred {
        cube.with_light_mut(LightField::Sky, |light| light.fill(0));
        return false;
    }

    let opacity: Vec<u8> = cube.with_blocks(|storage| {
        LocalPos::all()
            .map(|pos| blocks.opacity(uniform.unwrap_or_else(|| storage.get(pos))))
            .collect()
    });

    cube.with_light_mut(LightField::Sky, |light| {
        for z in 0..CUBE_SIZE {
            for x in 0..CUBE_SIZE {
                let mut level = entry.level(x, z);
                for y in (0..CUBE_SIZE).rev() {
                    let pos = LocalPos::new(x, y, z);
                    level = attenuate(LightField::Sky, level, Direction::Down, opacity[pos.index()]);
                    light.set(pos, level);
                }
            }
        }
        light.compact();
    });
    true
}
