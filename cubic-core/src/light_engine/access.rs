//! How propagation reaches voxel data.
//!
//! Propagation never looks cubes up itself; it goes through a [`LightAccess`].
//! A position whose cube isn't reachable reads as `None`, which truncates
//! propagation at that boundary.

use std::{cell::RefCell, sync::Arc};

use cubic_utils::{BlockPos, BlockStateId, CubeCoord};

use crate::{
    cache::ResidentCubes,
    cube::{Cube, LightField},
};

/// Voxel access used by the propagator.
pub trait LightAccess {
    /// Runs `f` on the cube at `coord` if it is reachable.
    fn with_cube<R>(&self, coord: CubeCoord, f: impl FnOnce(&Cube) -> R) -> Option<R>;

    /// Whether sky light enters `coord` from above unobstructed when the cube
    /// above isn't reachable.
    fn is_open_sky(&self, coord: CubeCoord) -> bool;

    /// Reads one light value.
    fn get_light(&self, field: LightField, pos: BlockPos) -> Option<u8> {
        self.with_cube(pos.cube_coord(), |cube| cube.get_light(field, pos.local()))
    }

    /// Overwrites one light value.
    fn set_light(&self, field: LightField, pos: BlockPos, level: u8) -> Option<bool> {
        self.with_cube(pos.cube_coord(), |cube| cube.set_light(field, pos.local(), level))
    }

    /// Reads one block state.
    fn block_state(&self, pos: BlockPos) -> Option<BlockStateId> {
        self.with_cube(pos.cube_coord(), |cube| cube.get_block(pos.local()))
    }

    /// Sky light arriving at `pos` from the voxel above.
    ///
    /// Falls back to the open sky rule when the voxel above isn't reachable.
    fn sky_from_above(&self, pos: BlockPos) -> u8 {
        self.get_light(LightField::Sky, pos.offset(0, 1, 0))
            .unwrap_or_else(|| self.outside_sky(pos))
    }

    /// Sky light arriving at `pos` from outside the reachable world.
    ///
    /// Only top row voxels of a cube without a reachable cube above can have
    /// such a source. Everything else returns 0.
    fn outside_sky(&self, pos: BlockPos) -> u8 {
        let above = pos.offset(0, 1, 0);
        let coord = pos.cube_coord();
        if above.cube_coord() == coord || self.with_cube(above.cube_coord(), |_| ()).is_some() {
            return 0;
        }
        if self.is_open_sky(coord) { 15 } else { 0 }
    }
}

/// Access limited to one cube, used to light a cube before it is published.
pub struct SingleCubeAccess<'a> {
    cube: &'a Cube,
    open_sky: bool,
}

impl<'a> SingleCubeAccess<'a> {
    /// Creates access to `cube` alone.
    #[must_use]
    pub fn new(cube: &'a Cube, open_sky: bool) -> Self {
        Self { cube, open_sky }
    }
}

impl LightAccess for SingleCubeAccess<'_> {
    fn with_cube<R>(&self, coord: CubeCoord, f: impl FnOnce(&Cube) -> R) -> Option<R> {
        (coord == self.cube.coord()).then(|| f(self.cube))
    }

    fn is_open_sky(&self, coord: CubeCoord) -> bool {
        coord == self.cube.coord() && self.open_sky
    }
}

/// Two entry cache of recently resolved cubes.
///
/// Propagation mostly stays inside one cube and occasionally steps into a
/// neighbor, so two slots catch nearly every lookup.
#[derive(Debug, Default)]
pub struct CubeLookupCache {
    slots: [Option<(CubeCoord, Arc<Cube>)>; 2],
    /// Index of the most recently used slot.
    recent: usize,
}

impl CubeLookupCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached cube for `coord`.
    pub fn get(&mut self, coord: CubeCoord) -> Option<&Arc<Cube>> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|(c, _)| *c == coord))?;
        self.recent = index;
        self.slots[index].as_ref().map(|(_, cube)| cube)
    }

    /// Caches `cube`, replacing the least recently used slot.
    pub fn insert(&mut self, cube: Arc<Cube>) -> &Arc<Cube> {
        let index = 1 - self.recent;
        self.recent = index;
        let slot = self.slots[index].insert((cube.coord(), cube));
        &slot.1
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.slots = [None, None];
        self.recent = 0;
    }
}

/// Access to every resident cube.
pub struct WorldLightAccess<'a> {
    resident: &'a ResidentCubes,
    open_sky_cube_y: i32,
    lookup: RefCell<CubeLookupCache>,
}

impl<'a> WorldLightAccess<'a> {
    /// Creates access over the resident set.
    #[must_use]
    pub fn new(resident: &'a ResidentCubes, open_sky_cube_y: i32) -> Self {
        Self {
            resident,
            open_sky_cube_y,
            lookup: RefCell::new(CubeLookupCache::new()),
        }
    }
}

impl LightAccess for WorldLightAccess<'_> {
    fn with_cube<R>(&self, coord: CubeCoord, f: impl FnOnce(&Cube) -> R) -> Option<R> {
        let mut lookup = self.lookup.borrow_mut();
        if let Some(cube) = lookup.get(coord) {
            return Some(f(cube));
        }
        let cube = self.resident.get(coord)?;
        Some(f(lookup.insert(cube)))
    }

    fn is_open_sky(&self, coord: CubeCoord) -> bool {
        coord.0.y >= self.open_sky_cube_y || !self.resident.has_cube_above(coord)
    }
}
