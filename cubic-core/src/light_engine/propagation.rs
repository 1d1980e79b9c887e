//! Breadth-first light propagation and two-phase removal.

use cubic_utils::BlockPos;

use super::{
    access::LightAccess, direction::Direction, light_queue::LightQueue, queue_entry::QueueEntry,
};
use crate::{
    block::{BlockProperties, MAX_LIGHT},
    cube::LightField,
};

/// Light reaching a voxel of `opacity` when stepping from `level` in `dir`.
///
/// Full sky light falls straight down through transparent voxels without
/// loss. Every other step costs at least one level.
#[must_use]
#[inline]
pub fn attenuate(field: LightField, level: u8, dir: Direction, opacity: u8) -> u8 {
    if field == LightField::Sky && dir == Direction::Down && level == MAX_LIGHT && opacity == 0 {
        level
    } else {
        level.saturating_sub(opacity.max(1))
    }
}

/// Flood fill over one light field.
///
/// Queue work with the `enqueue_*` methods, then call [`run`](Self::run).
/// Decreases always run before increases.
pub struct LightPropagator<'a, A: LightAccess> {
    access: &'a A,
    blocks: &'a dyn BlockProperties,
    field: LightField,
    increases: LightQueue,
    decreases: LightQueue,
    changed: usize,
}

impl<'a, A: LightAccess> LightPropagator<'a, A> {
    /// Creates a propagator for `field`.
    pub fn new(access: &'a A, blocks: &'a dyn BlockProperties, field: LightField) -> Self {
        Self {
            access,
            blocks,
            field,
            increases: LightQueue::new(),
            decreases: LightQueue::new(),
            changed: 0,
        }
    }

    /// Number of voxel writes performed so far.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.changed
    }

    /// Whether work is queued.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.increases.is_empty() || !self.decreases.is_empty()
    }

    /// Injects `level` at `pos`.
    pub fn enqueue_source(&mut self, pos: BlockPos, level: u8) {
        if level > 0 {
            self.increases.enqueue(pos, QueueEntry::increase_from_source(level));
        }
    }

    /// Re-spreads whatever `pos` currently holds in every direction.
    pub fn enqueue_spread(&mut self, pos: BlockPos) {
        if let Some(level) = self.access.get_light(self.field, pos).filter(|l| *l > 0) {
            self.increases.enqueue(pos, QueueEntry::increase_all_directions(level));
        }
    }

    /// Spreads whatever `pos` currently holds one step in `dir`.
    pub fn enqueue_toward(&mut self, pos: BlockPos, dir: Direction) {
        if let Some(level) = self.access.get_light(self.field, pos).filter(|l| *l > 0) {
            self.increases.enqueue(pos, QueueEntry::increase_only_one_direction(level, dir));
        }
    }

    /// Zeroes `pos` and queues removal of everything that depended on it.
    ///
    /// Whatever `pos` produces on its own is queued again right away.
    pub fn enqueue_removal(&mut self, pos: BlockPos) {
        let Some(level) = self.access.get_light(self.field, pos) else {
            return;
        };
        if level > 0 {
            if self.access.set_light(self.field, pos, 0) == Some(true) {
                self.changed += 1;
            }
            self.decreases.enqueue(pos, QueueEntry::decrease_all_directions(level));
        }
        self.reseed_own_sources(pos);
    }

    /// Runs all queued work.
    pub fn run(&mut self) {
        self.propagate_decreases();
        self.propagate_increases();
    }

    /// Queues the light a voxel produces on its own, after it was zeroed.
    fn reseed_own_sources(&mut self, pos: BlockPos) {
        match self.field {
            LightField::Block => {
                let emission = self
                    .access
                    .block_state(pos)
                    .map_or(0, |state| self.blocks.light_emission(state));
                self.enqueue_source(pos, emission);
            }
            LightField::Sky => {
                let entering = self.access.outside_sky(pos);
                if entering > 0 {
                    let opacity = self
                        .access
                        .block_state(pos)
                        .map_or(MAX_LIGHT, |state| self.blocks.opacity(state));
                    let level = attenuate(LightField::Sky, entering, Direction::Down, opacity);
                    self.enqueue_source(pos, level);
                }
            }
        }
    }

    /// First phase of removal.
    ///
    /// Zeroes every voxel that was lit through a removed voxel and collects
    /// the brighter voxels on the frontier as seeds for the increase phase.
    pub fn propagate_decreases(&mut self) {
        while let Some((pos, entry)) = self.decreases.dequeue() {
            let level = entry.level();
            for dir in Direction::ALL {
                if !entry.should_propagate(dir) {
                    continue;
                }
                let neighbor = dir.relative(pos);
                let Some(neighbor_level) = self.access.get_light(self.field, neighbor) else {
                    continue;
                };
                if neighbor_level == 0 {
                    continue;
                }

                let depends = neighbor_level < level
                    || (self.field == LightField::Sky
                        && dir == Direction::Down
                        && level == MAX_LIGHT
                        && neighbor_level == MAX_LIGHT);

                if depends {
                    if self.access.set_light(self.field, neighbor, 0) == Some(true) {
                        self.changed += 1;
                    }
                    let entry =
                        QueueEntry::decrease_skip_one_direction(neighbor_level, dir.opposite());
                    self.decreases.enqueue(neighbor, entry);
                    self.reseed_own_sources(neighbor);
                } else {
                    self.increases
                        .enqueue(neighbor, QueueEntry::increase_all_directions(neighbor_level));
                }
            }
        }
    }

    /// Flood fills queued increases. Light only ever goes up here.
    pub fn propagate_increases(&mut self) {
        let field = self.field;
        let blocks = self.blocks;

        while let Some((pos, entry)) = self.increases.dequeue() {
            let level = entry.level();

            if entry.is_source() {
                let Some(current) = self.access.get_light(field, pos) else {
                    continue;
                };
                if current > level {
                    continue;
                }
                let raised = current < level
                    && self
                        .access
                        .with_cube(pos.cube_coord(), |cube| {
                            cube.raise_light(field, pos.local(), level)
                        })
                        .unwrap_or(false);
                if raised {
                    self.changed += 1;
                }
            } else if self.access.get_light(field, pos) != Some(level) {
                // Overwritten since it was queued.
                continue;
            }

            for dir in Direction::ALL {
                if !entry.should_propagate(dir) {
                    continue;
                }
                let neighbor = dir.relative(pos);
                let raised = self
                    .access
                    .with_cube(neighbor.cube_coord(), |cube| {
                        let local = neighbor.local();
                        let opacity = blocks.opacity(cube.get_block(local));
                        let candidate = attenuate(field, level, dir, opacity);
                        let raised = candidate > 0 && cube.raise_light(field, local, candidate);
                        raised.then_some(candidate)
                    })
                    .flatten();

                if let Some(candidate) = raised {
                    self.changed += 1;
                    let entry = QueueEntry::increase_skip_one_direction(candidate, dir.opposite());
                    self.increases.enqueue(neighbor, entry);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cubic_utils::{CubeCoord, LocalPos};

    use super::*;
    use crate::{
        block::BlockTable,
        cube::Cube,
        light_engine::access::SingleCubeAccess,
    };

    fn block_light(cube: &Cube, x: usize, y: usize, z: usize) -> u8 {
        cube.get_light(LightField::Block, LocalPos::new(x, y, z))
    }

    #[test]
    fn test_attenuate() {
        assert_eq!(attenuate(LightField::Sky, 15, Direction::Down, 0), 15);
        assert_eq!(attenuate(LightField::Sky, 15, Direction::North, 0), 14);
        assert_eq!(attenuate(LightField::Sky, 14, Direction::Down, 0), 13);
        assert_eq!(attenuate(LightField::Block, 15, Direction::Down, 0), 14);
        assert_eq!(attenuate(LightField::Sky, 15, Direction::Down, 2), 13);
        assert_eq!(attenuate(LightField::Block, 3, Direction::Up, 15), 0);
    }

    #[test]
    fn test_point_source_stays_inside_cube() {
        let table = BlockTable::standard();
        let cube = Cube::new(CubeCoord::new(0, 0, 0));
        let access = SingleCubeAccess::new(&cube, false);
        let mut propagator = LightPropagator::new(&access, &table, LightField::Block);
        propagator.enqueue_source(BlockPos::new(8, 8, 8), 14);
        propagator.run();

        assert_eq!(block_light(&cube, 8, 8, 8), 14);
        assert_eq!(block_light(&cube, 9, 8, 8), 13);
        assert_eq!(block_light(&cube, 8, 7, 8), 13);
        assert_eq!(block_light(&cube, 0, 8, 8), 6);
        assert_eq!(block_light(&cube, 15, 15, 15), 0);
        assert_eq!(block_light(&cube, 0, 0, 0), 0);
    }

    #[test]
    fn test_removal_restores_darkness() {
        let table = BlockTable::standard();
        let cube = Cube::new(CubeCoord::new(0, 0, 0));
        let access = SingleCubeAccess::new(&cube, false);

        let mut propagator = LightPropagator::new(&access, &table, LightField::Block);
        propagator.enqueue_source(BlockPos::new(8, 8, 8), 14);
        propagator.run();

        let mut propagator = LightPropagator::new(&access, &table, LightField::Block);
        propagator.enqueue_removal(BlockPos::new(8, 8, 8));
        propagator.run();
        assert!(cube.with_light(LightField::Block, |light| light.is_uniform(0)));
    }

    #[test]
    fn test_removal_keeps_other_source() {
        let table = BlockTable::standard();
        let torch = table.by_name("torch").expect("torch is a standard block");
        let cube = Cube::new(CubeCoord::new(0, 0, 0));
        cube.set_block(LocalPos::new(2, 8, 8), torch);
        let access = SingleCubeAccess::new(&cube, false);

        let mut propagator = LightPropagator::new(&access, &table, LightField::Block);
        propagator.enqueue_source(BlockPos::new(2, 8, 8), 14);
        propagator.enqueue_source(BlockPos::new(12, 8, 8), 14);
        propagator.run();
        assert_eq!(block_light(&cube, 7, 8, 8), 9);
        assert_eq!(block_light(&cube, 10, 8, 8), 12);

        // Remove the light at (12, 8, 8); the torch at (2, 8, 8) keeps its area lit.
        let mut propagator = LightPropagator::new(&access, &table, LightField::Block);
        propagator.enqueue_removal(BlockPos::new(12, 8, 8));
        propagator.run();
        assert_eq!(block_light(&cube, 2, 8, 8), 14);
        assert_eq!(block_light(&cube, 7, 8, 8), 9);
        assert_eq!(block_light(&cube, 12, 8, 8), 4);
        assert_eq!(block_light(&cube, 15, 8, 8), 1);
    }
}
