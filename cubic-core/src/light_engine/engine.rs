//! The light engine: keeps sky and block light consistent with block content
//! across cube boundaries.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use crossbeam::queue::SegQueue;
use cubic_utils::{BlockPos, BlockStateId, CUBE_SIZE, CubeCoord, LocalPos};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use scc::hash_map::Entry;
use tokio::sync::watch;

use super::{
    access::{LightAccess, SingleCubeAccess, WorldLightAccess},
    direction::Direction,
    light_cache::LightCache,
    propagation::{LightPropagator, attenuate},
    sky::{self, SkyEntry},
    update::{LightPriority, LightUpdate},
};
use crate::{
    block::BlockProperties,
    cache::ResidentCubes,
    config::LightConfig,
    cube::{BlockStorage, Cube, LightField, LightStorage},
};

/// Counters describing light engine activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightStats {
    /// Block changes fully applied.
    pub updates_applied: u64,
    /// Individual voxel writes made by propagation.
    pub voxels_changed: u64,
    /// Updates parked behind another update of the same position.
    pub deferred_updates: u64,
    /// Combined light queries served from the cache.
    pub cache_hits: u64,
    /// Combined light queries that had to read the cube.
    pub cache_misses: u64,
    /// Updates waiting for the next batch.
    pub pending: usize,
}

/// Maintains both light fields of every resident cube.
pub struct LightEngine {
    resident: Arc<ResidentCubes>,
    blocks: Arc<dyn BlockProperties>,
    config: LightConfig,
    pool: ThreadPool,
    pending: SegQueue<LightUpdate>,
    /// Positions being relit, with updates that arrived meanwhile.
    in_progress: scc::HashMap<BlockPos, VecDeque<LightUpdate>>,
    /// Number of batches handed to the pool and not yet finished.
    batches: watch::Sender<usize>,
    cache: LightCache,
    updates_applied: AtomicU64,
    voxels_changed: AtomicU64,
    deferred_updates: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl LightEngine {
    /// Creates an engine over `resident`, with its own worker pool.
    pub fn new(
        config: LightConfig,
        resident: Arc<ResidentCubes>,
        blocks: Arc<dyn BlockProperties>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.light_workers)
            .thread_name(|index| format!("cubic-light-{index}"))
            .build()?;
        let (batches, _) = watch::channel(0);

        Ok(Self {
            resident,
            blocks,
            cache: LightCache::new(config.light_cache_ttl()),
            config,
            pool,
            pending: SegQueue::new(),
            in_progress: scc::HashMap::new(),
            batches,
            updates_applied: AtomicU64::new(0),
            voxels_changed: AtomicU64::new(0),
            deferred_updates: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    fn world_access(&self) -> WorldLightAccess<'_> {
        WorldLightAccess::new(&self.resident, self.config.open_sky_cube_y)
    }

    fn count_changes(&self, changed: usize) {
        self.voxels_changed.fetch_add(changed as u64, Ordering::Relaxed);
    }

    /// Lights a cube before it is published.
    ///
    /// Only the cube's own voxels are written. Sky light entering from above
    /// is taken from the resident cube above, or the open sky rule.
    pub fn light_interior(&self, cube: &Cube) {
        let blocks = &*self.blocks;
        let entry = SkyEntry::resolve(&self.resident, cube.coord(), self.config.open_sky_cube_y);
        let access = SingleCubeAccess::new(cube, entry == SkyEntry::Open);

        if sky::fill_columns(cube, blocks, &entry) {
            let levels: Vec<u8> = cube.with_light(LightField::Sky, |light| {
                LocalPos::all().map(|pos| light.get(pos)).collect()
            });
            let mut propagator = LightPropagator::new(&access, blocks, LightField::Sky);
            for pos in LocalPos::all() {
                let level = levels[pos.index()];
                if level > 1 && has_darker_neighbor(&levels, pos, level) {
                    propagator.enqueue_spread(cube.coord().block_at(pos));
                }
            }
            propagator.run();
            self.count_changes(propagator.changed());
        }

        let uniform = cube.with_blocks(|storage| storage.uniform_state());
        if uniform.is_some_and(|state| blocks.light_emission(state) == 0) {
            return;
        }
        let emitters: Vec<(LocalPos, u8)> = cube.with_blocks(|storage| {
            LocalPos::all()
                .map(|pos| (pos, blocks.light_emission(storage.get(pos))))
                .filter(|(_, emission)| *emission > 0)
                .collect()
        });
        let mut propagator = LightPropagator::new(&access, blocks, LightField::Block);
        for (pos, emission) in emitters {
            propagator.enqueue_source(cube.coord().block_at(pos), emission);
        }
        propagator.run();
        self.count_changes(propagator.changed());
    }

    /// Recomputes the light of a cube coming back from storage or from the
    /// unload queue, from its blocks alone.
    ///
    /// Stored light may lean on neighbors that changed meanwhile. The cube is
    /// only written, and marked dirty, where the result differs.
    pub fn relight(&self, cube: &Cube) {
        let mut fresh = Cube::new(cube.coord());
        *fresh.blocks_mut() = cube.with_blocks(BlockStorage::clone);
        self.light_interior(&fresh);

        let mut changed = false;
        for field in LightField::ALL {
            let levels = fresh.with_light(field, LightStorage::clone);
            changed |= cube.with_light_mut(field, |light| {
                if light.same_levels(&levels) {
                    false
                } else {
                    *light = levels;
                    true
                }
            });
        }
        if changed {
            cube.mark_dirty();
            self.cache.forget_cube(cube.coord());
            log::debug!("Relit cube {} after it came back", cube.coord());
        }
    }

    /// Lets light flow both ways across every face shared with a resident
    /// neighbor of the cube at `coord`.
    ///
    /// A resident cube directly below also loses any top row sky light that
    /// the cube at `coord` no longer lets through. Light on a neighbor's face
    /// that none of its own neighbors or sources accounts for is removed
    /// before anything spreads.
    pub fn reconcile_boundaries(&self, coord: CubeCoord) {
        if !self.resident.contains(coord) {
            return;
        }
        let access = self.world_access();
        let blocks = &*self.blocks;

        for field in LightField::ALL {
            let mut propagator = LightPropagator::new(&access, blocks, field);
            for dir in Direction::ALL {
                let (dx, dy, dz) = dir.offset();
                if !self.resident.contains(coord.offset(dx, dy, dz)) {
                    continue;
                }
                if field == LightField::Sky && matches!(dir, Direction::Up | Direction::Down) {
                    self.drop_unsupported_sky(&access, &mut propagator, coord, dir);
                }
                for inner in face_voxels(coord, dir) {
                    let outer = dir.relative(inner);
                    if !self.is_supported(&access, field, outer) {
                        propagator.enqueue_removal(outer);
                    }
                }
            }
            propagator.propagate_decreases();

            for dir in Direction::ALL {
                let (dx, dy, dz) = dir.offset();
                if !self.resident.contains(coord.offset(dx, dy, dz)) {
                    continue;
                }
                for inner in face_voxels(coord, dir) {
                    let outer = dir.relative(inner);
                    propagator.enqueue_toward(inner, dir);
                    propagator.enqueue_toward(outer, dir.opposite());
                }
            }
            propagator.propagate_increases();
            self.count_changes(propagator.changed());
        }
    }

    /// Removes sky light in the top row of the lower cube of a vertical pair
    /// that the row above can't account for.
    fn drop_unsupported_sky(
        &self,
        access: &WorldLightAccess<'_>,
        propagator: &mut LightPropagator<'_, WorldLightAccess<'_>>,
        coord: CubeCoord,
        dir: Direction,
    ) {
        let lower = if dir == Direction::Down {
            coord.offset(0, -1, 0)
        } else {
            coord
        };
        for top in face_voxels(lower, Direction::Up) {
            let Some(level) = access.get_light(LightField::Sky, top) else {
                continue;
            };
            if level == 0 {
                continue;
            }
            let above = access.get_light(LightField::Sky, top.offset(0, 1, 0)).unwrap_or(0);
            let opacity = access
                .block_state(top)
                .map_or(0, |state| self.blocks.opacity(state));
            if level > attenuate(LightField::Sky, above, Direction::Down, opacity) {
                propagator.enqueue_removal(top);
            }
        }
    }

    /// Whether the light at `pos` is at most what its own source or one of
    /// its neighbors gives it.
    fn is_supported(
        &self,
        access: &WorldLightAccess<'_>,
        field: LightField,
        pos: BlockPos,
    ) -> bool {
        let Some(level) = access.get_light(field, pos).filter(|level| *level > 0) else {
            return true;
        };
        let Some(state) = access.block_state(pos) else {
            return true;
        };
        let opacity = self.blocks.opacity(state);
        let own = match field {
            LightField::Block => self.blocks.light_emission(state),
            LightField::Sky => {
                attenuate(LightField::Sky, access.outside_sky(pos), Direction::Down, opacity)
            }
        };
        own >= level
            || Direction::ALL.into_iter().any(|dir| {
                access
                    .get_light(field, dir.relative(pos))
                    .is_some_and(|from| attenuate(field, from, dir.opposite(), opacity) >= level)
            })
    }

    /// Reports a block change at `pos`.
    ///
    /// Applied right away, or queued for [`process_pending`](Self::process_pending)
    /// when batching is enabled.
    pub fn on_block_changed(
        &self,
        pos: BlockPos,
        old_state: BlockStateId,
        new_state: BlockStateId,
    ) {
        self.submit(pos, old_state, new_state, LightPriority::Immediate);
    }

    /// Reports a block change that may wait behind direct edits.
    ///
    /// Always queued, regardless of the batching setting.
    pub fn schedule_block_changed(
        &self,
        pos: BlockPos,
        old_state: BlockStateId,
        new_state: BlockStateId,
    ) {
        self.submit(pos, old_state, new_state, LightPriority::Background);
    }

    fn submit(
        &self,
        pos: BlockPos,
        old_state: BlockStateId,
        new_state: BlockStateId,
        priority: LightPriority,
    ) {
        let blocks = &*self.blocks;
        if blocks.light_emission(old_state) == blocks.light_emission(new_state)
            && blocks.opacity(old_state) == blocks.opacity(new_state)
        {
            return;
        }
        self.cache.invalidate(pos);

        let update = LightUpdate {
            pos,
            old_state,
            new_state,
            emission: blocks.light_emission(new_state),
            priority,
            timestamp: Instant::now(),
        };
        if self.config.batch_updates || priority == LightPriority::Background {
            self.pending.push(update);
        } else {
            self.apply_guarded(update);
        }
    }

    /// Hands up to `max_batch_size` queued updates to the light pool, direct
    /// edits first, oldest first within a class.
    ///
    /// Doesn't wait for the batch to be applied. Nothing is taken while an
    /// earlier batch is still running, so batches apply in order. Returns the
    /// number of updates taken from the queue.
    pub fn process_pending(self: &Arc<Self>) -> usize {
        if self.pending.is_empty() || *self.batches.borrow() > 0 {
            return 0;
        }
        let mut batch = Vec::with_capacity(self.pending.len().min(self.config.max_batch_size));
        while batch.len() < self.config.max_batch_size {
            let Some(update) = self.pending.pop() else {
                break;
            };
            batch.push(update);
        }
        batch.sort_by_key(LightUpdate::order_key);

        let count = batch.len();
        self.batches.send_modify(|running| *running += 1);
        let engine = Arc::clone(self);
        self.pool.spawn(move || {
            let _done = BatchDone(&engine.batches);
            for update in batch {
                engine.apply_guarded(update);
            }
            log::debug!("Applied {count} batched light updates");
        });
        count
    }

    /// Resolves once no batch is running.
    pub async fn wait_for_batches(&self) {
        let mut running = self.batches.subscribe();
        let _ = running.wait_for(|running| *running == 0).await;
    }

    /// Number of batches handed to the pool that haven't finished yet.
    #[must_use]
    pub fn running_batches(&self) -> usize {
        *self.batches.borrow()
    }

    /// Applies `update` unless its position is already being relit, in which
    /// case it is handed to the thread doing that.
    fn apply_guarded(&self, update: LightUpdate) {
        let mut next = self.claim(update);
        while let Some(update) = next {
            self.apply_update(&update);
            next = self.next_queued(update.pos);
        }
    }

    /// Claims `update.pos` for the caller, or queues `update` behind the
    /// update being applied there.
    fn claim(&self, update: LightUpdate) -> Option<LightUpdate> {
        match self.in_progress.entry_sync(update.pos) {
            Entry::Occupied(mut queued) => {
                queued.get_mut().push_back(update);
                self.deferred_updates.fetch_add(1, Ordering::Relaxed);
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert_entry(VecDeque::new());
                Some(update)
            }
        }
    }

    /// The next update queued at `pos`. Releases the position if there is none.
    fn next_queued(&self, pos: BlockPos) -> Option<LightUpdate> {
        match self.in_progress.entry_sync(pos) {
            Entry::Occupied(mut queued) => {
                let following = queued.get_mut().pop_front();
                if following.is_none() {
                    let _finished = queued.remove();
                }
                following
            }
            Entry::Vacant(_) => None,
        }
    }

    fn apply_update(&self, update: &LightUpdate) {
        let blocks = &*self.blocks;
        let access = self.world_access();
        let pos = update.pos;

        let old_emission = blocks.light_emission(update.old_state);
        let old_opacity = blocks.opacity(update.old_state);
        let new_opacity = blocks.opacity(update.new_state);
        let mut changed = 0;

        if update.emission != old_emission || new_opacity != old_opacity {
            let mut propagator = LightPropagator::new(&access, blocks, LightField::Block);
            if update.emission > old_emission && new_opacity == old_opacity {
                propagator.enqueue_source(pos, update.emission);
                propagator.run();
            } else {
                propagator.enqueue_removal(pos);
                propagator.propagate_decreases();
                for dir in Direction::ALL {
                    propagator.enqueue_toward(dir.relative(pos), dir.opposite());
                }
                propagator.propagate_increases();
            }
            changed += propagator.changed();
        }

        if new_opacity != old_opacity {
            let mut propagator = LightPropagator::new(&access, blocks, LightField::Sky);
            propagator.enqueue_removal(pos);
            propagator.propagate_decreases();
            let from_above = access.sky_from_above(pos);
            propagator.enqueue_source(
                pos,
                attenuate(LightField::Sky, from_above, Direction::Down, new_opacity),
            );
            for dir in Direction::ALL {
                propagator.enqueue_toward(dir.relative(pos), dir.opposite());
            }
            propagator.propagate_increases();
            changed += propagator.changed();
        }

        self.count_changes(changed);
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Sky light at `pos`, `None` if its cube isn't resident.
    #[must_use]
    pub fn get_sky_light(&self, pos: BlockPos) -> Option<u8> {
        self.resident
            .get(pos.cube_coord())
            .map(|cube| cube.get_light(LightField::Sky, pos.local()))
    }

    /// Block light at `pos`, `None` if its cube isn't resident.
    #[must_use]
    pub fn get_block_light(&self, pos: BlockPos) -> Option<u8> {
        self.resident
            .get(pos.cube_coord())
            .map(|cube| cube.get_light(LightField::Block, pos.local()))
    }

    /// The brighter of both fields at `pos`, `None` if its cube isn't resident.
    #[must_use]
    pub fn get_combined_light(&self, pos: BlockPos) -> Option<u8> {
        let cube = self.resident.get(pos.cube_coord())?;
        let version = cube.version();
        if let Some(level) = self.cache.get(pos, version) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Some(level);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let local = pos.local();
        let level = cube
            .get_light(LightField::Sky, local)
            .max(cube.get_light(LightField::Block, local));
        self.cache.insert(pos, level, version);
        Some(level)
    }

    /// Drops cached light of an evicted cube.
    pub fn forget_cube(&self, coord: CubeCoord) {
        self.cache.forget_cube(coord);
    }

    /// Drops expired cache entries and returns how many were removed.
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Drops the whole light cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of queued updates.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.pending.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LightStats {
        LightStats {
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            voxels_changed: self.voxels_changed.load(Ordering::Relaxed),
            deferred_updates: self.deferred_updates.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            pending: self.pending.len(),
        }
    }
}

/// Counts a light batch as finished once dropped.
struct BatchDone<'a>(&'a watch::Sender<usize>);

impl Drop for BatchDone<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|running| *running = running.saturating_sub(1));
    }
}

/// Whether an in-cube neighbor of `pos` is dark enough to be raised from it.
fn has_darker_neighbor(levels: &[u8], pos: LocalPos, level: u8) -> bool {
    let max = CUBE_SIZE - 1;
    let neighbors = [
        (pos.x > 0).then(|| LocalPos::new(pos.x - 1, pos.y, pos.z)),
        (pos.x < max).then(|| LocalPos::new(pos.x + 1, pos.y, pos.z)),
        (pos.y > 0).then(|| LocalPos::new(pos.x, pos.y - 1, pos.z)),
        (pos.y < max).then(|| LocalPos::new(pos.x, pos.y + 1, pos.z)),
        (pos.z > 0).then(|| LocalPos::new(pos.x, pos.y, pos.z - 1)),
        (pos.z < max).then(|| LocalPos::new(pos.x, pos.y, pos.z + 1)),
    ];
    neighbors
        .into_iter()
        .flatten()
        .any(|neighbor| levels[neighbor.index()] + 1 < level)
}

/// The voxels of the cube at `coord` lying on its face toward `dir`.
fn face_voxels(coord: CubeCoord, dir: Direction) -> impl Iterator<Item = BlockPos> {
    let max = CUBE_SIZE - 1;
    (0..CUBE_SIZE).flat_map(move |a| {
        (0..CUBE_SIZE).map(move |b| {
            let local = match dir {
                Direction::Down => LocalPos::new(a, 0, b),
                Direction::Up => LocalPos::new(a, max, b),
                Direction::North => LocalPos::new(a, b, 0),
                Direction::South => LocalPos::new(a, b, max),
                Direction::West => LocalPos::new(0, a, b),
                Direction::East => LocalPos::new(max, a, b),
            };
            coord.block_at(local)
        })
    })
}
