//! The cube cache.
//!
//! Resolves coordinates to cubes, loading or generating each one at most once
//! no matter how many callers ask for it concurrently. Cubes are evicted least
//! recently used first once the resident count passes the high water mark,
//! except around observers.
//!
//! Loads and unloads can be queued and are drained a bounded amount per
//! [`tick`](CubeCache::tick).

mod error;
mod eviction;
mod load_queue;
mod maintenance;
mod resident;
mod stats;
#[cfg(test)]
mod tests;

pub use error::{CacheError, CubeLoadError};
pub use eviction::{AccessInfo, AccessTracker, UnloadEntry, UnloadQueue, UnloadReason};
pub use load_queue::{LoadQueue, LoadRequest};
pub use maintenance::MaintenanceReport;
pub use resident::ResidentCubes;
pub use stats::{CacheStats, TickReport};

use std::{
    error::Error,
    iter,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use cubic_utils::{BlockPos, BlockStateId, CubeCoord, locks::SyncMutex};
use futures::{
    FutureExt,
    future::{self, BoxFuture, Shared},
};
use maintenance::PendingSave;
use scc::hash_map::Entry;
use stats::CacheCounters;
use tokio::{
    runtime::Handle,
    sync::{Semaphore, oneshot},
    task,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    block::BlockProperties,
    config::{CacheConfig, ConfigError, WorldConfig},
    cube::Cube,
    generator::CubeGenerator,
    light_engine::LightEngine,
    observer::{ObserverTracker, RetentionRadius},
    storage::CubeStorage,
};

/// Outcome of resolving one cube.
pub type CubeResult = Result<Arc<Cube>, CubeLoadError>;

/// A cube that may still be loading. Clones resolve to the same result.
pub type CubeFuture = Shared<BoxFuture<'static, CubeResult>>;

/// Concurrent cache of resident cubes.
pub struct CubeCache {
    config: CacheConfig,
    resident: Arc<ResidentCubes>,
    in_flight: scc::HashMap<CubeCoord, CubeFuture>,
    /// Evicted dirty cubes whose save hasn't succeeded yet.
    unloading: scc::HashMap<CubeCoord, PendingSave>,
    /// Held while a cube is written, so writes of one coordinate never overlap.
    write_locks: scc::HashMap<CubeCoord, Arc<SyncMutex<()>>>,
    save_tickets: AtomicU64,
    access: AccessTracker,
    observers: ObserverTracker,
    load_queue: SyncMutex<LoadQueue>,
    unload_queue: SyncMutex<UnloadQueue>,
    light: Arc<LightEngine>,
    generator: Arc<dyn CubeGenerator>,
    storage: Arc<dyn CubeStorage>,
    /// Bounds concurrent loads and generations.
    workers: Semaphore,
    tracker: TaskTracker,
    runtime: Handle,
    cancel_token: CancellationToken,
    shutting_down: AtomicBool,
    maintenance_started: AtomicBool,
    counters: CacheCounters,
}

impl CubeCache {
    /// Creates a cache that spawns its tasks onto the current tokio runtime.
    pub fn new(
        config: WorldConfig,
        generator: Arc<dyn CubeGenerator>,
        storage: Arc<dyn CubeStorage>,
        blocks: Arc<dyn BlockProperties>,
    ) -> Result<Arc<Self>, CacheError> {
        config.validate().map_err(ConfigError::Invalid)?;
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let WorldConfig { cache, light } = config;

        let resident = Arc::new(ResidentCubes::new());
        let light = Arc::new(LightEngine::new(light, Arc::clone(&resident), blocks)?);

        Ok(Arc::new(Self {
            workers: Semaphore::new(cache.generation_workers),
            observers: ObserverTracker::new(cache.retention_metric),
            config: cache,
            resident,
            in_flight: scc::HashMap::new(),
            unloading: scc::HashMap::new(),
            write_locks: scc::HashMap::new(),
            save_tickets: AtomicU64::new(0),
            access: AccessTracker::new(),
            load_queue: SyncMutex::new(LoadQueue::new()),
            unload_queue: SyncMutex::new(UnloadQueue::new()),
            light,
            generator,
            storage,
            tracker: TaskTracker::new(),
            runtime,
            cancel_token: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            maintenance_started: AtomicBool::new(false),
            counters: CacheCounters::default(),
        }))
    }

    /// The light engine lighting this cache's cubes.
    #[must_use]
    pub fn light(&self) -> &LightEngine {
        &self.light
    }

    /// The resident set.
    #[must_use]
    pub fn resident(&self) -> &Arc<ResidentCubes> {
        &self.resident
    }

    /// Cache settings.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether [`shutdown`](Self::shutdown) has started.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Returns the resident cube at `coord`.
    ///
    /// Never waits. With `create_if_absent` a missing cube is scheduled to load
    /// and `None` is returned right away.
    pub fn get(self: &Arc<Self>, coord: CubeCoord, create_if_absent: bool) -> Option<Arc<Cube>> {
        if let Some(cube) = self.resident_hit(coord) {
            return Some(cube);
        }
        if create_if_absent {
            drop(self.get_async(coord));
        }
        None
    }

    /// Resolves the cube at `coord`, loading or generating it if needed.
    ///
    /// Concurrent calls for the same coordinate share one load. A failed load
    /// isn't retried; the next call starts a new one.
    pub fn get_async(self: &Arc<Self>, coord: CubeCoord) -> CubeFuture {
        if let Some(cube) = self.resident_hit(coord) {
            return ready(Ok(cube));
        }
        if self.is_shutting_down() {
            return ready(Err(CubeLoadError::ShuttingDown));
        }

        match self.in_flight.entry_sync(coord) {
            Entry::Occupied(loading) => {
                CacheCounters::bump(&self.counters.joined);
                loading.get().clone()
            }
            Entry::Vacant(vacant) => {
                // The producer publishes before it clears its in-flight entry.
                if let Some(cube) = self.resident_hit(coord) {
                    return ready(Ok(cube));
                }
                CacheCounters::bump(&self.counters.misses);

                let (sender, receiver) = oneshot::channel();
                let pending = receiver
                    .map(move |result| result.unwrap_or(Err(CubeLoadError::Cancelled(coord))))
                    .boxed()
                    .shared();
                vacant.insert_entry(pending.clone());

                let cache = Arc::clone(self);
                self.tracker.spawn_on(
                    async move {
                        let result = cache.produce(coord).await;
                        let _ = sender.send(result);
                    },
                    &self.runtime,
                );
                pending
            }
        }
    }

    /// Resolves every cube within `radius` of `center`.
    ///
    /// The region is a box, or a sphere with `spherical_regions`. All loads
    /// start before this returns; cubes that fail to load are left out.
    pub fn load_region(
        self: &Arc<Self>,
        center: CubeCoord,
        radius: i32,
    ) -> BoxFuture<'static, Vec<Arc<Cube>>> {
        let pending: Vec<CubeFuture> = region(center, radius, self.config.spherical_regions)
            .map(|coord| self.get_async(coord))
            .collect();
        async move {
            future::join_all(pending)
                .await
                .into_iter()
                .filter_map(Result::ok)
                .collect()
        }
        .boxed()
    }

    /// Queues a load for a later tick, prioritised by distance to `requester`.
    ///
    /// Returns false if the cube is already resident, loading or queued.
    pub fn request_load(&self, coord: CubeCoord, requester: Option<Uuid>) -> bool {
        if self.is_shutting_down()
            || self.resident.contains(coord)
            || self.in_flight.read_sync(&coord, |_, _| ()).is_some()
        {
            return false;
        }
        let distance = requester
            .and_then(|id| self.observers.distance_squared(id, coord))
            .unwrap_or(i64::MAX);
        self.load_queue.lock().push(coord, distance, requester)
    }

    /// Queues a resident cube for unload on a later tick.
    ///
    /// The unload waits while the cube is inside an observer's radius.
    pub fn mark_for_unload(&self, coord: CubeCoord) -> bool {
        self.resident.contains(coord)
            && self.unload_queue.lock().push(coord, UnloadReason::Requested)
    }

    /// Block at `pos`, `None` if its cube isn't resident.
    #[must_use]
    pub fn get_block(&self, pos: BlockPos) -> Option<BlockStateId> {
        let coord = pos.cube_coord();
        let cube = self.resident.get(coord)?;
        self.touch_resident(coord);
        Some(cube.get_block(pos.local()))
    }

    /// Replaces the block at `pos` and updates light around it.
    ///
    /// Returns the previous block, or `None` if the cube isn't resident.
    pub fn set_block(&self, pos: BlockPos, state: BlockStateId) -> Option<BlockStateId> {
        let coord = pos.cube_coord();
        let cube = self.resident.get(coord)?;
        self.touch_resident(coord);
        let old = cube.set_block(pos.local(), state);
        if old != state {
            cube.mark_dirty();
            self.light.on_block_changed(pos, old, state);
        }
        Some(old)
    }

    /// Registers an observer. Returns false if it was already registered.
    pub fn register_observer(&self, id: Uuid, radius: RetentionRadius) -> bool {
        self.observers.register(id, radius)
    }

    /// Moves an observer. Returns false for unknown observers.
    pub fn update_observer_position(&self, id: Uuid, coord: CubeCoord) -> bool {
        self.observers.update_position(id, coord)
    }

    /// Forgets an observer.
    pub fn remove_observer(&self, id: Uuid) -> bool {
        self.observers.remove(id)
    }

    /// Whether any observer keeps `coord` from being evicted.
    #[must_use]
    pub fn is_protected(&self, coord: CubeCoord) -> bool {
        self.observers.is_protected(coord)
    }

    /// Access metadata of a resident cube.
    #[must_use]
    pub fn access_info(&self, coord: CubeCoord) -> Option<AccessInfo> {
        self.access.get(coord)
    }

    /// Coordinates waiting to be unloaded, in unload order.
    #[must_use]
    pub fn queued_unloads(&self) -> Vec<CubeCoord> {
        self.unload_queue.lock().coords().collect()
    }

    /// Drains queued work: up to `loads_per_tick` loads are started, the
    /// eviction pass runs, up to `unloads_per_tick` unloads are processed,
    /// and pending light updates are handed to the light pool.
    pub fn tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport::default();
        if self.is_shutting_down() {
            return report;
        }

        let requests: Vec<LoadRequest> = {
            let mut queue = self.load_queue.lock();
            iter::from_fn(|| queue.pop())
                .take(self.config.loads_per_tick)
                .collect()
        };
        for request in requests {
            if self.resident.contains(request.coord) {
                continue;
            }
            drop(self.get_async(request.coord));
            report.loads_dispatched += 1;
        }

        report.unloads_queued = self.plan_evictions();
        report.unloaded = self.process_unloads();
        report.light_updates = self.light.process_pending();
        report
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.resident.len(),
            in_flight: self.in_flight.len(),
            unloading: self.unloading.len(),
            queued_loads: self.load_queue.lock().len(),
            queued_unloads: self.unload_queue.lock().len(),
            ..self.counters.snapshot()
        }
    }

    fn resident_hit(&self, coord: CubeCoord) -> Option<Arc<Cube>> {
        let cube = self.resident.get(coord)?;
        self.touch_resident(coord);
        CacheCounters::bump(&self.counters.hits);
        Some(cube)
    }

    /// Records an access, taking it back if the cube was unloaded meanwhile.
    fn touch_resident(&self, coord: CubeCoord) {
        self.access.touch(coord);
        if !self.resident.contains(coord) {
            self.access.remove(coord);
        }
    }

    async fn produce(self: Arc<Self>, coord: CubeCoord) -> CubeResult {
        match self.materialize(coord).await {
            Ok(cube) => Ok(self.publish(cube).await),
            Err(err) => {
                self.in_flight.remove_sync(&coord);
                CacheCounters::bump(&self.counters.failed_loads);
                match err.source() {
                    _ if matches!(err, CubeLoadError::ShuttingDown) => {
                        log::debug!("Load of cube {coord} abandoned during shutdown");
                    }
                    Some(source) => log::warn!("{err}: {source}"),
                    None => log::warn!("{err}"),
                }
                Err(err)
            }
        }
    }

    async fn materialize(self: &Arc<Self>, coord: CubeCoord) -> CubeResult {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| CubeLoadError::ShuttingDown)?;

        if let Some((_, pending)) = self.unloading.remove_sync(&coord) {
            CacheCounters::bump(&self.counters.revived);
            log::debug!("Revived cube {coord} before its save completed");
            let cache = Arc::clone(self);
            let cube = pending.cube;
            return task::spawn_blocking(move || {
                cache.light.relight(&cube);
                cube
            })
            .await
            .map_err(|_| CubeLoadError::Cancelled(coord));
        }

        let cache = Arc::clone(self);
        task::spawn_blocking(move || cache.load_or_generate(coord))
            .await
            .map_err(|_| CubeLoadError::Cancelled(coord))?
    }

    /// Reads `coord` from storage, or generates it. Either way the cube is lit
    /// from its own blocks.
    fn load_or_generate(&self, coord: CubeCoord) -> CubeResult {
        match self.storage.load(coord) {
            Ok(Some(snapshot)) => {
                debug_assert_eq!(snapshot.coord, coord);
                let cube = Cube::from_snapshot(snapshot);
                self.light.relight(&cube);
                CacheCounters::bump(&self.counters.loaded);
                Ok(Arc::new(cube))
            }
            Ok(None) => {
                let mut cube = Cube::new(coord);
                self.generator
                    .populate(&mut cube)
                    .map_err(|err| CubeLoadError::Generation {
                        coord,
                        source: Arc::from(Box::<dyn Error + Send + Sync>::from(err)),
                    })?;
                cube.mark_generated();
                cube.mark_dirty();
                self.light.light_interior(&cube);
                CacheCounters::bump(&self.counters.generated);
                Ok(Arc::new(cube))
            }
            Err(err) => Err(CubeLoadError::Storage {
                coord,
                source: Arc::new(err),
            }),
        }
    }

    /// Makes a loaded cube resident and lets light flow across its faces.
    async fn publish(self: &Arc<Self>, cube: Arc<Cube>) -> Arc<Cube> {
        let coord = cube.coord();
        let published = self.resident.insert(Arc::clone(&cube));
        debug_assert!(published, "cube {coord} was published twice");
        let cube = if published {
            cube
        } else {
            self.resident.get(coord).unwrap_or(cube)
        };
        self.in_flight.remove_sync(&coord);
        self.touch_resident(coord);

        let light = Arc::clone(&self.light);
        if let Err(err) = task::spawn_blocking(move || light.reconcile_boundaries(coord)).await {
            log::warn!("Boundary light of cube {coord} was not reconciled: {err}");
        }
        cube
    }

    /// Queues least recently used cubes for unload while the resident count is
    /// above the high water mark, until the projected count reaches the low
    /// water mark.
    ///
    /// Queued unloads of protected cubes don't count towards the projection,
    /// they won't go this tick.
    fn plan_evictions(&self) -> usize {
        let resident = self.resident.len();
        if resident <= self.config.high_water_mark {
            return 0;
        }
        let mut queue = self.unload_queue.lock();
        let leaving = queue
            .entries()
            .filter(|entry| !self.observers.is_protected(entry.coord))
            .count();
        let projected = resident.saturating_sub(leaving);
        if projected <= self.config.low_water_mark {
            return 0;
        }

        let mut needed = projected - self.config.low_water_mark;
        let mut queued = 0;
        let mut protected = 0;
        for (stamp, coord) in self.access.least_recent() {
            if needed == 0 {
                break;
            }
            if queue.contains(coord) || !self.resident.contains(coord) {
                continue;
            }
            if self.observers.is_protected(coord) {
                protected += 1;
                continue;
            }
            queue.push(coord, UnloadReason::Evicted { stamp });
            needed -= 1;
            queued += 1;
        }
        log::debug!(
            "Eviction pass over {resident} resident cubes queued {queued}, {protected} protected"
        );
        queued
    }

    fn process_unloads(self: &Arc<Self>) -> usize {
        let mut unloaded = 0;
        let mut deferred = Vec::new();

        for _ in 0..self.config.unloads_per_tick {
            let Some(entry) = self.unload_queue.lock().pop() else {
                break;
            };
            if self.observers.is_protected(entry.coord) {
                // Evicted entries get picked again by a later pass if needed.
                if entry.reason == UnloadReason::Requested {
                    deferred.push(entry);
                }
                continue;
            }
            let touched = match entry.reason {
                UnloadReason::Evicted { stamp } => self
                    .access
                    .get(entry.coord)
                    .is_some_and(|info| info.last_access > stamp),
                UnloadReason::Requested => false,
            };
            if !touched && self.unload(entry.coord) {
                unloaded += 1;
            }
        }

        if !deferred.is_empty() {
            let mut queue = self.unload_queue.lock();
            for entry in deferred {
                queue.push(entry.coord, entry.reason);
            }
        }
        unloaded
    }

    /// Removes a cube from the resident set, saving it first if dirty.
    fn unload(self: &Arc<Self>, coord: CubeCoord) -> bool {
        let Some(cube) = self.resident.get(coord) else {
            return false;
        };
        // Parked before removal so a concurrent load revives it instead of
        // reading stale storage.
        self.park(Arc::clone(&cube));
        self.resident.remove(coord);
        self.access.remove(coord);
        self.light.forget_cube(coord);
        CacheCounters::bump(&self.counters.evicted);

        if cube.is_dirty() {
            self.spawn_save(coord);
        } else {
            self.unloading
                .remove_if_sync(&coord, |pending| Arc::ptr_eq(&pending.cube, &cube));
        }
        true
    }
}

fn ready(result: CubeResult) -> CubeFuture {
    future::ready(result).boxed().shared()
}

/// Coordinates of a box or sphere around `center`.
fn region(center: CubeCoord, radius: i32, spherical: bool) -> impl Iterator<Item = CubeCoord> {
    let r = radius.max(0);
    let limit = i64::from(r) * i64::from(r);
    (-r..=r)
        .flat_map(move |dy| (-r..=r).flat_map(move |dz| (-r..=r).map(move |dx| (dx, dy, dz))))
        .filter(move |&(dx, dy, dz)| {
            let (x, y, z) = (i64::from(dx), i64::from(dy), i64::from(dz));
            !spherical || x * x + y * y + z * z <= limit
        })
        .map(move |(dx, dy, dz)| center.offset(dx, dy, dz))
}
