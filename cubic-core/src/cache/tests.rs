use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use cubic_utils::{BlockPos, BlockStateId, CubeCoord, LocalPos};
use futures::future;
use tokio::time;
use uuid::Uuid;

use super::*;
use crate::{
    block::BlockTable,
    config::FlushFailurePolicy,
    cube::{CubeSnapshot, LightField},
    generator::{EmptyGenerator, FlatGenerator},
    storage::RamOnlyStorage,
};

/// Counts calls, and can be slowed down or made to fail.
#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl CountingGenerator {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CubeGenerator for CountingGenerator {
    fn populate(&self, _cube: &mut Cube) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("terrain unavailable");
        }
        Ok(())
    }
}

/// In-memory storage whose saves can be switched off.
#[derive(Default)]
struct FlakyStorage {
    inner: RamOnlyStorage,
    fail_saves: AtomicBool,
}

impl CubeStorage for FlakyStorage {
    fn load(&self, coord: CubeCoord) -> io::Result<Option<CubeSnapshot>> {
        self.inner.load(coord)
    }

    fn save(&self, snapshot: &CubeSnapshot) -> io::Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.inner.save(snapshot)
    }

    fn flush(&self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// In-memory storage whose first save while closed waits until it opens.
#[derive(Default)]
struct GatedStorage {
    inner: RamOnlyStorage,
    closed: AtomicBool,
    stalled: AtomicUsize,
}

impl CubeStorage for GatedStorage {
    fn load(&self, coord: CubeCoord) -> io::Result<Option<CubeSnapshot>> {
        self.inner.load(coord)
    }

    fn save(&self, snapshot: &CubeSnapshot) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) && self.stalled.fetch_add(1, Ordering::SeqCst) == 0 {
            while self.closed.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        }
        self.inner.save(snapshot)
    }

    fn flush(&self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn test_config() -> WorldConfig {
    let mut config = WorldConfig::default();
    config.light.light_workers = 1;
    config
}

fn new_cache(
    config: WorldConfig,
    generator: Arc<dyn CubeGenerator>,
    storage: Arc<dyn CubeStorage>,
) -> Arc<CubeCache> {
    CubeCache::new(config, generator, storage, Arc::new(BlockTable::standard()))
        .expect("test config is valid")
}

fn air_cache() -> (Arc<CubeCache>, Arc<RamOnlyStorage>) {
    let storage = Arc::new(RamOnlyStorage::new());
    let cache = new_cache(test_config(), Arc::new(EmptyGenerator), storage.clone());
    (cache, storage)
}

fn row(x: i32) -> CubeCoord {
    CubeCoord::new(x, 0, 0)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn load(cache: &Arc<CubeCache>, coord: CubeCoord) -> Arc<Cube> {
    cache.get_async(coord).await.expect("cube loads")
}

fn torch() -> BlockStateId {
    BlockTable::standard()
        .by_name("torch")
        .expect("torch is a standard block")
}

#[test]
fn test_new_requires_runtime() {
    let result = CubeCache::new(
        test_config(),
        Arc::new(EmptyGenerator),
        Arc::new(RamOnlyStorage::new()),
        Arc::new(BlockTable::standard()),
    );
    assert!(matches!(result, Err(CacheError::NoRuntime)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_rejects_invalid_config() {
    let mut config = test_config();
    config.cache.low_water_mark = config.cache.high_water_mark + 1;
    let result = CubeCache::new(
        config,
        Arc::new(EmptyGenerator),
        Arc::new(RamOnlyStorage::new()),
        Arc::new(BlockTable::standard()),
    );
    assert!(matches!(result, Err(CacheError::Config(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_load() {
    let generator = Arc::new(CountingGenerator::slow(Duration::from_millis(50)));
    let storage = Arc::new(RamOnlyStorage::new());
    let cache = new_cache(test_config(), generator.clone(), storage.clone());
    let coord = CubeCoord::new(3, -2, 7);

    let pending: Vec<_> = (0..16).map(|_| cache.get_async(coord)).collect();
    let cubes: Vec<_> = future::join_all(pending)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("every waiter gets the cube");

    assert!(cubes.iter().all(|cube| Arc::ptr_eq(cube, &cubes[0])));
    assert_eq!(generator.calls(), 1);
    assert_eq!(storage.load_calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.joined, 15);
    assert_eq!(stats.generated, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.resident, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generated_air_cube_is_open_sky() {
    let (cache, _storage) = air_cache();
    let cube = load(&cache, CubeCoord::new(0, 0, 0)).await;

    assert!(cube.is_generated());
    assert!(cube.is_dirty());
    assert!(cube.with_light(LightField::Sky, |light| light.is_uniform(15)));
    assert!(cube.with_light(LightField::Block, |light| light.is_uniform(0)));
    assert_eq!(cache.light().get_sky_light(BlockPos::new(4, 0, 9)), Some(15));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_get_schedules_load() {
    let (cache, _storage) = air_cache();
    let coord = CubeCoord::new(1, 1, 1);

    assert!(cache.get(coord, false).is_none());
    assert_eq!(cache.stats().in_flight, 0);
    assert!(cache.get(coord, true).is_none());
    assert!(eventually(|| cache.get(coord, false).is_some()).await);
    assert!(cache.access_info(coord).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_load_can_be_retried() {
    let generator = Arc::new(CountingGenerator::failing(1));
    let cache = new_cache(test_config(), generator.clone(), Arc::new(RamOnlyStorage::new()));
    let coord = CubeCoord::new(0, 5, 0);

    let first = cache.get_async(coord).await;
    assert!(matches!(
        first,
        Err(CubeLoadError::Generation { coord: failed, .. }) if failed == coord
    ));
    assert_eq!(cache.stats().in_flight, 0);
    assert!(!cache.resident().contains(coord));

    let cube = load(&cache, coord).await;
    assert_eq!(cube.coord(), coord);
    assert_eq!(generator.calls(), 2);
    assert_eq!(cache.stats().failed_loads, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_set_block_relights() {
    let (cache, _storage) = air_cache();
    let cube = load(&cache, CubeCoord::new(0, 0, 0)).await;
    let pos = BlockPos::new(8, 8, 8);
    let light = cache.light();

    assert_eq!(cache.set_block(pos, torch()), Some(BlockStateId::AIR));
    assert_eq!(cache.get_block(pos), Some(torch()));
    assert_eq!(light.get_block_light(pos), Some(14));
    assert_eq!(light.get_block_light(pos.offset(1, 0, 0)), Some(13));
    assert_eq!(light.get_block_light(pos.offset(0, -3, 0)), Some(11));
    assert!(cube.is_dirty());

    assert_eq!(cache.set_block(pos, BlockStateId::AIR), Some(torch()));
    assert!(cube.with_light(LightField::Block, |light| light.is_uniform(0)));

    assert_eq!(cache.set_block(BlockPos::new(100, 0, 0), torch()), None);
    assert_eq!(cache.get_block(BlockPos::new(100, 0, 0)), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tick_hands_batched_light_to_pool() {
    let mut config = test_config();
    config.light.batch_updates = true;
    let cache = new_cache(config, Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));
    load(&cache, CubeCoord::new(0, 0, 0)).await;
    let pos = BlockPos::new(8, 8, 8);

    cache.set_block(pos, torch());
    assert_eq!(cache.light().get_block_light(pos), Some(0));
    assert_eq!(cache.tick().light_updates, 1);
    cache.light().wait_for_batches().await;
    assert_eq!(cache.light().get_block_light(pos), Some(14));
    assert_eq!(cache.tick().light_updates, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_light_crosses_into_neighbor() {
    let (cache, _storage) = air_cache();
    let loaded = cache.load_region(CubeCoord::new(0, 0, 0), 1).await;
    assert_eq!(loaded.len(), 27);

    let pos = BlockPos::new(15, 8, 8);
    cache.set_block(pos, torch());
    let light = cache.light();
    assert_eq!(light.get_block_light(BlockPos::new(16, 8, 8)), Some(13));
    assert_eq!(light.get_block_light(BlockPos::new(20, 8, 8)), Some(9));
    assert_eq!(light.get_block_light(BlockPos::new(-1, 8, 8)), Some(0));

    cache.set_block(pos, BlockStateId::AIR);
    assert_eq!(light.get_block_light(BlockPos::new(16, 8, 8)), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_region_shapes() {
    let (boxed, _storage) = air_cache();
    assert_eq!(boxed.load_region(CubeCoord::new(4, 4, 4), 1).await.len(), 27);

    let mut config = test_config();
    config.cache.spherical_regions = true;
    let sphere = new_cache(config, Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));
    let cubes = sphere.load_region(CubeCoord::new(4, 4, 4), 1).await;
    assert_eq!(cubes.len(), 7);
    assert!(!sphere.resident().contains(CubeCoord::new(5, 5, 4)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_region_omits_failures() {
    let generator = Arc::new(CountingGenerator::failing(1));
    let cache = new_cache(test_config(), generator, Arc::new(RamOnlyStorage::new()));
    let cubes = cache.load_region(CubeCoord::new(0, 0, 0), 1).await;
    assert_eq!(cubes.len(), 26);
    assert_eq!(cache.stats().failed_loads, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saved_cube_loads_back_unchanged() {
    let storage = Arc::new(RamOnlyStorage::new());
    let table = BlockTable::standard();
    let flat = FlatGenerator::new(
        4,
        vec![table.by_name("grass").expect("grass"), table.by_name("dirt").expect("dirt")],
        table.by_name("stone").expect("stone"),
    );
    let coord = CubeCoord::new(0, 0, 0);

    let first = new_cache(test_config(), Arc::new(flat), storage.clone());
    let original = load(&first, coord).await;
    first.set_block(BlockPos::new(5, 9, 5), torch());
    first.shutdown().await;
    assert!(storage.contains(coord));
    assert!(!original.is_dirty());

    let generator = Arc::new(CountingGenerator::default());
    let second = new_cache(test_config(), generator.clone(), storage.clone());
    let restored = load(&second, coord).await;

    assert_eq!(generator.calls(), 0);
    assert_eq!(second.stats().loaded, 1);
    assert!(restored.is_generated());
    assert!(!restored.is_dirty());
    assert_eq!(restored.snapshot(), original.snapshot());
    assert_eq!(restored.get_light(LightField::Block, LocalPos::new(5, 9, 5)), 14);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_follows_recency() {
    let mut config = test_config();
    config.cache.high_water_mark = 40;
    config.cache.low_water_mark = 20;
    config.cache.unloads_per_tick = 8;
    let cache = new_cache(config, Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));

    let observer = Uuid::new_v4();
    cache.register_observer(observer, RetentionRadius::new(2, 2));
    cache.update_observer_position(observer, row(1000));

    for x in 0..50 {
        load(&cache, row(x)).await;
    }

    let report = cache.tick();
    assert_eq!(report.unloads_queued, 30);
    assert_eq!(report.unloaded, 8);
    assert_eq!(cache.queued_unloads(), (8..30).map(row).collect::<Vec<_>>());

    let mut gone: i32 = 8;
    for expected in [8, 8, 6] {
        let report = cache.tick();
        assert_eq!(report.unloads_queued, 0);
        assert_eq!(report.unloaded, expected);
        gone += expected as i32;
        for x in 0..50 {
            assert_eq!(cache.resident().contains(row(x)), x >= gone, "cube {x}");
        }
    }
    assert_eq!(cache.resident().len(), 20);
    assert_eq!(cache.tick().unloaded, 0);
    assert!(cache.access_info(row(0)).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eviction_skips_protected_cubes() {
    let mut config = test_config();
    config.cache.high_water_mark = 4;
    config.cache.low_water_mark = 0;
    let cache = new_cache(config, Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));

    let observer = Uuid::new_v4();
    cache.register_observer(observer, RetentionRadius::new(1, 1));
    cache.update_observer_position(observer, row(0));
    for x in 0..6 {
        load(&cache, row(x)).await;
    }
    assert!(cache.is_protected(row(1)));
    assert!(!cache.is_protected(row(2)));

    let report = cache.tick();
    assert_eq!(report.unloads_queued, 4);
    assert_eq!(report.unloaded, 4);
    assert!(cache.resident().contains(row(0)));
    assert!(cache.resident().contains(row(1)));
    assert_eq!(cache.resident().len(), 2);

    cache.remove_observer(observer);
    // Below the high water mark now, so nothing else goes.
    assert_eq!(cache.tick().unloaded, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_protected_requested_unload_does_not_hold_back_eviction() {
    let mut config = test_config();
    config.cache.high_water_mark = 4;
    config.cache.low_water_mark = 2;
    let cache = new_cache(config, Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));

    let observer = Uuid::new_v4();
    cache.register_observer(observer, RetentionRadius::new(0, 0));
    cache.update_observer_position(observer, row(0));
    for x in 0..6 {
        load(&cache, row(x)).await;
    }
    assert!(cache.mark_for_unload(row(0)));

    let report = cache.tick();
    assert_eq!(report.unloads_queued, 4);
    assert_eq!(report.unloaded, 4);
    assert_eq!(cache.resident().len(), 2);
    assert!(cache.resident().contains(row(0)));
    assert_eq!(cache.queued_unloads(), vec![row(0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_access_is_not_recorded_for_unloaded_cube() {
    let (cache, _storage) = air_cache();
    let coord = row(0);
    load(&cache, coord).await;
    cache.mark_for_unload(coord);
    assert_eq!(cache.tick().unloaded, 1);
    assert!(cache.access_info(coord).is_none());

    // A reader that fetched the cube before the unload records its access late.
    cache.touch_resident(coord);
    assert!(cache.access_info(coord).is_none());

    load(&cache, coord).await;
    cache.touch_resident(coord);
    assert!(cache.access_info(coord).is_some_and(|info| info.count >= 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requested_unload_waits_for_observer() {
    let (cache, _storage) = air_cache();
    let coord = row(0);
    load(&cache, coord).await;

    let observer = Uuid::new_v4();
    cache.register_observer(observer, RetentionRadius::new(0, 0));
    cache.update_observer_position(observer, coord);

    assert!(cache.mark_for_unload(coord));
    assert!(!cache.mark_for_unload(row(9)));
    assert_eq!(cache.tick().unloaded, 0);
    assert!(cache.resident().contains(coord));
    assert_eq!(cache.queued_unloads(), vec![coord]);

    cache.update_observer_position(observer, row(50));
    assert_eq!(cache.tick().unloaded, 1);
    assert!(!cache.resident().contains(coord));
    assert!(cache.queued_unloads().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_evicted_cube_is_saved_then_loaded() {
    let generator = Arc::new(CountingGenerator::default());
    let storage = Arc::new(RamOnlyStorage::new());
    let cache = new_cache(test_config(), generator.clone(), storage.clone());
    let coord = row(2);
    let pos = coord.block_at(LocalPos::new(1, 2, 3));

    load(&cache, coord).await;
    cache.set_block(pos, torch());
    cache.mark_for_unload(coord);
    assert_eq!(cache.tick().unloaded, 1);
    assert_eq!(cache.get_block(pos), None);

    assert!(eventually(|| storage.contains(coord) && cache.stats().unloading == 0).await);
    load(&cache, coord).await;
    assert_eq!(cache.get_block(pos), Some(torch()));
    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.stats().loaded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reloaded_cube_drops_light_of_removed_neighbor_torch() {
    let (cache, storage) = air_cache();
    load(&cache, row(0)).await;
    load(&cache, row(1)).await;
    let pos = BlockPos::new(15, 8, 8);
    cache.set_block(pos, torch());
    assert_eq!(cache.light().get_block_light(BlockPos::new(16, 8, 8)), Some(13));

    cache.mark_for_unload(row(1));
    assert_eq!(cache.tick().unloaded, 1);
    assert!(eventually(|| storage.contains(row(1)) && cache.stats().unloading == 0).await);
    cache.set_block(pos, BlockStateId::AIR);

    let reloaded = load(&cache, row(1)).await;
    assert_eq!(cache.stats().loaded, 1);
    assert_eq!(cache.light().get_block_light(pos), Some(0));
    assert_eq!(cache.light().get_block_light(BlockPos::new(16, 8, 8)), Some(0));
    assert!(reloaded.with_light(LightField::Block, |light| light.is_uniform(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revived_cube_drops_light_of_removed_neighbor_torch() {
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_saves.store(true, Ordering::SeqCst);
    let cache = new_cache(test_config(), Arc::new(EmptyGenerator), storage.clone());
    load(&cache, row(0)).await;
    load(&cache, row(1)).await;
    let pos = BlockPos::new(15, 8, 8);
    cache.set_block(pos, torch());

    cache.mark_for_unload(row(1));
    assert_eq!(cache.tick().unloaded, 1);
    assert!(eventually(|| cache.stats().failed_saves >= 1).await);
    cache.set_block(pos, BlockStateId::AIR);

    let revived = load(&cache, row(1)).await;
    assert_eq!(cache.stats().revived, 1);
    assert_eq!(cache.light().get_block_light(BlockPos::new(16, 8, 8)), Some(0));
    assert!(revived.with_light(LightField::Block, |light| light.is_uniform(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stalled_save_never_overwrites_newer_one() {
    let storage = Arc::new(GatedStorage::default());
    storage.closed.store(true, Ordering::SeqCst);
    let cache = new_cache(test_config(), Arc::new(EmptyGenerator), storage.clone());
    let coord = row(0);
    let pos = BlockPos::new(4, 4, 4);

    load(&cache, coord).await;
    cache.set_block(pos, torch());
    cache.mark_for_unload(coord);
    assert_eq!(cache.tick().unloaded, 1);
    assert!(eventually(|| storage.stalled.load(Ordering::SeqCst) >= 1).await);

    load(&cache, coord).await;
    assert_eq!(cache.stats().revived, 1);
    cache.set_block(pos, BlockStateId::AIR);
    cache.mark_for_unload(coord);
    assert_eq!(cache.tick().unloaded, 1);

    storage.closed.store(false, Ordering::SeqCst);
    assert!(eventually(|| cache.stats().unloading == 0).await);
    assert!(eventually(|| cache.stats().saved >= 2).await);

    load(&cache, coord).await;
    assert_eq!(cache.stats().loaded, 1);
    assert_eq!(cache.get_block(pos), Some(BlockStateId::AIR));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsaved_cube_is_revived() {
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_saves.store(true, Ordering::SeqCst);
    let generator = Arc::new(CountingGenerator::default());
    let cache = new_cache(test_config(), generator.clone(), storage.clone());
    let coord = row(0);

    let original = load(&cache, coord).await;
    cache.mark_for_unload(coord);
    cache.tick();
    assert!(eventually(|| cache.stats().failed_saves >= 1).await);
    assert_eq!(cache.stats().unloading, 1);

    let revived = load(&cache, coord).await;
    assert!(Arc::ptr_eq(&original, &revived));
    assert!(revived.is_dirty());
    assert_eq!(generator.calls(), 1);
    assert_eq!(cache.stats().revived, 1);
    assert_eq!(cache.stats().unloading, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_save_is_retried() {
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_saves.store(true, Ordering::SeqCst);
    let cache = new_cache(test_config(), Arc::new(EmptyGenerator), storage.clone());
    let coord = row(0);

    load(&cache, coord).await;
    cache.mark_for_unload(coord);
    assert_eq!(cache.tick().unloaded, 1);
    assert!(eventually(|| cache.stats().failed_saves >= 1).await);
    assert!(!storage.inner.contains(coord));

    storage.fail_saves.store(false, Ordering::SeqCst);
    let report = cache.run_maintenance().await;
    assert_eq!(report.retried, 1);
    assert_eq!(report.dropped, 0);
    assert!(storage.inner.contains(coord));
    assert_eq!(cache.stats().unloading, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsavable_cube_is_dropped() {
    let mut config = test_config();
    config.cache.max_flush_attempts = 2;
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_saves.store(true, Ordering::SeqCst);
    let cache = new_cache(config, Arc::new(EmptyGenerator), storage.clone());
    let coord = row(0);

    load(&cache, coord).await;
    cache.mark_for_unload(coord);
    cache.tick();
    assert!(eventually(|| cache.stats().failed_saves >= 1).await);

    let report = cache.run_maintenance().await;
    assert_eq!((report.retried, report.dropped), (1, 0));
    let report = cache.run_maintenance().await;
    assert_eq!((report.retried, report.dropped), (0, 1));

    let stats = cache.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.unloading, 0);
    assert_eq!(stats.failed_saves, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retain_policy_keeps_retrying() {
    let mut config = test_config();
    config.cache.max_flush_attempts = 1;
    config.cache.flush_failure_policy = FlushFailurePolicy::Retain;
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_saves.store(true, Ordering::SeqCst);
    let cache = new_cache(config, Arc::new(EmptyGenerator), storage.clone());

    load(&cache, row(0)).await;
    cache.mark_for_unload(row(0));
    cache.tick();
    assert!(eventually(|| cache.stats().failed_saves >= 1).await);

    for _ in 0..3 {
        let report = cache.run_maintenance().await;
        assert_eq!((report.retried, report.dropped), (1, 0));
    }
    assert_eq!(cache.stats().unloading, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_loads_nearest_first() {
    let mut config = test_config();
    config.cache.loads_per_tick = 2;
    let (generator, storage) = (Arc::new(EmptyGenerator), Arc::new(RamOnlyStorage::new()));
    let cache = new_cache(config, generator, storage);

    let observer = Uuid::new_v4();
    cache.register_observer(observer, RetentionRadius::new(8, 8));
    cache.update_observer_position(observer, row(0));

    assert!(cache.request_load(row(5), Some(observer)));
    assert!(cache.request_load(row(1), Some(observer)));
    assert!(cache.request_load(row(3), Some(observer)));
    assert!(!cache.request_load(row(3), Some(observer)));

    let report = cache.tick();
    assert_eq!(report.loads_dispatched, 2);
    assert_eq!(cache.stats().queued_loads, 1);
    // Still queued, so this is a duplicate.
    assert!(!cache.request_load(row(5), Some(observer)));

    assert!(eventually(|| cache.resident().contains(row(1))).await);
    assert!(eventually(|| cache.resident().contains(row(3))).await);
    assert!(!cache.resident().contains(row(5)));

    assert_eq!(cache.tick().loads_dispatched, 1);
    assert!(eventually(|| cache.resident().contains(row(5))).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_maintenance_autosaves() {
    let mut config = test_config();
    config.cache.maintenance_interval_ms = 20;
    let storage = Arc::new(RamOnlyStorage::new());
    let cache = new_cache(config, Arc::new(EmptyGenerator), storage.clone());
    let coord = row(0);

    let cube = load(&cache, coord).await;
    assert!(cache.start_maintenance());
    assert!(!cache.start_maintenance());
    assert!(eventually(|| storage.contains(coord) && !cube.is_dirty()).await);
    cache.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_flushes_everything() {
    let (cache, storage) = air_cache();
    for x in 0..3 {
        load(&cache, row(x)).await;
    }
    cache.set_block(BlockPos::new(3, 3, 3), torch());
    cache.shutdown().await;

    assert_eq!(storage.len(), 3);
    assert_eq!(cache.stats().resident, 0);
    assert!(cache.is_shutting_down());
    assert!(matches!(
        cache.get_async(row(0)).await,
        Err(CubeLoadError::ShuttingDown)
    ));
    assert!(!cache.request_load(row(7), None));
    assert_eq!(cache.tick(), TickReport::default());
}
