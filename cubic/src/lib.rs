//! # Cubic
//!
//! A headless runner that drives a cube cache over a flat world while a
//! simulated observer walks around in it.
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    missing_docs,
    clippy::unwrap_used
)]
#![allow(
    clippy::single_call_fn,
    clippy::multiple_inherent_impl,
    clippy::shadow_unrelated,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools,
    clippy::needless_pass_by_value,
    clippy::cargo_common_metadata
)]
use std::{sync::Arc, time::Duration};

use cubic_core::{
    BlockProperties, BlockTable, CacheError, CubeCache, CubeGenerator, CubeStorage,
    RetentionRadius, TickReport, WorldConfig, generator::FlatGenerator, storage::RamOnlyStorage,
};
use cubic_utils::{BlockPos, BlockStateId};
use tokio::{
    select, spawn,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::wanderer::Wanderer;

pub mod logger;
pub mod wanderer;

/// Time between two ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);
/// World height of the first air block above the ground.
pub const SURFACE_Y: i32 = 64;
/// Retention radius of the simulated observer, in cubes.
pub const VIEW_RADIUS: RetentionRadius = RetentionRadius::new(4, 2);

const TORCH_EVERY: u64 = 40;
const STATS_EVERY: u64 = 200;

/// The running world.
pub struct CubicWorld {
    /// The cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// The cube cache.
    pub cache: Arc<CubeCache>,
    blocks: Arc<BlockTable>,
    ticker: Option<JoinHandle<()>>,
}

impl CubicWorld {
    /// Creates the world. Must be called from within a tokio runtime.
    pub fn new(config: WorldConfig) -> Result<Self, CacheError> {
        let blocks = Arc::new(BlockTable::standard());
        let generator: Arc<dyn CubeGenerator> = Arc::new(flat_generator(&blocks));
        let storage: Arc<dyn CubeStorage> = Arc::new(RamOnlyStorage::new());
        let properties: Arc<dyn BlockProperties> = blocks.clone();
        let cache = CubeCache::new(config, generator, storage, properties)?;

        Ok(Self {
            cancel_token: CancellationToken::new(),
            cache,
            blocks,
            ticker: None,
        })
    }

    /// Starts maintenance and the tick loop.
    pub fn start(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        log::info!("Starting cube cache");
        self.cache.start_maintenance();

        let cache = self.cache.clone();
        let cancel_token = self.cancel_token.clone();
        let torch = self.blocks.by_name("torch");

        self.ticker = Some(spawn(async move {
            let mut wanderer = Wanderer::new(BlockPos::new(0, SURFACE_Y, 0), VIEW_RADIUS);
            cache.register_observer(wanderer.id(), wanderer.radius());
            cache.update_observer_position(wanderer.id(), wanderer.cube());
            request_surroundings(&cache, &wanderer);

            let mut interval = time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick: u64 = 0;
            loop {
                select! {
                    () = cancel_token.cancelled() => break,
                    _ = interval.tick() => {
                        tick += 1;
                        run_tick(&cache, &mut wanderer, tick, torch);
                    }
                }
            }
            cache.remove_observer(wanderer.id());
            log::info!("Tick loop stopped after {tick} ticks");
        }));
    }

    /// Stops the tick loop and shuts the cache down, saving dirty cubes.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(ticker) = self.ticker.take() {
            if let Err(err) = ticker.await {
                log::error!("Tick loop panicked: {err}");
            }
        }
        self.cache.shutdown().await;
    }
}

fn flat_generator(blocks: &BlockTable) -> FlatGenerator {
    let block = |name| blocks.by_name(name).unwrap_or(BlockStateId::AIR);
    FlatGenerator::new(
        SURFACE_Y,
        vec![block("grass"), block("dirt"), block("dirt"), block("dirt")],
        block("stone"),
    )
}

fn request_surroundings(cache: &CubeCache, wanderer: &Wanderer) {
    let queued = wanderer
        .surroundings()
        .filter(|&coord| cache.request_load(coord, Some(wanderer.id())))
        .count();
    log::debug!("Queued {queued} cubes around {}", wanderer.cube());
}

fn run_tick(
    cache: &Arc<CubeCache>,
    wanderer: &mut Wanderer,
    tick: u64,
    torch: Option<BlockStateId>,
) {
    if wanderer.step() {
        cache.update_observer_position(wanderer.id(), wanderer.cube());
        request_surroundings(cache, wanderer);
    }
    match torch {
        Some(torch) if tick % TORCH_EVERY == 0 => place_torch(cache, wanderer.position(), torch),
        _ => {}
    }

    let report = cache.tick();
    if report != TickReport::default() {
        log::debug!("Tick {tick}: {report:?}");
    }
    if tick % STATS_EVERY == 0 {
        let stats = cache.stats();
        log::info!(
            "{} cubes resident, {} loading, {} queued, {} evicted, {} saved",
            stats.resident,
            stats.in_flight,
            stats.queued_loads,
            stats.evicted,
            stats.saved
        );
    }
}

fn place_torch(cache: &CubeCache, pos: BlockPos, torch: BlockStateId) {
    if cache.get_block(pos) != Some(BlockStateId::AIR) {
        return;
    }
    if cache.set_block(pos, torch).is_some() {
        log::debug!(
            "Placed a torch at {pos:?}, block light {:?}",
            cache.light().get_block_light(pos)
        );
    }
}
