//! Saving, retrying and shutdown.

use std::{
    io,
    sync::{Arc, atomic::Ordering},
};

use cubic_utils::{CubeCoord, locks::SyncMutex};
use futures::future;
use tokio::{
    task,
    time::{self, MissedTickBehavior},
};

use super::{CubeCache, stats::CacheCounters};
use crate::{config::FlushFailurePolicy, cube::Cube};

/// An evicted cube that still has to reach storage.
#[derive(Debug)]
pub(super) struct PendingSave {
    pub cube: Arc<Cube>,
    pub attempts: u32,
    /// Ticket of the save currently responsible for this entry.
    pub saving: Option<u64>,
}

/// What one maintenance cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Saves of evicted cubes attempted again.
    pub retried: usize,
    /// Evicted cubes given up on.
    pub dropped: usize,
    /// Dirty resident cubes saved.
    pub autosaved: usize,
    /// Expired light cache entries removed.
    pub light_cache_purged: usize,
}

impl CubeCache {
    /// Starts the periodic maintenance task. Returns false if it already runs.
    ///
    /// The task stops on [`shutdown`](Self::shutdown) or once the cache is
    /// dropped.
    pub fn start_maintenance(self: &Arc<Self>) -> bool {
        if self.is_shutting_down() || self.maintenance_started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let cache = Arc::downgrade(self);
        let cancel_token = self.cancel_token.clone();
        let period = self.config.maintenance_interval();

        self.tracker.spawn_on(
            async move {
                let mut interval = time::interval_at(time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel_token.cancelled() => break,
                        _ = interval.tick() => {
                            let Some(cache) = cache.upgrade() else {
                                break;
                            };
                            let report = cache.run_maintenance().await;
                            log::debug!("Cube cache maintenance: {report:?}");
                        }
                    }
                }
                log::debug!("Cube cache maintenance stopped");
            },
            &self.runtime,
        );
        true
    }

    /// Runs one maintenance cycle: retries saves of evicted cubes, autosaves
    /// some dirty resident cubes and purges expired cached light.
    pub async fn run_maintenance(self: &Arc<Self>) -> MaintenanceReport {
        let (retried, dropped) = self.retry_unloading().await;
        let autosaved = self.autosave().await;
        MaintenanceReport {
            retried,
            dropped,
            autosaved,
            light_cache_purged: self.light.purge_cache(),
        }
    }

    /// Stops the cache and writes every dirty cube to storage.
    ///
    /// New requests fail with [`ShuttingDown`](super::CubeLoadError::ShuttingDown).
    /// Running loads get `shutdown_grace_ms` to finish. Everything is cleared
    /// afterwards.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!(
            "Shutting down cube cache with {} resident cubes",
            self.resident.len()
        );
        self.cancel_token.cancel();
        self.workers.close();
        self.tracker.close();
        if time::timeout(self.config.shutdown_grace(), self.tracker.wait())
            .await
            .is_err()
        {
            log::warn!(
                "Gave up waiting for {} cube tasks during shutdown",
                self.tracker.len()
            );
        }
        if time::timeout(self.config.shutdown_grace(), self.light.wait_for_batches())
            .await
            .is_err()
        {
            log::warn!(
                "Gave up waiting for {} light batches during shutdown",
                self.light.running_batches()
            );
        }
        self.load_queue.lock().clear();
        self.unload_queue.lock().clear();

        let mut cubes = self.resident.drain();
        self.unloading.retain_sync(|_, pending| {
            cubes.push(Arc::clone(&pending.cube));
            false
        });
        let dirty: Vec<Arc<Cube>> = cubes.into_iter().filter(|cube| cube.is_dirty()).collect();

        let cache = Arc::clone(self);
        let flushed = task::spawn_blocking(move || {
            let mut failed = 0;
            for cube in &dirty {
                if let Err(err) = cache.store(cube, false) {
                    failed += 1;
                    log::error!("Failed to save cube {} during shutdown: {err}", cube.coord());
                }
            }
            if let Err(err) = cache.storage.flush() {
                log::error!("Failed to flush cube storage: {err}");
            }
            (dirty.len(), failed)
        })
        .await;

        match flushed {
            Ok((total, failed)) => {
                CacheCounters::add(&self.counters.saved, (total - failed) as u64);
                CacheCounters::add(&self.counters.failed_saves, failed as u64);
                log::info!("Cube cache shut down, saved {} cubes", total - failed);
            }
            Err(err) => log::error!("Cube flush task failed during shutdown: {err}"),
        }

        self.in_flight.clear_sync();
        self.access.clear();
        self.light.clear_cache();
    }

    /// Parks a cube that is about to leave the resident set.
    ///
    /// A save still running for an earlier parking of the same coordinate no
    /// longer owns the entry afterwards.
    pub(super) fn park(&self, cube: Arc<Cube>) {
        let coord = cube.coord();
        let pending = PendingSave {
            cube,
            attempts: 0,
            saving: None,
        };
        if let Err((coord, pending)) = self.unloading.insert_sync(coord, pending) {
            self.unloading
                .update_sync(&coord, |_, existing| *existing = pending);
        }
    }

    /// Starts saving a parked cube in the background.
    pub(super) fn spawn_save(self: &Arc<Self>, coord: CubeCoord) {
        let Some((cube, ticket)) = self.begin_save(coord) else {
            return;
        };
        let cache = Arc::clone(self);
        self.tracker.spawn_on(
            async move { cache.save_parked(coord, cube, ticket).await },
            &self.runtime,
        );
    }

    /// Claims a parked cube for saving unless a save is already running.
    fn begin_save(&self, coord: CubeCoord) -> Option<(Arc<Cube>, u64)> {
        self.unloading
            .update_sync(&coord, |_, pending| {
                if pending.saving.is_some() {
                    return None;
                }
                let ticket = self.save_tickets.fetch_add(1, Ordering::Relaxed);
                pending.saving = Some(ticket);
                Some((Arc::clone(&pending.cube), ticket))
            })
            .flatten()
    }

    async fn save_parked(self: Arc<Self>, coord: CubeCoord, cube: Arc<Cube>, ticket: u64) {
        let cache = Arc::clone(&self);
        let saving = Arc::clone(&cube);
        let result = task::spawn_blocking(move || cache.store(&saving, true))
            .await
            .unwrap_or_else(|err| Err(io::Error::other(err)));
        let ours = |pending: &PendingSave| {
            Arc::ptr_eq(&pending.cube, &cube) && pending.saving == Some(ticket)
        };

        match result {
            Ok(written) => {
                let removed = !cube.is_dirty()
                    && self.unloading.remove_if_sync(&coord, |p| ours(p)).is_some();
                let released = !removed
                    && self
                        .unloading
                        .update_sync(&coord, |_, pending| {
                            let owned = ours(pending);
                            if owned {
                                pending.saving = None;
                            }
                            owned
                        })
                        .unwrap_or(false);
                if written {
                    CacheCounters::bump(&self.counters.saved);
                }
                // Changed while the write was running.
                if released && cube.is_dirty() {
                    self.spawn_save(coord);
                }
            }
            Err(err) => {
                let attempts = self
                    .unloading
                    .update_sync(&coord, |_, pending| {
                        if ours(pending) {
                            pending.saving = None;
                            pending.attempts += 1;
                        }
                        pending.attempts
                    })
                    .unwrap_or(0);
                CacheCounters::bump(&self.counters.failed_saves);
                log::warn!("Failed to save cube {coord} (attempt {attempts}): {err}");
            }
        }
    }

    /// Writes `cube` to storage under its coordinate's write lock, clearing
    /// its dirty flag if it didn't change meanwhile.
    ///
    /// The snapshot is taken under the lock, so of two writes of one
    /// coordinate the later one always carries the newer content. With
    /// `live_only` nothing is written unless `cube` is still the resident or
    /// parked cube at its coordinate. Returns whether it was written.
    pub(super) fn store(&self, cube: &Arc<Cube>, live_only: bool) -> io::Result<bool> {
        let coord = cube.coord();
        let lock = Arc::clone(
            self.write_locks
                .entry_sync(coord)
                .or_insert_with(|| Arc::new(SyncMutex::new(())))
                .get(),
        );

        let result = {
            let _writing = lock.lock();
            if live_only && !self.is_live(cube) {
                Ok(false)
            } else {
                let version = cube.version();
                self.storage.save(&cube.snapshot()).map(|()| {
                    cube.clear_dirty_if(version);
                    true
                })
            }
        };
        drop(lock);
        self.write_locks.remove_if_sync(&coord, |lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Whether `cube` is the resident or parked cube at its coordinate.
    fn is_live(&self, cube: &Arc<Cube>) -> bool {
        let coord = cube.coord();
        self.resident
            .get(coord)
            .is_some_and(|current| Arc::ptr_eq(&current, cube))
            || self
                .unloading
                .read_sync(&coord, |_, pending| Arc::ptr_eq(&pending.cube, cube))
                .unwrap_or(false)
    }

    /// Saves evicted cubes whose earlier save failed. Returns how many were
    /// retried and how many were dropped.
    async fn retry_unloading(self: &Arc<Self>) -> (usize, usize) {
        let mut idle = Vec::new();
        self.unloading.iter_sync(|coord, pending| {
            if pending.saving.is_none() {
                idle.push((*coord, pending.attempts));
            }
            true
        });

        let give_up = self.config.flush_failure_policy == FlushFailurePolicy::DropAfterAttempts;
        let mut saves = Vec::new();
        let mut dropped = 0;
        for (coord, attempts) in idle {
            if give_up && attempts >= self.config.max_flush_attempts {
                if self
                    .unloading
                    .remove_if_sync(&coord, |pending| pending.saving.is_none())
                    .is_some()
                {
                    dropped += 1;
                    CacheCounters::bump(&self.counters.dropped);
                    log::error!(
                        "Dropping unsaved changes of cube {coord} after {attempts} failed saves"
                    );
                }
                continue;
            }
            if let Some((cube, ticket)) = self.begin_save(coord) {
                saves.push(Arc::clone(self).save_parked(coord, cube, ticket));
            }
        }

        let retried = saves.len();
        future::join_all(saves).await;
        (retried, dropped)
    }

    /// Saves up to `autosave_per_cycle` dirty resident cubes.
    async fn autosave(self: &Arc<Self>) -> usize {
        let dirty: Vec<Arc<Cube>> = self
            .resident
            .cubes()
            .into_iter()
            .filter(|cube| cube.is_dirty())
            .take(self.config.autosave_per_cycle)
            .collect();
        if dirty.is_empty() {
            return 0;
        }

        let cache = Arc::clone(self);
        let saved = task::spawn_blocking(move || {
            dirty
                .into_iter()
                .map(|cube| {
                    let result = cache.store(&cube, true);
                    (cube, result)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let outcomes = match saved {
            Ok(outcomes) => outcomes,
            Err(err) => {
                log::warn!("Autosave task failed: {err}");
                return 0;
            }
        };

        let mut count = 0;
        for (cube, result) in outcomes {
            match result {
                Ok(false) => {}
                Ok(true) => {
                    CacheCounters::bump(&self.counters.saved);
                    count += 1;
                }
                Err(err) => {
                    CacheCounters::bump(&self.counters.failed_saves);
                    log::warn!("Failed to autosave cube {}: {err}", cube.coord());
                }
            }
        }
        count
    }
}
