//! RAM-only cube storage.
//!
//! Keeps saved snapshots in memory. Useful for tests and for worlds that
//! don't need to survive a restart.

use std::{
    io,
    sync::atomic::{AtomicUsize, Ordering},
};

use cubic_utils::CubeCoord;
use scc::hash_map::Entry;

use super::{CubeSnapshot, CubeStorage};

/// In-memory cube storage.
#[derive(Debug, Default)]
pub struct RamOnlyStorage {
    saved: scc::HashMap<CubeCoord, CubeSnapshot>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl RamOnlyStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot is stored for `coord`.
    #[must_use]
    pub fn contains(&self, coord: CubeCoord) -> bool {
        self.saved.read_sync(&coord, |_, _| ()).is_some()
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    /// Whether nothing has been saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    /// How many times `load` was called.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// How many times `save` was called.
    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CubeStorage for RamOnlyStorage {
    fn load(&self, coord: CubeCoord) -> io::Result<Option<CubeSnapshot>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.saved.read_sync(&coord, |_, snapshot| snapshot.clone()))
    }

    fn save(&self, snapshot: &CubeSnapshot) -> io::Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        match self.saved.entry_sync(snapshot.coord) {
            Entry::Occupied(mut stored) => *stored.get_mut() = snapshot.clone(),
            Entry::Vacant(vacant) => {
                vacant.insert_entry(snapshot.clone());
            }
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
