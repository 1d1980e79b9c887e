//! The cube: a 16x16x16 block of voxels with two light fields.

mod block_storage;
mod column;
mod light_storage;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cubic_utils::{BlockStateId, CubeCoord, LocalPos, locks::SyncRwLock};

pub use block_storage::BlockStorage;
pub use column::Column;
pub use light_storage::{LIGHT_ARRAY_SIZE, LightStorage};

/// Which of the two independent light fields an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightField {
    /// Light coming from the open sky.
    Sky,
    /// Light emitted by blocks.
    Block,
}

impl LightField {
    /// Both fields.
    pub const ALL: [LightField; 2] = [LightField::Sky, LightField::Block];
}

/// A plain copy of everything persisted for a cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeSnapshot {
    /// The cube's coordinate.
    pub coord: CubeCoord,
    /// Block states.
    pub blocks: BlockStorage,
    /// Sky light.
    pub sky_light: LightStorage,
    /// Block light.
    pub block_light: LightStorage,
}

/// A resident cube.
///
/// All voxel data sits behind short-lived locks so the light engine can write
/// into neighbor cubes while other threads read.
#[derive(Debug)]
pub struct Cube {
    coord: CubeCoord,
    blocks: SyncRwLock<BlockStorage>,
    sky_light: SyncRwLock<LightStorage>,
    block_light: SyncRwLock<LightStorage>,
    generated: AtomicBool,
    dirty: AtomicBool,
    /// Bumped on every content change, used to tell whether a save is stale.
    version: AtomicU64,
}

impl Cube {
    /// Creates an ungenerated, all air, unlit cube.
    #[must_use]
    pub fn new(coord: CubeCoord) -> Self {
        Self {
            coord,
            blocks: SyncRwLock::new(BlockStorage::default()),
            sky_light: SyncRwLock::new(LightStorage::new_empty()),
            block_light: SyncRwLock::new(LightStorage::new_empty()),
            generated: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            version: AtomicU64::new(0),
        }
    }

    /// Rebuilds a cube from persisted content. The result is generated and clean.
    #[must_use]
    pub fn from_snapshot(snapshot: CubeSnapshot) -> Self {
        Self {
            coord: snapshot.coord,
            blocks: SyncRwLock::new(snapshot.blocks),
            sky_light: SyncRwLock::new(snapshot.sky_light),
            block_light: SyncRwLock::new(snapshot.block_light),
            generated: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
            version: AtomicU64::new(0),
        }
    }

    /// Copies the persisted content out of the cube.
    #[must_use]
    pub fn snapshot(&self) -> CubeSnapshot {
        CubeSnapshot {
            coord: self.coord,
            blocks: self.blocks.read().clone(),
            sky_light: self.sky_light.read().clone(),
            block_light: self.block_light.read().clone(),
        }
    }

    /// The cube's coordinate.
    #[must_use]
    pub const fn coord(&self) -> CubeCoord {
        self.coord
    }

    /// Gets the block state at `pos`.
    #[must_use]
    pub fn get_block(&self, pos: LocalPos) -> BlockStateId {
        self.blocks.read().get(pos)
    }

    /// Sets the block state at `pos` and returns the previous state.
    ///
    /// Does not mark the cube dirty, callers decide whether the write is an edit.
    pub fn set_block(&self, pos: LocalPos, state: BlockStateId) -> BlockStateId {
        self.blocks.write().set(pos, state)
    }

    /// Runs `f` with the block storage locked for reading.
    pub fn with_blocks<R>(&self, f: impl FnOnce(&BlockStorage) -> R) -> R {
        f(&self.blocks.read())
    }

    /// Mutable access to the blocks for the single owner of the cube.
    pub fn blocks_mut(&mut self) -> &mut BlockStorage {
        self.blocks.get_mut()
    }

    fn light_lock(&self, field: LightField) -> &SyncRwLock<LightStorage> {
        match field {
            LightField::Sky => &self.sky_light,
            LightField::Block => &self.block_light,
        }
    }

    /// Gets one light value.
    #[must_use]
    pub fn get_light(&self, field: LightField, pos: LocalPos) -> u8 {
        self.light_lock(field).read().get(pos)
    }

    /// Overwrites one light value. Returns true if it changed.
    pub fn set_light(&self, field: LightField, pos: LocalPos, level: u8) -> bool {
        let changed = self.light_lock(field).write().set(pos, level);
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// Writes `level` only if it is brighter than what is stored, under one lock.
    pub fn raise_light(&self, field: LightField, pos: LocalPos, level: u8) -> bool {
        let changed = self.light_lock(field).write().raise(pos, level);
        if changed {
            self.mark_dirty();
        }
        changed
    }

    /// Runs `f` with one light field locked for reading.
    pub fn with_light<R>(&self, field: LightField, f: impl FnOnce(&LightStorage) -> R) -> R {
        f(&self.light_lock(field).read())
    }

    /// Runs `f` with one light field locked for writing.
    pub fn with_light_mut<R>(&self, field: LightField, f: impl FnOnce(&mut LightStorage) -> R) -> R {
        f(&mut self.light_lock(field).write())
    }

    /// Whether the cube has been populated by a generator or storage.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    /// Marks the cube populated.
    pub fn mark_generated(&self) {
        self.generated.store(true, Ordering::Release);
    }

    /// Whether the cube has changes storage hasn't seen.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Flags the cube as changed.
    pub fn mark_dirty(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
    }

    /// The current modification counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Clears the dirty flag if nothing changed since `saved_version` was read.
    ///
    /// Returns true if the cube is now clean.
    pub fn clear_dirty_if(&self, saved_version: u64) -> bool {
        if self.version() != saved_version {
            return false;
        }
        self.dirty.store(false, Ordering::Release);
        // An edit may have landed between the check and the store.
        if self.version() != saved_version {
            self.dirty.store(true, Ordering::Release);
            return false;
        }
        true
    }
}
