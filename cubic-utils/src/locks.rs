//! Lock aliases used across the workspace.
//!
//! Locks come from `parking_lot` and are never held across an `.await`.

/// A synchronous reader-writer lock.
pub type SyncRwLock<T> = parking_lot::RwLock<T>;

/// A synchronous mutex.
pub type SyncMutex<T> = parking_lot::Mutex<T>;
