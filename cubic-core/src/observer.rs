//! Observer tracking for eviction protection and load priority.

use cubic_utils::CubeCoord;
use uuid::Uuid;

use crate::config::RetentionMetric;

/// How far around an observer cubes are kept resident, in cubes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionRadius {
    /// Radius along x and z.
    pub horizontal: i32,
    /// Radius along y.
    pub vertical: i32,
}

impl RetentionRadius {
    /// Creates a radius.
    #[must_use]
    pub const fn new(horizontal: i32, vertical: i32) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    /// Whether `coord` lies within this radius of `center`.
    #[must_use]
    pub fn contains(self, metric: RetentionMetric, center: CubeCoord, coord: CubeCoord) -> bool {
        let d = coord.0 - center.0;
        let (dx, dy, dz) = (i64::from(d.x), i64::from(d.y), i64::from(d.z));
        let h = i64::from(self.horizontal.max(0));
        let v = i64::from(self.vertical.max(0));
        match metric {
            RetentionMetric::Chebyshev => dx.abs() <= h && dz.abs() <= h && dy.abs() <= v,
            RetentionMetric::Euclidean => {
                let horizontal = dx * dx + dz * dz;
                match (h, v) {
                    (0, _) => horizontal == 0 && dy.abs() <= v,
                    (_, 0) => dy == 0 && horizontal <= h * h,
                    // horizontal / h² + dy² / v² <= 1, kept in integers.
                    _ => horizontal * v * v + dy * dy * h * h <= h * h * v * v,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ObserverRecord {
    last: Option<CubeCoord>,
    radius: RetentionRadius,
}

/// Last known position and retention radius of every observer.
///
/// Observers only protect cubes from eviction and order queued loads. They
/// never cause a cube to load on their own.
#[derive(Debug)]
pub struct ObserverTracker {
    observers: scc::HashMap<Uuid, ObserverRecord>,
    metric: RetentionMetric,
}

impl ObserverTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(metric: RetentionMetric) -> Self {
        Self {
            observers: scc::HashMap::new(),
            metric,
        }
    }

    /// Registers an observer with no known position yet.
    ///
    /// Returns false if `id` was already registered, in which case only its
    /// radius is replaced.
    pub fn register(&self, id: Uuid, radius: RetentionRadius) -> bool {
        let record = ObserverRecord { last: None, radius };
        if self.observers.insert_sync(id, record).is_ok() {
            return true;
        }
        self.observers
            .update_sync(&id, |_, record| record.radius = radius);
        false
    }

    /// Records the observer's current cube. Returns false for unknown observers.
    pub fn update_position(&self, id: Uuid, coord: CubeCoord) -> bool {
        self.observers
            .update_sync(&id, |_, record| record.last = Some(coord))
            .is_some()
    }

    /// Forgets an observer.
    pub fn remove(&self, id: Uuid) -> bool {
        self.observers.remove_sync(&id).is_some()
    }

    /// Last known cube of an observer.
    #[must_use]
    pub fn position(&self, id: Uuid) -> Option<CubeCoord> {
        self.observers
            .read_sync(&id, |_, record| record.last)
            .flatten()
    }

    /// Whether any observer's retention radius covers `coord`.
    #[must_use]
    pub fn is_protected(&self, coord: CubeCoord) -> bool {
        let mut protected = false;
        self.observers.iter_sync(|_, record| {
            protected = record
                .last
                .is_some_and(|center| record.radius.contains(self.metric, center, coord));
            !protected
        });
        protected
    }

    /// Squared distance between an observer's last known cube and `coord`.
    #[must_use]
    pub fn distance_squared(&self, id: Uuid, coord: CubeCoord) -> Option<i64> {
        self.position(id).map(|center| center.distance_squared(coord))
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chebyshev_box() {
        let radius = RetentionRadius::new(2, 1);
        let center = CubeCoord::new(0, 0, 0);
        let metric = RetentionMetric::Chebyshev;
        assert!(radius.contains(metric, center, CubeCoord::new(2, 1, -2)));
        assert!(!radius.contains(metric, center, CubeCoord::new(2, 2, 0)));
        assert!(!radius.contains(metric, center, CubeCoord::new(3, 0, 0)));
    }

    #[test]
    fn test_euclidean_ellipsoid() {
        let radius = RetentionRadius::new(4, 2);
        let center = CubeCoord::new(10, 10, 10);
        let metric = RetentionMetric::Euclidean;
        assert!(radius.contains(metric, center, CubeCoord::new(14, 10, 10)));
        assert!(radius.contains(metric, center, CubeCoord::new(10, 12, 10)));
        // Inside the box, outside the ellipsoid.
        assert!(!radius.contains(metric, center, CubeCoord::new(13, 12, 13)));
    }

    #[test]
    fn test_protection_needs_a_position() {
        let tracker = ObserverTracker::new(RetentionMetric::Chebyshev);
        let id = Uuid::new_v4();
        assert!(tracker.register(id, RetentionRadius::new(3, 3)));
        assert!(!tracker.is_protected(CubeCoord::new(0, 0, 0)));

        assert!(tracker.update_position(id, CubeCoord::new(1, 0, 0)));
        assert!(tracker.is_protected(CubeCoord::new(0, 0, 0)));
        assert!(!tracker.is_protected(CubeCoord::new(10, 0, 0)));
        assert_eq!(tracker.distance_squared(id, CubeCoord::new(4, 0, 4)), Some(25));

        assert!(tracker.remove(id));
        assert!(!tracker.is_protected(CubeCoord::new(0, 0, 0)));
        assert!(!tracker.update_position(id, CubeCoord::new(0, 0, 0)));
    }

    #[test]
    fn test_reregister_replaces_radius() {
        let tracker = ObserverTracker::new(RetentionMetric::Chebyshev);
        let id = Uuid::new_v4();
        tracker.register(id, RetentionRadius::new(1, 1));
        tracker.update_position(id, CubeCoord::new(0, 0, 0));
        assert!(!tracker.register(id, RetentionRadius::new(5, 5)));
        assert!(tracker.is_protected(CubeCoord::new(5, 5, 5)));
        assert_eq!(tracker.len(), 1);
    }
}
