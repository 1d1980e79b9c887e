//! The set of cubes currently in memory.

use std::sync::Arc;

use cubic_utils::{ColumnPos, CubeCoord};
use scc::hash_map::Entry;

use crate::cube::{Column, Cube};

/// Resident cubes, indexed by coordinate and by column.
///
/// Shared between the cache, which inserts and removes cubes, and the light
/// engine, which resolves neighbors through it.
#[derive(Debug, Default)]
pub struct ResidentCubes {
    cubes: scc::HashMap<CubeCoord, Arc<Cube>>,
    columns: scc::HashMap<ColumnPos, Column>,
}

impl ResidentCubes {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a cube up.
    #[must_use]
    pub fn get(&self, coord: CubeCoord) -> Option<Arc<Cube>> {
        self.cubes.read_sync(&coord, |_, cube| cube.clone())
    }

    /// Whether `coord` is resident.
    #[must_use]
    pub fn contains(&self, coord: CubeCoord) -> bool {
        self.cubes.read_sync(&coord, |_, _| ()).is_some()
    }

    /// Publishes a cube. Returns false, leaving the set untouched, if the
    /// coordinate is already resident.
    pub fn insert(&self, cube: Arc<Cube>) -> bool {
        let coord = cube.coord();
        if self.cubes.insert_sync(coord, cube.clone()).is_err() {
            return false;
        }
        match self.columns.entry_sync(coord.column()) {
            Entry::Occupied(mut column) => column.get_mut().insert(cube),
            Entry::Vacant(vacant) => {
                let mut column = Column::new(coord.column());
                column.insert(cube);
                vacant.insert_entry(column);
            }
        }
        true
    }

    /// Removes a cube.
    pub fn remove(&self, coord: CubeCoord) -> Option<Arc<Cube>> {
        let emptied = self.columns.update_sync(&coord.column(), |_, column| {
            column.remove(coord.0.y);
            column.is_empty()
        });
        if emptied == Some(true) {
            self.columns
                .remove_if_sync(&coord.column(), |column| column.is_empty());
        }
        self.cubes.remove_sync(&coord).map(|(_, cube)| cube)
    }

    /// Whether any resident cube sits above `coord` in its column.
    #[must_use]
    pub fn has_cube_above(&self, coord: CubeCoord) -> bool {
        self.columns
            .read_sync(&coord.column(), |_, column| column.has_above(coord.0.y))
            .unwrap_or(false)
    }

    /// Number of resident cubes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Whether nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }

    /// Number of columns with at least one resident cube.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Copies out every resident cube.
    #[must_use]
    pub fn cubes(&self) -> Vec<Arc<Cube>> {
        let mut cubes = Vec::with_capacity(self.cubes.len());
        self.cubes.iter_sync(|_, cube| {
            cubes.push(cube.clone());
            true
        });
        cubes
    }

    /// Removes every cube and returns them.
    pub fn drain(&self) -> Vec<Arc<Cube>> {
        let cubes = self.cubes();
        for cube in &cubes {
            self.remove(cube.coord());
        }
        cubes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_exclusive() {
        let resident = ResidentCubes::new();
        let coord = CubeCoord::new(0, 0, 0);
        assert!(resident.insert(Arc::new(Cube::new(coord))));
        assert!(!resident.insert(Arc::new(Cube::new(coord))));
        assert_eq!(resident.len(), 1);
    }

    #[test]
    fn test_column_index_follows_cubes() {
        let resident = ResidentCubes::new();
        resident.insert(Arc::new(Cube::new(CubeCoord::new(1, 0, 1))));
        resident.insert(Arc::new(Cube::new(CubeCoord::new(1, 3, 1))));
        assert!(resident.has_cube_above(CubeCoord::new(1, 0, 1)));
        assert!(resident.has_cube_above(CubeCoord::new(1, -7, 1)));
        assert!(!resident.has_cube_above(CubeCoord::new(1, 3, 1)));
        assert!(!resident.has_cube_above(CubeCoord::new(2, 0, 1)));

        assert!(resident.remove(CubeCoord::new(1, 3, 1)).is_some());
        assert!(!resident.has_cube_above(CubeCoord::new(1, 0, 1)));
        resident.remove(CubeCoord::new(1, 0, 1));
        assert_eq!(resident.column_count(), 0);
        assert!(resident.is_empty());
    }
}
