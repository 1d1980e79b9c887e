use std::{collections::BTreeMap, sync::Arc};

use cubic_utils::ColumnPos;

use super::Cube;

/// The resident cubes of one column, ordered by y.
#[derive(Debug)]
pub struct Column {
    pos: ColumnPos,
    cubes: BTreeMap<i32, Arc<Cube>>,
}

impl Column {
    /// Creates an empty column.
    #[must_use]
    pub fn new(pos: ColumnPos) -> Self {
        Self {
            pos,
            cubes: BTreeMap::new(),
        }
    }

    /// The column position.
    #[must_use]
    pub const fn pos(&self) -> ColumnPos {
        self.pos
    }

    /// Adds a cube. The cube must belong to this column.
    pub fn insert(&mut self, cube: Arc<Cube>) {
        debug_assert_eq!(cube.coord().column(), self.pos);
        self.cubes.insert(cube.coord().0.y, cube);
    }

    /// Removes the cube at `y`.
    pub fn remove(&mut self, y: i32) -> Option<Arc<Cube>> {
        self.cubes.remove(&y)
    }

    /// The cube at `y`, if resident.
    #[must_use]
    pub fn get(&self, y: i32) -> Option<&Arc<Cube>> {
        self.cubes.get(&y)
    }

    /// Whether any resident cube sits above `y`.
    #[must_use]
    pub fn has_above(&self, y: i32) -> bool {
        self.cubes.range(y + 1..).next().is_some()
    }

    /// The highest resident cube y.
    #[must_use]
    pub fn top(&self) -> Option<i32> {
        self.cubes.keys().next_back().copied()
    }

    /// Number of resident cubes in the column.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cubes.len()
    }

    /// Whether the column holds no cubes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cubes.is_empty()
    }
}
