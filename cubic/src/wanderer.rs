//! A simulated observer that walks the world.

use cubic_core::RetentionRadius;
use cubic_utils::{BlockPos, CubeCoord};
use uuid::Uuid;

/// Walking directions along the ground, turned through in order.
const HEADINGS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Steps walked before turning.
pub const TURN_EVERY: u64 = 96;

/// An observer walking one block per step around a square.
#[derive(Debug, Clone)]
pub struct Wanderer {
    id: Uuid,
    position: BlockPos,
    radius: RetentionRadius,
    heading: usize,
    steps: u64,
}

impl Wanderer {
    /// Creates a wanderer standing at `position` and heading towards +x.
    #[must_use]
    pub fn new(position: BlockPos, radius: RetentionRadius) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            radius,
            heading: 0,
            steps: 0,
        }
    }

    /// The observer id registered with the cache.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Where the wanderer stands.
    #[must_use]
    pub const fn position(&self) -> BlockPos {
        self.position
    }

    /// How far around the wanderer cubes stay resident.
    #[must_use]
    pub const fn radius(&self) -> RetentionRadius {
        self.radius
    }

    /// The cube the wanderer stands in.
    #[must_use]
    pub const fn cube(&self) -> CubeCoord {
        self.position.cube_coord()
    }

    /// Walks one block. Returns true if that entered another cube.
    pub fn step(&mut self) -> bool {
        let before = self.cube();
        let (dx, dz) = HEADINGS[self.heading];
        self.position = self.position.offset(dx, 0, dz);
        self.steps += 1;
        if self.steps % TURN_EVERY == 0 {
            self.heading = (self.heading + 1) % HEADINGS.len();
        }
        self.cube() != before
    }

    /// Every cube within the retention radius, as a box.
    pub fn surroundings(&self) -> impl Iterator<Item = CubeCoord> + use<> {
        let center = self.cube();
        let h = self.radius.horizontal.max(0);
        let v = self.radius.vertical.max(0);
        (-h..=h).flat_map(move |dx| {
            (-v..=v).flat_map(move |dy| (-h..=h).map(move |dz| center.offset(dx, dy, dz)))
        })
    }
}
