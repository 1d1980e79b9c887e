//! Block capability interface.
//!
//! The core never looks inside a block state. Everything the cache and light
//! engine need to know is asked through [`BlockProperties`].

use cubic_utils::BlockStateId;
use rustc_hash::FxHashMap;
use serde::Deserialize;

/// Highest opacity or emission a block may report.
pub const MAX_LIGHT: u8 = 15;

/// The narrow view of a block state used by the cache and the light engine.
pub trait BlockProperties: Send + Sync {
    /// Whether the state is empty space.
    fn is_air(&self, state: BlockStateId) -> bool;

    /// How much light is lost passing through the state (0-15).
    fn opacity(&self, state: BlockStateId) -> u8;

    /// Light the state emits on its own (0-15).
    fn light_emission(&self, state: BlockStateId) -> u8;
}

/// A block entry in a [`BlockTable`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockDefinition {
    /// Unique name, e.g. `"stone"`.
    pub name: String,
    /// Opacity, clamped to 15.
    #[serde(default)]
    pub opacity: u8,
    /// Light emission, clamped to 15.
    #[serde(default)]
    pub emission: u8,
    /// Whether this is an air block.
    #[serde(default)]
    pub air: bool,
}

impl BlockDefinition {
    /// Creates a non-air definition.
    #[must_use]
    pub fn new(name: &str, opacity: u8, emission: u8) -> Self {
        Self {
            name: name.to_owned(),
            opacity: opacity.min(MAX_LIGHT),
            emission: emission.min(MAX_LIGHT),
            air: false,
        }
    }
}

/// Table driven [`BlockProperties`] indexed by state id.
///
/// State id 0 is always air. Ids that were never registered answer as
/// fully opaque and dark so stray ids can't leak light.
#[derive(Debug, Clone)]
pub struct BlockTable {
    definitions: Vec<BlockDefinition>,
    by_name: FxHashMap<String, BlockStateId>,
}

impl BlockTable {
    /// Creates a table containing only air.
    #[must_use]
    pub fn new() -> Self {
        let air = BlockDefinition {
            name: "air".to_owned(),
            opacity: 0,
            emission: 0,
            air: true,
        };
        let mut by_name = FxHashMap::default();
        by_name.insert(air.name.clone(), BlockStateId::AIR);
        Self {
            definitions: vec![air],
            by_name,
        }
    }

    /// A small set of common blocks, handy for tests and the demo runner.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_definitions([
            BlockDefinition::new("stone", 15, 0),
            BlockDefinition::new("dirt", 15, 0),
            BlockDefinition::new("grass", 15, 0),
            BlockDefinition::new("glass", 0, 0),
            BlockDefinition::new("leaves", 1, 0),
            BlockDefinition::new("water", 2, 0),
            BlockDefinition::new("torch", 0, 14),
            BlockDefinition::new("lantern", 0, 15),
            BlockDefinition::new("glowstone", 15, 15),
        ])
    }

    /// Builds a table from definitions, registering them in order after air.
    pub fn from_definitions(definitions: impl IntoIterator<Item = BlockDefinition>) -> Self {
        let mut table = Self::new();
        for definition in definitions {
            table.register(definition);
        }
        table
    }

    /// Registers a block and returns its id. Re-registering a name returns
    /// the existing id unchanged.
    pub fn register(&mut self, mut definition: BlockDefinition) -> BlockStateId {
        if let Some(id) = self.by_name.get(&definition.name) {
            return *id;
        }
        definition.opacity = definition.opacity.min(MAX_LIGHT);
        definition.emission = definition.emission.min(MAX_LIGHT);
        let id = BlockStateId(self.definitions.len() as u16);
        self.by_name.insert(definition.name.clone(), id);
        self.definitions.push(definition);
        id
    }

    /// Looks a block up by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<BlockStateId> {
        self.by_name.get(name).copied()
    }

    /// Looks a definition up by id.
    #[must_use]
    pub fn by_state_id(&self, state: BlockStateId) -> Option<&BlockDefinition> {
        self.definitions.get(usize::from(state.0))
    }

    /// Number of registered blocks, air included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Always false, air is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockProperties for BlockTable {
    fn is_air(&self, state: BlockStateId) -> bool {
        self.by_state_id(state).is_some_and(|def| def.air)
    }

    fn opacity(&self, state: BlockStateId) -> u8 {
        self.by_state_id(state).map_or(MAX_LIGHT, |def| def.opacity)
    }

    fn light_emission(&self, state: BlockStateId) -> u8 {
        self.by_state_id(state).map_or(0, |def| def.emission)
    }
}
