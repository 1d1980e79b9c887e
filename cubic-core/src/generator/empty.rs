use crate::cube::Cube;

use super::CubeGenerator;

/// A generator that leaves every cube as air.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyGenerator;

impl CubeGenerator for EmptyGenerator {
    fn populate(&self, _cube: &mut Cube) -> anyhow::Result<()> {
        Ok(())
    }
}
