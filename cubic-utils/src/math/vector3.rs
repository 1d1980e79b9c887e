use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A three component vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vector3<T> {
    /// The x component.
    pub x: T,
    /// The y component.
    pub y: T,
    /// The z component.
    pub z: T,
}

impl<T> Vector3<T> {
    /// Creates a new vector.
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl<T: Add<Output = T>> Add for Vector3<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl<T: Sub<Output = T>> Sub for Vector3<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for Vector3<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Vector3<i32> {
    /// Largest absolute component difference.
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> i32 {
        let d = self - other;
        d.x.abs().max(d.y.abs()).max(d.z.abs())
    }

    /// Squared euclidean length, widened to avoid overflow.
    #[must_use]
    pub fn length_squared(self) -> i64 {
        let (x, y, z) = (i64::from(self.x), i64::from(self.y), i64::from(self.z));
        x * x + y * y + z * z
    }
}
