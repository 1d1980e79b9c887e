//! Small integer vector math.

pub mod vector3;

pub use vector3::Vector3;
