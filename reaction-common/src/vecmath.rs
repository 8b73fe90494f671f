use serde::{Deserialize, Serialize};

/// A four-channel cell value. Channel 0 (`x`) is the primary reactant
/// concentration, the remaining channels are auxiliary state and alpha.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec4 {
    /// Creates a new Vec4.
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Vec4 { x, y, z, w }
    }

    /// Creates a zero vector.
    pub const fn zero() -> Self {
        Vec4::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Builds a vector from a `[x, y, z, w]` array.
    pub const fn from_array(v: [f32; 4]) -> Self {
        Vec4::new(v[0], v[1], v[2], v[3])
    }

    /// Returns true if every channel of `self` is within `eps` of `other`.
    pub fn approx_eq(&self, other: Vec4, eps: f32) -> bool {
        (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.z - other.z).abs() <= eps
            && (self.w - other.w).abs() <= eps
    }
}

impl From<[f32; 4]> for Vec4 {
    fn from(v: [f32; 4]) -> Self {
        Vec4::from_array(v)
    }
}

/// An unsigned 2D grid coordinate.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UVec2 {
    pub x: u32,
    pub y: u32,
}

impl UVec2 {
    pub const fn new(x: u32, y: u32) -> Self {
        UVec2 { x, y }
    }

    /// Squared euclidean distance to another coordinate.
    pub fn distance_squared(&self, other: UVec2) -> u64 {
        let dx = self.x.abs_diff(other.x) as u64;
        let dy = self.y.abs_diff(other.y) as u64;
        dx * dx + dy * dy
    }
}

impl From<[u32; 2]> for UVec2 {
    fn from(v: [u32; 2]) -> Self {
        UVec2::new(v[0], v[1])
    }
}

/// Clamps a value between a minimum and maximum.
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}
