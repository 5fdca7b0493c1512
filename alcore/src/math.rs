//! Math types for alcore

pub use glam::Vec3;

/// Listener orientation as an "at" and "up" vector pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub at: Vec3,
    pub up: Vec3,
}

impl Orientation {
    pub fn new(at: Vec3, up: Vec3) -> Self {
        Self { at, up }
    }

    pub fn identity() -> Self {
        Self {
            at: -Vec3::Z,
            up: Vec3::Y,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.at.normalize_or_zero()
    }

    pub fn up(&self) -> Vec3 {
        self.up.normalize_or_zero()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up()).normalize_or_zero()
    }

    pub fn is_finite(&self) -> bool {
        self.at.is_finite() && self.up.is_finite()
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}
