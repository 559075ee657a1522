use glam::Vec3;

/// Provides simple bounding sphere functionality.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    /// Location of the center of the sphere.
    pub center: Vec3,
    /// Radius of the sphere.
    pub radius: f32,
}

impl BoundingSphere {
    #[inline]
    pub fn new(center: Vec3, radius: f32) -> Self {
        debug_assert!(radius >= 0.0, "Sphere radius must not be negative.");
        Self { center, radius }
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }
}
