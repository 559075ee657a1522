use glam::Vec3;

use crate::utilities::{BoundingBox, BoundingSphere};

/// A convex shape described by its support function.
pub trait ConvexSupport {
    /// Point of the shape furthest along `direction`. `direction` doesn't need to be normalized.
    fn support(&self, direction: Vec3) -> Vec3;
}

impl ConvexSupport for BoundingBox {
    #[inline]
    fn support(&self, direction: Vec3) -> Vec3 {
        Vec3::select(direction.cmpgt(Vec3::ZERO), self.max, self.min)
    }
}

impl ConvexSupport for BoundingSphere {
    #[inline]
    fn support(&self, direction: Vec3) -> Vec3 {
        self.center + direction.normalize_or_zero() * self.radius
    }
}

impl<T: ConvexSupport + ?Sized> ConvexSupport for &T {
    #[inline]
    fn support(&self, direction: Vec3) -> Vec3 {
        (**self).support(direction)
    }
}
