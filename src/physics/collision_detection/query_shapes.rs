use glam::{Mat4, Vec3};

use crate::utilities::BoundingBox;

/// Ray from `origin` to `origin + direction`. Hits are reported as a fraction of `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCast {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl RayCast {
    #[inline(always)]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    #[inline(always)]
    pub fn point_on_ray(&self, fraction: f32) -> Vec3 {
        self.origin + fraction * self.direction
    }
}

/// Axis aligned box swept along `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABoxCast {
    pub bounds: BoundingBox,
    pub direction: Vec3,
}

impl AABoxCast {
    #[inline(always)]
    pub fn new(bounds: BoundingBox, direction: Vec3) -> Self {
        Self { bounds, direction }
    }
}

/// Box with a rotation. `orientation` holds the rotation and the center of the box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub orientation: Mat4,
    pub half_extents: Vec3,
}

impl OrientedBox {
    #[inline(always)]
    pub fn new(orientation: Mat4, half_extents: Vec3) -> Self {
        Self {
            orientation,
            half_extents,
        }
    }

    /// Axis aligned bounds of the box.
    pub fn bounding_box(&self) -> BoundingBox {
        let center = self.orientation.w_axis.truncate();
        let extent = self.orientation.x_axis.truncate().abs() * self.half_extents.x
            + self.orientation.y_axis.truncate().abs() * self.half_extents.y
            + self.orientation.z_axis.truncate().abs() * self.half_extents.z;
        BoundingBox::from_center_and_half_extents(center, extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::Quat;

    #[test]
    fn test_oriented_box_bounds() {
        let orientation = Mat4::from_rotation_translation(
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_4),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let bounds = OrientedBox::new(orientation, Vec3::ONE).bounding_box();
        let sqrt2 = std::f32::consts::SQRT_2;
        assert_abs_diff_eq!(bounds.min.x, 1.0 - sqrt2, epsilon = 1e-5);
        assert_abs_diff_eq!(bounds.max.y, 2.0 + sqrt2, epsilon = 1e-5);
        assert_abs_diff_eq!(bounds.min.z, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_point_on_ray() {
        let ray = RayCast::new(Vec3::ONE, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.point_on_ray(0.5), Vec3::new(2.0, 1.0, 1.0));
    }
}
