use glam::Vec3;

use super::bounding_sphere::BoundingSphere;
use super::containment_type::ContainmentType;

/// Provides simple axis-aligned bounding box functionality.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Location with the lowest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub min: Vec3,
    /// Location with the highest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub max: Vec3,
}

impl Default for BoundingBox {
    #[inline]
    fn default() -> Self {
        Self::invalid()
    }
}

impl BoundingBox {
    /// Constructs a bounding box from the specified minimum and maximum.
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an inverted box that encapsulates nothing and overlaps nothing.
    #[inline]
    pub fn invalid() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(-f32::MAX),
        }
    }

    /// Creates a box around a center with the given half extents.
    #[inline]
    pub fn from_center_and_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Whether min <= max on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Half the size of the box along each axis.
    #[inline]
    pub fn extent(&self) -> Vec3 {
        0.5 * (self.max - self.min)
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grows this box so that it contains `other`.
    #[inline]
    pub fn encapsulate(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grows this box so that it contains `point`.
    #[inline]
    pub fn encapsulate_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Widens the box by `amount` on every side.
    #[inline]
    pub fn expand_by(&mut self, amount: Vec3) {
        self.min -= amount;
        self.max += amount;
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects(a: Self, b: Self) -> bool {
        Self::intersects_bounds(a.min, a.max, b.min, b.max)
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects_bounds(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
        let no_intersection_on_axes = max_a.cmplt(min_b) | max_b.cmplt(min_a);
        !no_intersection_on_axes.any()
    }

    #[inline]
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        Self::intersects(*self, *other)
    }

    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        (self.min.cmple(point) & point.cmple(self.max)).all()
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> (Vec3, Vec3) {
        (min_a.min(min_b), max_a.max(max_b))
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn create_merged_boxes(a: Self, b: Self) -> Self {
        let (min, max) = Self::create_merged(a.min, a.max, b.min, b.max);
        Self { min, max }
    }

    /// Determines if a bounding box intersects a bounding sphere.
    #[inline]
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        let offset = sphere.center - self.min.max(sphere.center).min(self.max);
        offset.dot(offset) <= sphere.radius * sphere.radius
    }

    #[inline]
    pub fn contains(&self, other: &BoundingBox) -> ContainmentType {
        if self.max.x < other.min.x
            || self.min.x > other.max.x
            || self.max.y < other.min.y
            || self.min.y > other.max.y
            || self.max.z < other.min.z
            || self.min.z > other.max.z
        {
            ContainmentType::Disjoint
        } else if self.min.x <= other.min.x
            && self.max.x >= other.max.x
            && self.min.y <= other.min.y
            && self.max.y >= other.max.y
            && self.min.z <= other.min.z
            && self.max.z >= other.max.z
        {
            ContainmentType::Contains
        } else {
            ContainmentType::Intersects
        }
    }

    /// Creates the smallest possible bounding box that contains a list of points.
    /// An empty list yields an invalid box.
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut result = Self::invalid();
        for point in points {
            result.encapsulate_point(*point);
        }
        result
    }

    /// Creates a bounding box from a bounding sphere.
    #[inline]
    pub fn from_sphere(sphere: &BoundingSphere) -> Self {
        let radius = Vec3::splat(sphere.radius);
        Self {
            min: sphere.center - radius,
            max: sphere.center + radius,
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.min, self.max)
    }
}
