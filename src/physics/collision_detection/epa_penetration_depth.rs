use glam::{Quat, Vec3};

use super::convex_support::ConvexSupport;
use super::epa_convex_hull_builder::{EPAConvexHullBuilder, NewTriangles, MAX_POINTS};

/// Points added while trying to get the origin inside the hull before giving up.
const MAX_POINTS_TO_INCLUDE_ORIGIN_IN_HULL: usize = 32;

/// A point of the Minkowski difference `A - B` together with the points of `A` and `B` it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportPoint {
    pub p: Vec3,
    pub q: Vec3,
}

impl SupportPoint {
    /// Support point of `A - B` in `direction`.
    #[inline]
    pub fn new<A, B>(a: &A, b: &B, direction: Vec3) -> Self
    where
        A: ConvexSupport + ?Sized,
        B: ConvexSupport + ?Sized,
    {
        Self {
            p: a.support(direction),
            q: b.support(-direction),
        }
    }

    #[inline(always)]
    pub fn y(&self) -> Vec3 {
        self.p - self.q
    }
}

/// Penetration between two shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenetrationDepth {
    /// Moving `B` by this vector separates the shapes. The length is the penetration depth.
    pub v: Vec3,
    /// Deepest point of `A` inside `B`.
    pub point_a: Vec3,
    /// Deepest point of `B` inside `A`.
    pub point_b: Vec3,
}

/// Support points of the hull, stored as separate arrays so the hull builder can index `y`.
#[derive(Debug, Default)]
struct SupportPoints {
    y: Vec<Vec3>,
    p: Vec<Vec3>,
    q: Vec<Vec3>,
}

impl SupportPoints {
    fn clear(&mut self) {
        self.y.clear();
        self.p.clear();
        self.q.clear();
    }

    #[inline]
    fn len(&self) -> usize {
        self.y.len()
    }

    fn push(&mut self, point: SupportPoint) -> usize {
        self.y.push(point.y());
        self.p.push(point.p);
        self.q.push(point.q);
        self.y.len() - 1
    }

    fn add<A, B>(&mut self, a: &A, b: &B, direction: Vec3) -> (usize, Vec3)
    where
        A: ConvexSupport + ?Sized,
        B: ConvexSupport + ?Sized,
    {
        let index = self.push(SupportPoint::new(a, b, direction));
        (index, self.y[index])
    }
}

/// Expanding polytope penetration depth between two convex shapes.
///
/// Keeps its point and triangle storage between calls. Not reentrant, use one per thread.
#[derive(Debug, Default)]
pub struct EPAPenetrationDepth {
    hull: EPAConvexHullBuilder,
    support_points: SupportPoints,
}

impl EPAPenetrationDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Penetration depth between `a` and `b` without a starting simplex.
    ///
    /// `tolerance` is the relative error on the squared penetration depth at which the search
    /// stops.
    pub fn penetration_depth<A, B>(&mut self, a: &A, b: &B, tolerance: f32) -> Option<PenetrationDepth>
    where
        A: ConvexSupport + ?Sized,
        B: ConvexSupport + ?Sized,
    {
        self.penetration_depth_step_epa(a, b, tolerance, &[])
    }

    /// Penetration depth between `a` and `b`, which must overlap, starting from `simplex`, the
    /// points of `A - B` a previous closest point search ended with.
    ///
    /// # Returns
    /// `None` if the shapes don't overlap or only touch, or if the hull ran into its limits
    /// before the origin could be enclosed.
    pub fn penetration_depth_step_epa<A, B>(
        &mut self,
        a: &A,
        b: &B,
        tolerance: f32,
        simplex: &[SupportPoint],
    ) -> Option<PenetrationDepth>
    where
        A: ConvexSupport + ?Sized,
        B: ConvexSupport + ?Sized,
    {
        debug_assert!(tolerance >= 10.0 * f32::EPSILON, "Tolerance is too small to converge!");

        let points = &mut self.support_points;
        points.clear();
        for &point in simplex.iter().take(MAX_POINTS_TO_INCLUDE_ORIGIN_IN_HULL) {
            points.push(point);
        }

        match points.len() {
            0 | 1 => {
                // A single point must be the origin, which doesn't help. Surround the origin with
                // a tetrahedron instead.
                debug_assert!(points.y.is_empty() || points.y[0].length_squared() <= 1.0e-8);
                points.clear();
                points.add(a, b, Vec3::new(0.0, 1.0, 0.0));
                points.add(a, b, Vec3::new(-1.0, -1.0, -1.0));
                points.add(a, b, Vec3::new(1.0, -1.0, -1.0));
                points.add(a, b, Vec3::new(0.0, -1.0, 1.0));
            }
            2 => {
                // Three directions perpendicular to the segment, 120 degrees apart.
                let axis = (points.y[1] - points.y[0]).normalize_or_zero();
                if axis == Vec3::ZERO {
                    return None;
                }
                let rotation = Quat::from_axis_angle(axis, 120.0_f32.to_radians());
                let dir1 = axis.any_orthonormal_vector();
                let dir2 = rotation * dir1;
                let dir3 = rotation * dir2;
                points.add(a, b, dir1);
                points.add(a, b, dir2);
                points.add(a, b, dir3);
            }
            _ => {}
        }

        let hull = &mut self.hull;
        hull.initialize(0, 1, 2, &points.y);
        let mut new_triangles = NewTriangles::with_capacity(MAX_POINTS);
        for index in 3..points.len() {
            if let Some((facing, _)) = hull.find_facing_triangle(points.y[index]) {
                new_triangles.clear();
                // The old triangles are already unlinked when this fails, the hull is lost.
                if !hull.add_point(&points.y, facing, index, f32::MAX, &mut new_triangles) {
                    return None;
                }
            }
        }

        // Grow the hull towards the origin until it is inside.
        loop {
            let closest = hull.peek_closest_triangle_in_queue()?;
            let triangle = hull.triangle(closest);
            let normal = triangle.normal;

            // Removed triangles stay in the heap until popped.
            if triangle.removed {
                hull.pop_closest_triangle_from_queue();
                if !hull.has_next_triangle() {
                    return None;
                }
                hull.free_triangle(closest);
                continue;
            }

            if triangle.closest_len_sq >= 0.0 {
                break;
            }

            hull.pop_closest_triangle_from_queue();

            let (index, w) = points.add(a, b, normal);

            new_triangles.clear();
            if !hull.triangle(closest).is_facing(w)
                || !hull.add_point(&points.y, closest, index, f32::MAX, &mut new_triangles)
            {
                return None;
            }
            debug_assert!(hull.triangle(closest).removed);
            hull.free_triangle(closest);

            if !hull.has_next_triangle() || points.len() >= MAX_POINTS_TO_INCLUDE_ORIGIN_IN_HULL {
                return None;
            }
        }

        let mut closest_dist_sq = f32::MAX;
        let mut last = None;
        let mut flip_v_sign = false;

        while hull.has_next_triangle() && points.len() < MAX_POINTS {
            let Some(closest) = hull.pop_closest_triangle_from_queue() else {
                break;
            };
            let triangle = hull.triangle(closest);

            if triangle.removed {
                hull.free_triangle(closest);
                continue;
            }

            // Everything left in the queue is further away than the best point found.
            if triangle.closest_len_sq >= closest_dist_sq {
                break;
            }

            if let Some(previous) = last.replace(closest) {
                hull.free_triangle(previous);
            }

            let triangle = hull.triangle(closest);
            let normal = triangle.normal;
            let closest_len_sq = triangle.closest_len_sq;
            let (index, w) = points.add(a, b, normal);

            // A separating axis. Can happen when rounding makes the shapes look bigger than they are.
            let dot = normal.dot(w);
            if dot < 0.0 {
                return None;
            }

            let dist_sq = dot * dot / normal.length_squared();
            if dist_sq - closest_len_sq < closest_len_sq * tolerance {
                break;
            }

            closest_dist_sq = closest_dist_sq.min(dist_sq);

            // The support point isn't in front of the triangle, numerical precision is reached.
            if !hull.triangle(closest).is_facing(w) {
                break;
            }

            new_triangles.clear();
            if !hull.add_point(&points.y, closest, index, closest_dist_sq, &mut new_triangles) {
                break;
            }

            // New triangles facing the origin mean the hull became concave. The origin may be on the
            // wrong side of the triangle, so check if penetrating the other way is shallower.
            if new_triangles.iter().any(|&id| hull.triangle(id).is_facing_origin()) {
                let w2 = a.support(-normal) - b.support(normal);
                let dot2 = -normal.dot(w2);
                if dot2 < dot {
                    flip_v_sign = true;
                }
                break;
            }
        }

        // Without a last triangle the hull is flat and the shapes only touch.
        let last = hull.triangle(last?);

        let mut v = (last.centroid.dot(last.normal) / last.normal.length_squared()) * last.normal;
        if v.length_squared() <= 1.0e-12 {
            return None;
        }
        if flip_v_sign {
            v = -v;
        }

        Some(PenetrationDepth {
            v,
            point_a: last.interpolate(&points.p),
            point_b: last.interpolate(&points.q),
        })
    }
}
