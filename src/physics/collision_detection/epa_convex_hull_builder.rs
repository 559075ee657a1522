//! Convex hull that grows one point at a time, as used by the expanding polytope algorithm.
//!
//! The builder indexes into a point array owned by the caller. Points are only ever appended to
//! that array, so every call takes it as a slice and triangles store indices into it.

use glam::Vec3;

use crate::utilities::{binary_heap_pop, binary_heap_push};

/// Maximum number of triangles alive in one hull.
pub const MAX_TRIANGLES: usize = 256;
/// Maximum number of points a hull can be built from.
pub const MAX_POINTS: usize = 128;
/// Maximum number of edges in the silhouette found when adding a point.
pub const MAX_EDGE_LENGTH: usize = 128;
/// Triangles whose normal has a squared length below this are degenerate and never queued.
pub const MIN_TRIANGLE_AREA: f32 = 1.0e-10;
/// Tolerance on the barycentric coordinates for the closest point to count as interior.
pub const BARYCENTRIC_EPSILON: f32 = 1.0e-3;

/// Index of a triangle in the builder's triangle pool.
pub type TriangleId = usize;

/// Triangles created by a single [`EPAConvexHullBuilder::add_point`] call.
pub type NewTriangles = Vec<TriangleId>;

/// Edge of a triangle, running from `start_index` to the start of the next edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct Edge {
    /// Triangle on the other side of this edge.
    pub neighbour_triangle: Option<TriangleId>,
    /// Index of the matching edge in `neighbour_triangle`.
    pub neighbour_edge: usize,
    /// Point index of the vertex this edge starts at.
    pub start_index: usize,
}

/// Triangle of the hull, with its distance to the origin computed at construction.
#[derive(Debug, Clone)]
pub struct Triangle {
    pub edges: [Edge; 3],
    /// Not normalized, points out of the hull.
    pub normal: Vec3,
    pub centroid: Vec3,
    /// Squared distance from the origin to the plane of the triangle, negative when the origin is
    /// in front of the triangle. `f32::MAX` for degenerate triangles.
    pub closest_len_sq: f32,
    /// Barycentric coordinates of the point closest to the origin, see
    /// [`Triangle::lambda_relative_to_0`].
    pub lambda: [f32; 2],
    /// If true the closest point is `y0 + l0 (y1 - y0) + l1 (y2 - y0)`, otherwise it is
    /// `y1 + l0 (y0 - y1) + l1 (y2 - y1)`.
    pub lambda_relative_to_0: bool,
    /// The projection of the origin on the plane falls inside the triangle.
    pub closest_point_interior: bool,
    pub removed: bool,
    pub in_queue: bool,
}

impl Triangle {
    pub fn new(index0: usize, index1: usize, index2: usize, positions: &[Vec3]) -> Self {
        let y0 = positions[index0];
        let y1 = positions[index1];
        let y2 = positions[index2];

        let mut triangle = Self {
            edges: [
                Edge { start_index: index0, ..Edge::default() },
                Edge { start_index: index1, ..Edge::default() },
                Edge { start_index: index2, ..Edge::default() },
            ],
            normal: Vec3::ZERO,
            centroid: (y0 + y1 + y2) / 3.0,
            closest_len_sq: f32::MAX,
            lambda: [0.0; 2],
            lambda_relative_to_0: true,
            closest_point_interior: false,
            removed: false,
            in_queue: false,
        };

        let y10 = y1 - y0;
        let y20 = y2 - y0;
        let y21 = y2 - y1;
        let y10_dot_y10 = y10.length_squared();
        let y20_dot_y20 = y20.length_squared();
        let y21_dot_y21 = y21.length_squared();

        // Use y10 and the shorter of y20 and y21 so the cross product loses the least precision.
        let (normal, lambda) = if y20_dot_y20 < y21_dot_y21 {
            let normal = y10.cross(y20);
            let y10_dot_y20 = y10.dot(y20);
            let det = y10_dot_y10 * y20_dot_y20 - y10_dot_y20 * y10_dot_y20;
            let lambda = (det > 0.0).then(|| {
                let y0_dot_y10 = y0.dot(y10);
                let y0_dot_y20 = y0.dot(y20);
                [
                    (y10_dot_y20 * y0_dot_y20 - y20_dot_y20 * y0_dot_y10) / det,
                    (y10_dot_y20 * y0_dot_y10 - y10_dot_y10 * y0_dot_y20) / det,
                ]
            });
            triangle.lambda_relative_to_0 = true;
            (normal, lambda)
        } else {
            let normal = y10.cross(y21);
            let y10_dot_y21 = y10.dot(y21);
            let det = y10_dot_y10 * y21_dot_y21 - y10_dot_y21 * y10_dot_y21;
            let lambda = (det > 0.0).then(|| {
                let y1_dot_y10 = y1.dot(y10);
                let y1_dot_y21 = y1.dot(y21);
                [
                    (y21_dot_y21 * y1_dot_y10 - y10_dot_y21 * y1_dot_y21) / det,
                    (y10_dot_y21 * y1_dot_y10 - y10_dot_y10 * y1_dot_y21) / det,
                ]
            });
            triangle.lambda_relative_to_0 = false;
            (normal, lambda)
        };
        triangle.normal = normal;

        let normal_len_sq = normal.length_squared();
        if normal_len_sq > MIN_TRIANGLE_AREA {
            // Signed so that the side of the origin is preserved.
            let c_dot_n = triangle.centroid.dot(normal);
            triangle.closest_len_sq = c_dot_n.abs() * c_dot_n / normal_len_sq;

            if let Some([l0, l1]) = lambda {
                triangle.lambda = [l0, l1];
                triangle.closest_point_interior = l0 > -BARYCENTRIC_EPSILON
                    && l1 > -BARYCENTRIC_EPSILON
                    && l0 + l1 < 1.0 + BARYCENTRIC_EPSILON;
            }
        }

        triangle
    }

    /// The triangle has no usable normal.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.normal.length_squared() <= MIN_TRIANGLE_AREA
    }

    /// `position` is in front of the plane of the triangle.
    #[inline]
    pub fn is_facing(&self, position: Vec3) -> bool {
        self.normal.dot(position - self.centroid) > 0.0
    }

    /// The origin is in front of the plane of the triangle.
    #[inline]
    pub fn is_facing_origin(&self) -> bool {
        self.normal.dot(self.centroid) < 0.0
    }

    /// Point indices of the three vertices, in winding order.
    #[inline]
    pub fn vertices(&self) -> [usize; 3] {
        [self.edges[0].start_index, self.edges[1].start_index, self.edges[2].start_index]
    }

    /// Point of the triangle closest to the origin, interpolated over `points` with the stored
    /// barycentric coordinates. `points` can be any per vertex attribute indexed like the hull.
    #[inline]
    pub fn interpolate(&self, points: &[Vec3]) -> Vec3 {
        let [i0, i1, i2] = self.vertices();
        let (p0, p1, p2) = (points[i0], points[i1], points[i2]);
        let [l0, l1] = self.lambda;
        if self.lambda_relative_to_0 {
            p0 + l0 * (p1 - p0) + l1 * (p2 - p0)
        } else {
            p1 + l0 * (p0 - p1) + l1 * (p2 - p1)
        }
    }
}

/// Fixed size pool of triangles. Freed slots are reused first, otherwise the next never used slot
/// above the high water mark is handed out.
#[derive(Debug)]
pub struct TriangleFactory {
    triangles: Vec<Triangle>,
    free_list: Vec<TriangleId>,
}

impl Default for TriangleFactory {
    fn default() -> Self {
        Self {
            triangles: Vec::with_capacity(MAX_TRIANGLES),
            free_list: Vec::with_capacity(MAX_TRIANGLES),
        }
    }
}

impl TriangleFactory {
    /// Forgets all triangles.
    pub fn clear(&mut self) {
        self.triangles.clear();
        self.free_list.clear();
    }

    /// # Returns
    /// `None` when all [`MAX_TRIANGLES`] slots are in use.
    pub fn create_triangle(
        &mut self,
        index0: usize,
        index1: usize,
        index2: usize,
        positions: &[Vec3],
    ) -> Option<TriangleId> {
        let triangle = Triangle::new(index0, index1, index2, positions);
        if let Some(id) = self.free_list.pop() {
            self.triangles[id] = triangle;
            Some(id)
        } else if self.triangles.len() < MAX_TRIANGLES {
            self.triangles.push(triangle);
            Some(self.triangles.len() - 1)
        } else {
            None
        }
    }

    pub fn free_triangle(&mut self, id: TriangleId) {
        debug_assert!(!self.free_list.contains(&id), "Triangle freed twice!");
        self.free_list.push(id);
    }

    /// Number of slots never handed out.
    #[inline]
    pub fn num_unused(&self) -> usize {
        MAX_TRIANGLES - self.triangles.len()
    }

    #[inline(always)]
    pub fn get(&self, id: TriangleId) -> &Triangle {
        &self.triangles[id]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: TriangleId) -> &mut Triangle {
        &mut self.triangles[id]
    }
}

struct FloodFillEntry {
    triangle: TriangleId,
    /// Edge through which the triangle was entered.
    edge: usize,
    /// Number of edges already visited, starting from `edge`.
    iteration: usize,
}

/// Convex hull with a priority queue of triangles ordered by distance to the origin.
#[derive(Debug, Default)]
pub struct EPAConvexHullBuilder {
    factory: TriangleFactory,
    /// Binary heap with the triangle closest to the origin on top.
    queue: Vec<TriangleId>,
}

impl EPAConvexHullBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new hull from two back to back triangles through three points.
    pub fn initialize(&mut self, index0: usize, index1: usize, index2: usize, positions: &[Vec3]) {
        self.factory.clear();
        self.queue.clear();

        let (Some(t1), Some(t2)) = (
            self.factory.create_triangle(index0, index1, index2, positions),
            self.factory.create_triangle(index0, index2, index1, positions),
        ) else {
            unreachable!("An empty factory always has room for two triangles");
        };

        self.link_triangle(t1, 0, t2, 2);
        self.link_triangle(t1, 1, t2, 1);
        self.link_triangle(t1, 2, t2, 0);

        self.add_to_queue(t1);
        self.add_to_queue(t2);
    }

    #[inline(always)]
    pub fn triangle(&self, id: TriangleId) -> &Triangle {
        self.factory.get(id)
    }

    #[inline]
    pub fn has_next_triangle(&self) -> bool {
        !self.queue.is_empty()
    }

    #[inline]
    pub fn peek_closest_triangle_in_queue(&self) -> Option<TriangleId> {
        self.queue.first().copied()
    }

    pub fn pop_closest_triangle_from_queue(&mut self) -> Option<TriangleId> {
        if self.queue.is_empty() {
            return None;
        }
        let factory = &self.factory;
        binary_heap_pop(&mut self.queue, |&a, &b| Self::is_further(factory, a, b));
        self.queue.pop()
    }

    /// Returns a triangle to the pool. It must no longer be linked or queued.
    pub fn free_triangle(&mut self, id: TriangleId) {
        debug_assert!(
            self.factory.get(id).edges.iter().all(|edge| edge.neighbour_triangle.is_none()),
            "Freeing a linked triangle!"
        );
        self.factory.free_triangle(id);
    }

    /// Finds the queued triangle that `position` is furthest in front of.
    ///
    /// # Returns
    /// The triangle and the squared distance from its plane to `position`, or `None` if
    /// `position` is behind all of them.
    pub fn find_facing_triangle(&self, position: Vec3) -> Option<(TriangleId, f32)> {
        let mut best = None;
        let mut best_dist_sq = 0.0;
        for &id in &self.queue {
            let triangle = self.factory.get(id);
            if triangle.removed {
                continue;
            }
            let dot = triangle.normal.dot(position - triangle.centroid);
            if dot > 0.0 {
                let dist_sq = dot * dot / triangle.normal.length_squared();
                if dist_sq > best_dist_sq {
                    best = Some(id);
                    best_dist_sq = dist_sq;
                }
            }
        }
        best.map(|id| (id, best_dist_sq))
    }

    /// Adds point `index` to the hull, replacing all triangles it is in front of, starting from
    /// `facing`, by a fan of triangles to the silhouette.
    ///
    /// New triangles are queued when their closest point is interior and closer than
    /// `closest_dist_sq`, or when the origin is in front of them. All created triangles are
    /// appended to `new_triangles`.
    ///
    /// # Returns
    /// False if the silhouette is not a single loop or the triangle pool ran out. The hull can't
    /// be used after that.
    pub fn add_point(
        &mut self,
        positions: &[Vec3],
        facing: TriangleId,
        index: usize,
        closest_dist_sq: f32,
        new_triangles: &mut NewTriangles,
    ) -> bool {
        let position = positions[index];

        let mut edges = Vec::with_capacity(MAX_EDGE_LENGTH);
        if !self.find_edge(facing, position, &mut edges) {
            return false;
        }

        let first_new = new_triangles.len();
        let num_edges = edges.len();
        for i in 0..num_edges {
            let Some(id) = self.factory.create_triangle(
                edges[i].start_index,
                edges[(i + 1) % num_edges].start_index,
                index,
                positions,
            ) else {
                return false;
            };
            new_triangles.push(id);

            let triangle = self.factory.get(id);
            if (triangle.closest_point_interior && triangle.closest_len_sq < closest_dist_sq)
                || triangle.closest_len_sq < 0.0
            {
                self.add_to_queue(id);
            }
        }

        let created = &new_triangles[first_new..];
        for (i, edge) in edges.iter().enumerate() {
            let Some(neighbour) = edge.neighbour_triangle else {
                return false;
            };
            self.link_triangle(created[i], 0, neighbour, edge.neighbour_edge);
            self.link_triangle(created[i], 1, created[(i + 1) % num_edges], 2);
        }

        true
    }

    /// Flood fills from `facing` over all triangles `vertex` is in front of, marking them removed
    /// and collecting the edges of the silhouette in order.
    fn find_edge(&mut self, facing: TriangleId, vertex: Vec3, edges: &mut Vec<Edge>) -> bool {
        self.factory.get_mut(facing).removed = true;

        let mut stack = Vec::with_capacity(MAX_EDGE_LENGTH);
        stack.push(FloodFillEntry {
            triangle: facing,
            edge: 0,
            iteration: 0,
        });
        // The first edge of the facing triangle hasn't been visited yet.
        let mut first = true;
        let mut next_expected_start = None;

        while let Some(entry) = stack.last_mut() {
            if first {
                first = false;
            } else {
                entry.iteration += 1;
            }

            if entry.iteration >= 3 {
                let id = entry.triangle;
                stack.pop();
                self.unlink_triangle(id);
                continue;
            }

            let edge = self.factory.get(entry.triangle).edges[(entry.edge + entry.iteration) % 3];
            let Some(neighbour_id) = edge.neighbour_triangle else {
                continue;
            };
            let neighbour = self.factory.get(neighbour_id);
            if neighbour.removed {
                continue;
            }

            if neighbour.is_facing(vertex) {
                if stack.len() >= MAX_EDGE_LENGTH {
                    return false;
                }
                self.factory.get_mut(neighbour_id).removed = true;
                // The edge we came through is skipped.
                stack.push(FloodFillEntry {
                    triangle: neighbour_id,
                    edge: edge.neighbour_edge,
                    iteration: 0,
                });
                first = false;
            } else {
                // A silhouette that doesn't connect to the previous edge means the point is almost
                // coplanar with some triangles, adding it would be unstable.
                if next_expected_start.is_some_and(|start| start != edge.start_index) {
                    return false;
                }
                next_expected_start = Some(neighbour.edges[edge.neighbour_edge].start_index);

                if edges.len() >= MAX_EDGE_LENGTH {
                    return false;
                }
                edges.push(edge);
            }
        }

        debug_assert!(
            edges.is_empty() || Some(edges[0].start_index) == next_expected_start,
            "Silhouette is not a closed loop!"
        );

        // Fewer than 3 edges happens when the point lies in the plane of two back to back
        // triangles and both were classified as facing it.
        edges.len() >= 3
    }

    fn link_triangle(&mut self, t1: TriangleId, edge1: usize, t2: TriangleId, edge2: usize) {
        debug_assert_ne!(t1, t2, "Can't link a triangle to itself!");
        {
            let e1 = &mut self.factory.get_mut(t1).edges[edge1];
            debug_assert!(e1.neighbour_triangle.is_none(), "Edge is already linked!");
            e1.neighbour_triangle = Some(t2);
            e1.neighbour_edge = edge2;
        }
        let e2 = &mut self.factory.get_mut(t2).edges[edge2];
        debug_assert!(e2.neighbour_triangle.is_none(), "Edge is already linked!");
        e2.neighbour_triangle = Some(t1);
        e2.neighbour_edge = edge1;

        debug_assert_eq!(
            self.factory.get(t1).edges[edge1].start_index,
            self.factory.get(t2).edges[(edge2 + 1) % 3].start_index,
            "Linked edges must run in opposite directions!"
        );
    }

    /// Detaches a removed triangle from its neighbours and frees it unless the queue still holds it.
    fn unlink_triangle(&mut self, id: TriangleId) {
        for i in 0..3 {
            let edge = self.factory.get(id).edges[i];
            if let Some(neighbour) = edge.neighbour_triangle {
                let neighbour_edge = &mut self.factory.get_mut(neighbour).edges[edge.neighbour_edge];
                debug_assert_eq!(neighbour_edge.neighbour_triangle, Some(id));
                neighbour_edge.neighbour_triangle = None;
                self.factory.get_mut(id).edges[i].neighbour_triangle = None;
            }
        }

        // Queued triangles are freed when they are popped.
        if !self.factory.get(id).in_queue {
            self.free_triangle(id);
        }
    }

    fn add_to_queue(&mut self, id: TriangleId) {
        self.factory.get_mut(id).in_queue = true;
        self.queue.push(id);
        let factory = &self.factory;
        binary_heap_push(&mut self.queue, |&a, &b| Self::is_further(factory, a, b));
    }

    /// Heap order that puts the triangle closest to the origin on top.
    #[inline]
    fn is_further(factory: &TriangleFactory, a: TriangleId, b: TriangleId) -> bool {
        factory.get(a).closest_len_sq > factory.get(b).closest_len_sq
    }
}
