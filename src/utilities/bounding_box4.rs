use glam::{BVec3, Mat4, Vec3, Vec4};

use super::bounding_box::BoundingBox;

/// Four axis-aligned bounding boxes stored as six parallel `Vec4` lanes so that a query shape can be
/// tested against all of them in one pass.
///
/// Test functions return a bit mask where bit `i` is set if box `i` passes.
#[derive(Clone, Copy, Debug)]
pub struct BoundingBox4 {
    pub min_x: Vec4,
    pub min_y: Vec4,
    pub min_z: Vec4,
    pub max_x: Vec4,
    pub max_y: Vec4,
    pub max_z: Vec4,
}

/// Precomputed reciprocal of a ray direction, clamping axes parallel to the slabs.
#[derive(Clone, Copy, Debug)]
pub struct RayInvDirection {
    pub inv_direction: Vec3,
    pub is_parallel: BVec3,
}

impl RayInvDirection {
    #[inline(always)]
    pub fn new(direction: Vec3) -> Self {
        let is_parallel = direction.abs().cmple(Vec3::splat(1.0e-20));
        // Parallel axes get a dummy direction of 1 so the reciprocal stays finite; their results are
        // masked out in the slab test.
        let inv_direction = Vec3::select(is_parallel, Vec3::ONE, direction).recip();
        Self {
            inv_direction,
            is_parallel,
        }
    }
}

impl BoundingBox4 {
    /// Returns the box stored in the given lane.
    #[inline(always)]
    pub fn get(&self, lane: usize) -> BoundingBox {
        BoundingBox::new(
            Vec3::new(self.min_x[lane], self.min_y[lane], self.min_z[lane]),
            Vec3::new(self.max_x[lane], self.max_y[lane], self.max_z[lane]),
        )
    }

    /// Builds the lanes from four boxes.
    pub fn from_boxes(boxes: &[BoundingBox; 4]) -> Self {
        Self {
            min_x: Vec4::new(boxes[0].min.x, boxes[1].min.x, boxes[2].min.x, boxes[3].min.x),
            min_y: Vec4::new(boxes[0].min.y, boxes[1].min.y, boxes[2].min.y, boxes[3].min.y),
            min_z: Vec4::new(boxes[0].min.z, boxes[1].min.z, boxes[2].min.z, boxes[3].min.z),
            max_x: Vec4::new(boxes[0].max.x, boxes[1].max.x, boxes[2].max.x, boxes[3].max.x),
            max_y: Vec4::new(boxes[0].max.y, boxes[1].max.y, boxes[2].max.y, boxes[3].max.y),
            max_z: Vec4::new(boxes[0].max.z, boxes[1].max.z, boxes[2].max.z, boxes[3].max.z),
        }
    }

    /// Lanes whose box has min > max on any axis.
    #[inline(always)]
    pub fn invalid_mask(&self) -> u32 {
        (self.min_x.cmpgt(self.max_x) | self.min_y.cmpgt(self.max_y) | self.min_z.cmpgt(self.max_z))
            .bitmask()
    }

    /// Tests an axis-aligned box against the four boxes. Touching counts as overlapping.
    #[inline(always)]
    pub fn vs_box(&self, bounds: &BoundingBox) -> u32 {
        let overlap_x = Vec4::splat(bounds.min.x).cmple(self.max_x)
            & Vec4::splat(bounds.max.x).cmpge(self.min_x);
        let overlap_y = Vec4::splat(bounds.min.y).cmple(self.max_y)
            & Vec4::splat(bounds.max.y).cmpge(self.min_y);
        let overlap_z = Vec4::splat(bounds.min.z).cmple(self.max_z)
            & Vec4::splat(bounds.max.z).cmpge(self.min_z);
        (overlap_x & overlap_y & overlap_z).bitmask()
    }

    /// Tests which boxes contain the point. Points on the surface are inside.
    #[inline(always)]
    pub fn vs_point(&self, point: Vec3) -> u32 {
        let x = Vec4::splat(point.x);
        let y = Vec4::splat(point.y);
        let z = Vec4::splat(point.z);
        (x.cmpge(self.min_x)
            & x.cmple(self.max_x)
            & y.cmpge(self.min_y)
            & y.cmple(self.max_y)
            & z.cmpge(self.min_z)
            & z.cmple(self.max_z))
            .bitmask()
    }

    /// Squared distance from `point` to each box; zero when inside.
    /// Inverted boxes produce a huge distance.
    #[inline(always)]
    pub fn distance_sq_to_point(&self, point: Vec3) -> Vec4 {
        let px = Vec4::splat(point.x);
        let py = Vec4::splat(point.y);
        let pz = Vec4::splat(point.z);
        let dx = px.max(self.min_x).min(self.max_x) - px;
        let dy = py.max(self.min_y).min(self.max_y) - py;
        let dz = pz.max(self.min_z).min(self.max_z) - pz;
        dx * dx + dy * dy + dz * dz
    }

    #[inline(always)]
    pub fn vs_sphere(&self, center: Vec3, radius_sq: f32) -> u32 {
        self.distance_sq_to_point(center)
            .cmple(Vec4::splat(radius_sq))
            .bitmask()
            & !self.invalid_mask()
    }

    /// Grows every box by `extent` on each side. Inverted boxes stay inverted as long as `extent`
    /// is smaller than the sentinel they were filled with.
    #[inline(always)]
    pub fn enlarged_with_extent(&self, extent: Vec3) -> Self {
        let ex = Vec4::splat(extent.x);
        let ey = Vec4::splat(extent.y);
        let ez = Vec4::splat(extent.z);
        Self {
            min_x: self.min_x - ex,
            min_y: self.min_y - ey,
            min_z: self.min_z - ez,
            max_x: self.max_x + ex,
            max_y: self.max_y + ey,
            max_z: self.max_z + ez,
        }
    }

    /// Slab test of a ray against the four boxes.
    ///
    /// # Returns
    /// Entry fraction along `direction` per box, clamped to zero when the origin is inside,
    /// or `f32::MAX` when the box is missed.
    #[inline(always)]
    pub fn ray_cast(&self, origin: Vec3, inv: &RayInvDirection) -> Vec4 {
        let flt_min = Vec4::splat(-f32::MAX);
        let flt_max = Vec4::splat(f32::MAX);

        let mut no_intersection = self.invalid_mask();

        let mut t_min = flt_min;
        let mut t_max = flt_max;
        let axes = [
            (origin.x, inv.inv_direction.x, inv.is_parallel.x, self.min_x, self.max_x),
            (origin.y, inv.inv_direction.y, inv.is_parallel.y, self.min_y, self.max_y),
            (origin.z, inv.inv_direction.z, inv.is_parallel.z, self.min_z, self.max_z),
        ];
        for (o, inv_d, parallel, min, max) in axes {
            let o = Vec4::splat(o);
            if parallel {
                // Parallel to the slab: only a hit when the origin lies between the planes.
                no_intersection |= (o.cmplt(min) | o.cmpgt(max)).bitmask();
            } else {
                let inv_d = Vec4::splat(inv_d);
                let t1 = (min - o) * inv_d;
                let t2 = (max - o) * inv_d;
                t_min = t_min.max(t1.min(t2));
                t_max = t_max.min(t1.max(t2));
            }
        }

        no_intersection |= (t_min.cmpgt(t_max) | t_max.cmplt(Vec4::ZERO)).bitmask();
        let t_min = t_min.max(Vec4::ZERO);

        let mut result = [0.0f32; 4];
        for (lane, value) in result.iter_mut().enumerate() {
            *value = if no_intersection & (1 << lane) != 0 {
                flt_max[lane]
            } else {
                t_min[lane]
            };
        }
        Vec4::from_array(result)
    }

    /// Separating axis test of an oriented box against the four boxes.
    ///
    /// `orientation` holds the box rotation in its upper 3x3 and its center in the translation.
    /// `epsilon` pads the cross product axes against nearly parallel edges.
    pub fn vs_oriented_box(&self, orientation: &Mat4, half_extents: Vec3, epsilon: f32) -> u32 {
        // r[i][j] is world axis i dotted with box axis j.
        let axes = [
            orientation.x_axis.truncate(),
            orientation.y_axis.truncate(),
            orientation.z_axis.truncate(),
        ];
        let mut r = [[0.0f32; 3]; 3];
        let mut abs_r = [[0.0f32; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                r[i][j] = axes[j][i];
                abs_r[i][j] = r[i][j].abs() + epsilon;
            }
        }
        let b = half_extents.to_array();
        let center = orientation.w_axis.truncate();

        let mut mask = 0u32;
        for lane in 0..4 {
            let bounds = self.get(lane);
            if !bounds.is_valid() {
                continue;
            }
            let a = bounds.extent().to_array();
            let t = (center - bounds.center()).to_array();
            if !Self::is_separated(&a, &b, &t, &r, &abs_r) {
                mask |= 1 << lane;
            }
        }
        mask
    }

    fn is_separated(
        a: &[f32; 3],
        b: &[f32; 3],
        t: &[f32; 3],
        r: &[[f32; 3]; 3],
        abs_r: &[[f32; 3]; 3],
    ) -> bool {
        // Face axes of the axis-aligned box.
        for i in 0..3 {
            let rb = b[0] * abs_r[i][0] + b[1] * abs_r[i][1] + b[2] * abs_r[i][2];
            if t[i].abs() > a[i] + rb {
                return true;
            }
        }

        // Face axes of the oriented box.
        for j in 0..3 {
            let ra = a[0] * abs_r[0][j] + a[1] * abs_r[1][j] + a[2] * abs_r[2][j];
            let distance = t[0] * r[0][j] + t[1] * r[1][j] + t[2] * r[2][j];
            if distance.abs() > ra + b[j] {
                return true;
            }
        }

        // Edge cross products.
        for i in 0..3 {
            let i1 = (i + 1) % 3;
            let i2 = (i + 2) % 3;
            for j in 0..3 {
                let j1 = (j + 1) % 3;
                let j2 = (j + 2) % 3;
                let ra = a[i1] * abs_r[i2][j] + a[i2] * abs_r[i1][j];
                let rb = b[j1] * abs_r[i][j2] + b[j2] * abs_r[i][j1];
                let distance = t[i2] * r[i1][j] - t[i1] * r[i2][j];
                if distance.abs() > ra + rb {
                    return true;
                }
            }
        }
        false
    }
}
