use glam::{Vec3, Vec4};

use super::body_tracker::BodyTracker;
use super::node_id::NodeID;
use super::quad_tree::{QuadTree, STACK_SIZE};
use super::quad_tree_walk::ITreeVisitor;
use crate::physics::body_id::BodyID;
use crate::physics::collision_detection::{
    AABoxCast, BroadPhaseCastResult, CastShapeBodyCollector, CollisionLayerFilter, RayCast,
    RayCastBodyCollector,
};
use crate::utilities::{BoundingBox4, RayInvDirection};

/// Orders the children by hit fraction, farthest first, and keeps those closer than `max_value`.
/// The kept children and their fractions end up in the first entries of `children` and `fractions`,
/// so the closest hit is on top of the walk stack.
///
/// # Returns
/// The number of children kept.
#[inline]
fn sort_reverse_and_store(values: Vec4, max_value: f32, children: &mut [NodeID; 4], fractions: &mut [f32]) -> usize {
    let mut hits: [(f32, NodeID); 4] = std::array::from_fn(|i| (values[i], children[i]));
    hits.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));

    let num_results = hits.iter().filter(|(fraction, _)| *fraction < max_value).count();
    for (i, &(fraction, child)) in hits[4 - num_results..].iter().enumerate() {
        children[i] = child;
        fractions[i] = fraction;
    }
    num_results
}

/// Walks nodes in order of distance along a ray, dropping those beyond the collector's early out
/// fraction.
struct RayCastVisitor<'a, 'c> {
    origin: Vec3,
    inv_direction: RayInvDirection,
    collector: &'a mut RayCastBodyCollector<'c>,
    /// Fraction at which the entry at the same walk stack position was hit.
    fraction_stack: Vec<f32>,
}

impl ITreeVisitor for RayCastVisitor<'_, '_> {
    #[inline(always)]
    fn should_abort(&self) -> bool {
        self.collector.should_early_out()
    }

    #[inline(always)]
    fn should_visit_node(&self, stack_top: usize) -> bool {
        self.fraction_stack[stack_top] < self.collector.early_out_fraction()
    }

    #[inline(always)]
    fn visit_nodes(&mut self, bounds: &BoundingBox4, children: &mut [NodeID; 4], stack_top: usize) -> usize {
        let fractions = bounds.ray_cast(self.origin, &self.inv_direction);
        sort_reverse_and_store(
            fractions,
            self.collector.early_out_fraction(),
            children,
            &mut self.fraction_stack[stack_top..],
        )
    }

    #[inline(always)]
    fn visit_body(&mut self, body_id: BodyID, stack_top: usize) {
        let result = BroadPhaseCastResult {
            body_id,
            fraction: self.fraction_stack[stack_top],
        };
        self.collector.add_hit(&result);
    }

    fn on_stack_resized(&mut self, new_size: usize) {
        self.fraction_stack.resize(new_size, 0.0);
    }
}

/// Sweeps a box through the tree by casting its center against child bounds grown by its extent.
struct BoxCastVisitor<'a, 'c> {
    origin: Vec3,
    extent: Vec3,
    inv_direction: RayInvDirection,
    collector: &'a mut CastShapeBodyCollector<'c>,
    fraction_stack: Vec<f32>,
}

impl ITreeVisitor for BoxCastVisitor<'_, '_> {
    #[inline(always)]
    fn should_abort(&self) -> bool {
        self.collector.should_early_out()
    }

    #[inline(always)]
    fn should_visit_node(&self, stack_top: usize) -> bool {
        self.fraction_stack[stack_top] < self.collector.positive_early_out_fraction()
    }

    #[inline(always)]
    fn visit_nodes(&mut self, bounds: &BoundingBox4, children: &mut [NodeID; 4], stack_top: usize) -> usize {
        let fractions = bounds
            .enlarged_with_extent(self.extent)
            .ray_cast(self.origin, &self.inv_direction);
        sort_reverse_and_store(
            fractions,
            self.collector.positive_early_out_fraction(),
            children,
            &mut self.fraction_stack[stack_top..],
        )
    }

    #[inline(always)]
    fn visit_body(&mut self, body_id: BodyID, stack_top: usize) {
        let result = BroadPhaseCastResult {
            body_id,
            fraction: self.fraction_stack[stack_top],
        };
        self.collector.add_hit(&result);
    }

    fn on_stack_resized(&mut self, new_size: usize) {
        self.fraction_stack.resize(new_size, 0.0);
    }
}

/// Fraction stack with the root entry set below any early out fraction.
fn new_fraction_stack() -> Vec<f32> {
    let mut fraction_stack = vec![0.0; STACK_SIZE];
    fraction_stack[0] = -1.0;
    fraction_stack
}

impl QuadTree {
    /// Reports bodies whose bounds are hit by `ray`, with the fraction where the bounds are entered.
    pub fn cast_ray(
        &self,
        ray: &RayCast,
        collector: &mut RayCastBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        let mut visitor = RayCastVisitor {
            origin: ray.origin,
            inv_direction: RayInvDirection::new(ray.direction),
            collector,
            fraction_stack: new_fraction_stack(),
        };
        self.walk_tree(layer_filter, trackers, &mut visitor);
    }

    /// Reports bodies whose bounds are hit by `box_cast`, with the fraction of the sweep at first
    /// contact.
    pub fn cast_aabox(
        &self,
        box_cast: &AABoxCast,
        collector: &mut CastShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        let mut visitor = BoxCastVisitor {
            origin: box_cast.bounds.center(),
            extent: box_cast.bounds.extent(),
            inv_direction: RayInvDirection::new(box_cast.direction),
            collector,
            fraction_stack: new_fraction_stack(),
        };
        self.walk_tree(layer_filter, trackers, &mut visitor);
    }
}
