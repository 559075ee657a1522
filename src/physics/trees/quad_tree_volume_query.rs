use glam::Vec3;

use super::body_tracker::BodyTracker;
use super::node_id::NodeID;
use super::quad_tree::QuadTree;
use super::quad_tree_walk::{count_and_sort_trues, ITreeVisitor};
use crate::physics::body_id::BodyID;
use crate::physics::collision_detection::{CollideShapeBodyCollector, CollisionLayerFilter, OrientedBox};
use crate::utilities::{BoundingBox, BoundingBox4};

/// Epsilon added to the rotation terms of the oriented box separating axis test.
const ORIENTED_BOX_EPSILON: f32 = 1.0e-6;

/// Walks every child whose bounds pass `test` and reports all bodies reached.
struct OverlapVisitor<'a, 'c, F> {
    test: F,
    collector: &'a mut CollideShapeBodyCollector<'c>,
}

impl<F> ITreeVisitor for OverlapVisitor<'_, '_, F>
where
    F: Fn(&BoundingBox4) -> u32,
{
    #[inline(always)]
    fn should_abort(&self) -> bool {
        self.collector.should_early_out()
    }

    #[inline(always)]
    fn should_visit_node(&self, _stack_top: usize) -> bool {
        true
    }

    #[inline(always)]
    fn visit_nodes(&mut self, bounds: &BoundingBox4, children: &mut [NodeID; 4], _stack_top: usize) -> usize {
        count_and_sort_trues((self.test)(bounds), children)
    }

    #[inline(always)]
    fn visit_body(&mut self, body_id: BodyID, _stack_top: usize) {
        self.collector.add_hit(&body_id);
    }
}

impl QuadTree {
    fn collide<F>(
        &self,
        test: F,
        collector: &mut CollideShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) where
        F: Fn(&BoundingBox4) -> u32,
    {
        let mut visitor = OverlapVisitor { test, collector };
        self.walk_tree(layer_filter, trackers, &mut visitor);
    }

    /// Reports bodies whose bounds overlap `bounds`.
    pub fn collide_aabox(
        &self,
        bounds: &BoundingBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        self.collide(|b4| b4.vs_box(bounds), collector, layer_filter, trackers);
    }

    /// Reports bodies whose bounds are within `radius` of `center`.
    pub fn collide_sphere(
        &self,
        center: Vec3,
        radius: f32,
        collector: &mut CollideShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        let radius_sq = radius * radius;
        self.collide(|b4| b4.vs_sphere(center, radius_sq), collector, layer_filter, trackers);
    }

    /// Reports bodies whose bounds contain `point`.
    pub fn collide_point(
        &self,
        point: Vec3,
        collector: &mut CollideShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        self.collide(|b4| b4.vs_point(point), collector, layer_filter, trackers);
    }

    /// Reports bodies whose bounds overlap a rotated box.
    pub fn collide_oriented_box(
        &self,
        oriented_box: &OrientedBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
    ) {
        self.collide(
            |b4| b4.vs_oriented_box(&oriented_box.orientation, oriented_box.half_extents, ORIENTED_BOX_EPSILON),
            collector,
            layer_filter,
            trackers,
        );
    }
}
