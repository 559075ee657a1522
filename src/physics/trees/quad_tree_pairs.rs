use glam::Vec3;

use super::node_id::NodeID;
use super::quad_tree::{QuadTree, STACK_SIZE};
use super::quad_tree_walk::{count_and_sort_trues, stack_resize_warning};
use crate::physics::body::Body;
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;
use crate::physics::collision_detection::{BodyPair, BodyPairCollector, CollisionLayerPairFilter};

impl QuadTree {
    /// Finds the bodies in this tree whose bounds overlap the bounds of the active bodies in
    /// `active_body_ids`, grown by `speculative_distance`.
    ///
    /// Each pair is reported once, with the body that comes first in the active body list as
    /// `body_a`. Pairs between two inactive bodies are never reported.
    pub fn find_colliding_pairs(
        &self,
        bodies: &BodyManager,
        active_body_ids: &[BodyID],
        speculative_distance: f32,
        collector: &mut BodyPairCollector<'_>,
        pair_filter: &dyn CollisionLayerPairFilter,
    ) {
        let mut stack = vec![NodeID::INVALID; STACK_SIZE];

        for &body1_id in active_body_ids {
            let Some(body1) = bodies.try_get(body1_id) else {
                continue;
            };
            debug_assert!(!body1.is_static(), "Static bodies are never active!");

            let mut bounds1 = *body1.bounds();
            bounds1.expand_by(Vec3::splat(speculative_distance));

            stack[0] = self.current_root_id();
            let mut top = 0usize;
            loop {
                let node_id = stack[top];
                if node_id.is_body() {
                    let body2_id = node_id.body_id();
                    if body2_id != body1_id {
                        if let Some(body2) = bodies.get_by_index(body2_id.index()) {
                            if pair_filter.should_collide(body1.collision_layer(), body2.collision_layer())
                                && Body::find_colliding_pairs_can_collide(body1, body2)
                                && bounds1.overlaps(body2.bounds())
                            {
                                collector.add_hit(&BodyPair::new(body1_id, body2_id));
                            }
                        }
                    }
                } else if node_id.is_valid() {
                    let node = self.node(node_id.node_index());
                    let mut children = node.load_children();
                    let num_results = count_and_sort_trues(node.load_bounds4().vs_box(&bounds1), &mut children);

                    if top + 4 >= stack.len() {
                        stack_resize_warning();
                        let new_size = stack.len() * 2;
                        stack.resize(new_size, NodeID::INVALID);
                    }
                    stack[top..top + 4].copy_from_slice(&children);
                    top += num_results;
                }

                if top == 0 {
                    break;
                }
                top -= 1;
            }

            if collector.should_early_out() {
                break;
            }
        }
    }
}
