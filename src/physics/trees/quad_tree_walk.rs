use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use super::body_tracker::BodyTracker;
use super::node_id::NodeID;
use super::quad_tree::{QuadTree, STACK_SIZE};
use crate::physics::body_id::BodyID;
use crate::physics::collision_detection::{CollisionLayerFilter, INVALID_COLLISION_LAYER};
use crate::utilities::BoundingBox4;

/// Drives a depth first walk of a quad-tree.
///
/// The walk keeps an explicit stack of node ids. A visitor can keep per entry data of its own (for
/// example the distance at which a node was hit) indexed by the same stack position.
pub trait ITreeVisitor {
    /// Checked after every body. Returning true ends the walk.
    fn should_abort(&self) -> bool;

    /// Whether the entry at `stack_top` is still worth visiting when it is popped.
    fn should_visit_node(&self, stack_top: usize) -> bool;

    /// Tests the four children of a node. The children to descend into must be moved to the front
    /// of `children`, the last one is visited first.
    ///
    /// # Returns
    /// The number of children to descend into.
    fn visit_nodes(&mut self, bounds: &BoundingBox4, children: &mut [NodeID; 4], stack_top: usize) -> usize;

    /// Called for every body whose collision layer passes the filter.
    fn visit_body(&mut self, body_id: BodyID, stack_top: usize);

    /// The walk stack grew to `new_size` entries.
    fn on_stack_resized(&mut self, _new_size: usize) {}
}

/// Moves the children whose bit is set in `mask` to the front, keeping their order.
///
/// # Returns
/// The number of set bits.
#[inline(always)]
pub fn count_and_sort_trues(mask: u32, children: &mut [NodeID; 4]) -> usize {
    let mut count = 0;
    for i in 0..4 {
        if mask & (1 << i) != 0 {
            children[count] = children[i];
            count += 1;
        }
    }
    count
}

static STACK_WARNING_ISSUED: AtomicBool = AtomicBool::new(false);

/// Logs once per process that a walk outgrew its initial stack, which points at a badly built tree.
pub(super) fn stack_resize_warning() {
    if !STACK_WARNING_ISSUED.swap(true, Ordering::Relaxed) {
        warn!("QuadTree: Performance warning: stack full! The tree may be degenerate, consider calling optimize.");
    }
}

impl QuadTree {
    /// Walks the current tree, reporting bodies that pass `layer_filter` to `visitor`.
    ///
    /// Bodies whose tracker has no collision layer are being added or removed and are skipped.
    pub fn walk_tree<V: ITreeVisitor>(
        &self,
        layer_filter: &dyn CollisionLayerFilter,
        trackers: &[BodyTracker],
        visitor: &mut V,
    ) {
        let mut stack = vec![NodeID::INVALID; STACK_SIZE];
        stack[0] = self.current_root_id();
        let mut top = 0;

        loop {
            let node_id = stack[top];
            if node_id.is_body() {
                let body_id = node_id.body_id();
                let layer = trackers[body_id.index() as usize].collision_layer();
                if layer != INVALID_COLLISION_LAYER && layer_filter.should_collide(layer) {
                    visitor.visit_body(body_id, top);
                    if visitor.should_abort() {
                        return;
                    }
                }
            } else if node_id.is_valid() {
                if top + 4 >= stack.len() {
                    stack_resize_warning();
                    let new_size = stack.len() * 2;
                    stack.resize(new_size, NodeID::INVALID);
                    visitor.on_stack_resized(new_size);
                }

                let node = self.node(node_id.node_index());
                let bounds = node.load_bounds4();
                let mut children = node.load_children();
                let num_results = visitor.visit_nodes(&bounds, &mut children, top);
                stack[top..top + 4].copy_from_slice(&children);
                top += num_results;
            }

            // Pop entries the visitor lost interest in.
            loop {
                if top == 0 {
                    return;
                }
                top -= 1;
                if visitor.should_visit_node(top) {
                    break;
                }
            }
        }
    }
}
