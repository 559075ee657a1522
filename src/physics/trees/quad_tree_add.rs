use std::sync::atomic::Ordering;

use super::body_tracker::BodyTracker;
use super::node::{INVALID_NODE_INDEX, LARGE_FLOAT};
use super::node_id::NodeID;
use super::quad_tree::{QuadTree, QuadTreeAddState, STACK_SIZE};
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;
use crate::utilities::memory::Batch;
use crate::utilities::BoundingBox;

impl QuadTree {
    /// Builds a detached subtree over `body_ids` that [`QuadTree::add_bodies_finalize`] later hangs
    /// into the tree. Queries don't see the bodies until then.
    ///
    /// Can run in parallel with queries and with other prepares.
    pub fn add_bodies_prepare(
        &self,
        bodies: &BodyManager,
        trackers: &[BodyTracker],
        body_ids: &[BodyID],
    ) -> QuadTreeAddState {
        debug_assert!(!body_ids.is_empty(), "No bodies to add!");

        let mut node_ids: Vec<NodeID> = body_ids.iter().map(|&id| NodeID::from_body_id(id)).collect();

        // Leaf nodes are not marked changed, they only become part of the tree when inserted.
        let (leaf_id, leaf_bounds) = self.build_tree(bodies, trackers, &mut node_ids, 0);

        QuadTreeAddState {
            leaf_id,
            leaf_bounds,
        }
    }

    /// Inserts a subtree built by [`QuadTree::add_bodies_prepare`] holding `num_bodies` bodies.
    pub fn add_bodies_finalize(&self, trackers: &[BodyTracker], num_bodies: u32, state: &QuadTreeAddState) {
        if !state.leaf_id.is_valid() {
            return;
        }

        self.is_dirty.store(true, Ordering::Relaxed);

        loop {
            let root_index = self.current_root().load(Ordering::Acquire);
            if self.try_insert_leaf(trackers, root_index, state.leaf_id, &state.leaf_bounds, num_bodies) {
                break;
            }
            if self.try_create_new_root(trackers, root_index, state.leaf_id, &state.leaf_bounds, num_bodies) {
                break;
            }
        }
    }

    /// Throws away a subtree built by [`QuadTree::add_bodies_prepare`] that was never inserted.
    pub fn add_bodies_abort(&self, trackers: &[BodyTracker], state: &QuadTreeAddState) {
        let mut free_batch = Batch::default();
        let mut stack = Vec::with_capacity(STACK_SIZE);
        stack.push(state.leaf_id);
        while let Some(node_id) = stack.pop() {
            if node_id.is_body() {
                trackers[node_id.body_id().index() as usize].invalidate_body_location();
            } else if node_id.is_valid() {
                let node_index = node_id.node_index();
                stack.extend(
                    self.node(node_index)
                        .load_children()
                        .into_iter()
                        .filter(|child| child.is_valid()),
                );
                self.allocator.add_object_to_batch(&mut free_batch, node_index);
            }
        }
        self.allocator.destruct_object_batch(free_batch);
    }

    /// Puts the leaf in a free child slot of `node_index`.
    ///
    /// # Returns
    /// False if all four slots are taken.
    fn try_insert_leaf(
        &self,
        trackers: &[BodyTracker],
        node_index: u32,
        leaf_id: NodeID,
        leaf_bounds: &BoundingBox,
        num_leaf_bodies: u32,
    ) -> bool {
        let node = self.node(node_index);

        // Parent first, a concurrent widen walks up from the leaf.
        if leaf_id.is_node() {
            self.node(leaf_id.node_index()).set_parent_node_index(node_index);
        }

        for child_index in 0..4 {
            if node.try_claim_child(child_index, leaf_id) {
                if leaf_id.is_body() {
                    Self::set_body_location(trackers, leaf_id.body_id(), node_index, child_index as u32);
                }
                node.set_child_bounds(child_index, leaf_bounds);
                self.widen_and_mark_node_and_parents_changed(node_index, leaf_bounds);
                self.num_bodies.fetch_add(num_leaf_bodies, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Replaces a full root with a new root holding the old root and the leaf.
    ///
    /// # Returns
    /// False if another thread swapped the root first.
    fn try_create_new_root(
        &self,
        trackers: &[BodyTracker],
        root_index: u32,
        leaf_id: NodeID,
        leaf_bounds: &BoundingBox,
        num_leaf_bodies: u32,
    ) -> bool {
        let new_root_index = self.allocate_node(true);
        let new_root = self.node(new_root_index);

        // The old root may still be growing, so give it infinite bounds until the next rebuild.
        new_root.set_child(0, NodeID::from_node_index(root_index));
        new_root.set_child_bounds(
            0,
            &BoundingBox::new(glam::Vec3::splat(-LARGE_FLOAT), glam::Vec3::splat(LARGE_FLOAT)),
        );
        new_root.set_child(1, leaf_id);
        new_root.set_child_bounds(1, leaf_bounds);
        if leaf_id.is_node() {
            self.node(leaf_id.node_index()).set_parent_node_index(new_root_index);
        }

        if self
            .current_root()
            .compare_exchange(root_index, new_root_index, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.allocator.destruct_object(new_root_index);
            return false;
        }

        if leaf_id.is_body() {
            Self::set_body_location(trackers, leaf_id.body_id(), new_root_index, 1);
        }
        let old_root = self.node(root_index);
        debug_assert_eq!(old_root.parent_node_index(), INVALID_NODE_INDEX, "Root has a parent!");
        old_root.set_parent_node_index(new_root_index);

        self.num_bodies.fetch_add(num_leaf_bodies, Ordering::Relaxed);
        true
    }
}
