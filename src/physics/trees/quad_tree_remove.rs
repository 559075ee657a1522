use std::sync::atomic::Ordering;

use super::body_tracker::BodyTracker;
use super::node_id::NodeID;
use super::quad_tree::QuadTree;
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;

impl QuadTree {
    /// Takes bodies out of the tree. Their slots are emptied in place, the nodes are cleaned up by
    /// the next update.
    pub fn remove_bodies(&self, _bodies: &BodyManager, trackers: &[BodyTracker], body_ids: &[BodyID]) {
        debug_assert!(!body_ids.is_empty(), "No bodies to remove!");

        self.is_dirty.store(true, Ordering::Relaxed);

        for &body_id in body_ids {
            let tracker = &trackers[body_id.index() as usize];
            let (node_index, child_index) = tracker.body_location();
            tracker.invalidate_body_location();

            let node = self.node(node_index);
            debug_assert_eq!(
                node.child(child_index as usize),
                NodeID::from_body_id(body_id),
                "Body location points at another child!"
            );

            // Bounds first so a concurrent query never sees a stale box with an empty slot.
            node.invalidate_child_bounds(child_index as usize);
            node.set_child(child_index as usize, NodeID::INVALID);

            self.mark_node_and_parents_changed(node_index);
        }

        self.num_bodies.fetch_sub(body_ids.len() as u32, Ordering::Relaxed);
    }

    /// Grows the tree to fit the current bounds of moved bodies. Bounds never shrink until the next
    /// update.
    pub fn notify_bodies_aabb_changed(&self, bodies: &BodyManager, trackers: &[BodyTracker], body_ids: &[BodyID]) {
        for &body_id in body_ids {
            let (node_index, child_index) = trackers[body_id.index() as usize].body_location();
            let node = self.node(node_index);
            debug_assert_eq!(
                node.child(child_index as usize),
                NodeID::from_body_id(body_id),
                "Body location points at another child!"
            );

            let new_bounds = bodies[body_id].bounds();
            if node.encapsulate_child_bounds(child_index as usize, new_bounds) {
                self.is_dirty.store(true, Ordering::Relaxed);
                self.widen_and_mark_node_and_parents_changed(node_index, new_bounds);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use super::*;
    use crate::testing::{Lcg, TestScene};
    use crate::utilities::memory::FixedSizeFreeList;
    use crate::utilities::{BoundingBox, ContainmentType};

    fn build(scene: &mut TestScene, count: usize, seed: u64) -> (QuadTree, Vec<BodyID>) {
        let mut random = Lcg::new(seed);
        let ids: Vec<BodyID> = (0..count)
            .map(|_| scene.add_box(random.vec3(-20.0, 20.0), Vec3::splat(0.5)))
            .collect();
        let tree = QuadTree::new(Arc::new(FixedSizeFreeList::new(256)), "test");
        let state = tree.add_bodies_prepare(&scene.bodies, &scene.trackers, &ids);
        tree.add_bodies_finalize(&scene.trackers, ids.len() as u32, &state);
        (tree, ids)
    }

    #[test]
    fn test_remove_bodies() {
        let mut scene = TestScene::new(128);
        let (tree, ids) = build(&mut scene, 40, 3);

        let (node_index, child_index) = scene.trackers[ids[5].index() as usize].body_location();
        tree.remove_bodies(&scene.bodies, &scene.trackers, &ids[..10]);

        assert_eq!(tree.num_bodies(), 30);
        assert!(!scene.trackers[ids[5].index() as usize].is_body_location_valid());
        let node = tree.node(node_index);
        assert!(!node.child(child_index as usize).is_valid());
        assert!(!node.child_bounds(child_index as usize).is_valid());
        assert!(node.is_changed());
        tree.validate_tree(&scene.bodies, &scene.trackers);
    }

    #[test]
    fn test_notify_bodies_aabb_changed_widens_path() {
        let mut scene = TestScene::new(128);
        let (tree, ids) = build(&mut scene, 40, 11);
        let updated = tree.update_prepare(&scene.bodies, &scene.trackers, true);
        tree.update_finalize(&scene.bodies, &scene.trackers, updated);
        tree.discard_old_tree();
        assert!(!tree.is_dirty());

        // Shrinking is ignored.
        let id = ids[7];
        let small = BoundingBox::from_center_and_half_extents(scene.bodies[id].bounds().center(), Vec3::splat(0.1));
        scene.bodies.set_bounds(id, small).unwrap();
        tree.notify_bodies_aabb_changed(&scene.bodies, &scene.trackers, &[id]);
        assert!(!tree.is_dirty());

        let moved = BoundingBox::new(Vec3::splat(100.0), Vec3::splat(101.0));
        scene.bodies.set_bounds(id, moved).unwrap();
        tree.notify_bodies_aabb_changed(&scene.bodies, &scene.trackers, &[id]);
        assert!(tree.is_dirty());
        assert_eq!(tree.get_bounds().contains(&moved), ContainmentType::Contains);

        let (node_index, _) = scene.trackers[id.index() as usize].body_location();
        assert!(tree.node(node_index).is_changed());
        tree.validate_tree(&scene.bodies, &scene.trackers);
    }
}
