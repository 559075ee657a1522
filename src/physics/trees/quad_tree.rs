use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_utils::CachePadded;
use log::{debug, error};

use super::body_tracker::BodyTracker;
use super::node::{Node, INVALID_NODE_INDEX};
use super::node_id::NodeID;
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;
use crate::utilities::memory::{Batch, FixedSizeFreeList, INVALID_OBJECT_INDEX};
use crate::utilities::BoundingBox;

/// Initial size of the explicit stacks used to walk a tree.
pub const STACK_SIZE: usize = 128;

/// Nodes at a depth below this are marked changed when a tree is built, so the next incremental
/// update rebuilds the top of the tree instead of reusing it.
pub const MAX_DEPTH_MARK_CHANGED: u32 = 5;

/// Node pool shared by the trees of all broad phase layers.
pub type NodeAllocator = FixedSizeFreeList<Node>;

/// Result of [`QuadTree::update_prepare`]: the root of the freshly built tree.
#[derive(Debug, Clone, Copy)]
pub struct QuadTreeUpdateState {
    pub(crate) root_node_id: NodeID,
}

/// Result of [`QuadTree::add_bodies_prepare`]: a detached subtree holding the new bodies.
#[derive(Debug, Clone, Copy)]
pub struct QuadTreeAddState {
    pub(crate) leaf_id: NodeID,
    pub(crate) leaf_bounds: BoundingBox,
}

impl Default for QuadTreeAddState {
    fn default() -> Self {
        Self {
            leaf_id: NodeID::INVALID,
            leaf_bounds: BoundingBox::invalid(),
        }
    }
}

/// Double buffered 4-ary bounding volume tree over body ids.
///
/// Two root slots hold the current tree and the previous one. Queries read the current root once
/// and walk from it, so a tree swapped out by [`QuadTree::update_finalize`] stays walkable until
/// [`QuadTree::discard_old_tree`] returns its nodes to the pool.
///
/// Bodies can be added and removed concurrently with queries: empty child slots are claimed with
/// a compare-exchange and bounds only ever grow until the next rebuild.
pub struct QuadTree {
    pub(super) allocator: Arc<NodeAllocator>,
    /// Nodes of the current tree that are not part of the tree built by the last update.
    pub(super) free_node_batch: Mutex<Batch>,
    pub(super) num_bodies: CachePadded<AtomicU32>,
    pub(super) root_nodes: [AtomicU32; 2],
    pub(super) root_node_index: CachePadded<AtomicU32>,
    pub(super) is_dirty: AtomicBool,
    name: String,
}

impl QuadTree {
    /// Creates an empty tree with a single root node.
    pub fn new(allocator: Arc<NodeAllocator>, name: impl Into<String>) -> Self {
        let tree = Self {
            allocator,
            free_node_batch: Mutex::new(Batch::default()),
            num_bodies: CachePadded::new(AtomicU32::new(0)),
            root_nodes: [
                AtomicU32::new(INVALID_NODE_INDEX),
                AtomicU32::new(INVALID_NODE_INDEX),
            ],
            root_node_index: CachePadded::new(AtomicU32::new(0)),
            is_dirty: AtomicBool::new(false),
            name: name.into(),
        };
        let root = tree.allocate_node(false);
        tree.root_nodes[0].store(root, Ordering::Release);
        tree
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn num_bodies(&self) -> u32 {
        self.num_bodies.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn has_bodies(&self) -> bool {
        self.num_bodies() != 0
    }

    /// Whether bodies were added, removed or moved since the last update.
    #[inline(always)]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    /// Whether the previous tree has been discarded so a new update can start.
    #[inline]
    pub fn can_be_updated(&self) -> bool {
        let old_root = &self.root_nodes[(self.root_node_index.load(Ordering::Acquire) ^ 1) as usize];
        self.lock_free_node_batch().is_empty() && old_root.load(Ordering::Acquire) == INVALID_NODE_INDEX
    }

    #[inline(always)]
    pub(super) fn node(&self, node_index: u32) -> &Node {
        self.allocator.get(node_index)
    }

    #[inline(always)]
    pub(super) fn current_root(&self) -> &AtomicU32 {
        &self.root_nodes[self.root_node_index.load(Ordering::Acquire) as usize]
    }

    /// Id of the root node of the current tree.
    #[inline(always)]
    pub(super) fn current_root_id(&self) -> NodeID {
        let root_index = self.current_root().load(Ordering::Acquire);
        debug_assert_ne!(root_index, INVALID_NODE_INDEX, "Tree has no root!");
        NodeID::from_node_index(root_index)
    }

    #[inline]
    fn lock_free_node_batch(&self) -> MutexGuard<'_, Batch> {
        self.free_node_batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a node from the pool. Running out of nodes means the pool was sized too small for the
    /// scene, which can't be recovered from.
    pub(super) fn allocate_node(&self, is_changed: bool) -> u32 {
        let index = self.allocator.construct_object(|node| node.reset(is_changed));
        if index == INVALID_OBJECT_INDEX {
            error!("QuadTree: Out of nodes! (tree '{}', pool capacity {})", self.name, self.allocator.capacity());
            panic!("QuadTree: Out of nodes!");
        }
        index
    }

    #[inline(always)]
    pub(super) fn set_body_location(trackers: &[BodyTracker], body_id: BodyID, node_index: u32, child_index: u32) {
        trackers[body_id.index() as usize].set_body_location(node_index, child_index);
    }

    /// Bounds of a body or of everything below a node.
    pub(super) fn node_or_body_bounds(&self, bodies: &BodyManager, node_id: NodeID) -> BoundingBox {
        if node_id.is_node() {
            self.node(node_id.node_index()).node_bounds()
        } else {
            *bodies[node_id.body_id()].bounds()
        }
    }

    /// Bounds around everything in the current tree.
    pub fn get_bounds(&self) -> BoundingBox {
        self.node(self.current_root_id().node_index()).node_bounds()
    }

    /// Rebuilds the current tree into a new tree that is not yet visible to queries.
    ///
    /// Unchanged subtrees are reused as a whole unless `full_rebuild` is set. Nodes that are
    /// broken up are kept alive until [`QuadTree::discard_old_tree`].
    pub fn update_prepare(
        &self,
        bodies: &BodyManager,
        trackers: &[BodyTracker],
        full_rebuild: bool,
    ) -> QuadTreeUpdateState {
        #[cfg(debug_assertions)]
        self.validate_tree(bodies, trackers);

        let mut free_node_batch = self.lock_free_node_batch();
        debug_assert!(free_node_batch.is_empty(), "Old tree has not been discarded!");

        // Clear first so modifications made during the rebuild mark the tree dirty again.
        self.is_dirty.store(false, Ordering::Relaxed);

        let mut node_ids = Vec::with_capacity(self.num_bodies() as usize);
        let mut stack = Vec::with_capacity(STACK_SIZE);
        stack.push(self.current_root_id());
        while let Some(node_id) = stack.pop() {
            if node_id.is_body() {
                debug_assert!(
                    trackers[node_id.body_id().index() as usize].is_body_location_valid(),
                    "Body in tree without a location!"
                );
                node_ids.push(node_id);
            } else if node_id.is_valid() {
                let node_index = node_id.node_index();
                let node = self.node(node_index);
                if !node.is_changed() && !full_rebuild {
                    node_ids.push(node_id);
                } else {
                    stack.extend(node.load_children().into_iter().filter(|child| child.is_valid()));
                    self.allocator
                        .add_object_to_batch(&mut free_node_batch, node_index);
                }
            }
        }
        drop(free_node_batch);

        let num_node_ids = node_ids.len();
        let root_node_id = if node_ids.is_empty() {
            NodeID::from_node_index(self.allocate_node(false))
        } else {
            let (root_node_id, root_bounds) =
                self.build_tree(bodies, trackers, &mut node_ids, MAX_DEPTH_MARK_CHANGED);
            if root_node_id.is_body() {
                // A root always wraps its content in a node.
                let root_index = self.allocate_node(false);
                let root = self.node(root_index);
                root.set_child_bounds(0, &root_bounds);
                root.set_child(0, root_node_id);
                Self::set_body_location(trackers, root_node_id.body_id(), root_index, 0);
                NodeID::from_node_index(root_index)
            } else {
                root_node_id
            }
        };

        debug!(
            "QuadTree '{}': prepared {} update from {} ids, {} bodies",
            self.name,
            if full_rebuild { "full" } else { "incremental" },
            num_node_ids,
            self.num_bodies()
        );

        QuadTreeUpdateState { root_node_id }
    }

    /// Makes the tree built by [`QuadTree::update_prepare`] the current tree.
    pub fn update_finalize(&self, _bodies: &BodyManager, _trackers: &[BodyTracker], state: QuadTreeUpdateState) {
        let new_root_index = self.root_node_index.load(Ordering::Acquire) ^ 1;
        let new_root = &self.root_nodes[new_root_index as usize];
        // The old tree stays walkable, this slot is unused until now.
        debug_assert_eq!(
            new_root.load(Ordering::Acquire),
            INVALID_NODE_INDEX,
            "Old tree has not been discarded!"
        );
        new_root.store(state.root_node_id.node_index(), Ordering::Release);

        // Queries starting from now on use the new tree.
        self.root_node_index.store(new_root_index, Ordering::Release);
    }

    /// Frees the nodes of the previous tree. No query may still be walking it.
    pub fn discard_old_tree(&self) {
        let old_root = &self.root_nodes[(self.root_node_index.load(Ordering::Acquire) ^ 1) as usize];
        if old_root.load(Ordering::Acquire) != INVALID_NODE_INDEX {
            old_root.store(INVALID_NODE_INDEX, Ordering::Release);
            let batch = std::mem::take(&mut *self.lock_free_node_batch());
            self.allocator.destruct_object_batch(batch);
        }
    }

    /// Flags a node and its ancestors as changed, stopping at the first ancestor that already is.
    pub(super) fn mark_node_and_parents_changed(&self, node_index: u32) {
        let mut node_index = node_index;
        while node_index != INVALID_NODE_INDEX {
            let node = self.node(node_index);
            if node.mark_changed() {
                break;
            }
            node_index = node.parent_node_index();
        }
    }

    /// Grows the bounds of every ancestor of `node_index` to include `new_bounds` and marks the path
    /// as changed.
    pub(super) fn widen_and_mark_node_and_parents_changed(&self, node_index: u32, new_bounds: &BoundingBox) {
        let mut node_index = node_index;
        loop {
            let node = self.node(node_index);
            node.mark_changed();

            let parent_index = node.parent_node_index();
            if parent_index == INVALID_NODE_INDEX {
                break;
            }
            let parent = self.node(parent_index);

            let node_id = NodeID::from_node_index(node_index);
            let Some(child_index) = (0..4).find(|&i| parent.child(i) == node_id) else {
                debug_assert!(false, "Node not found in its parent!");
                break;
            };

            // Bounds only grow, which is safe with concurrent readers.
            if !parent.encapsulate_child_bounds(child_index, new_bounds) {
                if !parent.is_changed() {
                    self.mark_node_and_parents_changed(parent_index);
                }
                break;
            }
            node_index = parent_index;
        }
    }

    /// Depth of the current tree. A root without node children has depth 1.
    pub fn max_tree_depth(&self) -> u32 {
        let mut max_depth = 0;
        let mut stack = vec![(self.current_root_id(), 1u32)];
        while let Some((node_id, depth)) = stack.pop() {
            if !node_id.is_node() || !node_id.is_valid() {
                continue;
            }
            max_depth = max_depth.max(depth);
            let node = self.node(node_id.node_index());
            stack.extend(node.load_children().into_iter().map(|child| (child, depth + 1)));
        }
        max_depth
    }

    /// Checks the current tree: parent links, unchanged nodes only below unchanged parents, child
    /// bounds containing their content, tracker locations and the body count.
    pub fn validate_tree(&self, bodies: &BodyManager, trackers: &[BodyTracker]) {
        let mut num_bodies = 0;
        let mut stack = vec![(self.current_root_id().node_index(), INVALID_NODE_INDEX)];
        while let Some((node_index, parent_index)) = stack.pop() {
            let node = self.node(node_index);
            debug_assert_eq!(node.parent_node_index(), parent_index, "Parent link is broken!");
            debug_assert!(
                parent_index == INVALID_NODE_INDEX || self.node(parent_index).is_changed() || !node.is_changed(),
                "Changed node below an unchanged parent!"
            );

            for (child_index, child) in node.load_children().into_iter().enumerate() {
                if !child.is_valid() {
                    continue;
                }
                let child_bounds = node.child_bounds(child_index);
                if child.is_node() {
                    let real_bounds = self.node(child.node_index()).node_bounds();
                    debug_assert!(
                        !real_bounds.is_valid() || child_bounds.contains(&real_bounds).encloses(),
                        "Child node bounds are not contained in its parent!"
                    );
                    stack.push((child.node_index(), node_index));
                } else {
                    num_bodies += 1;
                    let body_id = child.body_id();
                    debug_assert_eq!(
                        trackers[body_id.index() as usize].body_location(),
                        (node_index, child_index as u32),
                        "Body location does not match the tree!"
                    );
                    if let Some(body) = bodies.try_get(body_id) {
                        debug_assert!(
                            child_bounds.contains(body.bounds()).encloses(),
                            "Body bounds are not contained in the tree!"
                        );
                    }
                }
            }
        }
        debug_assert_eq!(num_bodies, self.num_bodies(), "Body count does not match the tree!");
    }
}

impl Drop for QuadTree {
    fn drop(&mut self) {
        self.discard_old_tree();

        let root_index = self.current_root().load(Ordering::Acquire);
        if root_index == INVALID_NODE_INDEX {
            return;
        }
        let mut free_batch = Batch::default();
        let mut stack = vec![root_index];
        while let Some(node_index) = stack.pop() {
            let node = self.node(node_index);
            stack.extend(
                node.load_children()
                    .into_iter()
                    .filter(|child| child.is_valid() && child.is_node())
                    .map(|child| child.node_index()),
            );
            self.allocator.add_object_to_batch(&mut free_batch, node_index);
        }
        self.allocator.destruct_object_batch(free_batch);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::physics::collision_detection::{
        AcceptAllFilter, AllHitCollisionCollector, CollideShapeTraits, CollisionCollector,
    };
    use crate::testing::{init_logging, Lcg, TestScene};
    use crate::utilities::memory::FixedSizeFreeList;

    fn filled_tree(scene: &mut TestScene, count: usize, pool: u32) -> (QuadTree, Vec<BodyID>) {
        let mut random = Lcg::new(count as u64);
        let ids: Vec<BodyID> = (0..count)
            .map(|_| scene.add_box(random.vec3(-30.0, 30.0), random.vec3(0.1, 2.0)))
            .collect();
        let tree = QuadTree::new(Arc::new(FixedSizeFreeList::new(pool)), "test");
        let state = tree.add_bodies_prepare(&scene.bodies, &scene.trackers, &ids);
        tree.add_bodies_finalize(&scene.trackers, ids.len() as u32, &state);
        (tree, ids)
    }

    fn all_bodies(tree: &QuadTree, scene: &TestScene) -> Vec<BodyID> {
        let mut collector = AllHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        let everything = BoundingBox::new(Vec3::splat(-1000.0), Vec3::splat(1000.0));
        tree.collide_aabox(&everything, &mut collector, &AcceptAllFilter, &scene.trackers);
        collector.hits.sort();
        collector.hits
    }

    #[test]
    fn test_new_tree_is_empty() {
        let allocator = Arc::new(FixedSizeFreeList::new(8));
        let tree = QuadTree::new(allocator.clone(), "empty");
        assert_eq!(tree.name(), "empty");
        assert!(!tree.has_bodies());
        assert!(!tree.is_dirty());
        assert!(tree.can_be_updated());
        assert!(!tree.get_bounds().is_valid());
        assert_eq!(tree.max_tree_depth(), 1);
        assert_eq!(allocator.num_free_objects(), 7);

        drop(tree);
        assert_eq!(allocator.num_free_objects(), 8);
    }

    #[test]
    fn test_update_cycle_keeps_bodies_and_frees_old_nodes() {
        init_logging();
        let mut scene = TestScene::new(512);
        let (tree, mut ids) = filled_tree(&mut scene, 200, 1024);
        ids.sort();

        let state = tree.update_prepare(&scene.bodies, &scene.trackers, true);
        assert!(!tree.is_dirty());
        // Nothing visible changes before finalize.
        assert_eq!(all_bodies(&tree, &scene), ids);
        tree.update_finalize(&scene.bodies, &scene.trackers, state);
        assert!(!tree.can_be_updated());
        assert_eq!(all_bodies(&tree, &scene), ids);

        tree.discard_old_tree();
        assert!(tree.can_be_updated());
        tree.validate_tree(&scene.bodies, &scene.trackers);
        assert_eq!(all_bodies(&tree, &scene), ids);
        // A rebuilt tree of 200 bodies is shallow.
        assert!(tree.max_tree_depth() <= 8);
    }

    #[test]
    fn test_incremental_update_after_removal() {
        let mut scene = TestScene::new(512);
        let (tree, ids) = filled_tree(&mut scene, 300, 1024);
        let state = tree.update_prepare(&scene.bodies, &scene.trackers, true);
        tree.update_finalize(&scene.bodies, &scene.trackers, state);
        tree.discard_old_tree();

        tree.remove_bodies(&scene.bodies, &scene.trackers, &ids[..5]);
        let state = tree.update_prepare(&scene.bodies, &scene.trackers, false);
        tree.update_finalize(&scene.bodies, &scene.trackers, state);
        tree.discard_old_tree();
        tree.validate_tree(&scene.bodies, &scene.trackers);

        let mut expected = ids[5..].to_vec();
        expected.sort();
        assert_eq!(all_bodies(&tree, &scene), expected);
        assert_eq!(tree.num_bodies(), 295);
    }

    #[test]
    fn test_update_of_empty_tree() {
        let scene = TestScene::new(4);
        let tree = QuadTree::new(Arc::new(FixedSizeFreeList::new(4)), "test");
        let state = tree.update_prepare(&scene.bodies, &scene.trackers, true);
        tree.update_finalize(&scene.bodies, &scene.trackers, state);
        tree.discard_old_tree();
        assert!(!tree.get_bounds().is_valid());
        assert_eq!(tree.allocator.num_free_objects(), 3);
    }

    #[test]
    fn test_single_body_root_is_wrapped() {
        let mut scene = TestScene::new(4);
        let (tree, ids) = filled_tree(&mut scene, 1, 8);
        let state = tree.update_prepare(&scene.bodies, &scene.trackers, true);
        tree.update_finalize(&scene.bodies, &scene.trackers, state);
        tree.discard_old_tree();

        let root = tree.current_root_id();
        assert!(root.is_node());
        assert_eq!(tree.node(root.node_index()).child(0), NodeID::from_body_id(ids[0]));
        assert_eq!(scene.trackers[ids[0].index() as usize].body_location(), (root.node_index(), 0));
    }

    /// Runs a full rebuild of the tree it is collecting from as soon as the first hit arrives.
    struct RebuildingCollector<'a> {
        tree: &'a QuadTree,
        scene: &'a TestScene,
        hits: Vec<BodyID>,
        rebuilt: bool,
        early_out_fraction: f32,
    }

    impl CollisionCollector<BodyID, CollideShapeTraits> for RebuildingCollector<'_> {
        fn add_hit(&mut self, result: &BodyID) {
            self.hits.push(*result);
            if !self.rebuilt {
                self.rebuilt = true;
                let state = self.tree.update_prepare(&self.scene.bodies, &self.scene.trackers, true);
                self.tree.update_finalize(&self.scene.bodies, &self.scene.trackers, state);
            }
        }

        fn early_out_fraction(&self) -> f32 {
            self.early_out_fraction
        }

        fn set_early_out_fraction(&mut self, fraction: f32) {
            self.early_out_fraction = fraction;
        }
    }

    #[test]
    fn test_walk_survives_generation_swap() {
        let mut scene = TestScene::new(512);
        let (tree, mut ids) = filled_tree(&mut scene, 250, 2048);
        ids.sort();
        let old_root = tree.current_root_id();

        let mut collector = RebuildingCollector {
            tree: &tree,
            scene: &scene,
            hits: Vec::new(),
            rebuilt: false,
            early_out_fraction: f32::MAX,
        };
        let everything = BoundingBox::new(Vec3::splat(-1000.0), Vec3::splat(1000.0));
        tree.collide_aabox(&everything, &mut collector, &AcceptAllFilter, &scene.trackers);

        assert!(collector.rebuilt);
        assert_ne!(tree.current_root_id(), old_root);
        let mut hits = collector.hits;
        hits.sort();
        assert_eq!(hits, ids);

        tree.discard_old_tree();
        assert_eq!(all_bodies(&tree, &scene), ids);
    }

    #[test]
    #[should_panic(expected = "QuadTree: Out of nodes!")]
    fn test_out_of_nodes_is_fatal() {
        let mut scene = TestScene::new(64);
        filled_tree(&mut scene, 64, 4);
    }
}
