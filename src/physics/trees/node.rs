use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use glam::{Vec3, Vec4};

use super::node_id::NodeID;
use crate::utilities::{AtomicF32, BoundingBox, BoundingBox4};

/// Bound used for empty child slots and for roots whose size is unknown.
pub const LARGE_FLOAT: f32 = 1.0e30;

/// Index of the node pool meaning "no node".
pub const INVALID_NODE_INDEX: u32 = u32::MAX;

/// 4-wide quad-tree node.
///
/// The child bounds are stored as six arrays of four so that a query can load them into `Vec4`
/// lanes and test all children at once. Every field is atomic: readers walk the tree while writers
/// claim empty child slots and widen bounds.
///
/// An empty child slot has min > max so it fails every overlap test.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct Node {
    min_x: [AtomicF32; 4],
    min_y: [AtomicF32; 4],
    min_z: [AtomicF32; 4],
    max_x: [AtomicF32; 4],
    max_y: [AtomicF32; 4],
    max_z: [AtomicF32; 4],
    children: [AtomicU32; 4],
    parent_node_index: AtomicU32,
    /// Set when the node or any descendant was modified since the tree was last built.
    is_changed: AtomicBool,
}

impl Default for Node {
    fn default() -> Self {
        let min = || std::array::from_fn(|_| AtomicF32::new(LARGE_FLOAT));
        let max = || std::array::from_fn(|_| AtomicF32::new(-LARGE_FLOAT));
        Self {
            min_x: min(),
            min_y: min(),
            min_z: min(),
            max_x: max(),
            max_y: max(),
            max_z: max(),
            children: std::array::from_fn(|_| AtomicU32::new(NodeID::INVALID_NODE_ID)),
            parent_node_index: AtomicU32::new(INVALID_NODE_INDEX),
            is_changed: AtomicBool::new(false),
        }
    }
}

impl Node {
    /// Empties every child slot and clears the parent.
    pub fn reset(&self, is_changed: bool) {
        for i in 0..4 {
            self.min_x[i].store(LARGE_FLOAT, Ordering::Relaxed);
            self.min_y[i].store(LARGE_FLOAT, Ordering::Relaxed);
            self.min_z[i].store(LARGE_FLOAT, Ordering::Relaxed);
            self.max_x[i].store(-LARGE_FLOAT, Ordering::Relaxed);
            self.max_y[i].store(-LARGE_FLOAT, Ordering::Relaxed);
            self.max_z[i].store(-LARGE_FLOAT, Ordering::Relaxed);
            self.children[i].store(NodeID::INVALID_NODE_ID, Ordering::Relaxed);
        }
        self.parent_node_index
            .store(INVALID_NODE_INDEX, Ordering::Relaxed);
        self.is_changed.store(is_changed, Ordering::Release);
    }

    #[inline(always)]
    pub fn child(&self, child_index: usize) -> NodeID {
        NodeID::from_raw(self.children[child_index].load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn set_child(&self, child_index: usize, id: NodeID) {
        self.children[child_index].store(id.raw(), Ordering::Release);
    }

    /// Claims an empty child slot for `id`.
    ///
    /// # Returns
    /// False if another thread filled the slot first.
    #[inline(always)]
    pub fn try_claim_child(&self, child_index: usize, id: NodeID) -> bool {
        self.children[child_index]
            .compare_exchange(
                NodeID::INVALID_NODE_ID,
                id.raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline(always)]
    pub fn load_children(&self) -> [NodeID; 4] {
        std::array::from_fn(|i| self.child(i))
    }

    #[inline(always)]
    pub fn parent_node_index(&self) -> u32 {
        self.parent_node_index.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set_parent_node_index(&self, index: u32) {
        self.parent_node_index.store(index, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_changed(&self) -> bool {
        self.is_changed.load(Ordering::Acquire)
    }

    /// Flags the node as changed.
    ///
    /// # Returns
    /// Whether the node was already flagged.
    #[inline(always)]
    pub fn mark_changed(&self) -> bool {
        self.is_changed.swap(true, Ordering::AcqRel)
    }

    #[inline(always)]
    pub fn child_bounds(&self, child_index: usize) -> BoundingBox {
        BoundingBox::new(
            Vec3::new(
                self.min_x[child_index].load(Ordering::Acquire),
                self.min_y[child_index].load(Ordering::Acquire),
                self.min_z[child_index].load(Ordering::Acquire),
            ),
            Vec3::new(
                self.max_x[child_index].load(Ordering::Acquire),
                self.max_y[child_index].load(Ordering::Acquire),
                self.max_z[child_index].load(Ordering::Acquire),
            ),
        )
    }

    pub fn set_child_bounds(&self, child_index: usize, bounds: &BoundingBox) {
        // Max goes first so a concurrent reader sees an inverted box until min is written.
        self.max_z[child_index].store(bounds.max.z, Ordering::Release);
        self.max_y[child_index].store(bounds.max.y, Ordering::Release);
        self.max_x[child_index].store(bounds.max.x, Ordering::Release);
        self.min_z[child_index].store(bounds.min.z, Ordering::Release);
        self.min_y[child_index].store(bounds.min.y, Ordering::Release);
        self.min_x[child_index].store(bounds.min.x, Ordering::Release);
    }

    pub fn invalidate_child_bounds(&self, child_index: usize) {
        // Min goes first, which empties the box before max is touched.
        self.min_x[child_index].store(LARGE_FLOAT, Ordering::Release);
        self.min_y[child_index].store(LARGE_FLOAT, Ordering::Release);
        self.min_z[child_index].store(LARGE_FLOAT, Ordering::Release);
        self.max_x[child_index].store(-LARGE_FLOAT, Ordering::Release);
        self.max_y[child_index].store(-LARGE_FLOAT, Ordering::Release);
        self.max_z[child_index].store(-LARGE_FLOAT, Ordering::Release);
    }

    /// Grows the child bounds to include `bounds`.
    ///
    /// # Returns
    /// True if any coordinate changed.
    pub fn encapsulate_child_bounds(&self, child_index: usize, bounds: &BoundingBox) -> bool {
        let mut changed = self.min_x[child_index].fetch_min(bounds.min.x, Ordering::AcqRel);
        changed |= self.min_y[child_index].fetch_min(bounds.min.y, Ordering::AcqRel);
        changed |= self.min_z[child_index].fetch_min(bounds.min.z, Ordering::AcqRel);
        changed |= self.max_x[child_index].fetch_max(bounds.max.x, Ordering::AcqRel);
        changed |= self.max_y[child_index].fetch_max(bounds.max.y, Ordering::AcqRel);
        changed |= self.max_z[child_index].fetch_max(bounds.max.z, Ordering::AcqRel);
        changed
    }

    /// Bounds around all children.
    pub fn node_bounds(&self) -> BoundingBox {
        let mut bounds = self.child_bounds(0);
        for child_index in 1..4 {
            bounds.encapsulate(&self.child_bounds(child_index));
        }
        bounds
    }

    /// Loads the child bounds into 4-wide lanes.
    #[inline(always)]
    pub fn load_bounds4(&self) -> BoundingBox4 {
        let lanes = |values: &[AtomicF32; 4]| {
            Vec4::new(
                values[0].load(Ordering::Acquire),
                values[1].load(Ordering::Acquire),
                values[2].load(Ordering::Acquire),
                values[3].load(Ordering::Acquire),
            )
        };
        BoundingBox4 {
            min_x: lanes(&self.min_x),
            min_y: lanes(&self.min_y),
            min_z: lanes(&self.min_z),
            max_x: lanes(&self.max_x),
            max_y: lanes(&self.max_y),
            max_z: lanes(&self.max_z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_id::BodyID;

    #[test]
    fn test_node_layout() {
        assert_eq!(std::mem::size_of::<Node>(), 128);
        assert_eq!(std::mem::align_of::<Node>(), 64);
    }

    #[test]
    fn test_empty_children_are_inverted() {
        let node = Node::default();
        let bounds = node.load_bounds4();
        assert_eq!(bounds.invalid_mask(), 0b1111);
        assert!(!node.node_bounds().is_valid());
        assert!(node.load_children().iter().all(|child| !child.is_valid()));
    }

    #[test]
    fn test_child_bounds() {
        let node = Node::default();
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        node.set_child_bounds(2, &a);
        assert_eq!(node.child_bounds(2), a);
        assert_eq!(node.node_bounds(), a);

        assert!(!node.encapsulate_child_bounds(2, &BoundingBox::new(Vec3::splat(0.5), Vec3::ONE)));
        assert!(node.encapsulate_child_bounds(2, &BoundingBox::new(Vec3::splat(0.5), Vec3::splat(2.0))));
        assert_eq!(node.child_bounds(2).max, Vec3::splat(2.0));

        node.invalidate_child_bounds(2);
        assert!(!node.child_bounds(2).is_valid());
    }

    #[test]
    fn test_claim_child() {
        let node = Node::default();
        let body = NodeID::from_body_id(BodyID::new(3, 0));
        assert!(node.try_claim_child(1, body));
        assert!(!node.try_claim_child(1, NodeID::from_node_index(5)));
        assert_eq!(node.child(1), body);
    }

    #[test]
    fn test_mark_changed() {
        let node = Node::default();
        assert!(!node.mark_changed());
        assert!(node.mark_changed());
        node.reset(false);
        assert!(!node.is_changed());
    }
}
