use glam::Vec3;

use super::body_tracker::BodyTracker;
use super::node::LARGE_FLOAT;
use super::node_id::NodeID;
use super::quad_tree::QuadTree;
use crate::physics::body_manager::BodyManager;
use crate::utilities::BoundingBox;

/// Frame of the explicit build stack. One frame per node under construction.
struct BuildStackEntry {
    node_index: u32,
    /// Child slot currently being filled, -1 before the first.
    child_index: i32,
    /// Ranges `split[i]..split[i + 1]` of the id array that go into child `i`.
    split: [usize; 5],
    depth: u32,
    bounds_min: Vec3,
    bounds_max: Vec3,
}

impl BuildStackEntry {
    fn new(node_index: u32, depth: u32, split: [usize; 5]) -> Self {
        Self {
            node_index,
            child_index: -1,
            split,
            depth,
            bounds_min: Vec3::splat(LARGE_FLOAT),
            bounds_max: Vec3::splat(-LARGE_FLOAT),
        }
    }
}

impl QuadTree {
    /// Builds a tree over `node_ids`, which may hold bodies and whole subtrees. The ids are reordered.
    ///
    /// Nodes shallower than `max_depth_mark_changed` are marked changed.
    ///
    /// # Returns
    /// The root of the new tree and its bounds. A single id is returned as is, with its parent link
    /// cleared when it is a node. No ids give an invalid id.
    pub(super) fn build_tree(
        &self,
        bodies: &BodyManager,
        trackers: &[BodyTracker],
        node_ids: &mut [NodeID],
        max_depth_mark_changed: u32,
    ) -> (NodeID, BoundingBox) {
        match node_ids.len() {
            0 => return (NodeID::INVALID, BoundingBox::invalid()),
            1 => {
                let node_id = node_ids[0];
                if node_id.is_node() {
                    self.node(node_id.node_index())
                        .set_parent_node_index(super::node::INVALID_NODE_INDEX);
                }
                return (node_id, self.node_or_body_bounds(bodies, node_id));
            }
            _ => {}
        }

        let mut centers: Vec<Vec3> = node_ids
            .iter()
            .map(|&node_id| self.node_or_body_bounds(bodies, node_id).center())
            .collect();

        let mut stack = Vec::with_capacity(super::quad_tree::STACK_SIZE / 4);
        let root_index = self.allocate_node(max_depth_mark_changed > 0);
        let split = partition4(node_ids, &mut centers, 0, node_ids.len());
        stack.push(BuildStackEntry::new(root_index, 0, split));

        loop {
            let top = stack.len() - 1;
            stack[top].child_index += 1;

            if stack[top].child_index >= 4 {
                if top == 0 {
                    break;
                }
                let Some(cur) = stack.pop() else {
                    break;
                };
                let parent = &mut stack[top - 1];
                parent.bounds_min = parent.bounds_min.min(cur.bounds_min);
                parent.bounds_max = parent.bounds_max.max(cur.bounds_max);

                self.node(cur.node_index)
                    .set_parent_node_index(parent.node_index);

                let parent_node = self.node(parent.node_index);
                let child_index = parent.child_index as usize;
                parent_node.set_child(child_index, NodeID::from_node_index(cur.node_index));
                parent_node.set_child_bounds(
                    child_index,
                    &BoundingBox::new(cur.bounds_min, cur.bounds_max),
                );
            } else {
                let cur = &mut stack[top];
                let child_index = cur.child_index as usize;
                let low = cur.split[child_index];
                let high = cur.split[child_index + 1];
                let num = high - low;

                if num == 1 {
                    let child_node_id = node_ids[low];
                    let bounds = self.node_or_body_bounds(bodies, child_node_id);

                    let node = self.node(cur.node_index);
                    node.set_child(child_index, child_node_id);
                    node.set_child_bounds(child_index, &bounds);

                    if child_node_id.is_node() {
                        self.node(child_node_id.node_index())
                            .set_parent_node_index(cur.node_index);
                    } else {
                        Self::set_body_location(trackers, child_node_id.body_id(), cur.node_index, child_index as u32);
                    }

                    cur.bounds_min = cur.bounds_min.min(bounds.min);
                    cur.bounds_max = cur.bounds_max.max(bounds.max);
                } else if num > 1 {
                    let depth = cur.depth + 1;
                    let node_index = self.allocate_node(max_depth_mark_changed > depth);
                    let split = partition4(node_ids, &mut centers, low, high);
                    stack.push(BuildStackEntry::new(node_index, depth, split));
                }
            }
        }

        let root = &stack[0];
        (
            NodeID::from_node_index(root.node_index),
            BoundingBox::new(root.bounds_min, root.bounds_max),
        )
    }
}

/// Splits `node_ids` in two along the axis where the centers spread the most, at the midpoint of
/// that spread.
///
/// # Returns
/// The index of the first element of the upper half. Falls back to the middle of the range when
/// all centers land on one side or when there are 4 or fewer elements.
pub(super) fn partition(node_ids: &mut [NodeID], centers: &mut [Vec3]) -> usize {
    let number = node_ids.len();
    if number <= 4 {
        return number / 2;
    }

    let mut center_min = Vec3::splat(LARGE_FLOAT);
    let mut center_max = Vec3::splat(-LARGE_FLOAT);
    for center in centers.iter() {
        center_min = center_min.min(*center);
        center_max = center_max.max(*center);
    }

    let extent = center_max - center_min;
    let dimension = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };
    let split = 0.5 * (center_min[dimension] + center_max[dimension]);

    let mut start = 0;
    let mut end = number;
    while start < end {
        while start < end && centers[start][dimension] < split {
            start += 1;
        }
        while start < end && centers[end - 1][dimension] >= split {
            end -= 1;
        }
        if start < end {
            node_ids.swap(start, end - 1);
            centers.swap(start, end - 1);
            start += 1;
            end -= 1;
        }
    }
    debug_assert_eq!(start, end);

    if start > 0 && start < number {
        start
    } else {
        number / 2
    }
}

/// Splits `node_ids[begin..end]` into four groups, first in halves and then each half again.
///
/// # Returns
/// The five boundaries of the groups, starting with `begin` and ending with `end`.
pub(super) fn partition4(node_ids: &mut [NodeID], centers: &mut [Vec3], begin: usize, end: usize) -> [usize; 5] {
    let ids = &mut node_ids[begin..end];
    let centers = &mut centers[begin..end];

    let mid = partition(ids, centers);
    let (lower_ids, upper_ids) = ids.split_at_mut(mid);
    let (lower_centers, upper_centers) = centers.split_at_mut(mid);
    let lower_mid = partition(lower_ids, lower_centers);
    let upper_mid = partition(upper_ids, upper_centers);

    [
        begin,
        begin + lower_mid,
        begin + mid,
        begin + mid + upper_mid,
        end,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body_id::BodyID;

    fn ids(count: u32) -> Vec<NodeID> {
        (0..count)
            .map(|i| NodeID::from_body_id(BodyID::new(i, 0)))
            .collect()
    }

    #[test]
    fn test_partition_splits_on_widest_axis() {
        let mut node_ids = ids(6);
        let mut centers = vec![
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(-10.0, 0.1, 0.0),
            Vec3::new(9.0, 0.0, 0.2),
            Vec3::new(-9.0, 0.0, 0.0),
            Vec3::new(11.0, 0.3, 0.0),
            Vec3::new(-8.0, 0.0, 0.1),
        ];
        let mid = partition(&mut node_ids, &mut centers);
        assert_eq!(mid, 3);
        assert!(centers[..mid].iter().all(|c| c.x < 0.0));
        assert!(centers[mid..].iter().all(|c| c.x > 0.0));
        // Ids move together with their centers.
        for (id, center) in node_ids.iter().zip(&centers) {
            let expected = match id.body_id().index() {
                0 => 10.0,
                1 => -10.0,
                2 => 9.0,
                3 => -9.0,
                4 => 11.0,
                _ => -8.0,
            };
            assert_eq!(center.x, expected);
        }
    }

    #[test]
    fn test_partition_degenerate_falls_back_to_half() {
        let mut node_ids = ids(7);
        let mut centers = vec![Vec3::ONE; 7];
        assert_eq!(partition(&mut node_ids, &mut centers), 3);

        let mut node_ids = ids(3);
        let mut centers = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        assert_eq!(partition(&mut node_ids, &mut centers), 1);
    }

    #[test]
    fn test_partition4_covers_range() {
        let mut node_ids = ids(20);
        let mut centers: Vec<Vec3> = (0..20).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let split = partition4(&mut node_ids, &mut centers, 0, 20);
        assert_eq!(split[0], 0);
        assert_eq!(split[4], 20);
        for i in 0..4 {
            assert!(split[i] < split[i + 1]);
        }
        for i in 0..4 {
            let max_in_group = centers[split[i]..split[i + 1]]
                .iter()
                .map(|c| c.x)
                .fold(f32::MIN, f32::max);
            if i < 3 {
                let min_next = centers[split[i + 1]..split[i + 2]]
                    .iter()
                    .map(|c| c.x)
                    .fold(f32::MAX, f32::min);
                assert!(max_in_group < min_next);
            }
        }
    }

    #[test]
    fn test_partition4_with_offset() {
        let mut node_ids = ids(10);
        let mut centers: Vec<Vec3> = (0..10).map(|i| Vec3::new(0.0, i as f32, 0.0)).collect();
        let split = partition4(&mut node_ids, &mut centers, 2, 7);
        assert_eq!(split[0], 2);
        assert_eq!(split[4], 7);
        assert!(split.windows(2).all(|w| w[0] <= w[1]));
    }
}
