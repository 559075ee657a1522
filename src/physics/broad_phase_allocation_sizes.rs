/// The allocation sizes for a broad phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadPhaseAllocationSizes {
    /// The number of bodies to allocate tracking space for.
    pub bodies: u32,
    /// The number of quad-tree nodes in the shared node pool. The pool holds both tree generations
    /// of every broad phase layer.
    pub nodes: u32,
}

impl BroadPhaseAllocationSizes {
    /// Constructs a description of broad phase allocations.
    pub fn new(bodies: u32, nodes: u32) -> Self {
        Self { bodies, nodes }
    }

    /// Sizes the node pool for `max_bodies` bodies spread over `num_layers` broad phase layers.
    ///
    /// Assumes half the bodies are in leaf nodes that are half full, adds a third for the internal
    /// nodes and doubles the result because the old tree stays alive while the new one is built.
    pub fn for_bodies(max_bodies: u32, num_layers: u32) -> Self {
        let num_leaves = (max_bodies + 1) / 2;
        let num_leaves_plus_internal_nodes = num_leaves + (num_leaves + 2) / 3;
        let nodes = (2 * num_leaves_plus_internal_nodes).max(Self::min_nodes(num_layers));
        Self {
            bodies: max_bodies,
            nodes,
        }
    }

    /// Smallest pool that can hold a root for both generations of every layer, plus a spare pair.
    #[inline(always)]
    pub fn min_nodes(num_layers: u32) -> u32 {
        2 * num_layers + 2
    }
}
