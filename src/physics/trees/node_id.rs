use crate::physics::body_id::BodyID;

/// Child reference in a quad-tree: either a body or an index into the node pool.
///
/// Nodes are told apart from bodies by the broad phase bit, which a valid body id never has set.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeID(u32);

impl NodeID {
    pub const INVALID_NODE_ID: u32 = 0xffff_ffff;
    const IS_NODE: u32 = BodyID::BROAD_PHASE_BIT;

    pub const INVALID: NodeID = NodeID(Self::INVALID_NODE_ID);

    #[inline(always)]
    pub fn from_body_id(id: BodyID) -> Self {
        debug_assert_eq!(id.raw() & Self::IS_NODE, 0, "Body id has the node bit set!");
        Self(id.raw())
    }

    #[inline(always)]
    pub fn from_node_index(index: u32) -> Self {
        debug_assert_eq!(index & Self::IS_NODE, 0, "Node index too large!");
        Self(index | Self::IS_NODE)
    }

    #[inline(always)]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self.0 != Self::INVALID_NODE_ID
    }

    #[inline(always)]
    pub fn is_body(self) -> bool {
        (self.0 & Self::IS_NODE) == 0
    }

    #[inline(always)]
    pub fn is_node(self) -> bool {
        (self.0 & Self::IS_NODE) != 0
    }

    #[inline(always)]
    pub fn body_id(self) -> BodyID {
        debug_assert!(self.is_body());
        BodyID::from_raw(self.0)
    }

    #[inline(always)]
    pub fn node_index(self) -> u32 {
        debug_assert!(self.is_node());
        self.0 & !Self::IS_NODE
    }
}

impl Default for NodeID {
    fn default() -> Self {
        Self::INVALID
    }
}
