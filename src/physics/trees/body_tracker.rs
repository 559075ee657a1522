use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::physics::collision_detection::{BroadPhaseLayer, CollisionLayer, INVALID_COLLISION_LAYER};

/// Records where a body lives in the broad phase so it can be found without searching the tree.
///
/// One tracker per body slot. The location packs the node index and the child slot inside it.
#[derive(Debug)]
pub struct BodyTracker {
    broad_phase_layer: AtomicU8,
    collision_layer: AtomicU16,
    body_location: AtomicU32,
}

impl BodyTracker {
    pub const INVALID_BODY_LOCATION: u32 = 0xffff_ffff;
    const BODY_INDEX_MASK: u32 = 0x3fff_ffff;
    const CHILD_INDEX_SHIFT: u32 = 30;

    #[inline(always)]
    pub fn new() -> Self {
        Self {
            broad_phase_layer: AtomicU8::new(BroadPhaseLayer::INVALID.0),
            collision_layer: AtomicU16::new(INVALID_COLLISION_LAYER),
            body_location: AtomicU32::new(Self::INVALID_BODY_LOCATION),
        }
    }

    #[inline(always)]
    pub fn broad_phase_layer(&self) -> BroadPhaseLayer {
        BroadPhaseLayer(self.broad_phase_layer.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn set_broad_phase_layer(&self, layer: BroadPhaseLayer) {
        self.broad_phase_layer.store(layer.0, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn collision_layer(&self) -> CollisionLayer {
        self.collision_layer.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn set_collision_layer(&self, layer: CollisionLayer) {
        self.collision_layer.store(layer, Ordering::Relaxed);
    }

    /// Clears both layers, marking the body as not in the broad phase.
    #[inline(always)]
    pub fn reset_layers(&self) {
        self.set_broad_phase_layer(BroadPhaseLayer::INVALID);
        self.set_collision_layer(INVALID_COLLISION_LAYER);
    }

    #[inline(always)]
    pub fn set_body_location(&self, node_index: u32, child_index: u32) {
        debug_assert!(node_index <= Self::BODY_INDEX_MASK, "Node index out of range!");
        debug_assert!(child_index < 4, "Child index out of range!");
        self.body_location.store(
            node_index + (child_index << Self::CHILD_INDEX_SHIFT),
            Ordering::Relaxed,
        );
    }

    /// Node index and child slot of the body.
    #[inline(always)]
    pub fn body_location(&self) -> (u32, u32) {
        let location = self.body_location.load(Ordering::Relaxed);
        debug_assert_ne!(location, Self::INVALID_BODY_LOCATION, "Body is not in the tree!");
        (
            location & Self::BODY_INDEX_MASK,
            location >> Self::CHILD_INDEX_SHIFT,
        )
    }

    #[inline(always)]
    pub fn invalidate_body_location(&self) {
        self.body_location
            .store(Self::INVALID_BODY_LOCATION, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_body_location_valid(&self) -> bool {
        self.body_location.load(Ordering::Relaxed) != Self::INVALID_BODY_LOCATION
    }
}

impl Default for BodyTracker {
    fn default() -> Self {
        Self::new()
    }
}
