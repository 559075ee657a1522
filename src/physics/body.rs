use std::sync::atomic::{AtomicBool, Ordering};

use crate::physics::body_description::BodyDescription;
use crate::physics::body_id::BodyID;
use crate::physics::collision_detection::{BroadPhaseLayer, CollisionLayer};
use crate::utilities::BoundingBox;

/// How a body moves. Ordered from least to most mobile.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum MotionType {
    Static,
    Kinematic,
    Dynamic,
}

/// The parts of a rigid body the broad phase reads.
#[derive(Debug)]
pub struct Body {
    id: BodyID,
    bounds: BoundingBox,
    collision_layer: CollisionLayer,
    broad_phase_layer: BroadPhaseLayer,
    motion_type: MotionType,
    is_sensor: bool,
    collide_kinematic_vs_non_dynamic: bool,
    index_in_active_bodies: u32,
    in_broad_phase: AtomicBool,
}

impl Body {
    /// Index in the active body list of a body that is not active.
    pub const INACTIVE_INDEX: u32 = u32::MAX;

    pub(crate) fn new(id: BodyID, description: &BodyDescription, broad_phase_layer: BroadPhaseLayer) -> Self {
        Self {
            id,
            bounds: description.bounds,
            collision_layer: description.collision_layer,
            broad_phase_layer,
            motion_type: description.motion_type,
            is_sensor: description.is_sensor,
            collide_kinematic_vs_non_dynamic: description.collide_kinematic_vs_non_dynamic,
            index_in_active_bodies: Self::INACTIVE_INDEX,
            in_broad_phase: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn id(&self) -> BodyID {
        self.id
    }

    /// World space bounds.
    #[inline(always)]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    #[inline(always)]
    pub(crate) fn set_bounds(&mut self, bounds: BoundingBox) {
        self.bounds = bounds;
    }

    #[inline(always)]
    pub fn collision_layer(&self) -> CollisionLayer {
        self.collision_layer
    }

    #[inline(always)]
    pub fn broad_phase_layer(&self) -> BroadPhaseLayer {
        self.broad_phase_layer
    }

    #[inline(always)]
    pub(crate) fn set_layers(&mut self, collision_layer: CollisionLayer, broad_phase_layer: BroadPhaseLayer) {
        self.collision_layer = collision_layer;
        self.broad_phase_layer = broad_phase_layer;
    }

    #[inline(always)]
    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    #[inline(always)]
    pub fn is_static(&self) -> bool {
        self.motion_type == MotionType::Static
    }

    #[inline(always)]
    pub fn is_kinematic(&self) -> bool {
        self.motion_type == MotionType::Kinematic
    }

    #[inline(always)]
    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    #[inline(always)]
    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    #[inline(always)]
    pub fn collide_kinematic_vs_non_dynamic(&self) -> bool {
        self.collide_kinematic_vs_non_dynamic
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.index_in_active_bodies != Self::INACTIVE_INDEX
    }

    #[inline(always)]
    pub fn index_in_active_bodies(&self) -> u32 {
        self.index_in_active_bodies
    }

    #[inline(always)]
    pub(crate) fn set_index_in_active_bodies(&mut self, index: u32) {
        self.index_in_active_bodies = index;
    }

    #[inline(always)]
    pub fn is_in_broad_phase(&self) -> bool {
        self.in_broad_phase.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_in_broad_phase(&self, value: bool) {
        self.in_broad_phase.store(value, Ordering::Relaxed);
    }

    /// Decides if `body1`, which must be active, should report a pair with `body2` during pair finding.
    ///
    /// A pair is reported only when `body1` comes before `body2` in the active body list. Inactive
    /// and static bodies have index `INACTIVE_INDEX`, so they always come last and each pair is
    /// reported exactly once.
    #[inline]
    pub fn find_colliding_pairs_can_collide(body1: &Body, body2: &Body) -> bool {
        // At least one of: kinematic vs non dynamic allowed, a dynamic body, kinematic vs sensor.
        if !body1.collide_kinematic_vs_non_dynamic
            && !body2.collide_kinematic_vs_non_dynamic
            && !body1.is_dynamic()
            && !body2.is_dynamic()
            && !(body1.is_kinematic() && body2.is_sensor())
            && !(body2.is_kinematic() && body1.is_sensor())
        {
            return false;
        }

        let body1_index_in_active_bodies = body1.index_in_active_bodies;
        debug_assert!(
            !body1.is_static() && body1_index_in_active_bodies != Self::INACTIVE_INDEX,
            "Body 1 must be active!"
        );
        if body1_index_in_active_bodies >= body2.index_in_active_bodies {
            return false;
        }
        debug_assert_ne!(body1.id, body2.id, "A body can't collide with itself!");
        true
    }
}
