use crate::physics::body::MotionType;
use crate::physics::collision_detection::CollisionLayer;
use crate::utilities::BoundingBox;

/// Describes a body's broad phase relevant state at creation.
#[derive(Debug, Clone, Copy)]
pub struct BodyDescription {
    /// World space bounds of the body.
    pub bounds: BoundingBox,
    /// Layer the body collides in. Decides the broad phase layer the body is stored in.
    pub collision_layer: CollisionLayer,
    pub motion_type: MotionType,
    /// Sensors detect overlaps but don't take part in contact resolution.
    pub is_sensor: bool,
    /// Lets kinematic bodies report pairs with static and kinematic bodies.
    pub collide_kinematic_vs_non_dynamic: bool,
}

impl BodyDescription {
    /// Creates a description of a regular, non-sensor body.
    #[inline(always)]
    pub fn new(bounds: BoundingBox, collision_layer: CollisionLayer, motion_type: MotionType) -> Self {
        Self {
            bounds,
            collision_layer,
            motion_type,
            is_sensor: false,
            collide_kinematic_vs_non_dynamic: false,
        }
    }

    /// Creates a description of a sensor.
    #[inline(always)]
    pub fn new_sensor(bounds: BoundingBox, collision_layer: CollisionLayer, motion_type: MotionType) -> Self {
        Self {
            is_sensor: true,
            ..Self::new(bounds, collision_layer, motion_type)
        }
    }
}
