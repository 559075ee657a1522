//! Shared helpers for unit tests.

use std::sync::Arc;

use glam::Vec3;

use crate::physics::collision_detection::{BroadPhaseLayer, BroadPhaseLayerTable};
use crate::physics::{BodyDescription, BodyID, BodyManager, MotionType};
use crate::physics::trees::BodyTracker;
use crate::utilities::BoundingBox;

/// Installs a test logger once; repeated calls are ignored.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small deterministic linear congruential generator so randomized tests are reproducible.
pub(crate) struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407),
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 33) as u32
    }

    /// Uniform float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 23) as f32
    }

    pub fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next_f32()
    }

    pub fn vec3(&mut self, min: f32, max: f32) -> Vec3 {
        Vec3::new(self.range(min, max), self.range(min, max), self.range(min, max))
    }
}

/// Bodies plus their broad phase trackers, for driving a single quad-tree directly.
pub(crate) struct TestScene {
    pub bodies: BodyManager,
    pub trackers: Vec<BodyTracker>,
}

impl TestScene {
    /// Scene where collision layers 0 and 1 both map to broad phase layer 0.
    pub fn new(max_bodies: u32) -> Self {
        let mut layers = BroadPhaseLayerTable::new(2, 1);
        layers.map(0, BroadPhaseLayer(0));
        layers.map(1, BroadPhaseLayer(0));
        Self {
            bodies: BodyManager::new(max_bodies, Arc::new(layers)),
            trackers: (0..max_bodies).map(|_| BodyTracker::new()).collect(),
        }
    }

    /// Adds a dynamic body in collision layer 0 and fills in its tracker layers.
    pub fn add_box(&mut self, center: Vec3, half_extents: Vec3) -> BodyID {
        let bounds = BoundingBox::from_center_and_half_extents(center, half_extents);
        self.add_body(&BodyDescription::new(bounds, 0, MotionType::Dynamic))
    }

    pub fn add_body(&mut self, description: &BodyDescription) -> BodyID {
        let id = self.bodies.add_body(description).expect("test scene is full");
        let tracker = &self.trackers[id.index() as usize];
        tracker.set_broad_phase_layer(BroadPhaseLayer(0));
        tracker.set_collision_layer(description.collision_layer);
        id
    }
}
