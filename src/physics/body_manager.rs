use std::ops::Index;
use std::sync::Arc;

use thiserror::Error;

use crate::physics::body::Body;
use crate::physics::body_description::BodyDescription;
use crate::physics::body_id::BodyID;
use crate::physics::collision_detection::{
    BroadPhaseLayer, BroadPhaseLayerInterface, CollisionLayer, INVALID_COLLISION_LAYER,
};
use crate::utilities::BoundingBox;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyManagerError {
    #[error("out of bodies: all {max_bodies} body slots are in use")]
    OutOfBodies { max_bodies: u32 },
    #[error("invalid body id: {0}")]
    InvalidBodyId(BodyID),
    #[error("collision layer {0} does not map to a broad phase layer")]
    InvalidCollisionLayer(CollisionLayer),
}

/// Owns the bodies of a simulation and hands out their ids.
///
/// Freed slots are reused, bumping the slot's sequence number so stale ids are detected.
pub struct BodyManager {
    bodies: Vec<Option<Body>>,
    sequence_numbers: Vec<u8>,
    free_slots: Vec<u32>,
    active_bodies: Vec<BodyID>,
    layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    max_bodies: u32,
}

impl BodyManager {
    /// Creates a body manager with room for `max_bodies` bodies.
    pub fn new(max_bodies: u32, layer_interface: Arc<dyn BroadPhaseLayerInterface>) -> Self {
        debug_assert!(max_bodies <= BodyID::MAX_BODY_INDEX + 1, "Too many bodies!");
        Self {
            bodies: Vec::with_capacity(max_bodies as usize),
            sequence_numbers: Vec::with_capacity(max_bodies as usize),
            free_slots: Vec::new(),
            active_bodies: Vec::new(),
            layer_interface,
            max_bodies,
        }
    }

    #[inline(always)]
    pub fn max_bodies(&self) -> u32 {
        self.max_bodies
    }

    /// Number of bodies currently alive.
    #[inline(always)]
    pub fn num_bodies(&self) -> u32 {
        (self.bodies.len() - self.free_slots.len()) as u32
    }

    #[inline(always)]
    pub fn layer_interface(&self) -> &Arc<dyn BroadPhaseLayerInterface> {
        &self.layer_interface
    }

    /// Creates a body. The body starts inactive and outside the broad phase.
    pub fn add_body(&mut self, description: &BodyDescription) -> Result<BodyID, BodyManagerError> {
        let broad_phase_layer = self.map_layer(description.collision_layer)?;

        let index = match self.free_slots.pop() {
            Some(index) => {
                let sequence_number = &mut self.sequence_numbers[index as usize];
                *sequence_number = sequence_number.wrapping_add(1);
                index
            }
            None => {
                if self.bodies.len() as u32 >= self.max_bodies {
                    return Err(BodyManagerError::OutOfBodies {
                        max_bodies: self.max_bodies,
                    });
                }
                self.bodies.push(None);
                self.sequence_numbers.push(0);
                (self.bodies.len() - 1) as u32
            }
        };

        let id = BodyID::new(index, self.sequence_numbers[index as usize]);
        self.bodies[index as usize] = Some(Body::new(id, description, broad_phase_layer));
        Ok(id)
    }

    /// Destroys a body. It must have been removed from the broad phase.
    pub fn remove_body(&mut self, id: BodyID) -> Result<Body, BodyManagerError> {
        self.body(id)?;
        self.deactivate_bodies(&[id]);
        let body = self.bodies[id.index() as usize]
            .take()
            .ok_or(BodyManagerError::InvalidBodyId(id))?;
        debug_assert!(
            !body.is_in_broad_phase(),
            "Remove the body from the broad phase before destroying it!"
        );
        self.free_slots.push(id.index());
        Ok(body)
    }

    /// Looks up a body, returning `None` for stale or invalid ids.
    #[inline]
    pub fn try_get(&self, id: BodyID) -> Option<&Body> {
        self.bodies
            .get(id.index() as usize)
            .and_then(|body| body.as_ref())
            .filter(|body| body.id() == id)
    }

    /// Looks up the body in slot `index` regardless of sequence number.
    #[inline]
    pub fn get_by_index(&self, index: u32) -> Option<&Body> {
        self.bodies.get(index as usize).and_then(|body| body.as_ref())
    }

    pub fn body(&self, id: BodyID) -> Result<&Body, BodyManagerError> {
        self.try_get(id).ok_or(BodyManagerError::InvalidBodyId(id))
    }

    pub fn body_mut(&mut self, id: BodyID) -> Result<&mut Body, BodyManagerError> {
        self.bodies
            .get_mut(id.index() as usize)
            .and_then(|body| body.as_mut())
            .filter(|body| body.id() == id)
            .ok_or(BodyManagerError::InvalidBodyId(id))
    }

    /// Updates the world space bounds. The broad phase must be notified separately.
    pub fn set_bounds(&mut self, id: BodyID, bounds: BoundingBox) -> Result<(), BodyManagerError> {
        self.body_mut(id)?.set_bounds(bounds);
        Ok(())
    }

    /// Moves a body to another collision layer, re-mapping its broad phase layer. The broad phase
    /// must be notified separately.
    pub fn set_collision_layer(
        &mut self,
        id: BodyID,
        layer: CollisionLayer,
    ) -> Result<(), BodyManagerError> {
        let broad_phase_layer = self.map_layer(layer)?;
        self.body_mut(id)?.set_layers(layer, broad_phase_layer);
        Ok(())
    }

    /// Appends non-static, inactive bodies to the active list. Unknown ids are skipped.
    pub fn activate_bodies(&mut self, ids: &[BodyID]) {
        for &id in ids {
            let next_index = self.active_bodies.len() as u32;
            if let Ok(body) = self.body_mut(id) {
                if !body.is_static() && !body.is_active() {
                    body.set_index_in_active_bodies(next_index);
                    self.active_bodies.push(id);
                }
            }
        }
    }

    /// Removes bodies from the active list. The last active body takes the freed spot.
    pub fn deactivate_bodies(&mut self, ids: &[BodyID]) {
        for &id in ids {
            let Ok(body) = self.body_mut(id) else {
                continue;
            };
            if !body.is_active() {
                continue;
            }
            let index = body.index_in_active_bodies();
            body.set_index_in_active_bodies(Body::INACTIVE_INDEX);

            self.active_bodies.swap_remove(index as usize);
            if let Some(&moved) = self.active_bodies.get(index as usize) {
                if let Ok(moved_body) = self.body_mut(moved) {
                    moved_body.set_index_in_active_bodies(index);
                }
            }
        }
    }

    #[inline(always)]
    pub fn active_bodies(&self) -> &[BodyID] {
        &self.active_bodies
    }

    fn map_layer(&self, layer: CollisionLayer) -> Result<BroadPhaseLayer, BodyManagerError> {
        if layer == INVALID_COLLISION_LAYER {
            return Err(BodyManagerError::InvalidCollisionLayer(layer));
        }
        let broad_phase_layer = self.layer_interface.broad_phase_layer(layer);
        if broad_phase_layer.0 as u32 >= self.layer_interface.num_broad_phase_layers() {
            return Err(BodyManagerError::InvalidCollisionLayer(layer));
        }
        Ok(broad_phase_layer)
    }
}

impl Index<BodyID> for BodyManager {
    type Output = Body;

    /// Panics on a stale or invalid id.
    #[inline]
    fn index(&self, id: BodyID) -> &Body {
        match self.try_get(id) {
            Some(body) => body,
            None => panic!("Invalid body id {}!", id),
        }
    }
}
