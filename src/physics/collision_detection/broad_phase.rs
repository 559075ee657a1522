use std::sync::RwLockWriteGuard;

use glam::Vec3;

use super::broad_phase_quad_tree::{AddState, UpdateState};
use super::collectors::{
    BodyPairCollector, CastShapeBodyCollector, CollideShapeBodyCollector, RayCastBodyCollector,
};
use super::layers::{
    BroadPhaseLayerFilter, CollisionLayerFilter, CollisionLayerPairFilter,
    CollisionVsBroadPhaseLayerFilter,
};
use super::query_shapes::{AABoxCast, OrientedBox, RayCast};
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;
use crate::utilities::BoundingBox;

/// Read only queries against the broad phase. Safe to call from many threads at once.
pub trait BroadPhaseQuery: Send + Sync {
    /// Casts a ray against the bounds of all bodies, reporting hits with the fraction where the ray
    /// enters the bounds.
    fn cast_ray(
        &self,
        ray: &RayCast,
        collector: &mut RayCastBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Reports bodies whose bounds overlap `bounds`.
    fn collide_aabox(
        &self,
        bounds: &BoundingBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Reports bodies whose bounds are within `radius` of `center`.
    fn collide_sphere(
        &self,
        center: Vec3,
        radius: f32,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Reports bodies whose bounds contain `point`.
    fn collide_point(
        &self,
        point: Vec3,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Reports bodies whose bounds overlap a rotated box.
    fn collide_oriented_box(
        &self,
        oriented_box: &OrientedBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Sweeps a box against the bounds of all bodies.
    fn cast_aabox(
        &self,
        box_cast: &AABoxCast,
        collector: &mut CastShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    );

    /// Bounds around all bodies in the broad phase. Bounds of moved or removed bodies may make this
    /// larger than needed until the next update.
    fn get_bounds(&self) -> BoundingBox;
}

/// Exclusive hold on the broad phase structure, required to run an update.
///
/// Adding, removing and moving bodies wait while it is held. Queries don't.
pub struct ModificationsLock<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl<'a> ModificationsLock<'a> {
    pub(crate) fn new(guard: RwLockWriteGuard<'a, ()>) -> Self {
        Self { _guard: guard }
    }
}

/// Spatial index over the bounds of all bodies, answering which bodies may overlap.
///
/// Body bounds and layers are read from the [`BodyManager`] passed to each call. Adding is split
/// into a prepare step that can run on any thread and a finalize step that makes the bodies
/// visible to queries.
pub trait BroadPhase: BroadPhaseQuery {
    /// Rebuilds every tree from scratch. Call after adding many bodies, before simulating.
    ///
    /// The replaced trees are freed by the next [`BroadPhase::frame_sync`].
    fn optimize(&self, bodies: &BodyManager);

    /// Releases trees replaced by the last update. No query may still be running.
    fn frame_sync(&self);

    /// Blocks modifications until the returned lock is released.
    fn lock_modifications(&self) -> ModificationsLock<'_>;

    fn unlock_modifications(&self, lock: ModificationsLock<'_>) {
        drop(lock);
    }

    /// Rebuilds the next tree that needs it, without making the result visible yet. Runs in
    /// parallel with queries.
    fn update_prepare(&self, bodies: &BodyManager, lock: &ModificationsLock<'_>) -> UpdateState;

    /// Makes the tree built by [`BroadPhase::update_prepare`] visible to new queries.
    fn update_finalize(&self, bodies: &BodyManager, lock: &ModificationsLock<'_>, state: UpdateState);

    /// Builds a structure for `body_ids` that [`BroadPhase::add_bodies_finalize`] inserts.
    /// `body_ids` is reordered.
    fn add_bodies_prepare(&self, bodies: &BodyManager, body_ids: &mut [BodyID]) -> AddState;

    /// Makes bodies prepared by [`BroadPhase::add_bodies_prepare`] visible to queries. `body_ids`
    /// must be the same slice, in the order the prepare left it.
    fn add_bodies_finalize(&self, bodies: &BodyManager, body_ids: &[BodyID], state: AddState);

    /// Throws away what [`BroadPhase::add_bodies_prepare`] built, leaving the bodies out.
    fn add_bodies_abort(&self, bodies: &BodyManager, body_ids: &[BodyID], state: AddState);

    /// Takes bodies out of the broad phase. `body_ids` is reordered.
    fn remove_bodies(&self, bodies: &BodyManager, body_ids: &mut [BodyID]);

    /// Grows the broad phase to fit the current bounds of moved bodies. `body_ids` is reordered.
    ///
    /// Pass `take_lock = false` only while holding the [`ModificationsLock`].
    fn notify_bodies_aabb_changed(&self, bodies: &BodyManager, body_ids: &mut [BodyID], take_lock: bool);

    /// Moves bodies whose collision layer changed to the tree of their new broad phase layer.
    /// `body_ids` is reordered.
    fn notify_bodies_layer_changed(&self, bodies: &BodyManager, body_ids: &mut [BodyID]);

    /// Finds pairs of an active body and any other body whose bounds, grown by
    /// `speculative_distance`, overlap. `active_body_ids` is reordered.
    fn find_colliding_pairs(
        &self,
        bodies: &BodyManager,
        active_body_ids: &mut [BodyID],
        speculative_distance: f32,
        vs_broad_phase_layer_filter: &dyn CollisionVsBroadPhaseLayerFilter,
        pair_filter: &dyn CollisionLayerPairFilter,
        collector: &mut BodyPairCollector<'_>,
    );
}
