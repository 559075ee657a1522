use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use glam::Vec3;
use log::debug;
use thiserror::Error;

use super::broad_phase::{BroadPhase, BroadPhaseQuery, ModificationsLock};
use super::collectors::{
    BodyPairCollector, CastShapeBodyCollector, CollideShapeBodyCollector, RayCastBodyCollector,
};
use super::layers::{
    BroadPhaseLayer, BroadPhaseLayerFilter, BroadPhaseLayerInterface, CollisionLayerFilter,
    CollisionLayerPairFilter, CollisionVsBroadPhaseLayerFilter, INVALID_COLLISION_LAYER,
};
use super::query_shapes::{AABoxCast, OrientedBox, RayCast};
use crate::physics::body_id::BodyID;
use crate::physics::body_manager::BodyManager;
use crate::physics::broad_phase_allocation_sizes::BroadPhaseAllocationSizes;
use crate::physics::trees::{BodyTracker, NodeAllocator, QuadTree, QuadTreeAddState, QuadTreeUpdateState};
use crate::utilities::BoundingBox;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadPhaseError {
    #[error("max bodies must be between 1 and {max}, got {got}", max = BodyID::MAX_BODY_INDEX + 1)]
    InvalidMaxBodies { got: u32 },
    #[error("number of broad phase layers must be between 1 and {max}, got {got}", max = BroadPhaseLayer::INVALID.0 - 1)]
    InvalidLayerCount { got: u32 },
    #[error("node pool of {nodes} nodes is too small, at least {required} are needed")]
    NodePoolTooSmall { nodes: u32, required: u32 },
}

/// Result of [`BroadPhase::update_prepare`]. Empty when no tree needed an update.
#[derive(Debug)]
pub struct UpdateState {
    update: Option<(usize, QuadTreeUpdateState)>,
}

impl UpdateState {
    /// Layer whose tree was rebuilt, if any.
    pub fn layer(&self) -> Option<BroadPhaseLayer> {
        self.update.map(|(layer, _)| BroadPhaseLayer(layer as u8))
    }
}

#[derive(Debug)]
struct LayerAddState {
    /// Bodies of this layer in the id slice passed to the prepare.
    body_range: Range<usize>,
    state: QuadTreeAddState,
}

/// Result of [`BroadPhase::add_bodies_prepare`]: a prepared subtree per broad phase layer.
#[derive(Debug)]
pub struct AddState {
    layers: Vec<Option<LayerAddState>>,
}

/// Broad phase with one [`QuadTree`] per broad phase layer, all sharing a single node pool.
///
/// Queries lock one of two query locks for reading. An update flips which one new queries take, so
/// [`BroadPhase::frame_sync`] can wait on the other one before the replaced trees are freed.
pub struct BroadPhaseQuadTree {
    allocator: Arc<NodeAllocator>,
    layers: Vec<QuadTree>,
    trackers: Vec<BodyTracker>,
    layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    max_bodies: u32,
    /// Held exclusively around updates, shared by structural modifications.
    update_mutex: RwLock<()>,
    query_locks: [RwLock<()>; 2],
    query_lock_index: AtomicU32,
    next_layer_to_update: AtomicU32,
}

impl BroadPhaseQuadTree {
    /// Creates a broad phase sized for the bodies of `body_manager`.
    pub fn new(
        body_manager: &BodyManager,
        layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    ) -> Result<Self, BroadPhaseError> {
        let sizes = BroadPhaseAllocationSizes::for_bodies(
            body_manager.max_bodies(),
            layer_interface.num_broad_phase_layers(),
        );
        Self::with_allocation_sizes(sizes, layer_interface)
    }

    /// Creates a broad phase with explicit tracker and node pool sizes.
    pub fn with_allocation_sizes(
        sizes: BroadPhaseAllocationSizes,
        layer_interface: Arc<dyn BroadPhaseLayerInterface>,
    ) -> Result<Self, BroadPhaseError> {
        if sizes.bodies == 0 || sizes.bodies > BodyID::MAX_BODY_INDEX + 1 {
            return Err(BroadPhaseError::InvalidMaxBodies { got: sizes.bodies });
        }
        let num_layers = layer_interface.num_broad_phase_layers();
        if num_layers == 0 || num_layers >= BroadPhaseLayer::INVALID.0 as u32 {
            return Err(BroadPhaseError::InvalidLayerCount { got: num_layers });
        }
        let required = BroadPhaseAllocationSizes::min_nodes(num_layers);
        if sizes.nodes < required {
            return Err(BroadPhaseError::NodePoolTooSmall {
                nodes: sizes.nodes,
                required,
            });
        }

        let allocator = Arc::new(NodeAllocator::new(sizes.nodes));
        let layers = (0..num_layers)
            .map(|layer| {
                let name = layer_interface.broad_phase_layer_name(BroadPhaseLayer(layer as u8));
                QuadTree::new(allocator.clone(), name)
            })
            .collect();
        let trackers = (0..sizes.bodies).map(|_| BodyTracker::new()).collect();

        debug!(
            "BroadPhaseQuadTree: {} layers, {} bodies, node pool of {} nodes",
            num_layers, sizes.bodies, sizes.nodes
        );

        Ok(Self {
            allocator,
            layers,
            trackers,
            layer_interface,
            max_bodies: sizes.bodies,
            update_mutex: RwLock::new(()),
            query_locks: [RwLock::new(()), RwLock::new(())],
            query_lock_index: AtomicU32::new(0),
            next_layer_to_update: AtomicU32::new(0),
        })
    }

    #[inline(always)]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline(always)]
    pub fn layer_interface(&self) -> &Arc<dyn BroadPhaseLayerInterface> {
        &self.layer_interface
    }

    /// Tree of a broad phase layer.
    #[inline(always)]
    pub fn tree(&self, layer: BroadPhaseLayer) -> &QuadTree {
        &self.layers[layer.0 as usize]
    }

    /// Number of bodies over all layers.
    pub fn num_bodies(&self) -> u32 {
        self.layers.iter().map(QuadTree::num_bodies).sum()
    }

    /// Number of nodes left in the shared pool.
    pub fn num_free_nodes(&self) -> u32 {
        self.allocator.num_free_objects()
    }

    /// Broad phase layer the body is stored in, or `None` if it isn't in the broad phase.
    pub fn body_broad_phase_layer(&self, body_id: BodyID) -> Option<BroadPhaseLayer> {
        let layer = self.trackers[body_id.index() as usize].broad_phase_layer();
        (!layer.is_invalid()).then_some(layer)
    }

    /// Checks every tree against the bodies. Only active in debug builds.
    pub fn validate_trees(&self, bodies: &BodyManager) {
        for tree in &self.layers {
            tree.validate_tree(bodies, &self.trackers);
        }
    }

    #[inline]
    fn lock_queries(&self) -> RwLockReadGuard<'_, ()> {
        let index = self.query_lock_index.load(Ordering::Acquire) as usize;
        self.query_locks[index]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn lock_shared_update(&self) -> RwLockReadGuard<'_, ()> {
        self.update_mutex
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls `visit` for each contiguous run of ids with the same key. `ids` must be sorted by key.
    fn for_each_group<K, F, V>(ids: &[BodyID], key: F, mut visit: V)
    where
        K: PartialEq + Copy,
        F: Fn(BodyID) -> K,
        V: FnMut(K, Range<usize>),
    {
        let mut start = 0;
        while start < ids.len() {
            let group_key = key(ids[start]);
            let end = start + ids[start..].partition_point(|&id| key(id) == group_key);
            visit(group_key, start..end);
            start = end;
        }
    }

    /// Runs a query on the trees of all layers that have bodies and pass the filter.
    fn query_layers<F>(&self, broad_phase_layer_filter: &dyn BroadPhaseLayerFilter, mut query: F)
    where
        F: FnMut(&QuadTree) -> bool,
    {
        let _lock = self.lock_queries();
        for (layer, tree) in self.layers.iter().enumerate() {
            if tree.has_bodies()
                && broad_phase_layer_filter.should_collide(BroadPhaseLayer(layer as u8))
                && query(tree)
            {
                break;
            }
        }
    }
}

impl BroadPhaseQuery for BroadPhaseQuadTree {
    fn cast_ray(
        &self,
        ray: &RayCast,
        collector: &mut RayCastBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.cast_ray(ray, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn collide_aabox(
        &self,
        bounds: &BoundingBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.collide_aabox(bounds, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn collide_sphere(
        &self,
        center: Vec3,
        radius: f32,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.collide_sphere(center, radius, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn collide_point(
        &self,
        point: Vec3,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.collide_point(point, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn collide_oriented_box(
        &self,
        oriented_box: &OrientedBox,
        collector: &mut CollideShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.collide_oriented_box(oriented_box, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn cast_aabox(
        &self,
        box_cast: &AABoxCast,
        collector: &mut CastShapeBodyCollector<'_>,
        broad_phase_layer_filter: &dyn BroadPhaseLayerFilter,
        collision_layer_filter: &dyn CollisionLayerFilter,
    ) {
        self.query_layers(broad_phase_layer_filter, |tree| {
            tree.cast_aabox(box_cast, collector, collision_layer_filter, &self.trackers);
            collector.should_early_out()
        });
    }

    fn get_bounds(&self) -> BoundingBox {
        let _lock = self.lock_queries();
        let mut bounds = BoundingBox::invalid();
        for tree in &self.layers {
            bounds.encapsulate(&tree.get_bounds());
        }
        bounds
    }
}

impl BroadPhase for BroadPhaseQuadTree {
    fn optimize(&self, bodies: &BodyManager) {
        // Free the previous trees so there is room for the new ones.
        self.frame_sync();

        let lock = self.lock_modifications();
        for tree in &self.layers {
            if tree.has_bodies() || tree.is_dirty() {
                let state = tree.update_prepare(bodies, &self.trackers, true);
                tree.update_finalize(bodies, &self.trackers, state);
                debug!(
                    "BroadPhaseQuadTree: optimized '{}', {} bodies, depth {}",
                    tree.name(),
                    tree.num_bodies(),
                    tree.max_tree_depth()
                );
            }
        }

        // The replaced trees stay alive for running queries until the next frame_sync.
        self.query_lock_index.fetch_xor(1, Ordering::AcqRel);
        self.unlock_modifications(lock);

        self.next_layer_to_update.store(0, Ordering::Relaxed);
    }

    fn frame_sync(&self) {
        // Queries that started before the last update hold the old query lock.
        let old_index = (self.query_lock_index.load(Ordering::Acquire) ^ 1) as usize;
        let _lock = self.query_locks[old_index]
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for tree in &self.layers {
            tree.discard_old_tree();
        }
    }

    fn lock_modifications(&self) -> ModificationsLock<'_> {
        ModificationsLock::new(
            self.update_mutex
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn update_prepare(&self, bodies: &BodyManager, _lock: &ModificationsLock<'_>) -> UpdateState {
        let num_layers = self.layers.len() as u32;
        for _ in 0..num_layers {
            let layer = self.next_layer_to_update.load(Ordering::Relaxed);
            self.next_layer_to_update
                .store((layer + 1) % num_layers, Ordering::Relaxed);

            let tree = &self.layers[layer as usize];
            if tree.has_bodies() && tree.is_dirty() && tree.can_be_updated() {
                let state = tree.update_prepare(bodies, &self.trackers, false);
                return UpdateState {
                    update: Some((layer as usize, state)),
                };
            }
        }
        UpdateState { update: None }
    }

    fn update_finalize(&self, bodies: &BodyManager, _lock: &ModificationsLock<'_>, state: UpdateState) {
        let Some((layer, state)) = state.update else {
            return;
        };
        self.layers[layer].update_finalize(bodies, &self.trackers, state);

        // New queries use the other lock, frame_sync waits for the ones holding this one.
        self.query_lock_index.fetch_xor(1, Ordering::AcqRel);
    }

    fn add_bodies_prepare(&self, bodies: &BodyManager, body_ids: &mut [BodyID]) -> AddState {
        debug_assert!(bodies.max_bodies() <= self.max_bodies, "Body manager has more bodies than the broad phase!");

        let mut layers: Vec<Option<LayerAddState>> = (0..self.layers.len()).map(|_| None).collect();
        if body_ids.is_empty() {
            return AddState { layers };
        }

        body_ids.sort_unstable_by_key(|&id| bodies[id].broad_phase_layer());
        let body_ids: &[BodyID] = body_ids;
        Self::for_each_group(
            body_ids,
            |id| bodies[id].broad_phase_layer(),
            |layer, range| {
                let layer_index = layer.0 as usize;
                debug_assert!(layer_index < self.layers.len(), "Broad phase layer out of range!");

                let state = self.layers[layer_index].add_bodies_prepare(bodies, &self.trackers, &body_ids[range.clone()]);

                for &id in &body_ids[range.clone()] {
                    let body = &bodies[id];
                    debug_assert!(!body.is_in_broad_phase(), "Body is already in the broad phase!");
                    let tracker = &self.trackers[id.index() as usize];
                    debug_assert!(tracker.broad_phase_layer().is_invalid(), "Body is already tracked!");
                    tracker.set_broad_phase_layer(layer);
                    debug_assert_eq!(tracker.collision_layer(), INVALID_COLLISION_LAYER);
                    tracker.set_collision_layer(body.collision_layer());
                }

                layers[layer_index] = Some(LayerAddState {
                    body_range: range,
                    state,
                });
            },
        );
        AddState { layers }
    }

    fn add_bodies_finalize(&self, bodies: &BodyManager, body_ids: &[BodyID], state: AddState) {
        let _lock = self.lock_shared_update();

        for (layer, layer_state) in state.layers.into_iter().enumerate() {
            let Some(layer_state) = layer_state else {
                continue;
            };
            let layer_body_ids = &body_ids[layer_state.body_range];
            self.layers[layer].add_bodies_finalize(&self.trackers, layer_body_ids.len() as u32, &layer_state.state);

            for &id in layer_body_ids {
                let body = &bodies[id];
                debug_assert_eq!(self.trackers[id.index() as usize].broad_phase_layer().0 as usize, layer);
                debug_assert!(!body.is_in_broad_phase(), "Body is already in the broad phase!");
                body.set_in_broad_phase(true);
            }
        }
    }

    fn add_bodies_abort(&self, _bodies: &BodyManager, body_ids: &[BodyID], state: AddState) {
        for (layer, layer_state) in state.layers.into_iter().enumerate() {
            let Some(layer_state) = layer_state else {
                continue;
            };
            self.layers[layer].add_bodies_abort(&self.trackers, &layer_state.state);

            for &id in &body_ids[layer_state.body_range] {
                let tracker = &self.trackers[id.index() as usize];
                debug_assert_eq!(tracker.broad_phase_layer().0 as usize, layer);
                tracker.reset_layers();
            }
        }
    }

    fn remove_bodies(&self, bodies: &BodyManager, body_ids: &mut [BodyID]) {
        if body_ids.is_empty() {
            return;
        }
        let _lock = self.lock_shared_update();

        let trackers = &self.trackers;
        body_ids.sort_unstable_by_key(|&id| trackers[id.index() as usize].broad_phase_layer());
        let body_ids: &[BodyID] = body_ids;
        Self::for_each_group(
            body_ids,
            |id| trackers[id.index() as usize].broad_phase_layer(),
            |layer, range| {
                debug_assert!(!layer.is_invalid(), "Body is not in the broad phase!");
                let layer_body_ids = &body_ids[range];
                self.layers[layer.0 as usize].remove_bodies(bodies, trackers, layer_body_ids);

                for &id in layer_body_ids {
                    trackers[id.index() as usize].reset_layers();
                    let body = &bodies[id];
                    debug_assert!(body.is_in_broad_phase(), "Body is not in the broad phase!");
                    body.set_in_broad_phase(false);
                }
            },
        );
    }

    fn notify_bodies_aabb_changed(&self, bodies: &BodyManager, body_ids: &mut [BodyID], take_lock: bool) {
        if body_ids.is_empty() {
            return;
        }
        let _lock = take_lock.then(|| self.lock_shared_update());

        let trackers = &self.trackers;
        body_ids.sort_unstable_by_key(|&id| trackers[id.index() as usize].broad_phase_layer());
        let body_ids: &[BodyID] = body_ids;
        Self::for_each_group(
            body_ids,
            |id| trackers[id.index() as usize].broad_phase_layer(),
            |layer, range| {
                debug_assert!(!layer.is_invalid(), "Body is not in the broad phase!");
                self.layers[layer.0 as usize].notify_bodies_aabb_changed(bodies, trackers, &body_ids[range]);
            },
        );
    }

    fn notify_bodies_layer_changed(&self, bodies: &BodyManager, body_ids: &mut [BodyID]) {
        // Bodies that stay in the same tree are moved to the back.
        let mut num_changed = body_ids.len();
        for i in (0..body_ids.len()).rev() {
            let id = body_ids[i];
            let body = &bodies[id];
            debug_assert!(
                (body.broad_phase_layer().0 as usize) < self.layers.len(),
                "Broad phase layer out of range!"
            );
            let tracker = &self.trackers[id.index() as usize];
            if tracker.broad_phase_layer() == body.broad_phase_layer() {
                tracker.set_collision_layer(body.collision_layer());
                body_ids.swap(i, num_changed - 1);
                num_changed -= 1;
            }
        }

        if num_changed > 0 {
            let changed = &mut body_ids[..num_changed];
            self.remove_bodies(bodies, changed);
            let state = self.add_bodies_prepare(bodies, changed);
            self.add_bodies_finalize(bodies, changed, state);
        }
    }

    fn find_colliding_pairs(
        &self,
        bodies: &BodyManager,
        active_body_ids: &mut [BodyID],
        speculative_distance: f32,
        vs_broad_phase_layer_filter: &dyn CollisionVsBroadPhaseLayerFilter,
        pair_filter: &dyn CollisionLayerPairFilter,
        collector: &mut BodyPairCollector<'_>,
    ) {
        // No lock: updates and frame syncs are scheduled apart from pair finding.
        let trackers = &self.trackers;
        active_body_ids.sort_unstable_by_key(|&id| trackers[id.index() as usize].collision_layer());
        let active_body_ids: &[BodyID] = active_body_ids;
        Self::for_each_group(
            active_body_ids,
            |id| trackers[id.index() as usize].collision_layer(),
            |collision_layer, range| {
                debug_assert_ne!(collision_layer, INVALID_COLLISION_LAYER, "Active body is not in the broad phase!");
                for (layer, tree) in self.layers.iter().enumerate() {
                    if tree.has_bodies()
                        && vs_broad_phase_layer_filter.should_collide(collision_layer, BroadPhaseLayer(layer as u8))
                    {
                        tree.find_colliding_pairs(
                            bodies,
                            &active_body_ids[range.clone()],
                            speculative_distance,
                            collector,
                            pair_filter,
                        );
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body::MotionType;
    use crate::physics::body_description::BodyDescription;
    use crate::physics::collision_detection::{
        AcceptAllFilter, AllHitCollisionCollector, BodyPair, BroadPhaseCastResult, BroadPhaseLayerTable,
        CastRayTraits, CollideShapeTraits, CollisionCollector, CollisionLayerPairTable,
        CollisionVsBroadPhaseLayerTable, DefaultBroadPhaseLayerFilter, DefaultCollisionLayerFilter,
    };
    use crate::testing::{init_logging, Lcg};

    const MOVING: u16 = 0;
    const STATIC: u16 = 1;
    const DEBRIS: u16 = 2;

    /// Moving and debris bodies share broad phase layer 0, static bodies live in layer 1.
    fn layers() -> Arc<BroadPhaseLayerTable> {
        let mut layers = BroadPhaseLayerTable::new(3, 2);
        layers.map(MOVING, BroadPhaseLayer(0));
        layers.map(DEBRIS, BroadPhaseLayer(0));
        layers.map(STATIC, BroadPhaseLayer(1));
        layers.set_name(BroadPhaseLayer(0), "moving");
        layers.set_name(BroadPhaseLayer(1), "static");
        Arc::new(layers)
    }

    fn pair_table() -> CollisionLayerPairTable {
        let mut pairs = CollisionLayerPairTable::new(3);
        pairs.enable_collision(MOVING, MOVING);
        pairs.enable_collision(MOVING, STATIC);
        pairs.enable_collision(DEBRIS, STATIC);
        pairs
    }

    fn setup(max_bodies: u32) -> (BodyManager, BroadPhaseQuadTree) {
        init_logging();
        let layers = layers();
        let bodies = BodyManager::new(max_bodies, layers.clone());
        let broad_phase = BroadPhaseQuadTree::new(&bodies, layers).unwrap();
        (bodies, broad_phase)
    }

    fn add(bodies: &mut BodyManager, min: Vec3, max: Vec3, layer: u16, motion_type: MotionType) -> BodyID {
        bodies
            .add_body(&BodyDescription::new(BoundingBox::new(min, max), layer, motion_type))
            .unwrap()
    }

    fn insert(broad_phase: &BroadPhaseQuadTree, bodies: &BodyManager, ids: &[BodyID]) {
        let mut ids = ids.to_vec();
        let state = broad_phase.add_bodies_prepare(bodies, &mut ids);
        broad_phase.add_bodies_finalize(bodies, &ids, state);
    }

    fn collide_all(broad_phase: &BroadPhaseQuadTree, filter: &dyn BroadPhaseLayerFilter) -> Vec<BodyID> {
        let mut collector = AllHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        let everything = BoundingBox::new(Vec3::splat(-1000.0), Vec3::splat(1000.0));
        broad_phase.collide_aabox(&everything, &mut collector, filter, &AcceptAllFilter);
        collector.hits.sort();
        collector.hits
    }

    #[test]
    fn test_invalid_configuration() {
        let layers = layers();
        assert_eq!(
            BroadPhaseQuadTree::with_allocation_sizes(BroadPhaseAllocationSizes::new(0, 100), layers.clone()).err(),
            Some(BroadPhaseError::InvalidMaxBodies { got: 0 })
        );
        assert_eq!(
            BroadPhaseQuadTree::with_allocation_sizes(BroadPhaseAllocationSizes::new(10, 5), layers.clone()).err(),
            Some(BroadPhaseError::NodePoolTooSmall { nodes: 5, required: 6 })
        );
        let no_layers = Arc::new(BroadPhaseLayerTable::new(1, 0));
        assert_eq!(
            BroadPhaseQuadTree::with_allocation_sizes(BroadPhaseAllocationSizes::new(10, 100), no_layers).err(),
            Some(BroadPhaseError::InvalidLayerCount { got: 0 })
        );
        let broad_phase = BroadPhaseQuadTree::with_allocation_sizes(BroadPhaseAllocationSizes::new(10, 6), layers).unwrap();
        assert_eq!(broad_phase.num_layers(), 2);
        assert_eq!(broad_phase.tree(BroadPhaseLayer(1)).name(), "static");
    }

    #[test]
    fn test_add_sorts_bodies_into_layers() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let floor = add(&mut bodies, Vec3::new(-10.0, -1.0, -10.0), Vec3::new(10.0, 0.0, 10.0), STATIC, MotionType::Static);
        let b = add(&mut bodies, Vec3::splat(2.0), Vec3::splat(3.0), DEBRIS, MotionType::Dynamic);

        let mut ids = vec![floor, a, b];
        let state = broad_phase.add_bodies_prepare(&bodies, &mut ids);
        // Prepared bodies are tracked but not yet visible.
        assert_eq!(broad_phase.body_broad_phase_layer(floor), Some(BroadPhaseLayer(1)));
        assert!(collide_all(&broad_phase, &AcceptAllFilter).is_empty());
        assert!(!bodies[a].is_in_broad_phase());

        broad_phase.add_bodies_finalize(&bodies, &ids, state);
        assert!(bodies[a].is_in_broad_phase());
        assert_eq!(broad_phase.num_bodies(), 3);
        assert_eq!(broad_phase.tree(BroadPhaseLayer(0)).num_bodies(), 2);
        assert_eq!(broad_phase.tree(BroadPhaseLayer(1)).num_bodies(), 1);

        let mut expected = vec![a, b, floor];
        expected.sort();
        assert_eq!(collide_all(&broad_phase, &AcceptAllFilter), expected);

        let bounds = broad_phase.get_bounds();
        assert_eq!(bounds.min, Vec3::new(-10.0, -1.0, -10.0));
        assert_eq!(bounds.max, Vec3::new(10.0, 3.0, 10.0));
    }

    #[test]
    fn test_add_abort_leaves_bodies_out() {
        let (mut bodies, broad_phase) = setup(16);
        let free_nodes = broad_phase.num_free_nodes();
        let mut ids: Vec<BodyID> = (0..8)
            .map(|i| add(&mut bodies, Vec3::splat(i as f32), Vec3::splat(i as f32 + 0.5), MOVING, MotionType::Dynamic))
            .collect();
        let state = broad_phase.add_bodies_prepare(&bodies, &mut ids);
        broad_phase.add_bodies_abort(&bodies, &ids, state);

        assert_eq!(broad_phase.num_free_nodes(), free_nodes);
        assert_eq!(broad_phase.num_bodies(), 0);
        assert!(ids.iter().all(|&id| broad_phase.body_broad_phase_layer(id).is_none()));

        // The same bodies can be added afterwards.
        insert(&broad_phase, &bodies, &ids);
        assert_eq!(broad_phase.num_bodies(), 8);
    }

    #[test]
    fn test_remove_bodies() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let b = add(&mut bodies, Vec3::splat(2.0), Vec3::splat(3.0), STATIC, MotionType::Static);
        insert(&broad_phase, &bodies, &[a, b]);

        broad_phase.remove_bodies(&bodies, &mut [b, a]);
        assert_eq!(broad_phase.num_bodies(), 0);
        assert!(!bodies[a].is_in_broad_phase());
        assert!(collide_all(&broad_phase, &AcceptAllFilter).is_empty());

        bodies.remove_body(a).unwrap();
        bodies.remove_body(b).unwrap();
    }

    #[test]
    fn test_queries_respect_layer_filters() {
        let (mut bodies, broad_phase) = setup(16);
        let moving = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let debris = add(&mut bodies, Vec3::ZERO, Vec3::ONE, DEBRIS, MotionType::Dynamic);
        let floor = add(&mut bodies, Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0), STATIC, MotionType::Static);
        insert(&broad_phase, &bodies, &[moving, debris, floor]);

        let pairs = pair_table();
        let vs_table = CollisionVsBroadPhaseLayerTable::new(broad_phase.layer_interface().as_ref(), &pairs);

        // Debris only collides with static, so only the static layer is searched.
        let bp_filter = DefaultBroadPhaseLayerFilter::new(&vs_table, DEBRIS);
        assert_eq!(collide_all(&broad_phase, &bp_filter), vec![floor]);

        // Moving collides with moving and static, but not with debris.
        let bp_filter = DefaultBroadPhaseLayerFilter::new(&vs_table, MOVING);
        let layer_filter = DefaultCollisionLayerFilter::new(&pairs, MOVING);
        let mut collector = AllHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        broad_phase.collide_point(Vec3::new(0.5, 0.0, 0.5), &mut collector, &bp_filter, &layer_filter);
        collector.hits.sort();
        let mut expected = vec![moving, floor];
        expected.sort();
        assert_eq!(collector.hits, expected);

        let mut collector = AllHitCollisionCollector::<BroadPhaseCastResult, CastRayTraits>::new();
        let ray = RayCast::new(Vec3::new(0.5, 10.0, 0.5), Vec3::new(0.0, -20.0, 0.0));
        broad_phase.cast_ray(&ray, &mut collector, &bp_filter, &layer_filter);
        collector.sort();
        let hit_ids: Vec<BodyID> = collector.hits.iter().map(|hit| hit.body_id).collect();
        assert_eq!(hit_ids, vec![moving, floor]);
    }

    #[test]
    fn test_find_colliding_pairs() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let b = add(&mut bodies, Vec3::new(0.5, 0.0, 0.0), Vec3::new(1.5, 1.0, 1.0), MOVING, MotionType::Dynamic);
        let c = add(&mut bodies, Vec3::splat(10.0), Vec3::splat(11.0), MOVING, MotionType::Dynamic);
        insert(&broad_phase, &bodies, &[a, b, c]);
        bodies.activate_bodies(&[a, b]);

        let pairs = pair_table();
        let vs_table = CollisionVsBroadPhaseLayerTable::new(broad_phase.layer_interface().as_ref(), &pairs);
        let mut active = bodies.active_bodies().to_vec();
        let mut collector = AllHitCollisionCollector::<BodyPair, CollideShapeTraits>::new();
        broad_phase.find_colliding_pairs(&bodies, &mut active, 0.0, &vs_table, &pairs, &mut collector);
        assert_eq!(collector.hits, vec![BodyPair::new(a, b)]);
    }

    #[test]
    fn test_pairs_against_static_layer() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 0.5, 1.0), MOVING, MotionType::Dynamic);
        let debris = add(&mut bodies, Vec3::new(2.0, -0.5, 0.0), Vec3::new(3.0, 0.5, 1.0), DEBRIS, MotionType::Dynamic);
        let floor = add(&mut bodies, Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0), STATIC, MotionType::Static);
        insert(&broad_phase, &bodies, &[a, debris, floor]);
        bodies.activate_bodies(&[a, debris]);

        let pairs = pair_table();
        let vs_table = CollisionVsBroadPhaseLayerTable::new(broad_phase.layer_interface().as_ref(), &pairs);
        let mut active = bodies.active_bodies().to_vec();
        let mut collector = AllHitCollisionCollector::<BodyPair, CollideShapeTraits>::new();
        broad_phase.find_colliding_pairs(&bodies, &mut active, 0.0, &vs_table, &pairs, &mut collector);
        collector.hits.sort();

        let mut expected = vec![BodyPair::new(a, floor), BodyPair::new(debris, floor)];
        expected.sort();
        assert_eq!(collector.hits, expected);
    }

    #[test]
    fn test_update_cycle_round_robin() {
        let (mut bodies, broad_phase) = setup(64);
        let moving = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let floor = add(&mut bodies, Vec3::splat(-2.0), Vec3::splat(-1.0), STATIC, MotionType::Static);
        insert(&broad_phase, &bodies, &[moving, floor]);

        let lock = broad_phase.lock_modifications();
        let first = broad_phase.update_prepare(&bodies, &lock);
        assert_eq!(first.layer(), Some(BroadPhaseLayer(0)));
        broad_phase.update_finalize(&bodies, &lock, first);

        // Layer 0 still holds its old tree, so the next update moves on to layer 1.
        let second = broad_phase.update_prepare(&bodies, &lock);
        assert_eq!(second.layer(), Some(BroadPhaseLayer(1)));
        broad_phase.update_finalize(&bodies, &lock, second);

        let nothing = broad_phase.update_prepare(&bodies, &lock);
        assert_eq!(nothing.layer(), None);
        broad_phase.update_finalize(&bodies, &lock, nothing);
        broad_phase.unlock_modifications(lock);

        broad_phase.frame_sync();
        broad_phase.validate_trees(&bodies);
        let mut expected = vec![moving, floor];
        expected.sort();
        assert_eq!(collide_all(&broad_phase, &AcceptAllFilter), expected);
    }

    #[test]
    fn test_optimize_and_move_bodies() {
        let (mut bodies, broad_phase) = setup(512);
        let mut random = Lcg::new(31);
        let ids: Vec<BodyID> = (0..300)
            .map(|_| {
                let center = random.vec3(-40.0, 40.0);
                add(&mut bodies, center - Vec3::ONE, center + Vec3::ONE, MOVING, MotionType::Dynamic)
            })
            .collect();
        for chunk in ids.chunks(10) {
            insert(&broad_phase, &bodies, chunk);
        }
        let depth_before = broad_phase.tree(BroadPhaseLayer(0)).max_tree_depth();
        broad_phase.optimize(&bodies);
        broad_phase.frame_sync();
        assert!(broad_phase.tree(BroadPhaseLayer(0)).max_tree_depth() < depth_before);
        assert!(!broad_phase.tree(BroadPhaseLayer(0)).is_dirty());

        // Move a few bodies far away and check a query finds them at the new spot.
        let moved = &ids[..5];
        for &id in moved {
            let bounds = BoundingBox::new(Vec3::splat(200.0), Vec3::splat(201.0));
            bodies.set_bounds(id, bounds).unwrap();
        }
        broad_phase.notify_bodies_aabb_changed(&bodies, &mut moved.to_vec(), true);

        let mut collector = AllHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        broad_phase.collide_point(Vec3::splat(200.5), &mut collector, &AcceptAllFilter, &AcceptAllFilter);
        collector.hits.sort();
        let mut expected = moved.to_vec();
        expected.sort();
        assert_eq!(collector.hits, expected);

        let lock = broad_phase.lock_modifications();
        let state = broad_phase.update_prepare(&bodies, &lock);
        assert_eq!(state.layer(), Some(BroadPhaseLayer(0)));
        broad_phase.update_finalize(&bodies, &lock, state);
        drop(lock);
        broad_phase.frame_sync();
        broad_phase.validate_trees(&bodies);
    }

    /// Rebuilds and refills the broad phase from inside a running query.
    struct OptimizingCollector<'a> {
        broad_phase: &'a BroadPhaseQuadTree,
        bodies: &'a BodyManager,
        late_ids: &'a [BodyID],
        hits: Vec<BodyID>,
    }

    impl CollisionCollector<BodyID, CollideShapeTraits> for OptimizingCollector<'_> {
        fn add_hit(&mut self, result: &BodyID) {
            if self.hits.is_empty() {
                self.broad_phase.optimize(self.bodies);
                for &id in self.late_ids {
                    insert(self.broad_phase, self.bodies, &[id]);
                }
            }
            self.hits.push(*result);
        }

        fn early_out_fraction(&self) -> f32 {
            f32::MAX
        }

        fn set_early_out_fraction(&mut self, _fraction: f32) {}
    }

    #[test]
    fn test_optimize_keeps_old_tree_for_running_queries() {
        let (mut bodies, broad_phase) = setup(1024);
        let mut random = Lcg::new(5);
        let mut add_random = |bodies: &mut BodyManager| -> Vec<BodyID> {
            (0..300)
                .map(|_| {
                    let center = random.vec3(-40.0, 40.0);
                    add(bodies, center - Vec3::ONE, center + Vec3::ONE, MOVING, MotionType::Dynamic)
                })
                .collect()
        };
        let ids = add_random(&mut bodies);
        let late_ids = add_random(&mut bodies);
        for chunk in ids.chunks(10) {
            insert(&broad_phase, &bodies, chunk);
        }

        let mut collector = OptimizingCollector {
            broad_phase: &broad_phase,
            bodies: &bodies,
            late_ids: &late_ids,
            hits: Vec::new(),
        };
        let everything = BoundingBox::new(Vec3::splat(-1000.0), Vec3::splat(1000.0));
        broad_phase.collide_aabox(&everything, &mut collector, &AcceptAllFilter, &AcceptAllFilter);

        // The query finishes on the tree it started with, each body exactly once.
        let mut hits = collector.hits;
        assert_eq!(hits.len(), ids.len());
        hits.sort();
        hits.dedup();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(hits, expected);

        let free_nodes = broad_phase.num_free_nodes();
        broad_phase.frame_sync();
        assert!(broad_phase.num_free_nodes() > free_nodes);
        broad_phase.validate_trees(&bodies);
        assert_eq!(collide_all(&broad_phase, &AcceptAllFilter).len(), ids.len() + late_ids.len());
    }

    #[test]
    fn test_notify_bodies_layer_changed() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let b = add(&mut bodies, Vec3::splat(2.0), Vec3::splat(3.0), MOVING, MotionType::Dynamic);
        insert(&broad_phase, &bodies, &[a, b]);

        // Debris stays in the same tree, static moves to the other one.
        bodies.set_collision_layer(a, DEBRIS).unwrap();
        bodies.set_collision_layer(b, STATIC).unwrap();
        broad_phase.notify_bodies_layer_changed(&bodies, &mut [a, b]);

        assert_eq!(broad_phase.body_broad_phase_layer(a), Some(BroadPhaseLayer(0)));
        assert_eq!(broad_phase.body_broad_phase_layer(b), Some(BroadPhaseLayer(1)));
        assert_eq!(broad_phase.tree(BroadPhaseLayer(0)).num_bodies(), 1);
        assert_eq!(broad_phase.tree(BroadPhaseLayer(1)).num_bodies(), 1);
        assert!(bodies[b].is_in_broad_phase());

        // The collision layer filter sees the new layer of a.
        let pairs = pair_table();
        let layer_filter = DefaultCollisionLayerFilter::new(&pairs, MOVING);
        let mut collector = AllHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        let everything = BoundingBox::new(Vec3::splat(-10.0), Vec3::splat(10.0));
        broad_phase.collide_aabox(&everything, &mut collector, &AcceptAllFilter, &layer_filter);
        assert_eq!(collector.hits, vec![b]);
    }

    #[test]
    fn test_broad_phase_is_object_safe() {
        let (mut bodies, broad_phase) = setup(16);
        let a = add(&mut bodies, Vec3::ZERO, Vec3::ONE, MOVING, MotionType::Dynamic);
        let broad_phase: Box<dyn BroadPhase> = Box::new(broad_phase);
        let mut ids = vec![a];
        let state = broad_phase.add_bodies_prepare(&bodies, &mut ids);
        broad_phase.add_bodies_finalize(&bodies, &ids, state);
        assert_eq!(broad_phase.get_bounds(), BoundingBox::new(Vec3::ZERO, Vec3::ONE));
    }
}
