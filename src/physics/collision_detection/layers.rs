/// Layer a body collides in. Which layers collide with each other is decided by a
/// [`CollisionLayerPairFilter`].
pub type CollisionLayer = u16;

pub const INVALID_COLLISION_LAYER: CollisionLayer = 0xffff;

/// Each broad phase layer gets its own quad-tree. Collision layers are mapped onto broad phase
/// layers through a [`BroadPhaseLayerInterface`].
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BroadPhaseLayer(pub u8);

impl BroadPhaseLayer {
    pub const INVALID: BroadPhaseLayer = BroadPhaseLayer(0xff);

    #[inline(always)]
    pub fn value(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl std::fmt::Display for BroadPhaseLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BroadPhaseLayer<{}>", self.0)
    }
}

/// Maps collision layers to broad phase layers.
pub trait BroadPhaseLayerInterface: Send + Sync {
    fn num_broad_phase_layers(&self) -> u32;

    /// Broad phase layer for a collision layer.
    fn broad_phase_layer(&self, layer: CollisionLayer) -> BroadPhaseLayer;

    /// Name used for the layer's tree in log output.
    fn broad_phase_layer_name(&self, layer: BroadPhaseLayer) -> String {
        format!("Layer {}", layer.0)
    }
}

/// Filters broad phase layers during queries.
pub trait BroadPhaseLayerFilter {
    fn should_collide(&self, _layer: BroadPhaseLayer) -> bool {
        true
    }
}

/// Filters bodies by collision layer during queries.
pub trait CollisionLayerFilter {
    fn should_collide(&self, _layer: CollisionLayer) -> bool {
        true
    }
}

/// Decides if two collision layers collide.
pub trait CollisionLayerPairFilter {
    fn should_collide(&self, _layer1: CollisionLayer, _layer2: CollisionLayer) -> bool {
        true
    }
}

/// Decides if a collision layer can collide with anything in a broad phase layer.
pub trait CollisionVsBroadPhaseLayerFilter {
    fn should_collide(&self, _layer1: CollisionLayer, _layer2: BroadPhaseLayer) -> bool {
        true
    }
}

/// Filter that lets everything through.
#[derive(Debug, Default, Copy, Clone)]
pub struct AcceptAllFilter;

impl BroadPhaseLayerFilter for AcceptAllFilter {}
impl CollisionLayerFilter for AcceptAllFilter {}
impl CollisionLayerPairFilter for AcceptAllFilter {}
impl CollisionVsBroadPhaseLayerFilter for AcceptAllFilter {}

/// Broad phase layer filter that accepts the broad phase layers a single collision layer can hit.
pub struct DefaultBroadPhaseLayerFilter<'a> {
    filter: &'a dyn CollisionVsBroadPhaseLayerFilter,
    layer: CollisionLayer,
}

impl<'a> DefaultBroadPhaseLayerFilter<'a> {
    pub fn new(filter: &'a dyn CollisionVsBroadPhaseLayerFilter, layer: CollisionLayer) -> Self {
        Self { filter, layer }
    }
}

impl BroadPhaseLayerFilter for DefaultBroadPhaseLayerFilter<'_> {
    #[inline]
    fn should_collide(&self, layer: BroadPhaseLayer) -> bool {
        self.filter.should_collide(self.layer, layer)
    }
}

/// Collision layer filter that accepts the layers a single collision layer collides with.
pub struct DefaultCollisionLayerFilter<'a> {
    filter: &'a dyn CollisionLayerPairFilter,
    layer: CollisionLayer,
}

impl<'a> DefaultCollisionLayerFilter<'a> {
    pub fn new(filter: &'a dyn CollisionLayerPairFilter, layer: CollisionLayer) -> Self {
        Self { filter, layer }
    }
}

impl CollisionLayerFilter for DefaultCollisionLayerFilter<'_> {
    #[inline]
    fn should_collide(&self, layer: CollisionLayer) -> bool {
        self.filter.should_collide(self.layer, layer)
    }
}

/// Symmetric table of which collision layers collide. Nothing collides until enabled.
#[derive(Debug, Clone)]
pub struct CollisionLayerPairTable {
    num_layers: u16,
    table: Vec<bool>,
}

impl CollisionLayerPairTable {
    pub fn new(num_layers: u16) -> Self {
        Self {
            num_layers,
            table: vec![false; num_layers as usize * num_layers as usize],
        }
    }

    #[inline(always)]
    pub fn num_layers(&self) -> u16 {
        self.num_layers
    }

    pub fn enable_collision(&mut self, layer1: CollisionLayer, layer2: CollisionLayer) {
        self.set(layer1, layer2, true);
    }

    pub fn disable_collision(&mut self, layer1: CollisionLayer, layer2: CollisionLayer) {
        self.set(layer1, layer2, false);
    }

    fn set(&mut self, layer1: CollisionLayer, layer2: CollisionLayer, value: bool) {
        debug_assert!(
            layer1 < self.num_layers && layer2 < self.num_layers,
            "Collision layer out of range!"
        );
        let n = self.num_layers as usize;
        self.table[layer1 as usize * n + layer2 as usize] = value;
        self.table[layer2 as usize * n + layer1 as usize] = value;
    }
}

impl CollisionLayerPairFilter for CollisionLayerPairTable {
    #[inline]
    fn should_collide(&self, layer1: CollisionLayer, layer2: CollisionLayer) -> bool {
        if layer1 >= self.num_layers || layer2 >= self.num_layers {
            return false;
        }
        self.table[layer1 as usize * self.num_layers as usize + layer2 as usize]
    }
}

/// Table mapping collision layers to broad phase layers. Unmapped layers map to
/// [`BroadPhaseLayer::INVALID`].
#[derive(Debug, Clone)]
pub struct BroadPhaseLayerTable {
    num_broad_phase_layers: u32,
    mapping: Vec<BroadPhaseLayer>,
    names: Vec<Option<String>>,
}

impl BroadPhaseLayerTable {
    pub fn new(num_collision_layers: u16, num_broad_phase_layers: u32) -> Self {
        Self {
            num_broad_phase_layers,
            mapping: vec![BroadPhaseLayer::INVALID; num_collision_layers as usize],
            names: vec![None; num_broad_phase_layers as usize],
        }
    }

    pub fn map(&mut self, layer: CollisionLayer, broad_phase_layer: BroadPhaseLayer) {
        debug_assert!(
            (broad_phase_layer.0 as u32) < self.num_broad_phase_layers,
            "Broad phase layer out of range!"
        );
        self.mapping[layer as usize] = broad_phase_layer;
    }

    pub fn set_name(&mut self, broad_phase_layer: BroadPhaseLayer, name: impl Into<String>) {
        self.names[broad_phase_layer.0 as usize] = Some(name.into());
    }
}

impl BroadPhaseLayerInterface for BroadPhaseLayerTable {
    fn num_broad_phase_layers(&self) -> u32 {
        self.num_broad_phase_layers
    }

    fn broad_phase_layer(&self, layer: CollisionLayer) -> BroadPhaseLayer {
        self.mapping
            .get(layer as usize)
            .copied()
            .unwrap_or(BroadPhaseLayer::INVALID)
    }

    fn broad_phase_layer_name(&self, layer: BroadPhaseLayer) -> String {
        match self.names.get(layer.0 as usize) {
            Some(Some(name)) => name.clone(),
            _ => format!("Layer {}", layer.0),
        }
    }
}

/// Collision layer vs broad phase layer table derived from a pair table: a collision layer can hit
/// a broad phase layer if it collides with any collision layer mapped to it.
#[derive(Debug, Clone)]
pub struct CollisionVsBroadPhaseLayerTable {
    num_broad_phase_layers: u32,
    table: Vec<bool>,
}

impl CollisionVsBroadPhaseLayerTable {
    pub fn new(
        layer_interface: &dyn BroadPhaseLayerInterface,
        pair_filter: &CollisionLayerPairTable,
    ) -> Self {
        let num_layers = pair_filter.num_layers();
        let num_broad_phase_layers = layer_interface.num_broad_phase_layers();
        let mut table = vec![false; num_layers as usize * num_broad_phase_layers as usize];
        for layer1 in 0..num_layers {
            for layer2 in 0..num_layers {
                if !pair_filter.should_collide(layer1, layer2) {
                    continue;
                }
                let broad_phase_layer = layer_interface.broad_phase_layer(layer2);
                if (broad_phase_layer.0 as u32) < num_broad_phase_layers {
                    table[layer1 as usize * num_broad_phase_layers as usize
                        + broad_phase_layer.0 as usize] = true;
                }
            }
        }
        Self {
            num_broad_phase_layers,
            table,
        }
    }
}

impl CollisionVsBroadPhaseLayerFilter for CollisionVsBroadPhaseLayerTable {
    #[inline]
    fn should_collide(&self, layer1: CollisionLayer, layer2: BroadPhaseLayer) -> bool {
        if layer2.0 as u32 >= self.num_broad_phase_layers {
            return false;
        }
        self.table
            .get(layer1 as usize * self.num_broad_phase_layers as usize + layer2.0 as usize)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NON_MOVING: CollisionLayer = 0;
    const MOVING: CollisionLayer = 1;
    const DEBRIS: CollisionLayer = 2;

    fn setup() -> (CollisionLayerPairTable, BroadPhaseLayerTable) {
        let mut pairs = CollisionLayerPairTable::new(3);
        pairs.enable_collision(NON_MOVING, MOVING);
        pairs.enable_collision(MOVING, MOVING);
        pairs.enable_collision(DEBRIS, NON_MOVING);

        let mut layers = BroadPhaseLayerTable::new(3, 2);
        layers.map(NON_MOVING, BroadPhaseLayer(0));
        layers.map(MOVING, BroadPhaseLayer(1));
        layers.map(DEBRIS, BroadPhaseLayer(1));
        layers.set_name(BroadPhaseLayer(0), "NonMoving");
        (pairs, layers)
    }

    #[test]
    fn test_pair_table_is_symmetric() {
        let (pairs, _) = setup();
        assert!(pairs.should_collide(MOVING, NON_MOVING));
        assert!(pairs.should_collide(NON_MOVING, DEBRIS));
        assert!(!pairs.should_collide(NON_MOVING, NON_MOVING));
        assert!(!pairs.should_collide(DEBRIS, MOVING));
        assert!(!pairs.should_collide(INVALID_COLLISION_LAYER, MOVING));
    }

    #[test]
    fn test_layer_names() {
        let (_, layers) = setup();
        assert_eq!(layers.broad_phase_layer_name(BroadPhaseLayer(0)), "NonMoving");
        assert_eq!(layers.broad_phase_layer_name(BroadPhaseLayer(1)), "Layer 1");
        assert!(layers.broad_phase_layer(7).is_invalid());
    }

    #[test]
    fn test_vs_broad_phase_table() {
        let (pairs, layers) = setup();
        let table = CollisionVsBroadPhaseLayerTable::new(&layers, &pairs);
        assert!(table.should_collide(NON_MOVING, BroadPhaseLayer(1)));
        assert!(!table.should_collide(NON_MOVING, BroadPhaseLayer(0)));
        assert!(table.should_collide(MOVING, BroadPhaseLayer(0)));
        assert!(table.should_collide(DEBRIS, BroadPhaseLayer(0)));
        assert!(!table.should_collide(DEBRIS, BroadPhaseLayer(1)));

        // Layers past the end don't wrap into the next collision layer's row.
        assert!(!table.should_collide(NON_MOVING, BroadPhaseLayer(2)));
        assert!(!table.should_collide(MOVING, BroadPhaseLayer::INVALID));
        assert!(!table.should_collide(INVALID_COLLISION_LAYER, BroadPhaseLayer(0)));

        let filter = DefaultBroadPhaseLayerFilter::new(&table, DEBRIS);
        assert!(filter.should_collide(BroadPhaseLayer(0)));
        let filter = DefaultCollisionLayerFilter::new(&pairs, DEBRIS);
        assert!(filter.should_collide(NON_MOVING));
        assert!(!filter.should_collide(MOVING));
    }
}
