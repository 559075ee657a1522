use std::marker::PhantomData;

use crate::physics::body_id::BodyID;

/// Early out fractions of a family of queries.
pub trait CollisionCollectorTraits {
    /// Fraction a collector starts with. Hits beyond it are not interesting.
    const INITIAL_EARLY_OUT_FRACTION: f32;
    /// Once the early out fraction drops to this value the query stops.
    const SHOULD_EARLY_OUT_FRACTION: f32;
}

/// Ray casts report fractions in [0, 1].
pub struct CastRayTraits;

impl CollisionCollectorTraits for CastRayTraits {
    const INITIAL_EARLY_OUT_FRACTION: f32 = 1.0 + f32::EPSILON;
    const SHOULD_EARLY_OUT_FRACTION: f32 = -f32::MAX;
}

pub struct CastShapeTraits;

impl CollisionCollectorTraits for CastShapeTraits {
    const INITIAL_EARLY_OUT_FRACTION: f32 = f32::MAX;
    const SHOULD_EARLY_OUT_FRACTION: f32 = -f32::MAX;
}

pub struct CollideShapeTraits;

impl CollisionCollectorTraits for CollideShapeTraits {
    const INITIAL_EARLY_OUT_FRACTION: f32 = f32::MAX;
    const SHOULD_EARLY_OUT_FRACTION: f32 = -f32::MAX;
}

/// Receives the hits of a query and tells the query when to stop.
pub trait CollisionCollector<R, T: CollisionCollectorTraits> {
    fn add_hit(&mut self, result: &R);

    fn early_out_fraction(&self) -> f32;

    /// Overwrites the early out fraction without any checks.
    fn set_early_out_fraction(&mut self, fraction: f32);

    /// Clears collected state so the collector can be reused.
    fn reset(&mut self) {
        self.set_early_out_fraction(T::INITIAL_EARLY_OUT_FRACTION);
    }

    /// Lowers the early out fraction so that later hits further away are skipped.
    #[inline]
    fn update_early_out_fraction(&mut self, fraction: f32) {
        debug_assert!(
            fraction <= self.early_out_fraction(),
            "The early out fraction can only decrease!"
        );
        self.set_early_out_fraction(fraction);
    }

    /// Early out fraction clamped to be strictly positive, for tests that reject zero.
    #[inline]
    fn positive_early_out_fraction(&self) -> f32 {
        self.early_out_fraction().max(f32::MIN_POSITIVE)
    }

    /// Stops the query as soon as possible.
    #[inline]
    fn force_early_out(&mut self) {
        self.set_early_out_fraction(T::SHOULD_EARLY_OUT_FRACTION);
    }

    #[inline]
    fn should_early_out(&self) -> bool {
        self.early_out_fraction() <= T::SHOULD_EARLY_OUT_FRACTION
    }
}

/// Hit of a ray or box cast against the broad phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadPhaseCastResult {
    pub body_id: BodyID,
    /// Fraction along the cast direction where the body's bounds are entered.
    pub fraction: f32,
}

impl Default for BroadPhaseCastResult {
    fn default() -> Self {
        Self {
            body_id: BodyID::INVALID,
            fraction: 1.0 + f32::EPSILON,
        }
    }
}

/// Two bodies whose bounds overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyPair {
    pub body_a: BodyID,
    pub body_b: BodyID,
}

impl BodyPair {
    #[inline(always)]
    pub fn new(body_a: BodyID, body_b: BodyID) -> Self {
        Self { body_a, body_b }
    }
}

/// Results that carry a fraction to compare hits by.
pub trait HitFraction {
    fn hit_fraction(&self) -> f32;
}

impl HitFraction for BroadPhaseCastResult {
    #[inline(always)]
    fn hit_fraction(&self) -> f32 {
        self.fraction
    }
}

pub type RayCastBodyCollector<'a> = dyn CollisionCollector<BroadPhaseCastResult, CastRayTraits> + 'a;
pub type CastShapeBodyCollector<'a> = dyn CollisionCollector<BroadPhaseCastResult, CastShapeTraits> + 'a;
pub type CollideShapeBodyCollector<'a> = dyn CollisionCollector<BodyID, CollideShapeTraits> + 'a;
pub type BodyPairCollector<'a> = dyn CollisionCollector<BodyPair, CollideShapeTraits> + 'a;

/// Collects every hit.
pub struct AllHitCollisionCollector<R, T> {
    pub hits: Vec<R>,
    early_out_fraction: f32,
    _traits: PhantomData<T>,
}

impl<R, T: CollisionCollectorTraits> Default for AllHitCollisionCollector<R, T> {
    fn default() -> Self {
        Self {
            hits: Vec::new(),
            early_out_fraction: T::INITIAL_EARLY_OUT_FRACTION,
            _traits: PhantomData,
        }
    }
}

impl<R, T: CollisionCollectorTraits> AllHitCollisionCollector<R, T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn had_hit(&self) -> bool {
        !self.hits.is_empty()
    }
}

impl<R: HitFraction, T> AllHitCollisionCollector<R, T> {
    /// Orders the hits nearest first.
    pub fn sort(&mut self) {
        self.hits
            .sort_by(|a, b| a.hit_fraction().total_cmp(&b.hit_fraction()));
    }
}

impl<R: Clone, T: CollisionCollectorTraits> CollisionCollector<R, T> for AllHitCollisionCollector<R, T> {
    #[inline]
    fn add_hit(&mut self, result: &R) {
        self.hits.push(result.clone());
    }

    #[inline]
    fn early_out_fraction(&self) -> f32 {
        self.early_out_fraction
    }

    #[inline]
    fn set_early_out_fraction(&mut self, fraction: f32) {
        self.early_out_fraction = fraction;
    }

    fn reset(&mut self) {
        self.hits.clear();
        self.early_out_fraction = T::INITIAL_EARLY_OUT_FRACTION;
    }
}

/// Keeps only the nearest hit and lowers the early out fraction to it.
pub struct ClosestHitCollisionCollector<R, T> {
    pub hit: Option<R>,
    early_out_fraction: f32,
    _traits: PhantomData<T>,
}

impl<R, T: CollisionCollectorTraits> Default for ClosestHitCollisionCollector<R, T> {
    fn default() -> Self {
        Self {
            hit: None,
            early_out_fraction: T::INITIAL_EARLY_OUT_FRACTION,
            _traits: PhantomData,
        }
    }
}

impl<R, T: CollisionCollectorTraits> ClosestHitCollisionCollector<R, T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn had_hit(&self) -> bool {
        self.hit.is_some()
    }
}

impl<R: Clone + HitFraction, T: CollisionCollectorTraits> CollisionCollector<R, T>
    for ClosestHitCollisionCollector<R, T>
{
    fn add_hit(&mut self, result: &R) {
        let fraction = result.hit_fraction();
        if self.hit.is_none() || fraction < self.early_out_fraction {
            self.update_early_out_fraction(fraction);
            self.hit = Some(result.clone());
        }
    }

    #[inline]
    fn early_out_fraction(&self) -> f32 {
        self.early_out_fraction
    }

    #[inline]
    fn set_early_out_fraction(&mut self, fraction: f32) {
        self.early_out_fraction = fraction;
    }

    fn reset(&mut self) {
        self.hit = None;
        self.early_out_fraction = T::INITIAL_EARLY_OUT_FRACTION;
    }
}

/// Stops the query at the first hit.
pub struct AnyHitCollisionCollector<R, T> {
    pub hit: Option<R>,
    early_out_fraction: f32,
    _traits: PhantomData<T>,
}

impl<R, T: CollisionCollectorTraits> Default for AnyHitCollisionCollector<R, T> {
    fn default() -> Self {
        Self {
            hit: None,
            early_out_fraction: T::INITIAL_EARLY_OUT_FRACTION,
            _traits: PhantomData,
        }
    }
}

impl<R, T: CollisionCollectorTraits> AnyHitCollisionCollector<R, T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn had_hit(&self) -> bool {
        self.hit.is_some()
    }
}

impl<R: Clone, T: CollisionCollectorTraits> CollisionCollector<R, T> for AnyHitCollisionCollector<R, T> {
    fn add_hit(&mut self, result: &R) {
        self.hit = Some(result.clone());
        self.force_early_out();
    }

    #[inline]
    fn early_out_fraction(&self) -> f32 {
        self.early_out_fraction
    }

    #[inline]
    fn set_early_out_fraction(&mut self, fraction: f32) {
        self.early_out_fraction = fraction;
    }

    fn reset(&mut self) {
        self.hit = None;
        self.early_out_fraction = T::INITIAL_EARLY_OUT_FRACTION;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast_result(index: u32, fraction: f32) -> BroadPhaseCastResult {
        BroadPhaseCastResult {
            body_id: BodyID::new(index, 0),
            fraction,
        }
    }

    #[test]
    fn test_closest_hit_shrinks_early_out() {
        let mut collector = ClosestHitCollisionCollector::<BroadPhaseCastResult, CastRayTraits>::new();
        assert_eq!(collector.early_out_fraction(), 1.0 + f32::EPSILON);
        collector.add_hit(&cast_result(0, 0.8));
        collector.add_hit(&cast_result(1, 0.3));
        collector.add_hit(&cast_result(2, 0.5));
        assert_eq!(collector.hit.map(|hit| hit.body_id), Some(BodyID::new(1, 0)));
        assert_eq!(collector.early_out_fraction(), 0.3);
        assert!(!collector.should_early_out());
    }

    #[test]
    fn test_any_hit_forces_early_out() {
        let mut collector = AnyHitCollisionCollector::<BodyID, CollideShapeTraits>::new();
        assert!(!collector.should_early_out());
        collector.add_hit(&BodyID::new(4, 0));
        assert!(collector.should_early_out());
        assert!(collector.had_hit());

        collector.reset();
        assert!(!collector.should_early_out());
        assert!(!collector.had_hit());
    }

    #[test]
    fn test_all_hit_sort() {
        let mut collector = AllHitCollisionCollector::<BroadPhaseCastResult, CastShapeTraits>::new();
        collector.add_hit(&cast_result(0, 2.0));
        collector.add_hit(&cast_result(1, 0.5));
        collector.add_hit(&cast_result(2, 1.0));
        collector.sort();
        let order: Vec<u32> = collector.hits.iter().map(|hit| hit.body_id.index()).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_positive_early_out_fraction() {
        let mut collector = AllHitCollisionCollector::<BroadPhaseCastResult, CastShapeTraits>::new();
        collector.update_early_out_fraction(0.0);
        assert_eq!(collector.positive_early_out_fraction(), f32::MIN_POSITIVE);
    }
}
