//! Broad-phase collision detection built on double-buffered quad-trees, together with the expanding
//! polytope hull used for penetration depth queries.

pub mod physics;
pub mod utilities;

#[cfg(test)]
pub(crate) mod testing;
