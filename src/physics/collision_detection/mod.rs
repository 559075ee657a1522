mod broad_phase;
pub use self::broad_phase::*;

mod broad_phase_quad_tree;
pub use self::broad_phase_quad_tree::*;

mod collectors;
pub use self::collectors::*;

mod convex_support;
pub use self::convex_support::*;

mod epa_convex_hull_builder;
pub use self::epa_convex_hull_builder::*;

mod epa_penetration_depth;
pub use self::epa_penetration_depth::*;

mod layers;
pub use self::layers::*;

mod query_shapes;
pub use self::query_shapes::*;
