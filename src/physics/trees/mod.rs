mod body_tracker;
pub use self::body_tracker::*;

mod node;
pub use self::node::*;

mod node_id;
pub use self::node_id::*;

mod quad_tree;
pub use self::quad_tree::*;

mod quad_tree_add;
mod quad_tree_build;
mod quad_tree_pairs;
mod quad_tree_ray_cast;
mod quad_tree_remove;
mod quad_tree_volume_query;

mod quad_tree_walk;
pub use self::quad_tree_walk::*;
