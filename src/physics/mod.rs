mod body;
pub use self::body::*;

mod body_description;
pub use self::body_description::*;

mod body_id;
pub use self::body_id::*;

mod body_manager;
pub use self::body_manager::*;

mod broad_phase_allocation_sizes;
pub use self::broad_phase_allocation_sizes::*;

pub mod collision_detection;
pub mod trees;
