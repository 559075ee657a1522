mod atomic_float;
pub use self::atomic_float::*;

mod binary_heap;
pub use self::binary_heap::*;

mod bounding_box;
pub use self::bounding_box::*;

mod bounding_box4;
pub use self::bounding_box4::*;

mod bounding_sphere;
pub use self::bounding_sphere::*;

mod containment_type;
pub use self::containment_type::*;

pub mod memory;
