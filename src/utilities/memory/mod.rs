mod fixed_size_free_list;
pub use self::fixed_size_free_list::*;
