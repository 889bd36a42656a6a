pub mod linked_list;
pub mod ppm;
pub mod types;
pub mod utils;
