pub mod allocator;
pub mod bbox;
pub mod dataset;
pub mod operation;
pub mod policy;
pub mod transform;
pub mod utils;
pub mod writer;
