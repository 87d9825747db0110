// src/storage/mod.rs
pub mod descriptors;

pub use descriptors::{validate_node_id, DescriptorStore};
