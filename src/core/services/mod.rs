// src/core/services/mod.rs
pub mod enrollment;
pub mod registry;

pub use enrollment::{EnrollOutcome, EnrollmentService};
pub use registry::NodeRegistry;
