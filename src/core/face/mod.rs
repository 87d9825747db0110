// src/core/face/mod.rs
pub mod matcher;
pub mod options;
pub mod types;

pub use matcher::{best_match, nearest_distance, Metric};
pub use options::{
    DetectOptions, DetectOverrides, DetectionPlan, DetectorKind, FaceMode, ModelOptions,
    ModelOverrides, PipelineStage,
};
pub use types::{
    BoundingBox, Descriptor, Expressions, FaceMatch, FaceRecord, Gender, LabeledDescriptorSet,
    Point, DESCRIPTOR_LEN, UNKNOWN_LABEL,
};
