// src/core/face/types.rs
use serde::{Deserialize, Serialize};

use crate::utils::error::{NodeError, Result};
use super::options::DetectOptions;

/// Length of every face descriptor produced by the recognition network.
pub const DESCRIPTOR_LEN: usize = 128;

/// Label reported when no enrolled identity is close enough.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// A 128-dimensional face embedding. Construction validates the length and
/// rejects non-finite components, so distances are always well defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(NodeError::InvalidDescriptor(format!(
                "expected {} elements, got {}",
                DESCRIPTOR_LEN,
                values.len()
            )));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(NodeError::InvalidDescriptor(format!(
                "element {} is not a finite number",
                index
            )));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = NodeError;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.0
    }
}

/// Named set of enrolled descriptors for one identity. This is also the
/// on-disk document format: `{"label": ..., "descriptors": [[...], ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDescriptorSet {
    pub label: String,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

impl LabeledDescriptorSet {
    pub fn new(label: impl Into<String>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            label: label.into(),
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn relabeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Seven-way expression probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub label: String,
    pub distance: u64,
}

impl FaceMatch {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// One detected face and whatever the requested pipeline stages produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecord {
    pub score: f32,
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender_probability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub face_match: Option<FaceMatch>,
}

impl FaceRecord {
    pub fn new(score: f32, bounding_box: BoundingBox) -> Self {
        Self {
            score,
            bounding_box,
            landmarks: None,
            expressions: None,
            age: None,
            gender: None,
            gender_probability: None,
            descriptor: None,
            face_match: None,
        }
    }

    /// Drops every field the caller did not ask for. A match never survives
    /// without its descriptor.
    pub fn retain_requested(&mut self, options: &DetectOptions) {
        let options = options.normalized();
        if !options.landmarks {
            self.landmarks = None;
        }
        if !options.expressions {
            self.expressions = None;
        }
        if !options.age_gender {
            self.age = None;
            self.gender = None;
            self.gender_probability = None;
        }
        if !options.descriptors {
            self.descriptor = None;
        }
        if self.descriptor.is_none() {
            self.face_match = None;
        }
    }
}
