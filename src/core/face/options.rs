// src/core/face/options.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{NodeError, Result};

/// Which face detector the engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DetectorKind {
    #[default]
    Ssd,
    Tiny,
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssd" => Ok(DetectorKind::Ssd),
            "tiny" | "yolo" => Ok(DetectorKind::Tiny),
            other => Err(format!("unknown detector model '{}'", other)),
        }
    }
}

impl TryFrom<String> for DetectorKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DetectorKind> for String {
    fn from(kind: DetectorKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Ssd => write!(f, "ssd"),
            DetectorKind::Tiny => write!(f, "tiny"),
        }
    }
}

/// Detector selection plus its numeric tuning. `min_confidence` and
/// `max_results` apply to SSD, `score_threshold` and `input_size` to Tiny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelOptions {
    pub model: DetectorKind,
    #[serde(alias = "min_confidence")]
    pub min_confidence: f64,
    #[serde(alias = "score_threshold")]
    pub score_threshold: f64,
    #[serde(alias = "input_size")]
    pub input_size: u32,
    #[serde(alias = "max_results")]
    pub max_results: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model: DetectorKind::Ssd,
            min_confidence: 0.6,
            score_threshold: 0.5,
            input_size: 416,
            max_results: 100,
        }
    }
}

impl ModelOptions {
    /// Confidence floor for the selected detector.
    pub fn confidence_floor(&self) -> f64 {
        match self.model {
            DetectorKind::Ssd => self.min_confidence,
            DetectorKind::Tiny => self.score_threshold,
        }
    }

    pub fn merged(&self, overrides: &ModelOverrides) -> Self {
        Self {
            model: overrides.model.unwrap_or(self.model),
            min_confidence: overrides.min_confidence.unwrap_or(self.min_confidence),
            score_threshold: overrides.score_threshold.unwrap_or(self.score_threshold),
            input_size: overrides.input_size.unwrap_or(self.input_size),
            max_results: overrides.max_results.unwrap_or(self.max_results),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("minConfidence", self.min_confidence),
            ("scoreThreshold", self.score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(NodeError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.input_size == 0 || self.max_results == 0 {
            return Err(NodeError::Config(
                "inputSize and maxResults must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOverrides {
    pub model: Option<DetectorKind>,
    pub min_confidence: Option<f64>,
    pub score_threshold: Option<f64>,
    pub input_size: Option<u32>,
    pub max_results: Option<usize>,
}

/// Which optional stages run after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectOptions {
    pub landmarks: bool,
    pub expressions: bool,
    #[serde(alias = "age_gender")]
    pub age_gender: bool,
    pub descriptors: bool,
}

impl DetectOptions {
    pub fn all() -> Self {
        Self {
            landmarks: true,
            expressions: true,
            age_gender: true,
            descriptors: true,
        }
    }

    pub fn descriptors_only() -> Self {
        Self {
            descriptors: true,
            ..Self::default()
        }
    }

    /// Descriptor extraction needs aligned landmarks.
    pub fn normalized(&self) -> Self {
        Self {
            landmarks: self.landmarks || self.descriptors,
            ..*self
        }
    }

    pub fn merged(&self, overrides: &DetectOverrides) -> Self {
        Self {
            landmarks: overrides.landmarks.unwrap_or(self.landmarks),
            expressions: overrides.expressions.unwrap_or(self.expressions),
            age_gender: overrides.age_gender.unwrap_or(self.age_gender),
            descriptors: overrides.descriptors.unwrap_or(self.descriptors),
        }
    }

    fn mask(&self) -> u8 {
        (self.landmarks as u8)
            | (self.expressions as u8) << 1
            | (self.age_gender as u8) << 2
            | (self.descriptors as u8) << 3
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectOverrides {
    pub landmarks: Option<bool>,
    pub expressions: Option<bool>,
    #[serde(alias = "age_gender")]
    pub age_gender: Option<bool>,
    pub descriptors: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceMode {
    #[default]
    Multiple,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Detection,
    Landmarks,
    Expressions,
    AgeGender,
    Descriptor,
}

/// Ordered stages the engine runs for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionPlan {
    pub mode: FaceMode,
    pub stages: &'static [PipelineStage],
}

impl DetectionPlan {
    pub fn includes(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }
}

use PipelineStage::{AgeGender, Descriptor, Detection, Expressions, Landmarks};

const L: u8 = 1;
const E: u8 = 1 << 1;
const A: u8 = 1 << 2;
const D: u8 = 1 << 3;

/// Every capability set reachable after normalization, keyed by flag mask.
const PLANS: [(u8, &[PipelineStage]); 12] = [
    (0, &[Detection]),
    (L, &[Detection, Landmarks]),
    (E, &[Detection, Expressions]),
    (A, &[Detection, AgeGender]),
    (E | A, &[Detection, Expressions, AgeGender]),
    (L | E, &[Detection, Landmarks, Expressions]),
    (L | A, &[Detection, Landmarks, AgeGender]),
    (L | E | A, &[Detection, Landmarks, Expressions, AgeGender]),
    (L | D, &[Detection, Landmarks, Descriptor]),
    (L | E | D, &[Detection, Landmarks, Expressions, Descriptor]),
    (L | A | D, &[Detection, Landmarks, AgeGender, Descriptor]),
    (L | E | A | D, &[Detection, Landmarks, Expressions, AgeGender, Descriptor]),
];

impl DetectOptions {
    pub fn plan(&self, mode: FaceMode) -> Result<DetectionPlan> {
        let mask = self.normalized().mask();
        PLANS
            .iter()
            .find(|(key, _)| *key == mask)
            .map(|(_, stages)| DetectionPlan { mode, stages })
            .ok_or_else(|| {
                NodeError::UnsupportedOptionCombination(format!("{:?}", self))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_from_mask(mask: u8) -> DetectOptions {
        DetectOptions {
            landmarks: mask & L != 0,
            expressions: mask & E != 0,
            age_gender: mask & A != 0,
            descriptors: mask & D != 0,
        }
    }

    #[test]
    fn test_every_flag_combination_resolves() {
        for mask in 0..16u8 {
            let options = options_from_mask(mask);
            let plan = options.plan(FaceMode::Multiple).unwrap();
            assert_eq!(plan.stages[0], Detection);
            assert_eq!(plan.includes(Landmarks), options.landmarks || options.descriptors);
            assert_eq!(plan.includes(Expressions), options.expressions);
            assert_eq!(plan.includes(AgeGender), options.age_gender);
            assert_eq!(plan.includes(Descriptor), options.descriptors);
        }
    }

    #[test]
    fn test_descriptors_imply_landmarks() {
        let plan = DetectOptions::descriptors_only().plan(FaceMode::Single).unwrap();
        assert_eq!(plan.stages, &[Detection, Landmarks, Descriptor]);
        assert_eq!(plan.mode, FaceMode::Single);
    }

    #[test]
    fn test_model_overrides_merge_field_by_field() {
        let defaults = ModelOptions::default();
        let merged = defaults.merged(&ModelOverrides {
            model: Some(DetectorKind::Tiny),
            input_size: Some(320),
            ..Default::default()
        });

        assert_eq!(merged.model, DetectorKind::Tiny);
        assert_eq!(merged.input_size, 320);
        assert_eq!(merged.min_confidence, defaults.min_confidence);
        assert_eq!(merged.max_results, defaults.max_results);
        assert_eq!(merged.confidence_floor(), defaults.score_threshold);
    }

    #[test]
    fn test_detect_overrides_merge_field_by_field() {
        let merged = DetectOptions::all().merged(&DetectOverrides {
            expressions: Some(false),
            ..Default::default()
        });
        assert!(merged.landmarks && merged.age_gender && merged.descriptors);
        assert!(!merged.expressions);
    }

    #[test]
    fn test_detector_names_are_case_insensitive() {
        let options: ModelOptions =
            serde_json::from_str(r#"{"model":"SSD","minConfidence":0.8}"#).unwrap();
        assert_eq!(options.model, DetectorKind::Ssd);
        assert_eq!(options.min_confidence, 0.8);
        assert_eq!(options.max_results, 100);

        assert!(serde_json::from_str::<ModelOptions>(r#"{"model":"mtcnn"}"#).is_err());
    }

    #[test]
    fn test_detect_options_accept_snake_case_age_gender() {
        let options: DetectOptions = serde_json::from_str(r#"{"age_gender":true}"#).unwrap();
        assert!(options.age_gender);
        assert!(!options.landmarks);
    }

    #[test]
    fn test_model_validation() {
        assert!(ModelOptions::default().validate().is_ok());
        let invalid = ModelOptions {
            min_confidence: 1.5,
            ..Default::default()
        };
        assert!(matches!(invalid.validate(), Err(NodeError::Config(_))));
    }
}
