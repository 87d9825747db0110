// src/worker/pipeline.rs
use std::path::PathBuf;
use std::time::Instant;

use tracing::debug;

use crate::core::engine::{DetectionEngine, PassthroughRenderer, Renderer, ReplayEngine};
use crate::core::face::best_match;
use crate::utils::error::{NodeError, Result};
use super::protocol::{InferenceRequest, InferenceResponse};

/// Detection, matching and rendering for one request. Runs inside a worker.
pub struct InferencePipeline {
    engine: Box<dyn DetectionEngine>,
    renderer: Box<dyn Renderer>,
}

impl InferencePipeline {
    pub fn new(engine: Box<dyn DetectionEngine>, renderer: Box<dyn Renderer>) -> Self {
        Self { engine, renderer }
    }

    pub fn replay(fixtures_dir: Option<PathBuf>) -> Self {
        let engine = match fixtures_dir {
            Some(dir) => ReplayEngine::with_fixtures_dir(dir),
            None => ReplayEngine::new(),
        };
        Self::new(Box::new(engine), Box::new(PassthroughRenderer))
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub async fn warm_up(&mut self) -> Result<()> {
        self.engine.warm_up().await
    }

    pub async fn run(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let started = Instant::now();
        let options = request.detect_options.normalized();
        let plan = options.plan(request.face_mode)?;

        if let Some(stage) = plan.stages.iter().find(|stage| !self.engine.supports(**stage)) {
            return Err(NodeError::UnsupportedOptionCombination(format!(
                "{} engine cannot run {:?}",
                self.engine.name(),
                stage
            )));
        }

        let mut faces = self
            .engine
            .detect(&request.image, &request.model_options, &plan)
            .await?;
        debug!("{} detected {} face(s)", self.engine.name(), faces.len());

        for face in &mut faces {
            face.retain_requested(&options);
            face.face_match = face.descriptor.as_ref().and_then(|descriptor| {
                best_match(
                    request.metric,
                    &request.comparison_sets,
                    descriptor,
                    request.match_threshold,
                )
            });
        }

        let annotated_image = self.renderer.annotate(&request.image, &faces, &options)?;

        Ok(InferenceResponse {
            faces,
            annotated_image,
            inference_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::MockDetectionEngine;
    use crate::core::face::{
        BoundingBox, Descriptor, DetectOptions, FaceMode, FaceRecord, LabeledDescriptorSet,
        Metric, ModelOptions, PipelineStage, DESCRIPTOR_LEN, UNKNOWN_LABEL,
    };

    fn descriptor(value: f32) -> Descriptor {
        Descriptor::new(vec![value; DESCRIPTOR_LEN]).unwrap()
    }

    fn detected_face(value: f32) -> FaceRecord {
        let mut face = FaceRecord::new(0.9, BoundingBox { x: 1.0, y: 2.0, width: 3.0, height: 4.0 });
        face.descriptor = Some(descriptor(value));
        face.age = Some(31.0);
        face
    }

    fn request(detect_options: DetectOptions, sets: Vec<LabeledDescriptorSet>) -> InferenceRequest {
        InferenceRequest {
            image: b"jpeg".to_vec(),
            model_options: ModelOptions::default(),
            detect_options,
            face_mode: FaceMode::Multiple,
            comparison_sets: sets,
            metric: Metric::Euclidean,
            match_threshold: 1.0,
        }
    }

    fn pipeline_with(engine: MockDetectionEngine) -> InferencePipeline {
        InferencePipeline::new(Box::new(engine), Box::new(PassthroughRenderer))
    }

    #[tokio::test]
    async fn test_matches_faces_with_descriptors() {
        let mut engine = MockDetectionEngine::new();
        engine.expect_name().return_const("mock");
        engine.expect_supports().return_const(true);
        engine
            .expect_detect()
            .times(1)
            .returning(|_, _, plan| {
                assert!(plan.includes(PipelineStage::Descriptor));
                assert!(plan.includes(PipelineStage::Landmarks));
                Ok(vec![detected_face(0.25), detected_face(0.9)])
            });

        let sets = vec![LabeledDescriptorSet::new("alice", vec![descriptor(0.25)])];
        let response = pipeline_with(engine)
            .run(&request(DetectOptions::descriptors_only(), sets))
            .await
            .unwrap();

        assert_eq!(response.annotated_image, b"jpeg".to_vec());
        let first = response.faces[0].face_match.as_ref().unwrap();
        assert_eq!((first.label.as_str(), first.distance), ("alice", 0));
        assert_eq!(response.faces[1].face_match.as_ref().unwrap().label, UNKNOWN_LABEL);
        assert!(response.faces[0].age.is_none());
    }

    #[tokio::test]
    async fn test_no_match_without_comparison_sets_or_descriptors() {
        let mut engine = MockDetectionEngine::new();
        engine.expect_name().return_const("mock");
        engine.expect_supports().return_const(true);
        engine.expect_detect().returning(|_, _, _| Ok(vec![detected_face(0.5)]));
        let pipeline = pipeline_with(engine);

        let response = pipeline.run(&request(DetectOptions::all(), vec![])).await.unwrap();
        assert!(response.faces[0].face_match.is_none());
        assert!(response.faces[0].descriptor.is_some());

        let sets = vec![LabeledDescriptorSet::new("alice", vec![descriptor(0.5)])];
        let options = DetectOptions { age_gender: true, ..Default::default() };
        let response = pipeline.run(&request(options, sets)).await.unwrap();
        assert!(response.faces[0].descriptor.is_none());
        assert!(response.faces[0].face_match.is_none());
        assert_eq!(response.faces[0].age, Some(31.0));
    }

    #[tokio::test]
    async fn test_zero_detections_is_success() {
        let mut engine = MockDetectionEngine::new();
        engine.expect_name().return_const("mock");
        engine.expect_supports().return_const(true);
        engine.expect_detect().returning(|_, _, _| Ok(vec![]));

        let response = pipeline_with(engine)
            .run(&request(DetectOptions::all(), vec![]))
            .await
            .unwrap();
        assert!(response.faces.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_stage_is_rejected_before_detection() {
        let mut engine = MockDetectionEngine::new();
        engine.expect_name().return_const("mock");
        engine
            .expect_supports()
            .returning(|stage| stage != PipelineStage::Expressions);
        engine.expect_detect().never();

        let options = DetectOptions { expressions: true, ..Default::default() };
        let err = pipeline_with(engine)
            .run(&request(options, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedOptionCombination(_)));
    }

    #[tokio::test]
    async fn test_engine_errors_propagate() {
        let mut engine = MockDetectionEngine::new();
        engine.expect_name().return_const("mock");
        engine.expect_supports().return_const(true);
        engine
            .expect_detect()
            .returning(|_, _, _| Err(NodeError::Engine("corrupt jpeg".into())));

        let err = pipeline_with(engine)
            .run(&request(DetectOptions::all(), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Engine(m) if m == "corrupt jpeg"));
    }
}
