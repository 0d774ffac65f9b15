use async_trait::async_trait;
use fish_explain::artifact::{ArtifactStore, FsArtifactStore};
use fish_explain::classifier::{Classifier, ClassifierError, LayerGradients, ModelMetadata};
use fish_explain::config::{ArtifactConfig, ChannelOrder, ExplainConfig};
use fish_explain::{ExplainMode, ExplainRequest, Explanation, Pipeline, PipelineError};
use image::{ImageBuffer, Rgb};
use ndarray::{Array3, Array4};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

const KNOWN_LAYER: &str = "conv2d_2";

/// Deterministic stand-in for a trained network: probabilities and layer
/// gradients are pure functions of the input tensor.
struct StubClassifier {
    metadata: ModelMetadata,
}

impl StubClassifier {
    fn new() -> Self {
        Self {
            metadata: ModelMetadata {
                class_labels: vec![
                    "Bulath_hapaya".to_string(),
                    "Depulliya".to_string(),
                    "Thal_kossa".to_string(),
                ],
                input_width: 32,
                input_height: 32,
                channel_order: ChannelOrder::Nchw,
            },
        }
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|v| v / sum).collect()
}

impl Classifier for StubClassifier {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let mean = input.sum() / input.len() as f32;
        Ok(softmax(&[mean * 2.0, 0.25, 1.0 - mean]))
    }

    fn gradient_of_class_at_layer(
        &self,
        input: &Array4<f32>,
        class_index: usize,
        layer: &str,
    ) -> Result<LayerGradients, ClassifierError> {
        if layer != KNOWN_LAYER {
            return Err(ClassifierError::LayerNotFound(layer.to_string()));
        }

        let mean = input.sum() / input.len() as f32;
        let activations = Array3::from_shape_fn((7, 7, 8), |(y, x, c)| {
            ((y * 13 + x * 7 + c * 3) % 11) as f32 * 0.2
        });
        let gradients = Array3::from_shape_fn((7, 7, 8), |(y, x, c)| {
            mean * (((y + x + c) % 3) as f32 - 0.5) * (class_index as f32 + 1.0)
        });

        Ok(LayerGradients {
            activations,
            gradients,
        })
    }
}

fn temp_artifact_dir() -> PathBuf {
    std::env::temp_dir().join(format!("fish_explain_e2e_{}", uuid::Uuid::new_v4()))
}

fn build_pipeline(dir: &PathBuf) -> Pipeline<StubClassifier, FsArtifactStore> {
    let store = FsArtifactStore::new(&ArtifactConfig {
        artifact_dir: dir.clone(),
        confirm_retries: 5,
        confirm_initial_delay_ms: 5,
    })
    .unwrap();

    Pipeline::new(
        Arc::new(StubClassifier::new()),
        Arc::new(store),
        ExplainConfig {
            target_layer: KNOWN_LAYER.to_string(),
            blend_ratio: 0.4,
            contour_threshold: 0.5,
            min_region_area: 16,
        },
    )
}

fn png_bytes(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, color);
    let mut image_data: Vec<u8> = Vec::new();
    let mut cursor = Cursor::new(&mut image_data);
    img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
    image_data
}

fn stored_file_count(dir: &PathBuf) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn probabilities_sum_to_one() {
    let classifier = StubClassifier::new();
    let input = Array4::from_elem((1, 3, 32, 32), 0.37);

    let probabilities = classifier.predict(&input).unwrap();

    let sum: f32 = probabilities.iter().sum();
    assert!((sum - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn quick_mode_stores_one_confirmed_heatmap() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);

    let outcome = pipeline
        .classify_and_explain(
            &png_bytes(64, 48, Rgb([180, 90, 20])),
            &ExplainRequest::default(),
        )
        .await
        .unwrap();

    assert!(!outcome.prediction.class_label.is_empty());
    assert!((0.0..=1.0).contains(&outcome.prediction.confidence));
    let Explanation::Quick { heatmap } = outcome.explanation else {
        panic!("expected a single heatmap");
    };
    assert!(dir.join(heatmap.as_str()).exists());
    assert_eq!(stored_file_count(&dir), 1);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn explore_mode_stores_four_distinct_confirmed_artifacts() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);
    let request = ExplainRequest {
        mode: ExplainMode::Explore,
        ..Default::default()
    };

    let outcome = pipeline
        .classify_and_explain(&png_bytes(64, 64, Rgb([180, 90, 20])), &request)
        .await
        .unwrap();

    let Explanation::Explore(composite) = outcome.explanation else {
        panic!("expected a composite explanation");
    };
    let refs = [
        composite.original.clone(),
        composite.heatmap.clone(),
        composite.outline.clone(),
        composite.combined.clone(),
    ];
    for (i, a) in refs.iter().enumerate() {
        for b in refs.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
    let store = FsArtifactStore::new(&ArtifactConfig {
        artifact_dir: dir.clone(),
        confirm_retries: 5,
        confirm_initial_delay_ms: 5,
    })
    .unwrap();
    for reference in &refs {
        assert!(store.exists(reference).await.unwrap());
    }
    assert_eq!(stored_file_count(&dir), 4);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn identical_requests_produce_byte_identical_heatmaps() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);
    let bytes = png_bytes(64, 64, Rgb([200, 120, 40]));

    let first = pipeline
        .classify_and_explain(&bytes, &ExplainRequest::default())
        .await
        .unwrap();
    let second = pipeline
        .classify_and_explain(&bytes, &ExplainRequest::default())
        .await
        .unwrap();

    assert_eq!(first.prediction, second.prediction);
    let (Explanation::Quick { heatmap: a }, Explanation::Quick { heatmap: b }) =
        (first.explanation, second.explanation)
    else {
        panic!("expected single heatmaps");
    };
    assert_ne!(a, b);
    assert_eq!(
        std::fs::read(dir.join(a.as_str())).unwrap(),
        std::fs::read(dir.join(b.as_str())).unwrap()
    );

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn unknown_layer_makes_zero_store_writes() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);
    let request = ExplainRequest {
        mode: ExplainMode::Explore,
        target_layer: Some("no_such_layer".to_string()),
        ..Default::default()
    };

    let result = pipeline
        .classify_and_explain(&png_bytes(64, 64, Rgb([180, 90, 20])), &request)
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Classifier(ClassifierError::LayerNotFound(_)))
    ));
    assert_eq!(stored_file_count(&dir), 0);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn all_black_input_still_explains_without_error() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);
    let request = ExplainRequest {
        mode: ExplainMode::Explore,
        ..Default::default()
    };

    let outcome = pipeline
        .classify_and_explain(&png_bytes(224, 224, Rgb([0, 0, 0])), &request)
        .await
        .unwrap();

    let Explanation::Explore(composite) = outcome.explanation else {
        panic!("expected a composite explanation");
    };
    // No discriminative region: combined and outline collapse to the
    // original image.
    assert_eq!(
        std::fs::read(dir.join(composite.combined.as_str())).unwrap(),
        std::fs::read(dir.join(composite.original.as_str())).unwrap()
    );
    assert_eq!(
        std::fs::read(dir.join(composite.outline.as_str())).unwrap(),
        std::fs::read(dir.join(composite.original.as_str())).unwrap()
    );

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn undecodable_bytes_fail_before_any_write() {
    let dir = temp_artifact_dir();
    let pipeline = build_pipeline(&dir);

    let result = pipeline
        .classify_and_explain(&[0xde, 0xad, 0xbe, 0xef], &ExplainRequest::default())
        .await;

    assert!(matches!(result, Err(PipelineError::Preprocess(_))));
    assert_eq!(stored_file_count(&dir), 0);

    std::fs::remove_dir_all(dir).ok();
}
