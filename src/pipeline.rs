use crate::{
    artifact::{ArtifactError, ArtifactRef, ArtifactStore},
    classifier::{Classifier, ClassifierError},
    compose::{self, CompositeOutput},
    config::ExplainConfig,
    contour,
    gradcam::{self, GradCamError},
    heatmap,
    preprocess::{self, PreprocessError},
};
use std::sync::Arc;
use thiserror::Error;

/// The error of whichever stage failed, preserved as-is.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("unknown target class `{0}`")]
    UnknownClass(String),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    GradCam(#[from] GradCamError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Output depth selector: a single blended heatmap, or the full composite
/// with outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplainMode {
    #[default]
    Quick,
    Explore,
}

/// Explicit explanation target for counterfactual requests; defaults to
/// the argmax class.
#[derive(Debug, Clone)]
pub enum TargetClass {
    Index(usize),
    Label(String),
}

#[derive(Debug, Clone, Default)]
pub struct ExplainRequest {
    pub mode: ExplainMode,
    pub target_layer: Option<String>,
    pub target_class: Option<TargetClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub class_label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Explanation {
    Quick { heatmap: ArtifactRef },
    Explore(CompositeOutput),
}

#[derive(Debug, Clone)]
pub struct ExplainOutcome {
    pub prediction: Prediction,
    pub explanation: Explanation,
}

fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
}

/// Drives the whole explanation chain: decode, classify, extract the
/// activation map, render, and store. One parameterized path serves both
/// modes.
pub struct Pipeline<C: Classifier, S: ArtifactStore> {
    classifier: Arc<C>,
    store: Arc<S>,
    explain: ExplainConfig,
}

impl<C: Classifier, S: ArtifactStore> Pipeline<C, S> {
    pub fn new(classifier: Arc<C>, store: Arc<S>, explain: ExplainConfig) -> Self {
        Self {
            classifier,
            store,
            explain,
        }
    }

    pub async fn classify_and_explain(
        &self,
        image_bytes: &[u8],
        request: &ExplainRequest,
    ) -> Result<ExplainOutcome, PipelineError> {
        let meta = self.classifier.metadata();
        let decoded = preprocess::decode_and_normalize(
            image_bytes,
            meta.input_width,
            meta.input_height,
            meta.channel_order,
        )?;

        let probabilities = self.classifier.predict(&decoded.tensor)?;
        if probabilities.len() != meta.class_labels.len() {
            return Err(ClassifierError::Inference(format!(
                "model produced {} scores for {} labels",
                probabilities.len(),
                meta.class_labels.len()
            ))
            .into());
        }

        let (class_index, confidence) = match &request.target_class {
            None => argmax(&probabilities).ok_or_else(|| {
                PipelineError::from(ClassifierError::Inference(
                    "model produced no scores".to_string(),
                ))
            })?,
            Some(TargetClass::Index(index)) => {
                if *index >= probabilities.len() {
                    return Err(PipelineError::UnknownClass(index.to_string()));
                }
                (*index, probabilities[*index])
            }
            Some(TargetClass::Label(label)) => {
                let index = meta
                    .class_labels
                    .iter()
                    .position(|l| l == label)
                    .ok_or_else(|| PipelineError::UnknownClass(label.clone()))?;
                (index, probabilities[index])
            }
        };

        let prediction = Prediction {
            class_index,
            class_label: meta.class_labels[class_index].clone(),
            confidence,
        };
        tracing::info!(
            label = %prediction.class_label,
            confidence = prediction.confidence,
            "classified image"
        );

        let layer = request
            .target_layer
            .as_deref()
            .unwrap_or(&self.explain.target_layer);
        let layer_gradients =
            self.classifier
                .gradient_of_class_at_layer(&decoded.tensor, class_index, layer)?;

        let map = gradcam::compute(&layer_gradients)?;
        if map.is_zero() {
            tracing::debug!("activation map is all-zero, no discriminative region found");
        }

        let (width, height) = decoded.original.dimensions();

        let explanation = match request.mode {
            ExplainMode::Quick => {
                let blended = heatmap::render(
                    &map,
                    (width, height),
                    Some(&decoded.original),
                    self.explain.blend_ratio,
                );
                let reference =
                    compose::store_image(self.store.as_ref(), &blended, "heatmap").await?;
                Explanation::Quick { heatmap: reference }
            }
            ExplainMode::Explore => {
                let resized = heatmap::resize_bilinear(map.values(), width, height);
                let colored = heatmap::colorize(&resized);
                let blended = if map.is_zero() {
                    decoded.original.clone()
                } else {
                    heatmap::blend(&decoded.original, &colored, self.explain.blend_ratio)
                };
                let contours = contour::extract(
                    &resized,
                    self.explain.contour_threshold,
                    self.explain.min_region_area,
                );
                tracing::debug!("extracted {} salient region(s)", contours.len());

                let composite = compose::assemble(
                    self.store.as_ref(),
                    &decoded.original,
                    &colored,
                    &blended,
                    &contours,
                )
                .await?;
                Explanation::Explore(composite)
            }
        };

        Ok(ExplainOutcome {
            prediction,
            explanation,
        })
    }
}
