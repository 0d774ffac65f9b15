use crate::{
    classifier::{Classifier, ClassifierError, LayerGradients, ModelMetadata},
    config::ModelConfig,
};
use ndarray::{Array, Array3, Array4, ArrayD, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const INPUT_IMAGE: &str = "image";
const INPUT_CLASS: &str = "class_index";
const OUTPUT_PROBABILITIES: &str = "probabilities";

fn activations_output(layer: &str) -> String {
    format!("{layer}/activations")
}

fn gradients_output(layer: &str) -> String {
    format!("{layer}/gradients")
}

/// Numerically stable softmax.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|v| v / sum).collect()
}

/// Reorders a batch-1 NCHW layer tensor to H x W x C.
fn to_hwc(tensor: ArrayD<f32>, layer: &str) -> Result<Array3<f32>, ClassifierError> {
    let tensor = tensor.into_dimensionality::<Ix4>().map_err(|_| {
        ClassifierError::Inference(format!("layer `{layer}` output is not a 4-d tensor"))
    })?;
    if tensor.shape()[0] != 1 {
        return Err(ClassifierError::Inference(format!(
            "layer `{layer}` output has batch size {}, expected 1",
            tensor.shape()[0]
        )));
    }

    let chw = tensor.index_axis_move(Axis(0), 0);
    Ok(chw.permuted_axes([1, 2, 0]).as_standard_layout().to_owned())
}

/// ONNX Runtime implementation of the classifier seam.
///
/// Expects an explain-enabled export: inputs `image` and `class_index`,
/// outputs `probabilities` plus `{layer}/activations` and
/// `{layer}/gradients` (batch-1 NCHW) for every instrumented layer. The
/// gradient of the selected class score is part of the exported graph, so
/// extraction is deterministic for a fixed model and input.
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    metadata: ModelMetadata,
    apply_softmax: bool,
}

impl OrtClassifier {
    pub fn new(
        model_config: &ModelConfig,
        class_labels: Vec<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            metadata: ModelMetadata {
                class_labels,
                input_width: model_config.input_width,
                input_height: model_config.input_height,
                channel_order: model_config.channel_order,
            },
            apply_softmax: model_config.apply_softmax,
        })
    }

    fn validate_input(&self, input: &Array4<f32>) -> Result<(), ClassifierError> {
        let expected = self.metadata.expected_input_shape();
        if input.shape() != expected.as_slice() {
            return Err(ClassifierError::BadInput {
                expected,
                got: input.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn session(&self) -> &Arc<Mutex<Session>> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        tracing::debug!("Handling request with session {}", index);
        &self.sessions[index]
    }

    fn extract(value: &ort::value::Value, name: &str) -> Result<ArrayD<f32>, ClassifierError> {
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {e}")))?;

        let ix = shape.to_ixdyn();
        ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| ClassifierError::Inference(format!("invalid tensor shape: {e}")))
    }
}

impl Classifier for OrtClassifier {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        self.validate_input(input)?;

        let mut session = self
            .session()
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {e}")))?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let image_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {e}")))?;
        // The explain-enabled graph always takes a class selector; it only
        // influences the gradient outputs, which predict ignores.
        let class_selector = Array::from_elem(1, 0i64);
        let class_ref = TensorRef::from_array_view(class_selector.view())
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![INPUT_IMAGE => image_ref, INPUT_CLASS => class_ref])
            .map_err(|e| ClassifierError::Inference(format!("inference failed: {e}")))?;

        let raw = Self::extract(&outputs[OUTPUT_PROBABILITIES], OUTPUT_PROBABILITIES)?;
        let scores: Vec<f32> = raw.iter().copied().collect();

        if scores.len() != self.metadata.class_labels.len() {
            return Err(ClassifierError::Inference(format!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.metadata.class_labels.len()
            )));
        }

        if self.apply_softmax {
            Ok(softmax(&scores))
        } else {
            Ok(scores)
        }
    }

    fn gradient_of_class_at_layer(
        &self,
        input: &Array4<f32>,
        class_index: usize,
        layer: &str,
    ) -> Result<LayerGradients, ClassifierError> {
        self.validate_input(input)?;

        if class_index >= self.metadata.class_labels.len() {
            return Err(ClassifierError::Inference(format!(
                "class index {} out of range for {} classes",
                class_index,
                self.metadata.class_labels.len()
            )));
        }

        let acts_name = activations_output(layer);
        let grads_name = gradients_output(layer);

        let mut session = self
            .session()
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {e}")))?;

        let known = |name: &str| session.outputs.iter().any(|o| o.name == name);
        if !known(&acts_name) || !known(&grads_name) {
            return Err(ClassifierError::LayerNotFound(layer.to_string()));
        }

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let image_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {e}")))?;
        let class_selector = Array::from_elem(1, class_index as i64);
        let class_ref = TensorRef::from_array_view(class_selector.view())
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![INPUT_IMAGE => image_ref, INPUT_CLASS => class_ref])
            .map_err(|e| ClassifierError::Inference(format!("inference failed: {e}")))?;

        let activations = to_hwc(Self::extract(&outputs[acts_name.as_str()], &acts_name)?, layer)?;
        let gradients = to_hwc(Self::extract(&outputs[grads_name.as_str()], &grads_name)?, layer)?;

        if activations.shape() != gradients.shape() {
            return Err(ClassifierError::Inference(format!(
                "layer `{layer}` activation shape {:?} does not match gradient shape {:?}",
                activations.shape(),
                gradients.shape()
            )));
        }

        Ok(LayerGradients {
            activations,
            gradients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 4.0]);

        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let a = softmax(&[1.0, 2.0, 3.0]);
        let b = softmax(&[101.0, 102.0, 103.0]);

        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn to_hwc_reorders_channel_first_tensors() {
        let tensor = ArrayD::from_shape_fn(vec![1, 2, 3, 4], |ix| {
            (ix[1] * 100 + ix[2] * 10 + ix[3]) as f32
        });

        let hwc = to_hwc(tensor, "conv2d_2").unwrap();

        assert_eq!(hwc.dim(), (3, 4, 2));
        assert_eq!(hwc[[1, 2, 0]], 12.0);
        assert_eq!(hwc[[1, 2, 1]], 112.0);
    }

    #[test]
    fn to_hwc_rejects_batched_outputs() {
        let tensor = ArrayD::zeros(vec![2, 3, 4, 4]);

        assert!(matches!(
            to_hwc(tensor, "conv2d_2"),
            Err(ClassifierError::Inference(_))
        ));
    }
}
