use crate::classifier::LayerGradients;
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Guards the normalization against division by zero on all-zero maps.
const NORMALIZATION_EPSILON: f32 = 1e-10;

#[derive(Error, Debug)]
pub enum GradCamError {
    #[error("activation shape {activations:?} does not match gradient shape {gradients:?}")]
    ShapeMismatch {
        activations: Vec<usize>,
        gradients: Vec<usize>,
    },
    #[error("layer output has an empty spatial or channel dimension: {0:?}")]
    EmptyLayer(Vec<usize>),
}

/// Class-discriminative saliency map at the resolution of the inspected
/// layer. Values are within [0, 1]; the maximum is 1.0 unless the map is
/// all-zero, which is valid output meaning no discriminative region.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationMap {
    values: Array2<f32>,
}

impl ActivationMap {
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }
}

/// Gradient-weighted class activation mapping.
///
/// Per-channel weights are the global average of the gradient; the map is
/// the rectified, weighted channel sum of the activations, normalized so
/// its maximum is 1.0.
pub fn compute(layer: &LayerGradients) -> Result<ActivationMap, GradCamError> {
    let acts = &layer.activations;
    let grads = &layer.gradients;

    if acts.shape() != grads.shape() {
        return Err(GradCamError::ShapeMismatch {
            activations: acts.shape().to_vec(),
            gradients: grads.shape().to_vec(),
        });
    }

    let (height, width, channels) = acts.dim();
    if height == 0 || width == 0 || channels == 0 {
        return Err(GradCamError::EmptyLayer(acts.shape().to_vec()));
    }

    let spatial_size = (height * width) as f32;
    let mut weights = Array1::<f32>::zeros(channels);
    for c in 0..channels {
        let mut sum = 0.0;
        for y in 0..height {
            for x in 0..width {
                sum += grads[[y, x, c]];
            }
        }
        weights[c] = sum / spatial_size;
    }

    let mut cam = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut value = 0.0;
            for c in 0..channels {
                value += weights[c] * acts[[y, x, c]];
            }
            // Channels that push the class score down are discarded.
            cam[[y, x]] = value.max(0.0);
        }
    }

    let max = cam.iter().copied().fold(0.0, f32::max);
    cam.mapv_inplace(|v| v / (max + NORMALIZATION_EPSILON));

    Ok(ActivationMap { values: cam })
}
