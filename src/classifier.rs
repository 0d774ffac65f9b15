use crate::config::ChannelOrder;
use ndarray::{Array3, Array4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("layer `{0}` not found in the model graph")]
    LayerNotFound(String),
    #[error("input shape {got:?} does not match the expected {expected:?}")]
    BadInput { expected: Vec<usize>, got: Vec<usize> },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Immutable description of a loaded model, fixed at load time.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub class_labels: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
    pub channel_order: ChannelOrder,
}

impl ModelMetadata {
    /// Input tensor shape the model expects, batch dimension included.
    pub fn expected_input_shape(&self) -> Vec<usize> {
        let (h, w) = (self.input_height as usize, self.input_width as usize);
        match self.channel_order {
            ChannelOrder::Nchw => vec![1, 3, h, w],
            ChannelOrder::Nhwc => vec![1, h, w, 3],
        }
    }
}

/// Activations of an internal layer and the gradient of a class score with
/// respect to them, both H' x W' x C.
#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub activations: Array3<f32>,
    pub gradients: Array3<f32>,
}

/// Seam over a loaded, trained classifier. Implementations are read-only
/// after construction and shareable across requests.
pub trait Classifier: Send + Sync + 'static {
    fn metadata(&self) -> &ModelMetadata;

    /// Class probabilities for one normalized input; sums to 1 within
    /// floating tolerance.
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError>;

    /// Activations of `layer` and the gradient of the score of
    /// `class_index` with respect to them.
    fn gradient_of_class_at_layer(
        &self,
        input: &Array4<f32>,
        class_index: usize,
        layer: &str,
    ) -> Result<LayerGradients, ClassifierError>;
}
