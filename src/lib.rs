mod app;
mod compose;
mod contour;
mod gradcam;
mod heatmap;
mod preprocess;

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod labels;
pub mod ort_classifier;
pub mod pipeline;

pub use app::start_app;
pub use compose::CompositeOutput;
pub use gradcam::{ActivationMap, GradCamError};
pub use pipeline::{
    ExplainMode, ExplainOutcome, ExplainRequest, Explanation, Pipeline, PipelineError, Prediction,
    TargetClass,
};
pub use preprocess::PreprocessError;
