use crate::artifact::FsArtifactStore;
use crate::config::Config;
use crate::labels::load_species_labels;
use crate::ort_classifier::OrtClassifier;
use crate::pipeline::{ExplainMode, ExplainRequest, Explanation, Pipeline};
use std::sync::Arc;

/// Boots the process: loads labels and the classifier (a load failure is
/// fatal here, never per-request), then classifies and explains the image
/// named on the command line.
pub async fn start_app(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let labels = load_species_labels(&config.labels.get_path())?;
    tracing::info!("Loaded {} species labels", labels.len());

    let classifier = match OrtClassifier::new(&config.model, labels) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to load classifier: {:?}", e);
            return Err(e);
        }
    };

    let store = Arc::new(FsArtifactStore::new(&config.artifacts)?);
    let pipeline = Pipeline::new(classifier, store, config.explain.clone());

    let mut args = std::env::args().skip(1);
    let image_path = args
        .next()
        .ok_or("usage: fish_explain <image-path> [quick|explore]")?;
    let mode = match args.next().as_deref() {
        None | Some("quick") => ExplainMode::Quick,
        Some("explore") => ExplainMode::Explore,
        Some(other) => {
            return Err(format!("{other} is not a supported mode. Use `quick` or `explore`.").into())
        }
    };

    let image_bytes = tokio::fs::read(&image_path).await?;
    let request = ExplainRequest {
        mode,
        ..Default::default()
    };

    let outcome = pipeline.classify_and_explain(&image_bytes, &request).await?;

    tracing::info!(
        label = %outcome.prediction.class_label,
        confidence = outcome.prediction.confidence,
        "prediction"
    );
    match outcome.explanation {
        Explanation::Quick { heatmap } => {
            tracing::info!("Stored heatmap as {}", heatmap);
        }
        Explanation::Explore(composite) => {
            tracing::info!(
                "Stored original={} heatmap={} outline={} combined={}",
                composite.original,
                composite.heatmap,
                composite.outline,
                composite.combined
            );
        }
    }

    Ok(())
}
