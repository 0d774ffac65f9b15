use crate::artifact::{ArtifactError, ArtifactRef, ArtifactStore};
use crate::contour::{self, ContourSet};
use image::RgbImage;
use uuid::Uuid;

/// References to the four named images produced for one explanation
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeOutput {
    pub original: ArtifactRef,
    pub heatmap: ArtifactRef,
    pub outline: ArtifactRef,
    pub combined: ArtifactRef,
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ArtifactError> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| ArtifactError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Stores one image under a freshly generated name.
pub async fn store_image<S: ArtifactStore>(
    store: &S,
    image: &RgbImage,
    kind: &str,
) -> Result<ArtifactRef, ArtifactError> {
    let name = format!("{}_{}.png", Uuid::new_v4(), kind);
    store.put(&encode_png(image)?, &name).await
}

/// Assembles and stores the four named outputs: the untouched original,
/// the color-mapped heatmap, the original with salient-region outlines,
/// and the blended heatmap with outlines. Every artifact gets a fresh
/// name; nothing is ever overwritten.
pub async fn assemble<S: ArtifactStore>(
    store: &S,
    original: &RgbImage,
    heatmap: &RgbImage,
    blended: &RgbImage,
    contours: &ContourSet,
) -> Result<CompositeOutput, ArtifactError> {
    let request_id = Uuid::new_v4();

    let mut outline = original.clone();
    contour::draw(&mut outline, contours, contour::STROKE_COLOR);

    let mut combined = blended.clone();
    contour::draw(&mut combined, contours, contour::STROKE_COLOR);

    let original_ref = store
        .put(&encode_png(original)?, &format!("{request_id}_original.png"))
        .await?;
    let heatmap_ref = store
        .put(&encode_png(heatmap)?, &format!("{request_id}_heatmap.png"))
        .await?;
    let outline_ref = store
        .put(&encode_png(&outline)?, &format!("{request_id}_outline.png"))
        .await?;
    let combined_ref = store
        .put(&encode_png(&combined)?, &format!("{request_id}_combined.png"))
        .await?;

    Ok(CompositeOutput {
        original: original_ref,
        heatmap: heatmap_ref,
        outline: outline_ref,
        combined: combined_ref,
    })
}
