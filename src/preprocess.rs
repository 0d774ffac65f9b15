use crate::config::ChannelOrder;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("no image data supplied")]
    EmptyInput,
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// A decoded request image: the full-resolution pixels kept for
/// compositing, and the normalized tensor fed to the classifier.
pub struct DecodedInput {
    pub original: RgbImage,
    pub tensor: Array<f32, Ix4>,
}

/// Decodes an uploaded byte buffer, converts to RGB, resizes to the model
/// input size, and scales pixel values to [0, 1].
pub fn decode_and_normalize(
    image_data: &[u8],
    input_width: u32,
    input_height: u32,
    channel_order: ChannelOrder,
) -> Result<DecodedInput, PreprocessError> {
    if image_data.is_empty() {
        return Err(PreprocessError::EmptyInput);
    }

    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| PreprocessError::Decode(e.to_string()))?;

    let original = image_reader
        .decode()
        .map_err(|e| PreprocessError::Decode(e.to_string()))?
        .to_rgb8();

    let resized = image::imageops::resize(&original, input_width, input_height, FilterType::CatmullRom);

    let (w, h) = (input_width as usize, input_height as usize);
    let mut tensor = match channel_order {
        ChannelOrder::Nchw => Array::zeros((1, 3, h, w)),
        ChannelOrder::Nhwc => Array::zeros((1, h, w, 3)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        match channel_order {
            ChannelOrder::Nchw => {
                tensor[[0, 0, y, x]] = (r as f32) / 255.;
                tensor[[0, 1, y, x]] = (g as f32) / 255.;
                tensor[[0, 2, y, x]] = (b as f32) / 255.;
            }
            ChannelOrder::Nhwc => {
                tensor[[0, y, x, 0]] = (r as f32) / 255.;
                tensor[[0, y, x, 1]] = (g as f32) / 255.;
                tensor[[0, y, x, 2]] = (b as f32) / 255.;
            }
        }
    }

    Ok(DecodedInput { original, tensor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, color);
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    #[test]
    fn decodes_resizes_and_normalizes() {
        let bytes = png_bytes(100, 100, Rgb([255, 0, 0]));

        let decoded = decode_and_normalize(&bytes, 224, 224, ChannelOrder::Nchw).unwrap();

        assert_eq!(decoded.tensor.shape(), &[1, 3, 224, 224]);
        assert_eq!(decoded.original.dimensions(), (100, 100));
        assert!((decoded.tensor[[0, 0, 100, 100]] - 1.0).abs() < 1e-3);
        assert!(decoded.tensor[[0, 1, 100, 100]] < 1e-3);
    }

    #[test]
    fn honors_channels_last_layout() {
        let bytes = png_bytes(50, 40, Rgb([0, 0, 255]));

        let decoded = decode_and_normalize(&bytes, 224, 224, ChannelOrder::Nhwc).unwrap();

        assert_eq!(decoded.tensor.shape(), &[1, 224, 224, 3]);
        assert!((decoded.tensor[[0, 10, 10, 2]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn empty_input_is_a_distinct_error() {
        let result = decode_and_normalize(&[], 224, 224, ChannelOrder::Nchw);

        assert!(matches!(result, Err(PreprocessError::EmptyInput)));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = decode_and_normalize(&[1, 2, 3, 4, 5], 224, 224, ChannelOrder::Nchw);

        assert!(matches!(result, Err(PreprocessError::Decode(_))));
    }
}
