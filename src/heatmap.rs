use crate::gradcam::ActivationMap;
use image::{Rgb, RgbImage};
use ndarray::Array2;

/// Bilinear upsampling with center-aligned sampling, matching the usual
/// image-resize convention.
pub fn resize_bilinear(map: &Array2<f32>, target_width: u32, target_height: u32) -> Array2<f32> {
    let (src_h, src_w) = map.dim();
    let (dst_w, dst_h) = (target_width as usize, target_height as usize);

    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    let mut out = Array2::<f32>::zeros((dst_h, dst_w));
    for oy in 0..dst_h {
        let sy = ((oy as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = sy - y0 as f32;

        for ox in 0..dst_w {
            let sx = ((ox as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = sx - x0 as f32;

            let top = map[[y0, x0]] * (1.0 - fx) + map[[y0, x1]] * fx;
            let bottom = map[[y1, x0]] * (1.0 - fx) + map[[y1, x1]] * fx;
            out[[oy, ox]] = top * (1.0 - fy) + bottom * fy;
        }
    }

    out
}

/// Fixed monotonic color ramp, low values cool (blue) and high values warm
/// (red), with cyan/green/yellow in between.
pub fn color_ramp(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let r = (1.5 - (4.0 * v - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * v - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * v - 1.0).abs()).clamp(0.0, 1.0);

    Rgb([
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ])
}

/// Maps every scalar of a resized activation map through the color ramp.
pub fn colorize(resized: &Array2<f32>) -> RgbImage {
    let (height, width) = resized.dim();
    let mut image = RgbImage::new(width as u32, height as u32);
    for (y, row) in resized.outer_iter().enumerate() {
        for (x, &value) in row.iter().enumerate() {
            image.put_pixel(x as u32, y as u32, color_ramp(value));
        }
    }
    image
}

/// `(1 - ratio) * original + ratio * overlay`, clipped to the valid pixel
/// range. Both images must share dimensions.
pub fn blend(original: &RgbImage, overlay: &RgbImage, ratio: f32) -> RgbImage {
    debug_assert_eq!(original.dimensions(), overlay.dimensions());

    let mut out = RgbImage::new(original.width(), original.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let orig = original.get_pixel(x, y);
        let over = overlay.get_pixel(x, y);
        for c in 0..3 {
            let value = (1.0 - ratio) * orig.0[c] as f32 + ratio * over.0[c] as f32;
            pixel.0[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Renders an activation map as a color heatmap at `target_size`,
/// optionally alpha-blended over `blend_image` (which must already be at
/// `target_size`). An all-zero map with a blend target yields the blend
/// image unchanged: no discriminative region, nothing to wash over it.
pub fn render(
    map: &ActivationMap,
    target_size: (u32, u32),
    blend_image: Option<&RgbImage>,
    blend_ratio: f32,
) -> RgbImage {
    if let Some(original) = blend_image {
        if map.is_zero() {
            return original.clone();
        }
    }

    let (width, height) = target_size;
    let resized = resize_bilinear(map.values(), width, height);
    let colored = colorize(&resized);

    match blend_image {
        Some(original) => blend(original, &colored, blend_ratio),
        None => colored,
    }
}
