use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_line_segment_mut;
use imageproc::point::Point;
use ndarray::Array2;

/// Stroke color used for salient-region outlines.
pub const STROKE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Closed outer boundaries of the salient regions of a thresholded
/// activation map. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContourSet {
    polygons: Vec<Vec<Point<i32>>>,
}

impl ContourSet {
    pub fn polygons(&self) -> &[Vec<Point<i32>>] {
        &self.polygons
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }
}

/// Binarizes a resized activation map: values at or above `threshold` are
/// salient.
fn binarize(map: &Array2<f32>, threshold: f32) -> GrayImage {
    let (height, width) = map.dim();
    let mut mask = GrayImage::new(width as u32, height as u32);
    for (y, row) in map.outer_iter().enumerate() {
        for (x, &value) in row.iter().enumerate() {
            if value >= threshold {
                mask.put_pixel(x as u32, y as u32, image::Luma([255u8]));
            }
        }
    }
    mask
}

fn bounding_area(points: &[Point<i32>]) -> u32 {
    let mut min_x = i32::MAX;
    let mut max_x = i32::MIN;
    let mut min_y = i32::MAX;
    let mut max_y = i32::MIN;
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    ((max_x - min_x + 1) * (max_y - min_y + 1)) as u32
}

/// Extracts the outer boundaries of 8-connected salient regions.
///
/// Components whose bounding area falls below `min_region_area` are
/// dropped to suppress single-pixel noise.
pub fn extract(map: &Array2<f32>, threshold: f32, min_region_area: u32) -> ContourSet {
    let mask = binarize(map, threshold);
    let contours = find_contours::<i32>(&mask);

    let polygons = contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter(|c| !c.points.is_empty() && bounding_area(&c.points) >= min_region_area)
        .map(|c| c.points)
        .collect();

    ContourSet { polygons }
}

/// Draws each polygon's closed outline onto `image` with a 2 px stroke.
/// Regions are outlined, never filled.
pub fn draw(image: &mut RgbImage, contours: &ContourSet, color: Rgb<u8>) {
    for polygon in &contours.polygons {
        if polygon.len() == 1 {
            let p = polygon[0];
            draw_thick_segment(image, p, p, color);
            continue;
        }
        for pair in polygon.windows(2) {
            draw_thick_segment(image, pair[0], pair[1], color);
        }
        if let (Some(&first), Some(&last)) = (polygon.first(), polygon.last()) {
            draw_thick_segment(image, last, first, color);
        }
    }
}

fn draw_thick_segment(image: &mut RgbImage, from: Point<i32>, to: Point<i32>, color: Rgb<u8>) {
    let start = (from.x as f32, from.y as f32);
    let end = (to.x as f32, to.y as f32);
    draw_line_segment_mut(image, start, end, color);
    // Second pass offset by one pixel on each axis widens the stroke to
    // roughly 2 px without filling the region.
    draw_line_segment_mut(
        image,
        (start.0 + 1.0, start.1),
        (end.0 + 1.0, end.1),
        color,
    );
    draw_line_segment_mut(
        image,
        (start.0, start.1 + 1.0),
        (end.0, end.1 + 1.0),
        color,
    );
}
