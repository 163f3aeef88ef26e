//! Plate candidate extraction.
//!
//! grayscale → Gaussian blur → Canny edges → contours → largest N by area →
//! polygon approximation → keep quadrilaterals → crop → adaptive threshold.
//! Each frame is processed independently.

use crate::engine::ConfigError;
use crate::types::BoundingBox;
use image::{imageops, DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::contrast::adaptive_threshold;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Tuning for [`PlateCandidateExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Contours kept after sorting by area, largest first.
    pub max_candidates: usize,
    /// Gaussian sigma (1.1 ≈ a 5×5 kernel).
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub approx_epsilon_ratio: f64,
    /// Adaptive threshold neighbourhood radius (5 ≈ an 11px block).
    pub threshold_block_radius: u32,
    /// Quadrilaterals narrower or shorter than this are dropped.
    pub min_side: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            blur_sigma: 1.1,
            canny_low: 50.0,
            canny_high: 150.0,
            approx_epsilon_ratio: 0.02,
            threshold_block_radius: 5,
            min_side: 8,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.blur_sigma.is_finite() || self.blur_sigma <= 0.0 {
            return Err(ConfigError::new("extractor.blur_sigma", "must be a finite value above 0"));
        }
        if !self.canny_low.is_finite() || !self.canny_high.is_finite() || self.canny_low < 0.0 {
            return Err(ConfigError::new("extractor.canny_low", "thresholds must be finite and non-negative"));
        }
        if self.canny_low > self.canny_high {
            return Err(ConfigError::new("extractor.canny_high", "must not be below canny_low"));
        }
        if !self.approx_epsilon_ratio.is_finite() || self.approx_epsilon_ratio <= 0.0 {
            return Err(ConfigError::new(
                "extractor.approx_epsilon_ratio",
                "must be a finite value above 0",
            ));
        }
        Ok(())
    }
}

/// A plausible plate region and its binarized crop, ready for OCR.
#[derive(Debug, Clone)]
pub struct PlateCandidate {
    pub bbox: BoundingBox,
    pub crop: GrayImage,
}

#[derive(Debug, Clone, Default)]
pub struct PlateCandidateExtractor {
    config: ExtractorConfig,
}

impl PlateCandidateExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Find quadrilateral regions in the frame. An empty result is normal.
    pub fn extract(&self, frame: &DynamicImage) -> Vec<PlateCandidate> {
        let gray = frame.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        let mut contours: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&edges)
            .into_iter()
            .filter(|c| c.points.len() >= 4)
            .map(|c| (polygon_area(&c.points), c.points))
            .collect();
        contours.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        contours.truncate(self.config.max_candidates);

        let mut candidates = Vec::new();
        for (area, points) in contours {
            let epsilon = self.config.approx_epsilon_ratio * arc_length(&points, true);
            if epsilon <= 0.0 {
                continue;
            }
            let approx = approximate_polygon_dp(&points, epsilon, true);
            if vertex_count(&approx) != 4 {
                continue;
            }
            let Some(bbox) = bounding_rect(&approx, width, height) else {
                continue;
            };
            if bbox.width < self.config.min_side || bbox.height < self.config.min_side {
                continue;
            }

            let crop = imageops::crop_imm(&gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            let crop = adaptive_threshold(&crop, self.config.threshold_block_radius);
            tracing::trace!(?bbox, area, "plate candidate");
            candidates.push(PlateCandidate { bbox, crop });
        }

        tracing::debug!(count = candidates.len(), "plate candidates extracted");
        candidates
    }
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice as f64 / 2.0).abs()
}

/// Vertex count of an approximated closed polygon, ignoring a repeated closing point.
fn vertex_count(polygon: &[Point<i32>]) -> usize {
    match (polygon.first(), polygon.last()) {
        (Some(first), Some(last)) if polygon.len() > 1 && first == last => polygon.len() - 1,
        _ => polygon.len(),
    }
}

/// Inclusive bounding rectangle of the points, clipped to the frame.
fn bounding_rect(points: &[Point<i32>], width: u32, height: u32) -> Option<BoundingBox> {
    let min_x = points.iter().map(|p| p.x).min()?.max(0);
    let min_y = points.iter().map(|p| p.y).min()?.max(0);
    let max_x = points.iter().map(|p| p.x).max()?.min(width as i32 - 1);
    let max_y = points.iter().map(|p| p.y).max()?.min(height as i32 - 1);
    if max_x < min_x || max_y < min_y {
        return None;
    }
    Some(BoundingBox::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    fn pt(x: i32, y: i32) -> Point<i32> {
        Point::new(x, y)
    }

    #[test]
    fn test_uniform_frame_has_no_candidates() {
        let frame = DynamicImage::ImageLuma8(GrayImage::from_pixel(160, 120, Luma([128])));
        assert!(PlateCandidateExtractor::default().extract(&frame).is_empty());
    }

    #[test]
    fn test_empty_frame_has_no_candidates() {
        let frame = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(PlateCandidateExtractor::default().extract(&frame).is_empty());
    }

    #[test]
    fn test_rectangle_yields_binarized_candidate() {
        let mut img = GrayImage::from_pixel(240, 160, Luma([0]));
        draw_filled_rect_mut(&mut img, Rect::at(60, 50).of_size(120, 50), Luma([255]));
        let frame = DynamicImage::ImageLuma8(img);

        let candidates = PlateCandidateExtractor::default().extract(&frame);
        assert!(!candidates.is_empty(), "expected the rectangle to be found");

        for c in &candidates {
            assert!(c.bbox.x + c.bbox.width <= 240);
            assert!(c.bbox.y + c.bbox.height <= 160);
            assert_eq!(c.crop.dimensions(), (c.bbox.width, c.bbox.height));
            assert!(c.crop.pixels().all(|p| p[0] == 0 || p[0] == 255));
        }
        assert!(candidates.iter().any(|c| c.bbox.width > 100 && c.bbox.height > 40));
    }

    #[test]
    fn test_round_shape_is_not_a_candidate() {
        let mut img = GrayImage::from_pixel(200, 160, Luma([0]));
        draw_filled_circle_mut(&mut img, (100, 80), 50, Luma([255]));
        let frame = DynamicImage::ImageLuma8(img);

        assert!(PlateCandidateExtractor::default().extract(&frame).is_empty());
    }

    #[test]
    fn test_only_quadrilateral_survives_next_to_round_shape() {
        let mut img = GrayImage::from_pixel(320, 160, Luma([0]));
        draw_filled_circle_mut(&mut img, (60, 80), 45, Luma([255]));
        draw_filled_rect_mut(&mut img, Rect::at(160, 50).of_size(120, 50), Luma([255]));
        let frame = DynamicImage::ImageLuma8(img);

        let candidates = PlateCandidateExtractor::default().extract(&frame);
        assert!(!candidates.is_empty());
        // Nothing from the circle's half of the frame.
        assert!(candidates.iter().all(|c| c.bbox.x >= 150));
    }

    #[test]
    fn test_config_validation() {
        assert!(ExtractorConfig::default().validate().is_ok());

        for sigma in [0.0, -1.0, f32::NAN] {
            let cfg = ExtractorConfig {
                blur_sigma: sigma,
                ..ExtractorConfig::default()
            };
            assert_eq!(cfg.validate().unwrap_err().field, "extractor.blur_sigma");
        }

        let inverted = ExtractorConfig {
            canny_low: 200.0,
            canny_high: 100.0,
            ..ExtractorConfig::default()
        };
        assert!(inverted.validate().is_err());

        let flat = ExtractorConfig {
            approx_epsilon_ratio: 0.0,
            ..ExtractorConfig::default()
        };
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_candidate_count_is_capped() {
        let mut img = GrayImage::from_pixel(400, 300, Luma([0]));
        for row in 0..4 {
            for col in 0..4 {
                draw_filled_rect_mut(
                    &mut img,
                    Rect::at(20 + col * 95, 20 + row * 70).of_size(60, 30),
                    Luma([255]),
                );
            }
        }
        let frame = DynamicImage::ImageLuma8(img);
        let extractor = PlateCandidateExtractor::new(ExtractorConfig {
            max_candidates: 3,
            ..ExtractorConfig::default()
        });
        assert!(extractor.extract(&frame).len() <= 3);
    }

    #[test]
    fn test_polygon_area_square() {
        let square = [pt(0, 0), pt(10, 0), pt(10, 10), pt(0, 10)];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_vertex_count_ignores_closing_point() {
        let open = [pt(0, 0), pt(10, 0), pt(10, 10), pt(0, 10)];
        let closed = [pt(0, 0), pt(10, 0), pt(10, 10), pt(0, 10), pt(0, 0)];
        assert_eq!(vertex_count(&open), 4);
        assert_eq!(vertex_count(&closed), 4);
        assert_eq!(vertex_count(&[]), 0);
    }

    #[test]
    fn test_bounding_rect_clips_to_frame() {
        let quad = [pt(-5, 2), pt(30, 2), pt(30, 200), pt(-5, 200)];
        let bbox = bounding_rect(&quad, 20, 100).unwrap();
        assert_eq!(bbox, BoundingBox::new(0, 2, 20, 98));
    }
}
