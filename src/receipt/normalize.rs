//! Receipt image normalization: grayscale, Otsu binarization, deskew.
//!
//! The skew estimate follows the classic "minimum-area rectangle around all
//! foreground pixels" approach. Angles use the legacy rotated-rectangle
//! convention, `[-90, 0)`, and rotation angles are counter-clockwise degrees
//! as seen on screen.

use crate::error::PipelineError;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::geometric_transformations::{rotate, Interpolation};
use std::path::Path;
use tracing::debug;

/// Binarized, rotation-corrected receipt image
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    /// Global Otsu threshold used for binarization
    pub otsu_level: u8,
    /// Correction applied, degrees counter-clockwise, in (-45, 45]
    pub skew_angle: f64,
}

/// Grayscale → binarize → deskew, strictly in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer;

impl ImageNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Decode an image file as single-channel grayscale.
    pub fn load_path(&self, path: &Path) -> Result<GrayImage, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::Image(format!(
                "Receipt image not found: {}",
                path.display()
            )));
        }
        let image = image::open(path).map_err(|e| {
            PipelineError::Image(format!("Failed to load image {}: {}", path.display(), e))
        })?;
        Ok(image.to_luma8())
    }

    /// Decode an in-memory image as single-channel grayscale.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<GrayImage, PipelineError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Image(format!("Failed to decode image: {}", e)))?;
        Ok(image.to_luma8())
    }

    pub fn normalize_path(&self, path: &Path) -> Result<NormalizedImage, PipelineError> {
        let gray = self.load_path(path)?;
        self.normalize(&gray)
    }

    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<NormalizedImage, PipelineError> {
        let gray = self.load_bytes(bytes)?;
        self.normalize(&gray)
    }

    /// Binarize and deskew an already-decoded grayscale image.
    pub fn normalize(&self, gray: &GrayImage) -> Result<NormalizedImage, PipelineError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::Image(format!(
                "Image dimensions must be non-zero (got {}x{})",
                width, height
            )));
        }

        let (binary, level) = binarize(gray);

        let skew_angle = min_area_rect_angle(&foreground_hull_candidates(&binary))
            .map(correction_angle)
            .unwrap_or(0.0);

        debug!(
            width,
            height,
            otsu_level = level,
            skew_angle = skew_angle,
            "Receipt image normalized"
        );

        Ok(NormalizedImage {
            image: rotate_about_center(&binary, skew_angle),
            otsu_level: level,
            skew_angle,
        })
    }
}

/// Two-level image: 255 where the pixel is above the Otsu level, else 0.
pub fn binarize(gray: &GrayImage) -> (GrayImage, u8) {
    let level = otsu_level(gray);
    let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    (binary, level)
}

/// Foreground points that can lie on the convex hull.
///
/// Only the leftmost and rightmost non-zero pixel of each row can be hull
/// vertices. Points are `(row, column)` pairs; the angle normalization in
/// [`correction_angle`] is calibrated for that ordering.
pub fn foreground_hull_candidates(binary: &GrayImage) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    for (y, row) in binary.enumerate_rows() {
        let mut first = None;
        let mut last = None;
        for (x, _, pixel) in row {
            if pixel[0] > 0 {
                first.get_or_insert(x);
                last = Some(x);
            }
        }
        if let (Some(first), Some(last)) = (first, last) {
            points.push((f64::from(y), f64::from(first)));
            if last != first {
                points.push((f64::from(y), f64::from(last)));
            }
        }
    }
    points
}

/// Angle of the minimum-area bounding rectangle, in `[-90, 0)` degrees.
///
/// `None` when there are no points.
pub fn min_area_rect_angle(points: &[(f64, f64)]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }

    let hull = convex_hull(points);
    let mut best: Option<(f64, f64)> = None; // (area, edge angle)

    for i in 0..hull.len() {
        let (ax, ay) = hull[i];
        let (bx, by) = hull[(i + 1) % hull.len()];
        let (dx, dy) = (bx - ax, by - ay);
        if dx == 0.0 && dy == 0.0 {
            continue;
        }

        let theta = dy.atan2(dx);
        let (sin, cos) = theta.sin_cos();
        let (mut min_u, mut max_u) = (f64::MAX, f64::MIN);
        let (mut min_v, mut max_v) = (f64::MAX, f64::MIN);
        for &(px, py) in &hull {
            let u = px * cos + py * sin;
            let v = -px * sin + py * cos;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |(best_area, _)| area < best_area) {
            best = Some((area, theta.to_degrees()));
        }
    }

    // A single distinct point is an axis-aligned, zero-size rectangle
    let edge_degrees = best.map_or(0.0, |(_, angle)| angle);

    let mut folded = edge_degrees.rem_euclid(90.0);
    if folded < 1e-9 || 90.0 - folded < 1e-9 {
        folded = 0.0;
    }
    Some(folded - 90.0)
}

/// Map a `[-90, 0)` rectangle angle to the rotation that levels the text.
///
/// Below -45° the rectangle is read as lying on its other side.
pub fn correction_angle(raw: f64) -> f64 {
    if raw < -45.0 {
        -(90.0 + raw)
    } else {
        -raw
    }
}

/// Rotate about the integer image center, keeping the original size.
///
/// Areas uncovered by the rotation are filled with 0.
pub fn rotate_about_center(image: &GrayImage, angle_degrees: f64) -> GrayImage {
    if angle_degrees == 0.0 {
        return image.clone();
    }
    let center = ((image.width() / 2) as f32, (image.height() / 2) as f32);
    // imageproc rotates clockwise for positive theta
    let theta = (-angle_degrees).to_radians() as f32;
    rotate(image, center, theta, Interpolation::Bilinear, Luma([0]))
}

/// Andrew's monotone chain; collinear points are dropped.
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));
    pts.dedup();

    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

#[inline]
fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}
