//! Path-preference field: colour agreement between the two rasters plus
//! closeness to the patch centerline, normalized to [0, 1] over the patch.

use geo::line_measures::Distance;
use geo::{Euclidean, Line};
use image::{GrayImage, Luma};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::geometry::to_coord;
use crate::morphology::FloatImage;
use crate::types::{PixelCoord, Point, RgbImage};

/// Largest possible Euclidean distance between two RGB8 colours.
const MAX_RGB_DISTANCE: f64 = 441.672_955_930_063_7;

/// Preference grid for one patch with the raw range it was scaled from.
#[derive(Debug, Clone)]
pub struct CostField {
    /// Preference per pixel: [0, 1] inside the mask, 0 outside.
    pub grid: FloatImage,
    /// Range of the combined score before normalization.
    pub range: FieldRange,
}

/// Minimum and maximum of a field over the masked pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

/// Range of `grid` over the set pixels of `mask`, or `None` when the
/// mask is empty.
fn masked_range(grid: &FloatImage, mask: &GrayImage) -> Option<FieldRange> {
    grid.pixels()
        .zip(mask.pixels())
        .filter(|(_, m)| m.0[0] != 0)
        .map(|(v, _)| v.0[0])
        .fold(None, |acc: Option<FieldRange>, v| {
            Some(acc.map_or(FieldRange { min: v, max: v }, |r| FieldRange {
                min: r.min.min(v),
                max: r.max.max(v),
            }))
        })
}

/// Min-max scale `grid` to [0, 1] over the mask; pixels outside the mask
/// become 0. A flat field scales to 1.
fn normalize(grid: &mut FloatImage, mask: &GrayImage) -> FieldRange {
    let range = masked_range(grid, mask).unwrap_or_default();
    let span = range.max - range.min;
    for (v, m) in grid.pixels_mut().zip(mask.pixels()) {
        v.0[0] = if m.0[0] == 0 {
            0.0
        } else if span > f64::EPSILON {
            (v.0[0] - range.min) / span
        } else {
            1.0
        };
    }
    range
}

/// Colour similarity `1 - |a - b| / max`, rescaled over the masked
/// pixels so background and nodata pixels do not stretch the range.
#[must_use]
pub fn colour_similarity(first: &RgbImage, second: &RgbImage, mask: &GrayImage) -> FloatImage {
    let mut grid = FloatImage::from_fn(mask.width(), mask.height(), |x, y| {
        let (a, b) = (first.get_pixel(x, y), second.get_pixel(x, y));
        let d = a
            .0
            .iter()
            .zip(b.0.iter())
            .map(|(&p, &q)| (f64::from(p) - f64::from(q)).powi(2))
            .sum::<f64>()
            .sqrt();
        Luma([1.0 - d / MAX_RGB_DISTANCE])
    });
    normalize(&mut grid, mask);
    grid
}

/// Closeness to the centerline, `1 - d / max d` over the masked pixels,
/// where `d` is the distance from a pixel to the nearest centerline
/// segment.
#[must_use]
pub fn centerline_closeness(mask: &GrayImage, centerline: &[PixelCoord]) -> FloatImage {
    let (width, height) = mask.dimensions();
    let segments: Vec<GeomWithData<Line<f64>, usize>> = match centerline {
        [] => Vec::new(),
        [only] => vec![GeomWithData::new(
            Line::new(to_coord((*only).into()), to_coord((*only).into())),
            0,
        )],
        _ => centerline
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                GeomWithData::new(Line::new(to_coord(w[0].into()), to_coord(w[1].into())), i)
            })
            .collect(),
    };
    if segments.is_empty() {
        return FloatImage::from_fn(width, height, |x, y| {
            Luma([if mask.get_pixel(x, y).0[0] == 0 { 0.0 } else { 1.0 }])
        });
    }
    let tree = RTree::bulk_load(segments);

    let mut grid = FloatImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            return Luma([0.0]);
        }
        let p = Point::from(PixelCoord::new(x, y));
        let query = geo::Point::new(p.x, p.y);
        let d = tree
            .nearest_neighbor(&query)
            .map_or(0.0, |s| Euclidean.distance(&query, s.geom()));
        Luma([d])
    });
    let max = masked_range(&grid, mask).map_or(0.0, |r| r.max);
    for (v, m) in grid.pixels_mut().zip(mask.pixels()) {
        if m.0[0] != 0 {
            v.0[0] = if max > f64::EPSILON { 1.0 - v.0[0] / max } else { 1.0 };
        }
    }
    grid
}

/// Combine colour similarity and centerline closeness into the path
/// preference field: `similarity + closeness * prefer_centre_factor`,
/// min-max normalized over the mask.
#[must_use]
pub fn build_cost_field(
    first: &RgbImage,
    second: &RgbImage,
    mask: &GrayImage,
    centerline: &[PixelCoord],
    prefer_centre_factor: f64,
) -> CostField {
    let similarity = colour_similarity(first, second, mask);
    let closeness = centerline_closeness(mask, centerline);
    let mut grid = FloatImage::from_fn(mask.width(), mask.height(), |x, y| {
        let s = similarity.get_pixel(x, y).0[0];
        let c = closeness.get_pixel(x, y).0[0];
        Luma([c.mul_add(prefer_centre_factor, s)])
    });
    drop(similarity);
    drop(closeness);
    let range = normalize(&mut grid, mask);
    log::debug!(
        "cost field {}x{}: raw preference {:.4}..{:.4}",
        mask.width(),
        mask.height(),
        range.min,
        range.max
    );
    CostField { grid, range }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgb;

    use crate::raster::ON;

    fn full_mask(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([ON]))
    }

    #[test]
    fn max_rgb_distance_matches_cube_diagonal() {
        assert!((MAX_RGB_DISTANCE - 3f64.sqrt() * 255.0).abs() < 1e-9);
    }

    #[test]
    fn identical_images_are_fully_similar() {
        let img = RgbImage::from_fn(6, 4, |x, y| Rgb([x as u8 * 10, y as u8 * 20, 7]));
        let sim = colour_similarity(&img, &img, &full_mask(6, 4));
        assert!(sim.pixels().all(|p| (p.0[0] - 1.0).abs() < 1e-12));
    }

    #[test]
    fn similarity_rescaled_over_mask() {
        let a = RgbImage::from_pixel(4, 1, Rgb([0, 0, 0]));
        let mut b = a.clone();
        b.put_pixel(1, 0, Rgb([30, 0, 0]));
        b.put_pixel(2, 0, Rgb([60, 0, 0]));
        b.put_pixel(3, 0, Rgb([255, 255, 255]));
        let mut mask = full_mask(4, 1);
        mask.put_pixel(3, 0, Luma([0]));
        let sim = colour_similarity(&a, &b, &mask);
        assert!((sim.get_pixel(0, 0).0[0] - 1.0).abs() < 1e-12);
        assert!((sim.get_pixel(1, 0).0[0] - 0.5).abs() < 1e-12);
        assert!(sim.get_pixel(2, 0).0[0].abs() < 1e-12);
        assert!(sim.get_pixel(3, 0).0[0].abs() < 1e-12);
    }

    #[test]
    fn closeness_peaks_on_centerline() {
        let mask = full_mask(10, 9);
        let line: Vec<PixelCoord> = (0..10).map(|x| PixelCoord::new(x, 4)).collect();
        let c = centerline_closeness(&mask, &line);
        assert!((c.get_pixel(3, 4).0[0] - 1.0).abs() < 1e-12);
        assert!(c.get_pixel(3, 0).0[0].abs() < 1e-12);
        assert!((c.get_pixel(3, 2).0[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn field_is_bounded_and_zero_outside_mask() {
        let a = RgbImage::from_fn(20, 12, |x, y| Rgb([(x * 12) as u8, (y * 20) as u8, 90]));
        let b = RgbImage::from_fn(20, 12, |x, y| Rgb([(y * 9) as u8, (x * 3) as u8, 10]));
        let mask = GrayImage::from_fn(20, 12, |x, y| Luma([if x + y < 22 { ON } else { 0 }]));
        let line: Vec<PixelCoord> = (0..12).map(|i| PixelCoord::new(i, i)).collect();
        let field = build_cost_field(&a, &b, &mask, &line, 1.0);
        for (x, y, v) in field.grid.enumerate_pixels() {
            let v = v.0[0];
            if mask.get_pixel(x, y).0[0] == 0 {
                assert!(v.abs() < f64::EPSILON);
            } else {
                assert!((0.0..=1.0).contains(&v), "{v} at ({x}, {y})");
            }
        }
        assert!(field.range.max > field.range.min);
    }

    #[test]
    fn flat_field_is_fully_preferred() {
        let img = RgbImage::from_pixel(5, 5, Rgb([3, 3, 3]));
        let field = build_cost_field(&img, &img, &full_mask(5, 5), &[], 1.0);
        assert!(field.grid.pixels().all(|p| (p.0[0] - 1.0).abs() < 1e-12));
    }
}
