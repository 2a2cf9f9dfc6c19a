//! Binary morphology on {0, 255} masks: connected components, hole
//! filling, thinning, and distance to the mask boundary.

use std::collections::BTreeMap;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
pub use imageproc::region_labelling::Connectivity;
use imageproc::region_labelling::connected_components;

use crate::raster::{ON, PixelRect, invert};
use crate::types::{PixelCoord, Point};

/// Label image produced by [`label`]; 0 is background.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Per-pixel floating point grid.
pub type FloatImage = ImageBuffer<Luma<f64>, Vec<f64>>;

/// Statistics for one connected component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    /// Label value in the [`LabelImage`].
    pub label: u32,
    /// Number of pixels.
    pub area: u64,
    /// Bounding box.
    pub bbox: PixelRect,
    sum_x: f64,
    sum_y: f64,
}

impl Component {
    /// Mean pixel index (column, row) of the component.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn centroid(&self) -> Point {
        let n = self.area.max(1) as f64;
        Point::new(self.sum_x / n, self.sum_y / n)
    }

    /// Whether the component reaches the edge of a `width` x `height` grid.
    #[must_use]
    pub const fn touches_border(&self, width: u32, height: u32) -> bool {
        self.bbox.x == 0
            || self.bbox.y == 0
            || self.bbox.x + self.bbox.width == width
            || self.bbox.y + self.bbox.height == height
    }
}

/// Connected components of a mask with their statistics.
#[derive(Debug, Clone)]
pub struct Labelling {
    /// Per-pixel labels.
    pub labels: LabelImage,
    /// Components in ascending label order.
    pub components: Vec<Component>,
}

impl Labelling {
    /// Mask of a single component.
    #[must_use]
    pub fn extract(&self, label: u32) -> GrayImage {
        GrayImage::from_fn(self.labels.width(), self.labels.height(), |x, y| {
            Luma([if self.labels.get_pixel(x, y).0[0] == label { ON } else { 0 }])
        })
    }

    /// Mask of the union of several components.
    #[must_use]
    pub fn extract_all(&self, labels: &[u32]) -> GrayImage {
        GrayImage::from_fn(self.labels.width(), self.labels.height(), |x, y| {
            Luma([if labels.contains(&self.labels.get_pixel(x, y).0[0]) { ON } else { 0 }])
        })
    }

    /// Label at a pixel.
    #[must_use]
    pub fn label_at(&self, p: PixelCoord) -> u32 {
        self.labels.get_pixel(p.x, p.y).0[0]
    }

    /// Components ordered by area, largest first; ties by label.
    #[must_use]
    pub fn by_area(&self) -> Vec<Component> {
        let mut sorted = self.components.clone();
        sorted.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));
        sorted
    }
}

/// Label the set pixels of a mask.
#[must_use]
pub fn label(mask: &GrayImage, connectivity: Connectivity) -> Labelling {
    let labels = connected_components(mask, connectivity, Luma([0u8]));
    let mut stats: BTreeMap<u32, (u64, u32, u32, u32, u32, f64, f64)> = BTreeMap::new();
    for (x, y, l) in labels.enumerate_pixels() {
        let l = l.0[0];
        if l == 0 {
            continue;
        }
        let e = stats
            .entry(l)
            .or_insert((0, x, y, x, y, 0.0, 0.0));
        e.0 += 1;
        e.1 = e.1.min(x);
        e.2 = e.2.min(y);
        e.3 = e.3.max(x);
        e.4 = e.4.max(y);
        e.5 += f64::from(x);
        e.6 += f64::from(y);
    }
    let components = stats
        .into_iter()
        .map(|(label, (area, x0, y0, x1, y1, sum_x, sum_y))| Component {
            label,
            area,
            bbox: PixelRect {
                x: x0,
                y: y0,
                width: x1 - x0 + 1,
                height: y1 - y0 + 1,
            },
            sum_x,
            sum_y,
        })
        .collect();
    Labelling { labels, components }
}

/// Fill background regions that do not reach the mask border.
#[must_use]
pub fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let background = label(&invert(mask), Connectivity::Four);
    let mut out = mask.clone();
    for hole in background
        .components
        .iter()
        .filter(|c| !c.touches_border(width, height))
    {
        let rect = hole.bbox;
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                if background.labels.get_pixel(x, y).0[0] == hole.label {
                    out.put_pixel(x, y, Luma([ON]));
                }
            }
        }
    }
    out
}

/// Zhang-Suen thinning: reduce a mask to a one-pixel-wide skeleton that
/// preserves its topology.
#[must_use]
pub fn thin(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize + 2, height as usize + 2);
    let mut grid = vec![false; w * h];
    for (x, y, p) in mask.enumerate_pixels() {
        grid[(y as usize + 1) * w + x as usize + 1] = p.0[0] != 0;
    }

    let mut marked = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            marked.clear();
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    if grid[y * w + x] && removable(&grid, w, x, y, step) {
                        marked.push(y * w + x);
                    }
                }
            }
            changed |= !marked.is_empty();
            for &i in &marked {
                grid[i] = false;
            }
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        Luma([if grid[(y as usize + 1) * w + x as usize + 1] { ON } else { 0 }])
    })
}

/// Zhang-Suen deletion test for the pixel at `(x, y)` in sub-iteration
/// `step` (0 or 1).
fn removable(grid: &[bool], w: usize, x: usize, y: usize, step: usize) -> bool {
    // P2..P9 clockwise from north.
    let n = [
        grid[(y - 1) * w + x],
        grid[(y - 1) * w + x + 1],
        grid[y * w + x + 1],
        grid[(y + 1) * w + x + 1],
        grid[(y + 1) * w + x],
        grid[(y + 1) * w + x - 1],
        grid[y * w + x - 1],
        grid[(y - 1) * w + x - 1],
    ];
    let count = n.iter().filter(|&&v| v).count();
    if !(2..=6).contains(&count) {
        return false;
    }
    let transitions = (0..8).filter(|&i| !n[i] && n[(i + 1) % 8]).count();
    if transitions != 1 {
        return false;
    }
    let [p2, _, p4, _, p6, _, p8, _] = n;
    if step == 0 {
        !(p2 && p4 && p6) && !(p4 && p6 && p8)
    } else {
        !(p2 && p4 && p8) && !(p2 && p6 && p8)
    }
}

/// Euclidean distance from each set pixel to the nearest unset pixel,
/// treating everything outside the image as unset. Unset pixels are 0.
#[must_use]
pub fn boundary_distance(mask: &GrayImage) -> FloatImage {
    let (width, height) = mask.dimensions();
    let padded = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let inside = x >= 1
            && y >= 1
            && x <= width
            && y <= height
            && mask.get_pixel(x - 1, y - 1).0[0] != 0;
        Luma([if inside { 0 } else { ON }])
    });
    let squared = euclidean_squared_distance_transform(&padded);
    FloatImage::from_fn(width, height, |x, y| {
        Luma([squared.get_pixel(x + 1, y + 1).0[0].sqrt()])
    })
}
