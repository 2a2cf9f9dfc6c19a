//! Least-cost path solver.
//!
//! The cutline is routed through the preference field between
//! waypoints taken from the full centerline. Each consecutive waypoint
//! pair is solved with an 8-connected Dijkstra search inside a small
//! sub-window, so the search never spans the whole patch at once.
//! Patches solved independently are joined afterwards by [`stitch`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use image::{GrayImage, Luma};

use crate::geometry::{furthest_pair, line_pixels};
use crate::morphology::FloatImage;
use crate::raster::{self, ON, PixelRect};
use crate::types::{Dimensions, MergeConfig, PixelCoord, Point, SeamError};

/// Step cost of a pixel outside the patch, and of the least preferred
/// pixel inside it.
pub const MAX_STEP_COST: u8 = 255;

/// Orthogonal and diagonal step weights, approximately `1 : sqrt(2)`.
const ORTHOGONAL_WEIGHT: u64 = 5;
const DIAGONAL_WEIGHT: u64 = 7;

/// Smallest sub-window margin in pixels.
const MIN_WINDOW_MARGIN: u32 = 2;

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// A solved seam for one patch.
#[derive(Debug, Clone)]
pub struct SeamPath {
    /// Ordered, 8-connected pixels from the first to the last centerline
    /// pixel, in the grid the solver was given.
    pub pixels: Vec<PixelCoord>,
    /// Waypoints after culling and snapping.
    pub waypoints: Vec<PixelCoord>,
    /// Region of the grid that was searched.
    pub window: PixelRect,
    /// How many waypoints snapping moved.
    pub snapped: usize,
}

impl SeamPath {
    /// First path pixel.
    #[must_use]
    pub fn start(&self) -> Option<PixelCoord> {
        self.pixels.first().copied()
    }

    /// Last path pixel.
    #[must_use]
    pub fn end(&self) -> Option<PixelCoord> {
        self.pixels.last().copied()
    }

    /// Rasterize the path into a binary mask of `dimensions`.
    #[must_use]
    pub fn mask(&self, dimensions: Dimensions) -> GrayImage {
        rasterize(&self.pixels, dimensions)
    }
}

/// Paint pixels into an empty mask, ignoring any outside it.
#[must_use]
pub fn rasterize(pixels: &[PixelCoord], dimensions: Dimensions) -> GrayImage {
    let mut mask = GrayImage::new(dimensions.width, dimensions.height);
    for p in pixels {
        if p.x < dimensions.width && p.y < dimensions.height {
            mask.put_pixel(p.x, p.y, Luma([ON]));
        }
    }
    mask
}

/// Byte step costs from a preference field: `1 + (1 - p) * 254` inside
/// the mask, [`MAX_STEP_COST`] outside it. Outside pixels stay passable
/// so centerline extensions past the patch can still be followed.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn step_costs(preference: &FloatImage, mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            return Luma([MAX_STEP_COST]);
        }
        let p = preference.get_pixel(x, y).0[0].clamp(0.0, 1.0);
        Luma([1 + ((1.0 - p) * 254.0).round() as u8])
    })
}

/// Region to search: the bounding box of the patch and its centerline,
/// or the whole grid when that box already covers at least
/// `crop_threshold` of it.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn search_window(mask: &GrayImage, centerline: &[PixelCoord], crop_threshold: f64) -> PixelRect {
    let full = PixelRect::full(Dimensions::of(mask));
    let inside = centerline
        .iter()
        .copied()
        .filter(|p| full.contains(*p));
    let Some(bbox) = PixelRect::bounding(raster::set_pixels(mask).chain(inside)) else {
        return full;
    };
    if full.area() == 0 || bbox.area() as f64 / full.area() as f64 >= crop_threshold {
        full
    } else {
        bbox
    }
}

/// Reduce the centerline to waypoints.
///
/// With `Some(n)` the centerline is split into `n` segments of equal
/// pixel count; with `None` every other pixel is kept. The first and
/// last pixels are always kept.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn cull_waypoints(centerline: &[PixelCoord], segment_count: Option<usize>) -> Vec<PixelCoord> {
    let Some(&last) = centerline.last() else {
        return Vec::new();
    };
    let mut waypoints: Vec<PixelCoord> = match segment_count {
        Some(n) if n > 0 && centerline.len() - 1 > n => {
            let span = (centerline.len() - 1) as f64;
            (0..=n)
                .map(|i| centerline[(i as f64 * span / n as f64).round() as usize])
                .collect()
        }
        Some(_) => centerline.to_vec(),
        None => centerline.iter().step_by(2).copied().collect(),
    };
    if waypoints.last() != Some(&last) {
        waypoints.push(last);
    }
    waypoints.dedup();
    waypoints
}

/// Move each interior waypoint to the cheapest valid centerline pixel
/// within `radius`. Ties go to the nearer pixel, then to row-major
/// order. Returns how many waypoints moved.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn snap_waypoints(
    waypoints: &mut [PixelCoord],
    costs: &GrayImage,
    valid: &GrayImage,
    centerline_mask: &GrayImage,
    radius: f64,
) -> usize {
    if waypoints.len() < 3 || radius < 1.0 {
        return 0;
    }
    let r = radius.floor() as u32;
    let r2 = radius * radius;
    let (width, height) = costs.dimensions();
    let mut moved = 0;
    let last = waypoints.len() - 1;
    for w in &mut waypoints[1..last] {
        let origin = Point::from(*w);
        let mut best: Option<(u8, f64, u32, u32)> = None;
        for y in w.y.saturating_sub(r)..=(w.y + r).min(height - 1) {
            for x in w.x.saturating_sub(r)..=(w.x + r).min(width - 1) {
                let p = PixelCoord::new(x, y);
                let d2 = origin.distance_squared(p.into());
                if d2 > r2 || !raster::is_set(centerline_mask, p) || !raster::is_set(valid, p) {
                    continue;
                }
                let cost = costs.get_pixel(x, y).0[0];
                if best.is_none_or(|b| {
                    cost.cmp(&b.0)
                        .then(d2.total_cmp(&b.1))
                        .then((y, x).cmp(&(b.2, b.3)))
                        .is_lt()
                }) {
                    best = Some((cost, d2, y, x));
                }
            }
        }
        if let Some((_, _, y, x)) = best {
            let p = PixelCoord::new(x, y);
            if p != *w {
                log::debug!("snapped waypoint ({}, {}) to ({x}, {y})", w.x, w.y);
                *w = p;
                moved += 1;
            }
        }
    }
    moved
}

/// 8-connected least-cost path between two pixels of a cost grid.
///
/// A step between neighbours costs the sum of both pixels' costs,
/// weighted by step length. Returns `None` when either pixel is outside
/// the grid.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn least_cost_path(costs: &GrayImage, start: PixelCoord, end: PixelCoord) -> Option<Vec<PixelCoord>> {
    let (width, height) = costs.dimensions();
    let dims = Dimensions { width, height };
    if !dims.contains(i64::from(start.x), i64::from(start.y))
        || !dims.contains(i64::from(end.x), i64::from(end.y))
    {
        return None;
    }
    let w = width as usize;
    let index = |p: PixelCoord| p.y as usize * w + p.x as usize;
    let coord = |i: usize| PixelCoord::new((i % w) as u32, (i / w) as u32);
    let cost = |i: usize| u64::from(costs.as_raw()[i]);

    let mut dist = vec![u64::MAX; w * height as usize];
    let mut prev = vec![usize::MAX; w * height as usize];
    let mut heap = BinaryHeap::new();
    let (source, target) = (index(start), index(end));
    dist[source] = 0;
    heap.push(Reverse((0u64, source)));

    while let Some(Reverse((d, u))) = heap.pop() {
        if u == target {
            break;
        }
        if d > dist[u] {
            continue;
        }
        let p = coord(u);
        for (dx, dy) in NEIGHBOURS {
            let (nx, ny) = (i64::from(p.x) + dx, i64::from(p.y) + dy);
            if !dims.contains(nx, ny) {
                continue;
            }
            let v = index(PixelCoord::new(nx as u32, ny as u32));
            let weight = if dx != 0 && dy != 0 {
                DIAGONAL_WEIGHT
            } else {
                ORTHOGONAL_WEIGHT
            };
            let next = d + (cost(u) + cost(v)) * weight;
            if next < dist[v] {
                dist[v] = next;
                prev[v] = u;
                heap.push(Reverse((next, v)));
            }
        }
    }

    if dist[target] == u64::MAX {
        return None;
    }
    let mut path = vec![end];
    let mut at = target;
    while at != source {
        at = prev[at];
        path.push(coord(at));
    }
    path.reverse();
    Some(path)
}

/// Sub-window around a waypoint pair, grown by `margin` of its larger
/// side and at least [`MIN_WINDOW_MARGIN`] pixels.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pair_window(a: PixelCoord, b: PixelCoord, margin: f64, dims: Dimensions) -> PixelRect {
    let bbox = PixelRect::bounding([a, b]).unwrap_or_else(|| PixelRect::full(dims));
    let side = f64::from(bbox.width.max(bbox.height));
    let grow = ((side * margin).ceil() as u32).max(MIN_WINDOW_MARGIN);
    bbox.expanded(grow, dims)
}

/// Solve the seam of one patch.
///
/// `preference` and `mask` share one grid; `centerline` is the full
/// (extended) centerline in that grid and fixes the start and end
/// pixels. Returned coordinates are in the same grid.
///
/// # Errors
///
/// Returns [`SeamError::SkeletonFailure`] when the centerline is empty
/// or leaves the grid.
pub fn solve_path(
    preference: &FloatImage,
    mask: &GrayImage,
    centerline: &[PixelCoord],
    config: &MergeConfig,
    patch: usize,
) -> Result<SeamPath, SeamError> {
    let dims = Dimensions::of(mask);
    if centerline.is_empty() {
        return Err(SeamError::skeleton(patch, "empty centerline"));
    }
    if centerline
        .iter()
        .any(|p| !dims.contains(i64::from(p.x), i64::from(p.y)))
    {
        return Err(SeamError::skeleton(patch, "centerline leaves the grid"));
    }

    let window = search_window(mask, centerline, config.crop_threshold);
    let costs = step_costs(&raster::crop(preference, window), &raster::crop(mask, window));
    let valid = raster::crop(mask, window);
    let local: Vec<PixelCoord> = centerline.iter().map(|p| window.to_local(*p)).collect();
    let local_dims = window.dimensions();
    let centerline_mask = rasterize(&local, local_dims);
    log::debug!(
        "patch {patch}: searching {}x{} window at ({}, {})",
        window.width,
        window.height,
        window.x,
        window.y
    );

    let mut waypoints = cull_waypoints(&local, config.segment_count);
    let spacing = waypoints
        .windows(2)
        .map(|w| Point::from(w[0]).distance(w[1].into()))
        .fold(f64::INFINITY, f64::min);
    let snapped = if spacing.is_finite() {
        snap_waypoints(
            &mut waypoints,
            &costs,
            &valid,
            &centerline_mask,
            spacing * config.snap_radius_factor,
        )
    } else {
        0
    };
    drop(centerline_mask);
    drop(valid);
    waypoints.dedup();

    let mut pixels: Vec<PixelCoord> = Vec::new();
    for pair in waypoints.windows(2) {
        let sub = pair_window(pair[0], pair[1], config.window_margin, local_dims);
        let sub_costs = raster::crop(&costs, sub);
        let piece = least_cost_path(&sub_costs, sub.to_local(pair[0]), sub.to_local(pair[1]))
            .ok_or_else(|| SeamError::skeleton(patch, "no path between consecutive waypoints"))?;
        let skip = usize::from(!pixels.is_empty());
        pixels.extend(piece.into_iter().skip(skip).map(|p| sub.to_global(p)));
    }
    if pixels.is_empty() {
        pixels.extend(waypoints.first().copied());
    }
    drop(costs);

    log::debug!(
        "patch {patch}: {} waypoints ({snapped} snapped), path of {} pixels",
        waypoints.len(),
        pixels.len()
    );
    Ok(SeamPath {
        pixels: pixels.into_iter().map(|p| window.to_global(p)).collect(),
        waypoints: waypoints.into_iter().map(|p| window.to_global(p)).collect(),
        window,
        snapped,
    })
}

/// Several patch seams joined into one cutline.
#[derive(Debug, Clone)]
pub struct StitchedCutline {
    /// Union of every patch path and connector.
    pub mask: GrayImage,
    /// Every cutline pixel as one ordered, 8-connected chain.
    pub chain: Vec<PixelCoord>,
    /// Patch indices in stitching order.
    pub order: Vec<usize>,
    /// Straight connectors between consecutive patches.
    pub connectors: Vec<(PixelCoord, PixelCoord)>,
}

/// Join independently solved patch paths into a single cutline.
///
/// Patches are ordered along the axis between the two mutually furthest
/// path endpoints, by the projection of each patch's endpoint centroid
/// (ties by the projection of its start, then by index). Each path is
/// walked from its end nearer the axis origin, and consecutive patches
/// are joined with a straight connector.
#[must_use]
pub fn stitch(paths: &[Vec<PixelCoord>], dimensions: Dimensions) -> StitchedCutline {
    let ends: Vec<Option<(Point, Point)>> = paths
        .iter()
        .map(|p| Some((Point::from(*p.first()?), Point::from(*p.last()?))))
        .collect();
    let all: Vec<Point> = ends.iter().flatten().flat_map(|&(a, b)| [a, b]).collect();
    let axis = furthest_pair(&all)
        .map(|(i, j)| (all[i], all[j].sub(all[i])))
        .filter(|(_, dir)| dir.norm() > f64::EPSILON);
    let project = |p: Point| axis.map_or(0.0, |(origin, dir)| p.sub(origin).dot(dir));

    let key = |k: usize| ends[k].map_or((0.0, 0.0), |(a, b)| (project(a.midpoint(b)), project(a)));
    let mut order: Vec<usize> = (0..paths.len()).filter(|&i| ends[i].is_some()).collect();
    order.sort_by(|&i, &j| {
        let (ki, kj) = (key(i), key(j));
        ki.0.total_cmp(&kj.0)
            .then(ki.1.total_cmp(&kj.1))
            .then(i.cmp(&j))
    });

    let mut chain: Vec<PixelCoord> = Vec::new();
    let mut connectors = Vec::new();
    for &k in &order {
        let path = &paths[k];
        let forward = ends[k].is_none_or(|(a, b)| project(a) <= project(b));
        let mut oriented: Vec<PixelCoord> = path.clone();
        if !forward {
            oriented.reverse();
        }
        if let (Some(&from), Some(&to)) = (chain.last(), oriented.first()) {
            connectors.push((from, to));
            chain.extend(line_pixels(from, to).into_iter().skip(1));
            oriented.remove(0);
        }
        chain.extend(oriented);
    }
    chain.dedup();

    let mut mask = rasterize(&chain, dimensions);
    for path in paths {
        paint(&mut mask, path);
    }
    log::debug!(
        "stitched {} patch path(s) with {} connector(s) into {} pixels",
        order.len(),
        connectors.len(),
        chain.len()
    );
    StitchedCutline {
        mask,
        chain,
        order,
        connectors,
    }
}

fn paint(mask: &mut GrayImage, pixels: &[PixelCoord]) {
    for p in pixels {
        if p.x < mask.width() && p.y < mask.height() {
            mask.put_pixel(p.x, p.y, Luma([ON]));
        }
    }
}
