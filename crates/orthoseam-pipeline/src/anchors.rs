//! Boundary intersection finder: where the two footprint outlines cross.
//!
//! Footprints are polygonized at low resolution along their pixel
//! edges, the two exteriors are intersected, and each overlap
//! patch receives the pair of crossing points that bracket it.
//!
//! # Algorithm
//!
//! 1. Downsample both footprints by `anchor_downsample` and keep the
//!    largest polygon of each.
//! 2. Intersect the exteriors edge by edge through an R\*-tree. Collinear
//!    pieces are merged into line strings with a `UnionFind`; isolated
//!    crossings stay points.
//! 3. If the polygons only touch, every crossing collapses to one shared
//!    centroid, used twice.
//! 4. Otherwise each interior-intersection polygon collects the crossings
//!    lying on its exterior. Two candidates are used as they are; more
//!    are reduced to the mutually furthest pair.

use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, BooleanOps, Contains, Line, LineString, Polygon};
use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, Contour, find_contours};
use petgraph::unionfind::UnionFind;
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject};

use crate::geometry::{Geometry, from_coord, furthest_pair, segment_distance};
use crate::overlap::OverlapPatch;
use crate::raster::{self, Affine, BinaryMask, ON};
use crate::types::{AnchorPair, MergeConfig, Point, Polyline, SeamError};

/// Crossing tolerance in low-resolution pixels.
pub(crate) const TOLERANCE_PIXELS: f64 = 1.5;

/// Anchors for every patch plus the outlines they came from.
#[derive(Debug, Clone)]
pub struct AnchorSet {
    /// One anchor pair per overlap patch, in patch order, world space.
    pub pairs: Vec<AnchorPair>,
    /// Outline of the union of both footprints, world space.
    pub union_outline: Polygon<f64>,
    /// Pieces of the two outlines' intersection, world space.
    pub crossings: Vec<Geometry>,
}

/// Find the anchor pair of each overlap patch.
///
/// `first` and `second` are the full-resolution footprints in the shared
/// frame the patches were cut from.
///
/// # Errors
///
/// Returns [`SeamError::InsufficientAnchors`] for the first patch with
/// fewer than two candidate crossings, or when a footprint cannot be
/// polygonized at all.
pub fn find_anchors(
    first: &BinaryMask,
    second: &BinaryMask,
    patches: &[OverlapPatch],
    config: &MergeConfig,
) -> Result<AnchorSet, SeamError> {
    let factor = config.anchor_downsample.max(1);
    let low_transform = first.transform.scaled(f64::from(factor));
    let tolerance = TOLERANCE_PIXELS * low_transform.a.abs().max(low_transform.e.abs());

    let no_outline = || SeamError::InsufficientAnchors { patch: 0, found: 0 };
    let poly_a = largest_polygon(
        &raster::downsample_nearest(&first.image, factor),
        low_transform,
    )
    .ok_or_else(no_outline)?;
    let poly_b = largest_polygon(
        &raster::downsample_nearest(&second.image, factor),
        low_transform,
    )
    .ok_or_else(no_outline)?;

    let crossings = exterior_crossings(&poly_a, &poly_b, tolerance);
    log::debug!("outline intersection has {} piece(s)", crossings.len());

    let union_outline = poly_a
        .union(&poly_b)
        .into_iter()
        .max_by(|p, q| p.unsigned_area().total_cmp(&q.unsigned_area()))
        .unwrap_or_else(|| poly_a.clone());

    let interiors: Vec<Polygon<f64>> = poly_a
        .intersection(&poly_b)
        .into_iter()
        .filter(|p| p.unsigned_area() > 0.0)
        .collect();

    let pairs = if interiors.is_empty() {
        let point = touch_point(&crossings).ok_or(SeamError::InsufficientAnchors {
            patch: 0,
            found: 0,
        })?;
        log::debug!("footprints only touch, single anchor at ({:.2}, {:.2})", point.x, point.y);
        vec![
            AnchorPair {
                entry: point,
                exit: point,
            };
            patches.len()
        ]
    } else {
        patches
            .iter()
            .enumerate()
            .map(|(index, patch)| {
                let centroid = first.transform.index_to_world(patch.centroid);
                let polygon = matching_polygon(&interiors, centroid);
                anchors_on(polygon, &crossings, tolerance, index)
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(AnchorSet {
        pairs,
        union_outline,
        crossings,
    })
}

/// Largest polygon outlining a mask's set pixels, with its holes, in the
/// frame of `transform`.
///
/// The outline follows pixel edges rather than pixel centres: it is
/// traced on the lattice of pixel corners that touch a set pixel. The
/// lattice carries one empty corner of padding on every side, so regions
/// reaching the image edge still produce outer borders. Concave corners
/// are cut by a half-pixel diagonal and holes one pixel wide close up.
#[must_use]
pub fn largest_polygon(mask: &GrayImage, transform: Affine) -> Option<Polygon<f64>> {
    let contours: Vec<Contour<u32>> = find_contours(&corner_lattice(mask));
    let ring = |c: &Contour<u32>| -> LineString<f64> {
        c.points
            .iter()
            .map(|p| {
                let w = transform.apply(Point::new(f64::from(p.x) - 1.0, f64::from(p.y) - 1.0));
                (w.x, w.y)
            })
            .collect::<Vec<_>>()
            .into()
    };

    contours
        .iter()
        .enumerate()
        .filter(|(_, c)| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|(i, outer)| {
            let holes = contours
                .iter()
                .filter(|c| {
                    c.border_type == BorderType::Hole && c.parent == Some(i) && c.points.len() >= 3
                })
                .map(ring)
                .collect();
            Polygon::new(ring(outer), holes)
        })
        .max_by(|p, q| p.unsigned_area().total_cmp(&q.unsigned_area()))
}

/// Corner lattice of a mask: lattice pixel `(x, y)` is corner
/// `(x - 1, y - 1)` of the pixel grid and is set when any of the four
/// pixels sharing that corner is set.
fn corner_lattice(mask: &GrayImage) -> GrayImage {
    let set = |x: Option<u32>, y: Option<u32>| match (x, y) {
        (Some(x), Some(y)) => mask.get_pixel_checked(x, y).is_some_and(|p| p.0[0] != 0),
        _ => false,
    };
    GrayImage::from_fn(mask.width() + 3, mask.height() + 3, |x, y| {
        let columns = [x.checked_sub(2), x.checked_sub(1)];
        let rows = [y.checked_sub(2), y.checked_sub(1)];
        let on = columns
            .iter()
            .any(|&px| rows.iter().any(|&py| set(px, py)));
        Luma([if on { ON } else { 0 }])
    })
}

/// Intersect two exteriors into points and merged collinear runs.
fn exterior_crossings(a: &Polygon<f64>, b: &Polygon<f64>, tolerance: f64) -> Vec<Geometry> {
    let edges: Vec<GeomWithData<Line<f64>, usize>> = b
        .exterior()
        .lines()
        .enumerate()
        .map(|(i, line)| GeomWithData::new(line, i))
        .collect();
    let tree = RTree::bulk_load(edges);

    let mut points: Vec<Point> = Vec::new();
    let mut runs: Vec<(Point, Point)> = Vec::new();
    for edge in a.exterior().lines() {
        for candidate in tree.locate_in_envelope_intersecting(&edge.envelope()) {
            match line_intersection(edge, *candidate.geom()) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    points.push(from_coord(intersection));
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    let (s, e) = (from_coord(intersection.start), from_coord(intersection.end));
                    if s.distance(e) > f64::EPSILON {
                        runs.push((s, e));
                    } else {
                        points.push(s);
                    }
                }
                None => {}
            }
        }
    }

    let mut pieces = merge_runs(&runs, tolerance);
    let loose: Vec<Point> = points
        .into_iter()
        .filter(|p| !runs.iter().any(|&(s, e)| segment_distance(*p, s, e) <= tolerance))
        .collect();
    pieces.extend(cluster(&loose, tolerance).into_iter().map(Geometry::Point));
    pieces
}

/// Merge collinear runs whose ends are within `tolerance` into line
/// strings spanning their two furthest endpoints.
fn merge_runs(runs: &[(Point, Point)], tolerance: f64) -> Vec<Geometry> {
    let mut groups = UnionFind::<usize>::new(runs.len());
    for i in 0..runs.len() {
        for j in (i + 1)..runs.len() {
            let (a, b) = (runs[i], runs[j]);
            let near = [a.0, a.1]
                .iter()
                .any(|p| p.distance(b.0) <= tolerance || p.distance(b.1) <= tolerance);
            if near {
                groups.union(i, j);
            }
        }
    }

    let labels = groups.into_labeling();
    let mut members: Vec<(usize, Vec<Point>)> = Vec::new();
    for (i, &(s, e)) in runs.iter().enumerate() {
        match members.iter_mut().find(|(l, _)| *l == labels[i]) {
            Some((_, pts)) => pts.extend([s, e]),
            None => members.push((labels[i], vec![s, e])),
        }
    }

    members
        .into_iter()
        .filter_map(|(_, pts)| {
            let (i, j) = furthest_pair(&pts)?;
            Some(Geometry::LineString(Polyline::new(vec![pts[i], pts[j]])))
        })
        .collect()
}

/// Greedy clustering: each point joins the first cluster whose seed is
/// within `tolerance`. Returns cluster means.
#[allow(clippy::cast_precision_loss)]
fn cluster(points: &[Point], tolerance: f64) -> Vec<Point> {
    let mut clusters: Vec<(Point, Point, usize)> = Vec::new();
    for &p in points {
        match clusters.iter_mut().find(|(seed, _, _)| seed.distance(p) <= tolerance) {
            Some((_, sum, n)) => {
                sum.x += p.x;
                sum.y += p.y;
                *n += 1;
            }
            None => clusters.push((p, p, 1)),
        }
    }
    clusters
        .into_iter()
        .map(|(_, sum, n)| Point::new(sum.x / n as f64, sum.y / n as f64))
        .collect()
}

/// Single anchor for footprints that only touch: the centroid of every
/// crossing's representative point.
#[allow(clippy::cast_precision_loss)]
fn touch_point(crossings: &[Geometry]) -> Option<Point> {
    let reps: Vec<Point> = crossings.iter().filter_map(Geometry::representative).collect();
    if reps.is_empty() {
        return None;
    }
    let n = reps.len() as f64;
    let (sx, sy) = reps.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

/// Interior polygon containing `centroid`, or the nearest one.
fn matching_polygon(interiors: &[Polygon<f64>], centroid: Point) -> &Polygon<f64> {
    let inside = geo::Point::new(centroid.x, centroid.y);
    if let Some(p) = interiors.iter().find(|p| p.contains(&inside)) {
        return p;
    }
    let mut best = &interiors[0];
    let mut best_d = f64::INFINITY;
    for polygon in interiors {
        let d = exterior_distance(polygon, centroid);
        if d < best_d {
            best_d = d;
            best = polygon;
        }
    }
    best
}

fn exterior_distance(polygon: &Polygon<f64>, p: Point) -> f64 {
    polygon
        .exterior()
        .lines()
        .map(|l: Line<f64>| segment_distance(p, from_coord(l.start), from_coord(l.end)))
        .fold(f64::INFINITY, f64::min)
}

/// Anchor pair for one interior-intersection polygon.
fn anchors_on(
    polygon: &Polygon<f64>,
    crossings: &[Geometry],
    tolerance: f64,
    patch: usize,
) -> Result<AnchorPair, SeamError> {
    let on_exterior = |p: Point| exterior_distance(polygon, p) <= tolerance;

    let mut candidates: Vec<Point> = Vec::new();
    for crossing in crossings {
        let found = match crossing {
            Geometry::Point(p) => on_exterior(*p).then_some(*p),
            Geometry::LineString(_) => {
                crossing
                    .endpoints()
                    .and_then(|(s, e)| match (on_exterior(s), on_exterior(e)) {
                        (true, true) => Some(s.midpoint(e)),
                        (true, false) => Some(s),
                        (false, true) => Some(e),
                        (false, false) => None,
                    })
            }
            Geometry::Polygon(_) => None,
        };
        if let Some(p) = found
            && !candidates.iter().any(|c| c.distance(p) <= tolerance)
        {
            candidates.push(p);
        }
    }

    match candidates.len() {
        0 | 1 => Err(SeamError::InsufficientAnchors {
            patch,
            found: candidates.len(),
        }),
        2 => Ok(AnchorPair {
            entry: candidates[0],
            exit: candidates[1],
        }),
        n => {
            let (i, j) = furthest_pair(&candidates).ok_or(SeamError::InsufficientAnchors {
                patch,
                found: n,
            })?;
            log::debug!("patch {patch}: reduced {n} anchor candidates to the furthest pair");
            Ok(AnchorPair {
                entry: candidates[i],
                exit: candidates[j],
            })
        }
    }
}
