//! Centerline extraction for one overlap patch.
//!
//! The patch is thinned to a skeleton, turned into a junction graph,
//! cleaned of cycles and short branches, and the two nodes best aligned
//! with the patch's anchors become the ends of a shortest skeleton path.
//! A patch too compact to have a direction of its own is instead routed
//! through the skeleton pixel nearest the middle of its anchors. Both
//! ends are then pushed out along their anchor rays until they leave the
//! union outline, or up to the anchor itself when it lies inside the
//! union.

use geo::Polygon;
use image::GrayImage;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::anchors::TOLERANCE_PIXELS;
use crate::geometry::{densify, line_pixels, outline_distance, ray_exit};
use crate::graph::{Contracted, SkeletonGraph};
use crate::morphology::{FloatImage, boundary_distance, fill_holes, thin};
use crate::raster::{self, ON, PixelRect};
use crate::types::{Dimensions, MergeConfig, PixelCoord, Point, SeamError};

/// Width of one angle bucket in degrees.
const ANGLE_BUCKET_DEGREES: f64 = 10.0;

/// Angle buckets with a finite cost; wider angles are unusable.
const ANGLE_BUCKETS: u32 = 4;

/// Number of distance buckets.
const DISTANCE_BUCKETS: u32 = 10;

/// Skeleton extent, in working pixels, that always counts as compact.
const COMPACT_EXTENT: f64 = 3.0;

/// Graph sizes through the cleanup stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonStats {
    /// Skeleton pixels in the largest component.
    pub pixels: usize,
    /// Junctions before pruning.
    pub nodes_before: usize,
    /// Chains before pruning.
    pub edges_before: usize,
    /// Junctions after pruning and reconnection.
    pub nodes_after: usize,
    /// Chains after pruning and reconnection.
    pub edges_after: usize,
    /// Cycles broken.
    pub cycles_removed: usize,
    /// Pruning edits applied.
    pub pruned: usize,
    /// Downsample factor applied before thinning.
    pub downsample: u32,
}

/// Centerline of one patch, in the pixel grid of the shared frame.
#[derive(Debug, Clone)]
pub struct Centerline {
    /// Skeleton path between the two chosen terminals.
    pub path: Vec<PixelCoord>,
    /// `path` extended at both ends to the union outline.
    pub full: Vec<PixelCoord>,
    /// Graph statistics.
    pub stats: SkeletonStats,
}

impl Centerline {
    /// First pixel of the extended centerline.
    #[must_use]
    pub fn start(&self) -> Option<PixelCoord> {
        self.full.first().copied()
    }

    /// Last pixel of the extended centerline.
    #[must_use]
    pub fn end(&self) -> Option<PixelCoord> {
        self.full.last().copied()
    }

    /// Rasterize the extended centerline into a mask of `dimensions`.
    #[must_use]
    pub fn mask(&self, dimensions: Dimensions) -> GrayImage {
        let mut out = GrayImage::new(dimensions.width, dimensions.height);
        for p in &self.full {
            if p.x < dimensions.width && p.y < dimensions.height {
                out.put_pixel(p.x, p.y, image::Luma([ON]));
            }
        }
        out
    }
}

/// Extract the centerline of a patch.
///
/// * `patch` is the patch mask cropped to `bbox`, a rectangle in a frame
///   of `frame` dimensions.
/// * `anchors` (entry, exit) and `outline` are in that frame's index
///   space (pixel centres on integers).
///
/// # Errors
///
/// Returns [`SeamError::SkeletonFailure`] when the patch has no usable
/// skeleton or no finite-cost terminal pair, and
/// [`SeamError::NonConvergence`] when graph cleanup hits its cap.
pub fn extract_centerline(
    patch: &GrayImage,
    bbox: PixelRect,
    frame: Dimensions,
    anchors: [Point; 2],
    outline: &Polygon<f64>,
    config: &MergeConfig,
    index: usize,
) -> Result<Centerline, SeamError> {
    let longest = patch.width().max(patch.height());
    let factor = longest.div_ceil(config.working_resolution.max(1)).max(1);
    let working = fill_holes(&raster::downsample_max(patch, factor));

    let mut skeleton = SkeletonGraph::from_mask(&thin(&working));
    skeleton.keep_largest_component();
    if skeleton.node_count() == 0 {
        return Err(SeamError::skeleton(index, "patch thins to an empty skeleton"));
    }
    let boundary = boundary_distance(&working);

    // Anchors in the working grid of the cropped patch.
    let scale = f64::from(factor);
    let to_working = |p: Point| {
        Point::new(
            (p.x - f64::from(bbox.x) + 0.5) / scale - 0.5,
            (p.y - f64::from(bbox.y) + 0.5) / scale - 0.5,
        )
    };
    let (entry, exit) = (to_working(anchors[0]), to_working(anchors[1]));

    let (working_path, stats) = if is_compact(&skeleton, &boundary) {
        let pivot = skeleton
            .nearest_pixel(entry.midpoint(exit))
            .ok_or_else(|| SeamError::skeleton(index, "patch thins to an empty skeleton"))?;
        log::debug!(
            "patch {index}: compact skeleton of {} pixels, routing through {pivot:?}",
            skeleton.node_count()
        );
        let stats = SkeletonStats {
            pixels: skeleton.node_count(),
            downsample: factor,
            ..SkeletonStats::default()
        };
        (vec![pivot], stats)
    } else {
        let cycles_removed = skeleton.remove_cycles(&boundary, config.max_iterations)?;

        let mut graph = skeleton.contract();
        let (nodes_before, edges_before) = (graph.graph.node_count(), graph.graph.edge_count());
        let pruned = graph.prune(config.prune_threshold, config.max_iterations)?;
        graph.reconnect_leaves();

        let (start, end) = select_terminals(&graph, entry, exit)
            .map_err(|reason| SeamError::skeleton(index, reason))?;
        let route = skeleton
            .shortest_path(graph.graph[start].source, graph.graph[end].source)
            .ok_or_else(|| SeamError::skeleton(index, "terminals are not connected"))?;

        let stats = SkeletonStats {
            pixels: skeleton.node_count(),
            nodes_before,
            edges_before,
            nodes_after: graph.graph.node_count(),
            edges_after: graph.graph.edge_count(),
            cycles_removed,
            pruned,
            downsample: factor,
        };
        log::debug!("patch {index}: skeleton {stats:?}");
        (route, stats)
    };

    let crop_dims = bbox.dimensions();
    let vertices: Vec<PixelCoord> = working_path
        .iter()
        .filter_map(|p| {
            let full = Point::new(
                f64::from(p.x * factor + factor / 2),
                f64::from(p.y * factor + factor / 2),
            );
            PixelCoord::clipped(full, crop_dims).map(|local| bbox.to_global(local))
        })
        .collect();
    let path = densify(&vertices);
    let tolerance = TOLERANCE_PIXELS * f64::from(config.anchor_downsample.max(1));
    let full = extend_ends(&path, anchors, outline, frame, tolerance);

    Ok(Centerline { path, full, stats })
}

/// Whether the skeleton spans no more than the patch's inscribed radius.
/// Such a patch has no direction of its own: thinning a square leaves a
/// dot.
fn is_compact(skeleton: &SkeletonGraph, boundary: &FloatImage) -> bool {
    let Some(extent) = PixelRect::bounding(skeleton.pixels()) else {
        return false;
    };
    let radius = boundary.pixels().map(|p| p.0[0]).fold(0.0, f64::max);
    f64::from(extent.width.max(extent.height)) <= radius.max(COMPACT_EXTENT)
}

/// Cost of an edge direction against the anchor axis, or `None` when the
/// angle is too wide. Both orientations of the edge are considered.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn angle_cost(edge: Point, axis: Point) -> Option<u32> {
    let (el, al) = (edge.norm(), axis.norm());
    if al < f64::EPSILON {
        return Some(1);
    }
    if el < f64::EPSILON {
        return None;
    }
    let cos = (edge.dot(axis).abs() / (el * al)).clamp(0.0, 1.0);
    let bucket = (cos.acos().to_degrees() / ANGLE_BUCKET_DEGREES).floor() as u32;
    (bucket < ANGLE_BUCKETS).then_some(bucket + 1)
}

/// Per-node cost of serving as the terminal for `anchor`, or `None`
/// when no incident edge is aligned with `axis`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn terminal_costs(graph: &Contracted, anchor: Point, axis: Point) -> Vec<(NodeIndex, Option<u32>)> {
    let max_distance = graph
        .graph
        .node_indices()
        .map(|n| Point::from(graph.graph[n].pixel).distance(anchor))
        .fold(0.0, f64::max);

    graph
        .graph
        .node_indices()
        .map(|n| {
            let here = Point::from(graph.graph[n].pixel);
            let angle = graph
                .graph
                .edges(n)
                .filter_map(|e| {
                    let other = if e.source() == n { e.target() } else { e.source() };
                    angle_cost(Point::from(graph.graph[other].pixel).sub(here), axis)
                })
                .min();
            let degree = if graph.degree(n) >= 3 { 1 } else { 2 };
            let distance = if max_distance > 0.0 {
                ((here.distance(anchor) / max_distance * f64::from(DISTANCE_BUCKETS)).floor() as u32)
                    .min(DISTANCE_BUCKETS - 1)
            } else {
                0
            };
            (n, angle.map(|a| a + degree + distance))
        })
        .collect()
}

/// Choose the start and end junctions for the entry and exit anchors.
///
/// Every junction is scored on alignment of its edges with the
/// entry-to-exit axis (10 degree buckets costing 1 to 4), its degree
/// (1 for branch points, 2 otherwise), and its distance to the anchor
/// (0 to 9 by fraction of the furthest junction). The lowest finite total
/// wins, ties going to the lowest pixel. The exit anchor cannot reuse the
/// entry's junction. When the anchors coincide every edge counts as
/// aligned.
///
/// # Errors
///
/// Returns a reason string when either anchor has no finite-cost junction.
pub fn select_terminals(
    graph: &Contracted,
    entry: Point,
    exit: Point,
) -> Result<(NodeIndex, NodeIndex), String> {
    let axis = exit.sub(entry);
    if axis.norm() < f64::EPSILON {
        log::debug!("anchors coincide, ignoring edge alignment");
    }
    let pick = |anchor: Point, exclude: Option<NodeIndex>| {
        terminal_costs(graph, anchor, axis)
            .into_iter()
            .filter(|(n, _)| Some(*n) != exclude)
            .filter_map(|(n, cost)| cost.map(|c| (c, graph.graph[n].pixel, n)))
            .min()
            .map(|(_, _, n)| n)
    };
    let start = pick(entry, None).ok_or("no aligned skeleton node for the entry anchor")?;
    let end = pick(exit, Some(start)).ok_or("no aligned skeleton node for the exit anchor")?;
    Ok((start, end))
}

/// Extend both ends of `path` along the ray from its second-from-end
/// point through the end's anchor, up to where the ray leaves `outline`.
/// An anchor further than `tolerance` from every ring of `outline` lies
/// between patches, and the extension stops at the anchor instead.
fn extend_ends(
    path: &[PixelCoord],
    anchors: [Point; 2],
    outline: &Polygon<f64>,
    frame: Dimensions,
    tolerance: f64,
) -> Vec<PixelCoord> {
    let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
        return Vec::new();
    };
    let inner_first = path.get(1).copied().unwrap_or(first);
    let inner_last = path.len().checked_sub(2).map_or(last, |i| path[i]);

    let head = extension(first, inner_first, anchors[0], outline, frame, tolerance);
    let tail = extension(last, inner_last, anchors[1], outline, frame, tolerance);

    let mut full: Vec<PixelCoord> = head.into_iter().rev().collect();
    full.extend_from_slice(path);
    full.extend(tail);
    full
}

/// Pixels beyond `end` (exclusive) reaching the outline exit or the
/// interior anchor, or empty when that target is not past `end`.
fn extension(
    end: PixelCoord,
    inner: PixelCoord,
    anchor: Point,
    outline: &Polygon<f64>,
    frame: Dimensions,
    tolerance: f64,
) -> Vec<PixelCoord> {
    let origin = Point::from(inner);
    let reach = if outline_distance(outline, anchor) > tolerance {
        anchor
    } else {
        let Some(exit) = ray_exit(outline, origin, anchor) else {
            return Vec::new();
        };
        exit
    };
    let dir = anchor.sub(origin);
    if reach.sub(origin).dot(dir) <= Point::from(end).sub(origin).dot(dir) {
        return Vec::new();
    }
    let Some(target) = PixelCoord::clipped(reach, frame) else {
        return Vec::new();
    };
    line_pixels(end, target).into_iter().skip(1).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use geo::polygon;
    use image::Luma;

    fn band(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if x >= x0 && x < x1 && y >= y0 && y < y1 { ON } else { 0 }])
        })
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    #[test]
    fn angle_buckets() {
        let axis = Point::new(1.0, 0.0);
        assert_eq!(angle_cost(Point::new(5.0, 0.0), axis), Some(1));
        assert_eq!(angle_cost(Point::new(-5.0, 0.0), axis), Some(1));
        assert_eq!(angle_cost(Point::new(1.0, 0.3), axis), Some(2));
        assert_eq!(angle_cost(Point::new(1.0, 0.8), axis), Some(4));
        assert_eq!(angle_cost(Point::new(0.0, 1.0), axis), None);
        assert_eq!(angle_cost(Point::new(0.0, 1.0), Point::new(0.0, 0.0)), Some(1));
    }

    #[test]
    fn straight_band_centerline() {
        // 5 x 100 band inside a 120 x 25 frame.
        let frame = Dimensions {
            width: 120,
            height: 25,
        };
        let mask = band(120, 25, 10, 10, 110, 15);
        let bbox = PixelRect::bounding(raster::set_pixels(&mask)).unwrap();
        let outline = rect(9.5, 9.5, 109.5, 14.5);
        let anchors = [Point::new(9.5, 12.0), Point::new(109.5, 12.0)];
        let c = extract_centerline(
            &raster::crop(&mask, bbox),
            bbox,
            frame,
            anchors,
            &outline,
            &MergeConfig::default(),
            0,
        )
        .unwrap();

        assert!(c.path.iter().all(|p| p.y == 12));
        assert!(c.path.windows(2).all(|w| w[0].touches(w[1])));
        let (start, end) = (c.start().unwrap(), c.end().unwrap());
        assert_eq!(start.y, 12);
        assert_eq!(end.y, 12);
        assert!(start.x.abs_diff(10) <= 1, "{start:?}");
        assert!(end.x.abs_diff(109) <= 1, "{end:?}");
        assert!(c.full.windows(2).all(|w| w[0].touches(w[1])));
    }

    #[test]
    fn downsampled_band_is_rescaled() {
        let frame = Dimensions {
            width: 120,
            height: 25,
        };
        let mask = band(120, 25, 10, 8, 110, 17);
        let bbox = PixelRect::bounding(raster::set_pixels(&mask)).unwrap();
        let outline = rect(9.5, 7.5, 109.5, 16.5);
        let anchors = [Point::new(9.5, 12.0), Point::new(109.5, 12.0)];
        let config = MergeConfig {
            working_resolution: 50,
            ..MergeConfig::default()
        };
        let c = extract_centerline(
            &raster::crop(&mask, bbox),
            bbox,
            frame,
            anchors,
            &outline,
            &config,
            3,
        )
        .unwrap();
        assert_eq!(c.stats.downsample, 2);
        assert!(c.full.windows(2).all(|w| w[0].touches(w[1])));
        assert!(c.full.iter().all(|p| p.y.abs_diff(12) <= 1));
        assert!(c.start().unwrap().x <= 11);
        assert!(c.end().unwrap().x >= 108);
    }

    #[test]
    fn empty_patch_fails() {
        let err = extract_centerline(
            &GrayImage::new(5, 5),
            PixelRect::full(Dimensions {
                width: 5,
                height: 5,
            }),
            Dimensions {
                width: 5,
                height: 5,
            },
            [Point::new(0.0, 0.0), Point::new(4.0, 4.0)],
            &rect(0.0, 0.0, 4.0, 4.0),
            &MergeConfig::default(),
            7,
        )
        .unwrap_err();
        assert!(matches!(err, SeamError::SkeletonFailure { patch: 7, .. }));
    }

    #[test]
    fn terminal_selection_is_deterministic() {
        let mut px = band(40, 40, 0, 0, 0, 0);
        for x in 0..40 {
            px.put_pixel(x, 20, Luma([ON]));
        }
        for y in 0..20 {
            px.put_pixel(20, y, Luma([ON]));
        }
        let graph = SkeletonGraph::from_mask(&px).contract();
        let entry = Point::new(0.0, 20.0);
        let exit = Point::new(39.0, 20.0);
        let first = select_terminals(&graph, entry, exit).unwrap();
        let second = select_terminals(&graph.clone(), entry, exit).unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.graph[first.0].pixel, PixelCoord::new(0, 20));
        assert_eq!(graph.graph[first.1].pixel, PixelCoord::new(39, 20));
    }

    #[test]
    fn misaligned_graph_has_no_terminals() {
        let mut px = GrayImage::new(10, 10);
        for y in 0..10 {
            px.put_pixel(4, y, Luma([ON]));
        }
        let graph = SkeletonGraph::from_mask(&px).contract();
        let err = select_terminals(&graph, Point::new(0.0, 5.0), Point::new(9.0, 5.0));
        assert!(err.is_err());
    }

    #[test]
    fn square_patch_routes_through_centre() {
        // A square thins to a dot; the centerline crosses it corner to
        // corner anyway.
        let frame = Dimensions {
            width: 25,
            height: 25,
        };
        let mask = GrayImage::from_pixel(25, 25, Luma([ON]));
        let c = extract_centerline(
            &mask,
            PixelRect::full(frame),
            frame,
            [Point::new(-0.5, -0.5), Point::new(24.5, 24.5)],
            &rect(-0.5, -0.5, 24.5, 24.5),
            &MergeConfig::default(),
            2,
        )
        .unwrap();
        assert_eq!(c.stats.nodes_before, 0);
        assert_eq!(c.start(), Some(PixelCoord::new(0, 0)));
        assert_eq!(c.end(), Some(PixelCoord::new(24, 24)));
        assert!(c.full.windows(2).all(|w| w[0].touches(w[1])));
        assert!(
            c.full
                .iter()
                .any(|p| Point::from(*p).distance(Point::new(12.0, 12.0)) <= 2.0)
        );
    }

    #[test]
    fn extension_reaches_outline() {
        let outline = rect(-0.5, -0.5, 19.5, 9.5);
        let frame = Dimensions {
            width: 20,
            height: 10,
        };
        let path: Vec<PixelCoord> = (5..15).map(|x| PixelCoord::new(x, 4)).collect();
        let full = extend_ends(
            &path,
            [Point::new(-0.5, 4.0), Point::new(19.5, 4.0)],
            &outline,
            frame,
            1.5,
        );
        assert_eq!(full.first(), Some(&PixelCoord::new(0, 4)));
        assert_eq!(full.last(), Some(&PixelCoord::new(19, 4)));
        assert_eq!(full.len(), 20);
    }

    #[test]
    fn extension_stops_at_interior_anchor() {
        let outline = rect(-0.5, -0.5, 39.5, 19.5);
        let frame = Dimensions {
            width: 40,
            height: 20,
        };
        let path: Vec<PixelCoord> = (5..15).map(|x| PixelCoord::new(x, 10)).collect();
        let full = extend_ends(
            &path,
            [Point::new(-0.5, 10.0), Point::new(25.0, 10.0)],
            &outline,
            frame,
            6.0,
        );
        assert_eq!(full.first(), Some(&PixelCoord::new(0, 10)));
        assert_eq!(full.last(), Some(&PixelCoord::new(25, 10)));
        assert_eq!(full.len(), 26);
        assert!(full.iter().all(|p| p.y == 10));
    }
}
