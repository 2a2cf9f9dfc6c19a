//! Geometry primitives shared by the anchor finder, the centerline
//! extractor, and the path solver.
//!
//! Polygons are [`geo`] polygons; everything else uses the crate's own
//! [`Point`] and [`Polyline`]. The [`Geometry`] enum is the closed set of
//! shapes an outline intersection can produce.

use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{BoundingRect, Contains, Coord, Line};
use imageproc::drawing::BresenhamLineIter;

use crate::types::{PixelCoord, Point, Polyline};

/// A tagged shape in world or pixel space.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single location.
    Point(Point),
    /// An ordered run of points.
    LineString(Polyline),
    /// A polygon with an exterior ring and optional holes.
    Polygon(geo::Polygon<f64>),
}

impl Geometry {
    /// The two extreme points of the shape: a point twice, the ends of a
    /// line string, or the first exterior vertex of a polygon twice.
    #[must_use]
    pub fn endpoints(&self) -> Option<(Point, Point)> {
        match self {
            Self::Point(p) => Some((*p, *p)),
            Self::LineString(line) => Some((*line.first()?, *line.last()?)),
            Self::Polygon(polygon) => {
                let first = polygon.exterior().0.first()?;
                let p = from_coord(*first);
                Some((p, p))
            }
        }
    }

    /// Representative location: the point itself, the midpoint of a line
    /// string's ends, or the polygon's centroid.
    #[must_use]
    pub fn representative(&self) -> Option<Point> {
        match self {
            Self::Point(p) => Some(*p),
            Self::LineString(_) => {
                let (a, b) = self.endpoints()?;
                Some(a.midpoint(b))
            }
            Self::Polygon(polygon) => {
                use geo::Centroid;
                polygon.centroid().map(|c| Point::new(c.x(), c.y()))
            }
        }
    }
}

/// Convert a point to a `geo` coordinate.
#[must_use]
pub const fn to_coord(p: Point) -> Coord<f64> {
    Coord { x: p.x, y: p.y }
}

/// Convert a `geo` coordinate to a point.
#[must_use]
pub const fn from_coord(c: Coord<f64>) -> Point {
    Point::new(c.x, c.y)
}

/// Distance from `p` to the segment `a`-`b`.
#[must_use]
pub fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b.sub(a);
    let len_sq = ab.dot(ab);
    if len_sq < f64::EPSILON {
        return p.distance(a);
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(t.mul_add(ab.x, a.x), t.mul_add(ab.y, a.y));
    p.distance(proj)
}

/// Distance from `p` to the nearest edge of any ring of `polygon`.
/// `f64::INFINITY` for a polygon without edges.
#[must_use]
pub fn outline_distance(polygon: &geo::Polygon<f64>, p: Point) -> f64 {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .flat_map(geo::LineString::lines)
        .map(|edge| segment_distance(p, from_coord(edge.start), from_coord(edge.end)))
        .fold(f64::INFINITY, f64::min)
}

/// Indices of the two mutually furthest points, lowest indices first on
/// ties. `None` when fewer than two points are given.
#[must_use]
pub fn furthest_pair(points: &[Point]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let d = points[i].distance_squared(points[j]);
            if best.is_none_or(|(_, _, bd)| d > bd) {
                best = Some((i, j, d));
            }
        }
    }
    best.map(|(i, j, _)| (i, j))
}

/// Where a ray leaves a polygon.
///
/// The ray starts at `origin` and passes through `through`. Returns the
/// first boundary crossing after which the ray is outside the polygon,
/// or `None` if the ray is degenerate or never leaves it.
#[must_use]
pub fn ray_exit(polygon: &geo::Polygon<f64>, origin: Point, through: Point) -> Option<Point> {
    let dir = through.sub(origin);
    let dir_len = dir.norm();
    if dir_len < f64::EPSILON {
        return None;
    }
    let rect = polygon.bounding_rect()?;
    let reach = rect.width().hypot(rect.height())
        + origin.distance(from_coord(rect.center()))
        + 1.0;
    let scale = reach / dir_len;
    let far = Point::new(scale.mul_add(dir.x, origin.x), scale.mul_add(dir.y, origin.y));
    let ray = Line::new(to_coord(origin), to_coord(far));

    let mut hits: Vec<Point> = Vec::new();
    for edge in polygon.exterior().lines() {
        match line_intersection(ray, edge) {
            Some(LineIntersection::SinglePoint { intersection, .. }) => {
                hits.push(from_coord(intersection));
            }
            Some(LineIntersection::Collinear { intersection }) => {
                hits.push(from_coord(intersection.start));
                hits.push(from_coord(intersection.end));
            }
            None => {}
        }
    }
    hits.sort_by(|a, b| origin.distance_squared(*a).total_cmp(&origin.distance_squared(*b)));

    let step = (reach * 1e-7).max(1e-9) / dir_len;
    hits.into_iter().find(|hit| {
        let ahead = geo::Point::new(step.mul_add(dir.x, hit.x), step.mul_add(dir.y, hit.y));
        !polygon.contains(&ahead)
    })
}

/// Pixels on the straight line from `a` to `b`, both ends included, in
/// order from `a`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn line_pixels(a: PixelCoord, b: PixelCoord) -> Vec<PixelCoord> {
    let start = (a.x as f32, a.y as f32);
    let end = (b.x as f32, b.y as f32);
    let mut pixels: Vec<PixelCoord> = BresenhamLineIter::new(start, end)
        .filter(|&(x, y)| x >= 0 && y >= 0)
        .map(|(x, y)| PixelCoord::new(x as u32, y as u32))
        .collect();
    if pixels.first() != Some(&a) && pixels.last() == Some(&a) {
        pixels.reverse();
    }
    if pixels.first() != Some(&a) {
        pixels.insert(0, a);
    }
    if pixels.last() != Some(&b) {
        pixels.push(b);
    }
    pixels
}

/// Join consecutive vertices with straight pixel runs so the result is
/// 8-connected. Repeated pixels at the joins are dropped.
#[must_use]
pub fn densify(vertices: &[PixelCoord]) -> Vec<PixelCoord> {
    let mut out: Vec<PixelCoord> = Vec::with_capacity(vertices.len());
    for pair in vertices.windows(2) {
        for p in line_pixels(pair[0], pair[1]) {
            if out.last() != Some(&p) {
                out.push(p);
            }
        }
    }
    if out.is_empty() {
        out.extend(vertices.first().copied());
    }
    out
}
