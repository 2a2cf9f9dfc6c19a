//! Shared types for the orthoseam cutline pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference masks
/// without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can hand colour rasters
/// to the pipeline without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point, either in world space or in continuous pixel space.
///
/// Which space a value lives in is stated by the function that
/// produces or consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (world easting, or pixels from left edge).
    pub x: f64,
    /// Vertical position (world northing, or pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Component-wise difference `self - other`.
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    /// Dot product, treating both points as vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x.mul_add(other.x, self.y * other.y)
    }

    /// Vector length.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Midpoint between two points.
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new(f64::midpoint(self.x, other.x), f64::midpoint(self.y, other.y))
    }
}

impl From<PixelCoord> for Point {
    fn from(p: PixelCoord) -> Self {
        Self::new(f64::from(p.x), f64::from(p.y))
    }
}

/// A sequence of connected points forming a path segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }
}

/// Integer pixel index: `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PixelCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl PixelCoord {
    /// Create a new pixel coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Round a continuous pixel-space point to the nearest pixel,
    /// clipping into `dimensions`.
    ///
    /// Returns `None` only when `dimensions` is empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clipped(p: Point, dimensions: Dimensions) -> Option<Self> {
        if dimensions.width == 0 || dimensions.height == 0 {
            return None;
        }
        let max_x = f64::from(dimensions.width - 1);
        let max_y = f64::from(dimensions.height - 1);
        let x = p.x.round().clamp(0.0, max_x) as u32;
        let y = p.y.round().clamp(0.0, max_y) as u32;
        Some(Self::new(x, y))
    }

    /// Whether two pixels touch under 8-adjacency (or are equal).
    #[must_use]
    pub const fn touches(self, other: Self) -> bool {
        self.x.abs_diff(other.x) <= 1 && self.y.abs_diff(other.y) <= 1
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether a signed pixel index lies inside these dimensions.
    #[must_use]
    pub fn contains(self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }
}

/// The two boundary-intersection points of one overlap patch, in
/// world space.
///
/// The pair is ordered: `entry` is the anchor the path starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPair {
    /// First anchor (cutline start side).
    pub entry: Point,
    /// Second anchor (cutline end side).
    pub exit: Point,
}

impl AnchorPair {
    /// Both anchors as an array, entry first.
    #[must_use]
    pub const fn points(self) -> [Point; 2] {
        [self.entry, self.exit]
    }
}

/// Unit vector pointing towards the side of the cutline a raster keeps.
///
/// Expressed with `y` pointing up (world convention); the side
/// classifier flips `y` to compare against row-major pixel centroids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeepDirection {
    /// Horizontal component.
    pub x: f64,
    /// Vertical component, positive up.
    pub y: f64,
}

impl KeepDirection {
    /// Build a unit vector from arbitrary components.
    ///
    /// Returns `None` for a zero-length or non-finite vector.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Option<Self> {
        let len = x.hypot(y);
        if len.is_finite() && len > f64::EPSILON {
            Some(Self {
                x: x / len,
                y: y / len,
            })
        } else {
            None
        }
    }

    /// The opposite direction.
    #[must_use]
    pub fn negated(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }
}

/// Configuration for the merge pipeline.
///
/// All parameters have defaults; [`validate`](Self::validate) checks
/// ranges before any stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Overlap patches smaller than this fraction of the total grid
    /// extent are dropped when the overlap splits into several patches.
    pub min_area_fraction: f64,

    /// Integer downsample factor for the low-resolution footprints used
    /// to find boundary intersections.
    pub anchor_downsample: u32,

    /// Longest side (pixels) the centerline extractor works at. Larger
    /// patches are max-pooled down before skeletonization.
    pub working_resolution: u32,

    /// Skeleton edges shorter than this (pixels) are pruned or merged.
    pub prune_threshold: f64,

    /// Weight of centerline closeness relative to colour similarity.
    pub prefer_centre_factor: f64,

    /// Number of solver segments along the centerline. `None` keeps
    /// every other centerline pixel as a waypoint.
    pub segment_count: Option<usize>,

    /// Patch bounding box to grid area ratio above which the solver
    /// searches the whole grid instead of cropping.
    pub crop_threshold: f64,

    /// Margin around each waypoint pair's bounding box, as a fraction
    /// of the box size.
    pub window_margin: f64,

    /// Waypoint snap radius as a fraction of the shortest distance
    /// between consecutive waypoints.
    pub snap_radius_factor: f64,

    /// Longest side (pixels) above which the side classifier decides
    /// on a downsampled copy.
    pub classifier_max_side: u32,

    /// Cap on fixed-point passes over the skeleton graph.
    pub max_iterations: usize,
}

impl MergeConfig {
    /// Default minimum patch area fraction.
    pub const DEFAULT_MIN_AREA_FRACTION: f64 = 0.02;
    /// Default low-resolution factor for boundary intersection.
    pub const DEFAULT_ANCHOR_DOWNSAMPLE: u32 = 4;
    /// Default centerline working resolution.
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 4000;
    /// Default prune threshold in pixels.
    pub const DEFAULT_PRUNE_THRESHOLD: f64 = 1.5;
    /// Default centerline closeness weight.
    pub const DEFAULT_PREFER_CENTRE_FACTOR: f64 = 1.0;
    /// Default solver segment count.
    pub const DEFAULT_SEGMENT_COUNT: Option<usize> = Some(16);
    /// Default crop threshold.
    pub const DEFAULT_CROP_THRESHOLD: f64 = 0.8;
    /// Default sub-window margin.
    pub const DEFAULT_WINDOW_MARGIN: f64 = 0.2;
    /// Default snap radius factor.
    pub const DEFAULT_SNAP_RADIUS_FACTOR: f64 = 0.4;
    /// Default classifier downsample trigger.
    pub const DEFAULT_CLASSIFIER_MAX_SIDE: u32 = 10_000;
    /// Default fixed-point iteration cap.
    pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), SeamError> {
        let fraction = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(SeamError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        fraction("min_area_fraction", self.min_area_fraction)?;
        fraction("crop_threshold", self.crop_threshold)?;
        fraction("snap_radius_factor", self.snap_radius_factor)?;
        if !(self.window_margin.is_finite() && self.window_margin >= 0.0) {
            return Err(SeamError::InvalidConfig(format!(
                "window_margin must be non-negative, got {}",
                self.window_margin
            )));
        }
        if !(self.prefer_centre_factor.is_finite() && self.prefer_centre_factor >= 0.0) {
            return Err(SeamError::InvalidConfig(format!(
                "prefer_centre_factor must be non-negative, got {}",
                self.prefer_centre_factor
            )));
        }
        if !(self.prune_threshold.is_finite() && self.prune_threshold >= 0.0) {
            return Err(SeamError::InvalidConfig(format!(
                "prune_threshold must be non-negative, got {}",
                self.prune_threshold
            )));
        }
        if self.anchor_downsample == 0 {
            return Err(SeamError::InvalidConfig(
                "anchor_downsample must be at least 1".to_string(),
            ));
        }
        if self.working_resolution < 16 {
            return Err(SeamError::InvalidConfig(format!(
                "working_resolution must be at least 16, got {}",
                self.working_resolution
            )));
        }
        if self.classifier_max_side < 16 {
            return Err(SeamError::InvalidConfig(format!(
                "classifier_max_side must be at least 16, got {}",
                self.classifier_max_side
            )));
        }
        if self.segment_count == Some(0) {
            return Err(SeamError::InvalidConfig(
                "segment_count must be at least 1 when set".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(SeamError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_area_fraction: Self::DEFAULT_MIN_AREA_FRACTION,
            anchor_downsample: Self::DEFAULT_ANCHOR_DOWNSAMPLE,
            working_resolution: Self::DEFAULT_WORKING_RESOLUTION,
            prune_threshold: Self::DEFAULT_PRUNE_THRESHOLD,
            prefer_centre_factor: Self::DEFAULT_PREFER_CENTRE_FACTOR,
            segment_count: Self::DEFAULT_SEGMENT_COUNT,
            crop_threshold: Self::DEFAULT_CROP_THRESHOLD,
            window_margin: Self::DEFAULT_WINDOW_MARGIN,
            snap_radius_factor: Self::DEFAULT_SNAP_RADIUS_FACTOR,
            classifier_max_side: Self::DEFAULT_CLASSIFIER_MAX_SIDE,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Which of the two source rasters an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterId {
    /// The first raster passed to the pipeline.
    First,
    /// The second raster passed to the pipeline.
    Second,
}

impl std::fmt::Display for RasterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Second => f.write_str("second"),
        }
    }
}

/// Errors that abort a merge.
///
/// Every variant is fatal for the current merge; nothing in the
/// pipeline retries.
#[derive(Debug, thiserror::Error)]
pub enum SeamError {
    /// The two footprints do not intersect.
    #[error("the two raster footprints do not overlap")]
    NoOverlap,

    /// An overlap patch has fewer than two boundary-intersection points.
    #[error("overlap patch {patch} has {found} boundary intersection point(s), need 2")]
    InsufficientAnchors {
        /// Index of the failing patch.
        patch: usize,
        /// Number of candidate anchors found.
        found: usize,
    },

    /// No usable skeleton or terminal pair for a patch.
    #[error("cannot extract a centerline for overlap patch {patch}: {reason}")]
    SkeletonFailure {
        /// Index of the failing patch.
        patch: usize,
        /// What went wrong.
        reason: String,
    },

    /// The keep mask of a raster came out entirely empty or entirely full.
    ///
    /// `diagnostic` holds the offending mask for post-mortem inspection.
    #[error("keep mask for the {raster} raster is entirely {}", fill_word(.full))]
    ClassificationDegenerate {
        /// Raster whose keep mask failed.
        raster: RasterId,
        /// `true` when every pixel was kept, `false` when none was.
        full: bool,
        /// The degenerate mask.
        diagnostic: GrayImage,
    },

    /// A fixed-point loop hit its iteration cap.
    #[error("{stage} did not converge within {iterations} iterations")]
    NonConvergence {
        /// Which loop failed to settle.
        stage: &'static str,
        /// The cap that was hit.
        iterations: usize,
    },

    /// The rasters cannot share a pixel grid.
    #[error("raster frames are incompatible: {0}")]
    FrameMismatch(String),

    /// Pipeline configuration is invalid.
    #[error("invalid merge configuration: {0}")]
    InvalidConfig(String),
}

/// Word used in the degenerate keep-mask message.
const fn fill_word(full: &bool) -> &'static str {
    if *full { "set" } else { "empty" }
}

impl SeamError {
    /// Attach a patch index to a skeleton failure.
    pub(crate) fn skeleton(patch: usize, reason: impl Into<String>) -> Self {
        Self::SkeletonFailure {
            patch,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_vector_ops() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(4.0, 6.0);
        assert_eq!(b.sub(a), Point::new(3.0, 4.0));
        assert!((b.sub(a).norm() - 5.0).abs() < f64::EPSILON);
        assert!((a.dot(b) - 16.0).abs() < f64::EPSILON);
        assert_eq!(a.midpoint(b), Point::new(2.5, 4.0));
    }

    // --- PixelCoord tests ---

    #[test]
    fn pixel_clipped_rounds_and_clamps() {
        let dims = Dimensions {
            width: 10,
            height: 5,
        };
        assert_eq!(
            PixelCoord::clipped(Point::new(3.4, 2.6), dims),
            Some(PixelCoord::new(3, 3))
        );
        assert_eq!(
            PixelCoord::clipped(Point::new(-7.0, 99.0), dims),
            Some(PixelCoord::new(0, 4))
        );
        let empty = Dimensions {
            width: 0,
            height: 5,
        };
        assert_eq!(PixelCoord::clipped(Point::new(0.0, 0.0), empty), None);
    }

    #[test]
    fn pixel_touches_is_eight_adjacency() {
        let p = PixelCoord::new(5, 5);
        assert!(p.touches(PixelCoord::new(6, 6)));
        assert!(p.touches(PixelCoord::new(5, 5)));
        assert!(!p.touches(PixelCoord::new(7, 5)));
    }

    // --- KeepDirection tests ---

    #[test]
    fn keep_direction_normalizes() {
        let v = KeepDirection::new(3.0, 4.0).unwrap();
        assert!((v.x - 0.6).abs() < 1e-12);
        assert!((v.y - 0.8).abs() < 1e-12);
        let n = v.negated();
        assert!((n.x + 0.6).abs() < 1e-12);
    }

    #[test]
    fn keep_direction_rejects_zero() {
        assert!(KeepDirection::new(0.0, 0.0).is_none());
        assert!(KeepDirection::new(f64::NAN, 1.0).is_none());
    }

    // --- MergeConfig tests ---

    #[test]
    fn merge_config_defaults() {
        let config = MergeConfig::default();
        assert!((config.min_area_fraction - 0.02).abs() < f64::EPSILON);
        assert!((config.prune_threshold - 1.5).abs() < f64::EPSILON);
        assert!((config.crop_threshold - 0.8).abs() < f64::EPSILON);
        assert!((config.snap_radius_factor - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.classifier_max_side, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn merge_config_rejects_bad_fraction() {
        let config = MergeConfig {
            min_area_fraction: 1.5,
            ..MergeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SeamError::InvalidConfig(ref s) if s.contains("min_area_fraction")));
    }

    #[test]
    fn merge_config_rejects_zero_segments() {
        let config = MergeConfig {
            segment_count: Some(0),
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_config_serde_round_trip() {
        let config = MergeConfig {
            prefer_centre_factor: 2.5,
            segment_count: None,
            ..MergeConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: MergeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn merge_config_partial_json_uses_defaults() {
        let back: MergeConfig = serde_json::from_str(r#"{"prefer_centre_factor":3.0}"#).unwrap();
        assert!((back.prefer_centre_factor - 3.0).abs() < f64::EPSILON);
        assert_eq!(back.segment_count, MergeConfig::DEFAULT_SEGMENT_COUNT);
    }

    // --- SeamError tests ---

    #[test]
    fn error_display() {
        assert_eq!(
            SeamError::NoOverlap.to_string(),
            "the two raster footprints do not overlap"
        );
        let err = SeamError::InsufficientAnchors { patch: 1, found: 0 };
        assert_eq!(
            err.to_string(),
            "overlap patch 1 has 0 boundary intersection point(s), need 2"
        );
        let err = SeamError::ClassificationDegenerate {
            raster: RasterId::Second,
            full: true,
            diagnostic: GrayImage::new(1, 1),
        };
        assert_eq!(
            err.to_string(),
            "keep mask for the second raster is entirely set"
        );
    }
}
