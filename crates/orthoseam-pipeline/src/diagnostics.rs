//! Merge diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning on real raster pairs. Every call to
//! [`merge_pair_with_diagnostics`](crate::merge_pair_with_diagnostics)
//! collects them alongside the merge result.
//!
//! Time is read through the [`Clock`] trait so the core never touches a
//! platform clock itself; callers without one pass [`NoClock`].
//! Progress ("step N of M") goes through [`Progress`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::centerline::SkeletonStats;
use crate::cost::FieldRange;
use crate::types::RasterId;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of elapsed time for stage measurements.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A clock that never advances. Every duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Receives "step N of M" notifications as the merge advances.
pub trait Progress {
    /// Called before stage `step` (1-based) of `total` starts.
    fn stage(&mut self, step: usize, total: usize, name: &str);
}

/// Discards progress notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn stage(&mut self, _step: usize, _total: usize, _name: &str) {}
}

/// Diagnostics collected from a single merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDiagnostics {
    /// One entry per stage, in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the merge (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: MergeSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Metrics of the seam through one patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchMetrics {
    /// Patch index.
    pub patch: usize,
    /// Skeleton sizes and cleanup counts.
    pub skeleton: SkeletonStats,
    /// Pixels of the extended centerline.
    pub centerline_pixels: usize,
    /// Combined preference before normalization.
    pub preference: FieldRange,
    /// Waypoints the solver routed through.
    pub waypoints: usize,
    /// Waypoints moved by snapping.
    pub snapped: usize,
    /// Pixels searched by the solver.
    pub window_pixels: u64,
    /// Pixels of the solved path.
    pub path_pixels: usize,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Union frame and overlap analysis.
    Overlap {
        /// Union frame width in pixels.
        width: u32,
        /// Union frame height in pixels.
        height: u32,
        /// Patches kept after area filtering.
        patch_count: usize,
        /// Overlap pixels across the kept patches.
        overlap_pixels: u64,
    },
    /// Boundary intersection.
    Anchors {
        /// Crossings between the two footprint outlines.
        crossing_count: usize,
        /// Anchor pairs, one per patch.
        pair_count: usize,
    },
    /// Centerline, cost field and path of every patch, then stitching.
    Seam {
        /// Per-patch metrics in patch order.
        patches: Vec<PatchMetrics>,
        /// Connectors added between patches.
        connector_count: usize,
        /// Pixels of the stitched cutline.
        cutline_pixels: u64,
    },
    /// Keep-mask classification of both rasters.
    Classify {
        /// Per-raster outcome, first raster first.
        rasters: Vec<KeepMetrics>,
    },
}

/// Classification outcome of one raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepMetrics {
    /// Which raster.
    pub raster: RasterId,
    /// Regions the cutline split the frame into.
    pub sides: usize,
    /// Whether the centroid tie-break fallback was used.
    pub tie: bool,
    /// Downsample factor of the side decision.
    pub downsample: u32,
    /// Kept fraction of the raster frame.
    pub coverage: f64,
}

impl StageMetrics {
    /// Display name of the stage.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Overlap { .. } => "Overlap",
            Self::Anchors { .. } => "Anchors",
            Self::Seam { .. } => "Seam",
            Self::Classify { .. } => "Classify",
        }
    }
}

/// High-level summary of the merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Union frame width in pixels.
    pub width: u32,
    /// Union frame height in pixels.
    pub height: u32,
    /// Overlap patches seamed.
    pub patch_count: usize,
    /// Pixels of the stitched cutline.
    pub cutline_pixels: u64,
    /// Degenerate-geometry fallbacks taken (centroid ties).
    pub degenerate_recoveries: usize,
}

impl MergeDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Merge Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Union frame: {}x{}  |  Patches: {}",
            self.summary.width, self.summary.height, self.summary.patch_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for stage in &self.stages {
            let ms = duration_ms(stage.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let name = stage.metrics.name();
            let details = format_metrics(&stage.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
            if let StageMetrics::Seam { patches, .. } = &stage.metrics {
                for p in patches {
                    lines.push(format!("{:<24} {:>21}  {}", "", "", format_patch(p)));
                }
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "Cutline pixels: {}  |  Degenerate fallbacks: {}",
            self.summary.cutline_pixels, self.summary.degenerate_recoveries,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Overlap {
            width,
            height,
            patch_count,
            overlap_pixels,
        } => format!("{width}x{height}, {patch_count} patches, {overlap_pixels} px"),
        StageMetrics::Anchors {
            crossing_count,
            pair_count,
        } => format!("{crossing_count} crossings, {pair_count} pairs"),
        StageMetrics::Seam {
            patches,
            connector_count,
            cutline_pixels,
        } => format!(
            "{} patches, {connector_count} connectors, {cutline_pixels} px",
            patches.len()
        ),
        StageMetrics::Classify { rasters } => rasters
            .iter()
            .map(|r| {
                format!(
                    "{}: {:.1}% kept of {} sides{}",
                    r.raster,
                    r.coverage * 100.0,
                    r.sides,
                    if r.tie { " (tie)" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
    }
}

fn format_patch(p: &PatchMetrics) -> String {
    format!(
        "#{}: skeleton {}->{} nodes ({} cycles, {} pruned, /{}), pref {:.3}..{:.3}, {} waypoints ({} snapped), {} px",
        p.patch,
        p.skeleton.nodes_before,
        p.skeleton.nodes_after,
        p.skeleton.cycles_removed,
        p.skeleton.pruned,
        p.skeleton.downsample,
        p.preference.min,
        p.preference.max,
        p.waypoints,
        p.snapped,
        p.path_pixels,
    )
}
