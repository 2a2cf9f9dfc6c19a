//! orthoseam-pipeline: Pure cutline computation for pairwise orthomosaic
//! merging (sans-IO).
//!
//! Given two georeferenced rasters whose footprints overlap, computes a
//! cutline through every overlap patch and the keep mask of each raster
//! through:
//! union frame -> overlap patches -> boundary anchors -> centerline ->
//! cost field -> least-cost path -> stitching -> side classification.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! rasters and returns structured data. Encoding masks and reading
//! rasters from disk live in `orthoseam-export` and `orthoseam-bench`.

pub mod anchors;
pub mod centerline;
pub mod cost;
pub mod diagnostics;
pub mod geometry;
pub mod graph;
pub mod keep;
pub mod morphology;
pub mod overlap;
pub mod pipeline;
pub mod raster;
pub mod solver;
pub mod telemetry;
pub mod types;

pub use diagnostics::{Clock, MergeDiagnostics, NoClock, NoProgress, Progress};
pub use pipeline::{MergeResult, PatchSeam, Pipeline};
pub use raster::{Affine, BinaryMask, RasterGrid};
pub use telemetry::PatchTelemetry;
pub use types::{
    AnchorPair, Dimensions, GrayImage, KeepDirection, MergeConfig, PixelCoord, Point, Polyline,
    RasterId, RgbImage, SeamError,
};

use diagnostics::{KeepMetrics, MergeSummary, PatchMetrics, StageDiagnostics, StageMetrics};
use pipeline::{STAGE_COUNT, STAGE_NAMES};

/// Compute the cutline between two rasters and the keep mask of each.
///
/// Both rasters must be north-up on the same pixel lattice. The keep
/// masks are returned in each raster's own frame; the cutline and every
/// per-patch result are in the union frame covering both.
///
/// # Pipeline steps
///
/// 1. Union frame, footprints and overlap patches
/// 2. Boundary intersection (one anchor pair per patch)
/// 3. Per patch: centerline, cost field, least-cost path; then stitching
/// 4. Side classification of both rasters
///
/// # Errors
///
/// Returns the first [`SeamError`] raised by any stage. Nothing is
/// retried.
pub fn merge_pair(
    first: RasterGrid,
    second: RasterGrid,
    config: &MergeConfig,
) -> Result<MergeResult, SeamError> {
    merge_pair_with_diagnostics(first, second, config, &NoClock, &mut NoProgress).map(|(r, _)| r)
}

/// Like [`merge_pair`], but also times every stage with `clock`,
/// reports each stage to `progress` before it starts, and collects
/// [`MergeDiagnostics`].
///
/// # Errors
///
/// Same as [`merge_pair`].
pub fn merge_pair_with_diagnostics<C: Clock>(
    first: RasterGrid,
    second: RasterGrid,
    config: &MergeConfig,
    clock: &C,
    progress: &mut dyn Progress,
) -> Result<(MergeResult, MergeDiagnostics), SeamError> {
    let total_start = clock.now();
    let mut stages = Vec::with_capacity(STAGE_COUNT);

    // 1. Overlap analysis.
    progress.stage(1, STAGE_COUNT, STAGE_NAMES[0]);
    let start = clock.now();
    let analyzed = Pipeline::new(first, second, config.clone()).analyze_overlap()?;
    let union = analyzed.union();
    stages.push(StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Overlap {
            width: union.dimensions.width,
            height: union.dimensions.height,
            patch_count: analyzed.patches().len(),
            overlap_pixels: analyzed.patches().iter().map(|p| p.area).sum(),
        },
    });

    // 2. Boundary intersection.
    progress.stage(2, STAGE_COUNT, STAGE_NAMES[1]);
    let start = clock.now();
    let anchored = analyzed.find_anchors()?;
    stages.push(StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Anchors {
            crossing_count: anchored.anchors().crossings.len(),
            pair_count: anchored.anchors().pairs.len(),
        },
    });

    // 3. Seam every patch and stitch.
    progress.stage(3, STAGE_COUNT, STAGE_NAMES[2]);
    let start = clock.now();
    let seamed = anchored.cut()?;
    let cutline_pixels = raster::count_set(&seamed.stitched().mask);
    stages.push(StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Seam {
            patches: seamed
                .seams()
                .iter()
                .map(|s| PatchMetrics {
                    patch: s.index,
                    skeleton: s.centerline.stats,
                    centerline_pixels: s.centerline.full.len(),
                    preference: s.preference,
                    waypoints: s.path.waypoints.len(),
                    snapped: s.path.snapped,
                    window_pixels: s.path.window.area(),
                    path_pixels: s.path.pixels.len(),
                })
                .collect(),
            connector_count: seamed.stitched().connectors.len(),
            cutline_pixels,
        },
    });

    // 4. Side classification.
    progress.stage(4, STAGE_COUNT, STAGE_NAMES[3]);
    let start = clock.now();
    let classified = seamed.classify()?;
    let rasters: Vec<KeepMetrics> = classified
        .keep()
        .iter()
        .zip([RasterId::First, RasterId::Second])
        .map(|(k, raster)| KeepMetrics {
            raster,
            sides: k.sides,
            tie: k.tie,
            downsample: k.downsample,
            coverage: k.coverage(),
        })
        .collect();
    let degenerate_recoveries = rasters.iter().filter(|k| k.tie).count();
    stages.push(StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Classify { rasters },
    });

    let result = classified.into_result();
    log::debug!(
        "merged {} patch(es) into a {}-pixel cutline",
        result.patches.len(),
        cutline_pixels
    );
    let diagnostics = MergeDiagnostics {
        stages,
        total_duration: clock.elapsed(&total_start),
        summary: MergeSummary {
            width: union.dimensions.width,
            height: union.dimensions.height,
            patch_count: result.patches.len(),
            cutline_pixels,
            degenerate_recoveries,
        },
    };
    Ok((result, diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Records every progress notification.
    #[derive(Default)]
    struct Recorder(Vec<(usize, usize, String)>);

    impl Progress for Recorder {
        fn stage(&mut self, step: usize, total: usize, name: &str) {
            self.0.push((step, total, name.to_string()));
        }
    }

    /// Two 50x50 rasters, the second shifted 25 pixels right and down.
    fn diagonal_pair() -> (RasterGrid, RasterGrid) {
        let a = RasterGrid::new(
            RgbImage::from_pixel(50, 50, Rgb([200, 120, 40])),
            Affine::north_up(0.0, 50.0, 1.0, 1.0),
        );
        let b = RasterGrid::new(
            RgbImage::from_pixel(50, 50, Rgb([60, 140, 220])),
            Affine::north_up(25.0, 25.0, 1.0, 1.0),
        );
        (a, b)
    }

    #[test]
    fn disjoint_rasters_do_not_overlap() {
        let a = RasterGrid::new(
            RgbImage::from_pixel(10, 10, Rgb([1, 1, 1])),
            Affine::north_up(0.0, 10.0, 1.0, 1.0),
        );
        let b = RasterGrid::new(
            RgbImage::from_pixel(10, 10, Rgb([1, 1, 1])),
            Affine::north_up(20.0, 10.0, 1.0, 1.0),
        );
        let result = merge_pair(a, b, &MergeConfig::default());
        assert!(matches!(result, Err(SeamError::NoOverlap)));
    }

    #[test]
    fn progress_reports_every_stage_in_order() {
        let (a, b) = diagonal_pair();
        let mut recorder = Recorder::default();
        let (_, diagnostics) =
            merge_pair_with_diagnostics(a, b, &MergeConfig::default(), &NoClock, &mut recorder)
                .unwrap();
        let steps: Vec<usize> = recorder.0.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert!(recorder.0.iter().all(|(_, total, _)| *total == STAGE_COUNT));
        assert_eq!(recorder.0[2].2, "seam");

        let names: Vec<&str> = diagnostics.stages.iter().map(|s| s.metrics.name()).collect();
        assert_eq!(names, vec!["Overlap", "Anchors", "Seam", "Classify"]);
        assert_eq!(diagnostics.summary.patch_count, 1);
        assert_eq!((diagnostics.summary.width, diagnostics.summary.height), (75, 75));
    }

    #[test]
    fn diagonal_overlap_keeps_each_corner() {
        let (a, b) = diagonal_pair();
        let result = merge_pair(a, b, &MergeConfig::default()).unwrap();
        let [keep_a, keep_b] = &result.keep_masks;

        // Far corners stay with their own raster.
        assert!(raster::is_set(&keep_a.image, PixelCoord::new(2, 2)));
        assert!(!raster::is_set(&keep_a.image, PixelCoord::new(47, 47)));
        assert!(raster::is_set(&keep_b.image, PixelCoord::new(47, 47)));
        assert!(!raster::is_set(&keep_b.image, PixelCoord::new(2, 2)));
        assert_eq!(result.cutline.dimensions(), Dimensions { width: 75, height: 75 });
    }

    #[test]
    fn merge_is_deterministic() {
        let (a, b) = diagonal_pair();
        let first = merge_pair(a.clone(), b.clone(), &MergeConfig::default()).unwrap();
        let second = merge_pair(a, b, &MergeConfig::default()).unwrap();
        assert_eq!(first.cutline.image, second.cutline.image);
        assert_eq!(first.keep_masks[0].image, second.keep_masks[0].image);
        assert_eq!(first.patches[0].telemetry, second.patches[0].telemetry);
    }
}
