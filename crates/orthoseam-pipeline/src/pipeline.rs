//! Incremental merge: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::merge_pair`] which runs the whole merge in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use orthoseam_pipeline::{MergeConfig, Pipeline, RasterGrid, SeamError};
//! # fn run(first: RasterGrid, second: RasterGrid) -> Result<(), SeamError> {
//! let result = Pipeline::new(first, second, MergeConfig::default())
//!     .analyze_overlap()?
//!     .find_anchors()?
//!     .cut()?
//!     .classify()?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state.
//!
//! # Memory
//!
//! Large buffers are dropped as soon as no later stage needs them: the
//! source rasters after they are sampled into the union frame, the
//! footprints after boundary intersection, the union-frame colour
//! rasters and cost fields once every patch is seamed.

use geo::{Coord, MapCoords, Polygon};

use crate::anchors::{AnchorSet, find_anchors};
use crate::centerline::{Centerline, extract_centerline};
use crate::cost::{FieldRange, build_cost_field};
use crate::geometry::from_coord;
use crate::keep::{KeepMask, classify, cutline_in_frame};
use crate::overlap::{OverlapPatch, find_patches};
use crate::raster::{self, Affine, BinaryMask, RasterGrid};
use crate::solver::{SeamPath, StitchedCutline, solve_path, stitch};
use crate::telemetry::PatchTelemetry;
use crate::types::{Dimensions, KeepDirection, MergeConfig, PixelCoord, RasterId, RgbImage, SeamError};

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 4;

/// Stage names in execution order, for progress reporting.
pub const STAGE_NAMES: [&str; STAGE_COUNT] = [
    "overlap analysis",
    "boundary intersection",
    "seam",
    "side classification",
];

/// Placement and size of a pixel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Pixel-to-world transform.
    pub transform: Affine,
    /// Grid size.
    pub dimensions: Dimensions,
}

impl Frame {
    fn of(raster: &RasterGrid) -> Self {
        Self {
            transform: raster.transform,
            dimensions: raster.dimensions(),
        }
    }
}

/// Everything produced for one overlap patch.
#[derive(Debug, Clone)]
pub struct PatchSeam {
    /// Patch index.
    pub index: usize,
    /// Rasterized patch cutline in the union frame.
    pub cutline: BinaryMask,
    /// Extended centerline the path was routed along.
    pub centerline: Centerline,
    /// Solved path in the union frame.
    pub path: SeamPath,
    /// Preference range before normalization.
    pub preference: FieldRange,
    /// Record for the merge orchestrator.
    pub telemetry: PatchTelemetry,
}

/// Final output of a merge.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Transform of the frame covering both rasters.
    pub union_transform: Affine,
    /// Size of the union frame.
    pub union_dimensions: Dimensions,
    /// Per-patch seams in patch order.
    pub patches: Vec<PatchSeam>,
    /// Stitched cutline in the union frame.
    pub cutline: BinaryMask,
    /// Straight connectors between consecutive patches, union frame.
    pub connectors: Vec<(PixelCoord, PixelCoord)>,
    /// Keep masks, first raster first, each in its raster's own frame.
    pub keep_masks: [BinaryMask; 2],
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`analyze_overlap`](Self::analyze_overlap) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .analyze_overlap() to continue"]
pub struct Pending {
    config: MergeConfig,
    first: RasterGrid,
    second: RasterGrid,
}

impl Pending {
    /// The configuration the merge will run with.
    #[must_use]
    pub const fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Validate the configuration, build the union frame, sample both
    /// rasters into it and split the footprint overlap into patches.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::InvalidConfig`] for a bad configuration,
    /// [`SeamError::FrameMismatch`] when the rasters do not share a pixel
    /// lattice and [`SeamError::NoOverlap`] when the footprints are
    /// disjoint.
    pub fn analyze_overlap(self) -> Result<OverlapAnalyzed, SeamError> {
        self.config.validate()?;
        let frames = [Frame::of(&self.first), Frame::of(&self.second)];
        let (transform, dimensions) = Affine::union_frame(
            (frames[0].transform, frames[0].dimensions),
            (frames[1].transform, frames[1].dimensions),
        )?;
        let union = Frame {
            transform,
            dimensions,
        };
        log::debug!(
            "union frame {}x{} for rasters {}x{} and {}x{}",
            dimensions.width,
            dimensions.height,
            frames[0].dimensions.width,
            frames[0].dimensions.height,
            frames[1].dimensions.width,
            frames[1].dimensions.height
        );

        let footprints = [
            BinaryMask::footprint(&self.first).reproject(transform, dimensions)?,
            BinaryMask::footprint(&self.second).reproject(transform, dimensions)?,
        ];
        let colours = [
            raster::reproject(&self.first.image, self.first.transform, transform, dimensions)?,
            raster::reproject(&self.second.image, self.second.transform, transform, dimensions)?,
        ];
        drop(self.first);
        drop(self.second);

        let patches = find_patches(&footprints[0], &footprints[1], self.config.min_area_fraction)?;
        let all = raster::or(&footprints[0].image, &footprints[1].image);
        let directions = [
            KeepDirection::from_footprints(&footprints[0].image, &all),
            KeepDirection::from_footprints(&footprints[1].image, &all),
        ];

        Ok(OverlapAnalyzed {
            config: self.config,
            frames,
            union,
            footprints,
            colours,
            patches,
            directions,
        })
    }
}

// ─────────────────────── Stage 1: OverlapAnalyzed ───────────────────────

/// Pipeline state after overlap analysis.
///
/// Call [`find_anchors`](Self::find_anchors) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .find_anchors() to continue"]
pub struct OverlapAnalyzed {
    config: MergeConfig,
    frames: [Frame; 2],
    union: Frame,
    footprints: [BinaryMask; 2],
    colours: [RgbImage; 2],
    patches: Vec<OverlapPatch>,
    directions: [KeepDirection; 2],
}

impl OverlapAnalyzed {
    /// The frame covering both rasters.
    #[must_use]
    pub const fn union(&self) -> Frame {
        self.union
    }

    /// Both footprints in the union frame.
    #[must_use]
    pub const fn footprints(&self) -> &[BinaryMask; 2] {
        &self.footprints
    }

    /// Overlap patches in label order.
    #[must_use]
    pub fn patches(&self) -> &[OverlapPatch] {
        &self.patches
    }

    /// Keep direction of each raster.
    #[must_use]
    pub const fn directions(&self) -> [KeepDirection; 2] {
        self.directions
    }

    /// Find the anchor pair of every patch.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::InsufficientAnchors`] when a patch has fewer
    /// than two boundary crossings.
    pub fn find_anchors(self) -> Result<Anchored, SeamError> {
        let anchors = find_anchors(
            &self.footprints[0],
            &self.footprints[1],
            &self.patches,
            &self.config,
        )?;
        drop(self.footprints);
        Ok(Anchored {
            config: self.config,
            frames: self.frames,
            union: self.union,
            colours: self.colours,
            patches: self.patches,
            directions: self.directions,
            anchors,
        })
    }
}

// ───────────────────────── Stage 2: Anchored ─────────────────────────

/// Pipeline state after boundary intersection.
///
/// Call [`cut`](Self::cut) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .cut() to continue"]
pub struct Anchored {
    config: MergeConfig,
    frames: [Frame; 2],
    union: Frame,
    colours: [RgbImage; 2],
    patches: Vec<OverlapPatch>,
    directions: [KeepDirection; 2],
    anchors: AnchorSet,
}

impl Anchored {
    /// Anchor pairs, union outline and outline crossings.
    #[must_use]
    pub const fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    /// Seam every patch: centerline, cost field and least-cost path,
    /// then stitch the patch paths into one cutline.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::SkeletonFailure`] or
    /// [`SeamError::NonConvergence`] for the first patch that cannot be
    /// seamed.
    pub fn cut(self) -> Result<Seamed, SeamError> {
        let union = self.union;
        let outline = outline_in_index_space(&self.anchors.union_outline, union.transform)?;
        let mut seams = Vec::with_capacity(self.patches.len());

        for (index, patch) in self.patches.iter().enumerate() {
            let pair = self
                .anchors
                .pairs
                .get(index)
                .ok_or(SeamError::InsufficientAnchors { patch: index, found: 0 })?;
            let ends = [
                union.transform.world_to_index(pair.entry)?,
                union.transform.world_to_index(pair.exit)?,
            ];
            let centerline = extract_centerline(
                &patch.cropped(),
                patch.bbox,
                union.dimensions,
                ends,
                &outline,
                &self.config,
                index,
            )?;

            let field = build_cost_field(
                &self.colours[0],
                &self.colours[1],
                &patch.mask,
                &centerline.full,
                self.config.prefer_centre_factor,
            );
            let path = solve_path(&field.grid, &patch.mask, &centerline.full, &self.config, index)?;
            let preference = field.range;
            drop(field);

            let (Some(start), Some(end)) = (path.start(), path.end()) else {
                return Err(SeamError::skeleton(index, "solver returned an empty path"));
            };
            seams.push(PatchSeam {
                index,
                cutline: BinaryMask::new(path.mask(union.dimensions), union.transform),
                telemetry: PatchTelemetry::new(patch, union.transform, start, end),
                centerline,
                path,
                preference,
            });
        }
        drop(self.colours);

        let paths: Vec<Vec<PixelCoord>> = seams.iter().map(|s| s.path.pixels.clone()).collect();
        let stitched = stitch(&paths, union.dimensions);
        Ok(Seamed {
            config: self.config,
            frames: self.frames,
            union,
            directions: self.directions,
            seams,
            stitched,
        })
    }
}

/// Map the world-space union outline into the union frame's index space.
fn outline_in_index_space(outline: &Polygon<f64>, transform: Affine) -> Result<Polygon<f64>, SeamError> {
    let inverse = transform
        .invert()
        .ok_or_else(|| SeamError::FrameMismatch("singular union transform".to_string()))?;
    Ok(outline.map_coords(|c| {
        let p = inverse.apply(from_coord(c));
        Coord {
            x: p.x - 0.5,
            y: p.y - 0.5,
        }
    }))
}

// ────────────────────────── Stage 3: Seamed ──────────────────────────

/// Pipeline state after every patch is seamed and stitched.
///
/// Call [`classify`](Self::classify) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Seamed {
    config: MergeConfig,
    frames: [Frame; 2],
    union: Frame,
    directions: [KeepDirection; 2],
    seams: Vec<PatchSeam>,
    stitched: StitchedCutline,
}

impl Seamed {
    /// Per-patch seams.
    #[must_use]
    pub fn seams(&self) -> &[PatchSeam] {
        &self.seams
    }

    /// The stitched cutline.
    #[must_use]
    pub const fn stitched(&self) -> &StitchedCutline {
        &self.stitched
    }

    /// Derive the keep mask of each raster in its own frame.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::ClassificationDegenerate`] when a keep mask
    /// comes out empty or full.
    pub fn classify(self) -> Result<Classified, SeamError> {
        let keep_one = |k: usize, id: RasterId| -> Result<KeepMask, SeamError> {
            let frame = self.frames[k];
            let offset = frame.transform.offset_in(self.union.transform)?;
            let cut = cutline_in_frame(&self.stitched.chain, offset, frame.dimensions);
            classify(&cut, self.directions[k], id, &self.config)
        };
        let first = keep_one(0, RasterId::First)?;
        let second = keep_one(1, RasterId::Second)?;
        Ok(Classified {
            frames: self.frames,
            union: self.union,
            seams: self.seams,
            stitched: self.stitched,
            keep: [first, second],
        })
    }
}

// ──────────────────────── Stage 4: Classified ────────────────────────

/// Pipeline state after side classification, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`MergeResult`].
#[must_use = "call .into_result() to extract the MergeResult"]
pub struct Classified {
    frames: [Frame; 2],
    union: Frame,
    seams: Vec<PatchSeam>,
    stitched: StitchedCutline,
    keep: [KeepMask; 2],
}

impl Classified {
    /// Keep masks with their classification details.
    #[must_use]
    pub const fn keep(&self) -> &[KeepMask; 2] {
        &self.keep
    }

    /// The stitched cutline.
    #[must_use]
    pub const fn stitched(&self) -> &StitchedCutline {
        &self.stitched
    }

    /// Per-patch seams.
    #[must_use]
    pub fn seams(&self) -> &[PatchSeam] {
        &self.seams
    }

    /// Consume the pipeline and return the [`MergeResult`].
    #[must_use]
    pub fn into_result(self) -> MergeResult {
        let [first, second] = self.keep;
        MergeResult {
            union_transform: self.union.transform,
            union_dimensions: self.union.dimensions,
            patches: self.seams,
            cutline: BinaryMask::new(self.stitched.mask, self.union.transform),
            connectors: self.stitched.connectors,
            keep_masks: [
                BinaryMask::new(first.mask, self.frames[0].transform),
                BinaryMask::new(second.mask, self.frames[1].transform),
            ],
        }
    }
}

/// Entry point for the typed, step-by-step merge.
///
/// `Pipeline::new(...)` returns a [`Pending`] stage; each stage has
/// exactly one advance method, so stages cannot be skipped or run out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from two rasters and a config.
    ///
    /// No processing is performed until
    /// [`.analyze_overlap()`](Pending::analyze_overlap) is called.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(first: RasterGrid, second: RasterGrid, config: MergeConfig) -> Pending {
        Pending {
            config,
            first,
            second,
        }
    }
}
