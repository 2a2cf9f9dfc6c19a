//! Side classifier: turn a cutline into the keep mask of one raster.
//!
//! The cutline is moved into the raster's own frame and extended to the
//! frame border so it splits the frame in two. The side whose centroid
//! lies in the raster's keep direction is retained.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::BresenhamLineIter;

use crate::morphology::{Component, Connectivity, Labelling, fill_holes, label};
use crate::raster::{self, ON};
use crate::types::{Dimensions, KeepDirection, MergeConfig, PixelCoord, Point, RasterId, SeamError};

/// How many pixels back from an end the extension direction is taken.
const EXTENSION_LOOKBACK: usize = 8;

/// Keep mask of one raster together with how it was decided.
#[derive(Debug, Clone)]
pub struct KeepMask {
    /// Retained pixels in the raster frame.
    pub mask: GrayImage,
    /// Connected regions the cutline split the frame into.
    pub sides: usize,
    /// Whether the centroid test was inconclusive and the first
    /// candidate was used.
    pub tie: bool,
    /// Downsample factor used for the side decision.
    pub downsample: u32,
}

impl KeepMask {
    /// Fraction of the frame that is kept.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        let area = Dimensions::of(&self.mask).area();
        if area == 0 {
            0.0
        } else {
            raster::count_set(&self.mask) as f64 / area as f64
        }
    }
}

impl KeepDirection {
    /// Direction from the union footprint's centroid to a raster
    /// footprint's centroid, both given in the same pixel grid.
    ///
    /// Falls back to `+x` when the centroids coincide or either mask is
    /// empty.
    #[must_use]
    pub fn from_footprints(raster: &GrayImage, union: &GrayImage) -> Self {
        let fallback = Self { x: 1.0, y: 0.0 };
        let (Some(own), Some(all)) = (mask_centroid(raster), mask_centroid(union)) else {
            log::warn!("empty footprint, keep direction defaults to +x");
            return fallback;
        };
        let d = own.sub(all);
        Self::new(d.x, -d.y).unwrap_or_else(|| {
            log::warn!("footprint centroids coincide, keep direction defaults to +x");
            fallback
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn mask_centroid(mask: &GrayImage) -> Option<Point> {
    let (n, sx, sy) = raster::set_pixels(mask).fold((0u64, 0.0, 0.0), |(n, sx, sy), p| {
        (n + 1, sx + f64::from(p.x), sy + f64::from(p.y))
    });
    (n > 0).then(|| Point::new(sx / n as f64, sy / n as f64))
}

/// Rasterize an ordered cutline into a raster's frame.
///
/// `path` is in the shared grid; `offset` is the raster's origin in that
/// grid. Both ends are continued along their final direction until they
/// leave the frame. Pixels outside the frame are dropped.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cutline_in_frame(path: &[PixelCoord], offset: (i64, i64), dimensions: Dimensions) -> GrayImage {
    let shifted: Vec<(i64, i64)> = path
        .iter()
        .map(|p| (i64::from(p.x) - offset.0, i64::from(p.y) - offset.1))
        .collect();
    let mut mask = GrayImage::new(dimensions.width, dimensions.height);
    let mut put = |x: i64, y: i64| {
        if dimensions.contains(x, y) {
            mask.put_pixel(x as u32, y as u32, Luma([ON]));
        }
    };
    for &(x, y) in &shifted {
        put(x, y);
    }
    let reversed: Vec<(i64, i64)> = shifted.iter().rev().copied().collect();
    for end in [&shifted, &reversed] {
        for (x, y) in border_extension(end, dimensions) {
            put(x, y);
        }
    }
    mask
}

/// Pixels continuing a path past its first point, away from the rest of
/// the path, far enough to leave a frame of `dimensions`.
#[allow(clippy::cast_precision_loss)]
fn border_extension(path: &[(i64, i64)], dimensions: Dimensions) -> Vec<(i64, i64)> {
    let Some(&(x0, y0)) = path.first() else {
        return Vec::new();
    };
    let Some(&(x1, y1)) = path.get(EXTENSION_LOOKBACK.min(path.len() - 1)) else {
        return Vec::new();
    };
    let dir = Point::new((x0 - x1) as f64, (y0 - y1) as f64);
    let len = dir.norm();
    if len < f64::EPSILON {
        return Vec::new();
    }
    let reach = f64::from(dimensions.width) + f64::from(dimensions.height) + 2.0;
    let far = (
        (x0 as f64 + dir.x / len * reach) as f32,
        (y0 as f64 + dir.y / len * reach) as f32,
    );
    BresenhamLineIter::new((x0 as f32, y0 as f32), far)
        .map(|(x, y)| (i64::from(x), i64::from(y)))
        .collect()
}

/// Which of the two candidate sides to keep.
struct SideChoice {
    /// Labels forming the reference side: the second candidate plus any
    /// smaller region lying on its side of the first.
    reference: Vec<u32>,
    keep_second: bool,
    tie: bool,
    sides: usize,
}

/// Decide on the complement of `cutline`. Candidates are the two largest
/// 4-connected regions, largest first. Smaller regions join the second
/// candidate when their centroid lies on the same side of the first
/// candidate's centroid along the keep direction.
fn choose_side(cutline: &GrayImage, direction: KeepDirection) -> (Option<SideChoice>, Labelling) {
    let labelling = label(&raster::invert(cutline), Connectivity::Four);
    let ranked = labelling.by_area();
    let Some(&first) = ranked.first() else {
        return (None, labelling);
    };
    let mut choice = SideChoice {
        reference: Vec::new(),
        keep_second: false,
        tie: false,
        sides: ranked.len(),
    };
    let facing = Point::new(direction.x, -direction.y);
    let lean = |c: &Component| c.centroid().sub(first.centroid()).dot(facing);
    if let Some(second) = ranked.get(1) {
        let dot = lean(second);
        if second.centroid().sub(first.centroid()).norm() < f64::EPSILON || dot == 0.0 {
            log::warn!("side centroids give no preferred side, keeping the first candidate");
            choice.tie = true;
        } else {
            choice.keep_second = dot > 0.0;
        }
        choice.reference.push(second.label);
        if dot != 0.0 {
            choice.reference.extend(
                ranked[2..]
                    .iter()
                    .filter(|c| {
                        let l = lean(*c);
                        l != 0.0 && l.signum() == dot.signum()
                    })
                    .map(|c| c.label),
            );
        }
    }
    if ranked.len() > 2 {
        log::debug!(
            "cutline split the frame into {} regions, {} on the reference side",
            ranked.len(),
            choice.reference.len()
        );
    }
    (Some(choice), labelling)
}

/// Classify one raster's frame into kept and discarded pixels.
///
/// `cutline` must already be in the raster frame and reach the frame
/// border at both ends. The second-largest side, together with any
/// smaller region on its side, is the reference region: its holes are
/// filled and the first candidate receives everything else, including
/// the cutline itself. Calling this with `direction` and
/// with its negation therefore yields complementary masks.
///
/// # Errors
///
/// Returns [`SeamError::ClassificationDegenerate`] when the result keeps
/// every pixel or none.
pub fn classify(
    cutline: &GrayImage,
    direction: KeepDirection,
    raster_id: RasterId,
    config: &MergeConfig,
) -> Result<KeepMask, SeamError> {
    let dims = Dimensions::of(cutline);
    let longest = dims.width.max(dims.height);
    let factor = if longest > config.classifier_max_side {
        longest.div_ceil(config.classifier_max_side)
    } else {
        1
    };

    let (keep, sides, tie) = if factor > 1 {
        classify_downsampled(cutline, direction, factor)
    } else {
        let (choice, labelling) = choose_side(cutline, direction);
        match choice {
            None => (GrayImage::new(dims.width, dims.height), 0, false),
            Some(choice) => {
                let reference = fill_holes(&labelling.extract_all(&choice.reference));
                let keep = if choice.keep_second {
                    reference
                } else {
                    raster::invert(&reference)
                };
                log::debug!(
                    "{raster_id} raster keeps region {} of {}",
                    if choice.keep_second { 2 } else { 1 },
                    choice.sides
                );
                (keep, choice.sides, choice.tie)
            }
        }
    };

    let kept = raster::count_set(&keep);
    if kept == 0 || kept == dims.area() {
        return Err(SeamError::ClassificationDegenerate {
            raster: raster_id,
            full: kept != 0,
            diagnostic: keep,
        });
    }
    Ok(KeepMask {
        mask: keep,
        sides,
        tie,
        downsample: factor,
    })
}

/// Side decision on a max-pooled copy, then full-resolution relabelling
/// inside the band of blocks the cutline touches.
fn classify_downsampled(
    cutline: &GrayImage,
    direction: KeepDirection,
    factor: u32,
) -> (GrayImage, usize, bool) {
    let dims = Dimensions::of(cutline);
    let low = raster::downsample_max(cutline, factor);
    let (choice, labelling) = choose_side(&low, direction);
    let Some(choice) = choice else {
        return (GrayImage::new(dims.width, dims.height), 0, false);
    };
    if choice.reference.is_empty() {
        let all = GrayImage::from_pixel(dims.width, dims.height, Luma([ON]));
        return (all, choice.sides, choice.tie);
    }
    log::debug!(
        "side decision on {}x{} copy (factor {factor})",
        low.width(),
        low.height()
    );

    let reference_low = labelling.extract_all(&choice.reference);
    let band_low = imageproc::morphology::dilate(&low, Norm::LInf, 1);
    drop(labelling);
    drop(low);
    let coarse = raster::upsample_blocks(&reference_low, factor, dims);
    let band = raster::upsample_blocks(&band_low, factor, dims);
    drop(reference_low);
    drop(band_low);

    let mut reference = raster::and(&coarse, &raster::invert(&band));
    drop(coarse);
    grow_into_band(&mut reference, &band, cutline);
    drop(band);
    let reference = fill_holes(&reference);

    let keep = if choice.keep_second {
        reference
    } else {
        raster::invert(&reference)
    };
    (keep, choice.sides, choice.tie)
}

/// Flood the reference region 4-connectedly into band pixels that are
/// not on the cutline.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn grow_into_band(reference: &mut GrayImage, band: &GrayImage, cutline: &GrayImage) {
    let dims = Dimensions::of(reference);
    let open = |p: PixelCoord, reference: &GrayImage| {
        raster::is_set(band, p) && !raster::is_set(cutline, p) && !raster::is_set(reference, p)
    };
    let mut stack: Vec<PixelCoord> = raster::set_pixels(reference).collect();
    while let Some(p) = stack.pop() {
        for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let (nx, ny) = (i64::from(p.x) + dx, i64::from(p.y) + dy);
            if !dims.contains(nx, ny) {
                continue;
            }
            let q = PixelCoord::new(nx as u32, ny as u32);
            if open(q, reference) {
                reference.put_pixel(q.x, q.y, Luma([ON]));
                stack.push(q);
            }
        }
    }
}
