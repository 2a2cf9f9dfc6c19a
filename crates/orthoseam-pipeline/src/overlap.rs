//! Overlap and gap analysis: split the intersection of two footprints
//! into connected patches.

use image::GrayImage;

use crate::morphology::{Component, Connectivity, label};
use crate::raster::{self, Affine, BinaryMask, PixelRect};
use crate::types::{Dimensions, Point, SeamError};

/// Tolerance when checking that two masks share a frame.
const FRAME_TOLERANCE: f64 = 1e-9;

/// One connected region where both footprints are valid.
#[derive(Debug, Clone)]
pub struct OverlapPatch {
    /// Patch pixels in the shared frame.
    pub mask: GrayImage,
    /// Bounding box inside the shared frame.
    pub bbox: PixelRect,
    /// Number of patch pixels.
    pub area: u64,
    /// Mean pixel index (column, row) in the shared frame.
    pub centroid: Point,
}

impl OverlapPatch {
    fn from_component(mask: GrayImage, component: &Component) -> Self {
        Self {
            mask,
            bbox: component.bbox,
            area: component.area,
            centroid: component.centroid(),
        }
    }

    /// The patch mask cropped to its bounding box.
    #[must_use]
    pub fn cropped(&self) -> GrayImage {
        raster::crop(&self.mask, self.bbox)
    }

    /// Affine transform of the cropped patch given the shared frame's.
    #[must_use]
    pub fn transform(&self, frame: Affine) -> Affine {
        frame.translated(i64::from(self.bbox.x), i64::from(self.bbox.y))
    }

    /// Patch dimensions after cropping.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.bbox.dimensions()
    }
}

/// Split the overlap of two footprints into patches.
///
/// Both masks must already share one frame. Components are found with
/// 8-connectivity. Patches smaller than `min_area_fraction` of the frame
/// are dropped, so raising the threshold never adds patches. The one
/// exception to the filter: when every patch falls below the threshold,
/// the largest is kept anyway, and a lone patch is always kept. An
/// overlap therefore never yields zero patches. Patches are returned in
/// label order.
///
/// # Errors
///
/// Returns [`SeamError::FrameMismatch`] when the masks are in different
/// frames and [`SeamError::NoOverlap`] when they do not intersect.
#[allow(clippy::cast_precision_loss)]
pub fn find_patches(
    first: &BinaryMask,
    second: &BinaryMask,
    min_area_fraction: f64,
) -> Result<Vec<OverlapPatch>, SeamError> {
    check_same_frame(first, second)?;
    let overlap = raster::and(&first.image, &second.image);
    let labelling = label(&overlap, Connectivity::Eight);

    match labelling.components.as_slice() {
        [] => return Err(SeamError::NoOverlap),
        [single] => {
            log::debug!("overlap is a single patch of {} pixels", single.area);
            return Ok(vec![OverlapPatch::from_component(overlap, single)]);
        }
        _ => {}
    }

    let extent = first.dimensions().area() as f64;
    let min_area = min_area_fraction * extent;
    let mut kept: Vec<Component> = labelling
        .components
        .iter()
        .filter(|c| c.area as f64 >= min_area)
        .copied()
        .collect();
    if kept.is_empty()
        && let Some(largest) = labelling.by_area().first().copied()
    {
        log::warn!(
            "every overlap patch is below {min_area:.0} pixels, keeping the largest ({} pixels)",
            largest.area
        );
        kept.push(largest);
    }
    log::debug!(
        "overlap split into {} component(s), kept {}",
        labelling.components.len(),
        kept.len()
    );

    Ok(kept
        .into_iter()
        .map(|c| OverlapPatch::from_component(labelling.extract(c.label), &c))
        .collect())
}

fn check_same_frame(first: &BinaryMask, second: &BinaryMask) -> Result<(), SeamError> {
    if first.dimensions() != second.dimensions() {
        return Err(SeamError::FrameMismatch(format!(
            "footprints are {:?} and {:?}",
            first.dimensions(),
            second.dimensions()
        )));
    }
    let same = first
        .transform
        .to_array()
        .iter()
        .zip(second.transform.to_array())
        .all(|(a, b)| (a - b).abs() <= FRAME_TOLERANCE * a.abs().max(b.abs()).max(1.0));
    if same {
        Ok(())
    } else {
        Err(SeamError::FrameMismatch(
            "footprints use different affine transforms".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    use crate::raster::ON;

    fn mask(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> BinaryMask {
        let image = GrayImage::from_fn(w, h, |x, y| {
            let on = rects
                .iter()
                .any(|&(x0, y0, x1, y1)| x >= x0 && x < x1 && y >= y0 && y < y1);
            Luma([if on { ON } else { 0 }])
        });
        BinaryMask::new(image, Affine::IDENTITY)
    }

    #[test]
    fn identical_masks_give_one_patch() {
        let a = mask(100, 100, &[(0, 0, 100, 100)]);
        let patches = find_patches(&a, &a.clone(), 0.02).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].area, 10_000);
        assert_eq!(patches[0].bbox, PixelRect::full(a.dimensions()));
    }

    #[test]
    fn disjoint_footprints_fail() {
        let a = mask(50, 50, &[(0, 0, 20, 50)]);
        let b = mask(50, 50, &[(30, 0, 50, 50)]);
        assert!(matches!(find_patches(&a, &b, 0.0), Err(SeamError::NoOverlap)));
    }

    #[test]
    fn frame_mismatch_is_reported() {
        let a = mask(10, 10, &[(0, 0, 10, 10)]);
        let b = BinaryMask::new(a.image.clone(), Affine::north_up(5.0, 0.0, 1.0, 1.0));
        assert!(matches!(find_patches(&a, &b, 0.0), Err(SeamError::FrameMismatch(_))));
        let c = mask(10, 12, &[(0, 0, 10, 10)]);
        assert!(matches!(find_patches(&a, &c, 0.0), Err(SeamError::FrameMismatch(_))));
    }

    #[test]
    fn small_patches_are_dropped() {
        let a = mask(100, 100, &[(0, 0, 100, 100)]);
        let b = mask(100, 100, &[(0, 0, 30, 30), (90, 90, 95, 95)]);
        let patches = find_patches(&a, &b, 0.02).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].area, 900);
    }

    #[test]
    fn largest_survives_when_all_are_small() {
        let a = mask(100, 100, &[(0, 0, 100, 100)]);
        let b = mask(100, 100, &[(0, 0, 5, 5), (90, 90, 96, 96)]);
        let patches = find_patches(&a, &b, 0.5).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].area, 36);
    }

    #[test]
    fn patch_transform_follows_bbox() {
        let frame = Affine::north_up(100.0, 200.0, 2.0, 2.0);
        let mut a = mask(20, 20, &[(0, 0, 20, 20)]);
        let mut b = mask(20, 20, &[(5, 8, 20, 20)]);
        a.transform = frame;
        b.transform = frame;
        let patch = find_patches(&a, &b, 0.0).unwrap().remove(0);
        let t = patch.transform(frame);
        assert!((t.c - 110.0).abs() < 1e-12);
        assert!((t.f - 184.0).abs() < 1e-12);
        assert_eq!(patch.cropped().dimensions(), (15, 12));
    }
}
