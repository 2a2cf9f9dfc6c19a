//! Per-patch record handed to the merge orchestrator.

use serde::{Deserialize, Serialize};

use crate::overlap::OverlapPatch;
use crate::raster::Affine;
use crate::types::PixelCoord;

/// What the next merge step needs to know about one seamed patch.
///
/// Start and end are `[col, row]` relative to the patch's own frame and
/// may fall outside it when the cutline was extended past the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchTelemetry {
    /// Affine coefficients `[a, b, c, d, e, f]` of the cropped patch.
    pub transform: [f64; 6],
    /// Patch height in pixels.
    pub rows: u32,
    /// Patch width in pixels.
    pub cols: u32,
    /// Number of overlap pixels in the patch.
    pub pixel_count: u64,
    /// First cutline pixel.
    pub start: [i64; 2],
    /// Last cutline pixel.
    pub end: [i64; 2],
}

impl PatchTelemetry {
    /// Build the record for `patch` of a frame with transform `frame`,
    /// given the cutline's end pixels in that frame.
    #[must_use]
    pub fn new(patch: &OverlapPatch, frame: Affine, start: PixelCoord, end: PixelCoord) -> Self {
        let local = |p: PixelCoord| {
            [
                i64::from(p.x) - i64::from(patch.bbox.x),
                i64::from(p.y) - i64::from(patch.bbox.y),
            ]
        };
        Self {
            transform: patch.transform(frame).to_array(),
            rows: patch.bbox.height,
            cols: patch.bbox.width,
            pixel_count: patch.area,
            start: local(start),
            end: local(end),
        }
    }

    /// The patch transform.
    #[must_use]
    pub const fn affine(&self) -> Affine {
        Affine::new(self.transform)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    use crate::overlap::find_patches;
    use crate::raster::{BinaryMask, ON};

    fn patch() -> (OverlapPatch, Affine) {
        let frame = Affine::north_up(1000.0, 500.0, 0.5, 0.5);
        let a = BinaryMask::new(
            GrayImage::from_fn(40, 30, |x, _| Luma([if x < 25 { ON } else { 0 }])),
            frame,
        );
        let b = BinaryMask::new(
            GrayImage::from_fn(40, 30, |x, y| Luma([if x >= 10 && y >= 4 { ON } else { 0 }])),
            frame,
        );
        (find_patches(&a, &b, 0.0).unwrap().remove(0), frame)
    }

    #[test]
    fn record_is_patch_relative() {
        let (patch, frame) = patch();
        let t = PatchTelemetry::new(&patch, frame, PixelCoord::new(17, 4), PixelCoord::new(17, 29));
        assert_eq!((t.cols, t.rows), (15, 26));
        assert_eq!(t.pixel_count, 15 * 26);
        assert_eq!(t.start, [7, 0]);
        assert_eq!(t.end, [7, 25]);
        assert!((t.transform[2] - 1005.0).abs() < 1e-12);
        assert!((t.transform[5] - 498.0).abs() < 1e-12);
    }

    #[test]
    fn json_round_trip() {
        let (patch, frame) = patch();
        let t = PatchTelemetry::new(&patch, frame, PixelCoord::new(5, 0), PixelCoord::new(39, 29));
        assert_eq!(t.start, [-5, -4]);
        let json = serde_json::to_string(&t).unwrap();
        let back: PatchTelemetry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.affine(), patch.transform(frame));
    }
}
