//! Raster grids, binary masks, and the affine frames they live in.
//!
//! Every grid carries an [`Affine`] mapping continuous pixel space
//! (column, row; pixel `(c, r)` covers `[c, c+1) x [r, r+1)`) to world
//! space. Masks in different frames are never compared directly: they
//! are first brought into a shared frame with [`reproject`].

use image::{GrayImage, ImageBuffer, Luma, Pixel};
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PixelCoord, Point, RgbImage, SeamError};

/// Mask value for "set" pixels.
pub const ON: u8 = 255;

/// Relative tolerance when comparing pixel sizes of two frames.
const PIXEL_SIZE_TOLERANCE: f64 = 1e-6;

/// Six-parameter affine transform from pixel space to world space.
///
/// `world_x = a * col + b * row + c` and `world_y = d * col + e * row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    /// Pixel width (x scale).
    pub a: f64,
    /// Row rotation term.
    pub b: f64,
    /// World x of the top-left corner.
    pub c: f64,
    /// Column rotation term.
    pub d: f64,
    /// Pixel height (y scale, negative for north-up rasters).
    pub e: f64,
    /// World y of the top-left corner.
    pub f: f64,
}

impl Affine {
    /// Identity transform: world space equals pixel space.
    pub const IDENTITY: Self = Self::new([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

    /// Build a transform from its six coefficients `[a, b, c, d, e, f]`.
    #[must_use]
    pub const fn new(coefficients: [f64; 6]) -> Self {
        let [a, b, c, d, e, f] = coefficients;
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with the given top-left corner and pixel size.
    ///
    /// `pixel_height` is the positive ground size of a row; the stored
    /// `e` coefficient is its negation.
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new([pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y])
    }

    /// The six coefficients `[a, b, c, d, e, f]`.
    #[must_use]
    pub const fn to_array(self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Map a continuous pixel-space point to world space.
    #[must_use]
    pub fn apply(self, p: Point) -> Point {
        Point::new(
            self.a.mul_add(p.x, self.b.mul_add(p.y, self.c)),
            self.d.mul_add(p.x, self.e.mul_add(p.y, self.f)),
        )
    }

    /// World position of a pixel's centre.
    #[must_use]
    pub fn pixel_center(self, pixel: PixelCoord) -> Point {
        self.apply(Point::new(
            f64::from(pixel.x) + 0.5,
            f64::from(pixel.y) + 0.5,
        ))
    }

    /// Inverse transform, or `None` when the matrix is singular.
    #[must_use]
    pub fn invert(self) -> Option<Self> {
        let det = self.a.mul_add(self.e, -(self.b * self.d));
        if det.abs() < f64::EPSILON || !det.is_finite() {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(Self {
            a: ia,
            b: ib,
            c: -ia.mul_add(self.c, ib * self.f),
            d: id,
            e: ie,
            f: -id.mul_add(self.c, ie * self.f),
        })
    }

    /// Map a world point into index space, where pixel centres sit on
    /// integer coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::FrameMismatch`] for a singular transform.
    pub fn world_to_index(self, world: Point) -> Result<Point, SeamError> {
        let inverse = self
            .invert()
            .ok_or_else(|| SeamError::FrameMismatch("singular affine transform".to_string()))?;
        let p = inverse.apply(world);
        Ok(Point::new(p.x - 0.5, p.y - 0.5))
    }

    /// Map an index-space point (pixel centres on integers) to world.
    #[must_use]
    pub fn index_to_world(self, p: Point) -> Point {
        self.apply(Point::new(p.x + 0.5, p.y + 0.5))
    }

    /// Transform of a sub-grid whose top-left pixel is `(col, row)` in
    /// this frame.
    #[must_use]
    pub fn translated(self, col: i64, row: i64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let origin = self.apply(Point::new(col as f64, row as f64));
        Self {
            c: origin.x,
            f: origin.y,
            ..self
        }
    }

    /// Transform of a grid whose pixels are `factor` times larger.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            a: self.a * factor,
            b: self.b * factor,
            d: self.d * factor,
            e: self.e * factor,
            ..self
        }
    }

    /// Whether the transform has no rotation or shear terms.
    #[must_use]
    pub fn is_north_up(self) -> bool {
        self.b.abs() < f64::EPSILON && self.d.abs() < f64::EPSILON
    }

    /// Integer pixel offset of this frame's origin inside `other`.
    ///
    /// Both frames must be north-up with the same pixel size and
    /// origins that differ by a whole number of pixels.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::FrameMismatch`] otherwise.
    #[allow(clippy::cast_possible_truncation)]
    pub fn offset_in(self, other: Self) -> Result<(i64, i64), SeamError> {
        self.check_compatible(other)?;
        let col = (self.c - other.c) / other.a;
        let row = (self.f - other.f) / other.e;
        let (col_r, row_r) = (col.round(), row.round());
        if (col - col_r).abs() > 1e-3 || (row - row_r).abs() > 1e-3 {
            return Err(SeamError::FrameMismatch(format!(
                "origins are not pixel aligned (offset {col:.4}, {row:.4})"
            )));
        }
        Ok((col_r as i64, row_r as i64))
    }

    fn check_compatible(self, other: Self) -> Result<(), SeamError> {
        if !self.is_north_up() || !other.is_north_up() {
            return Err(SeamError::FrameMismatch(
                "rotated transforms are not supported".to_string(),
            ));
        }
        let same = |p: f64, q: f64| (p - q).abs() <= PIXEL_SIZE_TOLERANCE * p.abs().max(q.abs());
        if !same(self.a, other.a) || !same(self.e, other.e) {
            return Err(SeamError::FrameMismatch(format!(
                "pixel sizes differ ({}, {}) vs ({}, {})",
                self.a, self.e, other.a, other.e
            )));
        }
        Ok(())
    }

    /// Smallest frame at this pixel size covering both grids.
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::FrameMismatch`] when the grids do not share
    /// a pixel lattice.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn union_frame(
        first: (Self, Dimensions),
        second: (Self, Dimensions),
    ) -> Result<(Self, Dimensions), SeamError> {
        let (col, row) = second.0.offset_in(first.0)?;
        let min_col = col.min(0);
        let min_row = row.min(0);
        let max_col = (col + i64::from(second.1.width)).max(i64::from(first.1.width));
        let max_row = (row + i64::from(second.1.height)).max(i64::from(first.1.height));
        let width = u32::try_from(max_col - min_col)
            .map_err(|_| SeamError::FrameMismatch("union frame too wide".to_string()))?;
        let height = u32::try_from(max_row - min_row)
            .map_err(|_| SeamError::FrameMismatch("union frame too tall".to_string()))?;
        Ok((
            first.0.translated(min_col, min_row),
            Dimensions { width, height },
        ))
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Rectangle covering a whole grid.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self {
            x: 0,
            y: 0,
            width: dimensions.width,
            height: dimensions.height,
        }
    }

    /// Bounding box of a set of pixels, or `None` for an empty set.
    #[must_use]
    pub fn bounding(pixels: impl IntoIterator<Item = PixelCoord>) -> Option<Self> {
        let mut it = pixels.into_iter();
        let first = it.next()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for p in it {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        })
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width).max(other.x + other.width);
        let y1 = (self.y + self.height).max(other.y + other.height);
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Grow by `margin` pixels on every side, clipped to `dimensions`.
    #[must_use]
    pub fn expanded(self, margin: u32, dimensions: Dimensions) -> Self {
        let x0 = self.x.saturating_sub(margin);
        let y0 = self.y.saturating_sub(margin);
        let x1 = (self.x + self.width).saturating_add(margin).min(dimensions.width);
        let y1 = (self.y + self.height).saturating_add(margin).min(dimensions.height);
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Number of pixels covered.
    #[must_use]
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Dimensions of the rectangle.
    #[must_use]
    pub const fn dimensions(self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Whether a pixel lies inside.
    #[must_use]
    pub const fn contains(self, p: PixelCoord) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.x + self.width && p.y < self.y + self.height
    }

    /// Shift a pixel from the enclosing grid into rectangle-local
    /// coordinates. The pixel must lie inside.
    #[must_use]
    pub const fn to_local(self, p: PixelCoord) -> PixelCoord {
        PixelCoord::new(p.x - self.x, p.y - self.y)
    }

    /// Shift a rectangle-local pixel back to the enclosing grid.
    #[must_use]
    pub const fn to_global(self, p: PixelCoord) -> PixelCoord {
        PixelCoord::new(p.x + self.x, p.y + self.y)
    }
}

/// A colour raster in its own affine frame.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    /// Colour samples; all-zero pixels are background.
    pub image: RgbImage,
    /// Pixel to world mapping.
    pub transform: Affine,
}

impl RasterGrid {
    /// Wrap a colour image and its transform.
    #[must_use]
    pub const fn new(image: RgbImage, transform: Affine) -> Self {
        Self { image, transform }
    }

    /// Grid dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.image)
    }
}

/// A {0, 255} mask in its own affine frame.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    /// Mask pixels: [`ON`] or 0.
    pub image: GrayImage,
    /// Pixel to world mapping.
    pub transform: Affine,
}

impl BinaryMask {
    /// Wrap a mask image and its transform.
    #[must_use]
    pub const fn new(image: GrayImage, transform: Affine) -> Self {
        Self { image, transform }
    }

    /// Footprint of a raster: pixels where any channel is non-zero.
    #[must_use]
    pub fn footprint(raster: &RasterGrid) -> Self {
        let image = GrayImage::from_fn(raster.image.width(), raster.image.height(), |x, y| {
            let px = raster.image.get_pixel(x, y);
            Luma([if px.0.iter().any(|&c| c != 0) { ON } else { 0 }])
        });
        Self::new(image, raster.transform)
    }

    /// Grid dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.image)
    }

    /// Number of set pixels.
    #[must_use]
    pub fn count(&self) -> u64 {
        count_set(&self.image)
    }

    /// Bring this mask into another frame (nearest neighbour).
    ///
    /// # Errors
    ///
    /// Returns [`SeamError::FrameMismatch`] for a singular transform.
    pub fn reproject(&self, target: Affine, dimensions: Dimensions) -> Result<Self, SeamError> {
        let image = reproject(&self.image, self.transform, target, dimensions)?;
        Ok(Self::new(image, target))
    }
}

/// Number of non-zero pixels in a mask image.
#[must_use]
pub fn count_set(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}

/// Whether a pixel of a mask image is set.
#[must_use]
pub fn is_set(mask: &GrayImage, p: PixelCoord) -> bool {
    mask.get_pixel(p.x, p.y).0[0] != 0
}

/// All set pixels of a mask, in row-major order.
pub fn set_pixels(mask: &GrayImage) -> impl Iterator<Item = PixelCoord> + '_ {
    mask.enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] != 0)
        .map(|(x, y, _)| PixelCoord::new(x, y))
}

/// Mask Frame Transform: resample an image from one affine frame into
/// another by nearest neighbour. Pixels falling outside the source are
/// left at zero.
///
/// # Errors
///
/// Returns [`SeamError::FrameMismatch`] when `source` cannot be inverted.
#[allow(clippy::cast_possible_truncation)]
pub fn reproject<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    source: Affine,
    target: Affine,
    dimensions: Dimensions,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, SeamError>
where
    P: Pixel + 'static,
{
    let inverse = source
        .invert()
        .ok_or_else(|| SeamError::FrameMismatch("singular source transform".to_string()))?;
    let src_dims = Dimensions::of(image);
    let mut out = ImageBuffer::new(dimensions.width, dimensions.height);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let world = target.pixel_center(PixelCoord::new(x, y));
        let src = inverse.apply(world);
        let (sx, sy) = (src.x.floor() as i64, src.y.floor() as i64);
        if src_dims.contains(sx, sy) {
            #[allow(clippy::cast_sign_loss)]
            let value = *image.get_pixel(sx as u32, sy as u32);
            *px = value;
        }
    }
    Ok(out)
}

/// Copy a rectangle out of an image.
#[must_use]
pub fn crop<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, rect: PixelRect) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Paste a rectangle-local mask back into a canvas of `dimensions`.
#[must_use]
pub fn uncrop(local: &GrayImage, rect: PixelRect, dimensions: Dimensions) -> GrayImage {
    let mut out = GrayImage::new(dimensions.width, dimensions.height);
    image::imageops::replace(&mut out, local, i64::from(rect.x), i64::from(rect.y));
    out
}

/// Downsample a mask by an integer factor, setting an output pixel when
/// any pixel of its block is set (max pooling).
#[must_use]
pub fn downsample_max(mask: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 {
        return mask.clone();
    }
    let width = mask.width().div_ceil(factor);
    let height = mask.height().div_ceil(factor);
    let mut out = GrayImage::new(width, height);
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] != 0 {
            out.put_pixel(x / factor, y / factor, Luma([ON]));
        }
    }
    out
}

/// Downsample a mask by an integer factor, sampling the pixel nearest
/// to each block centre.
#[must_use]
pub fn downsample_nearest(mask: &GrayImage, factor: u32) -> GrayImage {
    if factor <= 1 {
        return mask.clone();
    }
    let width = mask.width().div_ceil(factor);
    let height = mask.height().div_ceil(factor);
    GrayImage::from_fn(width, height, |x, y| {
        let sx = (x * factor + factor / 2).min(mask.width() - 1);
        let sy = (y * factor + factor / 2).min(mask.height() - 1);
        *mask.get_pixel(sx, sy)
    })
}

/// Undo [`downsample_max`]: every pixel of `dimensions` takes the value
/// of the block it fell into.
#[must_use]
pub fn upsample_blocks(mask: &GrayImage, factor: u32, dimensions: Dimensions) -> GrayImage {
    let factor = factor.max(1);
    GrayImage::from_fn(dimensions.width, dimensions.height, |x, y| {
        let sx = (x / factor).min(mask.width().saturating_sub(1));
        let sy = (y / factor).min(mask.height().saturating_sub(1));
        mask.get_pixel_checked(sx, sy).copied().unwrap_or(Luma([0]))
    })
}

/// Elementwise AND of two equally sized masks.
#[must_use]
pub fn and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let on = a.get_pixel(x, y).0[0] != 0 && b.get_pixel(x, y).0[0] != 0;
        Luma([if on { ON } else { 0 }])
    })
}

/// Elementwise OR of two equally sized masks.
#[must_use]
pub fn or(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let on = a.get_pixel(x, y).0[0] != 0 || b.get_pixel(x, y).0[0] != 0;
        Luma([if on { ON } else { 0 }])
    })
}

/// Logical complement of a mask.
#[must_use]
pub fn invert(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] == 0 { ON } else { 0 }])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn affine_round_trip() {
        let t = Affine::north_up(500.0, 1000.0, 0.5, 0.5);
        let inv = t.invert().unwrap();
        let p = Point::new(12.0, 7.0);
        let back = inv.apply(t.apply(p));
        assert!(back.distance(p) < 1e-9);
    }

    #[test]
    fn affine_index_space_uses_pixel_centres() {
        let t = Affine::north_up(0.0, 10.0, 1.0, 1.0);
        let centre = t.pixel_center(PixelCoord::new(2, 3));
        assert!(centre.distance(Point::new(2.5, 6.5)) < 1e-12);
        let idx = t.world_to_index(centre).unwrap();
        assert!(idx.distance(Point::new(2.0, 3.0)) < 1e-12);
    }

    #[test]
    fn singular_affine_is_rejected() {
        let t = Affine::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(t.invert().is_none());
        assert!(matches!(
            t.world_to_index(Point::new(0.0, 0.0)),
            Err(SeamError::FrameMismatch(_))
        ));
    }

    #[test]
    fn offset_between_aligned_frames() {
        let a = Affine::north_up(100.0, 200.0, 2.0, 2.0);
        let b = Affine::north_up(110.0, 190.0, 2.0, 2.0);
        assert_eq!(b.offset_in(a).unwrap(), (5, 5));
    }

    #[test]
    fn offset_rejects_different_gsd() {
        let a = Affine::north_up(0.0, 0.0, 1.0, 1.0);
        let b = Affine::north_up(0.0, 0.0, 2.0, 2.0);
        assert!(matches!(b.offset_in(a), Err(SeamError::FrameMismatch(_))));
    }

    #[test]
    fn union_frame_covers_both() {
        let a = Affine::north_up(0.0, 100.0, 1.0, 1.0);
        let b = Affine::north_up(-10.0, 90.0, 1.0, 1.0);
        let (t, d) = Affine::union_frame((a, dims(50, 50)), (b, dims(30, 80))).unwrap();
        assert_eq!(d, dims(60, 90));
        assert!((t.c + 10.0).abs() < 1e-12);
        assert!((t.f - 100.0).abs() < 1e-12);
    }

    #[test]
    fn reproject_shifts_content() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(0, 0, Luma([ON]));
        let src = Affine::north_up(10.0, 10.0, 1.0, 1.0);
        let dst = Affine::north_up(8.0, 12.0, 1.0, 1.0);
        let out = reproject(&mask, src, dst, dims(8, 8)).unwrap();
        assert_eq!(count_set(&out), 1);
        assert!(is_set(&out, PixelCoord::new(2, 2)));
    }

    #[test]
    fn footprint_marks_non_black() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(1, 0, image::Rgb([0, 0, 9]));
        let fp = BinaryMask::footprint(&RasterGrid::new(img, Affine::IDENTITY));
        assert_eq!(fp.count(), 1);
        assert!(is_set(&fp.image, PixelCoord::new(1, 0)));
    }

    #[test]
    fn rect_bounding_and_expand() {
        let rect = PixelRect::bounding([PixelCoord::new(3, 4), PixelCoord::new(6, 5)]).unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 3,
                y: 4,
                width: 4,
                height: 2
            }
        );
        let grown = rect.expanded(5, dims(8, 20));
        assert_eq!((grown.x, grown.y, grown.width, grown.height), (0, 0, 8, 11));
        assert!(PixelRect::bounding(std::iter::empty()).is_none());
    }

    #[test]
    fn downsample_max_keeps_thin_lines() {
        let mut mask = GrayImage::new(8, 8);
        for x in 0..8 {
            mask.put_pixel(x, 5, Luma([ON]));
        }
        let small = downsample_max(&mask, 4);
        assert_eq!(small.dimensions(), (2, 2));
        assert!(is_set(&small, PixelCoord::new(0, 1)));
        assert!(is_set(&small, PixelCoord::new(1, 1)));
        assert!(!is_set(&small, PixelCoord::new(0, 0)));
    }

    #[test]
    fn downsample_nearest_samples_block_centres() {
        let mut mask = GrayImage::new(9, 4);
        mask.put_pixel(6, 2, Luma([ON]));
        mask.put_pixel(1, 1, Luma([ON]));
        let small = downsample_nearest(&mask, 4);
        assert_eq!(small.dimensions(), (3, 1));
        assert!(is_set(&small, PixelCoord::new(1, 0)));
        assert!(!is_set(&small, PixelCoord::new(0, 0)));
    }

    #[test]
    fn crop_uncrop_round_trip() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(4, 6, Luma([ON]));
        let rect = PixelRect {
            x: 2,
            y: 3,
            width: 5,
            height: 5,
        };
        let local = crop(&mask, rect);
        assert!(is_set(&local, PixelCoord::new(2, 3)));
        let back = uncrop(&local, rect, dims(10, 10));
        assert_eq!(back, mask);
    }

    #[test]
    fn upsample_blocks_inverts_downsample() {
        let mut mask = GrayImage::new(10, 7);
        mask.put_pixel(5, 6, Luma([ON]));
        let low = downsample_max(&mask, 4);
        assert_eq!(low.dimensions(), (3, 2));
        let back = upsample_blocks(&low, 4, dims(10, 7));
        assert_eq!(count_set(&back), 12);
        assert!(is_set(&back, PixelCoord::new(4, 4)));
        assert!(is_set(&back, PixelCoord::new(7, 6)));
        assert!(!is_set(&back, PixelCoord::new(8, 6)));
    }
}
