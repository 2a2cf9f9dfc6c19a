//! End-to-end checks of the overlap, centerline, cost, solver and keep
//! stages on small synthetic grids.

#![allow(clippy::unwrap_used)]

use geo::polygon;
use image::{GrayImage, Luma, Rgb, RgbImage};
use orthoseam_pipeline::centerline::extract_centerline;
use orthoseam_pipeline::cost::build_cost_field;
use orthoseam_pipeline::keep::classify;
use orthoseam_pipeline::morphology::FloatImage;
use orthoseam_pipeline::overlap::find_patches;
use orthoseam_pipeline::raster::{self, ON, PixelRect};
use orthoseam_pipeline::solver::{least_cost_path, solve_path, step_costs};
use orthoseam_pipeline::{
    Affine, BinaryMask, Dimensions, KeepDirection, MergeConfig, Pipeline, PixelCoord, Point,
    RasterGrid, RasterId, SeamError,
};

fn rects(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> BinaryMask {
    let image = GrayImage::from_fn(w, h, |x, y| {
        let on = rects
            .iter()
            .any(|&(x0, y0, x1, y1)| x >= x0 && x < x1 && y >= y0 && y < y1);
        Luma([if on { ON } else { 0 }])
    });
    BinaryMask::new(image, Affine::IDENTITY)
}

#[test]
fn identical_footprints_overlap_completely() {
    let a = rects(100, 100, &[(0, 0, 100, 100)]);
    let patches = find_patches(&a, &a.clone(), 0.0).unwrap();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].area, 10_000);
}

#[test]
fn two_corner_overlaps_give_two_patches() {
    // An L of the first footprint meets the second in two 20x20 corners.
    let a = rects(100, 100, &[(0, 0, 20, 100), (0, 80, 100, 100)]);
    let b = rects(100, 100, &[(0, 0, 20, 20), (80, 80, 100, 100), (40, 40, 60, 60)]);
    let patches = find_patches(&a, &b, 0.0).unwrap();
    assert_eq!(patches.len(), 2);
    assert!(patches.iter().all(|p| p.area == 400));
    let total: u64 = patches.iter().map(|p| p.area).sum();
    assert_eq!(total, raster::count_set(&raster::and(&a.image, &b.image)));
}

#[test]
fn raising_threshold_never_adds_patches() {
    let a = rects(100, 100, &[(0, 0, 100, 100)]);
    let b = rects(
        100,
        100,
        &[(0, 0, 30, 30), (50, 0, 60, 10), (70, 70, 75, 75), (90, 90, 92, 92)],
    );
    let mut previous = usize::MAX;
    for threshold in [0.0, 0.001, 0.005, 0.01, 0.05, 0.5] {
        let count = find_patches(&a, &b, threshold).unwrap().len();
        assert!(count <= previous, "threshold {threshold}: {count} > {previous}");
        assert!(count >= 1);
        previous = count;
    }

    // Every patch is below half the frame: the filter would drop them
    // all, so the largest survives on its own.
    let survivors = find_patches(&a, &b, 0.5).unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].area, 900);
}

#[test]
fn straight_band_has_straight_centerline() {
    let frame = Dimensions {
        width: 110,
        height: 15,
    };
    let mask = rects(110, 15, &[(5, 5, 105, 10)]).image;
    let bbox = PixelRect::bounding(raster::set_pixels(&mask)).unwrap();
    let outline = polygon![(x: 4.5, y: 4.5), (x: 104.5, y: 4.5), (x: 104.5, y: 9.5), (x: 4.5, y: 9.5)];
    let centerline = extract_centerline(
        &raster::crop(&mask, bbox),
        bbox,
        frame,
        [Point::new(4.5, 7.0), Point::new(104.5, 7.0)],
        &outline,
        &MergeConfig::default(),
        0,
    )
    .unwrap();

    assert!(centerline.path.iter().all(|p| p.y == 7));
    let (start, end) = (centerline.start().unwrap(), centerline.end().unwrap());
    assert!(start.x.abs_diff(5) <= 1, "{start:?}");
    assert!(end.x.abs_diff(104) <= 1, "{end:?}");
}

#[test]
fn solver_follows_single_preferred_row() {
    let dims = Dimensions {
        width: 60,
        height: 21,
    };
    let mask = rects(dims.width, dims.height, &[(0, 0, 60, 21)]).image;
    let preference = FloatImage::from_fn(dims.width, dims.height, |_, y| {
        Luma([if y == 10 { 1.0 } else { 0.5 }])
    });
    let centerline: Vec<PixelCoord> = (0..60).map(|x| PixelCoord::new(x, 10)).collect();
    let config = MergeConfig {
        segment_count: Some(1),
        ..MergeConfig::default()
    };

    let path = solve_path(&preference, &mask, &centerline, &config, 0).unwrap();
    assert_eq!(path.pixels, centerline);

    // The bare search agrees once the endpoints are fixed.
    let costs = step_costs(&preference, &mask);
    let bare = least_cost_path(&costs, PixelCoord::new(0, 10), PixelCoord::new(59, 10)).unwrap();
    assert_eq!(bare, centerline);
}

#[test]
fn solved_path_is_eight_connected() {
    let dims = Dimensions {
        width: 40,
        height: 40,
    };
    let mask = rects(dims.width, dims.height, &[(0, 0, 40, 40)]).image;
    let preference = FloatImage::from_fn(40, 40, |x, y| Luma([f64::from((x * 7 + y * 13) % 10) / 10.0]));
    let centerline: Vec<PixelCoord> = (0..40).map(|i| PixelCoord::new(i, i)).collect();
    let path = solve_path(&preference, &mask, &centerline, &MergeConfig::default(), 0).unwrap();
    assert_eq!(path.start(), Some(PixelCoord::new(0, 0)));
    assert_eq!(path.end(), Some(PixelCoord::new(39, 39)));
    assert!(path.pixels.windows(2).all(|w| w[0].touches(w[1])));
}

#[test]
fn cost_field_is_bounded_and_masked() {
    let mask = rects(30, 20, &[(5, 3, 25, 17)]).image;
    let first = RgbImage::from_fn(30, 20, |x, y| Rgb([(x * 8) as u8, (y * 12) as u8, 50]));
    let second = RgbImage::from_fn(30, 20, |x, _| Rgb([200, (x * 4) as u8, 90]));
    let centerline: Vec<PixelCoord> = (5..25).map(|x| PixelCoord::new(x, 10)).collect();
    let field = build_cost_field(&first, &second, &mask, &centerline, 1.0);
    for (x, y, v) in field.grid.enumerate_pixels() {
        let v = v.0[0];
        if raster::is_set(&mask, PixelCoord::new(x, y)) {
            assert!((0.0..=1.0).contains(&v), "({x}, {y}) = {v}");
        } else {
            assert!(v == 0.0, "({x}, {y}) = {v}");
        }
    }
}

#[test]
fn opposite_directions_give_complementary_masks() {
    let cut = GrayImage::from_fn(40, 30, |x, y| Luma([if x == 10 + y / 2 { ON } else { 0 }]));
    let config = MergeConfig::default();
    let v = KeepDirection::new(0.8, -0.6).unwrap();
    let a = classify(&cut, v, RasterId::First, &config).unwrap();
    let b = classify(&cut, v.negated(), RasterId::Second, &config).unwrap();
    for (pa, pb) in a.mask.pixels().zip(b.mask.pixels()) {
        assert_ne!(pa.0[0] != 0, pb.0[0] != 0);
    }
}

#[test]
fn missing_cutline_is_never_silently_kept() {
    let nothing = GrayImage::new(25, 25);
    let east = KeepDirection::new(1.0, 0.0).unwrap();
    let result = classify(&nothing, east, RasterId::First, &MergeConfig::default());
    assert!(matches!(
        result,
        Err(SeamError::ClassificationDegenerate {
            raster: RasterId::First,
            full: true,
            ..
        })
    ));
}

/// Two 60x100 rasters overlapping in a 20 pixel wide band, the second
/// missing a 20x20 block in the middle of that band.
fn notched_pair() -> (RasterGrid, RasterGrid) {
    let a = RasterGrid::new(
        RgbImage::from_pixel(60, 100, Rgb([200, 120, 40])),
        Affine::north_up(0.0, 100.0, 1.0, 1.0),
    );
    let b = RasterGrid::new(
        RgbImage::from_fn(60, 100, |x, y| {
            if x < 20 && (40..60).contains(&y) {
                Rgb([0, 0, 0])
            } else {
                Rgb([60, 140, 220])
            }
        }),
        Affine::north_up(40.0, 100.0, 1.0, 1.0),
    );
    (a, b)
}

#[test]
fn notched_overlap_is_seamed_around_the_gap() {
    let (a, b) = notched_pair();
    let classified = Pipeline::new(a, b, MergeConfig::default())
        .analyze_overlap()
        .unwrap()
        .find_anchors()
        .unwrap()
        .cut()
        .unwrap()
        .classify()
        .unwrap();
    assert_eq!(classified.seams().len(), 2);

    // One connector bridges the gap along the first raster's edge, and
    // no part of the seam reaches into the second raster's own area.
    let stitched = classified.stitched();
    assert_eq!(stitched.connectors.len(), 1);
    let (from, to) = stitched.connectors[0];
    for end in [from, to] {
        assert!((58..=61).contains(&end.x), "{end:?}");
        assert!((40..=60).contains(&end.y), "{end:?}");
    }
    assert!(stitched.chain.windows(2).all(|w| w[0].touches(w[1])));
    assert!(
        stitched.chain.iter().all(|p| (39..=61).contains(&p.x)),
        "{:?}",
        stitched.chain.iter().map(|p| p.x).max()
    );

    let result = classified.into_result();
    let [keep_a, keep_b] = &result.keep_masks;
    // The gap is filled by the first raster.
    assert!(raster::is_set(&keep_a.image, PixelCoord::new(50, 50)));
    for y in (0..40).chain(60..100) {
        for x in 40..60 {
            let kept_a = raster::is_set(&keep_a.image, PixelCoord::new(x, y));
            let kept_b = raster::is_set(&keep_b.image, PixelCoord::new(x - 40, y));
            assert!(kept_a || kept_b, "({x}, {y}) kept by neither raster");
            if kept_a && kept_b {
                assert!(
                    raster::is_set(&result.cutline.image, PixelCoord::new(x, y)),
                    "({x}, {y}) kept twice off the cutline"
                );
            }
        }
    }
}
