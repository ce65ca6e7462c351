//! Integration tests for grid construction, algebra and decomposition.

use geo_common::{
    Extent, GeometryError, Grid, Pixel, PixelOffset, Point, Projection, RasterSize, Resolution,
    DEFAULT_TOLERANCE,
};

fn utm() -> Projection {
    Projection::Utm { zone: 33, north: true }
}

fn grid(xsize: usize, ysize: usize, res: f64) -> Grid {
    Grid::from_upper_left(
        400_000.0,
        5_800_000.0,
        Resolution::square(res).unwrap(),
        RasterSize::new(xsize, ysize).unwrap(),
        utm(),
    )
    .unwrap()
}

// ============================================================================
// Decomposition
// ============================================================================

#[test]
fn test_thousand_pixels_in_256_blocks() {
    let g = grid(1000, 1000, 30.0);
    let blocks = g.subgrids(RasterSize::new(256, 256).unwrap()).unwrap();

    assert_eq!(blocks.len(), 16);
    assert!(blocks.iter().all(|b| b.ny() == 4 && b.nx() == 4 && b.n() == 16));

    for b in &blocks {
        let expected_x = if b.is_last_x() { 232 } else { 256 };
        let expected_y = if b.is_last_y() { 232 } else { 256 };
        assert_eq!(b.grid().size(), RasterSize::new(expected_x, expected_y).unwrap());
    }

    let width: usize = blocks.iter().filter(|b| b.iy() == 0).map(|b| b.grid().size().x()).sum();
    let height: usize = blocks.iter().filter(|b| b.ix() == 0).map(|b| b.grid().size().y()).sum();
    assert_eq!((width, height), (1000, 1000));

    let last = blocks.last().unwrap();
    assert!(last.grid().extent().equal(
        &Extent::new(
            400_000.0 + 768.0 * 30.0,
            400_000.0 + 1000.0 * 30.0,
            5_800_000.0 - 1000.0 * 30.0,
            5_800_000.0 - 768.0 * 30.0,
            utm()
        )
        .unwrap(),
        DEFAULT_TOLERANCE
    ));
}

#[test]
fn test_partition_property() {
    for &(xs, ys, bx, by) in &[(1000, 1000, 256, 256), (37, 11, 5, 3), (7, 9, 7, 9), (64, 3, 10, 1)] {
        let g = grid(xs, ys, 10.0);
        let blocks = g.subgrids(RasterSize::new(bx, by).unwrap()).unwrap();
        let mut hits = vec![0u8; xs * ys];

        for (i, b) in blocks.iter().enumerate() {
            assert_eq!(b.index(), i);
            let offset = b.grid().offset_in(&g).unwrap();
            assert_eq!(offset, b.offset());
            let size = b.grid().size();
            for y in offset.y..offset.y + size.y() {
                for x in offset.x..offset.x + size.x() {
                    hits[y * xs + x] += 1;
                }
            }
        }

        assert!(hits.iter().all(|&h| h == 1), "gaps or overlaps for {}x{}", xs, ys);
    }
}

#[test]
fn test_row_major_order() {
    let g = grid(10, 10, 1.0);
    let blocks = g.subgrids(RasterSize::new(4, 4).unwrap()).unwrap();
    let positions: Vec<(usize, usize)> = blocks.iter().map(|b| (b.iy(), b.ix())).collect();
    assert_eq!(
        positions,
        vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2), (2, 0), (2, 1), (2, 2)]
    );
}

#[test]
fn test_oversized_block_is_clamped() {
    let g = grid(100, 50, 1.0);
    let blocks = g.subgrids(RasterSize::new(10_000, 10_000).unwrap()).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].grid(), &g);
    assert!(blocks[0].is_first() && blocks[0].is_last());
}

// ============================================================================
// Algebra
// ============================================================================

#[test]
fn test_union_then_intersection_returns_original() {
    let a = Extent::new(0.0, 100.0, 0.0, 50.0, utm()).unwrap();
    let b = Extent::new(30.0, 170.0, -20.0, 40.0, utm()).unwrap();
    let u = a.union(&b).unwrap();
    assert!(u.intersection(&a).unwrap().equal(&a, DEFAULT_TOLERANCE));
    assert!(u.intersection(&b).unwrap().equal(&b, DEFAULT_TOLERANCE));
}

#[test]
fn test_intersection_reprojects_second_operand() {
    let utm_extent = grid(100, 100, 30.0).extent().to_owned();
    let geo = utm_extent.reproject(&Projection::Wgs84).unwrap();
    let i = utm_extent.intersection(&geo).unwrap();
    assert_eq!(i.projection(), &utm());
    assert!(i.equal(&utm_extent, 1e-3));
}

#[test]
fn test_grid_construction_is_idempotent() {
    let extent = Extent::new(0.123, 1001.7, -5.5, 333.3, utm()).unwrap();
    let g = Grid::new(extent, Resolution::new(30.0, 20.0).unwrap()).unwrap();
    let again = Grid::new(*g.extent(), *g.resolution()).unwrap();
    assert_eq!(again, g);
}

#[test]
fn test_clip_keeps_alignment() {
    let g = grid(100, 100, 10.0);
    let clip = Extent::new(400_123.0, 400_555.0, 5_799_100.0, 5_799_555.0, utm()).unwrap();
    let clipped = g.clip(&clip).unwrap();
    let dx = (clipped.extent().xmin() - g.extent().xmin()) / 10.0;
    let dy = (g.extent().ymax() - clipped.extent().ymax()) / 10.0;
    assert!((dx - dx.round()).abs() < 1e-6);
    assert!((dy - dy.round()).abs() < 1e-6);
    assert!(clipped.offset_in(&g).is_ok());
}

#[test]
fn test_clip_disjoint_fails() {
    let g = grid(10, 10, 10.0);
    let far = Extent::new(0.0, 10.0, 0.0, 10.0, utm()).unwrap();
    assert!(matches!(g.clip(&far), Err(GeometryError::EmptyIntersection { .. })));
}

// ============================================================================
// Addressing
// ============================================================================

#[test]
fn test_subset_offset_matches_request() {
    let g = grid(50, 40, 10.0);
    let s = g
        .subset(Pixel::new(12, 7), RasterSize::new(5, 6).unwrap(), false)
        .unwrap();
    assert_eq!(s.offset_in(&g).unwrap(), PixelOffset::new(12, 7));
    assert!(s.is_within(&g).unwrap());
}

#[test]
fn test_untrimmed_subset_outside_is_not_within() {
    let g = grid(50, 40, 10.0);
    let s = g
        .subset(Pixel::new(48, 0), RasterSize::new(5, 5).unwrap(), false)
        .unwrap();
    assert!(!s.is_within(&g).unwrap());
}

#[test]
fn test_pixel_coordinate_of_reprojected_point() {
    let g = grid(101, 101, 30.0);
    let center = g.extent().center();
    let geo = center.reproject(&Projection::Wgs84).unwrap();
    let pixel = g.pixel_coordinate(&geo).unwrap();
    assert_eq!(pixel, Pixel::new(50, 50));
    assert_eq!(
        g.pixel_coordinate(&Point::new(400_000.0, 5_800_000.0, utm())).unwrap(),
        Pixel::new(0, 0)
    );
}
