use super::*;

#[test]
fn tile_grid_partitions_working_surface_exactly() {
    let surface = Extent::WORKING;
    let grid = TileGrid::default();
    let rects = grid.rects(surface).unwrap();
    assert_eq!(rects.len(), 4);

    let covered: usize = rects.iter().map(|r| r.extent().pixel_count()).sum();
    assert_eq!(covered, surface.pixel_count());

    for (i, a) in rects.iter().enumerate() {
        assert!(a.fits_in(surface));
        for b in rects.iter().skip(i + 1) {
            assert!(!a.overlaps(*b), "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn tile_origins_follow_row_major_order() {
    let grid = TileGrid::new(2, 2).unwrap();
    let tile = grid.tile_extent(Extent::new(4000, 2000)).unwrap();
    assert_eq!(tile, Extent::new(2000, 1000));
    assert_eq!(grid.tile_origin(0, tile), (0, 0));
    assert_eq!(grid.tile_origin(1, tile), (2000, 0));
    assert_eq!(grid.tile_origin(2, tile), (0, 1000));
    assert_eq!(grid.tile_origin(3, tile), (2000, 1000));
}

#[test]
fn uneven_grid_is_rejected() {
    let grid = TileGrid::new(3, 1).unwrap();
    assert!(grid.tile_extent(Extent::new(10, 4)).is_err());
    assert!(TileGrid::new(0, 2).is_err());
}

#[test]
fn tile_rect_rejects_out_of_range_index() {
    let grid = TileGrid::default();
    assert!(grid.tile_rect(Extent::new(8, 8), 4).is_err());
}

#[test]
fn clipped_viewport_takes_smaller_dimension() {
    let vp = TileRect::clipped_viewport(Extent::new(4000, 2000), Extent::new(1280, 2400));
    assert_eq!(vp, TileRect { x: 0, y: 0, width: 1280, height: 2000 });
}
