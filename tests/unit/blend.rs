use super::*;

fn solid(extent: Extent, px: PremulRgba8) -> ImageRGBA {
    ImageRGBA::from_fn(extent, |_, _| px)
}

#[test]
fn over_opaque_top_replaces_bottom() {
    assert_eq!(over([10, 20, 30, 255], [200, 0, 0, 255]), [200, 0, 0, 255]);
}

#[test]
fn over_transparent_top_keeps_bottom() {
    let bottom = [10, 20, 30, 40];
    assert_eq!(over(bottom, [0, 0, 0, 0]), bottom);
}

#[test]
fn over_is_not_commutative() {
    let a = [0, 0, 128, 128];
    let b = [200, 0, 0, 255];
    assert_ne!(over(a, b), over(b, a));
}

#[test]
fn blend_region_writes_only_the_destination_tile() {
    let e = Extent::new(4, 4);
    let src1 = solid(e, [0, 0, 0, 255]);
    let src2 = solid(e, [255, 255, 255, 255]);
    let mut dst = ImageRGBA::transparent(e);
    let region = BlendRegion {
        src1_origin: (2, 2),
        src2_origin: (2, 2),
        dst_origin: (2, 0),
        extent: Extent::new(2, 2),
    };
    blend_region(&src1, &src2, &mut dst, &region).unwrap();
    assert_eq!(dst.pixel(2, 0), [255, 255, 255, 255]);
    assert_eq!(dst.pixel(3, 1), [255, 255, 255, 255]);
    assert_eq!(dst.pixel(0, 0), [0, 0, 0, 0]);
    assert_eq!(dst.pixel(2, 2), [0, 0, 0, 0]);
}

#[test]
fn blend_region_rejects_out_of_bounds() {
    let e = Extent::new(4, 4);
    let src = solid(e, [1, 1, 1, 1]);
    let mut dst = ImageRGBA::transparent(Extent::new(2, 2));
    let err = blend_region(&src, &src, &mut dst, &BlendRegion::full(e)).unwrap_err();
    assert!(err.to_string().contains("dst region"));
}

#[test]
fn blend_all_matches_reference_fold() {
    let e = Extent::new(3, 2);
    let layers: Vec<ImageRGBA> = (0..5u8)
        .map(|i| ImageRGBA::from_fn(e, |x, y| {
            let a = 40 + i * 30;
            [a / 2, (x as u8) * 10 % a.max(1), (y as u8) * 20 % a.max(1), a]
        }))
        .collect();
    let refs: Vec<&ImageRGBA> = layers.iter().collect();
    let expected = reference_fold(&refs).unwrap();
    let mut out = ImageRGBA::transparent(e);
    blend_all(&refs, &mut out).unwrap();
    assert_eq!(out, expected);
}

#[test]
fn reference_fold_of_single_layer_is_identity() {
    let e = Extent::new(2, 2);
    let only = solid(e, [9, 8, 7, 200]);
    assert_eq!(reference_fold(&[&only]).unwrap(), only);
    assert!(reference_fold(&[]).is_err());
}

#[test]
fn copy_region_moves_tile() {
    let e = Extent::new(4, 2);
    let src = ImageRGBA::from_fn(e, |x, _| [x as u8, 0, 0, 255]);
    let mut dst = ImageRGBA::transparent(Extent::new(2, 2));
    copy_region(
        &src,
        TileRect { x: 2, y: 0, width: 2, height: 2 },
        &mut dst,
        (0, 0),
    )
    .unwrap();
    assert_eq!(dst.pixel(0, 1), [2, 0, 0, 255]);
    assert_eq!(dst.pixel(1, 0), [3, 0, 0, 255]);
}
