use super::*;

#[test]
fn new_rejects_empty_and_mismatched_stacks() {
    assert!(LayerStack::new(Vec::new()).is_err());

    let err = LayerStack::new(vec![
        ImageRGBA::transparent(Extent::new(4, 4)),
        ImageRGBA::transparent(Extent::new(4, 2)),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("layer 1"));
}

#[test]
fn blocks_place_one_checkered_block_per_layer() {
    let stack = LayerStack::generate(50, Extent::new(40, 20), LayerPattern::Blocks).unwrap();
    assert_eq!(stack.len(), 50);

    // 800 px / 50 layers -> 4x4 blocks, 10 per line.
    let first = stack.get(0).unwrap();
    assert_eq!(first.pixel(0, 0), [255, 0, 0, 255]);
    assert_eq!(first.pixel(4, 0), [0, 0, 0, 0]);

    let layer_11 = stack.get(11).unwrap();
    assert_eq!(layer_11.pixel(4, 4), [0, 0, 255, 255]);
    assert_eq!(layer_11.pixel(0, 4), [0, 0, 0, 0]);
    assert_eq!(layer_11.pixel(0, 0), [0, 0, 0, 0]);
}

#[test]
fn overlapping_layers_share_pixels() {
    let stack = LayerStack::generate(4, Extent::new(30, 2), LayerPattern::Overlapping).unwrap();
    let covered = |x: u32| {
        stack
            .layers()
            .iter()
            .filter(|l| l.pixel(x, 0)[3] != 0)
            .count()
    };
    assert!((0..30).any(|x| covered(x) >= 2));
}

#[test]
fn reversed_flips_order() {
    let stack = LayerStack::generate(3, Extent::new(9, 3), LayerPattern::Overlapping).unwrap();
    let rev = stack.reversed();
    assert_eq!(rev.get(0).unwrap().as_ref(), stack.get(2).unwrap().as_ref());
    assert_eq!(rev.extent(), stack.extent());
}

#[test]
fn generate_rejects_zero_layers() {
    assert!(LayerStack::generate(0, Extent::new(4, 4), LayerPattern::Blocks).is_err());
}
