use super::*;
use crate::gpu::{
    command::{Command, ComputeOp, ImageDesc},
    cpu::CpuDevice,
    device::DeviceOpts,
};

const WORKING: Extent = Extent::new(40, 20);

fn setup(kind: StrategyKind, pool_size: usize) -> (CpuDevice, Compositor, ImageRef) {
    let mut dev = CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap();
    let opts = StrategyOpts {
        working: WORKING,
        grid: TileGrid::default(),
        pool_size,
    };
    let compositor = Compositor::new(kind, &mut dev, &opts).unwrap();
    let target = dev.create_image(ImageDesc::private(WORKING), "target").unwrap();
    (dev, compositor, target.into())
}

fn encode(compositor: &mut Compositor, layers: usize, target: ImageRef) -> CommandBuffer {
    let mut cb = CommandBuffer::new("frame", WORKING);
    compositor.compose(&mut cb, layers, target).unwrap();
    cb
}

fn blend_passes(cb: &CommandBuffer) -> Vec<BlendPassDescriptor> {
    let mut out = Vec::new();
    for cmd in cb.commands() {
        match cmd {
            Command::Render(scope) => out.extend(scope.draws.iter().copied()),
            Command::Compute(scope) => {
                for op in &scope.ops {
                    if let ComputeOp::Blend(desc) = op {
                        out.push(*desc);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

#[test]
fn fifty_layers_on_four_tiles_give_expected_pass_counts() {
    let grid = TileGrid::default();
    for kind in StrategyKind::ALL {
        let (_dev, mut compositor, target) = setup(kind, 10);
        let stats = encode(&mut compositor, 50, target).stats();
        assert_eq!(stats.passes(), kind.expected_passes(50, grid), "{kind}");
    }
    assert_eq!(StrategyKind::Tiled.expected_passes(50, grid), 196);
    assert_eq!(StrategyKind::Monolithic.expected_passes(50, grid), 1);
    assert_eq!(StrategyKind::Compute.expected_passes(50, grid), 49);
}

#[test]
fn scope_shapes_differ_per_strategy() {
    let shape = |kind| {
        let (_dev, mut compositor, target) = setup(kind, 10);
        let stats = encode(&mut compositor, 6, target).stats();
        (stats.render_scopes, stats.compute_scopes)
    };
    assert_eq!(shape(StrategyKind::Sequential), (5, 0));
    assert_eq!(shape(StrategyKind::Fused), (1, 0));
    assert_eq!(shape(StrategyKind::TileMemory), (1, 0));
    assert_eq!(shape(StrategyKind::Tiled), (0, 1));
    assert_eq!(shape(StrategyKind::Compute), (0, 2));
    assert_eq!(shape(StrategyKind::Monolithic), (0, 1));
}

#[test]
fn pipeline_rotation_restarts_every_frame() {
    let (_dev, mut compositor, target) = setup(StrategyKind::Sequential, 4);
    for _ in 0..2 {
        let slots: Vec<u32> = blend_passes(&encode(&mut compositor, 7, target))
            .iter()
            .map(|d| d.pipeline.slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1]);
    }
}

#[test]
fn chains_end_in_target_and_feed_forward() {
    for kind in [
        StrategyKind::Sequential,
        StrategyKind::Fused,
        StrategyKind::TileMemory,
        StrategyKind::Compute,
    ] {
        for layers in [2, 3, 6] {
            let (_dev, mut compositor, target) = setup(kind, 10);
            let passes = blend_passes(&encode(&mut compositor, layers, target));
            assert_eq!(passes.len(), layers - 1);
            assert_eq!(passes[0].src1, ImageRef::Layer(0));
            for (j, p) in passes.iter().enumerate() {
                assert_eq!(p.src2, ImageRef::Layer(j as u32 + 1), "{kind} pass {j}");
                assert!(p.validate(WORKING).is_ok());
                if j > 0 {
                    assert_eq!(p.src1, passes[j - 1].dst, "{kind} pass {j}");
                }
            }
            assert_eq!(passes.last().unwrap().dst, target, "{kind} with {layers} layers");
        }
    }
}

#[test]
fn tile_memory_rotates_attachment_pair() {
    let (_dev, mut compositor, target) = setup(StrategyKind::TileMemory, 10);
    let cb = encode(&mut compositor, 6, target);
    let Command::Render(scope) = &cb.commands()[0] else {
        panic!("expected a render scope");
    };
    let pair = [scope.attachments[0], scope.attachments[1]];
    assert_eq!(scope.attachments[2], target);
    for (k, draw) in scope.draws.iter().enumerate().take(scope.draws.len() - 1) {
        assert_eq!(draw.dst, pair[k % 2]);
        if k > 0 {
            assert_eq!(draw.src1, pair[(k + 1) % 2]);
        }
    }
}

#[test]
fn tiled_folds_each_tile_into_its_target_rect() {
    let (_dev, mut compositor, target) = setup(StrategyKind::Tiled, 10);
    let passes = blend_passes(&encode(&mut compositor, 4, target));
    assert_eq!(passes.len(), 3 * 4);
    for (tile, chunk) in passes.chunks(3).enumerate() {
        assert!(chunk.iter().all(|p| p.dst_tile == tile as u32));
        assert_eq!(chunk[2].dst, target);
        assert_ne!(chunk[1].dst, target);
    }
}

#[test]
fn single_layer_is_copied() {
    for kind in StrategyKind::ALL {
        let (_dev, mut compositor, target) = setup(kind, 10);
        let stats = encode(&mut compositor, 1, target).stats();
        assert_eq!((stats.copies, stats.passes()), (1, 0), "{kind}");
    }
}

#[test]
fn footprints_reflect_buffer_layouts() {
    let full = WORKING.byte_len();
    let footprint = |kind| setup(kind, 1).1.footprint_bytes();
    assert_eq!(footprint(StrategyKind::Sequential), full);
    assert_eq!(footprint(StrategyKind::Fused), 2 * full);
    assert_eq!(footprint(StrategyKind::Tiled), full);
    assert_eq!(footprint(StrategyKind::TileMemory), 0);
    assert_eq!(footprint(StrategyKind::Monolithic), 0);
}

#[test]
fn alternating_destination_never_repeats() {
    let scratch = ImageRef::Image(crate::gpu::command::ImageId(1));
    let target = ImageRef::Image(crate::gpu::command::ImageId(2));
    for passes in 1..8 {
        let dsts: Vec<_> = (0..passes)
            .map(|j| alternating_dst(j, passes, scratch, target))
            .collect();
        assert_eq!(*dsts.last().unwrap(), target);
        assert!(dsts.windows(2).all(|w| w[0] != w[1]));
    }
}

#[test]
fn monolithic_compiles_a_single_pipeline() {
    let (mut dev, mut compositor, target) = setup(StrategyKind::Monolithic, 10);
    let next = dev
        .create_pipeline(crate::gpu::command::PipelineKind::ComputeBlend, "next")
        .unwrap();
    assert_eq!(next, crate::gpu::command::PipelineId(1));

    for _ in 0..3 {
        let cb = encode(&mut compositor, 4, target);
        assert_eq!(cb.stats().aggregate_dispatches, 1);
    }
}
