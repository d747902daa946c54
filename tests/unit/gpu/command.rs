use super::*;

const WORKING: Extent = Extent::new(40, 20);

fn variant(kind: PipelineKind) -> PipelineVariant {
    PipelineVariant {
        id: PipelineId(0),
        kind,
        slot: 0,
    }
}

fn tiled(dst_tile: u32) -> BlendPassDescriptor {
    BlendPassDescriptor {
        src1: ImageRef::Layer(0),
        src2: ImageRef::Layer(1),
        dst: ImageId(0).into(),
        src1_tile: 0,
        src2_tile: 0,
        dst_tile,
        tile_extent: Extent::new(20, 10),
        grid: TileGrid::default(),
        pipeline: variant(PipelineKind::ComputeBlend),
    }
}

#[test]
fn descriptor_rejects_aliasing_and_layer_destinations() {
    let p = variant(PipelineKind::RenderBlend);
    let img: ImageRef = ImageId(1).into();
    let aliased = BlendPassDescriptor::full(img, ImageRef::Layer(1), img, WORKING, p);
    assert!(aliased.validate(WORKING).is_err());

    let into_layer = BlendPassDescriptor::full(
        ImageRef::Layer(0),
        ImageRef::Layer(1),
        ImageRef::Layer(2),
        WORKING,
        p,
    );
    assert!(into_layer.validate(WORKING).is_err());

    let ok = BlendPassDescriptor::full(img, ImageRef::Layer(1), ImageId(2).into(), WORKING, p);
    assert!(ok.validate(WORKING).is_ok());
}

#[test]
fn descriptor_checks_tile_indices_and_partition() {
    assert!(tiled(3).validate(WORKING).is_ok());
    assert!(tiled(4).validate(WORKING).is_err());

    let mut wrong_extent = tiled(0);
    wrong_extent.tile_extent = Extent::new(10, 10);
    assert!(wrong_extent.validate(WORKING).is_err());
}

#[test]
fn region_uses_grid_origin_for_full_images_and_zero_for_tiles() {
    let desc = tiled(3);
    let tile = desc.tile_extent;
    let region = desc.region(WORKING, WORKING, tile).unwrap();
    assert_eq!(region.src1_origin, (0, 0));
    assert_eq!(region.dst_origin, (0, 0));

    let mut desc = tiled(3);
    desc.src2_tile = 2;
    let region = desc.region(WORKING, WORKING, WORKING).unwrap();
    assert_eq!(region.src2_origin, (0, 10));
    assert_eq!(region.dst_origin, (20, 10));

    assert!(desc.region(Extent::new(7, 7), WORKING, WORKING).is_err());
}

#[test]
fn render_scope_requires_attached_destination() {
    let mut cb = CommandBuffer::new("frame", WORKING);
    let attached: ImageRef = ImageId(0).into();
    let err = cb
        .encode_render("scope", &[attached], |enc| {
            enc.draw_blend(BlendPassDescriptor::full(
                ImageRef::Layer(0),
                ImageRef::Layer(1),
                ImageId(5).into(),
                WORKING,
                variant(PipelineKind::RenderBlend),
            ))
        })
        .unwrap_err();
    assert!(matches!(err, BlendError::Encoding(_)));
    // A failed scope is not recorded.
    assert!(cb.commands().is_empty());
}

#[test]
fn encoders_reject_mismatched_pipeline_kinds() {
    let mut cb = CommandBuffer::new("frame", WORKING);
    let dst: ImageRef = ImageId(0).into();
    let desc = BlendPassDescriptor::full(
        ImageRef::Layer(0),
        ImageRef::Layer(1),
        dst,
        WORKING,
        variant(PipelineKind::ComputeBlend),
    );
    assert!(cb.encode_render("r", &[dst], |enc| enc.draw_blend(desc)).is_err());
    assert!(
        cb.encode_compute("c", |enc| enc.dispatch_aggregate(
            vec![ImageRef::Layer(0)],
            dst,
            variant(PipelineKind::ComputeBlend)
        ))
        .is_err()
    );
    assert!(
        cb.encode_compute("c", |enc| enc.dispatch_aggregate(
            vec![dst],
            ImageId(1).into(),
            variant(PipelineKind::ComputeAggregate)
        ))
        .is_err()
    );
}

#[test]
fn render_scope_rejects_layer_and_duplicate_attachments() {
    let mut cb = CommandBuffer::new("frame", WORKING);
    let img: ImageRef = ImageId(0).into();
    assert!(cb.encode_render("a", &[ImageRef::Layer(0)], |_| Ok(())).is_err());
    assert!(cb.encode_render("b", &[img, img], |_| Ok(())).is_err());
}

#[test]
fn stats_count_recorded_work() {
    let event = SharedEvent::new(0);
    let mut cb = CommandBuffer::new("frame", WORKING);
    let a: ImageRef = ImageId(0).into();
    let b: ImageRef = ImageId(1).into();
    cb.encode_wait_for_event(&event, 1);
    cb.encode_render("fused", &[a, b], |enc| {
        let p = variant(PipelineKind::RenderBlend);
        enc.draw_blend(BlendPassDescriptor::full(
            ImageRef::Layer(0),
            ImageRef::Layer(1),
            a,
            WORKING,
            p,
        ))?;
        enc.draw_blend(BlendPassDescriptor::full(a, ImageRef::Layer(2), b, WORKING, p))?;
        assert_eq!(enc.draw_count(), 2);
        Ok(())
    })
    .unwrap();
    cb.encode_compute("all", |enc| {
        enc.dispatch_aggregate(
            vec![ImageRef::Layer(0), ImageRef::Layer(1)],
            a,
            variant(PipelineKind::ComputeAggregate),
        )
    })
    .unwrap();
    cb.encode_copy(ImageRef::Layer(0), b).unwrap();
    cb.encode_signal_event(&event, 2);
    cb.present(SurfaceId(0), b, WORKING.rect());

    let stats = cb.stats();
    assert_eq!(stats.passes(), 3);
    assert_eq!(stats.scopes(), 2);
    assert_eq!((stats.waits, stats.signals, stats.copies, stats.presents), (1, 1, 1, 1));
}

#[test]
fn copy_onto_itself_is_rejected() {
    let mut cb = CommandBuffer::new("frame", WORKING);
    let a: ImageRef = ImageId(0).into();
    assert!(cb.encode_copy(a, a).is_err());
    assert!(cb.encode_copy(a, ImageRef::Layer(0)).is_err());
}

#[test]
fn memoryless_images_have_no_resident_bytes() {
    assert_eq!(ImageDesc::memoryless(WORKING).resident_bytes(), 0);
    assert_eq!(ImageDesc::private(WORKING).resident_bytes(), 40 * 20 * 4);
}
