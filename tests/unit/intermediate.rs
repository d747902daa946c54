use super::*;
use crate::gpu::{command::StorageMode, cpu::CpuDevice, device::DeviceOpts};

const WORKING: Extent = Extent::new(40, 20);

fn device() -> CpuDevice {
    CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap()
}

#[test]
fn footprints_follow_layout() {
    let mut dev = device();
    let full = WORKING.byte_len();

    let single = IntermediateBufferSet::single(&mut dev, WORKING).unwrap();
    assert_eq!(single.footprint_bytes(), full);

    let pair = IntermediateBufferSet::ping_pong(&mut dev, WORKING).unwrap();
    assert_eq!(pair.footprint_bytes(), 2 * full);

    let tiles = IntermediateBufferSet::per_tile(&mut dev, WORKING, TileGrid::default()).unwrap();
    assert_eq!(tiles.len(), 4);
    assert_eq!(tiles.footprint_bytes(), full);

    let tbdr = IntermediateBufferSet::memoryless(&mut dev, WORKING).unwrap();
    assert_eq!(tbdr.len(), 2);
    assert_eq!(tbdr.footprint_bytes(), 0);
}

#[test]
fn per_tile_images_are_tile_sized() {
    let mut dev = device();
    let tiles = IntermediateBufferSet::per_tile(&mut dev, WORKING, TileGrid::default()).unwrap();
    let ImageRef::Image(id) = tiles.image(3).unwrap() else {
        panic!("intermediate resolved to a layer");
    };
    assert_eq!(dev.image_desc(id).unwrap().extent, Extent::new(20, 10));
    assert!(tiles.image(4).is_err());
}

#[test]
fn memoryless_set_uses_tile_memory() {
    let mut dev = device();
    let tbdr = IntermediateBufferSet::memoryless(&mut dev, WORKING).unwrap();
    let id = tbdr.image(0).unwrap().image_id().unwrap();
    assert_eq!(dev.image_desc(id).unwrap().storage, StorageMode::Memoryless);
}

#[test]
fn release_frees_device_images() {
    let mut dev = device();
    let single = IntermediateBufferSet::single(&mut dev, WORKING).unwrap();
    let id = single.image(0).unwrap().image_id().unwrap();
    single.release(&mut dev).unwrap();
    assert!(dev.image_desc(id).is_none());
}
