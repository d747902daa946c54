use super::*;
use crate::gpu::{cpu::CpuDevice, device::DeviceOpts};

const WORKING: Extent = Extent::new(8, 4);

fn ring(pending: usize) -> SurfaceRing {
    let mut dev = CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap();
    SurfaceRing::new(&mut dev, WORKING, pending, Extent::new(6, 6)).unwrap()
}

#[test]
fn pending_below_two_is_rejected() {
    let mut dev = CpuDevice::new(DeviceOpts { lanes: 1 }).unwrap();
    assert!(SurfaceRing::new(&mut dev, WORKING, 1, WORKING).is_err());
}

#[test]
fn ring_runs_dry_until_a_frame_completes() {
    let mut ring = ring(2);
    let a = ring.acquire().unwrap();
    let b = ring.acquire().unwrap();
    assert_ne!(a, b);
    assert!(ring.acquire().is_none());

    // `a` goes on screen; nothing was on screen before, so nothing is freed yet.
    (ring.completion_handler(a))();
    assert!(ring.acquire().is_none());
    assert_eq!(ring.last_presented(), Some(a));

    // `b` replaces `a`, which becomes free again.
    (ring.completion_handler(b))();
    assert_eq!(ring.acquire(), Some(a));
    assert_eq!(ring.presents(), 2);
}

#[test]
fn discarded_target_is_reused_first() {
    let mut ring = ring(3);
    let a = ring.acquire().unwrap();
    ring.discard(a);
    assert_eq!(ring.free_count(), 3);
    assert_eq!(ring.acquire(), Some(a));
}

#[test]
fn resize_changes_viewport_only() {
    let mut ring = ring(2);
    assert_eq!(viewport(WORKING, &ring), TileRect { x: 0, y: 0, width: 6, height: 4 });
    ring.on_resize(Extent::new(100, 2));
    assert_eq!(viewport(WORKING, &ring), TileRect { x: 0, y: 0, width: 8, height: 2 });
    assert_eq!(ring.targets().len(), 2);
}

#[test]
fn wait_for_target_wakes_when_a_present_frees_one() {
    let mut ring = ring(2);
    let a = ring.acquire().unwrap();
    let b = ring.acquire().unwrap();
    assert!(!ring.wait_for_target(Duration::from_millis(5)));

    (ring.completion_handler(a))();
    let present_b = ring.completion_handler(b);
    let presenter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        present_b();
    });
    assert!(ring.wait_for_target(Duration::from_secs(5)));
    presenter.join().unwrap();
    assert_eq!(ring.acquire(), Some(a));
}
