use pretty_assertions::assert_eq;
use svga_mem::VecGuestMemory;
use svga_proto::types::MobFormat;

use crate::error::SvgaError;
use crate::gbo::{Gbo, GboDescriptor};

fn mem() -> VecGuestMemory {
    VecGuestMemory::new(super::GUEST_MEM_BYTES)
}

#[test]
fn depth1_walk_coalesces_contiguous_pages() {
    let mut mem = mem();
    // Root page at PPN 0x100 listing pages 0x200..0x202 contiguous, then a
    // gap, then 0x205.
    let root = 0x100u64 * 4096;
    for (i, ppn) in [0x200u64, 0x201, 0x202, 0x205].iter().enumerate() {
        mem.write_u64(root + (i as u64) * 8, *ppn).unwrap();
    }

    let gbo = Gbo::create(&mem, MobFormat::Pt64Depth1, 0x100, 16384).unwrap();
    assert_eq!(gbo.total_pages(), 4);
    assert_eq!(
        gbo.descriptors(),
        &[
            GboDescriptor { gpa: 0x200_000, num_pages: 3 },
            GboDescriptor { gpa: 0x205_000, num_pages: 1 },
        ]
    );
}

#[test]
fn depth1_walk_with_32bit_ppns() {
    let mut mem = mem();
    let root = 0x100u64 * 4096;
    mem.write_u32(root, 0x180).unwrap();
    mem.write_u32(root + 4, 0x181).unwrap();

    let gbo = Gbo::create(&mem, MobFormat::PtDepth1, 0x100, 8192).unwrap();
    assert_eq!(
        gbo.descriptors(),
        &[GboDescriptor { gpa: 0x180_000, num_pages: 2 }]
    );
}

#[test]
fn depth0_rejects_more_than_one_page() {
    let mem = mem();
    let err = Gbo::create(&mem, MobFormat::Pt64Depth0, 0x100, 8192).unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn depth1_rejects_more_pages_than_one_table_holds() {
    let mem = mem();
    // One level-1 page holds 512 64-bit PPNs.
    let err = Gbo::create(&mem, MobFormat::Pt64Depth1, 0x100, 4096 * 513).unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);

    // 32-bit PPNs double the capacity.
    let mut mem32 = VecGuestMemory::new(super::GUEST_MEM_BYTES);
    let root = 0x100u64 * 4096;
    for i in 0..1024u64 {
        mem32.write_u32(root + i * 4, 0x200 + i as u32).unwrap();
    }
    assert!(Gbo::create(&mem32, MobFormat::PtDepth1, 0x100, 4096 * 1024).is_ok());
    assert!(Gbo::create(&mem32, MobFormat::PtDepth1, 0x100, 4096 * 1025).is_err());
}

#[test]
fn oversized_gbo_is_rejected() {
    let mem = mem();
    let err = Gbo::create(&mem, MobFormat::Range, 0x10, 128 * 1024 * 1024 + 1).unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn garbage_high_address_bits_are_masked() {
    let mut mem = mem();
    let root = 0x100u64 * 4096;
    // PPN with rubbish in the top bits; after the shift the address must be
    // masked down into the supported physical range.
    mem.write_u64(root, 0xFFF0_0000_0000_0200).unwrap();
    let gbo = Gbo::create(&mem, MobFormat::Pt64Depth1, 0x100, 4096).unwrap();
    assert_eq!(gbo.descriptors()[0].gpa & !0x0000_0FFF_FFFF_FFFF, 0);
}

#[test]
fn depth2_walk_spans_level1_pages() {
    let mut mem = mem();
    // Level-2 root at 0x100 names one level-1 page at 0x101, which lists two
    // data pages.
    let l2 = 0x100u64 * 4096;
    let l1 = 0x101u64 * 4096;
    mem.write_u64(l2, 0x101).unwrap();
    mem.write_u64(l1, 0x300).unwrap();
    mem.write_u64(l1 + 8, 0x301).unwrap();

    let gbo = Gbo::create(&mem, MobFormat::Pt64Depth2, 0x100, 8192).unwrap();
    assert_eq!(
        gbo.descriptors(),
        &[GboDescriptor { gpa: 0x300_000, num_pages: 2 }]
    );
}

#[test]
fn write_then_read_round_trips_across_descriptor_boundary() {
    let mut mem = mem();
    let root = 0x100u64 * 4096;
    // Two non-adjacent pages force two descriptors.
    mem.write_u64(root, 0x200).unwrap();
    mem.write_u64(root + 8, 0x280).unwrap();
    let gbo = Gbo::create(&mem, MobFormat::Pt64Depth1, 0x100, 8192).unwrap();
    assert_eq!(gbo.descriptors().len(), 2);

    // Straddle the page boundary.
    let data: Vec<u8> = (0..64u32).map(|v| v as u8).collect();
    gbo.write(&mut mem, 4096 - 32, &data).unwrap();
    let mut back = vec![0u8; 64];
    gbo.read(&mem, 4096 - 32, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn out_of_bounds_transfer_is_rejected() {
    let mut mem = mem();
    let gbo = Gbo::create(&mem, MobFormat::Range, 0x200, 4096).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(gbo.read(&mem, 4092, &mut buf).unwrap_err(), SvgaError::InvalidParameter);
    assert_eq!(gbo.write(&mut mem, 4096, &buf[..1]).unwrap_err(), SvgaError::InvalidParameter);
    // The very end is still fine.
    assert!(gbo.read(&mem, 4088, &mut buf).is_ok());
}

#[test]
fn gbo_copy_moves_bytes_between_objects() {
    let mut mem = mem();
    let src = Gbo::create(&mem, MobFormat::Range, 0x200, 8192).unwrap();
    let dst = Gbo::create(&mem, MobFormat::Range, 0x210, 8192).unwrap();

    let data = vec![0xA5u8; 5000];
    src.write(&mut mem, 100, &data).unwrap();
    Gbo::copy(&mut mem, &dst, 200, &src, 100, 5000).unwrap();

    let mut back = vec![0u8; 5000];
    dst.read(&mem, 200, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn backing_store_round_trips_guest_memory() {
    let mut mem = mem();
    let gbo_pages = 2u32;
    let mut gbo = Gbo::create(&mem, MobFormat::Range, 0x200, gbo_pages * 4096).unwrap();

    let data: Vec<u8> = (0..gbo_pages * 4096).map(|v| (v % 251) as u8).collect();
    gbo.write(&mut mem, 0, &data).unwrap();

    gbo.backing_store_create(&mem, gbo_pages * 4096).unwrap();
    assert!(gbo.is_host_backed());
    assert_eq!(gbo.backing_store_bytes(0).unwrap(), &data[..]);

    // Scribble over guest memory, then push the shadow back: identity.
    gbo.write(&mut mem, 0, &vec![0u8; (gbo_pages * 4096) as usize]).unwrap();
    gbo.backing_store_write_to_guest(&mut mem).unwrap();
    let mut back = vec![0u8; (gbo_pages * 4096) as usize];
    gbo.read(&mem, 0, &mut back).unwrap();
    assert_eq!(back, data);

    gbo.backing_store_delete();
    assert!(!gbo.is_host_backed());
    assert!(gbo.backing_store_bytes(0).is_none());
}

#[test]
fn backing_store_clamps_valid_bytes() {
    let mem = mem();
    let mut gbo = Gbo::create(&mem, MobFormat::Range, 0x200, 4096).unwrap();
    // valid_bytes larger than the object is clamped, not rejected.
    gbo.backing_store_create(&mem, u32::MAX).unwrap();
    assert_eq!(gbo.backing_store_bytes(0).unwrap().len(), 4096);
}
