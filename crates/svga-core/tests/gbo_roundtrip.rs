//! Property test: GBO write-then-read is the identity for any in-bounds
//! offset and length, over an arbitrarily scrambled page table.

use proptest::prelude::*;
use svga_core::gbo::Gbo;
use svga_mem::VecGuestMemory;
use svga_proto::types::MobFormat;

const DATA_PAGES: u64 = 16;
const ROOT_PPN: u64 = 0x40;
const FIRST_DATA_PPN: u64 = 0x80;

fn build_gbo(order: &[u64]) -> (VecGuestMemory, Gbo) {
    let mut mem = VecGuestMemory::new(((FIRST_DATA_PPN + DATA_PAGES + 1) * 4096) as usize);
    for (i, page) in order.iter().enumerate() {
        mem.write_u64(ROOT_PPN * 4096 + (i as u64) * 8, FIRST_DATA_PPN + page)
            .unwrap();
    }
    let gbo = Gbo::create(
        &mem,
        MobFormat::Pt64Depth1,
        ROOT_PPN,
        (order.len() * 4096) as u32,
    )
    .unwrap();
    (mem, gbo)
}

proptest! {
    #[test]
    fn write_then_read_is_identity(
        order in Just((0..DATA_PAGES).collect::<Vec<u64>>()).prop_shuffle(),
        offset in 0u32..(DATA_PAGES as u32 * 4096 - 1),
        len in 1usize..20000,
        seed in any::<u8>(),
    ) {
        let (mut mem, gbo) = build_gbo(&order);
        let len = len.min((gbo.total_bytes() - offset) as usize);
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();

        gbo.write(&mut mem, offset, &data).unwrap();
        let mut back = vec![0u8; len];
        gbo.read(&mem, offset, &mut back).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn descriptor_pages_always_sum_to_total(
        order in Just((0..DATA_PAGES).collect::<Vec<u64>>()).prop_shuffle(),
    ) {
        let (_, gbo) = build_gbo(&order);
        let total: u32 = gbo.descriptors().iter().map(|d| d.num_pages).sum();
        prop_assert_eq!(total, gbo.total_pages());
    }
}
