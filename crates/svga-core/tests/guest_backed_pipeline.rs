//! End-to-end: a guest driver bring-up sequence assembled as raw little
//! endian payloads, the way the FIFO worker would hand them over.

use svga_core::SvgaCommandProcessor;
use svga_mem::VecGuestMemory;
use svga_proto::cmd;

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn set_otable_base64(table_type: u32, base_ppn: u64, size: u32) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, table_type);
    push_u64(&mut out, base_ppn);
    push_u32(&mut out, size); // size_in_bytes
    push_u32(&mut out, 0); // valid_size_in_bytes
    push_u32(&mut out, 3); // pt_depth = RANGE
    out
}

fn define_gb_mob64(mobid: u32, base_ppn: u64, size: u32) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, mobid);
    push_u32(&mut out, 3); // pt_depth = RANGE
    push_u64(&mut out, base_ppn);
    push_u32(&mut out, size);
    out
}

#[test]
fn mob_backed_surface_update_flows_guest_bytes_into_the_shadow() {
    let mem = VecGuestMemory::new(4 * 1024 * 1024);
    let mut proc = SvgaCommandProcessor::new(mem, 1024 * 1024);

    // Object tables first; everything else depends on them.
    proc.process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &set_otable_base64(0, 0x10, 4096))
        .expect("mob otable");
    proc.process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &set_otable_base64(1, 0x11, 4096))
        .expect("surface otable");

    // A one-page MOB at PPN 0x200.
    proc.process_3d_cmd(0, cmd::DEFINE_GB_MOB64, &define_gb_mob64(7, 0x200, 4096))
        .expect("mob define");

    // 32x32 RGBA8 guest-backed surface.
    let mut define = Vec::new();
    push_u32(&mut define, 1); // sid
    push_u32(&mut define, 0); // surface_flags
    push_u32(&mut define, 68); // format = R8G8B8A8_UNORM
    push_u32(&mut define, 1); // num_mip_levels
    push_u32(&mut define, 0); // multisample_count
    push_u32(&mut define, 0); // autogen_filter
    push_u32(&mut define, 32); // width
    push_u32(&mut define, 32); // height
    push_u32(&mut define, 1); // depth
    proc.process_3d_cmd(0, cmd::DEFINE_GB_SURFACE, &define)
        .expect("surface define");

    let mut bind = Vec::new();
    push_u32(&mut bind, 1); // sid
    push_u32(&mut bind, 7); // mobid
    proc.process_3d_cmd(0, cmd::BIND_GB_SURFACE, &bind).expect("surface bind");

    // Guest writes pixels into the MOB pages, then requests an update.
    let pixels: Vec<u8> = (0..4096u32).map(|v| (v ^ (v >> 8)) as u8).collect();
    proc.guest_memory_mut().write(0x200_000, &pixels).unwrap();

    let mut update = Vec::new();
    push_u32(&mut update, 1); // sid
    push_u32(&mut update, 0); // face
    push_u32(&mut update, 0); // mipmap
    for v in [0u32, 0, 0, 32, 32, 1] {
        push_u32(&mut update, v); // box
    }
    proc.process_3d_cmd(0, cmd::UPDATE_GB_IMAGE, &update).expect("image update");

    let surface = proc.surfaces().get(1).expect("surface exists");
    assert_eq!(surface.shadow_bytes(0, 0).unwrap(), &pixels[..]);

    // Destroy everything; nothing should linger.
    let mut destroy = Vec::new();
    push_u32(&mut destroy, 1);
    proc.process_3d_cmd(0, cmd::DESTROY_GB_SURFACE, &destroy).expect("surface destroy");
    let mut destroy_mob = Vec::new();
    push_u32(&mut destroy_mob, 7);
    proc.process_3d_cmd(0, cmd::DESTROY_GB_MOB, &destroy_mob).expect("mob destroy");

    assert!(proc.surfaces().get(1).is_err());
    assert!(proc.mobs().is_empty());
}

#[test]
fn hostile_sizes_do_not_wedge_the_stream() {
    let mem = VecGuestMemory::new(1024 * 1024);
    let mut proc = SvgaCommandProcessor::new(mem, 64 * 1024);

    // A pile of garbage: truncated payloads, unknown ids, huge claims.
    proc.submit_3d_cmd(0, cmd::DEFINE_GB_MOB64, &[1, 2, 3]);
    proc.submit_3d_cmd(0, 0xFFFF_FFFF, &[0; 64]);
    proc.submit_3d_cmd(0, cmd::SET_OTABLE_BASE64, &set_otable_base64(99, 0x10, 4096));
    proc.submit_3d_cmd(
        0,
        cmd::DEFINE_GB_MOB64,
        &define_gb_mob64(1, 0x10, u32::MAX),
    );

    assert!(proc.stats().errors > 0);

    // And the processor still works afterwards.
    proc.process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &set_otable_base64(0, 0x10, 4096))
        .expect("otable still definable");
}
