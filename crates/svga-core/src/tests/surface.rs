use pretty_assertions::assert_eq;
use svga_proto::cmd;
use svga_proto::format::{SurfaceFlags, SurfaceFormat};
use svga_proto::types::{CopyBox, GuestImage, GuestPtr, Size3d, SurfaceImageId};

use super::{fixture, payload, payload_with};
use crate::error::SvgaError;
use crate::surface::{SurfaceCatalog, SurfaceDefinition};

fn rgba8_def(width: u32, height: u32, mips: u32) -> SurfaceDefinition {
    SurfaceDefinition {
        flags: SurfaceFlags::empty(),
        format: SurfaceFormat::A8R8G8B8,
        num_mip_levels: mips,
        multisample_count: 0,
        autogen_filter: 0,
        base_size: Size3d::new(width, height, 1),
        array_size: 0,
    }
}

#[test]
fn mip_chain_layout_follows_block_math() {
    let mut catalog = SurfaceCatalog::default();
    catalog.define(1, &rgba8_def(256, 128, 4), false).unwrap();

    let s = catalog.get(1).unwrap();
    let expect = [
        (256u32, 128u32, 1024u32, 131072u32),
        (128, 64, 512, 32768),
        (64, 32, 256, 8192),
        (32, 16, 128, 2048),
    ];
    for (i, (w, h, pitch, total)) in expect.into_iter().enumerate() {
        let level = s.mip_level(0, i as u32).unwrap();
        assert_eq!(level.size, Size3d::new(w, h, 1));
        assert_eq!(level.row_pitch, pitch);
        assert_eq!(level.total_bytes, total);
        assert_eq!(level.plane_pitch, total);
    }
}

#[test]
fn bc_format_rounds_up_to_block_grid() {
    let mut catalog = SurfaceCatalog::default();
    let def = SurfaceDefinition {
        format: SurfaceFormat::Dxt1,
        ..rgba8_def(10, 6, 1)
    };
    catalog.define(1, &def, false).unwrap();

    let level = catalog.get(1).unwrap().mip_level(0, 0).unwrap();
    // 10x6 texels = 3x2 blocks of 8 bytes.
    assert_eq!(level.blocks_x, 3);
    assert_eq!(level.blocks_y, 2);
    assert_eq!(level.row_pitch, 24);
    assert_eq!(level.total_bytes, 48);
}

#[test]
fn cubemap_defaults_to_six_slices() {
    let mut catalog = SurfaceCatalog::default();
    let def = SurfaceDefinition {
        flags: SurfaceFlags::CUBEMAP,
        ..rgba8_def(16, 16, 2)
    };
    catalog.define(1, &def, false).unwrap();
    let s = catalog.get(1).unwrap();
    assert_eq!(s.array_size, 6);
    assert_eq!(s.mip_levels.len(), 12);
    // Subresources are mips of slice 0 first.
    assert!(s.mip_level(5, 1).is_ok());
    assert_eq!(s.mip_level(5, 1).unwrap().size, Size3d::new(8, 8, 1));
}

#[test]
fn seventeen_mips_are_rejected() {
    let mut catalog = SurfaceCatalog::default();
    let err = catalog.define(1, &rgba8_def(65536, 1, 17), false).unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn surface_memory_ceiling_is_enforced() {
    let mut catalog = SurfaceCatalog::default();
    // 32768 * 32768 * 4 bytes * 2 slices would blow through 2 GiB.
    let def = SurfaceDefinition {
        array_size: 2,
        ..rgba8_def(32768, 32768, 1)
    };
    let err = catalog.define(1, &def, false).unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);

    // Half the height stays clear of the ceiling.
    assert!(catalog.define(1, &rgba8_def(32768, 8192, 1), false).is_ok());
}

#[test]
fn redefine_reuses_the_slot() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_gb_surface_2d(9, 64, 64);
    f.define_gb_surface_2d(9, 32, 32);

    let s = f.proc.surfaces().get(9).unwrap();
    assert_eq!(s.base_size, Size3d::new(32, 32, 1));
    // The first incarnation was destroyed through the backend.
    assert_eq!(f.rec.0.borrow().destroyed_surfaces, vec![9]);
}

#[test]
fn legacy_define_widens_to_v2_defaults() {
    let mut f = fixture();
    let c = cmd::CmdDefineSurface {
        sid: 4,
        surface_flags: 0,
        format: SurfaceFormat::A8R8G8B8.to_wire(),
        face: {
            let mut face = [cmd::SurfaceFace::default(); 6];
            face[0].num_mip_levels = 2;
            face
        },
    };
    let sizes = [Size3d::new(64, 64, 1), Size3d::new(32, 32, 1)];
    f.proc
        .process_3d_cmd(0, cmd::SURFACE_DEFINE, &payload_with(&c, &sizes))
        .unwrap();

    let s = f.proc.surfaces().get(4).unwrap();
    assert_eq!(s.num_mip_levels, 2);
    assert_eq!(s.multisample_count, 0);
    assert_eq!(s.autogen_filter, 0);
    // The legacy path allocates the software shadows eagerly.
    assert!(s.mip_level(0, 0).unwrap().shadow.is_some());
}

#[test]
fn surface_dma_clips_against_the_mip_and_stays_in_bounds() {
    let mut f = fixture();

    // 16-page GMR holding the guest image.
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_DEFINE_GMR2,
            &payload(&svga_proto::fifo::CmdDefineGmr2 { gmr_id: 1, num_pages: 16 }),
        )
        .unwrap();
    let ppns: Vec<u32> = (0x300..0x310).collect();
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_REMAP_GMR2,
            &payload_with(
                &svga_proto::fifo::CmdRemapGmr2 {
                    gmr_id: 1,
                    flags: 0,
                    offset_pages: 0,
                    num_pages: 16,
                },
                &ppns,
            ),
        )
        .unwrap();

    // Fill the guest image with a pattern.
    let pattern: Vec<u8> = (0..16 * 4096u32).map(|v| (v % 253) as u8).collect();
    f.proc.guest_memory_mut().write(0x300_000, &pattern).unwrap();

    let c = cmd::CmdDefineSurface {
        sid: 1,
        surface_flags: 0,
        format: SurfaceFormat::A8R8G8B8.to_wire(),
        face: {
            let mut face = [cmd::SurfaceFace::default(); 6];
            face[0].num_mip_levels = 1;
            face
        },
    };
    f.proc
        .process_3d_cmd(
            0,
            cmd::SURFACE_DEFINE,
            &payload_with(&c, &[Size3d::new(16, 16, 1)]),
        )
        .unwrap();

    // The box extends past the 16x16 mip; it must be clipped, not rejected,
    // and nothing outside the shadow may be written.
    let dma = cmd::CmdSurfaceDma {
        guest: GuestImage {
            ptr: GuestPtr { gmr_id: 1, offset: 0 },
            pitch: 64,
        },
        host: SurfaceImageId { sid: 1, face: 0, mipmap: 0 },
        transfer: 1, // write to host
    };
    let boxes = [CopyBox {
        x: 8,
        y: 8,
        z: 0,
        w: 16,
        h: 16,
        d: 1,
        srcx: 0,
        srcy: 0,
        srcz: 0,
    }];
    f.proc
        .process_3d_cmd(0, cmd::SURFACE_DMA, &payload_with(&dma, &boxes))
        .unwrap();

    let s = f.proc.surfaces().get(1).unwrap();
    let shadow = s.shadow_bytes(0, 0).unwrap();
    assert_eq!(shadow.len(), 16 * 16 * 4);
    // Clipped region is 8x8 pixels at (8,8); its first row comes from the
    // guest image row 0.
    let row = &shadow[(8 * 64 + 8 * 4)..(8 * 64 + 16 * 4)];
    assert_eq!(row, &pattern[..32]);
    // Outside the clipped box the shadow is untouched.
    assert!(shadow[..8 * 4].iter().all(|&b| b == 0));
    assert!(s.mip_level(0, 0).unwrap().dirty);
}

#[test]
fn surface_copy_invokes_backend_with_clipped_boxes() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_gb_surface_2d(1, 64, 64);
    f.define_gb_surface_2d(2, 32, 32);

    let c = cmd::CmdSurfaceCopy {
        src: SurfaceImageId { sid: 1, face: 0, mipmap: 0 },
        dest: SurfaceImageId { sid: 2, face: 0, mipmap: 0 },
    };
    let boxes = [CopyBox {
        x: 24,
        y: 24,
        z: 0,
        w: 16,
        h: 16,
        d: 1,
        srcx: 0,
        srcy: 0,
        srcz: 0,
    }];
    f.proc
        .process_3d_cmd(0, cmd::SURFACE_COPY, &payload_with(&c, &boxes))
        .unwrap();

    let rec = f.rec.0.borrow();
    assert_eq!(rec.copy_boxes.len(), 1);
    // Clipped to the 32x32 destination.
    assert_eq!(rec.copy_boxes[0].w, 8);
    assert_eq!(rec.copy_boxes[0].h, 8);
}

#[test]
fn destroying_a_missing_surface_is_rejected() {
    let mut f = fixture();
    let c = cmd::CmdDestroySurface { sid: 99 };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::SURFACE_DESTROY, &payload(&c))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}
