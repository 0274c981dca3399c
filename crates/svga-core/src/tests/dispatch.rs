use pretty_assertions::assert_eq;
use svga_proto::cmd;
use svga_proto::format::SurfaceFormat;
use svga_proto::types::{Size3d, SurfaceImageId, INVALID_ID};

use super::{fixture, payload, payload_with};
use crate::error::SvgaError;

#[test]
fn truncated_payload_is_malformed_not_fatal() {
    let mut f = fixture();
    let err = f
        .proc
        .process_3d_cmd(0, cmd::SURFACE_DESTROY, &[0u8; 2])
        .unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);

    // The stream keeps going: a well-formed command still works.
    f.set_all_otables();
    f.define_gb_surface_2d(1, 16, 16);
    assert!(f.proc.surfaces().get(1).is_ok());
}

#[test]
fn unknown_command_id_reports_not_implemented() {
    let mut f = fixture();
    assert_eq!(
        f.proc.process_3d_cmd(0, 99999, &[]).unwrap_err(),
        SvgaError::NotImplemented
    );
    assert_eq!(
        f.proc.process_3d_cmd(0, cmd::ENABLE_GART, &[]).unwrap_err(),
        SvgaError::NotImplemented
    );
    assert_eq!(f.proc.stats().unknown, 2);
}

#[test]
fn submit_swallows_handler_errors() {
    let mut f = fixture();
    let before = f.proc.stats().errors;
    f.proc.submit_3d_cmd(0, cmd::SURFACE_DESTROY, &[0u8; 2]);
    assert_eq!(f.proc.stats().errors, before + 1);
}

#[test]
fn surface_destroy_unbinds_render_targets_and_textures() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_gb_surface_2d(42, 64, 64);

    f.proc
        .process_3d_cmd(0, cmd::CONTEXT_DEFINE, &payload(&cmd::CmdDefineContext { cid: 3 }))
        .unwrap();

    // Bind surface 42 as color target 0 (slot 2) and as a stage-1 texture.
    let rt = cmd::CmdSetRenderTarget {
        cid: 3,
        rt_type: 2,
        target: SurfaceImageId { sid: 42, face: 0, mipmap: 0 },
    };
    f.proc
        .process_3d_cmd(0, cmd::SETRENDERTARGET, &payload(&rt))
        .unwrap();

    let ts = cmd::CmdSetTextureState { cid: 3 };
    let states = [cmd::TextureStateEntry {
        stage: 1,
        name: cmd::TS_BIND_TEXTURE,
        value: 42,
    }];
    f.proc
        .process_3d_cmd(0, cmd::SETTEXTURESTATE, &payload_with(&ts, &states))
        .unwrap();

    {
        let ctx = f.proc.contexts().get(3).unwrap();
        assert_eq!(ctx.render_targets[2], 42);
        assert_eq!(ctx.active_textures[1], 42);
    }

    f.proc
        .process_3d_cmd(0, cmd::SURFACE_DESTROY, &payload(&cmd::CmdDestroySurface { sid: 42 }))
        .unwrap();

    let ctx = f.proc.contexts().get(3).unwrap();
    assert_eq!(ctx.render_targets[2], INVALID_ID);
    assert_eq!(ctx.active_textures[1], INVALID_ID);
    assert!(f.proc.surfaces().get(42).is_err());
}

#[test]
fn render_target_slot_out_of_range_is_rejected() {
    let mut f = fixture();
    f.proc
        .process_3d_cmd(0, cmd::CONTEXT_DEFINE, &payload(&cmd::CmdDefineContext { cid: 1 }))
        .unwrap();
    let rt = cmd::CmdSetRenderTarget {
        cid: 1,
        rt_type: 10,
        target: SurfaceImageId::default(),
    };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::SETRENDERTARGET, &payload(&rt))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn vgpu9_query_writes_result_through_guest_pointer() {
    let mut f = fixture();
    f.rec.0.borrow_mut().occlusion_samples = 1234;

    f.proc
        .process_3d_cmd(0, cmd::CONTEXT_DEFINE, &payload(&cmd::CmdDefineContext { cid: 0 }))
        .unwrap();

    // Result buffer lives in a GMR.
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_DEFINE_GMR2,
            &payload(&svga_proto::fifo::CmdDefineGmr2 { gmr_id: 2, num_pages: 1 }),
        )
        .unwrap();
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_REMAP_GMR2,
            &payload_with(
                &svga_proto::fifo::CmdRemapGmr2 {
                    gmr_id: 2,
                    flags: 0,
                    offset_pages: 0,
                    num_pages: 1,
                },
                &[0x340u32],
            ),
        )
        .unwrap();

    let begin = cmd::CmdBeginQuery { cid: 0, query_type: 0 };
    f.proc.process_3d_cmd(0, cmd::BEGIN_QUERY, &payload(&begin)).unwrap();

    let end = cmd::CmdEndQuery {
        cid: 0,
        query_type: 0,
        guest_result: svga_proto::types::GuestPtr { gmr_id: 2, offset: 16 },
    };
    f.proc.process_3d_cmd(0, cmd::END_QUERY, &payload(&end)).unwrap();

    let mem = f.proc.guest_memory();
    // QueryResult { total_size, state, result32 } at gpa 0x340000 + 16.
    assert_eq!(mem.read_u32(0x340_010).unwrap(), 12);
    assert_eq!(mem.read_u32(0x340_014).unwrap(), svga_proto::types::QUERY_STATE_SUCCEEDED);
    assert_eq!(mem.read_u32(0x340_018).unwrap(), 1234);
}

#[test]
fn gb_surface_update_and_readback_round_trip_through_mob() {
    let mut f = fixture();
    f.set_all_otables();

    // 32x32 RGBA8 surface (one page of pixels) backed by a one-page MOB.
    f.define_gb_surface_2d(5, 32, 32);
    f.define_mob(9, 0x400, 1);
    f.proc
        .process_3d_cmd(
            0,
            cmd::BIND_GB_SURFACE,
            &payload(&cmd::CmdBindGbSurface { sid: 5, mobid: 9 }),
        )
        .unwrap();

    // Guest fills the MOB with a pattern and asks for an image update.
    let pattern: Vec<u8> = (0..4096u32).map(|v| (v % 249) as u8).collect();
    f.proc.guest_memory_mut().write(0x400_000, &pattern).unwrap();
    f.proc
        .process_3d_cmd(
            0,
            cmd::UPDATE_GB_IMAGE,
            &payload(&cmd::CmdUpdateGbImage {
                image: SurfaceImageId { sid: 5, face: 0, mipmap: 0 },
                bounds: svga_proto::types::Box3d { x: 0, y: 0, z: 0, w: 32, h: 32, d: 1 },
            }),
        )
        .unwrap();

    {
        let s = f.proc.surfaces().get(5).unwrap();
        assert_eq!(s.shadow_bytes(0, 0).unwrap(), &pattern[..]);
    }

    // Scrub the MOB, then read the surface back into it.
    f.proc.guest_memory_mut().write(0x400_000, &vec![0u8; 4096]).unwrap();
    f.proc
        .process_3d_cmd(
            0,
            cmd::READBACK_GB_IMAGE,
            &payload(&cmd::CmdReadbackGbImage {
                image: SurfaceImageId { sid: 5, face: 0, mipmap: 0 },
            }),
        )
        .unwrap();

    let mut back = vec![0u8; 4096];
    f.proc.guest_memory().read(0x400_000, &mut back).unwrap();
    assert_eq!(back, pattern);
}

#[test]
fn screen_target_lifecycle() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_gb_surface_2d(7, 640, 480);

    f.proc
        .process_3d_cmd(
            0,
            cmd::DEFINE_GB_SCREENTARGET,
            &payload(&cmd::CmdDefineGbScreenTarget {
                stid: 0,
                flags: 0,
                width: 640,
                height: 480,
                x_root: 0,
                y_root: 0,
                dpi: 96,
            }),
        )
        .unwrap();

    f.proc
        .process_3d_cmd(
            0,
            cmd::BIND_GB_SCREENTARGET,
            &payload(&cmd::CmdBindGbScreenTarget {
                stid: 0,
                image: SurfaceImageId { sid: 7, face: 0, mipmap: 0 },
            }),
        )
        .unwrap();

    // Update rects are clipped against the screen.
    f.proc
        .process_3d_cmd(
            0,
            cmd::UPDATE_GB_SCREENTARGET,
            &payload(&cmd::CmdUpdateGbScreenTarget {
                stid: 0,
                rect: svga_proto::types::Rect { x: 600, y: 400, w: 100, h: 100 },
            }),
        )
        .unwrap();

    f.proc
        .process_3d_cmd(
            0,
            cmd::DESTROY_GB_SCREENTARGET,
            &payload(&cmd::CmdDestroyGbScreenTarget { stid: 0 }),
        )
        .unwrap();
}

#[test]
fn gmr_remap_of_a_subrange_leaves_other_pages_alone() {
    let mut f = fixture();
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_DEFINE_GMR2,
            &payload(&svga_proto::fifo::CmdDefineGmr2 { gmr_id: 3, num_pages: 4 }),
        )
        .unwrap();
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_REMAP_GMR2,
            &payload_with(
                &svga_proto::fifo::CmdRemapGmr2 {
                    gmr_id: 3,
                    flags: 0,
                    offset_pages: 0,
                    num_pages: 4,
                },
                &[0x500u32, 0x501, 0x502, 0x503],
            ),
        )
        .unwrap();

    // Rewrite only page 2.
    f.proc
        .process_fifo_cmd(
            svga_proto::fifo::CMD_REMAP_GMR2,
            &payload_with(
                &svga_proto::fifo::CmdRemapGmr2 {
                    gmr_id: 3,
                    flags: 0,
                    offset_pages: 2,
                    num_pages: 1,
                },
                &[0x600u32],
            ),
        )
        .unwrap();

    // A read spanning GMR pages 1..3 must hit 0x501, 0x600, 0x503.
    f.proc.guest_memory_mut().write(0x501_000, &[0x11; 4096]).unwrap();
    f.proc.guest_memory_mut().write(0x600_000, &[0x22; 4096]).unwrap();
    f.proc.guest_memory_mut().write(0x503_000, &[0x33; 4096]).unwrap();

    let mut buf = vec![0u8; 3 * 4096];
    f.proc
        .gmrs
        .get(3)
        .unwrap()
        .read(f.proc.guest_memory(), 4096, &mut buf)
        .unwrap();
    assert!(buf[..4096].iter().all(|&b| b == 0x11));
    assert!(buf[4096..8192].iter().all(|&b| b == 0x22));
    assert!(buf[8192..].iter().all(|&b| b == 0x33));
}

#[test]
fn define_gb_surface_with_bad_format_is_rejected() {
    let mut f = fixture();
    f.set_all_otables();
    let c = cmd::CmdDefineGbSurface {
        sid: 1,
        surface_flags: 0,
        format: 0,
        num_mip_levels: 1,
        multisample_count: 0,
        autogen_filter: 0,
        size: Size3d::new(4, 4, 1),
    };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::DEFINE_GB_SURFACE, &payload(&c))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
    assert!(!f.proc.surfaces().exists(1));
    assert_eq!(
        SurfaceFormat::from_wire(0),
        None,
    );
}
