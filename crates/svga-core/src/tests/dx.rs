use pretty_assertions::assert_eq;
use svga_proto::cmd;
use svga_proto::cotable::CoTableType;
use svga_proto::dx as wire;
use svga_proto::types::{CopyBox, INVALID_ID, QUERY_STATE_PENDING, QUERY_STATE_SUCCEEDED};

use super::{fixture, payload, payload_with, Fixture};
use crate::error::SvgaError;

fn dx_fixture() -> Fixture {
    let mut f = fixture();
    f.set_all_otables();
    f.define_dx_context(0);
    f
}

#[test]
fn define_context_requires_its_otable() {
    let mut f = fixture();
    let c = wire::CmdDxDefineContext { cid: 0 };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::DX_DEFINE_CONTEXT, &payload(&c))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn set_cotable_with_oversized_valid_bytes_is_rejected_without_mutation() {
    let mut f = dx_fixture();
    f.define_mob(1, 0x400, 1);

    let c = wire::CmdDxSetCoTable {
        cid: 0,
        mobid: 1,
        cotable_type: CoTableType::DxQuery.index() as u32,
        valid_size_in_bytes: 8192, // mob is only 4096
    };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::DX_SET_COTABLE, &payload(&c))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
    let ctx = f.proc.dx_contexts().get(0).unwrap();
    assert_eq!(ctx.cotable_mobid(CoTableType::DxQuery), INVALID_ID);
}

#[test]
fn query_state_machine_writes_through_the_bound_mob() {
    let mut f = dx_fixture();
    // Query COTable in MOB 1, result buffer in MOB 5.
    f.define_mob(1, 0x400, 1);
    f.define_mob(5, 0x410, 1);
    f.set_cotable(0, CoTableType::DxQuery, 1, 4096);

    f.rec.0.borrow_mut().dx_query_payload = 0x2Au64.to_le_bytes().to_vec();

    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_DEFINE_QUERY,
            &payload(&wire::CmdDxDefineQuery {
                query_id: 3,
                query_type: 0, // occlusion
                flags: 0,
            }),
        )
        .unwrap();
    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_BIND_QUERY,
            &payload(&wire::CmdDxBindQuery { query_id: 3, mobid: 5 }),
        )
        .unwrap();
    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_SET_QUERY_OFFSET,
            &payload(&wire::CmdDxSetQueryOffset { query_id: 3, mob_offset: 0 }),
        )
        .unwrap();

    f.proc
        .process_3d_cmd(0, cmd::DX_BEGIN_QUERY, &payload(&wire::CmdDxBeginQuery { query_id: 3 }))
        .unwrap();
    assert_eq!(
        f.proc.guest_memory().read_u32(0x410_000).unwrap(),
        QUERY_STATE_PENDING
    );

    f.proc
        .process_3d_cmd(0, cmd::DX_END_QUERY, &payload(&wire::CmdDxEndQuery { query_id: 3 }))
        .unwrap();

    // State dword first, then the backend's sample count.
    assert_eq!(
        f.proc.guest_memory().read_u32(0x410_000).unwrap(),
        QUERY_STATE_SUCCEEDED
    );
    assert_eq!(f.proc.guest_memory().read_u32(0x410_004).unwrap(), 0x2A);
}

#[test]
fn begin_query_out_of_table_bounds_is_rejected() {
    let mut f = dx_fixture();
    f.define_mob(1, 0x400, 1);
    f.set_cotable(0, CoTableType::DxQuery, 1, 4096);

    // One page of 24-byte entries: 170 fit.
    let err = f
        .proc
        .process_3d_cmd(
            0,
            cmd::DX_DEFINE_QUERY,
            &payload(&wire::CmdDxDefineQuery {
                query_id: 200,
                query_type: 0,
                flags: 0,
            }),
        )
        .unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn pred_copy_region_reaches_backend_with_clipped_box() {
    let mut f = dx_fixture();
    f.define_gb_surface_2d(1, 256, 256);

    let c = wire::CmdDxPredCopyRegion {
        dst_sid: 1,
        dst_subresource: 0,
        src_sid: 1,
        src_subresource: 0,
        bounds: CopyBox {
            x: 250,
            y: 250,
            z: 0,
            w: 16,
            h: 16,
            d: 1,
            srcx: 0,
            srcy: 0,
            srcz: 0,
        },
    };
    f.proc
        .process_3d_cmd(0, cmd::DX_PRED_COPY_REGION, &payload(&c))
        .unwrap();

    let rec = f.rec.0.borrow();
    assert_eq!(rec.pred_copy_regions.len(), 1);
    let b = rec.pred_copy_regions[0];
    assert_eq!((b.x, b.y, b.z, b.w, b.h, b.d), (250, 250, 0, 6, 6, 1));
}

#[test]
fn bind_readback_bind_restores_pipeline_state() {
    let mut f = dx_fixture();
    f.define_dx_context(2);
    // Two pages comfortably hold the context image.
    f.define_mob(20, 0x420, 2);

    let bind = wire::CmdDxBindContext {
        cid: 2,
        mobid: 20,
        valid_contents: 0,
    };
    f.proc.process_3d_cmd(2, cmd::DX_BIND_CONTEXT, &payload(&bind)).unwrap();

    f.proc
        .process_3d_cmd(2, cmd::DX_SET_TOPOLOGY, &payload(&wire::CmdDxSetTopology { topology: 5 }))
        .unwrap();

    f.proc
        .process_3d_cmd(
            2,
            cmd::DX_READBACK_CONTEXT,
            &payload(&wire::CmdDxReadbackContext { cid: 2 }),
        )
        .unwrap();

    // Clobber the live state, then rebind with valid contents.
    f.proc
        .process_3d_cmd(2, cmd::DX_SET_TOPOLOGY, &payload(&wire::CmdDxSetTopology { topology: 7 }))
        .unwrap();
    let rebind = wire::CmdDxBindContext {
        cid: 2,
        mobid: 20,
        valid_contents: 1,
    };
    f.proc.process_3d_cmd(2, cmd::DX_BIND_CONTEXT, &payload(&rebind)).unwrap();

    assert_eq!(f.proc.dx_contexts().get(2).unwrap().state.topology, 5);
}

#[test]
fn set_rendertargets_validates_view_ids_against_the_cotable() {
    let mut f = dx_fixture();
    f.define_mob(1, 0x400, 1);
    f.set_cotable(0, CoTableType::RtView, 1, 4096);

    // One page of 32-byte entries: ids 0..127 are addressable.
    let ok = wire::CmdDxSetRenderTargets {
        depth_stencil_view_id: INVALID_ID,
    };
    f.proc
        .process_3d_cmd(0, cmd::DX_SET_RENDERTARGETS, &payload_with(&ok, &[5u32]))
        .unwrap();
    assert_eq!(f.proc.dx_contexts().get(0).unwrap().state.render_target_view_ids[0], 5);

    let bad = wire::CmdDxSetRenderTargets {
        depth_stencil_view_id: INVALID_ID,
    };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::DX_SET_RENDERTARGETS, &payload_with(&bad, &[128u32]))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn set_shader_without_bound_shader_cotable_rejects_real_ids() {
    let mut f = dx_fixture();
    // The sentinel is always acceptable.
    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_SET_SHADER,
            &payload(&wire::CmdDxSetShader {
                shader_id: INVALID_ID,
                shader_type: wire::SHADER_TYPE_VS,
            }),
        )
        .unwrap();

    // A real id has no table to validate against.
    assert_eq!(
        f.proc
            .process_3d_cmd(
                0,
                cmd::DX_SET_SHADER,
                &payload(&wire::CmdDxSetShader {
                    shader_id: 0,
                    shader_type: wire::SHADER_TYPE_VS,
                }),
            )
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn readback_cotable_pushes_entries_to_guest_memory() {
    let mut f = dx_fixture();
    f.define_gb_surface_2d(3, 8, 8);
    f.define_mob(1, 0x400, 1);
    f.set_cotable(0, CoTableType::RtView, 1, 0);

    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_DEFINE_RENDERTARGET_VIEW,
            &payload(&wire::CmdDxDefineRenderTargetView {
                render_target_view_id: 2,
                sid: 3,
                format: 68,
                resource_dimension: 2,
                desc: wire::ViewDesc::default(),
            }),
        )
        .unwrap();

    // Entry lives only in the backing store until readback.
    assert_eq!(f.proc.guest_memory().read_u32(0x400_000 + 2 * 32).unwrap(), 0);

    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_READBACK_COTABLE,
            &payload(&wire::CmdDxReadbackCoTable {
                cid: 0,
                cotable_type: CoTableType::RtView.index() as u32,
            }),
        )
        .unwrap();
    assert_eq!(f.proc.guest_memory().read_u32(0x400_000 + 2 * 32).unwrap(), 3);
    assert_eq!(f.proc.guest_memory().read_u32(0x400_000 + 2 * 32 + 4).unwrap(), 68);
}

#[test]
fn draw_requires_a_live_context() {
    let mut f = dx_fixture();
    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_DRAW,
            &payload(&wire::CmdDxDraw {
                vertex_count: 3,
                start_vertex_location: 0,
            }),
        )
        .unwrap();
    assert_eq!(f.rec.0.borrow().dx_draws, 1);

    // Context 9 was never defined.
    assert_eq!(
        f.proc
            .process_3d_cmd(
                9,
                cmd::DX_DRAW,
                &payload(&wire::CmdDxDraw {
                    vertex_count: 3,
                    start_vertex_location: 0,
                }),
            )
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn destroy_context_releases_cotable_backing() {
    let mut f = dx_fixture();
    f.define_mob(1, 0x400, 1);
    f.set_cotable(0, CoTableType::DxQuery, 1, 4096);

    f.proc
        .process_3d_cmd(
            0,
            cmd::DX_DESTROY_CONTEXT,
            &payload(&wire::CmdDxDestroyContext { cid: 0 }),
        )
        .unwrap();

    assert!(f.proc.dx_contexts().get(0).is_err());
    // The MOB survives, but its host backing store is gone.
    let mobs = f.proc.mobs();
    assert_eq!(mobs.len(), 1);
}
