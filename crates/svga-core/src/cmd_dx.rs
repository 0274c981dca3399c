//! DX (VGPU10) command handlers.
//!
//! Every handler runs against the DX context id carried by the surrounding
//! command buffer, except the lifecycle commands and the few that embed
//! their own `cid`. The COTables bound to the context are the canonical
//! object records; handlers validate ids against them before forwarding.

use svga_mem::GuestMemory;
use svga_proto::cmd;
use svga_proto::cotable::{
    BlendStateEntry, CoTableType, DepthStencilEntry, DsViewEntry, ElementLayoutEntry, QueryEntry,
    RasterizerStateEntry, RtViewEntry, SamplerEntry, ShaderEntry, SrViewEntry, StreamOutputEntry,
    UaViewEntry,
};
use svga_proto::dx as wire;
use svga_proto::otable::{DxContextEntry, DxContextMobFormat, OTableType};
use svga_proto::read_pod_array;
use svga_proto::types::{
    CopyBox, SurfaceImageId, TransferType, INVALID_ID, QDSTATE_ACTIVE, QDSTATE_FINISHED,
    QDSTATE_IDLE, QDSTATE_INVALID, QDSTATE_PENDING, QUERY_STATE_FAILED, QUERY_STATE_PENDING,
    QUERY_STATE_SUCCEEDED, QUERY_TYPE_MAX, QUERY_TYPE_MIN,
};
use tracing::debug;

use crate::dx::{cotable_entry, cotable_entry_count, set_cotable_entry, verify_cotable_index};
use crate::error::{guest_assert, Result, SvgaError};
use crate::processor::SvgaCommandProcessor;
use crate::surface::clip_copy_box;

impl<M: GuestMemory> SvgaCommandProcessor<M> {
    pub(crate) fn process_dx_cmd(
        &mut self,
        dx_cid: u32,
        cmd_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        match cmd_id {
            cmd::DX_DEFINE_CONTEXT => self.dxcmd_define_context(payload),
            cmd::DX_DESTROY_CONTEXT => self.dxcmd_destroy_context(payload),
            cmd::DX_BIND_CONTEXT => self.dxcmd_bind_context(payload),
            cmd::DX_READBACK_CONTEXT => self.dxcmd_readback_context(payload),
            cmd::DX_INVALIDATE_CONTEXT => self.dxcmd_invalidate_context(payload),
            cmd::DX_SET_SINGLE_CONSTANT_BUFFER => self.dxcmd_set_single_constant_buffer(dx_cid, payload),
            cmd::DX_SET_SHADER_RESOURCES => self.dxcmd_set_shader_resources(dx_cid, payload),
            cmd::DX_SET_SHADER => self.dxcmd_set_shader(dx_cid, payload),
            cmd::DX_SET_SAMPLERS => self.dxcmd_set_samplers(dx_cid, payload),
            cmd::DX_DRAW => self.dxcmd_draw(dx_cid, payload),
            cmd::DX_DRAW_INDEXED => self.dxcmd_draw_indexed(dx_cid, payload),
            cmd::DX_DRAW_INSTANCED => self.dxcmd_draw_instanced(dx_cid, payload),
            cmd::DX_DRAW_INDEXED_INSTANCED => self.dxcmd_draw_indexed_instanced(dx_cid, payload),
            cmd::DX_DRAW_AUTO => self.dxcmd_draw_auto(dx_cid),
            cmd::DX_SET_INPUT_LAYOUT => self.dxcmd_set_input_layout(dx_cid, payload),
            cmd::DX_SET_VERTEX_BUFFERS => self.dxcmd_set_vertex_buffers(dx_cid, payload),
            cmd::DX_SET_INDEX_BUFFER => self.dxcmd_set_index_buffer(dx_cid, payload),
            cmd::DX_SET_TOPOLOGY => self.dxcmd_set_topology(dx_cid, payload),
            cmd::DX_SET_RENDERTARGETS => self.dxcmd_set_rendertargets(dx_cid, payload),
            cmd::DX_SET_BLEND_STATE => self.dxcmd_set_blend_state(dx_cid, payload),
            cmd::DX_SET_DEPTHSTENCIL_STATE => self.dxcmd_set_depthstencil_state(dx_cid, payload),
            cmd::DX_SET_RASTERIZER_STATE => self.dxcmd_set_rasterizer_state(dx_cid, payload),
            cmd::DX_DEFINE_QUERY => self.dxcmd_define_query(dx_cid, payload),
            cmd::DX_DESTROY_QUERY => self.dxcmd_destroy_query(dx_cid, payload),
            cmd::DX_BIND_QUERY => self.dxcmd_bind_query(dx_cid, payload),
            cmd::DX_SET_QUERY_OFFSET => self.dxcmd_set_query_offset(dx_cid, payload),
            cmd::DX_BEGIN_QUERY => self.dxcmd_begin_query(dx_cid, payload),
            cmd::DX_END_QUERY => self.dxcmd_end_query(dx_cid, payload),
            cmd::DX_READBACK_QUERY => self.dxcmd_readback_query(dx_cid, payload),
            cmd::DX_SET_PREDICATION => self.dxcmd_set_predication(dx_cid, payload),
            cmd::DX_SET_SOTARGETS => self.dxcmd_set_so_targets(dx_cid, payload),
            cmd::DX_SET_VIEWPORTS => self.dxcmd_set_viewports(dx_cid, payload),
            cmd::DX_SET_SCISSORRECTS => self.dxcmd_set_scissor_rects(dx_cid, payload),
            cmd::DX_CLEAR_RENDERTARGET_VIEW => self.dxcmd_clear_rtv(dx_cid, payload),
            cmd::DX_CLEAR_DEPTHSTENCIL_VIEW => self.dxcmd_clear_dsv(dx_cid, payload),
            cmd::DX_PRED_COPY_REGION => self.dxcmd_pred_copy_region(dx_cid, payload),
            cmd::DX_PRED_COPY => self.dxcmd_pred_copy(dx_cid, payload),
            cmd::DX_PRESENTBLT => self.dxcmd_present_blt(dx_cid, payload),
            cmd::DX_GENMIPS => self.dxcmd_genmips(dx_cid, payload),
            cmd::DX_UPDATE_SUBRESOURCE => self.dxcmd_update_subresource(payload),
            cmd::DX_READBACK_SUBRESOURCE => self.dxcmd_readback_subresource(payload),
            cmd::DX_INVALIDATE_SUBRESOURCE => self.dxcmd_invalidate_subresource(payload),
            cmd::DX_DEFINE_SHADERRESOURCE_VIEW => self.dxcmd_define_sr_view(dx_cid, payload),
            cmd::DX_DESTROY_SHADERRESOURCE_VIEW => self.dxcmd_destroy_sr_view(dx_cid, payload),
            cmd::DX_DEFINE_RENDERTARGET_VIEW => self.dxcmd_define_rt_view(dx_cid, payload),
            cmd::DX_DESTROY_RENDERTARGET_VIEW => self.dxcmd_destroy_rt_view(dx_cid, payload),
            cmd::DX_DEFINE_DEPTHSTENCIL_VIEW => self.dxcmd_define_ds_view(dx_cid, payload),
            cmd::DX_DESTROY_DEPTHSTENCIL_VIEW => self.dxcmd_destroy_ds_view(dx_cid, payload),
            cmd::DX_DEFINE_ELEMENTLAYOUT => self.dxcmd_define_element_layout(dx_cid, payload),
            cmd::DX_DESTROY_ELEMENTLAYOUT => self.dxcmd_destroy_element_layout(dx_cid, payload),
            cmd::DX_DEFINE_BLEND_STATE => self.dxcmd_define_blend_state(dx_cid, payload),
            cmd::DX_DESTROY_BLEND_STATE => self.dxcmd_destroy_blend_state(dx_cid, payload),
            cmd::DX_DEFINE_DEPTHSTENCIL_STATE => self.dxcmd_define_depthstencil_state(dx_cid, payload),
            cmd::DX_DESTROY_DEPTHSTENCIL_STATE => self.dxcmd_destroy_depthstencil_state(dx_cid, payload),
            cmd::DX_DEFINE_RASTERIZER_STATE => self.dxcmd_define_rasterizer_state(dx_cid, payload),
            cmd::DX_DESTROY_RASTERIZER_STATE => self.dxcmd_destroy_rasterizer_state(dx_cid, payload),
            cmd::DX_DEFINE_SAMPLER_STATE => self.dxcmd_define_sampler_state(dx_cid, payload),
            cmd::DX_DESTROY_SAMPLER_STATE => self.dxcmd_destroy_sampler_state(dx_cid, payload),
            cmd::DX_DEFINE_SHADER => self.dxcmd_define_shader(dx_cid, payload),
            cmd::DX_DESTROY_SHADER => self.dxcmd_destroy_shader(dx_cid, payload),
            cmd::DX_BIND_SHADER => self.dxcmd_bind_shader(payload),
            cmd::DX_DEFINE_STREAMOUTPUT => self.dxcmd_define_streamoutput(dx_cid, payload),
            cmd::DX_DESTROY_STREAMOUTPUT => self.dxcmd_destroy_streamoutput(dx_cid, payload),
            cmd::DX_SET_STREAMOUTPUT => self.dxcmd_set_streamoutput(dx_cid, payload),
            cmd::DX_SET_COTABLE => self.dxcmd_set_cotable(payload, false),
            cmd::DX_GROW_COTABLE => self.dxcmd_set_cotable(payload, true),
            cmd::DX_READBACK_COTABLE => self.dxcmd_readback_cotable(payload),
            cmd::GROW_OTABLE => self.cmd3d_grow_otable(payload),
            cmd::DX_BUFFER_COPY => self.dxcmd_buffer_copy(dx_cid, payload),
            cmd::DX_BUFFER_UPDATE => self.dxcmd_buffer_update(dx_cid, payload),
            cmd::DX_TRANSFER_FROM_BUFFER | cmd::DX_PRED_TRANSFER_FROM_BUFFER => {
                self.dxcmd_transfer_from_buffer(dx_cid, payload)
            }
            cmd::DX_SURFACE_COPY_AND_READBACK => self.dxcmd_surface_copy_and_readback(dx_cid, payload),
            cmd::DX_MOVE_QUERY => self.dxcmd_move_query(dx_cid, payload),
            cmd::DX_BIND_ALL_QUERY => self.dxcmd_bind_all_query(payload),
            cmd::DX_READBACK_ALL_QUERY => self.dxcmd_readback_all_query(payload),
            cmd::DX_MOB_FENCE_64 => self.dxcmd_mob_fence_64(payload),
            cmd::DX_BIND_ALL_SHADER => self.dxcmd_bind_all_shader(payload),
            cmd::DX_HINT => Ok(()),
            cmd::DX_SET_VS_CONSTANT_BUFFER_OFFSET => {
                self.dxcmd_set_constant_buffer_offset(dx_cid, payload, wire::SHADER_TYPE_VS)
            }
            cmd::DX_SET_PS_CONSTANT_BUFFER_OFFSET => {
                self.dxcmd_set_constant_buffer_offset(dx_cid, payload, wire::SHADER_TYPE_PS)
            }
            cmd::DX_SET_GS_CONSTANT_BUFFER_OFFSET => {
                self.dxcmd_set_constant_buffer_offset(dx_cid, payload, wire::SHADER_TYPE_GS)
            }
            cmd::DX_SET_UA_VIEWS => self.dxcmd_set_ua_views(dx_cid, payload),
            cmd::DX_DEFINE_UA_VIEW => self.dxcmd_define_ua_view(dx_cid, payload),
            cmd::DX_DESTROY_UA_VIEW => self.dxcmd_destroy_ua_view(dx_cid, payload),
            cmd::DX_CLEAR_UA_VIEW_UINT => self.dxcmd_clear_ua_view_uint(dx_cid, payload),
            cmd::DX_CLEAR_UA_VIEW_FLOAT => self.dxcmd_clear_ua_view_float(dx_cid, payload),
            cmd::DEFINE_GB_SURFACE_V3 => self.cmd3d_define_gb_surface_v3(payload),
            cmd::DEFINE_GB_SURFACE_V4 => self.cmd3d_define_gb_surface_v4(payload),
            _ => {
                self.stats.dx -= 1;
                self.stats.unknown += 1;
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
        }
    }

    fn stage_index(shader_type: u32) -> Result<usize> {
        guest_assert!(shader_type >= wire::SHADER_TYPE_MIN && shader_type < wire::SHADER_TYPE_MAX);
        Ok((shader_type - 1) as usize)
    }

    fn dx_cotable_count(&mut self, cid: u32, ty: CoTableType) -> Result<u32> {
        let ctx = self.dx_contexts.get(cid)?;
        Ok(cotable_entry_count(&mut self.mobs, ctx, ty))
    }

    /// Validates an object id against a COTable: the sentinel is always
    /// allowed, anything else must index a bound table.
    fn check_cotable_id(&mut self, cid: u32, ty: CoTableType, id: u32) -> Result<()> {
        if id == INVALID_ID {
            return Ok(());
        }
        let count = self.dx_cotable_count(cid, ty)?;
        guest_assert!(id < count);
        Ok(())
    }

    fn check_surface_id(&self, sid: u32) -> Result<()> {
        guest_assert!(sid == INVALID_ID || self.surfaces.exists(sid));
        Ok(())
    }

    /*
     * Context lifecycle.
     */

    fn dxcmd_define_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineContext>(payload)?;
        let entry = DxContextEntry {
            cid: c.cid,
            mobid: INVALID_ID,
        };
        self.otables.write(&mut self.mem, OTableType::DxContext, c.cid, &entry)?;
        if self.dx_contexts.get(c.cid).is_ok() {
            self.dx_context_destroy(c.cid)?;
        }
        self.dx_contexts.define(c.cid)?;
        let rc = self.backends.dx()?.dx_define_context(c.cid);
        if rc.is_err() {
            let _ = self.dx_context_destroy(c.cid);
        }
        rc
    }

    fn dxcmd_destroy_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyContext>(payload)?;
        self.otables.clear_entry(&mut self.mem, OTableType::DxContext, c.cid);
        self.dx_context_destroy(c.cid)
    }

    fn dx_context_destroy(&mut self, cid: u32) -> Result<()> {
        let ctx = self.dx_contexts.destroy(cid).ok_or(SvgaError::InvalidParameter)?;
        // Release the COTable backing stores the context was holding.
        for mobid in ctx.cotable_mobids {
            if let Some(mob) = self.mobs.get_mut(mobid) {
                mob.gbo_mut().backing_store_delete();
            }
        }
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_context(cid);
        }
        Ok(())
    }

    fn dxcmd_bind_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBindContext>(payload)?;
        if c.mobid != INVALID_ID {
            self.otables
                .verify_index(OTableType::Mob, c.mobid, OTableType::Mob.entry_size())?;
        }
        let mut entry: DxContextEntry =
            self.otables.read(&self.mem, OTableType::DxContext, c.cid)?;

        if c.mobid != entry.mobid && entry.mobid != INVALID_ID {
            // Unbinding: the old mob receives the live pipeline state.
            let state = self.dx_contexts.get(c.cid)?.state;
            let bytes = bytemuck::bytes_of(&state).to_vec();
            let _ = self.mob_write_bytes(entry.mobid, 0, &bytes);
        }

        if c.mobid != INVALID_ID {
            if c.valid_contents != 0 {
                let mut state = DxContextMobFormat::default();
                self.mob_read_bytes(c.mobid, 0, bytemuck::bytes_of_mut(&mut state))?;
                self.dx_contexts.get_mut(c.cid)?.state = state;
            }
            self.backends.dx()?.dx_bind_context(c.cid)?;
        }

        entry.mobid = c.mobid;
        self.otables.write(&mut self.mem, OTableType::DxContext, c.cid, &entry)
    }

    fn dxcmd_readback_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxReadbackContext>(payload)?;
        let entry: DxContextEntry =
            self.otables.read(&self.mem, OTableType::DxContext, c.cid)?;
        if entry.mobid == INVALID_ID {
            return Ok(());
        }
        self.backends.dx()?.dx_readback_context(c.cid)?;
        let state = self.dx_contexts.get(c.cid)?.state;
        let bytes = bytemuck::bytes_of(&state).to_vec();
        self.mob_write_bytes(entry.mobid, 0, &bytes)
    }

    fn dxcmd_invalidate_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxInvalidateContext>(payload)?;
        guest_assert!(self.dx_contexts.get(c.cid).is_ok());
        self.backends.dx()?.dx_invalidate_context(c.cid)
    }

    /*
     * Pipeline state.
     */

    fn dxcmd_set_single_constant_buffer(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetSingleConstantBuffer>(payload)?;
        let stage = Self::stage_index(c.shader_type)?;
        guest_assert!(c.slot < wire::MAX_CONSTANT_BUFFERS);
        self.check_surface_id(c.sid)?;
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.shader_state[stage].constant_buffers[c.slot as usize] =
                svga_proto::otable::ConstantBufferBinding {
                    sid: c.sid,
                    offset_in_bytes: c.offset_in_bytes,
                    size_in_bytes: c.size_in_bytes,
                };
        }
        self.backends.dx()?.dx_set_single_constant_buffer(
            cid,
            c.slot,
            c.shader_type,
            c.sid,
            c.offset_in_bytes,
            c.size_in_bytes,
        )
    }

    fn dxcmd_set_shader_resources(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxSetShaderResources>(payload)?;
        let view_ids = read_pod_array::<u32>(rest);
        let stage = Self::stage_index(c.shader_type)?;
        guest_assert!(
            (c.start_view as usize + view_ids.len()) <= wire::MAX_SHADER_RESOURCES as usize
        );
        for &id in &view_ids {
            self.check_cotable_id(cid, CoTableType::SrView, id)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            for (i, &id) in view_ids.iter().enumerate() {
                ctx.state.shader_state[stage].shader_resources[c.start_view as usize + i] = id;
            }
        }
        self.backends
            .dx()?
            .dx_set_shader_resources(cid, c.shader_type, c.start_view, &view_ids)
    }

    fn dxcmd_set_shader(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetShader>(payload)?;
        let stage = Self::stage_index(c.shader_type)?;
        self.check_cotable_id(cid, CoTableType::DxShader, c.shader_id)?;
        self.dx_contexts.get_mut(cid)?.state.shader_state[stage].shader_id = c.shader_id;
        self.backends.dx()?.dx_set_shader(cid, c.shader_type, c.shader_id)
    }

    fn dxcmd_set_samplers(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxSetSamplers>(payload)?;
        let sampler_ids = read_pod_array::<u32>(rest);
        let stage = Self::stage_index(c.shader_type)?;
        guest_assert!(
            (c.start_sampler as usize + sampler_ids.len()) <= wire::MAX_SAMPLERS as usize
        );
        for &id in &sampler_ids {
            self.check_cotable_id(cid, CoTableType::Sampler, id)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            for (i, &id) in sampler_ids.iter().enumerate() {
                ctx.state.shader_state[stage].samplers[c.start_sampler as usize + i] = id;
            }
        }
        self.backends
            .dx()?
            .dx_set_samplers(cid, c.shader_type, c.start_sampler, &sampler_ids)
    }

    fn dxcmd_draw(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDraw>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        self.backends.dx()?.dx_draw(cid, &c)
    }

    fn dxcmd_draw_indexed(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDrawIndexed>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        self.backends.dx()?.dx_draw_indexed(cid, &c)
    }

    fn dxcmd_draw_instanced(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDrawInstanced>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        self.backends.dx()?.dx_draw_instanced(cid, &c)
    }

    fn dxcmd_draw_indexed_instanced(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDrawIndexedInstanced>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        self.backends.dx()?.dx_draw_indexed_instanced(cid, &c)
    }

    fn dxcmd_draw_auto(&mut self, cid: u32) -> Result<()> {
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        self.backends.dx()?.dx_draw_auto(cid)
    }

    fn dxcmd_set_input_layout(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetInputLayout>(payload)?;
        self.check_cotable_id(cid, CoTableType::ElementLayout, c.element_layout_id)?;
        self.dx_contexts.get_mut(cid)?.state.element_layout_id = c.element_layout_id;
        self.backends.dx()?.dx_set_input_layout(cid, c.element_layout_id)
    }

    fn dxcmd_set_vertex_buffers(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxSetVertexBuffers>(payload)?;
        let buffers = read_pod_array::<wire::VertexBufferBinding>(rest);
        guest_assert!((c.start_buffer as usize + buffers.len()) <= wire::MAX_VERTEX_BUFFERS as usize);
        for b in &buffers {
            self.check_surface_id(b.sid)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            for (i, b) in buffers.iter().enumerate() {
                ctx.state.vertex_buffers[c.start_buffer as usize + i] = *b;
            }
        }
        self.backends.dx()?.dx_set_vertex_buffers(cid, c.start_buffer, &buffers)
    }

    fn dxcmd_set_index_buffer(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetIndexBuffer>(payload)?;
        self.check_surface_id(c.sid)?;
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.index_buffer_sid = c.sid;
            ctx.state.index_buffer_format = c.format;
            ctx.state.index_buffer_offset = c.offset;
        }
        self.backends.dx()?.dx_set_index_buffer(cid, c.sid, c.format, c.offset)
    }

    fn dxcmd_set_topology(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetTopology>(payload)?;
        guest_assert!(c.topology != wire::PRIMITIVE_INVALID && c.topology < wire::PRIMITIVE_MAX);
        self.dx_contexts.get_mut(cid)?.state.topology = c.topology;
        self.backends.dx()?.dx_set_topology(cid, c.topology)
    }

    fn dxcmd_set_rendertargets(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxSetRenderTargets>(payload)?;
        let rt_view_ids = read_pod_array::<u32>(rest);
        guest_assert!(rt_view_ids.len() <= svga_proto::types::MAX_RENDER_TARGETS as usize);
        self.check_cotable_id(cid, CoTableType::DsView, c.depth_stencil_view_id)?;
        for &id in &rt_view_ids {
            self.check_cotable_id(cid, CoTableType::RtView, id)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.depth_stencil_view_id = c.depth_stencil_view_id;
            ctx.state.render_target_view_ids = [INVALID_ID; 8];
            for (i, &id) in rt_view_ids.iter().enumerate() {
                ctx.state.render_target_view_ids[i] = id;
            }
        }
        self.backends
            .dx()?
            .dx_set_render_targets(cid, c.depth_stencil_view_id, &rt_view_ids)
    }

    fn dxcmd_set_blend_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetBlendState>(payload)?;
        self.check_cotable_id(cid, CoTableType::BlendState, c.blend_id)?;
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.blend_state_id = c.blend_id;
            for (slot, v) in c.blend_factor.iter().enumerate() {
                ctx.state.blend_factor[slot] = v.to_bits();
            }
            ctx.state.sample_mask = c.sample_mask;
        }
        self.backends
            .dx()?
            .dx_set_blend_state(cid, c.blend_id, c.blend_factor, c.sample_mask)
    }

    fn dxcmd_set_depthstencil_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetDepthStencilState>(payload)?;
        self.check_cotable_id(cid, CoTableType::DepthStencil, c.depth_stencil_id)?;
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.depth_stencil_state_id = c.depth_stencil_id;
            ctx.state.stencil_ref = c.stencil_ref;
        }
        self.backends
            .dx()?
            .dx_set_depth_stencil_state(cid, c.depth_stencil_id, c.stencil_ref)
    }

    fn dxcmd_set_rasterizer_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetRasterizerState>(payload)?;
        self.check_cotable_id(cid, CoTableType::RasterizerState, c.rasterizer_id)?;
        self.dx_contexts.get_mut(cid)?.state.rasterizer_state_id = c.rasterizer_id;
        self.backends.dx()?.dx_set_rasterizer_state(cid, c.rasterizer_id)
    }

    /*
     * Queries.
     */

    fn dxcmd_define_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineQuery>(payload)?;
        guest_assert!(c.query_type >= QUERY_TYPE_MIN && c.query_type < QUERY_TYPE_MAX);
        {
            let ctx = self.dx_contexts.get(cid)?;
            verify_cotable_index(&mut self.mobs, ctx, CoTableType::DxQuery, c.query_id)?;
        }
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_query(cid, c.query_id);
        }
        let entry = QueryEntry {
            query_type: c.query_type,
            state: QDSTATE_IDLE,
            flags: c.flags,
            mobid: INVALID_ID,
            offset: 0,
            pad0: 0,
        };
        {
            let ctx = self.dx_contexts.get(cid)?;
            set_cotable_entry(&mut self.mobs, ctx, CoTableType::DxQuery, c.query_id, &entry)?;
        }
        self.backends.dx()?.dx_define_query(cid, c.query_id, &entry)
    }

    fn query_entry(&mut self, cid: u32, query_id: u32) -> Result<QueryEntry> {
        let ctx = self.dx_contexts.get(cid)?;
        cotable_entry(&mut self.mobs, ctx, CoTableType::DxQuery, query_id)
    }

    fn set_query_entry(&mut self, cid: u32, query_id: u32, entry: &QueryEntry) -> Result<()> {
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::DxQuery, query_id, entry)
    }

    fn dxcmd_destroy_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyQuery>(payload)?;
        // Probe the entry first so an unbound table or bad id rejects.
        let _ = self.query_entry(cid, c.query_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_query(cid, c.query_id);
        }
        let entry = QueryEntry {
            query_type: INVALID_ID,
            state: QDSTATE_INVALID,
            flags: 0,
            mobid: INVALID_ID,
            offset: 0,
            pad0: 0,
        };
        self.set_query_entry(cid, c.query_id, &entry)
    }

    fn dxcmd_bind_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBindQuery>(payload)?;
        guest_assert!(self.mobs.get(c.mobid).is_some());
        let mut entry = self.query_entry(cid, c.query_id)?;
        entry.mobid = c.mobid;
        self.set_query_entry(cid, c.query_id, &entry)
    }

    fn dxcmd_set_query_offset(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetQueryOffset>(payload)?;
        let mut entry = self.query_entry(cid, c.query_id)?;
        entry.offset = c.mob_offset;
        self.set_query_entry(cid, c.query_id, &entry)
    }

    fn dxcmd_begin_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBeginQuery>(payload)?;
        let mut entry = self.query_entry(cid, c.query_id)?;
        if entry.state == QDSTATE_ACTIVE {
            return Ok(());
        }
        match self.backends.dx()?.dx_begin_query(cid, c.query_id) {
            Ok(()) => {
                entry.state = QDSTATE_ACTIVE;
                self.set_query_entry(cid, c.query_id, &entry)?;
                let pending = QUERY_STATE_PENDING.to_le_bytes();
                self.mob_write_bytes(entry.mobid, entry.offset, &pending)
            }
            Err(err) => {
                let failed = QUERY_STATE_FAILED.to_le_bytes();
                let _ = self.mob_write_bytes(entry.mobid, entry.offset, &failed);
                Err(err)
            }
        }
    }

    fn dxcmd_end_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxEndQuery>(payload)?;
        let mut entry = self.query_entry(cid, c.query_id)?;

        if entry.state == QDSTATE_ACTIVE || entry.state == QDSTATE_IDLE {
            entry.state = QDSTATE_PENDING;
            self.set_query_entry(cid, c.query_id, &entry)?;

            match self.backends.dx()?.dx_end_query(cid, c.query_id) {
                Ok(result) => {
                    // Result payload lands after the guest-visible state dword.
                    self.mob_write_bytes(entry.mobid, entry.offset + 4, &result)?;
                    let state = QUERY_STATE_SUCCEEDED.to_le_bytes();
                    self.mob_write_bytes(entry.mobid, entry.offset, &state)?;
                    entry.state = QDSTATE_FINISHED;
                    self.set_query_entry(cid, c.query_id, &entry)
                }
                Err(err) => {
                    let state = QUERY_STATE_FAILED.to_le_bytes();
                    let _ = self.mob_write_bytes(entry.mobid, entry.offset, &state);
                    Err(err)
                }
            }
        } else if entry.state == QDSTATE_FINISHED {
            Ok(())
        } else {
            Err(SvgaError::InvalidState)
        }
    }

    fn dxcmd_readback_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxReadbackQuery>(payload)?;
        // The device does not cache query results; they are already in the
        // MOB. Validate and move on.
        let _ = self.query_entry(cid, c.query_id)?;
        Ok(())
    }

    fn dxcmd_set_predication(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetPredication>(payload)?;
        if c.query_id != INVALID_ID {
            let _ = self.query_entry(cid, c.query_id)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.predicate_query_id = c.query_id;
            ctx.state.predicate_value = c.predicate_value;
        }
        self.backends.dx()?.dx_set_predication(cid, c.query_id, c.predicate_value)
    }

    fn dxcmd_move_query(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxMoveQuery>(payload)?;
        guest_assert!(c.mobid == INVALID_ID || self.mobs.get(c.mobid).is_some());
        let mut entry = self.query_entry(cid, c.query_id)?;
        entry.mobid = c.mobid;
        entry.offset = c.mob_offset;
        self.set_query_entry(cid, c.query_id, &entry)
    }

    fn dxcmd_bind_all_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBindAllQuery>(payload)?;
        guest_assert!(self.mobs.get(c.mobid).is_some());
        let count = self.dx_cotable_count(c.cid, CoTableType::DxQuery)?;
        for query_id in 0..count {
            let mut entry = self.query_entry(c.cid, query_id)?;
            if entry.query_type != INVALID_ID && entry.state != QDSTATE_INVALID {
                entry.mobid = c.mobid;
                self.set_query_entry(c.cid, query_id, &entry)?;
            }
        }
        Ok(())
    }

    fn dxcmd_readback_all_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxReadbackAllQuery>(payload)?;
        guest_assert!(self.dx_contexts.get(c.cid).is_ok());
        Ok(())
    }

    fn dxcmd_mob_fence_64(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxMobFence64>(payload)?;
        let (value, mobid, offset) = (c.value, c.mobid, c.mob_offset);
        self.mob_write_bytes(mobid, offset, &value.to_le_bytes())
    }

    /*
     * Render output and copies.
     */

    fn dxcmd_set_so_targets(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (_, rest) = Self::parse::<wire::CmdDxSetSoTargets>(payload)?;
        let targets = read_pod_array::<wire::SoTarget>(rest);
        guest_assert!(targets.len() <= wire::MAX_SO_TARGETS as usize);
        for t in &targets {
            self.check_surface_id(t.sid)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.so_targets = Default::default();
            for (i, t) in targets.iter().enumerate() {
                ctx.state.so_targets[i] = *t;
            }
        }
        self.backends.dx()?.dx_set_so_targets(cid, &targets)
    }

    fn dxcmd_set_viewports(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (_, rest) = Self::parse::<wire::CmdDxSetViewports>(payload)?;
        let viewports = read_pod_array::<wire::Viewport>(rest);
        guest_assert!(viewports.len() <= wire::MAX_VIEWPORTS as usize);
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.num_viewports = viewports.len() as u32;
            for (i, v) in viewports.iter().enumerate() {
                ctx.state.viewports[i] = *v;
            }
        }
        self.backends.dx()?.dx_set_viewports(cid, &viewports)
    }

    fn dxcmd_set_scissor_rects(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (_, rest) = Self::parse::<wire::CmdDxSetScissorRects>(payload)?;
        let rects = read_pod_array::<svga_proto::types::SignedRect>(rest);
        guest_assert!(rects.len() <= wire::MAX_VIEWPORTS as usize);
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.num_scissor_rects = rects.len() as u32;
            for (i, r) in rects.iter().enumerate() {
                ctx.state.scissor_rects[i] = *r;
            }
        }
        self.backends.dx()?.dx_set_scissor_rects(cid, &rects)
    }

    fn dxcmd_clear_rtv(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxClearRenderTargetView>(payload)?;
        guest_assert!(c.render_target_view_id != INVALID_ID);
        self.check_cotable_id(cid, CoTableType::RtView, c.render_target_view_id)?;
        self.backends
            .dx()?
            .dx_clear_render_target_view(cid, c.render_target_view_id, c.rgba)
    }

    fn dxcmd_clear_dsv(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxClearDepthStencilView>(payload)?;
        guest_assert!(c.depth_stencil_view_id != INVALID_ID);
        self.check_cotable_id(cid, CoTableType::DsView, c.depth_stencil_view_id)?;
        let flags = (c.flags_stencil & 0xffff) as u16;
        let stencil = (c.flags_stencil >> 16) as u16;
        self.backends.dx()?.dx_clear_depth_stencil_view(
            cid,
            c.depth_stencil_view_id,
            flags,
            c.depth,
            stencil,
        )
    }

    fn subresource_image(&self, sid: u32, subresource: u32) -> Result<SurfaceImageId> {
        let surface = self.surfaces.get(sid)?;
        guest_assert!(subresource < surface.num_mip_levels * surface.array_size);
        Ok(SurfaceImageId {
            sid,
            face: subresource / surface.num_mip_levels,
            mipmap: subresource % surface.num_mip_levels,
        })
    }

    fn dxcmd_pred_copy_region(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxPredCopyRegion>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        let dst = self.subresource_image(c.dst_sid, c.dst_subresource)?;
        let src = self.subresource_image(c.src_sid, c.src_subresource)?;

        let dst_size = self.surfaces.get(dst.sid)?.mip_level(dst.face, dst.mipmap)?.size;
        let src_size = self.surfaces.get(src.sid)?.mip_level(src.face, src.mipmap)?.size;
        let mut bounds = c.bounds;
        clip_copy_box(&mut bounds, &dst_size, &src_size);
        if bounds.w == 0 || bounds.h == 0 || bounds.d == 0 {
            debug!("copy region fully clipped");
            return Ok(());
        }

        self.software_copy_if_shadowed(src, dst, bounds)?;
        self.backends.dx()?.dx_pred_copy_region(
            cid,
            c.dst_sid,
            c.dst_subresource,
            c.src_sid,
            c.src_subresource,
            bounds,
        )
    }

    fn software_copy_if_shadowed(
        &mut self,
        src: SurfaceImageId,
        dst: SurfaceImageId,
        bounds: CopyBox,
    ) -> Result<()> {
        let src_shadowed = self
            .surfaces
            .get(src.sid)?
            .mip_level(src.face, src.mipmap)?
            .shadow
            .is_some();
        let dst_shadowed = self
            .surfaces
            .get(dst.sid)?
            .mip_level(dst.face, dst.mipmap)?
            .shadow
            .is_some();
        if src_shadowed && dst_shadowed {
            self.copy_between_surfaces(src, dst, &[bounds])?;
        }
        Ok(())
    }

    fn dxcmd_pred_copy(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxPredCopy>(payload)?;
        guest_assert!(self.dx_contexts.get(cid).is_ok());
        guest_assert!(self.surfaces.exists(c.dst_sid) && self.surfaces.exists(c.src_sid));
        self.backends.dx()?.dx_pred_copy(cid, c.dst_sid, c.src_sid)
    }

    fn dxcmd_present_blt(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxPresentBlt>(payload)?;
        guest_assert!(self.surfaces.exists(c.src_sid) && self.surfaces.exists(c.dst_sid));
        self.backends.dx()?.dx_present_blt(cid, &c)
    }

    fn dxcmd_genmips(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxGenMips>(payload)?;
        guest_assert!(c.shader_resource_view_id != INVALID_ID);
        self.check_cotable_id(cid, CoTableType::SrView, c.shader_resource_view_id)?;
        self.backends.dx()?.dx_genmips(cid, c.shader_resource_view_id)
    }

    fn dxcmd_update_subresource(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxUpdateSubResource>(payload)?;
        let image = self.subresource_image(c.sid, c.subresource)?;
        self.gb_transfer_subresource(image, Some(c.bounds), TransferType::WriteHostVram)
    }

    fn dxcmd_readback_subresource(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxReadbackSubResource>(payload)?;
        let image = self.subresource_image(c.sid, c.subresource)?;
        self.gb_transfer_subresource(image, None, TransferType::ReadHostVram)
    }

    fn gb_transfer_subresource(
        &mut self,
        image: SurfaceImageId,
        bounds: Option<svga_proto::types::Box3d>,
        transfer: TransferType,
    ) -> Result<()> {
        let surface = self.surfaces.get_mut(image.sid)?;
        let mobid = surface.mobid;
        let mob = self.mobs.get(mobid).ok_or(SvgaError::InvalidState)?;
        crate::surface::transfer_surface_level(&mut self.mem, mob, surface, image, bounds, transfer)
    }

    fn dxcmd_invalidate_subresource(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxInvalidateSubResource>(payload)?;
        let image = self.subresource_image(c.sid, c.subresource)?;
        self.invalidate_image(image.sid, image.face, image.mipmap)
    }

    /*
     * Views, state objects, shaders, stream output.
     */

    fn dxcmd_define_sr_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineShaderResourceView>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        let entry = SrViewEntry {
            sid: c.sid,
            format: c.format,
            resource_dimension: c.resource_dimension,
            desc: c.desc,
            pad0: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::SrView,
            c.shader_resource_view_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_view(cid, CoTableType::SrView, c.shader_resource_view_id)
    }

    fn dxcmd_destroy_sr_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyShaderResourceView>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::SrView, c.shader_resource_view_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_view(cid, CoTableType::SrView, c.shader_resource_view_id);
        }
        Ok(())
    }

    fn clear_cotable_entry(&mut self, cid: u32, ty: CoTableType, index: u32) -> Result<()> {
        let ctx = self.dx_contexts.get(cid)?;
        match ty {
            CoTableType::RtView => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &RtViewEntry::default())
            }
            CoTableType::DsView => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &DsViewEntry::default())
            }
            CoTableType::SrView => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &SrViewEntry::default())
            }
            CoTableType::ElementLayout => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &ElementLayoutEntry::default())
            }
            CoTableType::BlendState => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &BlendStateEntry::default())
            }
            CoTableType::DepthStencil => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &DepthStencilEntry::default())
            }
            CoTableType::RasterizerState => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &RasterizerStateEntry::default())
            }
            CoTableType::Sampler => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &SamplerEntry::default())
            }
            CoTableType::StreamOutput => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &StreamOutputEntry::default())
            }
            CoTableType::DxQuery => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &QueryEntry::default())
            }
            CoTableType::DxShader => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &ShaderEntry::default())
            }
            CoTableType::UaView => {
                set_cotable_entry(&mut self.mobs, ctx, ty, index, &UaViewEntry::default())
            }
        }
    }

    fn dxcmd_define_rt_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineRenderTargetView>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        let entry = RtViewEntry {
            sid: c.sid,
            format: c.format,
            resource_dimension: c.resource_dimension,
            desc: c.desc.desc,
            pad0: 0,
            pad1: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::RtView,
            c.render_target_view_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_view(cid, CoTableType::RtView, c.render_target_view_id)
    }

    fn dxcmd_destroy_rt_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyRenderTargetView>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::RtView, c.render_target_view_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_view(cid, CoTableType::RtView, c.render_target_view_id);
        }
        Ok(())
    }

    fn dxcmd_define_ds_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineDepthStencilView>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        let entry = DsViewEntry {
            sid: c.sid,
            format: c.format,
            resource_dimension: c.resource_dimension,
            mip_slice: c.mip_slice,
            first_array_slice: c.first_array_slice,
            array_size: c.array_size,
            flags: c.flags,
            pad0: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::DsView,
            c.depth_stencil_view_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_view(cid, CoTableType::DsView, c.depth_stencil_view_id)
    }

    fn dxcmd_destroy_ds_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyDepthStencilView>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::DsView, c.depth_stencil_view_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_view(cid, CoTableType::DsView, c.depth_stencil_view_id);
        }
        Ok(())
    }

    fn dxcmd_define_element_layout(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxDefineElementLayout>(payload)?;
        let descs = read_pod_array::<wire::InputElementDesc>(rest);
        guest_assert!(descs.len() <= wire::MAX_VERTEX_ELEMENTS);
        let mut entry = ElementLayoutEntry {
            num_descs: descs.len() as u32,
            pad0: 0,
            ..Default::default()
        };
        entry.descs[..descs.len()].copy_from_slice(&descs);
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::ElementLayout,
            c.element_layout_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_state_object(cid, CoTableType::ElementLayout, c.element_layout_id)
    }

    fn dxcmd_destroy_element_layout(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyElementLayout>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::ElementLayout, c.element_layout_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_state_object(cid, CoTableType::ElementLayout, c.element_layout_id);
        }
        Ok(())
    }

    fn dxcmd_define_blend_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineBlendState>(payload)?;
        let entry = BlendStateEntry {
            alpha_to_coverage_enable: c.alpha_to_coverage_enable,
            independent_blend_enable: c.independent_blend_enable,
            per_rt: c.per_rt,
            pad0: 0,
            pad1: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::BlendState, c.blend_id, &entry)?;
        self.backends
            .dx()?
            .dx_define_state_object(cid, CoTableType::BlendState, c.blend_id)
    }

    fn dxcmd_destroy_blend_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyBlendState>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::BlendState, c.blend_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_state_object(cid, CoTableType::BlendState, c.blend_id);
        }
        Ok(())
    }

    fn dxcmd_define_depthstencil_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineDepthStencilState>(payload)?;
        let entry = DepthStencilEntry {
            depth_enable: c.depth_enable,
            depth_write_mask: c.depth_write_mask,
            depth_func: c.depth_func,
            stencil_enable: c.stencil_enable,
            front_enable: c.front_enable,
            back_enable: c.back_enable,
            read_mask: c.read_mask,
            write_mask: c.write_mask,
            front_stencil_fail_op: c.front_stencil_fail_op,
            front_stencil_depth_fail_op: c.front_stencil_depth_fail_op,
            front_stencil_pass_op: c.front_stencil_pass_op,
            front_stencil_func: c.front_stencil_func,
            back_stencil_fail_op: c.back_stencil_fail_op,
            back_stencil_depth_fail_op: c.back_stencil_depth_fail_op,
            back_stencil_pass_op: c.back_stencil_pass_op,
            back_stencil_func: c.back_stencil_func,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::DepthStencil,
            c.depth_stencil_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_state_object(cid, CoTableType::DepthStencil, c.depth_stencil_id)
    }

    fn dxcmd_destroy_depthstencil_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyDepthStencilState>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::DepthStencil, c.depth_stencil_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_state_object(cid, CoTableType::DepthStencil, c.depth_stencil_id);
        }
        Ok(())
    }

    fn dxcmd_define_rasterizer_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineRasterizerState>(payload)?;
        let entry = RasterizerStateEntry {
            fill_mode: c.fill_mode,
            cull_mode: c.cull_mode,
            front_counter_clockwise: c.front_counter_clockwise,
            provoking_vertex_last: c.provoking_vertex_last,
            depth_bias: c.depth_bias,
            depth_bias_clamp: c.depth_bias_clamp,
            slope_scaled_depth_bias: c.slope_scaled_depth_bias,
            depth_clip_enable: c.depth_clip_enable,
            scissor_enable: c.scissor_enable,
            multisample_enable: c.multisample_enable,
            antialiased_line_enable: c.antialiased_line_enable,
            line_width: c.line_width,
            line_stipple_enable: c.line_stipple_enable,
            line_stipple_factor: c.line_stipple_factor,
            line_stipple_pattern: c.line_stipple_pattern,
            pad0: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(
            &mut self.mobs,
            ctx,
            CoTableType::RasterizerState,
            c.rasterizer_id,
            &entry,
        )?;
        self.backends
            .dx()?
            .dx_define_state_object(cid, CoTableType::RasterizerState, c.rasterizer_id)
    }

    fn dxcmd_destroy_rasterizer_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyRasterizerState>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::RasterizerState, c.rasterizer_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_state_object(cid, CoTableType::RasterizerState, c.rasterizer_id);
        }
        Ok(())
    }

    fn dxcmd_define_sampler_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineSamplerState>(payload)?;
        let entry = SamplerEntry {
            filter: c.filter,
            address_u: c.address_u,
            address_v: c.address_v,
            address_w: c.address_w,
            mip_lod_bias: c.mip_lod_bias,
            max_anisotropy: c.max_anisotropy,
            comparison_func: c.comparison_func,
            border_color: c.border_color,
            min_lod: c.min_lod,
            max_lod: c.max_lod,
            pad0: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::Sampler, c.sampler_id, &entry)?;
        self.backends
            .dx()?
            .dx_define_state_object(cid, CoTableType::Sampler, c.sampler_id)
    }

    fn dxcmd_destroy_sampler_state(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroySamplerState>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::Sampler, c.sampler_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_state_object(cid, CoTableType::Sampler, c.sampler_id);
        }
        Ok(())
    }

    fn dxcmd_define_shader(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineShader>(payload)?;
        guest_assert!(c.shader_type >= wire::SHADER_TYPE_MIN && c.shader_type < wire::SHADER_TYPE_MAX);
        let entry = ShaderEntry {
            shader_type: c.shader_type,
            size_in_bytes: c.size_in_bytes,
            offset_in_bytes: 0,
            mobid: INVALID_ID,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::DxShader, c.shader_id, &entry)?;
        self.backends.dx()?.dx_define_shader(cid, c.shader_id, c.shader_type)
    }

    fn dxcmd_destroy_shader(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyShader>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::DxShader, c.shader_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_shader(cid, c.shader_id);
        }
        Ok(())
    }

    /// `DX_BIND_SHADER` names its context explicitly: shader bytecode just
    /// became resident in a MOB.
    fn dxcmd_bind_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBindShader>(payload)?;
        guest_assert!(self.mobs.get(c.mobid).is_some());
        let mut entry: ShaderEntry = {
            let ctx = self.dx_contexts.get(c.cid)?;
            cotable_entry(&mut self.mobs, ctx, CoTableType::DxShader, c.shid)?
        };
        entry.mobid = c.mobid;
        entry.offset_in_bytes = c.offset_in_bytes;
        {
            let ctx = self.dx_contexts.get(c.cid)?;
            set_cotable_entry(&mut self.mobs, ctx, CoTableType::DxShader, c.shid, &entry)?;
        }

        guest_assert!(entry.size_in_bytes <= 8 * 1024 * 1024);
        let mut bytecode = vec![0u8; entry.size_in_bytes as usize];
        self.mob_read_bytes(c.mobid, c.offset_in_bytes, &mut bytecode)?;
        self.backends.dx()?.dx_bind_shader(c.cid, c.shid, &bytecode)
    }

    fn dxcmd_define_streamoutput(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineStreamOutput>(payload)?;
        guest_assert!(c.num_output_stream_entries as usize <= wire::MAX_STREAMOUT_DECLS);
        let entry = StreamOutputEntry {
            num_output_stream_entries: c.num_output_stream_entries,
            rasterized_stream: c.rasterized_stream,
            stream_output_stride_in_bytes: c.stream_output_stride_in_bytes,
            decl: c.decl,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::StreamOutput, c.soid, &entry)?;
        self.backends.dx()?.dx_define_stream_output(cid, c.soid)
    }

    fn dxcmd_destroy_streamoutput(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyStreamOutput>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::StreamOutput, c.soid)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_stream_output(cid, c.soid);
        }
        Ok(())
    }

    fn dxcmd_set_streamoutput(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetStreamOutput>(payload)?;
        self.check_cotable_id(cid, CoTableType::StreamOutput, c.soid)?;
        self.dx_contexts.get_mut(cid)?.state.stream_output_id = c.soid;
        self.backends.dx()?.dx_set_stream_output(cid, c.soid)
    }

    /*
     * COTables.
     */

    fn dxcmd_set_cotable(&mut self, payload: &[u8], grow: bool) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetCoTable>(payload)?;
        let ty = CoTableType::from_wire(c.cotable_type).ok_or(SvgaError::InvalidParameter)?;
        guest_assert!(self.dx_contexts.get(c.cid).is_ok());

        if c.mobid != INVALID_ID {
            {
                let mob = self.mobs.get_mut(c.mobid).ok_or(SvgaError::InvalidParameter)?;
                guest_assert!(c.valid_size_in_bytes <= mob.size_bytes());
                // Materialize the host view so entry accesses are direct reads.
                mob.gbo_mut().backing_store_create(&self.mem, c.valid_size_in_bytes)?;
            }
            if grow && c.valid_size_in_bytes > 0 {
                // Growing: carry the valid prefix over from the old table.
                let old = self.dx_contexts.get(c.cid)?.cotable_mobid(ty);
                if old != INVALID_ID && old != c.mobid {
                    let prefix = {
                        let old_mob = self.mobs.get(old).ok_or(SvgaError::InvalidState)?;
                        let bytes = old_mob
                            .gbo()
                            .backing_store_bytes(0)
                            .ok_or(SvgaError::InvalidState)?;
                        bytes[..(c.valid_size_in_bytes as usize).min(bytes.len())].to_vec()
                    };
                    let mob = self.mobs.get_mut(c.mobid).ok_or(SvgaError::InvalidParameter)?;
                    let dst = mob
                        .gbo_mut()
                        .backing_store_bytes_mut(0)
                        .ok_or(SvgaError::InvalidState)?;
                    dst[..prefix.len()].copy_from_slice(&prefix);
                }
            }
        } else {
            let old = self.dx_contexts.get(c.cid)?.cotable_mobid(ty);
            if let Some(mob) = self.mobs.get_mut(old) {
                mob.gbo_mut().backing_store_delete();
            }
        }

        let valid_entries = if c.mobid != INVALID_ID {
            c.valid_size_in_bytes / ty.entry_size()
        } else {
            0
        };
        {
            let ctx = self.dx_contexts.get_mut(c.cid)?;
            ctx.cotable_mobids[ty.index()] = c.mobid;
            ctx.state.cotable_mobids[ty.index()] = c.mobid;
        }
        self.backends.dx()?.dx_set_cotable(c.cid, ty, valid_entries)
    }

    fn dxcmd_readback_cotable(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxReadbackCoTable>(payload)?;
        let ty = CoTableType::from_wire(c.cotable_type).ok_or(SvgaError::InvalidParameter)?;
        let mobid = self.dx_contexts.get(c.cid)?.cotable_mobid(ty);
        let mob = self.mobs.get_mut(mobid).ok_or(SvgaError::InvalidState)?;
        mob.gbo().backing_store_write_to_guest(&mut self.mem)
    }

    /*
     * Buffer ops and the remaining forwards.
     */

    fn dxcmd_buffer_copy(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBufferCopy>(payload)?;
        guest_assert!(self.surfaces.exists(c.dest) && self.surfaces.exists(c.src));
        self.backends
            .dx()?
            .dx_buffer_copy(cid, c.dest, c.src, c.dest_x, c.src_x, c.width)
    }

    fn dxcmd_buffer_update(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBufferUpdate>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        self.backends.dx()?.dx_buffer_update(cid, c.sid, c.x, c.width)
    }

    fn dxcmd_transfer_from_buffer(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxTransferFromBuffer>(payload)?;
        guest_assert!(self.surfaces.exists(c.src_sid));
        let _ = self.subresource_image(c.dest_sid, c.dest_subresource)?;
        self.backends.dx()?.dx_transfer_from_buffer(cid, &c)
    }

    fn dxcmd_surface_copy_and_readback(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSurfaceCopyAndReadback>(payload)?;
        guest_assert!(self.surfaces.exists(c.src_sid) && self.surfaces.exists(c.dest_sid));
        self.backends
            .dx()?
            .dx_surface_copy_and_readback(cid, c.src_sid, c.dest_sid, c.bounds)
    }

    fn dxcmd_bind_all_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxBindAllShader>(payload)?;
        let count = self.dx_cotable_count(c.cid, CoTableType::DxShader)?;
        for shid in 0..count {
            let entry: ShaderEntry = {
                let ctx = self.dx_contexts.get(c.cid)?;
                cotable_entry(&mut self.mobs, ctx, CoTableType::DxShader, shid)?
            };
            if entry.mobid == INVALID_ID || entry.size_in_bytes == 0 {
                continue;
            }
            guest_assert!(entry.size_in_bytes <= 8 * 1024 * 1024);
            let mut bytecode = vec![0u8; entry.size_in_bytes as usize];
            if self
                .mob_read_bytes(entry.mobid, entry.offset_in_bytes, &mut bytecode)
                .is_ok()
            {
                self.backends.dx()?.dx_bind_shader(c.cid, shid, &bytecode)?;
            }
        }
        Ok(())
    }

    fn dxcmd_set_constant_buffer_offset(
        &mut self,
        cid: u32,
        payload: &[u8],
        shader_type: u32,
    ) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxSetConstantBufferOffset>(payload)?;
        let stage = Self::stage_index(shader_type)?;
        guest_assert!(c.slot < wire::MAX_CONSTANT_BUFFERS);
        self.dx_contexts.get_mut(cid)?.state.shader_state[stage].constant_buffers
            [c.slot as usize]
            .offset_in_bytes = c.offset_in_bytes;
        self.backends
            .dx()?
            .dx_set_constant_buffer_offset(cid, shader_type, c.slot, c.offset_in_bytes)
    }

    fn dxcmd_set_ua_views(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<wire::CmdDxSetUaViews>(payload)?;
        let view_ids = read_pod_array::<u32>(rest);
        guest_assert!(view_ids.len() <= wire::MAX_UA_VIEWS as usize);
        for &id in &view_ids {
            self.check_cotable_id(cid, CoTableType::UaView, id)?;
        }
        {
            let ctx = self.dx_contexts.get_mut(cid)?;
            ctx.state.uav_splice_index = c.uav_splice_index;
            ctx.state.ua_views = [INVALID_ID; 8];
            for (i, &id) in view_ids.iter().enumerate() {
                ctx.state.ua_views[i] = id;
            }
        }
        self.backends.dx()?.dx_set_ua_views(cid, c.uav_splice_index, &view_ids)
    }

    fn dxcmd_define_ua_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDefineUaView>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        let entry = UaViewEntry {
            sid: c.sid,
            format: c.format,
            resource_dimension: c.resource_dimension,
            desc: c.desc,
            pad0: 0,
        };
        let ctx = self.dx_contexts.get(cid)?;
        set_cotable_entry(&mut self.mobs, ctx, CoTableType::UaView, c.ua_view_id, &entry)?;
        self.backends.dx()?.dx_define_view(cid, CoTableType::UaView, c.ua_view_id)
    }

    fn dxcmd_destroy_ua_view(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxDestroyUaView>(payload)?;
        self.clear_cotable_entry(cid, CoTableType::UaView, c.ua_view_id)?;
        if let Ok(backend) = self.backends.dx() {
            backend.dx_destroy_view(cid, CoTableType::UaView, c.ua_view_id);
        }
        Ok(())
    }

    fn dxcmd_clear_ua_view_uint(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxClearUaViewUint>(payload)?;
        self.check_cotable_id(cid, CoTableType::UaView, c.ua_view_id)?;
        guest_assert!(c.ua_view_id != INVALID_ID);
        self.backends.dx()?.dx_clear_ua_view_uint(cid, c.ua_view_id, c.value)
    }

    fn dxcmd_clear_ua_view_float(&mut self, cid: u32, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<wire::CmdDxClearUaViewFloat>(payload)?;
        self.check_cotable_id(cid, CoTableType::UaView, c.ua_view_id)?;
        guest_assert!(c.ua_view_id != INVALID_ID);
        self.backends.dx()?.dx_clear_ua_view_float(cid, c.ua_view_id, c.value)
    }
}
