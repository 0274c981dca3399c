//! The 3D command dispatcher: VGPU9 and guest-backed-object families.
//! DX (VGPU10) handlers live in `cmd_dx.rs`.
//!
//! Per command: minimum-size check, reinterpret the payload as the typed
//! struct, derive the trailing array from the remaining bytes, validate ids
//! against the catalogs, call the handler. Policy violations are reported to
//! the caller and otherwise non-fatal; the stream continues.

use svga_mem::GuestMemory;
use svga_proto::cmd::{self, QueryResult};
use svga_proto::format::{SurfaceFlags, SurfaceFormat};
use svga_proto::otable::{ContextEntry, MobEntry, OTableType, ScreenTargetEntry, ShaderEntry, SurfaceEntry};
use svga_proto::read_pod_array;
use svga_proto::types::{
    Box3d, CopyBox, GuestPtr, MobFormat, Rect, SurfaceImageId, TransferType, GMR_FRAMEBUFFER,
    INVALID_ID, QUERY_STATE_FAILED, QUERY_STATE_PENDING, QUERY_STATE_SUCCEEDED,
    QUERY_TYPE_OCCLUSION,
};
use tracing::{debug, trace};

use crate::context::Vgpu9QueryState;
use crate::error::{guest_assert, Result, SvgaError};
use crate::processor::SvgaCommandProcessor;
use crate::screen::{Screen, ScreenBacking};
use crate::surface::{clip_copy_box, surface_dma, transfer_surface_level, SurfaceDefinition};

impl<M: GuestMemory> SvgaCommandProcessor<M> {
    /// Top-level 3D entry point: dispatches, counts, and swallows errors.
    pub fn submit_3d_cmd(&mut self, dx_context_id: u32, cmd_id: u32, payload: &[u8]) {
        match self.process_3d_cmd(dx_context_id, cmd_id, payload) {
            Ok(()) => {}
            Err(err) => {
                self.stats.errors += 1;
                if err == SvgaError::InvalidParameter {
                    self.stats.malformed += 1;
                }
                debug!(cmd_id, ?err, "3d command failed");
            }
        }
    }

    pub fn process_3d_cmd(&mut self, dx_context_id: u32, cmd_id: u32, payload: &[u8]) -> Result<()> {
        if !(cmd::CMD_3D_BASE..cmd::CMD_3D_MAX).contains(&cmd_id) {
            self.log_unknown(cmd_id);
            self.stats.unknown += 1;
            return Err(SvgaError::NotImplemented);
        }
        trace!(cmd_id, dx_context_id, len = payload.len(), "3d command");

        if cmd_id >= cmd::DX_DEFINE_CONTEXT {
            self.stats.dx += 1;
            return self.process_dx_cmd(dx_context_id, cmd_id, payload);
        }
        if cmd_id >= cmd::SET_OTABLE_BASE {
            self.stats.gb += 1;
            return self.process_gb_cmd(cmd_id, payload);
        }
        self.stats.vgpu9 += 1;
        self.process_vgpu9_cmd(cmd_id, payload)
    }

    fn process_vgpu9_cmd(&mut self, cmd_id: u32, payload: &[u8]) -> Result<()> {
        match cmd_id {
            cmd::SURFACE_DEFINE => self.cmd3d_surface_define(payload),
            cmd::SURFACE_DEFINE_V2 => self.cmd3d_surface_define_v2(payload),
            cmd::SURFACE_DESTROY => self.cmd3d_surface_destroy(payload),
            cmd::SURFACE_COPY => self.cmd3d_surface_copy(payload),
            cmd::SURFACE_STRETCHBLT => self.cmd3d_surface_stretchblt(payload),
            cmd::SURFACE_DMA => self.cmd3d_surface_dma(payload),
            cmd::BLIT_SURFACE_TO_SCREEN => self.cmd3d_blit_surface_to_screen(payload),
            cmd::CONTEXT_DEFINE => self.cmd3d_context_define(payload),
            cmd::CONTEXT_DESTROY => self.cmd3d_context_destroy(payload),
            cmd::SETTRANSFORM => self.cmd3d_set_transform(payload),
            cmd::SETZRANGE => self.cmd3d_set_zrange(payload),
            cmd::SETRENDERSTATE => self.cmd3d_set_render_state(payload),
            cmd::SETRENDERTARGET => self.cmd3d_set_render_target(payload),
            cmd::SETTEXTURESTATE => self.cmd3d_set_texture_state(payload),
            cmd::SETMATERIAL => self.cmd3d_set_material(payload),
            cmd::SETLIGHTDATA => self.cmd3d_set_light_data(payload),
            cmd::SETLIGHTENABLED => self.cmd3d_set_light_enabled(payload),
            cmd::SETVIEWPORT => self.cmd3d_set_viewport(payload),
            cmd::SETCLIPPLANE => self.cmd3d_set_clip_plane(payload),
            cmd::SETSCISSORRECT => self.cmd3d_set_scissor_rect(payload),
            cmd::CLEAR => self.cmd3d_clear(payload),
            cmd::PRESENT => self.cmd3d_present(payload),
            cmd::PRESENT_READBACK => Ok(()),
            cmd::SHADER_DEFINE => self.cmd3d_shader_define(payload),
            cmd::SHADER_DESTROY => self.cmd3d_shader_destroy(payload),
            cmd::SET_SHADER => self.cmd3d_set_shader(payload),
            cmd::SET_SHADER_CONST => self.cmd3d_set_shader_const(payload),
            cmd::DRAW_PRIMITIVES => self.cmd3d_draw_primitives(payload),
            cmd::BEGIN_QUERY => self.cmd3d_begin_query(payload),
            cmd::END_QUERY => self.cmd3d_end_query(payload),
            cmd::WAIT_FOR_QUERY => self.cmd3d_wait_for_query(payload),
            cmd::GENERATE_MIPMAPS => self.cmd3d_generate_mipmaps(payload),
            cmd::ACTIVATE_SURFACE | cmd::DEACTIVATE_SURFACE => Ok(()),
            _ => {
                self.stats.vgpu9 -= 1;
                self.stats.unknown += 1;
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
        }
    }

    fn process_gb_cmd(&mut self, cmd_id: u32, payload: &[u8]) -> Result<()> {
        match cmd_id {
            cmd::SET_OTABLE_BASE => self.cmd3d_set_otable_base(payload),
            cmd::SET_OTABLE_BASE64 => self.cmd3d_set_otable_base64(payload, false),
            cmd::DEFINE_GB_MOB => self.cmd3d_define_gb_mob(payload),
            cmd::DEFINE_GB_MOB64 | cmd::REDEFINE_GB_MOB64 => self.cmd3d_define_gb_mob64(payload),
            cmd::DESTROY_GB_MOB => self.cmd3d_destroy_gb_mob(payload),
            cmd::DEFINE_GB_SURFACE => self.cmd3d_define_gb_surface(payload),
            cmd::DEFINE_GB_SURFACE_V2 => self.cmd3d_define_gb_surface_v2(payload),
            cmd::DESTROY_GB_SURFACE => self.cmd3d_destroy_gb_surface(payload),
            cmd::BIND_GB_SURFACE => self.cmd3d_bind_gb_surface(payload),
            cmd::COND_BIND_GB_SURFACE => self.cmd3d_cond_bind_gb_surface(payload),
            cmd::UPDATE_GB_IMAGE => self.cmd3d_update_gb_image(payload),
            cmd::UPDATE_GB_SURFACE => self.cmd3d_update_gb_surface(payload),
            cmd::READBACK_GB_IMAGE => self.cmd3d_readback_gb_image(payload),
            cmd::READBACK_GB_SURFACE => self.cmd3d_readback_gb_surface(payload),
            cmd::READBACK_GB_IMAGE_PARTIAL => self.cmd3d_readback_gb_image_partial(payload),
            cmd::INVALIDATE_GB_IMAGE => self.cmd3d_invalidate_gb_image(payload),
            cmd::INVALIDATE_GB_SURFACE => self.cmd3d_invalidate_gb_surface(payload),
            cmd::INVALIDATE_GB_IMAGE_PARTIAL => self.cmd3d_invalidate_gb_image_partial(payload),
            cmd::DEFINE_GB_CONTEXT => self.cmd3d_define_gb_context(payload),
            cmd::DESTROY_GB_CONTEXT => self.cmd3d_destroy_gb_context(payload),
            cmd::BIND_GB_CONTEXT => self.cmd3d_bind_gb_context(payload),
            cmd::READBACK_GB_CONTEXT | cmd::INVALIDATE_GB_CONTEXT => {
                let (c, _) = Self::parse::<cmd::CmdReadbackGbContext>(payload)?;
                guest_assert!(self.contexts.exists(c.cid));
                Ok(())
            }
            cmd::DEFINE_GB_SHADER => self.cmd3d_define_gb_shader(payload),
            cmd::DESTROY_GB_SHADER => self.cmd3d_destroy_gb_shader(payload),
            cmd::BIND_GB_SHADER => self.cmd3d_bind_gb_shader(payload),
            cmd::BEGIN_GB_QUERY => self.cmd3d_begin_gb_query(payload),
            cmd::END_GB_QUERY => self.cmd3d_end_gb_query(payload),
            cmd::WAIT_FOR_GB_QUERY => self.cmd3d_wait_for_gb_query(payload),
            cmd::DEFINE_GB_SCREENTARGET => self.cmd3d_define_gb_screentarget(payload),
            cmd::DESTROY_GB_SCREENTARGET => self.cmd3d_destroy_gb_screentarget(payload),
            cmd::BIND_GB_SCREENTARGET => self.cmd3d_bind_gb_screentarget(payload),
            cmd::UPDATE_GB_SCREENTARGET => self.cmd3d_update_gb_screentarget(payload),
            cmd::NOP | cmd::NOP_ERROR => Ok(()),
            cmd::SET_VERTEX_STREAMS
            | cmd::SET_VERTEX_DECLS
            | cmd::SET_VERTEX_DIVISORS
            | cmd::DRAW
            | cmd::DRAW_INDEXED => {
                // Late VGPU9 extensions no shipping guest driver uses.
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
            _ => {
                self.stats.gb -= 1;
                self.stats.unknown += 1;
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
        }
    }

    /*
     * Shared helpers.
     */

    pub(crate) fn mob_write_bytes(&mut self, mobid: u32, off: u32, data: &[u8]) -> Result<()> {
        let mob = self.mobs.get(mobid).ok_or(SvgaError::InvalidState)?;
        mob.write(&mut self.mem, off, data)
    }

    pub(crate) fn mob_read_bytes(&mut self, mobid: u32, off: u32, data: &mut [u8]) -> Result<()> {
        let mob = self.mobs.get(mobid).ok_or(SvgaError::InvalidState)?;
        mob.read(&self.mem, off, data)
    }

    /// Writes through a legacy `GuestPtr` (GMR or the VRAM framebuffer).
    fn guest_ptr_write(&mut self, ptr: GuestPtr, bytes: &[u8]) -> Result<()> {
        if ptr.gmr_id == GMR_FRAMEBUFFER {
            let at = ptr.offset as usize;
            guest_assert!(at + bytes.len() <= self.vram.len());
            self.vram[at..at + bytes.len()].copy_from_slice(bytes);
            Ok(())
        } else {
            self.gmrs.get(ptr.gmr_id)?.write(&mut self.mem, ptr.offset, bytes)
        }
    }

    /// Moves one subresource between its bound MOB and the host shadow.
    fn gb_surface_transfer(
        &mut self,
        image: SurfaceImageId,
        bounds: Option<Box3d>,
        transfer: TransferType,
    ) -> Result<()> {
        let surface = self.surfaces.get_mut(image.sid)?;
        let mobid = surface.mobid;
        let mob = self.mobs.get(mobid).ok_or(SvgaError::InvalidState)?;
        transfer_surface_level(&mut self.mem, mob, surface, image, bounds, transfer)
    }

    fn surface_define_common(
        &mut self,
        sid: u32,
        def: SurfaceDefinition,
        alloc_mip_shadows: bool,
    ) -> Result<()> {
        if self.surfaces.exists(sid) {
            self.destroy_surface_internal(sid)?;
        }
        self.surfaces.define(sid, &def, alloc_mip_shadows)
    }

    /*
     * VGPU9 surface commands.
     */

    fn cmd3d_surface_define(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdDefineSurface>(payload)?;
        // v1 is v2 with no multisample/autogen filter fields.
        self.define_surface_vgpu9(
            c.sid,
            c.surface_flags,
            c.format,
            c.face[0].num_mip_levels,
            0,
            0,
            rest,
        )
    }

    fn cmd3d_surface_define_v2(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdDefineSurfaceV2>(payload)?;
        self.define_surface_vgpu9(
            c.sid,
            c.surface_flags,
            c.format,
            c.face[0].num_mip_levels,
            c.multisample_count,
            c.autogen_filter,
            rest,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn define_surface_vgpu9(
        &mut self,
        sid: u32,
        flags32: u32,
        format: u32,
        num_mip_levels: u32,
        multisample_count: u32,
        autogen_filter: u32,
        sizes: &[u8],
    ) -> Result<()> {
        let sizes = read_pod_array::<svga_proto::types::Size3d>(sizes);
        guest_assert!(!sizes.is_empty());
        let format = SurfaceFormat::from_wire(format).ok_or(SvgaError::InvalidParameter)?;
        let def = SurfaceDefinition {
            flags: SurfaceFlags::from_legacy(flags32),
            format,
            num_mip_levels,
            multisample_count,
            autogen_filter,
            base_size: sizes[0],
            array_size: 0,
        };
        // Legacy surfaces are software-first: shadows now, hardware later.
        self.surface_define_common(sid, def, true)
    }

    fn cmd3d_surface_destroy(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroySurface>(payload)?;
        self.destroy_surface_internal(c.sid)
    }

    fn cmd3d_surface_copy(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdSurfaceCopy>(payload)?;
        let boxes = read_pod_array::<CopyBox>(rest);
        self.copy_between_surfaces(c.src, c.dest, &boxes)
    }

    pub(crate) fn copy_between_surfaces(
        &mut self,
        src: SurfaceImageId,
        dest: SurfaceImageId,
        boxes: &[CopyBox],
    ) -> Result<()> {
        let src_size = {
            let s = self.surfaces.get(src.sid)?;
            s.mip_level(src.face, src.mipmap)?.size
        };
        let dst_size = {
            let s = self.surfaces.get(dest.sid)?;
            s.mip_level(dest.face, dest.mipmap)?.size
        };

        let mut clipped = Vec::with_capacity(boxes.len());
        for b in boxes {
            let mut b = *b;
            clip_copy_box(&mut b, &dst_size, &src_size);
            if b.w == 0 || b.h == 0 || b.d == 0 {
                continue;
            }
            clipped.push(b);
        }

        // Software copy between shadows where both sides have them.
        for b in &clipped {
            self.software_box_copy(src, dest, *b)?;
        }

        if let Ok(backend) = self.backends.three_d() {
            backend.surface_copy(dest, src, &clipped)?;
        }
        Ok(())
    }

    /// Copies one clipped box between two subresource shadows, skipping
    /// silently when either side has no software copy.
    fn software_box_copy(
        &mut self,
        src: SurfaceImageId,
        dest: SurfaceImageId,
        b: CopyBox,
    ) -> Result<()> {
        let (block, src_level_geom) = {
            let s = self.surfaces.get(src.sid)?;
            (s.block, {
                let l = s.mip_level(src.face, src.mipmap)?;
                (l.row_pitch, l.plane_pitch)
            })
        };
        let rows = b.h.div_ceil(block.height);
        let row_bytes = (b.w.div_ceil(block.width) * block.bytes) as usize;

        let mut staging = vec![0u8; row_bytes];
        for z in 0..b.d {
            for row in 0..rows {
                let src_off = (b.srcx / block.width) * block.bytes
                    + ((b.srcy / block.height) + row) * src_level_geom.0
                    + (b.srcz + z) * src_level_geom.1;
                {
                    let s = self.surfaces.get(src.sid)?;
                    let Ok(shadow) = s.shadow_bytes(src.face, src.mipmap) else {
                        return Ok(());
                    };
                    let Some(from) = shadow.get(src_off as usize..src_off as usize + row_bytes)
                    else {
                        return Err(SvgaError::InternalError);
                    };
                    staging.copy_from_slice(from);
                }
                let d = self.surfaces.get_mut(dest.sid)?;
                let (dst_pitch, dst_plane) = {
                    let l = d.mip_level(dest.face, dest.mipmap)?;
                    (l.row_pitch, l.plane_pitch)
                };
                let dst_off = (b.x / block.width) * block.bytes
                    + ((b.y / block.height) + row) * dst_pitch
                    + (b.z + z) * dst_plane;
                let Ok(shadow) = d.shadow_bytes_mut(dest.face, dest.mipmap) else {
                    return Ok(());
                };
                let Some(to) = shadow.get_mut(dst_off as usize..dst_off as usize + row_bytes)
                else {
                    return Err(SvgaError::InternalError);
                };
                to.copy_from_slice(&staging);
            }
        }
        let d = self.surfaces.get_mut(dest.sid)?;
        d.mip_level_mut(dest.face, dest.mipmap)?.dirty = true;
        d.dirty = true;
        Ok(())
    }

    fn cmd3d_surface_stretchblt(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSurfaceStretchBlt>(payload)?;

        let (src_box, src_cid) = {
            let s = self.surfaces.get(c.src.sid)?;
            let level = s.mip_level(c.src.face, c.src.mipmap)?;
            let mut b = c.box_src;
            b.clip(&level.size);
            (b, s.associated_context_id)
        };
        let (dst_box, dst_cid) = {
            let s = self.surfaces.get(c.dest.sid)?;
            let level = s.mip_level(c.dest.face, c.dest.mipmap)?;
            let mut b = c.box_dest;
            b.clip(&level.size);
            (b, s.associated_context_id)
        };

        // At least one operand must already belong to a context.
        let cid = if dst_cid != INVALID_ID { dst_cid } else { src_cid };
        guest_assert!(cid != INVALID_ID);

        self.realize_surface(cid, c.src.sid)?;
        self.realize_surface(cid, c.dest.sid)?;

        self.backends
            .three_d()?
            .surface_stretch_blt(c.dest, dst_box, c.src, src_box, c.mode)
    }

    /// Lazily instantiates the backend resource for a surface.
    pub(crate) fn realize_surface(&mut self, cid: u32, sid: u32) -> Result<()> {
        let surface = self.surfaces.get_mut(sid)?;
        if surface.has_backend_resource() {
            return Ok(());
        }
        let backend = self
            .backends
            .three_d
            .as_deref_mut()
            .ok_or(SvgaError::NotSupported)?;
        backend.create_texture(cid, surface)?;
        surface.associated_context_id = cid;
        Ok(())
    }

    fn cmd3d_surface_dma(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdSurfaceDma>(payload)?;
        let boxes = read_pod_array::<CopyBox>(rest);
        let transfer =
            TransferType::from_wire(c.transfer).ok_or(SvgaError::InvalidParameter)?;

        {
            let surface = self.surfaces.get_mut(c.host.sid)?;
            let hw = surface.has_backend_resource();
            // Split borrows: the DMA helper wants catalog-free access.
            let gmrs = &self.gmrs;
            let vram = &mut self.vram;
            surface_dma(&mut self.mem, gmrs, vram, surface, c.guest, c.host, transfer, &boxes)?;
            if hw {
                let level_size = surface.mip_level(c.host.face, c.host.mipmap)?.size;
                if let Ok(backend) = self.backends.three_d() {
                    for b in &boxes {
                        let mut clipped = Box3d {
                            x: b.x,
                            y: b.y,
                            z: b.z,
                            w: b.w,
                            h: b.h,
                            d: b.d,
                        };
                        clipped.clip(&level_size);
                        if clipped.is_empty() {
                            continue;
                        }
                        backend.surface_dma_box(
                            c.host,
                            CopyBox {
                                x: clipped.x,
                                y: clipped.y,
                                z: clipped.z,
                                w: clipped.w,
                                h: clipped.h,
                                d: clipped.d,
                                srcx: b.srcx + (clipped.x - b.x),
                                srcy: b.srcy + (clipped.y - b.y),
                                srcz: b.srcz + (clipped.z - b.z),
                            },
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn cmd3d_blit_surface_to_screen(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdBlitSurfaceToScreen>(payload)?;
        let clip_rects = read_pod_array::<svga_proto::types::SignedRect>(rest);

        guest_assert!(self.surfaces.exists(c.src_image.sid));
        let screen = self.screens.get(c.dest_screen_id)?;
        let (sw, sh, screen_id) = (screen.width, screen.height, screen.id);

        if let Ok(backend) = self.backends.three_d() {
            backend.surface_blit_to_screen(
                screen_id,
                c.dest_rect,
                c.src_image,
                c.src_rect,
                &clip_rects,
            )?;
        }
        if let Some(display) = self.backends.display.as_deref_mut() {
            let x = c.dest_rect.left.clamp(0, sw as i32) as u32;
            let y = c.dest_rect.top.clamp(0, sh as i32) as u32;
            let r = c.dest_rect.right.clamp(x as i32, sw as i32) as u32;
            let b = c.dest_rect.bottom.clamp(y as i32, sh as i32) as u32;
            if r > x && b > y {
                display.screen_update(screen_id, x, y, r - x, b - y);
            }
        }
        Ok(())
    }

    /*
     * VGPU9 context commands.
     */

    fn cmd3d_context_define(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineContext>(payload)?;
        if self.contexts.exists(c.cid) {
            self.vgpu9_context_destroy(c.cid)?;
        }
        self.contexts.define(c.cid)?;
        self.backends.vgpu9()?.context_define(c.cid)
    }

    fn cmd3d_context_destroy(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyContext>(payload)?;
        self.vgpu9_context_destroy(c.cid)
    }

    fn vgpu9_context_destroy(&mut self, cid: u32) -> Result<()> {
        guest_assert!(self.contexts.destroy(cid).is_some());
        // Surfaces realized under this context lose their hardware copy.
        for surface in self.surfaces.iter_mut() {
            if surface.associated_context_id == cid {
                surface.backend_handle = None;
                surface.associated_context_id = INVALID_ID;
                surface.mark_all_dirty();
            }
        }
        if let Ok(backend) = self.backends.vgpu9() {
            backend.context_destroy(cid);
        }
        Ok(())
    }

    fn cmd3d_set_transform(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetTransform>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_transform(c.cid, c.transform_type, &c.matrix)
    }

    fn cmd3d_set_zrange(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetZRange>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_z_range(c.cid, c.min, c.max)
    }

    fn cmd3d_set_render_state(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdSetRenderState>(payload)?;
        let states = read_pod_array::<cmd::RenderStateEntry>(rest);
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_render_state(c.cid, &states)
    }

    fn cmd3d_set_render_target(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetRenderTarget>(payload)?;
        guest_assert!(c.rt_type < crate::context::RT_SLOT_COUNT as u32);
        guest_assert!(c.target.sid == INVALID_ID || self.surfaces.exists(c.target.sid));
        let ctx = self.contexts.get_mut(c.cid)?;
        ctx.render_targets[c.rt_type as usize] = c.target.sid;
        self.backends.vgpu9()?.set_render_target(c.cid, c.rt_type, c.target)
    }

    fn cmd3d_set_texture_state(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdSetTextureState>(payload)?;
        let states = read_pod_array::<cmd::TextureStateEntry>(rest);
        {
            let exists: Vec<bool> = states
                .iter()
                .map(|s| s.value == INVALID_ID || self.surfaces.exists(s.value))
                .collect();
            let ctx = self.contexts.get_mut(c.cid)?;
            for (s, ok) in states.iter().zip(exists) {
                if s.name == cmd::TS_BIND_TEXTURE
                    && (s.stage as usize) < crate::context::TEXTURE_STAGE_COUNT
                    && ok
                {
                    ctx.active_textures[s.stage as usize] = s.value;
                }
            }
        }
        self.backends.vgpu9()?.set_texture_state(c.cid, &states)
    }

    fn cmd3d_set_material(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetMaterial>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_material(c.cid, c.face, &c.material)
    }

    fn cmd3d_set_light_data(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetLightData>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_light_data(c.cid, c.index, &c.data)
    }

    fn cmd3d_set_light_enabled(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetLightEnabled>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends
            .vgpu9()?
            .set_light_enabled(c.cid, c.index, c.enabled != 0)
    }

    fn cmd3d_set_viewport(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetViewport>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_viewport(c.cid, c.rect)
    }

    fn cmd3d_set_clip_plane(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetClipPlane>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_clip_plane(c.cid, c.index, &c.plane)
    }

    fn cmd3d_set_scissor_rect(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetScissorRect>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.set_scissor_rect(c.cid, c.rect)
    }

    fn cmd3d_clear(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdClear>(payload)?;
        let rects = read_pod_array::<Rect>(rest);
        guest_assert!(self.contexts.exists(c.cid));
        self.backends
            .vgpu9()?
            .clear(c.cid, c.clear_flag, c.color, c.depth, c.stencil, &rects)
    }

    fn cmd3d_present(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdPresent>(payload)?;
        let rects = read_pod_array::<cmd::CopyRect>(rest);
        guest_assert!(self.surfaces.exists(c.sid));
        self.backends.vgpu9()?.present(c.sid, &rects)
    }

    fn cmd3d_shader_define(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdDefineShader>(payload)?;
        let bytecode = read_pod_array::<u32>(rest);
        guest_assert!(self.contexts.exists(c.cid));
        guest_assert!(c.shader_type == cmd::SHADER_TYPE_VS || c.shader_type == cmd::SHADER_TYPE_PS);
        guest_assert!(!bytecode.is_empty());
        self.backends
            .vgpu9()?
            .shader_define(c.cid, c.shid, c.shader_type, &bytecode)
    }

    fn cmd3d_shader_destroy(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyShader>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        self.backends.vgpu9()?.shader_destroy(c.cid, c.shid, c.shader_type)
    }

    fn cmd3d_set_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetShader>(payload)?;
        guest_assert!(c.shader_type == cmd::SHADER_TYPE_VS || c.shader_type == cmd::SHADER_TYPE_PS);
        let ctx = self.contexts.get_mut(c.cid)?;
        match c.shader_type {
            cmd::SHADER_TYPE_VS => ctx.vertex_shader_id = c.shid,
            _ => ctx.pixel_shader_id = c.shid,
        }
        self.backends.vgpu9()?.set_shader(c.cid, c.shader_type, c.shid)
    }

    fn cmd3d_set_shader_const(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdSetShaderConst>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        // The fixed struct carries one register; more may trail it.
        let mut values = vec![c.values];
        for extra in read_pod_array::<[u32; 4]>(rest) {
            values.push(extra);
        }
        self.backends
            .vgpu9()?
            .set_shader_const(c.cid, c.reg, c.shader_type, c.const_type, &values)
    }

    fn cmd3d_draw_primitives(&mut self, payload: &[u8]) -> Result<()> {
        let (c, rest) = Self::parse::<cmd::CmdDrawPrimitives>(payload)?;
        guest_assert!(self.contexts.exists(c.cid));
        guest_assert!(c.num_ranges > 0 && c.num_ranges <= 32);
        guest_assert!(c.num_vertex_decls > 0 && c.num_vertex_decls <= 32);

        let decl_bytes = c.num_vertex_decls as usize * core::mem::size_of::<cmd::VertexDecl>();
        let range_bytes = c.num_ranges as usize * core::mem::size_of::<cmd::PrimitiveRange>();
        guest_assert!(rest.len() >= decl_bytes + range_bytes);

        let decls = read_pod_array::<cmd::VertexDecl>(&rest[..decl_bytes]);
        let ranges =
            read_pod_array::<cmd::PrimitiveRange>(&rest[decl_bytes..decl_bytes + range_bytes]);
        // Optional per-declaration divisors trail the ranges.
        let divisors_raw = &rest[decl_bytes + range_bytes..];
        let divisors: Vec<u32> = if divisors_raw.len() >= c.num_vertex_decls as usize * 4 {
            read_pod_array::<u32>(&divisors_raw[..c.num_vertex_decls as usize * 4])
        } else {
            Vec::new()
        };

        for d in &decls {
            guest_assert!(self.surfaces.exists(d.array.surface_id));
        }
        for r in &ranges {
            guest_assert!(
                r.index_array.surface_id == INVALID_ID
                    || self.surfaces.exists(r.index_array.surface_id)
            );
        }
        self.backends
            .vgpu9()?
            .draw_primitives(c.cid, &decls, &ranges, &divisors)
    }

    /*
     * VGPU9 queries. Only occlusion queries exist at this protocol level.
     */

    fn cmd3d_begin_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBeginQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        {
            let ctx = self.contexts.get_mut(c.cid)?;
            ctx.occlusion.state = Vgpu9QueryState::Building;
            ctx.occlusion.result = 0;
        }
        self.backends.vgpu9()?.occlusion_query_begin(c.cid)
    }

    fn cmd3d_end_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdEndQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        guest_assert!(self.contexts.exists(c.cid));

        let (state, result32) = match self.backends.vgpu9()?.occlusion_query_end(c.cid) {
            Ok(samples) => (QUERY_STATE_SUCCEEDED, samples),
            Err(_) => (QUERY_STATE_FAILED, 0),
        };
        {
            let ctx = self.contexts.get_mut(c.cid)?;
            ctx.occlusion.state = Vgpu9QueryState::Issued;
            ctx.occlusion.result = result32;
        }
        self.write_query_result(c.guest_result, state, result32)
    }

    fn cmd3d_wait_for_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdWaitForQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        let (state, result32) = {
            let ctx = self.contexts.get(c.cid)?;
            match ctx.occlusion.state {
                Vgpu9QueryState::Issued => (QUERY_STATE_SUCCEEDED, ctx.occlusion.result),
                Vgpu9QueryState::Building => (QUERY_STATE_PENDING, 0),
                Vgpu9QueryState::None => (QUERY_STATE_FAILED, 0),
            }
        };
        self.write_query_result(c.guest_result, state, result32)
    }

    fn write_query_result(&mut self, at: GuestPtr, state: u32, result32: u32) -> Result<()> {
        let result = QueryResult {
            total_size: core::mem::size_of::<QueryResult>() as u32,
            state,
            result32,
        };
        self.guest_ptr_write(at, bytemuck::bytes_of(&result))
    }

    fn cmd3d_generate_mipmaps(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdGenerateMipmaps>(payload)?;
        guest_assert!(self.surfaces.exists(c.sid));
        self.backends.three_d()?.generate_mipmaps(c.sid, c.filter)
    }

    /*
     * Object tables and MOBs.
     */

    fn cmd3d_set_otable_base(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetOTableBase>(payload)?;
        self.set_otable(
            c.table_type,
            u64::from(c.base_address),
            c.size_in_bytes,
            c.valid_size_in_bytes,
            c.pt_depth,
            false,
        )
    }

    /// `GROW_OTABLE` reuses the 64-bit set layout with the copy-over flag.
    pub(crate) fn cmd3d_grow_otable(&mut self, payload: &[u8]) -> Result<()> {
        self.cmd3d_set_otable_base64(payload, true)
    }

    fn cmd3d_set_otable_base64(&mut self, payload: &[u8], grow: bool) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdSetOTableBase64>(payload)?;
        let base = c.base_address;
        self.set_otable(c.table_type, base, c.size_in_bytes, c.valid_size_in_bytes, c.pt_depth, grow)
    }

    fn set_otable(
        &mut self,
        table_type: u32,
        base: u64,
        size: u32,
        valid: u32,
        pt_depth: u32,
        grow: bool,
    ) -> Result<()> {
        let ty = OTableType::from_wire(table_type).ok_or(SvgaError::InvalidParameter)?;
        let depth = MobFormat::from_wire(pt_depth).ok_or(SvgaError::InvalidParameter)?;
        self.otables.set_or_grow(&mut self.mem, ty, base, size, valid, depth, grow)
    }

    fn cmd3d_define_gb_mob(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbMob>(payload)?;
        self.define_gb_mob(c.mobid, c.pt_depth, u64::from(c.base), c.size_in_bytes)
    }

    fn cmd3d_define_gb_mob64(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbMob64>(payload)?;
        let base = c.base;
        let (mobid, pt_depth, size) = (c.mobid, c.pt_depth, c.size_in_bytes);
        self.define_gb_mob(mobid, pt_depth, base, size)
    }

    fn define_gb_mob(&mut self, mobid: u32, pt_depth: u32, base: u64, size: u32) -> Result<()> {
        let depth = MobFormat::from_wire(pt_depth).ok_or(SvgaError::InvalidParameter)?;
        // The OTable entry is the canonical record; write it first.
        let entry = MobEntry {
            pt_depth,
            size_in_bytes: size,
            base,
        };
        self.otables.write(&mut self.mem, OTableType::Mob, mobid, &entry)?;
        self.mobs.create(&self.mem, mobid, depth, base, size)?;
        if let Ok(backend) = self.backends.gbo() {
            backend.mob_defined(mobid, size)?;
        }
        Ok(())
    }

    fn cmd3d_destroy_gb_mob(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyGbMob>(payload)?;
        self.otables.clear_entry(&mut self.mem, OTableType::Mob, c.mobid);
        guest_assert!(self.mobs.destroy(c.mobid).is_some());
        if let Ok(backend) = self.backends.gbo() {
            backend.mob_destroyed(c.mobid);
        }
        Ok(())
    }

    /*
     * Guest-backed surfaces.
     */

    fn cmd3d_define_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbSurface>(payload)?;
        self.define_gb_surface_common(
            c.sid,
            u64::from(c.surface_flags),
            c.format,
            c.num_mip_levels,
            c.multisample_count,
            c.autogen_filter,
            c.size,
            0,
            0,
        )
    }

    fn cmd3d_define_gb_surface_v2(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbSurfaceV2>(payload)?;
        self.define_gb_surface_common(
            c.sid,
            u64::from(c.surface_flags),
            c.format,
            c.num_mip_levels,
            c.multisample_count,
            c.autogen_filter,
            c.size,
            c.array_size,
            0,
        )
    }

    pub(crate) fn cmd3d_define_gb_surface_v3(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbSurfaceV3>(payload)?;
        let (sid, flags, format) = (c.sid, c.surface_flags, c.format);
        let (mips, msaa, filter) = (c.num_mip_levels, c.multisample_count, c.autogen_filter);
        let (size, array) = (c.size, c.array_size);
        self.define_gb_surface_common(sid, flags, format, mips, msaa, filter, size, array, 0)
    }

    pub(crate) fn cmd3d_define_gb_surface_v4(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbSurfaceV4>(payload)?;
        let (sid, flags, format) = (c.sid, c.surface_flags, c.format);
        let (mips, msaa, filter) = (c.num_mip_levels, c.multisample_count, c.autogen_filter);
        let (size, array, stride) = (c.size, c.array_size, c.buffer_byte_stride);
        self.define_gb_surface_common(sid, flags, format, mips, msaa, filter, size, array, stride)
    }

    #[allow(clippy::too_many_arguments)]
    fn define_gb_surface_common(
        &mut self,
        sid: u32,
        flags: u64,
        format: u32,
        num_mip_levels: u32,
        multisample_count: u32,
        autogen_filter: u32,
        size: svga_proto::types::Size3d,
        array_size: u32,
        buffer_byte_stride: u32,
    ) -> Result<()> {
        let fmt = SurfaceFormat::from_wire(format).ok_or(SvgaError::InvalidParameter)?;
        let def = SurfaceDefinition {
            flags: SurfaceFlags::from_bits_retain(flags),
            format: fmt,
            num_mip_levels,
            multisample_count,
            autogen_filter,
            base_size: size,
            array_size,
        };
        // Guest-backed surfaces keep their bytes in the MOB; no shadows yet.
        self.surface_define_common(sid, def, false)?;

        let entry = SurfaceEntry {
            format,
            surface1_flags: flags as u32,
            num_mip_levels,
            multisample_count,
            autogen_filter,
            size,
            mobid: INVALID_ID,
            array_size,
            mob_pitch: 0,
            surface2_flags: (flags >> 32) as u32,
            multisample_pattern: 0,
            quality_level: 0,
            buffer_byte_stride,
            min_lod: 0,
        };
        // The surface OTable may legitimately be absent on the legacy path.
        let _ = self.otables.write(&mut self.mem, OTableType::Surface, sid, &entry);
        Ok(())
    }

    fn cmd3d_destroy_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyGbSurface>(payload)?;
        self.otables.clear_entry(&mut self.mem, OTableType::Surface, c.sid);
        self.destroy_surface_internal(c.sid)
    }

    fn cmd3d_bind_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBindGbSurface>(payload)?;
        self.bind_gb_surface(c.sid, c.mobid)
    }

    fn cmd3d_cond_bind_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdCondBindGbSurface>(payload)?;
        if self.surfaces.get(c.sid)?.mobid == c.test_mobid {
            self.bind_gb_surface(c.sid, c.mobid)?;
        }
        Ok(())
    }

    fn bind_gb_surface(&mut self, sid: u32, mobid: u32) -> Result<()> {
        guest_assert!(mobid == INVALID_ID || self.mobs.get(mobid).is_some());
        self.surfaces.get_mut(sid)?.mobid = mobid;
        // Mirror the binding into the OTable entry when the table exists.
        if let Ok(mut entry) = self.otables.read::<_, SurfaceEntry>(&self.mem, OTableType::Surface, sid)
        {
            entry.mobid = mobid;
            let _ = self.otables.write(&mut self.mem, OTableType::Surface, sid, &entry);
        }
        Ok(())
    }

    fn cmd3d_update_gb_image(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdUpdateGbImage>(payload)?;
        self.gb_surface_transfer(c.image, Some(c.bounds), TransferType::WriteHostVram)?;
        self.push_subresource_to_hardware(c.image)
    }

    fn cmd3d_update_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdUpdateGbSurface>(payload)?;
        self.for_each_subresource(c.sid, |this, image| {
            this.gb_surface_transfer(image, None, TransferType::WriteHostVram)?;
            this.push_subresource_to_hardware(image)
        })
    }

    fn cmd3d_readback_gb_image(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdReadbackGbImage>(payload)?;
        self.pull_subresource_from_hardware(c.image)?;
        self.gb_surface_transfer(c.image, None, TransferType::ReadHostVram)
    }

    fn cmd3d_readback_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdReadbackGbSurface>(payload)?;
        self.for_each_subresource(c.sid, |this, image| {
            this.pull_subresource_from_hardware(image)?;
            this.gb_surface_transfer(image, None, TransferType::ReadHostVram)
        })
    }

    fn cmd3d_readback_gb_image_partial(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdReadbackGbImagePartial>(payload)?;
        // The inverted form would read back everything but the box; treat it
        // as a full readback, which is correct if slower.
        let bounds = (c.invert_box == 0).then_some(c.bounds);
        self.pull_subresource_from_hardware(c.image)?;
        self.gb_surface_transfer(c.image, bounds, TransferType::ReadHostVram)
    }

    fn cmd3d_invalidate_gb_image(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdInvalidateGbImage>(payload)?;
        self.invalidate_image(c.image.sid, c.image.face, c.image.mipmap)
    }

    fn cmd3d_invalidate_gb_surface(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdInvalidateGbSurface>(payload)?;
        self.invalidate_image(c.sid, INVALID_ID, INVALID_ID)
    }

    fn cmd3d_invalidate_gb_image_partial(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdInvalidateGbImagePartial>(payload)?;
        self.invalidate_image(c.image.sid, c.image.face, c.image.mipmap)
    }

    /// `face == mip == INVALID_ID` drops the whole surface's hardware
    /// content; otherwise exactly one subresource is marked stale.
    pub(crate) fn invalidate_image(&mut self, sid: u32, face: u32, mip: u32) -> Result<()> {
        let whole = face == INVALID_ID && mip == INVALID_ID;
        {
            let surface = self.surfaces.get_mut(sid)?;
            if whole {
                surface.mark_all_dirty();
            } else {
                surface.mip_level_mut(face, mip)?.dirty = true;
            }
        }
        if whole {
            if let Ok(backend) = self.backends.three_d() {
                backend.surface_invalidate(sid)?;
            }
        }
        Ok(())
    }

    fn for_each_subresource(
        &mut self,
        sid: u32,
        mut f: impl FnMut(&mut Self, SurfaceImageId) -> Result<()>,
    ) -> Result<()> {
        let (mips, slices) = {
            let s = self.surfaces.get(sid)?;
            (s.num_mip_levels, s.array_size)
        };
        for face in 0..slices {
            for mipmap in 0..mips {
                f(self, SurfaceImageId { sid, face, mipmap })?;
            }
        }
        Ok(())
    }

    fn push_subresource_to_hardware(&mut self, image: SurfaceImageId) -> Result<()> {
        if self.surfaces.get(image.sid)?.has_backend_resource() {
            let map = self.backends.map.as_deref_mut().ok_or(SvgaError::NotSupported)?;
            map.update_surface(self.surfaces.get_mut(image.sid)?, image)?;
        }
        Ok(())
    }

    fn pull_subresource_from_hardware(&mut self, image: SurfaceImageId) -> Result<()> {
        if self.surfaces.get(image.sid)?.has_backend_resource() {
            let map = self.backends.map.as_deref_mut().ok_or(SvgaError::NotSupported)?;
            map.readback_surface(self.surfaces.get_mut(image.sid)?, image)?;
        }
        Ok(())
    }

    /*
     * Guest-backed contexts and shaders.
     */

    fn cmd3d_define_gb_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbContext>(payload)?;
        let entry = ContextEntry {
            cid: c.cid,
            mobid: INVALID_ID,
        };
        let _ = self.otables.write(&mut self.mem, OTableType::Context, c.cid, &entry);
        if self.contexts.exists(c.cid) {
            self.vgpu9_context_destroy(c.cid)?;
        }
        self.contexts.define(c.cid)?;
        self.backends.vgpu9()?.context_define(c.cid)
    }

    fn cmd3d_destroy_gb_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyGbContext>(payload)?;
        self.otables.clear_entry(&mut self.mem, OTableType::Context, c.cid);
        self.vgpu9_context_destroy(c.cid)
    }

    fn cmd3d_bind_gb_context(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBindGbContext>(payload)?;
        guest_assert!(c.mobid == INVALID_ID || self.mobs.get(c.mobid).is_some());
        self.contexts.get_mut(c.cid)?.mobid = c.mobid;
        Ok(())
    }

    fn cmd3d_define_gb_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbShader>(payload)?;
        guest_assert!(c.shader_type == cmd::SHADER_TYPE_VS || c.shader_type == cmd::SHADER_TYPE_PS);
        let entry = ShaderEntry {
            shader_type: c.shader_type,
            size_in_bytes: c.size_in_bytes,
            offset_in_bytes: 0,
            mobid: INVALID_ID,
        };
        self.otables.write(&mut self.mem, OTableType::Shader, c.shid, &entry)
    }

    fn cmd3d_destroy_gb_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyGbShader>(payload)?;
        self.otables
            .verify_index(OTableType::Shader, c.shid, OTableType::Shader.entry_size())?;
        self.otables.clear_entry(&mut self.mem, OTableType::Shader, c.shid);
        Ok(())
    }

    fn cmd3d_bind_gb_shader(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBindGbShader>(payload)?;
        let mut entry =
            self.otables.read::<_, ShaderEntry>(&self.mem, OTableType::Shader, c.shid)?;
        guest_assert!(c.mobid == INVALID_ID || self.mobs.get(c.mobid).is_some());
        entry.mobid = c.mobid;
        entry.offset_in_bytes = c.offset_in_bytes;
        self.otables.write(&mut self.mem, OTableType::Shader, c.shid, &entry)
    }

    /*
     * Guest-backed queries: results land in a MOB instead of a GMR.
     */

    fn cmd3d_begin_gb_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBeginGbQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        {
            let ctx = self.contexts.get_mut(c.cid)?;
            ctx.occlusion.state = Vgpu9QueryState::Building;
            ctx.occlusion.result = 0;
        }
        self.backends.vgpu9()?.occlusion_query_begin(c.cid)
    }

    fn cmd3d_end_gb_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdEndGbQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        guest_assert!(self.contexts.exists(c.cid));

        let (state, result32) = match self.backends.vgpu9()?.occlusion_query_end(c.cid) {
            Ok(samples) => (QUERY_STATE_SUCCEEDED, samples),
            Err(_) => (QUERY_STATE_FAILED, 0),
        };
        {
            let ctx = self.contexts.get_mut(c.cid)?;
            ctx.occlusion.state = Vgpu9QueryState::Issued;
            ctx.occlusion.result = result32;
        }
        let result = QueryResult {
            total_size: core::mem::size_of::<QueryResult>() as u32,
            state,
            result32,
        };
        self.mob_write_bytes(c.mobid, c.offset, bytemuck::bytes_of(&result))
    }

    fn cmd3d_wait_for_gb_query(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdWaitForGbQuery>(payload)?;
        guest_assert!(c.query_type == QUERY_TYPE_OCCLUSION, SvgaError::NotImplemented);
        let (state, result32) = {
            let ctx = self.contexts.get(c.cid)?;
            match ctx.occlusion.state {
                Vgpu9QueryState::Issued => (QUERY_STATE_SUCCEEDED, ctx.occlusion.result),
                Vgpu9QueryState::Building => (QUERY_STATE_PENDING, 0),
                Vgpu9QueryState::None => (QUERY_STATE_FAILED, 0),
            }
        };
        let result = QueryResult {
            total_size: core::mem::size_of::<QueryResult>() as u32,
            state,
            result32,
        };
        self.mob_write_bytes(c.mobid, c.offset, bytemuck::bytes_of(&result))
    }

    /*
     * Guest-backed screen targets.
     */

    fn cmd3d_define_gb_screentarget(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDefineGbScreenTarget>(payload)?;
        let entry = ScreenTargetEntry {
            image: SurfaceImageId {
                sid: INVALID_ID,
                face: 0,
                mipmap: 0,
            },
            width: c.width,
            height: c.height,
            x_root: c.x_root,
            y_root: c.y_root,
            flags: c.flags,
            dpi: c.dpi,
            pad0: 0,
        };
        let _ = self
            .otables
            .write(&mut self.mem, OTableType::ScreenTarget, c.stid, &entry);
        self.screens.define(Screen {
            id: c.stid,
            flags: c.flags,
            width: c.width,
            height: c.height,
            x_root: c.x_root,
            y_root: c.y_root,
            dpi: c.dpi,
            backing: ScreenBacking::None,
            is_screen_target: true,
        })?;
        if let Ok(backend) = self.backends.gbo() {
            backend.screen_target_defined(c.stid, c.width, c.height)?;
        }
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.change_mode();
        }
        Ok(())
    }

    fn cmd3d_destroy_gb_screentarget(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdDestroyGbScreenTarget>(payload)?;
        self.otables
            .clear_entry(&mut self.mem, OTableType::ScreenTarget, c.stid);
        guest_assert!(self.screens.destroy(c.stid).is_some());
        if let Ok(backend) = self.backends.gbo() {
            backend.screen_target_destroyed(c.stid);
        }
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.change_mode();
        }
        Ok(())
    }

    fn cmd3d_bind_gb_screentarget(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdBindGbScreenTarget>(payload)?;
        guest_assert!(c.image.sid == INVALID_ID || self.surfaces.exists(c.image.sid));
        {
            let screen = self.screens.get_mut(c.stid)?;
            guest_assert!(screen.is_screen_target);
            screen.backing = if c.image.sid == INVALID_ID {
                ScreenBacking::None
            } else {
                ScreenBacking::Surface { image: c.image }
            };
        }
        if let Ok(mut entry) =
            self.otables
                .read::<_, ScreenTargetEntry>(&self.mem, OTableType::ScreenTarget, c.stid)
        {
            entry.image = c.image;
            let _ = self
                .otables
                .write(&mut self.mem, OTableType::ScreenTarget, c.stid, &entry);
        }
        Ok(())
    }

    fn cmd3d_update_gb_screentarget(&mut self, payload: &[u8]) -> Result<()> {
        let (c, _) = Self::parse::<cmd::CmdUpdateGbScreenTarget>(payload)?;
        let (w, h) = {
            let screen = self.screens.get(c.stid)?;
            guest_assert!(screen.is_screen_target);
            (screen.width, screen.height)
        };
        let mut rect = c.rect;
        rect.w = rect.w.min(w.saturating_sub(rect.x));
        rect.h = rect.h.min(h.saturating_sub(rect.y));
        if rect.w == 0 || rect.h == 0 {
            return Ok(());
        }
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.screen_update(c.stid, rect.x, rect.y, rect.w, rect.h);
        }
        Ok(())
    }
}
