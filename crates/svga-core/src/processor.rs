//! The command processor facade.
//!
//! One `SvgaCommandProcessor` per virtual GPU, driven to completion one
//! command at a time by the device's FIFO worker. Legacy 2D commands enter
//! through [`SvgaCommandProcessor::process_fifo_cmd`]; everything 3D goes
//! through [`SvgaCommandProcessor::process_3d_cmd`] (in `cmd3d.rs`).

use std::collections::HashSet;

use svga_mem::GuestMemory;
use svga_proto::fifo::{self, ScreenObject};
use svga_proto::read_pod;
use svga_proto::types::{GuestPtr, SignedRect, GMR_FRAMEBUFFER};
use tracing::{debug, trace, warn};

use crate::backend::Backends;
use crate::context::ContextCatalog;
use crate::cursor;
use crate::dx::DxContextCatalog;
use crate::error::{guest_assert, Result, SvgaError};
use crate::gmr::GmrRegistry;
use crate::mob::MobRegistry;
use crate::otable::ObjectTables;
use crate::screen::{Screen, ScreenBacking, ScreenRegistry};
use crate::surface::SurfaceCatalog;

/// Per-family counters; the guest can only observe errors through these and
/// through command side effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub fifo: u64,
    pub vgpu9: u64,
    pub gb: u64,
    pub dx: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub errors: u64,
}

/// The GMRFB: the guest-memory framebuffer staging image used by the
/// screen blit commands.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GmrFb {
    pub ptr: GuestPtr,
    pub bytes_per_line: u32,
    pub bits_per_pixel: u32,
}

impl Default for GmrFb {
    fn default() -> Self {
        Self {
            ptr: GuestPtr {
                gmr_id: GMR_FRAMEBUFFER,
                offset: 0,
            },
            bytes_per_line: 0,
            bits_per_pixel: 32,
        }
    }
}

pub struct SvgaCommandProcessor<M: GuestMemory> {
    pub(crate) mem: M,
    pub(crate) backends: Backends,
    pub(crate) otables: ObjectTables,
    pub(crate) mobs: MobRegistry,
    pub(crate) gmrs: GmrRegistry,
    pub(crate) surfaces: SurfaceCatalog,
    pub(crate) contexts: ContextCatalog,
    pub(crate) dx_contexts: DxContextCatalog,
    pub(crate) screens: ScreenRegistry,
    pub(crate) gmrfb: GmrFb,
    pub(crate) vram: Vec<u8>,
    pub(crate) palette: [u32; 256],
    pub(crate) stats: CommandStats,
    unknown_logged: HashSet<u32>,
}

impl<M: GuestMemory> SvgaCommandProcessor<M> {
    pub fn new(mem: M, vram_size: usize) -> Self {
        Self {
            mem,
            backends: Backends::default(),
            otables: ObjectTables::default(),
            mobs: MobRegistry::new(),
            gmrs: GmrRegistry::default(),
            surfaces: SurfaceCatalog::default(),
            contexts: ContextCatalog::default(),
            dx_contexts: DxContextCatalog::default(),
            screens: ScreenRegistry::default(),
            gmrfb: GmrFb::default(),
            vram: vec![0; vram_size],
            palette: [0; 256],
            stats: CommandStats::default(),
            unknown_logged: HashSet::new(),
        }
    }

    pub fn with_backends(mem: M, vram_size: usize, backends: Backends) -> Self {
        let mut this = Self::new(mem, vram_size);
        this.backends = backends;
        this
    }

    pub fn backends_mut(&mut self) -> &mut Backends {
        &mut self.backends
    }

    pub fn guest_memory(&self) -> &M {
        &self.mem
    }

    pub fn guest_memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn stats(&self) -> &CommandStats {
        &self.stats
    }

    pub fn vram(&self) -> &[u8] {
        &self.vram
    }

    pub fn vram_mut(&mut self) -> &mut [u8] {
        &mut self.vram
    }

    pub fn set_palette_entry(&mut self, index: u8, rgb: u32) {
        self.palette[index as usize] = rgb;
    }

    pub fn surfaces(&self) -> &SurfaceCatalog {
        &self.surfaces
    }

    pub fn contexts(&self) -> &ContextCatalog {
        &self.contexts
    }

    pub fn dx_contexts(&self) -> &DxContextCatalog {
        &self.dx_contexts
    }

    pub fn mobs(&self) -> &MobRegistry {
        &self.mobs
    }

    pub fn mobs_mut(&mut self) -> &mut MobRegistry {
        &mut self.mobs
    }

    pub fn otables(&self) -> &ObjectTables {
        &self.otables
    }

    /// Device reset: destroy every surface, every context (both families),
    /// the MOBs and the OTables, then tell the backend to start over.
    pub fn reset(&mut self) {
        for sid in self.surfaces.live_ids() {
            let _ = self.destroy_surface_internal(sid);
        }
        for cid in self.contexts.live_ids() {
            if let Some(ctx) = self.contexts.destroy(cid) {
                if let Ok(b) = self.backends.vgpu9() {
                    b.context_destroy(ctx.id);
                }
            }
        }
        for cid in self.dx_contexts.live_ids() {
            if self.dx_contexts.destroy(cid).is_some() {
                if let Ok(b) = self.backends.dx() {
                    b.dx_destroy_context(cid);
                }
            }
        }
        self.mobs.clear();
        self.otables.clear();
        self.gmrs.clear();
        self.screens.clear();
        self.gmrfb = GmrFb::default();
        debug!("device state reset");
    }

    /// Destroys a surface: scrubs every context binding, releases the
    /// backend resource, frees shadows.
    pub(crate) fn destroy_surface_internal(&mut self, sid: u32) -> Result<()> {
        let Some(mut surface) = self.surfaces.take(sid) else {
            return Err(SvgaError::InvalidParameter);
        };

        // VGPU9 contexts reference surfaces by sid directly; DX contexts go
        // through view ids whose COTable entries keep their own sid field.
        for ctx in self.contexts.iter_mut() {
            ctx.unbind_surface(sid);
        }

        if let Ok(b) = self.backends.three_d() {
            b.surface_destroy(sid);
        }
        surface.backend_handle = None;
        surface.free_mip_shadows();
        Ok(())
    }

    /// Top-level FIFO entry point: dispatches, counts, and swallows errors
    /// so a hostile guest cannot wedge the stream.
    pub fn submit_fifo_cmd(&mut self, cmd_id: u32, payload: &[u8]) {
        match self.process_fifo_cmd(cmd_id, payload) {
            Ok(()) => {}
            Err(err) => {
                self.stats.errors += 1;
                if err == SvgaError::InvalidParameter {
                    self.stats.malformed += 1;
                }
                debug!(cmd_id, ?err, "fifo command failed");
            }
        }
    }

    pub fn process_fifo_cmd(&mut self, cmd_id: u32, payload: &[u8]) -> Result<()> {
        self.stats.fifo += 1;
        trace!(cmd_id, len = payload.len(), "fifo command");
        match cmd_id {
            fifo::CMD_UPDATE | fifo::CMD_UPDATE_VERBOSE => self.cmd_update(payload),
            fifo::CMD_RECT_COPY => self.cmd_rect_copy(payload),
            fifo::CMD_DEFINE_CURSOR => self.cmd_define_cursor(payload),
            fifo::CMD_DEFINE_ALPHA_CURSOR => self.cmd_define_alpha_cursor(payload),
            fifo::CMD_MOVE_CURSOR => self.cmd_move_cursor(payload),
            fifo::CMD_DISPLAY_CURSOR => self.cmd_display_cursor(payload),
            fifo::CMD_FENCE => {
                // Fences are completed by the FIFO loop itself; reaching the
                // processor just means "nothing to do".
                Ok(())
            }
            fifo::CMD_ESCAPE => self.cmd_escape(payload),
            fifo::CMD_DEFINE_SCREEN => self.cmd_define_screen(payload),
            fifo::CMD_DESTROY_SCREEN => self.cmd_destroy_screen(payload),
            fifo::CMD_DEFINE_GMRFB => self.cmd_define_gmrfb(payload),
            fifo::CMD_BLIT_GMRFB_TO_SCREEN => self.cmd_blit_gmrfb_to_screen(payload),
            fifo::CMD_BLIT_SCREEN_TO_GMRFB => self.cmd_blit_screen_to_gmrfb(payload),
            fifo::CMD_ANNOTATION_FILL | fifo::CMD_ANNOTATION_COPY => {
                // Hints for the blit coalescer; accepted and ignored.
                Ok(())
            }
            fifo::CMD_DEFINE_GMR2 => self.cmd_define_gmr2(payload),
            fifo::CMD_REMAP_GMR2 => self.cmd_remap_gmr2(payload),
            fifo::CMD_RECT_FILL | fifo::CMD_RECT_ROP_COPY | fifo::CMD_FRONT_ROP_FILL => {
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
            _ => {
                self.stats.fifo -= 1;
                self.stats.unknown += 1;
                self.log_unknown(cmd_id);
                Err(SvgaError::NotImplemented)
            }
        }
    }

    pub(crate) fn log_unknown(&mut self, cmd_id: u32) {
        if self.unknown_logged.insert(cmd_id) {
            warn!(cmd_id, "unsupported command");
        }
    }

    pub(crate) fn parse<T: bytemuck::Pod>(payload: &[u8]) -> Result<(T, &[u8])> {
        read_pod::<T>(payload).ok_or_else(|| {
            debug!(
                need = core::mem::size_of::<T>(),
                have = payload.len(),
                "command payload too small"
            );
            SvgaError::InvalidParameter
        })
    }

    /*
     * Legacy 2D handlers.
     */

    fn cmd_update(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdUpdate>(payload)?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.screen_update(0, cmd.x, cmd.y, cmd.width, cmd.height);
        }
        Ok(())
    }

    fn cmd_rect_copy(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdRectCopy>(payload)?;
        let screen = self.screens.get(0)?;
        let (pitch, base, bpp) = match screen.backing {
            ScreenBacking::Guest { ptr, pitch } if ptr.gmr_id == GMR_FRAMEBUFFER => {
                (pitch, ptr.offset, 32u32)
            }
            _ => return Err(SvgaError::NotImplemented),
        };
        let bytes_pp = bpp / 8;
        guest_assert!(cmd.src_x.checked_add(cmd.width).is_some_and(|v| v <= screen.width));
        guest_assert!(cmd.src_y.checked_add(cmd.height).is_some_and(|v| v <= screen.height));
        guest_assert!(cmd.dest_x.checked_add(cmd.width).is_some_and(|v| v <= screen.width));
        guest_assert!(cmd.dest_y.checked_add(cmd.height).is_some_and(|v| v <= screen.height));

        let row_bytes = (cmd.width * bytes_pp) as usize;
        let mut row = vec![0u8; row_bytes];
        for y in 0..cmd.height {
            // Copy through a staging row; source and destination may overlap.
            let src_y = if cmd.dest_y > cmd.src_y { cmd.height - 1 - y } else { y };
            let src_off = u64::from(base)
                + u64::from(cmd.src_y + src_y) * u64::from(pitch)
                + u64::from(cmd.src_x * bytes_pp);
            let dst_off = u64::from(base)
                + u64::from(cmd.dest_y + src_y) * u64::from(pitch)
                + u64::from(cmd.dest_x * bytes_pp);
            guest_assert!(src_off + row_bytes as u64 <= self.vram.len() as u64);
            guest_assert!(dst_off + row_bytes as u64 <= self.vram.len() as u64);
            let (src_off, dst_off) = (src_off as usize, dst_off as usize);
            row.copy_from_slice(&self.vram[src_off..src_off + row_bytes]);
            self.vram[dst_off..dst_off + row_bytes].copy_from_slice(&row);
        }
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.screen_update(screen.id, cmd.dest_x, cmd.dest_y, cmd.width, cmd.height);
        }
        Ok(())
    }

    fn cmd_define_cursor(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, masks) = Self::parse::<fifo::CmdDefineCursor>(payload)?;
        let shape = cursor::convert_cursor(
            cmd.width,
            cmd.height,
            cmd.hotspot_x,
            cmd.hotspot_y,
            cmd.and_mask_depth,
            cmd.xor_mask_depth,
            masks,
            &self.palette,
        )?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.pointer_shape_changed(&shape);
        }
        Ok(())
    }

    fn cmd_define_alpha_cursor(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, pixels) = Self::parse::<fifo::CmdDefineAlphaCursor>(payload)?;
        let shape = cursor::convert_alpha_cursor(
            cmd.width,
            cmd.height,
            cmd.hotspot_x,
            cmd.hotspot_y,
            pixels,
        )?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.pointer_shape_changed(&shape);
        }
        Ok(())
    }

    fn cmd_move_cursor(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdMoveCursor>(payload)?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.pointer_moved(cmd.x, cmd.y);
        }
        Ok(())
    }

    fn cmd_display_cursor(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdDisplayCursor>(payload)?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.pointer_visibility(cmd.state != 0);
        }
        Ok(())
    }

    fn cmd_escape(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, data) = Self::parse::<fifo::CmdEscape>(payload)?;
        guest_assert!(data.len() >= cmd.size as usize);
        if cmd.nsid == fifo::ESCAPE_NSID_VMWARE {
            guest_assert!(cmd.size as usize >= core::mem::size_of::<u32>());
            let sub = u32::from_le_bytes(data[..4].try_into().unwrap());
            // Video-overlay register escapes; accepted, overlays are not
            // emulated.
            trace!(sub, "vmware escape");
        } else {
            trace!(nsid = cmd.nsid, "foreign escape skipped");
        }
        Ok(())
    }

    fn cmd_define_screen(&mut self, payload: &[u8]) -> Result<()> {
        // `struct_size` versions the descriptor: older guests send only the
        // mandatory prefix, newer ones append the backing pointer fields.
        let obj = if payload.len() >= core::mem::size_of::<ScreenObject>() {
            Self::parse::<ScreenObject>(payload)?.0
        } else {
            let (short, _) = Self::parse::<[u32; 7]>(payload)?;
            ScreenObject {
                struct_size: short[0],
                id: short[1],
                flags: short[2],
                width: short[3],
                height: short[4],
                root_x: short[5] as i32,
                root_y: short[6] as i32,
                ..Default::default()
            }
        };
        guest_assert!(obj.struct_size >= fifo::SCREEN_OBJECT_BASE_SIZE);
        guest_assert!(obj.width <= 8192 && obj.height <= 8192);

        let has_backing = obj.struct_size > fifo::SCREEN_OBJECT_BASE_SIZE
            && payload.len() >= core::mem::size_of::<ScreenObject>();
        let backing = if has_backing {
            ScreenBacking::Guest {
                ptr: obj.backing_ptr,
                pitch: obj.backing_pitch,
            }
        } else {
            ScreenBacking::None
        };
        self.screens.define(Screen {
            id: obj.id,
            flags: obj.flags,
            width: obj.width,
            height: obj.height,
            x_root: obj.root_x,
            y_root: obj.root_y,
            dpi: 0,
            backing,
            is_screen_target: false,
        })?;
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.change_mode();
        }
        Ok(())
    }

    fn cmd_destroy_screen(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdDestroyScreen>(payload)?;
        guest_assert!(self.screens.destroy(cmd.screen_id).is_some());
        if let Some(display) = self.backends.display.as_deref_mut() {
            display.change_mode();
        }
        Ok(())
    }

    fn cmd_define_gmrfb(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdDefineGmrFb>(payload)?;
        let bpp = cmd.format & 0xff;
        guest_assert!(bpp == 32 || bpp == 16 || bpp == 8);
        self.gmrfb = GmrFb {
            ptr: cmd.ptr,
            bytes_per_line: cmd.bytes_per_line,
            bits_per_pixel: bpp,
        };
        Ok(())
    }

    fn screen_vram_layout(&self, screen_id: u32) -> Result<(u32, u32, u32, u32, u32)> {
        let screen = self.screens.get(screen_id)?;
        match screen.backing {
            ScreenBacking::Guest { ptr, pitch } if ptr.gmr_id == GMR_FRAMEBUFFER => {
                Ok((ptr.offset, pitch, screen.width, screen.height, 32))
            }
            _ => Err(SvgaError::NotImplemented),
        }
    }

    /// Clips `rect` to `w x h`; returns `None` when nothing is left.
    fn clip_rect(rect: SignedRect, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
        let left = rect.left.clamp(0, w as i32);
        let top = rect.top.clamp(0, h as i32);
        let right = rect.right.clamp(left, w as i32);
        let bottom = rect.bottom.clamp(top, h as i32);
        if right > left && bottom > top {
            Some((left as u32, top as u32, (right - left) as u32, (bottom - top) as u32))
        } else {
            None
        }
    }

    fn cmd_blit_gmrfb_to_screen(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdBlitGmrFbToScreen>(payload)?;
        self.blit_gmrfb(cmd.dest_screen_id, cmd.src_origin.x, cmd.src_origin.y, cmd.dest_rect, true)
    }

    fn cmd_blit_screen_to_gmrfb(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdBlitScreenToGmrFb>(payload)?;
        self.blit_gmrfb(cmd.src_screen_id, cmd.dest_origin.x, cmd.dest_origin.y, cmd.src_rect, false)
    }

    /// Row-by-row blit between the GMRFB and a screen. `to_screen` selects
    /// the direction; `rect` is in screen coordinates, the GMRFB origin
    /// pairs with its top-left corner.
    fn blit_gmrfb(
        &mut self,
        screen_id: u32,
        origin_x: i32,
        origin_y: i32,
        rect: SignedRect,
        to_screen: bool,
    ) -> Result<()> {
        let (base, pitch, sw, sh, bpp) = self.screen_vram_layout(screen_id)?;
        let Some((x, y, w, h)) = Self::clip_rect(rect, sw, sh) else {
            return Ok(());
        };
        let bytes_pp = bpp / 8;
        let gmrfb = self.gmrfb;
        guest_assert!(gmrfb.bits_per_pixel == bpp);

        // Keep the GMRFB origin in step with however much clipping moved
        // the screen rect.
        let gx = origin_x + (x as i32 - rect.left);
        let gy = origin_y + (y as i32 - rect.top);
        guest_assert!(gx >= 0 && gy >= 0);

        let row_bytes = (w * bytes_pp) as usize;
        let mut row = vec![0u8; row_bytes];
        for i in 0..h {
            let vram_off = u64::from(base)
                + u64::from(y + i) * u64::from(pitch)
                + u64::from(x) * u64::from(bytes_pp);
            guest_assert!(vram_off + row_bytes as u64 <= self.vram.len() as u64);
            let vram_off = vram_off as usize;
            let gmrfb_off = u64::from(gy as u32 + i) * u64::from(gmrfb.bytes_per_line)
                + u64::from(gx as u32) * u64::from(bytes_pp);
            let gmrfb_off = u32::try_from(gmrfb_off).map_err(|_| SvgaError::InvalidParameter)?;

            if to_screen {
                self.read_gmrfb_row(gmrfb.ptr, gmrfb_off, &mut row)?;
                self.vram[vram_off..vram_off + row_bytes].copy_from_slice(&row);
            } else {
                row.copy_from_slice(&self.vram[vram_off..vram_off + row_bytes]);
                self.write_gmrfb_row(gmrfb.ptr, gmrfb_off, &row)?;
            }
        }

        if to_screen {
            if let Some(display) = self.backends.display.as_deref_mut() {
                display.screen_update(screen_id, x, y, w, h);
            }
        }
        Ok(())
    }

    fn read_gmrfb_row(&mut self, ptr: GuestPtr, offset: u32, row: &mut [u8]) -> Result<()> {
        let at = ptr
            .offset
            .checked_add(offset)
            .ok_or(SvgaError::InvalidParameter)? as usize;
        if ptr.gmr_id == GMR_FRAMEBUFFER {
            guest_assert!(at + row.len() <= self.vram.len());
            row.copy_from_slice(&self.vram[at..at + row.len()]);
            Ok(())
        } else {
            self.gmrs.get(ptr.gmr_id)?.read(&self.mem, at as u32, row)
        }
    }

    fn write_gmrfb_row(&mut self, ptr: GuestPtr, offset: u32, row: &[u8]) -> Result<()> {
        let at = ptr
            .offset
            .checked_add(offset)
            .ok_or(SvgaError::InvalidParameter)? as usize;
        if ptr.gmr_id == GMR_FRAMEBUFFER {
            guest_assert!(at + row.len() <= self.vram.len());
            self.vram[at..at + row.len()].copy_from_slice(row);
            Ok(())
        } else {
            self.gmrs.get(ptr.gmr_id)?.write(&mut self.mem, at as u32, row)
        }
    }

    fn cmd_define_gmr2(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, _) = Self::parse::<fifo::CmdDefineGmr2>(payload)?;
        self.gmrs.define(cmd.gmr_id, cmd.num_pages)
    }

    fn cmd_remap_gmr2(&mut self, payload: &[u8]) -> Result<()> {
        let (cmd, rest) = Self::parse::<fifo::CmdRemapGmr2>(payload)?;
        guest_assert!((cmd.flags & fifo::REMAP_GMR2_VIA_GMR) == 0, SvgaError::NotImplemented);

        let ppn64 = (cmd.flags & fifo::REMAP_GMR2_PPN64) != 0;
        let single = (cmd.flags & fifo::REMAP_GMR2_SINGLE_PPN) != 0;
        let needed = if single { 1 } else { cmd.num_pages as usize };

        let ppns: Vec<u64> = if ppn64 {
            guest_assert!(rest.len() >= needed * 8);
            rest.chunks_exact(8)
                .take(needed)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect()
        } else {
            guest_assert!(rest.len() >= needed * 4);
            rest.chunks_exact(4)
                .take(needed)
                .map(|c| u64::from(u32::from_le_bytes(c.try_into().unwrap())))
                .collect()
        };

        self.gmrs
            .remap(cmd.gmr_id, cmd.offset_pages, cmd.num_pages, &ppns, single)
    }
}
