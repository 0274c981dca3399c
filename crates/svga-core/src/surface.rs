//! Surface catalog: typed image/buffer resources with mip/array structure.
//!
//! A freshly defined surface is software-only; host shadows of its
//! subresources carry the pixels until first use forces a backend resource
//! into existence. From then on per-subresource dirty flags track which copy
//! is canonical.

use svga_mem::GuestMemory;
use svga_proto::format::{FormatBlock, SurfaceFlags, SurfaceFormat};
use svga_proto::types::{
    calc_subresource, Box3d, CopyBox, Size3d, SurfaceImageId, TransferType, INVALID_ID,
    MAX_MIP_LEVELS, MAX_SURFACE_IDS, SURFACE_MAX_BYTES,
};
use tracing::{debug, trace};

use crate::error::{guest_assert, Result, SvgaError};
use crate::mob::Mob;

/// Opaque per-surface handle owned by the rendering backend. The core never
/// looks inside; it only stores and returns it.
pub type BackendHandle = Box<dyn std::any::Any>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapType {
    Read,
    Write,
    ReadWrite,
    WriteDiscard,
}

impl MapType {
    pub fn is_write(self) -> bool {
        !matches!(self, MapType::Read)
    }
}

#[derive(Default)]
pub struct MipmapLevel {
    pub size: Size3d,
    pub blocks_x: u32,
    pub blocks_y: u32,
    pub num_blocks: u32,
    pub row_pitch: u32,
    pub plane_pitch: u32,
    pub total_bytes: u32,
    pub dirty: bool,
    pub shadow: Option<Vec<u8>>,
}

pub struct Surface {
    pub id: u32,
    pub flags: SurfaceFlags,
    pub format: SurfaceFormat,
    pub block: FormatBlock,
    pub num_mip_levels: u32,
    pub array_size: u32,
    pub multisample_count: u32,
    pub autogen_filter: u32,
    pub base_size: Size3d,
    pub bytes_per_array_element: u32,
    /// `num_mip_levels * array_size` entries, mips of slice 0 first.
    pub mip_levels: Vec<MipmapLevel>,
    /// MOB backing for guest-backed surfaces; `INVALID_ID` if unbound.
    pub mobid: u32,
    pub mob_pitch: u32,
    pub associated_context_id: u32,
    pub backend_handle: Option<BackendHandle>,
    pub dirty: bool,
}

/// The arguments of a surface definition, after widening the v1/v2/GB
/// variants into one shape.
#[derive(Clone, Debug)]
pub struct SurfaceDefinition {
    pub flags: SurfaceFlags,
    pub format: SurfaceFormat,
    pub num_mip_levels: u32,
    pub multisample_count: u32,
    pub autogen_filter: u32,
    pub base_size: Size3d,
    pub array_size: u32,
}

/// Geometry of one mapped subresource box. Offsets index into the
/// subresource shadow; the mapping holds no borrow so the caller can stage
/// transfers against guest memory while mapped.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceMapping {
    pub map_type: MapType,
    pub image: SurfaceImageId,
    pub bounds: Box3d,
    pub block_bytes: u32,
    /// Bytes covered by the box in one block row.
    pub row_bytes: u32,
    /// Distance between block rows of the subresource.
    pub row_pitch: u32,
    /// Block rows covered by the box.
    pub rows: u32,
    pub depth_pitch: u32,
    /// Byte offset of the box origin within the subresource.
    pub offset: u32,
}

impl Surface {
    pub fn subresource_index(&self, face: u32, mipmap: u32) -> Result<usize> {
        guest_assert!(mipmap < self.num_mip_levels);
        guest_assert!(face < self.array_size);
        Ok(calc_subresource(mipmap, face, self.num_mip_levels) as usize)
    }

    pub fn mip_level(&self, face: u32, mipmap: u32) -> Result<&MipmapLevel> {
        let idx = self.subresource_index(face, mipmap)?;
        Ok(&self.mip_levels[idx])
    }

    pub fn mip_level_mut(&mut self, face: u32, mipmap: u32) -> Result<&mut MipmapLevel> {
        let idx = self.subresource_index(face, mipmap)?;
        Ok(&mut self.mip_levels[idx])
    }

    pub fn has_backend_resource(&self) -> bool {
        self.backend_handle.is_some()
    }

    /// Allocates host shadows for every subresource that lacks one.
    pub fn alloc_mip_shadows(&mut self) {
        for level in &mut self.mip_levels {
            if level.shadow.is_none() {
                level.shadow = Some(vec![0u8; level.total_bytes as usize]);
            }
        }
    }

    pub fn free_mip_shadows(&mut self) {
        for level in &mut self.mip_levels {
            level.shadow = None;
        }
    }

    /// Marks every subresource (and the surface) dirty.
    pub fn mark_all_dirty(&mut self) {
        for level in &mut self.mip_levels {
            level.dirty = true;
        }
        self.dirty = true;
    }

    /// Maps a box of one subresource for CPU access through the shadow,
    /// allocating the shadow on first touch.
    pub fn map(
        &mut self,
        image: SurfaceImageId,
        bounds: Option<Box3d>,
        map_type: MapType,
    ) -> Result<SurfaceMapping> {
        let block = self.block;
        let level = self.mip_level_mut(image.face, image.mipmap)?;

        let mut bounds = bounds.unwrap_or(Box3d {
            x: 0,
            y: 0,
            z: 0,
            w: level.size.width,
            h: level.size.height,
            d: level.size.depth,
        });
        bounds.clip(&level.size);
        guest_assert!(!bounds.is_empty());

        if level.shadow.is_none() {
            level.shadow = Some(vec![0u8; level.total_bytes as usize]);
        }

        let block_x = bounds.x / block.width;
        let block_y = bounds.y / block.height;
        let rows = bounds.h.div_ceil(block.height);
        let row_bytes = bounds.w.div_ceil(block.width) * block.bytes;
        let offset = block_x * block.bytes + block_y * level.row_pitch + bounds.z * level.plane_pitch;

        Ok(SurfaceMapping {
            map_type,
            image,
            bounds,
            block_bytes: block.bytes,
            row_bytes,
            row_pitch: level.row_pitch,
            rows,
            depth_pitch: level.plane_pitch,
            offset,
        })
    }

    /// Commits a mapping. Writes take effect (the subresource goes dirty)
    /// only when the mapping was writable and the caller actually wrote.
    pub fn unmap(&mut self, mapping: &SurfaceMapping, written: bool) -> Result<()> {
        let level = self.mip_level_mut(mapping.image.face, mapping.image.mipmap)?;
        if mapping.map_type.is_write() && written {
            level.dirty = true;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn shadow_bytes(&self, face: u32, mipmap: u32) -> Result<&[u8]> {
        self.mip_level(face, mipmap)?
            .shadow
            .as_deref()
            .ok_or(SvgaError::InvalidState)
    }

    pub fn shadow_bytes_mut(&mut self, face: u32, mipmap: u32) -> Result<&mut [u8]> {
        self.mip_level_mut(face, mipmap)?
            .shadow
            .as_deref_mut()
            .ok_or(SvgaError::InvalidState)
    }
}

#[derive(Default)]
pub struct SurfaceCatalog {
    surfaces: Vec<Option<Surface>>,
}

impl SurfaceCatalog {
    pub fn slot_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Builds the surface and installs it at `sid`. The slot must have been
    /// vacated first; definition over a live slot is the caller's bug.
    pub fn define(
        &mut self,
        sid: u32,
        def: &SurfaceDefinition,
        alloc_mip_shadows: bool,
    ) -> Result<()> {
        guest_assert!(sid < MAX_SURFACE_IDS);
        guest_assert!(def.num_mip_levels >= 1 && def.num_mip_levels <= MAX_MIP_LEVELS);

        let array_size = if def.array_size != 0 {
            def.array_size
        } else if def.flags.contains(SurfaceFlags::CUBEMAP) {
            6
        } else {
            1
        };

        let block = def.format.block();
        guest_assert!(block.bytes != 0);

        let total_levels = def
            .num_mip_levels
            .checked_mul(array_size)
            .ok_or(SvgaError::InvalidParameter)?;
        let mut mip_levels: Vec<MipmapLevel> = Vec::new();
        mip_levels.resize_with(total_levels as usize, MipmapLevel::default);

        // Running byte budget over all subresources; each step divides first
        // so the multiplications below cannot overflow.
        let mut remaining = SURFACE_MAX_BYTES;
        for mip in 0..def.num_mip_levels {
            let size = def.base_size.mip_level(mip);
            for slice in 0..array_size {
                let blocks_x = size.width.div_ceil(block.width);
                let blocks_y = size.height.div_ceil(block.height);
                guest_assert!(blocks_x > 0 && blocks_y > 0 && size.depth > 0);

                guest_assert!(blocks_x < remaining / block.bytes);
                let row_pitch = block.bytes * blocks_x;
                guest_assert!(blocks_y < remaining / row_pitch);
                let plane_pitch = row_pitch * blocks_y;
                guest_assert!(size.depth < remaining / plane_pitch);
                let total_bytes = plane_pitch * size.depth;
                remaining -= total_bytes;

                let idx = calc_subresource(mip, slice, def.num_mip_levels) as usize;
                mip_levels[idx] = MipmapLevel {
                    size,
                    blocks_x,
                    blocks_y,
                    num_blocks: blocks_x * blocks_y * size.depth,
                    row_pitch,
                    plane_pitch,
                    total_bytes,
                    dirty: false,
                    shadow: None,
                };
                trace!(sid, mip, slice, total_bytes, "mip level laid out");
            }
        }

        let bytes_per_array_element = (0..def.num_mip_levels)
            .map(|mip| mip_levels[mip as usize].total_bytes)
            .sum();

        let mut surface = Surface {
            id: sid,
            flags: def.flags,
            format: def.format,
            block,
            num_mip_levels: def.num_mip_levels,
            array_size,
            multisample_count: def.multisample_count,
            autogen_filter: def.autogen_filter,
            base_size: def.base_size,
            bytes_per_array_element,
            mip_levels,
            mobid: INVALID_ID,
            mob_pitch: 0,
            associated_context_id: INVALID_ID,
            backend_handle: None,
            dirty: false,
        };
        if alloc_mip_shadows {
            surface.alloc_mip_shadows();
        }

        let slot = sid as usize;
        if slot >= self.surfaces.len() {
            let new_len = (slot + 15 + 15) & !15;
            self.surfaces.resize_with(new_len, || None);
        }
        debug_assert!(self.surfaces[slot].is_none());
        self.surfaces[slot] = Some(surface);
        Ok(())
    }

    pub fn get(&self, sid: u32) -> Result<&Surface> {
        self.surfaces
            .get(sid as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| {
                debug!(sid, "unknown surface id");
                SvgaError::InvalidParameter
            })
    }

    pub fn get_mut(&mut self, sid: u32) -> Result<&mut Surface> {
        self.surfaces
            .get_mut(sid as usize)
            .and_then(|s| s.as_mut())
            .ok_or(SvgaError::InvalidParameter)
    }

    pub fn exists(&self, sid: u32) -> bool {
        self.surfaces
            .get(sid as usize)
            .is_some_and(|s| s.is_some())
    }

    /// Vacates the slot, handing the surface back so the caller can release
    /// backend resources and scrub context bindings.
    pub fn take(&mut self, sid: u32) -> Option<Surface> {
        self.surfaces.get_mut(sid as usize).and_then(|s| s.take())
    }

    /// Every live surface id, for reset and destroy scans.
    pub fn live_ids(&self) -> Vec<u32> {
        self.surfaces
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u32))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Surface> {
        self.surfaces.iter_mut().filter_map(|s| s.as_mut())
    }
}

/// Clips a copy box against both the destination and source extents,
/// shrinking the transfer so neither side is exceeded.
pub fn clip_copy_box(bounds: &mut CopyBox, dst: &Size3d, src: &Size3d) {
    let mut dst_box = Box3d {
        x: bounds.x,
        y: bounds.y,
        z: bounds.z,
        w: bounds.w,
        h: bounds.h,
        d: bounds.d,
    };
    dst_box.clip(dst);
    let mut src_box = Box3d {
        x: bounds.srcx,
        y: bounds.srcy,
        z: bounds.srcz,
        w: dst_box.w,
        h: dst_box.h,
        d: dst_box.d,
    };
    src_box.clip(src);
    bounds.w = src_box.w;
    bounds.h = src_box.h;
    bounds.d = src_box.d;
}

/// Moves one subresource box between a MOB (laid out at the surface's pitch)
/// and the subresource shadow, row by row.
pub fn transfer_surface_level<M: GuestMemory>(
    mem: &mut M,
    mob: &Mob,
    surface: &mut Surface,
    image: SurfaceImageId,
    bounds: Option<Box3d>,
    transfer: TransferType,
) -> Result<()> {
    // The MOB image of the surface is every subresource back to back.
    let idx = surface.subresource_index(image.face, image.mipmap)?;
    let mut sub_offset = 0u64;
    for level in &surface.mip_levels[..idx] {
        sub_offset += u64::from(level.total_bytes);
    }

    let mapping = surface.map(
        image,
        bounds,
        match transfer {
            TransferType::WriteHostVram => MapType::Write,
            TransferType::ReadHostVram => MapType::Read,
        },
    )?;
    let row_pitch = mapping.row_pitch;
    let plane_pitch = mapping.depth_pitch;
    let shadow = surface.shadow_bytes_mut(image.face, image.mipmap)?;

    // Identical layout on both sides; only the base offsets differ.
    for z in 0..mapping.bounds.d {
        for row in 0..mapping.rows {
            let off = mapping.offset + row * row_pitch + z * plane_pitch;
            let mob_off = sub_offset + u64::from(off);
            let mob_off = u32::try_from(mob_off).map_err(|_| SvgaError::InvalidParameter)?;
            let host = shadow
                .get_mut(off as usize..off as usize + mapping.row_bytes as usize)
                .ok_or(SvgaError::InternalError)?;
            match transfer {
                TransferType::WriteHostVram => mob.read(mem, mob_off, host)?,
                TransferType::ReadHostVram => mob.write(mem, mob_off, host)?,
            }
        }
    }

    let written = matches!(transfer, TransferType::WriteHostVram);
    surface.unmap(&mapping, written)?;
    Ok(())
}

/// `SURFACE_DMA`: every copy box names the guest image as "source" and the
/// host subresource as "destination" regardless of direction. Boxes are
/// clipped against the subresource; guest offsets are recomputed from the
/// clipped origin and checked again in the transfer path.
#[allow(clippy::too_many_arguments)]
pub fn surface_dma<M: GuestMemory>(
    mem: &mut M,
    gmrs: &crate::gmr::GmrRegistry,
    vram: &mut [u8],
    surface: &mut Surface,
    guest: svga_proto::types::GuestImage,
    host: SurfaceImageId,
    transfer: TransferType,
    boxes: &[CopyBox],
) -> Result<()> {
    let block = surface.block;
    let level = surface.mip_level(host.face, host.mipmap)?;
    let level_size = level.size;
    let level_row_pitch = level.row_pitch;
    let level_plane_pitch = level.plane_pitch;
    let level_height = level_size.height;

    let guest_pitch = if guest.pitch == 0 {
        // Tightly packed, same as our layout.
        level_row_pitch
    } else {
        guest_assert!(guest.pitch <= SURFACE_MAX_BYTES);
        guest.pitch
    };

    // Make sure a shadow exists before mapping rows in and out of it.
    if surface
        .mip_level(host.face, host.mipmap)?
        .shadow
        .is_none()
    {
        surface.alloc_mip_shadows();
    }

    for b in boxes {
        let mut host_box = Box3d {
            x: b.x,
            y: b.y,
            z: b.z,
            w: b.w,
            h: b.h,
            d: b.d,
        };
        host_box.clip(&level_size);
        if host_box.is_empty() {
            trace!("skipping empty dma box");
            continue;
        }

        // Shift the guest origin by however much clipping moved the host
        // origin.
        let srcx = b.srcx + (host_box.x - b.x);
        let srcy = b.srcy + (host_box.y - b.y);
        let srcz = b.srcz + (host_box.z - b.z);

        let host_block_x = host_box.x / block.width;
        let host_block_y = host_box.y / block.height;
        let guest_block_x = srcx / block.width;
        let guest_block_y = srcy / block.height;
        let blocks_x = host_box.w.div_ceil(block.width);
        let blocks_y = host_box.h.div_ceil(block.height);

        // Guest offsets are recomputed per slice; only overflow needs
        // checking here, the transfer path re-validates the final offsets.
        let guest_offset64 = u64::from(guest_block_x) * u64::from(block.bytes)
            + u64::from(guest_block_y) * u64::from(guest_pitch)
            + u64::from(srcz) * u64::from(level_height) * u64::from(guest_pitch);
        guest_assert!(guest_offset64 < u64::from(u32::MAX));
        let mut guest_offset = guest_offset64 as u32;
        let mut host_offset =
            host_block_x * block.bytes + host_block_y * level_row_pitch + host_box.z * level_plane_pitch;

        let shadow = surface.shadow_bytes_mut(host.face, host.mipmap)?;
        for _z in 0..host_box.d {
            crate::gmr::gmr_transfer(
                mem,
                gmrs,
                vram,
                transfer,
                shadow,
                host_offset,
                level_row_pitch as i32,
                guest.ptr,
                guest_offset,
                guest_pitch,
                blocks_x * block.bytes,
                blocks_y,
            )?;
            host_offset = host_offset
                .checked_add(level_plane_pitch)
                .ok_or(SvgaError::InvalidParameter)?;
            guest_offset = guest_offset
                .checked_add(level_height * guest_pitch)
                .ok_or(SvgaError::InvalidParameter)?;
        }
    }

    if matches!(transfer, TransferType::WriteHostVram) {
        let level = surface.mip_level_mut(host.face, host.mipmap)?;
        level.dirty = true;
        surface.dirty = true;
    }
    Ok(())
}

