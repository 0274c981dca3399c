//! DX (VGPU10) contexts: pipeline state plus the per-context object tables.
//!
//! COTable storage lives in guest MOBs. Binding a COTable materializes the
//! MOB's host backing store so entry accesses are plain memory reads; the
//! guest gets the bytes back on `DX_READBACK_COTABLE`.

use bytemuck::Pod;
use svga_proto::cotable::{CoTableType, COTABLE_COUNT};
use svga_proto::otable::DxContextMobFormat;
use svga_proto::types::{INVALID_ID, MAX_DX_CONTEXT_IDS};
use tracing::debug;

use crate::error::{guest_assert, Result, SvgaError};
use crate::mob::MobRegistry;

pub struct DxContext {
    pub cid: u32,
    /// The guest-visible pipeline state, swapped in/out on bind/readback.
    pub state: DxContextMobFormat,
    /// MOB backing each COTable; `INVALID_ID` when unbound.
    pub cotable_mobids: [u32; COTABLE_COUNT],
}

impl DxContext {
    fn new(cid: u32) -> Self {
        // Sentinel ids start out "unbound" everywhere; zero would alias
        // object id 0.
        let mut state = DxContextMobFormat::default();
        fill_with_invalid(&mut state);
        state.topology = 0;
        state.num_viewports = 0;
        state.num_scissor_rects = 0;
        state.uav_splice_index = 0;
        Self {
            cid,
            state,
            cotable_mobids: [INVALID_ID; COTABLE_COUNT],
        }
    }

    pub fn cotable_mobid(&self, ty: CoTableType) -> u32 {
        self.cotable_mobids[ty.index()]
    }
}

fn fill_with_invalid(state: &mut DxContextMobFormat) {
    let bytes = bytemuck::bytes_of_mut(state);
    bytes.fill(0xff);
}

#[derive(Default)]
pub struct DxContextCatalog {
    contexts: Vec<Option<DxContext>>,
}

impl DxContextCatalog {
    pub fn define(&mut self, cid: u32) -> Result<()> {
        guest_assert!(cid < MAX_DX_CONTEXT_IDS);
        let slot = cid as usize;
        if slot >= self.contexts.len() {
            let new_len = (slot + 15 + 15) & !15;
            self.contexts.resize_with(new_len, || None);
        }
        debug!(cid, "dx context defined");
        self.contexts[slot] = Some(DxContext::new(cid));
        Ok(())
    }

    pub fn destroy(&mut self, cid: u32) -> Option<DxContext> {
        self.contexts.get_mut(cid as usize).and_then(|c| c.take())
    }

    pub fn get(&self, cid: u32) -> Result<&DxContext> {
        self.contexts
            .get(cid as usize)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| {
                debug!(cid, "unknown dx context");
                SvgaError::InvalidParameter
            })
    }

    pub fn get_mut(&mut self, cid: u32) -> Result<&mut DxContext> {
        self.contexts
            .get_mut(cid as usize)
            .and_then(|c| c.as_mut())
            .ok_or(SvgaError::InvalidParameter)
    }

    pub fn live_ids(&self) -> Vec<u32> {
        self.contexts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i as u32))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DxContext> {
        self.contexts.iter_mut().filter_map(|c| c.as_mut())
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}

/// Number of entries the bound COTable can hold; zero when unbound.
pub fn cotable_entry_count(mobs: &mut MobRegistry, ctx: &DxContext, ty: CoTableType) -> u32 {
    match mobs.get(ctx.cotable_mobid(ty)) {
        Some(mob) => mob.size_bytes() / ty.entry_size(),
        None => 0,
    }
}

/// Reads entry `index` of the COTable through the MOB backing store.
pub fn cotable_entry<T: Pod>(
    mobs: &mut MobRegistry,
    ctx: &DxContext,
    ty: CoTableType,
    index: u32,
) -> Result<T> {
    let (bytes, entry_size) = cotable_slice(mobs, ctx, ty, index)?;
    debug_assert!(core::mem::size_of::<T>() <= entry_size as usize);
    Ok(bytemuck::pod_read_unaligned(
        &bytes[..core::mem::size_of::<T>()],
    ))
}

/// Overwrites entry `index` of the COTable through the MOB backing store.
pub fn set_cotable_entry<T: Pod>(
    mobs: &mut MobRegistry,
    ctx: &DxContext,
    ty: CoTableType,
    index: u32,
    entry: &T,
) -> Result<()> {
    let entry_size = ty.entry_size();
    let mobid = ctx.cotable_mobid(ty);
    let mob = mobs.get_mut(mobid).ok_or(SvgaError::InvalidState)?;
    guest_assert!(index
        .checked_mul(entry_size)
        .and_then(|off| off.checked_add(entry_size))
        .is_some_and(|end| end <= mob.size_bytes()));
    let off = index * entry_size;
    let dst = mob
        .gbo_mut()
        .backing_store_bytes_mut(off)
        .ok_or(SvgaError::InvalidState)?;
    let src = bytemuck::bytes_of(entry);
    guest_assert!(src.len() <= entry_size as usize, SvgaError::InternalError);
    dst[..src.len()].copy_from_slice(src);
    Ok(())
}

fn cotable_slice<'m>(
    mobs: &'m mut MobRegistry,
    ctx: &DxContext,
    ty: CoTableType,
    index: u32,
) -> Result<(&'m [u8], u32)> {
    let entry_size = ty.entry_size();
    let mobid = ctx.cotable_mobid(ty);
    let mob = mobs.get_mut(mobid).ok_or(SvgaError::InvalidState)?;
    guest_assert!(index
        .checked_mul(entry_size)
        .and_then(|off| off.checked_add(entry_size))
        .is_some_and(|end| end <= mob.size_bytes()));
    let off = index * entry_size;
    let bytes = mob
        .gbo()
        .backing_store_bytes(off)
        .ok_or(SvgaError::InvalidState)?;
    Ok((&bytes[..entry_size as usize], entry_size))
}

/// Bound-checks a COTable index without touching the entry.
pub fn verify_cotable_index(
    mobs: &mut MobRegistry,
    ctx: &DxContext,
    ty: CoTableType,
    index: u32,
) -> Result<()> {
    let entry_size = ty.entry_size();
    let mobid = ctx.cotable_mobid(ty);
    let mob = mobs.get(mobid).ok_or(SvgaError::InvalidState)?;
    guest_assert!(index < mob.size_bytes() / entry_size);
    Ok(())
}
