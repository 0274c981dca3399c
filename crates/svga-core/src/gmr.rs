//! Legacy guest memory regions (GMRs) and the row-by-row transfer helper
//! used by `SURFACE_DMA` and the GMRFB blits.
//!
//! GMRs predate MOBs: the guest declares a region's page count, then remaps
//! page ranges into it. A `GuestPtr` addresses bytes inside a GMR, or the
//! VRAM framebuffer via the reserved id.

use svga_mem::GuestMemory;
use svga_proto::fifo::GMR_MAX_PAGES;
use svga_proto::types::{GuestPtr, TransferType, GMR_FRAMEBUFFER, GPA_MASK, PAGE_SHIFT, PAGE_SIZE};
use tracing::debug;

use crate::error::{guest_assert, Result, SvgaError};

pub const MAX_GMR_IDS: u32 = 256;

#[derive(Default)]
pub struct Gmr {
    /// Guest physical address of each page; zero means never remapped.
    pages: Vec<u64>,
}

impl Gmr {
    pub fn num_pages(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn total_bytes(&self) -> u32 {
        self.num_pages() * PAGE_SIZE
    }

    fn access(
        &self,
        offset: u32,
        len: usize,
        mut access: impl FnMut(u64, core::ops::Range<usize>) -> Result<()>,
    ) -> Result<()> {
        let len_u32 = u32::try_from(len).map_err(|_| SvgaError::InvalidParameter)?;
        guest_assert!(offset.checked_add(len_u32).is_some_and(|end| end <= self.total_bytes()));

        let mut off = offset;
        let mut pos = 0usize;
        let mut remaining = len_u32;
        while remaining > 0 {
            let page = (off >> PAGE_SHIFT) as usize;
            let in_page = off & (PAGE_SIZE - 1);
            let chunk = remaining.min(PAGE_SIZE - in_page);
            let gpa = self.pages[page] + u64::from(in_page);
            access(gpa, pos..pos + chunk as usize)?;
            off += chunk;
            pos += chunk as usize;
            remaining -= chunk;
        }
        Ok(())
    }

    pub fn read<M: GuestMemory>(&self, mem: &M, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.access(offset, buf.len(), |gpa, range| {
            mem.phys_read(gpa, &mut buf[range]).map_err(SvgaError::from)
        })
    }

    pub fn write<M: GuestMemory>(&self, mem: &mut M, offset: u32, buf: &[u8]) -> Result<()> {
        self.access(offset, buf.len(), |gpa, range| {
            mem.phys_write(gpa, &buf[range]).map_err(SvgaError::from)
        })
    }
}

#[derive(Default)]
pub struct GmrRegistry {
    gmrs: Vec<Option<Gmr>>,
}

impl GmrRegistry {
    /// `DEFINE_GMR2`: (re)declares a region. A page count of zero frees it.
    pub fn define(&mut self, gmr_id: u32, num_pages: u32) -> Result<()> {
        guest_assert!(gmr_id < MAX_GMR_IDS);
        guest_assert!(num_pages <= GMR_MAX_PAGES);

        let idx = gmr_id as usize;
        if self.gmrs.len() <= idx {
            self.gmrs.resize_with(idx + 1, || None);
        }
        if num_pages == 0 {
            self.gmrs[idx] = None;
        } else {
            self.gmrs[idx] = Some(Gmr {
                pages: vec![0; num_pages as usize],
            });
        }
        Ok(())
    }

    /// `REMAP_GMR2`: installs page addresses for `[offset_pages,
    /// offset_pages + ppns.len())`. With `single_ppn` the first entry is
    /// replicated over the whole range.
    pub fn remap(
        &mut self,
        gmr_id: u32,
        offset_pages: u32,
        num_pages: u32,
        ppns: &[u64],
        single_ppn: bool,
    ) -> Result<()> {
        let gmr = self.get_mut(gmr_id)?;
        guest_assert!(offset_pages
            .checked_add(num_pages)
            .is_some_and(|end| end <= gmr.num_pages()));
        guest_assert!(if single_ppn {
            !ppns.is_empty()
        } else {
            ppns.len() >= num_pages as usize
        });

        for i in 0..num_pages as usize {
            let ppn = if single_ppn { ppns[0] } else { ppns[i] };
            gmr.pages[offset_pages as usize + i] = (ppn << PAGE_SHIFT) & GPA_MASK;
        }
        Ok(())
    }

    pub fn get(&self, gmr_id: u32) -> Result<&Gmr> {
        self.gmrs
            .get(gmr_id as usize)
            .and_then(|g| g.as_ref())
            .ok_or_else(|| {
                debug!(gmr_id, "unknown gmr");
                SvgaError::InvalidParameter
            })
    }

    fn get_mut(&mut self, gmr_id: u32) -> Result<&mut Gmr> {
        self.gmrs
            .get_mut(gmr_id as usize)
            .and_then(|g| g.as_mut())
            .ok_or(SvgaError::InvalidParameter)
    }

    pub fn clear(&mut self) {
        self.gmrs.clear();
    }
}

/// Moves `width_bytes x height` between a host buffer and guest memory
/// addressed by a `GuestPtr`, one row at a time. Every row's offsets are
/// re-validated; a negative host pitch walks the host buffer bottom-up.
#[allow(clippy::too_many_arguments)]
pub fn gmr_transfer<M: GuestMemory>(
    mem: &mut M,
    gmrs: &GmrRegistry,
    vram: &mut [u8],
    transfer: TransferType,
    host: &mut [u8],
    host_offset: u32,
    host_pitch: i32,
    guest: GuestPtr,
    guest_offset: u32,
    guest_pitch: u32,
    width_bytes: u32,
    height: u32,
) -> Result<()> {
    let guest_base = guest
        .offset
        .checked_add(guest_offset)
        .ok_or(SvgaError::InvalidParameter)?;

    for y in 0..height {
        let host_row = i64::from(host_offset) + i64::from(y) * i64::from(host_pitch);
        guest_assert!(host_row >= 0);
        let host_row = host_row as usize;
        guest_assert!(host_row + width_bytes as usize <= host.len());

        let guest_row = guest_base
            .checked_add(y.checked_mul(guest_pitch).ok_or(SvgaError::InvalidParameter)?)
            .ok_or(SvgaError::InvalidParameter)?;

        let host_slice = &mut host[host_row..host_row + width_bytes as usize];
        if guest.gmr_id == GMR_FRAMEBUFFER {
            let end = guest_row as usize + width_bytes as usize;
            guest_assert!(end <= vram.len());
            match transfer {
                TransferType::WriteHostVram => {
                    host_slice.copy_from_slice(&vram[guest_row as usize..end]);
                }
                TransferType::ReadHostVram => {
                    vram[guest_row as usize..end].copy_from_slice(host_slice);
                }
            }
        } else {
            let gmr = gmrs.get(guest.gmr_id)?;
            match transfer {
                TransferType::WriteHostVram => gmr.read(mem, guest_row, host_slice)?,
                TransferType::ReadHostVram => gmr.write(mem, guest_row, host_slice)?,
            }
        }
    }
    Ok(())
}
