//! Guest-backed object (GBO) memory.
//!
//! A GBO is a logically contiguous byte range whose storage is scattered
//! guest pages, described by a page table the guest hands us by root page
//! number. Creation walks the table once and compresses it into runs of
//! physically contiguous pages; transfers then walk the runs.

use svga_mem::GuestMemory;
use svga_proto::types::{MobFormat, GPA_MASK, MOB_MAX_SIZE, PAGE_SHIFT, PAGE_SIZE};
use tracing::trace;

use crate::error::{guest_assert, Result, SvgaError};

/// One run of physically contiguous guest pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GboDescriptor {
    pub gpa: u64,
    pub num_pages: u32,
}

#[derive(Debug, Default)]
pub struct Gbo {
    total_bytes: u32,
    total_pages: u32,
    descriptors: Vec<GboDescriptor>,
    host_shadow: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

fn mask_page_address(ppn: u64) -> u64 {
    // Certain guest drivers emit garbage in the top bits of page numbers.
    (ppn << PAGE_SHIFT) & GPA_MASK
}

impl Gbo {
    /// Walks the guest page table rooted at page number `base_ppn` and
    /// builds the descriptor list for a GBO of `size_bytes`.
    pub fn create<M: GuestMemory>(
        mem: &M,
        pt_depth: MobFormat,
        base_ppn: u64,
        size_bytes: u32,
    ) -> Result<Gbo> {
        guest_assert!(size_bytes <= MOB_MAX_SIZE);

        // The legacy 32-bit depths share semantics with the 64-bit ones,
        // differing only in page-table element width.
        let (depth, elem_size) = match pt_depth {
            MobFormat::PtDepth0 => (0, 4u32),
            MobFormat::PtDepth1 => (1, 4),
            MobFormat::PtDepth2 => (2, 4),
            MobFormat::Pt64Depth0 => (0, 8),
            MobFormat::Pt64Depth1 => (1, 8),
            MobFormat::Pt64Depth2 => (2, 8),
            MobFormat::Range => (u32::MAX, 0),
        };

        let total_pages = size_bytes.div_ceil(PAGE_SIZE);
        let ppns_per_page = if elem_size != 0 { PAGE_SIZE / elem_size } else { 0 };

        let mut descriptors: Vec<GboDescriptor> = Vec::new();
        let mut push_page = |gpa: u64| {
            // Coalesce physically adjacent pages as they are discovered.
            if let Some(last) = descriptors.last_mut() {
                if last.gpa + u64::from(last.num_pages) * u64::from(PAGE_SIZE) == gpa {
                    last.num_pages += 1;
                    return;
                }
            }
            descriptors.push(GboDescriptor { gpa, num_pages: 1 });
        };

        match depth {
            0 => {
                guest_assert!(total_pages == 1);
                push_page(mask_page_address(base_ppn));
            }
            1 => {
                guest_assert!(total_pages <= ppns_per_page);
                let root = read_page(mem, mask_page_address(base_ppn))?;
                for i in 0..total_pages {
                    push_page(mask_page_address(read_ppn(&root, i, elem_size)));
                }
            }
            2 => {
                guest_assert!(total_pages <= ppns_per_page * ppns_per_page);
                let root_l2 = read_page(mem, mask_page_address(base_ppn))?;
                let mut pages_left = total_pages;
                let num_l1 = total_pages.div_ceil(ppns_per_page);
                for i_l1 in 0..num_l1 {
                    let l1_gpa = mask_page_address(read_ppn(&root_l2, i_l1, elem_size));
                    let root_l1 = read_page(mem, l1_gpa)?;
                    let count = pages_left.min(ppns_per_page);
                    for i in 0..count {
                        push_page(mask_page_address(read_ppn(&root_l1, i, elem_size)));
                    }
                    pages_left -= count;
                }
            }
            _ => {
                // RANGE: one contiguous run, no indirection.
                if total_pages > 0 {
                    descriptors.push(GboDescriptor {
                        gpa: mask_page_address(base_ppn),
                        num_pages: total_pages,
                    });
                }
            }
        }

        descriptors.shrink_to_fit();
        trace!(
            total_pages,
            descriptors = descriptors.len(),
            "gbo created"
        );

        Ok(Gbo {
            total_bytes: size_bytes,
            total_pages,
            descriptors,
            host_shadow: None,
        })
    }

    pub fn is_created(&self) -> bool {
        self.total_bytes > 0
    }

    pub fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn descriptors(&self) -> &[GboDescriptor] {
        &self.descriptors
    }

    pub fn read<M: GuestMemory>(&self, mem: &M, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.transfer(offset, buf.len(), |gpa, range| {
            mem.phys_read(gpa, &mut buf[range]).map_err(SvgaError::from)
        })
    }

    pub fn write<M: GuestMemory>(&self, mem: &mut M, offset: u32, buf: &[u8]) -> Result<()> {
        self.transfer(offset, buf.len(), |gpa, range| {
            mem.phys_write(gpa, &buf[range]).map_err(SvgaError::from)
        })
    }

    /// Walks the descriptor list, invoking `access(gpa, host_range)` for each
    /// physically contiguous piece of `[offset, offset + len)`.
    fn transfer(
        &self,
        offset: u32,
        len: usize,
        mut access: impl FnMut(u64, core::ops::Range<usize>) -> Result<()>,
    ) -> Result<()> {
        let len_u32 = u32::try_from(len).map_err(|_| SvgaError::InvalidParameter)?;
        guest_assert!(offset.checked_add(len_u32).is_some_and(|end| end <= self.total_bytes));
        if len_u32 == 0 {
            return Ok(());
        }

        let mut remaining = len_u32;
        let mut off = offset;
        let mut buf_pos = 0usize;

        // Find the descriptor covering the starting offset.
        let mut i = 0usize;
        let mut desc_base = 0u32; // GBO offset of descriptors[i]
        loop {
            let desc_bytes = self.descriptor_bytes(i)?;
            if off < desc_base + desc_bytes {
                break;
            }
            desc_base += desc_bytes;
            // Overflow protection: the walk must terminate inside the GBO.
            if desc_base >= self.total_bytes {
                return Err(SvgaError::InternalError);
            }
            i += 1;
            if i >= self.descriptors.len() {
                return Err(SvgaError::InternalError);
            }
        }

        while remaining > 0 {
            let desc = &self.descriptors[i];
            let desc_bytes = self.descriptor_bytes(i)?;
            let chunk = remaining.min(desc_base + desc_bytes - off);

            let gpa = desc.gpa + u64::from(off - desc_base);
            access(gpa, buf_pos..buf_pos + chunk as usize)?;

            remaining -= chunk;
            off += chunk;
            buf_pos += chunk as usize;

            if remaining > 0 {
                desc_base += desc_bytes;
                if desc_base >= self.total_bytes {
                    return Err(SvgaError::InternalError);
                }
                i += 1;
                if i >= self.descriptors.len() {
                    return Err(SvgaError::InternalError);
                }
            }
        }
        Ok(())
    }

    fn descriptor_bytes(&self, i: usize) -> Result<u32> {
        let desc = self.descriptors.get(i).ok_or(SvgaError::InternalError)?;
        desc.num_pages
            .checked_mul(PAGE_SIZE)
            .ok_or(SvgaError::InternalError)
    }

    /// Copies `len` bytes between two GBOs through a page-sized staging
    /// buffer.
    pub fn copy<M: GuestMemory>(
        mem: &mut M,
        dst: &Gbo,
        dst_off: u32,
        src: &Gbo,
        src_off: u32,
        len: u32,
    ) -> Result<()> {
        let mut staging = [0u8; PAGE_SIZE as usize];
        let mut dst_off = dst_off;
        let mut src_off = src_off;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(PAGE_SIZE) as usize;
            src.read(mem, src_off, &mut staging[..chunk])?;
            dst.write(mem, dst_off, &staging[..chunk])?;
            src_off += chunk as u32;
            dst_off += chunk as u32;
            remaining -= chunk as u32;
        }
        Ok(())
    }

    /*
     * Host backing store: a host-memory snapshot of the guest contents, used
     * where per-entry guest transfers would be too slow (COTables) or where
     * the backend needs a flat pointer.
     */

    pub fn is_host_backed(&self) -> bool {
        self.host_shadow.is_some()
    }

    /// Allocates the shadow (if not already present) and reads the first
    /// `valid_bytes` from the guest into it.
    pub fn backing_store_create<M: GuestMemory>(&mut self, mem: &M, valid_bytes: u32) -> Result<()> {
        if self.host_shadow.is_none() {
            self.host_shadow = Some(vec![0u8; self.total_bytes as usize]);
        }
        let valid = valid_bytes.min(self.total_bytes);
        let mut shadow = self.host_shadow.take().ok_or(SvgaError::InternalError)?;
        let rc = self.read(mem, 0, &mut shadow[..valid as usize]);
        match rc {
            Ok(()) => {
                self.host_shadow = Some(shadow);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn backing_store_delete(&mut self) {
        self.host_shadow = None;
    }

    pub fn backing_store_write_to_guest<M: GuestMemory>(&self, mem: &mut M) -> Result<()> {
        let shadow = self.host_shadow.as_ref().ok_or(SvgaError::InvalidState)?;
        self.write(mem, 0, shadow)
    }

    pub fn backing_store_read_from_guest<M: GuestMemory>(&mut self, mem: &M) -> Result<()> {
        let mut shadow = self.host_shadow.take().ok_or(SvgaError::InvalidState)?;
        let rc = self.read(mem, 0, &mut shadow);
        self.host_shadow = Some(shadow);
        rc
    }

    /// The shadow bytes from `offset`, or `None` when not host-backed or out
    /// of range.
    pub fn backing_store_bytes(&self, offset: u32) -> Option<&[u8]> {
        let shadow = self.host_shadow.as_ref()?;
        shadow.get(offset as usize..)
    }

    pub fn backing_store_bytes_mut(&mut self, offset: u32) -> Option<&mut [u8]> {
        let shadow = self.host_shadow.as_mut()?;
        shadow.get_mut(offset as usize..)
    }
}

fn read_page<M: GuestMemory>(mem: &M, gpa: u64) -> Result<[u8; PAGE_SIZE as usize]> {
    let mut page = [0u8; PAGE_SIZE as usize];
    mem.phys_read(gpa, &mut page)?;
    Ok(page)
}

fn read_ppn(page: &[u8; PAGE_SIZE as usize], index: u32, elem_size: u32) -> u64 {
    let at = (index * elem_size) as usize;
    if elem_size == 8 {
        u64::from_le_bytes(page[at..at + 8].try_into().unwrap())
    } else {
        u64::from(u32::from_le_bytes(page[at..at + 4].try_into().unwrap()))
    }
}
