//! Device-level object tables: typed fixed-stride arrays stored in GBOs.

use bytemuck::Pod;
use svga_mem::GuestMemory;
use svga_proto::otable::{OTableType, OTABLE_COUNT};
use svga_proto::types::MobFormat;
use tracing::debug;

use crate::error::{guest_assert, Result};
use crate::gbo::Gbo;

#[derive(Default)]
pub struct ObjectTables {
    tables: [Gbo; OTABLE_COUNT],
}

impl ObjectTables {
    pub fn table(&self, ty: OTableType) -> &Gbo {
        &self.tables[ty.index()]
    }

    /// Installs a new backing GBO for `ty`, or destroys the table when
    /// `size_bytes` is zero. With `grow`, the previously valid prefix is
    /// copied into the new storage; a plain set trusts the guest to have
    /// migrated the contents itself.
    pub fn set_or_grow<M: GuestMemory>(
        &mut self,
        mem: &mut M,
        ty: OTableType,
        base_ppn: u64,
        size_bytes: u32,
        valid_bytes: u32,
        pt_depth: MobFormat,
        grow: bool,
    ) -> Result<()> {
        guest_assert!(size_bytes >= valid_bytes);
        guest_assert!(self.tables[ty.index()].total_bytes() >= valid_bytes);

        if size_bytes == 0 {
            debug!(?ty, "otable destroyed");
            self.tables[ty.index()] = Gbo::default();
            return Ok(());
        }

        let gbo = Gbo::create(mem, pt_depth, base_ppn, size_bytes)?;
        if grow && valid_bytes > 0 {
            Gbo::copy(mem, &gbo, 0, &self.tables[ty.index()], 0, valid_bytes)?;
        }
        self.tables[ty.index()] = gbo;
        Ok(())
    }

    /// `index * entry_size + entry_size <= total_bytes`, with the table
    /// required to exist.
    pub fn verify_index(&self, ty: OTableType, index: u32, entry_size: u32) -> Result<()> {
        let table = &self.tables[ty.index()];
        guest_assert!(table.is_created());
        guest_assert!(index < table.total_bytes() / entry_size);
        Ok(())
    }

    pub fn read<M: GuestMemory, T: Pod>(&self, mem: &M, ty: OTableType, index: u32) -> Result<T> {
        let entry_size = ty.entry_size();
        debug_assert!(core::mem::size_of::<T>() as u32 <= entry_size);
        self.verify_index(ty, index, entry_size)?;
        let mut buf = vec![0u8; core::mem::size_of::<T>()];
        self.tables[ty.index()].read(mem, index * entry_size, &mut buf)?;
        Ok(bytemuck::pod_read_unaligned(&buf))
    }

    pub fn write<M: GuestMemory, T: Pod>(
        &self,
        mem: &mut M,
        ty: OTableType,
        index: u32,
        entry: &T,
    ) -> Result<()> {
        let entry_size = ty.entry_size();
        debug_assert!(core::mem::size_of::<T>() as u32 <= entry_size);
        self.verify_index(ty, index, entry_size)?;
        self.tables[ty.index()].write(mem, index * entry_size, bytemuck::bytes_of(entry))
    }

    /// Best-effort zeroing of an entry, used by destroy paths where a
    /// missing table is not an error.
    pub fn clear_entry<M: GuestMemory>(&self, mem: &mut M, ty: OTableType, index: u32) {
        let entry_size = ty.entry_size();
        if self.verify_index(ty, index, entry_size).is_ok() {
            let zeroes = vec![0u8; entry_size as usize];
            let _ = self.tables[ty.index()].write(mem, index * entry_size, &zeroes);
        }
    }

    /// Drops every table; used by device reset.
    pub fn clear(&mut self) {
        self.tables = Default::default();
    }
}
