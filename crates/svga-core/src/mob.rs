//! Memory objects: GBOs registered under a guest-chosen 32-bit id.

use lru::LruCache;
use svga_mem::GuestMemory;
use svga_proto::types::{MobFormat, INVALID_ID};
use tracing::{debug, warn};

use crate::error::{guest_assert, Result};
use crate::gbo::Gbo;

pub struct Mob {
    mobid: u32,
    gbo: Gbo,
}

impl Mob {
    pub fn mobid(&self) -> u32 {
        self.mobid
    }

    pub fn size_bytes(&self) -> u32 {
        self.gbo.total_bytes()
    }

    pub fn gbo(&self) -> &Gbo {
        &self.gbo
    }

    pub fn gbo_mut(&mut self) -> &mut Gbo {
        &mut self.gbo
    }

    pub fn read<M: GuestMemory>(&self, mem: &M, off: u32, buf: &mut [u8]) -> Result<()> {
        self.gbo.read(mem, off, buf)
    }

    pub fn write<M: GuestMemory>(&self, mem: &mut M, off: u32, buf: &[u8]) -> Result<()> {
        self.gbo.write(mem, off, buf)
    }
}

/// The per-device MOB collection. An unbounded LRU map: lookups promote the
/// entry, so the tail is always the eviction candidate once host-side
/// caching of MOB contents starts paying for itself.
pub struct MobRegistry {
    mobs: LruCache<u32, Mob>,
}

impl Default for MobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MobRegistry {
    pub fn new() -> Self {
        Self {
            mobs: LruCache::unbounded(),
        }
    }

    pub fn len(&self) -> usize {
        self.mobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mobs.is_empty()
    }

    /// Builds the GBO and installs the MOB. The caller is responsible for
    /// the MOB OTable entry; this keeps registry and table updates in the
    /// order the device performs them.
    pub fn create<M: GuestMemory>(
        &mut self,
        mem: &M,
        mobid: u32,
        pt_depth: MobFormat,
        base_ppn: u64,
        size_bytes: u32,
    ) -> Result<()> {
        guest_assert!(mobid != INVALID_ID);

        let gbo = Gbo::create(mem, pt_depth, base_ppn, size_bytes)?;

        if self.mobs.pop(&mobid).is_some() {
            // The guest must destroy before redefining.
            warn!(mobid, "mob redefined without destroy");
        }
        self.mobs.put(mobid, Mob { mobid, gbo });
        Ok(())
    }

    /// Looks up a MOB and marks it most recently used.
    pub fn get(&mut self, mobid: u32) -> Option<&Mob> {
        if mobid == INVALID_ID {
            return None;
        }
        match self.mobs.get(&mobid) {
            Some(mob) => Some(mob),
            None => {
                debug!(mobid, "unknown mobid");
                None
            }
        }
    }

    pub fn get_mut(&mut self, mobid: u32) -> Option<&mut Mob> {
        if mobid == INVALID_ID {
            return None;
        }
        self.mobs.get_mut(&mobid)
    }

    pub fn destroy(&mut self, mobid: u32) -> Option<Mob> {
        self.mobs.pop(&mobid)
    }

    /// Destroys every MOB; used by device reset.
    pub fn clear(&mut self) {
        self.mobs.clear();
    }

    /// Ids from most to least recently used, for tests and future eviction.
    pub fn ids_by_recency(&self) -> Vec<u32> {
        self.mobs.iter().map(|(id, _)| *id).collect()
    }
}
