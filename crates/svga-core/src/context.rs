//! VGPU9 rendering contexts.

use svga_proto::types::{INVALID_ID, MAX_CONTEXT_IDS};
use tracing::debug;

use crate::error::{guest_assert, Result, SvgaError};

pub const RT_SLOT_COUNT: usize = 10;
pub const TEXTURE_STAGE_COUNT: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Vgpu9QueryState {
    #[default]
    None,
    Building,
    Issued,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OcclusionQuery {
    pub state: Vgpu9QueryState,
    pub result: u32,
}

pub struct Context {
    pub id: u32,
    /// Depth, stencil, then color targets 0..7; surface ids.
    pub render_targets: [u32; RT_SLOT_COUNT],
    /// Texture sid bound per stage.
    pub active_textures: [u32; TEXTURE_STAGE_COUNT],
    pub vertex_shader_id: u32,
    pub pixel_shader_id: u32,
    pub occlusion: OcclusionQuery,
    /// GB context MOB binding.
    pub mobid: u32,
}

impl Context {
    fn new(id: u32) -> Self {
        Self {
            id,
            render_targets: [INVALID_ID; RT_SLOT_COUNT],
            active_textures: [INVALID_ID; TEXTURE_STAGE_COUNT],
            vertex_shader_id: INVALID_ID,
            pixel_shader_id: INVALID_ID,
            occlusion: OcclusionQuery::default(),
            mobid: INVALID_ID,
        }
    }

    /// Scrubs every binding of `sid`; called when the surface goes away.
    pub fn unbind_surface(&mut self, sid: u32) {
        for slot in &mut self.render_targets {
            if *slot == sid {
                *slot = INVALID_ID;
            }
        }
        for slot in &mut self.active_textures {
            if *slot == sid {
                *slot = INVALID_ID;
            }
        }
    }
}

#[derive(Default)]
pub struct ContextCatalog {
    contexts: Vec<Option<Context>>,
}

impl ContextCatalog {
    pub fn define(&mut self, cid: u32) -> Result<()> {
        guest_assert!(cid < MAX_CONTEXT_IDS);
        let slot = cid as usize;
        if slot >= self.contexts.len() {
            let new_len = (slot + 15 + 15) & !15;
            self.contexts.resize_with(new_len, || None);
        }
        debug!(cid, "vgpu9 context defined");
        self.contexts[slot] = Some(Context::new(cid));
        Ok(())
    }

    pub fn destroy(&mut self, cid: u32) -> Option<Context> {
        self.contexts.get_mut(cid as usize).and_then(|c| c.take())
    }

    pub fn get(&self, cid: u32) -> Result<&Context> {
        self.contexts
            .get(cid as usize)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| {
                debug!(cid, "unknown vgpu9 context");
                SvgaError::InvalidParameter
            })
    }

    pub fn get_mut(&mut self, cid: u32) -> Result<&mut Context> {
        self.contexts
            .get_mut(cid as usize)
            .and_then(|c| c.as_mut())
            .ok_or(SvgaError::InvalidParameter)
    }

    pub fn exists(&self, cid: u32) -> bool {
        self.contexts.get(cid as usize).is_some_and(|c| c.is_some())
    }

    pub fn live_ids(&self) -> Vec<u32> {
        self.contexts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i as u32))
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Context> {
        self.contexts.iter_mut().filter_map(|c| c.as_mut())
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}
