//! Device-level object tables and the DX context MOB image.
//!
//! An object table is guest memory interpreted as a packed array of
//! fixed-size entries; the constants here are wire ABI and must not change.

use bytemuck::{Pod, Zeroable};

use crate::dx::{
    SoTarget, VertexBufferBinding, Viewport, MAX_CONSTANT_BUFFERS, MAX_SHADER_RESOURCES,
    MAX_SO_TARGETS, MAX_UA_VIEWS, MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
};
use crate::types::{SignedRect, Size3d, SurfaceImageId};

/// The six device-level object tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OTableType {
    Mob,
    Surface,
    Context,
    Shader,
    ScreenTarget,
    DxContext,
}

pub const OTABLE_COUNT: usize = 6;

impl OTableType {
    pub fn from_wire(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Mob,
            1 => Self::Surface,
            2 => Self::Context,
            3 => Self::Shader,
            4 => Self::ScreenTarget,
            5 => Self::DxContext,
            _ => return None,
        })
    }

    pub fn index(self) -> usize {
        match self {
            Self::Mob => 0,
            Self::Surface => 1,
            Self::Context => 2,
            Self::Shader => 3,
            Self::ScreenTarget => 4,
            Self::DxContext => 5,
        }
    }

    /// Wire-fixed entry stride of this table.
    pub fn entry_size(self) -> u32 {
        (match self {
            Self::Mob => core::mem::size_of::<MobEntry>(),
            Self::Surface => core::mem::size_of::<SurfaceEntry>(),
            Self::Context => core::mem::size_of::<ContextEntry>(),
            Self::Shader => core::mem::size_of::<ShaderEntry>(),
            Self::ScreenTarget => core::mem::size_of::<ScreenTargetEntry>(),
            Self::DxContext => core::mem::size_of::<DxContextEntry>(),
        }) as u32
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct MobEntry {
    pub pt_depth: u32,
    pub size_in_bytes: u32,
    pub base: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SurfaceEntry {
    pub format: u32,
    pub surface1_flags: u32,
    pub num_mip_levels: u32,
    pub multisample_count: u32,
    pub autogen_filter: u32,
    pub size: Size3d,
    pub mobid: u32,
    pub array_size: u32,
    pub mob_pitch: u32,
    pub surface2_flags: u32,
    pub multisample_pattern: u32,
    pub quality_level: u32,
    pub buffer_byte_stride: u32,
    pub min_lod: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ContextEntry {
    pub cid: u32,
    pub mobid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ShaderEntry {
    pub shader_type: u32,
    pub size_in_bytes: u32,
    pub offset_in_bytes: u32,
    pub mobid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ScreenTargetEntry {
    pub image: SurfaceImageId,
    pub width: u32,
    pub height: u32,
    pub x_root: i32,
    pub y_root: i32,
    pub flags: u32,
    pub dpi: u32,
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DxContextEntry {
    pub cid: u32,
    pub mobid: u32,
}

/*
 * DX context MOB image: the pipeline state swapped in/out by
 * DX_BIND_CONTEXT / DX_READBACK_CONTEXT.
 */

pub const DX_STAGE_COUNT: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ConstantBufferBinding {
    pub sid: u32,
    pub offset_in_bytes: u32,
    pub size_in_bytes: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShaderStageState {
    pub shader_id: u32,
    pub constant_buffers: [ConstantBufferBinding; MAX_CONSTANT_BUFFERS as usize],
    pub shader_resources: [u32; MAX_SHADER_RESOURCES as usize],
    pub samplers: [u32; crate::dx::MAX_SAMPLERS as usize],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DxContextMobFormat {
    pub element_layout_id: u32,
    pub topology: u32,
    pub vertex_buffers: [VertexBufferBinding; MAX_VERTEX_BUFFERS as usize],
    pub index_buffer_sid: u32,
    pub index_buffer_format: u32,
    pub index_buffer_offset: u32,
    pub shader_state: [ShaderStageState; DX_STAGE_COUNT],
    pub render_target_view_ids: [u32; crate::types::MAX_RENDER_TARGETS as usize],
    pub depth_stencil_view_id: u32,
    pub blend_state_id: u32,
    pub blend_factor: [u32; 4],
    pub sample_mask: u32,
    pub depth_stencil_state_id: u32,
    pub stencil_ref: u32,
    pub rasterizer_state_id: u32,
    pub predicate_query_id: u32,
    pub predicate_value: u32,
    pub stream_output_id: u32,
    pub so_targets: [SoTarget; MAX_SO_TARGETS as usize],
    pub num_viewports: u32,
    pub num_scissor_rects: u32,
    pub viewports: [Viewport; MAX_VIEWPORTS as usize],
    pub scissor_rects: [SignedRect; MAX_VIEWPORTS as usize],
    pub ua_views: [u32; MAX_UA_VIEWS as usize],
    pub uav_splice_index: u32,
    pub cotable_mobids: [u32; crate::cotable::COTABLE_COUNT],
}

impl Default for DxContextMobFormat {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

pub const DX_CONTEXT_MOB_BYTES: u32 = core::mem::size_of::<DxContextMobFormat>() as u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_strides_are_wire_stable() {
        assert_eq!(OTableType::Mob.entry_size(), 16);
        assert_eq!(OTableType::Surface.entry_size(), 64);
        assert_eq!(OTableType::Context.entry_size(), 8);
        assert_eq!(OTableType::Shader.entry_size(), 16);
        assert_eq!(OTableType::ScreenTarget.entry_size(), 40);
        assert_eq!(OTableType::DxContext.entry_size(), 8);
    }

    #[test]
    fn context_mob_image_has_no_padding() {
        // Pod derive would fail on padding, but keep an explicit size pin so
        // an accidental field reorder shows up as a test diff.
        let computed = 4 + 4
            + 12 * MAX_VERTEX_BUFFERS as usize
            + 12
            + DX_STAGE_COUNT
                * (4 + 12 * MAX_CONSTANT_BUFFERS as usize
                    + 4 * MAX_SHADER_RESOURCES as usize
                    + 4 * crate::dx::MAX_SAMPLERS as usize)
            + 4 * crate::types::MAX_RENDER_TARGETS as usize
            // dsv + blend/depth-stencil/rasterizer ids + refs + predication
            // + stream output id, plus the blend factor.
            + 4 * 9
            + 16
            + 12 * MAX_SO_TARGETS as usize
            + 8
            + 24 * MAX_VIEWPORTS as usize
            + 16 * MAX_VIEWPORTS as usize
            + 4 * MAX_UA_VIEWS as usize
            + 4
            + 4 * crate::cotable::COTABLE_COUNT;
        assert_eq!(core::mem::size_of::<DxContextMobFormat>(), computed);
    }
}
