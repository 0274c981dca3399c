//! Per-DX-context object tables (COTables).
//!
//! Each DX context owns twelve typed tables whose storage is a guest MOB.
//! Entries are the device's canonical record of view/state/query/shader
//! objects and are read back into guest memory on request.

use bytemuck::{Pod, Zeroable};

use crate::dx::{
    BlendStatePerRt, InputElementDesc, StreamOutputDeclEntry, MAX_STREAMOUT_DECLS,
    MAX_STREAMOUT_STREAMS, MAX_VERTEX_ELEMENTS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoTableType {
    RtView,
    DsView,
    SrView,
    ElementLayout,
    BlendState,
    DepthStencil,
    RasterizerState,
    Sampler,
    StreamOutput,
    DxQuery,
    DxShader,
    UaView,
}

pub const COTABLE_COUNT: usize = 12;

impl CoTableType {
    pub fn from_wire(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::RtView,
            1 => Self::DsView,
            2 => Self::SrView,
            3 => Self::ElementLayout,
            4 => Self::BlendState,
            5 => Self::DepthStencil,
            6 => Self::RasterizerState,
            7 => Self::Sampler,
            8 => Self::StreamOutput,
            9 => Self::DxQuery,
            10 => Self::DxShader,
            11 => Self::UaView,
            _ => return None,
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn entry_size(self) -> u32 {
        (match self {
            Self::RtView => core::mem::size_of::<RtViewEntry>(),
            Self::DsView => core::mem::size_of::<DsViewEntry>(),
            Self::SrView => core::mem::size_of::<SrViewEntry>(),
            Self::ElementLayout => core::mem::size_of::<ElementLayoutEntry>(),
            Self::BlendState => core::mem::size_of::<BlendStateEntry>(),
            Self::DepthStencil => core::mem::size_of::<DepthStencilEntry>(),
            Self::RasterizerState => core::mem::size_of::<RasterizerStateEntry>(),
            Self::Sampler => core::mem::size_of::<SamplerEntry>(),
            Self::StreamOutput => core::mem::size_of::<StreamOutputEntry>(),
            Self::DxQuery => core::mem::size_of::<QueryEntry>(),
            Self::DxShader => core::mem::size_of::<ShaderEntry>(),
            Self::UaView => core::mem::size_of::<UaViewEntry>(),
        }) as u32
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct RtViewEntry {
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: [u32; 3],
    pub pad0: u32,
    pub pad1: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DsViewEntry {
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub mip_slice: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    pub flags: u32,
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SrViewEntry {
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: [u32; 4],
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ElementLayoutEntry {
    pub num_descs: u32,
    pub pad0: u32,
    pub descs: [InputElementDesc; MAX_VERTEX_ELEMENTS],
}

impl Default for ElementLayoutEntry {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BlendStateEntry {
    pub alpha_to_coverage_enable: u32,
    pub independent_blend_enable: u32,
    pub per_rt: [BlendStatePerRt; 8],
    pub pad0: u32,
    pub pad1: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DepthStencilEntry {
    pub depth_enable: u32,
    pub depth_write_mask: u32,
    pub depth_func: u32,
    pub stencil_enable: u32,
    pub front_enable: u32,
    pub back_enable: u32,
    pub read_mask: u32,
    pub write_mask: u32,
    pub front_stencil_fail_op: u32,
    pub front_stencil_depth_fail_op: u32,
    pub front_stencil_pass_op: u32,
    pub front_stencil_func: u32,
    pub back_stencil_fail_op: u32,
    pub back_stencil_depth_fail_op: u32,
    pub back_stencil_pass_op: u32,
    pub back_stencil_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct RasterizerStateEntry {
    pub fill_mode: u32,
    pub cull_mode: u32,
    pub front_counter_clockwise: u32,
    pub provoking_vertex_last: u32,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: u32,
    pub scissor_enable: u32,
    pub multisample_enable: u32,
    pub antialiased_line_enable: u32,
    pub line_width: f32,
    pub line_stipple_enable: u32,
    pub line_stipple_factor: u32,
    pub line_stipple_pattern: u32,
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SamplerEntry {
    pub filter: u32,
    pub address_u: u32,
    pub address_v: u32,
    pub address_w: u32,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison_func: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct StreamOutputEntry {
    pub num_output_stream_entries: u32,
    pub rasterized_stream: u32,
    pub stream_output_stride_in_bytes: [u32; MAX_STREAMOUT_STREAMS],
    pub decl: [StreamOutputDeclEntry; MAX_STREAMOUT_DECLS],
}

impl Default for StreamOutputEntry {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct QueryEntry {
    pub query_type: u32,
    pub state: u32,
    pub flags: u32,
    pub mobid: u32,
    pub offset: u32,
    pub pad0: u32,
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
pub struct UaViewEntry {
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: [u32; 4],
    pub pad0: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_strides_are_wire_stable() {
        assert_eq!(CoTableType::RtView.entry_size(), 32);
        assert_eq!(CoTableType::DsView.entry_size(), 32);
        assert_eq!(CoTableType::SrView.entry_size(), 32);
        assert_eq!(CoTableType::ElementLayout.entry_size(), 8 + 24 * 32);
        assert_eq!(CoTableType::BlendState.entry_size(), 16 + 32 * 8);
        assert_eq!(CoTableType::DepthStencil.entry_size(), 64);
        assert_eq!(CoTableType::RasterizerState.entry_size(), 64);
        assert_eq!(CoTableType::Sampler.entry_size(), 56);
        assert_eq!(CoTableType::StreamOutput.entry_size(), 24 + 16 * 64);
        assert_eq!(CoTableType::DxQuery.entry_size(), 24);
        assert_eq!(CoTableType::DxShader.entry_size(), 16);
        assert_eq!(CoTableType::UaView.entry_size(), 32);
    }

    #[test]
    fn every_wire_value_round_trips() {
        for v in 0..COTABLE_COUNT as u32 {
            let t = CoTableType::from_wire(v).unwrap();
            assert_eq!(t.index() as u32, v);
        }
        assert!(CoTableType::from_wire(COTABLE_COUNT as u32).is_none());
    }
}
