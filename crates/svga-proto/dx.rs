//! DX (VGPU10) command structs.
//!
//! Every command here is dispatched with the DX context id carried by the
//! surrounding command-buffer header, except the handful that embed their
//! own `cid` (context lifecycle, `DX_SET_COTABLE`, `DX_BIND_SHADER`,
//! `DX_BIND_ALL_QUERY`).

use bytemuck::{Pod, Zeroable};

use crate::types::{Box3d, CopyBox};

pub type RenderTargetViewId = u32;
pub type DepthStencilViewId = u32;
pub type ShaderResourceViewId = u32;
pub type UaViewId = u32;
pub type ElementLayoutId = u32;
pub type BlendStateId = u32;
pub type DepthStencilStateId = u32;
pub type RasterizerStateId = u32;
pub type SamplerId = u32;
pub type ShaderId = u32;
pub type StreamOutputId = u32;
pub type QueryId = u32;

pub const SHADER_TYPE_MIN: u32 = 1;
pub const SHADER_TYPE_VS: u32 = 1;
pub const SHADER_TYPE_PS: u32 = 2;
pub const SHADER_TYPE_GS: u32 = 3;
pub const SHADER_TYPE_HS: u32 = 4;
pub const SHADER_TYPE_DS: u32 = 5;
pub const SHADER_TYPE_CS: u32 = 6;
pub const SHADER_TYPE_MAX: u32 = 7;

pub const PRIMITIVE_INVALID: u32 = 0;
pub const PRIMITIVE_MAX: u32 = 42;

pub const MAX_CONSTANT_BUFFERS: u32 = 14;
pub const MAX_SHADER_RESOURCES: u32 = 64;
pub const MAX_SAMPLERS: u32 = 16;
pub const MAX_VERTEX_BUFFERS: u32 = 32;
pub const MAX_SO_TARGETS: u32 = 4;
pub const MAX_VIEWPORTS: u32 = 16;
pub const MAX_UA_VIEWS: u32 = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineContext {
    pub cid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyContext {
    pub cid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBindContext {
    pub cid: u32,
    pub mobid: u32,
    pub valid_contents: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxReadbackContext {
    pub cid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxInvalidateContext {
    pub cid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetSingleConstantBuffer {
    pub slot: u32,
    pub shader_type: u32,
    pub sid: u32,
    pub offset_in_bytes: u32,
    pub size_in_bytes: u32,
}

/// Followed by `ShaderResourceViewId[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetShaderResources {
    pub start_view: u32,
    pub shader_type: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetShader {
    pub shader_id: u32,
    pub shader_type: u32,
}

/// Followed by `SamplerId[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetSamplers {
    pub start_sampler: u32,
    pub shader_type: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDraw {
    pub vertex_count: u32,
    pub start_vertex_location: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDrawIndexed {
    pub index_count: u32,
    pub start_index_location: u32,
    pub base_vertex_location: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDrawInstanced {
    pub vertex_count_per_instance: u32,
    pub instance_count: u32,
    pub start_vertex_location: u32,
    pub start_instance_location: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDrawIndexedInstanced {
    pub index_count_per_instance: u32,
    pub instance_count: u32,
    pub start_index_location: u32,
    pub base_vertex_location: i32,
    pub start_instance_location: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetInputLayout {
    pub element_layout_id: ElementLayoutId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct VertexBufferBinding {
    pub sid: u32,
    pub stride: u32,
    pub offset: u32,
}

/// Followed by `VertexBufferBinding[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetVertexBuffers {
    pub start_buffer: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetIndexBuffer {
    pub sid: u32,
    pub format: u32,
    pub offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetTopology {
    pub topology: u32,
}

/// Followed by `RenderTargetViewId[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetRenderTargets {
    pub depth_stencil_view_id: DepthStencilViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetBlendState {
    pub blend_id: BlendStateId,
    pub blend_factor: [f32; 4],
    pub sample_mask: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetDepthStencilState {
    pub depth_stencil_id: DepthStencilStateId,
    pub stencil_ref: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetRasterizerState {
    pub rasterizer_id: RasterizerStateId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineQuery {
    pub query_id: QueryId,
    pub query_type: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyQuery {
    pub query_id: QueryId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBindQuery {
    pub query_id: QueryId,
    pub mobid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetQueryOffset {
    pub query_id: QueryId,
    pub mob_offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBeginQuery {
    pub query_id: QueryId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxEndQuery {
    pub query_id: QueryId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxReadbackQuery {
    pub query_id: QueryId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetPredication {
    pub query_id: QueryId,
    pub predicate_value: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SoTarget {
    pub sid: u32,
    pub offset: u32,
    pub size_in_bytes: u32,
}

/// Followed by `SoTarget[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetSoTargets {
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Followed by `Viewport[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetViewports {
    pub pad0: u32,
}

/// Followed by `SignedRect[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetScissorRects {
    pub pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxClearRenderTargetView {
    pub render_target_view_id: RenderTargetViewId,
    pub rgba: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxClearDepthStencilView {
    /// Low 16 bits: clear flags; high 16 bits: stencil value.
    pub flags_stencil: u32,
    pub depth_stencil_view_id: DepthStencilViewId,
    pub depth: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxPredCopyRegion {
    pub dst_sid: u32,
    pub dst_subresource: u32,
    pub src_sid: u32,
    pub src_subresource: u32,
    pub bounds: CopyBox,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxPredCopy {
    pub dst_sid: u32,
    pub src_sid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxPresentBlt {
    pub src_sid: u32,
    pub src_subresource: u32,
    pub dst_sid: u32,
    pub dst_subresource: u32,
    pub box_src: Box3d,
    pub box_dst: Box3d,
    pub mode: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxGenMips {
    pub shader_resource_view_id: ShaderResourceViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxUpdateSubResource {
    pub sid: u32,
    pub subresource: u32,
    pub bounds: Box3d,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxReadbackSubResource {
    pub sid: u32,
    pub subresource: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxInvalidateSubResource {
    pub sid: u32,
    pub subresource: u32,
}

/// View descriptor union: interpretation depends on `resource_dimension`
/// (buffer/1D/2D/3D/cube). The core stores it opaquely in the COTable.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ViewDesc {
    pub desc: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineShaderResourceView {
    pub shader_resource_view_id: ShaderResourceViewId,
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyShaderResourceView {
    pub shader_resource_view_id: ShaderResourceViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineRenderTargetView {
    pub render_target_view_id: RenderTargetViewId,
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: ViewDesc,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyRenderTargetView {
    pub render_target_view_id: RenderTargetViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineDepthStencilView {
    pub depth_stencil_view_id: DepthStencilViewId,
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub mip_slice: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyDepthStencilView {
    pub depth_stencil_view_id: DepthStencilViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct InputElementDesc {
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub format: u32,
    pub input_slot_class: u32,
    pub instance_data_step_rate: u32,
    pub input_register: u32,
}

pub const MAX_VERTEX_ELEMENTS: usize = 32;

/// Followed by `InputElementDesc[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineElementLayout {
    pub element_layout_id: ElementLayoutId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyElementLayout {
    pub element_layout_id: ElementLayoutId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct BlendStatePerRt {
    pub blend_enable: u32,
    pub src_blend: u32,
    pub dest_blend: u32,
    pub blend_op: u32,
    pub src_blend_alpha: u32,
    pub dest_blend_alpha: u32,
    pub blend_op_alpha: u32,
    pub render_target_write_mask: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineBlendState {
    pub blend_id: BlendStateId,
    pub alpha_to_coverage_enable: u32,
    pub independent_blend_enable: u32,
    pub per_rt: [BlendStatePerRt; 8],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyBlendState {
    pub blend_id: BlendStateId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineDepthStencilState {
    pub depth_stencil_id: DepthStencilStateId,
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
pub struct CmdDxDestroyDepthStencilState {
    pub depth_stencil_id: DepthStencilStateId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineRasterizerState {
    pub rasterizer_id: RasterizerStateId,
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
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyRasterizerState {
    pub rasterizer_id: RasterizerStateId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineSamplerState {
    pub sampler_id: SamplerId,
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
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroySamplerState {
    pub sampler_id: SamplerId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineShader {
    pub shader_id: ShaderId,
    pub shader_type: u32,
    pub size_in_bytes: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyShader {
    pub shader_id: ShaderId,
}

/// Carries its own `cid`; dispatched without a surrounding DX context.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBindShader {
    pub cid: u32,
    pub shid: ShaderId,
    pub mobid: u32,
    pub offset_in_bytes: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct StreamOutputDeclEntry {
    pub output_slot: u32,
    pub register_index: u32,
    pub register_mask: u32,
    pub stream: u32,
}

pub const MAX_STREAMOUT_DECLS: usize = 64;
pub const MAX_STREAMOUT_STREAMS: usize = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CmdDxDefineStreamOutput {
    pub soid: StreamOutputId,
    pub num_output_stream_entries: u32,
    pub decl: [StreamOutputDeclEntry; MAX_STREAMOUT_DECLS],
    pub stream_output_stride_in_bytes: [u32; MAX_STREAMOUT_STREAMS],
    pub rasterized_stream: u32,
}

impl Default for CmdDxDefineStreamOutput {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyStreamOutput {
    pub soid: StreamOutputId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetStreamOutput {
    pub soid: StreamOutputId,
}

/// Carries its own `cid`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetCoTable {
    pub cid: u32,
    pub mobid: u32,
    pub cotable_type: u32,
    pub valid_size_in_bytes: u32,
}

/// Carries its own `cid`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxReadbackCoTable {
    pub cid: u32,
    pub cotable_type: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBufferCopy {
    pub dest: u32,
    pub src: u32,
    pub dest_x: u32,
    pub src_x: u32,
    pub width: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxTransferFromBuffer {
    pub src_sid: u32,
    pub src_offset: u32,
    pub src_pitch: u32,
    pub src_slice_pitch: u32,
    pub dest_sid: u32,
    pub dest_subresource: u32,
    pub dest_box: Box3d,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSurfaceCopyAndReadback {
    pub src_sid: u32,
    pub dest_sid: u32,
    pub bounds: CopyBox,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxMoveQuery {
    pub query_id: QueryId,
    pub mobid: u32,
    pub mob_offset: u32,
}

/// Carries its own `cid`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBindAllQuery {
    pub cid: u32,
    pub mobid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxReadbackAllQuery {
    pub cid: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxMobFence64 {
    pub value: u64,
    pub mobid: u32,
    pub mob_offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBindAllShader {
    pub cid: u32,
}

/// Followed by hint payload; advisory, content ignored.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxHint {
    pub hint_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxBufferUpdate {
    pub sid: u32,
    pub x: u32,
    pub width: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetConstantBufferOffset {
    pub slot: u32,
    pub offset_in_bytes: u32,
}

/// Followed by `UaViewId[n]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxSetUaViews {
    pub uav_splice_index: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDefineUaView {
    pub ua_view_id: UaViewId,
    pub sid: u32,
    pub format: u32,
    pub resource_dimension: u32,
    pub desc: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxDestroyUaView {
    pub ua_view_id: UaViewId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxClearUaViewUint {
    pub ua_view_id: UaViewId,
    pub value: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDxClearUaViewFloat {
    pub ua_view_id: UaViewId,
    pub value: [f32; 4],
}
