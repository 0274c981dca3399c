//! Rendering backend and display frontend interfaces.
//!
//! The core validates and bookkeeps; actual rendering happens behind these
//! traits. A backend may be partial: any interface it does not provide makes
//! the corresponding command family fail with `NotSupported`. Methods that
//! only notify default to `Ok(())` so thin backends and test doubles stay
//! small; methods that return data to the guest must be implemented.

use svga_proto::cmd::{
    CopyRect, PrimitiveRange, RenderStateEntry, TextureStateEntry, VertexDecl,
};
use svga_proto::cotable::{CoTableType, QueryEntry};
use svga_proto::dx;
use svga_proto::types::{Box3d, CopyBox, Rect, SignedRect, SurfaceImageId};

use crate::cursor::CursorShape;
use crate::error::{Result, SvgaError};
use crate::surface::Surface;

/// Shared 3D surface operations (both protocol generations).
pub trait Backend3d {
    /// Instantiates the hardware resource for a so-far software surface.
    /// The backend parks its handle in `surface.backend_handle`.
    fn create_texture(&mut self, cid: u32, surface: &mut Surface) -> Result<()>;

    fn surface_destroy(&mut self, _sid: u32) {}

    /// The hardware copy of the surface content is gone.
    fn surface_invalidate(&mut self, _sid: u32) -> Result<()> {
        Ok(())
    }

    fn surface_copy(
        &mut self,
        _dst: SurfaceImageId,
        _src: SurfaceImageId,
        _boxes: &[CopyBox],
    ) -> Result<()> {
        Ok(())
    }

    fn surface_stretch_blt(
        &mut self,
        _dst: SurfaceImageId,
        _dst_box: Box3d,
        _src: SurfaceImageId,
        _src_box: Box3d,
        _mode: u32,
    ) -> Result<()> {
        Ok(())
    }

    /// One clipped DMA box touched a hardware-backed surface.
    fn surface_dma_box(&mut self, _image: SurfaceImageId, _bounds: CopyBox) -> Result<()> {
        Ok(())
    }

    fn surface_blit_to_screen(
        &mut self,
        _screen_id: u32,
        _dest_rect: SignedRect,
        _src: SurfaceImageId,
        _src_rect: SignedRect,
        _clip: &[SignedRect],
    ) -> Result<()> {
        Ok(())
    }

    fn generate_mipmaps(&mut self, _sid: u32, _filter: u32) -> Result<()> {
        Ok(())
    }
}

/// Legacy VGPU9 pipeline.
pub trait BackendVgpu9 {
    fn context_define(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn context_destroy(&mut self, _cid: u32) {}

    fn set_transform(&mut self, _cid: u32, _ty: u32, _matrix: &[f32; 16]) -> Result<()> {
        Ok(())
    }

    fn set_z_range(&mut self, _cid: u32, _min: f32, _max: f32) -> Result<()> {
        Ok(())
    }

    fn set_render_state(&mut self, _cid: u32, _states: &[RenderStateEntry]) -> Result<()> {
        Ok(())
    }

    fn set_render_target(&mut self, _cid: u32, _rt_type: u32, _target: SurfaceImageId) -> Result<()> {
        Ok(())
    }

    fn set_texture_state(&mut self, _cid: u32, _states: &[TextureStateEntry]) -> Result<()> {
        Ok(())
    }

    fn set_viewport(&mut self, _cid: u32, _rect: Rect) -> Result<()> {
        Ok(())
    }

    fn set_scissor_rect(&mut self, _cid: u32, _rect: Rect) -> Result<()> {
        Ok(())
    }

    fn set_clip_plane(&mut self, _cid: u32, _index: u32, _plane: &[f32; 4]) -> Result<()> {
        Ok(())
    }

    fn set_material(&mut self, _cid: u32, _face: u32, _material: &[f32; 17]) -> Result<()> {
        Ok(())
    }

    fn set_light_data(&mut self, _cid: u32, _index: u32, _data: &[f32; 29]) -> Result<()> {
        Ok(())
    }

    fn set_light_enabled(&mut self, _cid: u32, _index: u32, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn clear(
        &mut self,
        _cid: u32,
        _flags: u32,
        _color: u32,
        _depth: f32,
        _stencil: u32,
        _rects: &[Rect],
    ) -> Result<()> {
        Ok(())
    }

    fn present(&mut self, _sid: u32, _rects: &[CopyRect]) -> Result<()> {
        Ok(())
    }

    fn draw_primitives(
        &mut self,
        _cid: u32,
        _decls: &[VertexDecl],
        _ranges: &[PrimitiveRange],
        _divisors: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn shader_define(
        &mut self,
        _cid: u32,
        _shid: u32,
        _shader_type: u32,
        _bytecode: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn shader_destroy(&mut self, _cid: u32, _shid: u32, _shader_type: u32) -> Result<()> {
        Ok(())
    }

    fn set_shader(&mut self, _cid: u32, _shader_type: u32, _shid: u32) -> Result<()> {
        Ok(())
    }

    fn set_shader_const(
        &mut self,
        _cid: u32,
        _reg: u32,
        _shader_type: u32,
        _const_type: u32,
        _values: &[[u32; 4]],
    ) -> Result<()> {
        Ok(())
    }

    fn occlusion_query_begin(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    /// Returns the sample count accumulated since the matching begin.
    fn occlusion_query_end(&mut self, _cid: u32) -> Result<u32> {
        Ok(0)
    }
}

/// Mapping between hardware surfaces and their host shadows.
pub trait BackendMap {
    /// Pulls the hardware content of one subresource into its shadow.
    fn readback_surface(&mut self, _surface: &mut Surface, _image: SurfaceImageId) -> Result<()> {
        Ok(())
    }

    /// Pushes the shadow of one subresource to the hardware.
    fn update_surface(&mut self, _surface: &mut Surface, _image: SurfaceImageId) -> Result<()> {
        Ok(())
    }
}

/// Guest-backed-object lifecycle notifications.
pub trait BackendGbo {
    fn mob_defined(&mut self, _mobid: u32, _size_bytes: u32) -> Result<()> {
        Ok(())
    }

    fn mob_destroyed(&mut self, _mobid: u32) {}

    fn screen_target_defined(&mut self, _stid: u32, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    fn screen_target_destroyed(&mut self, _stid: u32) {}
}

/// DX (VGPU10) pipeline. Handlers forward after the core has validated ids
/// and updated the COTables; the backend keeps its own id-to-object maps.
pub trait BackendDx {
    fn dx_define_context(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_context(&mut self, _cid: u32) {}

    fn dx_bind_context(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_readback_context(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_invalidate_context(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_cotable(&mut self, _cid: u32, _ty: CoTableType, _valid_entries: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_single_constant_buffer(
        &mut self,
        _cid: u32,
        _slot: u32,
        _shader_type: u32,
        _sid: u32,
        _offset: u32,
        _size: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_shader_resources(
        &mut self,
        _cid: u32,
        _shader_type: u32,
        _start: u32,
        _view_ids: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_shader(&mut self, _cid: u32, _shader_type: u32, _shader_id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_samplers(
        &mut self,
        _cid: u32,
        _shader_type: u32,
        _start: u32,
        _sampler_ids: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn dx_draw(&mut self, _cid: u32, _cmd: &dx::CmdDxDraw) -> Result<()> {
        Ok(())
    }

    fn dx_draw_indexed(&mut self, _cid: u32, _cmd: &dx::CmdDxDrawIndexed) -> Result<()> {
        Ok(())
    }

    fn dx_draw_instanced(&mut self, _cid: u32, _cmd: &dx::CmdDxDrawInstanced) -> Result<()> {
        Ok(())
    }

    fn dx_draw_indexed_instanced(
        &mut self,
        _cid: u32,
        _cmd: &dx::CmdDxDrawIndexedInstanced,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_draw_auto(&mut self, _cid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_input_layout(&mut self, _cid: u32, _element_layout_id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_vertex_buffers(
        &mut self,
        _cid: u32,
        _start: u32,
        _buffers: &[dx::VertexBufferBinding],
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_index_buffer(&mut self, _cid: u32, _sid: u32, _format: u32, _offset: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_topology(&mut self, _cid: u32, _topology: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_render_targets(
        &mut self,
        _cid: u32,
        _depth_stencil_view_id: u32,
        _rt_view_ids: &[u32],
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_blend_state(
        &mut self,
        _cid: u32,
        _blend_id: u32,
        _blend_factor: [f32; 4],
        _sample_mask: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_depth_stencil_state(&mut self, _cid: u32, _id: u32, _stencil_ref: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_rasterizer_state(&mut self, _cid: u32, _id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_define_query(&mut self, _cid: u32, _query_id: u32, _entry: &QueryEntry) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_query(&mut self, _cid: u32, _query_id: u32) {}

    fn dx_begin_query(&mut self, _cid: u32, _query_id: u32) -> Result<()> {
        Ok(())
    }

    /// Returns the query payload, written to the guest after the state
    /// dword. Must be implemented: the guest observes these bytes.
    fn dx_end_query(&mut self, cid: u32, query_id: u32) -> Result<Vec<u8>>;

    fn dx_set_predication(&mut self, _cid: u32, _query_id: u32, _value: u32) -> Result<()> {
        Ok(())
    }

    fn dx_set_so_targets(&mut self, _cid: u32, _targets: &[dx::SoTarget]) -> Result<()> {
        Ok(())
    }

    fn dx_set_viewports(&mut self, _cid: u32, _viewports: &[dx::Viewport]) -> Result<()> {
        Ok(())
    }

    fn dx_set_scissor_rects(&mut self, _cid: u32, _rects: &[SignedRect]) -> Result<()> {
        Ok(())
    }

    fn dx_clear_render_target_view(
        &mut self,
        _cid: u32,
        _view_id: u32,
        _rgba: [f32; 4],
    ) -> Result<()> {
        Ok(())
    }

    fn dx_clear_depth_stencil_view(
        &mut self,
        _cid: u32,
        _view_id: u32,
        _flags: u16,
        _depth: f32,
        _stencil: u16,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_pred_copy_region(
        &mut self,
        _cid: u32,
        _dst_sid: u32,
        _dst_subresource: u32,
        _src_sid: u32,
        _src_subresource: u32,
        _bounds: CopyBox,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_pred_copy(&mut self, _cid: u32, _dst_sid: u32, _src_sid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_present_blt(&mut self, _cid: u32, _cmd: &dx::CmdDxPresentBlt) -> Result<()> {
        Ok(())
    }

    fn dx_genmips(&mut self, _cid: u32, _view_id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_define_view(&mut self, _cid: u32, _ty: CoTableType, _view_id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_view(&mut self, _cid: u32, _ty: CoTableType, _view_id: u32) {}

    fn dx_define_state_object(&mut self, _cid: u32, _ty: CoTableType, _id: u32) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_state_object(&mut self, _cid: u32, _ty: CoTableType, _id: u32) {}

    fn dx_define_shader(&mut self, _cid: u32, _shader_id: u32, _shader_type: u32) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_shader(&mut self, _cid: u32, _shader_id: u32) {}

    /// Shader bytecode became available in guest memory.
    fn dx_bind_shader(&mut self, _cid: u32, _shader_id: u32, _bytecode: &[u8]) -> Result<()> {
        Ok(())
    }

    fn dx_define_stream_output(&mut self, _cid: u32, _soid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_destroy_stream_output(&mut self, _cid: u32, _soid: u32) {}

    fn dx_set_stream_output(&mut self, _cid: u32, _soid: u32) -> Result<()> {
        Ok(())
    }

    fn dx_buffer_copy(
        &mut self,
        _cid: u32,
        _dst_sid: u32,
        _src_sid: u32,
        _dst_x: u32,
        _src_x: u32,
        _width: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_buffer_update(&mut self, _cid: u32, _sid: u32, _x: u32, _width: u32) -> Result<()> {
        Ok(())
    }

    fn dx_transfer_from_buffer(
        &mut self,
        _cid: u32,
        _cmd: &dx::CmdDxTransferFromBuffer,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_surface_copy_and_readback(
        &mut self,
        _cid: u32,
        _src_sid: u32,
        _dst_sid: u32,
        _bounds: CopyBox,
    ) -> Result<()> {
        Ok(())
    }

    fn dx_set_ua_views(&mut self, _cid: u32, _splice_index: u32, _view_ids: &[u32]) -> Result<()> {
        Ok(())
    }

    fn dx_clear_ua_view_uint(&mut self, _cid: u32, _view_id: u32, _value: [u32; 4]) -> Result<()> {
        Ok(())
    }

    fn dx_clear_ua_view_float(&mut self, _cid: u32, _view_id: u32, _value: [f32; 4]) -> Result<()> {
        Ok(())
    }

    fn dx_set_constant_buffer_offset(
        &mut self,
        _cid: u32,
        _shader_type: u32,
        _slot: u32,
        _offset: u32,
    ) -> Result<()> {
        Ok(())
    }
}

/// Display frontend notifications.
pub trait DisplayCallbacks {
    fn pointer_shape_changed(&mut self, _shape: &CursorShape) {}

    fn pointer_moved(&mut self, _x: u32, _y: u32) {}

    fn pointer_visibility(&mut self, _visible: bool) {}

    fn screen_update(&mut self, _screen_id: u32, _x: u32, _y: u32, _w: u32, _h: u32) {}

    fn change_mode(&mut self) {}
}

/// The pluggable interface bundle held by the command processor.
#[derive(Default)]
pub struct Backends {
    pub three_d: Option<Box<dyn Backend3d>>,
    pub vgpu9: Option<Box<dyn BackendVgpu9>>,
    pub map: Option<Box<dyn BackendMap>>,
    pub gbo: Option<Box<dyn BackendGbo>>,
    pub dx: Option<Box<dyn BackendDx>>,
    pub display: Option<Box<dyn DisplayCallbacks>>,
}

impl Backends {
    pub fn three_d(&mut self) -> Result<&mut dyn Backend3d> {
        match self.three_d.as_mut() {
            Some(b) => Ok(&mut **b),
            None => Err(SvgaError::NotSupported),
        }
    }

    pub fn vgpu9(&mut self) -> Result<&mut dyn BackendVgpu9> {
        match self.vgpu9.as_mut() {
            Some(b) => Ok(&mut **b),
            None => Err(SvgaError::NotSupported),
        }
    }

    pub fn map(&mut self) -> Result<&mut dyn BackendMap> {
        match self.map.as_mut() {
            Some(b) => Ok(&mut **b),
            None => Err(SvgaError::NotSupported),
        }
    }

    pub fn gbo(&mut self) -> Result<&mut dyn BackendGbo> {
        match self.gbo.as_mut() {
            Some(b) => Ok(&mut **b),
            None => Err(SvgaError::NotSupported),
        }
    }

    pub fn dx(&mut self) -> Result<&mut dyn BackendDx> {
        match self.dx.as_mut() {
            Some(b) => Ok(&mut **b),
            None => Err(SvgaError::NotSupported),
        }
    }
}
