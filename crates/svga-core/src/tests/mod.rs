mod cursor;
mod dispatch;
mod dx;
mod gbo;
mod mob_otable;
mod surface;

use std::cell::RefCell;
use std::rc::Rc;

use bytemuck::Pod;
use svga_mem::VecGuestMemory;
use svga_proto::cmd;
use svga_proto::cotable::CoTableType;
use svga_proto::types::{CopyBox, SurfaceImageId};

use crate::backend::{Backend3d, BackendDx, BackendVgpu9, Backends};
use crate::error::Result;
use crate::processor::SvgaCommandProcessor;
use crate::surface::Surface;

pub const GUEST_MEM_BYTES: usize = 8 * 1024 * 1024;
pub const VRAM_BYTES: usize = 1024 * 1024;

/// Page numbers of the device object tables in the test address space.
pub const OTABLE_MOB_PPN: u64 = 0x10;
pub const OTABLE_SURFACE_PPN: u64 = 0x11;
pub const OTABLE_DXCONTEXT_PPN: u64 = 0x12;
pub const OTABLE_CONTEXT_PPN: u64 = 0x13;
pub const OTABLE_SCREENTARGET_PPN: u64 = 0x14;
pub const OTABLE_SHADER_PPN: u64 = 0x15;

/// Everything the recording backend observed, shared with the test body.
#[derive(Default)]
pub struct Recorded {
    pub copy_boxes: Vec<CopyBox>,
    pub copied: Vec<(SurfaceImageId, SurfaceImageId)>,
    pub destroyed_surfaces: Vec<u32>,
    pub dx_draws: u32,
    pub pred_copy_regions: Vec<CopyBox>,
    pub occlusion_samples: u32,
    pub dx_query_payload: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct Recorder(pub Rc<RefCell<Recorded>>);

pub struct RecordingBackend3d(pub Recorder);

impl Backend3d for RecordingBackend3d {
    fn create_texture(&mut self, _cid: u32, surface: &mut Surface) -> Result<()> {
        surface.backend_handle = Some(Box::new(()));
        Ok(())
    }

    fn surface_destroy(&mut self, sid: u32) {
        self.0 .0.borrow_mut().destroyed_surfaces.push(sid);
    }

    fn surface_copy(
        &mut self,
        dst: SurfaceImageId,
        src: SurfaceImageId,
        boxes: &[CopyBox],
    ) -> Result<()> {
        let mut rec = self.0 .0.borrow_mut();
        rec.copied.push((src, dst));
        rec.copy_boxes.extend_from_slice(boxes);
        Ok(())
    }
}

pub struct RecordingBackendVgpu9(pub Recorder);

impl BackendVgpu9 for RecordingBackendVgpu9 {
    fn occlusion_query_end(&mut self, _cid: u32) -> Result<u32> {
        Ok(self.0 .0.borrow().occlusion_samples)
    }
}

pub struct RecordingBackendDx(pub Recorder);

impl BackendDx for RecordingBackendDx {
    fn dx_draw(&mut self, _cid: u32, _cmd: &svga_proto::dx::CmdDxDraw) -> Result<()> {
        self.0 .0.borrow_mut().dx_draws += 1;
        Ok(())
    }

    fn dx_pred_copy_region(
        &mut self,
        _cid: u32,
        _dst_sid: u32,
        _dst_subresource: u32,
        _src_sid: u32,
        _src_subresource: u32,
        bounds: CopyBox,
    ) -> Result<()> {
        self.0 .0.borrow_mut().pred_copy_regions.push(bounds);
        Ok(())
    }

    fn dx_end_query(&mut self, _cid: u32, _query_id: u32) -> Result<Vec<u8>> {
        Ok(self.0 .0.borrow().dx_query_payload.clone())
    }
}

pub struct Fixture {
    pub proc: SvgaCommandProcessor<VecGuestMemory>,
    pub rec: Recorder,
}

pub fn fixture() -> Fixture {
    let rec = Recorder::default();
    let mem = VecGuestMemory::new(GUEST_MEM_BYTES);
    let backends = Backends {
        three_d: Some(Box::new(RecordingBackend3d(rec.clone()))),
        vgpu9: Some(Box::new(RecordingBackendVgpu9(rec.clone()))),
        dx: Some(Box::new(RecordingBackendDx(rec.clone()))),
        map: None,
        gbo: None,
        display: None,
    };
    let proc = SvgaCommandProcessor::with_backends(mem, VRAM_BYTES, backends);
    Fixture { proc, rec }
}

/// Serializes a command struct plus an optional trailing array.
pub fn payload<T: Pod>(header: &T) -> Vec<u8> {
    bytemuck::bytes_of(header).to_vec()
}

pub fn payload_with<T: Pod, E: Pod>(header: &T, trailing: &[E]) -> Vec<u8> {
    let mut out = bytemuck::bytes_of(header).to_vec();
    for e in trailing {
        out.extend_from_slice(bytemuck::bytes_of(e));
    }
    out
}

impl Fixture {
    /// Installs one single-page object table backed by a contiguous range.
    pub fn set_otable(&mut self, table_type: u32, ppn: u64) {
        let c = cmd::CmdSetOTableBase64 {
            table_type,
            base_address: ppn,
            size_in_bytes: 4096,
            valid_size_in_bytes: 0,
            pt_depth: svga_proto::types::MobFormat::Range.to_wire(),
        };
        self.proc
            .process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &payload(&c))
            .expect("otable setup must succeed");
    }

    pub fn set_all_otables(&mut self) {
        self.set_otable(0, OTABLE_MOB_PPN);
        self.set_otable(1, OTABLE_SURFACE_PPN);
        self.set_otable(2, OTABLE_CONTEXT_PPN);
        self.set_otable(3, OTABLE_SHADER_PPN);
        self.set_otable(4, OTABLE_SCREENTARGET_PPN);
        self.set_otable(5, OTABLE_DXCONTEXT_PPN);
    }

    /// Defines a RANGE-backed MOB of `num_pages` pages rooted at `ppn`.
    pub fn define_mob(&mut self, mobid: u32, ppn: u64, num_pages: u32) {
        let c = cmd::CmdDefineGbMob64 {
            mobid,
            pt_depth: svga_proto::types::MobFormat::Range.to_wire(),
            base: ppn,
            size_in_bytes: num_pages * 4096,
        };
        self.proc
            .process_3d_cmd(0, cmd::DEFINE_GB_MOB64, &payload(&c))
            .expect("mob define must succeed");
    }

    pub fn define_dx_context(&mut self, cid: u32) {
        let c = svga_proto::dx::CmdDxDefineContext { cid };
        self.proc
            .process_3d_cmd(0, cmd::DX_DEFINE_CONTEXT, &payload(&c))
            .expect("dx context define must succeed");
    }

    /// Binds a MOB as the COTable of `ty` for context `cid`.
    pub fn set_cotable(&mut self, cid: u32, ty: CoTableType, mobid: u32, valid_bytes: u32) {
        let c = svga_proto::dx::CmdDxSetCoTable {
            cid,
            mobid,
            cotable_type: ty.index() as u32,
            valid_size_in_bytes: valid_bytes,
        };
        self.proc
            .process_3d_cmd(cid, cmd::DX_SET_COTABLE, &payload(&c))
            .expect("cotable bind must succeed");
    }

    /// Defines a 2D RGBA8 guest-backed surface with one mip level.
    pub fn define_gb_surface_2d(&mut self, sid: u32, width: u32, height: u32) {
        let c = cmd::CmdDefineGbSurface {
            sid,
            surface_flags: 0,
            format: svga_proto::format::SurfaceFormat::R8G8B8A8Unorm.to_wire(),
            num_mip_levels: 1,
            multisample_count: 0,
            autogen_filter: 0,
            size: svga_proto::types::Size3d::new(width, height, 1),
        };
        self.proc
            .process_3d_cmd(0, cmd::DEFINE_GB_SURFACE, &payload(&c))
            .expect("gb surface define must succeed");
    }
}
