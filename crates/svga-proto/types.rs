//! Shared wire-level scalar types, sentinels and geometry structs.

use bytemuck::{Pod, Zeroable};

/// The universal "no object" id. Guests use it to unbind, the device uses it
/// to mark free catalog slots.
pub const INVALID_ID: u32 = 0xFFFF_FFFF;

/// `GuestPtr::gmr_id` value addressing the legacy VRAM framebuffer instead
/// of a guest memory region.
pub const GMR_FRAMEBUFFER: u32 = 0xFFFF_FFFE;

/// Guest page geometry. The device protocol is defined in terms of 4 KiB
/// pages regardless of host configuration.
pub const PAGE_SIZE: u32 = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Guest physical addresses are masked with this before use; certain guest
/// drivers emit garbage in the top bits of page numbers.
pub const GPA_MASK: u64 = 0x0000_0FFF_FFFF_FFFF;

/// Hard limit on a single guest-backed object.
pub const MOB_MAX_SIZE: u32 = 128 * 1024 * 1024;

/// Hard limit on the total byte size of one surface (all mips, all slices).
pub const SURFACE_MAX_BYTES: u32 = 0x8000_0000;

pub const MAX_SURFACE_IDS: u32 = 1 << 20;
pub const MAX_CONTEXT_IDS: u32 = 256;
pub const MAX_DX_CONTEXT_IDS: u32 = 256;
pub const MAX_MIP_LEVELS: u32 = 16;
pub const MAX_SURFACE_FACES: u32 = 6;
pub const MAX_SURFACE_ARRAYSIZE: u32 = 16;
pub const MAX_RENDER_TARGETS: u32 = 8;
pub const MAX_SCREENS: u32 = 64;
pub const MAX_CURSOR_DIM: u32 = 2048;

/// Page-table layout of a guest-backed object, as carried by the
/// `DEFINE_GB_MOB`/`SET_OTABLE_BASE` family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MobFormat {
    /// 32-bit PPN entries.
    PtDepth0,
    PtDepth1,
    PtDepth2,
    /// Single contiguous run, no page table at all.
    Range,
    /// 64-bit PPN entries.
    Pt64Depth0,
    Pt64Depth1,
    Pt64Depth2,
}

impl MobFormat {
    pub fn from_wire(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::PtDepth0,
            1 => Self::PtDepth1,
            2 => Self::PtDepth2,
            3 => Self::Range,
            4 => Self::Pt64Depth0,
            5 => Self::Pt64Depth1,
            6 => Self::Pt64Depth2,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Self::PtDepth0 => 0,
            Self::PtDepth1 => 1,
            Self::PtDepth2 => 2,
            Self::Range => 3,
            Self::Pt64Depth0 => 4,
            Self::Pt64Depth1 => 5,
            Self::Pt64Depth2 => 6,
        }
    }
}

/// Direction of a `SURFACE_DMA` transfer, from the host's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferType {
    /// Guest memory -> host surface.
    WriteHostVram,
    /// Host surface -> guest memory.
    ReadHostVram,
}

impl TransferType {
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::WriteHostVram),
            2 => Some(Self::ReadHostVram),
            _ => None,
        }
    }
}

/// Guest-visible query completion state, written into the query result
/// buffer ahead of the payload.
pub const QUERY_STATE_NEW: u32 = 0;
pub const QUERY_STATE_PENDING: u32 = 1;
pub const QUERY_STATE_SUCCEEDED: u32 = 2;
pub const QUERY_STATE_FAILED: u32 = 3;

/// Device-side query descriptor state (COTable `QueryEntry::state`).
pub const QDSTATE_INVALID: u32 = 0;
pub const QDSTATE_IDLE: u32 = 1;
pub const QDSTATE_ACTIVE: u32 = 2;
pub const QDSTATE_PENDING: u32 = 3;
pub const QDSTATE_FINISHED: u32 = 4;

pub const QUERY_TYPE_OCCLUSION: u32 = 0;
pub const QUERY_TYPE_MIN: u32 = 0;
pub const QUERY_TYPE_MAX: u32 = 15;

/// Mip-0 extent of a surface, or the extent of one mip level.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Size3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Size3d {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// Extent of mip level `level`, halving each dimension and clamping at 1.
    pub fn mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}

/// An axis-aligned box in surface coordinates.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Box3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub w: u32,
    pub h: u32,
    pub d: u32,
}

impl Box3d {
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0 || self.d == 0
    }

    /// Clips the box against `bounds` (an extent rooted at the origin).
    /// Out-of-range origins collapse the box to zero size.
    pub fn clip(&mut self, bounds: &Size3d) {
        if self.x >= bounds.width || self.y >= bounds.height || self.z >= bounds.depth {
            self.w = 0;
            self.h = 0;
            self.d = 0;
            return;
        }
        self.w = self.w.min(bounds.width - self.x);
        self.h = self.h.min(bounds.height - self.y);
        self.d = self.d.min(bounds.depth - self.z);
    }
}

/// A copy box: destination origin + extent + source origin.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CopyBox {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub w: u32,
    pub h: u32,
    pub d: u32,
    pub srcx: u32,
    pub srcy: u32,
    pub srcz: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SignedRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SignedPoint {
    pub x: i32,
    pub y: i32,
}

/// A reference into legacy guest memory: a GMR id plus a byte offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GuestPtr {
    pub gmr_id: u32,
    pub offset: u32,
}

/// A `GuestPtr` plus the row pitch of the image it addresses. Pitch 0 means
/// "tightly packed".
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GuestImage {
    pub ptr: GuestPtr,
    pub pitch: u32,
}

/// One subresource of a surface: `(sid, face/array slice, mip level)`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SurfaceImageId {
    pub sid: u32,
    pub face: u32,
    pub mipmap: u32,
}

/// Subresource index used by mip-level storage and the DX subresource
/// commands: mips of slice 0 first, then slice 1, ...
pub fn calc_subresource(mip: u32, array_slice: u32, num_mip_levels: u32) -> u32 {
    mip + array_slice * num_mip_levels
}
