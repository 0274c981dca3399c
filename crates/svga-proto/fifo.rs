//! Legacy 2D FIFO commands.
//!
//! These ids live in the low command-id range and are dispatched by the FIFO
//! loop before 3D command processing. Each struct is the fixed header of the
//! payload; variable data (cursor masks, blit rects, GMR page lists) trails
//! the header.

use bytemuck::{Pod, Zeroable};

use crate::types::{GuestPtr, SignedPoint, SignedRect};

pub const CMD_INVALID: u32 = 0;
pub const CMD_UPDATE: u32 = 1;
pub const CMD_RECT_FILL: u32 = 2;
pub const CMD_RECT_COPY: u32 = 3;
pub const CMD_RECT_ROP_COPY: u32 = 14;
pub const CMD_DEFINE_CURSOR: u32 = 19;
pub const CMD_DISPLAY_CURSOR: u32 = 20;
pub const CMD_MOVE_CURSOR: u32 = 21;
pub const CMD_DEFINE_ALPHA_CURSOR: u32 = 22;
pub const CMD_UPDATE_VERBOSE: u32 = 25;
pub const CMD_FRONT_ROP_FILL: u32 = 29;
pub const CMD_FENCE: u32 = 30;
pub const CMD_ESCAPE: u32 = 33;
pub const CMD_DEFINE_SCREEN: u32 = 34;
pub const CMD_DESTROY_SCREEN: u32 = 35;
pub const CMD_DEFINE_GMRFB: u32 = 36;
pub const CMD_BLIT_GMRFB_TO_SCREEN: u32 = 37;
pub const CMD_BLIT_SCREEN_TO_GMRFB: u32 = 38;
pub const CMD_ANNOTATION_FILL: u32 = 39;
pub const CMD_ANNOTATION_COPY: u32 = 40;
pub const CMD_DEFINE_GMR2: u32 = 41;
pub const CMD_REMAP_GMR2: u32 = 42;
pub const CMD_MAX: u32 = 47;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdUpdate {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdRectCopy {
    pub src_x: u32,
    pub src_y: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Followed by the AND mask, then the XOR mask. Both masks store scanlines
/// dword-aligned at their respective depths.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDefineCursor {
    pub id: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub width: u32,
    pub height: u32,
    pub and_mask_depth: u32,
    pub xor_mask_depth: u32,
}

/// Followed by `width * height` ARGB32 pixels.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDefineAlphaCursor {
    pub id: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdMoveCursor {
    pub x: u32,
    pub y: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDisplayCursor {
    pub id: u32,
    pub state: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdFence {
    pub fence: u32,
}

/// Followed by `size` bytes of namespace-specific data.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdEscape {
    pub nsid: u32,
    pub size: u32,
}

pub const ESCAPE_NSID_VMWARE: u32 = 0x0000_0001;

pub const SCREEN_MUST_BE_SET: u32 = 1 << 0;
pub const SCREEN_HAS_ROOT: u32 = 1 << 1;
pub const SCREEN_IS_PRIMARY: u32 = 1 << 2;
pub const SCREEN_FULLSCREEN_HINT: u32 = 1 << 3;
pub const SCREEN_DEACTIVATE: u32 = 1 << 4;
pub const SCREEN_BLANKING: u32 = 1 << 5;

/// `SVGAScreenObject`: the screen descriptor embedded in `DEFINE_SCREEN`.
/// `structSize` lets newer guests append fields.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ScreenObject {
    pub struct_size: u32,
    pub id: u32,
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    pub root_x: i32,
    pub root_y: i32,
    // Fields below are present only if struct_size covers them.
    pub backing_ptr: GuestPtr,
    pub backing_pitch: u32,
    pub clone_count: u32,
}

/// Size of the mandatory `ScreenObject` prefix (through `root_y`).
pub const SCREEN_OBJECT_BASE_SIZE: u32 = 28;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDestroyScreen {
    pub screen_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDefineGmrFb {
    pub ptr: GuestPtr,
    pub bytes_per_line: u32,
    /// Low byte: bits per pixel; next byte: color depth.
    pub format: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdBlitGmrFbToScreen {
    pub src_origin: SignedPoint,
    pub dest_rect: SignedRect,
    pub dest_screen_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdBlitScreenToGmrFb {
    pub dest_origin: SignedPoint,
    pub src_rect: SignedRect,
    pub src_screen_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdDefineGmr2 {
    pub gmr_id: u32,
    pub num_pages: u32,
}

/// Followed by either a page list (PPN32 or PPN64 per `flags`) or, with
/// `REMAP_GMR2_SINGLE_PPN`, exactly one PPN replicated over the range.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CmdRemapGmr2 {
    pub gmr_id: u32,
    pub flags: u32,
    pub offset_pages: u32,
    pub num_pages: u32,
}

pub const REMAP_GMR2_PPN32: u32 = 0;
pub const REMAP_GMR2_VIA_GMR: u32 = 1 << 0;
pub const REMAP_GMR2_PPN64: u32 = 1 << 1;
pub const REMAP_GMR2_SINGLE_PPN: u32 = 1 << 2;

/// Upper bound on pages in one GMR, matching the device's advertised
/// `GMR_MAX_DESCRIPTOR_LENGTH`.
pub const GMR_MAX_PAGES: u32 = 1024 * 1024;
