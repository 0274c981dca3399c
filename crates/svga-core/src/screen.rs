//! Screen objects: one per virtual monitor, for both the legacy
//! `DEFINE_SCREEN` path and guest-backed screen targets.

use svga_proto::types::{GuestPtr, SurfaceImageId, INVALID_ID, MAX_SCREENS};
use tracing::debug;

use crate::error::{guest_assert, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenBacking {
    /// Pixels live in VRAM / a GMR at `ptr` with `pitch` bytes per line.
    Guest { ptr: GuestPtr, pitch: u32 },
    /// Pixels live in a screen-target surface.
    Surface { image: SurfaceImageId },
    /// Declared but not yet given storage.
    None,
}

pub struct Screen {
    pub id: u32,
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    pub x_root: i32,
    pub y_root: i32,
    pub dpi: u32,
    pub backing: ScreenBacking,
    /// GB screen targets only: defined via the 3D command set.
    pub is_screen_target: bool,
}

#[derive(Default)]
pub struct ScreenRegistry {
    screens: Vec<Option<Screen>>,
}

impl ScreenRegistry {
    pub fn define(&mut self, screen: Screen) -> Result<()> {
        guest_assert!(screen.id < MAX_SCREENS);
        let idx = screen.id as usize;
        if self.screens.len() <= idx {
            self.screens.resize_with(idx + 1, || None);
        }
        debug!(id = screen.id, w = screen.width, h = screen.height, "screen defined");
        self.screens[idx] = Some(screen);
        Ok(())
    }

    pub fn destroy(&mut self, id: u32) -> Option<Screen> {
        self.screens.get_mut(id as usize).and_then(|s| s.take())
    }

    pub fn get(&self, id: u32) -> Result<&Screen> {
        guest_assert!(id != INVALID_ID);
        self.screens
            .get(id as usize)
            .and_then(|s| s.as_ref())
            .ok_or(crate::error::SvgaError::InvalidParameter)
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut Screen> {
        guest_assert!(id != INVALID_ID);
        self.screens
            .get_mut(id as usize)
            .and_then(|s| s.as_mut())
            .ok_or(crate::error::SvgaError::InvalidParameter)
    }

    pub fn clear(&mut self) {
        self.screens.clear();
    }
}
