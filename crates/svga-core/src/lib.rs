//! Command processor core of an SVGA-compatible paravirtual 3D GPU.
//!
//! The guest submits a stream of binary commands; this crate parses and
//! validates them against adversarial input, translates guest-physical page
//! tables into bounded host accesses, keeps the object catalogs (surfaces,
//! contexts, MOBs, object tables) coherent, and forwards the rendering work
//! to a pluggable backend.
//!
//! Safety stance: every field that originates from the guest is untrusted.
//! No host out-of-bounds access may result from any command sequence,
//! however malformed.

pub mod backend;
pub mod context;
pub mod cursor;
pub mod dx;
pub mod error;
pub mod gbo;
pub mod gmr;
pub mod mob;
pub mod otable;
pub mod processor;
pub mod screen;
pub mod surface;

mod cmd3d;
mod cmd_dx;

pub use backend::{Backend3d, BackendDx, BackendGbo, BackendMap, BackendVgpu9, Backends, DisplayCallbacks};
pub use error::{Result, SvgaError};
pub use processor::{CommandStats, SvgaCommandProcessor};

#[cfg(test)]
mod tests;
