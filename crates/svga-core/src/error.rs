//! Error kinds and guest-input validation helpers.

use thiserror::Error;

/// Result codes surfaced by every core entry point. The top-level dispatcher
/// logs and swallows these; handlers return them for tests and debugging.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SvgaError {
    /// A guest-supplied argument failed validation.
    #[error("invalid parameter")]
    InvalidParameter,
    /// Operation against uninitialized or mismatched device state.
    #[error("invalid state")]
    InvalidState,
    /// Host allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// Known command or feature with no implementation behind it.
    #[error("not implemented")]
    NotImplemented,
    /// The backend interface needed by this command is absent.
    #[error("not supported")]
    NotSupported,
    /// Core invariant violation; never guest-triggerable by design.
    #[error("internal error")]
    InternalError,
}

pub type Result<T> = core::result::Result<T, SvgaError>;

impl From<svga_mem::MemError> for SvgaError {
    fn from(_: svga_mem::MemError) -> Self {
        // A guest pointer walked off the address space; the guest supplied it.
        SvgaError::InvalidParameter
    }
}

/// Validates a condition derived from guest input. On failure returns
/// `InvalidParameter`; on success issues a compiler fence so speculation
/// cannot sail past the bounds check into the indexing that follows.
macro_rules! guest_assert {
    ($cond:expr) => {
        if $cond {
            core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        } else {
            tracing::debug!(check = stringify!($cond), "guest argument rejected");
            return Err($crate::error::SvgaError::InvalidParameter);
        }
    };
    ($cond:expr, $err:expr) => {
        if $cond {
            core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        } else {
            tracing::debug!(check = stringify!($cond), "guest argument rejected");
            return Err($err);
        }
    };
}

pub(crate) use guest_assert;
