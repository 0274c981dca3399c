//! Wire protocol of the SVGA-compatible paravirtual GPU device.
//!
//! Everything in this crate mirrors the guest-visible binary layouts: FIFO
//! command ids, packed little-endian command structs, object-table entry
//! formats and the surface format repertoire. Nothing here validates guest
//! input beyond shape; that is the command processor's job.

pub mod cmd;
pub mod cotable;
pub mod dx;
pub mod fifo;
pub mod format;
pub mod otable;
pub mod types;

use bytemuck::Pod;

/// Reads one `T` from the front of `bytes`, returning the struct and the
/// remainder. `None` if the slice is too short. The copy is unaligned-safe;
/// FIFO payloads carry no alignment guarantee beyond 4 bytes.
pub fn read_pod<T: Pod>(bytes: &[u8]) -> Option<(T, &[u8])> {
    let size = core::mem::size_of::<T>();
    if bytes.len() < size {
        return None;
    }
    let (head, rest) = bytes.split_at(size);
    Some((bytemuck::pod_read_unaligned(head), rest))
}

/// Interprets `bytes` as a trailing array of `T`, ignoring any ragged tail
/// (the device derives element counts from the command size and guests are
/// allowed to over-pad).
pub fn read_pod_array<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let size = core::mem::size_of::<T>();
    if size == 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Serializes one `T` into its little-endian wire bytes.
pub fn pod_bytes<T: Pod>(value: &T) -> &[u8] {
    bytemuck::bytes_of(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size3d;

    #[test]
    fn read_pod_rejects_short_buffers() {
        let bytes = [0u8; 8];
        assert!(read_pod::<Size3d>(&bytes).is_none());
    }

    #[test]
    fn read_pod_array_ignores_ragged_tail() {
        // Two u32 elements plus 3 stray bytes.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(read_pod_array::<u32>(&bytes), vec![7, 9]);
    }
}
