use pretty_assertions::assert_eq;

use crate::cursor::{convert_alpha_cursor, convert_cursor, dst_and_line_bytes, src_line_bytes};
use crate::error::SvgaError;

const PALETTE: [u32; 256] = [0; 256];

#[test]
fn scanline_geometry() {
    // Source scanlines are dword-aligned at their depth; 15bpp occupies 16
    // bits per pixel.
    assert_eq!(src_line_bytes(2, 1), 4);
    assert_eq!(src_line_bytes(33, 1), 8);
    assert_eq!(src_line_bytes(3, 15), 8);
    assert_eq!(src_line_bytes(3, 16), 8);
    assert_eq!(src_line_bytes(2, 32), 8);
    // Destination AND rows are byte-aligned.
    assert_eq!(dst_and_line_bytes(2), 1);
    assert_eq!(dst_and_line_bytes(9), 2);
}

#[test]
fn mono_and_argb_masks_normalize() {
    // 2x2 cursor: AND mask rows 0b10000000 / 0b01000000 (dword-padded),
    // XOR mask four opaque white ARGB pixels.
    let mut masks = Vec::new();
    masks.extend_from_slice(&[0x80, 0, 0, 0]); // AND row 0
    masks.extend_from_slice(&[0x40, 0, 0, 0]); // AND row 1
    for _ in 0..4 {
        masks.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes()); // XOR pixels
    }

    let shape = convert_cursor(2, 2, 0, 0, 1, 32, &masks, &PALETTE).unwrap();
    assert!(!shape.has_alpha);

    // AND mask: one byte per row, padded to a dword as a whole.
    assert_eq!(&shape.data[..2], &[0b1000_0000, 0b0100_0000]);
    // XOR mask: BGRX pixels with the alpha byte stripped.
    let xor = &shape.data[4..];
    for px in xor.chunks_exact(4) {
        assert_eq!(px, &0x00FF_FFFFu32.to_le_bytes());
    }
}

#[test]
fn rgb565_xor_mask_expands_channels() {
    // 1x1 cursor, AND depth 1 (row 0x00), XOR depth 16.
    let mut masks = Vec::new();
    masks.extend_from_slice(&[0, 0, 0, 0]); // AND row
    // R=31, G=0, B=0 in 5-6-5: 0xF800.
    masks.extend_from_slice(&0xF800u16.to_le_bytes());
    masks.extend_from_slice(&[0, 0]); // row padding to a dword

    let shape = convert_cursor(1, 1, 0, 0, 1, 16, &masks, &PALETTE).unwrap();
    let xor = &shape.data[4..8];
    assert_eq!(xor, &0x00F8_0000u32.to_le_bytes());
}

#[test]
fn palette_cursor_looks_up_device_palette() {
    let mut palette = [0u32; 256];
    palette[7] = 0x0012_3456;

    // 1x1 cursor, 8bpp AND and XOR referencing palette index 7.
    let mut masks = Vec::new();
    masks.extend_from_slice(&[7, 0, 0, 0]); // AND row (dark entry: stays opaque)
    masks.extend_from_slice(&[7, 0, 0, 0]); // XOR row

    let shape = convert_cursor(1, 1, 0, 0, 8, 8, &masks, &palette).unwrap();
    assert_eq!(shape.data[0], 0); // not nearly-white -> opaque
    assert_eq!(&shape.data[4..8], &0x0012_3456u32.to_le_bytes());
}

#[test]
fn rgb555_xor_mask_expands_channels() {
    // 1x1 cursor, XOR depth 15: R=31, G=0, B=31 -> 0x7C1F.
    let mut masks = Vec::new();
    masks.extend_from_slice(&[0, 0, 0, 0]); // AND row at 1bpp
    masks.extend_from_slice(&0x7C1Fu16.to_le_bytes());
    masks.extend_from_slice(&[0, 0]); // row padding to a dword

    let shape = convert_cursor(1, 1, 0, 0, 1, 15, &masks, &PALETTE).unwrap();
    assert_eq!(&shape.data[4..8], &0x00F8_00F8u32.to_le_bytes());
}

#[test]
fn bgr24_xor_mask_keeps_byte_order_and_drops_alpha() {
    // 1x1 cursor, XOR depth 24: bytes are B, G, R in the source.
    let mut masks = Vec::new();
    masks.extend_from_slice(&[0, 0, 0, 0]); // AND row at 1bpp
    masks.extend_from_slice(&[0x10, 0x20, 0x30, 0]); // B G R + row pad

    let shape = convert_cursor(1, 1, 0, 0, 1, 24, &masks, &PALETTE).unwrap();
    assert_eq!(&shape.data[4..8], &0x0030_2010u32.to_le_bytes());
}

#[test]
fn nearly_white_pixels_become_transparent_in_and_mask() {
    // 8x1 cursor at 32bpp: pixel 0 is nearly white (all channels >= 0xFC),
    // the rest are dark.
    let mut masks = Vec::new();
    // 32bpp AND mask: 8 pixels * 4 bytes.
    masks.extend_from_slice(&[0xFC, 0xFC, 0xFC, 0x00]);
    for _ in 1..8 {
        masks.extend_from_slice(&[0x10, 0x10, 0x10, 0x00]);
    }
    // XOR mask, same depth.
    for _ in 0..8 {
        masks.extend_from_slice(&[0, 0, 0, 0]);
    }

    let shape = convert_cursor(8, 1, 0, 0, 32, 32, &masks, &PALETTE).unwrap();
    assert_eq!(shape.data[0], 0b1000_0000);
}

#[test]
fn oversized_or_bad_depth_cursors_are_rejected() {
    assert_eq!(
        convert_cursor(2048, 2, 0, 0, 1, 32, &[0; 16], &PALETTE).unwrap_err(),
        SvgaError::InvalidParameter
    );
    // Depth 7 is not a thing.
    let masks = [0u8; 4096];
    assert_eq!(
        convert_cursor(2, 2, 0, 0, 7, 32, &masks, &PALETTE).unwrap_err(),
        SvgaError::InvalidParameter
    );
    // Truncated masks.
    assert_eq!(
        convert_cursor(64, 64, 0, 0, 32, 32, &[0; 64], &PALETTE).unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn alpha_cursor_passes_pixels_through() {
    let pixels: Vec<u8> = (0..2 * 2 * 4u32).map(|v| v as u8).collect();
    let shape = convert_alpha_cursor(2, 2, 1, 1, &pixels).unwrap();
    assert!(shape.has_alpha);
    assert_eq!(shape.hotspot_x, 1);

    // Fully opaque synthesized AND mask, then the verbatim ARGB data.
    assert_eq!(&shape.data[..4], &[0xFF; 4]);
    assert_eq!(&shape.data[4..], &pixels[..]);
}
