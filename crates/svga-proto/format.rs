//! Surface formats and surface flags.

use bitflags::bitflags;

macro_rules! surface_formats {
    ($($name:ident = $val:literal),+ $(,)?) => {
        /// Surface format repertoire. Discriminants are the wire values;
        /// gaps are retired ids the device rejects.
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum SurfaceFormat {
            $($name = $val,)+
        }

        impl SurfaceFormat {
            pub fn from_wire(v: u32) -> Option<Self> {
                match v {
                    $($val => Some(Self::$name),)+
                    _ => None,
                }
            }
        }
    };
}

surface_formats! {
    X8R8G8B8 = 1,
    A8R8G8B8 = 2,
    R5G6B5 = 3,
    X1R5G5B5 = 4,
    A1R5G5B5 = 5,
    A4R4G4B4 = 6,
    ZD32 = 7,
    ZD16 = 8,
    ZD24S8 = 9,
    ZD15S1 = 10,
    Luminance8 = 11,
    Luminance4Alpha4 = 12,
    Luminance16 = 13,
    Luminance8Alpha8 = 14,
    Dxt1 = 15,
    Dxt2 = 16,
    Dxt3 = 17,
    Dxt4 = 18,
    Dxt5 = 19,
    BumpU8V8 = 20,
    BumpL6V5U5 = 21,
    BumpX8L8V8U8 = 22,
    ArgbS10E5 = 24,
    ArgbS23E8 = 25,
    A2R10G10B10 = 26,
    V8U8 = 27,
    Q8W8V8U8 = 28,
    CxV8U8 = 29,
    X8L8V8U8 = 30,
    A2W10V10U10 = 31,
    Alpha8 = 32,
    RS10E5 = 33,
    RS23E8 = 34,
    RgS10E5 = 35,
    RgS23E8 = 36,
    Buffer = 37,
    ZD24X8 = 38,
    V16U16 = 39,
    G16R16 = 40,
    A16B16G16R16 = 41,
    Uyvy = 42,
    Yuy2 = 43,
    Nv12 = 44,
    R32G32B32A32Typeless = 46,
    R32G32B32A32Uint = 47,
    R32G32B32A32Sint = 48,
    R32G32B32Typeless = 49,
    R32G32B32Float = 50,
    R32G32B32Uint = 51,
    R32G32B32Sint = 52,
    R16G16B16A16Typeless = 53,
    R16G16B16A16Uint = 54,
    R16G16B16A16Snorm = 55,
    R16G16B16A16Sint = 56,
    R32G32Typeless = 57,
    R32G32Uint = 58,
    R32G32Sint = 59,
    R32G8X24Typeless = 60,
    D32FloatS8X24Uint = 61,
    R32FloatX8X24 = 62,
    X32G8X24Uint = 63,
    R10G10B10A2Typeless = 64,
    R10G10B10A2Uint = 65,
    R11G11B10Float = 66,
    R8G8B8A8Typeless = 67,
    R8G8B8A8Unorm = 68,
    R8G8B8A8UnormSrgb = 69,
    R8G8B8A8Uint = 70,
    R8G8B8A8Sint = 71,
    R16G16Typeless = 72,
    R16G16Uint = 73,
    R16G16Sint = 74,
    R32Typeless = 75,
    D32Float = 76,
    R32Uint = 77,
    R32Sint = 78,
    R24G8Typeless = 79,
    D24UnormS8Uint = 80,
    R24UnormX8 = 81,
    X24G8Uint = 82,
    R8G8Typeless = 83,
    R8G8Unorm = 84,
    R8G8Uint = 85,
    R8G8Sint = 86,
    R16Typeless = 87,
    R16Unorm = 88,
    R16Uint = 89,
    R16Snorm = 90,
    R16Sint = 91,
    R8Typeless = 92,
    R8Unorm = 93,
    R8Uint = 94,
    R8Snorm = 95,
    R8Sint = 96,
    P8 = 97,
    R9G9B9E5SharedExp = 98,
    R8G8B8G8Unorm = 99,
    G8R8G8B8Unorm = 100,
    Bc1Typeless = 101,
    Bc1UnormSrgb = 102,
    Bc2Typeless = 103,
    Bc2UnormSrgb = 104,
    Bc3Typeless = 105,
    Bc3UnormSrgb = 106,
    Bc4Typeless = 107,
    Ati1 = 108,
    Bc4Snorm = 109,
    Bc5Typeless = 110,
    Ati2 = 111,
    Bc5Snorm = 112,
    R10G10B10XrBiasA2Unorm = 113,
    B8G8R8A8Typeless = 114,
    B8G8R8A8UnormSrgb = 115,
    B8G8R8X8Typeless = 116,
    B8G8R8X8UnormSrgb = 117,
    ZDf16 = 118,
    ZDf24 = 119,
    ZD24S8Int = 120,
    Yv12 = 121,
    R32G32B32A32Float = 122,
    R16G16B16A16Float = 123,
    R16G16B16A16Unorm = 124,
    R32G32Float = 125,
    R10G10B10A2Unorm = 126,
    R8G8B8A8Snorm = 127,
    R16G16Float = 128,
    R16G16Unorm = 129,
    R16G16Snorm = 130,
    R32Float = 131,
    R8G8Snorm = 132,
    R16Float = 133,
    D16Unorm = 134,
    A8Unorm = 135,
    Bc1Unorm = 136,
    Bc2Unorm = 137,
    Bc3Unorm = 138,
    B5G6R5Unorm = 139,
    B5G5R5A1Unorm = 140,
    B8G8R8A8Unorm = 141,
    B8G8R8X8Unorm = 142,
    Bc4Unorm = 143,
    Bc5Unorm = 144,
    Bc6hTypeless = 145,
    Bc6hUf16 = 146,
    Bc6hSf16 = 147,
    Bc7Typeless = 148,
    Bc7Unorm = 149,
    Bc7UnormSrgb = 150,
}

/// Byte size and pixel extent of one format block. Uncompressed formats are
/// 1x1 blocks; BC/DXT formats are 4x4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatBlock {
    pub bytes: u32,
    pub width: u32,
    pub height: u32,
}

impl FormatBlock {
    const fn pixel(bytes: u32) -> Self {
        Self { bytes, width: 1, height: 1 }
    }

    const fn bc(bytes: u32) -> Self {
        Self { bytes, width: 4, height: 4 }
    }
}

impl SurfaceFormat {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Block geometry used by the mip layout math.
    pub fn block(self) -> FormatBlock {
        use SurfaceFormat::*;
        match self {
            Luminance8 | Alpha8 | R8Typeless | R8Unorm | R8Uint | R8Snorm | R8Sint | P8
            | A8Unorm | Luminance4Alpha4 | BumpL6V5U5 | Buffer | CxV8U8 => FormatBlock::pixel(1),
            R5G6B5 | X1R5G5B5 | A1R5G5B5 | A4R4G4B4 | ZD16 | ZD15S1 | Luminance16
            | Luminance8Alpha8 | BumpU8V8 | V8U8 | RS10E5 | R16Typeless | R16Unorm | R16Uint
            | R16Snorm | R16Sint | R16Float | D16Unorm | R8G8Typeless | R8G8Unorm | R8G8Uint
            | R8G8Sint | R8G8Snorm | B5G6R5Unorm | B5G5R5A1Unorm | Uyvy | Yuy2 => {
                FormatBlock::pixel(2)
            }
            X8R8G8B8 | A8R8G8B8 | ZD32 | ZD24S8 | ZD24X8 | ZDf16 | ZDf24 | ZD24S8Int
            | BumpX8L8V8U8 | X8L8V8U8 | A2R10G10B10 | A2W10V10U10 | Q8W8V8U8 | V16U16
            | G16R16 | RS23E8 | RgS10E5 | R32Typeless | D32Float | R32Uint | R32Sint
            | R32Float | R24G8Typeless | D24UnormS8Uint | R24UnormX8 | X24G8Uint
            | R16G16Typeless | R16G16Uint | R16G16Sint | R16G16Float | R16G16Unorm
            | R16G16Snorm | R10G10B10A2Typeless | R10G10B10A2Uint | R10G10B10A2Unorm
            | R11G11B10Float | R8G8B8A8Typeless | R8G8B8A8Unorm | R8G8B8A8UnormSrgb
            | R8G8B8A8Uint | R8G8B8A8Sint | R8G8B8A8Snorm | R9G9B9E5SharedExp
            | R8G8B8G8Unorm | G8R8G8B8Unorm | R10G10B10XrBiasA2Unorm | B8G8R8A8Typeless
            | B8G8R8A8UnormSrgb | B8G8R8X8Typeless | B8G8R8X8UnormSrgb | B8G8R8A8Unorm
            | B8G8R8X8Unorm => FormatBlock::pixel(4),
            ArgbS10E5 | A16B16G16R16 | R16G16B16A16Typeless | R16G16B16A16Uint
            | R16G16B16A16Snorm | R16G16B16A16Sint | R16G16B16A16Float | R16G16B16A16Unorm
            | R32G32Typeless | R32G32Uint | R32G32Sint | R32G32Float | R32G8X24Typeless
            | D32FloatS8X24Uint | R32FloatX8X24 | X32G8X24Uint | RgS23E8 => {
                FormatBlock::pixel(8)
            }
            R32G32B32Typeless | R32G32B32Float | R32G32B32Uint | R32G32B32Sint => {
                FormatBlock::pixel(12)
            }
            ArgbS23E8 | R32G32B32A32Typeless | R32G32B32A32Uint | R32G32B32A32Sint
            | R32G32B32A32Float => FormatBlock::pixel(16),
            Dxt1 | Bc1Typeless | Bc1Unorm | Bc1UnormSrgb | Bc4Typeless | Bc4Unorm | Bc4Snorm
            | Ati1 => FormatBlock::bc(8),
            Dxt2 | Dxt3 | Dxt4 | Dxt5 | Bc2Typeless | Bc2Unorm | Bc2UnormSrgb | Bc3Typeless
            | Bc3Unorm | Bc3UnormSrgb | Bc5Typeless | Bc5Unorm | Bc5Snorm | Ati2
            | Bc6hTypeless | Bc6hUf16 | Bc6hSf16 | Bc7Typeless | Bc7Unorm | Bc7UnormSrgb => {
                FormatBlock::bc(16)
            }
            // Planar YUV is only ever moved with full-row transfers; the luma
            // plane granularity is good enough for layout purposes.
            Nv12 | Yv12 => FormatBlock { bytes: 2, width: 2, height: 2 },
        }
    }

    pub fn is_depth_stencil(self) -> bool {
        use SurfaceFormat::*;
        matches!(
            self,
            ZD32 | ZD16
                | ZD24S8
                | ZD15S1
                | ZD24X8
                | ZDf16
                | ZDf24
                | ZD24S8Int
                | D32Float
                | D24UnormS8Uint
                | D16Unorm
                | D32FloatS8X24Uint
        )
    }

    pub fn is_block_compressed(self) -> bool {
        self.block().width == 4
    }
}

bitflags! {
    /// Surface creation flags (the 64-bit "all flags" form; the legacy
    /// 32-bit field occupies the low word).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceFlags: u64 {
        const CUBEMAP             = 1 << 0;
        const HINT_STATIC         = 1 << 1;
        const HINT_DYNAMIC        = 1 << 2;
        const HINT_INDEXBUFFER    = 1 << 3;
        const HINT_VERTEXBUFFER   = 1 << 4;
        const HINT_TEXTURE        = 1 << 5;
        const HINT_RENDERTARGET   = 1 << 6;
        const HINT_DEPTHSTENCIL   = 1 << 7;
        const HINT_WRITEONLY      = 1 << 8;
        const DEAD2               = 1 << 9;
        const AUTOGENMIPMAPS      = 1 << 10;
        const DEAD1               = 1 << 11;
        const MOB_PITCH           = 1 << 12;
        const INACTIVE            = 1 << 13;
        const HINT_RT_LOCKABLE    = 1 << 14;
        const VOLUME              = 1 << 15;
        const SCREENTARGET        = 1 << 16;
        const ALIGN16             = 1 << 17;
        const ONE_D               = 1 << 18;
        const ARRAY               = 1 << 19;
        const BIND_VERTEX_BUFFER  = 1 << 20;
        const BIND_INDEX_BUFFER   = 1 << 21;
        const BIND_CONSTANT_BUFFER = 1 << 22;
        const BIND_SHADER_RESOURCE = 1 << 23;
        const BIND_RENDER_TARGET  = 1 << 24;
        const BIND_DEPTH_STENCIL  = 1 << 25;
        const BIND_STREAM_OUTPUT  = 1 << 26;
        const STAGING_UPLOAD      = 1 << 27;
        const STAGING_DOWNLOAD    = 1 << 28;
        const HINT_INDIRECT_UPDATE = 1 << 29;
        const TRANSFER_FROM_BUFFER = 1 << 30;
        const RESERVED1           = 1 << 31;
        const MULTISAMPLE         = 1 << 32;
        const BIND_UAVIEW         = 1 << 33;
        const TRANSFER_TO_BUFFER  = 1 << 34;
        const BIND_LOGICOPS       = 1 << 35;
        const BIND_RAW_VIEWS      = 1 << 36;
        const BUFFER_STRUCTURED   = 1 << 37;
        const DRAWINDIRECT_ARGS   = 1 << 38;
        const RESOURCE_CLAMP      = 1 << 39;
    }
}

impl SurfaceFlags {
    /// Widens the legacy 32-bit flag field.
    pub fn from_legacy(flags32: u32) -> Self {
        Self::from_bits_retain(flags32 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_geometry_matches_format_family() {
        assert_eq!(SurfaceFormat::A8R8G8B8.block(), FormatBlock::pixel(4));
        assert_eq!(SurfaceFormat::Dxt1.block(), FormatBlock::bc(8));
        assert_eq!(SurfaceFormat::Bc7Unorm.block(), FormatBlock::bc(16));
        assert_eq!(SurfaceFormat::R16G16Float.block(), FormatBlock::pixel(4));
        assert_eq!(SurfaceFormat::R32G32B32A32Float.block(), FormatBlock::pixel(16));
    }

    #[test]
    fn retired_ids_do_not_decode() {
        assert_eq!(SurfaceFormat::from_wire(0), None);
        assert_eq!(SurfaceFormat::from_wire(23), None);
        assert_eq!(SurfaceFormat::from_wire(45), None);
        assert_eq!(SurfaceFormat::from_wire(151), None);
    }

    #[test]
    fn wire_round_trip() {
        for v in 1..=150u32 {
            if let Some(f) = SurfaceFormat::from_wire(v) {
                assert_eq!(f.to_wire(), v);
            }
        }
    }
}
