use std::fmt::{self, Display};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 四字符代码 (Four Character Code)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    pub const MJPEG: Self = Self::new(b'M', b'J', b'P', b'G');
    pub const NV12: Self = Self::new(b'N', b'V', b'1', b'2');
    pub const YUY2: Self = Self::new(b'Y', b'U', b'Y', b'2');
    pub const BGRA: Self = Self::new(b'B', b'G', b'R', b'A');
    /// 16-bit 深度 (毫米)
    pub const Z16: Self = Self::new(b'Z', b'1', b'6', b' ');
    /// 16-bit 红外亮度
    pub const Y16: Self = Self::new(b'Y', b'1', b'6', b' ');
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// Capture 中单张图像的格式
///
/// 本库不做解码，格式只用于描述缓冲区与转交传输层。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum ImageFormat {
    ColorMjpg,
    ColorNv12,
    ColorYuy2,
    ColorBgra32,
    Depth16,
    Ir16,
}

impl ImageFormat {
    pub fn fourcc(self) -> FourCC {
        match self {
            Self::ColorMjpg => FourCC::MJPEG,
            Self::ColorNv12 => FourCC::NV12,
            Self::ColorYuy2 => FourCC::YUY2,
            Self::ColorBgra32 => FourCC::BGRA,
            Self::Depth16 => FourCC::Z16,
            Self::Ir16 => FourCC::Y16,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Self::ColorMjpg)
    }

    /// 每像素比特数，压缩格式无法确定时返回 None
    pub fn bits_per_pixel(self) -> Option<u32> {
        match self {
            Self::ColorMjpg => None,
            Self::ColorNv12 => Some(12),
            Self::ColorYuy2 | Self::Depth16 | Self::Ir16 => Some(16),
            Self::ColorBgra32 => Some(32),
        }
    }

    /// 按宽度计算行跨距 (字节)，压缩格式为 0
    pub fn stride_for(self, width: u32) -> usize {
        match self {
            // NV12 的 Y 平面按字节寻址
            Self::ColorNv12 => width as usize,
            other => other
                .bits_per_pixel()
                .map(|bpp| (width * bpp / 8) as usize)
                .unwrap_or(0),
        }
    }
}

impl From<ImageFormat> for FourCC {
    fn from(fmt: ImageFormat) -> Self {
        fmt.fourcc()
    }
}
