use serde::{Deserialize, Serialize};

/// Pixel formats a frame plane set can be laid out in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray,
    Bgra,
    Rgba,
    Argb,
    Abgr,
    Ycbcr,
    Ycbcra,
    Invalid,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; planar formats report 1.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra | Self::Rgba | Self::Argb | Self::Abgr => 4,
            Self::Gray | Self::Ycbcr | Self::Ycbcra => 1,
            Self::Invalid => 0,
        }
    }
}

/// One image plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel within this plane
    pub stride: u32,
}

impl Plane {
    pub const fn new(width: u32, height: u32, stride: u32) -> Self {
        Self {
            width,
            height,
            stride,
        }
    }

    pub const fn linesize(&self) -> usize {
        self.width as usize * self.stride as usize
    }

    pub const fn size(&self) -> usize {
        self.linesize() * self.height as usize
    }
}

/// Pixel format plus the layout of each plane
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PixelFormatDesc {
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl PixelFormatDesc {
    pub fn new(format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self { format, planes }
    }

    /// Single packed 8-bit BGRA plane
    pub fn bgra(width: u32, height: u32) -> Self {
        Self::new(PixelFormat::Bgra, vec![Plane::new(width, height, 4)])
    }

    pub fn invalid() -> Self {
        Self::new(PixelFormat::Invalid, Vec::new())
    }
}

impl Default for PixelFormatDesc {
    fn default() -> Self {
        Self::invalid()
    }
}
