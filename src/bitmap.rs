//! RGBA images produced by the demos.

use std::path::Path;

use crate::error::{GpuError, Result};

/// Host equivalent of WGSL `pack4x8unorm` for one channel.
pub fn unorm8(value: f32) -> u8 {
    (0.5 + 255.0 * value.clamp(0.0, 1.0)).floor() as u8
}

/// Host equivalent of WGSL `pack4x8unorm`: first component in the lowest
/// byte, so the little-endian bytes read as R, G, B, A.
pub fn pack4x8unorm(rgba: [f32; 4]) -> u32 {
    u32::from_le_bytes(rgba.map(unorm8))
}

/// An 8-bit RGBA image, rows tightly packed, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GpuError::InvalidInput(format!(
                "{width}x{height} bitmap needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build from `pack4x8unorm` words.
    pub fn from_packed(width: u32, height: u32, packed: &[u32]) -> Result<Self> {
        Self::new(width, height, bytemuck::cast_slice(packed).to_vec())
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.pixels[offset..offset + 4]);
        rgba
    }

    pub fn save_png(&self, path: &Path) -> image::ImageResult<()> {
        image::save_buffer(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unorm8_rounds_and_clamps() {
        assert_eq!(unorm8(0.0), 0);
        assert_eq!(unorm8(1.0), 255);
        assert_eq!(unorm8(0.5), 128);
        assert_eq!(unorm8(-3.0), 0);
        assert_eq!(unorm8(7.0), 255);
    }

    #[test]
    fn packing_puts_red_in_the_low_byte() {
        let packed = pack4x8unorm([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(packed.to_le_bytes(), [255, 0, 0, 255]);
    }

    #[test]
    fn bitmap_checks_its_size() {
        assert!(Bitmap::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            Bitmap::new(2, 2, vec![0; 15]),
            Err(GpuError::InvalidInput(_))
        ));
        let bitmap = Bitmap::from_packed(2, 1, &[0, pack4x8unorm([0.0, 1.0, 0.0, 1.0])]).unwrap();
        assert_eq!(bitmap.pixel(1, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        let bitmap = Bitmap::new(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 128]).unwrap();
        bitmap.save_png(&path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.into_raw(), bitmap.pixels);
    }
}
