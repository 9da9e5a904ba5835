use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use super::RenderError;

/// Dots per character cell in the printer's default font.
pub const DOTS_PER_CHAR: u32 = 12;

/// A 1-bit image in the layout `GS v 0` expects: rows top to bottom,
/// eight pixels per byte, most significant bit leftmost, 1 = black.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width_bytes: u16,
    height: u16,
    data: Vec<u8>,
}

impl Raster {
    /// Load an image file, shrinking it to at most `max_width` dots.
    pub fn open(path: impl AsRef<Path>, max_width: u32) -> Result<Self, RenderError> {
        let image = image::open(path)?;
        Ok(Self::from_image(&image, max_width))
    }

    pub fn from_image(image: &DynamicImage, max_width: u32) -> Self {
        let max_width = max_width.clamp(8, u32::from(u16::MAX) * 8);
        let image = if image.width() > max_width {
            image.resize(max_width, u32::MAX, FilterType::Triangle)
        } else {
            image.clone()
        };

        let rgba = image.to_rgba8();
        let height = rgba.height().min(u32::from(u16::MAX));
        let width_bytes = rgba.width().div_ceil(8);
        let mut data = vec![0u8; (width_bytes * height) as usize];

        for (x, y, pixel) in rgba.enumerate_pixels() {
            if y >= height {
                break;
            }
            let [r, g, b, a] = pixel.0;
            // Transparent pixels print as paper.
            let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
            if a >= 128 && luma < 128 {
                let index = (y * width_bytes + x / 8) as usize;
                data[index] |= 0x80 >> (x % 8);
            }
        }

        Raster {
            width_bytes: width_bytes as u16,
            height: height as u16,
            data,
        }
    }

    pub fn width_bytes(&self) -> u16 {
        self.width_bytes
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
