//! Decoded document rasters.

use std::sync::Arc;

use kurbo::Size;

use crate::renderer::{RenderResult, RendererError};

/// A document decoded to RGBA, ready to draw.
#[derive(Debug, Clone)]
pub struct DocumentImage {
    data: peniko::ImageData,
}

impl DocumentImage {
    /// Decode PNG, JPEG, WebP, GIF or BMP bytes.
    pub fn decode(bytes: &[u8]) -> RenderResult<Self> {
        let decoded = ::image::load_from_memory(bytes).map_err(|e| RendererError::Decode(e.to_string()))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Decoded document image {}x{}", width, height);
        Self::from_rgba(width, height, rgba.into_vec())
    }

    /// Wrap raw RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RendererError::InvalidImage(format!("{}x{} image", width, height)));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RendererError::InvalidImage(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            data: peniko::ImageData {
                data: peniko::Blob::new(Arc::new(pixels)),
                format: peniko::ImageFormat::Rgba8,
                width,
                height,
                alpha_type: peniko::ImageAlphaType::Alpha,
            },
        })
    }

    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    /// Natural size, used for letterboxing.
    pub fn size(&self) -> Size {
        Size::new(self.data.width as f64, self.data.height as f64)
    }

    pub fn image_data(&self) -> &peniko::ImageData {
        &self.data
    }
}
