//! Teleconsult Render Library
//!
//! Full-redraw rendering of a shared document and its annotations.
//! The default implementation uses Vello for GPU-accelerated rendering.

mod image;
mod renderer;

#[cfg(feature = "vello-renderer")]
mod vello_impl;

pub use image::DocumentImage;
pub use renderer::{
    DEFAULT_BACKGROUND, DrawCall, RecordingRenderer, RenderContext, RenderResult, Renderer, RendererError, parse_color,
    stroke_color,
};

#[cfg(feature = "vello-renderer")]
pub use vello_impl::VelloRenderer;
