//! Renderer trait abstraction.

use kurbo::{Affine, Point, Rect, Size};
use peniko::Color;
use peniko::color::Srgb;
use teleconsult_core::annotation::AnnotationList;
use teleconsult_core::geometry::SurfaceGeometry;
use teleconsult_core::viewport::ViewportState;
use thiserror::Error;

use crate::image::DocumentImage;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Image decoding failed: {0}")]
    Decode(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Default surface background, also the color erase strokes are drawn in.
pub const DEFAULT_BACKGROUND: Color = Color::from_rgba8(250, 250, 250, 255);

/// Parse a CSS color string such as `"#ff0000"`, `"red"` or `"rgb(255, 0, 0)"`.
pub fn parse_color(s: &str) -> Option<Color> {
    peniko::color::parse_color(s.trim())
        .ok()
        .map(|c| c.to_alpha_color::<Srgb>())
}

/// Stroke color for a wire color string; unparsable colors fall back to black.
pub fn stroke_color(s: &str) -> Color {
    parse_color(s).unwrap_or_else(|| {
        log::debug!("Unparsable stroke color {:?}, using black", s);
        Color::BLACK
    })
}

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// Strokes to draw, in order.
    pub annotations: &'a AnnotationList,
    pub viewport: &'a ViewportState,
    /// Rendering surface size in pixels.
    pub container: Size,
    /// The decoded document, if it has a raster.
    pub image: Option<&'a DocumentImage>,
    pub background_color: Color,
}

impl<'a> RenderContext<'a> {
    pub fn new(annotations: &'a AnnotationList, viewport: &'a ViewportState, container: Size) -> Self {
        Self {
            annotations,
            viewport,
            container,
            image: None,
            background_color: DEFAULT_BACKGROUND,
        }
    }

    pub fn with_image(mut self, image: Option<&'a DocumentImage>) -> Self {
        self.image = image;
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    /// Layout of the document on the surface.
    pub fn geometry(&self) -> SurfaceGeometry {
        SurfaceGeometry::new(self.container, self.image.map(DocumentImage::size))
    }
}

/// Trait for rendering backends.
///
/// Every call rebuilds the frame from scratch: clear, apply the viewport,
/// draw the document, then draw each annotation in list order.
pub trait Renderer: Send + Sync {
    /// Build the scene/command buffer for a frame.
    fn build_scene(&mut self, ctx: &RenderContext);

    /// Get the background color (for clearing).
    fn background_color(&self, ctx: &RenderContext) -> Color {
        ctx.background_color
    }
}

/// Drawing primitives a backend provides to [`paint_frame`].
pub(crate) trait ScenePainter {
    fn clear(&mut self, color: Color, size: Size);

    /// Draw `image` stretched over `rect` (base-layout coordinates).
    fn draw_image(&mut self, image: &DocumentImage, rect: Rect, transform: Affine);

    fn stroke_polyline(&mut self, points: &[Point], color: Color, width: f64, transform: Affine);
}

/// Paint one frame onto `painter`.
pub(crate) fn paint_frame(painter: &mut impl ScenePainter, ctx: &RenderContext) {
    painter.clear(ctx.background_color, ctx.container);

    let Some(rect) = ctx.geometry().image_rect() else {
        return;
    };
    let transform = ctx.viewport.transform();

    if let Some(image) = ctx.image {
        painter.draw_image(image, rect, transform);
    }

    for event in ctx.annotations.iter() {
        let Some(stroke) = event.stroke() else {
            continue;
        };
        if stroke.is_empty() {
            continue;
        }
        let color = if event.is_erase() {
            ctx.background_color
        } else {
            stroke_color(&stroke.color)
        };
        let points: Vec<Point> = stroke.points.iter().map(|p| p.to_base(rect)).collect();
        painter.stroke_polyline(&points, color, stroke.width, transform);
    }
}

/// One recorded drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    Clear {
        color: [u8; 4],
        size: Size,
    },
    Image {
        rect: Rect,
        transform: Affine,
        width: u32,
        height: u32,
    },
    Stroke {
        points: Vec<Point>,
        color: [u8; 4],
        width: f64,
        transform: Affine,
    },
}

fn rgba8(color: Color) -> [u8; 4] {
    let c = color.to_rgba8();
    [c.r, c.g, c.b, c.a]
}

/// Renderer that records draw calls instead of rasterizing.
///
/// Used by headless hosts and to check that equal inputs give equal frames.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    calls: Vec<DrawCall>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded by the last [`Renderer::build_scene`].
    pub fn calls(&self) -> &[DrawCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.calls)
    }
}

impl ScenePainter for RecordingRenderer {
    fn clear(&mut self, color: Color, size: Size) {
        self.calls.push(DrawCall::Clear { color: rgba8(color), size });
    }

    fn draw_image(&mut self, image: &DocumentImage, rect: Rect, transform: Affine) {
        self.calls.push(DrawCall::Image {
            rect,
            transform,
            width: image.width(),
            height: image.height(),
        });
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Color, width: f64, transform: Affine) {
        self.calls.push(DrawCall::Stroke {
            points: points.to_vec(),
            color: rgba8(color),
            width,
            transform,
        });
    }
}

impl Renderer for RecordingRenderer {
    fn build_scene(&mut self, ctx: &RenderContext) {
        self.calls.clear();
        paint_frame(self, ctx);
    }
}
