//! Vello renderer implementation.

use kurbo::{Affine, BezPath, Cap, Join, Point, Rect, Size, Stroke};
use peniko::{Color, Fill};
use vello::Scene;

use crate::image::DocumentImage;
use crate::renderer::{RenderContext, Renderer, ScenePainter, paint_frame};

/// Vello-based renderer for GPU-accelerated 2D graphics.
pub struct VelloRenderer {
    /// The Vello scene being built.
    scene: Scene,
}

impl Default for VelloRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl VelloRenderer {
    pub fn new() -> Self {
        Self { scene: Scene::new() }
    }

    /// Get the built scene for rendering.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Take ownership of the built scene.
    pub fn take_scene(&mut self) -> Scene {
        std::mem::take(&mut self.scene)
    }
}

impl ScenePainter for VelloRenderer {
    fn clear(&mut self, color: Color, size: Size) {
        let rect = Rect::from_origin_size(Point::ZERO, size);
        self.scene.fill(Fill::NonZero, Affine::IDENTITY, color, None, &rect);
    }

    fn draw_image(&mut self, image: &DocumentImage, rect: Rect, transform: Affine) {
        let image_data = image.image_data().clone();
        let scale_x = rect.width() / image_data.width as f64;
        let scale_y = rect.height() / image_data.height as f64;

        let image_transform = transform
            * Affine::translate((rect.x0, rect.y0))
            * Affine::scale_non_uniform(scale_x, scale_y);

        self.scene.draw_image(&image_data.into(), image_transform);
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Color, width: f64, transform: Affine) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        let mut path = BezPath::new();
        path.move_to(*first);
        if rest.is_empty() {
            // A lone tap still leaves a dot thanks to the round cap.
            path.line_to(*first);
        }
        for point in rest {
            path.line_to(*point);
        }

        let stroke = Stroke::new(width).with_caps(Cap::Round).with_join(Join::Round);
        self.scene.stroke(&stroke, transform, color, None, &path);
    }
}

impl Renderer for VelloRenderer {
    fn build_scene(&mut self, ctx: &RenderContext) {
        self.scene.reset();
        paint_frame(self, ctx);
    }
}
