//! Coordinate normalization between surface pixels and image percentages.
//!
//! The document is letterboxed: scaled to fit the container while keeping its
//! aspect ratio and centered on the axis with slack. The viewport transform
//! (`translate(pan) * scale(zoom)`) is applied on top of that base layout.

use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

use crate::viewport::ViewportState;

/// Upper bound of a normalized coordinate.
pub const PERCENT_MAX: f64 = 100.0;

/// Slack (in percent) absorbed at the image edges to swallow float error.
const EDGE_TOLERANCE: f64 = 1e-6;

/// A point expressed as a percentage (0–100) of image width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether both axes fall inside [0, 100].
    pub fn is_on_image(&self) -> bool {
        (0.0..=PERCENT_MAX).contains(&self.x) && (0.0..=PERCENT_MAX).contains(&self.y)
    }

    /// Position of this point inside a base-layout image rectangle.
    pub fn to_base(&self, image_rect: Rect) -> Point {
        Point::new(
            image_rect.x0 + self.x / PERCENT_MAX * image_rect.width(),
            image_rect.y0 + self.y / PERCENT_MAX * image_rect.height(),
        )
    }
}

/// Rectangle the image occupies inside the container at zoom 1 with no pan.
///
/// Returns `None` when either size is degenerate.
pub fn fit_rect(container: Size, image: Size) -> Option<Rect> {
    if !is_usable(container) || !is_usable(image) {
        return None;
    }

    let scale = (container.width / image.width).min(container.height / image.height);
    let drawn = Size::new(image.width * scale, image.height * scale);
    let origin = Point::new(
        (container.width - drawn.width) / 2.0,
        (container.height - drawn.height) / 2.0,
    );
    Some(Rect::from_origin_size(origin, drawn))
}

fn is_usable(size: Size) -> bool {
    size.width.is_finite() && size.height.is_finite() && size.width > 0.0 && size.height > 0.0
}

/// Map a pointer pixel to a normalized image coordinate.
///
/// Returns `None` if the pointer falls outside the rendered image.
pub fn to_relative(
    pointer: Point,
    container: Size,
    image: Size,
    zoom: f64,
    pan: Vec2,
) -> Option<NormalizedPoint> {
    let rect = fit_rect(container, image)?;
    if zoom <= 0.0 || !zoom.is_finite() {
        return None;
    }

    let base = Point::new((pointer.x - pan.x) / zoom, (pointer.y - pan.y) / zoom);
    let x = snap_to_range((base.x - rect.x0) / rect.width() * PERCENT_MAX)?;
    let y = snap_to_range((base.y - rect.y0) / rect.height() * PERCENT_MAX)?;
    Some(NormalizedPoint::new(x, y))
}

fn snap_to_range(percent: f64) -> Option<f64> {
    if (-EDGE_TOLERANCE..=PERCENT_MAX + EDGE_TOLERANCE).contains(&percent) {
        Some(percent.clamp(0.0, PERCENT_MAX))
    } else {
        None
    }
}

/// Map a normalized image coordinate back to a surface pixel.
///
/// Degenerate sizes map everything to the container origin plus pan.
pub fn to_pixel(
    point: NormalizedPoint,
    container: Size,
    image: Size,
    zoom: f64,
    pan: Vec2,
) -> Point {
    let base = match fit_rect(container, image) {
        Some(rect) => point.to_base(rect),
        None => Point::ZERO,
    };
    Point::new(base.x * zoom + pan.x, base.y * zoom + pan.y)
}

/// Dimensions of the rendering surface and the document shown on it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceGeometry {
    /// Size of the rendering surface in pixels.
    pub container: Size,
    /// Natural size of the document image, if it has one.
    pub image: Option<Size>,
}

impl SurfaceGeometry {
    pub fn new(container: Size, image: Option<Size>) -> Self {
        Self { container, image }
    }

    /// Natural size used for letterboxing. Documents without a raster
    /// (reports) fill the container.
    pub fn image_size(&self) -> Size {
        self.image.unwrap_or(self.container)
    }

    /// Letterboxed image rectangle in base-layout coordinates.
    pub fn image_rect(&self) -> Option<Rect> {
        fit_rect(self.container, self.image_size())
    }

    /// [`to_relative`] using the given viewport.
    pub fn to_relative(&self, pointer: Point, viewport: &ViewportState) -> Option<NormalizedPoint> {
        to_relative(pointer, self.container, self.image_size(), viewport.zoom, viewport.pan())
    }

    /// [`to_pixel`] using the given viewport.
    pub fn to_pixel(&self, point: NormalizedPoint, viewport: &ViewportState) -> Point {
        to_pixel(point, self.container, self.image_size(), viewport.zoom, viewport.pan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_fit_rect_wide_image_letterboxes_vertically() {
        // 2:1 image in a square container: full width, centered vertically.
        let rect = fit_rect(Size::new(400.0, 400.0), Size::new(1000.0, 500.0)).unwrap();
        assert!((rect.x0).abs() < EPS);
        assert!((rect.width() - 400.0).abs() < EPS);
        assert!((rect.height() - 200.0).abs() < EPS);
        assert!((rect.y0 - 100.0).abs() < EPS);
    }

    #[test]
    fn test_fit_rect_tall_image_letterboxes_horizontally() {
        let rect = fit_rect(Size::new(800.0, 400.0), Size::new(300.0, 600.0)).unwrap();
        assert!((rect.height() - 400.0).abs() < EPS);
        assert!((rect.width() - 200.0).abs() < EPS);
        assert!((rect.x0 - 300.0).abs() < EPS);
        assert!((rect.y0).abs() < EPS);
    }

    #[test]
    fn test_fit_rect_degenerate() {
        assert!(fit_rect(Size::new(0.0, 400.0), Size::new(10.0, 10.0)).is_none());
        assert!(fit_rect(Size::new(400.0, 400.0), Size::ZERO).is_none());
    }

    #[test]
    fn test_center_maps_to_fifty_percent() {
        let p = to_relative(
            Point::new(200.0, 200.0),
            Size::new(400.0, 400.0),
            Size::new(1000.0, 500.0),
            1.0,
            Vec2::ZERO,
        )
        .unwrap();
        assert!((p.x - 50.0).abs() < EPS);
        assert!((p.y - 50.0).abs() < EPS);
    }

    #[test]
    fn test_letterbox_band_is_off_image() {
        // The top band (y < 100) is slack, not image.
        let p = to_relative(
            Point::new(200.0, 50.0),
            Size::new(400.0, 400.0),
            Size::new(1000.0, 500.0),
            1.0,
            Vec2::ZERO,
        );
        assert!(p.is_none());
    }

    #[test]
    fn test_out_of_bounds_after_pan() {
        let p = to_relative(
            Point::new(10.0, 10.0),
            Size::new(400.0, 300.0),
            Size::new(400.0, 300.0),
            1.0,
            Vec2::new(50.0, 50.0),
        );
        assert!(p.is_none());
    }

    #[test]
    fn test_round_trip_across_zoom_pan_and_aspects() {
        let containers = [Size::new(800.0, 600.0), Size::new(300.0, 900.0), Size::new(500.0, 500.0)];
        let images = [Size::new(1920.0, 1080.0), Size::new(600.0, 1200.0), Size::new(512.0, 512.0)];
        let zooms = [0.1, 0.5, 1.0, 2.3, 5.0];
        let pans = [Vec2::ZERO, Vec2::new(-120.5, 40.0), Vec2::new(333.0, -999.0)];
        let percents = [0.0, 12.5, 50.0, 99.0, 100.0];

        for container in containers {
            for image in images {
                for zoom in zooms {
                    for pan in pans {
                        for px in percents {
                            for py in percents {
                                let original = to_pixel(NormalizedPoint::new(px, py), container, image, zoom, pan);
                                let rel = to_relative(original, container, image, zoom, pan)
                                    .expect("pixel inside the image must normalize");
                                let back = to_pixel(rel, container, image, zoom, pan);
                                assert!((back.x - original.x).abs() < 1e-6);
                                assert!((back.y - original.y).abs() < 1e-6);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_surface_geometry_without_image_uses_container() {
        let geometry = SurfaceGeometry::new(Size::new(400.0, 200.0), None);
        let rect = geometry.image_rect().unwrap();
        assert_eq!(rect, Rect::new(0.0, 0.0, 400.0, 200.0));
    }
}
