//! Viewport state for pan/zoom transforms.
//!
//! The viewport is shared by value: every participant holds its own copy and
//! replaces it wholesale when a local gesture or remote event arrives, so late
//! joiners converge without replaying history.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::protocol::{ParticipantId, now_millis};

/// Smallest zoom factor a viewport may hold.
pub const MIN_ZOOM: f64 = 0.1;
/// Largest zoom factor a viewport may hold.
pub const MAX_ZOOM: f64 = 5.0;
/// Multiplier applied by a single zoom-in step.
pub const ZOOM_IN_FACTOR: f64 = 1.2;
/// Multiplier applied by a single zoom-out step.
pub const ZOOM_OUT_FACTOR: f64 = 1.0 / ZOOM_IN_FACTOR;

/// Zoom and pan applied when rendering the shared document.
///
/// Pan offsets are in rendering-surface pixels. This is also the payload of
/// the `evento-viewport` wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    /// Zoom factor, kept within [`MIN_ZOOM`, `MAX_ZOOM`].
    pub zoom: f64,
    /// Horizontal pan offset in surface pixels.
    #[serde(rename = "panX")]
    pub pan_x: f64,
    /// Vertical pan offset in surface pixels.
    #[serde(rename = "panY")]
    pub pan_y: f64,
    /// Wall-clock time of the change, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Participant that produced this state.
    #[serde(rename = "usuarioId")]
    pub participant_id: ParticipantId,
}

impl ViewportState {
    /// Identity viewport (zoom 1, no pan) owned by `participant_id`.
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
            timestamp: now_millis(),
            participant_id,
        }
    }

    /// Clamp a zoom factor into the allowed range.
    ///
    /// Non-finite input collapses to 1.0 so a corrupt remote value cannot
    /// poison the local transform.
    pub fn clamp_zoom(zoom: f64) -> f64 {
        if zoom.is_finite() {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            1.0
        }
    }

    /// Current pan offset as a vector.
    pub fn pan(&self) -> Vec2 {
        Vec2::new(self.pan_x, self.pan_y)
    }

    /// Get the affine transform for rendering.
    ///
    /// This transform converts base-layout coordinates (the letterboxed image
    /// at zoom 1) to surface pixels.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.pan()) * Affine::scale(self.zoom)
    }

    /// Get the inverse transform for input handling.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.pan())
    }

    /// Convert a surface pixel to base-layout coordinates.
    pub fn surface_to_base(&self, surface_point: Point) -> Point {
        self.inverse_transform() * surface_point
    }

    /// Convert a base-layout point to surface pixels.
    pub fn base_to_surface(&self, base_point: Point) -> Point {
        self.transform() * base_point
    }

    /// A copy with the zoom multiplied by `factor` (clamped) and pan unchanged.
    pub fn zoomed(&self, factor: f64, participant_id: &ParticipantId) -> Self {
        Self {
            zoom: Self::clamp_zoom(self.zoom * factor),
            pan_x: self.pan_x,
            pan_y: self.pan_y,
            timestamp: now_millis(),
            participant_id: participant_id.clone(),
        }
    }

    /// A copy panned by `delta` surface pixels with the zoom unchanged.
    pub fn panned(&self, delta: Vec2, participant_id: &ParticipantId) -> Self {
        Self {
            zoom: self.zoom,
            pan_x: self.pan_x + delta.x,
            pan_y: self.pan_y + delta.y,
            timestamp: now_millis(),
            participant_id: participant_id.clone(),
        }
    }

    /// Sanitize a state received from the wire before applying it.
    pub fn sanitized(mut self) -> Self {
        self.zoom = Self::clamp_zoom(self.zoom);
        if !self.pan_x.is_finite() {
            self.pan_x = 0.0;
        }
        if !self.pan_y.is_finite() {
            self.pan_y = 0.0;
        }
        self
    }

    /// Reset to zoom 1 and no pan.
    pub fn reset(&mut self, participant_id: &ParticipantId) {
        *self = Self::new(participant_id.clone());
    }
}
