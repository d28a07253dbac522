//! Overlay drag and resize math.

use monitor_core::{OverlayPosition, OverlaySize};
use serde::{Deserialize, Serialize};

pub const MIN_OVERLAY_WIDTH: f64 = 280.0;
pub const MIN_OVERLAY_HEIGHT: f64 = 160.0;

/// Header strip that must stay reachable so the overlay can be dragged back.
const GRAB_MARGIN: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

/// Keeps at least the grab strip of the overlay inside the viewport.
pub fn clamp_position(pos: OverlayPosition, size: OverlaySize, viewport: Viewport) -> OverlayPosition {
    let max_x = (viewport.width - GRAB_MARGIN).max(0.0);
    let max_y = (viewport.height - GRAB_MARGIN).max(0.0);
    let min_x = (GRAB_MARGIN - size.width).min(0.0);
    OverlayPosition {
        x: pos.x.clamp(min_x, max_x),
        y: pos.y.clamp(0.0, max_y),
    }
}

/// New position after dragging by `(dx, dy)`.
pub fn drag(
    pos: OverlayPosition,
    dx: f64,
    dy: f64,
    size: OverlaySize,
    viewport: Viewport,
) -> OverlayPosition {
    clamp_position(
        OverlayPosition {
            x: pos.x + dx,
            y: pos.y + dy,
        },
        size,
        viewport,
    )
}

/// New size after dragging the resize handle by `(dw, dh)`.
pub fn resize(size: OverlaySize, dw: f64, dh: f64, viewport: Viewport) -> OverlaySize {
    let max_w = viewport.width.max(MIN_OVERLAY_WIDTH);
    let max_h = viewport.height.max(MIN_OVERLAY_HEIGHT);
    OverlaySize {
        width: (size.width + dw).clamp(MIN_OVERLAY_WIDTH, max_w),
        height: (size.height + dh).clamp(MIN_OVERLAY_HEIGHT, max_h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_stays_reachable() {
        let size = OverlaySize::default();
        let viewport = Viewport::default();
        let pos = drag(OverlayPosition::default(), 5000.0, -300.0, size, viewport);
        assert_eq!(pos.x, viewport.width - GRAB_MARGIN);
        assert_eq!(pos.y, 0.0);

        let pos = drag(OverlayPosition::default(), -5000.0, 10.0, size, viewport);
        assert_eq!(pos.x, GRAB_MARGIN - size.width);
        assert_eq!(pos.y, 30.0);
    }

    #[test]
    fn test_resize_bounds() {
        let viewport = Viewport {
            width: 800.0,
            height: 600.0,
        };
        let size = resize(OverlaySize::default(), -1000.0, 1000.0, viewport);
        assert_eq!(size.width, MIN_OVERLAY_WIDTH);
        assert_eq!(size.height, 600.0);
    }
}
