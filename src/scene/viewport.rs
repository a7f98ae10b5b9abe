// src/scene/viewport.rs

//! Turning a layer's transform into a device viewport.
//!
//! Both render stages draw the same unit-square vertex set, positions
//! (0,0)..(1,1). The device is asked for a viewport and a quad extent whose
//! combination lands the layer on its intended rectangle:
//!
//! * `Compensated` keeps the quad in the top-right clip quadrant and asks
//!   for a viewport twice the layer size, shifted down-left by half of that.
//!   Devices that double requested extents and shift the origin expect this.
//! * `Direct` stretches the quad over the whole clip square and asks for the
//!   layer rectangle verbatim.
//!
//! For any transform both strategies select the same visible rectangle. A
//! viewport outside the drawable area or beyond the device maximum is named
//! by `anomaly` and used as computed; nothing is clamped.

use serde::{Deserialize, Serialize};

use crate::scene::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewportStrategy {
    #[default]
    Compensated,
    Direct,
}

/// How the unit-square vertices are mapped into clip space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadExtent {
    /// Clip coordinates (0,0)..(1,1).
    UnitSquare,
    /// Clip coordinates (-1,-1)..(1,1).
    FullClip,
}

impl QuadExtent {
    /// `(scale, origin)` applied to each vertex: `clip = position * scale + origin`.
    pub fn clip_mapping(self) -> ([f32; 2], [f32; 2]) {
        match self {
            QuadExtent::UnitSquare => ([1.0, 1.0], [0.0, 0.0]),
            QuadExtent::FullClip => ([2.0, 2.0], [-1.0, -1.0]),
        }
    }
}

/// A pixel rectangle, origin bottom-left as the device sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub quad: QuadExtent,
}

impl Viewport {
    /// Covers a `width` x `height` target with the quad, no transform.
    pub fn full(width: u32, height: u32) -> Self {
        Viewport {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
            quad: QuadExtent::FullClip,
        }
    }

    /// The pixels the quad actually covers.
    pub fn visible_rect(&self) -> Rect {
        match self.quad {
            QuadExtent::FullClip => Rect {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
            },
            QuadExtent::UnitSquare => Rect {
                x: self.x + self.width / 2,
                y: self.y + self.height / 2,
                width: self.width / 2,
                height: self.height / 2,
            },
        }
    }
}

impl ViewportStrategy {
    /// Viewport placing a layer with `transform` on a `width` x `height`
    /// target.
    pub fn viewport(self, width: u32, height: u32, transform: &Transform) -> Viewport {
        let (w, h) = (width as f32, height as f32);
        let scale = transform.scale();
        let offset = transform.offset();

        match self {
            ViewportStrategy::Compensated => Viewport {
                x: (-w * scale.horizontal + offset.x * w) as i32,
                y: (-h * scale.vertical + offset.y * h) as i32,
                width: (w * 2.0 * scale.horizontal) as i32,
                height: (h * 2.0 * scale.vertical) as i32,
                quad: QuadExtent::UnitSquare,
            },
            ViewportStrategy::Direct => Viewport {
                x: (offset.x * w) as i32,
                y: (offset.y * h) as i32,
                width: (w * scale.horizontal) as i32,
                height: (h * scale.vertical) as i32,
                quad: QuadExtent::FullClip,
            },
        }
    }

    /// Names the first problem with `viewport`, if any.
    pub fn anomaly(
        self,
        viewport: &Viewport,
        width: u32,
        height: u32,
        max_dims: (i32, i32),
    ) -> Option<&'static str> {
        let (w, h) = (width as i64, height as i64);
        if w > max_dims.0 as i64 || h > max_dims.1 as i64 {
            return Some("target exceeds device maximum");
        }

        let (vw, vh) = (viewport.width as i64, viewport.height as i64);
        if vw > max_dims.0 as i64 || vh > max_dims.1 as i64 {
            return Some("viewport exceeds device maximum");
        }
        if self == ViewportStrategy::Compensated && (vw > w * 2 || vh > h * 2) {
            return Some("extent larger than twice the target");
        }

        let visible = viewport.visible_rect();
        let (x, y) = (visible.x as i64, visible.y as i64);
        if x < 0 || y < 0 {
            Some("origin left of or below the drawable area")
        } else if x + visible.width as i64 > w || y + visible.height as i64 > h {
            Some("rectangle extends past the drawable area")
        } else {
            None
        }
    }
}
