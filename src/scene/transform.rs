// src/scene/transform.rs

//! Per-layer placement: offset, scale and opacity in normalized units.
//!
//! Setters validate and refuse out-of-range input, keeping the previous
//! value. `Transform::derive` turns a client's integer geometry, z-order and
//! opacity into these units relative to the output.

use crate::error::ClientError;

/// Position in normalized output units. `z` is the layer depth, -1 nearest,
/// 1 farthest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Fraction of the output covered in each direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Axis-aligned rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Integer domains of the externally visible z-order and opacity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRanges {
    pub min_zorder: u32,
    pub max_zorder: u32,
    pub min_opacity: u32,
    pub max_opacity: u32,
}

impl Default for ValueRanges {
    fn default() -> Self {
        ValueRanges {
            min_zorder: 0,
            max_zorder: 255,
            min_opacity: 0,
            max_opacity: 255,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    offset: Offset,
    scale: Scale,
    opacity: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            offset: Offset {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            scale: Scale {
                horizontal: 1.0,
                vertical: 1.0,
            },
            opacity: 1.0,
        }
    }
}

fn check(what: &'static str, value: f32, min: f32, max: f32) -> Result<(), ClientError> {
    // NaN fails both comparisons and is refused too.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ClientError::OutOfRange { what, value })
    }
}

impl Transform {
    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_offset(&mut self, offset: Offset) -> Result<(), ClientError> {
        check("offset.x", offset.x, -1.0, 1.0)?;
        check("offset.y", offset.y, -1.0, 1.0)?;
        check("offset.z", offset.z, -1.0, 1.0)?;
        self.offset = offset;
        Ok(())
    }

    pub fn set_scale(&mut self, scale: Scale) -> Result<(), ClientError> {
        check("scale.horizontal", scale.horizontal, 0.0, 1.0)?;
        check("scale.vertical", scale.vertical, 0.0, 1.0)?;
        self.scale = scale;
        Ok(())
    }

    pub fn set_opacity(&mut self, opacity: f32) -> Result<(), ClientError> {
        check("opacity", opacity, 0.0, 1.0)?;
        self.opacity = opacity;
        Ok(())
    }

    /// Derives the transform of a layer with `geometry`, `zorder` and
    /// `opacity` on an `output_width` x `output_height` output.
    ///
    /// Fails if any component falls outside its range; nothing is clamped.
    pub fn derive(
        geometry: Rectangle,
        zorder: u32,
        opacity: u32,
        output_width: u32,
        output_height: u32,
        ranges: &ValueRanges,
    ) -> Result<Transform, ClientError> {
        if output_width == 0 || output_height == 0 {
            return Err(ClientError::OutOfRange {
                what: "output size",
                value: 0.0,
            });
        }
        let (out_w, out_h) = (output_width as f32, output_height as f32);

        let mut transform = Transform::default();
        transform.set_scale(Scale {
            horizontal: geometry.width as f32 / out_w,
            vertical: geometry.height as f32 / out_h,
        })?;
        transform.set_offset(Offset {
            x: geometry.x as f32 / out_w,
            y: geometry.y as f32 / out_h,
            z: depth_for(zorder, ranges),
        })?;
        transform.set_opacity(alpha_for(opacity, ranges))?;
        Ok(transform)
    }
}

/// Maps a z-order onto [-1, 1], larger z-order farther back. A degenerate
/// range puts every layer at mid-depth.
pub fn depth_for(zorder: u32, ranges: &ValueRanges) -> f32 {
    let (min, max) = (ranges.min_zorder as f32, ranges.max_zorder as f32);
    if ranges.max_zorder <= ranges.min_zorder {
        return 0.0;
    }
    -1.0 + 2.0 * (zorder as f32 - min) / (max - min)
}

/// Maps an integer opacity onto [0, 1]. A degenerate range is fully opaque.
pub fn alpha_for(opacity: u32, ranges: &ValueRanges) -> f32 {
    let (min, max) = (ranges.min_opacity as f32, ranges.max_opacity as f32);
    if ranges.max_opacity <= ranges.min_opacity {
        return 1.0;
    }
    (opacity as f32 - min) / (max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn rect(x: i32, y: i32, width: u32, height: u32) -> Rectangle {
        Rectangle {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn it_should_derive_a_full_screen_layer() -> anyhow::Result<()> {
        let ranges = ValueRanges::default();
        let t = Transform::derive(rect(0, 0, 1920, 1080), 0, 255, 1920, 1080, &ranges)?;
        assert_eq!(t.scale(), Scale { horizontal: 1.0, vertical: 1.0 });
        assert_eq!(t.offset().x, 0.0);
        assert_eq!(t.offset().z, -1.0);
        assert_eq!(t.opacity(), 1.0);
        Ok(())
    }

    #[test]
    fn it_should_derive_offsets_relative_to_the_output() -> anyhow::Result<()> {
        let ranges = ValueRanges::default();
        let t = Transform::derive(rect(960, 270, 960, 540), 255, 0, 1920, 1080, &ranges)?;
        assert_eq!(t.offset().x, 0.5);
        assert_eq!(t.offset().y, 0.25);
        assert_eq!(t.scale().horizontal, 0.5);
        assert_eq!(t.offset().z, 1.0);
        assert_eq!(t.opacity(), 0.0);
        Ok(())
    }

    #[test]
    fn it_should_refuse_an_out_of_range_opacity_and_keep_the_previous_value() {
        let mut t = Transform::default();
        assert!(t.set_opacity(0.5).is_ok());
        let err = t.set_opacity(1.5);
        assert!(matches!(err, Err(ClientError::OutOfRange { what: "opacity", .. })));
        assert_eq!(t.opacity(), 0.5);
        assert!(t.set_opacity(f32::NAN).is_err());
        assert_eq!(t.opacity(), 0.5);
    }

    #[test]
    fn it_should_refuse_geometry_larger_than_the_output() {
        let ranges = ValueRanges::default();
        let derived = Transform::derive(rect(0, 0, 3840, 1080), 0, 255, 1920, 1080, &ranges);
        assert!(matches!(
            derived,
            Err(ClientError::OutOfRange {
                what: "scale.horizontal",
                ..
            })
        ));
    }

    #[test]
    fn it_should_refuse_a_zorder_outside_its_range() {
        let ranges = ValueRanges::default();
        let derived = Transform::derive(rect(0, 0, 10, 10), 300, 255, 1920, 1080, &ranges);
        assert!(derived.is_err());
    }

    #[test]
    fn it_should_put_a_degenerate_zorder_range_at_mid_depth() {
        let ranges = ValueRanges {
            min_zorder: 4,
            max_zorder: 4,
            ..ValueRanges::default()
        };
        assert_eq!(depth_for(4, &ranges), 0.0);
        assert_eq!(depth_for(100, &ranges), 0.0);
    }
}
