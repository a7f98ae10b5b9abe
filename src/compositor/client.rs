// src/compositor/client.rs

//! Client surfaces and the capabilities they expose.
//!
//! A `ClientSurface` is one named, buffer-backed layer. Its geometry,
//! z-order and opacity live in the external integer domains; every setter
//! re-derives the layer transform against the output and refuses the
//! change if the result leaves range.

use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};

use crate::buffer::{BufferHandle, BufferInfo};
use crate::compositor::Compositor;
use crate::error::{lock_or_recover, ClientError};
use crate::gpu::ImageId;
use crate::scene::transform::{Rectangle, Transform, ValueRanges};

/// What a client can ask of its own surface.
pub trait Client: Send + Sync {
    fn name(&self) -> &str;

    fn buffer_info(&self) -> BufferInfo;

    fn geometry(&self) -> Rectangle;

    fn set_geometry(&self, geometry: Rectangle) -> Result<(), ClientError>;

    fn zorder(&self) -> u32;

    fn set_zorder(&self, zorder: u32) -> Result<(), ClientError>;

    fn opacity(&self) -> u32;

    fn set_opacity(&self, opacity: u32) -> Result<(), ClientError>;

    /// The transform stage 2 will place this layer with.
    fn transform(&self) -> Transform;
}

/// Lets a client push its latest frame through the compositor.
pub trait Render: Send + Sync {
    /// Composites this client now. `false` while its buffer is not
    /// composable yet or after it was detached.
    fn scan_out(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Layer {
    geometry: Rectangle,
    zorder: u32,
    opacity: u32,
    transform: Transform,
}

pub struct ClientSurface {
    name: String,
    buffer: BufferHandle,
    output: (u32, u32),
    ranges: ValueRanges,
    layer: Mutex<Layer>,
    retired: AtomicBool,
    compositor: Weak<Compositor>,
}

impl ClientSurface {
    /// A full-size, fully opaque layer at the front-most z-order.
    pub(crate) fn new(
        name: &str,
        buffer: BufferHandle,
        output: (u32, u32),
        ranges: ValueRanges,
        compositor: Weak<Compositor>,
    ) -> Result<Self, ClientError> {
        let info = buffer.info();
        let geometry = Rectangle {
            x: 0,
            y: 0,
            width: info.width,
            height: info.height,
        };
        let zorder = ranges.min_zorder;
        let opacity = ranges.max_opacity;
        let transform = Transform::derive(geometry, zorder, opacity, output.0, output.1, &ranges)?;
        Ok(ClientSurface {
            name: name.to_string(),
            buffer,
            output,
            ranges,
            layer: Mutex::new(Layer {
                geometry,
                zorder,
                opacity,
                transform,
            }),
            retired: AtomicBool::new(false),
            compositor,
        })
    }

    pub fn buffer(&self) -> &BufferHandle {
        &self.buffer
    }

    /// The image currently bound to the buffer, `INVALID` before import and
    /// after detach.
    pub fn image(&self) -> ImageId {
        self.buffer.image()
    }

    /// Transform and scene ordering key, read together.
    pub(crate) fn placement(&self) -> (Transform, u32) {
        let layer = self.layer();
        (layer.transform, layer.zorder)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn layer(&self) -> std::sync::MutexGuard<'_, Layer> {
        lock_or_recover(&self.layer, "ClientSurface layer")
    }

    /// Applies `change` to a copy of the layer and commits it only if the
    /// derived transform is valid.
    fn update(&self, change: impl FnOnce(&mut Layer)) -> Result<(), ClientError> {
        let mut layer = self.layer();
        let mut next = *layer;
        change(&mut next);
        match Transform::derive(
            next.geometry,
            next.zorder,
            next.opacity,
            self.output.0,
            self.output.1,
            &self.ranges,
        ) {
            Ok(transform) => {
                next.transform = transform;
                *layer = next;
                debug!("ClientSurface '{}': now {:?}", self.name, transform);
                Ok(())
            }
            Err(e) => {
                info!("ClientSurface '{}': refused update, {}", self.name, e);
                Err(e)
            }
        }
    }
}

impl Client for ClientSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn buffer_info(&self) -> BufferInfo {
        self.buffer.info()
    }

    fn geometry(&self) -> Rectangle {
        self.layer().geometry
    }

    fn set_geometry(&self, geometry: Rectangle) -> Result<(), ClientError> {
        self.update(|layer| layer.geometry = geometry)
    }

    fn zorder(&self) -> u32 {
        self.layer().zorder
    }

    fn set_zorder(&self, zorder: u32) -> Result<(), ClientError> {
        self.update(|layer| layer.zorder = zorder)
    }

    fn opacity(&self) -> u32 {
        self.layer().opacity
    }

    fn set_opacity(&self, opacity: u32) -> Result<(), ClientError> {
        self.update(|layer| layer.opacity = opacity)
    }

    fn transform(&self) -> Transform {
        self.layer().transform
    }
}

impl Render for ClientSurface {
    fn scan_out(&self) -> bool {
        match self.compositor.upgrade() {
            Some(compositor) => compositor.composite_for(&self.name),
            None => false,
        }
    }
}

impl std::fmt::Debug for ClientSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSurface")
            .field("name", &self.name)
            .field("buffer", &self.buffer)
            .field("retired", &self.is_retired())
            .finish()
    }
}
