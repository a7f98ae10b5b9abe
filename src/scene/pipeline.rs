// src/scene/pipeline.rs

//! Two-stage composition on the graphics device.
//!
//! Stage 1 copies a client's imported image into the offscreen texture of
//! its scene entry, creating the texture on first sight. Stage 2 draws every
//! entry back to front into the presentation surface and presents it.
//!
//! Lock order is context, then scene. Every GPU call happens with the
//! context held; the scene lock only ever covers a map operation. Eviction
//! takes the context too, so a texture is never destroyed under a pass that
//! is still drawing it.
//!
//! A viewport anomaly is warned about when a layer first shows it; the same
//! anomaly on later passes only reaches the debug log.

use anyhow::{Context, Result};
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::lock_or_recover;
use crate::gpu::{ContextGuard, GpuDevice, ImageId, TextureId};
use crate::scene::registry::{SceneRegistry, Staged};
use crate::scene::transform::Transform;
use crate::scene::viewport::{Viewport, ViewportStrategy};

pub struct RenderPipeline {
    device: Arc<dyn GpuDevice>,
    context: Mutex<()>,
    scene: SceneRegistry,
    strategy: ViewportStrategy,
    /// Last anomaly reported per layer.
    anomalies: Mutex<HashMap<ImageId, &'static str>>,
}

impl RenderPipeline {
    pub fn new(device: Arc<dyn GpuDevice>, strategy: ViewportStrategy) -> Self {
        RenderPipeline {
            device,
            context: Mutex::new(()),
            scene: SceneRegistry::new(),
            strategy,
            anomalies: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn scene(&self) -> &SceneRegistry {
        &self.scene
    }

    pub fn strategy(&self) -> ViewportStrategy {
        self.strategy
    }

    /// Makes the context current on this thread until the guard drops.
    pub fn acquire_context(&self) -> Result<ContextGuard<'_>> {
        ContextGuard::acquire(self.device.as_ref(), &self.context)
            .context("Failed to make the graphics context current")
    }

    /// Stage 1. Draws `image` into its composition texture and records
    /// `transform` and `z_key` on the scene entry. Opacity is applied in
    /// stage 2 only.
    pub fn render_imported_image(
        &self,
        image: ImageId,
        width: u32,
        height: u32,
        transform: Transform,
        z_key: u32,
    ) -> Result<()> {
        let ctx = self.acquire_context()?;
        let gpu = ctx.device();

        let (texture, created) = match self.scene.texture_for(image) {
            Some(texture) => (texture, false),
            None => {
                let texture = gpu
                    .create_texture(width, height)
                    .with_context(|| format!("Failed to create texture for {:?}", image))?;
                (texture, true)
            }
        };

        if let Err(e) = gpu.draw_external(image, texture, &Viewport::full(width, height)) {
            if created {
                release_texture(gpu, texture);
            }
            return Err(e).with_context(|| format!("Stage 1 failed for {:?}", image));
        }

        match self.scene.stage(image, texture, transform, z_key, width, height) {
            Staged::Inserted => debug!(
                "RenderPipeline: staged {:?} into {:?} ({}x{})",
                image, texture, width, height
            ),
            Staged::Updated { texture: kept } => {
                trace!("RenderPipeline: refreshed {:?}", image);
                if created && kept != texture {
                    // Only reachable if the entry appeared between lookup and
                    // staging; keep the entry's texture and drop ours.
                    release_texture(gpu, texture);
                }
            }
        }
        Ok(())
    }

    /// Stage 2 plus present. Draws every staged entry back to front on a
    /// `width` x `height` surface, waits for the GPU and swaps. Returns the
    /// number of layers drawn. On failure nothing is swapped.
    pub fn render_scene(&self, width: u32, height: u32) -> Result<usize> {
        let ctx = self.acquire_context()?;
        let gpu = ctx.device();

        let layers = self.scene.snapshot();
        let max_dims = gpu.max_viewport_dims();

        gpu.begin_scene(width, height).context("Failed to begin scene")?;
        for (image, entry) in &layers {
            let viewport = self.strategy.viewport(width, height, &entry.transform);
            let anomaly = self.strategy.anomaly(&viewport, width, height, max_dims);
            if let Some(reason) = self.note_anomaly(*image, anomaly) {
                warn!(
                    "RenderPipeline: possible clipping or undefined behaviour for {:?} ({}): {:?} on {}x{}, device max {:?}",
                    image,
                    reason,
                    viewport,
                    width,
                    height,
                    max_dims
                );
            }
            gpu.draw_layer(
                entry.texture,
                &viewport,
                entry.transform.offset().z,
                entry.transform.opacity(),
            )
            .with_context(|| format!("Stage 2 failed drawing {:?}", image))?;
        }
        gpu.end_scene().context("Failed to end scene")?;

        gpu.swap_buffers().context("Failed to swap buffers")?;
        gpu.wait_idle().context("Failed to wait for the GPU")?;
        Ok(layers.len())
    }

    /// Removes the entry for `image` and destroys its texture. Returns
    /// whether an entry existed. Waits for any pass in flight.
    pub fn evict(&self, image: ImageId) -> Result<bool> {
        self.forget_anomaly(image);
        let ctx = match self.acquire_context() {
            Ok(ctx) => ctx,
            Err(e) => {
                // The entry must go regardless; the texture leaks with the
                // broken context.
                if let Some(entry) = self.scene.remove(image) {
                    error!(
                        "RenderPipeline: evicted {:?} without a context, leaking {:?}",
                        image, entry.texture
                    );
                }
                return Err(e);
            }
        };

        match self.scene.remove(image) {
            Some(entry) => {
                ctx.device()
                    .destroy_texture(entry.texture)
                    .with_context(|| format!("Failed to destroy texture of {:?}", image))?;
                debug!("RenderPipeline: evicted {:?}", image);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Layers whose current viewport has an anomaly.
    pub fn anomalous_layers(&self) -> Vec<ImageId> {
        lock_or_recover(&self.anomalies, "RenderPipeline anomalies")
            .keys()
            .copied()
            .collect()
    }

    /// Records the anomaly `image` showed on this pass. Returns it only when
    /// it is new for the layer.
    fn note_anomaly(&self, image: ImageId, anomaly: Option<&'static str>) -> Option<&'static str> {
        let mut seen = lock_or_recover(&self.anomalies, "RenderPipeline anomalies");
        match anomaly {
            None => {
                seen.remove(&image);
                None
            }
            Some(reason) if seen.get(&image) == Some(&reason) => {
                debug!("RenderPipeline: {:?} still has '{}'", image, reason);
                None
            }
            Some(reason) => {
                seen.insert(image, reason);
                Some(reason)
            }
        }
    }

    fn forget_anomaly(&self, image: ImageId) {
        lock_or_recover(&self.anomalies, "RenderPipeline anomalies").remove(&image);
    }

    /// Evicts everything. Used on shutdown.
    pub fn clear(&self) -> Result<()> {
        let ctx = self.acquire_context()?;
        let entries = self.scene.drain();
        lock_or_recover(&self.anomalies, "RenderPipeline anomalies").clear();
        for entry in &entries {
            release_texture(ctx.device(), entry.texture);
        }
        debug!("RenderPipeline: cleared {} entries", entries.len());
        Ok(())
    }
}

fn release_texture(gpu: &dyn GpuDevice, texture: TextureId) {
    if let Err(e) = gpu.destroy_texture(texture) {
        warn!("RenderPipeline: failed to destroy {:?}: {:#}", texture, e);
    }
}

#[cfg(test)]
mod tests;
