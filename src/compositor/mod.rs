// src/compositor/mod.rs

//! Compositor Façade.
//!
//! Owns the client registry and the observer list (both under one
//! administrative lock), the render pipeline, the image importer and the
//! transfer channel. `composite_for` is the per-client entry point: stage 1
//! for that client every time, stage 2 and present when the pacer says a
//! pass is due.
//!
//! Lock order: administrative lock, then a client's image slot, then the
//! graphics context, then the scene. The administrative lock is never held
//! across GPU work.

pub mod client;
pub mod observer;

pub use client::{Client, ClientSurface, Render};
pub use observer::CompositionObserver;

use anyhow::{bail, Result};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Instant;

use crate::buffer::{BufferHandle, BufferInfo};
use crate::config::{Config, TransferConfig};
use crate::error::{lock_or_recover, ClientError, TransferError};
use crate::gpu::GpuDevice;
use crate::importer::ImageImporter;
use crate::platform::{Platform, ScreenResolution};
use crate::scene::transform::ValueRanges;
use crate::scene::{FramePacer, RenderPipeline, SceneRegistry};
use crate::transfer::{DescriptorProvider, TransferChannel};

/// Output-side queries and controls.
pub trait Display: Send + Sync {
    fn port(&self) -> &str;

    fn resolution(&self) -> ScreenResolution;

    /// Mode changes are not supported; always fails.
    fn set_resolution(&self, resolution: ScreenResolution) -> Result<()>;

    /// Opaque value of the platform's native display handle.
    fn native_display(&self) -> usize;
}

#[derive(Default)]
struct Admin {
    clients: HashMap<String, Arc<ClientSurface>>,
    observers: Vec<Arc<dyn CompositionObserver>>,
}

enum TransferState {
    NotStarted,
    Running(TransferChannel),
    /// Setup failed once; descriptor exchange stays off for this process.
    Disabled,
    /// Torn down by `deinitialize`.
    Closed,
}

pub struct Compositor {
    self_ref: Weak<Compositor>,
    platform: Arc<dyn Platform>,
    pipeline: RenderPipeline,
    importer: ImageImporter,
    ranges: ValueRanges,
    port: String,
    transfer_config: TransferConfig,
    pacer: Mutex<FramePacer>,
    admin: Mutex<Admin>,
    transfer: Mutex<TransferState>,
}

impl Compositor {
    pub fn new(
        platform: Arc<dyn Platform>,
        device: Arc<dyn GpuDevice>,
        config: &Config,
    ) -> Arc<Self> {
        let mode = platform.output_mode();
        let refresh_hz = match mode.resolution() {
            ScreenResolution::Unknown if mode.refresh_hz > 0 => mode.refresh_hz,
            ScreenResolution::Unknown => config.render.default_refresh_hz,
            named => named.refresh_rate(),
        };
        let pacer = FramePacer::from_refresh_rate(refresh_hz);
        info!(
            "Compositor: {}x{} output, pass interval {:?}, {:?} viewports",
            mode.width,
            mode.height,
            pacer.interval(),
            config.render.viewport_strategy
        );

        let ranges = ValueRanges {
            min_zorder: config.render.min_zorder,
            max_zorder: config.render.max_zorder,
            min_opacity: config.render.min_opacity,
            max_opacity: config.render.max_opacity,
        };

        Arc::new_cyclic(|self_ref| Compositor {
            self_ref: self_ref.clone(),
            importer: ImageImporter::new(Arc::clone(&device), Arc::clone(&platform)),
            pipeline: RenderPipeline::new(device, config.render.viewport_strategy),
            platform,
            ranges,
            port: config.port.clone(),
            transfer_config: config.transfer.clone(),
            pacer: Mutex::new(pacer),
            admin: Mutex::new(Admin::default()),
            transfer: Mutex::new(TransferState::NotStarted),
        })
    }

    fn admin(&self) -> MutexGuard<'_, Admin> {
        lock_or_recover(&self.admin, "Compositor admin")
    }

    /// Starts the transfer channel if it has not been tried yet. Returns
    /// whether it is running. A failed start disables the channel for good.
    pub fn start_transfer(&self) -> bool {
        let mut state = lock_or_recover(&self.transfer, "Compositor transfer");
        if let TransferState::NotStarted = *state {
            let provider: Weak<dyn DescriptorProvider> = self.self_ref.clone();
            *state = match TransferChannel::start(
                &self.transfer_config.socket_path,
                self.transfer_config.max_message_len,
                provider,
            ) {
                Ok(channel) => TransferState::Running(channel),
                Err(e) => {
                    error!(
                        "Compositor: {:#}. Descriptor exchange disabled, local composition continues.",
                        e
                    );
                    TransferState::Disabled
                }
            };
        }
        matches!(*state, TransferState::Running(_))
    }

    /// Why descriptor exchange is unavailable, if it is.
    pub fn transfer_status(&self) -> Result<(), TransferError> {
        match *lock_or_recover(&self.transfer, "Compositor transfer") {
            TransferState::Running(_) => Ok(()),
            _ => Err(TransferError::Disabled),
        }
    }

    /// Allocates a `width` x `height` client called `name` and announces it
    /// to the observers. `None` if the name is taken or allocation fails.
    pub fn create_client(&self, name: &str, width: u32, height: u32) -> Option<Arc<ClientSurface>> {
        self.start_transfer();

        if name.is_empty() {
            error!("Compositor: refusing a client without a name");
            return None;
        }
        if self.admin().clients.contains_key(name) {
            warn!("Compositor: client '{}' already exists", name);
            return None;
        }

        let buffer = match self.platform.create_buffer(width, height) {
            Ok(native) => BufferHandle::new(native),
            Err(e) => {
                error!("Compositor: buffer for '{}' failed: {:#}", name, e);
                return None;
            }
        };
        if !buffer.is_dma_ready() {
            error!("Compositor: buffer for '{}' has no descriptor", name);
            return None;
        }

        let mode = self.platform.output_mode();
        let client = match ClientSurface::new(
            name,
            buffer,
            (mode.width, mode.height),
            self.ranges,
            self.self_ref.clone(),
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Compositor: client '{}' does not fit the output: {}", name, e);
                return None;
            }
        };

        let mut admin = self.admin();
        if admin.clients.contains_key(name) {
            warn!("Compositor: client '{}' already exists", name);
            return None;
        }
        admin.clients.insert(name.to_string(), Arc::clone(&client));
        for observer in &admin.observers {
            observer.attached(name, Arc::clone(&client) as Arc<dyn Client>);
        }
        info!(
            "Compositor: attached '{}' ({}x{}), {} clients",
            name,
            width,
            height,
            admin.clients.len()
        );
        Some(client)
    }

    pub fn client(&self, name: &str) -> Option<Arc<ClientSurface>> {
        self.admin().clients.get(name).cloned()
    }

    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.admin().clients.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs stage 1 for `name`, then stage 2 and present if a pass is due.
    ///
    /// `false` when the client is unknown or its buffer cannot be imported
    /// yet (both expected, retried on the next request) or when rendering
    /// failed.
    pub fn composite_for(&self, name: &str) -> bool {
        let Some(client) = self.client(name) else {
            info!("Compositor: composite for unknown client '{}'", name);
            return false;
        };

        if let Err(e) = self.stage_client(&client) {
            match e.downcast_ref::<ClientError>() {
                Some(expected) => info!("Compositor: {}", expected),
                None => error!("Compositor: composite for '{}' failed: {:#}", name, e),
            }
            return false;
        }
        self.present_if_due()
    }

    /// Stage 1 under the client's image slot, importing first if needed.
    fn stage_client(&self, client: &ClientSurface) -> Result<()> {
        let name = client.name();
        let mut slot = client.buffer().image_slot();
        if client.is_retired() {
            return Err(ClientError::UnknownClient(name.to_string()).into());
        }
        if !slot.is_valid() {
            *slot = self.importer.import(client.buffer());
            if !slot.is_valid() {
                return Err(ClientError::NotReady(name.to_string()).into());
            }
            debug!("Compositor: '{}' bound to {:?}", name, *slot);
        }

        let info = client.buffer().info();
        let (transform, z_key) = client.placement();
        self.pipeline
            .render_imported_image(*slot, info.width, info.height, transform, z_key)
    }

    fn present_if_due(&self) -> bool {
        let started = Instant::now();
        if !lock_or_recover(&self.pacer, "Compositor pacer").try_begin(started) {
            trace!("Compositor: pass not due");
            return true;
        }

        let mode = self.platform.output_mode();
        let presented = self
            .pipeline
            .render_scene(mode.width, mode.height)
            .and_then(|layers| {
                self.platform.page_flip()?;
                Ok(layers)
            });
        match presented {
            Ok(layers) => trace!("Compositor: presented {} layers", layers),
            Err(e) => {
                error!("Compositor: pass failed, frame not presented: {:#}", e);
                return false;
            }
        }

        let remaining = lock_or_recover(&self.pacer, "Compositor pacer")
            .remaining(started, Instant::now());
        if let Some(remaining) = remaining {
            thread::sleep(remaining);
        }
        true
    }

    /// Removes `name`: evicts its scene entry and destroys its image, then
    /// tells the observers. `false` if there was no such client.
    pub fn detach(&self, name: &str) -> bool {
        let Some(client) = self.admin().clients.remove(name) else {
            info!("Compositor: detach of unknown client '{}'", name);
            return false;
        };
        client.retire();

        {
            let mut slot = client.buffer().image_slot();
            if slot.is_valid() {
                if let Err(e) = self.pipeline.evict(*slot) {
                    error!("Compositor: evicting '{}' failed: {:#}", name, e);
                }
                *slot = self.importer.export(*slot);
            }
        }

        let admin = self.admin();
        for observer in &admin.observers {
            observer.detached(name);
        }
        info!(
            "Compositor: detached '{}', {} clients",
            name,
            admin.clients.len()
        );
        true
    }

    /// Adds an observer and replays `attached` for every existing client.
    pub fn register(&self, observer: Arc<dyn CompositionObserver>) {
        let mut admin = self.admin();
        if admin
            .observers
            .iter()
            .any(|o| observer::same_observer(o, &observer))
        {
            warn!("Compositor: observer registered twice, ignoring");
            return;
        }
        for (name, client) in &admin.clients {
            observer.attached(name, Arc::clone(client) as Arc<dyn Client>);
        }
        admin.observers.push(observer);
        debug!("Compositor: {} observers", admin.observers.len());
    }

    pub fn unregister(&self, observer: &Arc<dyn CompositionObserver>) {
        let mut admin = self.admin();
        match admin
            .observers
            .iter()
            .position(|o| observer::same_observer(o, observer))
        {
            Some(index) => {
                admin.observers.remove(index);
                debug!("Compositor: {} observers", admin.observers.len());
            }
            None => info!("Compositor: unregister of an unknown observer"),
        }
    }

    pub fn scene(&self) -> &SceneRegistry {
        self.pipeline.scene()
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Stops the transfer channel, detaches every client and frees every
    /// scene texture. Safe to call more than once.
    pub fn deinitialize(&self) {
        let previous = std::mem::replace(
            &mut *lock_or_recover(&self.transfer, "Compositor transfer"),
            TransferState::Closed,
        );
        if let TransferState::Running(mut channel) = previous {
            channel.stop();
        }

        let names: Vec<String> = self.admin().clients.keys().cloned().collect();
        for name in names {
            self.detach(&name);
        }
        if let Err(e) = self.pipeline.clear() {
            error!("Compositor: releasing scene textures failed: {:#}", e);
        }
        debug!("Compositor: deinitialized");
    }
}

impl Display for Compositor {
    fn port(&self) -> &str {
        &self.port
    }

    fn resolution(&self) -> ScreenResolution {
        self.platform.output_mode().resolution()
    }

    fn set_resolution(&self, resolution: ScreenResolution) -> Result<()> {
        error!("Compositor: cannot switch the output to {}", resolution);
        bail!("Changing the output resolution is not supported")
    }

    fn native_display(&self) -> usize {
        self.platform.native_display() as usize
    }
}

impl DescriptorProvider for Compositor {
    fn descriptor_for(&self, name: &str) -> Option<(OwnedFd, BufferInfo)> {
        let client = self.client(name)?;
        let buffer = client.buffer();

        let mut slot = buffer.image_slot();
        if client.is_retired() {
            return None;
        }
        if !slot.is_valid() {
            *slot = self.importer.import(buffer);
        }
        match buffer.duplicate_descriptor() {
            Ok(fd) => Some((fd, buffer.info())),
            Err(e) => {
                error!("Compositor: no descriptor to hand out for '{}': {:#}", name, e);
                None
            }
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.deinitialize();
    }
}
