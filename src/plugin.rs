// src/plugin.rs

//! Plugin lifecycle.
//!
//! A host hands the plugin a `ServiceHost` at startup. `configure` reads the
//! host's JSON config line, brings up the platform, the graphics device and
//! the compositor, starts the transfer listener, advertises the connector
//! in the environment and tells the host which subsystems are ready.
//! `deinitialize` undoes all of it before returning.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::{info, warn};
use std::sync::{Arc, Mutex};

use crate::compositor::Compositor;
use crate::config::Config;
use crate::error::lock_or_recover;
use crate::gpu::egl::EglDevice;
use crate::gpu::GpuDevice;
use crate::platform::{self, Platform};

/// Environment variable through which children find the compositor.
pub const CONNECTOR_ENV: &str = "COMPOSITOR";

bitflags! {
    /// Subsystems the compositor can report as ready.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Subsystems: u32 {
        const PLATFORM = 1 << 0;
        const GRAPHICS = 1 << 1;
    }
}

/// What the plugin needs from whoever hosts it.
pub trait ServiceHost {
    /// JSON configuration for this plugin; may be empty.
    fn config_line(&self) -> String;

    fn set_subsystems_ready(&self, ready: Subsystems);
}

/// Builds the graphics device for a freshly opened platform.
pub type DeviceFactory = Box<dyn Fn(&dyn Platform) -> Result<Arc<dyn GpuDevice>> + Send + Sync>;

pub struct CompositorPlugin {
    device_factory: DeviceFactory,
    compositor: Option<Arc<Compositor>>,
}

impl Default for CompositorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositorPlugin {
    /// A plugin rendering through EGL/GLES.
    pub fn new() -> Self {
        Self::with_device_factory(Box::new(|platform: &dyn Platform| -> Result<Arc<dyn GpuDevice>> {
            let device: Arc<dyn GpuDevice> = Arc::new(EglDevice::new(platform)?);
            Ok(device)
        }))
    }

    pub fn with_device_factory(device_factory: DeviceFactory) -> Self {
        CompositorPlugin {
            device_factory,
            compositor: None,
        }
    }

    pub fn compositor(&self) -> Option<&Arc<Compositor>> {
        self.compositor.as_ref()
    }

    pub fn configure(&mut self, host: &dyn ServiceHost) -> Result<()> {
        if self.compositor.is_some() {
            warn!("CompositorPlugin: already configured");
            return Ok(());
        }

        let config = Config::from_json_str(&host.config_line())?;
        let platform = platform::open(&config.platform).context("Failed to open the platform")?;
        let device = (self.device_factory)(platform.as_ref())
            .context("Failed to create the graphics device")?;

        let compositor = Compositor::new(platform, device, &config);
        // Exported while this is still the only compositor thread.
        std::env::set_var(CONNECTOR_ENV, &config.connector);
        if !compositor.start_transfer() {
            warn!("CompositorPlugin: running without descriptor exchange");
        }

        host.set_subsystems_ready(Subsystems::PLATFORM | Subsystems::GRAPHICS);
        info!(
            "CompositorPlugin: configured, {}={}",
            CONNECTOR_ENV, config.connector
        );
        self.compositor = Some(compositor);
        Ok(())
    }

    /// Releases the compositor, its GPU resources and the platform. A second
    /// call does nothing.
    pub fn deinitialize(&mut self) {
        let Some(compositor) = self.compositor.take() else {
            return;
        };
        compositor.deinitialize();
        let others = Arc::strong_count(&compositor) - 1;
        if others > 0 {
            warn!(
                "CompositorPlugin: {} references to the compositor outlive deinitialize",
                others
            );
        }
        drop(compositor);
        info!("CompositorPlugin: deinitialized");
    }
}

/// Host used when the compositor runs as its own process: the config line
/// is the serialized process configuration and readiness is only logged.
pub struct StandaloneHost {
    config_line: String,
    ready: Mutex<Subsystems>,
}

impl StandaloneHost {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(StandaloneHost {
            config_line: serde_json::to_string(config).context("Failed to serialize config")?,
            ready: Mutex::new(Subsystems::empty()),
        })
    }

    pub fn ready(&self) -> Subsystems {
        *lock_or_recover(&self.ready, "StandaloneHost")
    }
}

impl ServiceHost for StandaloneHost {
    fn config_line(&self) -> String {
        self.config_line.clone()
    }

    fn set_subsystems_ready(&self, ready: Subsystems) {
        let mut current = lock_or_recover(&self.ready, "StandaloneHost");
        current.insert(ready);
        info!("StandaloneHost: ready {:?}", *current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::Display;
    use crate::config::PlatformBackend;
    use crate::gpu::mock::MockGpu;
    use anyhow::bail;
    use std::path::PathBuf;
    use test_log::test;

    fn socket(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("compositor-plugin-{}", std::process::id()))
            .join(format!("{}.sock", tag))
    }

    fn headless_config(tag: &str) -> Config {
        let mut config = Config::default();
        config.platform.backend = PlatformBackend::Headless;
        config.transfer.socket_path = socket(tag);
        config
    }

    fn mock_plugin() -> CompositorPlugin {
        CompositorPlugin::with_device_factory(Box::new(|_: &dyn Platform| -> Result<Arc<dyn GpuDevice>> {
            let device: Arc<dyn GpuDevice> = Arc::new(MockGpu::new());
            Ok(device)
        }))
    }

    #[test]
    fn it_should_report_readiness_after_configure() -> Result<()> {
        let host = StandaloneHost::new(&headless_config("ready"))?;
        let mut plugin = mock_plugin();

        plugin.configure(&host)?;
        assert_eq!(host.ready(), Subsystems::PLATFORM | Subsystems::GRAPHICS);
        assert_eq!(
            std::env::var(CONNECTOR_ENV).ok().as_deref(),
            Some("/tmp/compositor")
        );
        assert!(socket("ready").exists());

        let compositor = plugin.compositor().expect("configured");
        assert_eq!(compositor.port(), "HDMI0");
        compositor.create_client("video", 64, 64).expect("client");
        assert!(compositor.composite_for("video"));

        plugin.deinitialize();
        assert!(plugin.compositor().is_none());
        assert!(!socket("ready").exists());
        plugin.deinitialize();
        Ok(())
    }

    #[test]
    fn it_should_advertise_the_connector_even_without_descriptor_exchange() -> Result<()> {
        let mut config = headless_config("unused");
        config.transfer.socket_path = PathBuf::from("/proc/compositor-plugin/DMA");
        let host = StandaloneHost::new(&config)?;
        let mut plugin = mock_plugin();

        plugin.configure(&host)?;
        let compositor = plugin.compositor().expect("configured");
        assert!(compositor.transfer_status().is_err());
        assert_eq!(
            std::env::var(CONNECTOR_ENV).ok().as_deref(),
            Some("/tmp/compositor")
        );
        assert_eq!(host.ready(), Subsystems::PLATFORM | Subsystems::GRAPHICS);

        plugin.deinitialize();
        Ok(())
    }

    #[test]
    fn it_should_report_nothing_when_the_config_line_is_bad() {
        struct BrokenHost(Mutex<Subsystems>);
        impl ServiceHost for BrokenHost {
            fn config_line(&self) -> String {
                "{ not json".to_string()
            }
            fn set_subsystems_ready(&self, ready: Subsystems) {
                self.0.lock().expect("lock").insert(ready);
            }
        }

        let host = BrokenHost(Mutex::new(Subsystems::empty()));
        let mut plugin = mock_plugin();
        assert!(plugin.configure(&host).is_err());
        assert!(host.0.lock().expect("lock").is_empty());
        assert!(plugin.compositor().is_none());
    }

    #[test]
    fn it_should_report_nothing_when_the_device_fails() -> Result<()> {
        let host = StandaloneHost::new(&headless_config("no-device"))?;
        let mut plugin = CompositorPlugin::with_device_factory(Box::new(|_: &dyn Platform| -> Result<Arc<dyn GpuDevice>> {
            bail!("no GPU here")
        }));
        assert!(plugin.configure(&host).is_err());
        assert!(host.ready().is_empty());
        Ok(())
    }

    #[test]
    fn it_should_ignore_a_second_configure() -> Result<()> {
        let host = StandaloneHost::new(&headless_config("twice"))?;
        let mut plugin = mock_plugin();
        plugin.configure(&host)?;
        let first = Arc::clone(plugin.compositor().expect("configured"));
        plugin.configure(&host)?;
        assert!(Arc::ptr_eq(&first, plugin.compositor().expect("configured")));
        drop(first);
        plugin.deinitialize();
        Ok(())
    }
}
