// src/gpu/mock.rs

//! A `GpuDevice` that records what it is asked to do.
//!
//! It tracks live images and textures so tests can check for leaks, refuses
//! to draw with destroyed resources, and notes every violation of the
//! context discipline (draw calls without the context current, or the
//! context made current on two threads at once).

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::lock_or_recover;
use crate::gpu::{DmaBufAttributes, GpuDevice, ImageId, ModifierInfo, TextureId};
use crate::platform::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR, DRM_FORMAT_XRGB8888};
use crate::scene::viewport::Viewport;

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCall {
    External {
        image: ImageId,
        target: TextureId,
        viewport: Viewport,
    },
    BeginScene {
        width: u32,
        height: u32,
    },
    Layer {
        texture: TextureId,
        viewport: Viewport,
        depth: f32,
        opacity: f32,
    },
    EndScene,
}

#[derive(Default)]
struct MockState {
    images: HashSet<ImageId>,
    textures: HashSet<TextureId>,
    imported: Vec<DmaBufAttributes>,
    draws: Vec<DrawCall>,
    current: Option<ThreadId>,
    violations: Vec<String>,
}

pub struct MockGpu {
    formats: Vec<u32>,
    modifiers: Vec<ModifierInfo>,
    state: Mutex<MockState>,
    next_image: AtomicU64,
    next_texture: AtomicU32,
    swaps: AtomicU64,
    fail_imports: AtomicBool,
    layer_delay: Mutex<Option<Duration>>,
    max_viewport: Mutex<(i32, i32)>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    /// A device importing linear ARGB8888/XRGB8888.
    pub fn new() -> Self {
        Self::with_caps(
            vec![DRM_FORMAT_ARGB8888, DRM_FORMAT_XRGB8888],
            vec![ModifierInfo {
                modifier: DRM_FORMAT_MOD_LINEAR,
                external_only: false,
            }],
        )
    }

    pub fn with_caps(formats: Vec<u32>, modifiers: Vec<ModifierInfo>) -> Self {
        MockGpu {
            formats,
            modifiers,
            state: Mutex::new(MockState::default()),
            next_image: AtomicU64::new(1),
            next_texture: AtomicU32::new(1),
            swaps: AtomicU64::new(0),
            fail_imports: AtomicBool::new(false),
            layer_delay: Mutex::new(None),
            max_viewport: Mutex::new((8192, 8192)),
        }
    }

    /// Makes `create_image` fail until switched back.
    pub fn set_fail_imports(&self, fail: bool) {
        self.fail_imports.store(fail, Ordering::SeqCst);
    }

    /// Stretches every `draw_layer` call by `delay`.
    pub fn set_layer_delay(&self, delay: Option<Duration>) {
        *lock_or_recover(&self.layer_delay, "MockGpu delay") = delay;
    }

    pub fn set_max_viewport_dims(&self, dims: (i32, i32)) {
        *lock_or_recover(&self.max_viewport, "MockGpu viewport") = dims;
    }

    pub fn live_images(&self) -> usize {
        self.state().images.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state().textures.len()
    }

    pub fn is_image_live(&self, image: ImageId) -> bool {
        self.state().images.contains(&image)
    }

    pub fn imported(&self) -> Vec<DmaBufAttributes> {
        self.state().imported.clone()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.state().draws.clone()
    }

    pub fn clear_draws(&self) {
        self.state().draws.clear();
    }

    pub fn swaps(&self) -> u64 {
        self.swaps.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Depths of the layers drawn by the most recent scene, in draw order.
    pub fn last_scene_depths(&self) -> Vec<f32> {
        let draws = self.draws();
        let start = draws
            .iter()
            .rposition(|d| matches!(d, DrawCall::BeginScene { .. }))
            .map(|i| i + 1)
            .unwrap_or(0);
        draws[start..]
            .iter()
            .filter_map(|d| match d {
                DrawCall::Layer { depth, .. } => Some(*depth),
                _ => None,
            })
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        lock_or_recover(&self.state, "MockGpu")
    }

    fn require_current(&self, state: &mut MockState, op: &str) {
        if state.current != Some(thread::current().id()) {
            state
                .violations
                .push(format!("{} without the context current", op));
        }
    }
}

impl GpuDevice for MockGpu {
    fn dmabuf_formats(&self) -> Result<Vec<u32>> {
        Ok(self.formats.clone())
    }

    fn dmabuf_modifiers(&self, format: u32) -> Result<Vec<ModifierInfo>> {
        if self.formats.contains(&format) {
            Ok(self.modifiers.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn create_image(&self, attrs: &DmaBufAttributes) -> Result<ImageId> {
        if self.fail_imports.load(Ordering::SeqCst) {
            bail!("injected import failure");
        }
        let image = ImageId(self.next_image.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state();
        state.images.insert(image);
        state.imported.push(*attrs);
        Ok(image)
    }

    fn destroy_image(&self, image: ImageId) -> Result<()> {
        let mut state = self.state();
        if !state.images.remove(&image) {
            state.violations.push(format!("double destroy of {:?}", image));
            bail!("{:?} is not live", image);
        }
        Ok(())
    }

    fn make_current(&self) -> Result<()> {
        let mut state = self.state();
        let me = thread::current().id();
        if let Some(owner) = state.current {
            if owner != me {
                state
                    .violations
                    .push("context current on two threads".to_string());
            }
        }
        state.current = Some(me);
        Ok(())
    }

    fn release_current(&self) -> Result<()> {
        let mut state = self.state();
        if state.current != Some(thread::current().id()) {
            state
                .violations
                .push("release from a thread not holding the context".to_string());
        }
        state.current = None;
        Ok(())
    }

    fn max_viewport_dims(&self) -> (i32, i32) {
        *lock_or_recover(&self.max_viewport, "MockGpu viewport")
    }

    fn create_texture(&self, _width: u32, _height: u32) -> Result<TextureId> {
        let mut state = self.state();
        self.require_current(&mut state, "create_texture");
        let texture = TextureId(self.next_texture.fetch_add(1, Ordering::SeqCst));
        state.textures.insert(texture);
        Ok(texture)
    }

    fn destroy_texture(&self, texture: TextureId) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "destroy_texture");
        if !state.textures.remove(&texture) {
            state.violations.push(format!("double destroy of {:?}", texture));
            bail!("{:?} is not live", texture);
        }
        Ok(())
    }

    fn draw_external(&self, image: ImageId, target: TextureId, viewport: &Viewport) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "draw_external");
        if !state.images.contains(&image) || !state.textures.contains(&target) {
            state
                .violations
                .push(format!("stage 1 with dead {:?} or {:?}", image, target));
            bail!("stage 1 with a dead resource");
        }
        state.draws.push(DrawCall::External {
            image,
            target,
            viewport: *viewport,
        });
        Ok(())
    }

    fn begin_scene(&self, width: u32, height: u32) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "begin_scene");
        state.draws.push(DrawCall::BeginScene { width, height });
        Ok(())
    }

    fn draw_layer(
        &self,
        texture: TextureId,
        viewport: &Viewport,
        depth: f32,
        opacity: f32,
    ) -> Result<()> {
        let delay = *lock_or_recover(&self.layer_delay, "MockGpu delay");
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        let mut state = self.state();
        self.require_current(&mut state, "draw_layer");
        if !state.textures.contains(&texture) {
            state
                .violations
                .push(format!("stage 2 with dead {:?}", texture));
            bail!("stage 2 with a dead texture");
        }
        state.draws.push(DrawCall::Layer {
            texture,
            viewport: *viewport,
            depth,
            opacity,
        });
        Ok(())
    }

    fn end_scene(&self) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "end_scene");
        state.draws.push(DrawCall::EndScene);
        Ok(())
    }

    fn swap_buffers(&self) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "swap_buffers");
        self.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state();
        self.require_current(&mut state, "wait_idle");
        Ok(())
    }
}
