// src/gpu/egl.rs

//! EGL-backed graphics device.
//!
//! Opens `libEGL.so.1` at runtime, initializes a display on the platform's
//! native handle, picks an RGBA8888 + 16-bit depth ES2 config and renders
//! into the platform window (or a pbuffer of the output size when the
//! platform has no window). dmabuf import goes through
//! `EGL_EXT_image_dma_buf_import`; presentation sync uses `EGL_KHR_fence_sync`
//! when the driver has it and `glFinish` otherwise.

use anyhow::{bail, Result};
use libloading::Library;
use log::{debug, info, warn};
use std::ffi::{c_char, c_void, CStr};

use crate::dylib::{self, symbol};
use crate::gpu::gles::{GlesApi, GlesRenderer, ImageTargetTexture2dFn};
use crate::gpu::{DmaBufAttributes, GpuDevice, ImageId, ModifierInfo, TextureId};
use crate::platform::{Platform, DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_INVALID};
use crate::scene::viewport::Viewport;

type EGLDisplay = *mut c_void;
type EGLConfig = *mut c_void;
type EGLContext = *mut c_void;
type EGLSurface = *mut c_void;
type EGLImageKHR = *mut c_void;
type EGLSyncKHR = *mut c_void;
type EGLint = i32;
type EGLenum = u32;
type EGLBoolean = u32;

const EGL_FALSE: EGLBoolean = 0;
const EGL_TRUE: EGLint = 1;
const EGL_NONE: EGLint = 0x3038;
const EGL_SUCCESS: EGLint = 0x3000;
const EGL_EXTENSIONS: EGLint = 0x3055;
const EGL_ALPHA_SIZE: EGLint = 0x3021;
const EGL_BLUE_SIZE: EGLint = 0x3022;
const EGL_GREEN_SIZE: EGLint = 0x3023;
const EGL_RED_SIZE: EGLint = 0x3024;
const EGL_DEPTH_SIZE: EGLint = 0x3025;
const EGL_NATIVE_VISUAL_ID: EGLint = 0x302E;
const EGL_SURFACE_TYPE: EGLint = 0x3033;
const EGL_RENDERABLE_TYPE: EGLint = 0x3040;
const EGL_WINDOW_BIT: EGLint = 0x0004;
const EGL_PBUFFER_BIT: EGLint = 0x0001;
const EGL_OPENGL_ES2_BIT: EGLint = 0x0004;
const EGL_WIDTH: EGLint = 0x3057;
const EGL_HEIGHT: EGLint = 0x3056;
const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;
const EGL_OPENGL_ES_API: EGLenum = 0x30A0;
const EGL_LINUX_DMA_BUF_EXT: EGLenum = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: EGLint = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: EGLint = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: EGLint = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: EGLint = 0x3274;
const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: EGLint = 0x3443;
const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: EGLint = 0x3444;
const EGL_IMAGE_PRESERVED_KHR: EGLint = 0x30D2;
const EGL_SYNC_FENCE_KHR: EGLenum = 0x30F9;
const EGL_SYNC_FLUSH_COMMANDS_BIT_KHR: EGLint = 0x0001;
const EGL_FOREVER_KHR: u64 = u64::MAX;
const EGL_CONDITION_SATISFIED_KHR: EGLint = 0x30F6;

const MAX_CONFIGS: usize = 64;

struct EglApi {
    _lib: Library,
    get_display: unsafe extern "C" fn(*mut c_void) -> EGLDisplay,
    initialize: unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean,
    terminate: unsafe extern "C" fn(EGLDisplay) -> EGLBoolean,
    query_string: unsafe extern "C" fn(EGLDisplay, EGLint) -> *const c_char,
    bind_api: unsafe extern "C" fn(EGLenum) -> EGLBoolean,
    choose_config: unsafe extern "C" fn(
        EGLDisplay,
        *const EGLint,
        *mut EGLConfig,
        EGLint,
        *mut EGLint,
    ) -> EGLBoolean,
    get_config_attrib: unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLint, *mut EGLint) -> EGLBoolean,
    create_context:
        unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLContext, *const EGLint) -> EGLContext,
    destroy_context: unsafe extern "C" fn(EGLDisplay, EGLContext) -> EGLBoolean,
    create_window_surface:
        unsafe extern "C" fn(EGLDisplay, EGLConfig, *mut c_void, *const EGLint) -> EGLSurface,
    create_pbuffer_surface:
        unsafe extern "C" fn(EGLDisplay, EGLConfig, *const EGLint) -> EGLSurface,
    destroy_surface: unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean,
    make_current:
        unsafe extern "C" fn(EGLDisplay, EGLSurface, EGLSurface, EGLContext) -> EGLBoolean,
    swap_buffers: unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean,
    get_error: unsafe extern "C" fn() -> EGLint,
    get_proc_address: unsafe extern "C" fn(*const c_char) -> *mut c_void,
}

impl EglApi {
    fn load() -> Result<Self> {
        let lib = dylib::open("libEGL.so.1")?;

        // SAFETY: signatures match EGL/egl.h; `_lib` outlives every copy.
        unsafe {
            Ok(EglApi {
                get_display: symbol(&lib, b"eglGetDisplay\0")?,
                initialize: symbol(&lib, b"eglInitialize\0")?,
                terminate: symbol(&lib, b"eglTerminate\0")?,
                query_string: symbol(&lib, b"eglQueryString\0")?,
                bind_api: symbol(&lib, b"eglBindAPI\0")?,
                choose_config: symbol(&lib, b"eglChooseConfig\0")?,
                get_config_attrib: symbol(&lib, b"eglGetConfigAttrib\0")?,
                create_context: symbol(&lib, b"eglCreateContext\0")?,
                destroy_context: symbol(&lib, b"eglDestroyContext\0")?,
                create_window_surface: symbol(&lib, b"eglCreateWindowSurface\0")?,
                create_pbuffer_surface: symbol(&lib, b"eglCreatePbufferSurface\0")?,
                destroy_surface: symbol(&lib, b"eglDestroySurface\0")?,
                make_current: symbol(&lib, b"eglMakeCurrent\0")?,
                swap_buffers: symbol(&lib, b"eglSwapBuffers\0")?,
                get_error: symbol(&lib, b"eglGetError\0")?,
                get_proc_address: symbol(&lib, b"eglGetProcAddress\0")?,
                _lib: lib,
            })
        }
    }

    /// Resolves an extension entry point.
    ///
    /// # Safety
    /// `T` must be the exact signature of `name`.
    unsafe fn proc<T: Copy>(&self, name: &CStr) -> Option<T> {
        let ptr = (self.get_proc_address)(name.as_ptr());
        if ptr.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy::<*mut c_void, T>(&ptr))
        }
    }

    fn error(&self) -> EGLint {
        // SAFETY: no preconditions.
        unsafe { (self.get_error)() }
    }

    fn extensions(&self, display: EGLDisplay) -> String {
        // SAFETY: returns a static string or null.
        unsafe {
            let ptr = (self.query_string)(display, EGL_EXTENSIONS);
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }
}

type GetPlatformDisplayFn = unsafe extern "C" fn(EGLenum, *mut c_void, *const EGLint) -> EGLDisplay;
type CreateImageFn =
    unsafe extern "C" fn(EGLDisplay, EGLContext, EGLenum, *mut c_void, *const EGLint) -> EGLImageKHR;
type DestroyImageFn = unsafe extern "C" fn(EGLDisplay, EGLImageKHR) -> EGLBoolean;
type QueryFormatsFn = unsafe extern "C" fn(EGLDisplay, EGLint, *mut EGLint, *mut EGLint) -> EGLBoolean;
type QueryModifiersFn = unsafe extern "C" fn(
    EGLDisplay,
    EGLint,
    EGLint,
    *mut u64,
    *mut EGLBoolean,
    *mut EGLint,
) -> EGLBoolean;
type CreateSyncFn = unsafe extern "C" fn(EGLDisplay, EGLenum, *const EGLint) -> EGLSyncKHR;
type ClientWaitSyncFn = unsafe extern "C" fn(EGLDisplay, EGLSyncKHR, EGLint, u64) -> EGLint;
type DestroySyncFn = unsafe extern "C" fn(EGLDisplay, EGLSyncKHR) -> EGLBoolean;

struct DmaBufProcs {
    create_image: CreateImageFn,
    destroy_image: DestroyImageFn,
    query_formats: QueryFormatsFn,
    query_modifiers: QueryModifiersFn,
}

struct FenceProcs {
    create: CreateSyncFn,
    client_wait: ClientWaitSyncFn,
    destroy: DestroySyncFn,
}

pub struct EglDevice {
    api: EglApi,
    dmabuf: DmaBufProcs,
    fence: Option<FenceProcs>,
    display: EGLDisplay,
    context: EGLContext,
    surface: EGLSurface,
    renderer: GlesRenderer,
}

// SAFETY: EGL handles are process-wide. The context is only made current
// through the render pipeline's context lock, so GL state is never touched
// from two threads at once; image creation and queries need no context.
unsafe impl Send for EglDevice {}
unsafe impl Sync for EglDevice {}

impl EglDevice {
    pub fn new(platform: &dyn Platform) -> Result<Self> {
        let api = EglApi::load()?;
        let gles = GlesApi::load()?;

        let display = Self::open_display(&api, platform)?;
        Self::build(api, gles, display, platform)
    }

    fn open_display(api: &EglApi, platform: &dyn Platform) -> Result<EGLDisplay> {
        // SAFETY: the native handle comes from the platform and stays valid
        // for the platform's lifetime, which outlives the device.
        let display = unsafe {
            let by_platform = platform.egl_platform().and_then(|kind| {
                api.proc::<GetPlatformDisplayFn>(c"eglGetPlatformDisplayEXT")
                    .map(|get| get(kind, platform.native_display(), std::ptr::null()))
            });
            match by_platform {
                Some(display) if !display.is_null() => display,
                _ => (api.get_display)(platform.native_display()),
            }
        };
        if display.is_null() {
            bail!("No EGL display for the {} platform", platform.name());
        }

        let (mut major, mut minor) = (0, 0);
        // SAFETY: `display` is non-null; out-pointers reference locals.
        if unsafe { (api.initialize)(display, &mut major, &mut minor) } == EGL_FALSE {
            bail!("eglInitialize failed (0x{:04X})", api.error());
        }
        info!("EglDevice: EGL {}.{} on {}", major, minor, platform.name());
        Ok(display)
    }

    fn build(
        api: EglApi,
        gles: GlesApi,
        display: EGLDisplay,
        platform: &dyn Platform,
    ) -> Result<Self> {
        let cleanup = |api: &EglApi| {
            // SAFETY: terminating a display we initialized.
            unsafe { (api.terminate)(display) };
        };

        let extensions = api.extensions(display);
        for required in [
            "EGL_KHR_image_base",
            "EGL_EXT_image_dma_buf_import",
            "EGL_EXT_image_dma_buf_import_modifiers",
        ] {
            if !extensions.contains(required) {
                cleanup(&api);
                bail!("{} is not supported", required);
            }
        }

        // SAFETY: extension signatures match EGL/eglext.h.
        let dmabuf = unsafe {
            match (
                api.proc::<CreateImageFn>(c"eglCreateImageKHR"),
                api.proc::<DestroyImageFn>(c"eglDestroyImageKHR"),
                api.proc::<QueryFormatsFn>(c"eglQueryDmaBufFormatsEXT"),
                api.proc::<QueryModifiersFn>(c"eglQueryDmaBufModifiersEXT"),
            ) {
                (Some(create_image), Some(destroy_image), Some(query_formats), Some(query_modifiers)) => {
                    DmaBufProcs {
                        create_image,
                        destroy_image,
                        query_formats,
                        query_modifiers,
                    }
                }
                _ => {
                    cleanup(&api);
                    bail!("dmabuf import entry points are missing");
                }
            }
        };

        let fence = if extensions.contains("EGL_KHR_fence_sync") {
            // SAFETY: as above.
            unsafe {
                match (
                    api.proc::<CreateSyncFn>(c"eglCreateSyncKHR"),
                    api.proc::<ClientWaitSyncFn>(c"eglClientWaitSyncKHR"),
                    api.proc::<DestroySyncFn>(c"eglDestroySyncKHR"),
                ) {
                    (Some(create), Some(client_wait), Some(destroy)) => Some(FenceProcs {
                        create,
                        client_wait,
                        destroy,
                    }),
                    _ => None,
                }
            }
        } else {
            None
        };
        if fence.is_none() {
            warn!("EglDevice: no fence sync, presentation will use glFinish");
        }

        // SAFETY: as above.
        let image_target: Option<ImageTargetTexture2dFn> =
            unsafe { api.proc(c"glEGLImageTargetTexture2DOES") };
        let Some(image_target) = image_target else {
            cleanup(&api);
            bail!("glEGLImageTargetTexture2DOES is missing");
        };

        let (context, surface) = match Self::create_context(&api, display, platform) {
            Ok(pair) => pair,
            Err(e) => {
                cleanup(&api);
                return Err(e);
            }
        };

        let release = |api: &EglApi| {
            // SAFETY: unwinding objects created by create_context.
            unsafe {
                (api.make_current)(display, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut());
                (api.destroy_surface)(display, surface);
                (api.destroy_context)(display, context);
                (api.terminate)(display);
            }
        };

        // SAFETY: handles were just created on this display.
        if unsafe { (api.make_current)(display, surface, surface, context) } == EGL_FALSE {
            let code = api.error();
            release(&api);
            bail!("eglMakeCurrent failed (0x{:04X})", code);
        }
        let renderer = match GlesRenderer::new(gles, image_target) {
            Ok(renderer) => renderer,
            Err(e) => {
                release(&api);
                return Err(e);
            }
        };
        // SAFETY: releasing the context from this thread.
        unsafe {
            (api.make_current)(display, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut())
        };

        debug!("EglDevice: ready (fence sync: {})", fence.is_some());
        Ok(EglDevice {
            api,
            dmabuf,
            fence,
            display,
            context,
            surface,
            renderer,
        })
    }

    fn create_context(
        api: &EglApi,
        display: EGLDisplay,
        platform: &dyn Platform,
    ) -> Result<(EGLContext, EGLSurface)> {
        let window = platform.native_window();
        let surface_type = if window.is_null() {
            EGL_PBUFFER_BIT
        } else {
            EGL_WINDOW_BIT
        };
        let config_attribs = [
            EGL_SURFACE_TYPE,
            surface_type,
            EGL_RED_SIZE,
            8,
            EGL_GREEN_SIZE,
            8,
            EGL_BLUE_SIZE,
            8,
            EGL_ALPHA_SIZE,
            8,
            EGL_DEPTH_SIZE,
            16,
            EGL_RENDERABLE_TYPE,
            EGL_OPENGL_ES2_BIT,
            EGL_NONE,
        ];

        let mut configs = [std::ptr::null_mut(); MAX_CONFIGS];
        let mut count = 0;
        // SAFETY: attribute list is EGL_NONE terminated; out-buffer has
        // MAX_CONFIGS slots.
        unsafe {
            if (api.bind_api)(EGL_OPENGL_ES_API) == EGL_FALSE {
                bail!("eglBindAPI(OpenGL ES) failed (0x{:04X})", api.error());
            }
            if (api.choose_config)(
                display,
                config_attribs.as_ptr(),
                configs.as_mut_ptr(),
                MAX_CONFIGS as EGLint,
                &mut count,
            ) == EGL_FALSE
                || count <= 0
            {
                bail!("No EGL config for RGBA8888 + depth 16 (0x{:04X})", api.error());
            }
        }
        let configs = &configs[..count as usize];

        // A window surface wants a config whose visual matches the scan-out
        // format; a pbuffer takes the first one.
        let config = if window.is_null() {
            configs[0]
        } else {
            configs
                .iter()
                .copied()
                .find(|&config| {
                    let mut visual = 0;
                    // SAFETY: config belongs to this display.
                    let queried = unsafe {
                        (api.get_config_attrib)(display, config, EGL_NATIVE_VISUAL_ID, &mut visual)
                    };
                    is_scanout_visual(queried, visual)
                })
                .unwrap_or(configs[0])
        };

        let context_attribs = [EGL_CONTEXT_CLIENT_VERSION, 2, EGL_NONE];
        // SAFETY: config is valid for the display; attributes terminated.
        let context = unsafe {
            (api.create_context)(display, config, std::ptr::null_mut(), context_attribs.as_ptr())
        };
        if context.is_null() {
            bail!("eglCreateContext failed (0x{:04X})", api.error());
        }

        let mode = platform.output_mode();
        // SAFETY: as above; `window` is the platform's live native window.
        let surface = unsafe {
            if window.is_null() {
                let pbuffer_attribs = [
                    EGL_WIDTH,
                    mode.width as EGLint,
                    EGL_HEIGHT,
                    mode.height as EGLint,
                    EGL_NONE,
                ];
                (api.create_pbuffer_surface)(display, config, pbuffer_attribs.as_ptr())
            } else {
                (api.create_window_surface)(display, config, window, std::ptr::null())
            }
        };
        if surface.is_null() {
            let code = api.error();
            // SAFETY: destroying the context we just created.
            unsafe { (api.destroy_context)(display, context) };
            bail!("EGL surface creation failed (0x{:04X})", code);
        }
        Ok((context, surface))
    }

    fn fail(&self, what: &str) -> anyhow::Error {
        anyhow::anyhow!("{} failed (EGL 0x{:04X})", what, self.api.error())
    }
}

impl GpuDevice for EglDevice {
    fn dmabuf_formats(&self) -> Result<Vec<u32>> {
        let query = self.dmabuf.query_formats;
        let mut count = 0;
        // SAFETY: first call sizes the list, second fills a buffer of that
        // size.
        unsafe {
            if query(self.display, 0, std::ptr::null_mut(), &mut count) == EGL_FALSE {
                return Err(self.fail("eglQueryDmaBufFormatsEXT"));
            }
            let mut formats = vec![0 as EGLint; count.max(0) as usize];
            if query(self.display, count, formats.as_mut_ptr(), &mut count) == EGL_FALSE {
                return Err(self.fail("eglQueryDmaBufFormatsEXT"));
            }
            formats.truncate(count.max(0) as usize);
            Ok(formats.into_iter().map(|f| f as u32).collect())
        }
    }

    fn dmabuf_modifiers(&self, format: u32) -> Result<Vec<ModifierInfo>> {
        let query = self.dmabuf.query_modifiers;
        let mut count = 0;
        // SAFETY: as for dmabuf_formats; both arrays get `count` slots.
        unsafe {
            if query(
                self.display,
                format as EGLint,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut count,
            ) == EGL_FALSE
            {
                return Err(self.fail("eglQueryDmaBufModifiersEXT"));
            }
            let len = count.max(0) as usize;
            let mut modifiers = vec![0u64; len];
            let mut external = vec![EGL_FALSE; len];
            if query(
                self.display,
                format as EGLint,
                count,
                modifiers.as_mut_ptr(),
                external.as_mut_ptr(),
                &mut count,
            ) == EGL_FALSE
            {
                return Err(self.fail("eglQueryDmaBufModifiersEXT"));
            }
            let len = (count.max(0) as usize).min(len);
            Ok(modifiers[..len]
                .iter()
                .zip(&external[..len])
                .map(|(&modifier, &ext)| ModifierInfo {
                    modifier,
                    external_only: ext != EGL_FALSE,
                })
                .collect())
        }
    }

    fn create_image(&self, attrs: &DmaBufAttributes) -> Result<ImageId> {
        let mut list = vec![
            EGL_WIDTH,
            attrs.width as EGLint,
            EGL_HEIGHT,
            attrs.height as EGLint,
            EGL_LINUX_DRM_FOURCC_EXT,
            attrs.format as EGLint,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            attrs.fd,
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            attrs.offset as EGLint,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            attrs.pitch as EGLint,
        ];
        if attrs.modifier != DRM_FORMAT_MOD_INVALID {
            list.extend_from_slice(&[
                EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT,
                (attrs.modifier & 0xFFFF_FFFF) as u32 as EGLint,
                EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT,
                (attrs.modifier >> 32) as u32 as EGLint,
            ]);
        }
        list.extend_from_slice(&[EGL_IMAGE_PRESERVED_KHR, EGL_TRUE, EGL_NONE]);

        // SAFETY: the attribute list is EGL_NONE terminated and the
        // descriptor is open for the duration of the call.
        let image = unsafe {
            (self.dmabuf.create_image)(
                self.display,
                std::ptr::null_mut(),
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null_mut(),
                list.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(self.fail("eglCreateImageKHR"));
        }
        Ok(ImageId(image as usize as u64))
    }

    fn destroy_image(&self, image: ImageId) -> Result<()> {
        // SAFETY: `image` was produced by create_image on this display.
        let ok = unsafe {
            (self.dmabuf.destroy_image)(self.display, image.0 as usize as EGLImageKHR)
        };
        if ok == EGL_FALSE {
            return Err(self.fail("eglDestroyImageKHR"));
        }
        Ok(())
    }

    fn make_current(&self) -> Result<()> {
        // SAFETY: handles are owned by self.
        if unsafe { (self.api.make_current)(self.display, self.surface, self.surface, self.context) }
            == EGL_FALSE
        {
            return Err(self.fail("eglMakeCurrent"));
        }
        Ok(())
    }

    fn release_current(&self) -> Result<()> {
        // SAFETY: detaching whatever is current on this thread.
        let ok = unsafe {
            (self.api.make_current)(
                self.display,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if ok == EGL_FALSE {
            return Err(self.fail("eglMakeCurrent(release)"));
        }
        Ok(())
    }

    fn max_viewport_dims(&self) -> (i32, i32) {
        self.renderer.max_viewport_dims()
    }

    fn create_texture(&self, width: u32, height: u32) -> Result<TextureId> {
        self.renderer.create_texture(width, height).map(TextureId)
    }

    fn destroy_texture(&self, texture: TextureId) -> Result<()> {
        if texture.is_valid() {
            self.renderer.destroy_texture(texture.0);
        }
        Ok(())
    }

    fn draw_external(&self, image: ImageId, target: TextureId, viewport: &Viewport) -> Result<()> {
        self.renderer
            .draw_external(image.0 as usize as *mut c_void, target.0, viewport)
    }

    fn begin_scene(&self, width: u32, height: u32) -> Result<()> {
        self.renderer.begin_scene(width, height)
    }

    fn draw_layer(
        &self,
        texture: TextureId,
        viewport: &Viewport,
        depth: f32,
        opacity: f32,
    ) -> Result<()> {
        self.renderer.draw_layer(texture.0, viewport, depth, opacity)
    }

    fn end_scene(&self) -> Result<()> {
        self.renderer.end_scene()
    }

    fn swap_buffers(&self) -> Result<()> {
        // SAFETY: the context is current with this surface.
        if unsafe { (self.api.swap_buffers)(self.display, self.surface) } == EGL_FALSE {
            return Err(self.fail("eglSwapBuffers"));
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let Some(fence) = &self.fence else {
            return self.renderer.finish();
        };
        // SAFETY: the context is current; the sync object is destroyed before
        // returning.
        unsafe {
            let sync = (fence.create)(self.display, EGL_SYNC_FENCE_KHR, [EGL_NONE].as_ptr());
            if sync.is_null() {
                debug!("EglDevice: fence creation failed, falling back to glFinish");
                return self.renderer.finish();
            }
            let status = (fence.client_wait)(
                self.display,
                sync,
                EGL_SYNC_FLUSH_COMMANDS_BIT_KHR,
                EGL_FOREVER_KHR,
            );
            (fence.destroy)(self.display, sync);
            if status != EGL_CONDITION_SATISFIED_KHR {
                bail!("eglClientWaitSyncKHR returned 0x{:04X}", status);
            }
        }
        Ok(())
    }
}

impl Drop for EglDevice {
    fn drop(&mut self) {
        // SAFETY: tearing down objects owned by self, in reverse order. GL
        // objects need the context current once more.
        unsafe {
            if (self.api.make_current)(self.display, self.surface, self.surface, self.context)
                != EGL_FALSE
            {
                self.renderer.destroy();
            } else {
                warn!("EglDevice: could not make context current for teardown");
            }
            (self.api.make_current)(
                self.display,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );
            (self.api.destroy_surface)(self.display, self.surface);
            (self.api.destroy_context)(self.display, self.context);
            (self.api.terminate)(self.display);
        }
        let code = self.api.error();
        if code != EGL_SUCCESS {
            debug!("EglDevice: teardown left EGL error 0x{:04X}", code);
        }
        debug!("EglDevice: released");
    }
}

/// Whether a config whose native visual query returned `queried` and
/// `visual` can feed the ARGB8888 scan-out.
fn is_scanout_visual(queried: EGLBoolean, visual: EGLint) -> bool {
    queried != EGL_FALSE && visual as u32 == DRM_FORMAT_ARGB8888
}
