// src/platform/kms.rs

//! DRM/KMS platform with GBM allocation.
//!
//! `libdrm.so.2` and `libgbm.so.1` are opened at runtime, so the binary has no
//! link-time dependency on the display stack. The platform picks the first
//! connected connector, its preferred mode and a CRTC that can drive it, then
//! creates a GBM surface of that size for the graphics device to render into.
//! Each page flip locks the surface's front buffer, wraps it in a framebuffer
//! and sets it on the CRTC.

use anyhow::{bail, Context, Result};
use libloading::Library;
use log::{debug, error, info, warn};
use std::ffi::{c_char, c_int, c_void};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::buffer::{BufferInfo, NativeBuffer};
use crate::dylib::{self, symbol};
use crate::error::lock_or_recover;
use crate::platform::{OutputMode, Platform, DRM_FORMAT_ARGB8888};

// --- libdrm ABI ---

const DRM_MODE_CONNECTED: c_int = 1;
const DRM_MODE_TYPE_PREFERRED: u32 = 1 << 3;
const DRM_MODE_FLAG_INTERLACE: u32 = 1 << 4;
const DRM_DISPLAY_MODE_LEN: usize = 32;

#[repr(C)]
#[allow(dead_code)]
struct DrmModeRes {
    count_fbs: c_int,
    fbs: *mut u32,
    count_crtcs: c_int,
    crtcs: *mut u32,
    count_connectors: c_int,
    connectors: *mut u32,
    count_encoders: c_int,
    encoders: *mut u32,
    min_width: u32,
    max_width: u32,
    min_height: u32,
    max_height: u32,
}

#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
struct DrmModeModeInfo {
    clock: u32,
    hdisplay: u16,
    hsync_start: u16,
    hsync_end: u16,
    htotal: u16,
    hskew: u16,
    vdisplay: u16,
    vsync_start: u16,
    vsync_end: u16,
    vtotal: u16,
    vscan: u16,
    vrefresh: u32,
    flags: u32,
    type_: u32,
    name: [c_char; DRM_DISPLAY_MODE_LEN],
}

#[repr(C)]
#[allow(dead_code)]
struct DrmModeConnector {
    connector_id: u32,
    encoder_id: u32,
    connector_type: u32,
    connector_type_id: u32,
    connection: c_int,
    mm_width: u32,
    mm_height: u32,
    subpixel: c_int,
    count_modes: c_int,
    modes: *mut DrmModeModeInfo,
    count_props: c_int,
    props: *mut u32,
    prop_values: *mut u64,
    count_encoders: c_int,
    encoders: *mut u32,
}

#[repr(C)]
#[allow(dead_code)]
struct DrmModeEncoder {
    encoder_id: u32,
    encoder_type: u32,
    crtc_id: u32,
    possible_crtcs: u32,
    possible_clones: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct DrmModePlaneRes {
    count_planes: u32,
    planes: *mut u32,
}

#[repr(C)]
#[allow(dead_code)]
struct DrmModePlane {
    count_formats: u32,
    formats: *mut u32,
    plane_id: u32,
    crtc_id: u32,
    fb_id: u32,
    crtc_x: u32,
    crtc_y: u32,
    x: u32,
    y: u32,
    possible_crtcs: u32,
    gamma_size: u32,
}

struct DrmApi {
    _lib: Library,
    get_resources: unsafe extern "C" fn(c_int) -> *mut DrmModeRes,
    free_resources: unsafe extern "C" fn(*mut DrmModeRes),
    get_connector: unsafe extern "C" fn(c_int, u32) -> *mut DrmModeConnector,
    free_connector: unsafe extern "C" fn(*mut DrmModeConnector),
    get_encoder: unsafe extern "C" fn(c_int, u32) -> *mut DrmModeEncoder,
    free_encoder: unsafe extern "C" fn(*mut DrmModeEncoder),
    get_plane_resources: unsafe extern "C" fn(c_int) -> *mut DrmModePlaneRes,
    free_plane_resources: unsafe extern "C" fn(*mut DrmModePlaneRes),
    get_plane: unsafe extern "C" fn(c_int, u32) -> *mut DrmModePlane,
    free_plane: unsafe extern "C" fn(*mut DrmModePlane),
    add_fb2: unsafe extern "C" fn(
        c_int,
        u32,
        u32,
        u32,
        *const u32,
        *const u32,
        *const u32,
        *mut u32,
        u32,
    ) -> c_int,
    rm_fb: unsafe extern "C" fn(c_int, u32) -> c_int,
    set_crtc: unsafe extern "C" fn(
        c_int,
        u32,
        u32,
        u32,
        u32,
        *mut u32,
        c_int,
        *mut DrmModeModeInfo,
    ) -> c_int,
}

impl DrmApi {
    fn load() -> Result<Self> {
        let lib = dylib::open("libdrm.so.2")?;

        // SAFETY: the signatures below match xf86drmMode.h; `_lib` keeps the
        // library mapped for as long as the pointers live.
        unsafe {
            Ok(DrmApi {
                get_resources: symbol(&lib, b"drmModeGetResources\0")?,
                free_resources: symbol(&lib, b"drmModeFreeResources\0")?,
                get_connector: symbol(&lib, b"drmModeGetConnector\0")?,
                free_connector: symbol(&lib, b"drmModeFreeConnector\0")?,
                get_encoder: symbol(&lib, b"drmModeGetEncoder\0")?,
                free_encoder: symbol(&lib, b"drmModeFreeEncoder\0")?,
                get_plane_resources: symbol(&lib, b"drmModeGetPlaneResources\0")?,
                free_plane_resources: symbol(&lib, b"drmModeFreePlaneResources\0")?,
                get_plane: symbol(&lib, b"drmModeGetPlane\0")?,
                free_plane: symbol(&lib, b"drmModeFreePlane\0")?,
                add_fb2: symbol(&lib, b"drmModeAddFB2\0")?,
                rm_fb: symbol(&lib, b"drmModeRmFB\0")?,
                set_crtc: symbol(&lib, b"drmModeSetCrtc\0")?,
                _lib: lib,
            })
        }
    }
}

// --- libgbm ABI ---

const GBM_BO_USE_SCANOUT: u32 = 1 << 0;
const GBM_BO_USE_RENDERING: u32 = 1 << 2;
const GBM_BO_USE_LINEAR: u32 = 1 << 4;

#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
union GbmBoHandle {
    ptr: *mut c_void,
    s32: i32,
    u32_: u32,
    s64: i64,
    u64_: u64,
}

struct GbmApi {
    _lib: Library,
    create_device: unsafe extern "C" fn(c_int) -> *mut c_void,
    device_destroy: unsafe extern "C" fn(*mut c_void),
    surface_create: unsafe extern "C" fn(*mut c_void, u32, u32, u32, u32) -> *mut c_void,
    surface_destroy: unsafe extern "C" fn(*mut c_void),
    surface_lock_front_buffer: unsafe extern "C" fn(*mut c_void) -> *mut c_void,
    surface_release_buffer: unsafe extern "C" fn(*mut c_void, *mut c_void),
    bo_create: unsafe extern "C" fn(*mut c_void, u32, u32, u32, u32) -> *mut c_void,
    bo_destroy: unsafe extern "C" fn(*mut c_void),
    bo_get_fd: unsafe extern "C" fn(*mut c_void) -> c_int,
    bo_get_width: unsafe extern "C" fn(*mut c_void) -> u32,
    bo_get_height: unsafe extern "C" fn(*mut c_void) -> u32,
    bo_get_stride: unsafe extern "C" fn(*mut c_void) -> u32,
    bo_get_format: unsafe extern "C" fn(*mut c_void) -> u32,
    bo_get_modifier: unsafe extern "C" fn(*mut c_void) -> u64,
    bo_get_handle: unsafe extern "C" fn(*mut c_void) -> GbmBoHandle,
}

impl GbmApi {
    fn load() -> Result<Self> {
        let lib = dylib::open("libgbm.so.1")?;

        // SAFETY: signatures match gbm.h; see DrmApi::load.
        unsafe {
            Ok(GbmApi {
                create_device: symbol(&lib, b"gbm_create_device\0")?,
                device_destroy: symbol(&lib, b"gbm_device_destroy\0")?,
                surface_create: symbol(&lib, b"gbm_surface_create\0")?,
                surface_destroy: symbol(&lib, b"gbm_surface_destroy\0")?,
                surface_lock_front_buffer: symbol(&lib, b"gbm_surface_lock_front_buffer\0")?,
                surface_release_buffer: symbol(&lib, b"gbm_surface_release_buffer\0")?,
                bo_create: symbol(&lib, b"gbm_bo_create\0")?,
                bo_destroy: symbol(&lib, b"gbm_bo_destroy\0")?,
                bo_get_fd: symbol(&lib, b"gbm_bo_get_fd\0")?,
                bo_get_width: symbol(&lib, b"gbm_bo_get_width\0")?,
                bo_get_height: symbol(&lib, b"gbm_bo_get_height\0")?,
                bo_get_stride: symbol(&lib, b"gbm_bo_get_stride\0")?,
                bo_get_format: symbol(&lib, b"gbm_bo_get_format\0")?,
                bo_get_modifier: symbol(&lib, b"gbm_bo_get_modifier\0")?,
                bo_get_handle: symbol(&lib, b"gbm_bo_get_handle\0")?,
                _lib: lib,
            })
        }
    }
}

/// A GBM device; destroyed when the last buffer and the platform let go.
struct GbmDevice {
    api: GbmApi,
    device: *mut c_void,
}

// SAFETY: gbm_device is internally synchronized for buffer creation and
// destruction; the pointer is never dereferenced on the Rust side.
unsafe impl Send for GbmDevice {}
unsafe impl Sync for GbmDevice {}

impl Drop for GbmDevice {
    fn drop(&mut self) {
        debug!("KmsPlatform: destroying GBM device");
        // SAFETY: `device` came from gbm_create_device and every buffer
        // holding an Arc to us is gone.
        unsafe { (self.api.device_destroy)(self.device) };
    }
}

/// A client buffer allocated as a GBM buffer object.
pub struct GbmBuffer {
    device: Arc<GbmDevice>,
    bo: *mut c_void,
}

// SAFETY: the buffer object is only read through gbm getters, which are
// thread safe, and destroyed once in Drop.
unsafe impl Send for GbmBuffer {}
unsafe impl Sync for GbmBuffer {}

impl NativeBuffer for GbmBuffer {
    fn info(&self) -> BufferInfo {
        let api = &self.device.api;
        // SAFETY: `bo` is a live buffer object owned by self.
        unsafe {
            BufferInfo {
                width: (api.bo_get_width)(self.bo),
                height: (api.bo_get_height)(self.bo),
                stride: (api.bo_get_stride)(self.bo),
                format: (api.bo_get_format)(self.bo),
                modifier: (api.bo_get_modifier)(self.bo),
            }
        }
    }

    fn export_descriptor(&self) -> Result<OwnedFd> {
        // SAFETY: `bo` is live; gbm_bo_get_fd returns a new descriptor or -1.
        let raw = unsafe { (self.device.api.bo_get_fd)(self.bo) };
        if raw < 0 {
            bail!("gbm_bo_get_fd failed");
        }
        // SAFETY: the descriptor is fresh and ours to own.
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }
}

impl Drop for GbmBuffer {
    fn drop(&mut self) {
        // SAFETY: created by gbm_bo_create and destroyed only here.
        unsafe { (self.device.api.bo_destroy)(self.bo) };
    }
}

// --- Platform ---

struct Scanout {
    bo: *mut c_void,
    fb: u32,
}

pub struct KmsPlatform {
    drm: DrmApi,
    card: File,
    gbm: Arc<GbmDevice>,
    surface: *mut c_void,
    connector_id: u32,
    crtc_id: u32,
    crtc_index: u32,
    mode: DrmModeModeInfo,
    scanout: Mutex<Option<Scanout>>,
}

// SAFETY: the GBM surface and scan-out state are only touched from
// `page_flip`, which serializes on `scanout`; DRM ioctls are thread safe.
unsafe impl Send for KmsPlatform {}
unsafe impl Sync for KmsPlatform {}

impl KmsPlatform {
    pub fn open(device: &Path) -> Result<Self> {
        let drm = DrmApi::load()?;
        let gbm_api = GbmApi::load()?;

        let card = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .with_context(|| format!("Failed to open DRM device {}", device.display()))?;
        let fd = card.as_raw_fd();

        let (connector_id, crtc_id, crtc_index, mode) = Self::pick_output(&drm, fd)?;

        // SAFETY: `fd` is an open DRM node.
        let gbm_device = unsafe { (gbm_api.create_device)(fd) };
        if gbm_device.is_null() {
            bail!("gbm_create_device failed for {}", device.display());
        }
        let gbm = Arc::new(GbmDevice {
            api: gbm_api,
            device: gbm_device,
        });

        // SAFETY: the device is live; flags are plain constants.
        let surface = unsafe {
            (gbm.api.surface_create)(
                gbm.device,
                mode.hdisplay as u32,
                mode.vdisplay as u32,
                DRM_FORMAT_ARGB8888,
                GBM_BO_USE_SCANOUT | GBM_BO_USE_RENDERING,
            )
        };
        if surface.is_null() {
            bail!(
                "gbm_surface_create failed for {}x{}",
                mode.hdisplay,
                mode.vdisplay
            );
        }

        info!(
            "KmsPlatform: connector {} on crtc {} at {}x{}@{}",
            connector_id, crtc_id, mode.hdisplay, mode.vdisplay, mode.vrefresh
        );

        Ok(KmsPlatform {
            drm,
            card,
            gbm,
            surface,
            connector_id,
            crtc_id,
            crtc_index,
            mode,
            scanout: Mutex::new(None),
        })
    }

    /// First connected connector, its preferred mode, and a CRTC for it.
    fn pick_output(drm: &DrmApi, fd: c_int) -> Result<(u32, u32, u32, DrmModeModeInfo)> {
        // SAFETY: every pointer returned by libdrm below is checked for null,
        // read within its reported counts, and freed with the matching call.
        unsafe {
            let res = (drm.get_resources)(fd);
            if res.is_null() {
                return Err(io::Error::last_os_error()).context("drmModeGetResources failed");
            }
            let connectors = slice((*res).connectors, (*res).count_connectors);
            let crtcs = slice((*res).crtcs, (*res).count_crtcs).to_vec();

            let mut picked = None;
            for &id in connectors {
                let conn = (drm.get_connector)(fd, id);
                if conn.is_null() {
                    continue;
                }
                let modes = slice((*conn).modes, (*conn).count_modes);
                if (*conn).connection == DRM_MODE_CONNECTED && !modes.is_empty() {
                    let mode = modes
                        .iter()
                        .find(|m| m.type_ & DRM_MODE_TYPE_PREFERRED != 0)
                        .unwrap_or(&modes[0]);
                    let encoders = slice((*conn).encoders, (*conn).count_encoders).to_vec();
                    picked = Some((id, (*conn).encoder_id, encoders, *mode));
                }
                (drm.free_connector)(conn);
                if picked.is_some() {
                    break;
                }
            }
            (drm.free_resources)(res);

            let (connector_id, current_encoder, encoders, mode) =
                picked.context("No connected DRM connector with modes")?;

            let mut candidates = vec![current_encoder];
            candidates.extend(encoders);
            for encoder_id in candidates.into_iter().filter(|&id| id != 0) {
                let enc = (drm.get_encoder)(fd, encoder_id);
                if enc.is_null() {
                    continue;
                }
                let (current, possible) = ((*enc).crtc_id, (*enc).possible_crtcs);
                (drm.free_encoder)(enc);

                if let Some(index) = crtcs.iter().position(|&c| c == current && c != 0) {
                    return Ok((connector_id, current, index as u32, mode));
                }
                if let Some(index) = (0..crtcs.len()).find(|i| possible & (1 << i) != 0) {
                    return Ok((connector_id, crtcs[index], index as u32, mode));
                }
            }
            bail!("No CRTC can drive connector {}", connector_id)
        }
    }
}

/// Views a libdrm (pointer, count) pair as a slice.
///
/// # Safety
/// `ptr` must point to `count` initialized elements that outlive the slice.
unsafe fn slice<'a, T>(ptr: *const T, count: c_int) -> &'a [T] {
    if ptr.is_null() || count <= 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

impl Platform for KmsPlatform {
    fn name(&self) -> &'static str {
        "kms"
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode {
            width: self.mode.hdisplay as u32,
            height: self.mode.vdisplay as u32,
            refresh_hz: self.mode.vrefresh,
            interlaced: self.mode.flags & DRM_MODE_FLAG_INTERLACE != 0,
        }
    }

    fn display_formats(&self) -> Result<Vec<u32>> {
        let fd = self.card.as_raw_fd();
        let mut formats = Vec::new();
        // SAFETY: see pick_output; the same null/count/free discipline applies.
        unsafe {
            let res = (self.drm.get_plane_resources)(fd);
            if res.is_null() {
                return Err(io::Error::last_os_error()).context("drmModeGetPlaneResources failed");
            }
            let planes = slice((*res).planes, (*res).count_planes as c_int).to_vec();
            (self.drm.free_plane_resources)(res);

            for id in planes {
                let plane = (self.drm.get_plane)(fd, id);
                if plane.is_null() {
                    continue;
                }
                if (*plane).possible_crtcs & (1 << self.crtc_index) != 0 {
                    for &format in slice((*plane).formats, (*plane).count_formats as c_int) {
                        if !formats.contains(&format) {
                            formats.push(format);
                        }
                    }
                }
                (self.drm.free_plane)(plane);
            }
        }
        Ok(formats)
    }

    fn create_buffer(&self, width: u32, height: u32) -> Result<Box<dyn NativeBuffer>> {
        // SAFETY: the device is live for as long as `self.gbm`.
        let bo = unsafe {
            (self.gbm.api.bo_create)(
                self.gbm.device,
                width,
                height,
                DRM_FORMAT_ARGB8888,
                GBM_BO_USE_RENDERING | GBM_BO_USE_LINEAR,
            )
        };
        if bo.is_null() {
            bail!("gbm_bo_create failed for {}x{}", width, height);
        }
        Ok(Box::new(GbmBuffer {
            device: Arc::clone(&self.gbm),
            bo,
        }))
    }

    fn native_display(&self) -> *mut c_void {
        self.gbm.device
    }

    fn native_window(&self) -> *mut c_void {
        self.surface
    }

    fn egl_platform(&self) -> Option<u32> {
        const EGL_PLATFORM_GBM_KHR: u32 = 0x31D7;
        Some(EGL_PLATFORM_GBM_KHR)
    }

    fn page_flip(&self) -> Result<()> {
        let fd = self.card.as_raw_fd();
        let api = &self.gbm.api;
        let mut scanout = lock_or_recover(&self.scanout, "KmsPlatform scanout");

        // SAFETY: the surface is live and has just been swapped by EGL.
        let bo = unsafe { (api.surface_lock_front_buffer)(self.surface) };
        if bo.is_null() {
            bail!("gbm_surface_lock_front_buffer returned no buffer");
        }

        let mut fb = 0u32;
        // SAFETY: `bo` is the locked front buffer; arrays have four entries as
        // drmModeAddFB2 expects.
        let added = unsafe {
            let handles = [(api.bo_get_handle)(bo).u32_, 0, 0, 0];
            let pitches = [(api.bo_get_stride)(bo), 0, 0, 0];
            let offsets = [0u32; 4];
            (self.drm.add_fb2)(
                fd,
                (api.bo_get_width)(bo),
                (api.bo_get_height)(bo),
                (api.bo_get_format)(bo),
                handles.as_ptr(),
                pitches.as_ptr(),
                offsets.as_ptr(),
                &mut fb,
                0,
            )
        };
        if added != 0 {
            // SAFETY: returning the buffer we locked above.
            unsafe { (api.surface_release_buffer)(self.surface, bo) };
            return Err(io::Error::last_os_error()).context("drmModeAddFB2 failed");
        }

        let mut connector = self.connector_id;
        let mut mode = self.mode;
        // SAFETY: all ids come from this device; pointers are to locals.
        let set = unsafe {
            (self.drm.set_crtc)(fd, self.crtc_id, fb, 0, 0, &mut connector, 1, &mut mode)
        };
        if set != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: undo the framebuffer and lock taken above.
            unsafe {
                (self.drm.rm_fb)(fd, fb);
                (api.surface_release_buffer)(self.surface, bo);
            }
            return Err(err).context("drmModeSetCrtc failed");
        }

        if let Some(previous) = scanout.replace(Scanout { bo, fb }) {
            // SAFETY: the previous buffer is no longer on screen.
            unsafe {
                (self.drm.rm_fb)(fd, previous.fb);
                (api.surface_release_buffer)(self.surface, previous.bo);
            }
        }
        Ok(())
    }
}

impl Drop for KmsPlatform {
    fn drop(&mut self) {
        let fd = self.card.as_raw_fd();
        let scanout = lock_or_recover(&self.scanout, "KmsPlatform scanout").take();
        // SAFETY: tearing down in reverse order of creation; nothing else
        // references the surface once the platform drops.
        unsafe {
            if let Some(current) = scanout {
                if (self.drm.rm_fb)(fd, current.fb) != 0 {
                    warn!("KmsPlatform: failed to remove framebuffer {}", current.fb);
                }
                (self.gbm.api.surface_release_buffer)(self.surface, current.bo);
            }
            (self.gbm.api.surface_destroy)(self.surface);
        }
        if Arc::strong_count(&self.gbm) > 1 {
            error!(
                "KmsPlatform: {} client buffers outlive the platform",
                Arc::strong_count(&self.gbm) - 1
            );
        }
        debug!("KmsPlatform: released");
    }
}
