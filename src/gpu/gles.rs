// src/gpu/gles.rs

//! OpenGL ES 2.0 side of the graphics device.
//!
//! `GlesRenderer` owns the two shader programs, the framebuffer used for
//! stage 1 and the textures handed out to the scene. Every method expects
//! the EGL context to be current on the calling thread; `EglDevice` makes
//! sure of that through the pipeline's context guard.

use anyhow::{bail, Context, Result};
use libloading::Library;
use log::{debug, error};
use std::ffi::{c_char, c_void, CStr, CString};

use crate::dylib::{self, symbol};
use crate::scene::viewport::Viewport;

pub type GLenum = u32;
pub type GLuint = u32;
pub type GLint = i32;
pub type GLsizei = i32;
pub type GLfloat = f32;
pub type GLboolean = u8;
pub type GLbitfield = u32;

const GL_NO_ERROR: GLenum = 0;
const GL_FALSE: GLboolean = 0;
const GL_TEXTURE_2D: GLenum = 0x0DE1;
const GL_TEXTURE_EXTERNAL_OES: GLenum = 0x8D65;
const GL_TEXTURE0: GLenum = 0x84C0;
const GL_RGBA: GLenum = 0x1908;
const GL_UNSIGNED_BYTE: GLenum = 0x1401;
const GL_FLOAT: GLenum = 0x1406;
const GL_TEXTURE_MAG_FILTER: GLenum = 0x2800;
const GL_TEXTURE_MIN_FILTER: GLenum = 0x2801;
const GL_TEXTURE_WRAP_S: GLenum = 0x2802;
const GL_TEXTURE_WRAP_T: GLenum = 0x2803;
const GL_LINEAR: GLint = 0x2601;
const GL_CLAMP_TO_EDGE: GLint = 0x812F;
const GL_FRAMEBUFFER: GLenum = 0x8D40;
const GL_COLOR_ATTACHMENT0: GLenum = 0x8CE0;
const GL_FRAMEBUFFER_COMPLETE: GLenum = 0x8CD5;
const GL_COLOR_BUFFER_BIT: GLbitfield = 0x4000;
const GL_DEPTH_BUFFER_BIT: GLbitfield = 0x0100;
const GL_BLEND: GLenum = 0x0BE2;
const GL_DEPTH_TEST: GLenum = 0x0B71;
const GL_SRC_ALPHA: GLenum = 0x0302;
const GL_ONE_MINUS_SRC_ALPHA: GLenum = 0x0303;
const GL_LEQUAL: GLenum = 0x0203;
const GL_TRIANGLE_STRIP: GLenum = 0x0005;
const GL_VERTEX_SHADER: GLenum = 0x8B31;
const GL_FRAGMENT_SHADER: GLenum = 0x8B30;
const GL_COMPILE_STATUS: GLenum = 0x8B81;
const GL_LINK_STATUS: GLenum = 0x8B82;
const GL_INFO_LOG_LENGTH: GLenum = 0x8B84;
const GL_MAX_VIEWPORT_DIMS: GLenum = 0x0D3A;
const GL_EXTENSIONS: GLenum = 0x1F03;

/// Unit square as a triangle strip: (0,0), (1,0), (0,1), (1,1).
const QUAD: [GLfloat; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

const VERTEX_SHADER: &str = "#version 100
attribute vec2 position;
uniform vec2 extent;
uniform vec2 origin;
uniform float depth;
varying vec2 coordinates;
void main() {
    gl_Position = vec4(position * extent + origin, depth, 1.0);
    coordinates = position;
}
";

const EXTERNAL_FRAGMENT_SHADER: &str = "#version 100
#extension GL_OES_EGL_image_external : require
precision mediump float;
uniform samplerExternalOES sampler;
varying vec2 coordinates;
void main() {
    gl_FragColor = texture2D(sampler, coordinates);
}
";

const LAYER_FRAGMENT_SHADER: &str = "#version 100
precision mediump float;
uniform sampler2D sampler;
uniform float opacity;
varying vec2 coordinates;
void main() {
    vec4 color = texture2D(sampler, coordinates);
    gl_FragColor = vec4(color.rgb, color.a * opacity);
}
";

/// Entry points of libGLESv2 used here.
pub struct GlesApi {
    _lib: Library,
    get_error: unsafe extern "C" fn() -> GLenum,
    get_string: unsafe extern "C" fn(GLenum) -> *const u8,
    get_integerv: unsafe extern "C" fn(GLenum, *mut GLint),
    gen_textures: unsafe extern "C" fn(GLsizei, *mut GLuint),
    delete_textures: unsafe extern "C" fn(GLsizei, *const GLuint),
    bind_texture: unsafe extern "C" fn(GLenum, GLuint),
    active_texture: unsafe extern "C" fn(GLenum),
    tex_image_2d: unsafe extern "C" fn(
        GLenum,
        GLint,
        GLint,
        GLsizei,
        GLsizei,
        GLint,
        GLenum,
        GLenum,
        *const c_void,
    ),
    tex_parameteri: unsafe extern "C" fn(GLenum, GLenum, GLint),
    gen_framebuffers: unsafe extern "C" fn(GLsizei, *mut GLuint),
    delete_framebuffers: unsafe extern "C" fn(GLsizei, *const GLuint),
    bind_framebuffer: unsafe extern "C" fn(GLenum, GLuint),
    framebuffer_texture_2d: unsafe extern "C" fn(GLenum, GLenum, GLenum, GLuint, GLint),
    check_framebuffer_status: unsafe extern "C" fn(GLenum) -> GLenum,
    viewport: unsafe extern "C" fn(GLint, GLint, GLsizei, GLsizei),
    clear_color: unsafe extern "C" fn(GLfloat, GLfloat, GLfloat, GLfloat),
    clear_depthf: unsafe extern "C" fn(GLfloat),
    clear: unsafe extern "C" fn(GLbitfield),
    enable: unsafe extern "C" fn(GLenum),
    disable: unsafe extern "C" fn(GLenum),
    blend_func: unsafe extern "C" fn(GLenum, GLenum),
    depth_func: unsafe extern "C" fn(GLenum),
    create_shader: unsafe extern "C" fn(GLenum) -> GLuint,
    shader_source: unsafe extern "C" fn(GLuint, GLsizei, *const *const c_char, *const GLint),
    compile_shader: unsafe extern "C" fn(GLuint),
    get_shaderiv: unsafe extern "C" fn(GLuint, GLenum, *mut GLint),
    get_shader_info_log: unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut c_char),
    delete_shader: unsafe extern "C" fn(GLuint),
    create_program: unsafe extern "C" fn() -> GLuint,
    attach_shader: unsafe extern "C" fn(GLuint, GLuint),
    bind_attrib_location: unsafe extern "C" fn(GLuint, GLuint, *const c_char),
    link_program: unsafe extern "C" fn(GLuint),
    get_programiv: unsafe extern "C" fn(GLuint, GLenum, *mut GLint),
    get_program_info_log: unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut c_char),
    delete_program: unsafe extern "C" fn(GLuint),
    use_program: unsafe extern "C" fn(GLuint),
    get_uniform_location: unsafe extern "C" fn(GLuint, *const c_char) -> GLint,
    uniform_1f: unsafe extern "C" fn(GLint, GLfloat),
    uniform_1i: unsafe extern "C" fn(GLint, GLint),
    uniform_2f: unsafe extern "C" fn(GLint, GLfloat, GLfloat),
    vertex_attrib_pointer:
        unsafe extern "C" fn(GLuint, GLint, GLenum, GLboolean, GLsizei, *const c_void),
    enable_vertex_attrib_array: unsafe extern "C" fn(GLuint),
    disable_vertex_attrib_array: unsafe extern "C" fn(GLuint),
    draw_arrays: unsafe extern "C" fn(GLenum, GLint, GLsizei),
    finish: unsafe extern "C" fn(),
}

impl GlesApi {
    pub fn load() -> Result<Self> {
        let lib = dylib::open("libGLESv2.so.2")?;

        // SAFETY: signatures match GLES2/gl2.h; `_lib` outlives every copy.
        unsafe {
            Ok(GlesApi {
                get_error: symbol(&lib, b"glGetError\0")?,
                get_string: symbol(&lib, b"glGetString\0")?,
                get_integerv: symbol(&lib, b"glGetIntegerv\0")?,
                gen_textures: symbol(&lib, b"glGenTextures\0")?,
                delete_textures: symbol(&lib, b"glDeleteTextures\0")?,
                bind_texture: symbol(&lib, b"glBindTexture\0")?,
                active_texture: symbol(&lib, b"glActiveTexture\0")?,
                tex_image_2d: symbol(&lib, b"glTexImage2D\0")?,
                tex_parameteri: symbol(&lib, b"glTexParameteri\0")?,
                gen_framebuffers: symbol(&lib, b"glGenFramebuffers\0")?,
                delete_framebuffers: symbol(&lib, b"glDeleteFramebuffers\0")?,
                bind_framebuffer: symbol(&lib, b"glBindFramebuffer\0")?,
                framebuffer_texture_2d: symbol(&lib, b"glFramebufferTexture2D\0")?,
                check_framebuffer_status: symbol(&lib, b"glCheckFramebufferStatus\0")?,
                viewport: symbol(&lib, b"glViewport\0")?,
                clear_color: symbol(&lib, b"glClearColor\0")?,
                clear_depthf: symbol(&lib, b"glClearDepthf\0")?,
                clear: symbol(&lib, b"glClear\0")?,
                enable: symbol(&lib, b"glEnable\0")?,
                disable: symbol(&lib, b"glDisable\0")?,
                blend_func: symbol(&lib, b"glBlendFunc\0")?,
                depth_func: symbol(&lib, b"glDepthFunc\0")?,
                create_shader: symbol(&lib, b"glCreateShader\0")?,
                shader_source: symbol(&lib, b"glShaderSource\0")?,
                compile_shader: symbol(&lib, b"glCompileShader\0")?,
                get_shaderiv: symbol(&lib, b"glGetShaderiv\0")?,
                get_shader_info_log: symbol(&lib, b"glGetShaderInfoLog\0")?,
                delete_shader: symbol(&lib, b"glDeleteShader\0")?,
                create_program: symbol(&lib, b"glCreateProgram\0")?,
                attach_shader: symbol(&lib, b"glAttachShader\0")?,
                bind_attrib_location: symbol(&lib, b"glBindAttribLocation\0")?,
                link_program: symbol(&lib, b"glLinkProgram\0")?,
                get_programiv: symbol(&lib, b"glGetProgramiv\0")?,
                get_program_info_log: symbol(&lib, b"glGetProgramInfoLog\0")?,
                delete_program: symbol(&lib, b"glDeleteProgram\0")?,
                use_program: symbol(&lib, b"glUseProgram\0")?,
                get_uniform_location: symbol(&lib, b"glGetUniformLocation\0")?,
                uniform_1f: symbol(&lib, b"glUniform1f\0")?,
                uniform_1i: symbol(&lib, b"glUniform1i\0")?,
                uniform_2f: symbol(&lib, b"glUniform2f\0")?,
                vertex_attrib_pointer: symbol(&lib, b"glVertexAttribPointer\0")?,
                enable_vertex_attrib_array: symbol(&lib, b"glEnableVertexAttribArray\0")?,
                disable_vertex_attrib_array: symbol(&lib, b"glDisableVertexAttribArray\0")?,
                draw_arrays: symbol(&lib, b"glDrawArrays\0")?,
                finish: symbol(&lib, b"glFinish\0")?,
                _lib: lib,
            })
        }
    }

    /// Fails with the pending GL error, if any, naming `what`.
    fn check(&self, what: &str) -> Result<()> {
        // SAFETY: glGetError has no preconditions beyond a current context.
        let code = unsafe { (self.get_error)() };
        if code != GL_NO_ERROR {
            bail!("{} failed with GL error 0x{:04X}", what, code);
        }
        Ok(())
    }

    fn extensions(&self) -> String {
        // SAFETY: glGetString returns a static NUL-terminated string or null.
        unsafe {
            let ptr = (self.get_string)(GL_EXTENSIONS);
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr as *const c_char)
                    .to_string_lossy()
                    .into_owned()
            }
        }
    }
}

/// `glEGLImageTargetTexture2DOES`, resolved through `eglGetProcAddress`.
pub type ImageTargetTexture2dFn = unsafe extern "C" fn(GLenum, *mut c_void);

struct Program {
    id: GLuint,
    extent: GLint,
    origin: GLint,
    depth: GLint,
    sampler: GLint,
    opacity: GLint,
}

const POSITION_ATTRIB: GLuint = 0;

pub struct GlesRenderer {
    api: GlesApi,
    image_target_texture: ImageTargetTexture2dFn,
    external: Program,
    layer: Program,
    framebuffer: GLuint,
    max_viewport: (i32, i32),
}

impl GlesRenderer {
    /// Builds the renderer. The context must be current.
    pub fn new(api: GlesApi, image_target_texture: ImageTargetTexture2dFn) -> Result<Self> {
        let extensions = api.extensions();
        if !extensions.contains("GL_OES_EGL_image_external") {
            bail!("GL_OES_EGL_image_external is not supported");
        }

        let external = compile_program(&api, VERTEX_SHADER, EXTERNAL_FRAGMENT_SHADER)
            .context("Failed to build the external-image program")?;
        let layer = compile_program(&api, VERTEX_SHADER, LAYER_FRAGMENT_SHADER)
            .context("Failed to build the layer program")?;

        let mut framebuffer = 0;
        let mut dims = [0 as GLint; 2];
        // SAFETY: out-pointers reference locals of the right size.
        unsafe {
            (api.gen_framebuffers)(1, &mut framebuffer);
            (api.get_integerv)(GL_MAX_VIEWPORT_DIMS, dims.as_mut_ptr());
        }
        api.check("Renderer setup")?;

        debug!(
            "GlesRenderer: ready, max viewport {}x{}",
            dims[0], dims[1]
        );
        Ok(GlesRenderer {
            api,
            image_target_texture,
            external,
            layer,
            framebuffer,
            max_viewport: (dims[0], dims[1]),
        })
    }

    pub fn max_viewport_dims(&self) -> (i32, i32) {
        self.max_viewport
    }

    pub fn create_texture(&self, width: u32, height: u32) -> Result<GLuint> {
        let api = &self.api;
        let mut texture = 0;
        // SAFETY: context is current; a null pixel pointer allocates storage
        // without uploading.
        unsafe {
            (api.gen_textures)(1, &mut texture);
            (api.bind_texture)(GL_TEXTURE_2D, texture);
            (api.tex_image_2d)(
                GL_TEXTURE_2D,
                0,
                GL_RGBA as GLint,
                width as GLsizei,
                height as GLsizei,
                0,
                GL_RGBA,
                GL_UNSIGNED_BYTE,
                std::ptr::null(),
            );
            (api.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_WRAP_S, GL_CLAMP_TO_EDGE);
            (api.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_WRAP_T, GL_CLAMP_TO_EDGE);
            (api.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MIN_FILTER, GL_LINEAR);
            (api.tex_parameteri)(GL_TEXTURE_2D, GL_TEXTURE_MAG_FILTER, GL_LINEAR);
            (api.bind_texture)(GL_TEXTURE_2D, 0);
        }
        if let Err(e) = self.api.check("Texture creation") {
            self.destroy_texture(texture);
            return Err(e);
        }
        Ok(texture)
    }

    pub fn destroy_texture(&self, texture: GLuint) {
        // SAFETY: deleting an unknown or zero name is ignored by GL.
        unsafe { (self.api.delete_textures)(1, &texture) };
    }

    /// Stage 1: copies an EGL image into `target` through the external
    /// sampler, depth and blending off.
    pub fn draw_external(&self, image: *mut c_void, target: GLuint, viewport: &Viewport) -> Result<()> {
        let api = &self.api;
        let mut source = 0;
        // SAFETY: context is current; `image` is a live EGLImage and `target`
        // a texture created by us.
        let status = unsafe {
            (api.gen_textures)(1, &mut source);
            (api.active_texture)(GL_TEXTURE0);
            (api.bind_texture)(GL_TEXTURE_EXTERNAL_OES, source);
            (api.tex_parameteri)(GL_TEXTURE_EXTERNAL_OES, GL_TEXTURE_MIN_FILTER, GL_LINEAR);
            (api.tex_parameteri)(GL_TEXTURE_EXTERNAL_OES, GL_TEXTURE_MAG_FILTER, GL_LINEAR);
            (self.image_target_texture)(GL_TEXTURE_EXTERNAL_OES, image);

            (api.bind_framebuffer)(GL_FRAMEBUFFER, self.framebuffer);
            (api.framebuffer_texture_2d)(
                GL_FRAMEBUFFER,
                GL_COLOR_ATTACHMENT0,
                GL_TEXTURE_2D,
                target,
                0,
            );
            (api.check_framebuffer_status)(GL_FRAMEBUFFER)
        };

        let result = if status != GL_FRAMEBUFFER_COMPLETE {
            Err(anyhow::anyhow!(
                "Stage 1 framebuffer incomplete (0x{:04X})",
                status
            ))
        } else {
            // SAFETY: context is current and the framebuffer is complete.
            unsafe {
                (api.disable)(GL_DEPTH_TEST);
                (api.disable)(GL_BLEND);
                (api.clear_color)(0.0, 0.0, 0.0, 0.0);
                (api.clear)(GL_COLOR_BUFFER_BIT);
            }
            self.draw_quad(&self.external, viewport, 0.0, 1.0)
                .and_then(|_| api.check("Stage 1 draw"))
        };

        // SAFETY: unbinding and deleting objects we created above.
        unsafe {
            (api.bind_texture)(GL_TEXTURE_EXTERNAL_OES, 0);
            (api.framebuffer_texture_2d)(GL_FRAMEBUFFER, GL_COLOR_ATTACHMENT0, GL_TEXTURE_2D, 0, 0);
            (api.bind_framebuffer)(GL_FRAMEBUFFER, 0);
            (api.delete_textures)(1, &source);
        }
        result
    }

    /// Stage 2 setup on the default framebuffer.
    pub fn begin_scene(&self, width: u32, height: u32) -> Result<()> {
        let api = &self.api;
        // SAFETY: context is current.
        unsafe {
            (api.bind_framebuffer)(GL_FRAMEBUFFER, 0);
            (api.viewport)(0, 0, width as GLsizei, height as GLsizei);
            (api.enable)(GL_BLEND);
            (api.blend_func)(GL_SRC_ALPHA, GL_ONE_MINUS_SRC_ALPHA);
            (api.enable)(GL_DEPTH_TEST);
            // Equal depths still draw, in back-to-front order.
            (api.depth_func)(GL_LEQUAL);
            (api.clear_depthf)(1.0);
            (api.clear_color)(0.0, 0.0, 0.0, 1.0);
            (api.clear)(GL_COLOR_BUFFER_BIT | GL_DEPTH_BUFFER_BIT);
        }
        api.check("Scene setup")
    }

    pub fn draw_layer(&self, texture: GLuint, viewport: &Viewport, depth: f32, opacity: f32) -> Result<()> {
        let api = &self.api;
        // SAFETY: context is current; `texture` is one of ours.
        unsafe {
            (api.active_texture)(GL_TEXTURE0);
            (api.bind_texture)(GL_TEXTURE_2D, texture);
        }
        let drawn = self.draw_quad(&self.layer, viewport, depth, opacity);
        // SAFETY: as above.
        unsafe { (api.bind_texture)(GL_TEXTURE_2D, 0) };
        drawn.and_then(|_| api.check("Layer draw"))
    }

    pub fn end_scene(&self) -> Result<()> {
        let api = &self.api;
        // SAFETY: context is current.
        unsafe {
            (api.use_program)(0);
            (api.disable)(GL_DEPTH_TEST);
            (api.disable)(GL_BLEND);
        }
        api.check("Scene teardown")
    }

    /// Full pipeline flush, for drivers without fence sync.
    pub fn finish(&self) -> Result<()> {
        // SAFETY: context is current.
        unsafe { (self.api.finish)() };
        self.api.check("glFinish")
    }

    fn draw_quad(&self, program: &Program, viewport: &Viewport, depth: f32, opacity: f32) -> Result<()> {
        let api = &self.api;
        let (extent, origin) = viewport.quad.clip_mapping();
        // SAFETY: context is current; QUAD is 'static and outlives the draw.
        unsafe {
            (api.viewport)(viewport.x, viewport.y, viewport.width, viewport.height);
            (api.use_program)(program.id);
            (api.uniform_2f)(program.extent, extent[0], extent[1]);
            (api.uniform_2f)(program.origin, origin[0], origin[1]);
            (api.uniform_1f)(program.depth, depth);
            (api.uniform_1i)(program.sampler, 0);
            if program.opacity >= 0 {
                (api.uniform_1f)(program.opacity, opacity);
            }
            (api.vertex_attrib_pointer)(
                POSITION_ATTRIB,
                2,
                GL_FLOAT,
                GL_FALSE,
                0,
                QUAD.as_ptr() as *const c_void,
            );
            (api.enable_vertex_attrib_array)(POSITION_ATTRIB);
            (api.draw_arrays)(GL_TRIANGLE_STRIP, 0, (QUAD.len() / 2) as GLsizei);
            (api.disable_vertex_attrib_array)(POSITION_ATTRIB);
        }
        api.check("Quad draw")
    }

    /// Deletes GL objects. The context must be current.
    pub fn destroy(&self) {
        let api = &self.api;
        // SAFETY: context is current; names are ours.
        unsafe {
            (api.delete_framebuffers)(1, &self.framebuffer);
            (api.delete_program)(self.external.id);
            (api.delete_program)(self.layer.id);
        }
    }
}

fn compile_shader(api: &GlesApi, kind: GLenum, source: &str) -> Result<GLuint> {
    let source = CString::new(source).context("Shader source contains NUL")?;
    // SAFETY: context is current; the source pointer is valid for the call.
    unsafe {
        let shader = (api.create_shader)(kind);
        if shader == 0 {
            bail!("glCreateShader failed");
        }
        let ptr = source.as_ptr();
        (api.shader_source)(shader, 1, &ptr, std::ptr::null());
        (api.compile_shader)(shader);

        let mut ok = 0;
        (api.get_shaderiv)(shader, GL_COMPILE_STATUS, &mut ok);
        if ok == 0 {
            let log = info_log(shader, api.get_shaderiv, api.get_shader_info_log);
            error!("GlesRenderer: shader compile failed: {}", log);
            (api.delete_shader)(shader);
            bail!("Shader compile failed: {}", log);
        }
        Ok(shader)
    }
}

fn compile_program(api: &GlesApi, vertex: &str, fragment: &str) -> Result<Program> {
    let vs = compile_shader(api, GL_VERTEX_SHADER, vertex)?;
    let fs = match compile_shader(api, GL_FRAGMENT_SHADER, fragment) {
        Ok(fs) => fs,
        Err(e) => {
            // SAFETY: `vs` was created above.
            unsafe { (api.delete_shader)(vs) };
            return Err(e);
        }
    };

    // SAFETY: context is current; shaders are live and detached on delete.
    unsafe {
        let id = (api.create_program)();
        (api.attach_shader)(id, vs);
        (api.attach_shader)(id, fs);
        (api.bind_attrib_location)(id, POSITION_ATTRIB, c"position".as_ptr());
        (api.link_program)(id);
        (api.delete_shader)(vs);
        (api.delete_shader)(fs);

        let mut ok = 0;
        (api.get_programiv)(id, GL_LINK_STATUS, &mut ok);
        if ok == 0 {
            let log = info_log(id, api.get_programiv, api.get_program_info_log);
            error!("GlesRenderer: program link failed: {}", log);
            (api.delete_program)(id);
            bail!("Program link failed: {}", log);
        }

        let uniform = |name: &CStr| (api.get_uniform_location)(id, name.as_ptr());
        Ok(Program {
            id,
            extent: uniform(c"extent"),
            origin: uniform(c"origin"),
            depth: uniform(c"depth"),
            sampler: uniform(c"sampler"),
            opacity: uniform(c"opacity"),
        })
    }
}

/// Reads a shader or program info log.
///
/// # Safety
/// The context must be current and `object` a live shader or program
/// matching the two accessors.
unsafe fn info_log(
    object: GLuint,
    get_iv: unsafe extern "C" fn(GLuint, GLenum, *mut GLint),
    get_log: unsafe extern "C" fn(GLuint, GLsizei, *mut GLsizei, *mut c_char),
) -> String {
    let mut len = 0;
    get_iv(object, GL_INFO_LOG_LENGTH, &mut len);
    if len <= 0 {
        return String::from("(no log)");
    }
    let mut buf = vec![0u8; len as usize];
    let mut written = 0;
    get_log(object, len, &mut written, buf.as_mut_ptr() as *mut c_char);
    buf.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buf).into_owned()
}
