//! GLES2 compositing backend on top of `gleam`.
//!
//! Owns the offscreen framebuffer, its RGBA color texture, the graphics-plane
//! texture, the fullscreen quad (VBO + EBO) and the two-sampler program.

use std::ffi::c_void;
use std::rc::Rc;

use gleam::gl::{self, GLint, GLuint, Gl};
use hyperwebos_core::{RendererError, Resolution, TextureHandle};
use tracing::{info, warn};

use crate::{GpuBackend, ShaderSources};

/// Unit square as two triangles, in clip space.
const QUAD_VERTICES: [f32; 8] = [
    -1.0, 1.0, //
    -1.0, -1.0, //
    1.0, -1.0, //
    1.0, 1.0,
];
/// GLES2 only guarantees 16-bit indices.
const QUAD_ELEMENTS: [u16; 6] = [0, 1, 2, 2, 3, 0];

const GRAPHICS_UNIT: GLint = 1;
const VIDEO_UNIT: GLint = 2;

// MARK: - GlContextLoader

/// Platform GL context the backend renders with.
pub trait GlContextLoader: Send {
    /// Address of a GL entry point, or null.
    fn get_proc_address(&self, name: &str) -> *const c_void;

    /// Make the context current on the calling thread.
    fn make_current(&self) -> Result<(), RendererError>;

    /// Detach the context from the calling thread.
    fn release_current(&self);
}

// MARK: - GlesBackend

pub struct GlesBackend {
    gl: Rc<dyn Gl>,
    resolution: Resolution,
    framebuffer: GLuint,
    target_texture: GLuint,
    graphics_texture: GLuint,
    vbo: GLuint,
    ebo: GLuint,
    vertex_shader: GLuint,
    fragment_shader: GLuint,
    program: GLuint,
    attrib_position: GLuint,
    uniform_graphics: GLint,
    uniform_video: GLint,
    destroyed: bool,
    // Last field: the context must outlive the GL function table.
    loader: Box<dyn GlContextLoader>,
}

// SAFETY: the GL function table is only used from the thread holding the
// pipeline's frame lock, between `make_current` and `release_current`.
unsafe impl Send for GlesBackend {}

impl GlesBackend {
    /// Build every GL object the compositing pass needs, then release the
    /// context from the calling thread.
    ///
    /// Shader compile or link failures are configuration faults. Objects
    /// created before a failure are deleted when the half-built backend drops.
    pub fn new(
        loader: Box<dyn GlContextLoader>,
        resolution: Resolution,
        shaders: &ShaderSources,
    ) -> Result<Self, RendererError> {
        loader.make_current()?;
        let gl: Rc<dyn Gl> =
            unsafe { gl::GlesFns::load_with(|name| loader.get_proc_address(name)) };

        let mut backend = Self {
            gl,
            resolution,
            framebuffer: 0,
            target_texture: 0,
            graphics_texture: 0,
            vbo: 0,
            ebo: 0,
            vertex_shader: 0,
            fragment_shader: 0,
            program: 0,
            attrib_position: 0,
            uniform_graphics: -1,
            uniform_video: -1,
            destroyed: false,
            loader,
        };
        backend.create_objects(shaders)?;
        backend.check("setup")?;
        backend.loader.release_current();
        info!(
            "GLES backend ready: {} (position={}, tex_gm={}, tex_vt={})",
            resolution, backend.attrib_position, backend.uniform_graphics, backend.uniform_video
        );
        Ok(backend)
    }

    fn create_objects(&mut self, shaders: &ShaderSources) -> Result<(), RendererError> {
        let gl = Rc::clone(&self.gl);

        self.framebuffer = gl.gen_framebuffers(1)[0];
        if self.framebuffer == 0 {
            return Err(RendererError::ResourceCreation("framebuffer".into()));
        }

        let buffers = gl.gen_buffers(2);
        (self.vbo, self.ebo) = (buffers[0], buffers[1]);
        if self.vbo == 0 || self.ebo == 0 {
            return Err(RendererError::ResourceCreation("quad buffers".into()));
        }
        gl.bind_buffer(gl::ARRAY_BUFFER, self.vbo);
        gl.buffer_data_untyped(
            gl::ARRAY_BUFFER,
            std::mem::size_of_val(&QUAD_VERTICES) as isize,
            QUAD_VERTICES.as_ptr() as *const c_void,
            gl::STATIC_DRAW,
        );
        gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, self.ebo);
        gl.buffer_data_untyped(
            gl::ELEMENT_ARRAY_BUFFER,
            std::mem::size_of_val(&QUAD_ELEMENTS) as isize,
            QUAD_ELEMENTS.as_ptr() as *const c_void,
            gl::STATIC_DRAW,
        );
        gl.bind_buffer(gl::ARRAY_BUFFER, 0);
        gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, 0);

        self.vertex_shader = compile_shader(&*gl, gl::VERTEX_SHADER, "Vertex", &shaders.vertex)?;
        self.fragment_shader =
            compile_shader(&*gl, gl::FRAGMENT_SHADER, "Fragment", &shaders.fragment)?;

        self.program = gl.create_program();
        if self.program == 0 {
            return Err(RendererError::ResourceCreation("program".into()));
        }
        gl.attach_shader(self.program, self.vertex_shader);
        gl.attach_shader(self.program, self.fragment_shader);
        gl.link_program(self.program);
        let mut status = [0];
        unsafe { gl.get_program_iv(self.program, gl::LINK_STATUS, &mut status) };
        if status[0] != gl::TRUE as GLint {
            return Err(RendererError::ProgramLink(gl.get_program_info_log(self.program)));
        }

        let attrib_position = gl.get_attrib_location(self.program, "position");
        if attrib_position < 0 {
            return Err(RendererError::ProgramLink("attribute `position` not found".into()));
        }
        self.attrib_position = attrib_position as GLuint;
        self.uniform_graphics = gl.get_uniform_location(self.program, "tex_gm");
        self.uniform_video = gl.get_uniform_location(self.program, "tex_vt");
        if self.uniform_graphics < 0 || self.uniform_video < 0 {
            warn!(
                "Sampler uniform missing (tex_gm={}, tex_vt={})",
                self.uniform_graphics, self.uniform_video
            );
        }

        let textures = gl.gen_textures(2);
        (self.target_texture, self.graphics_texture) = (textures[0], textures[1]);
        if self.target_texture == 0 || self.graphics_texture == 0 {
            return Err(RendererError::ResourceCreation("textures".into()));
        }
        for texture in [self.target_texture, self.graphics_texture] {
            gl.bind_texture(gl::TEXTURE_2D, texture);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
            gl.tex_image_2d(
                gl::TEXTURE_2D,
                0,
                gl::RGBA as GLint,
                self.resolution.width as i32,
                self.resolution.height as i32,
                0,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                None,
            );
        }
        gl.bind_texture(gl::TEXTURE_2D, 0);
        Ok(())
    }

    fn check(&self, call: &'static str) -> Result<(), RendererError> {
        match self.gl.get_error() {
            gl::NO_ERROR => Ok(()),
            code => Err(RendererError::Gl { call, code }),
        }
    }
}

fn compile_shader(
    gl: &dyn Gl,
    kind: gl::GLenum,
    stage: &'static str,
    source: &str,
) -> Result<GLuint, RendererError> {
    let shader = gl.create_shader(kind);
    gl.shader_source(shader, &[source.as_bytes()]);
    gl.compile_shader(shader);
    let mut status = [0];
    unsafe { gl.get_shader_iv(shader, gl::COMPILE_STATUS, &mut status) };
    if status[0] != gl::TRUE as GLint {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(RendererError::ShaderCompile { stage, log });
    }
    Ok(shader)
}

impl GpuBackend for GlesBackend {
    fn make_current(&mut self) -> Result<(), RendererError> {
        self.loader.make_current()
    }

    fn release_current(&mut self) {
        self.loader.release_current();
    }

    fn bind_target(&mut self, resolution: Resolution) -> Result<(), RendererError> {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.framebuffer);
        self.gl.viewport(0, 0, resolution.width as i32, resolution.height as i32);
        self.check("glBindFramebuffer")
    }

    fn upload_graphics(&mut self, rgba: &[u8]) -> Result<(), RendererError> {
        self.gl.bind_texture(gl::TEXTURE_2D, self.graphics_texture);
        self.gl.tex_sub_image_2d(
            gl::TEXTURE_2D,
            0,
            0,
            0,
            self.resolution.width as i32,
            self.resolution.height as i32,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            rgba,
        );
        self.check("glTexSubImage2D")
    }

    fn attach_color_target(&mut self) -> Result<(), RendererError> {
        self.gl.framebuffer_texture_2d(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            self.target_texture,
            0,
        );
        self.check("glFramebufferTexture2D")
    }

    fn draw_composite(&mut self, video: TextureHandle) -> Result<(), RendererError> {
        let gl = &self.gl;
        gl.clear_color(0.0, 0.0, 0.0, 1.0);
        gl.clear(gl::COLOR_BUFFER_BIT);

        gl.bind_buffer(gl::ARRAY_BUFFER, self.vbo);
        gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, self.ebo);
        gl.use_program(self.program);
        gl.enable_vertex_attrib_array(self.attrib_position);
        gl.vertex_attrib_pointer(self.attrib_position, 2, gl::FLOAT, false, 0, 0);

        gl.active_texture(gl::TEXTURE0 + GRAPHICS_UNIT as u32);
        gl.bind_texture(gl::TEXTURE_2D, self.graphics_texture);
        gl.uniform_1i(self.uniform_graphics, GRAPHICS_UNIT);

        gl.active_texture(gl::TEXTURE0 + VIDEO_UNIT as u32);
        gl.bind_texture(gl::TEXTURE_2D, video.raw());
        gl.uniform_1i(self.uniform_video, VIDEO_UNIT);

        gl.draw_elements(gl::TRIANGLES, QUAD_ELEMENTS.len() as i32, gl::UNSIGNED_SHORT, 0);
        self.check("glDrawElements")
    }

    fn check_target(&mut self) -> Result<(), RendererError> {
        let status = self.gl.check_frame_buffer_status(gl::FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            return Err(RendererError::IncompleteTarget { status });
        }
        Ok(())
    }

    fn read_rgba(&mut self, out: &mut [u8]) -> Result<(), RendererError> {
        let expected = self.resolution.rgba_len();
        if out.len() != expected {
            return Err(RendererError::BufferSize { expected, actual: out.len() });
        }
        self.gl.read_pixels_into_buffer(
            0,
            0,
            self.resolution.width as i32,
            self.resolution.height as i32,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            out,
        );
        self.check("glReadPixels")
    }

    fn unbind_all(&mut self) {
        let gl = &self.gl;
        gl.disable_vertex_attrib_array(self.attrib_position);
        gl.use_program(0);

        gl.bind_buffer(gl::ARRAY_BUFFER, 0);
        gl.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, 0);

        for unit in [VIDEO_UNIT, GRAPHICS_UNIT, 0] {
            gl.active_texture(gl::TEXTURE0 + unit as u32);
            gl.bind_texture(gl::TEXTURE_2D, 0);
        }

        gl.framebuffer_texture_2d(gl::FRAMEBUFFER, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, 0, 0);
        gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
    }

    fn is_texture(&self, texture: TextureHandle) -> bool {
        !texture.is_none() && self.gl.is_texture(texture.raw()) != 0
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(e) = self.loader.make_current() {
            warn!("GLES teardown cannot bind the context, leaking GL objects: {}", e);
            return;
        }

        // Names still 0 were never created; deleting 0 is ignored by GL.
        let gl = &self.gl;
        gl.delete_program(self.program);
        gl.delete_shader(self.fragment_shader);
        gl.delete_shader(self.vertex_shader);
        gl.delete_buffers(&[self.vbo, self.ebo]);
        gl.delete_textures(&[self.graphics_texture, self.target_texture]);
        gl.delete_framebuffers(&[self.framebuffer]);
        self.loader.release_current();
        info!("GLES backend destroyed");
    }
}

impl Drop for GlesBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}
