//! Instanced rendering of spherical harmonic glyphs.
//!
//! A [`GlyphRenderer`] draws one deformed unit sphere per voxel of the
//! slice being displayed. All glyphs of a slice are drawn with a single
//! instanced call: the sphere mesh is shared, the voxel coordinate is a
//! per-instance attribute, and the radius of every vertex of every glyph is
//! read from a 3D texture built by [`RadiusTexture`].
//!
//! The renderer listens for changes to its [`ShOpts`] and [`Display`]. The
//! listeners only record what changed; the work is done once, before the
//! next frame, by [`GlyphRenderer::process_pending`].

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};
use ndarray::Array2;
use wgpu::util::DeviceExt;

use crate::{
    colourmap::ColourMapTexture,
    coords::{CoordinateTransforms, ImageTransforms},
    display::{Display, apply_bricon, bricon_to_display_range},
    enums::{ColourMode, DataFormat, Orientation, Space, SuppressMode, TextureKind},
    error::{RenderError, Result},
    glyph_packer::RadiusTexture,
    gpu::{self, Gpu, RenderTarget},
    image::Image,
    sh_basis::{self, SphereGeometry},
    sh_opts::ShOpts,
    texture::Texture,
    transform::{self, Bounds},
};

pub const RADIUS_UNIT: u32 = 0;
pub const COLOUR_MAP_UNIT: u32 = 1;
const UNIFORM_BINDING: u32 = 4;

/// Radius texture last: rebinding unit 0 after unit 1 avoids stale
/// texture state on some drivers.
pub const BIND_ORDER: [u32; 2] = [COLOUR_MAP_UNIT, RADIUS_UNIT];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlyphState {
    Uninitialized,
    Ready,
    Drawing,
    /// The shaders failed to compile. Nothing will be drawn.
    Unusable,
}

impl GlyphState {
    pub fn name(self) -> &'static str {
        match self {
            GlyphState::Uninitialized => "uninitialized",
            GlyphState::Ready => "ready",
            GlyphState::Drawing => "drawing",
            GlyphState::Unusable => "unusable",
        }
    }

    fn require(self, expected: GlyphState) -> Result<()> {
        if self != expected {
            return Err(RenderError::InvalidState {
                expected: expected.name(),
                actual: self.name(),
            });
        }
        Ok(())
    }

    pub fn init(self, compiled: bool) -> Result<Self> {
        self.require(GlyphState::Uninitialized)?;
        Ok(if compiled {
            GlyphState::Ready
        } else {
            GlyphState::Unusable
        })
    }

    pub fn pre_draw(self) -> Result<Self> {
        self.require(GlyphState::Ready)?;
        Ok(GlyphState::Drawing)
    }

    pub fn draw(self) -> Result<Self> {
        self.require(GlyphState::Drawing)?;
        Ok(GlyphState::Drawing)
    }

    pub fn post_draw(self) -> Result<Self> {
        self.require(GlyphState::Drawing)?;
        Ok(GlyphState::Ready)
    }
}

/// Outcome of [`GlyphRenderer::update_shader_state`].
#[derive(Clone, Debug, PartialEq)]
pub enum ShaderUpdate {
    Unchanged,
    /// Only uniform values changed.
    Uniforms,
    /// The sphere resolution changed; the mesh has to be rebuilt.
    Geometry(SphereGeometry),
}

/// Everything the shaders need which does not change per draw.
#[derive(Clone, Debug, PartialEq)]
pub struct GlyphSettings {
    pub x_flip: bool,
    pub lighting: bool,
    pub light_pos: Vec3,
    pub sh_resolution: u32,
    pub n_vertices: u32,
    pub size_scaling: f32,
    pub radius_threshold: f32,
    pub colour_mode: ColourMode,
    pub colours: [[f32; 4]; 3],
    pub cmap_xform: Mat4,
}

impl GlyphSettings {
    pub fn new(image: &Image, opts: &ShOpts, display: &Display, cmap_xform: Mat4) -> Self {
        let res = opts.sh_resolution();
        Self {
            x_flip: opts.neuro_flip() && image.is_neurological(),
            lighting: opts.lighting(),
            light_pos: light_position(),
            sh_resolution: res,
            n_vertices: res * res,
            size_scaling: opts.size() / 100.0,
            radius_threshold: opts.radius_threshold(),
            colour_mode: opts.colour_mode(),
            colours: glyph_colours(opts, display),
            cmap_xform,
        }
    }
}

pub fn light_position() -> Vec3 {
    transform::normalise(Vec3::new(-1.0, -1.0, 4.0))
}

/// X, Y and Z direction colours after suppression, brightness, contrast
/// and alpha have been applied.
pub fn glyph_colours(opts: &ShOpts, display: &Display) -> [[f32; 4]; 3] {
    let suppressed = match opts.suppress_mode() {
        SuppressMode::White => [1.0, 1.0, 1.0, 1.0],
        SuppressMode::Black => [0.0, 0.0, 0.0, 1.0],
        SuppressMode::Transparent => [0.0, 0.0, 0.0, 0.0],
    };
    let brightness = display.brightness() / 100.0;
    let contrast = display.contrast() / 100.0;
    let alpha = display.alpha() / 100.0;

    let mut colours = opts.direction_colours();
    for (colour, suppress) in colours.iter_mut().zip(opts.suppress()) {
        if suppress {
            *colour = suppressed;
        }
        let transparent = suppress && opts.suppress_mode() == SuppressMode::Transparent;
        *colour = apply_bricon(*colour, brightness, contrast);
        colour[3] = if transparent { 0.0 } else { alpha };
    }
    colours
}

/// Voxels on the slice at display position `zpos`. `bbox` (display
/// coordinates) limits the in-plane extent and defaults to the bounds of
/// the overlay. Voxels outside the image may be included.
pub fn generate_voxel_coordinates(
    xforms: &dyn CoordinateTransforms,
    orientation: Orientation,
    zpos: f32,
    bbox: Option<Bounds>,
) -> Result<Vec<[i32; 3]>> {
    let (_, _, zax) = orientation.axes();
    let mut bbox = bbox.unwrap_or_else(|| xforms.bounds());
    bbox.lo[zax] = zpos;
    bbox.hi[zax] = zpos;

    let d2v = xforms.get_transform(Space::Display, Space::Voxel)?;
    let vbox = bbox.transformed(&d2v);

    let range = |axis: usize| {
        let (lo, hi) = (vbox.lo[axis], vbox.hi[axis]);
        // The slice axis collapses to a single plane of voxels
        if hi - lo < 1.0 {
            let centre = (0.5 * (lo + hi)).round() as i32;
            centre..=centre
        } else {
            lo.ceil() as i32..=hi.floor() as i32
        }
    };

    let (xs, ys, zs) = (range(0), range(1), range(2));
    let mut voxels = Vec::new();
    for z in zs {
        for y in ys.clone() {
            for x in xs.clone() {
                voxels.push([x, y, z]);
            }
        }
    }
    Ok(voxels)
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct GlyphUniforms {
    vox_to_clip: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    cmap_xform: [[f32; 4]; 4],
    x_colour: [f32; 4],
    y_colour: [f32; 4],
    z_colour: [f32; 4],
    light_pos: [f32; 4],
    rad_tex_shape: [u32; 4],
    params: [f32; 4],
    flags: [u32; 4],
}

#[derive(Clone, Copy)]
enum Change {
    Coefficients,
    ColourMap,
    Shader,
}

const SH_OPTS_PROPERTIES: &[(&str, Change)] = &[
    ("shResolution", Change::Coefficients),
    ("shOrder", Change::Coefficients),
    ("size", Change::Shader),
    ("lighting", Change::Shader),
    ("neuroFlip", Change::Shader),
    ("radiusThreshold", Change::Shader),
    ("colourMode", Change::Shader),
    ("colourMap", Change::ColourMap),
    ("xColour", Change::Shader),
    ("yColour", Change::Shader),
    ("zColour", Change::Shader),
    ("suppressX", Change::Shader),
    ("suppressY", Change::Shader),
    ("suppressZ", Change::Shader),
    ("suppressMode", Change::Shader),
];

const DISPLAY_PROPERTIES: &[&str] = &["alpha", "brightness", "contrast"];

struct Pending {
    coefficients: Cell<bool>,
    cmap: Cell<bool>,
    shader: Cell<bool>,
}

impl Pending {
    fn all() -> Self {
        Self {
            coefficients: Cell::new(true),
            cmap: Cell::new(true),
            shader: Cell::new(true),
        }
    }

    fn raise(&self, change: Change) {
        match change {
            Change::Coefficients => self.coefficients.set(true),
            Change::ColourMap => self.cmap.set(true),
            Change::Shader => self.shader.set(true),
        }
    }
}

struct SphereBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    n_indices: u32,
}

struct GlyphGpu {
    /// Front faces wound counter-clockwise and clockwise.
    pipelines: [wgpu::RenderPipeline; 2],
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sphere: Option<SphereBuffers>,
}

#[derive(Clone, Copy)]
struct Frame {
    view: Mat4,
    proj: Mat4,
    normal_matrix: Mat3,
}

pub struct GlyphRenderer {
    name: String,
    xforms: Rc<ImageTransforms>,
    opts: Rc<RefCell<ShOpts>>,
    display: Rc<RefCell<Display>>,
    orientation: Orientation,
    state: GlyphState,
    pending: Rc<Pending>,
    coefficients: Array2<f32>,
    settings: Option<GlyphSettings>,
    geometry: Option<SphereGeometry>,
    radius: RadiusTexture,
    cmap: ColourMapTexture,
    gpu: Option<GlyphGpu>,
    frame: Option<Frame>,
}

impl GlyphRenderer {
    /// Creates a renderer for the SH image behind `xforms`, and registers
    /// listeners on `opts` and `display`. `max_texture_3d` is the largest
    /// 3D texture dimension the device supports.
    pub fn new(
        name: impl Into<String>,
        xforms: Rc<ImageTransforms>,
        opts: Rc<RefCell<ShOpts>>,
        display: Rc<RefCell<Display>>,
        orientation: Orientation,
        max_texture_3d: u32,
    ) -> Result<Self> {
        let name = name.into();
        let expected = sh_basis::num_coefficients(opts.borrow().image_order());
        let image = xforms.image();
        if image.nvols() != expected {
            return Err(RenderError::InvalidImage(format!(
                "{} has {} volumes, options expect {expected}",
                image.name,
                image.nvols()
            )));
        }

        let pending = Rc::new(Pending::all());
        for &(property, change) in SH_OPTS_PROPERTIES {
            let pending = pending.clone();
            opts.borrow_mut()
                .notifier
                .add_listener(property, &name, move |_| pending.raise(change));
        }
        for &property in DISPLAY_PROPERTIES {
            let pending = pending.clone();
            display
                .borrow_mut()
                .notifier
                .add_listener(property, &name, move |_| pending.raise(Change::ColourMap));
        }

        let mut renderer = Self {
            radius: RadiusTexture::new(format!("{name}_radTexture"), max_texture_3d),
            cmap: ColourMapTexture::new(format!("{name}_cm")),
            name,
            xforms,
            opts,
            display,
            orientation,
            state: GlyphState::Uninitialized,
            pending,
            coefficients: Array2::zeros((0, expected)),
            settings: None,
            geometry: None,
            gpu: None,
            frame: None,
        };
        renderer.process_pending()?;
        Ok(renderer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GlyphState {
        self.state
    }

    pub fn settings(&self) -> Option<&GlyphSettings> {
        self.settings.as_ref()
    }

    pub fn coefficients(&self) -> &Array2<f32> {
        &self.coefficients
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    pub fn colour_map_texture(&self) -> &ColourMapTexture {
        &self.cmap
    }

    pub fn radius_texture(&self) -> &RadiusTexture {
        &self.radius
    }

    /// Applies every option change recorded since the last call.
    pub fn process_pending(&mut self) -> Result<ShaderUpdate> {
        if self.pending.coefficients.take() {
            self.coefficients = self.opts.borrow().coefficients();
            self.pending.shader.set(true);
        }
        if self.pending.cmap.take() {
            self.cmap_update()?;
            self.pending.shader.set(true);
        }
        if !self.pending.shader.take() {
            return Ok(ShaderUpdate::Unchanged);
        }
        let update = self.update_shader_state();
        if let ShaderUpdate::Geometry(geometry) = &update {
            self.geometry = Some(geometry.clone());
        }
        Ok(update)
    }

    fn cmap_update(&mut self) -> Result<()> {
        let opts = self.opts.borrow();
        let display = self.display.borrow();
        // Radii are assumed to lie between 0 and 1
        let range = bricon_to_display_range(
            (0.0, 1.0),
            display.brightness() / 100.0,
            display.contrast() / 100.0,
        );
        self.cmap
            .set(opts.colour_map().clone(), display.alpha() / 100.0, range)
    }

    /// Recomputes the shader settings, and reports what has changed since
    /// the last call.
    pub fn update_shader_state(&mut self) -> ShaderUpdate {
        let settings = GlyphSettings::new(
            self.xforms.image(),
            &self.opts.borrow(),
            &self.display.borrow(),
            self.cmap.coordinate_transform(),
        );
        let update = match &self.settings {
            Some(old) if *old == settings => ShaderUpdate::Unchanged,
            Some(old) if old.sh_resolution == settings.sh_resolution => ShaderUpdate::Uniforms,
            _ => ShaderUpdate::Geometry(sh_basis::unit_sphere(settings.sh_resolution)),
        };
        self.settings = Some(settings);
        update
    }

    /// Compiles the shaders. On failure the renderer becomes unusable and
    /// the error is returned.
    pub async fn init(&mut self, gpu: &Gpu) -> Result<()> {
        self.init_with_source(gpu, include_str!("shaders/glsh.wgsl"))
            .await
    }

    async fn init_with_source(&mut self, gpu: &Gpu, source: &str) -> Result<()> {
        self.state.require(GlyphState::Uninitialized)?;
        let compiled = gpu
            .validated(&self.name, |device| create_glyph_gpu(device, source))
            .await;
        self.state = self.state.init(compiled.is_ok())?;
        self.gpu = Some(compiled?);
        log::debug!("{}: shaders compiled", self.name);
        Ok(())
    }

    /// True when a frame can be drawn.
    pub fn ready(&self) -> bool {
        matches!(self.state, GlyphState::Ready | GlyphState::Drawing) && self.cmap.texture().ready()
    }

    fn unusable(&self) -> bool {
        if self.state == GlyphState::Unusable {
            log::warn!("{}: renderer is unusable, not drawing", self.name);
            return true;
        }
        false
    }

    /// Prepares for one or more draws with the given view and projection.
    /// `proj` follows the GL convention of depth in `[-1, 1]`.
    pub fn pre_draw(&mut self, gpu: &Gpu, view: Mat4, proj: Mat4) -> Result<()> {
        if self.unusable() {
            return Ok(());
        }
        let next = self.state.pre_draw()?;

        self.process_pending()?;
        for unit in BIND_ORDER {
            match unit {
                COLOUR_MAP_UNIT => {
                    self.cmap.texture_mut().refresh(&gpu.device, &gpu.queue)?;
                }
                _ => {
                    if self.radius.texture().size().is_some() {
                        self.radius.refresh(&gpu.device, &gpu.queue)?;
                    }
                }
            }
        }
        if let (Some(geometry), Some(glyph_gpu)) = (self.geometry.take(), self.gpu.as_mut()) {
            log::debug!(
                "{}: sphere mesh with {} vertices",
                self.name,
                geometry.num_vertices()
            );
            glyph_gpu.sphere = Some(create_sphere_buffers(&gpu.device, &geometry));
        }

        let v2d = self.xforms.get_transform(Space::Voxel, Space::Display)?;
        let normal_matrix = transform::normal_matrix(&(Mat3::from_mat4(view) * Mat3::from_mat4(v2d)));
        self.frame = Some(Frame {
            view,
            proj,
            normal_matrix,
        });
        self.state = next;
        Ok(())
    }

    /// Draws the glyphs of the slice at display position `zpos`. `xform`
    /// is applied to voxel coordinates before the voxel to display
    /// transform.
    pub fn draw(
        &mut self,
        gpu: &Gpu,
        target: &RenderTarget,
        zpos: f32,
        xform: Option<Mat4>,
        bbox: Option<Bounds>,
    ) -> Result<()> {
        if self.unusable() {
            return Ok(());
        }
        self.state.draw()?;
        let frame = self
            .frame
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;

        let v2d = self.xforms.get_transform(Space::Voxel, Space::Display)?;
        let xform = match xform {
            Some(xform) => transform::concat(&[v2d, xform]),
            None => v2d,
        };

        let voxels = generate_voxel_coordinates(self.xforms.as_ref(), self.orientation, zpos, bbox)?;
        let update = self
            .radius
            .update(self.xforms.image(), &self.coefficients, &voxels)?;
        self.radius.refresh(&gpu.device, &gpu.queue)?;

        if update.voxels.is_empty() {
            log::debug!("{}: no voxels on slice {zpos}", self.name);
            return Ok(());
        }

        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;
        let glyph_gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;
        let sphere = glyph_gpu
            .sphere
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(format!("{} sphere mesh", self.name)))?;

        let vox_to_clip = transform::concat(&[transform::depth_remap(), frame.proj, frame.view, xform]);
        let [sx, sy, sz] = update.shape.map(|d| d as u32);
        let uniforms = GlyphUniforms {
            vox_to_clip: vox_to_clip.to_cols_array_2d(),
            normal_matrix: Mat4::from_mat3(frame.normal_matrix).to_cols_array_2d(),
            cmap_xform: settings.cmap_xform.to_cols_array_2d(),
            x_colour: settings.colours[0],
            y_colour: settings.colours[1],
            z_colour: settings.colours[2],
            light_pos: settings.light_pos.extend(0.0).to_array(),
            rad_tex_shape: [sx, sy, sz, settings.n_vertices],
            params: [settings.size_scaling, settings.radius_threshold, 0.0, 0.0],
            flags: [
                (settings.colour_mode == ColourMode::Radius) as u32,
                settings.lighting as u32,
                settings.x_flip as u32,
                0,
            ],
        };
        gpu.queue
            .write_buffer(&glyph_gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let instances: Vec<[f32; 3]> = update
            .voxels
            .iter()
            .map(|voxel| voxel.map(|c| c as f32))
            .collect();
        let instance_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Glyph Instance Buffer"),
                contents: bytemuck::cast_slice(&instances),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut entries = Vec::with_capacity(5);
        for unit in BIND_ORDER {
            let texture = match unit {
                COLOUR_MAP_UNIT => self.cmap.texture(),
                _ => self.radius.texture(),
            };
            entries.extend(texture.bind_entries(unit)?);
        }
        entries.push(wgpu::BindGroupEntry {
            binding: UNIFORM_BINDING,
            resource: glyph_gpu.uniform_buffer.as_entire_binding(),
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Glyph Bind Group"),
            layout: &glyph_gpu.bind_group_layout,
            entries: &entries,
        });

        // Mirroring transforms turn the sphere inside out
        let mirrored = transform::is_mirrored(frame.view * xform) != settings.x_flip;
        let pipeline = &glyph_gpu.pipelines[mirrored as usize];

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Glyph Encoder"),
            });
        {
            let mut pass = target.begin_pass(&mut encoder, "Glyph Pass")?;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, sphere.vertices.slice(..));
            pass.set_vertex_buffer(1, instance_buffer.slice(..));
            pass.set_index_buffer(sphere.indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..sphere.n_indices, 0, 0..instances.len() as u32);
        }
        gpu.queue.submit(Some(encoder.finish()));

        log::debug!(
            "{}: drew {} glyphs at {zpos} (radius texture {:?})",
            self.name,
            instances.len(),
            update.shape
        );
        Ok(())
    }

    pub fn post_draw(&mut self) -> Result<()> {
        if self.unusable() {
            return Ok(());
        }
        self.state = self.state.post_draw()?;
        self.frame = None;
        Ok(())
    }
}

impl Drop for GlyphRenderer {
    fn drop(&mut self) {
        match self.opts.try_borrow_mut() {
            Ok(mut opts) => opts.notifier.remove_all(&self.name),
            Err(_) => log::warn!("{}: options in use, listeners not removed", self.name),
        }
        match self.display.try_borrow_mut() {
            Ok(mut display) => display.notifier.remove_all(&self.name),
            Err(_) => log::warn!("{}: display in use, listeners not removed", self.name),
        }
    }
}

fn create_glyph_gpu(device: &wgpu::Device, source: &str) -> GlyphGpu {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Glyph Shader"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let mut entries = Vec::with_capacity(5);
    entries.extend(Texture::layout_entries(
        RADIUS_UNIT,
        TextureKind::D3,
        DataFormat::R32Float,
        wgpu::ShaderStages::VERTEX,
    ));
    entries.extend(Texture::layout_entries(
        COLOUR_MAP_UNIT,
        TextureKind::D2,
        DataFormat::Rgba8,
        wgpu::ShaderStages::FRAGMENT,
    ));
    entries.push(gpu::uniform_entry(
        UNIFORM_BINDING,
        wgpu::ShaderStages::VERTEX_FRAGMENT,
    ));
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Glyph Bind Group Layout"),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Glyph Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let vertex_attributes = wgpu::vertex_attr_array![0 => Float32x3];
    let instance_attributes = wgpu::vertex_attr_array![1 => Float32x3];
    let buffers = [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &vertex_attributes,
        },
        // One voxel coordinate per glyph
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &instance_attributes,
        },
    ];

    let pipeline = |front_face: wgpu::FrontFace| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Glyph Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(gpu::colour_target(Some(wgpu::BlendState::ALPHA_BLENDING)))],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(gpu::depth_state(true)),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    };

    let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Glyph Uniform Buffer"),
        size: std::mem::size_of::<GlyphUniforms>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    GlyphGpu {
        pipelines: [pipeline(wgpu::FrontFace::Ccw), pipeline(wgpu::FrontFace::Cw)],
        bind_group_layout,
        uniform_buffer,
        sphere: None,
    }
}

fn create_sphere_buffers(device: &wgpu::Device, geometry: &SphereGeometry) -> SphereBuffers {
    let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Glyph Vertex Buffer"),
        contents: bytemuck::cast_slice(&geometry.vertices),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Glyph Index Buffer"),
        contents: bytemuck::cast_slice(&geometry.indices),
        usage: wgpu::BufferUsages::INDEX,
    });
    SphereBuffers {
        vertices,
        indices,
        n_indices: geometry.num_indices() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coords::DisplaySpace, enums::TransformMode};
    use ndarray::Array4;

    fn sh_image(shape: (usize, usize, usize), affine: Mat4) -> Rc<Image> {
        let (x, y, z) = shape;
        let mut data = Array4::<f32>::zeros((x, y, z, 6));
        data.index_axis_mut(ndarray::Axis(3), 0).fill(1.0);
        Rc::new(Image::new("fod", data, Vec3::ONE, affine).unwrap())
    }

    fn renderer() -> (GlyphRenderer, Rc<RefCell<ShOpts>>, Rc<RefCell<Display>>) {
        let image = sh_image((4, 4, 4), Mat4::IDENTITY);
        let opts = Rc::new(RefCell::new(ShOpts::for_image(&image).unwrap()));
        let display = Rc::new(RefCell::new(Display::default()));
        let xforms = Rc::new(ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world()));
        let renderer = GlyphRenderer::new(
            "glyphs",
            xforms,
            opts.clone(),
            display.clone(),
            Orientation::Axial,
            2048,
        )
        .unwrap();
        (renderer, opts, display)
    }

    #[test]
    fn state_transitions() {
        let state = GlyphState::Uninitialized.init(true).unwrap();
        assert_eq!(state, GlyphState::Ready);
        let state = state.pre_draw().unwrap();
        assert_eq!(state, GlyphState::Drawing);
        assert_eq!(state.draw().unwrap(), GlyphState::Drawing);
        assert_eq!(state.post_draw().unwrap(), GlyphState::Ready);

        assert_eq!(GlyphState::Uninitialized.init(false).unwrap(), GlyphState::Unusable);
        assert!(GlyphState::Ready.init(true).is_err());
        assert!(GlyphState::Ready.draw().is_err());
        assert!(matches!(
            GlyphState::Uninitialized.pre_draw(),
            Err(RenderError::InvalidState {
                expected: "ready",
                actual: "uninitialized"
            })
        ));
    }

    #[test]
    fn new_renderer_has_geometry_pending() {
        let (renderer, opts, _) = renderer();
        assert_eq!(renderer.state(), GlyphState::Uninitialized);
        assert!(!renderer.ready());
        assert_eq!(renderer.coefficients().dim(), (16 * 16, 6));
        assert_eq!(renderer.geometry.as_ref().map(|g| g.resolution), Some(16));
        assert_eq!(renderer.settings().map(|s| s.n_vertices), Some(256));
        assert!(opts.borrow().notifier.has_listener("shResolution", "glyphs"));
    }

    #[test]
    fn resolution_change_rebuilds_geometry_once() {
        let (mut renderer, opts, _) = renderer();
        opts.borrow_mut().set_sh_resolution(8).unwrap();
        opts.borrow_mut().set_size(150.0);

        match renderer.process_pending().unwrap() {
            ShaderUpdate::Geometry(geometry) => assert_eq!(geometry.num_vertices(), 64),
            other => panic!("expected new geometry, got {other:?}"),
        }
        assert_eq!(renderer.coefficients().dim(), (64, 6));
        assert_eq!(renderer.process_pending().unwrap(), ShaderUpdate::Unchanged);
    }

    #[test]
    fn uniform_changes_keep_geometry() {
        let (mut renderer, opts, display) = renderer();
        renderer.process_pending().unwrap();

        opts.borrow_mut().set_lighting(false);
        opts.borrow_mut().set_lighting(true);
        opts.borrow_mut().set_lighting(false);
        assert_eq!(renderer.process_pending().unwrap(), ShaderUpdate::Uniforms);

        display.borrow_mut().set_brightness(75.0);
        assert_eq!(renderer.process_pending().unwrap(), ShaderUpdate::Uniforms);
        let (lo, hi) = renderer.colour_map_texture().display_range();
        assert!(lo < 0.0 && hi < 1.0);

        // Same value again
        opts.borrow_mut().set_lighting(false);
        assert_eq!(renderer.process_pending().unwrap(), ShaderUpdate::Unchanged);
    }

    #[test]
    fn drop_removes_listeners() {
        let (renderer, opts, display) = renderer();
        drop(renderer);
        assert!(opts.borrow().notifier.is_empty());
        assert!(display.borrow().notifier.is_empty());
    }

    #[test]
    fn mismatched_options_are_rejected() {
        let image = sh_image((2, 2, 2), Mat4::IDENTITY);
        let opts = Rc::new(RefCell::new(ShOpts::new(4)));
        let xforms = Rc::new(ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world()));
        let result = GlyphRenderer::new(
            "g",
            xforms,
            opts.clone(),
            Rc::new(RefCell::new(Display::default())),
            Orientation::Axial,
            2048,
        );
        assert!(matches!(result, Err(RenderError::InvalidImage(_))));
        assert!(opts.borrow().notifier.is_empty());
    }

    #[test]
    fn suppressed_colours() {
        let mut opts = ShOpts::new(2);
        let mut display = Display::default();
        display.set_alpha(50.0);
        opts.set_suppress(0, true).unwrap();
        opts.set_suppress_mode(SuppressMode::Black);
        let colours = glyph_colours(&opts, &display);
        assert_eq!(colours[0], [0.0, 0.0, 0.0, 0.5]);
        assert_eq!(colours[1][1], 1.0);
        assert_eq!(colours[2][3], 0.5);

        opts.set_suppress_mode(SuppressMode::Transparent);
        assert_eq!(glyph_colours(&opts, &display)[0][3], 0.0);
    }

    #[test]
    fn neurological_images_are_flipped() {
        let image = sh_image((2, 2, 2), Mat4::IDENTITY);
        let mut opts = ShOpts::new(2);
        let display = Display::default();
        assert!(GlyphSettings::new(&image, &opts, &display, Mat4::IDENTITY).x_flip);
        opts.set_neuro_flip(false);
        assert!(!GlyphSettings::new(&image, &opts, &display, Mat4::IDENTITY).x_flip);

        let radiological = sh_image((2, 2, 2), Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0)));
        opts.set_neuro_flip(true);
        assert!(!GlyphSettings::new(&radiological, &opts, &display, Mat4::IDENTITY).x_flip);
    }

    #[test]
    fn light_is_normalised() {
        assert!((light_position().length() - 1.0).abs() < 1e-6);
        assert!(light_position().z > 0.0);
    }

    #[test]
    fn axial_slice_voxels() {
        let image = sh_image((4, 3, 5), Mat4::IDENTITY);
        let xforms = ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world());

        let voxels = generate_voxel_coordinates(&xforms, Orientation::Axial, 2.3, None).unwrap();
        assert_eq!(voxels.len(), 12);
        assert!(voxels.iter().all(|v| v[2] == 2));
        assert_eq!(voxels[0], [0, 0, 2]);
        assert_eq!(voxels[1], [1, 0, 2]);
        assert_eq!(voxels[11], [3, 2, 2]);
    }

    #[test]
    fn bbox_limits_in_plane_extent() {
        let image = sh_image((4, 4, 4), Mat4::IDENTITY);
        let xforms = ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world());
        let bbox = Bounds::new(Vec3::new(0.6, 0.0, -0.5), Vec3::new(2.4, 0.0, 3.5));

        let voxels = generate_voxel_coordinates(&xforms, Orientation::Coronal, 1.0, Some(bbox)).unwrap();
        assert!(voxels.iter().all(|v| (1..=2).contains(&v[0]) && v[1] == 1));
        assert_eq!(voxels.len(), 2 * 4);
    }

    #[test]
    fn slices_outside_the_image_are_left_for_filtering() {
        let image = sh_image((2, 2, 2), Mat4::IDENTITY);
        let xforms = ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world());
        let voxels = generate_voxel_coordinates(&xforms, Orientation::Sagittal, 7.0, None).unwrap();
        assert_eq!(voxels.len(), 4);
        assert!(voxels.iter().all(|v| v[0] == 7));
    }

    #[test]
    fn orientation_can_change() {
        let (mut renderer, _, _) = renderer();
        assert_eq!(renderer.orientation(), Orientation::Axial);
        renderer.set_orientation(Orientation::Coronal);
        assert_eq!(renderer.orientation(), Orientation::Coronal);
    }

    #[tokio::test(flavor = "current_thread")]
    #[ignore]
    async fn bad_shader_makes_renderer_unusable() {
        let gpu = Gpu::new().await.expect("GPU adapter");
        let (mut renderer, _, _) = renderer();

        let err = renderer.init_with_source(&gpu, "fn broken(").await;
        assert!(matches!(err, Err(RenderError::ShaderCompilation(_))));
        assert_eq!(renderer.state(), GlyphState::Unusable);
        assert!(!renderer.ready());

        // Later frames are skipped without errors
        let target = RenderTarget::new("frame", 8, 8).unwrap();
        assert!(renderer.pre_draw(&gpu, Mat4::IDENTITY, Mat4::IDENTITY).is_ok());
        assert!(renderer.draw(&gpu, &target, 1.0, None, None).is_ok());
        assert!(renderer.post_draw().is_ok());
        assert_eq!(renderer.state(), GlyphState::Unusable);
        assert!(renderer.radius_texture().shape().is_none());
        assert!(renderer.init(&gpu).await.is_err());
    }
}
