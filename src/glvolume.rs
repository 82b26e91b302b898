//! Ray-cast rendering of a scalar volume.
//!
//! [`GlVolume3d`] draws the texture space unit cube of an image. Each
//! fragment on a front face of the cube marches a ray through the volume
//! texture, accumulating colour from a colour map, using the per-frame
//! settings calculated by [`Volume3DOpts`]. Active clip planes are passed
//! to the shader as texture space plane equations.

use std::{cell::Cell, cell::RefCell, rc::Rc};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use half::f16;

use crate::{
    colourmap::{ColourMap, ColourMapTexture},
    coords::{CoordinateTransforms, ImageTransforms},
    display::{Display, bricon_to_display_range},
    enums::{DataFormat, Interpolation, Space, TextureKind},
    error::{RenderError, Result},
    gpu::{self, Gpu, RenderTarget},
    image::Image,
    texture::Texture,
    transform,
    volume3d_opts::{MAX_CLIP_PLANES, RayCastSettings, Volume3DOpts},
};

const VOLUME_UNIT: u32 = 0;
const COLOUR_MAP_UNIT: u32 = 1;
const UNIFORM_BINDING: u32 = 4;

/// Vertices in the 12 triangles of the unit cube.
const CUBE_VERTICES: u32 = 36;

const OPTS_PROPERTIES: &[&str] = &[
    "dithering",
    "blendFactor",
    "numSteps",
    "numInnerSteps",
    "resolution",
    "numClipPlanes",
    "showClipPlanes",
    "clipPosition",
    "clipAzimuth",
    "clipInclination",
];

const DISPLAY_PROPERTIES: &[&str] = &["alpha", "brightness", "contrast"];

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct RayCastUniforms {
    pub tex_to_clip: [[f32; 4]; 4],
    pub cmap_xform: [[f32; 4]; 4],
    pub clip_planes: [[f32; 4]; MAX_CLIP_PLANES],
    /// xyz: step, w: blend factor
    pub ray_step: [f32; 4],
    pub dither_dir: [f32; 4],
    /// Active clip planes, outer iterations, inner iterations
    pub counts: [u32; 4],
}

/// Shader uniforms for one frame.
pub fn ray_cast_uniforms(
    opts: &Volume3DOpts,
    xforms: &dyn CoordinateTransforms,
    view: Option<Mat4>,
    proj: Option<Mat4>,
    cmap_xform: Mat4,
) -> Result<RayCastUniforms> {
    let RayCastSettings {
        ray_step,
        dither_direction,
        texture_to_clip,
    } = opts.calculate_ray_cast_settings(xforms, view, proj)?;

    let d2t = xforms.get_transform(Space::Display, Space::Texture)?;
    let planes = opts.get_3d_clip_planes(&xforms.bounds());
    let mut clip_planes = [[0.0; 4]; MAX_CLIP_PLANES];
    for (dst, plane) in clip_planes.iter_mut().zip(&planes) {
        *dst = plane.transformed(&d2t).equation();
    }

    let (outer, inner) = if opts.uses_native_loops() {
        (opts.get_num_steps(), 1)
    } else {
        (opts.get_num_outer_steps(), opts.num_inner_steps())
    };

    Ok(RayCastUniforms {
        tex_to_clip: texture_to_clip.to_cols_array_2d(),
        cmap_xform: cmap_xform.to_cols_array_2d(),
        clip_planes,
        ray_step: ray_step.extend(opts.blend_factor()).to_array(),
        dither_dir: dither_direction.extend(0.0).to_array(),
        counts: [planes.len() as u32, outer, inner, 0],
    })
}

/// Volume `vol` of an image as half floats normalised to the data range,
/// x varying fastest.
pub fn volume_texture_data(image: &Image, vol: usize) -> Result<Vec<f16>> {
    let data = image
        .volume(vol)
        .ok_or_else(|| RenderError::InvalidImage(format!("{} has no volume {vol}", image.name)))?;
    let (lo, hi) = image.data_range();
    let len = if hi > lo { hi - lo } else { 1.0 };
    // Reversing the axes makes x the fastest varying index
    Ok(data
        .t()
        .iter()
        .map(|&v| f16::from_f32((v - lo) / len))
        .collect())
}

struct Pending {
    cmap: Cell<bool>,
    changed: Cell<bool>,
}

struct VolumeGpu {
    /// Front faces wound counter-clockwise and clockwise.
    pipelines: [wgpu::RenderPipeline; 2],
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

pub struct GlVolume3d {
    name: String,
    xforms: Rc<ImageTransforms>,
    opts: Rc<RefCell<Volume3DOpts>>,
    display: Rc<RefCell<Display>>,
    colour_map: ColourMap,
    pending: Rc<Pending>,
    volume: Texture,
    cmap: ColourMapTexture,
    gpu: Option<VolumeGpu>,
    unusable: bool,
}

impl GlVolume3d {
    pub fn new(
        name: impl Into<String>,
        xforms: Rc<ImageTransforms>,
        opts: Rc<RefCell<Volume3DOpts>>,
        display: Rc<RefCell<Display>>,
        colour_map: ColourMap,
    ) -> Result<Self> {
        let name = name.into();
        let image = xforms.image();
        let [x, y, z] = image.shape().map(|d| d as u32);

        let mut volume = Texture::new(format!("{name}_volume"), TextureKind::D3, DataFormat::R16Float);
        volume.set_interpolation(Interpolation::Linear);
        volume.set_border(Some([0.0; 4]));
        volume.set_data(&[x, y, z], &volume_texture_data(image, 0)?)?;

        let pending = Rc::new(Pending {
            cmap: Cell::new(true),
            changed: Cell::new(true),
        });
        for &property in OPTS_PROPERTIES {
            let pending = pending.clone();
            opts.borrow_mut()
                .notifier
                .add_listener(property, &name, move |_| pending.changed.set(true));
        }
        for &property in DISPLAY_PROPERTIES {
            let pending = pending.clone();
            display
                .borrow_mut()
                .notifier
                .add_listener(property, &name, move |_| pending.cmap.set(true));
        }

        let mut renderer = Self {
            cmap: ColourMapTexture::new(format!("{name}_cm")),
            name,
            xforms,
            opts,
            display,
            colour_map,
            pending,
            volume,
            gpu: None,
            unusable: false,
        };
        renderer.cmap_update()?;
        Ok(renderer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn colour_map_texture(&self) -> &ColourMapTexture {
        &self.cmap
    }

    pub fn set_colour_map(&mut self, colour_map: ColourMap) {
        self.colour_map = colour_map;
        self.pending.cmap.set(true);
    }

    /// True if any option affecting the rendering has changed since the
    /// last call.
    pub fn take_changed(&self) -> bool {
        self.pending.changed.take() | self.pending.cmap.get()
    }

    fn cmap_update(&mut self) -> Result<()> {
        if !self.pending.cmap.take() {
            return Ok(());
        }
        let display = self.display.borrow();
        // Texture values are normalised to the data range
        let range = bricon_to_display_range(
            (0.0, 1.0),
            display.brightness() / 100.0,
            display.contrast() / 100.0,
        );
        self.cmap
            .set(self.colour_map.clone(), display.alpha() / 100.0, range)
    }

    /// Compiles the shaders. On failure the renderer becomes unusable and
    /// the error is returned.
    pub async fn init(&mut self, gpu: &Gpu) -> Result<()> {
        self.init_with_source(gpu, include_str!("shaders/raycast.wgsl"))
            .await
    }

    async fn init_with_source(&mut self, gpu: &Gpu, source: &str) -> Result<()> {
        let compiled = gpu
            .validated(&self.name, |device| create_volume_gpu(device, source))
            .await;
        match compiled {
            Ok(volume_gpu) => {
                self.gpu = Some(volume_gpu);
                Ok(())
            }
            Err(err) => {
                self.unusable = true;
                Err(err)
            }
        }
    }

    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    pub fn ready(&self) -> bool {
        !self.unusable && self.gpu.is_some() && self.volume.ready() && self.cmap.texture().ready()
    }

    /// Uploads any changed textures.
    pub fn refresh(&mut self, gpu: &Gpu) -> Result<()> {
        self.cmap_update()?;
        self.volume.refresh(&gpu.device, &gpu.queue)?;
        self.cmap.texture_mut().refresh(&gpu.device, &gpu.queue)?;
        Ok(())
    }

    /// Ray-casts the volume into `target`, which should be sized with
    /// [`Volume3DOpts::render_size`]. `proj` follows the GL convention of
    /// depth in `[-1, 1]`.
    pub fn draw(&mut self, gpu: &Gpu, target: &RenderTarget, view: Mat4, proj: Mat4) -> Result<()> {
        if self.unusable {
            log::warn!("{}: renderer is unusable, not drawing", self.name);
            return Ok(());
        }
        self.refresh(gpu)?;
        let volume_gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;

        let uniforms = ray_cast_uniforms(
            &self.opts.borrow(),
            self.xforms.as_ref(),
            Some(view),
            Some(proj),
            self.cmap.coordinate_transform(),
        )?;
        gpu.queue
            .write_buffer(&volume_gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut entries = Vec::with_capacity(5);
        entries.extend(self.volume.bind_entries(VOLUME_UNIT)?);
        entries.extend(self.cmap.texture().bind_entries(COLOUR_MAP_UNIT)?);
        entries.push(wgpu::BindGroupEntry {
            binding: UNIFORM_BINDING,
            resource: volume_gpu.uniform_buffer.as_entire_binding(),
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray Cast Bind Group"),
            layout: &volume_gpu.bind_group_layout,
            entries: &entries,
        });

        let t2d = self.xforms.get_transform(Space::Texture, Space::Display)?;
        let mirrored = transform::is_mirrored(view * t2d);
        let pipeline = &volume_gpu.pipelines[mirrored as usize];

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Ray Cast Encoder"),
            });
        {
            let mut pass = target.begin_pass(&mut encoder, "Ray Cast Pass")?;
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..CUBE_VERTICES, 0..1);
        }
        gpu.queue.submit(Some(encoder.finish()));

        log::debug!(
            "{}: ray cast {}x{} with {} steps",
            self.name,
            target.size().0,
            target.size().1,
            self.opts.borrow().get_num_steps()
        );
        Ok(())
    }
}

impl Drop for GlVolume3d {
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

fn create_volume_gpu(device: &wgpu::Device, source: &str) -> VolumeGpu {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Ray Cast Shader"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let mut entries = Vec::with_capacity(5);
    entries.extend(Texture::layout_entries(
        VOLUME_UNIT,
        TextureKind::D3,
        DataFormat::R16Float,
        wgpu::ShaderStages::FRAGMENT,
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
        label: Some("Ray Cast Bind Group Layout"),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Ray Cast Pipeline Layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = |front_face: wgpu::FrontFace| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Ray Cast Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(gpu::colour_target(Some(
                    wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
                )))],
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
        label: Some("Ray Cast Uniform Buffer"),
        size: std::mem::size_of::<RayCastUniforms>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    VolumeGpu {
        pipelines: [pipeline(wgpu::FrontFace::Ccw), pipeline(wgpu::FrontFace::Cw)],
        bind_group_layout,
        uniform_buffer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capabilities::Capabilities, coords::DisplaySpace, enums::TransformMode};
    use glam::Vec3;
    use ndarray::Array3;

    fn xforms(shape: (usize, usize, usize)) -> Rc<ImageTransforms> {
        let data = Array3::from_shape_fn(shape, |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        let image = Rc::new(Image::from_3d("vol", data, Vec3::ONE).unwrap());
        Rc::new(ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world()))
    }

    #[test]
    fn texture_data_is_x_fastest() {
        let xforms = xforms((2, 3, 4));
        let data = volume_texture_data(xforms.image(), 0).unwrap();
        assert_eq!(data.len(), 24);
        let (_, hi) = xforms.image().data_range();
        // (1, 0, 0), then (0, 1, 0)
        assert_eq!(data[1], f16::from_f32(1.0 / hi));
        assert_eq!(data[2], f16::from_f32(10.0 / hi));
        assert_eq!(data[6], f16::from_f32(100.0 / hi));
        assert!(volume_texture_data(xforms.image(), 1).is_err());
    }

    #[test]
    fn loop_counts_follow_capabilities() {
        let xforms = xforms((4, 4, 4));
        let legacy = Capabilities {
            native_loops: false,
            ..Capabilities::default()
        };
        let mut opts = Volume3DOpts::new(&legacy);
        opts.set_num_steps(95).unwrap();
        let uniforms = ray_cast_uniforms(&opts, xforms.as_ref(), None, None, Mat4::IDENTITY).unwrap();
        assert_eq!(&uniforms.counts[1..3], &[10, 10]);

        let mut opts = Volume3DOpts::default();
        opts.set_num_steps(95).unwrap();
        let uniforms = ray_cast_uniforms(&opts, xforms.as_ref(), None, None, Mat4::IDENTITY).unwrap();
        assert_eq!(&uniforms.counts[1..3], &[95, 1]);
    }

    #[test]
    fn clip_planes_are_in_texture_space() {
        let xforms = xforms((4, 8, 16));
        let mut opts = Volume3DOpts::default();
        opts.set_num_clip_planes(1);
        let uniforms = ray_cast_uniforms(&opts, xforms.as_ref(), None, None, Mat4::IDENTITY).unwrap();

        assert_eq!(uniforms.counts[0], 1);
        let [a, b, c, d] = uniforms.clip_planes[0];
        // Plane 0 at 50% passes through the texture centre
        assert!((0.5 * (a + b + c) + d).abs() < 1e-5);
        assert!(c < 0.0);
        assert_eq!(uniforms.clip_planes[1], [0.0; 4]);
    }

    #[test]
    fn blend_factor_rides_on_step() {
        let xforms = xforms((4, 4, 4));
        let mut opts = Volume3DOpts::default();
        opts.set_blend_factor(0.5);
        let uniforms = ray_cast_uniforms(&opts, xforms.as_ref(), None, None, Mat4::IDENTITY).unwrap();
        assert_eq!(uniforms.ray_step[3], 0.5);
    }

    #[test]
    fn listeners_follow_renderer_lifetime() {
        let opts = Rc::new(RefCell::new(Volume3DOpts::default()));
        let display = Rc::new(RefCell::new(Display::default()));
        let renderer = GlVolume3d::new(
            "vol",
            xforms((2, 2, 2)),
            opts.clone(),
            display.clone(),
            ColourMap::by_name("greyscale").unwrap(),
        )
        .unwrap();
        assert!(renderer.take_changed());
        assert!(!renderer.take_changed());

        opts.borrow_mut().set_dithering(0.02);
        assert!(renderer.take_changed());
        assert!(!renderer.ready());

        drop(renderer);
        assert!(opts.borrow().notifier.is_empty());
        assert!(display.borrow().notifier.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    #[ignore]
    async fn bad_shader_makes_renderer_unusable() {
        let gpu = Gpu::new().await.expect("GPU adapter");
        let mut renderer = GlVolume3d::new(
            "bad",
            xforms((4, 4, 4)),
            Rc::new(RefCell::new(Volume3DOpts::default())),
            Rc::new(RefCell::new(Display::default())),
            ColourMap::hot(),
        )
        .unwrap();

        let err = renderer.init_with_source(&gpu, "fn broken(").await;
        assert!(matches!(err, Err(RenderError::ShaderCompilation(_))));
        assert!(renderer.is_unusable());
        assert!(!renderer.ready());

        let target = RenderTarget::new("frame", 8, 8).unwrap();
        assert!(renderer.draw(&gpu, &target, Mat4::IDENTITY, Mat4::IDENTITY).is_ok());
        assert!(!renderer.ready());
    }
}
