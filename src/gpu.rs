use crate::{
    capabilities::Capabilities,
    enums::DataFormat,
    error::{RenderError, Result},
    texture::Texture,
};

pub const COLOUR_FORMAT: DataFormat = DataFormat::Rgba8;
pub const DEPTH_FORMAT: DataFormat = DataFormat::Depth32Float;

/// Device, queue and the capabilities sampled when they were created.
pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub capabilities: Capabilities,
}

impl Gpu {
    /// Requests a device on the default adapter. Clamp-to-border sampling
    /// is enabled where the adapter has it.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let capabilities = Capabilities::detect(&adapter);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Render Device"),
                required_features: adapter.features() & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await?;

        Ok(Self {
            device,
            queue,
            capabilities,
        })
    }

    /// Runs `build`, failing if it raised a validation error. Shader
    /// modules and pipelines are created inside this so that a bad shader
    /// is reported to the caller instead of aborting.
    pub async fn validated<T>(&self, label: &str, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match self.device.pop_error_scope().await {
            Some(err) => {
                log::error!("{label}: {err}");
                Err(RenderError::ShaderCompilation(format!("{label}: {err}")))
            }
            None => Ok(value),
        }
    }
}

/// Off-screen colour and depth attachments.
pub struct RenderTarget {
    colour: Texture,
    depth: Texture,
    width: u32,
    height: u32,
}

impl RenderTarget {
    pub fn new(name: &str, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            colour: Texture::render_target(format!("{name}_colour"), COLOUR_FORMAT, width, height)?,
            depth: Texture::render_target(format!("{name}_depth"), DEPTH_FORMAT, width, height)?,
            width,
            height,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Allocates the attachments on first use.
    pub fn refresh(&mut self, gpu: &Gpu) -> Result<()> {
        self.colour.refresh(&gpu.device, &gpu.queue)?;
        self.depth.refresh(&gpu.device, &gpu.queue)?;
        Ok(())
    }

    pub fn colour(&self) -> &Texture {
        &self.colour
    }

    pub fn colour_view(&self) -> Result<&wgpu::TextureView> {
        self.colour
            .view()
            .ok_or_else(|| RenderError::NotReady(self.colour.name().to_string()))
    }

    pub fn depth_view(&self) -> Result<&wgpu::TextureView> {
        self.depth
            .view()
            .ok_or_else(|| RenderError::NotReady(self.depth.name().to_string()))
    }

    /// Clears colour to transparent black and depth to the far plane.
    pub fn clear(&self, gpu: &Gpu) -> Result<()> {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.colour_view()?,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.depth_view()?,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// A pass which draws over whatever the target already holds.
    pub fn begin_pass<'e>(&self, encoder: &'e mut wgpu::CommandEncoder, label: &str) -> Result<wgpu::RenderPass<'e>> {
        Ok(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.colour_view()?,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.depth_view()?,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        }))
    }

    /// Reads the colour attachment back as tightly packed RGBA rows.
    pub async fn read_back(&self, gpu: &Gpu) -> Result<Vec<u8>> {
        self.colour.read_back(&gpu.device, &gpu.queue).await
    }
}

/// Colour target shared by every pipeline drawing into a [`RenderTarget`].
pub fn colour_target(blend: Option<wgpu::BlendState>) -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format: COLOUR_FORMAT.wgpu_format(),
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    }
}

pub fn depth_state(write: bool) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT.wgpu_format(),
        depth_write_enabled: write,
        depth_compare: wgpu::CompareFunction::LessEqual,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    }
}

/// Layout entry for a uniform buffer.
pub fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
