use crate::enums::{DataFormat, Interpolation, TextureKind};
use crate::error::{RenderError, Result};

/// What [`Texture::refresh`] has to do to bring the GPU copy up to date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upload {
    /// Nothing has changed.
    Nothing,
    /// Same size: data is written into the existing allocation.
    Partial,
    /// New size: the GPU texture is re-created.
    Full,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// A 2D or 3D texture. The CPU side keeps the declared size and any data
/// waiting to be uploaded; [`Texture::refresh`] pushes both to the GPU.
pub struct Texture {
    name: String,
    kind: TextureKind,
    format: DataFormat,
    usage: wgpu::TextureUsages,
    size: Option<[u32; 3]>,
    allocated: Option<[u32; 3]>,
    data: Option<Vec<u8>>,
    interpolation: Interpolation,
    border: Option<[f32; 4]>,
    sampler_dirty: bool,
    gpu: Option<GpuTexture>,
}

impl Texture {
    pub fn new(name: impl Into<String>, kind: TextureKind, format: DataFormat) -> Self {
        Self {
            name: name.into(),
            kind,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            size: None,
            allocated: None,
            data: None,
            interpolation: Interpolation::default(),
            border: None,
            sampler_dirty: true,
            gpu: None,
        }
    }

    /// A 2D texture that can be drawn into and read back.
    pub fn render_target(name: impl Into<String>, format: DataFormat, width: u32, height: u32) -> Result<Self> {
        let mut texture = Self::new(name, TextureKind::D2, format);
        texture.usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        texture.set_size(&[width, height])?;
        Ok(texture)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn border(&self) -> Option<[f32; 4]> {
        self.border
    }

    /// Declared size, `[width, height]` or `[width, height, depth]`.
    pub fn size(&self) -> Option<Vec<u32>> {
        self.size.map(|s| s[..self.ndims()].to_vec())
    }

    fn ndims(&self) -> usize {
        match self.kind {
            TextureKind::D2 => 2,
            TextureKind::D3 => 3,
        }
    }

    fn validate_size(&self, size: &[u32]) -> Result<[u32; 3]> {
        if size.len() != self.ndims() || size.iter().any(|&d| d == 0) {
            return Err(RenderError::InvalidTextureSize(size.to_vec()));
        }
        let mut full = [1; 3];
        full[..size.len()].copy_from_slice(size);
        Ok(full)
    }

    /// Sets the texture size. Data that has not been uploaded yet is
    /// discarded if the size changes.
    pub fn set_size(&mut self, size: &[u32]) -> Result<()> {
        let size = self.validate_size(size)?;
        if self.size != Some(size) {
            self.size = Some(size);
            self.data = None;
        }
        Ok(())
    }

    /// Sets the texture data. `shape` is in texels; `data` holds
    /// `channels()` values per texel with the first dimension varying
    /// fastest.
    pub fn set_data<T: bytemuck::Pod>(&mut self, shape: &[u32], data: &[T]) -> Result<()> {
        let size = self.validate_size(shape)?;
        let texels: usize = size.iter().map(|&d| d as usize).product();
        let expected = texels * self.format.bytes_per_texel() as usize;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() != expected {
            return Err(RenderError::InvalidParameter {
                name: "texture data",
                value: format!("{} bytes for shape {shape:?}, expected {expected}", bytes.len()),
            });
        }
        self.size = Some(size);
        self.data = Some(bytes.to_vec());
        Ok(())
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        if self.interpolation != interpolation {
            self.interpolation = interpolation;
            self.sampler_dirty = true;
        }
    }

    pub fn set_border(&mut self, border: Option<[f32; 4]>) {
        if self.border != border {
            self.border = border;
            self.sampler_dirty = true;
        }
    }

    pub fn plan_upload(&self) -> Result<Upload> {
        let size = self
            .size
            .ok_or_else(|| RenderError::InvalidTextureSize(Vec::new()))?;
        if self.allocated != Some(size) {
            Ok(Upload::Full)
        } else if self.data.is_some() {
            Ok(Upload::Partial)
        } else {
            Ok(Upload::Nothing)
        }
    }

    /// Brings the GPU texture up to date with the declared size, data and
    /// sampling parameters.
    pub fn refresh(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Upload> {
        let upload = self.plan_upload()?;
        let Some(size) = self.size else {
            return Err(RenderError::InvalidTextureSize(Vec::new()));
        };
        let extent = wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: size[2],
        };

        if upload == Upload::Full {
            log::debug!("Allocating texture {} with size {:?}", self.name, size);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&self.name),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: match self.kind {
                    TextureKind::D2 => wgpu::TextureDimension::D2,
                    TextureKind::D3 => wgpu::TextureDimension::D3,
                },
                format: self.format.wgpu_format(),
                usage: self.usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let sampler = self.create_sampler(device);
            self.gpu = Some(GpuTexture {
                texture,
                view,
                sampler,
            });
            self.allocated = Some(size);
            self.sampler_dirty = false;
        } else if self.sampler_dirty {
            let sampler = self.create_sampler(device);
            if let Some(gpu) = self.gpu.as_mut() {
                gpu.sampler = sampler;
            }
            self.sampler_dirty = false;
        }

        if let (Some(data), Some(gpu)) = (self.data.take(), self.gpu.as_ref()) {
            if upload == Upload::Partial {
                log::debug!("Updating texture {} in place", self.name);
            }
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size[0] * self.format.bytes_per_texel()),
                    rows_per_image: Some(size[1]),
                },
                extent,
            );
        }
        Ok(upload)
    }

    fn create_sampler(&self, device: &wgpu::Device) -> wgpu::Sampler {
        let filter = if self.format.filterable() {
            self.interpolation.into()
        } else {
            wgpu::FilterMode::Nearest
        };
        let border_supported = device
            .features()
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        let (address_mode, border_color) = match self.border {
            Some(border) if border_supported => (
                wgpu::AddressMode::ClampToBorder,
                Some(border_colour(border)),
            ),
            _ => (wgpu::AddressMode::ClampToEdge, None),
        };
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&self.name),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            border_color,
            ..Default::default()
        })
    }

    /// True once the texture exists on the GPU and has no pending data.
    pub fn ready(&self) -> bool {
        self.gpu.is_some() && self.data.is_none() && self.allocated == self.size
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.gpu.as_ref().map(|g| &g.texture)
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.gpu.as_ref().map(|g| &g.view)
    }

    pub fn sampler(&self) -> Option<&wgpu::Sampler> {
        self.gpu.as_ref().map(|g| &g.sampler)
    }

    /// Bind group layout entries for a texture bound to `unit`: the
    /// texture at binding `2 * unit`, its sampler at `2 * unit + 1`.
    pub fn layout_entries(
        unit: u32,
        kind: TextureKind,
        format: DataFormat,
        visibility: wgpu::ShaderStages,
    ) -> [wgpu::BindGroupLayoutEntry; 2] {
        let filterable = format.filterable();
        [
            wgpu::BindGroupLayoutEntry {
                binding: 2 * unit,
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: match kind {
                        TextureKind::D2 => wgpu::TextureViewDimension::D2,
                        TextureKind::D3 => wgpu::TextureViewDimension::D3,
                    },
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2 * unit + 1,
                visibility,
                ty: wgpu::BindingType::Sampler(if filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            },
        ]
    }

    /// Bind group entries matching [`Texture::layout_entries`].
    pub fn bind_entries(&self, unit: u32) -> Result<[wgpu::BindGroupEntry<'_>; 2]> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;
        Ok([
            wgpu::BindGroupEntry {
                binding: 2 * unit,
                resource: wgpu::BindingResource::TextureView(&gpu.view),
            },
            wgpu::BindGroupEntry {
                binding: 2 * unit + 1,
                resource: wgpu::BindingResource::Sampler(&gpu.sampler),
            },
        ])
    }

    /// Reads an RGBA 2D texture back to the CPU, rows top to bottom.
    pub async fn read_back(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u8>> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;
        let [width, height, _] = self
            .allocated
            .ok_or_else(|| RenderError::NotReady(self.name.clone()))?;
        if self.kind != TextureKind::D2 || self.format != DataFormat::Rgba8 {
            return Err(RenderError::InvalidParameter {
                name: "read_back",
                value: format!("{} is not an RGBA 2D texture", self.name),
            });
        }

        let unpadded = width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Read Back Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        receiver
            .await
            .map_err(|_| RenderError::NotReady(self.name.clone()))??;

        let mapped = buffer_slice.get_mapped_range();
        let pixels = mapped
            .chunks(padded as usize)
            .flat_map(|row| &row[..unpadded as usize])
            .copied()
            .collect();
        drop(mapped);
        staging_buffer.unmap();
        Ok(pixels)
    }
}

fn border_colour(rgba: [f32; 4]) -> wgpu::SamplerBorderColor {
    if rgba[3] < 0.5 {
        wgpu::SamplerBorderColor::TransparentBlack
    } else if rgba[..3].iter().sum::<f32>() > 1.5 {
        wgpu::SamplerBorderColor::OpaqueWhite
    } else {
        wgpu::SamplerBorderColor::OpaqueBlack
    }
}
