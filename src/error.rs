use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unknown coordinate space: {0}")]
    UnknownSpace(String),

    #[error("Invalid texture size: {0:?}")]
    InvalidTextureSize(Vec<u32>),

    #[error("Clip plane index {0} out of range (0..{1})")]
    ClipPlaneIndex(usize, usize),

    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("{count} values cannot be packed into a texture with maximum dimension {max}")]
    OversizedTexture { count: usize, max: u32 },

    #[error("Invalid renderer state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Texture {0} is not ready")]
    NotReady(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("No suitable GPU adapter found")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("Could not create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Could not map GPU buffer: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
