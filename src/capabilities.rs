/// GPU and session capabilities, sampled once and passed to whatever needs
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// The fragment stage can run a loop with a uniform iteration count.
    /// When false, ray casting is split into outer and inner loops.
    pub native_loops: bool,
    /// Running over a remote or indirect display session.
    pub remote_session: bool,
    /// Maximum size of any dimension of a 3D texture.
    pub max_texture_3d: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            native_loops: true,
            remote_session: false,
            max_texture_3d: wgpu::Limits::downlevel_defaults().max_texture_dimension_3d,
        }
    }
}

impl Capabilities {
    pub fn detect(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let limits = adapter.limits();
        let caps = Self {
            // False on GLES 3.0 / WebGL2 class drivers
            native_loops: !matches!(info.backend, wgpu::Backend::Gl)
                || adapter
                    .get_downlevel_capabilities()
                    .flags
                    .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
            remote_session: in_ssh_session(),
            max_texture_3d: limits.max_texture_dimension_3d,
        };
        log::info!(
            "{} ({:?}): native loops {}, remote session {}, max 3D texture size {}",
            info.name,
            info.backend,
            caps.native_loops,
            caps.remote_session,
            caps.max_texture_3d
        );
        caps
    }
}

fn in_ssh_session() -> bool {
    ["SSH_CLIENT", "SSH_TTY"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}
