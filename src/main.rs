use std::{cell::RefCell, rc::Rc};

use glam::{Mat4, Vec3};
use image::{RgbaImage, imageops::FilterType};
use ndarray::{Array3, Array4};
use volume_glyph_render::{
    ColourMap, CoordinateTransforms, Display, DisplaySpace, GlVolume3d, GlyphRenderer, Gpu,
    ImageTransforms, Orientation, RenderTarget, ShOpts, TransformMode, Volume3DOpts,
    error::Result,
};

const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;

/// A sphere of increasing intensity towards its centre.
fn synthetic_volume(size: usize) -> Result<volume_glyph_render::Image> {
    let c = (size as f32 - 1.0) / 2.0;
    let data = Array3::from_shape_fn((size, size, size), |(x, y, z)| {
        let d = Vec3::new(x as f32 - c, y as f32 - c, z as f32 - c).length() / c;
        (1.0 - d).max(0.0)
    });
    volume_glyph_render::Image::from_3d("sphere", data, Vec3::ONE)
}

/// Order 2 SH coefficients, rotating from isotropic to elongated along x.
fn synthetic_sh(shape: (usize, usize, usize)) -> Result<volume_glyph_render::Image> {
    let data = Array4::from_shape_fn((shape.0, shape.1, shape.2, 6), |(x, _, _, c)| match c {
        0 => 1.0,
        3 => 0.5 * x as f32 / shape.0 as f32,
        _ => 0.0,
    });
    volume_glyph_render::Image::new("fod", data, Vec3::ONE, Mat4::IDENTITY)
}

/// Orthographic camera looking at the centre of `xforms` from a tilted
/// angle.
fn camera(xforms: &dyn CoordinateTransforms) -> (Mat4, Mat4) {
    let bounds = xforms.bounds();
    let r = bounds.len().length() / 2.0;
    let view = Mat4::from_rotation_x(-0.4)
        * Mat4::from_rotation_y(0.6)
        * Mat4::from_translation(-bounds.centre());
    let proj = Mat4::orthographic_rh_gl(-r, r, -r, r, -r, r);
    (view, proj)
}

async fn save(gpu: &Gpu, target: &RenderTarget, path: &str) -> Result<()> {
    let (width, height) = target.size();
    let rgba = target.read_back(gpu).await?;
    let Some(frame) = RgbaImage::from_raw(width, height, rgba) else {
        log::error!("{path}: frame has the wrong size");
        return Ok(());
    };
    let frame = image::imageops::resize(&frame, WIDTH, HEIGHT, FilterType::Triangle);
    if let Err(err) = frame.save(path) {
        log::error!("{path}: {err}");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let gpu = Gpu::new().await?;
    let display_space = DisplaySpace::world();

    let volume_xforms = Rc::new(ImageTransforms::new(
        Rc::new(synthetic_volume(64)?),
        TransformMode::PixDim,
        display_space.clone(),
    ));
    let volume_opts = Rc::new(RefCell::new(Volume3DOpts::new(&gpu.capabilities)));
    let mut volume = GlVolume3d::new(
        "sphere",
        volume_xforms.clone(),
        volume_opts.clone(),
        Rc::new(RefCell::new(Display::default())),
        ColourMap::hot(),
    )?;
    volume.init(&gpu).await?;

    let (width, height) = volume_opts.borrow().render_size(WIDTH, HEIGHT);
    let mut target = RenderTarget::new("volume", width, height)?;
    target.refresh(&gpu)?;
    target.clear(&gpu)?;
    let (view, proj) = camera(volume_xforms.as_ref());
    volume.draw(&gpu, &target, view, proj)?;
    save(&gpu, &target, "volume.png").await?;

    let sh_image = Rc::new(synthetic_sh((16, 16, 4))?);
    let sh_opts = Rc::new(RefCell::new(ShOpts::for_image(&sh_image)?));
    let sh_xforms = Rc::new(ImageTransforms::new(
        sh_image,
        TransformMode::PixDim,
        display_space,
    ));
    let mut glyphs = GlyphRenderer::new(
        "fod",
        sh_xforms.clone(),
        sh_opts,
        Rc::new(RefCell::new(Display::default())),
        Orientation::Axial,
        gpu.capabilities.max_texture_3d,
    )?;
    glyphs.init(&gpu).await?;

    let mut target = RenderTarget::new("glyphs", WIDTH, HEIGHT)?;
    target.refresh(&gpu)?;
    target.clear(&gpu)?;
    let (view, proj) = camera(sh_xforms.as_ref());
    glyphs.pre_draw(&gpu, view, proj)?;
    glyphs.draw(&gpu, &target, 2.0, None, None)?;
    glyphs.post_draw()?;
    save(&gpu, &target, "glyphs.png").await?;

    Ok(())
}
