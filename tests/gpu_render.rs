// Off-screen rendering on a real adapter. Run with `--ignored` on a machine
// with a GPU.

use std::{cell::RefCell, rc::Rc};

use glam::{Mat4, Vec3};
use ndarray::{Array3, Array4};
use volume_glyph_render::{
    ColourMap, CoordinateTransforms, Display, DisplaySpace, GlVolume3d, GlyphRenderer,
    GlyphState, Gpu, Image, ImageTransforms, Orientation, RenderTarget, ShOpts, TransformMode,
    Volume3DOpts,
};

const SIZE: u32 = 64;

fn camera(xforms: &dyn CoordinateTransforms) -> (Mat4, Mat4) {
    let bounds = xforms.bounds();
    let r = bounds.len().length() / 2.0;
    (
        Mat4::from_translation(-bounds.centre()),
        Mat4::orthographic_rh_gl(-r, r, -r, r, -r, r),
    )
}

fn centre_alpha(rgba: &[u8]) -> u8 {
    let centre = (SIZE / 2 * SIZE + SIZE / 2) as usize * 4;
    rgba[centre + 3]
}

#[tokio::test(flavor = "current_thread")]
#[ignore]
async fn volume_covers_the_centre() {
    let gpu = Gpu::new().await.expect("GPU adapter");
    let image = Image::from_3d("ones", Array3::from_elem((16, 16, 16), 1.0), Vec3::ONE).unwrap();
    let xforms = Rc::new(ImageTransforms::new(Rc::new(image), TransformMode::Id, DisplaySpace::world()));
    let opts = Rc::new(RefCell::new(Volume3DOpts::new(&gpu.capabilities)));
    let display = Rc::new(RefCell::new(Display::default()));

    let mut volume = GlVolume3d::new("ones", xforms.clone(), opts, display, ColourMap::hot()).unwrap();
    volume.init(&gpu).await.unwrap();

    let mut target = RenderTarget::new("frame", SIZE, SIZE).unwrap();
    target.refresh(&gpu).unwrap();
    target.clear(&gpu).unwrap();
    let (view, proj) = camera(xforms.as_ref());
    volume.draw(&gpu, &target, view, proj).unwrap();
    assert!(volume.ready());

    let rgba = target.read_back(&gpu).await.unwrap();
    assert_eq!(rgba.len(), (SIZE * SIZE * 4) as usize);
    assert!(centre_alpha(&rgba) > 0);
    assert_eq!(rgba[3], 0);
}

#[tokio::test(flavor = "current_thread")]
#[ignore]
async fn glyphs_are_drawn_in_one_pass() {
    let gpu = Gpu::new().await.expect("GPU adapter");
    let data = Array4::from_shape_fn((5, 5, 3, 6), |(.., c)| if c == 0 { 3.0 } else { 0.0 });
    let image = Rc::new(Image::new("sh", data, Vec3::ONE, Mat4::IDENTITY).unwrap());
    let opts = Rc::new(RefCell::new(ShOpts::for_image(&image).unwrap()));
    let xforms = Rc::new(ImageTransforms::new(image, TransformMode::Id, DisplaySpace::world()));
    let display = Rc::new(RefCell::new(Display::default()));

    let mut glyphs = GlyphRenderer::new(
        "sh",
        xforms.clone(),
        opts,
        display,
        Orientation::Axial,
        gpu.capabilities.max_texture_3d,
    )
    .unwrap();
    glyphs.init(&gpu).await.unwrap();

    let mut target = RenderTarget::new("frame", SIZE, SIZE).unwrap();
    target.refresh(&gpu).unwrap();
    target.clear(&gpu).unwrap();
    let (view, proj) = camera(xforms.as_ref());
    glyphs.pre_draw(&gpu, view, proj).unwrap();
    glyphs.draw(&gpu, &target, 1.0, None, None).unwrap();
    glyphs.post_draw().unwrap();
    assert_eq!(glyphs.state(), GlyphState::Ready);

    let rgba = target.read_back(&gpu).await.unwrap();
    assert!(centre_alpha(&rgba) > 0);
}
