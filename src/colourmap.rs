use glam::{Mat4, Vec3};

use crate::{
    enums::{DataFormat, Interpolation, TextureKind},
    error::{RenderError, Result},
    texture::Texture,
    transform::scale_offset,
};

pub const COLOURMAP_RESOLUTION: u32 = 256;

/// A colour map, as evenly spaced RGB control points.
#[derive(Clone, Debug, PartialEq)]
pub struct ColourMap {
    pub name: &'static str,
    colours: Vec<[f32; 3]>,
}

const BUILTIN: &[(&str, &[[f32; 3]])] = &[
    ("greyscale", &[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]),
    (
        "hot",
        &[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
        ],
    ),
    ("cool", &[[0.0, 1.0, 1.0], [1.0, 0.0, 1.0]]),
    ("red-yellow", &[[1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]),
    ("blue-lightblue", &[[0.0, 0.0, 1.0], [0.0, 1.0, 1.0]]),
];

impl ColourMap {
    pub fn by_name(name: &str) -> Result<Self> {
        BUILTIN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(name, colours)| Self {
                name,
                colours: colours.to_vec(),
            })
            .ok_or_else(|| RenderError::InvalidParameter {
                name: "colour map",
                value: name.to_string(),
            })
    }

    pub fn hot() -> Self {
        Self {
            name: BUILTIN[1].0,
            colours: BUILTIN[1].1.to_vec(),
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        BUILTIN.iter().map(|(name, _)| *name)
    }

    /// Linearly interpolated colour at `t`, clamped to `[0, 1]`.
    pub fn sample(&self, t: f32) -> [f32; 3] {
        let n = self.colours.len();
        if n == 1 {
            return self.colours[0];
        }
        let t = t.clamp(0.0, 1.0) * (n - 1) as f32;
        let idx = (t.floor() as usize).min(n - 2);
        let frac = t - idx as f32;
        let a = Vec3::from_array(self.colours[idx]);
        let b = Vec3::from_array(self.colours[idx + 1]);
        a.lerp(b, frac).to_array()
    }
}

/// A `COLOURMAP_RESOLUTION` x 1 RGBA texture holding a colour map, plus the
/// display range it is stretched over.
pub struct ColourMapTexture {
    texture: Texture,
    cmap: Option<ColourMap>,
    alpha: f32,
    display_range: (f32, f32),
}

impl ColourMapTexture {
    pub fn new(name: impl Into<String>) -> Self {
        let mut texture = Texture::new(name, TextureKind::D2, DataFormat::Rgba8);
        texture.set_interpolation(Interpolation::Linear);
        Self {
            texture,
            cmap: None,
            alpha: 1.0,
            display_range: (0.0, 1.0),
        }
    }

    pub fn set(&mut self, cmap: ColourMap, alpha: f32, display_range: (f32, f32)) -> Result<()> {
        let alpha = alpha.clamp(0.0, 1.0);
        let data: Vec<u8> = (0..COLOURMAP_RESOLUTION)
            .flat_map(|i| {
                let t = i as f32 / (COLOURMAP_RESOLUTION - 1) as f32;
                let [r, g, b] = cmap.sample(t);
                [r, g, b, alpha].map(|c| (c * 255.0).round() as u8)
            })
            .collect();
        self.texture.set_data(&[COLOURMAP_RESOLUTION, 1], &data)?;
        self.cmap = Some(cmap);
        self.alpha = alpha;
        self.display_range = display_range;
        Ok(())
    }

    pub fn colour_map(&self) -> Option<&ColourMap> {
        self.cmap.as_ref()
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn display_range(&self) -> (f32, f32) {
        self.display_range
    }

    /// Maps a data value (on the X axis) to a colour map texture coordinate.
    pub fn coordinate_transform(&self) -> Mat4 {
        let (lo, hi) = self.display_range;
        let len = if (hi - lo).abs() < f32::EPSILON { 1.0 } else { hi - lo };
        scale_offset(Vec3::new(1.0 / len, 1.0, 1.0), Vec3::new(-lo / len, 0.0, 0.0))
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.texture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_colour_map_is_rejected() {
        assert!(ColourMap::by_name("viridis-but-wrong").is_err());
        for name in ColourMap::names() {
            assert_eq!(ColourMap::by_name(name).unwrap().name, name);
        }
        assert_eq!(ColourMap::hot().name, "hot");
    }

    #[test]
    fn sample_interpolates_control_points() {
        let hot = ColourMap::by_name("hot").unwrap();
        assert_eq!(hot.sample(0.0), [0.0, 0.0, 0.0]);
        assert_eq!(hot.sample(1.0), [1.0, 1.0, 1.0]);
        assert_eq!(hot.sample(2.0), [1.0, 1.0, 1.0]);
        let mid = hot.sample(0.5);
        assert!((mid[0] - 1.0).abs() < 1e-6 && (mid[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn coordinate_transform_maps_display_range() {
        let mut tex = ColourMapTexture::new("cm");
        tex.set(ColourMap::by_name("greyscale").unwrap(), 1.0, (10.0, 20.0))
            .unwrap();
        let xform = tex.coordinate_transform();
        assert!(xform.transform_point3(Vec3::new(10.0, 0.0, 0.0)).x.abs() < 1e-6);
        assert!((xform.transform_point3(Vec3::new(20.0, 0.0, 0.0)).x - 1.0).abs() < 1e-6);
        assert_eq!(tex.texture().size(), Some(vec![COLOURMAP_RESOLUTION, 1]));
    }
}
