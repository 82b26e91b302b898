use crate::listeners::Notifier;

/// Overlay-wide display settings, as percentages.
pub struct Display {
    alpha: f32,
    brightness: f32,
    contrast: f32,
    pub notifier: Notifier,
}

impl Default for Display {
    fn default() -> Self {
        Self {
            alpha: 100.0,
            brightness: 50.0,
            contrast: 50.0,
            notifier: Notifier::new(),
        }
    }
}

impl Display {
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn contrast(&self) -> f32 {
        self.contrast
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 100.0);
        self.notifier.notify("alpha");
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness.clamp(0.0, 100.0);
        self.notifier.notify("brightness");
    }

    pub fn set_contrast(&mut self, contrast: f32) {
        self.contrast = contrast.clamp(0.0, 100.0);
        self.notifier.notify("contrast");
    }
}

/// Converts brightness/contrast in `[0, 1]` into a scale and offset. A
/// brightness and contrast of 0.5 is the identity.
pub fn bricon_to_scale_offset(brightness: f32, contrast: f32, range: f32) -> (f32, f32) {
    let offset = (brightness * 2.0 - 1.0) * range;
    let scale = if contrast <= 0.5 {
        contrast * 2.0
    } else {
        20.0 * contrast.powi(4) - 0.25
    };
    (scale, offset)
}

/// Display range which, when mapped onto a colour map, gives the effect of
/// the given brightness and contrast on `range`.
pub fn bricon_to_display_range(range: (f32, f32), brightness: f32, contrast: f32) -> (f32, f32) {
    let (lo, hi) = range;
    let len = hi - lo;
    let mid = lo + 0.5 * len;
    let (scale, offset) = bricon_to_scale_offset(brightness, contrast, len);
    let half = 0.5 * len / scale.max(1e-4);
    (mid - offset - half, mid - offset + half)
}

/// Applies brightness/contrast to an RGB(A) colour; alpha is untouched.
pub fn apply_bricon(rgba: [f32; 4], brightness: f32, contrast: f32) -> [f32; 4] {
    let (scale, offset) = bricon_to_scale_offset(brightness, contrast, 1.0);
    let mut out = rgba;
    for c in &mut out[..3] {
        let v = (*c + offset).clamp(0.0, 1.0);
        *c = ((v - 0.5) * scale + 0.5).clamp(0.0, 1.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_bricon_is_identity() {
        let (lo, hi) = bricon_to_display_range((0.0, 1.0), 0.5, 0.5);
        assert!((lo - 0.0).abs() < 1e-6 && (hi - 1.0).abs() < 1e-6);
        let rgba = apply_bricon([0.2, 0.4, 0.6, 0.3], 0.5, 0.5);
        for (a, b) in rgba.into_iter().zip([0.2f32, 0.4, 0.6, 0.3]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn brighter_lowers_display_range() {
        let (lo, hi) = bricon_to_display_range((0.0, 1.0), 0.75, 0.5);
        assert!(lo < 0.0 && hi < 1.0);
    }

    #[test]
    fn more_contrast_narrows_display_range() {
        let (lo, hi) = bricon_to_display_range((0.0, 1.0), 0.5, 0.75);
        assert!(hi - lo < 1.0);
        assert!(((lo + hi) / 2.0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn setters_clamp_and_notify() {
        use std::{cell::Cell, rc::Rc};
        let hits = Rc::new(Cell::new(0));
        let mut display = Display::default();
        let counter = hits.clone();
        display
            .notifier
            .add_listener("alpha", "test", move |_| counter.set(counter.get() + 1));
        display.set_alpha(150.0);
        assert_eq!(display.alpha(), 100.0);
        assert_eq!(hits.get(), 1);
    }
}
