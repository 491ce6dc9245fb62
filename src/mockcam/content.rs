//! Frame content painters for the mock camera.
//!
//! A [`ContentProvider`] fills the raw RGB frame the feeder encodes to JPEG.
//! Providers are stateful so successive frames can differ (the rainbow
//! painter cycles its hue), which makes it easy to see in a viewer that
//! frames actually advance.

use image::{Rgb, RgbImage};

/// Paints content into the frame buffer before JPEG encoding.
pub trait ContentProvider: Send {
    /// Paint one frame. Called once per generated frame, in order.
    fn paint(&mut self, frame: &mut RgbImage);
}

/// Fills every frame with a single color.
pub struct SolidBackground {
    color: Rgb<u8>,
}

impl SolidBackground {
    /// Create a painter with the given fill color.
    pub fn new(color: Rgb<u8>) -> Self {
        Self { color }
    }
}

impl Default for SolidBackground {
    fn default() -> Self {
        // Mid gray, like an uncovered sensor.
        Self::new(Rgb([128, 128, 128]))
    }
}

impl ContentProvider for SolidBackground {
    fn paint(&mut self, frame: &mut RgbImage) {
        for pixel in frame.pixels_mut() {
            *pixel = self.color;
        }
    }
}

/// Cycles the background hue a little further on every frame.
pub struct RainbowBackground {
    hue: f32,
    step: f32,
}

impl RainbowBackground {
    /// Create a painter advancing the hue by `step` (of 1.0) per frame.
    pub fn new(step: f32) -> Self {
        Self { hue: 0.0, step }
    }
}

impl Default for RainbowBackground {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl ContentProvider for RainbowBackground {
    fn paint(&mut self, frame: &mut RgbImage) {
        let color = hsv_to_rgb(self.hue, 1.0, 1.0);
        self.hue += self.step;
        if self.hue >= 1.0 {
            self.hue = 0.0;
        }
        for pixel in frame.pixels_mut() {
            *pixel = color;
        }
    }
}

/// Convert an HSV color (all components in `0.0..=1.0`) to RGB.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let h = (h.fract() + 1.0).fract() * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match i as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}
