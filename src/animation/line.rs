//! Moving line segments with gradient fill.
//!
//! The one kind that uses the device phase: the pattern is shifted by
//! `phase * cycle`, so a fleet sharing one epoch renders a travelling
//! wave across physically adjacent strips.

use super::params::{ParamId, ParamSet};
use super::Animation;
use crate::color::{DynamicPalette, Rgb};

pub struct LineAnimation {
    params: ParamSet,
    line_length: ParamId,
    spacing: ParamId,
    gradient: ParamId,
    speed: ParamId,
    device_phase: f32,
}

impl LineAnimation {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let line_length =
            params.register_i32("Line Length", 60, 0.0, 300.0, 1.0, "Length of segments");
        let spacing =
            params.register_i32("Spacing", 30, 0.0, 300.0, 1.0, "Distance between segments");
        let gradient = params.register_palette(
            "Gradient",
            DynamicPalette::from_colors(vec![Rgb::new(255, 30, 0), Rgb::new(255, 30, 0)]),
            "Color gradient",
        );
        let speed = params.register_f32("Speed", 5.0, 0.0, 10.0, 1.0, "Movement speed");
        Self {
            params,
            line_length,
            spacing,
            gradient,
            speed,
            device_phase: 0.0,
        }
    }
}

impl Default for LineAnimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Animation for LineAnimation {
    fn type_name(&self) -> &'static str {
        "Line"
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn set_device_phase(&mut self, phase: f32) {
        self.device_phase = phase;
    }

    fn render(&mut self, epoch: u32, pixels: &mut [Rgb]) {
        let n = pixels.len();
        if n == 0 {
            return;
        }

        let line_length = self.params.i32(self.line_length).max(0);
        let spacing = self.params.i32(self.spacing).max(0);
        let cycle = (line_length + spacing).max(1);

        let offset = (epoch as f32 * self.params.f32(self.speed) / 10.0) as i64;
        let phase_offset = (cycle as f32 * self.device_phase) as i64;
        let gradient = self.params.palette(self.gradient);

        for (i, pixel) in pixels.iter_mut().enumerate() {
            let pos = (i as i64 - offset + phase_offset).rem_euclid(cycle as i64);
            if pos < line_length as i64 {
                let gradient_pos = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
                *pixel = if gradient.colors.is_empty() {
                    Rgb::WHITE
                } else {
                    gradient.sample(gradient_pos)
                };
            } else {
                *pixel = Rgb::BLACK;
            }
        }
    }
}
