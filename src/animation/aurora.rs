//! Layered-wave aurora.

use std::f32::consts::PI;

use rand::Rng;

use super::params::{ParamId, ParamSet};
use super::Animation;
use crate::color::{DynamicPalette, Rgb};

fn aurora_colors() -> DynamicPalette {
    DynamicPalette::from_colors(vec![
        Rgb::new(0, 0, 139),
        Rgb::new(0, 128, 128),
        Rgb::new(0, 200, 60),
        Rgb::new(128, 0, 128),
    ])
}

pub struct AuroraAnimation {
    params: ParamSet,
    palette: ParamId,
    speed: ParamId,
    reverse: ParamId,
    /// Per-instance offset so neighbouring nodes shimmer differently
    /// even on identical epochs. Intentionally not a parameter.
    seed: f32,
}

impl AuroraAnimation {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let palette = params.register_palette("Palette", aurora_colors(), "Aurora colors");
        let speed = params.register_f32("Speed", 1.0, 0.1, 5.0, 0.1, "Animation speed");
        let reverse = params.register_bool("Direction", false, "Reverse direction");
        Self {
            params,
            palette,
            speed,
            reverse,
            seed: rand::thread_rng().gen_range(0.0..65535.0),
        }
    }
}

impl Default for AuroraAnimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Animation for AuroraAnimation {
    fn type_name(&self) -> &'static str {
        "Aurora"
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn render(&mut self, epoch: u32, pixels: &mut [Rgb]) {
        let n = pixels.len();
        if n == 0 {
            return;
        }

        let mut time = epoch as f32 * 0.01 * self.params.f32(self.speed);
        if self.params.flag(self.reverse) {
            time = -time;
        }
        let palette = self.params.palette(self.palette).to_palette16();

        for (i, pixel) in pixels.iter_mut().enumerate() {
            let pos = i as f32 / n as f32;

            // Three overlapping waves: primary movement, shimmer,
            // detail.
            let wave1 = ((pos * 2.0 + time * 0.3 + self.seed * 0.001) * PI).sin();
            let wave2 = ((pos * 4.0 + time * 0.5 + self.seed * 0.002) * PI).sin();
            let wave3 = ((pos * 8.0 + time * 0.8 + self.seed * 0.003) * PI).sin();
            let combined = wave1 * 0.6 + wave2 * 0.3 + wave3 * 0.1;

            let mut intensity = (combined + 1.0) * 0.5;
            intensity *= intensity;

            // Palette index drifts with time, undulates along the
            // strip, and reacts to the fast wave.
            let mut color_index = pos * 50.0 + time * 2.0;
            color_index += (time * 0.2 + pos * 2.0).sin() * 30.0;
            if wave3 > 0.7 {
                color_index += wave3 * 20.0;
            }

            let color = palette.sample(color_index as i32 as u8);
            let brightness = (intensity * 255.0 * 0.8) as u8;
            *pixel = color.scaled_video(brightness);

            // Occasional bright peaks for sparkle.
            let peak = ((pos * 3.0 + time * 0.4) * PI).sin();
            if peak > 0.85 {
                let peak_brightness = (peak - 0.85) * 6.67;
                *pixel += Rgb::WHITE.scaled_video((peak_brightness * 80.0) as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aurora_lights_the_strip() {
        let mut aurora = AuroraAnimation::new();
        let mut pixels = vec![Rgb::BLACK; 60];
        aurora.render(100, &mut pixels);
        assert!(pixels.iter().any(|p| *p != Rgb::BLACK));
    }

    #[test]
    fn test_aurora_direction_changes_output() {
        let mut forward = AuroraAnimation::new();
        forward.seed = 1000.0;
        let mut reversed = AuroraAnimation::new();
        reversed.seed = 1000.0;
        reversed
            .params_mut()
            .set_json("Direction", &serde_json::json!(true))
            .unwrap();

        let mut a = vec![Rgb::BLACK; 40];
        let mut b = vec![Rgb::BLACK; 40];
        forward.render(500, &mut a);
        reversed.render(500, &mut b);
        assert_ne!(a, b);
    }
}
