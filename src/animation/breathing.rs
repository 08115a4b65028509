//! Whole-strip breathing envelope.
//!
//! Attack / hold / decay / sustain / release / rest, all in
//! milliseconds, applied to a single color. Sine easing on the ramps.

use std::f32::consts::PI;

use super::params::{ParamId, ParamSet};
use super::Animation;
use crate::color::Rgb;

pub struct BreathingAnimation {
    params: ParamSet,
    colour: ParamId,
    attack: ParamId,
    hold: ParamId,
    decay: ParamId,
    sustain_level: ParamId,
    sustain_time: ParamId,
    release: ParamId,
    rest: ParamId,
}

/// Sine ease-in-out over `t` in `[0, 1]`.
fn ease_in_out(t: f32) -> f32 {
    0.5 * (1.0 - (t * PI).cos())
}

impl BreathingAnimation {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let colour = params.register_color("Colour", Rgb::new(255, 160, 60), "Breathing color");
        let attack = params.register_i32("Attack", 1000, 0.0, 10_000.0, 50.0, "Ramp up (ms)");
        let hold = params.register_i32("Hold", 500, 0.0, 10_000.0, 50.0, "Full brightness (ms)");
        let decay = params.register_i32("Decay", 700, 0.0, 10_000.0, 50.0, "Fall to sustain (ms)");
        let sustain_level = params.register_u8("Sustain Lvl", 128, "Sustain brightness");
        let sustain_time =
            params.register_i32("Sustain T", 1000, 0.0, 10_000.0, 50.0, "Sustain (ms)");
        let release = params.register_i32("Release", 1200, 0.0, 10_000.0, 50.0, "Fade out (ms)");
        let rest = params.register_i32("Rest", 600, 0.0, 10_000.0, 50.0, "Dark gap (ms)");
        Self {
            params,
            colour,
            attack,
            hold,
            decay,
            sustain_level,
            sustain_time,
            release,
            rest,
        }
    }

    fn brightness_at(&self, time_ms: u32) -> u8 {
        let attack = self.params.i32(self.attack).max(0);
        let hold = self.params.i32(self.hold).max(0);
        let decay = self.params.i32(self.decay).max(0);
        let sustain = i32::from(self.params.u8(self.sustain_level));
        let sustain_time = self.params.i32(self.sustain_time).max(0);
        let release = self.params.i32(self.release).max(0);
        let rest = self.params.i32(self.rest).max(0);

        let total = (attack + hold + decay + sustain_time + release + rest).max(1);
        let pos = (time_ms % total as u32) as i32;

        if pos < attack {
            (ease_in_out(pos as f32 / attack as f32) * 255.0) as u8
        } else if pos < attack + hold {
            255
        } else if pos < attack + hold + decay {
            let t = (pos - attack - hold) as f32 / decay as f32;
            (255.0 + (sustain as f32 - 255.0) * ease_in_out(t)) as u8
        } else if pos < attack + hold + decay + sustain_time {
            sustain as u8
        } else if pos < attack + hold + decay + sustain_time + release {
            let t = (pos - attack - hold - decay - sustain_time) as f32 / release as f32;
            (sustain as f32 * (1.0 - ease_in_out(t))) as u8
        } else {
            0
        }
    }
}

impl Default for BreathingAnimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Animation for BreathingAnimation {
    fn type_name(&self) -> &'static str {
        "Breathing"
    }

    fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    fn render(&mut self, epoch: u32, pixels: &mut [Rgb]) {
        let brightness = self.brightness_at(epoch.wrapping_mul(10));
        let color = self.params.color(self.colour).scaled(brightness);
        pixels.fill(color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let anim = BreathingAnimation::new();
        // Defaults: attack 1000, hold 500, decay 700, sustain 128 for
        // 1000, release 1200, rest 600.
        assert_eq!(anim.brightness_at(0), 0);
        assert_eq!(anim.brightness_at(1200), 255); // hold
        assert_eq!(anim.brightness_at(2500), 128); // sustain
        assert_eq!(anim.brightness_at(4500), 0); // rest
        // Mid-attack is partially lit.
        let mid = anim.brightness_at(500);
        assert!(mid > 50 && mid < 200);
        // The cycle repeats.
        assert_eq!(anim.brightness_at(5000), anim.brightness_at(0));
    }

    #[test]
    fn test_zero_durations_do_not_divide_by_zero() {
        let mut anim = BreathingAnimation::new();
        for name in ["Attack", "Hold", "Decay", "Sustain T", "Release", "Rest"] {
            anim.params_mut().set_json(name, &serde_json::json!(0)).unwrap();
        }
        // Whole cycle is empty; brightness is defined everywhere.
        let _ = anim.brightness_at(0);
        let _ = anim.brightness_at(12345);
    }

    #[test]
    fn test_render_uses_colour() {
        let mut anim = BreathingAnimation::new();
        let mut pixels = vec![Rgb::BLACK; 10];
        anim.render(120, &mut pixels); // 1200 ms: hold phase
        assert_eq!(pixels[0], Rgb::new(255, 160, 60).scaled(255));
        assert!(pixels.iter().all(|p| *p == pixels[0]));
    }
}
