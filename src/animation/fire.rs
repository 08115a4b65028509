//! Heat-diffusion fire.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::params::{ParamId, ParamSet};
use super::Animation;
use crate::color::{qadd8, qsub8, scale8, DynamicPalette, Rgb};

/// Default heat palette: black through reds into a muted orange core.
fn heat_colors() -> DynamicPalette {
    DynamicPalette::from_colors(vec![
        Rgb::BLACK,
        Rgb::new(128, 0, 0),
        Rgb::new(200, 60, 0),
        Rgb::new(255, 160, 20),
        Rgb::new(255, 230, 120),
    ])
}

pub struct FireAnimation {
    params: ParamSet,
    speed: ParamId,
    cooling: ParamId,
    sparking: ParamId,
    palette: ParamId,
    heat: Vec<u8>,
    last_step: u32,
    rng: SmallRng,
}

impl FireAnimation {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let speed = params.register_f32("Speed", 1.0, 0.1, 5.0, 0.1, "Simulation speed");
        let cooling = params.register_u8("Cooling", 55, "How fast cells cool down");
        let sparking = params.register_u8("Sparking", 120, "Spark probability at the base");
        let palette = params.register_palette("Palette", heat_colors(), "Heat gradient");
        Self {
            params,
            speed,
            cooling,
            sparking,
            palette,
            heat: Vec::new(),
            last_step: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    fn step_simulation(&mut self, n: usize) {
        let cooling = self.params.u8(self.cooling);
        let sparking = self.params.u8(self.sparking);

        // Cool every cell a little.
        let max_cooldown = ((cooling as u32 * 10) / n as u32 + 2).min(255) as u8;
        for i in 0..n {
            let cooldown = self.rng.gen_range(0..max_cooldown);
            self.heat[i] = qsub8(self.heat[i], cooldown);
        }

        // Heat drifts upward, averaging the cells below.
        for k in (2..n).rev() {
            self.heat[k] =
                ((self.heat[k - 1] as u16 + 2 * self.heat[k - 2] as u16) / 3) as u8;
        }

        // Random sparks near the base.
        if self.rng.gen::<u8>() < sparking {
            let pos = self.rng.gen_range(0..(n / 4).max(1));
            let spark = self.rng.gen_range(160..=255u8);
            self.heat[pos] = qadd8(self.heat[pos], spark);
        }
    }
}

impl Default for FireAnimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Animation for FireAnimation {
    fn type_name(&self) -> &'static str {
        "Fire"
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
        if self.heat.len() != n {
            self.heat = vec![0; n];
        }

        // Speed scales how many epochs pass between simulation steps.
        let speed = self.params.f32(self.speed).max(0.01);
        let step = (epoch as f32 * speed) as u32;
        if step != self.last_step {
            self.last_step = step;
            self.step_simulation(n);
        }

        let palette = self.params.palette(self.palette).to_palette16();
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let index = scale8(self.heat[i], 240);
            let color = palette.sample(index);
            let flicker = self.rng.gen_range(200..=255u8);
            *pixel = color.scaled_video(flicker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_renders_without_panicking() {
        let mut fire = FireAnimation::new();
        let mut pixels = vec![Rgb::BLACK; 90];
        for epoch in 0..50 {
            fire.render(epoch, &mut pixels);
        }
        // Sparks must have lit at least something by now.
        assert!(pixels.iter().any(|p| *p != Rgb::BLACK));
    }

    #[test]
    fn test_fire_handles_strip_resize() {
        let mut fire = FireAnimation::new();
        let mut long = vec![Rgb::BLACK; 60];
        fire.render(1, &mut long);
        let mut short = vec![Rgb::BLACK; 8];
        fire.render(2, &mut short);
        let mut empty: Vec<Rgb> = Vec::new();
        fire.render(3, &mut empty);
    }
}
