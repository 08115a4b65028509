//! Twinkling stars over a slow sky gradient.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::params::{ParamId, ParamSet};
use super::Animation;
use crate::color::{DynamicPalette, Rgb};

const NUM_STARS: usize = 15;

struct Star {
    position: usize,
    phase: f32,
    speed: f32,
    brightness: u8,
    /// Normalized position into the star palette.
    color_index: f32,
}

pub struct StarryNightAnimation {
    params: ParamSet,
    speed: ParamId,
    background: ParamId,
    stars_palette: ParamId,
    stars: Vec<Star>,
    rng: SmallRng,
}

impl StarryNightAnimation {
    pub fn new() -> Self {
        let mut params = ParamSet::new();
        let speed = params.register_f32("Speed", 1.0, 0.0, 5.0, 0.01, "Twinkle speed");
        let background = params.register_palette(
            "Background",
            DynamicPalette::from_colors(vec![
                Rgb::BLACK,
                Rgb::new(0, 0, 20),
                Rgb::new(0, 5, 30),
            ]),
            "Sky gradient",
        );
        let stars_palette = params.register_palette(
            "Stars",
            DynamicPalette::from_colors(vec![Rgb::WHITE, Rgb::new(200, 200, 255)]),
            "Star colors",
        );
        Self {
            params,
            speed,
            background,
            stars_palette,
            stars: Vec::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    fn seed_stars(&mut self, n: usize) {
        self.stars = (0..NUM_STARS)
            .map(|_| Star {
                position: self.rng.gen_range(0..n),
                phase: self.rng.gen_range(0.0..6.28),
                speed: 0.02 + self.rng.gen_range(0.0..0.03),
                brightness: 128 + self.rng.gen_range(0..127u8),
                color_index: self.rng.gen_range(0.0..1.0),
            })
            .collect();
    }
}

impl Default for StarryNightAnimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Animation for StarryNightAnimation {
    fn type_name(&self) -> &'static str {
        "StarryNight"
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
        if self.stars.is_empty() || self.stars.iter().any(|s| s.position >= n) {
            self.seed_stars(n);
        }

        let speed = self.params.f32(self.speed);
        let sky_wave = (epoch as f32 * 0.005).sin() * 0.1 + 0.9;

        // Background gradient, gently pulsing.
        let background = self.params.palette(self.background).clone();
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let pos = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
            *pixel = background.sample(pos).scaled((sky_wave * 255.0) as u8);
        }

        // Stars twinkle on their own phases.
        let star_palette = self.params.palette(self.stars_palette).clone();
        for (index, star) in self.stars.iter_mut().enumerate() {
            star.phase += star.speed * speed;
            if star.phase > 6.28 {
                star.phase -= 6.28;
            }

            let twinkle = (star.phase.sin() + 1.0) * 0.5;
            let twinkle = twinkle * twinkle;
            let brightness = (twinkle * star.brightness as f32) as u8;

            let color = if star_palette.colors.is_empty() {
                Rgb::WHITE
            } else {
                star_palette.sample(star.color_index)
            }
            .scaled(brightness);

            let pos = star.position;
            pixels[pos] += color;
            if pos > 0 {
                pixels[pos - 1] += color.scaled(77);
            }
            if pos + 1 < n {
                pixels[pos + 1] += color.scaled(77);
            }

            // Rare shooting-star tail.
            if epoch % 500 == (index as u32 * 37) % 500 && twinkle > 0.8 {
                for t in 1..=3 {
                    if pos + t >= n {
                        break;
                    }
                    let tail = brightness / (t as u8 * 2);
                    pixels[pos + t] += Rgb::new(tail, tail, tail);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starry_renders_background() {
        let mut starry = StarryNightAnimation::new();
        let mut pixels = vec![Rgb::BLACK; 60];
        starry.render(10, &mut pixels);
        // Upper end of the sky gradient is lit.
        assert!(pixels[59] != Rgb::BLACK || pixels[58] != Rgb::BLACK);
    }

    #[test]
    fn test_starry_reseeds_on_shorter_strip() {
        let mut starry = StarryNightAnimation::new();
        let mut long = vec![Rgb::BLACK; 90];
        starry.render(1, &mut long);
        // A shorter strip must not index out of bounds.
        let mut short = vec![Rgb::BLACK; 5];
        starry.render(2, &mut short);
    }

    #[test]
    fn test_starry_twinkles_over_time() {
        let mut starry = StarryNightAnimation::new();
        let mut a = vec![Rgb::BLACK; 40];
        let mut b = vec![Rgb::BLACK; 40];
        starry.render(1, &mut a);
        for epoch in 2..40 {
            starry.render(epoch, &mut b);
        }
        assert_ne!(a, b);
    }
}
