//! Animations and the registry that runs them.
//!
//! A base animation is a named kind with registered parameters and a
//! `render` operation driven by the shared epoch (10 ms units of
//! network time). Each kind is instantiated once per node; presets are
//! saved parameter maps applied back onto the matching base instance.

mod aurora;
mod breathing;
mod fire;
mod line;
mod params;
mod starry;

pub use aurora::AuroraAnimation;
pub use breathing::BreathingAnimation;
pub use fire::FireAnimation;
pub use line::LineAnimation;
pub use params::{ParamError, ParamId, ParamKind, ParamSet, ParamSpec, ParamValue};
pub use starry::StarryNightAnimation;

use serde_json::Value;
use tracing::debug;

use crate::color::Rgb;

/// One renderable animation kind.
pub trait Animation: Send {
    /// Stable kind name; presets reference it as their `base_type`.
    fn type_name(&self) -> &'static str;

    fn params(&self) -> &ParamSet;

    fn params_mut(&mut self) -> &mut ParamSet;

    /// Per-device phase offset in `[0, 1]`. Kinds that support spatial
    /// phase shifting use it to displace their pattern; the rest ignore
    /// it.
    fn set_device_phase(&mut self, _phase: f32) {}

    /// Render one frame at the given epoch into `pixels`.
    fn render(&mut self, epoch: u32, pixels: &mut [Rgb]);
}

/// The set of base animations shipped with the firmware.
pub fn default_animations() -> Vec<Box<dyn Animation>> {
    vec![
        Box::new(FireAnimation::new()),
        Box::new(AuroraAnimation::new()),
        Box::new(StarryNightAnimation::new()),
        Box::new(LineAnimation::new()),
        Box::new(BreathingAnimation::new()),
    ]
}

/// Owns every base animation instance plus the selection, power and
/// phase state the scheduler renders from.
pub struct AnimationManager {
    animations: Vec<Box<dyn Animation>>,
    current: usize,
    /// Selected preset name, or the base type name when no preset is
    /// applied.
    selected: String,
    power: bool,
    device_phase: f32,
}

impl AnimationManager {
    pub fn new(animations: Vec<Box<dyn Animation>>) -> Self {
        let selected = animations
            .first()
            .map(|a| a.type_name().to_string())
            .unwrap_or_default();
        Self {
            animations,
            current: 0,
            selected,
            power: true,
            device_phase: 0.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_animations())
    }

    pub fn base_names(&self) -> Vec<String> {
        self.animations
            .iter()
            .map(|a| a.type_name().to_string())
            .collect()
    }

    pub fn has_base(&self, type_name: &str) -> bool {
        self.animations.iter().any(|a| a.type_name() == type_name)
    }

    fn index_of(&self, type_name: &str) -> Option<usize> {
        self.animations
            .iter()
            .position(|a| a.type_name() == type_name)
    }

    /// Name shown as the current selection (preset or base type).
    pub fn selected_name(&self) -> &str {
        &self.selected
    }

    /// Rename tracking: keep the selection pointing at a preset that
    /// was renamed while selected.
    pub fn rename_selected(&mut self, old: &str, new: &str) {
        if self.selected == old {
            self.selected = new.to_string();
        }
    }

    pub fn current_type_name(&self) -> Option<&'static str> {
        self.animations.get(self.current).map(|a| a.type_name())
    }

    /// Select a base animation by type name, resetting its parameters
    /// to their registered defaults.
    pub fn select_base(&mut self, type_name: &str) -> bool {
        let Some(index) = self.index_of(type_name) else {
            return false;
        };
        self.animations[index].params_mut().reset_all();
        self.current = index;
        self.selected = type_name.to_string();
        let phase = self.device_phase;
        self.animations[index].set_device_phase(phase);
        debug!(animation = type_name, "selected base animation");
        true
    }

    /// Select a preset: apply its parameter map onto the base instance
    /// of the matching type and make that animation current.
    pub fn select_preset(&mut self, preset_name: &str, base_type: &str, params: &Value) -> bool {
        let Some(index) = self.index_of(base_type) else {
            debug!(base_type, "preset references unknown base type");
            return false;
        };
        self.animations[index].params_mut().apply_values_json(params);
        self.current = index;
        self.selected = preset_name.to_string();
        let phase = self.device_phase;
        self.animations[index].set_device_phase(phase);
        debug!(preset = preset_name, base_type, "selected preset");
        true
    }

    /// Set one parameter of the current animation from JSON.
    pub fn set_param_json(&mut self, name: &str, value: &Value) -> Result<(), ParamError> {
        match self.animations.get_mut(self.current) {
            Some(animation) => animation.params_mut().set_json(name, value),
            None => Err(ParamError::UnknownParam(name.to_string())),
        }
    }

    /// Current values of the named base type, for preset capture.
    pub fn params_of(&self, base_type: &str) -> Option<Value> {
        self.index_of(base_type)
            .map(|i| self.animations[i].params().values_json())
    }

    /// Parameter descriptions of the current animation, for the UI.
    pub fn current_params_json(&self) -> Value {
        self.animations
            .get(self.current)
            .map(|a| a.params().describe_json())
            .unwrap_or(Value::Array(Vec::new()))
    }

    pub fn power(&self) -> bool {
        self.power
    }

    pub fn set_power(&mut self, on: bool) {
        self.power = on;
    }

    pub fn device_phase(&self) -> f32 {
        self.device_phase
    }

    pub fn set_device_phase(&mut self, phase: f32) {
        self.device_phase = phase.clamp(0.0, 1.0);
        let phase = self.device_phase;
        if let Some(animation) = self.animations.get_mut(self.current) {
            animation.set_device_phase(phase);
        }
    }

    /// Render the current animation.
    pub fn render(&mut self, epoch: u32, pixels: &mut [Rgb]) {
        if let Some(animation) = self.animations.get_mut(self.current) {
            animation.render(epoch, pixels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_registry() {
        let mgr = AnimationManager::with_defaults();
        let names = mgr.base_names();
        assert!(names.contains(&"Fire".to_string()));
        assert!(names.contains(&"Aurora".to_string()));
        assert!(names.contains(&"StarryNight".to_string()));
        assert!(names.contains(&"Line".to_string()));
        assert!(names.contains(&"Breathing".to_string()));
        assert!(mgr.has_base("Fire"));
        assert!(!mgr.has_base("Plasma"));
    }

    #[test]
    fn test_select_base_resets_params() {
        let mut mgr = AnimationManager::with_defaults();
        assert!(mgr.select_base("Fire"));
        mgr.set_param_json("Speed", &json!(4.0)).unwrap();

        assert!(mgr.select_base("Fire"));
        let params = mgr.current_params_json();
        let speed = params
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == "Speed")
            .unwrap();
        assert_eq!(speed["value"].as_f64().unwrap() as f32, 1.0);
    }

    #[test]
    fn test_select_preset_applies_values() {
        let mut mgr = AnimationManager::with_defaults();
        assert!(mgr.select_preset("Inferno", "Fire", &json!({"Speed": 3.0})));
        assert_eq!(mgr.selected_name(), "Inferno");
        assert_eq!(mgr.current_type_name(), Some("Fire"));

        let params = mgr.current_params_json();
        let speed = params
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == "Speed")
            .unwrap();
        assert_eq!(speed["value"].as_f64().unwrap() as f32, 3.0);
    }

    #[test]
    fn test_select_preset_unknown_base_is_noop() {
        let mut mgr = AnimationManager::with_defaults();
        let before = mgr.selected_name().to_string();
        assert!(!mgr.select_preset("X", "NoSuchType", &json!({})));
        assert_eq!(mgr.selected_name(), before);
    }

    #[test]
    fn test_rename_selected() {
        let mut mgr = AnimationManager::with_defaults();
        mgr.select_preset("Old", "Fire", &json!({}));
        mgr.rename_selected("Old", "New");
        assert_eq!(mgr.selected_name(), "New");
        mgr.rename_selected("Other", "Else");
        assert_eq!(mgr.selected_name(), "New");
    }

    #[test]
    fn test_render_fills_pixels() {
        let mut mgr = AnimationManager::with_defaults();
        mgr.select_base("Breathing");
        let mut pixels = vec![Rgb::BLACK; 30];
        // Mid-attack the strip must be lit.
        mgr.render(50, &mut pixels);
        assert!(pixels.iter().any(|p| *p != Rgb::BLACK));
    }

    #[test]
    fn test_phase_clamped() {
        let mut mgr = AnimationManager::with_defaults();
        mgr.set_device_phase(2.0);
        assert_eq!(mgr.device_phase(), 1.0);
        mgr.set_device_phase(-1.0);
        assert_eq!(mgr.device_phase(), 0.0);
    }
}
