//! Animation parameter registry.
//!
//! Each animation owns a [`ParamSet`]: a table of named, typed values
//! with UI metadata and defaults captured at registration. Registration
//! returns a [`ParamId`] the animation keeps to read its own values on
//! the render path; the control plane and the command bus address
//! parameters by name with JSON values.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::color::{DynamicPalette, Rgb};

/// Errors from parameter lookups and writes.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    #[error("incompatible value for parameter '{name}' ({kind:?})")]
    IncompatibleType { name: String, kind: ParamKind },
}

/// Declared kind of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    I32,
    F32,
    U8,
    Bool,
    Color,
    Palette,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::I32 => "i32",
            ParamKind::F32 => "f32",
            ParamKind::U8 => "u8",
            ParamKind::Bool => "bool",
            ParamKind::Color => "color",
            ParamKind::Palette => "palette",
        }
    }
}

/// A typed parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    I32(i32),
    F32(f32),
    U8(u8),
    Bool(bool),
    Color(Rgb),
    Palette(DynamicPalette),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::I32(_) => ParamKind::I32,
            ParamValue::F32(_) => ParamKind::F32,
            ParamValue::U8(_) => ParamKind::U8,
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::Color(_) => ParamKind::Color,
            ParamValue::Palette(_) => ParamKind::Palette,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::I32(v) => json!(v),
            ParamValue::F32(v) => json!(v),
            ParamValue::U8(v) => json!(v),
            ParamValue::Bool(v) => json!(v),
            ParamValue::Color(v) => json!(v.to_hex()),
            ParamValue::Palette(v) => {
                json!(v.colors.iter().map(|c| c.to_hex()).collect::<Vec<_>>())
            }
        }
    }

    /// Parse a JSON value into the declared kind.
    ///
    /// Returns `None` on a kind mismatch; the caller decides whether
    /// that is a silent drop (wire) or a surfaced error (control plane).
    pub fn from_json(kind: ParamKind, value: &Value) -> Option<ParamValue> {
        match kind {
            ParamKind::I32 => value.as_i64().map(|v| ParamValue::I32(v as i32)),
            ParamKind::F32 => value.as_f64().map(|v| ParamValue::F32(v as f32)),
            ParamKind::U8 => value
                .as_u64()
                .filter(|&v| v <= u64::from(u8::MAX))
                .map(|v| ParamValue::U8(v as u8)),
            ParamKind::Bool => value.as_bool().map(ParamValue::Bool),
            ParamKind::Color => value
                .as_str()
                .and_then(Rgb::from_hex)
                .map(ParamValue::Color),
            ParamKind::Palette => {
                let items = value.as_array()?;
                let mut colors = Vec::with_capacity(items.len());
                for item in items {
                    colors.push(Rgb::from_hex(item.as_str()?)?);
                }
                Some(ParamValue::Palette(DynamicPalette::from_colors(colors)))
            }
        }
    }
}

/// UI metadata for one parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

/// Handle returned by registration; index into the owning set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamId(usize);

struct Param {
    spec: ParamSpec,
    value: ParamValue,
    default: ParamValue,
}

/// Ordered set of parameters owned by one animation instance.
///
/// Parameters are registered at construction and never removed.
#[derive(Default)]
pub struct ParamSet {
    params: Vec<Param>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, spec: ParamSpec, value: ParamValue) -> ParamId {
        debug_assert_eq!(spec.kind, value.kind());
        let id = ParamId(self.params.len());
        self.params.push(Param {
            spec,
            default: value.clone(),
            value,
        });
        id
    }

    pub fn register_i32(
        &mut self,
        name: &'static str,
        value: i32,
        min: f32,
        max: f32,
        step: f32,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::I32,
                min,
                max,
                step,
            },
            ParamValue::I32(value),
        )
    }

    pub fn register_f32(
        &mut self,
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
        step: f32,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::F32,
                min,
                max,
                step,
            },
            ParamValue::F32(value),
        )
    }

    pub fn register_u8(
        &mut self,
        name: &'static str,
        value: u8,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::U8,
                min: 0.0,
                max: 255.0,
                step: 1.0,
            },
            ParamValue::U8(value),
        )
    }

    pub fn register_bool(
        &mut self,
        name: &'static str,
        value: bool,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::Bool,
                min: 0.0,
                max: 1.0,
                step: 1.0,
            },
            ParamValue::Bool(value),
        )
    }

    pub fn register_color(
        &mut self,
        name: &'static str,
        value: Rgb,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::Color,
                min: 0.0,
                max: 0.0,
                step: 0.0,
            },
            ParamValue::Color(value),
        )
    }

    pub fn register_palette(
        &mut self,
        name: &'static str,
        value: DynamicPalette,
        description: &'static str,
    ) -> ParamId {
        self.register(
            ParamSpec {
                name,
                description,
                kind: ParamKind::Palette,
                min: 0.0,
                max: 0.0,
                step: 0.0,
            },
            ParamValue::Palette(value),
        )
    }

    // === Render-path accessors ===
    //
    // Registration guarantees the kind behind each id; a mismatch is a
    // construction bug, so these return the kind's zero value rather
    // than panicking mid-frame.

    pub fn i32(&self, id: ParamId) -> i32 {
        match self.params[id.0].value {
            ParamValue::I32(v) => v,
            _ => 0,
        }
    }

    pub fn f32(&self, id: ParamId) -> f32 {
        match self.params[id.0].value {
            ParamValue::F32(v) => v,
            _ => 0.0,
        }
    }

    pub fn u8(&self, id: ParamId) -> u8 {
        match self.params[id.0].value {
            ParamValue::U8(v) => v,
            _ => 0,
        }
    }

    pub fn flag(&self, id: ParamId) -> bool {
        matches!(self.params[id.0].value, ParamValue::Bool(true))
    }

    pub fn color(&self, id: ParamId) -> Rgb {
        match self.params[id.0].value {
            ParamValue::Color(v) => v,
            _ => Rgb::BLACK,
        }
    }

    pub fn palette(&self, id: ParamId) -> &DynamicPalette {
        static EMPTY: DynamicPalette = DynamicPalette { colors: Vec::new() };
        match &self.params[id.0].value {
            ParamValue::Palette(v) => v,
            _ => &EMPTY,
        }
    }

    // === Name-addressed access (control plane / command bus) ===

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|p| p.spec.name == name)
            .map(|p| &p.value)
    }

    /// Set a parameter from a JSON value, enforcing the declared kind.
    pub fn set_json(&mut self, name: &str, value: &Value) -> Result<(), ParamError> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.spec.name == name)
            .ok_or_else(|| ParamError::UnknownParam(name.to_string()))?;
        let parsed = ParamValue::from_json(param.spec.kind, value).ok_or_else(|| {
            ParamError::IncompatibleType {
                name: name.to_string(),
                kind: param.spec.kind,
            }
        })?;
        param.value = parsed;
        Ok(())
    }

    /// Restore every parameter to its registration default.
    pub fn reset_all(&mut self) {
        for param in &mut self.params {
            param.value = param.default.clone();
        }
    }

    /// Current values as a `{name: value}` JSON map — the body of a
    /// preset document.
    pub fn values_json(&self) -> Value {
        let mut map = Map::new();
        for param in &self.params {
            map.insert(param.spec.name.to_string(), param.value.to_json());
        }
        Value::Object(map)
    }

    /// Apply a preset's value map. Resets to defaults first so the
    /// preset fully defines the result; unknown names and mismatched
    /// kinds in the map are skipped.
    pub fn apply_values_json(&mut self, values: &Value) {
        self.reset_all();
        let Some(map) = values.as_object() else {
            return;
        };
        for (name, value) in map {
            let _ = self.set_json(name, value);
        }
    }

    /// Full parameter descriptions for the UI: name, kind, value,
    /// range metadata.
    pub fn describe_json(&self) -> Value {
        let items: Vec<Value> = self
            .params
            .iter()
            .map(|p| {
                let mut obj = Map::new();
                obj.insert("name".into(), json!(p.spec.name));
                obj.insert("kind".into(), json!(p.spec.kind.as_str()));
                obj.insert("value".into(), p.value.to_json());
                obj.insert("description".into(), json!(p.spec.description));
                if matches!(
                    p.spec.kind,
                    ParamKind::I32 | ParamKind::F32 | ParamKind::U8
                ) {
                    obj.insert("min".into(), json!(p.spec.min));
                    obj.insert("max".into(), json!(p.spec.max));
                    obj.insert("step".into(), json!(p.spec.step));
                }
                Value::Object(obj)
            })
            .collect();
        Value::Array(items)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> (ParamSet, ParamId, ParamId, ParamId) {
        let mut set = ParamSet::new();
        let speed = set.register_f32("Speed", 1.0, 0.1, 5.0, 0.1, "Animation speed");
        let cooling = set.register_u8("Cooling", 55, "Cooling rate");
        let pal = set.register_palette(
            "Palette",
            DynamicPalette::from_colors(vec![Rgb::BLACK, Rgb::WHITE]),
            "Colors",
        );
        (set, speed, cooling, pal)
    }

    #[test]
    fn test_typed_accessors() {
        let (set, speed, cooling, pal) = sample_set();
        assert_eq!(set.f32(speed), 1.0);
        assert_eq!(set.u8(cooling), 55);
        assert_eq!(set.palette(pal).colors.len(), 2);
    }

    #[test]
    fn test_set_json_enforces_kind() {
        let (mut set, speed, cooling, _) = sample_set();

        set.set_json("Speed", &json!(2.5)).unwrap();
        assert_eq!(set.f32(speed), 2.5);

        // Integer JSON is a valid f32.
        set.set_json("Speed", &json!(3)).unwrap();
        assert_eq!(set.f32(speed), 3.0);

        // Type mismatches are rejected and leave the value untouched.
        assert!(matches!(
            set.set_json("Cooling", &json!("hot")),
            Err(ParamError::IncompatibleType { .. })
        ));
        assert!(matches!(
            set.set_json("Cooling", &json!(300)),
            Err(ParamError::IncompatibleType { .. })
        ));
        assert_eq!(set.u8(cooling), 55);

        assert!(matches!(
            set.set_json("Nope", &json!(1)),
            Err(ParamError::UnknownParam(_))
        ));
    }

    #[test]
    fn test_palette_json_round_trip() {
        let (mut set, _, _, pal) = sample_set();
        set.set_json("Palette", &json!(["#FF0000", "#00FF00"])).unwrap();
        assert_eq!(set.palette(pal).colors[0], Rgb::new(255, 0, 0));

        // Malformed entries are a kind mismatch.
        assert!(set.set_json("Palette", &json!(["#FF0000", 7])).is_err());
        assert!(set.set_json("Palette", &json!("not-a-list")).is_err());
    }

    #[test]
    fn test_reset_all() {
        let (mut set, speed, cooling, _) = sample_set();
        set.set_json("Speed", &json!(4.0)).unwrap();
        set.set_json("Cooling", &json!(99)).unwrap();

        set.reset_all();
        assert_eq!(set.f32(speed), 1.0);
        assert_eq!(set.u8(cooling), 55);
    }

    #[test]
    fn test_values_round_trip_through_json() {
        let (mut set, speed, _, _) = sample_set();
        set.set_json("Speed", &json!(2.0)).unwrap();
        let saved = set.values_json();

        let (mut other, other_speed, _, _) = sample_set();
        other.apply_values_json(&saved);
        assert_eq!(other.f32(other_speed), 2.0);
    }

    #[test]
    fn test_apply_values_ignores_unknown_and_mismatched() {
        let (mut set, speed, cooling, _) = sample_set();
        set.apply_values_json(&json!({
            "Speed": 4.5,
            "Cooling": "not-a-number",
            "Ghost": 1,
        }));
        assert_eq!(set.f32(speed), 4.5);
        // Mismatch fell back to the default via the reset.
        assert_eq!(set.u8(cooling), 55);
    }

    #[test]
    fn test_describe_json_has_range_metadata() {
        let (set, _, _, _) = sample_set();
        let desc = set.describe_json();
        let items = desc.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["name"], "Speed");
        assert_eq!(items[0]["min"].as_f64().unwrap() as f32, 0.1);
        // Palettes carry no numeric range.
        assert!(items[2].get("min").is_none());
    }
}
