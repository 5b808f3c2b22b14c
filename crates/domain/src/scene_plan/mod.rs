//! ScenePlan - the structured, validated description of a scene to render.
//!
//! Every numeric field is a bounded newtype: constructing one outside its
//! declared range fails instead of clamping. Raw JSON from planners goes
//! through [`validate_scene_plan`], which reports every offending field.

mod fallback;
mod validate;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::DomainError;

pub use fallback::fallback_plan;
pub use validate::validate_scene_plan;

/// Upper bound on `ScenePlan::objects`.
pub const MAX_OBJECTS: usize = 20;

macro_rules! bounded_int {
    ($(#[$meta:meta])* $name:ident, $field:literal, $repr:ty, $min:expr, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name($repr);

        impl $name {
            pub const MIN: i64 = $min;
            pub const MAX: i64 = $max;

            pub fn new(value: i64) -> Result<Self, DomainError> {
                if !(Self::MIN..=Self::MAX).contains(&value) {
                    return Err(DomainError::OutOfRange {
                        field: $field,
                        min: Self::MIN,
                        max: Self::MAX,
                        value,
                    });
                }
                // Range check above guarantees the cast is lossless.
                Ok(Self(value as $repr))
            }

            pub fn get(self) -> $repr {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = DomainError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                i64::from(value.0)
            }
        }

        impl JsonSchema for $name {
            fn schema_name() -> String {
                stringify!($name).to_string()
            }

            fn is_referenceable() -> bool {
                false
            }

            fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
                schemars::schema::SchemaObject {
                    instance_type: Some(schemars::schema::InstanceType::Integer.into()),
                    number: Some(Box::new(schemars::schema::NumberValidation {
                        minimum: Some($min as f64),
                        maximum: Some($max as f64),
                        ..Default::default()
                    })),
                    ..Default::default()
                }
                .into()
            }
        }
    };
}

bounded_int!(
    /// Number of instances of an object, 1..=32.
    Instances, "instances", u8, 1, 32
);
bounded_int!(
    /// Camera move duration in seconds, 2..=30.
    DurationSecs, "duration_s", u8, 2, 30
);
bounded_int!(
    /// Music tempo in BPM, 60..=180.
    Tempo, "tempo", u16, 60, 180
);

impl Default for DurationSecs {
    fn default() -> Self {
        Self(8)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(80)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    #[default]
    None,
    LightRain,
    HeavyRain,
    Fog,
    Snow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Day,
    GoldenHour,
    #[default]
    Night,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CameraPath {
    #[default]
    Dolly,
    Orbit,
    Static,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Rig {
    #[default]
    Humanoid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvSpec {
    pub theme: String,
    #[serde(default)]
    pub weather: Weather,
    #[serde(default)]
    pub time_of_day: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub instances: Instances,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_overlays: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CharacterSpec {
    #[serde(default = "default_archetype")]
    pub archetype: String,
    #[serde(default)]
    pub rig: Rig,
    #[serde(default = "default_motion_text")]
    pub motion_text: String,
}

impl Default for CharacterSpec {
    fn default() -> Self {
        Self {
            archetype: default_archetype(),
            rig: Rig::Humanoid,
            motion_text: default_motion_text(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CameraSpec {
    #[serde(default)]
    pub path: CameraPath,
    #[serde(default)]
    pub duration_s: DurationSecs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioSpec {
    #[serde(default)]
    pub tempo: Tempo,
    #[serde(default = "default_mood")]
    pub mood: Vec<String>,
    #[serde(default = "default_sfx")]
    pub sfx: Vec<String>,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            tempo: Tempo::default(),
            mood: default_mood(),
            sfx: default_sfx(),
        }
    }
}

/// Validated scene description handed to the generation stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScenePlan {
    pub environment: EnvSpec,
    #[serde(default)]
    #[schemars(length(max = 20))]
    pub objects: Vec<ObjectSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterSpec>,
    pub camera: CameraSpec,
    pub audio: AudioSpec,
}

impl ScenePlan {
    /// Re-run structural validation on an already typed plan.
    ///
    /// Bounded fields cannot be out of range, but the object list length can.
    pub fn check(&self) -> Result<(), crate::ValidationError> {
        if self.objects.len() > MAX_OBJECTS {
            return Err(crate::ValidationError::single(
                "objects",
                format!("at most {MAX_OBJECTS} items allowed, got {}", self.objects.len()),
            ));
        }
        Ok(())
    }

    /// Canonical JSON rendering used when persisting the plan.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn default_archetype() -> String {
    "generic".to_string()
}

fn default_motion_text() -> String {
    "walk".to_string()
}

fn default_mood() -> Vec<String> {
    vec!["lofi".to_string(), "minor".to_string()]
}

fn default_sfx() -> Vec<String> {
    vec!["ambience".to_string()]
}

/// JSON Schema of [`ScenePlan`], serialized for inclusion in planner prompts.
pub fn scene_plan_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(ScenePlan)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_ints_reject_instead_of_clamping() {
        assert!(Instances::new(0).is_err());
        assert!(Instances::new(33).is_err());
        assert_eq!(Instances::new(32).expect("max").get(), 32);
        assert!(DurationSecs::new(1).is_err());
        assert!(DurationSecs::new(31).is_err());
        assert!(Tempo::new(59).is_err());
        assert!(Tempo::new(181).is_err());
        assert_eq!(Tempo::new(180).expect("max").get(), 180);

        let err = DurationSecs::new(45).expect_err("out of range");
        assert_eq!(err.to_string(), "duration_s must be between 2 and 30, got 45");
    }

    #[test]
    fn defaults_match_declared_values() {
        let camera = CameraSpec::default();
        assert_eq!(camera.path, CameraPath::Dolly);
        assert_eq!(camera.duration_s.get(), 8);

        let audio = AudioSpec::default();
        assert_eq!(audio.tempo.get(), 80);
        assert_eq!(audio.mood, vec!["lofi", "minor"]);
        assert_eq!(audio.sfx, vec!["ambience"]);

        let character = CharacterSpec::default();
        assert_eq!(character.archetype, "generic");
        assert_eq!(character.motion_text, "walk");
        assert_eq!(Weather::default(), Weather::None);
        assert_eq!(TimeOfDay::default(), TimeOfDay::Night);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(Weather::LightRain).expect("ser"),
            serde_json::json!("light_rain")
        );
        assert_eq!(
            serde_json::to_value(TimeOfDay::GoldenHour).expect("ser"),
            serde_json::json!("golden_hour")
        );
        assert_eq!(
            serde_json::to_value(Weather::None).expect("ser"),
            serde_json::json!("none")
        );
    }

    #[test]
    fn schema_carries_bounds_and_enums() {
        let schema = scene_plan_schema();
        let text = schema.to_string();
        assert!(text.contains("\"environment\""));
        assert!(text.contains("light_rain"));
        assert!(text.contains("golden_hour"));
        assert!(text.contains("\"maximum\":32.0") || text.contains("\"maximum\":32"));
        assert!(schema["required"]
            .as_array()
            .expect("required list")
            .iter()
            .any(|v| v == "camera"));
    }

    #[test]
    fn check_rejects_too_many_objects() {
        let mut plan = fallback_plan("anything");
        let template = plan.objects[0].clone();
        plan.objects = vec![template; MAX_OBJECTS + 1];
        let err = plan.check().expect_err("too many objects");
        assert_eq!(err.fields(), vec!["objects"]);
    }
}
