use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{
    AudioSpec, CameraSpec, CharacterSpec, DurationSecs, EnvSpec, Instances, ObjectSpec, ScenePlan,
    Tempo, MAX_OBJECTS,
};
use crate::{DomainError, FieldViolation, ValidationError};

/// Validate raw planner JSON into a [`ScenePlan`].
///
/// Walks the whole document and collects every violation before failing, so
/// a caller sees all offending fields at once. `null` is treated the same as
/// an absent field wherever the field has a default.
pub fn validate_scene_plan(raw: &Value) -> Result<ScenePlan, ValidationError> {
    let mut walker = Walker::default();
    let plan = walker.plan(raw);
    match plan {
        Some(plan) if walker.violations.is_empty() => Ok(plan),
        _ => Err(ValidationError::new(walker.violations)),
    }
}

#[derive(Default)]
struct Walker {
    violations: Vec<FieldViolation>,
}

impl Walker {
    fn fail(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, message));
    }

    fn plan(&mut self, raw: &Value) -> Option<ScenePlan> {
        let Some(root) = raw.as_object() else {
            self.fail("$", format!("expected object, got {}", kind_of(raw)));
            return None;
        };

        let environment = match present(root, "environment") {
            Some(value) => self.environment(value),
            None => {
                self.fail("environment", "field required");
                None
            }
        };

        let objects = self.objects(present(root, "objects"));

        let character = match present(root, "character") {
            Some(value) => self.character(value).map(Some),
            None => Some(None),
        };

        let camera = match present(root, "camera") {
            Some(value) => self.camera(value),
            None => {
                self.fail("camera", "field required");
                None
            }
        };

        let audio = match present(root, "audio") {
            Some(value) => self.audio(value),
            None => {
                self.fail("audio", "field required");
                None
            }
        };

        Some(ScenePlan {
            environment: environment?,
            objects: objects?,
            character: character?,
            camera: camera?,
            audio: audio?,
        })
    }

    fn environment(&mut self, value: &Value) -> Option<EnvSpec> {
        let map = self.object(value, "environment")?;
        let theme = self.required_string(map, "environment", "theme");
        let weather = self.enum_or_default(map, "environment", "weather");
        let time_of_day = self.enum_or_default(map, "environment", "time_of_day");
        Some(EnvSpec {
            theme: theme?,
            weather: weather?,
            time_of_day: time_of_day?,
        })
    }

    fn objects(&mut self, value: Option<&Value>) -> Option<Vec<ObjectSpec>> {
        let Some(value) = value else {
            return Some(Vec::new());
        };
        let Some(items) = value.as_array() else {
            self.fail("objects", format!("expected array, got {}", kind_of(value)));
            return None;
        };
        if items.len() > MAX_OBJECTS {
            self.fail(
                "objects",
                format!("at most {MAX_OBJECTS} items allowed, got {}", items.len()),
            );
        }

        let mut objects = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match self.object_spec(item, &format!("objects[{i}]")) {
                Some(object) => objects.push(object),
                None => ok = false,
            }
        }
        ok.then_some(objects)
    }

    fn object_spec(&mut self, value: &Value, path: &str) -> Option<ObjectSpec> {
        let map = self.object(value, path)?;
        let kind = self.required_string(map, path, "type");
        let instances = match present(map, "instances") {
            Some(value) => self.bounded(value, &join(path, "instances"), Instances::new),
            None => {
                self.fail(join(path, "instances"), "field required");
                None
            }
        };
        let tags = self.string_list_or(map, path, "tags", Vec::new);
        let text_overlays = match present(map, "text_overlays") {
            Some(value) => self.string_list(value, &join(path, "text_overlays")).map(Some),
            None => Some(None),
        };
        Some(ObjectSpec {
            kind: kind?,
            instances: instances?,
            tags: tags?,
            text_overlays: text_overlays?,
        })
    }

    fn character(&mut self, value: &Value) -> Option<CharacterSpec> {
        let map = self.object(value, "character")?;
        let defaults = CharacterSpec::default();
        let archetype = self.string_or(map, "character", "archetype", defaults.archetype);
        let rig = self.enum_or_default(map, "character", "rig");
        let motion_text = self.string_or(map, "character", "motion_text", defaults.motion_text);
        Some(CharacterSpec {
            archetype: archetype?,
            rig: rig?,
            motion_text: motion_text?,
        })
    }

    fn camera(&mut self, value: &Value) -> Option<CameraSpec> {
        let map = self.object(value, "camera")?;
        let path = self.enum_or_default(map, "camera", "path");
        let duration_s = match present(map, "duration_s") {
            Some(value) => self.bounded(value, "camera.duration_s", DurationSecs::new),
            None => Some(DurationSecs::default()),
        };
        Some(CameraSpec {
            path: path?,
            duration_s: duration_s?,
        })
    }

    fn audio(&mut self, value: &Value) -> Option<AudioSpec> {
        let map = self.object(value, "audio")?;
        let defaults = AudioSpec::default();
        let tempo = match present(map, "tempo") {
            Some(value) => self.bounded(value, "audio.tempo", Tempo::new),
            None => Some(Tempo::default()),
        };
        let mood = self.string_list_or(map, "audio", "mood", || defaults.mood.clone());
        let sfx = self.string_list_or(map, "audio", "sfx", || defaults.sfx.clone());
        Some(AudioSpec {
            tempo: tempo?,
            mood: mood?,
            sfx: sfx?,
        })
    }

    // === Field helpers ===

    fn object<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
        let map = value.as_object();
        if map.is_none() {
            self.fail(path, format!("expected object, got {}", kind_of(value)));
        }
        map
    }

    fn required_string(&mut self, map: &Map<String, Value>, path: &str, key: &str) -> Option<String> {
        match present(map, key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.fail(join(path, key), format!("expected string, got {}", kind_of(other)));
                None
            }
            None => {
                self.fail(join(path, key), "field required");
                None
            }
        }
    }

    fn string_or(
        &mut self,
        map: &Map<String, Value>,
        path: &str,
        key: &str,
        default: String,
    ) -> Option<String> {
        match present(map, key) {
            None => Some(default),
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.fail(join(path, key), format!("expected string, got {}", kind_of(other)));
                None
            }
        }
    }

    fn enum_or_default<T>(&mut self, map: &Map<String, Value>, path: &str, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Default,
    {
        let Some(value) = present(map, key) else {
            return Some(T::default());
        };
        match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.fail(join(path, key), e.to_string());
                None
            }
        }
    }

    fn bounded<T>(
        &mut self,
        value: &Value,
        path: &str,
        build: impl Fn(i64) -> Result<T, DomainError>,
    ) -> Option<T> {
        let Some(n) = as_integer(value) else {
            self.fail(path, format!("expected integer, got {}", kind_of(value)));
            return None;
        };
        match build(n) {
            Ok(v) => Some(v),
            Err(DomainError::OutOfRange { min, max, value, .. }) => {
                self.fail(path, format!("must be between {min} and {max}, got {value}"));
                None
            }
            Err(e) => {
                self.fail(path, e.to_string());
                None
            }
        }
    }

    fn string_list(&mut self, value: &Value, path: &str) -> Option<Vec<String>> {
        let Some(items) = value.as_array() else {
            self.fail(path, format!("expected array, got {}", kind_of(value)));
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::String(s) => out.push(s.clone()),
                other => {
                    self.fail(
                        format!("{path}[{i}]"),
                        format!("expected string, got {}", kind_of(other)),
                    );
                    ok = false;
                }
            }
        }
        ok.then_some(out)
    }

    fn string_list_or(
        &mut self,
        map: &Map<String, Value>,
        path: &str,
        key: &str,
        default: impl FnOnce() -> Vec<String>,
    ) -> Option<Vec<String>> {
        match present(map, key) {
            Some(value) => self.string_list(value, &join(path, key)),
            None => Some(default()),
        }
    }
}

/// Field lookup that treats an explicit `null` as absent.
fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    // Planners sometimes emit `8.0`; accept it when integral.
    let f = value.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

fn join(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
