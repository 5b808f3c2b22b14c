//! Rule-based planner with no network dependency.

use super::{
    AudioSpec, CameraPath, CameraSpec, CharacterSpec, DurationSecs, EnvSpec, Instances,
    ObjectSpec, Rig, ScenePlan, Tempo, TimeOfDay, Weather,
};

/// Build a plan from keyword rules alone.
///
/// Total for every input, including the empty string: the base scene is a
/// rainy night alley and each keyword rule overrides exactly one field.
pub fn fallback_plan(prompt: &str) -> ScenePlan {
    let lowered = prompt.to_lowercase();

    let time_of_day = if lowered.contains("day") {
        TimeOfDay::Day
    } else {
        TimeOfDay::Night
    };
    let weather = if lowered.contains("fog") {
        Weather::Fog
    } else {
        Weather::LightRain
    };
    let path = if lowered.contains("orbit") {
        CameraPath::Orbit
    } else {
        CameraPath::Dolly
    };

    ScenePlan {
        environment: EnvSpec {
            theme: "alley".to_string(),
            weather,
            time_of_day,
        },
        objects: vec![
            ObjectSpec {
                kind: "alley_buildings".to_string(),
                instances: instances(2),
                tags: strings(&["wet_concrete"]),
                text_overlays: None,
            },
            ObjectSpec {
                kind: "neon_sign".to_string(),
                instances: instances(4),
                tags: strings(&["pink", "blue"]),
                text_overlays: Some(strings(&["ラーメン", "探偵社"])),
            },
        ],
        character: Some(CharacterSpec {
            archetype: "sleuth".to_string(),
            rig: Rig::Humanoid,
            motion_text: "walk cautiously".to_string(),
        }),
        camera: CameraSpec {
            path,
            duration_s: DurationSecs::default(),
        },
        audio: AudioSpec {
            tempo: Tempo::default(),
            mood: strings(&["lofi", "minor"]),
            sfx: strings(&["rain", "footsteps", "neon_buzz"]),
        },
    }
}

fn instances(n: i64) -> Instances {
    // Literal counts above are inside 1..=32.
    Instances::new(n).unwrap_or(Instances(1))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
