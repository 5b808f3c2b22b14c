//! Built-in generation providers, addressed by `(stage, name)`.
//!
//! These are placeholders for the real model backends: they write small
//! stand-in artifacts under the job directory and describe themselves in
//! provenance.

mod env;
mod media;

use std::sync::Arc;

use async_trait::async_trait;
use fusion_domain::{GenerationOutput, ProviderKey, Stage};

use crate::infrastructure::ports::{
    GenerationError, GenerationProviderPort, GenerationRequest, GeneratorRegistryPort,
};

pub use env::write_minimal_glb;

/// Closed set of generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    /// `env/stub`: minimal valid binary glTF.
    EnvStub,
    /// `env/sdxl_triposr`: fast-path placeholder bytes.
    EnvFast,
    /// `motion/mdm_base`
    MotionMdm,
    /// `audio/musicgen_small`
    AudioMusicgen,
}

impl GenerationProvider {
    pub const ALL: [GenerationProvider; 4] = [
        Self::EnvStub,
        Self::EnvFast,
        Self::MotionMdm,
        Self::AudioMusicgen,
    ];

    pub fn lookup(stage: Stage, name: &str) -> Option<Self> {
        match (stage, name) {
            (Stage::Env, "stub") => Some(Self::EnvStub),
            (Stage::Env, "sdxl_triposr" | "triposr_fast") => Some(Self::EnvFast),
            (Stage::Motion, "mdm_base") => Some(Self::MotionMdm),
            (Stage::Audio, "musicgen_small") => Some(Self::AudioMusicgen),
            _ => None,
        }
    }

    fn stage(self) -> Stage {
        match self {
            Self::EnvStub | Self::EnvFast => Stage::Env,
            Self::MotionMdm => Stage::Motion,
            Self::AudioMusicgen => Stage::Audio,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::EnvStub => "stub",
            Self::EnvFast => "sdxl_triposr",
            Self::MotionMdm => "mdm_base",
            Self::AudioMusicgen => "musicgen_small",
        }
    }
}

#[async_trait]
impl GenerationProviderPort for GenerationProvider {
    fn key(&self) -> ProviderKey {
        ProviderKey::new(self.stage(), self.name())
    }

    fn version(&self) -> &str {
        match self {
            Self::EnvStub | Self::EnvFast => "0.1.0",
            Self::MotionMdm => "0.9.0",
            Self::AudioMusicgen => "1.1.0",
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let version = self.version();
        match self {
            Self::EnvStub => env::generate_stub(request, self.name(), version).await,
            Self::EnvFast => env::generate_fast(request, self.name(), version).await,
            Self::MotionMdm => media::generate_motion(request, self.name(), version).await,
            Self::AudioMusicgen => media::generate_audio(request, self.name(), version).await,
        }
    }
}

/// Registry over [`GenerationProvider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinGenerators;

impl GeneratorRegistryPort for BuiltinGenerators {
    fn resolve(
        &self,
        stage: Stage,
        name: &str,
    ) -> Result<Arc<dyn GenerationProviderPort>, GenerationError> {
        GenerationProvider::lookup(stage, name)
            .map(|provider| Arc::new(provider) as Arc<dyn GenerationProviderPort>)
            .ok_or_else(|| GenerationError::UnknownProvider {
                stage: stage.to_string(),
                name: name.to_string(),
            })
    }
}
