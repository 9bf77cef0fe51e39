//! Модуль для работы с TTS
//!
//! Три взаимозаменяемых движка синтеза за одним трейтом `SpeechEngine`.
//! Движок выбирается один раз в начале запуска: локальный движок и движок
//! клонирования проверяют доступность и при ее отсутствии прозрачно
//! заменяются сетевым, который служит последним запасным вариантом.

pub mod generator;
pub mod kokoro;
pub mod networked;
pub mod voicebox;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{EngineKind, SyncConfig, VoiceGender};
use crate::error::{Result, SyncTtsError};

pub use generator::{generate_all, GenerationSummary};
pub use kokoro::KokoroEngine;
pub use networked::NetworkedEngine;
pub use voicebox::VoiceboxEngine;

/// Как движок обрабатывает набор сегментов
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Параллельные запросы с ограничением числа одновременных и одним
    /// повтором временных сбоев
    Concurrent {
        max_in_flight: usize,
        retry_delay: Duration,
    },
    /// Строго по одному сегменту, без повторов
    Sequential,
}

/// Движок синтеза речи
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Дешевая локальная проверка доступности
    fn is_available(&self) -> bool;

    fn dispatch_mode(&self) -> DispatchMode;

    /// Расширение исходных артефактов (`mp3` или `wav`)
    fn artifact_extension(&self) -> &'static str;

    /// Голос по умолчанию для языка и пола
    fn default_voice(&self, target_lang: &str, gender: Option<VoiceGender>) -> Option<String>;

    /// Синтезировать текст, вернуть закодированное аудио
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes>;
}

/// Параметры выбора движка и голоса
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceRequest {
    /// Явно указанный голос
    pub voice: Option<String>,
    /// Профиль голоса для клонирования
    pub voice_profile: Option<String>,
    /// Целевой язык, влияет только на голос по умолчанию
    pub target_lang: String,
    pub gender: Option<VoiceGender>,
}

/// Выбранный движок с голосом
#[derive(Clone)]
pub struct ResolvedEngine {
    pub engine: Arc<dyn SpeechEngine>,
    pub voice: String,
    /// Запрошенный вид движка
    pub requested: EngineKind,
}

impl ResolvedEngine {
    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Был ли выполнен переход на запасной движок
    pub fn fell_back(&self) -> bool {
        self.engine.kind() != self.requested
    }
}

impl std::fmt::Debug for ResolvedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEngine")
            .field("engine", &self.engine.kind())
            .field("voice", &self.voice)
            .field("requested", &self.requested)
            .finish()
    }
}

/// Набор доступных движков
#[derive(Clone)]
pub struct EngineSet {
    networked: Arc<dyn SpeechEngine>,
    local: Option<Arc<dyn SpeechEngine>>,
    cloning: Option<Arc<dyn SpeechEngine>>,
}

impl EngineSet {
    /// Набор только с сетевым движком
    pub fn new(networked: Arc<dyn SpeechEngine>) -> Self {
        Self {
            networked,
            local: None,
            cloning: None,
        }
    }

    /// Все три движка из конфигурации
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(NetworkedEngine::new(config.networked.clone())?))
            .with_local(Arc::new(KokoroEngine::new(config.local.clone())))
            .with_cloning(Arc::new(VoiceboxEngine::new(config.cloning.clone()))))
    }

    pub fn with_local(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.local = Some(engine);
        self
    }

    pub fn with_cloning(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.cloning = Some(engine);
        self
    }

    /// Выбрать движок и голос.
    ///
    /// Недоступный локальный движок или движок клонирования заменяется
    /// сетевым; ошибка возникает только при отсутствии профиля для
    /// клонирования или недоступности самого сетевого движка.
    pub fn resolve(&self, requested: EngineKind, request: &VoiceRequest) -> Result<ResolvedEngine> {
        let preferred = match requested {
            EngineKind::Networked => None,
            EngineKind::Local => self.local.as_ref().map(|engine| (engine, request.voice.clone())),
            EngineKind::Cloning => {
                let profile = request
                    .voice_profile
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| {
                        SyncTtsError::Configuration("voicebox engine requires a voice profile".to_string())
                    })?;
                self.cloning.as_ref().map(|engine| (engine, Some(profile)))
            }
        };

        if let Some((engine, voice)) = preferred {
            if engine.is_available() {
                let voice = voice
                    .or_else(|| engine.default_voice(&request.target_lang, request.gender))
                    .ok_or_else(|| SyncTtsError::Configuration(format!("No voice for engine {}", requested)))?;
                return Ok(ResolvedEngine {
                    engine: engine.clone(),
                    voice,
                    requested,
                });
            }
            log::warn!(
                "{} engine is not available, falling back to {}",
                requested,
                self.networked.kind()
            );
        } else if requested != EngineKind::Networked {
            log::warn!("{} engine is not configured, falling back to {}", requested, self.networked.kind());
        }

        if !self.networked.is_available() {
            return Err(SyncTtsError::EngineUnavailable(format!(
                "no usable engine: {} and fallback {} are unavailable",
                requested,
                self.networked.kind()
            )));
        }

        let voice = request
            .voice
            .clone()
            .or_else(|| self.networked.default_voice(&request.target_lang, request.gender))
            .ok_or_else(|| SyncTtsError::Configuration("No voice for networked engine".to_string()))?;

        Ok(ResolvedEngine {
            engine: self.networked.clone(),
            voice,
            requested,
        })
    }
}
