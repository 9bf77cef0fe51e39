//! Модуль конфигурации библиотеки sync-tts
//!
//! Этот модуль содержит структуры и перечисления для настройки конвейера:
//! выбор движка синтеза, параметры движков, пороги анализа таймингов,
//! политика коррекции темпа и параметры сборки таймлайна.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use path_clean::PathClean;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncTtsError};

/// Частота дискретизации выходного аудио
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Движок синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Сетевой движок с высокой пропускной способностью (Edge-TTS шлюз)
    Networked,
    /// Локальный движок (Kokoro)
    Local,
    /// Движок клонирования голоса (Voicebox)
    Cloning,
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::Networked
    }
}

impl EngineKind {
    /// Получить строковое представление движка
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Networked => "edge-tts",
            Self::Local => "kokoro",
            Self::Cloning => "voicebox",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = SyncTtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "edge-tts" | "edge" | "networked" => Ok(Self::Networked),
            "kokoro" | "local" => Ok(Self::Local),
            "voicebox" | "cloning" => Ok(Self::Cloning),
            other => Err(SyncTtsError::Configuration(format!(
                "Unknown TTS engine '{}' (expected edge-tts, kokoro or voicebox)",
                other
            ))),
        }
    }
}

/// Пол голоса для выбора голоса по умолчанию
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Male,
    Female,
}

impl FromStr for VoiceGender {
    type Err = SyncTtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "female" | "f" | "woman" => Ok(Self::Female),
            "male" | "m" | "man" => Ok(Self::Male),
            other => Err(SyncTtsError::Configuration(format!("Unknown voice gender '{}'", other))),
        }
    }
}

/// Настройки сетевого движка
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkedEngineConfig {
    /// Базовый URL API, совместимого с `/audio/speech`
    pub base_url: String,
    /// API ключ (может быть пустым для локального шлюза)
    pub api_key: String,
    /// Модель TTS
    pub model: String,
    /// Голос по умолчанию (мужской)
    pub default_voice_male: String,
    /// Голос по умолчанию (женский)
    pub default_voice_female: String,
    /// Голоса для отдельных языков
    pub voice_map: HashMap<String, String>,
    /// Максимальное количество одновременных запросов
    pub max_concurrent_requests: usize,
    /// Таймаут одного запроса в секундах
    pub request_timeout_secs: u64,
    /// Пауза перед единственным повтором в миллисекундах
    pub retry_delay_ms: u64,
}

impl Default for NetworkedEngineConfig {
    fn default() -> Self {
        let mut voice_map = HashMap::new();
        voice_map.insert("zh".to_string(), "zh-CN-YunxiNeural".to_string());
        voice_map.insert("chinese".to_string(), "zh-CN-YunxiNeural".to_string());

        Self {
            base_url: "http://localhost:5050/v1".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            default_voice_male: "en-US-BrianMultilingualNeural".to_string(),
            default_voice_female: "en-US-EmmaMultilingualNeural".to_string(),
            voice_map,
            max_concurrent_requests: 10,
            request_timeout_secs: 30,
            retry_delay_ms: 1000,
        }
    }
}

impl NetworkedEngineConfig {
    /// Подобрать голос для языка: сначала карта языков, затем мультиязычный голос
    pub fn voice_for_language(&self, target_lang: &str, gender: Option<VoiceGender>) -> String {
        if let Some(voice) = self.voice_map.get(&target_lang.trim().to_lowercase()) {
            return voice.clone();
        }
        match gender {
            Some(VoiceGender::Female) => self.default_voice_female.clone(),
            _ => self.default_voice_male.clone(),
        }
    }
}

/// Настройки локального движка Kokoro
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalEngineConfig {
    /// Интерпретатор Python окружения с установленным kokoro
    pub python_path: PathBuf,
    /// Голос по умолчанию
    pub default_voice: String,
    /// Таймаут синтеза одного сегмента (включая первую загрузку модели)
    pub request_timeout_secs: u64,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            python_path: home_dir().join("miniconda3/envs/kokoro/bin/python3"),
            default_voice: "am_michael".to_string(),
            request_timeout_secs: 600,
        }
    }
}

/// Настройки движка клонирования Voicebox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloningEngineConfig {
    /// Программа запуска скрипта
    pub runner: String,
    /// Путь к скрипту voicebox.py
    pub script_path: PathBuf,
    /// Файл, в который скрипт пишет результат
    pub output_path: PathBuf,
    /// Качество генерации
    pub quality: String,
    /// Таймаут синтеза одного сегмента
    pub request_timeout_secs: u64,
    /// Длительность видео, после которой предупреждаем о медленной генерации
    pub long_input_warning_secs: f64,
}

impl Default for CloningEngineConfig {
    fn default() -> Self {
        Self {
            runner: "uv".to_string(),
            script_path: home_dir().join(".claude/skills/voicebox/scripts/voicebox.py"),
            output_path: std::env::temp_dir().join("voicebox_output.wav"),
            quality: "high".to_string(),
            request_timeout_secs: 300,
            long_input_warning_secs: 300.0,
        }
    }
}

/// Пороги анализатора таймингов
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Выше этого отношения сегмент нужно сокращать
    pub max_natural_ratio: f64,
    /// Слоты короче этого значения не измеряются
    pub min_slot_secs: f64,
    /// Множитель рекомендуемого процента сокращения
    pub target_pct_scale: f64,
    /// Нижняя граница рекомендуемого процента
    pub min_target_pct: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_natural_ratio: 1.3,
            min_slot_secs: 0.05,
            target_pct_scale: 85.0,
            min_target_pct: 25,
        }
    }
}

/// Политика коррекции темпа
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Максимальное ускорение
    pub max_speedup: f64,
    /// Допуск вокруг 1.0, внутри которого темп не меняется
    pub unity_tolerance: f64,
    /// Слоты не длиннее этого значения только конвертируются
    pub min_slot_secs: f64,
    /// Минимальная длительность подставляемой тишины
    pub silence_floor_secs: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            max_speedup: 2.0,
            unity_tolerance: 0.02,
            min_slot_secs: 0.05,
            silence_floor_secs: 0.1,
        }
    }
}

/// Параметры сборки таймлайна
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Запас тишины после последнего сегмента
    pub tail_buffer_secs: f64,
    /// Целевой пик после нормализации
    pub peak_target: f32,
    /// Имя итогового файла внутри рабочей директории
    pub output_file_name: String,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            tail_buffer_secs: 2.0,
            peak_target: 0.95,
            output_file_name: "combined.wav".to_string(),
        }
    }
}

/// Конфигурация конвейера
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Рабочая директория для артефактов и отчетов
    pub work_dir: PathBuf,
    /// Частота дискретизации таймлайна и скорректированных артефактов
    pub sample_rate: u32,
    /// Текст, который синтезируется вместо пустого сегмента
    pub filler_text: String,
    /// Минимальный размер валидного артефакта в байтах
    pub min_artifact_bytes: u64,
    /// Таймаут вызова ffmpeg/ffprobe в секундах
    pub tool_timeout_secs: u64,
    /// Сетевой движок
    pub networked: NetworkedEngineConfig,
    /// Локальный движок
    pub local: LocalEngineConfig,
    /// Движок клонирования
    pub cloning: CloningEngineConfig,
    /// Анализ таймингов
    pub timing: TimingConfig,
    /// Коррекция темпа
    pub speed: SpeedConfig,
    /// Сборка таймлайна
    pub timeline: TimelineConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("sync-tts-work"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            filler_text: "...".to_string(),
            min_artifact_bytes: 100,
            tool_timeout_secs: 120,
            networked: NetworkedEngineConfig::default(),
            local: LocalEngineConfig::default(),
            cloning: CloningEngineConfig::default(),
            timing: TimingConfig::default(),
            speed: SpeedConfig::default(),
            timeline: TimelineConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Конфигурация по умолчанию с указанной рабочей директорией
    pub fn with_work_dir(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf().clean(),
            ..Self::default()
        }
    }

    /// Загрузить конфигурацию из JSON файла; отсутствующие поля берутся по умолчанию
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncTtsError::Configuration(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config: SyncConfig = serde_json::from_str(&content)?;
        config.work_dir = config.work_dir.clean();
        config.validate()?;
        Ok(config)
    }

    /// Проверить согласованность параметров
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SyncTtsError::Configuration("sample_rate must be positive".to_string()));
        }
        if self.networked.max_concurrent_requests == 0 {
            return Err(SyncTtsError::Configuration(
                "networked.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.networked.base_url.trim().is_empty() {
            return Err(SyncTtsError::Configuration("networked.base_url is empty".to_string()));
        }
        if self.speed.max_speedup < 1.0 {
            return Err(SyncTtsError::Configuration(format!(
                "speed.max_speedup must be >= 1.0, got {}",
                self.speed.max_speedup
            )));
        }
        if !(self.timeline.peak_target > 0.0 && self.timeline.peak_target <= 1.0) {
            return Err(SyncTtsError::Configuration(format!(
                "timeline.peak_target must be in (0, 1], got {}",
                self.timeline.peak_target
            )));
        }
        if self.timeline.tail_buffer_secs < 0.0 {
            return Err(SyncTtsError::Configuration("timeline.tail_buffer_secs is negative".to_string()));
        }
        Ok(())
    }

    /// Путь к итоговому аудиофайлу
    pub fn output_audio_path(&self) -> PathBuf {
        self.work_dir.join(&self.timeline.output_file_name)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
