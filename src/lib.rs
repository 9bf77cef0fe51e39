//! Основной файл библиотеки sync-tts
//!
//! Превращает список таймкодированных сегментов в одну дорожку синтезированной
//! речи, в которой каждый сегмент звучит в своем слоте. Конвейер состоит из
//! четырех этапов, каждый из которых начинается только после завершения
//! предыдущего для всех сегментов:
//!
//! 1. синтез речи выбранным движком с переходом на запасной;
//! 2. анализ таймингов и отчет о сегментах, которые нужно сократить;
//! 3. коррекция темпа под слот;
//! 4. сборка таймлайна с нормализацией по пику.
//!
//! Все промежуточные результаты лежат в рабочей директории, поэтому
//! прерванный запуск продолжается с места остановки.

pub mod config;
pub mod error;
pub mod media;
pub mod notification;
pub mod progress;
pub mod store;
pub mod subtitle;
pub mod tts;
pub mod utils;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::media::audio::{AudioToolkit, FfmpegToolkit};
use crate::media::speed::{adjust_all, SpeedSummary};
use crate::media::timeline::{assemble, AssemblySummary};
use crate::progress::{ProcessStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::store::Stage;
use crate::subtitle::analyzer::{analyze_timing, slot_metrics, write_timing_report, TimingReportEntry};
use crate::tts::generator::{generate_all, GenerationSummary};

pub use crate::config::{EngineKind, SyncConfig, VoiceGender};
pub use crate::error::{Result, SyncTtsError};
pub use crate::store::ArtifactStore;
pub use crate::subtitle::segment::{Segment, SegmentList, SegmentState};
pub use crate::tts::{EngineSet, SpeechEngine, VoiceRequest};

/// Параметры одного запуска
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    /// Запрошенный движок
    pub engine: EngineKind,
    /// Голос, профиль, язык и пол
    pub voice: VoiceRequest,
    /// Итоговый файл; по умолчанию `combined.wav` в рабочей директории
    pub output: Option<PathBuf>,
}

impl SyncRequest {
    pub fn new(engine: EngineKind, target_lang: impl Into<String>) -> Self {
        Self {
            engine,
            voice: VoiceRequest {
                target_lang: target_lang.into(),
                ..VoiceRequest::default()
            },
            output: None,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice.voice = Some(voice.into());
        self
    }

    pub fn with_voice_profile(mut self, profile: impl Into<String>) -> Self {
        self.voice.voice_profile = Some(profile.into());
        self
    }

    pub fn with_gender(mut self, gender: VoiceGender) -> Self {
        self.voice.gender = Some(gender);
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Итоги запуска
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Фактически использованный движок
    pub engine: EngineKind,
    /// Был ли переход на запасной движок
    pub fell_back: bool,
    pub generation: GenerationSummary,
    /// Сегменты, которые стоит сократить (по убыванию отношения)
    pub timing_report: Vec<TimingReportEntry>,
    pub speed: SpeedSummary,
    pub assembly: AssemblySummary,
    /// Сегменты, текст которых изменился с прошлого запуска
    pub regenerated: Vec<usize>,
    pub timing_report_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl SyncReport {
    /// Сегменты без синтезированного аудио (заменены тишиной)
    pub fn missing(&self) -> &[usize] {
        &self.generation.missing
    }

    pub fn output_path(&self) -> &Path {
        &self.assembly.output_path
    }
}

/// Основная структура для работы с библиотекой
pub struct SyncTts {
    config: SyncConfig,
    store: ArtifactStore,
    engines: EngineSet,
    toolkit: Arc<dyn AudioToolkit>,
    progress: ProgressTracker,
}

impl SyncTts {
    /// Конвейер с движками из конфигурации и ffmpeg в качестве аудиоинструмента
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let engines = EngineSet::from_config(&config)?;
        let toolkit = Arc::new(FfmpegToolkit::from_config(&config));
        Self::with_components(config, engines, toolkit)
    }

    /// Конвейер с явно заданными движками и аудиоинструментом
    pub fn with_components(config: SyncConfig, engines: EngineSet, toolkit: Arc<dyn AudioToolkit>) -> Result<Self> {
        config.validate()?;
        let store = ArtifactStore::from_config(&config)?;
        Ok(Self {
            config,
            store,
            engines,
            toolkit,
            progress: ProgressTracker::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn set_progress_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.progress.set_reporter(reporter);
    }

    /// Добавить наблюдателя прогресса
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        self.progress.add_observer(observer)
    }

    /// Удалить артефакты сегментов, чтобы следующий запуск сгенерировал их заново
    pub fn invalidate(&self, indices: &[usize]) -> Result<()> {
        for &index in indices {
            self.store.invalidate(index)?;
        }
        Ok(())
    }

    /// Выполнить все четыре этапа
    pub async fn process(&self, segments: &mut SegmentList, request: &SyncRequest) -> Result<SyncReport> {
        if segments.is_empty() {
            log::error!("No segments to synthesize");
            return Err(SyncTtsError::EmptySegments);
        }

        let metrics = slot_metrics(segments);
        log::info!(
            "{} segments, slot avg {:.2}s (min {:.2}s, max {:.2}s), avg gap {:.2}s",
            segments.len(),
            metrics.avg_duration,
            metrics.min_duration,
            metrics.max_duration,
            metrics.avg_gap
        );

        let regenerated = self.invalidate_changed(segments)?;
        let resumable = self.store.valid_indices(Stage::Raw).len();
        if resumable > 0 {
            log::info!(
                "Resuming: {} raw and {} adjusted artifact(s) already in {}",
                resumable,
                self.store.valid_indices(Stage::Adjusted).len(),
                self.store.root().display()
            );
        }
        let resolved = self.engines.resolve(request.engine, &request.voice)?;
        if resolved.fell_back() {
            log::warn!("Using {} instead of {}", resolved.kind(), request.engine);
        }

        // 1. Синтез
        self.progress.set_step(ProcessStep::SpeechGeneration);
        let generation = generate_all(segments, &self.store, &resolved, &self.config, &self.progress).await?;

        // 2. Анализ таймингов
        self.progress.set_step(ProcessStep::TimingAnalysis);
        let timing_report = analyze_timing(
            segments,
            &self.store,
            self.toolkit.as_ref(),
            &self.config.timing,
            &self.progress,
        )
        .await;
        let timing_report_path = self.store.timing_report_path();
        write_timing_report(&timing_report_path, &timing_report)?;

        // 3. Коррекция темпа
        self.progress.set_step(ProcessStep::SpeedAdjustment);
        let speed = adjust_all(segments, &self.store, self.toolkit.as_ref(), &self.config, &self.progress).await?;

        // 4. Сборка
        self.progress.set_step(ProcessStep::TimelineAssembly);
        let output_path = request
            .output
            .clone()
            .unwrap_or_else(|| self.config.output_audio_path());
        let assembly = assemble(segments, &self.store, &self.config, &output_path, &self.progress)?;
        let unplaced = segments.indices_in_state(SegmentState::Adjusted);
        if !unplaced.is_empty() {
            log::warn!("{} segment(s) could not be placed on the timeline: {:?}", unplaced.len(), unplaced);
        }

        let manifest_path = self.store.manifest_path();
        segments.save_manifest(&manifest_path)?;
        self.progress.complete();

        if !generation.missing.is_empty() {
            log::warn!(
                "{} segment(s) were replaced with silence: {:?}",
                generation.missing.len(),
                generation.missing
            );
        }

        Ok(SyncReport {
            engine: resolved.kind(),
            fell_back: resolved.fell_back(),
            generation,
            timing_report,
            speed,
            assembly,
            regenerated,
            timing_report_path,
            manifest_path,
        })
    }

    /// Сравнить тексты с манифестом прошлого запуска и удалить артефакты
    /// изменившихся сегментов
    fn invalidate_changed(&self, segments: &mut SegmentList) -> Result<Vec<usize>> {
        let manifest_path = self.store.manifest_path();
        if !manifest_path.exists() {
            return Ok(Vec::new());
        }

        let previous = match SegmentList::load_manifest(&manifest_path) {
            Ok(previous) => previous,
            Err(e) => {
                log::warn!("Ignoring unreadable manifest {}: {}", manifest_path.display(), e);
                return Ok(Vec::new());
            }
        };

        let changed = segments.changed_since(&previous);
        if !changed.is_empty() {
            log::info!("{} segment(s) changed since the last run: {:?}", changed.len(), changed);
            self.invalidate(&changed)?;
            for &index in &changed {
                if let Some(segment) = segments.get_mut(index) {
                    segment.reset();
                }
            }
        }
        Ok(changed)
    }
}

/// Прочитать субтитры и выполнить полный конвейер с настройками по умолчанию
pub async fn synchronize_srt(
    subtitle_path: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    request: &SyncRequest,
) -> Result<SyncReport> {
    let mut segments = subtitle::parser::parse_subtitle_file(subtitle_path)?;
    let sync = SyncTts::new(SyncConfig::with_work_dir(work_dir))?;
    sync.process(&mut segments, request).await
}
