//! Сборка таймлайна
//!
//! Один буфер моно сэмплов на всю дорожку: каждый скорректированный сегмент
//! записывается с позиции `round(start * sample_rate)`, после чего буфер
//! нормализуется по пику.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::config::SyncConfig;
use crate::error::{Result, SyncTtsError};
use crate::media::decode::{decode_audio_file_at, write_wav_mono};
use crate::progress::ProgressTracker;
use crate::store::{ArtifactKey, ArtifactStore};
use crate::subtitle::segment::SegmentList;

/// Буфер таймлайна
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Timeline {
    /// Пустой (тихий) таймлайн заданной длины
    pub fn new(len: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0; len],
            sample_rate,
        }
    }

    /// Таймлайн длиной `round((last.end + tail) * sample_rate)`
    pub fn for_segments(segments: &SegmentList, tail_secs: f64, sample_rate: u32) -> Result<Self> {
        let last_end = segments.last_end().ok_or(SyncTtsError::EmptySegments)?;
        let len = ((last_end + tail_secs) * sample_rate as f64).round() as usize;
        Ok(Self::new(len, sample_rate))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Записать сэмплы с позиции `start` секунд поверх имеющихся.
    ///
    /// Не поместившийся хвост отбрасывается. Возвращает число записанных
    /// сэмплов.
    pub fn place(&mut self, start: f64, samples: &[f32]) -> usize {
        let offset = (start.max(0.0) * self.sample_rate as f64).round() as usize;
        if offset >= self.samples.len() {
            return 0;
        }
        let count = samples.len().min(self.samples.len() - offset);
        self.samples[offset..offset + count].copy_from_slice(&samples[..count]);
        count
    }

    /// Максимальная абсолютная амплитуда
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    /// Масштабировать буфер так, чтобы пик стал `target`; тишина не меняется
    pub fn normalize(&mut self, target: f32) -> f32 {
        let peak = self.peak();
        if peak > 0.0 {
            let gain = target / peak;
            self.samples.iter_mut().for_each(|s| *s *= gain);
        }
        peak
    }

    /// Записать буфер в 16-битный моно WAV
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        write_wav_mono(path, &self.samples, self.sample_rate)
    }
}

/// Итоги сборки
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblySummary {
    pub output_path: PathBuf,
    /// Длина таймлайна в сэмплах
    pub total_samples: usize,
    /// Размещенные сегменты
    pub placed: Vec<usize>,
    /// Сегменты без валидного скорректированного артефакта
    pub skipped: Vec<usize>,
    /// Сегменты, обрезанные концом таймлайна
    pub truncated: Vec<usize>,
    /// Пик до нормализации
    pub peak_before: f32,
}

/// Собрать таймлайн из скорректированных артефактов и записать его.
///
/// Декодирование идет параллельно, размещение выполняется строго по
/// порядку индексов, так что при перекрытии побеждает более поздний сегмент.
pub fn assemble(
    segments: &mut SegmentList,
    store: &ArtifactStore,
    config: &SyncConfig,
    output_path: &Path,
    progress: &ProgressTracker,
) -> Result<AssemblySummary> {
    let sample_rate = config.sample_rate;
    let mut timeline = Timeline::for_segments(segments, config.timeline.tail_buffer_secs, sample_rate)?;

    let decoded: Vec<(usize, Option<Vec<f32>>)> = segments
        .as_slice()
        .par_iter()
        .map(|segment| {
            let key = ArtifactKey::adjusted(segment.index);
            let samples = store
                .find_valid(key)
                .ok_or_else(|| SyncTtsError::MissingArtifact(key.to_string()))
                .and_then(|path| decode_audio_file_at(&path, sample_rate));
            match samples {
                Ok(samples) => (segment.index, Some(samples)),
                Err(e) => {
                    log::warn!("Segment {}: skipped on the timeline: {}", segment.index, e);
                    (segment.index, None)
                }
            }
        })
        .collect();

    let mut placed = Vec::new();
    let mut skipped = Vec::new();
    let mut truncated = Vec::new();
    let total = decoded.len();

    for (done, (segment, (index, samples))) in segments.iter_mut().zip(decoded).enumerate() {
        debug_assert_eq!(segment.index, index);
        match samples {
            Some(samples) => {
                let written = timeline.place(segment.start, &samples);
                if written < samples.len() {
                    truncated.push(index);
                }
                segment.mark_placed();
                placed.push(index);
            }
            None => skipped.push(index),
        }
        progress.update_counts(done + 1, total, None);
    }

    if !truncated.is_empty() {
        log::warn!("{} segment(s) truncated at the end of the timeline: {:?}", truncated.len(), truncated);
    }

    let peak_before = timeline.normalize(config.timeline.peak_target);
    if peak_before == 0.0 {
        log::warn!("Timeline is silent, normalization skipped");
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    timeline.write_wav(output_path)?;

    log::info!(
        "Timeline assembled: {} placed, {} skipped, {:.2}s -> {}",
        placed.len(),
        skipped.len(),
        timeline.len() as f64 / sample_rate as f64,
        output_path.display()
    );

    Ok(AssemblySummary {
        output_path: output_path.to_path_buf(),
        total_samples: timeline.len(),
        placed,
        skipped,
        truncated,
        peak_before,
    })
}
