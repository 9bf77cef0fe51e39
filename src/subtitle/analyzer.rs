//! Модуль для анализа таймингов
//!
//! Сравнивает длительность синтезированного аудио с длительностью слота и
//! формирует отчет о сегментах, текст которых нужно сократить. Текст
//! сегментов здесь не меняется: сокращение выполняет внешний процесс, после
//! чего конвейер запускается заново.

use serde::{Deserialize, Serialize};

use crate::config::TimingConfig;
use crate::error::Result;
use crate::media::audio::AudioToolkit;
use crate::progress::ProgressTracker;
use crate::store::{ArtifactKey, ArtifactStore};
use crate::subtitle::segment::SegmentList;

/// Метрики слотов субтитров
#[derive(Debug, Clone, PartialEq)]
pub struct TimingMetrics {
    /// Средняя длительность слота
    pub avg_duration: f64,
    /// Минимальная длительность слота
    pub min_duration: f64,
    /// Максимальная длительность слота
    pub max_duration: f64,
    /// Средний интервал между слотами (только положительные)
    pub avg_gap: f64,
}

/// Статистика слотов списка сегментов
pub fn slot_metrics(segments: &SegmentList) -> TimingMetrics {
    if segments.is_empty() {
        return TimingMetrics {
            avg_duration: 0.0,
            min_duration: 0.0,
            max_duration: 0.0,
            avg_gap: 0.0,
        };
    }

    let mut total = 0.0;
    let mut min_duration = f64::MAX;
    let mut max_duration: f64 = 0.0;
    for segment in segments {
        let duration = segment.slot_duration();
        total += duration;
        min_duration = min_duration.min(duration);
        max_duration = max_duration.max(duration);
    }

    let gaps: Vec<f64> = segments
        .as_slice()
        .windows(2)
        .map(|pair| pair[1].start - pair[0].end)
        .filter(|gap| *gap > 0.0)
        .collect();
    let avg_gap = if gaps.is_empty() {
        0.0
    } else {
        gaps.iter().sum::<f64>() / gaps.len() as f64
    };

    TimingMetrics {
        avg_duration: total / segments.len() as f64,
        min_duration,
        max_duration,
        avg_gap,
    }
}

/// Запись отчета о таймингах
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingReportEntry {
    pub index: usize,
    pub text: String,
    pub slot_duration: f64,
    pub measured_duration: f64,
    pub ratio: f64,
    /// Рекомендуемая длина текста в процентах от исходной
    pub target_pct: u32,
}

/// Рекомендуемый процент длины текста: `max(round(scale / ratio), floor)`
pub fn target_pct(ratio: f64, config: &TimingConfig) -> u32 {
    if !(ratio > 0.0) {
        return 100;
    }
    let pct = (config.target_pct_scale / ratio).round();
    (pct.max(0.0) as u32).max(config.min_target_pct)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Построить отчет по уже измеренным сегментам.
///
/// В отчет попадают сегменты с отношением выше порога; результат
/// отсортирован по убыванию отношения, исходный список не меняется.
pub fn build_report(segments: &SegmentList, config: &TimingConfig) -> Vec<TimingReportEntry> {
    let mut flagged: Vec<(f64, TimingReportEntry)> = segments
        .iter()
        .filter_map(|segment| {
            let ratio = segment.ratio?;
            let measured = segment.measured_duration?;
            if ratio <= config.max_natural_ratio {
                return None;
            }
            let entry = TimingReportEntry {
                index: segment.index,
                text: segment.text.clone(),
                slot_duration: round2(segment.slot_duration()),
                measured_duration: round2(measured),
                ratio: round2(ratio),
                target_pct: target_pct(ratio, config),
            };
            Some((ratio, entry))
        })
        .collect();

    // Сортировка по точному отношению: округленные значения могут совпадать
    flagged.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.index.cmp(&b.1.index)));
    flagged.into_iter().map(|(_, entry)| entry).collect()
}

/// Измерить синтезированные артефакты и построить отчет.
///
/// Заполняет `measured_duration` и `ratio` у сегментов с валидным исходным
/// артефактом и слотом длиннее порога. Ошибка измерения не прерывает
/// анализ: у сегмента просто не будет отношения.
pub async fn analyze_timing(
    segments: &mut SegmentList,
    store: &ArtifactStore,
    toolkit: &dyn AudioToolkit,
    config: &TimingConfig,
    progress: &ProgressTracker,
) -> Vec<TimingReportEntry> {
    let total = segments.len();

    for (done, segment) in segments.iter_mut().enumerate() {
        segment.measured_duration = None;
        segment.ratio = None;

        if let Some(path) = store.find_valid(ArtifactKey::raw(segment.index)) {
            if segment.slot_duration() > config.min_slot_secs {
                match toolkit.probe_duration(&path).await {
                    Ok(actual) => {
                        segment.measured_duration = Some(actual);
                        segment.ratio = Some(actual / segment.slot_duration());
                    }
                    Err(e) => log::warn!("Segment {}: duration probe failed: {}", segment.index, e),
                }
            }
        }

        progress.update_counts(done + 1, total, None);
    }

    let report = build_report(segments, config);
    if report.is_empty() {
        log::info!("All segments fit their slots");
    } else {
        log::info!(
            "{} segment(s) exceed {:.1}x of their slot and need condensation",
            report.len(),
            config.max_natural_ratio
        );
        for entry in report.iter().take(5) {
            log::info!(
                "  #{}: {:.2}s audio in {:.2}s slot (ratio {:.2}, target {}%)",
                entry.index,
                entry.measured_duration,
                entry.slot_duration,
                entry.ratio,
                entry.target_pct
            );
        }
    }
    report
}

/// Записать отчет в JSON (пустой массив, если сокращать нечего)
pub fn write_timing_report(path: impl AsRef<std::path::Path>, report: &[TimingReportEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
