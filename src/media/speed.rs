//! Коррекция темпа
//!
//! Каждый сегмент подгоняется под свой слот одним проходом `atempo`.
//! Замедление запрещено: короткое аудио звучит в естественном темпе, а
//! остаток слота остается тишиной таймлайна. Ускорение ограничено сверху,
//! поэтому сильно переполненный сегмент может не уместиться в слот.

use crate::config::{SpeedConfig, SyncConfig};
use crate::error::Result;
use crate::media::audio::AudioToolkit;
use crate::media::decode::write_silence;
use crate::progress::ProgressTracker;
use crate::store::{ArtifactKey, ArtifactStore};
use crate::subtitle::segment::{Segment, SegmentList};

/// Что сделать с сегментом
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TempoPlan {
    /// Записать тишину указанной длительности
    Silence(f64),
    /// Только привести формат
    Convert,
    /// Ускорить в указанное число раз
    Tempo(f64),
}

/// Выбрать действие по длительности слота и измеренной длительности.
///
/// `actual = None` означает отсутствующий артефакт или неудачное измерение.
pub fn plan_tempo(slot: f64, actual: Option<f64>, config: &SpeedConfig) -> TempoPlan {
    let Some(actual) = actual else {
        return TempoPlan::Silence(slot.max(config.silence_floor_secs));
    };
    if slot <= config.min_slot_secs {
        return TempoPlan::Convert;
    }

    let ratio = (actual / slot).clamp(1.0, config.max_speedup);
    if (ratio - 1.0).abs() <= config.unity_tolerance {
        TempoPlan::Convert
    } else {
        TempoPlan::Tempo(ratio)
    }
}

/// Итоги коррекции темпа
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedSummary {
    /// Сегменты, которые только конвертированы
    pub converted: Vec<usize>,
    /// Сегменты с примененным фильтром темпа
    pub tempo_adjusted: Vec<usize>,
    /// Сегменты, замененные тишиной
    pub silenced: Vec<usize>,
    /// Сегменты с уже готовым артефактом
    pub reused: Vec<usize>,
}

/// Скорректировать все сегменты.
///
/// Каждый сегмент в итоге получает скорректированный артефакт: при любой
/// посегментной ошибке подставляется тишина. Ошибкой завершается только
/// невозможность записать саму тишину.
pub async fn adjust_all(
    segments: &mut SegmentList,
    store: &ArtifactStore,
    toolkit: &dyn AudioToolkit,
    config: &SyncConfig,
    progress: &ProgressTracker,
) -> Result<SpeedSummary> {
    let mut summary = SpeedSummary::default();
    let total = segments.len();

    for (done, segment) in segments.iter_mut().enumerate() {
        adjust_segment(segment, store, toolkit, config, &mut summary).await?;
        progress.update_counts(done + 1, total, None);
    }

    log::info!(
        "Speed correction: {} converted, {} tempo-adjusted, {} silenced, {} reused",
        summary.converted.len(),
        summary.tempo_adjusted.len(),
        summary.silenced.len(),
        summary.reused.len()
    );
    Ok(summary)
}

async fn adjust_segment(
    segment: &mut Segment,
    store: &ArtifactStore,
    toolkit: &dyn AudioToolkit,
    config: &SyncConfig,
    summary: &mut SpeedSummary,
) -> Result<()> {
    let key = ArtifactKey::adjusted(segment.index);
    if let Some(path) = store.find_valid(key) {
        segment.mark_adjusted(path);
        summary.reused.push(segment.index);
        return Ok(());
    }

    let slot = segment.slot_duration();
    let raw = store.find_valid(ArtifactKey::raw(segment.index));
    let actual = match (&raw, segment.measured_duration) {
        (None, _) => None,
        (Some(_), Some(measured)) => Some(measured),
        (Some(path), None) => match toolkit.probe_duration(path).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                log::warn!("Segment {}: duration probe failed, using silence: {}", segment.index, e);
                None
            }
        },
    };

    let plan = plan_tempo(slot, actual, &config.speed);
    let staging = store.staging_path(key, "wav");

    let transcoded = match (plan, &raw) {
        (TempoPlan::Convert, Some(raw)) => toolkit.transcode(raw, &staging, None).await.map(|_| plan),
        (TempoPlan::Tempo(ratio), Some(raw)) => {
            log::debug!("Segment {}: atempo {:.3}", segment.index, ratio);
            toolkit.transcode(raw, &staging, Some(ratio)).await.map(|_| plan)
        }
        _ => Ok(plan),
    };

    let plan = match transcoded {
        Ok(plan) => plan,
        Err(e) => {
            log::warn!("Segment {}: transcoding failed, using silence: {}", segment.index, e);
            let _ = std::fs::remove_file(&staging);
            TempoPlan::Silence(slot.max(config.speed.silence_floor_secs))
        }
    };

    if let TempoPlan::Silence(secs) = plan {
        write_silence(&staging, secs, config.sample_rate)?;
    }
    let path = store.commit(key, "wav", &staging)?;
    segment.mark_adjusted(path);

    match plan {
        TempoPlan::Silence(_) => summary.silenced.push(segment.index),
        TempoPlan::Convert => summary.converted.push(segment.index),
        TempoPlan::Tempo(_) => summary.tempo_adjusted.push(segment.index),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_slows_down() {
        let config = SpeedConfig::default();
        assert_eq!(plan_tempo(2.0, Some(1.0), &config), TempoPlan::Convert);
    }

    #[test]
    fn test_caps_speedup() {
        let config = SpeedConfig::default();
        assert_eq!(plan_tempo(1.0, Some(3.0), &config), TempoPlan::Tempo(2.0));
        assert_eq!(plan_tempo(2.0, Some(3.0), &config), TempoPlan::Tempo(1.5));
    }

    #[test]
    fn test_near_unity_is_converted() {
        let config = SpeedConfig::default();
        assert_eq!(plan_tempo(1.0, Some(1.01), &config), TempoPlan::Convert);
        assert_eq!(plan_tempo(1.0, Some(1.05), &config), TempoPlan::Tempo(1.05));
    }

    #[test]
    fn test_short_slot_passthrough() {
        let config = SpeedConfig::default();
        assert_eq!(plan_tempo(0.05, Some(1.0), &config), TempoPlan::Convert);
        assert_eq!(plan_tempo(0.0, Some(1.0), &config), TempoPlan::Convert);
    }

    #[test]
    fn test_missing_audio_becomes_silence() {
        let config = SpeedConfig::default();
        assert_eq!(plan_tempo(1.5, None, &config), TempoPlan::Silence(1.5));
        assert_eq!(plan_tempo(0.02, None, &config), TempoPlan::Silence(0.1));
    }
}
