//! Модуль для работы с аудио
//!
//! Граница с внешними инструментами: измерение длительности и изменение
//! темпа. Конвейер работает только через трейт `AudioToolkit`, поэтому в
//! тестах ffmpeg заменяется реализацией на чистом Rust.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::error::{Result, SyncTtsError};
use crate::utils::ffmpeg::{run_ffmpeg_command, run_ffprobe_command};

/// Внешние возможности обработки аудио
#[async_trait]
pub trait AudioToolkit: Send + Sync {
    /// Длительность аудиофайла в секундах
    async fn probe_duration(&self, path: &Path) -> Result<f64>;

    /// Привести файл к моно с частотой таймлайна; при `tempo = Some(r)`
    /// дополнительно ускорить в `r` раз без изменения высоты тона
    async fn transcode(&self, input: &Path, output: &Path, tempo: Option<f64>) -> Result<()>;
}

/// Реализация поверх ffmpeg/ffprobe
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    sample_rate: u32,
    timeout: Duration,
}

impl FfmpegToolkit {
    pub fn new(sample_rate: u32, timeout: Duration) -> Self {
        Self { sample_rate, timeout }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.sample_rate, Duration::from_secs(config.tool_timeout_secs))
    }
}

#[async_trait]
impl AudioToolkit for FfmpegToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().to_string(),
        ];

        let stdout = run_ffprobe_command(&args, self.timeout)
            .await
            .map_err(|e| SyncTtsError::Probe(format!("{}: {}", path.display(), e)))?;

        parse_duration(&stdout)
            .ok_or_else(|| SyncTtsError::Probe(format!("Failed to parse audio duration: {}", stdout.trim())))
    }

    async fn transcode(&self, input: &Path, output: &Path, tempo: Option<f64>) -> Result<()> {
        let args = transcode_args(input, output, self.sample_rate, tempo);
        run_ffmpeg_command(&args, self.timeout).await
    }
}

/// Аргументы ffmpeg для конвертации с необязательным фильтром темпа
pub fn transcode_args(input: &Path, output: &Path, sample_rate: u32, tempo: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
    ];
    if let Some(factor) = tempo {
        args.push("-filter:a".to_string());
        args.push(format!("atempo={:.6}", factor));
    }
    args.extend([
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        "1".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

fn parse_duration(stdout: &str) -> Option<f64> {
    let value = stdout.lines().find(|l| !l.trim().is_empty())?.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}
