//! Тестовые движок и аудиоинструмент без внешних зависимостей

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::config::{EngineKind, SyncConfig, VoiceGender, DEFAULT_SAMPLE_RATE};
use crate::error::{Result, SyncTtsError};
use crate::media::audio::AudioToolkit;
use crate::media::decode::{decode_audio_file, resample, write_wav_mono};
use crate::tts::{DispatchMode, SpeechEngine};

/// WAV с синусом заданной длительности, амплитуда 0.5
pub fn tone_wav(duration_secs: f64, sample_rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let len = (duration_secs * sample_rate as f64).round() as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..len {
            let t = i as f64 / sample_rate as f64;
            let sample = (t * 440.0 * std::f64::consts::TAU).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Движок, синтезирующий тон длительности, заданной по тексту
pub struct MockEngine {
    kind: EngineKind,
    available: bool,
    mode: DispatchMode,
    default_duration: f64,
    durations: HashMap<String, f64>,
    failing_texts: HashMap<String, bool>,
    truncated_texts: HashMap<String, bool>,
    scripted: Mutex<VecDeque<SyncTtsError>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    voices: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn networked() -> Self {
        Self::new(
            EngineKind::Networked,
            DispatchMode::Concurrent {
                max_in_flight: 4,
                retry_delay: Duration::from_millis(10),
            },
        )
    }

    pub fn local(available: bool) -> Self {
        let mut engine = Self::new(EngineKind::Local, DispatchMode::Sequential);
        engine.available = available;
        engine
    }

    pub fn cloning(available: bool) -> Self {
        let mut engine = Self::new(EngineKind::Cloning, DispatchMode::Sequential);
        engine.available = available;
        engine
    }

    fn new(kind: EngineKind, mode: DispatchMode) -> Self {
        Self {
            kind,
            available: true,
            mode,
            default_duration: 1.0,
            durations: HashMap::new(),
            failing_texts: HashMap::new(),
            truncated_texts: HashMap::new(),
            scripted: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_duration(mut self, secs: f64) -> Self {
        self.default_duration = secs;
        self
    }

    pub fn with_duration(mut self, text: &str, secs: f64) -> Self {
        self.durations.insert(text.to_string(), secs);
        self
    }

    /// Текст, синтез которого всегда завершается постоянной ошибкой
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string(), true);
        self
    }

    /// Текст, для которого движок "успешно" возвращает обрезанный ответ
    pub fn truncated_on(mut self, text: &str) -> Self {
        self.truncated_texts.insert(text.to_string(), true);
        self
    }

    /// Ошибки, которые вернут первые вызовы по порядку
    pub fn with_scripted_failures(self, errors: Vec<SyncTtsError>) -> Self {
        self.scripted.lock().extend(errors);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_concurrency(mut self, max_in_flight: usize) -> Self {
        self.mode = DispatchMode::Concurrent {
            max_in_flight,
            retry_delay: Duration::from_millis(10),
        };
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().clone()
    }
}

#[async_trait]
impl SpeechEngine for MockEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn dispatch_mode(&self) -> DispatchMode {
        self.mode
    }

    fn artifact_extension(&self) -> &'static str {
        "wav"
    }

    fn default_voice(&self, target_lang: &str, _gender: Option<VoiceGender>) -> Option<String> {
        match self.kind {
            EngineKind::Cloning => None,
            _ => Some(format!("mock-{}-{}", self.kind, target_lang)),
        }
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.voices.lock().push(voice.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.scripted.lock().pop_front() {
            return Err(error);
        }
        if self.failing_texts.contains_key(text) {
            return Err(SyncTtsError::PermanentSynthesis(format!("refused: {}", text)));
        }

        if self.truncated_texts.contains_key(text) {
            return Ok(Bytes::from_static(b"RIFF"));
        }

        let duration = self.durations.get(text).copied().unwrap_or(self.default_duration);
        Ok(Bytes::from(tone_wav(duration, DEFAULT_SAMPLE_RATE)))
    }
}

/// Аудиоинструмент на hound: темп меняется прореживанием сэмплов
#[derive(Default)]
pub struct MockToolkit {
    sample_rate: u32,
    tempo_calls: Mutex<Vec<(PathBuf, Option<f64>)>>,
    probes: AtomicUsize,
}

impl MockToolkit {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    pub fn tempo_calls(&self) -> Vec<(PathBuf, Option<f64>)> {
        self.tempo_calls.lock().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioToolkit for MockToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let audio = decode_audio_file(path).map_err(|e| SyncTtsError::Probe(e.to_string()))?;
        Ok(audio.duration_secs())
    }

    async fn transcode(&self, input: &Path, output: &Path, tempo: Option<f64>) -> Result<()> {
        self.tempo_calls.lock().push((input.to_path_buf(), tempo));

        let audio = decode_audio_file(input)?;
        let samples = resample(&audio.samples, audio.sample_rate, self.sample_rate)?;
        let samples = match tempo {
            Some(factor) => {
                let len = (samples.len() as f64 / factor).round() as usize;
                (0..len)
                    .map(|i| samples[((i as f64 * factor) as usize).min(samples.len() - 1)])
                    .collect()
            }
            None => samples,
        };
        write_wav_mono(output, &samples, self.sample_rate)
    }
}

/// Конфигурация для тестов в указанной директории
pub fn test_config(work_dir: &Path) -> SyncConfig {
    SyncConfig::with_work_dir(work_dir)
}

/// Число сэмплов WAV файла
pub fn wav_len(path: &Path) -> usize {
    decode_audio_file(path).unwrap().samples.len()
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
