//! # Audio Decoding
//!
//! Чтение аудиофайлов в моно PCM (f32), ресемплинг и запись WAV.
//!
//! - WAV читается напрямую через `hound`
//! - MP3 и прочие форматы декодируются через `symphonia`
//! - Многоканальное аудио сводится в моно усреднением каналов
//! - Несовпадающая частота дискретизации приводится к целевой через `rubato`

use std::fs::File;
use std::path::Path;

use dasp::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, SyncTtsError};

/// Декодированное моно аудио
#[derive(Debug, Clone, PartialEq)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Прочитать аудиофайл в моно; формат определяется по расширению
pub fn decode_audio_file<P: AsRef<Path>>(path: P) -> Result<MonoAudio> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "wav" => decode_wav_file(path),
        _ => decode_with_symphonia(path, &extension),
    }
}

/// Прочитать файл и привести к заданной частоте дискретизации
pub fn decode_audio_file_at<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Vec<f32>> {
    let audio = decode_audio_file(path)?;
    resample(&audio.samples, audio.sample_rate, sample_rate)
}

fn decode_wav_file(path: &Path) -> Result<MonoAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits) if bits <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v.to_sample::<f32>()))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, bits) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(MonoAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(path: &Path, extension: &str) -> Result<MonoAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if !extension.is_empty() {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SyncTtsError::AudioProcessing(format!("Failed to detect audio format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SyncTtsError::AudioProcessing(format!("No audio track in {}", path.display())))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SyncTtsError::AudioProcessing(format!("Failed to create decoder: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(SyncTtsError::AudioProcessing(format!("Failed to read packet: {}", e)));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                let channels = spec.channels.count().max(1);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), channels));
            }
            // Битый пакет пропускаем, остальное декодируем
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(SyncTtsError::AudioProcessing(format!("Decoding failed: {}", e)));
            }
        }
    }

    if sample_rate == 0 {
        return Err(SyncTtsError::AudioProcessing(format!(
            "Unknown sample rate in {}",
            path.display()
        )));
    }

    Ok(MonoAudio { samples, sample_rate })
}

/// Свести чередующиеся каналы в моно усреднением
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Ресемплинг моно сигнала
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(SyncTtsError::AudioProcessing("Sample rate must be positive".to_string()));
    }

    let expected_len =
        (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;

    let mut resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, 1024, 2, 1)
        .map_err(|e| SyncTtsError::AudioProcessing(format!("Failed to create resampler: {}", e)))?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected_len + delay + 1024);
    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let frames = resampler.input_frames_next();
        let chunk = resampler
            .process(&[&input[pos..pos + frames]], None)
            .map_err(|e| SyncTtsError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&chunk[0]);
        pos += frames;
    }
    if pos < input.len() {
        let tail: [&[f32]; 1] = [&input[pos..]];
        let chunk = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| SyncTtsError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&chunk[0]);
    }
    // Выталкиваем задержку фильтра
    while output.len() < expected_len + delay {
        let chunk = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| SyncTtsError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        if chunk[0].is_empty() {
            break;
        }
        output.extend_from_slice(&chunk[0]);
    }

    let mut output: Vec<f32> = output.into_iter().skip(delay).collect();
    output.resize(expected_len, 0.0);
    Ok(output)
}

/// Записать моно сигнал в 16-битный WAV
pub fn write_wav_mono<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample.clamp(-1.0, 1.0).to_sample::<i16>())?;
    }
    writer.finalize()?;
    Ok(())
}

/// Записать тишину заданной длительности
pub fn write_silence<P: AsRef<Path>>(path: P, duration_secs: f64, sample_rate: u32) -> Result<usize> {
    let len = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
    write_wav_mono(path, &vec![0.0; len], sample_rate)?;
    Ok(len)
}
