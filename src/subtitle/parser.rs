//! Модуль для чтения и записи субтитров
//!
//! Граница с внешним миром: превращает SRT/VTT файлы в список сегментов и
//! записывает сокращенный текст обратно в SRT.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, SyncTtsError};
use crate::subtitle::segment::{Segment, SegmentList};

lazy_static! {
    static ref TIMING_REGEX: Regex =
        Regex::new(r"^\s*(\S+)\s*-->\s*(\S+)").unwrap();
}

/// Прочитать файл субтитров; формат определяется по расширению
pub fn parse_subtitle_file<P: AsRef<Path>>(path: P) -> Result<SegmentList> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| SyncTtsError::FileNotFound(format!("Failed to open subtitles {}: {}", path.display(), e)))?;

    let is_vtt = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("vtt"))
        .unwrap_or(false);

    if is_vtt {
        parse_vtt_str(&content)
    } else {
        parse_srt_str(&content)
    }
}

/// Парсинг SRT: блоки разделены пустой строкой, вторая строка блока содержит тайминг
pub fn parse_srt_str(content: &str) -> Result<SegmentList> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut segments = Vec::new();

    // Индекс берется по позиции блока, чтобы пропущенный блок не сдвигал
    // нумерацию остальных реплик
    for (position, block) in split_blocks(&content).into_iter().enumerate() {
        if block.len() < 2 {
            continue;
        }
        // Номер реплики может отсутствовать, поэтому ищем строку тайминга
        let Some(timing_pos) = block.iter().position(|line| line.contains("-->")) else {
            continue;
        };
        let Some((start, end)) = parse_timing_line(block[timing_pos]) else {
            log::warn!("Skipping subtitle block with malformed timing: {}", block[timing_pos]);
            continue;
        };
        let text = block[timing_pos + 1..].join("\n").trim().to_string();
        segments.push(Segment::new(position, text, start, end));
    }

    SegmentList::new(segments)
}

/// Парсинг WebVTT
pub fn parse_vtt_str(content: &str) -> Result<SegmentList> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    if !content.trim_start().starts_with("WEBVTT") {
        return Err(SyncTtsError::SubtitleParsing(
            "Invalid VTT file format: missing WEBVTT header".to_string(),
        ));
    }

    let mut segments = Vec::new();
    // Заголовок и блоки NOTE/STYLE не являются репликами и не нумеруются
    let cues = split_blocks(&content).into_iter().filter_map(|block| {
        let timing_pos = block.iter().position(|line| line.contains("-->"))?;
        Some((block, timing_pos))
    });
    for (position, (block, timing_pos)) in cues.enumerate() {
        let Some((start, end)) = parse_timing_line(block[timing_pos]) else {
            log::warn!("Skipping cue with malformed timing: {}", block[timing_pos]);
            continue;
        };
        let text = block[timing_pos + 1..]
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<&str>>()
            .join(" ");
        segments.push(Segment::new(position, text, start, end));
    }

    SegmentList::new(segments)
}

/// Записать сегменты в SRT (нумерация с единицы)
pub fn write_srt<P: AsRef<Path>>(path: P, segments: &SegmentList) -> Result<()> {
    let blocks: Vec<String> = segments
        .iter()
        .map(|seg| {
            format!(
                "{}\n{} --> {}\n{}",
                seg.index + 1,
                format_srt_timestamp(seg.start),
                format_srt_timestamp(seg.end),
                seg.text
            )
        })
        .collect();

    std::fs::write(path, blocks.join("\n\n") + "\n")?;
    Ok(())
}

/// Форматирование времени в `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, ms)
}

fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let caps = TIMING_REGEX.captures(line)?;
    let start = parse_timestamp(caps.get(1)?.as_str())?;
    let end = parse_timestamp(caps.get(2)?.as_str())?;
    Some((start, end))
}

/// Парсинг времени `HH:MM:SS,mmm`, `HH:MM:SS.mmm` или `MM:SS.mmm`
pub fn parse_timestamp(time_str: &str) -> Option<f64> {
    let normalized = time_str.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };

    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    let whole = whole.parse::<u64>().ok()?;
    let millis = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<u64>().ok()? * 100,
        2 => fraction.parse::<u64>().ok()? * 10,
        3 => fraction.parse::<u64>().ok()?,
        n => fraction.parse::<u64>().ok()? / 10_u64.pow(n as u32 - 3),
    };

    let total_ms = hours * 3_600_000 + minutes * 60_000 + whole * 1000 + millis;
    Some(total_ms as f64 / 1000.0)
}
