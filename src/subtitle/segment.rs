//! Модель сегментов
//!
//! Упорядоченный список таймкодированных реплик. Порядок по `index`
//! сохраняется на всех этапах конвейера; сортировка выполняется только
//! над копиями при построении отчетов.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncTtsError};

lazy_static! {
    static ref TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Состояние сегмента в конвейере
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Еще не синтезирован
    #[default]
    Pending,
    /// Есть исходный артефакт
    Synthesized,
    /// Синтез не удался
    Missing,
    /// Есть скорректированный артефакт
    Adjusted,
    /// Размещен на таймлайне
    Placed,
}

/// Один сегмент субтитров
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    /// Порядковый номер (с нуля)
    pub index: usize,
    /// Текст для озвучивания
    pub text: String,
    /// Начало в секундах
    pub start: f64,
    /// Конец в секундах
    pub end: f64,
    /// Длительность слота в секундах
    pub duration: f64,
    /// Исходный синтезированный артефакт
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_audio: Option<PathBuf>,
    /// Скорректированный по темпу артефакт
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_audio: Option<PathBuf>,
    /// Измеренная длительность синтезированного аудио
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_duration: Option<f64>,
    /// Отношение измеренной длительности к слоту
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    /// Состояние в конвейере
    #[serde(default)]
    pub state: SegmentState,
}

impl Segment {
    /// Создать новый сегмент
    pub fn new(index: usize, text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            index,
            text: text.into(),
            start,
            end,
            duration: end - start,
            raw_audio: None,
            adjusted_audio: None,
            measured_duration: None,
            ratio: None,
            state: SegmentState::Pending,
        }
    }

    /// Длительность слота
    pub fn slot_duration(&self) -> f64 {
        self.end - self.start
    }

    /// Текст, готовый к отправке в движок синтеза.
    ///
    /// Удаляет теги разметки, раскрывает HTML-сущности и схлопывает пробелы.
    /// Пустой текст заменяется `filler`.
    pub fn speakable_text(&self, filler: &str) -> String {
        let text = TAG_REGEX.replace_all(&self.text, "");
        let text = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
            .replace("&quot;", "\"")
            .replace("&apos;", "'");
        let text = text.split_whitespace().collect::<Vec<&str>>().join(" ");

        if text.is_empty() {
            filler.to_string()
        } else {
            text
        }
    }

    pub(crate) fn mark_synthesized(&mut self, path: PathBuf) {
        self.raw_audio = Some(path);
        self.state = SegmentState::Synthesized;
    }

    pub(crate) fn mark_missing(&mut self) {
        self.raw_audio = None;
        self.measured_duration = None;
        self.ratio = None;
        self.state = SegmentState::Missing;
    }

    pub(crate) fn mark_adjusted(&mut self, path: PathBuf) {
        self.adjusted_audio = Some(path);
        self.state = SegmentState::Adjusted;
    }

    pub(crate) fn mark_placed(&mut self) {
        self.state = SegmentState::Placed;
    }

    pub(crate) fn reset(&mut self) {
        self.raw_audio = None;
        self.adjusted_audio = None;
        self.measured_duration = None;
        self.ratio = None;
        self.state = SegmentState::Pending;
    }
}

/// Упорядоченный список сегментов
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct SegmentList {
    segments: Vec<Segment>,
}

impl SegmentList {
    /// Создать список с проверкой инвариантов: `start >= 0`, `end >= start`,
    /// неубывающий `index`
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        let mut previous: Option<usize> = None;
        for segment in &segments {
            if !(segment.start >= 0.0) {
                return Err(SyncTtsError::InvalidSegments(format!(
                    "segment {} starts before zero ({})",
                    segment.index, segment.start
                )));
            }
            if segment.end < segment.start {
                return Err(SyncTtsError::InvalidSegments(format!(
                    "segment {} ends before it starts ({} < {})",
                    segment.index, segment.end, segment.start
                )));
            }
            if let Some(prev) = previous {
                if segment.index <= prev {
                    return Err(SyncTtsError::InvalidSegments(format!(
                        "segment index {} follows {}",
                        segment.index, prev
                    )));
                }
            }
            previous = Some(segment.index);
        }
        Ok(Self { segments })
    }

    /// Построить список из кортежей `(text, start, end)` с индексами по порядку
    pub fn from_cues<I, S>(cues: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64, f64)>,
        S: Into<String>,
    {
        let segments = cues
            .into_iter()
            .enumerate()
            .map(|(i, (text, start, end))| Segment::new(i, text, start, end))
            .collect();
        Self::new(segments)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Segment> {
        self.segments.iter_mut()
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }

    /// Найти сегмент по индексу
    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.index == index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.index == index)
    }

    /// Конец последнего сегмента
    pub fn last_end(&self) -> Option<f64> {
        self.segments.last().map(|s| s.end)
    }

    /// Заменить текст сегмента (внешний шаг сокращения между запусками)
    pub fn set_text(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        let segment = self
            .get_mut(index)
            .ok_or_else(|| SyncTtsError::InvalidSegments(format!("no segment with index {}", index)))?;
        segment.text = text.into();
        segment.reset();
        Ok(())
    }

    /// Индексы сегментов, текст которых отличается от предыдущего манифеста
    pub fn changed_since(&self, previous: &SegmentList) -> Vec<usize> {
        let previous_texts: HashMap<usize, &str> =
            previous.iter().map(|s| (s.index, s.text.as_str())).collect();

        self.segments
            .iter()
            .filter(|s| match previous_texts.get(&s.index) {
                Some(text) => *text != s.text,
                None => false,
            })
            .map(|s| s.index)
            .collect()
    }

    /// Индексы сегментов в указанном состоянии
    pub fn indices_in_state(&self, state: SegmentState) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.index)
            .collect()
    }

    /// Сохранить манифест сегментов
    pub fn save_manifest(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Загрузить манифест сегментов
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncTtsError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let segments: Vec<Segment> = serde_json::from_str(&content)?;
        Self::new(segments)
    }
}

impl<'a> IntoIterator for &'a SegmentList {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}
