//! Модуль обработки ошибок библиотеки sync-tts
//!
//! Ошибки делятся на две группы: посегментные (синтез, зондирование
//! длительности, отсутствующие артефакты), которые поглощаются конвейером
//! и попадают в итоговую сводку, и структурные, которые прерывают запуск.

use thiserror::Error;

/// Ошибки библиотеки sync-tts
#[derive(Debug, Error)]
pub enum SyncTtsError {
    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения/записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка парсинга субтитров
    #[error("Subtitle parsing error: {0}")]
    SubtitleParsing(String),

    /// Нарушены инварианты списка сегментов
    #[error("Invalid segments: {0}")]
    InvalidSegments(String),

    /// Список сегментов пуст
    #[error("Segment list is empty")]
    EmptySegments,

    /// Временный сбой синтеза (только сетевой движок, допускает повтор)
    #[error("Transient synthesis failure: {0}")]
    TransientSynthesis(String),

    /// Постоянный сбой синтеза (без повтора)
    #[error("Permanent synthesis failure: {0}")]
    PermanentSynthesis(String),

    /// Движок синтеза недоступен
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Не удалось определить длительность аудио
    #[error("Probe failure: {0}")]
    Probe(String),

    /// Артефакт отсутствует или невалиден
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Внешний инструмент не уложился в таймаут
    #[error("{tool} timed out after {secs}s")]
    ToolTimeout {
        tool: String,
        secs: u64,
    },

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl SyncTtsError {
    /// Можно ли повторить операцию, завершившуюся этой ошибкой
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientSynthesis(_) | Self::ToolTimeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<&str> for SyncTtsError {
    fn from(s: &str) -> Self {
        SyncTtsError::Other(s.to_string())
    }
}

impl From<String> for SyncTtsError {
    fn from(s: String) -> Self {
        SyncTtsError::Other(s)
    }
}

/// Тип Result для библиотеки sync-tts
pub type Result<T> = std::result::Result<T, SyncTtsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncTtsError::TransientSynthesis("503".into()).is_transient());
        assert!(SyncTtsError::ToolTimeout { tool: "ffmpeg".into(), secs: 5 }.is_transient());
        assert!(!SyncTtsError::PermanentSynthesis("401".into()).is_transient());
        assert!(!SyncTtsError::Probe("bad".into()).is_transient());
    }

    #[test]
    fn test_tool_timeout_message() {
        let err = SyncTtsError::ToolTimeout { tool: "ffprobe".into(), secs: 30 };
        assert_eq!(err.to_string(), "ffprobe timed out after 30s");
    }
}
