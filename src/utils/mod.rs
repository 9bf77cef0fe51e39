//! Вспомогательные модули: запуск внешних инструментов и логирование

pub mod ffmpeg;
pub mod logger;
