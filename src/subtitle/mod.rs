//! Работа с субтитрами: модель сегментов, чтение/запись и анализ таймингов

pub mod analyzer;
pub mod parser;
pub mod segment;
