//! Обработка аудио: внешние инструменты, декодирование, коррекция темпа и
//! сборка таймлайна

pub mod audio;
pub mod decode;
pub mod speed;
pub mod timeline;
