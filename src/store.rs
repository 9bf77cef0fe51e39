//! Хранилище артефактов
//!
//! Рабочая директория как хранилище ключ-значение, где ключом служит пара
//! `(индекс сегмента, этап)`. Каждый этап пишет только свои ключи, поэтому
//! параллельные писатели никогда не пересекаются. Проверка валидности
//! вынесена в отдельную стратегию `ArtifactValidity`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::error::Result;

/// Расширения, под которыми может лежать артефакт
pub const KNOWN_EXTENSIONS: [&str; 2] = ["mp3", "wav"];

lazy_static! {
    static ref ARTIFACT_NAME: Regex = Regex::new(r"^(raw|adj)_(\d{4,})\.(mp3|wav)$").unwrap();
}

/// Этап, которому принадлежит артефакт
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Результат синтеза
    Raw,
    /// Результат коррекции темпа
    Adjusted,
}

impl Stage {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Adjusted => "adj",
        }
    }
}

/// Ключ артефакта
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub index: usize,
    pub stage: Stage,
}

impl ArtifactKey {
    pub fn raw(index: usize) -> Self {
        Self { index, stage: Stage::Raw }
    }

    pub fn adjusted(index: usize) -> Self {
        Self { index, stage: Stage::Adjusted }
    }

    fn stem(&self) -> String {
        format!("{}_{:04}", self.stage.prefix(), self.index)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Стратегия проверки валидности артефакта
pub trait ArtifactValidity: Send + Sync {
    fn is_valid(&self, path: &Path) -> bool;
}

/// Артефакт валиден, если файл существует и больше `min_bytes`.
///
/// Это дешевая эвристика, а не проверка содержимого: обрезанный, но крупный
/// файл пройдет проверку.
#[derive(Debug, Clone, Copy)]
pub struct MinSizeValidity {
    pub min_bytes: u64,
}

impl ArtifactValidity for MinSizeValidity {
    fn is_valid(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.len() > self.min_bytes)
            .unwrap_or(false)
    }
}

/// Хранилище артефактов в рабочей директории
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    validity: Arc<dyn ArtifactValidity>,
}

impl ArtifactStore {
    /// Создать хранилище, создав директорию при необходимости
    pub fn new(root: impl Into<PathBuf>, validity: Arc<dyn ArtifactValidity>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root, validity })
    }

    /// Хранилище с проверкой по минимальному размеру из конфигурации
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            config.work_dir.clone(),
            Arc::new(MinSizeValidity { min_bytes: config.min_artifact_bytes }),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Путь артефакта с заданным расширением
    pub fn path(&self, key: ArtifactKey, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key.stem(), extension))
    }

    /// Путь для промежуточной записи; расширение сохраняется, чтобы
    /// внешние инструменты определяли формат
    pub fn staging_path(&self, key: ArtifactKey, extension: &str) -> PathBuf {
        self.root.join(format!("{}.part.{}", key.stem(), extension))
    }

    /// Найти валидный артефакт под любым из известных расширений
    pub fn find_valid(&self, key: ArtifactKey) -> Option<PathBuf> {
        KNOWN_EXTENSIONS
            .iter()
            .map(|ext| self.path(key, ext))
            .find(|path| self.validity.is_valid(path))
    }

    pub fn is_valid(&self, key: ArtifactKey) -> bool {
        self.find_valid(key).is_some()
    }

    /// Записать байты артефакта через промежуточный файл
    pub async fn write(&self, key: ArtifactKey, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        let staging = self.staging_path(key, extension);
        tokio::fs::write(&staging, bytes).await?;
        self.commit(key, extension, &staging)
    }

    /// Переименовать промежуточный файл в итоговый
    pub fn commit(&self, key: ArtifactKey, extension: &str, staging: &Path) -> Result<PathBuf> {
        let target = self.path(key, extension);
        std::fs::rename(staging, &target)?;
        Ok(target)
    }

    /// Удалить все варианты артефакта
    pub fn remove(&self, key: ArtifactKey) -> Result<()> {
        for ext in KNOWN_EXTENSIONS {
            for path in [self.path(key, ext), self.staging_path(key, ext)] {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Удалить исходный и скорректированный артефакты сегмента
    pub fn invalidate(&self, index: usize) -> Result<()> {
        self.remove(ArtifactKey::raw(index))?;
        self.remove(ArtifactKey::adjusted(index))
    }

    /// Индексы сегментов, для которых есть валидный артефакт этапа
    pub fn valid_indices(&self, stage: Stage) -> BTreeSet<usize> {
        WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let caps = ARTIFACT_NAME.captures(&name)?;
                if caps.get(1)?.as_str() != stage.prefix() {
                    return None;
                }
                let index = caps.get(2)?.as_str().parse::<usize>().ok()?;
                self.validity.is_valid(entry.path()).then_some(index)
            })
            .collect()
    }

    /// Путь к отчету о таймингах
    pub fn timing_report_path(&self) -> PathBuf {
        self.root.join("timing_report.json")
    }

    /// Путь к манифесту сегментов
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("segments.json")
    }
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir, Arc::new(MinSizeValidity { min_bytes: 100 })).unwrap()
    }

    #[test]
    fn test_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert_eq!(store.path(ArtifactKey::raw(7), "mp3"), dir.path().join("raw_0007.mp3"));
        assert_eq!(store.path(ArtifactKey::adjusted(12345), "wav"), dir.path().join("adj_12345.wav"));
        assert_eq!(
            store.staging_path(ArtifactKey::adjusted(3), "wav"),
            dir.path().join("adj_0003.part.wav")
        );
    }

    #[tokio::test]
    async fn test_small_files_are_not_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.write(ArtifactKey::raw(0), "mp3", &[0u8; 100]).await.unwrap();
        assert!(!store.is_valid(ArtifactKey::raw(0)));

        store.write(ArtifactKey::raw(0), "mp3", &[0u8; 101]).await.unwrap();
        assert_eq!(store.find_valid(ArtifactKey::raw(0)), Some(dir.path().join("raw_0000.mp3")));
        assert!(!dir.path().join("raw_0000.part.mp3").exists());
    }

    #[tokio::test]
    async fn test_valid_indices_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.write(ArtifactKey::raw(0), "mp3", &[1u8; 500]).await.unwrap();
        store.write(ArtifactKey::raw(2), "wav", &[1u8; 500]).await.unwrap();
        store.write(ArtifactKey::adjusted(2), "wav", &[1u8; 500]).await.unwrap();
        // Недописанный файл не считается артефактом
        std::fs::write(store.staging_path(ArtifactKey::raw(5), "wav"), [1u8; 500]).unwrap();

        let raw: Vec<usize> = store.valid_indices(Stage::Raw).into_iter().collect();
        assert_eq!(raw, vec![0, 2]);

        store.invalidate(2).unwrap();
        assert!(!store.is_valid(ArtifactKey::raw(2)));
        assert!(!store.is_valid(ArtifactKey::adjusted(2)));
        assert!(store.is_valid(ArtifactKey::raw(0)));
    }
}
