//! Модуль для отслеживания прогресса выполнения операций
//!
//! Реализация паттерна Observer: конвейер сообщает о ходе каждого этапа
//! через `ProgressTracker`, а наблюдатели получают `ProgressInfo` с
//! прогрессом этапа и взвешенным общим прогрессом.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Информация о прогрессе выполнения операции
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressInfo {
    /// Текущий этап операции
    pub step: String,
    /// Процент выполнения текущего этапа (0.0 - 100.0)
    pub step_progress: f32,
    /// Общий процент выполнения всей операции (0.0 - 100.0)
    pub total_progress: f32,
    /// Дополнительная информация о текущем этапе
    pub details: Option<String>,
}

impl ProgressInfo {
    pub fn new(step: impl Into<String>, step_progress: f32, total_progress: f32, details: Option<String>) -> Self {
        Self {
            step: step.into(),
            step_progress: step_progress.clamp(0.0, 100.0),
            total_progress: total_progress.clamp(0.0, 100.0),
            details,
        }
    }
}

/// Наблюдатель, получающий уведомления о прогрессе
pub trait ProgressObserver: Send + Sync {
    fn on_progress_update(&self, progress: ProgressInfo);
}

/// Объект, рассылающий уведомления о прогрессе
pub trait ProgressReporter: Send + Sync {
    /// Добавить наблюдателя; возвращает идентификатор для удаления
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize;

    /// Удалить наблюдателя по идентификатору
    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>>;

    /// Уведомить всех наблюдателей
    fn notify_progress(&self, progress: ProgressInfo);
}

/// Репортер по умолчанию: синхронно вызывает наблюдателей
pub struct DefaultProgressReporter {
    observers: RwLock<HashMap<usize, Box<dyn ProgressObserver>>>,
    next_id: AtomicUsize,
}

impl DefaultProgressReporter {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl Default for DefaultProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for DefaultProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.write().insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.observers.write().remove(&id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        let observers = self.observers.read();
        for observer in observers.values() {
            observer.on_progress_update(progress.clone());
        }
    }
}

/// Этапы конвейера синхронизации
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStep {
    /// Синтез речи по сегментам
    SpeechGeneration,
    /// Измерение длительностей и отчет о таймингах
    TimingAnalysis,
    /// Коррекция темпа
    SpeedAdjustment,
    /// Сборка таймлайна
    TimelineAssembly,
}

impl ProcessStep {
    pub const ALL: [ProcessStep; 4] = [
        Self::SpeechGeneration,
        Self::TimingAnalysis,
        Self::SpeedAdjustment,
        Self::TimelineAssembly,
    ];

    /// Название этапа
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeechGeneration => "Генерация речи",
            Self::TimingAnalysis => "Анализ таймингов",
            Self::SpeedAdjustment => "Коррекция темпа",
            Self::TimelineAssembly => "Сборка таймлайна",
        }
    }

    /// Вес этапа в процентах от всего процесса
    pub fn weight(&self) -> f32 {
        match self {
            Self::SpeechGeneration => 70.0,
            Self::TimingAnalysis => 5.0,
            Self::SpeedAdjustment => 15.0,
            Self::TimelineAssembly => 10.0,
        }
    }
}

struct TrackerState {
    current_step: ProcessStep,
    step_progress: f32,
    total_progress: f32,
    completed_steps: HashMap<ProcessStep, f32>,
}

/// Трекер прогресса конвейера
pub struct ProgressTracker {
    reporter: Option<Box<dyn ProgressReporter>>,
    state: RwLock<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reporter: None,
            state: RwLock::new(TrackerState {
                current_step: ProcessStep::SpeechGeneration,
                step_progress: 0.0,
                total_progress: 0.0,
                completed_steps: HashMap::new(),
            }),
        }
    }

    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        let mut tracker = Self::new();
        tracker.reporter = Some(reporter);
        tracker
    }

    pub fn set_reporter(&mut self, reporter: Box<dyn ProgressReporter>) {
        self.reporter = Some(reporter);
    }

    /// Добавить наблюдателя; без репортера создается `DefaultProgressReporter`
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        self.reporter
            .get_or_insert_with(|| Box::new(DefaultProgressReporter::new()))
            .add_observer(observer)
    }

    pub fn current_step(&self) -> ProcessStep {
        self.state.read().current_step
    }

    pub fn total_progress(&self) -> f32 {
        self.state.read().total_progress
    }

    /// Перейти к этапу; предыдущий этап считается завершенным
    pub fn set_step(&self, step: ProcessStep) {
        {
            let mut state = self.state.write();
            if state.current_step == step {
                return;
            }
            let previous = state.current_step;
            state.completed_steps.insert(previous, 100.0);
            state.current_step = step;
            state.step_progress = 0.0;
            Self::recompute_total(&mut state);
        }
        self.report_progress(None);
    }

    /// Обновить прогресс текущего этапа
    pub fn update_step_progress(&self, progress: f32, details: Option<String>) {
        {
            let mut state = self.state.write();
            state.step_progress = progress.clamp(0.0, 100.0);
            Self::recompute_total(&mut state);
        }
        self.report_progress(details);
    }

    /// Обновить прогресс этапа по числу обработанных сегментов
    pub fn update_counts(&self, done: usize, total: usize, details: Option<String>) {
        let progress = if total == 0 {
            100.0
        } else {
            done as f32 / total as f32 * 100.0
        };
        self.update_step_progress(progress, details);
    }

    /// Отметить завершение всего процесса
    pub fn complete(&self) {
        {
            let mut state = self.state.write();
            for step in ProcessStep::ALL {
                state.completed_steps.insert(step, 100.0);
            }
            state.step_progress = 100.0;
            state.total_progress = 100.0;
        }
        self.report_progress(Some("Процесс завершен".to_string()));
    }

    // Этапы идут строго по порядку, поэтому все этапы до текущего учитываются
    // как завершенные, даже если `set_step` для них не вызывался
    fn recompute_total(state: &mut TrackerState) {
        let total_weight: f32 = ProcessStep::ALL.iter().map(|s| s.weight()).sum();
        let mut done = 0.0;
        for step in ProcessStep::ALL {
            if step == state.current_step {
                done += step.weight() * state.step_progress / 100.0;
                break;
            }
            let progress = state.completed_steps.get(&step).copied().unwrap_or(100.0);
            done += step.weight() * progress / 100.0;
        }
        state.total_progress = (done / total_weight * 100.0).clamp(0.0, 100.0);
    }

    fn report_progress(&self, details: Option<String>) {
        if let Some(reporter) = &self.reporter {
            let info = {
                let state = self.state.read();
                ProgressInfo::new(
                    state.current_step.as_str(),
                    state.step_progress,
                    state.total_progress,
                    details,
                )
            };
            reporter.notify_progress(info);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
