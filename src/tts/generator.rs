//! Генерация исходных артефактов
//!
//! Для каждого сегмента без валидного исходного артефакта вызывается
//! выбранный движок. Сетевой движок работает пулом задач под семафором и
//! повторяет временный сбой ровно один раз; локальные движки обрабатывают
//! сегменты по одному. Неудачный сегмент помечается как отсутствующий, а
//! генерация продолжается.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::config::{EngineKind, SyncConfig};
use crate::error::{Result, SyncTtsError};
use crate::progress::ProgressTracker;
use crate::store::{ArtifactKey, ArtifactStore};
use crate::subtitle::segment::SegmentList;
use crate::tts::{DispatchMode, ResolvedEngine, SpeechEngine};

/// Итоги генерации
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    /// Фактически использованный движок
    pub engine: EngineKind,
    pub voice: String,
    /// Сгенерированные в этом запуске сегменты
    pub synthesized: Vec<usize>,
    /// Сегменты с уже существующим артефактом
    pub resumed: Vec<usize>,
    /// Сегменты, синтез которых не удался
    pub missing: Vec<usize>,
    /// Число выполненных повторов
    pub retries: usize,
}

struct Job {
    index: usize,
    text: String,
}

struct JobOutcome {
    index: usize,
    result: Result<PathBuf>,
    retried: bool,
}

/// Сгенерировать исходные артефакты для всех сегментов
pub async fn generate_all(
    segments: &mut SegmentList,
    store: &ArtifactStore,
    resolved: &ResolvedEngine,
    config: &SyncConfig,
    progress: &ProgressTracker,
) -> Result<GenerationSummary> {
    let total = segments.len();
    let mut summary = GenerationSummary {
        engine: resolved.kind(),
        voice: resolved.voice.clone(),
        synthesized: Vec::new(),
        resumed: Vec::new(),
        missing: Vec::new(),
        retries: 0,
    };

    let mut jobs = Vec::new();
    for segment in segments.iter_mut() {
        match store.find_valid(ArtifactKey::raw(segment.index)) {
            Some(path) => {
                segment.mark_synthesized(path);
                summary.resumed.push(segment.index);
            }
            None => jobs.push(Job {
                index: segment.index,
                text: segment.speakable_text(&config.filler_text),
            }),
        }
    }

    log::info!(
        "Generating {} segment(s) with {} (voice {}), {} already present",
        jobs.len(),
        resolved.kind(),
        resolved.voice,
        summary.resumed.len()
    );

    if resolved.kind() == EngineKind::Cloning {
        if let Some(last_end) = segments.last_end() {
            if last_end > config.cloning.long_input_warning_secs {
                log::warn!(
                    "Input is {:.0} min long with {} segments; voice cloning runs sequentially and may take a while",
                    last_end / 60.0,
                    total
                );
            }
        }
    }

    let done_before = summary.resumed.len();
    progress.update_counts(done_before, total, None);

    let outcomes = match resolved.engine.dispatch_mode() {
        DispatchMode::Concurrent {
            max_in_flight,
            retry_delay,
        } => {
            run_concurrent(jobs, store, resolved, max_in_flight, retry_delay, |done| {
                progress.update_counts(done_before + done, total, None)
            })
            .await
        }
        DispatchMode::Sequential => {
            run_sequential(jobs, store, resolved, |done| {
                progress.update_counts(done_before + done, total, None)
            })
            .await
        }
    };

    for outcome in outcomes {
        if outcome.retried {
            summary.retries += 1;
        }
        let Some(segment) = segments.get_mut(outcome.index) else {
            continue;
        };
        let result = outcome.result.and_then(|path| {
            if store.is_valid(ArtifactKey::raw(outcome.index)) {
                Ok(path)
            } else {
                Err(SyncTtsError::MissingArtifact(format!(
                    "{} is below {} bytes",
                    path.display(),
                    config.min_artifact_bytes
                )))
            }
        });
        match result {
            Ok(path) => {
                // Скорректированный артефакт прошлого запуска (в том числе
                // подставленная тишина) относится к старому аудио
                if let Err(e) = store.remove(ArtifactKey::adjusted(outcome.index)) {
                    log::warn!("Segment {}: failed to drop stale adjusted audio: {}", outcome.index, e);
                }
                segment.mark_synthesized(path);
                summary.synthesized.push(outcome.index);
            }
            Err(e) => {
                log::warn!("Segment {}: synthesis failed: {}", outcome.index, e);
                segment.mark_missing();
                summary.missing.push(outcome.index);
            }
        }
    }

    summary.synthesized.sort_unstable();
    summary.missing.sort_unstable();
    if !summary.missing.is_empty() {
        log::warn!("{} segment(s) missing after synthesis: {:?}", summary.missing.len(), summary.missing);
    }
    Ok(summary)
}

async fn run_concurrent(
    jobs: Vec<Job>,
    store: &ArtifactStore,
    resolved: &ResolvedEngine,
    max_in_flight: usize,
    retry_delay: Duration,
    on_progress: impl Fn(usize),
) -> Vec<JobOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let extension = resolved.engine.artifact_extension();
    let mut pending = FuturesUnordered::new();

    for job in jobs {
        let semaphore = semaphore.clone();
        let engine = resolved.engine.clone();
        let voice = resolved.voice.clone();
        let store = store.clone();
        let index = job.index;

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return (Err(SyncTtsError::Other(format!("semaphore closed: {}", e))), false);
                }
            };
            let (bytes, retried) = synthesize_with_retry(engine.as_ref(), &job.text, &voice, retry_delay).await;
            let result = match bytes {
                Ok(bytes) => store.write(ArtifactKey::raw(index), extension, &bytes).await,
                Err(e) => Err(e),
            };
            (result, retried)
        });

        pending.push(async move {
            match handle.await {
                Ok((result, retried)) => JobOutcome { index, result, retried },
                Err(e) => JobOutcome {
                    index,
                    result: Err(SyncTtsError::Other(format!("synthesis task failed: {}", e))),
                    retried: false,
                },
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(outcome) = pending.next().await {
        outcomes.push(outcome);
        on_progress(outcomes.len());
    }
    outcomes
}

async fn run_sequential(
    jobs: Vec<Job>,
    store: &ArtifactStore,
    resolved: &ResolvedEngine,
    on_progress: impl Fn(usize),
) -> Vec<JobOutcome> {
    let extension = resolved.engine.artifact_extension();
    let mut outcomes = Vec::with_capacity(jobs.len());

    for job in jobs {
        let result = match resolved.engine.synthesize(&job.text, &resolved.voice).await {
            Ok(bytes) => store.write(ArtifactKey::raw(job.index), extension, &bytes).await,
            Err(e) => Err(e),
        };
        outcomes.push(JobOutcome {
            index: job.index,
            result,
            retried: false,
        });
        on_progress(outcomes.len());
    }
    outcomes
}

/// Синтез с одним повтором временного сбоя после фиксированной паузы
async fn synthesize_with_retry(
    engine: &dyn SpeechEngine,
    text: &str,
    voice: &str,
    retry_delay: Duration,
) -> (Result<Bytes>, bool) {
    match engine.synthesize(text, voice).await {
        Err(e) if e.is_transient() => {
            log::debug!("Transient synthesis failure, retrying in {:?}: {}", retry_delay, e);
            tokio::time::sleep(retry_delay).await;
            (engine.synthesize(text, voice).await, true)
        }
        other => (other, false),
    }
}
