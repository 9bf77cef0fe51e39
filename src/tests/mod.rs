//! Сквозные тесты конвейера на тестовом движке и аудиоинструменте

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{shared, test_config, wav_len, MockEngine, MockToolkit};

use super::*;
use crate::config::DEFAULT_SAMPLE_RATE;
use crate::media::decode::decode_audio_file;
use crate::notification::MemoryProgressObserver;
use crate::store::ArtifactKey;

const SR: usize = DEFAULT_SAMPLE_RATE as usize;

fn three_segments() -> SegmentList {
    SegmentList::from_cues(vec![
        ("Hello there.", 0.0, 1.0),
        ("How are you?", 1.5, 2.5),
        ("Fine, thanks.", 3.0, 4.0),
    ])
    .unwrap()
}

fn pipeline(dir: &std::path::Path, engines: EngineSet, toolkit: Arc<MockToolkit>) -> SyncTts {
    SyncTts::with_components(test_config(dir), engines, toolkit).unwrap()
}

#[tokio::test]
async fn test_segments_that_fit_are_only_converted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked());
    let toolkit = shared(MockToolkit::new(DEFAULT_SAMPLE_RATE));
    let sync = pipeline(dir.path(), EngineSet::new(engine.clone()), toolkit.clone());

    let mut segments = three_segments();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(engine.calls(), 3);
    assert!(report.timing_report.is_empty());
    assert_eq!(report.speed.converted, vec![0, 1, 2]);
    assert!(toolkit.tempo_calls().iter().all(|(_, tempo)| tempo.is_none()));

    // Длина = (конец последнего сегмента + 2 с запаса) * частота
    assert_eq!(report.assembly.total_samples, 6 * SR);
    assert_eq!(wav_len(report.output_path()), 6 * SR);

    let report_json = std::fs::read_to_string(&report.timing_report_path).unwrap();
    assert_eq!(report_json.trim(), "[]");
    assert!(segments.iter().all(|s| s.state == SegmentState::Placed));
    assert!(report.manifest_path.exists());
}

#[tokio::test]
async fn test_overlong_segment_is_reported_and_sped_up() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked().with_duration("Too much to say.", 3.0));
    let toolkit = shared(MockToolkit::new(DEFAULT_SAMPLE_RATE));
    let sync = pipeline(dir.path(), EngineSet::new(engine), toolkit.clone());

    let mut segments = SegmentList::from_cues(vec![("Too much to say.", 0.0, 1.0)]).unwrap();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(report.timing_report.len(), 1);
    let entry = &report.timing_report[0];
    assert_eq!(entry.ratio, 3.0);
    assert_eq!(entry.target_pct, 28);

    // Ускорение ограничено двукратным, сегмент остается длиннее слота
    assert_eq!(report.speed.tempo_adjusted, vec![0]);
    assert_eq!(toolkit.tempo_calls()[0].1, Some(2.0));
    // Коррекция темпа берет длительность из анализа, а не измеряет заново
    assert_eq!(toolkit.probe_count(), 1);
    let adjusted = sync.store().find_valid(ArtifactKey::adjusted(0)).unwrap();
    assert_eq!(wav_len(&adjusted), SR * 3 / 2);

    let written: Vec<subtitle::analyzer::TimingReportEntry> =
        serde_json::from_str(&std::fs::read_to_string(&report.timing_report_path).unwrap()).unwrap();
    assert_eq!(written, report.timing_report);
}

#[tokio::test]
async fn test_failed_segment_becomes_silence() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked().failing_on("How are you?"));
    let toolkit = shared(MockToolkit::new(DEFAULT_SAMPLE_RATE));
    let sync = pipeline(dir.path(), EngineSet::new(engine), toolkit);

    let mut segments = three_segments();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(report.missing(), &[1]);
    assert_eq!(report.speed.silenced, vec![1]);
    assert_eq!(report.assembly.placed, vec![0, 1, 2]);

    let silence = sync.store().find_valid(ArtifactKey::adjusted(1)).unwrap();
    assert_eq!(wav_len(&silence), SR);

    let output = decode_audio_file(report.output_path()).unwrap().samples;
    assert!(output[SR * 3 / 2..SR * 5 / 2].iter().all(|s| *s == 0.0));
    assert!(output[..SR].iter().any(|s| *s != 0.0));
}

#[tokio::test]
async fn test_failed_segment_recovers_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let toolkit = shared(MockToolkit::new(DEFAULT_SAMPLE_RATE));
    let request = SyncRequest::new(EngineKind::Networked, "en");

    let failing = pipeline(
        dir.path(),
        EngineSet::new(shared(MockEngine::networked().failing_on("How are you?"))),
        toolkit.clone(),
    );
    let first = failing.process(&mut three_segments(), &request).await.unwrap();
    assert_eq!(first.speed.silenced, vec![1]);

    let healthy = pipeline(dir.path(), EngineSet::new(shared(MockEngine::networked())), toolkit);
    let second = healthy.process(&mut three_segments(), &request).await.unwrap();

    assert_eq!(second.generation.synthesized, vec![1]);
    assert!(second.missing().is_empty());
    // Тишина прошлого запуска не переиспользуется
    assert_eq!(second.speed.reused, vec![0, 2]);
    assert_eq!(second.speed.converted, vec![1]);
    assert!(second.speed.silenced.is_empty());

    let output = decode_audio_file(second.output_path()).unwrap().samples;
    assert!(output[SR * 3 / 2..SR * 5 / 2].iter().any(|s| *s != 0.0));
}

#[tokio::test]
async fn test_undersized_audio_is_reported_missing() {
    let dir = tempfile::tempdir().unwrap();
    let sync = pipeline(
        dir.path(),
        EngineSet::new(shared(MockEngine::networked().truncated_on("Fine, thanks."))),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let mut segments = three_segments();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(report.missing(), &[2]);
    assert_eq!(report.generation.synthesized, vec![0, 1]);
    assert_eq!(report.speed.silenced, vec![2]);
}

#[tokio::test]
async fn test_unavailable_local_engine_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let networked = shared(MockEngine::networked());
    let local = shared(MockEngine::local(false));
    let engines = EngineSet::new(networked.clone()).with_local(local.clone());
    let sync = pipeline(dir.path(), engines, shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)));

    let mut segments = three_segments();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Local, "en"))
        .await
        .unwrap();

    assert_eq!(report.engine, EngineKind::Networked);
    assert!(report.fell_back);
    assert_eq!(local.calls(), 0);
    assert_eq!(networked.calls(), 3);
    assert!(report.missing().is_empty());
}

#[tokio::test]
async fn test_available_local_engine_runs_sequentially() {
    let dir = tempfile::tempdir().unwrap();
    let networked = shared(MockEngine::networked());
    let local = shared(MockEngine::local(true).with_delay(Duration::from_millis(5)));
    let engines = EngineSet::new(networked.clone()).with_local(local.clone());
    let sync = pipeline(dir.path(), engines, shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)));

    let mut segments = three_segments();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Local, "en").with_voice("am_michael"))
        .await
        .unwrap();

    assert_eq!(report.engine, EngineKind::Local);
    assert!(!report.fell_back);
    assert_eq!(networked.calls(), 0);
    assert_eq!(local.peak_in_flight(), 1);
    assert!(local.voices().iter().all(|v| v == "am_michael"));
}

#[tokio::test]
async fn test_second_run_reuses_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked());
    let toolkit = shared(MockToolkit::new(DEFAULT_SAMPLE_RATE));
    let sync = pipeline(dir.path(), EngineSet::new(engine.clone()), toolkit.clone());
    let request = SyncRequest::new(EngineKind::Networked, "en");

    let first = sync.process(&mut three_segments(), &request).await.unwrap();
    let calls_after_first = engine.calls();
    let transcodes_after_first = toolkit.tempo_calls().len();
    let first_output = std::fs::read(first.output_path()).unwrap();

    let second = sync.process(&mut three_segments(), &request).await.unwrap();

    assert_eq!(engine.calls(), calls_after_first);
    assert_eq!(toolkit.tempo_calls().len(), transcodes_after_first);
    assert_eq!(second.generation.resumed, vec![0, 1, 2]);
    assert_eq!(second.speed.reused, vec![0, 1, 2]);
    assert!(second.regenerated.is_empty());
    assert_eq!(std::fs::read(second.output_path()).unwrap(), first_output);
}

#[tokio::test]
async fn test_changed_text_is_regenerated() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked());
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );
    let request = SyncRequest::new(EngineKind::Networked, "en");

    sync.process(&mut three_segments(), &request).await.unwrap();
    assert_eq!(engine.calls(), 3);

    let mut condensed = three_segments();
    condensed.set_text(1, "All good?").unwrap();
    let report = sync.process(&mut condensed, &request).await.unwrap();

    assert_eq!(report.regenerated, vec![1]);
    assert_eq!(report.generation.synthesized, vec![1]);
    assert_eq!(engine.calls(), 4);
}

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(
        MockEngine::networked()
            .with_scripted_failures(vec![SyncTtsError::TransientSynthesis("HTTP 503".to_string())]),
    );
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let mut segments = SegmentList::from_cues(vec![("Once more.", 0.0, 1.0)]).unwrap();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(engine.calls(), 2);
    assert_eq!(report.generation.retries, 1);
    assert!(report.missing().is_empty());
}

#[tokio::test]
async fn test_second_transient_failure_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked().with_scripted_failures(vec![
        SyncTtsError::TransientSynthesis("HTTP 429".to_string()),
        SyncTtsError::TransientSynthesis("HTTP 429".to_string()),
    ]));
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let mut segments = SegmentList::from_cues(vec![("Busy.", 0.0, 1.0)]).unwrap();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(engine.calls(), 2);
    assert_eq!(report.missing(), &[0]);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(
        MockEngine::networked()
            .with_scripted_failures(vec![SyncTtsError::PermanentSynthesis("HTTP 400".to_string())]),
    );
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let mut segments = SegmentList::from_cues(vec![("Bad request.", 0.0, 1.0)]).unwrap();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(engine.calls(), 1);
    assert_eq!(report.generation.retries, 0);
    assert_eq!(report.missing(), &[0]);
    assert!(report.output_path().exists());
}

#[tokio::test]
async fn test_networked_requests_are_capped() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(
        MockEngine::networked()
            .with_concurrency(2)
            .with_delay(Duration::from_millis(20))
            .with_default_duration(0.2),
    );
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let cues: Vec<(String, f64, f64)> = (0..8)
        .map(|i| (format!("Line {}", i), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
        .collect();
    let mut segments = SegmentList::from_cues(cues).unwrap();
    let report = sync
        .process(&mut segments, &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    assert_eq!(engine.calls(), 8);
    assert!(engine.peak_in_flight() <= 2);
    assert_eq!(report.generation.synthesized, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cloning_requires_profile() {
    let dir = tempfile::tempdir().unwrap();
    let cloning = shared(MockEngine::cloning(true));
    let engines = EngineSet::new(shared(MockEngine::networked())).with_cloning(cloning.clone());
    let sync = pipeline(dir.path(), engines, shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)));

    let result = sync
        .process(&mut three_segments(), &SyncRequest::new(EngineKind::Cloning, "en"))
        .await;
    assert!(matches!(result, Err(SyncTtsError::Configuration(_))));
    assert_eq!(cloning.calls(), 0);
}

#[tokio::test]
async fn test_cloning_uses_profile_as_voice() {
    let dir = tempfile::tempdir().unwrap();
    let cloning = shared(MockEngine::cloning(true));
    let engines = EngineSet::new(shared(MockEngine::networked())).with_cloning(cloning.clone());
    let sync = pipeline(dir.path(), engines, shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)));

    let request = SyncRequest::new(EngineKind::Cloning, "en").with_voice_profile("narrator");
    let report = sync.process(&mut three_segments(), &request).await.unwrap();

    assert_eq!(report.engine, EngineKind::Cloning);
    assert_eq!(report.generation.voice, "narrator");
    assert_eq!(cloning.voices(), vec!["narrator"; 3]);
}

#[tokio::test]
async fn test_output_is_peak_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let sync = pipeline(
        dir.path(),
        EngineSet::new(shared(MockEngine::networked())),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let report = sync
        .process(&mut three_segments(), &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    let output = decode_audio_file(report.output_path()).unwrap().samples;
    let peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    assert!(peak <= 0.95 + 1e-3);
    assert!(peak > 0.9);
    assert!(report.assembly.peak_before > 0.4);
}

#[tokio::test]
async fn test_explicit_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let sync = pipeline(
        dir.path(),
        EngineSet::new(shared(MockEngine::networked())),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );
    let output = dir.path().join("out").join("track.wav");

    let request = SyncRequest::new(EngineKind::Networked, "en").with_output(&output);
    let report = sync.process(&mut three_segments(), &request).await.unwrap();

    assert_eq!(report.output_path(), output.as_path());
    assert!(output.exists());
}

#[tokio::test]
async fn test_empty_segment_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared(MockEngine::networked());
    let sync = pipeline(
        dir.path(),
        EngineSet::new(engine.clone()),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );

    let result = sync
        .process(&mut SegmentList::default(), &SyncRequest::new(EngineKind::Networked, "en"))
        .await;
    assert!(matches!(result, Err(SyncTtsError::EmptySegments)));
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_progress_reaches_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut sync = pipeline(
        dir.path(),
        EngineSet::new(shared(MockEngine::networked())),
        shared(MockToolkit::new(DEFAULT_SAMPLE_RATE)),
    );
    let memory = MemoryProgressObserver::new();
    sync.add_observer(Box::new(memory.clone()));

    sync.process(&mut three_segments(), &SyncRequest::new(EngineKind::Networked, "en"))
        .await
        .unwrap();

    let history = memory.history();
    assert!(!history.is_empty());
    assert!(history
        .windows(2)
        .all(|pair| pair[1].total_progress + f32::EPSILON >= pair[0].total_progress));
    assert_eq!(history.last().unwrap().total_progress, 100.0);
}
