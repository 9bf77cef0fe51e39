//! Пример использования системы прогресса и уведомлений
//!
//! Запуск: `cargo run --example progress_example -- subtitles.srt work`.
//! Нужны ffmpeg/ffprobe и доступный шлюз Edge-TTS (см. `SyncConfig`).

use sync_tts::notification::{CompositeProgressObserver, FileProgressObserver, ProgressBarObserver};
use sync_tts::progress::{DefaultProgressReporter, ProgressReporter};
use sync_tts::subtitle::parser::parse_subtitle_file;
use sync_tts::{EngineKind, SyncConfig, SyncRequest, SyncTts, VoiceGender};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sync_tts::utils::logger::init_logger();

    let mut args = std::env::args().skip(1);
    let subtitles = args.next().unwrap_or_else(|| "subtitles.srt".to_string());
    let work_dir = args.next().unwrap_or_else(|| "sync-tts-work".to_string());

    // Прогресс-бар в консоли и журнал в рабочей директории
    let mut composite = CompositeProgressObserver::new();
    composite.add_observer(Box::new(ProgressBarObserver::new(50)));
    composite.add_observer(Box::new(FileProgressObserver::new(
        std::path::Path::new(&work_dir).join("progress.log"),
    )));

    let mut reporter = DefaultProgressReporter::new();
    reporter.add_observer(Box::new(composite));

    let mut sync = SyncTts::new(SyncConfig::with_work_dir(&work_dir))?;
    sync.set_progress_reporter(Box::new(reporter));

    let mut segments = parse_subtitle_file(&subtitles)?;
    let request = SyncRequest::new(EngineKind::Local, "en").with_gender(VoiceGender::Female);

    // Если Kokoro не установлен, конвейер сам перейдет на сетевой движок
    let report = sync.process(&mut segments, &request).await?;

    println!("Движок: {} (запасной: {})", report.engine, report.fell_back);
    println!("Итоговый файл: {}", report.output_path().display());
    for entry in &report.timing_report {
        println!(
            "  #{} нужно сократить до {}%: {:.2}s аудио в слоте {:.2}s",
            entry.index + 1,
            entry.target_pct,
            entry.measured_duration,
            entry.slot_duration
        );
    }
    Ok(())
}
