//! Консольный интерфейс sync-tts

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use sync_tts::config::{EngineKind, SyncConfig, VoiceGender};
use sync_tts::notification::ProgressBarObserver;
use sync_tts::subtitle::parser::{parse_subtitle_file, write_srt};
use sync_tts::utils::{ffmpeg, logger};
use sync_tts::{SyncRequest, SyncTts};

/// Synthesize a subtitle file into one timed speech track
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subtitle file (SRT or WebVTT)
    srt_file: PathBuf,

    /// Working directory for artifacts, reports and the combined track
    work_dir: PathBuf,

    /// TTS engine: edge-tts, kokoro or voicebox
    engine: EngineKind,

    /// Target language, used to pick a default voice
    target_lang: String,

    /// Voicebox profile name (required for voicebox)
    #[arg(long)]
    voice_profile: Option<String>,

    /// Explicit voice ID (e.g. en-US-BrianNeural, am_michael)
    #[arg(long)]
    voice: Option<String>,

    /// Voice gender for the default networked voice
    #[arg(long)]
    gender: Option<VoiceGender>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output WAV path (defaults to <work_dir>/combined.wav)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the segments back as SRT for an external condensation pass
    #[arg(long)]
    export_srt: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logger::init_logger();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if !ffmpeg::check_ffmpeg_installed() {
        anyhow::bail!("ffmpeg and ffprobe must be installed and available in PATH");
    }
    match ffmpeg::get_ffmpeg_version() {
        Ok(version) => log::info!("Using {}", version),
        Err(e) => log::debug!("Could not read ffmpeg version: {}", e),
    }

    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => SyncConfig::default(),
    };
    config.work_dir = SyncConfig::with_work_dir(&cli.work_dir).work_dir;

    let mut segments = parse_subtitle_file(&cli.srt_file)
        .with_context(|| format!("failed to read subtitles from {}", cli.srt_file.display()))?;
    log::info!("Found {} segments in {}", segments.len(), cli.srt_file.display());

    let mut request = SyncRequest::new(cli.engine, cli.target_lang);
    if let Some(voice) = cli.voice {
        request = request.with_voice(voice);
    }
    if let Some(profile) = cli.voice_profile {
        request = request.with_voice_profile(profile);
    }
    if let Some(gender) = cli.gender {
        request = request.with_gender(gender);
    }
    if let Some(output) = cli.output {
        request = request.with_output(output);
    }

    let mut sync = SyncTts::new(config)?;
    if !cli.quiet {
        sync.add_observer(Box::new(ProgressBarObserver::default()));
    }

    let report = sync.process(&mut segments, &request).await?;

    println!("Engine: {}{}", report.engine, if report.fell_back { " (fallback)" } else { "" });
    println!("Voice: {}", report.generation.voice);
    println!(
        "Synthesized {}, resumed {}, retried {}",
        report.generation.synthesized.len(),
        report.generation.resumed.len(),
        report.generation.retries
    );
    if !report.missing().is_empty() {
        let shown: Vec<String> = report.missing().iter().take(10).map(|i| (i + 1).to_string()).collect();
        println!(
            "WARNING: {} missing segment(s), replaced with silence: {}{}",
            report.missing().len(),
            shown.join(", "),
            if report.missing().len() > 10 { ", ..." } else { "" }
        );
    }
    if !report.speed.silenced.is_empty() {
        println!(
            "{} segment slot(s) filled with silence on the timeline",
            report.speed.silenced.len()
        );
    }
    if report.timing_report.is_empty() {
        println!("All segments fit their slots, no condensation needed");
    } else {
        println!(
            "{} segment(s) need condensation, see {}",
            report.timing_report.len(),
            report.timing_report_path.display()
        );
    }
    if let Some(path) = cli.export_srt {
        write_srt(&path, &segments).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Segments exported to {}", path.display());
    }
    println!("Output: {}", report.output_path().display());
    Ok(())
}
