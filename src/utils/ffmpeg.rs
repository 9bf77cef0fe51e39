//! Модуль для работы с FFmpeg
//!
//! Запуск ffmpeg/ffprobe с фиксированным таймаутом: зависший процесс
//! убивается, а вызов завершается ошибкой `ToolTimeout`.

use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::process::Command as TokioCommand;

use crate::error::{Result, SyncTtsError};

/// Проверка наличия FFmpeg
pub fn check_ffmpeg_installed() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    })
}

/// Получение версии FFmpeg
pub fn get_ffmpeg_version() -> Result<String> {
    let output = Command::new("ffmpeg").arg("-version").output()?;

    if !output.status.success() {
        return Err(SyncTtsError::Other("Failed to get FFmpeg version".to_string()));
    }

    let version_str = String::from_utf8_lossy(&output.stdout);
    let first_line = version_str.lines().next().unwrap_or("");

    Ok(first_line.to_string())
}

/// Запуск программы с таймаутом, возвращает stdout
pub async fn run_tool(program: &str, args: &[String], timeout: Duration) -> Result<String> {
    log::debug!("Running {} {}", program, args.join(" "));

    let child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(SyncTtsError::ToolTimeout {
                tool: program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        return Err(SyncTtsError::AudioProcessing(format!(
            "{} failed with status {}: {}",
            program, output.status, last_line
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Запуск команды FFmpeg
pub async fn run_ffmpeg_command(args: &[String], timeout: Duration) -> Result<()> {
    run_tool("ffmpeg", args, timeout).await.map(|_| ())
}

/// Запуск команды FFprobe
pub async fn run_ffprobe_command(args: &[String], timeout: Duration) -> Result<String> {
    run_tool("ffprobe", args, timeout).await
}
