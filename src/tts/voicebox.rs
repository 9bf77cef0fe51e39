//! Движок клонирования голоса Voicebox
//!
//! Каждый сегмент генерируется отдельным запуском
//! `uv run voicebox.py generate <profile> <text> --quality high`. Скрипт
//! всегда пишет результат в один и тот же файл, поэтому вызовы строго
//! последовательны и защищены мьютексом.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::config::{CloningEngineConfig, EngineKind, VoiceGender};
use crate::error::{Result, SyncTtsError};
use crate::tts::{DispatchMode, SpeechEngine};
use crate::utils::ffmpeg::run_tool;

/// Движок клонирования
pub struct VoiceboxEngine {
    config: CloningEngineConfig,
    lock: Mutex<()>,
}

impl VoiceboxEngine {
    pub fn new(config: CloningEngineConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    fn command_args(&self, profile: &str, text: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            self.config.script_path.to_string_lossy().to_string(),
            "generate".to_string(),
            profile.to_string(),
            text.to_string(),
            "--quality".to_string(),
            self.config.quality.clone(),
        ]
    }
}

#[async_trait]
impl SpeechEngine for VoiceboxEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Cloning
    }

    fn is_available(&self) -> bool {
        self.config.script_path.is_file()
    }

    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::Sequential
    }

    fn artifact_extension(&self) -> &'static str {
        "wav"
    }

    /// У клонирования нет голоса по умолчанию: нужен профиль
    fn default_voice(&self, _target_lang: &str, _gender: Option<VoiceGender>) -> Option<String> {
        None
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes> {
        let _guard = self.lock.lock().await;
        let output = &self.config.output_path;

        // Остаток предыдущего вызова не должен выдаваться за результат
        if output.exists() {
            tokio::fs::remove_file(output).await?;
        }

        let args = self.command_args(voice, text);
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        run_tool(&self.config.runner, &args, timeout)
            .await
            .map_err(|e| match e {
                SyncTtsError::AudioProcessing(msg) => SyncTtsError::PermanentSynthesis(msg),
                other => other,
            })?;

        match tokio::fs::read(output).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) => Err(SyncTtsError::PermanentSynthesis(format!(
                "voicebox produced no output at {}: {}",
                output.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_command_args() {
        let engine = VoiceboxEngine::new(CloningEngineConfig {
            script_path: PathBuf::from("/opt/voicebox.py"),
            ..CloningEngineConfig::default()
        });
        assert_eq!(
            engine.command_args("narrator", "Hello there"),
            vec!["run", "/opt/voicebox.py", "generate", "narrator", "Hello there", "--quality", "high"]
        );
    }

    #[test]
    fn test_requires_script() {
        let engine = VoiceboxEngine::new(CloningEngineConfig {
            script_path: PathBuf::from("/nonexistent/voicebox.py"),
            ..CloningEngineConfig::default()
        });
        assert!(!engine.is_available());
        assert!(engine.default_voice("en", None).is_none());
    }
}
