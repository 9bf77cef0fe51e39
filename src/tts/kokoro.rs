//! Локальный движок Kokoro
//!
//! Модель загружается один раз в долгоживущий Python-процесс, которому
//! по stdin передается по одному JSON-запросу на сегмент. Процесс пишет
//! WAV во временный файл и отвечает одной JSON-строкой. Запросы идут строго
//! последовательно; при таймауте процесс убивается и будет перезапущен
//! следующим запросом.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::{EngineKind, LocalEngineConfig, VoiceGender};
use crate::error::{Result, SyncTtsError};
use crate::tts::{DispatchMode, SpeechEngine};

const WORKER_SCRIPT: &str = r#"
import json, sys, warnings
warnings.filterwarnings("ignore")
import numpy as np
import soundfile as sf
from kokoro import KPipeline

pipelines = {}

def pipeline(lang):
    if lang not in pipelines:
        repo = "hexgrad/Kokoro-82M-v1.1-zh" if lang == "z" else "hexgrad/Kokoro-82M"
        pipelines[lang] = KPipeline(lang_code=lang, repo_id=repo)
    return pipelines[lang]

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
        chunks = [audio for _, _, audio in pipeline(req["lang"])(req["text"], voice=req["voice"], speed=1.0)]
        audio = np.concatenate(chunks) if chunks else np.zeros(2400, dtype=np.float32)
        sf.write(req["output"], audio, 24000)
        print(json.dumps({"ok": True}), flush=True)
    except Exception as e:
        print(json.dumps({"ok": False, "error": str(e)}), flush=True)
"#;

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    text: &'a str,
    voice: &'a str,
    lang: &'a str,
    output: String,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

struct Worker {
    // Процесс убивается при удалении
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn spawn(python: &Path) -> Result<Self> {
        log::info!("Starting Kokoro worker: {}", python.display());
        let mut child = Command::new(python)
            .arg("-u")
            .arg("-c")
            .arg(WORKER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncTtsError::EngineUnavailable("Kokoro worker has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncTtsError::EngineUnavailable("Kokoro worker has no stdout".to_string()))?;

        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn request(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerResponse> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut response = String::new();
        if self.stdout.read_line(&mut response).await? == 0 {
            return Err(SyncTtsError::PermanentSynthesis("Kokoro worker exited".to_string()));
        }
        Ok(serde_json::from_str(response.trim())?)
    }
}

/// Код языка Kokoro по имени голоса: `z…` означает китайский, остальные американский английский
pub fn lang_code_for_voice(voice: &str) -> &'static str {
    if voice.starts_with('z') {
        "z"
    } else {
        "a"
    }
}

/// Локальный движок Kokoro
pub struct KokoroEngine {
    config: LocalEngineConfig,
    worker: Mutex<Option<Worker>>,
}

impl KokoroEngine {
    pub fn new(config: LocalEngineConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechEngine for KokoroEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Local
    }

    fn is_available(&self) -> bool {
        self.config.python_path.is_file()
    }

    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::Sequential
    }

    fn artifact_extension(&self) -> &'static str {
        "wav"
    }

    fn default_voice(&self, _target_lang: &str, _gender: Option<VoiceGender>) -> Option<String> {
        Some(self.config.default_voice.clone())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes> {
        let output = std::env::temp_dir().join(format!("kokoro_{}.wav", uuid::Uuid::new_v4()));
        let request = WorkerRequest {
            text,
            voice,
            lang: lang_code_for_voice(voice),
            output: output.to_string_lossy().to_string(),
        };

        let mut guard = self.worker.lock().await;
        if guard.is_none() {
            *guard = Some(Worker::spawn(&self.config.python_path)?);
        }
        let Some(worker) = guard.as_mut() else {
            return Err(SyncTtsError::EngineUnavailable("Kokoro worker is not running".to_string()));
        };

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let outcome = tokio::time::timeout(timeout, worker.request(&request)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                log::warn!("Kokoro worker timed out, restarting on next request");
                *guard = None;
                return Err(SyncTtsError::ToolTimeout {
                    tool: "kokoro".to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };
        drop(guard);

        if !response.ok {
            return Err(SyncTtsError::PermanentSynthesis(
                response.error.unwrap_or_else(|| "unknown Kokoro error".to_string()),
            ));
        }

        let bytes = tokio::fs::read(&output).await?;
        if let Err(e) = tokio::fs::remove_file(&output).await {
            log::debug!("Failed to remove {}: {}", output.display(), e);
        }
        Ok(Bytes::from(bytes))
    }
}
