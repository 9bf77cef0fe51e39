//! Сетевой движок синтеза
//!
//! Говорит по протоколу `POST {base_url}/audio/speech`, совместимому с
//! OpenAI. По умолчанию адрес указывает на локальный шлюз Edge-TTS, который
//! принимает любые голоса Edge. Движок всегда считается доступным.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};

use crate::config::{EngineKind, NetworkedEngineConfig, VoiceGender};
use crate::error::{Result, SyncTtsError};
use crate::tts::{DispatchMode, SpeechEngine};

/// Сетевой движок
#[derive(Debug, Clone)]
pub struct NetworkedEngine {
    client: Client,
    config: NetworkedEngineConfig,
}

impl NetworkedEngine {
    pub fn new(config: NetworkedEngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'))
    }
}

/// Классификация неуспешного HTTP статуса
pub fn classify_status(status: StatusCode, body: &str) -> SyncTtsError {
    let message = format!("status {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncTtsError::TransientSynthesis(message)
    } else {
        SyncTtsError::PermanentSynthesis(message)
    }
}

fn classify_request_error(e: reqwest::Error) -> SyncTtsError {
    if e.is_timeout() || e.is_connect() {
        SyncTtsError::TransientSynthesis(e.to_string())
    } else {
        SyncTtsError::PermanentSynthesis(e.to_string())
    }
}

#[async_trait]
impl SpeechEngine for NetworkedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Networked
    }

    fn is_available(&self) -> bool {
        true
    }

    fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::Concurrent {
            max_in_flight: self.config.max_concurrent_requests.max(1),
            retry_delay: Duration::from_millis(self.config.retry_delay_ms),
        }
    }

    fn artifact_extension(&self) -> &'static str {
        "mp3"
    }

    fn default_voice(&self, target_lang: &str, gender: Option<VoiceGender>) -> Option<String> {
        Some(self.config.voice_for_language(target_lang, gender))
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes> {
        let mut request = self.client.post(self.speech_url()).json(&serde_json::json!({
            "model": self.config.model,
            "input": text,
            "voice": voice,
            "response_format": "mp3",
            "speed": 1.0
        }));
        if !self.config.api_key.trim().is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            return Err(classify_status(status, &body));
        }

        let bytes = response.bytes().await.map_err(classify_request_error)?;
        if bytes.is_empty() {
            return Err(SyncTtsError::PermanentSynthesis("empty audio response".to_string()));
        }
        Ok(bytes)
    }
}
