//! Transcription collaborator client.
//!
//! The trait allows swapping implementations (HTTP service vs mock).

use crate::config::TranscribeConfig;
use crate::error::{FactlineError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Speech-to-text over one WAV-framed chunk.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a WAV-framed chunk, with the trailing transcript of the
    /// previous chunks as optional prior context.
    async fn transcribe(&self, wav: Vec<u8>, prior_context: Option<&str>) -> Result<String>;

    /// Get the name of the configured model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is usable
    fn is_ready(&self) -> bool;
}

/// HTTP transcription client.
pub struct HttpTranscriber {
    config: TranscribeConfig,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(config: TranscribeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: Vec<u8>, prior_context: Option<&str>) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| FactlineError::Transcription {
                message: "no transcription API key configured".to_string(),
            })?;

        let audio_part = Part::bytes(wav)
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| FactlineError::Transcription {
                message: format!("failed to build audio part: {e}"),
            })?;

        let mut form = Form::new()
            .part("file", audio_part)
            .text("model", self.config.model.clone())
            .text("response_format", "text")
            .text("temperature", "0");
        if let Some(context) = prior_context {
            if !context.is_empty() {
                form = form.text("prompt", context.to_string());
            }
        }

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(FactlineError::Transcription {
                message: format!("service returned {status}: {}", truncate(&body, 160)),
            });
        }
        Ok(body.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn is_ready(&self) -> bool {
        self.config.api_key.is_some()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Mock transcriber for testing.
#[derive(Default)]
pub struct MockTranscriber {
    model_name: String,
    responses: Mutex<VecDeque<String>>,
    received_contexts: Mutex<Vec<Option<String>>>,
    should_fail: bool,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            responses: Mutex::new(VecDeque::new()),
            received_contexts: Mutex::new(Vec::new()),
            should_fail: false,
        }
    }

    /// Queue one response; calls pop in FIFO order. When the queue is
    /// empty, an empty transcript comes back.
    pub fn with_response(self, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.to_string());
        self
    }

    /// Configure the mock to fail every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Prior contexts received so far, in call order.
    pub fn contexts(&self) -> Vec<Option<String>> {
        self.received_contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _wav: Vec<u8>, prior_context: Option<&str>) -> Result<String> {
        self.received_contexts
            .lock()
            .unwrap()
            .push(prior_context.map(|s| s.to_string()));
        if self.should_fail {
            return Err(FactlineError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let transcriber = MockTranscriber::new("test-model")
            .with_response("first chunk")
            .with_response("second chunk");

        assert_eq!(
            transcriber.transcribe(vec![], None).await.unwrap(),
            "first chunk"
        );
        assert_eq!(
            transcriber.transcribe(vec![], Some("first chunk")).await.unwrap(),
            "second chunk"
        );
        assert_eq!(transcriber.transcribe(vec![], None).await.unwrap(), "");
    }

    #[tokio::test]
    async fn mock_records_prior_contexts() {
        let transcriber = MockTranscriber::new("test-model").with_response("text");
        let _ = transcriber.transcribe(vec![], Some("tail")).await;
        let _ = transcriber.transcribe(vec![], None).await;
        assert_eq!(
            transcriber.contexts(),
            vec![Some("tail".to_string()), None]
        );
    }

    #[tokio::test]
    async fn mock_failure_surfaces_as_transcription_error() {
        let transcriber = MockTranscriber::new("test-model").with_failure();
        let result = transcriber.transcribe(vec![], None).await;
        match result {
            Err(FactlineError::Transcription { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            other => panic!("expected Transcription error, got {other:?}"),
        }
        assert!(!transcriber.is_ready());
    }

    #[test]
    fn http_transcriber_without_key_is_not_ready() {
        let transcriber = HttpTranscriber::new(TranscribeConfig::default()).unwrap();
        assert!(!transcriber.is_ready());
        assert_eq!(transcriber.model_name(), "whisper-1");
    }

    #[test]
    fn transcriber_trait_is_object_safe() {
        let transcriber: Box<dyn Transcriber> = Box::new(MockTranscriber::new("m"));
        assert_eq!(transcriber.model_name(), "m");
    }

    #[test]
    fn truncate_caps_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long, 160).chars().count(), 160);
        assert_eq!(truncate("short", 160), "short");
    }
}
