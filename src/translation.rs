use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::frame::AudioFrame;

#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("translation backend unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported language pair {source_language} -> {target_language}")]
    UnsupportedLanguage {
        source_language: String,
        target_language: String,
    },

    #[error("translation backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug)]
pub struct TranslationRequest {
    pub audio: AudioFrame,
    pub source_language: String,
    pub target_language: String,
    /// Source texts of the most recent utterances on this stream, oldest first.
    pub context_history: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct TranslationResult {
    pub translated_audio: AudioFrame,
    pub source_text: String,
    pub translated_text: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub latency_ms: u32,
}

/// Speech translation collaborator consumed by `ApmSystem`.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<TranslationResult, TranslationError>;

    fn name(&self) -> &str;

    /// Language tags the engine accepts; empty means any.
    fn supported_languages(&self) -> Vec<String> {
        Vec::new()
    }
}

/// What the mock hands back as translated audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockMode {
    /// Zero-filled mono frame with the request's length and rate.
    Silent,
    /// The request audio, unchanged.
    Loopback,
}

/// Fixed-latency deterministic translator for tests and offline runs.
#[derive(Clone, Debug)]
pub struct MockTranslationEngine {
    latency: Duration,
    mode: MockMode,
    languages: Vec<String>,
}

impl Default for MockTranslationEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

impl MockTranslationEngine {
    pub const SOURCE_TEXT: &'static str = "Hello world";
    pub const TRANSLATED_TEXT: &'static str = "Hola mundo";
    pub const CONFIDENCE: f32 = 0.95;

    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            mode: MockMode::Silent,
            languages: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restrict the accepted language tags.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, tag: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == tag)
    }
}

#[async_trait]
impl TranslationEngine for MockTranslationEngine {
    async fn translate(
        &self,
        request: TranslationRequest,
    ) -> Result<TranslationResult, TranslationError> {
        if !self.accepts(&request.source_language) || !self.accepts(&request.target_language) {
            return Err(TranslationError::UnsupportedLanguage {
                source_language: request.source_language,
                target_language: request.target_language,
            });
        }

        debug!(
            frames = request.audio.frame_count(),
            context = request.context_history.len(),
            latency_ms = self.latency.as_millis() as u64,
            "mock translation"
        );
        tokio::time::sleep(self.latency).await;

        let translated_audio = match self.mode {
            MockMode::Silent => {
                let mut frame =
                    AudioFrame::silent(request.audio.frame_count(), request.audio.sample_rate(), 1);
                frame.compute_metadata();
                frame
            }
            MockMode::Loopback => request.audio,
        };

        Ok(TranslationResult {
            translated_audio,
            source_text: Self::SOURCE_TEXT.to_string(),
            translated_text: Self::TRANSLATED_TEXT.to_string(),
            confidence: Self::CONFIDENCE,
            latency_ms: self.latency.as_millis().min(u32::MAX as u128) as u32,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn supported_languages(&self) -> Vec<String> {
        self.languages.clone()
    }
}
