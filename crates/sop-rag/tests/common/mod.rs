//! Scripted in-process providers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sop_rag::error::{Error, Result};
use parking_lot::Mutex;
use sop_rag::providers::{EmbeddingProvider, LlmProvider};
use sop_rag::{Document, PageText, Pipeline, RagConfig, VectorIndex};

/// Vocabulary of the topic embedder; one dimension per term
pub const TOPICS: [&str; 12] = [
    "notification",
    "configure",
    "contact",
    "template",
    "alarm",
    "door",
    "camera",
    "recording",
    "login",
    "password",
    "incident",
    "backup",
];

pub const FALLBACK_DIMS: usize = 32;
pub const FALLBACK_NAME: &str = "local-fallback";

/// Counts topic terms, zero-padded to `dimensions`
///
/// Can be switched off to simulate an outage, or told to stall or fail on
/// texts containing a marker.
pub struct TopicEmbedder {
    name: &'static str,
    dimensions: usize,
    down: AtomicBool,
    stall: Mutex<Option<(String, Duration)>>,
    fail: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl TopicEmbedder {
    pub fn new() -> Arc<Self> {
        Self::named("topic", TOPICS.len())
    }

    /// Stand-in for the local model
    pub fn fallback() -> Arc<Self> {
        Self::named(FALLBACK_NAME, FALLBACK_DIMS)
    }

    pub fn named(name: &'static str, dimensions: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            dimensions: dimensions.max(TOPICS.len()),
            down: AtomicBool::new(false),
            stall: Mutex::new(None),
            fail: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Sleep `delay` before answering for texts containing `marker`
    pub fn stall_on(&self, marker: &str, delay: Duration) {
        *self.stall.lock() = Some((marker.to_string(), delay));
    }

    /// Fail at once for texts containing `marker`
    pub fn fail_on(&self, marker: &str) {
        *self.fail.lock() = Some(marker.to_string());
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable(self.name, "connection refused"));
        }
        let failing = self.fail.lock().as_ref().is_some_and(|m| text.contains(m.as_str()));
        if failing {
            return Err(Error::provider_unavailable(self.name, "connection reset"));
        }
        let delay = self
            .stall
            .lock()
            .as_ref()
            .filter(|(m, _)| text.contains(m.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = TOPICS
            .iter()
            .map(|t| lower.matches(t).count() as f32)
            .collect();
        vector.resize(self.dimensions, 0.0);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        4
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.down.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Generator that echoes how many context blocks it saw
pub struct ScriptedLlm {
    pub calls: AtomicUsize,
    fail: AtomicBool,
    delay: Duration,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay,
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("scripted", "model not loaded"));
        }
        let blocks = prompt.matches("(Product: ").count();
        Ok(format!("Answer grounded in {} passages.", blocks))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail.load(Ordering::SeqCst))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }
}

pub fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.chunking.chunk_size = 500;
    config.chunking.chunk_overlap = 50;
    config.embeddings.fallback_dimensions = FALLBACK_DIMS;
    config.embeddings.timeout_secs = 5;
    config.llm.timeout_secs = 10;
    config
}

pub fn build_pipeline(
    config: RagConfig,
    index: Arc<VectorIndex>,
    primary: Arc<TopicEmbedder>,
    llm: Arc<ScriptedLlm>,
) -> Result<Pipeline> {
    Pipeline::new(
        config,
        index,
        primary,
        TopicEmbedder::fallback(),
        llm,
    )
}

/// A paragraph of roughly `len` chars built from `sentence`
pub fn filler(sentence: &str, len: usize) -> String {
    let mut text = String::new();
    while text.chars().count() < len {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(sentence);
    }
    text
}

/// Three pages: notifications, contacts, incidents
pub fn everbridge_guide() -> Document {
    Document::new(
        "Everbridge Setup Guide.pdf",
        vec![
            PageText::new(
                1,
                filler("To configure a notification, open Settings and pick a notification template.", 600),
            ),
            PageText::new(
                2,
                filler("Each contact record needs a phone number and an email address for delivery.", 600),
            ),
            PageText::new(
                3,
                filler("Launch an incident from the dashboard and confirm the incident scope.", 600),
            ),
        ],
    )
}

pub fn milestone_manual() -> Document {
    Document::new(
        "Milestone XProtect Manual.pdf",
        vec![PageText::new(
            1,
            filler("Every camera stores recording data on the recording server. Configure notification rules per camera.", 700),
        )],
    )
}
