use super::traits::{word_count, Completion, ProviderAdapter};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// Characters of the prompt echoed back in the mock payload.
const ECHO_CHARS: usize = 50;

/// Deterministic local adapter. No network; the same prompt always yields
/// the same payload and unit count.
pub struct MockAdapter {
    id: String,
    model: String,
    units_per_word: f64,
    latency: Duration,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>, model: impl Into<String>, units_per_word: f64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            units_per_word,
            latency: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn units_for(&self, prompt: &str) -> u64 {
        // Truncating, like a tokenizer estimate.
        (word_count(prompt) as f64 * self.units_per_word) as u64
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str) -> Result<Completion, ProviderError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let echo: String = prompt.chars().take(ECHO_CHARS).collect();
        Ok(Completion {
            output_units: self.units_for(prompt),
            payload: format!(
                "[MOCK] This is a simulated response from {} to: '{echo}...'",
                self.model
            ),
        })
    }
}
