//! Provider adapter capability.
//!
//! The dispatcher is polymorphic over [`ProviderAdapter`]: real HTTP
//! adapters and the deterministic mock are interchangeable and chosen by
//! the provider's `kind` in configuration.

use super::registry::HealthStatus;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a successful provider invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Units the provider reports as consumed (billed to the account).
    pub output_units: u64,
    /// Response text returned to the caller.
    pub payload: String,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry id of the provider this adapter serves.
    fn id(&self) -> &str;

    /// Run the prompt against the provider.
    async fn invoke(&self, prompt: &str) -> Result<Completion, ProviderError>;

    /// Probe the provider. `None` means the adapter has no probe; the
    /// registry then keeps whatever status was last pushed to it.
    async fn health_check(&self) -> Option<HealthStatus> {
        None
    }
}

/// Whitespace-separated word count, the basis of unit estimates.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
