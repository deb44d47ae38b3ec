//! Error taxonomy for the gateway core.
//!
//! Quota and routing failures are surfaced to the caller verbatim; nothing in
//! the core retries them. Provider failures never turn into account charges.

use axum::http::StatusCode;
use uuid::Uuid;

/// Failure reported by a provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The call did not finish within the caller-supplied timeout.
    #[error("provider call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    /// Connection, TLS or protocol failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be understood.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    /// The provider reported a failure of its own.
    #[error("upstream failure: {0}")]
    Upstream(String),
    /// No adapter is configured for the selected provider.
    #[error("no adapter configured for provider '{0}'")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // The caller's invoke timeout is the one reported as `Timeout`.
        if err.is_timeout() {
            return Self::Transport(format!("HTTP client timed out: {err}"));
        }
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

/// Errors returned by the gateway core.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown or inactive API key. Raised before any quota interaction.
    #[error("invalid or inactive API key")]
    AuthenticationFailure,

    /// The account's tier request rate was exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The reservation would exceed the allowance on a tier without overage.
    #[error(
        "quota exceeded for account {account_id}: requested {requested} units, {remaining} remaining"
    )]
    QuotaExceeded {
        account_id: String,
        requested: u64,
        remaining: u64,
    },

    /// Every candidate provider is unavailable (or none matched).
    #[error("no provider available for this request")]
    NoProviderAvailable,

    /// The selected provider failed; the reservation was released.
    #[error("provider '{provider_id}' failed: {source}")]
    Provider {
        provider_id: String,
        #[source]
        source: ProviderError,
    },

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A reservation token that the ledger does not hold.
    #[error("reservation {0} is not outstanding")]
    UnknownReservation(Uuid),

    /// Persistence failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::NoProviderAvailable => "no_provider_available",
            Self::Provider { .. } => "provider_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownReservation(_) => "unknown_reservation",
            Self::Storage(_) => "storage_error",
        }
    }

    /// HTTP status the gateway answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationFailure => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } | Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NoProviderAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Provider { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownReservation(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
