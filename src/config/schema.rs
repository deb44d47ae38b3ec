use crate::accounts::Tier;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root configuration, usually loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Directory holding `accounts.db` and `usage.db`. `~` is expanded.
    pub data_dir: String,
    pub gateway: GatewayConfig,
    pub routing: RoutingConfig,
    pub estimate: EstimateConfig,
    pub quota: QuotaConfig,
    pub billing: BillingConfig,
    pub health: HealthConfig,
    /// Downstream providers, in registry insertion order.
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "~/.instaclaw".into(),
            gateway: GatewayConfig::default(),
            routing: RoutingConfig::default(),
            estimate: EstimateConfig::default(),
            quota: QuotaConfig::default(),
            billing: BillingConfig::default(),
            health: HealthConfig::default(),
            providers: default_providers(),
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Whole-request timeout enforced by the HTTP layer.
    pub request_timeout_secs: u64,
    /// Token for `/api/admin/*`. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            max_body_bytes: 65_536,
            request_timeout_secs: 120,
            admin_token: None,
        }
    }
}

// ── Routing ─────────────────────────────────────────────────────

/// Scoring weights for provider selection. Lower score wins.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RoutingConfig {
    /// Multiplier on `cost_per_unit` under the cost preference.
    pub cost_weight: f64,
    /// Multiplier on `quality_score` under the quality preference.
    pub quality_weight: f64,
    /// Score added to degraded providers.
    pub degraded_penalty: f64,
    /// Deadline for a single provider invocation.
    pub invoke_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cost_weight: 1.0,
            quality_weight: 1.0,
            degraded_penalty: 1_000_000.0,
            invoke_timeout_ms: 30_000,
        }
    }
}

// ── Estimate ────────────────────────────────────────────────────

/// Reservation estimate: `max(min_units, ceil(words * units_per_word) + reserve_output_units)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EstimateConfig {
    pub units_per_word: f64,
    pub reserve_output_units: u64,
    pub min_units: u64,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            units_per_word: 1.3,
            reserve_output_units: 256,
            min_units: 1,
        }
    }
}

// ── Quota ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QuotaConfig {
    /// Billing period length; consumption resets when a period ends.
    pub period_days: u32,
    pub tiers: TierPolicies,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            period_days: 30,
            tiers: TierPolicies::default(),
        }
    }
}

/// Allowance and overage policy for one billing tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TierPolicy {
    /// Units granted per billing period.
    pub allowance_units: u64,
    /// Whether usage beyond the allowance is permitted (and billed).
    #[serde(default)]
    pub overage_allowed: bool,
    /// Price per overage unit.
    #[serde(default)]
    pub overage_rate: f64,
    /// Tolerance beyond the allowance for tiers without overage.
    #[serde(default)]
    pub grace_units: u64,
    /// Requests per rolling hour. 0 disables the limit.
    #[serde(default)]
    pub requests_per_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TierPolicies {
    pub free: TierPolicy,
    pub pro: TierPolicy,
    pub enterprise: TierPolicy,
}

impl TierPolicies {
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Enterprise => &self.enterprise,
        }
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            free: TierPolicy {
                allowance_units: 10_000,
                overage_allowed: false,
                overage_rate: 0.0,
                grace_units: 0,
                requests_per_hour: 100,
            },
            pro: TierPolicy {
                allowance_units: 1_000_000,
                overage_allowed: true,
                overage_rate: 0.000_02,
                grace_units: 0,
                requests_per_hour: 5_000,
            },
            enterprise: TierPolicy {
                allowance_units: 10_000_000,
                overage_allowed: true,
                overage_rate: 0.000_01,
                grace_units: 0,
                requests_per_hour: 20_000,
            },
        }
    }
}

// ── Billing / health ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BillingConfig {
    /// Receives every finalized usage record as JSON. Logged only when unset.
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval of the in-process health probe. 0 disables probing.
    pub probe_interval_secs: u64,
}

// ── Providers ───────────────────────────────────────────────────

/// Which adapter implementation serves a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic local responses, no network.
    Mock,
    /// `POST {base_url}/chat/completions`.
    OpenaiCompatible,
    /// `POST {base_url}/v1/messages`.
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Price per unit consumed.
    #[serde(default)]
    pub cost_per_unit: f64,
    /// Declared capability score used by the quality preference.
    #[serde(default)]
    pub quality_score: f64,
    /// Capability tags matched by request filters.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Units the mock adapter bills per prompt word.
    #[serde(default = "default_mock_units_per_word")]
    pub mock_units_per_word: f64,
    /// Artificial latency of the mock adapter.
    #[serde(default)]
    pub mock_latency_ms: u64,
}

fn default_max_output_tokens() -> u32 {
    500
}

fn default_mock_units_per_word() -> f64 {
    1.3
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::Mock,
            cost_per_unit: 0.000_002,
            quality_score: 0.7,
            capabilities: vec!["chat".into(), "gpt-3.5-turbo".into()],
            model: Some("gpt-3.5-turbo".into()),
            base_url: None,
            api_key_env: None,
            max_output_tokens: default_max_output_tokens(),
            mock_units_per_word: 1.3,
            mock_latency_ms: 0,
        },
        ProviderConfig {
            id: "anthropic".into(),
            kind: ProviderKind::Mock,
            cost_per_unit: 0.000_015,
            quality_score: 0.9,
            capabilities: vec!["chat".into(), "claude-3-sonnet".into()],
            model: Some("claude-3-sonnet-20240229".into()),
            base_url: None,
            api_key_env: None,
            max_output_tokens: default_max_output_tokens(),
            mock_units_per_word: 1.2,
            mock_latency_ms: 0,
        },
    ]
}
