#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::too_many_lines
)]

//! InstaClaw: a unified LLM API gateway.
//!
//! Accounts hold a per-period unit allowance. Each request reserves an
//! estimate against the [`billing::QuotaLedger`], is routed by the
//! [`routing::Router`] to a provider from the [`providers::ProviderRegistry`],
//! and is committed with the provider's reported usage or released on
//! failure. [`gateway`] exposes this over HTTP.

pub mod accounts;
pub mod billing;
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod providers;
pub mod routing;

pub use config::Config;
pub use error::{GatewayError, ProviderError};
