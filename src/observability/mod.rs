pub mod metrics;

pub use metrics::GatewayMetrics;
