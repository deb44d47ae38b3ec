use crate::config::EstimateConfig;
use crate::providers::traits::word_count;

/// Pre-dispatch reservation size:
/// `max(min_units, ceil(words * units_per_word) + reserve_output_units)`.
#[derive(Debug, Clone)]
pub struct UsageEstimator {
    units_per_word: f64,
    reserve_output_units: u64,
    min_units: u64,
}

impl UsageEstimator {
    pub fn new(config: &EstimateConfig) -> Self {
        Self {
            units_per_word: config.units_per_word,
            reserve_output_units: config.reserve_output_units,
            min_units: config.min_units,
        }
    }

    pub fn estimate(&self, prompt: &str) -> u64 {
        let input = (word_count(prompt) as f64 * self.units_per_word).ceil() as u64;
        input
            .saturating_add(self.reserve_output_units)
            .max(self.min_units)
    }
}
