use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;

/// Token usage for one or more model calls; merged additively across
/// chunks and compression calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
}

impl UsageStats {
    pub fn accumulate(&mut self, other: &UsageStats) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Estimated cost in USD for the configured per-1k prices.
    pub fn estimate_cost(&self, pricing: &PricingConfig) -> f64 {
        let prompt = self.prompt_tokens as f64 / 1_000.0 * pricing.prompt_per_1k;
        let completion = self.completion_tokens as f64 / 1_000.0 * pricing.completion_per_1k;
        prompt + completion
    }
}

/// Print the end-of-run usage report.
pub fn print_usage_report(usage: &UsageStats, pricing: &PricingConfig) {
    println!("\nUsage Report");
    println!("{}", "-".repeat(40));
    println!("Prompt tokens:     {:>12}", usage.prompt_tokens);
    println!("Completion tokens: {:>12}", usage.completion_tokens);
    if usage.reasoning_tokens > 0 {
        println!("Reasoning tokens:  {:>12}", usage.reasoning_tokens);
    }
    println!("Total tokens:      {:>12}", usage.total_tokens);
    println!("Estimated cost:    {:>12}", format!("${:.4}", usage.estimate_cost(pricing)));
}
