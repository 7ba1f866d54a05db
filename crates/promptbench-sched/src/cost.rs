//! Batch-pricing cost estimation.
//!
//! Estimates what a job's token usage would have cost at standard
//! pricing versus batch pricing, and the savings between the two. The
//! run loop records the savings on the job at completion.

use promptbench_provider::TokenUsage;

/// USD per one million tokens, split by input/output and pricing tier.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub standard_input: f64,
    pub standard_output: f64,
    pub batch_input: f64,
    pub batch_output: f64,
}

const PRICING_TABLE: &[(&str, ModelPricing)] = &[(
    "gemini-2.5-flash",
    ModelPricing {
        standard_input: 0.075,
        standard_output: 0.30,
        batch_input: 0.0375,
        batch_output: 0.15,
    },
)];

const DEFAULT_PRICING: ModelPricing = PRICING_TABLE[0].1;

/// Cost comparison for one job's usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Cost at standard pricing, USD.
    pub standard_usd: f64,
    /// Cost at batch pricing, USD.
    pub batch_usd: f64,
    /// Absolute savings, USD.
    pub savings_usd: f64,
    /// Savings as a percentage of the standard cost.
    pub savings_percent: f64,
}

/// Pricing for a model. Unknown models fall back to the flash tier.
pub fn model_pricing(model: &str) -> ModelPricing {
    PRICING_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Estimate standard-vs-batch cost for the given usage.
pub fn calculate_savings(model: &str, usage: TokenUsage) -> CostEstimate {
    let pricing = model_pricing(model);
    let prompt_m = usage.prompt_tokens as f64 / 1_000_000.0;
    let completion_m = usage.completion_tokens as f64 / 1_000_000.0;

    let standard = prompt_m * pricing.standard_input + completion_m * pricing.standard_output;
    let batch = prompt_m * pricing.batch_input + completion_m * pricing.batch_output;
    let savings = standard - batch;

    CostEstimate {
        standard_usd: standard,
        batch_usd: batch,
        savings_usd: savings,
        savings_percent: if standard > 0.0 {
            savings / standard * 100.0
        } else {
            0.0
        },
    }
}

/// Format a USD amount for display, with sub-cent amounts kept readable.
pub fn format_usd(amount: f64) -> String {
    if amount != 0.0 && amount.abs() < 0.01 {
        format!("${amount:.6}")
    } else {
        format!("${amount:.2}")
    }
}
