//! Per-model rate budgets.
//!
//! Requests-per-minute limits by model, with a conservative "safety"
//! budget selectable per job. The run loop feeds the effective rpm into
//! the rate-limited queue as its interval cap over a 60-second window,
//! with concurrency fixed at 1: sequential processing keeps the per-row
//! retry/pause protocol trivially ordered.

use std::time::Duration;

/// Window length the rpm budgets apply to.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Requests-per-minute budget for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Budget under normal operation.
    pub standard_rpm: u32,
    /// Budget with the safety flag set.
    pub safety_rpm: u32,
}

const DEFAULT_POLICY: RatePolicy = RatePolicy {
    standard_rpm: 15,
    safety_rpm: 10,
};

const MODEL_RATE_POLICIES: &[(&str, RatePolicy)] = &[
    (
        "gemini-1.5-flash",
        RatePolicy {
            standard_rpm: 15,
            safety_rpm: 10,
        },
    ),
    (
        "gemini-1.5-pro",
        RatePolicy {
            standard_rpm: 2,
            safety_rpm: 1,
        },
    ),
];

/// Look up the rate policy for a model. Unknown models get the default.
pub fn rate_policy(model: &str) -> RatePolicy {
    MODEL_RATE_POLICIES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, policy)| *policy)
        .unwrap_or(DEFAULT_POLICY)
}

/// Effective rpm for a model under the given safety setting.
pub fn effective_rpm(model: &str, safety_mode: bool) -> u32 {
    let policy = rate_policy(model);
    if safety_mode {
        policy.safety_rpm
    } else {
        policy.standard_rpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        assert_eq!(rate_policy("gemini-1.5-flash").standard_rpm, 15);
        assert_eq!(rate_policy("gemini-1.5-flash").safety_rpm, 10);
        assert_eq!(rate_policy("gemini-1.5-pro").standard_rpm, 2);
        assert_eq!(rate_policy("gemini-1.5-pro").safety_rpm, 1);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        assert_eq!(rate_policy("mystery-model"), DEFAULT_POLICY);
    }

    #[test]
    fn test_effective_rpm() {
        assert_eq!(effective_rpm("gemini-1.5-flash", false), 15);
        assert_eq!(effective_rpm("gemini-1.5-flash", true), 10);
        assert_eq!(effective_rpm("gemini-1.5-pro", true), 1);
        assert_eq!(effective_rpm("unknown", false), 15);
    }
}
