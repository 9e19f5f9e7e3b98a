//! Token usage and cost accounting for LLM calls.

use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// Accumulated LLM usage for one provider call or a whole benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub llm_calls: u32,
    /// Estimated cost in USD
    pub estimated_cost: f64,
    pub cache_creation_tokens: u32,
    pub cache_read_tokens: u32,
}

impl LlmUsage {
    /// Add token usage from one completion.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.estimated_cost += other.estimated_cost;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens: input, output, cache write, cache read
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("sonnet-4-5") => (3.0, 15.0, 3.75, 0.3),
            m if m.contains("opus-4-5") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku-4-5") => (1.0, 5.0, 1.25, 0.1),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.0, 0.0),
            m if m.contains("gpt-4o") => (2.5, 10.0, 0.0, 0.0),
            // Self-hosted models
            m if m.contains("medgemma") || m.contains("llama") => (0.0, 0.0, 0.0, 0.0),
            _ => (3.0, 15.0, 3.75, 0.3),
        };

        let per_million = |tokens: u32, rate: f64| tokens as f64 / 1_000_000.0 * rate;
        per_million(usage.prompt_tokens, input_rate)
            + per_million(usage.completion_tokens, output_rate)
            + per_million(usage.cache_creation_tokens, cache_write_rate)
            + per_million(usage.cache_read_tokens, cache_read_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            ..Default::default()
        }
    }

    #[test]
    fn test_cost_estimation() {
        let mut total = LlmUsage::default();
        total.add(&usage(1000, 500), "claude-sonnet-4-5");

        // 1000 * $3/MTok + 500 * $15/MTok = $0.0105
        assert!((total.estimated_cost - 0.0105).abs() < 1e-9);
        assert_eq!(total.total_tokens, 1500);
        assert_eq!(total.llm_calls, 1);
    }

    #[test]
    fn test_self_hosted_is_free() {
        let mut total = LlmUsage::default();
        total.add(&usage(5000, 5000), "medgemma-27b");
        assert_eq!(total.estimated_cost, 0.0);
    }

    #[test]
    fn test_merge() {
        let mut a = LlmUsage::default();
        a.add(&usage(10, 5), "gpt-4o-mini");
        let mut b = LlmUsage::default();
        b.add(&usage(20, 5), "gpt-4o-mini");
        a.merge(&b);
        assert_eq!(a.llm_calls, 2);
        assert_eq!(a.prompt_tokens, 30);
    }
}
