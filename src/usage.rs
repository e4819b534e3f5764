//! # Usage counters
//!
//! [`Usage`] counts tokens and requests for a single model call.
//! [`UsageStats`] aggregates them for a whole run, broken down by agent and
//! by model label. Nested runs (agents used as tools) fold their usage into
//! the parent run through the shared [`RunContext`](crate::context::RunContext).
//!
//! ```rust
//! use agents_runtime::usage::{Usage, UsageStats};
//!
//! let mut stats = UsageStats::new();
//! stats.record("gpt-4o", "Triage", Usage::new(120, 30));
//! stats.record("gpt-4o-mini", "Billing", Usage::new(80, 20));
//!
//! assert_eq!(stats.total.total_tokens, 250);
//! assert_eq!(stats.total.request_count, 2);
//! assert_eq!(stats.by_agent["Billing"].total_tokens, 100);
//! ```

use std::collections::BTreeMap;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Token usage for a single model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: usize,

    /// Tokens in the generated completion.
    pub completion_tokens: usize,

    /// `prompt_tokens + completion_tokens`.
    pub total_tokens: usize,

    /// Number of model requests. 1 for a single call.
    pub request_count: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            request_count: 1,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_usage(&other);
        self
    }
}

/// Usage aggregated across a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub total: Usage,
    pub by_model: BTreeMap<String, Usage>,
    pub by_agent: BTreeMap<String, Usage>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one model call against the total and both breakdowns.
    pub fn record(&mut self, model: &str, agent: &str, usage: Usage) {
        self.total.add_usage(&usage);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add_usage(&usage);
        self.by_agent
            .entry(agent.to_string())
            .or_default()
            .add_usage(&usage);
    }

    pub fn summary(&self) -> String {
        let mut report = format!(
            "Usage Summary:\nTotal Tokens: {}\nTotal Requests: {}\n",
            self.total.total_tokens, self.total.request_count
        );
        if !self.by_agent.is_empty() {
            report.push_str("\nBy Agent:\n");
            for (agent, usage) in &self.by_agent {
                report.push_str(&format!(
                    "  {}: {} tokens, {} requests\n",
                    agent, usage.total_tokens, usage.request_count
                ));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.request_count, 1);
        assert_eq!(Usage::empty().request_count, 0);
    }

    #[test]
    fn test_usage_add_operator() {
        let combined = Usage::new(100, 50) + Usage::new(200, 100);
        assert_eq!(combined.prompt_tokens, 300);
        assert_eq!(combined.completion_tokens, 150);
        assert_eq!(combined.total_tokens, 450);
        assert_eq!(combined.request_count, 2);
    }

    #[test]
    fn test_usage_stats_breakdown() {
        let mut stats = UsageStats::new();
        stats.record("m1", "Agent1", Usage::new(100, 50));
        stats.record("m1", "Agent2", Usage::new(200, 100));
        stats.record("m2", "Agent1", Usage::new(300, 150));

        assert_eq!(stats.total.total_tokens, 900);
        assert_eq!(stats.total.request_count, 3);
        assert_eq!(stats.by_model["m1"].total_tokens, 450);
        assert_eq!(stats.by_agent["Agent1"].total_tokens, 600);
    }

    #[test]
    fn test_summary_lists_agents() {
        let mut stats = UsageStats::new();
        stats.record("m", "TestAgent", Usage::new(1000, 500));
        let summary = stats.summary();
        assert!(summary.contains("Total Tokens: 1500"));
        assert!(summary.contains("TestAgent"));
    }
}
