//! Per-tick ledger and AI usage accounting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// AI token and cost usage accumulated over one orchestrator pass.
///
/// Threaded by `&mut` through the tick call chain — there is deliberately
/// no shared accumulator, so concurrent ticks account independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

impl TickUsage {
    /// Record one LLM call given its token counts and the provider's
    /// per-token (input, output) prices.
    pub fn record(&mut self, input_tokens: u32, output_tokens: u32, prices: (Decimal, Decimal)) {
        self.input_tokens += input_tokens as u64;
        self.output_tokens += output_tokens as u64;
        self.cost += prices.0 * Decimal::from(input_tokens) + prices.1 * Decimal::from(output_tokens);
    }

    pub fn merge(&mut self, other: &TickUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One row per orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTick {
    pub id: Uuid,
    pub discovered: u32,
    pub emails_sent: u32,
    pub followups_sent: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    /// Reference to an autonomous-spend transaction, when one occurred.
    pub spend_tx: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl AgentTick {
    pub fn new(discovered: u32, emails_sent: u32, followups_sent: u32, usage: &TickUsage) -> Self {
        Self {
            id: Uuid::new_v4(),
            discovered,
            emails_sent,
            followups_sent,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: usage.cost,
            spend_tx: None,
            detail: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usage_records_tokens_and_cost() {
        let mut usage = TickUsage::default();
        usage.record(1000, 500, (dec!(0.000003), dec!(0.000015)));
        usage.record(200, 100, (dec!(0.000003), dec!(0.000015)));

        assert_eq!(usage.input_tokens, 1200);
        assert_eq!(usage.output_tokens, 600);
        assert_eq!(usage.total_tokens(), 1800);
        assert_eq!(usage.cost, dec!(0.0126));
    }

    #[test]
    fn usage_merge_folds_independent_accumulators() {
        let mut a = TickUsage::default();
        a.record(100, 50, (dec!(0.01), dec!(0.02)));
        let mut b = TickUsage::default();
        b.record(10, 5, (dec!(0.01), dec!(0.02)));

        a.merge(&b);
        assert_eq!(a.input_tokens, 110);
        assert_eq!(a.output_tokens, 55);
    }
}
