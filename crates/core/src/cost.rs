//! Deterministic pricing of run usage in whole cents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::run::RunUsage;

pub const DEFAULT_TOOL_CALL_RATE_CENTS: u64 = 1;
pub const DEFAULT_TOKENS_PER_CENT: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRates {
    pub tool_call_rate_cents: u64,
    /// Tokens covered by one cent. Partial blocks round up.
    pub tokens_per_cent: u64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            tool_call_rate_cents: DEFAULT_TOOL_CALL_RATE_CENTS,
            tokens_per_cent: DEFAULT_TOKENS_PER_CENT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub tool_call_cents: u64,
    pub token_cents: u64,
    pub base_fee_cents: u64,
    pub total_cents: u64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CostError {
    #[error("cost overflow pricing {tool_calls} tool calls and {tokens_used} tokens")]
    Overflow { tool_calls: u64, tokens_used: u64 },
    #[error("tokens_per_cent must be greater than zero")]
    ZeroTokenRate,
}

pub trait CostModel: Send + Sync {
    fn price(&self, usage: RunUsage) -> Result<CostBreakdown, CostError>;

    fn cost_cents(&self, usage: RunUsage) -> Result<u64, CostError> {
        self.price(usage).map(|breakdown| breakdown.total_cents)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeterministicCostModel {
    rates: CostRates,
}

impl DeterministicCostModel {
    pub fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> CostRates {
        self.rates
    }
}

impl CostModel for DeterministicCostModel {
    fn price(&self, usage: RunUsage) -> Result<CostBreakdown, CostError> {
        price_usage(usage, self.rates)
    }
}

pub fn price_usage(usage: RunUsage, rates: CostRates) -> Result<CostBreakdown, CostError> {
    if rates.tokens_per_cent == 0 {
        return Err(CostError::ZeroTokenRate);
    }
    let overflow =
        || CostError::Overflow { tool_calls: usage.tool_calls, tokens_used: usage.tokens_used };

    let tool_call_cents =
        usage.tool_calls.checked_mul(rates.tool_call_rate_cents).ok_or_else(overflow)?;
    let token_cents = usage.tokens_used.div_ceil(rates.tokens_per_cent);
    let base_fee_cents = 0;
    let total_cents = tool_call_cents
        .checked_add(token_cents)
        .and_then(|sum| sum.checked_add(base_fee_cents))
        .ok_or_else(overflow)?;

    Ok(CostBreakdown { tool_call_cents, token_cents, base_fee_cents, total_cents })
}

/// Price under the default rates.
pub fn cost(tool_calls: u64, tokens_used: u64) -> Result<u64, CostError> {
    price_usage(RunUsage::new(tool_calls, tokens_used), CostRates::default())
        .map(|breakdown| breakdown.total_cents)
}
