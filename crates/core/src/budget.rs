//! Per-tenant budget ledger.
//!
//! A run reserves its ceilings before it starts and settles the reservation to its actual
//! usage once finalized. A dimension the run leaves uncapped but the tenant limits reserves
//! whatever allowance remains, and that remainder becomes the run's ceiling. Check-and-reserve
//! is serialized per tenant, so concurrent runs for one tenant can never jointly overdraw an
//! allowance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::run::{BudgetConfig, RunId, TenantId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAmounts {
    pub cost_cents: u64,
    pub tool_calls: u64,
    pub duration_ms: u64,
}

impl BudgetAmounts {
    fn saturating_add(self, other: Self) -> Self {
        Self {
            cost_cents: self.cost_cents.saturating_add(other.cost_cents),
            tool_calls: self.tool_calls.saturating_add(other.tool_calls),
            duration_ms: self.duration_ms.saturating_add(other.duration_ms),
        }
    }
}

/// A request to reserve budget for one run. `caps` are the run's own ceilings; `None` means
/// the run sets no ceiling for that dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BudgetCharge {
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub caps: BudgetConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub amounts: BudgetAmounts,
    /// Ceilings the run must stay under: its own caps, tightened to the reserved remainder
    /// for dimensions only the tenant limits.
    pub caps: BudgetConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChargeDecision {
    Allowed { reservation: Reservation },
    Denied { reason: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown reservation `{0}`")]
    UnknownReservation(String),
    #[error("budget ledger unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Atomically checks the tenant's remaining allowance and reserves `charge`.
    ///
    /// Implementations must return a ceiling in [`Reservation::caps`] for every dimension the
    /// tenant limits, so an admitted run cannot spend past the reservation.
    async fn try_charge(&self, charge: BudgetCharge) -> Result<ChargeDecision, LedgerError>;

    /// Replaces the reservation with what the run actually consumed.
    async fn settle(
        &self,
        reservation: &Reservation,
        actual: BudgetAmounts,
    ) -> Result<(), LedgerError>;
}

/// Upper bounds on cumulative tenant usage. `None` fields are unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantAllowance {
    pub max_cost_cents: Option<u64>,
    pub max_tool_calls: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TenantUsage {
    pub committed: BudgetAmounts,
    pub reserved: BudgetAmounts,
    pub open_reservations: usize,
}

#[derive(Debug, Default)]
struct TenantAccount {
    allowance: Option<TenantAllowance>,
    committed: BudgetAmounts,
    reservations: HashMap<String, BudgetAmounts>,
}

impl TenantAccount {
    fn reserved(&self) -> BudgetAmounts {
        self.reservations
            .values()
            .fold(BudgetAmounts::default(), |total, amounts| total.saturating_add(*amounts))
    }

    /// Resolves the run's ceilings against what the allowance still has room for.
    fn reserve(&self, requested: &BudgetConfig) -> Result<(BudgetAmounts, BudgetConfig), String> {
        let allowance = self.allowance.unwrap_or_default();
        let in_use = self.committed.saturating_add(self.reserved());

        let cost_cents = claim(
            ("cost", "cents"),
            allowance.max_cost_cents,
            in_use.cost_cents,
            requested.max_cost_cents,
        )?;
        let tool_calls = claim(
            ("tool call", "calls"),
            allowance.max_tool_calls,
            in_use.tool_calls,
            requested.max_tool_calls,
        )?;
        let duration_ms = claim(
            ("duration", "ms"),
            allowance.max_duration_ms,
            in_use.duration_ms,
            requested.max_duration_ms,
        )?;

        let amounts = BudgetAmounts {
            cost_cents: cost_cents.unwrap_or(0),
            tool_calls: tool_calls.unwrap_or(0),
            duration_ms: duration_ms.unwrap_or(0),
        };
        let caps = BudgetConfig {
            max_cost_cents: cost_cents,
            max_duration_ms: duration_ms,
            max_tool_calls: tool_calls,
        };
        Ok((amounts, caps))
    }
}

/// The ceiling one dimension gets, or the denial reason. `None` is unbounded.
fn claim(
    (label, unit): (&str, &str),
    limit: Option<u64>,
    used: u64,
    wanted: Option<u64>,
) -> Result<Option<u64>, String> {
    let Some(limit) = limit else {
        return Ok(wanted);
    };

    match wanted {
        Some(wanted) if used.saturating_add(wanted) > limit => Err(format!(
            "tenant {label} allowance of {limit} {unit} exhausted \
             ({used} {unit} committed or reserved, {wanted} {unit} requested)"
        )),
        Some(wanted) => Ok(Some(wanted)),
        None => match limit.saturating_sub(used) {
            0 => Err(format!(
                "tenant {label} allowance of {limit} {unit} exhausted \
                 ({used} {unit} committed or reserved)"
            )),
            remaining => Ok(Some(remaining)),
        },
    }
}

#[derive(Default)]
pub struct InMemoryBudgetLedger {
    accounts: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<TenantAccount>>>>,
}

impl fmt::Debug for InMemoryBudgetLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBudgetLedger").finish_non_exhaustive()
    }
}

impl InMemoryBudgetLedger {
    pub async fn set_allowance(&self, tenant_id: &TenantId, allowance: TenantAllowance) {
        self.account(tenant_id).lock().await.allowance = Some(allowance);
    }

    pub async fn usage(&self, tenant_id: &TenantId) -> TenantUsage {
        let account = self.account(tenant_id);
        let account = account.lock().await;
        TenantUsage {
            committed: account.committed,
            reserved: account.reserved(),
            open_reservations: account.reservations.len(),
        }
    }

    fn account(&self, tenant_id: &TenantId) -> Arc<tokio::sync::Mutex<TenantAccount>> {
        let mut accounts = match self.accounts.lock() {
            Ok(accounts) => accounts,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(accounts.entry(tenant_id.clone()).or_default())
    }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn try_charge(&self, charge: BudgetCharge) -> Result<ChargeDecision, LedgerError> {
        let account = self.account(&charge.tenant_id);
        let mut account = account.lock().await;

        let (amounts, caps) = match account.reserve(&charge.caps) {
            Ok(resolved) => resolved,
            Err(reason) => {
                debug!(
                    event_name = "budget.charge_denied",
                    tenant_id = %charge.tenant_id,
                    run_id = %charge.run_id,
                    reason = %reason,
                    "budget charge denied"
                );
                return Ok(ChargeDecision::Denied { reason });
            }
        };

        let reservation_id = Uuid::new_v4().to_string();
        account.reservations.insert(reservation_id.clone(), amounts);

        Ok(ChargeDecision::Allowed {
            reservation: Reservation {
                reservation_id,
                tenant_id: charge.tenant_id,
                run_id: charge.run_id,
                amounts,
                caps,
            },
        })
    }

    async fn settle(
        &self,
        reservation: &Reservation,
        actual: BudgetAmounts,
    ) -> Result<(), LedgerError> {
        let account = self.account(&reservation.tenant_id);
        let mut account = account.lock().await;

        if account.reservations.remove(&reservation.reservation_id).is_none() {
            return Err(LedgerError::UnknownReservation(reservation.reservation_id.clone()));
        }
        account.committed = account.committed.saturating_add(actual);
        Ok(())
    }
}
