//! Fail-stationary chain halt
//!
//! An invariant violation records an emergency plan for the next height and
//! refuses every further mutation. Queries keep working so the state can be
//! inspected.

use super::Keeper;
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::store::keys::HALT_PLAN_KEY;
use crate::store::{KvStore, RegistryLogger, TypedStore};
use crate::types::BlockContext;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Emergency upgrade scheduled after an invariant violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyPlan {
    /// Plan name, `emergency_<height>`
    pub name: String,
    /// Height the chain stops at
    pub height: u64,
    /// Violated invariant
    pub reason: String,
}

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Schedule an emergency halt and return the terminal error.
    ///
    /// The first recorded plan wins; later violations only log.
    pub fn halt_chain(&mut self, ctx: &BlockContext, reason: impl Into<String>) -> RegistryError {
        let reason = reason.into();
        let plan = EmergencyPlan {
            name: format!("emergency_{}", ctx.height + 1),
            height: ctx.height + 1,
            reason,
        };

        RegistryLogger::log_halt(ctx, &plan.name, &plan.reason);

        match self.emergency_plan() {
            Ok(Some(existing)) => {
                return RegistryError::ChainHalted {
                    height: existing.height,
                    reason: existing.reason,
                }
            }
            Ok(None) => {
                if let Err(err) = self.store.set_value(HALT_PLAN_KEY, &plan) {
                    error!("Failed to persist emergency plan {}: {}", plan.name, err);
                }
            }
            Err(err) => error!("Failed to read emergency plan: {}", err),
        }

        RegistryError::ChainHalted {
            height: plan.height,
            reason: plan.reason,
        }
    }

    /// Scheduled emergency plan, if any
    pub fn emergency_plan(&self) -> Result<Option<EmergencyPlan>> {
        self.store.get_value(HALT_PLAN_KEY)
    }

    /// Refuse mutations once a halt is scheduled
    pub(crate) fn ensure_running(&self) -> Result<()> {
        match self.emergency_plan()? {
            Some(plan) => Err(RegistryError::ChainHalted {
                height: plan.height,
                reason: plan.reason,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::keeper::test_utils::*;

    #[test]
    fn test_halt_blocks_mutations_but_not_queries() {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);

        let err = keeper.halt_chain(&ctx(10, 100), "delegator without pool data");
        assert!(err.is_halt());

        // Mutations refused
        fund_accounts(&mut keeper, &["alice"]);
        let result = keeper.stake(&ctx(11, 110), "alice", pool_id, 100);
        assert!(result.unwrap_err().is_halt());

        // Queries still answer
        assert!(keeper.get_pool(pool_id).unwrap().is_some());
    }

    #[test]
    fn test_first_plan_wins() {
        let mut keeper = test_keeper();
        keeper.halt_chain(&ctx(10, 100), "first");
        keeper.halt_chain(&ctx(20, 200), "second");

        let plan = keeper.emergency_plan().unwrap().unwrap();
        assert_eq!(plan.name, "emergency_11");
        assert_eq!(plan.reason, "first");
    }
}
