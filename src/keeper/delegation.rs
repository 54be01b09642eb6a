//! Delegation operations
//!
//! This module handles:
//! - Delegating to a staker, paying out pending rewards of an existing
//!   delegation first
//! - Requesting an undelegation through the delegation unbonding queue
//! - Withdrawing rewards
//! - Moving a delegation between stakers, rate limited by the redelegation
//!   cooldown
//!
//! All reward math goes through the F1 primitives. A delegation is resized
//! by withdraw, undelegate and a fresh delegate of the new amount so the
//! delegator never forfeits a reward.

use super::unbonding::DELEGATION_UNBONDING_QUEUE;
use super::{traced, Keeper};
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::events::RegistryEvent;
use crate::store::{KvStore, OperationType, RegistryLogger};
use crate::types::{BlockContext, DelegationUnbondingEntry, UnbondingDelegator};

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Grow (or start) a delegation by `amount` and return the reward that
    /// became payable. The caller pays it and updates the pool total.
    pub(crate) fn increase_delegation(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
        amount: u64,
    ) -> Result<u64> {
        if self.get_delegator(pool_id, staker, delegator)?.is_none() {
            self.f1_delegate(ctx, pool_id, staker, delegator, amount)?;
            return Ok(0);
        }

        let reward = self.f1_withdraw(ctx, pool_id, staker, delegator)?;
        let current = self.f1_undelegate(ctx, pool_id, staker, delegator)?;
        self.f1_delegate(ctx, pool_id, staker, delegator, current + amount)?;
        Ok(reward)
    }

    /// Shrink a delegation by `amount` and return the reward that became
    /// payable. A delegation shrunk to zero is removed.
    pub(crate) fn decrease_delegation(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
        amount: u64,
    ) -> Result<u64> {
        let reward = self.f1_withdraw(ctx, pool_id, staker, delegator)?;
        let current = self.f1_undelegate(ctx, pool_id, staker, delegator)?;
        self.f1_delegate(ctx, pool_id, staker, delegator, current.saturating_sub(amount))?;
        Ok(reward)
    }

    /// Delegation that is not yet waiting in the unbonding queue
    fn available_delegation(&self, pool_id: u64, staker: &str, delegator: &str) -> Result<u64> {
        let record = self.load_delegator(pool_id, staker, delegator)?;
        let in_flight = self
            .get_unbonding_delegator(pool_id, staker, delegator)?
            .map(|u| u.unbonding_amount)
            .unwrap_or(0);
        Ok(record.delegation_amount.saturating_sub(in_flight))
    }

    /// Delegate `amount` to a staker of a pool
    pub fn delegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
        amount: u64,
    ) -> Result<()> {
        let result = self.try_delegate(ctx, creator, pool_id, staker, amount);
        traced(OperationType::Delegate, ctx, pool_id, result)
    }

    fn try_delegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
        amount: u64,
    ) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        if creator == staker {
            return Err(RegistryError::SelfDelegation);
        }
        let mut pool = self.load_pool(pool_id)?;
        self.load_staker(staker, pool_id)?;

        self.collect(creator, amount)?;
        let reward = self.increase_delegation(ctx, pool_id, staker, creator, amount)?;
        self.pay_out(ctx, creator, reward)?;

        pool.total_delegation += amount;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::Delegate,
            ctx,
            pool_id,
            format!("{} delegated {} to {}", creator, amount, staker),
        );
        if reward > 0 {
            self.emit(RegistryEvent::WithdrawRewards {
                pool_id,
                address: creator.to_string(),
                staker: staker.to_string(),
                amount: reward,
            });
        }
        self.emit(RegistryEvent::Delegate {
            pool_id,
            address: creator.to_string(),
            staker: staker.to_string(),
            amount,
        });
        Ok(())
    }

    /// Request an undelegation of `amount`. The delegation keeps earning
    /// rewards until the delegation unbonding queue pays it out.
    pub fn undelegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
        amount: u64,
    ) -> Result<()> {
        let result = self.try_undelegate(ctx, creator, pool_id, staker, amount);
        traced(OperationType::Undelegate, ctx, pool_id, result)
    }

    fn try_undelegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
        amount: u64,
    ) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        self.load_pool(pool_id)?;

        let available = self.available_delegation(pool_id, staker, creator)?;
        if amount > available {
            return Err(RegistryError::UndelegateTooHigh(available));
        }

        let entry = DELEGATION_UNBONDING_QUEUE.enqueue(
            &mut self.store,
            DelegationUnbondingEntry {
                index: 0,
                delegator: creator.to_string(),
                staker: staker.to_string(),
                pool_id,
                amount,
                creation_time: ctx.time,
            },
        )?;

        let in_flight = self
            .get_unbonding_delegator(pool_id, staker, creator)?
            .map(|u| u.unbonding_amount)
            .unwrap_or(0);
        self.set_unbonding_delegator(&UnbondingDelegator {
            pool_id,
            staker: staker.to_string(),
            delegator: creator.to_string(),
            unbonding_amount: in_flight + amount,
        })?;

        RegistryLogger::log_operation_success(
            OperationType::Undelegate,
            ctx,
            pool_id,
            format!(
                "{} undelegating {} from {} (queue index {})",
                creator, amount, staker, entry.index
            ),
        );
        self.emit(RegistryEvent::Undelegate {
            pool_id,
            address: creator.to_string(),
            staker: staker.to_string(),
            amount,
        });
        Ok(())
    }

    /// Pay out the pending rewards of a delegation and return them
    pub fn withdraw_rewards(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
    ) -> Result<u64> {
        let result = self.try_withdraw_rewards(ctx, creator, pool_id, staker);
        traced(OperationType::WithdrawRewards, ctx, pool_id, result)
    }

    fn try_withdraw_rewards(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        staker: &str,
    ) -> Result<u64> {
        self.ensure_running()?;
        self.load_pool(pool_id)?;
        self.load_delegator(pool_id, staker, creator)?;

        let reward = self.f1_withdraw(ctx, pool_id, staker, creator)?;
        self.pay_out(ctx, creator, reward)?;

        RegistryLogger::log_operation_success(
            OperationType::WithdrawRewards,
            ctx,
            pool_id,
            format!("{} withdrew {} from {}", creator, reward, staker),
        );
        self.emit(RegistryEvent::WithdrawRewards {
            pool_id,
            address: creator.to_string(),
            staker: staker.to_string(),
            amount: reward,
        });
        Ok(reward)
    }

    /// Move `amount` of a delegation to another staker without unbonding.
    /// Pending rewards of both delegations are paid out.
    #[allow(clippy::too_many_arguments)]
    pub fn redelegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        from_pool_id: u64,
        from_staker: &str,
        to_pool_id: u64,
        to_staker: &str,
        amount: u64,
    ) -> Result<()> {
        let result = self.try_redelegate(
            ctx,
            creator,
            from_pool_id,
            from_staker,
            to_pool_id,
            to_staker,
            amount,
        );
        traced(OperationType::Redelegate, ctx, from_pool_id, result)
    }

    #[allow(clippy::too_many_arguments)]
    fn try_redelegate(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        from_pool_id: u64,
        from_staker: &str,
        to_pool_id: u64,
        to_staker: &str,
        amount: u64,
    ) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        if creator == to_staker {
            return Err(RegistryError::SelfDelegation);
        }
        if from_pool_id == to_pool_id && from_staker == to_staker {
            return Err(RegistryError::InvalidArgs(
                "redelegation source and target are the same".to_string(),
            ));
        }
        self.load_pool(from_pool_id)?;
        self.load_pool(to_pool_id)?;
        self.load_staker(to_staker, to_pool_id)?;

        let available = self.available_delegation(from_pool_id, from_staker, creator)?;
        if amount > available {
            return Err(RegistryError::UndelegateTooHigh(available));
        }
        let expired = self.check_redelegation_slot(ctx, creator)?;

        self.consume_redelegation_slot(ctx, creator, &expired)?;

        let from_reward = self.decrease_delegation(ctx, from_pool_id, from_staker, creator, amount)?;
        let mut from_pool = self.load_pool(from_pool_id)?;
        from_pool.total_delegation = from_pool.total_delegation.saturating_sub(amount);
        self.set_pool(&from_pool)?;

        let to_reward = self.increase_delegation(ctx, to_pool_id, to_staker, creator, amount)?;
        let mut to_pool = self.load_pool(to_pool_id)?;
        to_pool.total_delegation += amount;
        self.set_pool(&to_pool)?;

        self.pay_out(ctx, creator, from_reward + to_reward)?;

        RegistryLogger::log_operation_success(
            OperationType::Redelegate,
            ctx,
            from_pool_id,
            format!(
                "{} moved {} from {}@{} to {}@{}",
                creator, amount, from_staker, from_pool_id, to_staker, to_pool_id
            ),
        );
        self.emit(RegistryEvent::Redelegate {
            from_pool_id,
            from_staker: from_staker.to_string(),
            to_pool_id,
            to_staker: to_staker.to_string(),
            address: creator.to_string(),
            amount,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RegistryError;
    use crate::keeper::test_utils::*;
    use crate::keeper::Keeper;

    fn setup() -> (Keeper, u64) {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice", "bob", "dave", "erin"]);
        keeper.stake(&ctx(1, 1), "alice", pool_id, 1_000).unwrap();
        keeper.stake(&ctx(1, 1), "bob", pool_id, 1_000).unwrap();
        (keeper, pool_id)
    }

    #[test]
    fn test_delegate_updates_totals() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper.delegate(&ctx(2, 2), "erin", pool_id, "alice", 50).unwrap();

        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.total_delegation, 150);
        let data = keeper.get_delegation_pool_data(pool_id, "alice").unwrap().unwrap();
        assert_eq!(data.total_delegation, 150);
        assert_eq!(data.delegator_count, 2);
        assert_eq!(keeper.bank().get_balance("dave"), STARTING_BALANCE - 100);
    }

    #[test]
    fn test_self_delegation_and_unknown_staker() {
        let (mut keeper, pool_id) = setup();
        assert_eq!(
            keeper.delegate(&ctx(2, 2), "alice", pool_id, "alice", 10),
            Err(RegistryError::SelfDelegation)
        );
        assert!(matches!(
            keeper.delegate(&ctx(2, 2), "dave", pool_id, "nobody", 10),
            Err(RegistryError::StakerNotFound { .. })
        ));
    }

    #[test]
    fn test_delegating_again_pays_pending_reward() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();

        // Reward tokens sit in the module like a bundle payout would leave them
        keeper.bank_mut().mint("sponsor", 40);
        keeper.collect("sponsor", 40).unwrap();
        keeper.add_delegation_rewards(pool_id, "alice", 40).unwrap();

        keeper.delegate(&ctx(3, 3), "dave", pool_id, "alice", 100).unwrap();
        assert_eq!(keeper.bank().get_balance("dave"), STARTING_BALANCE - 200 + 40);

        let record = keeper.get_delegator(pool_id, "alice", "dave").unwrap().unwrap();
        assert_eq!(record.delegation_amount, 200);
        assert_eq!(keeper.f1_current_reward(pool_id, "alice", "dave").unwrap(), Some(0));
    }

    #[test]
    fn test_undelegate_is_queued() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper.undelegate(&ctx(3, 3), "dave", pool_id, "alice", 60).unwrap();

        // Still delegated until the queue drains
        let record = keeper.get_delegator(pool_id, "alice", "dave").unwrap().unwrap();
        assert_eq!(record.delegation_amount, 100);
        assert_eq!(
            keeper.undelegate(&ctx(4, 4), "dave", pool_id, "alice", 41),
            Err(RegistryError::UndelegateTooHigh(40))
        );
        assert_eq!(keeper.get_pending_delegation_unbondings("dave").unwrap().len(), 1);
    }

    #[test]
    fn test_undelegate_without_delegation() {
        let (mut keeper, pool_id) = setup();
        assert!(matches!(
            keeper.undelegate(&ctx(3, 3), "dave", pool_id, "alice", 1),
            Err(RegistryError::NoDelegatorFound { .. })
        ));
    }

    #[test]
    fn test_withdraw_rewards_pays_delegator() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper.bank_mut().mint("sponsor", 10);
        keeper.collect("sponsor", 10).unwrap();
        keeper.add_delegation_rewards(pool_id, "alice", 10).unwrap();

        assert_eq!(keeper.withdraw_rewards(&ctx(3, 3), "dave", pool_id, "alice").unwrap(), 10);
        assert_eq!(keeper.withdraw_rewards(&ctx(3, 3), "dave", pool_id, "alice").unwrap(), 0);
        assert_eq!(keeper.bank().get_balance("dave"), STARTING_BALANCE - 100 + 10);
    }

    #[test]
    fn test_redelegate_moves_delegation() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper
            .redelegate(&ctx(3, 3), "dave", pool_id, "alice", pool_id, "bob", 30)
            .unwrap();

        let from = keeper.get_delegator(pool_id, "alice", "dave").unwrap().unwrap();
        let to = keeper.get_delegator(pool_id, "bob", "dave").unwrap().unwrap();
        assert_eq!(from.delegation_amount, 70);
        assert_eq!(to.delegation_amount, 30);
        assert_eq!(keeper.get_pool(pool_id).unwrap().unwrap().total_delegation, 100);
        assert_eq!(keeper.get_redelegation_cooldowns("dave").unwrap().len(), 1);

        assert_eq!(
            keeper.redelegate(&ctx(3, 3), "dave", pool_id, "alice", pool_id, "bob", 10),
            Err(RegistryError::MultipleRedelegationInSameBlock)
        );
    }

    #[test]
    fn test_redelegate_full_amount_removes_source() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper
            .redelegate(&ctx(3, 3), "dave", pool_id, "alice", pool_id, "bob", 100)
            .unwrap();

        assert!(keeper.get_delegator(pool_id, "alice", "dave").unwrap().is_none());
        assert!(keeper.get_delegation_pool_data(pool_id, "alice").unwrap().is_none());
    }

    #[test]
    fn test_redelegate_respects_in_flight_undelegation() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 2), "dave", pool_id, "alice", 100).unwrap();
        keeper.undelegate(&ctx(3, 3), "dave", pool_id, "alice", 80).unwrap();

        assert_eq!(
            keeper.redelegate(&ctx(4, 4), "dave", pool_id, "alice", pool_id, "bob", 30),
            Err(RegistryError::UndelegateTooHigh(20))
        );
        // Rejected redelegation did not spend a slot
        assert!(keeper.get_redelegation_cooldowns("dave").unwrap().is_empty());
    }
}
