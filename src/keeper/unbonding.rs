//! Stake and delegation unbonding
//!
//! Unstake and undelegate requests wait in their queue for the unbonding
//! period. Until then the funds stay bonded: stake can still be slashed and
//! delegations keep earning. The drain applies the reduction and pays out.

use super::Keeper;
use crate::bank::Bank;
use crate::error::Result;
use crate::events::RegistryEvent;
use crate::store::{KvStore, QueueKind, RegistryLogger, TimeQueue};
use crate::types::{
    BlockContext, DelegationUnbondingEntry, Pool, StakeUnbondingEntry, StakerStatus,
    UnbondingDelegator,
};
use tracing::{debug, info};

pub(crate) const STAKE_UNBONDING_QUEUE: TimeQueue<StakeUnbondingEntry> =
    TimeQueue::new(QueueKind::StakeUnbonding);

pub(crate) const DELEGATION_UNBONDING_QUEUE: TimeQueue<DelegationUnbondingEntry> =
    TimeQueue::new(QueueKind::DelegationUnbonding);

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Pool referenced by a queue entry. Pools are never deleted, so a
    /// missing one halts the chain.
    fn load_pool_or_halt(&mut self, ctx: &BlockContext, pool_id: u64) -> Result<Pool> {
        match self.get_pool(pool_id)? {
            Some(pool) => Ok(pool),
            None => Err(self.halt_chain(
                ctx,
                format!("queue entry references missing pool {}", pool_id),
            )),
        }
    }

    /// Drain both unbonding queues
    pub fn process_due_unbondings(&mut self, ctx: &BlockContext) -> Result<()> {
        self.ensure_running()?;

        let period = self.params.unbonding_staking_time;
        let mut drained = 0;
        while let Some(entry) = STAKE_UNBONDING_QUEUE.next_due(&mut self.store, ctx.time, period)? {
            STAKE_UNBONDING_QUEUE.complete(&mut self.store, &entry)?;
            self.finish_stake_unbonding(ctx, &entry)?;
            drained += 1;
        }
        RegistryLogger::log_queue_drain(QueueKind::StakeUnbonding, ctx, drained);

        let period = self.params.unbonding_delegation_time;
        let mut drained = 0;
        while let Some(entry) =
            DELEGATION_UNBONDING_QUEUE.next_due(&mut self.store, ctx.time, period)?
        {
            DELEGATION_UNBONDING_QUEUE.complete(&mut self.store, &entry)?;
            self.finish_delegation_unbonding(ctx, &entry)?;
            drained += 1;
        }
        RegistryLogger::log_queue_drain(QueueKind::DelegationUnbonding, ctx, drained);

        Ok(())
    }

    /// Pay back unbonded stake. Slashes during the period reduce the payout;
    /// a staker left with nothing is removed.
    fn finish_stake_unbonding(&mut self, ctx: &BlockContext, entry: &StakeUnbondingEntry) -> Result<()> {
        let Some(mut staker) = self.get_staker(&entry.staker, entry.pool_id)? else {
            debug!(staker = %entry.staker, pool_id = entry.pool_id, "Unbonding staker is gone");
            return Ok(());
        };
        let mut pool = self.load_pool_or_halt(ctx, entry.pool_id)?;

        let amount = entry.amount.min(staker.amount);
        staker.unbonding_amount = staker.unbonding_amount.saturating_sub(entry.amount);

        if amount == staker.amount {
            self.remove_staker(&mut pool, &staker)?;
        } else {
            staker.amount -= amount;
            match staker.status {
                StakerStatus::Active => pool.total_stake = pool.total_stake.saturating_sub(amount),
                StakerStatus::Inactive => {
                    pool.total_inactive_stake = pool.total_inactive_stake.saturating_sub(amount)
                }
            }
            self.set_staker(&staker)?;
            self.update_lowest_staker(&mut pool)?;
        }

        self.set_pool(&pool)?;
        self.pay_out(ctx, &entry.staker, amount)?;

        info!(
            pool_id = entry.pool_id,
            staker = %entry.staker,
            amount,
            "Stake unbonded"
        );
        self.emit(RegistryEvent::StakeUnbonded {
            pool_id: entry.pool_id,
            address: entry.staker.clone(),
            amount,
        });
        Ok(())
    }

    /// Pay back an undelegated amount together with the rewards it earned
    /// while unbonding
    fn finish_delegation_unbonding(
        &mut self,
        ctx: &BlockContext,
        entry: &DelegationUnbondingEntry,
    ) -> Result<()> {
        let in_flight = self
            .get_unbonding_delegator(entry.pool_id, &entry.staker, &entry.delegator)?
            .map(|u| u.unbonding_amount)
            .unwrap_or(0);
        self.set_unbonding_delegator(&UnbondingDelegator {
            pool_id: entry.pool_id,
            staker: entry.staker.clone(),
            delegator: entry.delegator.clone(),
            unbonding_amount: in_flight.saturating_sub(entry.amount),
        })?;

        let Some(record) = self.get_delegator(entry.pool_id, &entry.staker, &entry.delegator)? else {
            return Err(self.halt_chain(
                ctx,
                format!(
                    "unbonding delegation of {} to {} in pool {} has no delegator",
                    entry.delegator, entry.staker, entry.pool_id
                ),
            ));
        };
        let amount = entry.amount.min(record.delegation_amount);

        let reward =
            self.decrease_delegation(ctx, entry.pool_id, &entry.staker, &entry.delegator, amount)?;

        let mut pool = self.load_pool_or_halt(ctx, entry.pool_id)?;
        pool.total_delegation = pool.total_delegation.saturating_sub(amount);
        self.set_pool(&pool)?;

        self.pay_out(ctx, &entry.delegator, amount + reward)?;

        info!(
            pool_id = entry.pool_id,
            delegator = %entry.delegator,
            staker = %entry.staker,
            amount,
            reward,
            "Delegation unbonded"
        );
        if reward > 0 {
            self.emit(RegistryEvent::WithdrawRewards {
                pool_id: entry.pool_id,
                address: entry.delegator.clone(),
                staker: entry.staker.clone(),
                amount: reward,
            });
        }
        self.emit(RegistryEvent::DelegationUnbonded {
            pool_id: entry.pool_id,
            address: entry.delegator.clone(),
            staker: entry.staker.clone(),
            amount,
        });
        Ok(())
    }

    /// Stake unbondings requested by an address in any pool
    pub fn get_pending_stake_unbondings(&self, staker: &str) -> Result<Vec<StakeUnbondingEntry>> {
        STAKE_UNBONDING_QUEUE.find_by_secondary(
            &self.store,
            &crate::store::KeyBuilder::new(&[]).str(staker).build(),
        )
    }

    /// Delegation unbondings requested by an address
    pub fn get_pending_delegation_unbondings(
        &self,
        delegator: &str,
    ) -> Result<Vec<DelegationUnbondingEntry>> {
        DELEGATION_UNBONDING_QUEUE.find_by_secondary(
            &self.store,
            &DelegationUnbondingEntry::delegator_prefix(delegator),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::keeper::test_utils::*;
    use crate::keeper::Keeper;
    use crate::params::Params;

    const PERIOD: u64 = 100;

    fn setup() -> (Keeper, u64) {
        let mut keeper = test_keeper();
        keeper
            .set_params(Params {
                unbonding_staking_time: PERIOD,
                unbonding_delegation_time: PERIOD,
                ..Params::default()
            })
            .unwrap();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice", "bob", "dave"]);
        keeper.stake(&ctx(1, 0), "alice", pool_id, 1_000).unwrap();
        keeper.stake(&ctx(1, 0), "bob", pool_id, 500).unwrap();
        (keeper, pool_id)
    }

    #[test]
    fn test_stake_unbonding_pays_after_period() {
        let (mut keeper, pool_id) = setup();
        keeper.unstake(&ctx(2, 10), "alice", pool_id, 400).unwrap();

        keeper.process_due_unbondings(&ctx(3, 109)).unwrap();
        assert_eq!(keeper.get_staker("alice", pool_id).unwrap().unwrap().amount, 1_000);

        keeper.process_due_unbondings(&ctx(4, 110)).unwrap();
        let staker = keeper.get_staker("alice", pool_id).unwrap().unwrap();
        assert_eq!(staker.amount, 600);
        assert_eq!(staker.unbonding_amount, 0);
        assert_eq!(keeper.bank().get_balance("alice"), STARTING_BALANCE - 600);

        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.total_stake, 1_100);
        assert_eq!(pool.lowest_staker, "bob");
    }

    #[test]
    fn test_full_unbonding_removes_staker() {
        let (mut keeper, pool_id) = setup();
        keeper.unstake(&ctx(2, 10), "bob", pool_id, 500).unwrap();
        keeper.process_due_unbondings(&ctx(3, 200)).unwrap();

        assert!(keeper.get_staker("bob", pool_id).unwrap().is_none());
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.stakers, vec!["alice".to_string()]);
        assert_eq!(pool.total_stake, 1_000);
        assert_eq!(keeper.bank().get_balance("bob"), STARTING_BALANCE);
    }

    #[test]
    fn test_slash_during_unbonding_reduces_payout() {
        let (mut keeper, pool_id) = setup();
        keeper.unstake(&ctx(2, 10), "bob", pool_id, 500).unwrap();

        let c = ctx(3, 20);
        let mut pool = keeper.load_pool(pool_id).unwrap();
        let ratio = "0.2".parse().unwrap();
        keeper
            .slash_staker(&c, &mut pool, "bob", &ratio, crate::events::SlashType::Upload)
            .unwrap();
        keeper.set_pool(&pool).unwrap();

        keeper.process_due_unbondings(&ctx(4, 200)).unwrap();
        assert!(keeper.get_staker("bob", pool_id).unwrap().is_none());
        assert_eq!(keeper.bank().get_balance("bob"), STARTING_BALANCE - 100);
    }

    #[test]
    fn test_delegation_unbonding_pays_amount_and_reward() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 10), "dave", pool_id, "alice", 100).unwrap();
        keeper.undelegate(&ctx(3, 20), "dave", pool_id, "alice", 100).unwrap();

        // Rewards keep accruing while unbonding
        keeper.bank_mut().mint("sponsor", 30);
        keeper.collect("sponsor", 30).unwrap();
        keeper.add_delegation_rewards(pool_id, "alice", 30).unwrap();

        keeper.process_due_unbondings(&ctx(4, 120)).unwrap();
        assert!(keeper.get_delegator(pool_id, "alice", "dave").unwrap().is_none());
        assert!(keeper.get_unbonding_delegator(pool_id, "alice", "dave").unwrap().is_none());
        assert_eq!(keeper.bank().get_balance("dave"), STARTING_BALANCE + 30);
        assert_eq!(keeper.get_pool(pool_id).unwrap().unwrap().total_delegation, 0);
    }

    #[test]
    fn test_partial_delegation_unbonding_keeps_remainder() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 10), "dave", pool_id, "alice", 100).unwrap();
        keeper.undelegate(&ctx(3, 20), "dave", pool_id, "alice", 30).unwrap();
        keeper.process_due_unbondings(&ctx(4, 120)).unwrap();

        let record = keeper.get_delegator(pool_id, "alice", "dave").unwrap().unwrap();
        assert_eq!(record.delegation_amount, 70);
        assert_eq!(keeper.get_pool(pool_id).unwrap().unwrap().total_delegation, 70);
        assert!(keeper.get_pending_delegation_unbondings("dave").unwrap().is_empty());
    }

    #[test]
    fn test_drain_twice_is_noop() {
        let (mut keeper, pool_id) = setup();
        keeper.unstake(&ctx(2, 10), "alice", pool_id, 100).unwrap();
        keeper.unstake(&ctx(2, 50), "alice", pool_id, 100).unwrap();

        keeper.process_due_unbondings(&ctx(3, 120)).unwrap();
        let balance = keeper.bank().get_balance("alice");
        keeper.process_due_unbondings(&ctx(3, 120)).unwrap();
        assert_eq!(keeper.bank().get_balance("alice"), balance);
        assert_eq!(keeper.get_pending_stake_unbondings("alice").unwrap().len(), 1);
    }
}
