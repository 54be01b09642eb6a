//! F1 reward distribution
//!
//! Rewards of a staker's delegators accumulate in `current_rewards` of its
//! [`DelegationPoolData`]. Every delegate, undelegate or withdraw closes the
//! current period with a checkpoint
//!
//! `entry[k] = entry[k-1] + current_rewards / total_delegation`
//!
//! and a delegator's reward is `amount * (entry[now] - entry[own k])`. Cost per
//! operation does not depend on the number of delegators.
//!
//! The checkpoint a delegator anchors to is deleted once they move past it.
//! A checkpoint written by an undelegation has no anchor and is deleted by
//! the next operation.

use super::Keeper;
use crate::bank::Bank;
use crate::decimal::Dec;
use crate::error::{RegistryError, Result};
use crate::store::KvStore;
use crate::types::{BlockContext, DelegationEntry, DelegationPoolData, Delegator};
use tracing::debug;

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Close the current period and return the new checkpoint
    fn f1_checkpoint(
        &mut self,
        ctx: &BlockContext,
        data: &mut DelegationPoolData,
    ) -> Result<DelegationEntry> {
        let previous = match self.get_delegation_entry(data.pool_id, &data.staker, data.latest_index_k)? {
            Some(entry) => entry.balance,
            None if data.latest_index_k == 0 => Dec::zero(),
            None => {
                return Err(self.halt_chain(
                    ctx,
                    format!(
                        "delegation entry {} of staker {} in pool {} missing",
                        data.latest_index_k, data.staker, data.pool_id
                    ),
                ))
            }
        };

        let per_token = Dec::from_ratio(data.current_rewards, data.total_delegation);
        let entry = DelegationEntry {
            pool_id: data.pool_id,
            staker: data.staker.clone(),
            k_index: data.latest_index_k + 1,
            balance: &previous + &per_token,
        };

        if data.latest_index_was_undelegation {
            self.remove_delegation_entry(data.pool_id, &data.staker, data.latest_index_k);
        }
        self.set_delegation_entry(&entry)?;

        debug!(
            pool_id = data.pool_id,
            staker = %data.staker,
            k = entry.k_index,
            balance = %entry.balance,
            "F1 checkpoint"
        );

        data.latest_index_k = entry.k_index;
        data.current_rewards = 0;
        data.latest_index_was_undelegation = false;

        Ok(entry)
    }

    /// Accumulator that must exist because a delegator exists
    fn f1_require_data(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
    ) -> Result<DelegationPoolData> {
        match self.get_delegation_pool_data(pool_id, staker)? {
            Some(data) => Ok(data),
            None => Err(self.halt_chain(
                ctx,
                format!(
                    "no delegation data for staker {} in pool {} although somebody is delegating",
                    staker, pool_id
                ),
            )),
        }
    }

    /// Delegator record that the caller has established exists
    fn f1_require_delegator(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<Delegator> {
        match self.get_delegator(pool_id, staker, delegator)? {
            Some(record) => Ok(record),
            None => Err(self.halt_chain(
                ctx,
                format!(
                    "{} is not a delegator of {} in pool {}",
                    delegator, staker, pool_id
                ),
            )),
        }
    }

    /// Start a delegation of `amount`. Overwrites any existing record of the
    /// delegator, so callers undelegate first.
    pub fn f1_delegate(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
        amount: u64,
    ) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let mut data = self
            .get_delegation_pool_data(pool_id, staker)?
            .unwrap_or_else(|| DelegationPoolData {
                pool_id,
                staker: staker.to_string(),
                current_rewards: 0,
                total_delegation: 0,
                latest_index_k: 0,
                delegator_count: 0,
                latest_index_was_undelegation: false,
            });

        let entry = self.f1_checkpoint(ctx, &mut data)?;

        data.total_delegation += amount;
        data.delegator_count += 1;
        self.set_delegation_pool_data(&data)?;

        self.set_delegator(&Delegator {
            pool_id,
            staker: staker.to_string(),
            delegator: delegator.to_string(),
            delegation_amount: amount,
            k_index: entry.k_index,
        })
    }

    /// End a delegation and return its full amount.
    ///
    /// Rewards accrued since the delegator's last checkpoint are forfeited;
    /// call [`Keeper::f1_withdraw`] first to keep them.
    pub fn f1_undelegate(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<u64> {
        let mut data = self.f1_require_data(ctx, pool_id, staker)?;
        let record = self.f1_require_delegator(ctx, pool_id, staker, delegator)?;

        let entry = self.f1_checkpoint(ctx, &mut data)?;
        data.latest_index_was_undelegation = true;
        data.total_delegation = data.total_delegation.saturating_sub(record.delegation_amount);
        data.delegator_count = data.delegator_count.saturating_sub(1);

        self.remove_delegator(pool_id, staker, delegator);
        self.remove_delegation_entry(pool_id, staker, record.k_index);

        if data.delegator_count == 0 {
            self.remove_delegation_pool_data(pool_id, staker);
            self.remove_delegation_entry(pool_id, staker, entry.k_index);
        } else {
            self.set_delegation_pool_data(&data)?;
        }

        Ok(record.delegation_amount)
    }

    /// Settle a delegator's reward and move them to a fresh checkpoint.
    /// Returns the reward; no tokens are transferred.
    pub fn f1_withdraw(
        &mut self,
        ctx: &BlockContext,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<u64> {
        let mut data = self.f1_require_data(ctx, pool_id, staker)?;
        let mut record = self.f1_require_delegator(ctx, pool_id, staker, delegator)?;

        let entry = self.f1_checkpoint(ctx, &mut data)?;
        self.set_delegation_pool_data(&data)?;

        let anchor = match self.get_delegation_entry(pool_id, staker, record.k_index)? {
            Some(anchor) => anchor,
            None => {
                return Err(self.halt_chain(
                    ctx,
                    format!(
                        "delegator {} of {} in pool {} has no entry {}",
                        delegator, staker, pool_id, record.k_index
                    ),
                ))
            }
        };

        self.remove_delegation_entry(pool_id, staker, record.k_index);
        record.k_index = entry.k_index;
        self.set_delegator(&record)?;

        Ok((&entry.balance - &anchor.balance)
            .mul_u64(record.delegation_amount)
            .round_u64())
    }

    /// Reward a withdraw would pay right now, without writing anything.
    /// `None` when the address does not delegate to the staker.
    pub fn f1_current_reward(
        &self,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<Option<u64>> {
        let Some(record) = self.get_delegator(pool_id, staker, delegator)? else {
            return Ok(None);
        };

        let data = self
            .get_delegation_pool_data(pool_id, staker)?
            .ok_or_else(|| {
                RegistryError::InvariantViolation(format!(
                    "no delegation data for staker {} in pool {}",
                    staker, pool_id
                ))
            })?;

        let latest = self
            .get_delegation_entry(pool_id, staker, data.latest_index_k)?
            .map(|entry| entry.balance)
            .unwrap_or_else(Dec::zero);
        let current = &latest + &Dec::from_ratio(data.current_rewards, data.total_delegation);

        let anchor = self
            .get_delegation_entry(pool_id, staker, record.k_index)?
            .ok_or_else(|| {
                RegistryError::InvariantViolation(format!(
                    "delegator {} has no entry {}",
                    delegator, record.k_index
                ))
            })?;

        Ok(Some(
            (&current - &anchor.balance)
                .mul_u64(record.delegation_amount)
                .round_u64(),
        ))
    }

    /// Credit delegation rewards to a staker's accumulator.
    /// Returns `false` when nobody delegates to the staker.
    pub fn add_delegation_rewards(&mut self, pool_id: u64, staker: &str, amount: u64) -> Result<bool> {
        let Some(mut data) = self.get_delegation_pool_data(pool_id, staker)? else {
            return Ok(false);
        };
        if data.delegator_count == 0 {
            return Ok(false);
        }

        data.current_rewards += amount;
        self.set_delegation_pool_data(&data)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::keeper::test_utils::*;

    const POOL: u64 = 0;
    const STAKER: &str = "staker";

    #[test]
    fn test_delegate_withdraw_basic() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "dave", 100).unwrap();
        assert!(keeper.add_delegation_rewards(POOL, STAKER, 10).unwrap());

        let data = keeper.get_delegation_pool_data(POOL, STAKER).unwrap().unwrap();
        assert_eq!(data.current_rewards, 10);
        assert_eq!(data.total_delegation, 100);

        assert_eq!(keeper.f1_current_reward(POOL, STAKER, "dave").unwrap(), Some(10));
        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "dave").unwrap(), 10);

        // Nothing new accrued
        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "dave").unwrap(), 0);
    }

    #[test]
    fn test_rewards_split_by_stake_share() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 300).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "b", 100).unwrap();
        keeper.add_delegation_rewards(POOL, STAKER, 40).unwrap();

        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "a").unwrap(), 30);
        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "b").unwrap(), 10);
    }

    #[test]
    fn test_late_delegator_gets_no_earlier_rewards() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 100).unwrap();
        keeper.add_delegation_rewards(POOL, STAKER, 50).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "b", 100).unwrap();
        keeper.add_delegation_rewards(POOL, STAKER, 20).unwrap();

        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "a").unwrap(), 60);
        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "b").unwrap(), 10);
    }

    #[test]
    fn test_undelegate_without_withdraw_forfeits_reward() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 100).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "b", 100).unwrap();
        keeper.add_delegation_rewards(POOL, STAKER, 50).unwrap();

        let forfeited = keeper.f1_current_reward(POOL, STAKER, "a").unwrap().unwrap();
        assert_eq!(forfeited, 25);

        assert_eq!(keeper.f1_undelegate(&c, POOL, STAKER, "a").unwrap(), 100);
        assert!(keeper.get_delegator(POOL, STAKER, "a").unwrap().is_none());

        // b keeps only its own share, a's share is gone
        assert_eq!(keeper.f1_withdraw(&c, POOL, STAKER, "b").unwrap(), 25);
    }

    #[test]
    fn test_last_undelegation_cleans_up() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 100).unwrap();
        keeper.add_delegation_rewards(POOL, STAKER, 5).unwrap();
        keeper.f1_withdraw(&c, POOL, STAKER, "a").unwrap();
        keeper.f1_undelegate(&c, POOL, STAKER, "a").unwrap();

        assert!(keeper.get_delegation_pool_data(POOL, STAKER).unwrap().is_none());
        assert!(keeper.get_delegation_entries(POOL, STAKER).unwrap().is_empty());
    }

    #[test]
    fn test_undelegation_checkpoint_collected_by_next_operation() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 100).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "b", 100).unwrap();
        keeper.f1_undelegate(&c, POOL, STAKER, "a").unwrap();

        let data = keeper.get_delegation_pool_data(POOL, STAKER).unwrap().unwrap();
        assert!(data.latest_index_was_undelegation);
        let undelegation_k = data.latest_index_k;

        keeper.f1_delegate(&c, POOL, STAKER, "c", 100).unwrap();
        assert!(keeper
            .get_delegation_entry(POOL, STAKER, undelegation_k)
            .unwrap()
            .is_none());

        // Only the anchors of b and c remain
        assert_eq!(keeper.get_delegation_entries(POOL, STAKER).unwrap().len(), 2);
    }

    #[test]
    fn test_withdraw_without_data_halts() {
        let mut keeper = test_keeper();
        let err = keeper.f1_withdraw(&ctx(3, 30), POOL, STAKER, "ghost").unwrap_err();
        assert!(err.is_halt());
        assert!(keeper.emergency_plan().unwrap().is_some());
    }

    #[test]
    fn test_rewards_without_delegators_are_not_credited() {
        let mut keeper = test_keeper();
        assert!(!keeper.add_delegation_rewards(POOL, STAKER, 10).unwrap());
        assert_eq!(keeper.f1_current_reward(POOL, STAKER, "nobody").unwrap(), None);
    }

    #[test]
    fn test_total_delegation_matches_delegators() {
        let mut keeper = test_keeper();
        let c = ctx(1, 10);

        keeper.f1_delegate(&c, POOL, STAKER, "a", 70).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "b", 30).unwrap();
        keeper.f1_delegate(&c, POOL, STAKER, "c", 5).unwrap();
        keeper.f1_undelegate(&c, POOL, STAKER, "b").unwrap();

        let data = keeper.get_delegation_pool_data(POOL, STAKER).unwrap().unwrap();
        let sum: u64 = keeper
            .get_delegators_of_staker(POOL, STAKER)
            .unwrap()
            .iter()
            .map(|d| d.delegation_amount)
            .sum();
        assert_eq!(data.total_delegation, sum);
        assert_eq!(data.delegator_count, 2);
    }
}
