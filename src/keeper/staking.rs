//! Staking operations
//!
//! This module handles:
//! - Joining a pool or increasing stake, with eviction of the lowest staker
//!   when the active set is full
//! - Requesting an unbonding through the stake unbonding queue
//! - Reactivating an inactive staker
//! - Staker metadata

use super::unbonding::STAKE_UNBONDING_QUEUE;
use super::{traced, Keeper};
use crate::bank::Bank;
use crate::decimal::Dec;
use crate::error::{RegistryError, Result};
use crate::events::RegistryEvent;
use crate::params::DEFAULT_COMMISSION;
use crate::store::{KvStore, OperationType, RegistryLogger};
use crate::types::{BlockContext, Pool, StakeUnbondingEntry, Staker, StakerStatus};
use tracing::warn;

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Lowest active staker to evict so `amount` fits into a full active set.
    /// `None` when a slot is free.
    fn eviction_candidate(&self, pool: &Pool, amount: u64) -> Result<Option<String>> {
        if pool.stakers.len() < self.params.max_stakers {
            return Ok(None);
        }
        let lowest = self.load_staker(&pool.lowest_staker, pool.id)?;
        if amount > lowest.amount {
            Ok(Some(lowest.account))
        } else {
            Err(RegistryError::StakeTooLow(lowest.amount))
        }
    }

    /// Stake `amount` into a pool.
    ///
    /// An existing staker keeps its status and grows its amount. A new staker
    /// joins the active set; if the set is full the lowest staker is moved to
    /// the inactive set, provided `amount` is strictly higher than its stake.
    pub fn stake(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        let result = self.try_stake(ctx, creator, pool_id, amount);
        traced(OperationType::Stake, ctx, pool_id, result)
    }

    fn try_stake(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        let mut pool = self.load_pool(pool_id)?;

        match self.get_staker(creator, pool_id)? {
            Some(mut staker) => {
                self.collect(creator, amount)?;
                staker.amount += amount;
                match staker.status {
                    StakerStatus::Active => pool.total_stake += amount,
                    StakerStatus::Inactive => pool.total_inactive_stake += amount,
                }
                self.set_staker(&staker)?;
            }
            None => {
                let evict = self.eviction_candidate(&pool, amount)?;
                self.collect(creator, amount)?;

                if let Some(lowest) = evict {
                    warn!(pool_id, evicted = %lowest, "Active staker set full, evicting lowest staker");
                    self.deactivate_staker(&mut pool, &lowest)?;
                }

                pool.stakers.push(creator.to_string());
                pool.total_stake += amount;
                self.set_staker(&Staker {
                    account: creator.to_string(),
                    pool_id,
                    amount,
                    unbonding_amount: 0,
                    status: StakerStatus::Active,
                    commission: DEFAULT_COMMISSION.parse::<Dec>()?,
                    points: 0,
                    moniker: String::new(),
                    website: String::new(),
                    logo: String::new(),
                })?;
            }
        }

        self.update_lowest_staker(&mut pool)?;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::Stake,
            ctx,
            pool_id,
            format!("{} staked {}", creator, amount),
        );
        self.emit(RegistryEvent::Stake {
            pool_id,
            address: creator.to_string(),
            amount,
        });
        Ok(())
    }

    /// Request an unbonding of `amount`. The stake keeps counting (and can be
    /// slashed) until the stake unbonding queue pays it out.
    pub fn unstake(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        let result = self.try_unstake(ctx, creator, pool_id, amount);
        traced(OperationType::Unstake, ctx, pool_id, result)
    }

    fn try_unstake(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        self.load_pool(pool_id)?;
        let mut staker = self.load_staker(creator, pool_id)?;

        let available = staker.available_unstake_amount();
        if amount > available {
            return Err(RegistryError::UnstakeTooHigh(available));
        }

        let entry = STAKE_UNBONDING_QUEUE.enqueue(
            &mut self.store,
            StakeUnbondingEntry {
                index: 0,
                staker: creator.to_string(),
                pool_id,
                amount,
                creation_time: ctx.time,
            },
        )?;

        staker.unbonding_amount += amount;
        self.set_staker(&staker)?;

        RegistryLogger::log_operation_success(
            OperationType::Unstake,
            ctx,
            pool_id,
            format!("{} unbonding {} (queue index {})", creator, amount, entry.index),
        );
        self.emit(RegistryEvent::Unstake {
            pool_id,
            address: creator.to_string(),
            amount,
        });
        Ok(())
    }

    /// Move an inactive staker back into the active set, evicting the lowest
    /// active staker if the set is full and the stake is strictly higher
    pub fn reactivate_staker(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64) -> Result<()> {
        let result = self.try_reactivate_staker(ctx, creator, pool_id);
        traced(OperationType::ReactivateStaker, ctx, pool_id, result)
    }

    fn try_reactivate_staker(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64) -> Result<()> {
        self.ensure_running()?;
        let mut pool = self.load_pool(pool_id)?;
        let staker = self.load_staker(creator, pool_id)?;

        if staker.status != StakerStatus::Inactive {
            return Err(RegistryError::InvalidArgs(format!(
                "staker {} is already active",
                creator
            )));
        }

        if let Some(lowest) = self.eviction_candidate(&pool, staker.amount)? {
            self.deactivate_staker(&mut pool, &lowest)?;
        }
        self.activate_staker(&mut pool, creator)?;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::ReactivateStaker,
            ctx,
            pool_id,
            format!("{} reactivated", creator),
        );
        Ok(())
    }

    /// Replace the display metadata of a staker
    pub fn update_metadata(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        moniker: &str,
        website: &str,
        logo: &str,
    ) -> Result<()> {
        let result = self.try_update_metadata(creator, pool_id, moniker, website, logo);
        if result.is_ok() {
            RegistryLogger::log_operation_success(
                OperationType::UpdateMetadata,
                ctx,
                pool_id,
                format!("{} updated metadata", creator),
            );
        }
        traced(OperationType::UpdateMetadata, ctx, pool_id, result)
    }

    fn try_update_metadata(
        &mut self,
        creator: &str,
        pool_id: u64,
        moniker: &str,
        website: &str,
        logo: &str,
    ) -> Result<()> {
        self.ensure_running()?;
        self.load_pool(pool_id)?;
        let mut staker = self.load_staker(creator, pool_id)?;

        staker.moniker = moniker.to_string();
        staker.website = website.to_string();
        staker.logo = logo.to_string();
        self.set_staker(&staker)
    }
}
