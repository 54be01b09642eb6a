//! Pool membership, slashing and uploader selection
//!
//! This module handles:
//! - Lowest staker and lowest funder tracking
//! - Moving stakers between the active and inactive sets
//! - Removing stakers and funders together with their pending state
//! - Slashing into the treasury
//! - Weighted random choice of the next uploader
//! - Quorum evaluation and strikes for stakers that did not vote
//!
//! Helpers take the pool by `&mut` and never re-read it from the store. The
//! caller writes the pool once when its operation is done.

use super::unbonding::STAKE_UNBONDING_QUEUE;
use super::Keeper;
use crate::bank::Bank;
use crate::decimal::Dec;
use crate::error::Result;
use crate::events::{RegistryEvent, SlashType};
use crate::selection::{delegation_weight, selection_seed, weighted_random_choice, Candidate};
use crate::store::{KvStore, RegistryLogger};
use crate::types::{BlockContext, Funder, Pool, StakeUnbondingEntry, Staker, StakerStatus};
use tracing::{debug, info, warn};

/// Outcome of the vote tally of the current bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// More than half of the possible voters voted valid
    Valid,
    /// At least half of the possible voters voted invalid
    Invalid,
    /// Neither threshold reached
    None,
}

impl Quorum {
    /// Tally the current bundle of a pool.
    ///
    /// The uploader cannot vote, so the number of possible voters is one less
    /// than the number of active stakers. A pool with a single staker never
    /// reaches quorum. Valid wins when both thresholds hold.
    pub fn evaluate(pool: &Pool) -> Self {
        if pool.stakers.len() <= 1 {
            return Quorum::None;
        }

        let voters = pool.stakers.len() as u64 - 1;
        let valid = pool.bundle_proposal.voters_valid.len() as u64;
        let invalid = pool.bundle_proposal.voters_invalid.len() as u64;

        if valid * 2 > voters {
            Quorum::Valid
        } else if invalid * 2 >= voters {
            Quorum::Invalid
        } else {
            Quorum::None
        }
    }

    /// Whether either threshold was reached
    pub fn is_reached(self) -> bool {
        self != Quorum::None
    }
}

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Recompute the active staker with the smallest amount.
    /// Ties go to the first staker in list order.
    pub(crate) fn update_lowest_staker(&self, pool: &mut Pool) -> Result<()> {
        let mut lowest: Option<(u64, &String)> = None;
        for account in &pool.stakers {
            let Some(staker) = self.get_staker(account, pool.id)? else {
                continue;
            };
            if lowest.is_none_or(|(amount, _)| staker.amount < amount) {
                lowest = Some((staker.amount, account));
            }
        }
        pool.lowest_staker = lowest.map(|(_, account)| account.clone()).unwrap_or_default();
        Ok(())
    }

    /// Recompute the funder with the smallest amount
    pub(crate) fn update_lowest_funder(&self, pool: &mut Pool) -> Result<()> {
        let mut lowest: Option<(u64, &String)> = None;
        for account in &pool.funders {
            let Some(funder) = self.get_funder(account, pool.id)? else {
                continue;
            };
            if lowest.is_none_or(|(amount, _)| funder.amount < amount) {
                lowest = Some((funder.amount, account));
            }
        }
        pool.lowest_funder = lowest.map(|(_, account)| account.clone()).unwrap_or_default();
        Ok(())
    }

    /// Move an active staker to the inactive set. Its stake stays bonded.
    pub(crate) fn deactivate_staker(&mut self, pool: &mut Pool, account: &str) -> Result<()> {
        if !pool.is_active_staker(account) {
            return Ok(());
        }
        let mut staker = self.load_staker(account, pool.id)?;

        pool.remove_active_staker(account);
        pool.inactive_stakers.push(account.to_string());
        pool.total_stake = pool.total_stake.saturating_sub(staker.amount);
        pool.total_inactive_stake += staker.amount;

        if pool.bundle_proposal.next_uploader == account {
            pool.bundle_proposal.next_uploader.clear();
        }

        staker.status = StakerStatus::Inactive;
        self.set_staker(&staker)?;
        self.update_lowest_staker(pool)?;

        warn!(pool_id = pool.id, staker = %account, "Staker deactivated");
        self.emit(RegistryEvent::StakerDeactivated {
            pool_id: pool.id,
            address: account.to_string(),
        });
        Ok(())
    }

    /// Move an inactive staker back to the active set. The caller makes room.
    pub(crate) fn activate_staker(&mut self, pool: &mut Pool, account: &str) -> Result<()> {
        if !pool.is_inactive_staker(account) {
            return Ok(());
        }
        let mut staker = self.load_staker(account, pool.id)?;

        pool.remove_inactive_staker(account);
        pool.stakers.push(account.to_string());
        pool.total_inactive_stake = pool.total_inactive_stake.saturating_sub(staker.amount);
        pool.total_stake += staker.amount;

        staker.status = StakerStatus::Active;
        self.set_staker(&staker)?;
        self.update_lowest_staker(pool)?;

        info!(pool_id = pool.id, staker = %account, "Staker reactivated");
        self.emit(RegistryEvent::StakerReactivated {
            pool_id: pool.id,
            address: account.to_string(),
        });
        Ok(())
    }

    /// Delete a staker from a pool.
    ///
    /// Pending stake unbondings of the staker are cancelled so a later
    /// re-entry starts clean.
    pub(crate) fn remove_staker(&mut self, pool: &mut Pool, staker: &Staker) -> Result<()> {
        if pool.is_active_staker(&staker.account) {
            pool.remove_active_staker(&staker.account);
            pool.total_stake = pool.total_stake.saturating_sub(staker.amount);
        } else if pool.is_inactive_staker(&staker.account) {
            pool.remove_inactive_staker(&staker.account);
            pool.total_inactive_stake = pool.total_inactive_stake.saturating_sub(staker.amount);
        }

        if pool.bundle_proposal.next_uploader == staker.account {
            pool.bundle_proposal.next_uploader.clear();
        }

        self.remove_staker_record(&staker.account, pool.id);

        let pending = STAKE_UNBONDING_QUEUE.find_by_secondary(
            &self.store,
            &StakeUnbondingEntry::owner_key(&staker.account, pool.id),
        )?;
        for entry in &pending {
            STAKE_UNBONDING_QUEUE.remove(&mut self.store, entry)?;
        }

        self.update_lowest_staker(pool)?;

        info!(
            pool_id = pool.id,
            staker = %staker.account,
            cancelled_unbondings = pending.len(),
            "Staker removed"
        );
        self.emit(RegistryEvent::StakerRemoved {
            pool_id: pool.id,
            address: staker.account.clone(),
        });
        Ok(())
    }

    /// Delete a funder from a pool. Its funds are not moved.
    pub(crate) fn remove_funder(&mut self, pool: &mut Pool, funder: &Funder) -> Result<()> {
        if !pool.is_funder(&funder.account) {
            return Ok(());
        }
        pool.remove_funder(&funder.account);
        pool.total_funds = pool.total_funds.saturating_sub(funder.amount);
        self.remove_funder_record(&funder.account, pool.id);
        self.update_lowest_funder(pool)
    }

    /// Slash `ratio` of a staker's amount into the treasury and return the
    /// slashed amount. A slash of the full amount removes the staker.
    pub(crate) fn slash_staker(
        &mut self,
        ctx: &BlockContext,
        pool: &mut Pool,
        account: &str,
        ratio: &Dec,
        slash_type: SlashType,
    ) -> Result<u64> {
        let Some(mut staker) = self.get_staker(account, pool.id)? else {
            return Ok(0);
        };

        let slash = ratio.mul_u64(staker.amount).round_u64().min(staker.amount);
        if slash == 0 {
            return Ok(0);
        }

        if slash == staker.amount {
            self.remove_staker(pool, &staker)?;
        } else {
            staker.amount -= slash;
            staker.unbonding_amount = staker.unbonding_amount.min(staker.amount);
            match staker.status {
                StakerStatus::Active => pool.total_stake = pool.total_stake.saturating_sub(slash),
                StakerStatus::Inactive => {
                    pool.total_inactive_stake = pool.total_inactive_stake.saturating_sub(slash)
                }
            }
            self.set_staker(&staker)?;
            self.update_lowest_staker(pool)?;
        }

        self.pay_treasury(ctx, slash)?;

        RegistryLogger::log_slash(pool.id, account, slash, format!("{:?}", slash_type));
        self.emit(RegistryEvent::Slash {
            pool_id: pool.id,
            address: account.to_string(),
            amount: slash,
            slash_type,
        });
        Ok(slash)
    }

    /// Pick the next uploader among `accounts` that are still active, weighted
    /// by stake plus delegation weight.
    ///
    /// Falls back to the current next uploader when nobody qualifies.
    pub(crate) fn next_uploader_by_random(
        &self,
        ctx: &BlockContext,
        pool: &Pool,
        accounts: &[String],
    ) -> Result<String> {
        let mut candidates = Vec::with_capacity(accounts.len());
        for account in accounts {
            if !pool.is_active_staker(account) {
                continue;
            }
            let Some(staker) = self.get_staker(account, pool.id)? else {
                continue;
            };
            let delegation = self
                .get_delegation_pool_data(pool.id, account)?
                .map(|data| data.total_delegation)
                .unwrap_or(0);

            candidates.push(Candidate {
                account: account.clone(),
                weight: staker.amount.saturating_add(delegation_weight(delegation)),
            });
        }

        let chosen = weighted_random_choice(&candidates, selection_seed(ctx.height, ctx.time))
            .unwrap_or_else(|| pool.bundle_proposal.next_uploader.clone());

        debug!(
            pool_id = pool.id,
            candidates = candidates.len(),
            next_uploader = %chosen,
            "Selected next uploader"
        );
        Ok(chosen)
    }

    /// Random next uploader among the voters of the current bundle, or among
    /// all active stakers when no voter is still active
    pub(crate) fn next_uploader_from_voters(&self, ctx: &BlockContext, pool: &Pool) -> Result<String> {
        let voters: Vec<String> = pool
            .bundle_proposal
            .voters_valid
            .iter()
            .chain(pool.bundle_proposal.voters_invalid.iter())
            .filter(|voter| pool.is_active_staker(voter))
            .cloned()
            .collect();

        if voters.is_empty() {
            self.next_uploader_by_random(ctx, pool, &pool.stakers)
        } else {
            self.next_uploader_by_random(ctx, pool, &voters)
        }
    }

    /// Add a strike to every active staker that neither uploaded nor voted on
    /// the current bundle. Reaching `max_points` costs a timeout slash and
    /// the active slot.
    pub(crate) fn handle_non_voters(&mut self, ctx: &BlockContext, pool: &mut Pool) -> Result<()> {
        let max_points = self.params.max_points;
        let timeout_slash = self.params.timeout_slash.clone();

        let absent: Vec<String> = pool
            .stakers
            .iter()
            .filter(|s| **s != pool.bundle_proposal.uploader && !pool.bundle_proposal.has_voted(s))
            .cloned()
            .collect();

        for account in absent {
            let Some(mut staker) = self.get_staker(&account, pool.id)? else {
                continue;
            };
            staker.points += 1;

            if staker.points < max_points {
                self.set_staker(&staker)?;
                continue;
            }

            warn!(
                pool_id = pool.id,
                staker = %account,
                points = staker.points,
                "Staker reached max points"
            );
            staker.points = 0;
            self.set_staker(&staker)?;
            self.slash_staker(ctx, pool, &account, &timeout_slash, SlashType::Timeout)?;
            self.deactivate_staker(pool, &account)?;
        }
        Ok(())
    }
}
