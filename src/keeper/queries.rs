//! Read-only views
//!
//! Nothing here writes to the store, so every query keeps answering after a
//! halt.

use super::bundles::{check_pool_running, check_voter, current_height};
use super::Keeper;
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::store::KvStore;
use crate::types::{BlockContext, Pool, Proposal, Staker};
use serde::{Deserialize, Serialize};

/// One delegation of an address, with what is in flight and what it earned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationInfo {
    /// Pool id
    pub pool_id: u64,
    /// Staker address
    pub staker: String,
    /// Delegator address
    pub delegator: String,
    /// Delegated amount, including what is unbonding
    pub amount: u64,
    /// Portion waiting in the unbonding queue
    pub unbonding_amount: u64,
    /// Reward a withdraw would pay now
    pub outstanding_rewards: u64,
}

/// A pool an account stakes in, with its staker record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedPool {
    /// Pool the stake sits in
    pub pool: Pool,
    /// Staker record of the account
    pub staker: Staker,
}

/// A pool an account funds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedPool {
    /// Funded pool
    pub pool: Pool,
    /// Remaining funds of the account in that pool
    pub amount: u64,
}

/// Answer of [`Keeper::can_vote`] and [`Keeper::can_propose`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    /// Whether the action would pass validation
    pub possible: bool,
    /// Why it would not, empty otherwise
    pub reason: String,
}

impl From<Result<()>> for Eligibility {
    fn from(check: Result<()>) -> Self {
        match check {
            Ok(()) => Eligibility {
                possible: true,
                reason: String::new(),
            },
            Err(err) => Eligibility {
                possible: false,
                reason: err.to_string(),
            },
        }
    }
}

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Amount `delegator` delegates to `staker`, zero when none
    pub fn get_delegation_amount(&self, pool_id: u64, staker: &str, delegator: &str) -> Result<u64> {
        Ok(self
            .get_delegator(pool_id, staker, delegator)?
            .map(|record| record.delegation_amount)
            .unwrap_or(0))
    }

    /// Reward `delegator` could withdraw from `staker` now, zero when it
    /// does not delegate
    pub fn get_outstanding_rewards(&self, pool_id: u64, staker: &str, delegator: &str) -> Result<u64> {
        Ok(self.f1_current_reward(pool_id, staker, delegator)?.unwrap_or(0))
    }

    /// Every delegation of an address across pools and stakers
    pub fn get_delegations_of_delegator(&self, delegator: &str) -> Result<Vec<DelegationInfo>> {
        self.get_delegations_of_address(delegator)?
            .into_iter()
            .map(|record| {
                let unbonding_amount = self
                    .get_unbonding_delegator(record.pool_id, &record.staker, delegator)?
                    .map(|in_flight| in_flight.unbonding_amount)
                    .unwrap_or(0);
                let outstanding_rewards =
                    self.get_outstanding_rewards(record.pool_id, &record.staker, delegator)?;

                Ok(DelegationInfo {
                    pool_id: record.pool_id,
                    staker: record.staker,
                    delegator: record.delegator,
                    amount: record.delegation_amount,
                    unbonding_amount,
                    outstanding_rewards,
                })
            })
            .collect()
    }

    /// Every pool `account` stakes in, active or inactive
    pub fn get_staked_pools_of_account(&self, account: &str) -> Result<Vec<StakedPool>> {
        self.get_stakers_of_account(account)?
            .into_iter()
            .map(|staker| {
                Ok(StakedPool {
                    pool: self.load_pool(staker.pool_id)?,
                    staker,
                })
            })
            .collect()
    }

    /// Every pool `account` funds
    pub fn get_funded_pools_of_account(&self, account: &str) -> Result<Vec<FundedPool>> {
        self.get_funders_of_account(account)?
            .into_iter()
            .map(|funder| {
                Ok(FundedPool {
                    pool: self.load_pool(funder.pool_id)?,
                    amount: funder.amount,
                })
            })
            .collect()
    }

    /// Finalized bundle of a pool covering `height`
    pub fn get_proposal_by_height(&self, pool_id: u64, height: u64) -> Result<Option<Proposal>> {
        Ok(self
            .get_proposal_starting_at_or_before(pool_id, height)?
            .filter(|proposal| height < proposal.to_height))
    }

    /// Whether `voter` may vote on `bundle_id` now
    pub fn can_vote(&self, pool_id: u64, voter: &str, bundle_id: &str) -> Result<Eligibility> {
        let pool = self.load_pool(pool_id)?;
        Ok(check_voter(&pool, voter, bundle_id).into())
    }

    /// Whether `proposer` may submit a bundle starting at `from_height` now
    pub fn can_propose(
        &self,
        ctx: &BlockContext,
        pool_id: u64,
        proposer: &str,
        from_height: u64,
    ) -> Result<Eligibility> {
        let pool = self.load_pool(pool_id)?;
        Ok(Self::check_proposer(ctx, &pool, proposer, from_height).into())
    }

    fn check_proposer(ctx: &BlockContext, pool: &Pool, proposer: &str, from_height: u64) -> Result<()> {
        check_pool_running(pool)?;
        if !pool.is_active_staker(proposer) {
            return Err(RegistryError::NotAStaker(proposer.to_string()));
        }
        if current_height(pool) != from_height {
            return Err(RegistryError::InvalidArgs(format!(
                "from_height {} does not match current height {}",
                from_height,
                current_height(pool)
            )));
        }
        if pool.bundle_proposal.next_uploader != proposer {
            return Err(RegistryError::NotNextUploader(proposer.to_string()));
        }
        if ctx.time < pool.bundle_proposal.created_at.saturating_add(pool.upload_interval) {
            return Err(RegistryError::UploadIntervalNotSurpassed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::keeper::test_utils::*;
    use crate::keeper::{BundleSubmission, Keeper};
    use crate::types::{Proposal, VoteType};

    fn setup() -> (Keeper, u64) {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice", "bob", "dave"]);
        keeper.stake(&ctx(1, 0), "alice", pool_id, 1_000).unwrap();
        keeper.stake(&ctx(1, 0), "bob", pool_id, 1_000).unwrap();
        keeper.fund(&ctx(1, 0), "dave", pool_id, 100_000_000).unwrap();
        keeper.claim_uploader_role(&ctx(1, 0), "alice", pool_id).unwrap();
        (keeper, pool_id)
    }

    #[test]
    fn test_delegations_of_delegator() {
        let (mut keeper, pool_id) = setup();
        keeper.delegate(&ctx(2, 10), "dave", pool_id, "alice", 300).unwrap();
        keeper.delegate(&ctx(2, 10), "dave", pool_id, "bob", 200).unwrap();
        keeper.undelegate(&ctx(3, 20), "dave", pool_id, "bob", 50).unwrap();
        keeper.add_delegation_rewards(pool_id, "alice", 90).unwrap();

        assert_eq!(keeper.get_delegation_amount(pool_id, "alice", "dave").unwrap(), 300);
        assert_eq!(keeper.get_delegation_amount(pool_id, "alice", "erin").unwrap(), 0);
        assert_eq!(keeper.get_outstanding_rewards(pool_id, "alice", "dave").unwrap(), 90);

        let mut delegations = keeper.get_delegations_of_delegator("dave").unwrap();
        delegations.sort_by(|a, b| a.staker.cmp(&b.staker));
        assert_eq!(delegations.len(), 2);
        assert_eq!(delegations[0].staker, "alice");
        assert_eq!(delegations[0].outstanding_rewards, 90);
        assert_eq!(delegations[1].staker, "bob");
        assert_eq!(delegations[1].amount, 200);
        assert_eq!(delegations[1].unbonding_amount, 50);
    }

    #[test]
    fn test_pools_of_account() {
        let (mut keeper, pool_id) = setup();
        let second = test_pool(&mut keeper);
        keeper.stake(&ctx(2, 10), "alice", second, 400).unwrap();
        keeper.fund(&ctx(2, 10), "dave", second, 5_000).unwrap();
        fund_accounts(&mut keeper, &["alicex"]);
        keeper.stake(&ctx(2, 10), "alicex", second, 700).unwrap();

        let staked = keeper.get_staked_pools_of_account("alice").unwrap();
        assert_eq!(staked.len(), 2);
        assert_eq!(staked[0].pool.id, pool_id);
        assert_eq!(staked[0].staker.amount, 1_000);
        assert_eq!(staked[1].pool.id, second);
        assert_eq!(staked[1].staker.amount, 400);
        assert!(keeper.get_staked_pools_of_account("dave").unwrap().is_empty());

        let funded = keeper.get_funded_pools_of_account("dave").unwrap();
        assert_eq!(
            funded.iter().map(|f| (f.pool.id, f.amount)).collect::<Vec<_>>(),
            vec![(pool_id, 100_000_000), (second, 5_000)]
        );
        assert!(keeper.get_funded_pools_of_account("alice").unwrap().is_empty());
    }

    #[test]
    fn test_proposal_by_height() {
        let mut keeper = test_keeper();
        for (pool_id, id, from, to) in [
            (0, "b0", 0, 10),
            (0, "b1", 10, 25),
            (0, "b2", 30, 40),
            (1, "other", 0, 100),
        ] {
            keeper
                .set_proposal(&Proposal {
                    bundle_id: id.to_string(),
                    pool_id,
                    id: 0,
                    uploader: "alice".to_string(),
                    from_height: from,
                    to_height: to,
                    byte_size: 1,
                    to_key: to.to_string(),
                    to_value: String::new(),
                    finalized_at: 0,
                })
                .unwrap();
        }

        let find = |height| {
            keeper
                .get_proposal_by_height(0, height)
                .unwrap()
                .map(|p| p.bundle_id)
        };
        assert_eq!(find(0).as_deref(), Some("b0"));
        assert_eq!(find(9).as_deref(), Some("b0"));
        assert_eq!(find(10).as_deref(), Some("b1"));
        assert_eq!(find(24).as_deref(), Some("b1"));
        assert_eq!(find(25), None);
        assert_eq!(find(29), None);
        assert_eq!(find(30).as_deref(), Some("b2"));
        assert_eq!(find(40), None);
        assert_eq!(find(u64::MAX), None);
        assert_eq!(
            keeper.get_proposal_by_height(1, 50).unwrap().map(|p| p.bundle_id).as_deref(),
            Some("other")
        );
        assert_eq!(keeper.get_proposal_by_height(2, 0).unwrap(), None);
    }

    #[test]
    fn test_can_propose_and_vote() {
        let (mut keeper, pool_id) = setup();

        let early = keeper.can_propose(&ctx(1, 30), pool_id, "alice", 0).unwrap();
        assert!(!early.possible);
        assert!(!early.reason.is_empty());
        assert!(!keeper.can_propose(&ctx(1, 60), pool_id, "bob", 0).unwrap().possible);
        assert!(!keeper.can_propose(&ctx(1, 60), pool_id, "alice", 5).unwrap().possible);
        let ok = keeper.can_propose(&ctx(1, 60), pool_id, "alice", 0).unwrap();
        assert!(ok.possible);
        assert!(ok.reason.is_empty());

        keeper
            .submit_bundle_proposal(
                &ctx(2, 60),
                &BundleSubmission {
                    creator: "alice".to_string(),
                    pool_id,
                    bundle_id: "bundle_1".to_string(),
                    byte_size: 10,
                    from_height: 0,
                    to_height: 5,
                    from_key: "0".to_string(),
                    to_key: "5".to_string(),
                    to_value: "v".to_string(),
                },
            )
            .unwrap();

        assert!(keeper.can_vote(pool_id, "bob", "bundle_1").unwrap().possible);
        assert!(!keeper.can_vote(pool_id, "alice", "bundle_1").unwrap().possible);
        assert!(!keeper.can_vote(pool_id, "bob", "bundle_2").unwrap().possible);

        keeper
            .vote_proposal(&ctx(2, 61), "bob", pool_id, "bundle_1", VoteType::Valid)
            .unwrap();
        assert!(!keeper.can_vote(pool_id, "bob", "bundle_1").unwrap().possible);
        assert!(keeper.can_vote(99, "bob", "bundle_1").is_err());
    }
}
