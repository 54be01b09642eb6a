//! Registry entities
//!
//! This module defines the records owned by the registry store:
//! - Pools with their current bundle proposal
//! - Stakers and funders
//! - F1 delegation accumulators, checkpoints and delegators
//! - Finalized proposals
//! - Payloads of the four time-ordered queues

use crate::decimal::Dec;
use crate::store::keys::KeyBuilder;
use crate::store::QueueEntry;
use serde::{Deserialize, Serialize};

/// Height and time of the block being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block height
    pub height: u64,
    /// Block time (unix seconds)
    pub time: u64,
}

impl BlockContext {
    /// Create a block context
    pub fn new(height: u64, time: u64) -> Self {
        Self { height, time }
    }
}

/// Current round of a pool. An empty `bundle_id` marks the genesis state
/// where no bundle is waiting for votes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleProposal {
    /// Storage id of the proposed bundle
    pub bundle_id: String,
    /// Staker that uploaded the bundle
    pub uploader: String,
    /// Staker expected to upload next
    pub next_uploader: String,
    /// Size of the bundle in bytes
    pub byte_size: u64,
    /// First height covered by the bundle
    pub from_height: u64,
    /// Height after the last one covered by the bundle
    pub to_height: u64,
    /// Last key of the bundle
    pub to_key: String,
    /// Value summary of the bundle
    pub to_value: String,
    /// Time the round started
    pub created_at: u64,
    /// Stakers that voted valid
    pub voters_valid: Vec<String>,
    /// Stakers that voted invalid
    pub voters_invalid: Vec<String>,
    /// Stakers that abstained
    pub voters_abstain: Vec<String>,
}

impl BundleProposal {
    /// Whether a bundle is waiting for votes
    pub fn is_active(&self) -> bool {
        !self.bundle_id.is_empty()
    }

    /// Whether `staker` took part in the round
    pub fn has_voted(&self, staker: &str) -> bool {
        self.voters_valid.iter().any(|v| v == staker)
            || self.voters_invalid.iter().any(|v| v == staker)
            || self.voters_abstain.iter().any(|v| v == staker)
    }
}

/// Data pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Runtime tag of the data source
    pub runtime: String,
    /// Key the pool starts archiving from
    pub start_key: String,
    /// Last archived key
    pub current_key: String,
    /// Last archived value summary
    pub current_value: String,
    /// Next height to archive
    pub current_height: u64,
    /// Number of finalized bundles
    pub total_bundles: u64,
    /// Minimum seconds between rounds
    pub upload_interval: u64,
    /// Flat reward per bundle
    pub operating_cost: u64,
    /// Total stake a pool needs to run
    pub min_stake: u64,
    /// Upper bound of heights per bundle
    pub max_bundle_size: u64,
    /// Whether the pool is halted by governance
    pub paused: bool,
    /// Funder addresses
    pub funders: Vec<String>,
    /// Funder with the smallest amount
    pub lowest_funder: String,
    /// Sum of all funder amounts
    pub total_funds: u64,
    /// Active staker addresses
    pub stakers: Vec<String>,
    /// Inactive staker addresses
    pub inactive_stakers: Vec<String>,
    /// Active staker with the smallest amount
    pub lowest_staker: String,
    /// Sum of active staker amounts
    pub total_stake: u64,
    /// Sum of inactive staker amounts
    pub total_inactive_stake: u64,
    /// Sum of delegations to stakers of this pool
    pub total_delegation: u64,
    /// Current round
    pub bundle_proposal: BundleProposal,
}

impl Pool {
    /// Whether `address` is an active staker
    pub fn is_active_staker(&self, address: &str) -> bool {
        self.stakers.iter().any(|s| s == address)
    }

    /// Whether `address` is an inactive staker
    pub fn is_inactive_staker(&self, address: &str) -> bool {
        self.inactive_stakers.iter().any(|s| s == address)
    }

    /// Whether `address` funds the pool
    pub fn is_funder(&self, address: &str) -> bool {
        self.funders.iter().any(|f| f == address)
    }

    /// Remove an address from the active set
    pub fn remove_active_staker(&mut self, address: &str) {
        self.stakers.retain(|s| s != address);
    }

    /// Remove an address from the inactive set
    pub fn remove_inactive_staker(&mut self, address: &str) {
        self.inactive_stakers.retain(|s| s != address);
    }

    /// Remove an address from the funder list
    pub fn remove_funder(&mut self, address: &str) {
        self.funders.retain(|f| f != address);
    }
}

/// Staker status inside a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakerStatus {
    /// Eligible for uploading and voting
    Active,
    /// Bonded but not participating
    Inactive,
}

/// Staker bonded to a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    /// Staker address
    pub account: String,
    /// Pool id
    pub pool_id: u64,
    /// Bonded amount
    pub amount: u64,
    /// Portion of `amount` waiting in the unbonding queue
    pub unbonding_amount: u64,
    /// Active or inactive
    pub status: StakerStatus,
    /// Share of uploader rewards kept by the staker
    pub commission: Dec,
    /// Consecutive missed votes
    pub points: u64,
    /// Display name
    pub moniker: String,
    /// Website
    pub website: String,
    /// Logo
    pub logo: String,
}

impl Staker {
    /// Stake that may still be unbonded
    pub fn available_unstake_amount(&self) -> u64 {
        self.amount.saturating_sub(self.unbonding_amount)
    }
}

/// Funder of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funder {
    /// Funder address
    pub account: String,
    /// Pool id
    pub pool_id: u64,
    /// Funded amount
    pub amount: u64,
}

/// F1 accumulator of one staker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPoolData {
    /// Pool id
    pub pool_id: u64,
    /// Staker address
    pub staker: String,
    /// Rewards collected since the last checkpoint
    pub current_rewards: u64,
    /// Sum of all delegations
    pub total_delegation: u64,
    /// Index of the latest checkpoint
    pub latest_index_k: u64,
    /// Number of delegators
    pub delegator_count: u64,
    /// Whether the latest checkpoint was written by an undelegation
    pub latest_index_was_undelegation: bool,
}

/// F1 checkpoint holding the cumulative reward per delegated token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEntry {
    /// Pool id
    pub pool_id: u64,
    /// Staker address
    pub staker: String,
    /// Checkpoint index
    pub k_index: u64,
    /// Cumulative reward per token
    pub balance: Dec,
}

/// Delegation of one address to one staker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegator {
    /// Pool id
    pub pool_id: u64,
    /// Staker address
    pub staker: String,
    /// Delegator address
    pub delegator: String,
    /// Delegated amount
    pub delegation_amount: u64,
    /// Checkpoint of the last interaction
    pub k_index: u64,
}

/// Delegation amount waiting in the unbonding queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingDelegator {
    /// Pool id
    pub pool_id: u64,
    /// Staker address
    pub staker: String,
    /// Delegator address
    pub delegator: String,
    /// Amount in flight
    pub unbonding_amount: u64,
}

/// Finalized bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Storage id
    pub bundle_id: String,
    /// Pool id
    pub pool_id: u64,
    /// Sequence number within the pool
    pub id: u64,
    /// Uploader address
    pub uploader: String,
    /// First covered height
    pub from_height: u64,
    /// Height after the last covered one
    pub to_height: u64,
    /// Size in bytes
    pub byte_size: u64,
    /// Last key
    pub to_key: String,
    /// Value summary
    pub to_value: String,
    /// Time of finalization
    pub finalized_at: u64,
}

/// Vote on a bundle proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteType {
    /// Bundle is correct
    Valid,
    /// Bundle is wrong
    Invalid,
    /// Voter could not decide
    Abstain,
}

/// Stake unbonding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeUnbondingEntry {
    /// Queue index
    pub index: u64,
    /// Staker address
    pub staker: String,
    /// Pool id
    pub pool_id: u64,
    /// Amount to pay back
    pub amount: u64,
    /// Request time
    pub creation_time: u64,
}

impl QueueEntry for StakeUnbondingEntry {
    fn index(&self) -> u64 {
        self.index
    }

    fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }

    fn secondary_key(&self) -> Vec<u8> {
        Self::owner_key(&self.staker, self.pool_id)
    }
}

impl StakeUnbondingEntry {
    /// Secondary key of every request of a staker in a pool
    pub fn owner_key(staker: &str, pool_id: u64) -> Vec<u8> {
        KeyBuilder::new(&[]).str(staker).u64(pool_id).build()
    }
}

/// Delegation unbonding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationUnbondingEntry {
    /// Queue index
    pub index: u64,
    /// Delegator address
    pub delegator: String,
    /// Staker address
    pub staker: String,
    /// Pool id
    pub pool_id: u64,
    /// Amount to pay back
    pub amount: u64,
    /// Request time
    pub creation_time: u64,
}

impl QueueEntry for DelegationUnbondingEntry {
    fn index(&self) -> u64 {
        self.index
    }

    fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }

    fn secondary_key(&self) -> Vec<u8> {
        KeyBuilder::new(&Self::delegator_prefix(&self.delegator))
            .u64(self.pool_id)
            .str(&self.staker)
            .build()
    }
}

impl DelegationUnbondingEntry {
    /// Secondary key prefix of every request of a delegator
    pub fn delegator_prefix(delegator: &str) -> Vec<u8> {
        KeyBuilder::new(&[]).str(delegator).build()
    }
}

/// Pending commission change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionChangeEntry {
    /// Queue index
    pub index: u64,
    /// Staker address
    pub staker: String,
    /// Pool id
    pub pool_id: u64,
    /// Commission to apply
    pub commission: Dec,
    /// Request time
    pub creation_time: u64,
}

impl QueueEntry for CommissionChangeEntry {
    fn index(&self) -> u64 {
        self.index
    }

    fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }

    fn secondary_key(&self) -> Vec<u8> {
        Self::owner_key(&self.staker, self.pool_id)
    }
}

impl CommissionChangeEntry {
    /// Secondary key of the pending change of a staker in a pool
    pub fn owner_key(staker: &str, pool_id: u64) -> Vec<u8> {
        KeyBuilder::new(&[]).str(staker).u64(pool_id).build()
    }
}

/// Redelegation spent by an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedelegationCooldownEntry {
    /// Queue index
    pub index: u64,
    /// Delegator address
    pub address: String,
    /// Redelegation time
    pub creation_time: u64,
    /// Block height of the redelegation
    pub creation_height: u64,
}

impl QueueEntry for RedelegationCooldownEntry {
    fn index(&self) -> u64 {
        self.index
    }

    fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }

    fn secondary_key(&self) -> Vec<u8> {
        Self::owner_key(&self.address)
    }
}

impl RedelegationCooldownEntry {
    /// Secondary key of every redelegation of an address
    pub fn owner_key(address: &str) -> Vec<u8> {
        KeyBuilder::new(&[]).str(address).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_unstake_amount_saturates() {
        let staker = Staker {
            account: "alice".to_string(),
            pool_id: 0,
            amount: 100,
            unbonding_amount: 150,
            status: StakerStatus::Active,
            commission: Dec::zero(),
            points: 0,
            moniker: String::new(),
            website: String::new(),
            logo: String::new(),
        };
        assert_eq!(staker.available_unstake_amount(), 0);
    }

    #[test]
    fn test_bundle_proposal_votes() {
        let proposal = BundleProposal {
            bundle_id: "bundle".to_string(),
            voters_valid: vec!["a".to_string()],
            voters_abstain: vec!["c".to_string()],
            ..Default::default()
        };
        assert!(proposal.is_active());
        assert!(proposal.has_voted("a"));
        assert!(proposal.has_voted("c"));
        assert!(!proposal.has_voted("b"));
        assert!(!BundleProposal::default().is_active());
    }

    #[test]
    fn test_pool_membership_helpers() {
        let mut pool = Pool {
            stakers: vec!["a".to_string(), "b".to_string()],
            inactive_stakers: vec!["c".to_string()],
            ..Default::default()
        };
        assert!(pool.is_active_staker("a"));
        assert!(pool.is_inactive_staker("c"));

        pool.remove_active_staker("a");
        assert!(!pool.is_active_staker("a"));
        assert_eq!(pool.stakers, vec!["b".to_string()]);
    }

    #[test]
    fn test_secondary_keys_differ_by_pool() {
        let entry = |pool_id| StakeUnbondingEntry {
            index: 0,
            staker: "alice".to_string(),
            pool_id,
            amount: 1,
            creation_time: 0,
        };
        assert_ne!(entry(0).secondary_key(), entry(1).secondary_key());
    }
}
