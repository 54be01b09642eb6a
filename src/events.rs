//! Registry events
//!
//! Every state transition a client may want to follow is recorded as a
//! [`RegistryEvent`]. The keeper buffers events until the caller drains them.

use serde::{Deserialize, Serialize};

/// Why a staker was slashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashType {
    /// Voted on the losing side of a quorum
    Vote,
    /// Uploaded an invalid bundle or misreported a quorum
    Upload,
    /// Missed the upload deadline or too many votes
    Timeout,
}

/// Outcome of a finished round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    /// Bundle accepted and paid
    Valid,
    /// Bundle rejected and uploader slashed
    Invalid,
    /// Round ended without quorum
    NoQuorum,
    /// Funders could not pay for the bundle
    NoFunds,
    /// Uploader had no data
    NoData,
}

/// Registry event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// Stake added
    Stake {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// Amount added
        amount: u64,
    },
    /// Unstake requested
    Unstake {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// Amount requested
        amount: u64,
    },
    /// Stake paid back after the unbonding period
    StakeUnbonded {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// Amount paid
        amount: u64,
    },
    /// Staker moved to the inactive set
    StakerDeactivated {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
    },
    /// Staker moved back to the active set
    StakerReactivated {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
    },
    /// Staker record removed
    StakerRemoved {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
    },
    /// Staker slashed
    Slash {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// Amount slashed
        amount: u64,
        /// Reason
        slash_type: SlashType,
    },
    /// Commission change queued
    CommissionChangeQueued {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// Requested commission
        commission: String,
    },
    /// Commission change applied
    CommissionChanged {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
        /// New commission
        commission: String,
    },
    /// Funds added
    Fund {
        /// Pool id
        pool_id: u64,
        /// Funder address
        address: String,
        /// Amount added
        amount: u64,
    },
    /// Funds withdrawn or forfeited
    Defund {
        /// Pool id
        pool_id: u64,
        /// Funder address
        address: String,
        /// Amount removed
        amount: u64,
    },
    /// Tokens delegated
    Delegate {
        /// Pool id
        pool_id: u64,
        /// Delegator address
        address: String,
        /// Staker address
        staker: String,
        /// Amount delegated
        amount: u64,
    },
    /// Undelegation requested
    Undelegate {
        /// Pool id
        pool_id: u64,
        /// Delegator address
        address: String,
        /// Staker address
        staker: String,
        /// Amount requested
        amount: u64,
    },
    /// Delegation paid back after the unbonding period
    DelegationUnbonded {
        /// Pool id
        pool_id: u64,
        /// Delegator address
        address: String,
        /// Staker address
        staker: String,
        /// Amount paid
        amount: u64,
    },
    /// Delegation moved between stakers
    Redelegate {
        /// Pool id of the source staker
        from_pool_id: u64,
        /// Source staker
        from_staker: String,
        /// Pool id of the target staker
        to_pool_id: u64,
        /// Target staker
        to_staker: String,
        /// Delegator address
        address: String,
        /// Amount moved
        amount: u64,
    },
    /// Delegation rewards paid
    WithdrawRewards {
        /// Pool id
        pool_id: u64,
        /// Delegator address
        address: String,
        /// Staker address
        staker: String,
        /// Amount paid
        amount: u64,
    },
    /// Uploader role claimed
    ClaimUploaderRole {
        /// Pool id
        pool_id: u64,
        /// Staker address
        address: String,
    },
    /// Bundle proposal registered
    BundleProposed {
        /// Pool id
        pool_id: u64,
        /// Storage id
        bundle_id: String,
        /// Uploader address
        uploader: String,
        /// Next uploader address
        next_uploader: String,
    },
    /// Vote cast
    BundleVote {
        /// Pool id
        pool_id: u64,
        /// Storage id
        bundle_id: String,
        /// Voter address
        address: String,
        /// Vote
        vote: crate::types::VoteType,
    },
    /// Round finished
    BundleFinalized {
        /// Pool id
        pool_id: u64,
        /// Storage id
        bundle_id: String,
        /// Uploader address
        uploader: String,
        /// Total reward
        reward: u64,
        /// Valid votes
        valid: u64,
        /// Invalid votes
        invalid: u64,
        /// Outcome
        status: BundleStatus,
    },
    /// Next uploader missed the deadline
    UploadTimeout {
        /// Pool id
        pool_id: u64,
        /// Uploader that timed out
        address: String,
    },
}
