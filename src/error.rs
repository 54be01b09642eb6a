//! Registry error types
//!
//! Validation failures are returned to the caller with no state applied.
//! Invariant violations surface as [`RegistryError::ChainHalted`] after the
//! keeper has scheduled an emergency halt.

/// Result type used across the registry
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors returned by registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Pool does not exist
    #[error("Pool with id {0} does not exist")]
    PoolNotFound(u64),

    /// Pool is paused
    #[error("Pool {0} is paused")]
    PoolPaused(u64),

    /// Staker does not exist in the given pool
    #[error("Staker {staker} does not exist in pool {pool_id}")]
    StakerNotFound {
        /// Pool id
        pool_id: u64,
        /// Staker address
        staker: String,
    },

    /// Sender is not a staker of the pool
    #[error("Sender {0} is not a staker")]
    NotAStaker(String),

    /// Delegator does not exist
    #[error("No delegation from {delegator} to {staker} in pool {pool_id}")]
    NoDelegatorFound {
        /// Pool id
        pool_id: u64,
        /// Staker address
        staker: String,
        /// Delegator address
        delegator: String,
    },

    /// Funder does not exist
    #[error("Funder {funder} does not exist in pool {pool_id}")]
    FunderNotFound {
        /// Pool id
        pool_id: u64,
        /// Funder address
        funder: String,
    },

    /// Staker tried to delegate to itself
    #[error("Self delegation is not allowed")]
    SelfDelegation,

    /// Account balance is too small
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Unstake amount is larger than the available stake
    #[error("Maximum unstake amount is {0}")]
    UnstakeTooHigh(u64),

    /// Undelegate amount is larger than the available delegation
    #[error("Maximum undelegate amount is {0}")]
    UndelegateTooHigh(u64),

    /// Defund amount is larger than the funded amount
    #[error("Maximum defund amount is {0}")]
    DefundTooHigh(u64),

    /// Stake is not high enough to replace the lowest staker
    #[error("Minimum stake amount of {0} required")]
    StakeTooLow(u64),

    /// Funding is not high enough to replace the lowest funder
    #[error("Minimum funding amount of {0} required")]
    FundsTooLow(u64),

    /// Commission is not a decimal between zero and one
    #[error("Invalid commission {0}")]
    InvalidCommission(String),

    /// All redelegation slots are in use
    #[error("All redelegation slots are on cooldown")]
    RedelegationOnCooldown,

    /// Second redelegation of one address within a block
    #[error("Only one redelegation per block is allowed")]
    MultipleRedelegationInSameBlock,

    /// Sender is not the designated uploader
    #[error("Sender {0} is not the next uploader")]
    NotNextUploader(String),

    /// Next uploader is already set
    #[error("Uploader role already claimed")]
    UploaderAlreadyClaimed,

    /// Previous round has not reached quorum
    #[error("No quorum reached on bundle {0}")]
    QuorumNotReached(String),

    /// Vote or submission references a different bundle
    #[error("Invalid bundle id {0}")]
    InvalidBundleId(String),

    /// Voter already voted on the current bundle
    #[error("Staker {0} already voted on the current bundle")]
    AlreadyVoted(String),

    /// Request arrived before the upload interval elapsed
    #[error("Upload interval not surpassed")]
    UploadIntervalNotSurpassed,

    /// Generic argument validation failure
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Queue entry would break creation time ordering
    #[error("Queue entry created at {creation_time} precedes tail created at {tail_time}")]
    QueueOrderViolation {
        /// Creation time of the rejected entry
        creation_time: u64,
        /// Creation time of the current queue tail
        tail_time: u64,
    },

    /// Parameters failed validation
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Stored value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Bank transfer failed
    #[error("Bank error: {0}")]
    Bank(String),

    /// Broken invariant seen on a read-only path
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Chain is halted after an invariant violation
    #[error("Chain halted at height {height}: {reason}")]
    ChainHalted {
        /// Height of the scheduled emergency halt
        height: u64,
        /// Reason recorded with the halt
        reason: String,
    },
}

impl RegistryError {
    /// Whether this error is the terminal halt signal
    pub fn is_halt(&self) -> bool {
        matches!(self, RegistryError::ChainHalted { .. })
    }
}

impl From<bincode::Error> for RegistryError {
    fn from(err: bincode::Error) -> Self {
        RegistryError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Codec(err.to_string())
    }
}
