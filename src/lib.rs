//! # Pool Registry
//!
//! Staking, delegation and reward registry for data pools.
//!
//! This crate implements:
//! - F1 lazy reward distribution for an unbounded number of delegators
//! - Time-ordered queues for stake unbonding, delegation unbonding,
//!   commission changes and redelegation cooldowns
//! - Pool membership with capped staker and funder sets, slashing and
//!   weighted uploader selection
//! - The bundle proposal round: upload, vote, quorum and payout
//! - A per-block scheduler draining the queues and enforcing upload timeouts
//!
//! All state lives behind a [`KvStore`] owned by the [`Keeper`]. Token
//! movements go through the [`Bank`] capability.

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod bank;
pub mod decimal;
pub mod error;
pub mod events;
pub mod keeper;
pub mod params;
pub mod selection;
pub mod store;
pub mod types;

pub use bank::{Bank, MemoryBank, DENOM};
pub use decimal::Dec;
pub use error::{RegistryError, Result};
pub use events::{BundleStatus, RegistryEvent, SlashType};
pub use keeper::{
    BundleSubmission, DelegationInfo, Eligibility, EmergencyPlan, FundedPool, Keeper, PoolConfig,
    Quorum, StakedPool, SubmitOutcome, NO_DATA_BUNDLE, NO_QUORUM_BUNDLE,
};
pub use params::{Params, MAX_FUNDERS, MAX_STAKERS};
pub use store::{KvStore, MemoryStore};
pub use types::{BlockContext, Pool, Staker, StakerStatus, VoteType};
