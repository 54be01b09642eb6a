//! Structured logging for registry operations
//!
//! This module provides structured logging for:
//! - Message operations (stake, delegate, submit, vote and friends)
//! - Slashing and uploader timeouts
//! - Queue draining at the end of a block
//! - Chain halts
//!
//! Entries are stamped with the block time, never the wall clock, so two
//! replicas print the same log for the same block.

use crate::types::BlockContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Operation type for structured logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationType {
    /// Stake added to a pool
    Stake,
    /// Stake unbonding requested
    Unstake,
    /// Inactive staker returned to the active set
    ReactivateStaker,
    /// Staker metadata changed
    UpdateMetadata,
    /// Commission change requested
    UpdateCommission,
    /// Funds added to a pool
    Fund,
    /// Funds withdrawn from a pool
    Defund,
    /// Tokens delegated to a staker
    Delegate,
    /// Delegation unbonding requested
    Undelegate,
    /// Delegation moved between stakers
    Redelegate,
    /// Delegation rewards paid out
    WithdrawRewards,
    /// Uploader role claimed
    ClaimUploaderRole,
    /// Bundle proposal submitted
    SubmitBundleProposal,
    /// Vote cast on a bundle proposal
    VoteBundleProposal,
    /// Staker slashed
    Slash,
    /// Next uploader timed out
    UploadTimeout,
    /// Queue drained at block end
    DrainQueue,
    /// Chain halted
    ChainHalt,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Stake => "Stake",
            OperationType::Unstake => "Unstake",
            OperationType::ReactivateStaker => "ReactivateStaker",
            OperationType::UpdateMetadata => "UpdateMetadata",
            OperationType::UpdateCommission => "UpdateCommission",
            OperationType::Fund => "Fund",
            OperationType::Defund => "Defund",
            OperationType::Delegate => "Delegate",
            OperationType::Undelegate => "Undelegate",
            OperationType::Redelegate => "Redelegate",
            OperationType::WithdrawRewards => "WithdrawRewards",
            OperationType::ClaimUploaderRole => "ClaimUploaderRole",
            OperationType::SubmitBundleProposal => "SubmitBundleProposal",
            OperationType::VoteBundleProposal => "VoteBundleProposal",
            OperationType::Slash => "Slash",
            OperationType::UploadTimeout => "UploadTimeout",
            OperationType::DrainQueue => "DrainQueue",
            OperationType::ChainHalt => "ChainHalt",
        };
        write!(f, "{}", name)
    }
}

/// Operation status for structured logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OperationStatus {
    /// Operation applied
    Success,
    /// Operation rejected
    Failed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Success => write!(f, "Success"),
            OperationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Structured log entry for registry operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryLogEntry {
    /// Operation type
    pub operation_type: OperationType,
    /// Operation status
    pub status: OperationStatus,
    /// Pool the operation touched
    pub pool_id: u64,
    /// Block height
    pub block_height: u64,
    /// Block time
    pub timestamp: DateTime<Utc>,
    /// Additional context
    pub context: String,
    /// Error message (if failed)
    pub error_message: Option<String>,
}

impl RegistryLogEntry {
    fn new(
        operation_type: OperationType,
        status: OperationStatus,
        ctx: &BlockContext,
        pool_id: u64,
        context: String,
        error_message: Option<String>,
    ) -> Self {
        Self {
            operation_type,
            status,
            pool_id,
            block_height: ctx.height,
            timestamp: block_timestamp(ctx),
            context,
            error_message,
        }
    }
}

impl fmt::Display for RegistryLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation={} status={} pool={} height={} timestamp={} context={}",
            self.operation_type,
            self.status,
            self.pool_id,
            self.block_height,
            self.timestamp,
            self.context
        )?;
        if let Some(error) = &self.error_message {
            write!(f, " error={}", error)?;
        }
        Ok(())
    }
}

/// Block time as a UTC timestamp, the epoch if out of range
pub fn block_timestamp(ctx: &BlockContext) -> DateTime<Utc> {
    i64::try_from(ctx.time)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

/// Logger for registry operations
pub struct RegistryLogger;

impl RegistryLogger {
    /// Log an applied operation
    pub fn log_operation_success(
        operation_type: OperationType,
        ctx: &BlockContext,
        pool_id: u64,
        context: impl Into<String>,
    ) -> RegistryLogEntry {
        let context = context.into();

        info!(
            operation = %operation_type,
            pool_id = pool_id,
            height = ctx.height,
            context = %context,
            "Registry operation applied"
        );

        let entry = RegistryLogEntry::new(
            operation_type,
            OperationStatus::Success,
            ctx,
            pool_id,
            context,
            None,
        );
        debug!("Registry log entry: {}", entry);
        entry
    }

    /// Log a rejected operation
    pub fn log_operation_failure(
        operation_type: OperationType,
        ctx: &BlockContext,
        pool_id: u64,
        error_message: impl Into<String>,
    ) -> RegistryLogEntry {
        let error_message = error_message.into();

        warn!(
            operation = %operation_type,
            pool_id = pool_id,
            height = ctx.height,
            error = %error_message,
            "Registry operation rejected"
        );

        RegistryLogEntry::new(
            operation_type,
            OperationStatus::Failed,
            ctx,
            pool_id,
            String::new(),
            Some(error_message),
        )
    }

    /// Log a slash
    pub fn log_slash(pool_id: u64, staker: &str, amount: u64, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            operation = %OperationType::Slash,
            pool_id = pool_id,
            staker = %staker,
            amount = amount,
            reason = %reason,
            "Staker slashed"
        );
    }

    /// Log a queue drain that applied at least one entry
    pub fn log_queue_drain(queue: impl fmt::Debug, ctx: &BlockContext, drained: u64) {
        if drained == 0 {
            return;
        }
        info!(
            operation = %OperationType::DrainQueue,
            queue = ?queue,
            height = ctx.height,
            drained = drained,
            "Queue entries drained"
        );
    }

    /// Log a chain halt
    pub fn log_halt(ctx: &BlockContext, plan_name: &str, reason: &str) {
        error!(
            operation = %OperationType::ChainHalt,
            height = ctx.height,
            plan = %plan_name,
            reason = %reason,
            "Invariant violated, chain halt scheduled"
        );
    }
}
