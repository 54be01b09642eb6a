//! Bundle proposal state machine
//!
//! This module handles:
//! - Claiming the uploader role of a pool in genesis state
//! - Votes on the current bundle
//! - Submissions, which first settle the previous round and then register
//!   the new bundle
//! - Funder charging with eviction of funders that cannot pay their share
//!
//! A round is settled by the next submission. A valid quorum pays the
//! uploader and archives the bundle, an invalid quorum slashes the uploader
//! and rolls the round back, no quorum rejects the submission. Two sentinel
//! bundle ids exist: [`NO_DATA_BUNDLE`] registers a round without data and
//! [`NO_QUORUM_BUNDLE`] reports that the previous round cannot reach quorum.

use super::pool_logic::Quorum;
use super::{traced, Keeper};
use crate::bank::Bank;
use crate::decimal::Dec;
use crate::error::{RegistryError, Result};
use crate::events::{BundleStatus, RegistryEvent, SlashType};
use crate::store::{KvStore, OperationType, RegistryLogger};
use crate::types::{BlockContext, BundleProposal, Funder, Pool, Proposal, VoteType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Bundle id prefix of a round without data
pub const NO_DATA_BUNDLE: &str = "KYVE_NO_DATA_BUNDLE";

/// Bundle id reporting that the current round has no quorum
pub const NO_QUORUM_BUNDLE: &str = "KYVE_NO_QUORUM_BUNDLE";

/// Whether `bundle_id` marks a round without data
pub(crate) fn is_no_data(bundle_id: &str) -> bool {
    bundle_id.starts_with(NO_DATA_BUNDLE)
}

/// Height the next bundle must start at
pub(crate) fn current_height(pool: &Pool) -> u64 {
    if pool.bundle_proposal.to_height != 0 {
        pool.bundle_proposal.to_height
    } else {
        pool.current_height
    }
}

/// Key the next bundle must start after
pub(crate) fn current_key(pool: &Pool) -> &str {
    if pool.bundle_proposal.to_key.is_empty() {
        &pool.current_key
    } else {
        &pool.bundle_proposal.to_key
    }
}

/// Reject pools that cannot run a round
pub(crate) fn check_pool_running(pool: &Pool) -> Result<()> {
    if pool.stakers.len() < 2 {
        return Err(RegistryError::InvalidArgs(format!(
            "pool {} has fewer than 2 active stakers",
            pool.id
        )));
    }
    if pool.total_stake < pool.min_stake {
        return Err(RegistryError::StakeTooLow(pool.min_stake));
    }
    if pool.funders.is_empty() || pool.total_funds == 0 {
        return Err(RegistryError::InsufficientFunds(format!(
            "pool {} has run out of funds",
            pool.id
        )));
    }
    if pool.paused {
        return Err(RegistryError::PoolPaused(pool.id));
    }
    Ok(())
}

/// Reject a voter that may not vote on `bundle_id`
pub(crate) fn check_voter(pool: &Pool, voter: &str, bundle_id: &str) -> Result<()> {
    check_pool_running(pool)?;
    if !pool.is_active_staker(voter) {
        return Err(RegistryError::NotAStaker(voter.to_string()));
    }

    let bp = &pool.bundle_proposal;
    if bp.uploader == voter {
        return Err(RegistryError::InvalidArgs(
            "uploader cannot vote on its own bundle".to_string(),
        ));
    }
    if !bp.is_active() || bp.bundle_id != bundle_id {
        return Err(RegistryError::InvalidBundleId(bundle_id.to_string()));
    }
    if bp.voters_valid.iter().any(|v| v == voter) || bp.voters_invalid.iter().any(|v| v == voter) {
        return Err(RegistryError::AlreadyVoted(voter.to_string()));
    }
    Ok(())
}

/// Bundle submitted by the next uploader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSubmission {
    /// Submitting staker
    pub creator: String,
    /// Pool id
    pub pool_id: u64,
    /// Storage id or one of the sentinels
    pub bundle_id: String,
    /// Size in bytes
    pub byte_size: u64,
    /// First covered height
    pub from_height: u64,
    /// Height after the last covered one
    pub to_height: u64,
    /// Key the bundle starts after
    pub from_key: String,
    /// Last key
    pub to_key: String,
    /// Value summary
    pub to_value: String,
}

/// What a submission did to the previous round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// No round was open, the bundle was registered
    Registered,
    /// Previous round settled and the bundle registered, except after an
    /// invalid quorum where the round is rolled back
    Finalized(BundleStatus),
    /// Previous round dropped without height progress
    Dropped(BundleStatus),
    /// No-quorum report contradicted by the votes
    ReporterSlashed,
}

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Become the first uploader of a pool that has none
    pub fn claim_uploader_role(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64) -> Result<()> {
        let result = self.try_claim_uploader_role(ctx, creator, pool_id);
        traced(OperationType::ClaimUploaderRole, ctx, pool_id, result)
    }

    fn try_claim_uploader_role(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64) -> Result<()> {
        self.ensure_running()?;
        let mut pool = self.load_pool(pool_id)?;

        if pool.paused {
            return Err(RegistryError::PoolPaused(pool_id));
        }
        if !pool.is_active_staker(creator) {
            return Err(RegistryError::NotAStaker(creator.to_string()));
        }
        if !pool.bundle_proposal.next_uploader.is_empty() {
            return Err(RegistryError::UploaderAlreadyClaimed);
        }
        if pool.funders.is_empty() {
            return Err(RegistryError::InsufficientFunds(format!(
                "pool {} has no funders",
                pool_id
            )));
        }

        pool.bundle_proposal.next_uploader = creator.to_string();
        pool.bundle_proposal.created_at = ctx.time;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::ClaimUploaderRole,
            ctx,
            pool_id,
            format!("{} claimed the uploader role", creator),
        );
        self.emit(RegistryEvent::ClaimUploaderRole {
            pool_id,
            address: creator.to_string(),
        });
        Ok(())
    }

    /// Vote on the current bundle. An abstain may later be turned into a
    /// valid or invalid vote; any other second vote is rejected.
    pub fn vote_proposal(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        bundle_id: &str,
        vote: VoteType,
    ) -> Result<()> {
        let result = self.try_vote_proposal(ctx, creator, pool_id, bundle_id, vote);
        traced(OperationType::VoteBundleProposal, ctx, pool_id, result)
    }

    fn try_vote_proposal(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        bundle_id: &str,
        vote: VoteType,
    ) -> Result<()> {
        self.ensure_running()?;
        let mut pool = self.load_pool(pool_id)?;
        check_voter(&pool, creator, bundle_id)?;
        let mut staker = self.load_staker(creator, pool_id)?;

        let bp = &mut pool.bundle_proposal;
        if bp.voters_abstain.iter().any(|v| v == creator) {
            if vote == VoteType::Abstain {
                return Err(RegistryError::AlreadyVoted(creator.to_string()));
            }
            bp.voters_abstain.retain(|v| v != creator);
        }
        match vote {
            VoteType::Valid => bp.voters_valid.push(creator.to_string()),
            VoteType::Invalid => bp.voters_invalid.push(creator.to_string()),
            VoteType::Abstain => bp.voters_abstain.push(creator.to_string()),
        }

        staker.points = 0;
        self.set_staker(&staker)?;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::VoteBundleProposal,
            ctx,
            pool_id,
            format!("{} voted {:?} on {}", creator, vote, bundle_id),
        );
        self.emit(RegistryEvent::BundleVote {
            pool_id,
            bundle_id: bundle_id.to_string(),
            address: creator.to_string(),
            vote,
        });
        Ok(())
    }

    /// Settle the previous round and register a new bundle
    pub fn submit_bundle_proposal(
        &mut self,
        ctx: &BlockContext,
        submission: &BundleSubmission,
    ) -> Result<SubmitOutcome> {
        let result = self.try_submit_bundle_proposal(ctx, submission);
        traced(OperationType::SubmitBundleProposal, ctx, submission.pool_id, result)
    }

    fn try_submit_bundle_proposal(
        &mut self,
        ctx: &BlockContext,
        submission: &BundleSubmission,
    ) -> Result<SubmitOutcome> {
        self.ensure_running()?;
        let mut pool = self.load_pool(submission.pool_id)?;
        self.validate_submission(ctx, &pool, submission)?;

        let outcome = if submission.bundle_id == NO_QUORUM_BUNDLE {
            self.handle_no_quorum_report(ctx, &mut pool, submission)?
        } else if !pool.bundle_proposal.is_active() {
            let next_uploader = self.next_uploader_by_random(ctx, &pool, &pool.stakers)?;
            self.register_bundle(ctx, &mut pool, submission, next_uploader);
            SubmitOutcome::Registered
        } else if is_no_data(&pool.bundle_proposal.bundle_id) {
            self.close_no_data_round(ctx, &mut pool, submission)?
        } else {
            match Quorum::evaluate(&pool) {
                Quorum::None => {
                    return Err(RegistryError::QuorumNotReached(
                        pool.bundle_proposal.bundle_id.clone(),
                    ))
                }
                Quorum::Valid => {
                    self.handle_non_voters(ctx, &mut pool)?;
                    self.finalize_valid(ctx, &mut pool, submission)?
                }
                Quorum::Invalid => {
                    self.handle_non_voters(ctx, &mut pool)?;
                    self.finalize_invalid(ctx, &mut pool)?
                }
            }
        };

        self.set_pool(&pool)?;
        RegistryLogger::log_operation_success(
            OperationType::SubmitBundleProposal,
            ctx,
            pool.id,
            format!("{} submitted {}: {:?}", submission.creator, submission.bundle_id, outcome),
        );
        Ok(outcome)
    }

    fn validate_submission(&self, ctx: &BlockContext, pool: &Pool, s: &BundleSubmission) -> Result<()> {
        check_pool_running(pool)?;
        if !pool.is_active_staker(&s.creator) {
            return Err(RegistryError::NotAStaker(s.creator.clone()));
        }
        if s.bundle_id.is_empty() {
            return Err(RegistryError::InvalidArgs("bundle id must not be empty".to_string()));
        }

        let height = current_height(pool);
        if s.from_height != height {
            return Err(RegistryError::InvalidArgs(format!(
                "from_height {} does not match current height {}",
                s.from_height, height
            )));
        }
        if s.to_height < height {
            return Err(RegistryError::InvalidArgs(format!(
                "to_height {} is below current height {}",
                s.to_height, height
            )));
        }
        if s.to_height - height > pool.max_bundle_size {
            return Err(RegistryError::InvalidArgs(format!(
                "bundle covers {} heights, max is {}",
                s.to_height - height,
                pool.max_bundle_size
            )));
        }
        if s.from_key != current_key(pool) {
            return Err(RegistryError::InvalidArgs(format!(
                "from_key {} does not match current key {}",
                s.from_key,
                current_key(pool)
            )));
        }

        let bp = &pool.bundle_proposal;
        if bp.next_uploader != s.creator {
            return Err(RegistryError::NotNextUploader(s.creator.clone()));
        }
        if ctx.time < bp.created_at.saturating_add(pool.upload_interval) {
            return Err(RegistryError::UploadIntervalNotSurpassed);
        }

        let empty = is_no_data(&s.bundle_id) || s.bundle_id == NO_QUORUM_BUNDLE;
        let carries_data = s.to_height != height
            || s.byte_size != 0
            || !s.to_key.is_empty()
            || !s.to_value.is_empty();
        if empty && carries_data {
            return Err(RegistryError::InvalidArgs(format!(
                "{} must not carry data",
                s.bundle_id
            )));
        }
        if !empty
            && (s.to_height == height || s.byte_size == 0 || s.to_key.is_empty() || s.to_value.is_empty())
        {
            return Err(RegistryError::InvalidArgs(format!(
                "bundle {} carries no data",
                s.bundle_id
            )));
        }
        Ok(())
    }

    /// Open a new round with the submitted bundle
    fn register_bundle(
        &mut self,
        ctx: &BlockContext,
        pool: &mut Pool,
        s: &BundleSubmission,
        next_uploader: String,
    ) {
        pool.bundle_proposal = BundleProposal {
            bundle_id: s.bundle_id.clone(),
            uploader: s.creator.clone(),
            next_uploader,
            byte_size: s.byte_size,
            from_height: s.from_height,
            to_height: s.to_height,
            to_key: s.to_key.clone(),
            to_value: s.to_value.clone(),
            created_at: ctx.time,
            ..Default::default()
        };

        self.emit(RegistryEvent::BundleProposed {
            pool_id: pool.id,
            bundle_id: s.bundle_id.clone(),
            uploader: s.creator.clone(),
            next_uploader: pool.bundle_proposal.next_uploader.clone(),
        });
    }

    fn finalized_event(pool: &Pool, reward: u64, status: BundleStatus) -> RegistryEvent {
        let bp = &pool.bundle_proposal;
        RegistryEvent::BundleFinalized {
            pool_id: pool.id,
            bundle_id: bp.bundle_id.clone(),
            uploader: bp.uploader.clone(),
            reward,
            valid: bp.voters_valid.len() as u64,
            invalid: bp.voters_invalid.len() as u64,
            status,
        }
    }

    /// Close a round without data. Nothing is paid; an invalid quorum
    /// costs the uploader a timeout slash.
    fn close_no_data_round(
        &mut self,
        ctx: &BlockContext,
        pool: &mut Pool,
        s: &BundleSubmission,
    ) -> Result<SubmitOutcome> {
        if Quorum::evaluate(pool) == Quorum::Invalid {
            let uploader = pool.bundle_proposal.uploader.clone();
            let ratio = self.params.timeout_slash.clone();
            self.slash_staker(ctx, pool, &uploader, &ratio, SlashType::Timeout)?;
        }

        self.emit(Self::finalized_event(pool, 0, BundleStatus::NoData));
        let next_uploader = self.next_uploader_by_random(ctx, pool, &pool.stakers)?;
        self.register_bundle(ctx, pool, s, next_uploader);
        Ok(SubmitOutcome::Finalized(BundleStatus::NoData))
    }

    /// Pay for an accepted bundle, archive it and open the next round
    fn finalize_valid(
        &mut self,
        ctx: &BlockContext,
        pool: &mut Pool,
        s: &BundleSubmission,
    ) -> Result<SubmitOutcome> {
        let bundle_reward = pool.operating_cost.saturating_add(
            pool.bundle_proposal
                .byte_size
                .saturating_mul(self.params.storage_cost),
        );

        if !self.charge_funders(ctx, pool, bundle_reward)? {
            warn!(
                pool_id = pool.id,
                bundle_id = %pool.bundle_proposal.bundle_id,
                "Funders cannot pay for the bundle, dropping it"
            );
            pool.bundle_proposal.created_at = ctx.time;
            self.emit(Self::finalized_event(pool, 0, BundleStatus::NoFunds));
            return Ok(SubmitOutcome::Dropped(BundleStatus::NoFunds));
        }

        let treasury_payout = self
            .params
            .network_fee
            .mul_u64(bundle_reward)
            .round_u64()
            .min(bundle_reward);
        let mut uploader_payout = bundle_reward - treasury_payout;

        let uploader = pool.bundle_proposal.uploader.clone();
        if let Some(staker) = self.get_staker(&uploader, pool.id)? {
            let delegation_share = (&Dec::one() - &staker.commission)
                .mul_u64(uploader_payout)
                .round_u64()
                .min(uploader_payout);
            if delegation_share > 0 && self.add_delegation_rewards(pool.id, &uploader, delegation_share)? {
                uploader_payout -= delegation_share;
            }
        }

        let vote_slash = self.params.vote_slash.clone();
        for voter in pool.bundle_proposal.voters_invalid.clone() {
            self.slash_staker(ctx, pool, &voter, &vote_slash, SlashType::Vote)?;
        }

        self.pay_treasury(ctx, treasury_payout)?;
        self.pay_out(ctx, &uploader, uploader_payout)?;

        let bp = &pool.bundle_proposal;
        self.set_proposal(&Proposal {
            bundle_id: bp.bundle_id.clone(),
            pool_id: pool.id,
            id: pool.total_bundles,
            uploader: bp.uploader.clone(),
            from_height: pool.current_height,
            to_height: bp.to_height,
            byte_size: bp.byte_size,
            to_key: bp.to_key.clone(),
            to_value: bp.to_value.clone(),
            finalized_at: ctx.time,
        })?;

        pool.current_height = bp.to_height;
        pool.current_key = bp.to_key.clone();
        pool.current_value = bp.to_value.clone();
        pool.total_bundles += 1;

        info!(
            pool_id = pool.id,
            bundle_id = %pool.bundle_proposal.bundle_id,
            reward = bundle_reward,
            uploader_payout,
            treasury_payout,
            "Bundle finalized"
        );
        self.emit(Self::finalized_event(pool, bundle_reward, BundleStatus::Valid));

        let next_uploader = self.next_uploader_from_voters(ctx, pool)?;
        self.register_bundle(ctx, pool, s, next_uploader);
        Ok(SubmitOutcome::Finalized(BundleStatus::Valid))
    }

    /// Slash the uploader and the valid voters and roll the round back.
    /// The submitted bundle is discarded.
    fn finalize_invalid(&mut self, ctx: &BlockContext, pool: &mut Pool) -> Result<SubmitOutcome> {
        let vote_slash = self.params.vote_slash.clone();
        for voter in pool.bundle_proposal.voters_valid.clone() {
            self.slash_staker(ctx, pool, &voter, &vote_slash, SlashType::Vote)?;
        }
        let uploader = pool.bundle_proposal.uploader.clone();
        let upload_slash = self.params.upload_slash.clone();
        self.slash_staker(ctx, pool, &uploader, &upload_slash, SlashType::Upload)?;

        warn!(
            pool_id = pool.id,
            bundle_id = %pool.bundle_proposal.bundle_id,
            uploader = %uploader,
            "Bundle rejected"
        );
        self.emit(Self::finalized_event(pool, 0, BundleStatus::Invalid));

        pool.bundle_proposal = BundleProposal {
            next_uploader: pool.bundle_proposal.next_uploader.clone(),
            created_at: ctx.time,
            ..Default::default()
        };
        Ok(SubmitOutcome::Finalized(BundleStatus::Invalid))
    }

    /// Settle a report that the current round has no quorum
    fn handle_no_quorum_report(
        &mut self,
        ctx: &BlockContext,
        pool: &mut Pool,
        s: &BundleSubmission,
    ) -> Result<SubmitOutcome> {
        let bp = &pool.bundle_proposal;
        if !bp.is_active() || is_no_data(&bp.bundle_id) {
            return Err(RegistryError::InvalidArgs(
                "no open bundle to report".to_string(),
            ));
        }

        if Quorum::evaluate(pool).is_reached() {
            warn!(pool_id = pool.id, reporter = %s.creator, "False no-quorum report");
            let upload_slash = self.params.upload_slash.clone();
            self.slash_staker(ctx, pool, &s.creator, &upload_slash, SlashType::Upload)?;
            pool.bundle_proposal.next_uploader =
                self.next_uploader_by_random(ctx, pool, &pool.stakers)?;
            pool.bundle_proposal.created_at = ctx.time;
            return Ok(SubmitOutcome::ReporterSlashed);
        }

        self.drop_bundle(ctx, pool)?;
        Ok(SubmitOutcome::Dropped(BundleStatus::NoQuorum))
    }

    /// End the current round without quorum. Non-voters get a strike and
    /// the heights of the bundle stay open for the next uploader.
    pub(crate) fn drop_bundle(&mut self, ctx: &BlockContext, pool: &mut Pool) -> Result<()> {
        self.handle_non_voters(ctx, pool)?;
        let next_uploader = self.next_uploader_from_voters(ctx, pool)?;

        warn!(
            pool_id = pool.id,
            bundle_id = %pool.bundle_proposal.bundle_id,
            "Bundle dropped without quorum"
        );
        self.emit(Self::finalized_event(pool, 0, BundleStatus::NoQuorum));

        pool.bundle_proposal = BundleProposal {
            next_uploader,
            created_at: ctx.time,
            ..Default::default()
        };
        Ok(())
    }

    fn require_funder(&mut self, ctx: &BlockContext, pool_id: u64, account: &str) -> Result<Funder> {
        match self.get_funder(account, pool_id)? {
            Some(funder) => Ok(funder),
            None => Err(self.halt_chain(
                ctx,
                format!("funder {} listed in pool {} has no record", account, pool_id),
            )),
        }
    }

    /// Charge `reward` to the funders in equal shares, the remainder going to
    /// the lowest funder.
    ///
    /// Funders that cannot pay their share are evicted and forfeit their
    /// funds to the treasury, then the shares are recomputed. Returns `false`
    /// when no funder is left.
    fn charge_funders(&mut self, ctx: &BlockContext, pool: &mut Pool, reward: u64) -> Result<bool> {
        let shares = |count: usize| {
            let count = count as u64;
            let share = reward / count;
            (share, reward - share * count)
        };

        let mut forfeited = 0u64;
        let solvent = loop {
            if pool.funders.is_empty() {
                break false;
            }
            let (share, remainder) = shares(pool.funders.len());

            self.update_lowest_funder(pool)?;
            let lowest_account = pool.lowest_funder.clone();
            let lowest = self.require_funder(ctx, pool.id, &lowest_account)?;
            if lowest.amount >= share.saturating_add(remainder) {
                break true;
            }

            let mut broke = Vec::new();
            for account in pool.funders.clone() {
                let funder = self.require_funder(ctx, pool.id, &account)?;
                if funder.amount < share {
                    broke.push(funder);
                }
            }
            if broke.is_empty() {
                broke.push(lowest);
            }

            for funder in broke {
                warn!(
                    pool_id = pool.id,
                    funder = %funder.account,
                    amount = funder.amount,
                    "Funder cannot pay its share, evicting"
                );
                self.remove_funder(pool, &funder)?;
                forfeited += funder.amount;
                self.emit(RegistryEvent::Defund {
                    pool_id: pool.id,
                    address: funder.account.clone(),
                    amount: funder.amount,
                });
            }
        };

        self.pay_treasury(ctx, forfeited)?;
        if !solvent {
            return Ok(false);
        }

        let (share, remainder) = shares(pool.funders.len());
        let lowest_account = pool.lowest_funder.clone();
        for account in pool.funders.clone() {
            let mut funder = self.require_funder(ctx, pool.id, &account)?;
            funder.amount = funder.amount.saturating_sub(share);
            if account == lowest_account {
                funder.amount = funder.amount.saturating_sub(remainder);
            }
            self.set_funder(&funder)?;
        }
        pool.total_funds = pool.total_funds.saturating_sub(reward);
        self.update_lowest_funder(pool)?;
        Ok(true)
    }
}
