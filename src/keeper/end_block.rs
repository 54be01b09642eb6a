//! Per-block scheduler
//!
//! Runs once at the end of every block, in this order:
//! - stake and delegation unbonding queues
//! - commission change queue
//! - redelegation cooldown queue
//! - upload timeouts of every pool

use super::bundles::{check_pool_running, is_no_data};
use super::pool_logic::Quorum;
use super::Keeper;
use crate::bank::Bank;
use crate::error::Result;
use crate::events::{RegistryEvent, SlashType};
use crate::store::{KvStore, OperationType, RegistryLogger};
use crate::types::BlockContext;
use tracing::{debug, warn};

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Advance every queue and timeout for the block in `ctx`
    pub fn end_block(&mut self, ctx: &BlockContext) -> Result<()> {
        self.ensure_running()?;
        debug!(height = ctx.height, time = ctx.time, "End block");

        self.process_due_unbondings(ctx)?;
        self.process_due_commission_changes(ctx)?;
        self.process_due_redelegation_cooldowns(ctx)?;
        self.handle_upload_timeouts(ctx)
    }

    /// Drop rounds that missed quorum and punish uploaders that missed
    /// their deadline.
    ///
    /// A pool that cannot run loses its next uploader. After the upload
    /// interval a bundle without quorum is dropped. After the interval plus
    /// `upload_timeout` the next uploader is slashed, deactivated and
    /// replaced.
    pub fn handle_upload_timeouts(&mut self, ctx: &BlockContext) -> Result<()> {
        self.ensure_running()?;

        for mut pool in self.get_all_pools()? {
            if check_pool_running(&pool).is_err() {
                if !pool.bundle_proposal.next_uploader.is_empty() {
                    debug!(pool_id = pool.id, "Pool cannot run, clearing next uploader");
                    pool.bundle_proposal.next_uploader.clear();
                    self.set_pool(&pool)?;
                }
                continue;
            }

            if pool.bundle_proposal.next_uploader.is_empty()
                || ctx.time < pool.bundle_proposal.created_at.saturating_add(pool.upload_interval)
            {
                continue;
            }

            let bp = &pool.bundle_proposal;
            if bp.is_active() && !is_no_data(&bp.bundle_id) && !Quorum::evaluate(&pool).is_reached() {
                self.drop_bundle(ctx, &mut pool)?;
            }

            let deadline = pool
                .bundle_proposal
                .created_at
                .saturating_add(pool.upload_interval)
                .saturating_add(self.params.upload_timeout);
            if ctx.time < deadline {
                self.set_pool(&pool)?;
                continue;
            }

            let late = pool.bundle_proposal.next_uploader.clone();
            warn!(pool_id = pool.id, uploader = %late, "Upload timeout");

            let timeout_slash = self.params.timeout_slash.clone();
            self.slash_staker(ctx, &mut pool, &late, &timeout_slash, SlashType::Timeout)?;
            self.deactivate_staker(&mut pool, &late)?;

            pool.bundle_proposal.next_uploader = self.next_uploader_by_random(ctx, &pool, &pool.stakers)?;
            pool.bundle_proposal.created_at = ctx.time;
            self.set_pool(&pool)?;

            RegistryLogger::log_operation_success(
                OperationType::UploadTimeout,
                ctx,
                pool.id,
                format!(
                    "{} timed out, next uploader {}",
                    late, pool.bundle_proposal.next_uploader
                ),
            );
            self.emit(RegistryEvent::UploadTimeout {
                pool_id: pool.id,
                address: late,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RegistryError;
    use crate::events::{BundleStatus, RegistryEvent};
    use crate::keeper::test_utils::*;
    use crate::keeper::{BundleSubmission, Keeper};
    use crate::types::StakerStatus;

    fn setup() -> (Keeper, u64) {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice", "bob", "carol", "dave"]);
        for staker in ["alice", "bob", "carol"] {
            keeper.stake(&ctx(1, 0), staker, pool_id, 1_000).unwrap();
        }
        keeper.fund(&ctx(1, 0), "dave", pool_id, 100_000_000).unwrap();
        keeper.claim_uploader_role(&ctx(1, 0), "alice", pool_id).unwrap();
        keeper.take_events();
        (keeper, pool_id)
    }

    fn submit_first_bundle(keeper: &mut Keeper, pool_id: u64) {
        keeper
            .submit_bundle_proposal(
                &ctx(2, 60),
                &BundleSubmission {
                    creator: "alice".to_string(),
                    pool_id,
                    bundle_id: "bundle_1".to_string(),
                    byte_size: 100,
                    from_height: 0,
                    to_height: 10,
                    from_key: "0".to_string(),
                    to_key: "10".to_string(),
                    to_value: "value".to_string(),
                },
            )
            .unwrap();
        keeper.take_events();
    }

    #[test]
    fn test_nothing_happens_before_deadline() {
        let (mut keeper, pool_id) = setup();
        let before = keeper.get_pool(pool_id).unwrap().unwrap();

        keeper.end_block(&ctx(2, 659)).unwrap();
        assert_eq!(keeper.get_pool(pool_id).unwrap().unwrap(), before);
        assert!(keeper.take_events().is_empty());
    }

    #[test]
    fn test_upload_timeout_slashes_and_replaces_uploader() {
        let (mut keeper, pool_id) = setup();

        // upload interval 60 plus upload timeout 600
        keeper.end_block(&ctx(2, 660)).unwrap();

        let alice = keeper.get_staker("alice", pool_id).unwrap().unwrap();
        assert_eq!(alice.amount, 980);
        assert_eq!(alice.status, StakerStatus::Inactive);

        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert!(pool.is_inactive_staker("alice"));
        assert_eq!(pool.total_stake, 2_000);
        assert!(["bob", "carol"].contains(&pool.bundle_proposal.next_uploader.as_str()));
        assert_eq!(pool.bundle_proposal.created_at, 660);
        assert_eq!(keeper.bank().treasury(), 20);

        assert!(keeper.take_events().contains(&RegistryEvent::UploadTimeout {
            pool_id,
            address: "alice".to_string(),
        }));
    }

    #[test]
    fn test_bundle_without_quorum_is_dropped() {
        let (mut keeper, pool_id) = setup();
        submit_first_bundle(&mut keeper, pool_id);

        keeper.end_block(&ctx(3, 119)).unwrap();
        assert!(keeper.get_pool(pool_id).unwrap().unwrap().bundle_proposal.is_active());

        keeper.end_block(&ctx(3, 120)).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert!(!pool.bundle_proposal.is_active());
        assert_eq!(pool.bundle_proposal.created_at, 120);
        assert_eq!(pool.current_height, 0);
        assert_eq!(keeper.get_staker("bob", pool_id).unwrap().unwrap().points, 1);
        assert_eq!(keeper.get_staker("alice", pool_id).unwrap().unwrap().points, 0);

        let dropped = keeper.take_events().into_iter().any(|event| {
            matches!(
                event,
                RegistryEvent::BundleFinalized {
                    status: BundleStatus::NoQuorum,
                    ..
                }
            )
        });
        assert!(dropped);
    }

    #[test]
    fn test_bundle_with_quorum_waits_for_uploader() {
        let (mut keeper, pool_id) = setup();
        submit_first_bundle(&mut keeper, pool_id);
        for voter in ["bob", "carol"] {
            keeper
                .vote_proposal(&ctx(2, 70), voter, pool_id, "bundle_1", crate::types::VoteType::Valid)
                .unwrap();
        }

        keeper.end_block(&ctx(3, 200)).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.bundle_proposal.bundle_id, "bundle_1");
        assert_eq!(pool.bundle_proposal.voters_valid.len(), 2);
    }

    #[test]
    fn test_stopped_pool_loses_next_uploader() {
        let (mut keeper, pool_id) = setup();
        keeper.set_pool_paused(pool_id, true).unwrap();

        keeper.end_block(&ctx(2, 10)).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert!(pool.bundle_proposal.next_uploader.is_empty());
        assert_eq!(keeper.get_staker("alice", pool_id).unwrap().unwrap().amount, 1_000);
    }

    #[test]
    fn test_end_block_drains_queues() {
        let (mut keeper, pool_id) = setup();
        keeper.unstake(&ctx(2, 10), "bob", pool_id, 400).unwrap();

        let period = keeper.params().unbonding_staking_time;
        keeper.end_block(&ctx(3, 10 + period)).unwrap();
        assert_eq!(keeper.get_staker("bob", pool_id).unwrap().unwrap().amount, 600);
        assert!(keeper.get_pending_stake_unbondings("bob").unwrap().is_empty());
    }

    #[test]
    fn test_end_block_refused_after_halt() {
        let (mut keeper, _) = setup();
        let c = ctx(4, 40);
        keeper.halt_chain(&c, "test halt");
        assert!(matches!(
            keeper.end_block(&ctx(5, 50)),
            Err(RegistryError::ChainHalted { .. })
        ));
    }
}
