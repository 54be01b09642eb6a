//! Commission changes
//!
//! A staker's commission never changes immediately. The request waits in the
//! commission change queue for `commission_change_time`; a second request
//! replaces the first and restarts the timer.

use super::{traced, Keeper};
use crate::bank::Bank;
use crate::decimal::Dec;
use crate::error::{RegistryError, Result};
use crate::events::RegistryEvent;
use crate::store::{KvStore, OperationType, QueueKind, RegistryLogger, TimeQueue};
use crate::types::{BlockContext, CommissionChangeEntry};
use tracing::info;

pub(crate) const COMMISSION_CHANGE_QUEUE: TimeQueue<CommissionChangeEntry> =
    TimeQueue::new(QueueKind::CommissionChange);

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Queue a commission change. `commission` is a decimal in `[0, 1]`.
    pub fn update_commission(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        commission: &str,
    ) -> Result<()> {
        let result = self.try_update_commission(ctx, creator, pool_id, commission);
        traced(OperationType::UpdateCommission, ctx, pool_id, result)
    }

    fn try_update_commission(
        &mut self,
        ctx: &BlockContext,
        creator: &str,
        pool_id: u64,
        commission: &str,
    ) -> Result<()> {
        self.ensure_running()?;
        self.load_pool(pool_id)?;
        self.load_staker(creator, pool_id)?;

        let parsed: Dec = commission
            .parse()
            .map_err(|_| RegistryError::InvalidCommission(commission.to_string()))?;
        if !parsed.is_unit_interval() {
            return Err(RegistryError::InvalidCommission(commission.to_string()));
        }

        let entry = COMMISSION_CHANGE_QUEUE.enqueue_replacing(
            &mut self.store,
            CommissionChangeEntry {
                index: 0,
                staker: creator.to_string(),
                pool_id,
                commission: parsed,
                creation_time: ctx.time,
            },
        )?;

        RegistryLogger::log_operation_success(
            OperationType::UpdateCommission,
            ctx,
            pool_id,
            format!("{} requested commission {}", creator, entry.commission),
        );
        self.emit(RegistryEvent::CommissionChangeQueued {
            pool_id,
            address: creator.to_string(),
            commission: entry.commission.to_string(),
        });
        Ok(())
    }

    /// Apply every commission change whose waiting period is over.
    /// Changes of stakers that left the pool are dropped.
    pub fn process_due_commission_changes(&mut self, ctx: &BlockContext) -> Result<()> {
        self.ensure_running()?;
        let period = self.params.commission_change_time;
        let mut drained = 0;

        while let Some(entry) = COMMISSION_CHANGE_QUEUE.next_due(&mut self.store, ctx.time, period)? {
            COMMISSION_CHANGE_QUEUE.complete(&mut self.store, &entry)?;
            drained += 1;

            let Some(mut staker) = self.get_staker(&entry.staker, entry.pool_id)? else {
                continue;
            };
            staker.commission = entry.commission.clone();
            self.set_staker(&staker)?;

            info!(
                pool_id = entry.pool_id,
                staker = %entry.staker,
                commission = %entry.commission,
                "Commission changed"
            );
            self.emit(RegistryEvent::CommissionChanged {
                pool_id: entry.pool_id,
                address: entry.staker.clone(),
                commission: entry.commission.to_string(),
            });
        }

        RegistryLogger::log_queue_drain(QueueKind::CommissionChange, ctx, drained);
        Ok(())
    }

    /// Commission change waiting for a staker, if any
    pub fn get_pending_commission_change(
        &self,
        staker: &str,
        pool_id: u64,
    ) -> Result<Option<CommissionChangeEntry>> {
        Ok(COMMISSION_CHANGE_QUEUE
            .find_by_secondary(&self.store, &CommissionChangeEntry::owner_key(staker, pool_id))?
            .pop())
    }
}
