//! Redelegation rate limit
//!
//! Every redelegation spends a slot in the cooldown queue for
//! `redelegation_cooldown` seconds. An address holds at most
//! `redelegation_max_amount` slots and may spend only one per block. A slot
//! is released once it is strictly older than the cooldown.

use super::Keeper;
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::store::queue::is_expired;
use crate::store::{KvStore, QueueKind, RegistryLogger, TimeQueue};
use crate::types::{BlockContext, RedelegationCooldownEntry};
use tracing::debug;

pub(crate) const REDELEGATION_COOLDOWN_QUEUE: TimeQueue<RedelegationCooldownEntry> =
    TimeQueue::new(QueueKind::RedelegationCooldown);

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Check that `address` has a free redelegation slot.
    /// Returns its slots that have already expired.
    pub(crate) fn check_redelegation_slot(
        &self,
        ctx: &BlockContext,
        address: &str,
    ) -> Result<Vec<RedelegationCooldownEntry>> {
        let period = self.params.redelegation_cooldown;
        let (expired, active): (Vec<_>, Vec<_>) = self
            .get_redelegation_cooldowns(address)?
            .into_iter()
            .partition(|entry| is_expired(entry.creation_time, period, ctx.time));

        if active.len() as u64 >= self.params.redelegation_max_amount {
            return Err(RegistryError::RedelegationOnCooldown);
        }
        if active
            .iter()
            .any(|entry| entry.creation_height == ctx.height || entry.creation_time == ctx.time)
        {
            return Err(RegistryError::MultipleRedelegationInSameBlock);
        }
        Ok(expired)
    }

    /// Drop expired slots of `address` and spend a new one
    pub(crate) fn consume_redelegation_slot(
        &mut self,
        ctx: &BlockContext,
        address: &str,
        expired: &[RedelegationCooldownEntry],
    ) -> Result<()> {
        for entry in expired {
            REDELEGATION_COOLDOWN_QUEUE.remove(&mut self.store, entry)?;
        }
        let entry = REDELEGATION_COOLDOWN_QUEUE.enqueue(
            &mut self.store,
            RedelegationCooldownEntry {
                index: 0,
                address: address.to_string(),
                creation_time: ctx.time,
                creation_height: ctx.height,
            },
        )?;
        debug!(
            address = %address,
            index = entry.index,
            pruned = expired.len(),
            "Redelegation slot spent"
        );
        Ok(())
    }

    /// Release every slot whose cooldown is over
    pub fn process_due_redelegation_cooldowns(&mut self, ctx: &BlockContext) -> Result<()> {
        self.ensure_running()?;
        let period = self.params.redelegation_cooldown;
        let mut drained = 0;

        while let Some(entry) = REDELEGATION_COOLDOWN_QUEUE.next_due_by(&mut self.store, |entry| {
            is_expired(entry.creation_time, period, ctx.time)
        })? {
            REDELEGATION_COOLDOWN_QUEUE.complete(&mut self.store, &entry)?;
            drained += 1;
        }

        RegistryLogger::log_queue_drain(QueueKind::RedelegationCooldown, ctx, drained);
        Ok(())
    }

    /// Redelegation slots held by an address, oldest first
    pub fn get_redelegation_cooldowns(&self, address: &str) -> Result<Vec<RedelegationCooldownEntry>> {
        REDELEGATION_COOLDOWN_QUEUE
            .find_by_secondary(&self.store, &RedelegationCooldownEntry::owner_key(address))
    }
}
