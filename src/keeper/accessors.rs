//! Typed record access
//!
//! Primary records and their secondary indices are always written together.
//! Index entries hold the primary key of the record they point at.

use super::Keeper;
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::store::keys::{self, POOL_PREFIX};
use crate::store::{KvStore, TypedStore};
use crate::types::{
    DelegationEntry, DelegationPoolData, Delegator, Funder, Pool, Proposal, Staker,
    UnbondingDelegator,
};
use serde::de::DeserializeOwned;

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Follow index entries under `prefix` to their primary records
    fn load_indexed<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for (_, primary_key) in self.store.iterate_prefix(prefix) {
            if let Some(record) = self.store.get_value(&primary_key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // Pools

    /// Pool by id
    pub fn get_pool(&self, pool_id: u64) -> Result<Option<Pool>> {
        self.store.get_value(&keys::pool_key(pool_id))
    }

    /// Pool by id, `PoolNotFound` when absent
    pub(crate) fn load_pool(&self, pool_id: u64) -> Result<Pool> {
        self.get_pool(pool_id)?
            .ok_or(RegistryError::PoolNotFound(pool_id))
    }

    pub(crate) fn set_pool(&mut self, pool: &Pool) -> Result<()> {
        self.store.set_value(&keys::pool_key(pool.id), pool)
    }

    /// Every pool in id order
    pub fn get_all_pools(&self) -> Result<Vec<Pool>> {
        self.store.values_with_prefix(POOL_PREFIX)
    }

    // Stakers

    /// Staker records of an account in pool id order, active or not
    pub fn get_stakers_of_account(&self, staker: &str) -> Result<Vec<Staker>> {
        self.store.values_with_prefix(&keys::stakers_of_account_prefix(staker))
    }

    /// Staker of a pool
    pub fn get_staker(&self, staker: &str, pool_id: u64) -> Result<Option<Staker>> {
        self.store.get_value(&keys::staker_key(staker, pool_id))
    }

    pub(crate) fn load_staker(&self, staker: &str, pool_id: u64) -> Result<Staker> {
        self.get_staker(staker, pool_id)?
            .ok_or_else(|| RegistryError::StakerNotFound {
                pool_id,
                staker: staker.to_string(),
            })
    }

    pub(crate) fn set_staker(&mut self, staker: &Staker) -> Result<()> {
        let primary = keys::staker_key(&staker.account, staker.pool_id);
        self.store.set_value(&primary, staker)?;
        self.store
            .set(&keys::staker_by_pool_key(staker.pool_id, &staker.account), primary);
        Ok(())
    }

    pub(crate) fn remove_staker_record(&mut self, staker: &str, pool_id: u64) {
        self.store.delete(&keys::staker_key(staker, pool_id));
        self.store.delete(&keys::staker_by_pool_key(pool_id, staker));
    }

    /// Every staker record of a pool, active and inactive
    pub fn get_stakers_of_pool(&self, pool_id: u64) -> Result<Vec<Staker>> {
        let prefix = keys::KeyBuilder::new(keys::STAKER_BY_POOL_PREFIX)
            .u64(pool_id)
            .build();
        self.load_indexed(&prefix)
    }

    // Funders

    /// Funder records of an account in pool id order
    pub fn get_funders_of_account(&self, funder: &str) -> Result<Vec<Funder>> {
        self.store.values_with_prefix(&keys::funders_of_account_prefix(funder))
    }

    /// Funder of a pool
    pub fn get_funder(&self, funder: &str, pool_id: u64) -> Result<Option<Funder>> {
        self.store.get_value(&keys::funder_key(funder, pool_id))
    }

    pub(crate) fn set_funder(&mut self, funder: &Funder) -> Result<()> {
        let primary = keys::funder_key(&funder.account, funder.pool_id);
        self.store.set_value(&primary, funder)?;
        self.store
            .set(&keys::funder_by_pool_key(funder.pool_id, &funder.account), primary);
        Ok(())
    }

    pub(crate) fn remove_funder_record(&mut self, funder: &str, pool_id: u64) {
        self.store.delete(&keys::funder_key(funder, pool_id));
        self.store.delete(&keys::funder_by_pool_key(pool_id, funder));
    }

    /// Every funder of a pool
    pub fn get_funders_of_pool(&self, pool_id: u64) -> Result<Vec<Funder>> {
        let prefix = keys::KeyBuilder::new(keys::FUNDER_BY_POOL_PREFIX)
            .u64(pool_id)
            .build();
        self.load_indexed(&prefix)
    }

    // F1 accumulators and checkpoints

    /// F1 accumulator of a staker, absent until someone delegates
    pub fn get_delegation_pool_data(
        &self,
        pool_id: u64,
        staker: &str,
    ) -> Result<Option<DelegationPoolData>> {
        self.store
            .get_value(&keys::delegation_data_key(pool_id, staker))
    }

    pub(crate) fn set_delegation_pool_data(&mut self, data: &DelegationPoolData) -> Result<()> {
        self.store
            .set_value(&keys::delegation_data_key(data.pool_id, &data.staker), data)
    }

    pub(crate) fn remove_delegation_pool_data(&mut self, pool_id: u64, staker: &str) {
        self.store.delete(&keys::delegation_data_key(pool_id, staker));
    }

    /// F1 checkpoint
    pub fn get_delegation_entry(
        &self,
        pool_id: u64,
        staker: &str,
        k_index: u64,
    ) -> Result<Option<DelegationEntry>> {
        self.store
            .get_value(&keys::delegation_entry_key(pool_id, staker, k_index))
    }

    pub(crate) fn set_delegation_entry(&mut self, entry: &DelegationEntry) -> Result<()> {
        self.store.set_value(
            &keys::delegation_entry_key(entry.pool_id, &entry.staker, entry.k_index),
            entry,
        )
    }

    pub(crate) fn remove_delegation_entry(&mut self, pool_id: u64, staker: &str, k_index: u64) {
        self.store
            .delete(&keys::delegation_entry_key(pool_id, staker, k_index));
    }

    /// Every stored checkpoint of a staker, in index order
    pub fn get_delegation_entries(
        &self,
        pool_id: u64,
        staker: &str,
    ) -> Result<Vec<DelegationEntry>> {
        self.store
            .values_with_prefix(&keys::delegation_entries_prefix(pool_id, staker))
    }

    // Delegators

    /// Delegation of `delegator` to `staker`
    pub fn get_delegator(
        &self,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<Option<Delegator>> {
        self.store
            .get_value(&keys::delegator_key(pool_id, staker, delegator))
    }

    pub(crate) fn load_delegator(
        &self,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<Delegator> {
        self.get_delegator(pool_id, staker, delegator)?
            .ok_or_else(|| RegistryError::NoDelegatorFound {
                pool_id,
                staker: staker.to_string(),
                delegator: delegator.to_string(),
            })
    }

    pub(crate) fn set_delegator(&mut self, delegator: &Delegator) -> Result<()> {
        let primary = keys::delegator_key(delegator.pool_id, &delegator.staker, &delegator.delegator);
        self.store.set_value(&primary, delegator)?;
        self.store.set(
            &keys::delegator_by_address_key(
                &delegator.delegator,
                delegator.pool_id,
                &delegator.staker,
            ),
            primary,
        );
        Ok(())
    }

    pub(crate) fn remove_delegator(&mut self, pool_id: u64, staker: &str, delegator: &str) {
        self.store
            .delete(&keys::delegator_key(pool_id, staker, delegator));
        self.store
            .delete(&keys::delegator_by_address_key(delegator, pool_id, staker));
    }

    /// Every delegator of a staker
    pub fn get_delegators_of_staker(&self, pool_id: u64, staker: &str) -> Result<Vec<Delegator>> {
        self.store
            .values_with_prefix(&keys::delegators_of_staker_prefix(pool_id, staker))
    }

    /// Every delegation made by an address
    pub fn get_delegations_of_address(&self, delegator: &str) -> Result<Vec<Delegator>> {
        self.load_indexed(&keys::delegations_of_address_prefix(delegator))
    }

    // In-flight undelegations

    /// Amount of a delegation waiting in the unbonding queue
    pub fn get_unbonding_delegator(
        &self,
        pool_id: u64,
        staker: &str,
        delegator: &str,
    ) -> Result<Option<UnbondingDelegator>> {
        self.store
            .get_value(&keys::unbonding_delegator_key(pool_id, staker, delegator))
    }

    /// Store an in-flight amount, deleting the record when it reaches zero
    pub(crate) fn set_unbonding_delegator(&mut self, record: &UnbondingDelegator) -> Result<()> {
        let key = keys::unbonding_delegator_key(record.pool_id, &record.staker, &record.delegator);
        if record.unbonding_amount == 0 {
            self.store.delete(&key);
            return Ok(());
        }
        self.store.set_value(&key, record)
    }

    // Proposals

    /// Finalized proposal by bundle id
    pub fn get_proposal(&self, bundle_id: &str) -> Result<Option<Proposal>> {
        self.store.get_value(&keys::proposal_key(bundle_id))
    }

    pub(crate) fn set_proposal(&mut self, proposal: &Proposal) -> Result<()> {
        let primary = keys::proposal_key(&proposal.bundle_id);
        self.store.set_value(&primary, proposal)?;
        self.store.set(
            &keys::proposal_by_height_key(proposal.pool_id, proposal.from_height),
            primary,
        );
        Ok(())
    }

    /// Finalized proposals of a pool in height order
    pub fn get_proposals_of_pool(&self, pool_id: u64) -> Result<Vec<Proposal>> {
        self.load_indexed(&keys::proposals_of_pool_prefix(pool_id))
    }

    /// Finalized proposal of a pool with the highest `from_height` not above
    /// `height`, found by a single seek on the height index
    pub(crate) fn get_proposal_starting_at_or_before(
        &self,
        pool_id: u64,
        height: u64,
    ) -> Result<Option<Proposal>> {
        let prefix = keys::proposals_of_pool_prefix(pool_id);
        let bound = keys::proposal_by_height_key(pool_id, height);
        match self.store.last_at_or_before(&prefix, &bound) {
            Some((_, primary_key)) => self.store.get_value(&primary_key),
            None => Ok(None),
        }
    }
}
