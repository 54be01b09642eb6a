//! Registry keeper
//!
//! The keeper owns every registry record in its store and is the only place
//! that mutates them. Operations are grouped by concern:
//! - `accessors`: typed reads and writes with secondary indices
//! - `f1`: lazy reward distribution per staker
//! - `pool_logic`: lowest staker/funder tracking, slashing, uploader choice
//! - `staking`, `funding`, `delegation`, `commission`, `redelegation`
//! - `unbonding`: stake and delegation payouts when their queues drain
//! - `bundles`: the bundle proposal state machine
//! - `end_block`: the per-block scheduler
//! - `queries`: read-only views
//! - `halt`: fail-stationary response to invariant violations
//!
//! Every operation either applies its whole mutation set or returns an error.
//! Validation runs before the first write.

mod accessors;
mod bundles;
mod commission;
mod delegation;
mod end_block;
mod f1;
mod funding;
mod halt;
mod pool_logic;
mod queries;
mod redelegation;
mod staking;
mod unbonding;

pub use bundles::{BundleSubmission, SubmitOutcome, NO_DATA_BUNDLE, NO_QUORUM_BUNDLE};
pub use halt::EmergencyPlan;
pub use pool_logic::Quorum;
pub use queries::{DelegationInfo, Eligibility, FundedPool, StakedPool};

use crate::bank::{Bank, MemoryBank};
use crate::error::{RegistryError, Result};
use crate::events::RegistryEvent;
use crate::params::Params;
use crate::store::{KvStore, MemoryStore, OperationType, RegistryLogger, TypedStore};
use crate::types::{BlockContext, Pool};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Key of the pool id counter
const NEXT_POOL_ID_KEY: &[u8] = &[0x0f];

/// Log a rejected operation and pass its result through
pub(crate) fn traced<T>(
    operation: OperationType,
    ctx: &BlockContext,
    pool_id: u64,
    result: Result<T>,
) -> Result<T> {
    if let Err(err) = &result {
        RegistryLogger::log_operation_failure(operation, ctx, pool_id, err.to_string());
    }
    result
}

/// Settings of a new pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Display name
    pub name: String,
    /// Runtime tag of the data source
    pub runtime: String,
    /// Key archiving starts from
    pub start_key: String,
    /// Minimum seconds between rounds
    pub upload_interval: u64,
    /// Flat reward per bundle
    pub operating_cost: u64,
    /// Total stake the pool needs to run
    pub min_stake: u64,
    /// Upper bound of heights per bundle
    pub max_bundle_size: u64,
}

/// Registry state owner
pub struct Keeper<S: KvStore = MemoryStore, B: Bank = MemoryBank> {
    store: S,
    bank: B,
    params: Params,
    events: Vec<RegistryEvent>,
}

impl Keeper<MemoryStore, MemoryBank> {
    /// Keeper over an empty in-memory store and bank with default params
    pub fn in_memory() -> Self {
        Self {
            store: MemoryStore::new(),
            bank: MemoryBank::new(),
            params: Params::default(),
            events: Vec::new(),
        }
    }
}

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Create a keeper, rejecting invalid params
    pub fn new(store: S, bank: B, params: Params) -> Result<Self> {
        params.validate()?;
        info!("Registry keeper created");
        Ok(Self {
            store,
            bank,
            params,
            events: Vec::new(),
        })
    }

    /// Current params
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Replace params after validation
    pub fn set_params(&mut self, params: Params) -> Result<()> {
        params.validate()?;
        self.params = params;
        info!("Registry params updated");
        Ok(())
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Bank capability
    pub fn bank(&self) -> &B {
        &self.bank
    }

    /// Mutable bank capability
    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    /// Drain buffered events
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: RegistryEvent) {
        debug!(?event, "Registry event");
        self.events.push(event);
    }

    /// Register a new pool and return its id
    pub fn create_pool(&mut self, config: PoolConfig) -> Result<u64> {
        self.ensure_running()?;

        let id: u64 = self.store.get_value(NEXT_POOL_ID_KEY)?.unwrap_or(0);
        let pool = Pool {
            id,
            name: config.name,
            runtime: config.runtime,
            current_key: config.start_key.clone(),
            start_key: config.start_key,
            upload_interval: config.upload_interval,
            operating_cost: config.operating_cost,
            min_stake: config.min_stake,
            max_bundle_size: config.max_bundle_size,
            ..Default::default()
        };

        self.set_pool(&pool)?;
        self.store.set_value(NEXT_POOL_ID_KEY, &(id + 1))?;

        info!("Created pool {} ({})", id, pool.name);
        Ok(id)
    }

    /// Pause or resume a pool
    pub fn set_pool_paused(&mut self, pool_id: u64, paused: bool) -> Result<()> {
        self.ensure_running()?;
        let mut pool = self.load_pool(pool_id)?;
        pool.paused = paused;
        self.set_pool(&pool)?;
        info!("Pool {} paused={}", pool_id, paused);
        Ok(())
    }

    /// Pull tokens from an account into the module. Failure is a validation
    /// error since nothing has been written yet.
    pub(crate) fn collect(&mut self, address: &str, amount: u64) -> Result<()> {
        self.bank.transfer_from_account_to_module(address, amount)
    }

    /// Pay tokens out of the module. Accounting says the module holds them,
    /// so failure halts the chain.
    pub(crate) fn pay_out(&mut self, ctx: &BlockContext, address: &str, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        if let Err(err) = self.bank.transfer_from_module_to_account(address, amount) {
            return Err(self.halt_chain(
                ctx,
                format!("payout of {} to {} failed: {}", amount, address, err),
            ));
        }
        Ok(())
    }

    /// Move tokens from the module to the treasury, halting on failure
    pub(crate) fn pay_treasury(&mut self, ctx: &BlockContext, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        if let Err(err) = self.bank.fund_treasury(amount) {
            return Err(self.halt_chain(
                ctx,
                format!("treasury transfer of {} failed: {}", amount, err),
            ));
        }
        Ok(())
    }

    /// Reject zero amounts
    pub(crate) fn require_positive(amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(RegistryError::InvalidArgs(
                "amount must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::params::MAX_STAKERS;

    pub use crate::bank::Bank;

    pub const STARTING_BALANCE: u64 = 1_000_000_000_000;

    pub fn ctx(height: u64, time: u64) -> BlockContext {
        BlockContext::new(height, time)
    }

    pub fn test_keeper() -> Keeper {
        Keeper::in_memory()
    }

    pub fn fund_accounts(keeper: &mut Keeper, accounts: &[&str]) {
        for account in accounts {
            keeper.bank_mut().mint(account, STARTING_BALANCE);
        }
    }

    pub fn test_pool(keeper: &mut Keeper) -> u64 {
        keeper
            .create_pool(PoolConfig {
                name: "Moonbeam".to_string(),
                runtime: "@kyve/evm".to_string(),
                start_key: "0".to_string(),
                upload_interval: 60,
                operating_cost: 10_000,
                min_stake: 0,
                max_bundle_size: 100,
            })
            .unwrap()
    }

    pub fn staker_name(i: usize) -> String {
        format!("staker_{:02}", i)
    }

    pub fn fill_pool(keeper: &mut Keeper, pool_id: u64, amount: u64) -> Vec<String> {
        let names: Vec<String> = (0..MAX_STAKERS).map(staker_name).collect();
        for name in &names {
            keeper.bank_mut().mint(name, STARTING_BALANCE);
            keeper.stake(&ctx(1, 1), name, pool_id, amount).unwrap();
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn test_create_pool_assigns_sequential_ids() {
        let mut keeper = test_keeper();
        assert_eq!(test_pool(&mut keeper), 0);
        assert_eq!(test_pool(&mut keeper), 1);

        let pool = keeper.get_pool(1).unwrap().unwrap();
        assert_eq!(pool.current_key, "0");
        assert!(!pool.bundle_proposal.is_active());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = Params {
            vote_slash: "2".parse().unwrap(),
            ..Params::default()
        };
        let result = Keeper::new(MemoryStore::new(), MemoryBank::new(), params);
        assert!(matches!(result, Err(RegistryError::InvalidParams(_))));
    }

    #[test]
    fn test_pause_pool() {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        keeper.set_pool_paused(pool_id, true).unwrap();
        assert!(keeper.get_pool(pool_id).unwrap().unwrap().paused);

        assert!(matches!(
            keeper.set_pool_paused(99, true),
            Err(RegistryError::PoolNotFound(99))
        ));
    }

    #[test]
    fn test_failed_payout_halts() {
        let mut keeper = test_keeper();
        let err = keeper.pay_out(&ctx(5, 50), "alice", 10).unwrap_err();
        assert!(err.is_halt());

        let plan = keeper.emergency_plan().unwrap().unwrap();
        assert_eq!(plan.name, "emergency_6");
        assert_eq!(plan.height, 6);
    }
}
