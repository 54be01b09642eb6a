//! Pool funding
//!
//! Funders pay for finalized bundles. The funder list is capped at
//! [`MAX_FUNDERS`]; a newcomer with a higher amount than the lowest funder
//! replaces it and the lowest funder is refunded in full.

use super::{traced, Keeper};
use crate::bank::Bank;
use crate::error::{RegistryError, Result};
use crate::events::RegistryEvent;
use crate::params::MAX_FUNDERS;
use crate::store::{KvStore, OperationType, RegistryLogger};
use crate::types::{BlockContext, Funder};
use tracing::warn;

impl<S: KvStore, B: Bank> Keeper<S, B> {
    /// Add `amount` to the funds of a pool
    pub fn fund(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        let result = self.try_fund(ctx, creator, pool_id, amount);
        traced(OperationType::Fund, ctx, pool_id, result)
    }

    fn try_fund(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        let mut pool = self.load_pool(pool_id)?;

        match self.get_funder(creator, pool_id)? {
            Some(mut funder) => {
                self.collect(creator, amount)?;
                funder.amount += amount;
                self.set_funder(&funder)?;
            }
            None => {
                let evict = if pool.funders.len() >= MAX_FUNDERS {
                    let lowest = self.get_funder(&pool.lowest_funder, pool_id)?.ok_or_else(|| {
                        RegistryError::FunderNotFound {
                            pool_id,
                            funder: pool.lowest_funder.clone(),
                        }
                    })?;
                    if amount <= lowest.amount {
                        return Err(RegistryError::FundsTooLow(lowest.amount));
                    }
                    Some(lowest)
                } else {
                    None
                };

                self.collect(creator, amount)?;

                if let Some(lowest) = evict {
                    warn!(pool_id, evicted = %lowest.account, "Funder list full, refunding lowest funder");
                    self.remove_funder(&mut pool, &lowest)?;
                    self.pay_out(ctx, &lowest.account, lowest.amount)?;
                    self.emit(RegistryEvent::Defund {
                        pool_id,
                        address: lowest.account.clone(),
                        amount: lowest.amount,
                    });
                }

                pool.funders.push(creator.to_string());
                self.set_funder(&Funder {
                    account: creator.to_string(),
                    pool_id,
                    amount,
                })?;
            }
        }

        pool.total_funds += amount;
        self.update_lowest_funder(&mut pool)?;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::Fund,
            ctx,
            pool_id,
            format!("{} funded {}", creator, amount),
        );
        self.emit(RegistryEvent::Fund {
            pool_id,
            address: creator.to_string(),
            amount,
        });
        Ok(())
    }

    /// Withdraw `amount` of a funder's remaining funds
    pub fn defund(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        let result = self.try_defund(ctx, creator, pool_id, amount);
        traced(OperationType::Defund, ctx, pool_id, result)
    }

    fn try_defund(&mut self, ctx: &BlockContext, creator: &str, pool_id: u64, amount: u64) -> Result<()> {
        self.ensure_running()?;
        Self::require_positive(amount)?;
        let mut pool = self.load_pool(pool_id)?;
        let mut funder = self
            .get_funder(creator, pool_id)?
            .ok_or_else(|| RegistryError::FunderNotFound {
                pool_id,
                funder: creator.to_string(),
            })?;

        if amount > funder.amount {
            return Err(RegistryError::DefundTooHigh(funder.amount));
        }

        if amount == funder.amount {
            self.remove_funder(&mut pool, &funder)?;
        } else {
            funder.amount -= amount;
            self.set_funder(&funder)?;
            pool.total_funds = pool.total_funds.saturating_sub(amount);
            self.update_lowest_funder(&mut pool)?;
        }

        self.pay_out(ctx, creator, amount)?;
        self.set_pool(&pool)?;

        RegistryLogger::log_operation_success(
            OperationType::Defund,
            ctx,
            pool_id,
            format!("{} defunded {}", creator, amount),
        );
        self.emit(RegistryEvent::Defund {
            pool_id,
            address: creator.to_string(),
            amount,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RegistryError;
    use crate::keeper::test_utils::*;
    use crate::params::MAX_FUNDERS;

    #[test]
    fn test_fund_and_defund() {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice", "bob"]);

        keeper.fund(&ctx(1, 1), "alice", pool_id, 300).unwrap();
        keeper.fund(&ctx(1, 1), "bob", pool_id, 100).unwrap();
        keeper.fund(&ctx(1, 1), "alice", pool_id, 50).unwrap();

        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.total_funds, 450);
        assert_eq!(pool.lowest_funder, "bob");

        keeper.defund(&ctx(2, 2), "alice", pool_id, 300).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.total_funds, 150);
        assert_eq!(pool.lowest_funder, "alice");

        keeper.defund(&ctx(2, 2), "bob", pool_id, 100).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.funders, vec!["alice".to_string()]);
        assert_eq!(pool.total_funds, 50);
        assert!(keeper.get_funder("bob", pool_id).unwrap().is_none());
        assert_eq!(keeper.bank().get_balance("bob"), STARTING_BALANCE);
    }

    #[test]
    fn test_defund_too_high() {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);
        fund_accounts(&mut keeper, &["alice"]);
        keeper.fund(&ctx(1, 1), "alice", pool_id, 100).unwrap();

        assert_eq!(
            keeper.defund(&ctx(2, 2), "alice", pool_id, 101),
            Err(RegistryError::DefundTooHigh(100))
        );
        assert!(matches!(
            keeper.defund(&ctx(2, 2), "bob", pool_id, 1),
            Err(RegistryError::FunderNotFound { .. })
        ));
    }

    #[test]
    fn test_full_funder_list_replaces_lowest() {
        let mut keeper = test_keeper();
        let pool_id = test_pool(&mut keeper);

        let names: Vec<String> = (0..MAX_FUNDERS).map(|i| format!("funder_{:02}", i)).collect();
        for name in &names {
            keeper.bank_mut().mint(name, STARTING_BALANCE);
            keeper.fund(&ctx(1, 1), name, pool_id, 100).unwrap();
        }
        fund_accounts(&mut keeper, &["whale"]);

        assert_eq!(
            keeper.fund(&ctx(2, 2), "whale", pool_id, 100),
            Err(RegistryError::FundsTooLow(100))
        );

        keeper.fund(&ctx(2, 2), "whale", pool_id, 101).unwrap();
        let pool = keeper.get_pool(pool_id).unwrap().unwrap();
        assert_eq!(pool.funders.len(), MAX_FUNDERS);
        assert!(pool.is_funder("whale"));
        assert!(!pool.is_funder(&names[0]));
        assert_eq!(pool.total_funds, 100 * (MAX_FUNDERS as u64 - 1) + 101);
        assert_eq!(keeper.bank().get_balance(&names[0]), STARTING_BALANCE);
    }
}
