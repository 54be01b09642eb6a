//! Token transfer capability
//!
//! The registry never keeps account balances itself. It moves tokens between
//! accounts, its own module account and the treasury through [`Bank`].
//! All amounts are in the chain's native denomination [`DENOM`].

use crate::error::{RegistryError, Result};
use std::collections::HashMap;

/// Native denomination moved by the registry
pub const DENOM: &str = "tkyve";

/// Bank capability consumed by the registry
pub trait Bank {
    /// Spendable balance of an account
    fn get_balance(&self, address: &str) -> u64;

    /// Pay tokens out of the registry module account
    fn transfer_from_module_to_account(&mut self, address: &str, amount: u64) -> Result<()>;

    /// Pull tokens from an account into the registry module account
    fn transfer_from_account_to_module(&mut self, address: &str, amount: u64) -> Result<()>;

    /// Move tokens from the registry module account to the treasury
    fn fund_treasury(&mut self, amount: u64) -> Result<()>;
}

/// In-memory bank for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct MemoryBank {
    accounts: HashMap<String, u64>,
    module_balance: u64,
    treasury: u64,
}

impl MemoryBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air
    pub fn mint(&mut self, address: &str, amount: u64) {
        *self.accounts.entry(address.to_string()).or_insert(0) += amount;
    }

    /// Balance of the registry module account
    pub fn module_balance(&self) -> u64 {
        self.module_balance
    }

    /// Balance of the treasury
    pub fn treasury(&self) -> u64 {
        self.treasury
    }
}

impl Bank for MemoryBank {
    fn get_balance(&self, address: &str) -> u64 {
        self.accounts.get(address).copied().unwrap_or(0)
    }

    fn transfer_from_module_to_account(&mut self, address: &str, amount: u64) -> Result<()> {
        if self.module_balance < amount {
            return Err(RegistryError::Bank(format!(
                "module balance {} cannot cover {}{}",
                self.module_balance, amount, DENOM
            )));
        }
        self.module_balance -= amount;
        *self.accounts.entry(address.to_string()).or_insert(0) += amount;
        Ok(())
    }

    fn transfer_from_account_to_module(&mut self, address: &str, amount: u64) -> Result<()> {
        let balance = self.get_balance(address);
        if balance < amount {
            return Err(RegistryError::InsufficientFunds(format!(
                "{} has {}{}, needs {}{}",
                address, balance, DENOM, amount, DENOM
            )));
        }
        self.accounts.insert(address.to_string(), balance - amount);
        self.module_balance += amount;
        Ok(())
    }

    fn fund_treasury(&mut self, amount: u64) -> Result<()> {
        if self.module_balance < amount {
            return Err(RegistryError::Bank(format!(
                "module balance {} cannot fund treasury with {}{}",
                self.module_balance, amount, DENOM
            )));
        }
        self.module_balance -= amount;
        self.treasury += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfers_conserve_supply() {
        let mut bank = MemoryBank::new();
        bank.mint("alice", 100);

        bank.transfer_from_account_to_module("alice", 60).unwrap();
        assert_eq!(bank.get_balance("alice"), 40);
        assert_eq!(bank.module_balance(), 60);

        bank.transfer_from_module_to_account("bob", 20).unwrap();
        bank.fund_treasury(10).unwrap();
        assert_eq!(bank.get_balance("bob"), 20);
        assert_eq!(bank.treasury(), 10);
        assert_eq!(bank.module_balance(), 30);
    }

    #[test]
    fn test_insufficient_account_balance() {
        let mut bank = MemoryBank::new();
        bank.mint("alice", 5);
        let result = bank.transfer_from_account_to_module("alice", 6);
        assert!(matches!(result, Err(RegistryError::InsufficientFunds(_))));
        assert_eq!(bank.get_balance("alice"), 5);
    }

    #[test]
    fn test_module_cannot_overdraw() {
        let mut bank = MemoryBank::new();
        assert!(matches!(
            bank.transfer_from_module_to_account("alice", 1),
            Err(RegistryError::Bank(_))
        ));
        assert!(bank.fund_treasury(1).is_err());
    }
}
