//! Economy collaborator used by collision pricing and commits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::players::PlayerContainer;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EconomyError {
    #[error("{player} cannot pay {amount:.2}, balance is {balance:.2}")]
    InsufficientFunds {
        player: String,
        amount: f64,
        balance: f64,
    },
    #[error("{0} has no account")]
    NoAccount(String),
}

pub trait EconomyProvider: Send + Sync {
    /// `false` when no economy is configured: every operation is free.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Price of claiming `blocks` blocks in `world`.
    fn price_for_claim(&self, world: &str, blocks: u64) -> f64;

    /// Balance of the container, `None` when it has no account (groups,
    /// nobody) or the provider does not track balances.
    fn balance(&self, player: &PlayerContainer) -> Option<f64>;

    fn charge_player(&self, player: &PlayerContainer, amount: f64) -> Result<(), EconomyError>;

    fn pay_player(&self, player: &PlayerContainer, amount: f64) -> Result<(), EconomyError>;
}

/// Everything is free.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEconomy;

impl EconomyProvider for NoEconomy {
    fn is_enabled(&self) -> bool {
        false
    }

    fn price_for_claim(&self, _world: &str, _blocks: u64) -> f64 {
        0.0
    }

    fn balance(&self, _player: &PlayerContainer) -> Option<f64> {
        None
    }

    fn charge_player(&self, _player: &PlayerContainer, _amount: f64) -> Result<(), EconomyError> {
        Ok(())
    }

    fn pay_player(&self, _player: &PlayerContainer, _amount: f64) -> Result<(), EconomyError> {
        Ok(())
    }
}

/// Fixed price per block with an in-memory ledger of player balances.
#[derive(Debug, Default)]
pub struct FlatRateEconomy {
    price_per_block: f64,
    accounts: Mutex<HashMap<Uuid, f64>>,
}

impl FlatRateEconomy {
    pub fn new(price_per_block: f64) -> Self {
        Self {
            price_per_block,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Start from previously saved balances.
    pub fn with_accounts(price_per_block: f64, accounts: BTreeMap<Uuid, f64>) -> Self {
        Self {
            price_per_block,
            accounts: Mutex::new(accounts.into_iter().collect()),
        }
    }

    pub fn deposit(&self, player: Uuid, amount: f64) {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        *accounts.entry(player).or_insert(0.0) += amount;
    }

    /// Copy of every balance, ordered by player.
    pub fn accounts(&self) -> BTreeMap<Uuid, f64> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts.iter().map(|(uuid, balance)| (*uuid, *balance)).collect()
    }
}

impl EconomyProvider for FlatRateEconomy {
    fn price_for_claim(&self, _world: &str, blocks: u64) -> f64 {
        self.price_per_block * blocks as f64
    }

    fn balance(&self, player: &PlayerContainer) -> Option<f64> {
        let PlayerContainer::Player(uuid) = player else {
            return None;
        };
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        Some(accounts.get(uuid).copied().unwrap_or(0.0))
    }

    fn charge_player(&self, player: &PlayerContainer, amount: f64) -> Result<(), EconomyError> {
        let PlayerContainer::Player(uuid) = player else {
            return Err(EconomyError::NoAccount(player.to_wire()));
        };
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = accounts.entry(*uuid).or_insert(0.0);
        if *balance < amount {
            return Err(EconomyError::InsufficientFunds {
                player: player.to_wire(),
                amount,
                balance: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn pay_player(&self, player: &PlayerContainer, amount: f64) -> Result<(), EconomyError> {
        let PlayerContainer::Player(uuid) = player else {
            return Err(EconomyError::NoAccount(player.to_wire()));
        };
        self.deposit(*uuid, amount);
        Ok(())
    }
}
