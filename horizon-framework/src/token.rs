//! The Graph Token (GRT) ledger.
//!
//! A fungible token with the usual transfer/approve/transfer-from/burn semantics. Minting is
//! gated to the minter role, which the governor grants (the rewards manager is the only minter
//! in a standard deployment).

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, U256};

use crate::{controller::Controller, errors::TokenError};

#[derive(Clone, Debug)]
pub struct GraphToken {
    controller: Controller,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    minters: HashSet<Address>,
}

impl GraphToken {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            total_supply: U256::ZERO,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            minters: HashSet::new(),
        }
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_minter(&self, account: &Address) -> bool {
        self.minters.contains(account)
    }

    pub fn add_minter(&mut self, caller: Address, minter: Address) -> Result<(), TokenError> {
        self.controller.ensure_governor(caller)?;
        if minter.is_zero() {
            return Err(TokenError::InvalidZeroAddress("minter"));
        }
        self.minters.insert(minter);
        tracing::info!(%minter, "minter added");
        Ok(())
    }

    pub fn remove_minter(&mut self, caller: Address, minter: Address) -> Result<(), TokenError> {
        self.controller.ensure_governor(caller)?;
        self.minters.remove(&minter);
        tracing::info!(%minter, "minter removed");
        Ok(())
    }

    pub fn mint(&mut self, caller: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if !self.is_minter(&caller) {
            return Err(TokenError::NotMinter(caller));
        }
        if to.is_zero() {
            return Err(TokenError::InvalidZeroAddress("mint recipient"));
        }
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow)?;
        self.total_supply = total_supply;
        *self.balances.entry(to).or_default() += amount;
        tracing::trace!(%to, %amount, "mint");
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        if spender.is_zero() {
            return Err(TokenError::InvalidZeroAddress("spender"));
        }
        self.allowances.insert((owner, spender), amount);
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::InvalidZeroAddress("transfer recipient"));
        }
        self.debit(from, amount)?;
        *self.balances.entry(to).or_default() += amount;
        tracing::trace!(%from, %to, %amount, "transfer");
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        self.spend_allowance(from, spender, amount)?;
        self.transfer(from, to, amount)
    }

    pub fn burn(&mut self, from: Address, amount: U256) -> Result<(), TokenError> {
        self.debit(from, amount)?;
        self.total_supply -= amount;
        tracing::trace!(%from, %amount, "burn");
        Ok(())
    }

    pub fn burn_from(
        &mut self,
        spender: Address,
        from: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        self.spend_allowance(from, spender, amount)?;
        self.burn(from, amount)
    }

    /// Pull `amount` tokens from `from` into the `to` contract, using the allowance `from` gave
    /// to `to`. No-op for zero amounts.
    pub fn pull_tokens(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.transfer_from(to, from, to, amount)
    }

    /// Push `amount` tokens out of the `from` contract. No-op for zero amounts.
    pub fn push_tokens(
        &mut self,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.transfer(from, to, amount)
    }

    /// Burn `amount` tokens held by the `from` contract. No-op for zero amounts.
    pub fn burn_tokens(&mut self, from: Address, amount: U256) -> Result<(), TokenError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.burn(from, amount)
    }

    fn debit(&mut self, account: Address, amount: U256) -> Result<(), TokenError> {
        let balance = self.balance_of(&account);
        if balance < amount {
            return Err(TokenError::InsufficientBalance {
                account,
                balance,
                needed: amount,
            });
        }
        self.balances.insert(account, balance - amount);
        Ok(())
    }

    fn spend_allowance(
        &mut self,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        let allowance = self.allowance(&owner, &spender);
        if allowance == U256::MAX {
            return Ok(());
        }
        if allowance < amount {
            return Err(TokenError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                needed: amount,
            });
        }
        self.allowances.insert((owner, spender), allowance - amount);
        Ok(())
    }
}
