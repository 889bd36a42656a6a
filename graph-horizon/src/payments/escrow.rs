//! Payer funds held in escrow for a collector and receiver.
//!
//! Payers deposit freely. Withdrawals go through a thawing period so a receiver always has time
//! to collect what it is owed before the funds leave.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use horizon_common::types::PaymentType;
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    token::GraphToken,
};
use serde::{Deserialize, Serialize};

use super::{EscrowError, GraphPayments, PaymentCollected};
use crate::staking::HorizonStaking;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub balance: U256,
    pub tokens_thawing: U256,
    /// Zero when nothing is thawing.
    pub thaw_end_timestamp: u64,
}

/// (payer, collector, receiver)
type AccountKey = (Address, Address, Address);

#[derive(Clone, Debug)]
pub struct PaymentsEscrow {
    controller: Controller,
    withdraw_escrow_thawing_period: u64,
    accounts: HashMap<AccountKey, EscrowAccount>,
}

impl PaymentsEscrow {
    pub fn new(controller: Controller, withdraw_escrow_thawing_period: u64) -> Self {
        Self {
            controller,
            withdraw_escrow_thawing_period,
            accounts: HashMap::new(),
        }
    }

    pub fn get_account(
        &self,
        payer: &Address,
        collector: &Address,
        receiver: &Address,
    ) -> EscrowAccount {
        self.accounts
            .get(&(*payer, *collector, *receiver))
            .cloned()
            .unwrap_or_default()
    }

    /// Funds available for collection, i.e. not thawing.
    pub fn get_balance(&self, payer: &Address, collector: &Address, receiver: &Address) -> U256 {
        let account = self.get_account(payer, collector, receiver);
        account.balance.saturating_sub(account.tokens_thawing)
    }

    pub fn deposit(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        collector: Address,
        receiver: Address,
        tokens: U256,
    ) -> Result<(), EscrowError> {
        self.deposit_to(ctx, token, ctx.caller, collector, receiver, tokens)
    }

    /// Deposit the caller's tokens into the `payer` account.
    pub fn deposit_to(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        payer: Address,
        collector: Address,
        receiver: Address,
        tokens: U256,
    ) -> Result<(), EscrowError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(EscrowError::InvalidZeroTokens);
        }
        let escrow = self.controller.resolve(ContractName::PaymentsEscrow)?;

        self.accounts
            .entry((payer, collector, receiver))
            .or_default()
            .balance += tokens;
        token.pull_tokens(ctx.caller, escrow, tokens)?;

        tracing::info!(%payer, %collector, %receiver, %tokens, "escrow deposit");
        Ok(())
    }

    /// Start thawing `tokens` of the caller's account for withdrawal.
    pub fn thaw(
        &mut self,
        ctx: &Context,
        collector: Address,
        receiver: Address,
        tokens: U256,
    ) -> Result<(), EscrowError> {
        self.controller.ensure_not_paused()?;
        if tokens.is_zero() {
            return Err(EscrowError::InvalidZeroTokens);
        }
        let thawing_period = self.withdraw_escrow_thawing_period;
        let payer = ctx.caller;
        let account = self.accounts.entry((payer, collector, receiver)).or_default();
        if !account.tokens_thawing.is_zero() {
            return Err(EscrowError::ThawInProgress {
                tokens_thawing: account.tokens_thawing,
                thaw_end_timestamp: account.thaw_end_timestamp,
            });
        }
        if account.balance < tokens {
            return Err(EscrowError::InsufficientBalance {
                balance: account.balance,
                minimum: tokens,
            });
        }
        account.tokens_thawing = tokens;
        account.thaw_end_timestamp = ctx.timestamp + thawing_period;

        tracing::info!(
            %payer,
            %collector,
            %receiver,
            %tokens,
            thaw_end_timestamp = account.thaw_end_timestamp,
            "escrow thawing"
        );
        Ok(())
    }

    pub fn cancel_thaw(
        &mut self,
        ctx: &Context,
        collector: Address,
        receiver: Address,
    ) -> Result<(), EscrowError> {
        self.controller.ensure_not_paused()?;
        let payer = ctx.caller;
        let account = self
            .accounts
            .get_mut(&(payer, collector, receiver))
            .filter(|account| !account.tokens_thawing.is_zero())
            .ok_or(EscrowError::NotThawing)?;
        account.tokens_thawing = U256::ZERO;
        account.thaw_end_timestamp = 0;

        tracing::info!(%payer, %collector, %receiver, "escrow thaw cancelled");
        Ok(())
    }

    /// Withdraw the thawed tokens of the caller's account once the thawing period is over.
    /// Returns the tokens withdrawn, which a collection since the thaw may have reduced.
    pub fn withdraw(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        collector: Address,
        receiver: Address,
    ) -> Result<U256, EscrowError> {
        self.controller.ensure_not_paused()?;
        let escrow = self.controller.resolve(ContractName::PaymentsEscrow)?;
        let payer = ctx.caller;
        let account = self
            .accounts
            .get_mut(&(payer, collector, receiver))
            .filter(|account| account.thaw_end_timestamp != 0)
            .ok_or(EscrowError::NotThawing)?;
        if ctx.timestamp <= account.thaw_end_timestamp {
            return Err(EscrowError::StillThawing {
                now: ctx.timestamp,
                thaw_end_timestamp: account.thaw_end_timestamp,
            });
        }

        let tokens = account.tokens_thawing.min(account.balance);
        account.balance -= tokens;
        account.tokens_thawing = U256::ZERO;
        account.thaw_end_timestamp = 0;
        token.push_tokens(escrow, payer, tokens)?;

        tracing::info!(%payer, %collector, %receiver, %tokens, "escrow withdrawn");
        Ok(tokens)
    }

    /// Draw `tokens` from the `payer` account of the calling collector and pay them through
    /// [`GraphPayments`].
    #[allow(clippy::too_many_arguments)]
    pub fn collect(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        payments: &GraphPayments,
        staking: &mut HorizonStaking,
        payment_type: PaymentType,
        payer: Address,
        receiver: Address,
        tokens: U256,
        data_service: Address,
        data_service_cut: u32,
        receiver_destination: Address,
    ) -> Result<PaymentCollected, EscrowError> {
        self.controller.ensure_not_paused()?;
        let escrow = self.controller.resolve(ContractName::PaymentsEscrow)?;
        let payments_address = self.controller.resolve(ContractName::GraphPayments)?;
        let collector = ctx.caller;

        let account = self.accounts.entry((payer, collector, receiver)).or_default();
        if account.balance < tokens {
            return Err(EscrowError::InsufficientBalance {
                balance: account.balance,
                minimum: tokens,
            });
        }
        account.balance -= tokens;
        // Funds collected while thawing come out of the thawing tokens first.
        if account.tokens_thawing > account.balance {
            account.tokens_thawing = account.balance;
            if account.tokens_thawing.is_zero() {
                account.thaw_end_timestamp = 0;
            }
        }

        let before = token.balance_of(&escrow);
        token.approve(escrow, payments_address, tokens)?;
        let collected = payments.collect(
            &ctx.with_caller(escrow),
            token,
            staking,
            payment_type,
            receiver,
            tokens,
            data_service,
            data_service_cut,
            receiver_destination,
        )?;
        let after = token.balance_of(&escrow);
        if before.checked_sub(after) != Some(tokens) {
            return Err(EscrowError::InconsistentCollection {
                before,
                after,
                tokens,
            });
        }

        tracing::info!(%payer, %collector, %receiver, %tokens, "escrow collected");
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use horizon_common::{
        types::grt,
        utils::testing::{init_test_tracing, test_address},
    };
    use horizon_framework::context::Clock;

    use super::*;

    struct Setup {
        clock: Clock,
        token: GraphToken,
        escrow: PaymentsEscrow,
        payer: Address,
        collector: Address,
        receiver: Address,
    }

    fn setup() -> Setup {
        init_test_tracing();
        let governor = test_address(0);
        let payer = test_address(1);
        let controller = Controller::new(governor).expect("valid governor");
        let escrow_address = ContractName::PaymentsEscrow.default_address();
        controller
            .register(governor, ContractName::PaymentsEscrow, escrow_address)
            .expect("register escrow");
        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, governor).expect("add minter");
        token.mint(governor, payer, grt(1_000)).expect("mint");
        token
            .approve(payer, escrow_address, U256::MAX)
            .expect("approve");

        Setup {
            clock: Clock::default(),
            token,
            escrow: PaymentsEscrow::new(controller, 3_600),
            payer,
            collector: test_address(2),
            receiver: test_address(3),
        }
    }

    #[test]
    fn withdraw_after_the_thawing_period() {
        //* Given
        let mut setup = setup();
        let (payer, collector, receiver) = (setup.payer, setup.collector, setup.receiver);
        let ctx = setup.clock.context(payer);
        setup
            .escrow
            .deposit(&ctx, &mut setup.token, collector, receiver, grt(1_000))
            .expect("deposit");
        setup
            .escrow
            .thaw(&ctx, collector, receiver, grt(400))
            .expect("thaw");

        //* When
        setup.clock.advance_time(3_600);
        let early = setup.escrow.withdraw(
            &setup.clock.context(payer),
            &mut setup.token,
            collector,
            receiver,
        );
        setup.clock.advance_time(1);
        let withdrawn = setup.escrow.withdraw(
            &setup.clock.context(payer),
            &mut setup.token,
            collector,
            receiver,
        );

        //* Then
        assert_matches!(early, Err(EscrowError::StillThawing { .. }));
        assert_eq!(withdrawn, Ok(grt(400)));
        assert_eq!(setup.token.balance_of(&payer), grt(400));
        assert_eq!(
            setup.escrow.get_account(&payer, &collector, &receiver),
            EscrowAccount {
                balance: grt(600),
                ..Default::default()
            }
        );
    }

    #[test]
    fn only_one_thaw_at_a_time() {
        //* Given
        let mut setup = setup();
        let (payer, collector, receiver) = (setup.payer, setup.collector, setup.receiver);
        let ctx = setup.clock.context(payer);
        setup
            .escrow
            .deposit(&ctx, &mut setup.token, collector, receiver, grt(1_000))
            .expect("deposit");
        setup
            .escrow
            .thaw(&ctx, collector, receiver, grt(100))
            .expect("thaw");

        //* When
        let second = setup.escrow.thaw(&ctx, collector, receiver, grt(100));
        setup
            .escrow
            .cancel_thaw(&ctx, collector, receiver)
            .expect("cancel");
        let after_cancel = setup.escrow.thaw(&ctx, collector, receiver, grt(1_000));

        //* Then
        assert_matches!(second, Err(EscrowError::ThawInProgress { .. }));
        assert_eq!(after_cancel, Ok(()));
        assert_eq!(
            setup.escrow.get_balance(&payer, &collector, &receiver),
            U256::ZERO
        );
        assert_matches!(
            setup.escrow.thaw(&ctx, collector, receiver, grt(1)),
            Err(EscrowError::ThawInProgress { .. })
        );
    }

    #[test]
    fn thawing_more_than_the_balance_fails() {
        let mut setup = setup();
        let (payer, collector, receiver) = (setup.payer, setup.collector, setup.receiver);
        let ctx = setup.clock.context(payer);
        setup
            .escrow
            .deposit(&ctx, &mut setup.token, collector, receiver, grt(10))
            .expect("deposit");

        assert_matches!(
            setup.escrow.thaw(&ctx, collector, receiver, grt(11)),
            Err(EscrowError::InsufficientBalance { .. })
        );
        assert_matches!(
            setup.escrow.withdraw(&ctx, &mut setup.token, collector, receiver),
            Err(EscrowError::NotThawing)
        );
    }
}
