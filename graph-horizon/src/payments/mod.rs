//! Payments: escrowed funds, signed voucher collection, and the distribution of every payment
//! between the protocol, the data service, delegators and the receiver.

use alloy_primitives::{Address, U256};
use horizon_common::{
    ppm::{is_valid_ppm, mul_ppm},
    types::PaymentType,
};
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    metrics::{grt_f64, METRICS},
    token::GraphToken,
};

pub use self::{
    collector::{signer_proof_message, GraphTallyCollector, SignerAuthorization},
    errors::{CollectorError, EscrowError, PaymentsError},
    escrow::{EscrowAccount, PaymentsEscrow},
    rav::{collector_domain, Rav, SignedRav, SignatureError},
};
use crate::{config::PaymentsConfig, staking::HorizonStaking};

mod collector;
mod errors;
mod escrow;
pub mod rav;

/// How a collected payment was distributed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentCollected {
    pub tokens: U256,
    pub tokens_protocol: U256,
    pub tokens_data_service: U256,
    pub tokens_delegation_pool: U256,
    pub tokens_receiver: U256,
}

#[derive(Clone, Debug)]
pub struct GraphPayments {
    controller: Controller,
    protocol_payment_cut: u32,
    protocol_payment_sink: Address,
}

impl GraphPayments {
    pub fn new(controller: Controller, config: &PaymentsConfig) -> Self {
        Self {
            controller,
            protocol_payment_cut: config.protocol_payment_cut,
            protocol_payment_sink: config.protocol_payment_sink,
        }
    }

    pub fn protocol_payment_cut(&self) -> u32 {
        self.protocol_payment_cut
    }

    /// Pull `tokens` from the caller and distribute them.
    ///
    /// The protocol cut and the data service cut are both taken from `tokens`. The receiver's
    /// delegators get their fee cut of the rest, as long as the receiver's delegation pool with
    /// the data service has shares. The receiver's remaining share is staked for the receiver,
    /// or sent to `receiver_destination` when it is not the zero address.
    #[allow(clippy::too_many_arguments)]
    pub fn collect(
        &self,
        ctx: &Context,
        token: &mut GraphToken,
        staking: &mut HorizonStaking,
        payment_type: PaymentType,
        receiver: Address,
        tokens: U256,
        data_service: Address,
        data_service_cut: u32,
        receiver_destination: Address,
    ) -> Result<PaymentCollected, PaymentsError> {
        self.controller.ensure_not_paused()?;
        if !is_valid_ppm(U256::from(data_service_cut)) {
            return Err(PaymentsError::InvalidDataServiceCut(data_service_cut));
        }
        let payments = self.controller.resolve(ContractName::GraphPayments)?;
        let staking_address = self.controller.resolve(ContractName::Staking)?;

        let tokens_protocol = mul_ppm(tokens, U256::from(self.protocol_payment_cut))?;
        let tokens_data_service = mul_ppm(tokens, U256::from(data_service_cut))?;
        let required = tokens_protocol + tokens_data_service;
        if required > tokens {
            return Err(PaymentsError::InsufficientTokens { tokens, required });
        }
        let remaining = tokens - required;

        let pool_has_shares = staking
            .get_delegation_pool(&receiver, &data_service)
            .is_some_and(|pool| !pool.shares.is_zero());
        let tokens_delegation_pool = if pool_has_shares {
            let fee_cut = staking.get_delegation_fee_cut(&receiver, &data_service, payment_type);
            mul_ppm(remaining, U256::from(fee_cut))?
        } else {
            U256::ZERO
        };
        let tokens_receiver = remaining - tokens_delegation_pool;

        token.pull_tokens(ctx.caller, payments, tokens)?;

        if self.protocol_payment_sink.is_zero() {
            token.burn_tokens(payments, tokens_protocol)?;
        } else {
            token.push_tokens(payments, self.protocol_payment_sink, tokens_protocol)?;
        }
        token.push_tokens(payments, data_service, tokens_data_service)?;

        let as_payments = ctx.with_caller(payments);
        if !tokens_delegation_pool.is_zero() {
            token.approve(payments, staking_address, tokens_delegation_pool)?;
            staking.add_to_delegation_pool(
                &as_payments,
                token,
                receiver,
                data_service,
                tokens_delegation_pool,
            )?;
        }
        if !tokens_receiver.is_zero() {
            if receiver_destination.is_zero() {
                token.approve(payments, staking_address, tokens_receiver)?;
                staking.stake_to(&as_payments, token, receiver, tokens_receiver)?;
            } else {
                token.push_tokens(payments, receiver_destination, tokens_receiver)?;
            }
        }

        METRICS
            .tokens_collected
            .with_label_values(&[&payment_type.to_string()])
            .inc_by(grt_f64(tokens));
        tracing::info!(
            %payment_type,
            payer = %ctx.caller,
            %receiver,
            %data_service,
            %tokens,
            %tokens_protocol,
            %tokens_data_service,
            %tokens_delegation_pool,
            %tokens_receiver,
            "payment collected"
        );
        Ok(PaymentCollected {
            tokens,
            tokens_protocol,
            tokens_data_service,
            tokens_delegation_pool,
            tokens_receiver,
        })
    }
}

#[cfg(test)]
mod tests {
    use horizon_common::{
        types::grt,
        utils::testing::{init_test_tracing, test_address},
    };

    use super::*;
    use crate::config::StakingConfig;

    #[test]
    fn protocol_and_data_service_cuts_are_taken_from_the_full_payment() {
        //* Given
        init_test_tracing();
        let governor = test_address(0);
        let (payer, receiver, data_service, destination) =
            (test_address(1), test_address(2), test_address(3), test_address(4));
        let controller = Controller::new(governor).expect("valid governor");
        for name in [ContractName::GraphPayments, ContractName::Staking] {
            controller
                .register(governor, name, name.default_address())
                .expect("register");
        }
        let payments_address = ContractName::GraphPayments.default_address();
        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, governor).expect("add minter");
        token.mint(governor, payer, grt(1_000)).expect("mint");
        token
            .approve(payer, payments_address, U256::MAX)
            .expect("approve");
        let mut staking = HorizonStaking::new(controller.clone(), StakingConfig::default());
        let payments = GraphPayments::new(
            controller,
            &PaymentsConfig {
                protocol_payment_cut: 10_000,
                ..Default::default()
            },
        );
        let supply = token.total_supply();

        //* When
        let collected = payments
            .collect(
                &Context {
                    caller: payer,
                    block_number: 1,
                    timestamp: 1,
                },
                &mut token,
                &mut staking,
                PaymentType::QueryFee,
                receiver,
                grt(1_000),
                data_service,
                100_000,
                destination,
            )
            .expect("collect");

        //* Then
        assert_eq!(
            collected,
            PaymentCollected {
                tokens: grt(1_000),
                tokens_protocol: grt(10),
                tokens_data_service: grt(100),
                tokens_delegation_pool: U256::ZERO,
                tokens_receiver: grt(890),
            }
        );
        assert_eq!(token.balance_of(&destination), grt(890));
        assert_eq!(token.balance_of(&data_service), grt(100));
        assert_eq!(token.total_supply(), supply - grt(10));
        assert_eq!(token.balance_of(&payments_address), U256::ZERO);
    }
}
