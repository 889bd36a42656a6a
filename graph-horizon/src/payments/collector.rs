//! The tally collector: collects payments backed by signed receipt aggregate vouchers.
//!
//! Payers authorize signers to sign vouchers on their behalf. A voucher carries the running
//! total owed for one collection, so the collector only ever pays out the difference with what
//! it already collected for the same (data service, collection, receiver, payer).

use std::collections::HashMap;

use alloy_primitives::{eip191_hash_message, keccak256, Address, B256, U256};
use horizon_common::types::PaymentType;
use horizon_framework::{
    context::Context,
    controller::{ContractName, Controller},
    token::GraphToken,
};
use serde::{Deserialize, Serialize};

use super::{
    rav::{collector_domain, recover_signer},
    CollectorError, GraphPayments, PaymentsEscrow, SignedRav,
};
use crate::{config::PaymentsConfig, staking::HorizonStaking};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerAuthorization {
    pub payer: Address,
    /// Zero when the signer is not thawing.
    pub thaw_end_timestamp: u64,
    pub revoked: bool,
}

/// (data service, collection id, receiver, payer)
type CollectionKey = (Address, B256, Address, Address);

/// The message a signer signs to prove it consents to be authorized by `payer`.
pub fn signer_proof_message(
    chain_id: u64,
    collector: Address,
    deadline: u64,
    payer: Address,
) -> B256 {
    let mut message = Vec::with_capacity(32 + 20 + 20 + 32 + 20);
    message.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    message.extend_from_slice(collector.as_slice());
    message.extend_from_slice(b"authorizeSignerProof");
    message.extend_from_slice(&U256::from(deadline).to_be_bytes::<32>());
    message.extend_from_slice(payer.as_slice());
    eip191_hash_message(keccak256(message))
}

#[derive(Clone, Debug)]
pub struct GraphTallyCollector {
    controller: Controller,
    chain_id: u64,
    revoke_signer_thawing_period: u64,
    authorizations: HashMap<Address, SignerAuthorization>,
    tokens_collected: HashMap<CollectionKey, U256>,
}

impl GraphTallyCollector {
    pub fn new(controller: Controller, config: &PaymentsConfig) -> Self {
        Self {
            controller,
            chain_id: config.chain_id,
            revoke_signer_thawing_period: config.revoke_signer_thawing_period,
            authorizations: HashMap::new(),
            tokens_collected: HashMap::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn get_authorization(&self, signer: &Address) -> Option<&SignerAuthorization> {
        self.authorizations.get(signer)
    }

    pub fn is_authorized(&self, payer: &Address, signer: &Address) -> bool {
        self.authorizations
            .get(signer)
            .is_some_and(|auth| &auth.payer == payer && !auth.revoked)
    }

    pub fn tokens_collected(
        &self,
        data_service: &Address,
        collection_id: &B256,
        receiver: &Address,
        payer: &Address,
    ) -> U256 {
        self.tokens_collected
            .get(&(*data_service, *collection_id, *receiver, *payer))
            .copied()
            .unwrap_or_default()
    }

    /// Authorize `signer` to sign vouchers for the caller. `proof` is the signer's signature of
    /// [`signer_proof_message`], valid until `proof_deadline`.
    pub fn authorize_signer(
        &mut self,
        ctx: &Context,
        signer: Address,
        proof_deadline: u64,
        proof: &[u8],
    ) -> Result<(), CollectorError> {
        self.controller.ensure_not_paused()?;
        let payer = ctx.caller;
        if let Some(auth) = self.authorizations.get(&signer) {
            return Err(CollectorError::SignerAlreadyAuthorized {
                payer: auth.payer,
                signer,
            });
        }
        if proof_deadline < ctx.timestamp {
            return Err(CollectorError::SignerProofExpired {
                deadline: proof_deadline,
                now: ctx.timestamp,
            });
        }
        let collector = self.controller.resolve(ContractName::GraphTallyCollector)?;
        let message = signer_proof_message(self.chain_id, collector, proof_deadline, payer);
        if recover_signer(message, proof)? != signer {
            return Err(CollectorError::InvalidSignerProof(signer));
        }

        self.authorizations.insert(
            signer,
            SignerAuthorization {
                payer,
                ..Default::default()
            },
        );
        tracing::info!(%payer, %signer, "signer authorized");
        Ok(())
    }

    fn authorization_mut(
        &mut self,
        payer: Address,
        signer: Address,
    ) -> Result<&mut SignerAuthorization, CollectorError> {
        self.authorizations
            .get_mut(&signer)
            .filter(|auth| auth.payer == payer && !auth.revoked)
            .ok_or(CollectorError::SignerNotAuthorized { payer, signer })
    }

    /// Start the revocation delay of one of the caller's signers.
    pub fn thaw_signer(&mut self, ctx: &Context, signer: Address) -> Result<(), CollectorError> {
        self.controller.ensure_not_paused()?;
        let thawing_period = self.revoke_signer_thawing_period;
        let auth = self.authorization_mut(ctx.caller, signer)?;
        auth.thaw_end_timestamp = ctx.timestamp + thawing_period;

        tracing::info!(
            payer = %ctx.caller,
            %signer,
            thaw_end_timestamp = auth.thaw_end_timestamp,
            "signer thawing"
        );
        Ok(())
    }

    pub fn cancel_thaw_signer(
        &mut self,
        ctx: &Context,
        signer: Address,
    ) -> Result<(), CollectorError> {
        self.controller.ensure_not_paused()?;
        let auth = self.authorization_mut(ctx.caller, signer)?;
        if auth.thaw_end_timestamp == 0 {
            return Err(CollectorError::SignerNotThawing(signer));
        }
        auth.thaw_end_timestamp = 0;

        tracing::info!(payer = %ctx.caller, %signer, "signer thaw cancelled");
        Ok(())
    }

    /// Revoke a thawed signer. Vouchers it signed can no longer be collected.
    pub fn revoke_authorized_signer(
        &mut self,
        ctx: &Context,
        signer: Address,
    ) -> Result<(), CollectorError> {
        self.controller.ensure_not_paused()?;
        let auth = self.authorization_mut(ctx.caller, signer)?;
        if auth.thaw_end_timestamp == 0 {
            return Err(CollectorError::SignerNotThawing(signer));
        }
        if ctx.timestamp < auth.thaw_end_timestamp {
            return Err(CollectorError::SignerStillThawing {
                signer,
                now: ctx.timestamp,
                thaw_end_timestamp: auth.thaw_end_timestamp,
            });
        }
        auth.revoked = true;

        tracing::info!(payer = %ctx.caller, %signer, "signer revoked");
        Ok(())
    }

    /// Collect the uncollected value of a signed voucher. The caller is the voucher's data
    /// service. `tokens_to_collect` caps the collection, zero collecting everything owed.
    ///
    /// Returns the tokens collected.
    #[allow(clippy::too_many_arguments)]
    pub fn collect(
        &mut self,
        ctx: &Context,
        token: &mut GraphToken,
        escrow: &mut PaymentsEscrow,
        payments: &GraphPayments,
        staking: &mut HorizonStaking,
        payment_type: PaymentType,
        signed_rav: &SignedRav,
        tokens_to_collect: U256,
        data_service_cut: u32,
        receiver_destination: Address,
    ) -> Result<U256, CollectorError> {
        self.controller.ensure_not_paused()?;
        let rav = &signed_rav.rav;
        let data_service = ctx.caller;
        if rav.data_service != data_service {
            return Err(CollectorError::CallerNotDataService {
                caller: data_service,
                data_service: rav.data_service,
            });
        }
        let receiver = rav.service_provider;
        let provisioned = staking
            .get_provision(&receiver, &data_service)
            .is_some_and(|provision| !provision.tokens.is_zero());
        if !provisioned {
            return Err(CollectorError::UnauthorizedDataService {
                service_provider: receiver,
                data_service,
            });
        }

        let collector = self.controller.resolve(ContractName::GraphTallyCollector)?;
        let signer = signed_rav.recover_signer(&collector_domain(self.chain_id, collector))?;
        if !self.is_authorized(&rav.payer, &signer) {
            return Err(CollectorError::InvalidRavSigner(signer));
        }

        let key = (data_service, rav.collection_id, receiver, rav.payer);
        let tokens_rav = U256::from(rav.value_aggregate);
        let tokens_collected = self.tokens_collected.get(&key).copied().unwrap_or_default();
        if tokens_rav <= tokens_collected {
            return Err(CollectorError::InconsistentRavTokens {
                tokens_rav,
                tokens_collected,
            });
        }
        let tokens_uncollected = tokens_rav - tokens_collected;
        let tokens = if tokens_to_collect.is_zero() {
            tokens_uncollected
        } else if tokens_to_collect > tokens_uncollected {
            return Err(CollectorError::InvalidTokensToCollect {
                tokens_to_collect,
                tokens_uncollected,
            });
        } else {
            tokens_to_collect
        };

        self.tokens_collected.insert(key, tokens_collected + tokens);
        escrow.collect(
            &ctx.with_caller(collector),
            token,
            payments,
            staking,
            payment_type,
            rav.payer,
            receiver,
            tokens,
            data_service,
            data_service_cut,
            receiver_destination,
        )?;

        tracing::info!(
            payer = %rav.payer,
            %receiver,
            %data_service,
            collection_id = %rav.collection_id,
            %tokens,
            "voucher collected"
        );
        Ok(tokens)
    }
}
