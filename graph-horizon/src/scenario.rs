//! Scenario replay: a JSON list of protocol actions applied one transaction at a time.
//!
//! ```json
//! { "steps": [
//!     { "action": "mint", "to": "0x…", "tokens": "10000000000000000000000" },
//!     { "action": "stake", "caller": "0x…", "tokens": "10000000000000000000000" },
//!     { "action": "advance_time", "seconds": 60 },
//!     { "action": "unstake", "caller": "0x…", "tokens": "1", "expect_revert": true }
//! ] }
//! ```
//!
//! Signing actions carry the signer's secret key, so a scenario is self-contained.

use alloy_primitives::{Address, Bytes, B256, U256};
use horizon_common::types::PaymentType;
use horizon_framework::controller::ContractName;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use thegraph_core::types::DeploymentId;

use crate::{
    data_service::{CollectData, DataService as _, SlashData},
    errors::Error,
    payments::{
        collector_domain,
        rav::{sign_digest, signer_address},
        signer_proof_message, Rav, SignatureError, SignedRav,
    },
    protocol::GraphProtocol,
    subgraph_service::{Registration, StartService, StopService},
};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Scenario {
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// The step is expected to fail and leave no trace.
    #[serde(default)]
    pub expect_revert: bool,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    AdvanceTime {
        seconds: u64,
    },
    AdvanceBlocks {
        blocks: u64,
    },
    /// Mint tokens as the governor.
    Mint {
        to: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    /// Approve a protocol contract to pull the caller's tokens. Omitting `tokens` approves
    /// everything.
    Approve {
        caller: Address,
        spender: ContractName,
        #[serde_as(as = "Option<DisplayFromStr>")]
        #[serde(default)]
        tokens: Option<U256>,
    },
    Stake {
        caller: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    Unstake {
        caller: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    SetOperator {
        caller: Address,
        verifier: Address,
        operator: Address,
        allowed: bool,
    },
    Provision {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
        max_verifier_cut: u32,
        thawing_period: u64,
    },
    Thaw {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    Deprovision {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde(default)]
        n: usize,
    },
    Delegate {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    Undelegate {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: U256,
    },
    WithdrawDelegated {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        #[serde(default)]
        n: usize,
    },
    SetDelegationFeeCut {
        caller: Address,
        service_provider: Address,
        verifier: Address,
        payment_type: PaymentType,
        fee_cut: u32,
    },
    EscrowDeposit {
        caller: Address,
        collector: Address,
        receiver: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    EscrowThaw {
        caller: Address,
        collector: Address,
        receiver: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    EscrowWithdraw {
        caller: Address,
        collector: Address,
        receiver: Address,
    },
    /// Authorize the signer of `signer_key` to sign vouchers for the caller.
    AuthorizeSigner {
        caller: Address,
        signer_key: B256,
    },
    CurationMint {
        caller: Address,
        deployment: DeploymentId,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    CurationBurn {
        caller: Address,
        deployment: DeploymentId,
        #[serde_as(as = "DisplayFromStr")]
        signal: U256,
    },
    SetDenied {
        caller: Address,
        deployment: DeploymentId,
        denied: bool,
    },
    Register {
        caller: Address,
        indexer: Address,
        url: String,
        geo_hash: String,
        #[serde(default)]
        payments_destination: Address,
    },
    AcceptProvision {
        caller: Address,
        indexer: Address,
    },
    StartService {
        caller: Address,
        indexer: Address,
        allocation_id: Address,
        deployment: DeploymentId,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    StopService {
        caller: Address,
        indexer: Address,
        allocation_id: Address,
    },
    /// Sign a voucher for `value_aggregate` with `signer_key` and collect it.
    CollectQueryFees {
        caller: Address,
        indexer: Address,
        allocation_id: Address,
        payer: Address,
        signer_key: B256,
        #[serde_as(as = "DisplayFromStr")]
        value_aggregate: u128,
        #[serde_as(as = "DisplayFromStr")]
        #[serde(default)]
        tokens_to_collect: U256,
    },
    CollectIndexingRewards {
        caller: Address,
        indexer: Address,
        allocation_id: Address,
        poi: B256,
    },
    ReleaseStake {
        caller: Address,
        indexer: Address,
        #[serde(default)]
        n: usize,
    },
    ReleaseStakeTokens {
        caller: Address,
        indexer: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
    },
    Slash {
        caller: Address,
        indexer: Address,
        #[serde_as(as = "DisplayFromStr")]
        tokens: U256,
        #[serde_as(as = "DisplayFromStr")]
        tokens_reward: U256,
    },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::AdvanceTime { .. } => "advance_time",
            Action::AdvanceBlocks { .. } => "advance_blocks",
            Action::Mint { .. } => "mint",
            Action::Approve { .. } => "approve",
            Action::Stake { .. } => "stake",
            Action::Unstake { .. } => "unstake",
            Action::SetOperator { .. } => "set_operator",
            Action::Provision { .. } => "provision",
            Action::Thaw { .. } => "thaw",
            Action::Deprovision { .. } => "deprovision",
            Action::Delegate { .. } => "delegate",
            Action::Undelegate { .. } => "undelegate",
            Action::WithdrawDelegated { .. } => "withdraw_delegated",
            Action::SetDelegationFeeCut { .. } => "set_delegation_fee_cut",
            Action::EscrowDeposit { .. } => "escrow_deposit",
            Action::EscrowThaw { .. } => "escrow_thaw",
            Action::EscrowWithdraw { .. } => "escrow_withdraw",
            Action::AuthorizeSigner { .. } => "authorize_signer",
            Action::CurationMint { .. } => "curation_mint",
            Action::CurationBurn { .. } => "curation_burn",
            Action::SetDenied { .. } => "set_denied",
            Action::Register { .. } => "register",
            Action::AcceptProvision { .. } => "accept_provision",
            Action::StartService { .. } => "start_service",
            Action::StopService { .. } => "stop_service",
            Action::CollectQueryFees { .. } => "collect_query_fees",
            Action::CollectIndexingRewards { .. } => "collect_indexing_rewards",
            Action::ReleaseStake { .. } => "release_stake",
            Action::ReleaseStakeTokens { .. } => "release_stake_tokens",
            Action::Slash { .. } => "slash",
        }
    }

    /// Apply the action. Returns the token amount the action reports, if any.
    pub fn apply(self, protocol: &mut GraphProtocol) -> Result<Option<U256>, Error> {
        let GraphProtocol {
            core,
            subgraph_service,
            clock,
        } = protocol;
        let amount = match self {
            Action::AdvanceTime { seconds } => {
                clock.advance_time(seconds);
                None
            }
            Action::AdvanceBlocks { blocks } => {
                clock.advance_blocks(blocks);
                None
            }
            Action::Mint { to, tokens } => {
                core.token
                    .mint(core.controller.governor(), to, tokens)?;
                Some(tokens)
            }
            Action::Approve {
                caller,
                spender,
                tokens,
            } => {
                let spender = core.controller.resolve(spender)?;
                core.token
                    .approve(caller, spender, tokens.unwrap_or(U256::MAX))?;
                None
            }
            Action::Stake { caller, tokens } => {
                core.staking
                    .stake(&clock.context(caller), &mut core.token, tokens)?;
                Some(tokens)
            }
            Action::Unstake { caller, tokens } => {
                core.staking
                    .unstake(&clock.context(caller), &mut core.token, tokens)?;
                Some(tokens)
            }
            Action::SetOperator {
                caller,
                verifier,
                operator,
                allowed,
            } => {
                core.staking
                    .set_operator(&clock.context(caller), verifier, operator, allowed)?;
                None
            }
            Action::Provision {
                caller,
                service_provider,
                verifier,
                tokens,
                max_verifier_cut,
                thawing_period,
            } => {
                core.staking.provision(
                    &clock.context(caller),
                    service_provider,
                    verifier,
                    tokens,
                    max_verifier_cut,
                    thawing_period,
                )?;
                Some(tokens)
            }
            Action::Thaw {
                caller,
                service_provider,
                verifier,
                tokens,
            } => {
                core.staking
                    .thaw(&clock.context(caller), service_provider, verifier, tokens)?;
                Some(tokens)
            }
            Action::Deprovision {
                caller,
                service_provider,
                verifier,
                n,
            } => Some(core.staking.deprovision(
                &clock.context(caller),
                service_provider,
                verifier,
                n,
            )?),
            Action::Delegate {
                caller,
                service_provider,
                verifier,
                tokens,
            } => Some(core.staking.delegate(
                &clock.context(caller),
                &mut core.token,
                service_provider,
                verifier,
                tokens,
                U256::ZERO,
            )?),
            Action::Undelegate {
                caller,
                service_provider,
                verifier,
                shares,
            } => {
                core.staking
                    .undelegate(&clock.context(caller), service_provider, verifier, shares)?;
                Some(shares)
            }
            Action::WithdrawDelegated {
                caller,
                service_provider,
                verifier,
                n,
            } => Some(core.staking.withdraw_delegated(
                &clock.context(caller),
                &mut core.token,
                service_provider,
                verifier,
                n,
            )?),
            Action::SetDelegationFeeCut {
                caller,
                service_provider,
                verifier,
                payment_type,
                fee_cut,
            } => {
                core.staking.set_delegation_fee_cut(
                    &clock.context(caller),
                    service_provider,
                    verifier,
                    payment_type,
                    fee_cut,
                )?;
                None
            }
            Action::EscrowDeposit {
                caller,
                collector,
                receiver,
                tokens,
            } => {
                core.escrow.deposit(
                    &clock.context(caller),
                    &mut core.token,
                    collector,
                    receiver,
                    tokens,
                )?;
                Some(tokens)
            }
            Action::EscrowThaw {
                caller,
                collector,
                receiver,
                tokens,
            } => {
                core.escrow
                    .thaw(&clock.context(caller), collector, receiver, tokens)?;
                Some(tokens)
            }
            Action::EscrowWithdraw {
                caller,
                collector,
                receiver,
            } => Some(core.escrow.withdraw(
                &clock.context(caller),
                &mut core.token,
                collector,
                receiver,
            )?),
            Action::AuthorizeSigner { caller, signer_key } => {
                let ctx = clock.context(caller);
                let signer_key = secret_key(&signer_key)?;
                let collector = core.controller.resolve(ContractName::GraphTallyCollector)?;
                let proof = sign_digest(
                    &signer_key,
                    signer_proof_message(
                        core.collector.chain_id(),
                        collector,
                        ctx.timestamp,
                        caller,
                    ),
                );
                core.collector.authorize_signer(
                    &ctx,
                    signer_address(&signer_key),
                    ctx.timestamp,
                    &proof,
                )?;
                None
            }
            Action::CurationMint {
                caller,
                deployment,
                tokens,
            } => {
                let (signal, _tax) = core.curation.mint(
                    &clock.context(caller),
                    &mut core.token,
                    &mut core.rewards,
                    deployment,
                    tokens,
                    U256::ZERO,
                )?;
                Some(signal)
            }
            Action::CurationBurn {
                caller,
                deployment,
                signal,
            } => Some(core.curation.burn(
                &clock.context(caller),
                &mut core.token,
                &mut core.rewards,
                deployment,
                signal,
                U256::ZERO,
            )?),
            Action::SetDenied {
                caller,
                deployment,
                denied,
            } => {
                core.rewards
                    .set_denied(&clock.context(caller), &core.curation, deployment, denied)?;
                None
            }
            Action::Register {
                caller,
                indexer,
                url,
                geo_hash,
                payments_destination,
            } => {
                subgraph_service.register(
                    core,
                    &clock.context(caller),
                    indexer,
                    Registration {
                        url,
                        geo_hash,
                        payments_destination,
                    },
                )?;
                None
            }
            Action::AcceptProvision { caller, indexer } => {
                subgraph_service.accept_provision(core, &clock.context(caller), indexer)?;
                None
            }
            Action::StartService {
                caller,
                indexer,
                allocation_id,
                deployment,
                tokens,
            } => {
                subgraph_service.start_service(
                    core,
                    &clock.context(caller),
                    indexer,
                    StartService {
                        allocation_id,
                        deployment,
                        tokens,
                    },
                )?;
                Some(tokens)
            }
            Action::StopService {
                caller,
                indexer,
                allocation_id,
            } => {
                subgraph_service.stop_service(
                    core,
                    &clock.context(caller),
                    indexer,
                    StopService { allocation_id },
                )?;
                None
            }
            Action::CollectQueryFees {
                caller,
                indexer,
                allocation_id,
                payer,
                signer_key,
                value_aggregate,
                tokens_to_collect,
            } => {
                let signer_key = secret_key(&signer_key)?;
                let collector = core.controller.resolve(ContractName::GraphTallyCollector)?;
                let domain = collector_domain(core.collector.chain_id(), collector);
                let rav = Rav {
                    collection_id: allocation_id.into_word(),
                    payer,
                    service_provider: indexer,
                    data_service: subgraph_service.address(),
                    timestamp_ns: clock.timestamp().saturating_mul(1_000_000_000),
                    value_aggregate,
                    metadata: Bytes::new(),
                };
                let signed_rav = SignedRav {
                    signature: sign_digest(&signer_key, rav.signing_hash(&domain)),
                    rav,
                };
                Some(subgraph_service.collect(
                    core,
                    &clock.context(caller),
                    indexer,
                    PaymentType::QueryFee,
                    CollectData::QueryFee {
                        signed_rav,
                        tokens_to_collect,
                    },
                )?)
            }
            Action::CollectIndexingRewards {
                caller,
                indexer,
                allocation_id,
                poi,
            } => Some(subgraph_service.collect(
                core,
                &clock.context(caller),
                indexer,
                PaymentType::IndexingRewards,
                CollectData::IndexingRewards { allocation_id, poi },
            )?),
            Action::ReleaseStake { caller, indexer, n } => {
                Some(subgraph_service.release_stake(&clock.context(caller), indexer, n)?)
            }
            Action::ReleaseStakeTokens {
                caller,
                indexer,
                tokens,
            } => Some(subgraph_service.release_stake_tokens(
                &clock.context(caller),
                indexer,
                tokens,
            )?),
            Action::Slash {
                caller,
                indexer,
                tokens,
                tokens_reward,
            } => {
                subgraph_service.slash(
                    core,
                    &clock.context(caller),
                    indexer,
                    SlashData {
                        tokens,
                        tokens_reward,
                    },
                )?;
                Some(tokens)
            }
        };
        Ok(amount)
    }
}

fn secret_key(key: &B256) -> Result<SecretKey, SignatureError> {
    SecretKey::from_slice(key.as_slice()).map_err(|err| SignatureError::Invalid(err.to_string()))
}

/// The result of replaying one step.
#[derive(Debug)]
pub struct StepOutcome {
    pub index: usize,
    pub label: &'static str,
    pub expect_revert: bool,
    pub result: Result<Option<U256>, Error>,
}

impl StepOutcome {
    /// Whether the step succeeded or reverted as expected.
    pub fn as_expected(&self) -> bool {
        self.result.is_err() == self.expect_revert
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub committed: usize,
    pub reverted: usize,
    pub unexpected: usize,
}

/// Replay every step of the scenario, each in its own transaction. A failing step does not stop
/// the replay.
pub fn replay(protocol: &mut GraphProtocol, scenario: Scenario) -> Vec<StepOutcome> {
    scenario
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let label = step.action.label();
            let action = step.action;
            let result = protocol.transact(label, move |protocol| action.apply(protocol));
            StepOutcome {
                index,
                label,
                expect_revert: step.expect_revert,
                result,
            }
        })
        .collect()
}

pub fn summarize(outcomes: &[StepOutcome]) -> Summary {
    outcomes.iter().fold(Summary::default(), |mut summary, outcome| {
        match outcome.result {
            Ok(_) => summary.committed += 1,
            Err(_) => summary.reverted += 1,
        }
        if !outcome.as_expected() {
            summary.unexpected += 1;
        }
        summary
    })
}
