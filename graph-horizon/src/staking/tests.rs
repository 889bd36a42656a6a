use alloy_primitives::{Address, U256};
use assert_matches::assert_matches;
use horizon_common::{
    types::{grt, PaymentType},
    utils::testing::{init_test_tracing, test_address},
};
use horizon_framework::{
    context::Clock,
    controller::{ContractName, Controller},
    token::GraphToken,
};

use super::*;
use crate::config::StakingConfig;

const THAWING_PERIOD: u64 = 60;

struct Setup {
    clock: Clock,
    token: GraphToken,
    staking: HorizonStaking,
    provider: Address,
    verifier: Address,
}

impl Setup {
    fn new() -> Self {
        Self::with_config(StakingConfig {
            max_thawing_period: 3_600,
            ..Default::default()
        })
    }

    fn with_config(config: StakingConfig) -> Self {
        init_test_tracing();
        let governor = test_address(0);
        let controller = Controller::new(governor).expect("valid governor");
        controller
            .register(
                governor,
                ContractName::Staking,
                ContractName::Staking.default_address(),
            )
            .expect("register staking");
        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, governor).expect("add minter");

        let mut setup = Self {
            clock: Clock::default(),
            token,
            staking: HorizonStaking::new(controller, config),
            provider: test_address(1),
            verifier: test_address(2),
        };
        setup.fund(setup.provider, grt(10_000));
        setup
    }

    fn fund(&mut self, account: Address, amount: U256) {
        let governor = test_address(0);
        self.token.mint(governor, account, amount).expect("mint");
        self.token
            .approve(account, ContractName::Staking.default_address(), U256::MAX)
            .expect("approve");
    }

    fn ctx(&self, caller: Address) -> Context {
        self.clock.context(caller)
    }

    /// Stake and provision `tokens` to the verifier, with a full verifier cut.
    fn provisioned(tokens: U256) -> Self {
        let mut setup = Self::new();
        let ctx = setup.ctx(setup.provider);
        setup
            .staking
            .stake(&ctx, &mut setup.token, tokens)
            .expect("stake");
        setup
            .staking
            .provision(
                &ctx,
                setup.provider,
                setup.verifier,
                tokens,
                1_000_000,
                THAWING_PERIOD,
            )
            .expect("provision");
        setup
    }
}

#[test]
fn only_idle_stake_can_be_unstaked() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let ctx = setup.ctx(setup.provider);
    setup
        .staking
        .stake(&ctx, &mut setup.token, grt(200))
        .expect("stake");

    //* When
    let too_much = setup.staking.unstake(&ctx, &mut setup.token, grt(201));
    let idle = setup.staking.unstake(&ctx, &mut setup.token, grt(200));

    //* Then
    assert_matches!(too_much, Err(StakingError::InsufficientIdleStake { .. }));
    assert_eq!(idle, Ok(()));
    assert_eq!(
        setup.staking.get_service_provider(&setup.provider),
        ServiceProvider {
            tokens_staked: grt(1_000),
            tokens_provisioned: grt(1_000),
        }
    );
    assert_eq!(setup.token.balance_of(&setup.provider), grt(9_000));
}

#[test]
fn provision_requires_authorization_and_idle_stake() {
    //* Given
    let mut setup = Setup::new();
    let (provider, verifier, operator) = (setup.provider, setup.verifier, test_address(3));
    let ctx = setup.ctx(provider);
    setup
        .staking
        .stake(&ctx, &mut setup.token, grt(100))
        .expect("stake");

    //* When
    let unauthorized = setup.staking.provision(
        &setup.ctx(operator),
        provider,
        verifier,
        grt(50),
        0,
        THAWING_PERIOD,
    );
    setup
        .staking
        .set_operator(&ctx, verifier, operator, true)
        .expect("set operator");
    let too_much = setup.staking.provision(
        &setup.ctx(operator),
        provider,
        verifier,
        grt(101),
        0,
        THAWING_PERIOD,
    );
    let by_operator = setup.staking.provision(
        &setup.ctx(operator),
        provider,
        verifier,
        grt(100),
        0,
        THAWING_PERIOD,
    );

    //* Then
    assert_matches!(unauthorized, Err(StakingError::NotAuthorized { caller, .. }) => {
        assert_eq!(caller, operator);
    });
    assert_matches!(too_much, Err(StakingError::InsufficientIdleStake { .. }));
    assert_eq!(by_operator, Ok(()));
    assert_eq!(setup.staking.get_idle_stake(&provider), U256::ZERO);
}

#[test]
fn provision_rejects_invalid_parameters() {
    let mut setup = Setup::new();
    let ctx = setup.ctx(setup.provider);
    setup
        .staking
        .stake(&ctx, &mut setup.token, grt(100))
        .expect("stake");
    let (provider, verifier) = (setup.provider, setup.verifier);

    assert_matches!(
        setup
            .staking
            .provision(&ctx, provider, verifier, grt(1), 1_000_001, 0),
        Err(StakingError::InvalidMaxVerifierCut(1_000_001))
    );
    assert_matches!(
        setup
            .staking
            .provision(&ctx, provider, verifier, grt(1), 0, 3_601),
        Err(StakingError::InvalidThawingPeriod { .. })
    );
    assert_matches!(
        setup
            .staking
            .provision(&ctx, provider, verifier, U256::ZERO, 0, 0),
        Err(StakingError::InvalidZeroTokens)
    );
    setup
        .staking
        .provision(&ctx, provider, verifier, grt(1), 0, 0)
        .expect("provision");
    assert_matches!(
        setup
            .staking
            .provision(&ctx, provider, verifier, grt(1), 0, 0),
        Err(StakingError::ProvisionAlreadyExists { .. })
    );
}

#[test]
fn thawed_tokens_return_to_idle_stake_after_the_thawing_period() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let ctx = setup.ctx(provider);
    setup
        .staking
        .thaw(&ctx, provider, verifier, grt(300))
        .expect("thaw");
    setup.clock.advance_time(30);
    setup
        .staking
        .thaw(&setup.ctx(provider), provider, verifier, grt(200))
        .expect("thaw");

    //* When
    setup.clock.advance_time(31);
    let first = setup
        .staking
        .deprovision(&setup.ctx(provider), provider, verifier, 0)
        .expect("deprovision");
    setup.clock.advance_time(30);
    let second = setup
        .staking
        .deprovision(&setup.ctx(provider), provider, verifier, 0)
        .expect("deprovision");

    //* Then
    assert_eq!(first, grt(300));
    assert_eq!(second, grt(200));
    let provision = setup
        .staking
        .get_provision(&provider, &verifier)
        .expect("provision");
    assert_eq!(provision.tokens, grt(500));
    assert_eq!(provision.tokens_thawing, U256::ZERO);
    assert_eq!(provision.shares_thawing, U256::ZERO);
    assert_eq!(setup.staking.get_idle_stake(&provider), grt(500));
    assert!(setup
        .staking
        .get_provision_thaw_requests(&provider, &verifier)
        .is_empty());
}

#[test]
fn thawing_more_than_available_fails() {
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let ctx = setup.ctx(provider);

    setup
        .staking
        .thaw(&ctx, provider, verifier, grt(60))
        .expect("thaw");

    assert_matches!(
        setup.staking.thaw(&ctx, provider, verifier, grt(41)),
        Err(StakingError::InsufficientTokens { .. })
    );
}

#[test]
fn thaw_requests_are_capped_per_list() {
    //* Given
    let mut setup = Setup::provisioned(grt(2_000));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let ctx = setup.ctx(provider);
    for _ in 0..MAX_THAW_REQUESTS {
        setup
            .staking
            .thaw(&ctx, provider, verifier, grt(1))
            .expect("thaw");
    }

    //* When
    let result = setup.staking.thaw(&ctx, provider, verifier, grt(1));

    //* Then
    assert_matches!(
        result,
        Err(StakingError::TooManyThawRequests(MAX_THAW_REQUESTS))
    );
    let provision = setup
        .staking
        .get_provision(&provider, &verifier)
        .expect("provision");
    assert_eq!(provision.tokens_thawing, grt(1_000));
    assert_eq!(
        setup
            .staking
            .get_provision_thaw_requests(&provider, &verifier)
            .len(),
        MAX_THAW_REQUESTS
    );
}

#[test]
fn deprovision_with_nothing_thawing_fails() {
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);

    assert_matches!(
        setup
            .staking
            .deprovision(&setup.ctx(provider), provider, verifier, 0),
        Err(StakingError::NothingThawing)
    );
}

#[test]
fn reprovision_moves_thawed_tokens_between_verifiers() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier, other) = (setup.provider, setup.verifier, test_address(5));
    let ctx = setup.ctx(provider);
    setup
        .staking
        .stake(&ctx, &mut setup.token, grt(10))
        .expect("stake");
    setup
        .staking
        .provision(&ctx, provider, other, grt(10), 0, 0)
        .expect("provision");
    setup
        .staking
        .thaw(&ctx, provider, verifier, grt(400))
        .expect("thaw");
    setup.clock.advance_time(THAWING_PERIOD);

    //* When
    let moved = setup
        .staking
        .reprovision(&setup.ctx(provider), provider, verifier, other, 0)
        .expect("reprovision");

    //* Then
    assert_eq!(moved, grt(400));
    assert_eq!(
        setup.staking.get_provision(&provider, &verifier).map(|p| p.tokens),
        Some(grt(600))
    );
    assert_eq!(
        setup.staking.get_provision(&provider, &other).map(|p| p.tokens),
        Some(grt(410))
    );
    assert_eq!(setup.staking.get_idle_stake(&provider), U256::ZERO);
}

#[test]
fn staged_provision_parameters_apply_once_accepted_by_the_verifier() {
    //* Given
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);
    setup
        .staking
        .set_provision_parameters(&setup.ctx(provider), provider, verifier, 500_000, 120)
        .expect("stage");
    let staged = setup
        .staking
        .get_provision(&provider, &verifier)
        .cloned()
        .expect("provision");

    //* When
    let accepted = setup
        .staking
        .accept_provision_parameters(&setup.ctx(verifier), provider)
        .expect("accept");

    //* Then
    assert_eq!(staged.max_verifier_cut, 1_000_000);
    assert_eq!(staged.thawing_period, THAWING_PERIOD);
    assert_eq!(staged.last_parameters_staged_at, setup.clock.timestamp());
    assert_eq!(accepted.max_verifier_cut, 500_000);
    assert_eq!(accepted.thawing_period, 120);
}

#[test]
fn delegation_shares_follow_the_pool_price() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let (alice, bob) = (test_address(10), test_address(11));
    setup.fund(alice, grt(1_000));
    setup.fund(bob, grt(1_000));

    //* When
    let alice_shares = setup
        .staking
        .delegate(&setup.ctx(alice), &mut setup.token, provider, verifier, grt(100), U256::ZERO)
        .expect("delegate");
    // Rewards double the share price
    setup
        .staking
        .add_to_delegation_pool(&setup.ctx(alice), &mut setup.token, provider, verifier, grt(100))
        .expect("add to pool");
    let bob_slippage = setup.staking.delegate(
        &setup.ctx(bob),
        &mut setup.token,
        provider,
        verifier,
        grt(100),
        grt(51),
    );
    let bob_shares = setup
        .staking
        .delegate(&setup.ctx(bob), &mut setup.token, provider, verifier, grt(100), grt(50))
        .expect("delegate");

    //* Then
    assert_eq!(alice_shares, grt(100));
    assert_eq!(bob_shares, grt(50));
    assert_matches!(bob_slippage, Err(StakingError::SlippageProtection { .. }));
    let pool = setup
        .staking
        .get_delegation_pool(&provider, &verifier)
        .expect("pool");
    assert_eq!(pool.tokens, grt(300));
    assert_eq!(pool.shares, grt(150));
    assert_eq!(pool.shares_to_tokens(alice_shares), grt(200));
}

#[test]
fn delegation_below_minimum_is_rejected() {
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier, alice) = (setup.provider, setup.verifier, test_address(10));
    setup.fund(alice, grt(1));

    let result = setup.staking.delegate(
        &setup.ctx(alice),
        &mut setup.token,
        provider,
        verifier,
        grt(1) - U256::from(1),
        U256::ZERO,
    );

    assert_matches!(result, Err(StakingError::InsufficientDelegationTokens { .. }));
}

#[test]
fn undelegated_tokens_are_withdrawable_after_the_provision_thawing_period() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier, alice) = (setup.provider, setup.verifier, test_address(10));
    setup.fund(alice, grt(100));
    let shares = setup
        .staking
        .delegate(&setup.ctx(alice), &mut setup.token, provider, verifier, grt(100), U256::ZERO)
        .expect("delegate");
    setup
        .staking
        .undelegate(&setup.ctx(alice), provider, verifier, shares)
        .expect("undelegate");

    //* When
    setup.clock.advance_time(THAWING_PERIOD - 1);
    let early = setup
        .staking
        .withdraw_delegated(&setup.ctx(alice), &mut setup.token, provider, verifier, 0)
        .expect("withdraw");
    setup.clock.advance_time(1);
    let matured = setup
        .staking
        .withdraw_delegated(&setup.ctx(alice), &mut setup.token, provider, verifier, 0)
        .expect("withdraw");

    //* Then
    assert_eq!(early, U256::ZERO);
    assert_eq!(matured, grt(100));
    assert_eq!(setup.token.balance_of(&alice), grt(100));
    assert_eq!(setup.staking.get_delegation(&provider, &verifier, &alice), U256::ZERO);
    let pool = setup
        .staking
        .get_delegation_pool(&provider, &verifier)
        .expect("pool");
    assert_eq!(pool.tokens, U256::ZERO);
}

#[test]
fn tokens_available_caps_delegation_by_ratio() {
    //* Given
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier, alice) = (setup.provider, setup.verifier, test_address(10));
    setup.fund(alice, grt(1_000));
    setup
        .staking
        .delegate(&setup.ctx(alice), &mut setup.token, provider, verifier, grt(1_000), U256::ZERO)
        .expect("delegate");

    //* Then
    assert_eq!(setup.staking.get_tokens_available(&provider, &verifier, 0), grt(100));
    assert_eq!(setup.staking.get_tokens_available(&provider, &verifier, 4), grt(500));
    assert_eq!(setup.staking.get_tokens_available(&provider, &verifier, 16), grt(1_100));
    assert_eq!(setup.staking.get_provider_tokens_available(&provider), grt(100));
}

#[test]
fn delegation_fee_cut_must_be_valid_ppm() {
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let ctx = setup.ctx(provider);

    setup
        .staking
        .set_delegation_fee_cut(&ctx, provider, verifier, PaymentType::QueryFee, 100_000)
        .expect("set cut");

    assert_eq!(
        setup
            .staking
            .get_delegation_fee_cut(&provider, &verifier, PaymentType::QueryFee),
        100_000
    );
    assert_eq!(
        setup
            .staking
            .get_delegation_fee_cut(&provider, &verifier, PaymentType::IndexingRewards),
        0
    );
    assert_matches!(
        setup.staking.set_delegation_fee_cut(
            &ctx,
            provider,
            verifier,
            PaymentType::QueryFee,
            1_000_001
        ),
        Err(StakingError::PpmMath(_))
    );
}

#[test]
fn slash_scales_thawing_tokens_and_pays_the_verifier() {
    //* Given
    let mut setup = Setup::provisioned(grt(1_000));
    let (provider, verifier) = (setup.provider, setup.verifier);
    let destination = test_address(20);
    setup
        .staking
        .thaw(&setup.ctx(provider), provider, verifier, grt(500))
        .expect("thaw");
    let supply = setup.token.total_supply();

    //* When
    let slashed = setup
        .staking
        .slash(
            &setup.ctx(verifier),
            &mut setup.token,
            provider,
            grt(500),
            grt(50),
            destination,
        )
        .expect("slash");

    //* Then
    assert_eq!(slashed.provision_tokens, grt(500));
    let provision = setup
        .staking
        .get_provision(&provider, &verifier)
        .expect("provision");
    assert_eq!(provision.tokens, grt(500));
    assert_eq!(provision.tokens_thawing, grt(250));
    assert_eq!(setup.token.balance_of(&destination), grt(50));
    assert_eq!(setup.token.total_supply(), supply - grt(450));
    assert_eq!(setup.staking.get_stake(&provider), grt(500));

    // The pending request now only releases its share of the slashed pool
    setup.clock.advance_time(THAWING_PERIOD);
    let released = setup
        .staking
        .deprovision(&setup.ctx(provider), provider, verifier, 0)
        .expect("deprovision");
    assert_eq!(released, grt(250));
}

#[test]
fn slash_above_max_verifier_cut_fails() {
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);
    setup
        .staking
        .set_provision_parameters(&setup.ctx(provider), provider, verifier, 100_000, THAWING_PERIOD)
        .expect("stage");
    setup
        .staking
        .accept_provision_parameters(&setup.ctx(verifier), provider)
        .expect("accept");

    let result = setup.staking.slash(
        &setup.ctx(verifier),
        &mut setup.token,
        provider,
        grt(100),
        grt(11),
        test_address(20),
    );

    assert_matches!(
        result,
        Err(StakingError::VerifierTokensTooHigh { max_verifier_tokens, .. }) => {
            assert_eq!(max_verifier_tokens, grt(10));
        }
    );
}

#[test]
fn full_slash_voids_outstanding_thaw_requests() {
    //* Given
    let mut setup = Setup::provisioned(grt(100));
    let (provider, verifier) = (setup.provider, setup.verifier);
    setup
        .staking
        .thaw(&setup.ctx(provider), provider, verifier, grt(100))
        .expect("thaw");

    //* When
    setup
        .staking
        .slash(
            &setup.ctx(verifier),
            &mut setup.token,
            provider,
            grt(100),
            U256::ZERO,
            Address::ZERO,
        )
        .expect("slash");
    setup.clock.advance_time(THAWING_PERIOD);
    let released = setup
        .staking
        .deprovision(&setup.ctx(provider), provider, verifier, 0)
        .expect("deprovision");

    //* Then
    assert_eq!(released, U256::ZERO);
    let provision = setup
        .staking
        .get_provision(&provider, &verifier)
        .expect("provision");
    assert_eq!(provision.thawing_nonce, 1);
    assert_eq!(provision.tokens, U256::ZERO);
    assert!(setup
        .staking
        .get_provision_thaw_requests(&provider, &verifier)
        .is_empty());
}

#[test]
fn slash_reaches_delegation_only_when_enabled() {
    for enabled in [false, true] {
        //* Given
        let mut setup = Setup::with_config(StakingConfig {
            max_thawing_period: 3_600,
            delegation_slashing_enabled: enabled,
            ..Default::default()
        });
        let (provider, verifier, alice) = (setup.provider, setup.verifier, test_address(10));
        let ctx = setup.ctx(provider);
        setup
            .staking
            .stake(&ctx, &mut setup.token, grt(100))
            .expect("stake");
        setup
            .staking
            .provision(&ctx, provider, verifier, grt(100), 0, THAWING_PERIOD)
            .expect("provision");
        setup.fund(alice, grt(100));
        setup
            .staking
            .delegate(&setup.ctx(alice), &mut setup.token, provider, verifier, grt(100), U256::ZERO)
            .expect("delegate");

        //* When
        let slashed = setup
            .staking
            .slash(
                &setup.ctx(verifier),
                &mut setup.token,
                provider,
                grt(150),
                U256::ZERO,
                Address::ZERO,
            )
            .expect("slash");

        //* Then
        let pool_tokens = setup
            .staking
            .get_delegation_pool(&provider, &verifier)
            .map(|pool| pool.tokens);
        if enabled {
            assert_eq!(slashed.delegation_tokens, grt(50));
            assert_eq!(pool_tokens, Some(grt(50)));
        } else {
            assert_eq!(slashed.delegation_tokens, U256::ZERO);
            assert_eq!(pool_tokens, Some(grt(100)));
        }
    }
}
