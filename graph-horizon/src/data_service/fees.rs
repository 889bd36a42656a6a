//! Stake locked against collected fees.
//!
//! Every fee collection locks a share of the provider's provision until a release time, so a
//! later dispute can still slash it. Locks are recorded as stake claims in a per-provider FIFO
//! list; releasing walks the list from the oldest claim and stops at the first one that is not
//! releasable yet.

use std::collections::HashMap;

use alloy_primitives::{keccak256, Address, B256, U256};
use horizon_common::linked_list::{LinkedList, ListItem, Step};

use super::{DataServiceError, ProvisionTracker};
use crate::staking::HorizonStaking;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeClaim {
    pub tokens: U256,
    pub created_at: u64,
    /// Timestamp from which the claim can be released.
    pub releasable_at: u64,
    pub next: B256,
}

impl ListItem for StakeClaim {
    fn next(&self) -> B256 {
        self.next
    }

    fn set_next(&mut self, next: B256) {
        self.next = next;
    }
}

#[derive(Clone, Debug)]
pub struct DataServiceFees {
    verifier: Address,
    max_stake_claims: usize,
    delegation_ratio: u32,
    claims: HashMap<B256, StakeClaim>,
    lists: HashMap<Address, LinkedList>,
    tracker: ProvisionTracker,
}

impl DataServiceFees {
    pub fn new(verifier: Address, max_stake_claims: usize, delegation_ratio: u32) -> Self {
        Self {
            verifier,
            max_stake_claims,
            delegation_ratio,
            claims: HashMap::new(),
            lists: HashMap::new(),
            tracker: ProvisionTracker::new(),
        }
    }

    pub fn set_delegation_ratio(&mut self, delegation_ratio: u32) {
        self.delegation_ratio = delegation_ratio;
    }

    /// Tokens locked for the provider by outstanding claims.
    pub fn tokens_locked(&self, service_provider: &Address) -> U256 {
        self.tracker.locked(service_provider)
    }

    pub fn get_stake_claim(&self, id: &B256) -> Option<&StakeClaim> {
        self.claims.get(id)
    }

    pub fn get_stake_claims_list(&self, service_provider: &Address) -> LinkedList {
        self.lists.get(service_provider).cloned().unwrap_or_default()
    }

    /// The provider's claim ids, oldest first.
    pub fn get_stake_claim_ids(&self, service_provider: &Address) -> Vec<B256> {
        self.lists
            .get(service_provider)
            .map(|list| list.ids(&self.claims).collect())
            .unwrap_or_default()
    }

    fn claim_id(&self, service_provider: &Address, nonce: u64) -> B256 {
        let mut preimage = Vec::with_capacity(20 + 20 + 8);
        preimage.extend_from_slice(self.verifier.as_slice());
        preimage.extend_from_slice(service_provider.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        keccak256(preimage)
    }

    /// Lock `tokens` of the provider's provision until `releasable_at`. Returns the claim id.
    pub fn lock_stake(
        &mut self,
        staking: &HorizonStaking,
        service_provider: Address,
        tokens: U256,
        now: u64,
        releasable_at: u64,
    ) -> Result<B256, DataServiceError> {
        if tokens.is_zero() {
            return Err(DataServiceError::InvalidZeroTokens);
        }
        let mut list = self.lists.get(&service_provider).cloned().unwrap_or_default();
        if list.count >= self.max_stake_claims {
            return Err(DataServiceError::MaxStakeClaimsReached(self.max_stake_claims));
        }
        let previous_tail = list.tail;
        let id = self.claim_id(&service_provider, list.nonce);
        list.add_tail(id)?;
        self.tracker.lock(
            staking,
            self.verifier,
            service_provider,
            tokens,
            self.delegation_ratio,
        )?;

        // Nothing below can fail.
        if let Some(tail) = self.claims.get_mut(&previous_tail) {
            tail.set_next(id);
        }
        self.claims.insert(
            id,
            StakeClaim {
                tokens,
                created_at: now,
                releasable_at,
                next: B256::ZERO,
            },
        );
        self.lists.insert(service_provider, list);

        tracing::debug!(%service_provider, %id, %tokens, releasable_at, "stake locked");
        Ok(id)
    }

    /// Release exactly `amount` tokens of matured claims, oldest first.
    ///
    /// Fails without releasing anything if the matured claims at the head of the list add up to
    /// less than `amount`. The last claim consumed may be released only partially.
    pub fn release_stake(
        &mut self,
        service_provider: Address,
        amount: U256,
        now: u64,
    ) -> Result<U256, DataServiceError> {
        if amount.is_zero() {
            return Err(DataServiceError::InvalidZeroTokens);
        }
        let available = self.releasable(&service_provider, now);
        if available < amount {
            return Err(DataServiceError::InsufficientReleasableTokens {
                available,
                requested: amount,
            });
        }

        let list = self.lists.entry(service_provider).or_default();
        let (claims, remaining) = list.traverse::<_, _, DataServiceError, _>(
            &mut self.claims,
            |claims, id, remaining: U256| {
                if remaining.is_zero() {
                    return Ok(Step::Stop(remaining));
                }
                let claim = claims
                    .get_mut(&id)
                    .ok_or(DataServiceError::StakeClaimNotFound(id))?;
                if claim.releasable_at > now {
                    return Ok(Step::Stop(remaining));
                }
                if claim.tokens <= remaining {
                    return Ok(Step::Continue(remaining - claim.tokens));
                }
                claim.tokens -= remaining;
                Ok(Step::Stop(U256::ZERO))
            },
            amount,
            0,
        )?;
        debug_assert!(remaining.is_zero());
        self.tracker.release(service_provider, amount)?;

        tracing::debug!(%service_provider, %amount, claims, "stake released");
        Ok(amount)
    }

    /// Release up to `n` matured claims, oldest first. `n == 0` means all of them. Returns the
    /// tokens released.
    pub fn release_stake_claims(
        &mut self,
        service_provider: Address,
        n: usize,
        now: u64,
    ) -> Result<U256, DataServiceError> {
        let list = self.lists.entry(service_provider).or_default();
        let (claims, tokens) = list.traverse::<_, _, DataServiceError, _>(
            &mut self.claims,
            |claims, id, released: U256| {
                let claim = claims
                    .get(&id)
                    .ok_or(DataServiceError::StakeClaimNotFound(id))?;
                if claim.releasable_at > now {
                    return Ok(Step::Stop(released));
                }
                Ok(Step::Continue(released + claim.tokens))
            },
            U256::ZERO,
            n,
        )?;
        self.tracker.release(service_provider, tokens)?;

        if claims > 0 {
            tracing::debug!(%service_provider, %tokens, claims, "stake claims released");
        }
        Ok(tokens)
    }

    /// Tokens of the matured claims at the head of the provider's list.
    pub fn releasable(&self, service_provider: &Address, now: u64) -> U256 {
        let Some(list) = self.lists.get(service_provider) else {
            return U256::ZERO;
        };
        list.ids(&self.claims)
            .map_while(|id| self.claims.get(&id).filter(|claim| claim.releasable_at <= now))
            .fold(U256::ZERO, |total, claim| total + claim.tokens)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use horizon_common::{
        types::grt,
        utils::testing::{init_test_tracing, test_address},
    };
    use horizon_framework::{
        context::Clock,
        controller::{ContractName, Controller},
        token::GraphToken,
    };

    use super::*;
    use crate::config::StakingConfig;

    struct Setup {
        clock: Clock,
        staking: HorizonStaking,
        fees: DataServiceFees,
        provider: Address,
    }

    /// A provider with 1000 GRT provisioned to the data service.
    fn setup(max_stake_claims: usize) -> Setup {
        init_test_tracing();
        let governor = test_address(0);
        let (provider, data_service) = (test_address(1), test_address(2));
        let staking_address = ContractName::Staking.default_address();
        let controller = Controller::new(governor).expect("valid governor");
        controller
            .register(governor, ContractName::Staking, staking_address)
            .expect("register staking");
        let mut token = GraphToken::new(controller.clone());
        token.add_minter(governor, governor).expect("add minter");
        token.mint(governor, provider, grt(1_000)).expect("mint");
        token
            .approve(provider, staking_address, U256::MAX)
            .expect("approve");

        let clock = Clock::default();
        let ctx = clock.context(provider);
        let mut staking = HorizonStaking::new(controller, StakingConfig::default());
        staking.stake(&ctx, &mut token, grt(1_000)).expect("stake");
        staking
            .provision(&ctx, provider, data_service, grt(1_000), 0, 0)
            .expect("provision");

        Setup {
            clock,
            staking,
            fees: DataServiceFees::new(data_service, max_stake_claims, 0),
            provider,
        }
    }

    impl Setup {
        fn lock(&mut self, tokens: U256, lock_for: u64) -> Result<B256, DataServiceError> {
            let now = self.clock.timestamp();
            self.fees
                .lock_stake(&self.staking, self.provider, tokens, now, now + lock_for)
        }
    }

    #[test]
    fn locked_stake_is_released_after_its_lock_period() {
        //* Given
        let mut setup = setup(10);
        let provider = setup.provider;
        setup.lock(grt(500), 60).expect("lock");

        //* When
        setup.clock.advance_time(30);
        let early = setup
            .fees
            .release_stake(provider, grt(500), setup.clock.timestamp());
        setup.clock.advance_time(31);
        let matured = setup
            .fees
            .release_stake(provider, grt(500), setup.clock.timestamp());

        //* Then
        assert_matches!(
            early,
            Err(DataServiceError::InsufficientReleasableTokens { available, .. }) => {
                assert_eq!(available, U256::ZERO);
            }
        );
        assert_eq!(matured, Ok(grt(500)));
        assert_eq!(
            setup.fees.get_stake_claims_list(&provider),
            LinkedList {
                nonce: 1,
                ..Default::default()
            }
        );
        assert_eq!(setup.fees.tokens_locked(&provider), U256::ZERO);
    }

    #[test]
    fn release_drains_oldest_claims_first() {
        //* Given
        let mut setup = setup(10);
        let provider = setup.provider;
        let first = setup.lock(grt(100), 10).expect("lock");
        let second = setup.lock(grt(200), 10).expect("lock");
        let third = setup.lock(grt(300), 10).expect("lock");
        setup.clock.advance_time(10);
        let now = setup.clock.timestamp();

        //* When
        let too_much = setup.fees.release_stake(provider, grt(601), now);
        let partial = setup.fees.release_stake(provider, grt(250), now);

        //* Then
        assert_matches!(
            too_much,
            Err(DataServiceError::InsufficientReleasableTokens { .. })
        );
        assert_eq!(partial, Ok(grt(250)));
        assert_eq!(setup.fees.get_stake_claim_ids(&provider), vec![second, third]);
        assert!(setup.fees.get_stake_claim(&first).is_none());
        assert_eq!(
            setup.fees.get_stake_claim(&second).map(|claim| claim.tokens),
            Some(grt(50))
        );
        assert_eq!(setup.fees.tokens_locked(&provider), grt(350));
    }

    #[test]
    fn release_stops_at_the_first_immature_claim() {
        //* Given
        let mut setup = setup(10);
        let provider = setup.provider;
        setup.lock(grt(100), 10).expect("lock");
        let immature = setup.lock(grt(100), 1_000).expect("lock");
        let matured_later_in_list = setup.lock(grt(100), 10).expect("lock");
        setup.clock.advance_time(10);
        let now = setup.clock.timestamp();

        //* When
        let blocked = setup.fees.release_stake(provider, grt(200), now);
        let released = setup.fees.release_stake_claims(provider, 0, now);

        //* Then
        assert_matches!(
            blocked,
            Err(DataServiceError::InsufficientReleasableTokens { available, .. }) => {
                assert_eq!(available, grt(100));
            }
        );
        assert_eq!(released, Ok(grt(100)));
        assert_eq!(
            setup.fees.get_stake_claim_ids(&provider),
            vec![immature, matured_later_in_list]
        );
    }

    #[test]
    fn locks_are_capped_by_claims_and_provision() {
        let mut setup = setup(2);

        assert_matches!(
            setup.lock(grt(1_001), 10),
            Err(DataServiceError::InsufficientTokensAvailable { .. })
        );
        setup.lock(grt(600), 10).expect("lock");
        assert_matches!(
            setup.lock(grt(401), 10),
            Err(DataServiceError::InsufficientTokensAvailable { .. })
        );
        setup.lock(grt(400), 10).expect("lock");
        assert_matches!(
            setup.lock(grt(1), 10),
            Err(DataServiceError::MaxStakeClaimsReached(2))
        );
        assert_matches!(
            setup.lock(U256::ZERO, 10),
            Err(DataServiceError::InvalidZeroTokens)
        );
    }

    #[test]
    fn lock_on_a_full_list_locks_nothing() {
        //* Given
        let mut setup = setup(usize::MAX);
        let provider = setup.provider;
        let full = LinkedList {
            count: horizon_common::linked_list::MAX_ITEMS,
            ..Default::default()
        };
        setup.fees.lists.insert(provider, full.clone());

        //* When
        let result = setup.lock(grt(100), 10);

        //* Then
        assert_matches!(
            result,
            Err(DataServiceError::LinkedList(
                horizon_common::linked_list::LinkedListError::MaxElementsExceeded
            ))
        );
        assert_eq!(setup.fees.tokens_locked(&provider), U256::ZERO);
        assert_eq!(setup.fees.get_stake_claims_list(&provider), full);
    }
}
