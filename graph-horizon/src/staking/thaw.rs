//! Thaw requests: FIFO queues of tokens waiting out a thawing period.
//!
//! Requests hold *shares* of a thawing pool (a provision's or a delegation pool's) rather than
//! tokens, so a slash reduces the value of every pending request proportionally. A pool that is
//! slashed to zero bumps its thawing nonce, which voids every request created before.

use alloy_primitives::{keccak256, Address, B256, U256};
use horizon_common::linked_list::{LinkedList, ListItem, Step};
use serde::{Deserialize, Serialize};

use super::{HorizonStaking, StakingError, MAX_THAW_REQUESTS};

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum ThawRequestType {
    Provision,
    Delegation,
}

/// Identifies a thaw request list: one per type, provider, verifier, and owner.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ThawListKey {
    pub request_type: ThawRequestType,
    pub service_provider: Address,
    pub verifier: Address,
    pub owner: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThawRequest {
    /// Shares of the thawing pool.
    pub shares: U256,
    /// Timestamp after which the request can be fulfilled.
    pub thawing_until: u64,
    /// Next request in the list.
    pub next: B256,
    /// The pool thawing nonce when the request was created.
    pub thawing_nonce: u64,
}

impl ListItem for ThawRequest {
    fn next(&self) -> B256 {
        self.next
    }

    fn set_next(&mut self, next: B256) {
        self.next = next;
    }
}

/// The state of a thawing pool before and after fulfilling thaw requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct ThawingPool {
    pub tokens_thawing: U256,
    pub shares_thawing: U256,
    pub thawing_nonce: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct Fulfilled {
    pub pool: ThawingPool,
    pub tokens_thawed: U256,
    pub requests: usize,
}

fn thaw_request_id(key: &ThawListKey, nonce: u64) -> B256 {
    let mut preimage = Vec::with_capacity(1 + 3 * 20 + 8);
    preimage.push(key.request_type as u8);
    preimage.extend_from_slice(key.service_provider.as_slice());
    preimage.extend_from_slice(key.verifier.as_slice());
    preimage.extend_from_slice(key.owner.as_slice());
    preimage.extend_from_slice(&nonce.to_be_bytes());
    keccak256(preimage)
}

impl HorizonStaking {
    /// Fails once the list under `key` holds [`MAX_THAW_REQUESTS`] requests.
    pub(super) fn ensure_thaw_capacity(&self, key: &ThawListKey) -> Result<(), StakingError> {
        let count = self
            .thaw_lists
            .get(key)
            .map(|list| list.count)
            .unwrap_or_default();
        if count >= MAX_THAW_REQUESTS {
            return Err(StakingError::TooManyThawRequests(MAX_THAW_REQUESTS));
        }
        Ok(())
    }

    pub(super) fn create_thaw_request(
        &mut self,
        key: ThawListKey,
        shares: U256,
        thawing_until: u64,
        thawing_nonce: u64,
    ) -> Result<B256, StakingError> {
        self.ensure_thaw_capacity(&key)?;
        let list = self.thaw_lists.entry(key).or_default();

        let id = thaw_request_id(&key, list.nonce);
        if let Some(tail) = self.thaw_requests.get_mut(&list.tail) {
            tail.set_next(id);
        }
        self.thaw_requests.insert(
            id,
            ThawRequest {
                shares,
                thawing_until,
                next: B256::ZERO,
                thawing_nonce,
            },
        );
        list.add_tail(id)?;

        tracing::debug!(
            request_type = ?key.request_type,
            service_provider = %key.service_provider,
            verifier = %key.verifier,
            owner = %key.owner,
            %id,
            %shares,
            thawing_until,
            "thaw request created"
        );
        Ok(id)
    }

    /// Fulfill up to `n` matured thaw requests of the list, oldest first. `n == 0` means all.
    ///
    /// Stops at the first request still thawing. Requests from an older thawing nonce are
    /// removed without returning tokens.
    pub(super) fn fulfill_thaw_requests(
        &mut self,
        key: ThawListKey,
        pool: ThawingPool,
        now: u64,
        n: usize,
    ) -> Result<Fulfilled, StakingError> {
        let list = self.thaw_lists.entry(key).or_default();
        if list.is_empty() {
            return Err(StakingError::NothingThawing);
        }

        let init = Fulfilled {
            pool,
            ..Default::default()
        };
        let (requests, mut fulfilled) = list.traverse::<_, _, StakingError, _>(
            &mut self.thaw_requests,
            |requests, id, mut acc: Fulfilled| {
                let request = requests
                    .get(&id)
                    .ok_or(StakingError::ThawRequestNotFound(id))?;
                if request.thawing_until > now {
                    return Ok(Step::Stop(acc));
                }

                if request.thawing_nonce == acc.pool.thawing_nonce
                    && !acc.pool.shares_thawing.is_zero()
                {
                    let tokens = request.shares * acc.pool.tokens_thawing / acc.pool.shares_thawing;
                    acc.pool.tokens_thawing -= tokens;
                    acc.pool.shares_thawing -= request.shares;
                    acc.tokens_thawed += tokens;
                }
                Ok(Step::Continue(acc))
            },
            init,
            n,
        )?;
        fulfilled.requests = requests;

        tracing::debug!(
            request_type = ?key.request_type,
            service_provider = %key.service_provider,
            verifier = %key.verifier,
            owner = %key.owner,
            requests,
            tokens_thawed = %fulfilled.tokens_thawed,
            "thaw requests fulfilled"
        );
        Ok(fulfilled)
    }

    pub fn get_thaw_request(&self, id: &B256) -> Option<&ThawRequest> {
        self.thaw_requests.get(id)
    }

    pub fn get_thaw_request_list(&self, key: &ThawListKey) -> LinkedList {
        self.thaw_lists.get(key).cloned().unwrap_or_default()
    }

    /// The ids of a thaw request list, oldest first.
    pub fn get_thaw_request_ids(&self, key: &ThawListKey) -> Vec<B256> {
        self.thaw_lists
            .get(key)
            .map(|list| list.ids(&self.thaw_requests).collect())
            .unwrap_or_default()
    }
}
