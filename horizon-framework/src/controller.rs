//! The protocol contract registry.
//!
//! The [`Controller`] maps contract name hashes to addresses, and holds the protocol governance
//! roles and pause switches. Every component keeps a [`Controller`] handle and resolves its
//! dependencies through it at the point of use, never at construction time, so re-registering a
//! contract takes effect for all dependents on their next call.

use std::{collections::HashMap, fmt, sync::Arc};

use alloy_primitives::{keccak256, Address, B256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;

/// The well-known protocol contract names.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum ContractName {
    GraphToken,
    Staking,
    Curation,
    RewardsManager,
    GraphPayments,
    PaymentsEscrow,
    GraphTallyCollector,
    SubgraphService,
    DisputeManager,
}

impl ContractName {
    pub const ALL: [ContractName; 9] = [
        ContractName::GraphToken,
        ContractName::Staking,
        ContractName::Curation,
        ContractName::RewardsManager,
        ContractName::GraphPayments,
        ContractName::PaymentsEscrow,
        ContractName::GraphTallyCollector,
        ContractName::SubgraphService,
        ContractName::DisputeManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractName::GraphToken => "GraphToken",
            ContractName::Staking => "Staking",
            ContractName::Curation => "Curation",
            ContractName::RewardsManager => "RewardsManager",
            ContractName::GraphPayments => "GraphPayments",
            ContractName::PaymentsEscrow => "PaymentsEscrow",
            ContractName::GraphTallyCollector => "GraphTallyCollector",
            ContractName::SubgraphService => "SubgraphService",
            ContractName::DisputeManager => "DisputeManager",
        }
    }

    /// The registry key: `keccak256(name)`.
    pub fn id(&self) -> B256 {
        keccak256(self.as_str())
    }

    /// A deterministic address for a contract deployed by the protocol itself.
    pub fn default_address(&self) -> Address {
        Address::from_word(keccak256(format!("horizon.{}", self.as_str())))
    }
}

impl fmt::Display for ContractName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default)]
struct Registry {
    governor: Address,
    pending_governor: Address,
    pause_guardian: Address,
    paused: bool,
    partial_paused: bool,
    contracts: HashMap<B256, Address>,
}

/// A point-in-time copy of the registry contents, taken with [`Controller::snapshot`].
#[derive(Clone, Debug)]
pub struct RegistrySnapshot(Registry);

/// A shared handle to the protocol registry.
///
/// Cloning the handle is cheap and every clone observes the same registry.
#[derive(Clone, Debug)]
pub struct Controller {
    inner: Arc<RwLock<Registry>>,
}

impl Controller {
    pub fn new(governor: Address) -> Result<Self, ControllerError> {
        if governor.is_zero() {
            return Err(ControllerError::InvalidZeroAddress("governor"));
        }
        Ok(Self {
            inner: Arc::new(RwLock::new(Registry {
                governor,
                ..Default::default()
            })),
        })
    }

    pub fn governor(&self) -> Address {
        self.inner.read().governor
    }

    pub fn pause_guardian(&self) -> Address {
        self.inner.read().pause_guardian
    }

    pub fn ensure_governor(&self, caller: Address) -> Result<(), ControllerError> {
        if caller != self.governor() {
            return Err(ControllerError::NotGovernor(caller));
        }
        Ok(())
    }

    /// Start a two-step governance transfer.
    pub fn transfer_ownership(
        &self,
        caller: Address,
        new_governor: Address,
    ) -> Result<(), ControllerError> {
        self.ensure_governor(caller)?;
        if new_governor.is_zero() {
            return Err(ControllerError::InvalidZeroAddress("governor"));
        }
        self.inner.write().pending_governor = new_governor;
        Ok(())
    }

    /// Complete a governance transfer. Must be called by the pending governor.
    pub fn accept_ownership(&self, caller: Address) -> Result<(), ControllerError> {
        let mut registry = self.inner.write();
        if registry.pending_governor.is_zero() || caller != registry.pending_governor {
            return Err(ControllerError::NotPendingGovernor(caller));
        }
        tracing::info!(
            old_governor = %registry.governor,
            new_governor = %caller,
            "governor updated"
        );
        registry.governor = caller;
        registry.pending_governor = Address::ZERO;
        Ok(())
    }

    /// Register the address of a contract. Governor only.
    pub fn set_contract_proxy(
        &self,
        caller: Address,
        id: B256,
        address: Address,
    ) -> Result<(), ControllerError> {
        self.ensure_governor(caller)?;
        if address.is_zero() {
            return Err(ControllerError::InvalidZeroAddress("contract"));
        }
        self.inner.write().contracts.insert(id, address);
        tracing::debug!(%id, %address, "contract registered");
        Ok(())
    }

    /// Remove a contract from the registry. Governor only.
    pub fn unset_contract_proxy(&self, caller: Address, id: B256) -> Result<(), ControllerError> {
        self.ensure_governor(caller)?;
        self.inner.write().contracts.remove(&id);
        tracing::debug!(%id, "contract unregistered");
        Ok(())
    }

    /// Register a well-known contract by name. Governor only.
    pub fn register(
        &self,
        caller: Address,
        name: ContractName,
        address: Address,
    ) -> Result<(), ControllerError> {
        self.set_contract_proxy(caller, name.id(), address)
    }

    /// The raw registry lookup. Returns the zero address for unknown ids.
    pub fn get_contract_proxy(&self, id: B256) -> Address {
        self.inner
            .read()
            .contracts
            .get(&id)
            .copied()
            .unwrap_or_default()
    }

    /// Resolve a dependency, failing if it is not registered.
    pub fn resolve(&self, name: ContractName) -> Result<Address, ControllerError> {
        let address = self.get_contract_proxy(name.id());
        if address.is_zero() {
            return Err(ControllerError::ContractNotRegistered(name));
        }
        Ok(address)
    }

    /// Ensure `caller` is the registered `name` contract.
    pub fn ensure_caller(
        &self,
        caller: Address,
        name: ContractName,
    ) -> Result<(), ControllerError> {
        if caller != self.resolve(name)? {
            return Err(ControllerError::UnauthorizedCaller {
                caller,
                expected: name,
            });
        }
        Ok(())
    }

    pub fn set_pause_guardian(
        &self,
        caller: Address,
        guardian: Address,
    ) -> Result<(), ControllerError> {
        self.ensure_governor(caller)?;
        self.inner.write().pause_guardian = guardian;
        tracing::info!(%guardian, "pause guardian updated");
        Ok(())
    }

    /// Pause or unpause every protocol operation.
    pub fn set_paused(&self, caller: Address, paused: bool) -> Result<(), ControllerError> {
        let mut registry = self.inner.write();
        if caller != registry.governor && caller != registry.pause_guardian {
            return Err(ControllerError::NotPauseAuthority(caller));
        }
        registry.paused = paused;
        tracing::info!(paused, "protocol pause updated");
        Ok(())
    }

    /// Pause or unpause the operations that move stake out of the protocol.
    pub fn set_partial_paused(&self, caller: Address, paused: bool) -> Result<(), ControllerError> {
        let mut registry = self.inner.write();
        if caller != registry.governor && caller != registry.pause_guardian {
            return Err(ControllerError::NotPauseAuthority(caller));
        }
        registry.partial_paused = paused;
        tracing::info!(paused, "protocol partial pause updated");
        Ok(())
    }

    pub fn paused(&self) -> bool {
        self.inner.read().paused
    }

    pub fn partial_paused(&self) -> bool {
        self.inner.read().partial_paused
    }

    pub fn ensure_not_paused(&self) -> Result<(), ControllerError> {
        if self.paused() {
            return Err(ControllerError::Paused);
        }
        Ok(())
    }

    pub fn ensure_not_partial_paused(&self) -> Result<(), ControllerError> {
        let registry = self.inner.read();
        if registry.paused {
            return Err(ControllerError::Paused);
        }
        if registry.partial_paused {
            return Err(ControllerError::PartialPaused);
        }
        Ok(())
    }

    /// Copy the registry contents out of the shared handle.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.inner.read().clone())
    }

    /// Overwrite the registry contents seen by every handle.
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        *self.inner.write() = snapshot.0;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use horizon_common::utils::testing::test_address;

    use super::*;

    #[test]
    fn resolve_registered_contract() {
        //* Given
        let governor = test_address(0);
        let staking = test_address(1);
        let controller = Controller::new(governor).expect("valid governor");

        //* When
        controller
            .register(governor, ContractName::Staking, staking)
            .expect("register staking");

        //* Then
        assert_eq!(controller.resolve(ContractName::Staking), Ok(staking));
        assert_eq!(
            controller.get_contract_proxy(ContractName::Staking.id()),
            staking
        );
    }

    #[test]
    fn resolve_unregistered_contract_fails_naming_the_dependency() {
        let controller = Controller::new(test_address(0)).expect("valid governor");

        assert_eq!(
            controller.resolve(ContractName::RewardsManager),
            Err(ControllerError::ContractNotRegistered(
                ContractName::RewardsManager
            ))
        );
        assert_eq!(
            controller.get_contract_proxy(ContractName::RewardsManager.id()),
            Address::ZERO
        );
    }

    #[test]
    fn only_governor_can_register() {
        //* Given
        let controller = Controller::new(test_address(0)).expect("valid governor");
        let intruder = test_address(9);

        //* When
        let result = controller.register(intruder, ContractName::Curation, intruder);

        //* Then
        assert_matches!(result, Err(ControllerError::NotGovernor(caller)) => {
            assert_eq!(caller, intruder);
        });
        assert!(controller.resolve(ContractName::Curation).is_err());
    }

    #[test]
    fn re_registration_is_visible_through_every_handle() {
        //* Given
        let governor = test_address(0);
        let controller = Controller::new(governor).expect("valid governor");
        let dependent = controller.clone();
        controller
            .register(governor, ContractName::Curation, test_address(1))
            .expect("register");

        //* When
        controller
            .register(governor, ContractName::Curation, test_address(2))
            .expect("upgrade");

        //* Then
        assert_eq!(dependent.resolve(ContractName::Curation), Ok(test_address(2)));
    }

    #[test]
    fn pause_switches() {
        //* Given
        let governor = test_address(0);
        let guardian = test_address(1);
        let controller = Controller::new(governor).expect("valid governor");
        controller
            .set_pause_guardian(governor, guardian)
            .expect("set guardian");

        //* When
        controller
            .set_partial_paused(guardian, true)
            .expect("partial pause");

        //* Then
        assert_eq!(controller.ensure_not_paused(), Ok(()));
        assert_eq!(
            controller.ensure_not_partial_paused(),
            Err(ControllerError::PartialPaused)
        );
        assert_matches!(
            controller.set_paused(test_address(5), true),
            Err(ControllerError::NotPauseAuthority(_))
        );
    }

    #[test]
    fn two_step_governance_transfer() {
        let governor = test_address(0);
        let next = test_address(1);
        let controller = Controller::new(governor).expect("valid governor");

        controller
            .transfer_ownership(governor, next)
            .expect("start transfer");
        assert_matches!(
            controller.accept_ownership(test_address(2)),
            Err(ControllerError::NotPendingGovernor(_))
        );
        controller.accept_ownership(next).expect("accept");

        assert_eq!(controller.governor(), next);
    }

    #[test]
    fn restore_rewinds_every_handle() {
        //* Given
        let governor = test_address(0);
        let controller = Controller::new(governor).expect("valid governor");
        let other_handle = controller.clone();
        controller
            .register(governor, ContractName::Staking, test_address(1))
            .expect("register staking");
        let snapshot = controller.snapshot();

        //* When
        controller
            .register(governor, ContractName::Staking, test_address(2))
            .expect("re-register staking");
        controller.set_paused(governor, true).expect("pause");
        controller.restore(snapshot);

        //* Then
        assert_eq!(
            other_handle.resolve(ContractName::Staking),
            Ok(test_address(1))
        );
        assert!(!other_handle.paused());
    }
}
