//! Configuration shared by every protocol deployment.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;

/// Governance roles.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GovernanceConfig {
    /// Owner of the controller, allowed to register contracts and update parameters
    pub governor: Address,
    /// Allowed to pause the protocol, besides the governor
    #[serde(default)]
    pub pause_guardian: Address,
    /// Allowed to deny and re-allow subgraph deployments rewards
    #[serde(default)]
    pub subgraph_availability_oracle: Address,
    /// Allowed to slash subgraph service indexers
    #[serde(default)]
    pub dispute_manager: Address,
}

impl GovernanceConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.governor.is_zero() {
            return Err(ControllerError::InvalidZeroAddress("governor"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_roles_default_to_zero() {
        let config: GovernanceConfig = serde_json::from_str(
            r#"{ "governor": "0x00000000000000000000000000000000000000aa" }"#,
        )
        .expect("valid config");

        assert!(config.validate().is_ok());
        assert!(config.pause_guardian.is_zero());
        assert!(config.dispute_manager.is_zero());
    }
}
