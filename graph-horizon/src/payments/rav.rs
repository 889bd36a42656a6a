//! Receipt aggregate vouchers (RAVs): payer-signed running totals of the fees owed to a service
//! provider for one collection.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct as _};
use lazy_static::lazy_static;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

lazy_static! {
    static ref SECP256K1: Secp256k1<secp256k1::All> = Secp256k1::new();
}

alloy_sol_types::sol! {
    struct ReceiptAggregateVoucher {
        bytes32 collectionId;
        address payer;
        address serviceProvider;
        address dataService;
        uint64 timestampNs;
        uint128 valueAggregate;
        bytes metadata;
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rav {
    pub collection_id: B256,
    pub payer: Address,
    pub service_provider: Address,
    pub data_service: Address,
    pub timestamp_ns: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub value_aggregate: u128,
    #[serde(default)]
    pub metadata: Bytes,
}

/// A RAV with its 65 bytes `r || s || v` ECDSA signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRav {
    pub rav: Rav,
    pub signature: Bytes,
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature length: {0}")]
    InvalidLength(usize),
    #[error("invalid signature: {0}")]
    Invalid(String),
    /// The `s` value is in the upper half of the curve order.
    #[error("non-canonical signature: high s value")]
    HighS,
}

/// The EIP-712 domain of the collector deployed at `verifying_contract`.
pub fn collector_domain(chain_id: u64, verifying_contract: Address) -> Eip712Domain {
    Eip712Domain {
        name: Some("GraphTallyCollector".into()),
        version: Some("1".into()),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(verifying_contract),
        salt: None,
    }
}

impl Rav {
    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        let msg = ReceiptAggregateVoucher {
            collectionId: self.collection_id,
            payer: self.payer,
            serviceProvider: self.service_provider,
            dataService: self.data_service,
            timestampNs: self.timestamp_ns,
            valueAggregate: self.value_aggregate,
            metadata: self.metadata.clone(),
        };
        msg.eip712_signing_hash(domain)
    }
}

impl SignedRav {
    /// The address that signed the voucher.
    pub fn recover_signer(&self, domain: &Eip712Domain) -> Result<Address, SignatureError> {
        recover_signer(self.rav.signing_hash(domain), &self.signature)
    }
}

/// Recover the signer of a 32 bytes digest from a `r || s || v` signature.
///
/// Only the low-s form of a signature is accepted, so every digest has one valid signature per
/// signer.
pub fn recover_signer(digest: B256, signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let v = match signature[64] {
        v @ 27..=28 => v - 27,
        v => v,
    };
    let recovery_id =
        RecoveryId::from_i32(v as i32).map_err(|err| SignatureError::Invalid(err.to_string()))?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|err| SignatureError::Invalid(err.to_string()))?;
    let standard = signature.to_standard();
    let mut normalized = standard;
    normalized.normalize_s();
    if normalized != standard {
        return Err(SignatureError::HighS);
    }
    let message = Message::from_digest(digest.0);
    let public_key = SECP256K1
        .recover_ecdsa(&message, &signature)
        .map_err(|err| SignatureError::Invalid(err.to_string()))?;
    Ok(public_key_address(&public_key))
}

/// The Ethereum address of a public key.
pub fn public_key_address(public_key: &PublicKey) -> Address {
    let hash = keccak256(&public_key.serialize_uncompressed()[1..]);
    Address::from_slice(&hash[12..])
}

/// Sign a 32 bytes digest, returning a `r || s || v` signature with `v` in `{27, 28}`.
pub fn sign_digest(secret_key: &secp256k1::SecretKey, digest: B256) -> Bytes {
    let message = Message::from_digest(digest.0);
    let (recovery_id, compact) = SECP256K1
        .sign_ecdsa_recoverable(&message, secret_key)
        .serialize_compact();
    let mut signature = compact.to_vec();
    signature.push(recovery_id.to_i32() as u8 + 27);
    signature.into()
}

pub fn signer_address(secret_key: &secp256k1::SecretKey) -> Address {
    public_key_address(&PublicKey::from_secret_key(&SECP256K1, secret_key))
}

#[cfg(test)]
mod tests {
    use secp256k1::SecretKey;

    use super::*;

    #[test]
    fn recover_the_voucher_signer() {
        //* Given
        let secret_key = SecretKey::from_slice(&[0x42; 32]).expect("valid key");
        let domain = collector_domain(1337, Address::repeat_byte(7));
        let rav = Rav {
            collection_id: B256::repeat_byte(1),
            payer: Address::repeat_byte(2),
            service_provider: Address::repeat_byte(3),
            data_service: Address::repeat_byte(4),
            timestamp_ns: 1,
            value_aggregate: 1_000,
            metadata: Bytes::new(),
        };
        let signed = SignedRav {
            signature: sign_digest(&secret_key, rav.signing_hash(&domain)),
            rav,
        };

        //* When
        let signer = signed.recover_signer(&domain);
        let other_domain = signed.recover_signer(&collector_domain(1, Address::repeat_byte(7)));

        //* Then
        assert_eq!(signer, Ok(signer_address(&secret_key)));
        assert_ne!(other_domain, Ok(signer_address(&secret_key)));
    }

    #[test]
    fn reject_malformed_signatures() {
        assert_eq!(
            recover_signer(B256::ZERO, &[0; 64]),
            Err(SignatureError::InvalidLength(64))
        );
    }

    #[test]
    fn reject_high_s_signatures() {
        //* Given
        let secret_key = SecretKey::from_slice(&[0x42; 32]).expect("valid key");
        let digest = keccak256(b"voucher");
        let signature = sign_digest(&secret_key, digest);

        // (r, n - s, v ^ 1) recovers the same key
        let order = U256::from_be_slice(&secp256k1::constants::CURVE_ORDER);
        let s = U256::from_be_slice(&signature[32..64]);
        let mut malleated = signature.to_vec();
        malleated[32..64].copy_from_slice(&(order - s).to_be_bytes::<32>());
        malleated[64] = if malleated[64] == 27 { 28 } else { 27 };

        //* When
        let canonical = recover_signer(digest, &signature);
        let high_s = recover_signer(digest, &malleated);

        //* Then
        assert_eq!(canonical, Ok(signer_address(&secret_key)));
        assert_eq!(high_s, Err(SignatureError::HighS));
    }
}
