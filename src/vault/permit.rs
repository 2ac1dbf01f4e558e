//! Off-chain signed spending approvals
//!
//! digest = sha256(domain_separator || owner || spender || value || nonce || deadline)
//! with big-endian integers. The owner's nonce is part of the digest, so a
//! redeemed permit never verifies twice.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::{hex_signature, Address};

/// A signed approval ready to be redeemed by the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitSignature {
    /// Last unix timestamp at which the permit may be redeemed
    pub deadline: u64,
    #[serde(with = "hex_signature")]
    pub signature: [u8; 64],
}

pub fn domain_separator(vault: &Address) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"PrizeVault permit");
    hasher.update(vault.as_bytes());
    hasher.finalize().into()
}

pub fn permit_digest(
    domain_separator: &[u8; 32],
    owner: &Address,
    spender: &Address,
    value: u128,
    nonce: u64,
    deadline: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain_separator);
    hasher.update(owner.as_bytes());
    hasher.update(spender.as_bytes());
    hasher.update(value.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(deadline.to_be_bytes());
    hasher.finalize().into()
}

/// Sign a permit for `value` from the key's own address to `spender`
pub fn sign_permit(
    key: &SigningKey,
    domain_separator: &[u8; 32],
    spender: &Address,
    value: u128,
    nonce: u64,
    deadline: u64,
) -> PermitSignature {
    let owner = Address::from(key.verifying_key());
    let digest = permit_digest(domain_separator, &owner, spender, value, nonce, deadline);
    PermitSignature {
        deadline,
        signature: key.sign(&digest).to_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_permit_verifies_against_owner() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let owner = Address::from(key.verifying_key());
        let spender = Address::derive(&[b"spender"]);
        let domain = domain_separator(&Address::derive(&[b"vault"]));

        let permit = sign_permit(&key, &domain, &spender, 500, 0, 1_000);
        let digest = permit_digest(&domain, &owner, &spender, 500, 0, 1_000);
        assert!(owner.verify(&digest, &permit.signature));

        let bumped = permit_digest(&domain, &owner, &spender, 500, 1, 1_000);
        assert!(!owner.verify(&bumped, &permit.signature));
    }

    #[test]
    fn test_domain_separator_is_per_vault() {
        let a = domain_separator(&Address::derive(&[b"a"]));
        let b = domain_separator(&Address::derive(&[b"b"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_permit_signature_serde() {
        let permit = PermitSignature {
            deadline: 42,
            signature: [9u8; 64],
        };
        let json = serde_json::to_value(permit).unwrap();
        assert_eq!(json["deadline"], 42);
        assert_eq!(json["signature"].as_str().unwrap().len(), 128);
        let back: PermitSignature = serde_json::from_value(json).unwrap();
        assert_eq!(back, permit);
    }
}
