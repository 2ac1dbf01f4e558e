//! Wallet login by signed challenge
//!
//! A client names the address it wants to act as, receives a nonce and a
//! message embedding it, and proves control of the address by returning an
//! ed25519 signature over that message. Each nonce can be redeemed once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::address::Address;
use crate::error::{AppError, Result};

/// How long a challenge stays redeemable, in seconds
pub const CHALLENGE_TTL: u64 = 300;

/// Most outstanding challenges; past this expired ones are pruned, then the oldest
const MAX_CHALLENGES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: Uuid,
    pub message: String,
}

/// Text the client signs to log in
pub fn login_message(address: &Address, nonce: &Uuid) -> String {
    format!("slot-delegator login\naddress: {}\nnonce: {}", address, nonce)
}

struct Issued {
    address: Address,
    issued_at: u64,
}

#[derive(Default)]
pub struct LoginChallenges {
    issued: Mutex<HashMap<Uuid, Issued>>,
}

impl LoginChallenges {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, address: Address, now: u64) -> Result<Challenge> {
        if address.is_zero() {
            return Err(AppError::BadRequest(
                "Cannot log in as the zero address".to_string(),
            ));
        }
        let nonce = Uuid::new_v4();
        let mut issued = self.issued.lock().await;
        if issued.len() >= MAX_CHALLENGES {
            issued.retain(|_, c| now.saturating_sub(c.issued_at) < CHALLENGE_TTL);
        }
        if issued.len() >= MAX_CHALLENGES {
            let oldest = issued
                .iter()
                .min_by_key(|(_, c)| c.issued_at)
                .map(|(nonce, _)| *nonce);
            if let Some(oldest) = oldest {
                tracing::debug!("Login challenge table full; evicting oldest challenge");
                issued.remove(&oldest);
            }
        }
        issued.insert(
            nonce,
            Issued {
                address,
                issued_at: now,
            },
        );
        Ok(Challenge {
            message: login_message(&address, &nonce),
            nonce,
        })
    }

    /// Consume `nonce` and check `signature` over its login message.
    ///
    /// The nonce is spent even when the signature is wrong.
    pub async fn redeem(&self, nonce: &Uuid, signature: &[u8; 64], now: u64) -> Result<Address> {
        let issued = self
            .issued
            .lock()
            .await
            .remove(nonce)
            .ok_or_else(|| AppError::BadRequest("Unknown or already used nonce".to_string()))?;

        if now.saturating_sub(issued.issued_at) >= CHALLENGE_TTL {
            return Err(AppError::BadRequest("Challenge expired".to_string()));
        }
        let message = login_message(&issued.address, nonce);
        if !issued.address.verify(message.as_bytes(), signature) {
            tracing::debug!(address = %issued.address, "login signature rejected");
            return Err(AppError::NotAuthenticated);
        }
        Ok(issued.address)
    }

    pub async fn outstanding(&self) -> usize {
        self.issued.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[3u8; 32])
    }

    #[tokio::test]
    async fn test_issue_and_redeem() {
        let challenges = LoginChallenges::new();
        let key = key();
        let address = Address::from(key.verifying_key());

        let challenge = challenges.issue(address, 100).await.unwrap();
        assert!(challenge.message.contains(&address.to_string()));
        let signature = key.sign(challenge.message.as_bytes()).to_bytes();

        let who = challenges
            .redeem(&challenge.nonce, &signature, 101)
            .await
            .unwrap();
        assert_eq!(who, address);
        assert_eq!(challenges.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_nonce_is_single_use() {
        let challenges = LoginChallenges::new();
        let key = key();
        let challenge = challenges
            .issue(Address::from(key.verifying_key()), 100)
            .await
            .unwrap();
        let signature = key.sign(challenge.message.as_bytes()).to_bytes();

        challenges
            .redeem(&challenge.nonce, &signature, 100)
            .await
            .unwrap();
        let err = challenges
            .redeem(&challenge.nonce, &signature, 100)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let challenges = LoginChallenges::new();
        let victim = Address::from(key().verifying_key());
        let challenge = challenges.issue(victim, 100).await.unwrap();

        let other = SigningKey::from_bytes(&[4u8; 32]);
        let signature = other.sign(challenge.message.as_bytes()).to_bytes();
        let err = challenges
            .redeem(&challenge.nonce, &signature, 100)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_authenticated");
    }

    #[tokio::test]
    async fn test_expired_challenge() {
        let challenges = LoginChallenges::new();
        let key = key();
        let challenge = challenges
            .issue(Address::from(key.verifying_key()), 100)
            .await
            .unwrap();
        let signature = key.sign(challenge.message.as_bytes()).to_bytes();
        assert!(challenges
            .redeem(&challenge.nonce, &signature, 100 + CHALLENGE_TTL)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zero_address_cannot_request_challenge() {
        let challenges = LoginChallenges::new();
        let err = challenges.issue(Address::ZERO, 100).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
        assert_eq!(challenges.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_full_table_evicts_oldest_challenge() {
        let challenges = LoginChallenges::new();
        let address = Address::from(key().verifying_key());
        let first = challenges.issue(address, 100).await.unwrap();
        for _ in 0..MAX_CHALLENGES {
            challenges.issue(address, 101).await.unwrap();
        }
        assert_eq!(challenges.outstanding().await, MAX_CHALLENGES);

        let signature = key().sign(first.message.as_bytes()).to_bytes();
        let err = challenges
            .redeem(&first.nonce, &signature, 102)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
}
