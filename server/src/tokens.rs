/// Membership token minting and validation.
///
/// Tokens are self-describing: `base64url(claims).base64url(hmac)`. The claims
/// carry the room code, the issuing device and the expiry, so validity can be
/// recomputed from the token alone. The only in-process state is a revocation
/// map for tokens of deleted rooms, which is pruned once those tokens would
/// have expired anyway.
use crate::error::{RoomError, RoomResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default validity window for membership tokens
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Claims embedded in every token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "r")]
    pub room_code: String,
    #[serde(rename = "d")]
    pub device_id: String,
    /// Expiry in epoch milliseconds
    #[serde(rename = "e")]
    pub expires_at: i64,
    #[serde(rename = "n")]
    pub nonce: String,
}

/// A freshly minted token together with its expiry (epoch ms)
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

pub struct TokenService {
    secret: Vec<u8>,
    ttl: Duration,
    revoked: RwLock<HashMap<String, i64>>,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        TokenService {
            secret: secret.to_vec(),
            ttl,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// Tokens signed with a per-process secret stop resolving after a restart.
    pub fn with_random_secret(ttl: Duration) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(&secret, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn mac(&self) -> RoomResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| RoomError::Signing(e.to_string()))
    }

    /// Mint a new token for `device_id` in `room_code`
    pub fn mint(&self, room_code: &str, device_id: &str, now: DateTime<Utc>) -> RoomResult<IssuedToken> {
        let claims = TokenClaims {
            room_code: room_code.to_string(),
            device_id: device_id.to_string(),
            expires_at: (now + self.ttl).timestamp_millis(),
            nonce: Uuid::new_v4().simple().to_string(),
        };

        let payload = serde_json::to_vec(&claims).map_err(|e| RoomError::Signing(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{}.{}", payload, signature),
            expires_at: claims.expires_at,
        })
    }

    /// Verify the signature and return the claims, ignoring expiry and revocation
    pub fn decode(&self, token: &str) -> Option<TokenClaims> {
        let (payload, signature) = token.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let mut mac = self.mac().ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let claims = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&claims).ok()
    }

    /// Claims of a token that is correctly signed, unexpired and not revoked.
    /// `None` means the token is absent from the service as far as callers care.
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Option<TokenClaims> {
        let claims = self.decode(token)?;
        if claims.expires_at <= now.timestamp_millis() {
            return None;
        }
        if self.revoked.read().await.contains_key(token) {
            return None;
        }
        Some(claims)
    }

    pub async fn is_live(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.resolve(token, now).await.is_some()
    }

    /// Release tokens belonging to a deleted room
    pub async fn revoke<I>(&self, tokens: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut revoked = self.revoked.write().await;
        for token in tokens {
            // Tokens that do not decode can never resolve
            if let Some(claims) = self.decode(&token) {
                revoked.insert(token, claims.expires_at);
            }
        }
    }

    /// Drop revocation entries whose tokens have expired. Returns how many were dropped.
    pub async fn prune_revoked(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let mut revoked = self.revoked.write().await;
        let before = revoked.len();
        revoked.retain(|_, expires_at| *expires_at > now_ms);
        before - revoked.len()
    }

    pub async fn revoked_count(&self) -> usize {
        self.revoked.read().await.len()
    }
}
