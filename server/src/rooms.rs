/// Room lifecycle and join authorization.
///
/// Creates and deletes rooms, authenticates joins, resolves ownership
/// inheritance, serves the owner-only password and the short-lived QR join
/// link, and runs garbage collection of abandoned rooms.
use crate::db::models::{AutoDeletePolicy, NewRoom, QrArtifact};
use crate::db::{Database, DbPool, DeleteOutcome, InsertOutcome};
use crate::error::{RoomError, RoomResult};
use crate::qr;
use crate::tokens::TokenService;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;

/// A device may own at most this many rooms at once
pub const MAX_ROOMS_PER_DEVICE: i64 = 5;

/// Collision retries before giving up on code generation
pub const MAX_CODE_ATTEMPTS: usize = 32;

pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lifetime of a QR join artifact
pub const QR_TTL_SECONDS: i64 = 120;

/// Empty rooms older than this are garbage collected
pub const ABANDONED_ROOM_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room_code: String,
    pub password: String,
    pub token: String,
    pub auto_delete: AutoDeletePolicy,
}

#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub token: String,
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub is_owner: bool,
}

#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub member_count: i64,
    pub is_owner: bool,
}

/// Outcome of a realtime bind authorization
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub room_code: String,
    pub is_owner: bool,
    /// The token was not yet recorded and has been added to the member set
    pub added_member: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub members_pruned: usize,
    pub rooms_deleted: Vec<String>,
    pub revocations_pruned: usize,
}

/// Room codes are case-insensitive on input and stored upper-case
pub fn normalize_room_code(room_code: &str) -> String {
    room_code.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(room_code: &str) -> bool {
    room_code.len() == ROOM_CODE_LEN
        && room_code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

pub fn is_valid_password(password: &str) -> bool {
    password.len() == 6 && password.bytes().all(|b| b.is_ascii_digit())
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

fn generate_password() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

/// Compares two byte slices in constant time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn is_owner_token(candidate: Option<&str>, owner_token: &str) -> bool {
    candidate.is_some_and(|token| constant_time_eq(token.as_bytes(), owner_token.as_bytes()))
}

pub struct RoomService {
    pool: DbPool,
    tokens: Arc<TokenService>,
}

impl RoomService {
    pub fn new(pool: DbPool, tokens: Arc<TokenService>) -> Self {
        RoomService { pool, tokens }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create a room owned by a fresh token
    pub async fn create(
        &self,
        device_id: &str,
        auto_delete: AutoDeletePolicy,
        password: Option<&str>,
    ) -> RoomResult<CreatedRoom> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(RoomError::Validation("Device id required".to_string()));
        }

        let password = match password.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if is_valid_password(p) => p.to_string(),
            Some(_) => return Err(RoomError::InvalidPassword),
            None => generate_password(),
        };

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let now = Utc::now();
            let room_code = generate_room_code();
            let issued = self.tokens.mint(&room_code, device_id, now)?;

            let room = NewRoom {
                room_code: room_code.clone(),
                owner_token: issued.token.clone(),
                owner_expires_at: issued.expires_at,
                password: password.clone(),
                auto_delete,
                device_id: device_id.to_string(),
                created_at: now.timestamp_millis(),
            };

            match Database::insert_room(&self.pool, &room, MAX_ROOMS_PER_DEVICE).await? {
                InsertOutcome::Inserted => {
                    log::info!(
                        "Room {} created (auto-delete {}, attempt {})",
                        room_code,
                        auto_delete.as_str(),
                        attempt
                    );
                    return Ok(CreatedRoom {
                        room_code,
                        password,
                        token: issued.token,
                        auto_delete,
                    });
                }
                InsertOutcome::QuotaExceeded => {
                    log::info!("Room quota reached for a device");
                    return Err(RoomError::QuotaExceeded(MAX_ROOMS_PER_DEVICE));
                }
                InsertOutcome::CodeTaken => {
                    log::debug!("Room code collision on attempt {}", attempt);
                }
            }
        }

        log::error!("No free room code after {} attempts", MAX_CODE_ATTEMPTS);
        Err(RoomError::CodeSpaceExhausted)
    }

    /// Authenticate with code and password and mint a membership token.
    ///
    /// When the room has no members and its owner token no longer resolves,
    /// the joiner inherits ownership.
    pub async fn join(
        &self,
        room_code: &str,
        password: &str,
        device_id: Option<&str>,
    ) -> RoomResult<JoinedRoom> {
        let room_code = normalize_room_code(room_code);
        if room_code.is_empty() || password.is_empty() {
            return Err(RoomError::Validation(
                "Room code and password required".to_string(),
            ));
        }

        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;

        if !constant_time_eq(room.password.as_bytes(), password.as_bytes()) {
            return Err(RoomError::InvalidCredentials);
        }

        let now = Utc::now();
        let issued = self
            .tokens
            .mint(&room_code, device_id.unwrap_or_default(), now)?;

        let owner_lapsed = room.owner_expires_at <= now.timestamp_millis()
            || !self.tokens.is_live(&room.owner_token, now).await;
        let claim_from = owner_lapsed.then_some(room.owner_token.as_str());

        let is_owner = Database::join_room(
            &self.pool,
            &room_code,
            &issued.token,
            issued.expires_at,
            claim_from,
            now.timestamp_millis(),
        )
        .await?
        .ok_or(RoomError::NotFound)?;

        if is_owner {
            log::info!("Ownership of room {} passed to a new joiner", room_code);
        } else {
            log::info!("New member joined room {}", room_code);
        }

        Ok(JoinedRoom {
            token: issued.token,
            room_code,
            auto_delete: room.auto_delete,
            is_owner,
        })
    }

    /// Read-only room summary
    pub async fn room_info(&self, room_code: &str, token: Option<&str>) -> RoomResult<RoomInfo> {
        let room_code = normalize_room_code(room_code);
        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;
        let member_count = Database::member_count(&self.pool, &room_code).await?;

        Ok(RoomInfo {
            is_owner: is_owner_token(token, &room.owner_token),
            room_code,
            auto_delete: room.auto_delete,
            member_count,
        })
    }

    /// Owner-only plaintext password
    pub async fn password(&self, room_code: &str, token: Option<&str>) -> RoomResult<String> {
        let room_code = normalize_room_code(room_code);
        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;

        if !is_owner_token(token, &room.owner_token) {
            return Err(RoomError::Forbidden);
        }

        Ok(room.password)
    }

    pub async fn qr(&self, room_code: &str, origin: &str) -> RoomResult<QrArtifact> {
        self.qr_at(room_code, origin, Utc::now()).await
    }

    /// Return the live QR artifact, regenerating it first if it is missing or expired
    pub async fn qr_at(
        &self,
        room_code: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> RoomResult<QrArtifact> {
        let room_code = normalize_room_code(room_code);
        let now_ms = now.timestamp_millis();

        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;

        if let Some(artifact) = room.qr.filter(|qr| qr.expires_at > now_ms) {
            return Ok(artifact);
        }

        let url = qr::join_url(origin, &room_code, &room.password);
        let artifact = QrArtifact {
            image: qr::render_data_url(&url)?,
            url,
            expires_at: (now + Duration::seconds(QR_TTL_SECONDS)).timestamp_millis(),
        };

        if Database::store_qr_if_stale(&self.pool, &room_code, &artifact, now_ms).await? {
            log::debug!("QR artifact refreshed for room {}", room_code);
            return Ok(artifact);
        }

        // Lost the refresh race, or the room is gone
        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;
        Ok(room
            .qr
            .filter(|qr| qr.expires_at > now_ms)
            .unwrap_or(artifact))
    }

    /// Owner-only deletion. Returns the released member tokens.
    pub async fn delete(&self, room_code: &str, token: Option<&str>) -> RoomResult<Vec<String>> {
        let room_code = normalize_room_code(room_code);

        match Database::delete_room(&self.pool, &room_code, token.unwrap_or_default()).await? {
            DeleteOutcome::Deleted(tokens) => {
                self.tokens.revoke(tokens.iter().cloned()).await;
                log::info!(
                    "Room {} deleted by owner, {} tokens released",
                    room_code,
                    tokens.len()
                );
                Ok(tokens)
            }
            DeleteOutcome::NotOwner => Err(RoomError::Forbidden),
            DeleteOutcome::NotFound => Err(RoomError::NotFound),
        }
    }

    /// Decide whether a realtime connection may bind to a room with `token`.
    ///
    /// Admits live tokens already in the member set, and the owner token even
    /// after it expired. Nothing else self-admits.
    pub async fn authorize_session(&self, room_code: &str, token: &str) -> RoomResult<SessionGrant> {
        let room_code = normalize_room_code(room_code);
        let room = Database::get_room(&self.pool, &room_code)
            .await?
            .ok_or(RoomError::NotFound)?;

        let now = Utc::now();
        let is_owner = is_owner_token(Some(token), &room.owner_token);
        let is_member = Database::is_member(&self.pool, &room_code, token).await?;
        let claims = self.tokens.resolve(token, now).await;
        let live_member = is_member && claims.as_ref().is_some_and(|c| c.room_code == room_code);

        if !is_owner && !live_member {
            return Err(RoomError::InvalidToken);
        }

        let mut added_member = false;
        if !is_member {
            let expires_at = claims
                .map(|c| c.expires_at)
                .unwrap_or(room.owner_expires_at);
            added_member = Database::add_member(
                &self.pool,
                &room_code,
                token,
                expires_at,
                now.timestamp_millis(),
            )
            .await?;
        }

        Ok(SessionGrant {
            room_code,
            is_owner,
            added_member,
        })
    }

    /// Current auto-delete policy of a room
    pub async fn auto_delete_policy(&self, room_code: &str) -> RoomResult<AutoDeletePolicy> {
        let room = Database::get_room(&self.pool, &normalize_room_code(room_code))
            .await?
            .ok_or(RoomError::NotFound)?;
        Ok(room.auto_delete)
    }

    /// Prune lapsed members, then delete rooms that are empty and older than a day
    pub async fn collect_garbage(&self, now: DateTime<Utc>) -> RoomResult<GcReport> {
        let members_pruned =
            Database::prune_expired_members(&self.pool, now.timestamp_millis()).await?;

        let cutoff = now - Duration::hours(ABANDONED_ROOM_HOURS);
        let rooms_deleted =
            Database::delete_abandoned_rooms(&self.pool, cutoff.timestamp_millis()).await?;

        let revocations_pruned = self.tokens.prune_revoked(now).await;

        if members_pruned > 0 || !rooms_deleted.is_empty() {
            log::info!(
                "Garbage collection: {} lapsed members pruned, {} abandoned rooms deleted",
                members_pruned,
                rooms_deleted.len()
            );
        }

        Ok(GcReport {
            members_pruned,
            rooms_deleted,
            revocations_pruned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn service() -> RoomService {
        let tokens = Arc::new(TokenService::new(b"unit-test", Duration::days(30)));
        RoomService::new(create_test_pool(), tokens)
    }

    #[test]
    fn test_generated_codes_are_well_formed() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "bad code {}", code);
        }
    }

    #[test]
    fn test_generated_passwords_are_six_digits() {
        for _ in 0..100 {
            assert!(is_valid_password(&generate_password()));
        }
    }

    #[test]
    fn test_password_validation() {
        assert!(is_valid_password("000123"));
        assert!(!is_valid_password("12345"));
        assert!(!is_valid_password("1234567"));
        assert!(!is_valid_password("12a456"));
        assert!(!is_valid_password("１２３４５６"));
    }

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code(" abc123 "), "ABC123");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"654321"));
        assert!(!constant_time_eq(b"123456", b"12345"));
    }

    #[tokio::test]
    async fn test_create_requires_device() {
        let rooms = service();
        let err = rooms.create("  ", AutoDeletePolicy::OneHour, None).await.unwrap_err();
        assert!(matches!(err, RoomError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_password() {
        let rooms = service();
        let err = rooms
            .create("dev", AutoDeletePolicy::OneHour, Some("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoomError::InvalidPassword));
        assert_eq!(Database::count_rooms_for_device(rooms.pool(), "dev").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_uses_supplied_password() {
        let rooms = service();
        let created = rooms
            .create("dev", AutoDeletePolicy::OneHour, Some("424242"))
            .await
            .unwrap();
        assert_eq!(created.password, "424242");
    }

    #[tokio::test]
    async fn test_owner_token_resolves_to_room() {
        let rooms = service();
        let created = rooms.create("dev", AutoDeletePolicy::OneHour, None).await.unwrap();
        let claims = rooms
            .tokens()
            .resolve(&created.token, Utc::now())
            .await
            .expect("owner token should resolve");
        assert_eq!(claims.room_code, created.room_code);
        assert_eq!(claims.device_id, "dev");
    }

    #[tokio::test]
    async fn test_qr_regenerates_after_expiry() {
        let rooms = service();
        let created = rooms.create("dev", AutoDeletePolicy::OneHour, None).await.unwrap();
        let now = Utc::now();

        let first = rooms.qr_at(&created.room_code, "http://host", now).await.unwrap();
        let again = rooms
            .qr_at(&created.room_code, "http://host", now + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(first, again);

        let later = now + Duration::seconds(QR_TTL_SECONDS + 1);
        let refreshed = rooms.qr_at(&created.room_code, "http://host", later).await.unwrap();
        assert!(refreshed.expires_at > first.expires_at);
        assert!(refreshed.expires_at > later.timestamp_millis());
    }

    #[tokio::test]
    async fn test_authorize_session_rejects_foreign_token() {
        let rooms = service();
        let a = rooms.create("dev", AutoDeletePolicy::OneHour, None).await.unwrap();
        let b = rooms.create("dev", AutoDeletePolicy::OneHour, None).await.unwrap();

        let err = rooms.authorize_session(&a.room_code, &b.token).await.unwrap_err();
        assert!(matches!(err, RoomError::InvalidToken));
        assert_eq!(Database::member_count(rooms.pool(), &a.room_code).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_authorize_session_readmits_owner() {
        let rooms = service();
        let created = rooms.create("dev", AutoDeletePolicy::OneHour, None).await.unwrap();

        // The owner's member row lapses, the owner token still admits
        Database::prune_expired_members(rooms.pool(), i64::MAX).await.unwrap();
        let grant = rooms
            .authorize_session(&created.room_code, &created.token)
            .await
            .unwrap();
        assert!(grant.is_owner);
        assert!(grant.added_member);
        assert_eq!(Database::member_count(rooms.pool(), &created.room_code).await.unwrap(), 1);
    }
}
