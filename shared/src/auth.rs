//! Caller identity: signed session tokens, password hashing, and the role
//! gate every protected operation goes through.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::MAX_SESSION_TTL_HOURS;
use crate::error::{AppError, AppResult};
use crate::store::{self, Store};
use crate::types::{Role, User};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

/// Issues and verifies `base64url(claims).base64url(hmac_sha256(claims))` tokens.
#[derive(Clone)]
pub struct SessionKeys {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// `ttl_hours` is clamped to `1..=MAX_SESSION_TTL_HOURS`.
    pub fn new(secret: impl AsRef<[u8]>, ttl_hours: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl: Duration::hours(ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS)),
        }
    }

    pub fn issue(&self, user: &User) -> AppResult<(String, DateTime<Utc>)> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(&self, user: &User, now: DateTime<Utc>) -> AppResult<(String, DateTime<Utc>)> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::Credentials("session expiry is out of range".to_string()))?;
        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| AppError::Credentials(format!("failed to encode session claims: {}", e)))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature =
            URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?.finalize().into_bytes());

        Ok((format!("{}.{}", payload, signature), expires_at))
    }

    /// Returns the user id the token was issued to.
    pub fn verify(&self, token: &str) -> AppResult<String> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<String> {
        let invalid = || AppError::Authentication("Invalid session token.".to_string());

        let (payload, signature) = token.trim().split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        self.sign(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| invalid())?;

        let payload = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;

        let expires_at = Utc.timestamp_opt(claims.exp, 0).single().ok_or_else(invalid)?;
        if expires_at <= now {
            return Err(AppError::Authentication(
                "Session expired. Please log in again.".to_string(),
            ));
        }
        Ok(claims.sub)
    }

    fn sign(&self, payload: &[u8]) -> AppResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Credentials(format!("invalid session key: {}", e)))?;
        mac.update(payload);
        Ok(mac)
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Credentials(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// The authenticated caller, one variant per role. Built once at the
/// authorization boundary and passed explicitly into every operation.
#[derive(Debug, Clone)]
pub enum Caller {
    HeadOffice(User),
    BranchAdmin { user: User, branch: String },
    Donor(User),
}

impl Caller {
    pub fn from_user(user: User) -> AppResult<Caller> {
        match user.role {
            Role::HeadOfficeAdmin => Ok(Caller::HeadOffice(user)),
            Role::BranchAdmin => match user.branch.clone() {
                Some(branch) => Ok(Caller::BranchAdmin { user, branch }),
                None => Err(AppError::forbidden("Branch admin is not associated with any branch.")),
            },
            Role::Donor => Ok(Caller::Donor(user)),
        }
    }

    pub fn user(&self) -> &User {
        match self {
            Caller::HeadOffice(user) | Caller::Donor(user) => user,
            Caller::BranchAdmin { user, .. } => user,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user().id
    }

    /// Branch the caller administers, if any.
    pub fn branch(&self) -> Option<&str> {
        match self {
            Caller::BranchAdmin { branch, .. } => Some(branch),
            _ => None,
        }
    }

    pub fn require_head_office(&self) -> AppResult<()> {
        match self {
            Caller::HeadOffice(_) => Ok(()),
            _ => Err(AppError::forbidden("Only head office can perform this action.")),
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        match self {
            Caller::HeadOffice(_) | Caller::BranchAdmin { .. } => Ok(()),
            Caller::Donor(_) => {
                Err(AppError::forbidden("Only administrators can perform this action."))
            }
        }
    }

    /// Head office manages every branch; a branch admin only their own.
    pub fn manages_branch(&self, branch_id: &str) -> bool {
        match self {
            Caller::HeadOffice(_) => true,
            Caller::BranchAdmin { branch, .. } => branch == branch_id,
            Caller::Donor(_) => false,
        }
    }
}

/// Resolves a verified user id to the stored user.
pub async fn resolve_user(store: &dyn Store, user_id: Option<&str>) -> AppResult<User> {
    let user_id = user_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AppError::Authentication("Authentication required. User ID missing.".to_string())
        })?;

    store::fetch::<User>(store, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found."))
}

pub async fn resolve_caller(store: &dyn Store, user_id: Option<&str>) -> AppResult<Caller> {
    let user = resolve_user(store, user_id).await?;
    if !user.is_active {
        tracing::warn!("Rejected request from deactivated user {}", user.id);
        return Err(AppError::forbidden("This account has been deactivated."));
    }
    Caller::from_user(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::memory::MemoryStore;

    fn user(role: Role, branch: Option<&str>) -> User {
        User {
            id: "u-1".into(),
            name: "A".into(),
            email: "a@x.com".into(),
            password_hash: String::new(),
            role,
            branch: branch.map(str::to_string),
            address: None,
            phone_number: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn keys() -> SessionKeys {
        SessionKeys::new("0123456789abcdef0123456789abcdef", 12)
    }

    #[test]
    fn issued_tokens_verify_to_their_subject() {
        let (token, expires_at) = keys().issue(&user(Role::Donor, None)).unwrap();
        assert!(expires_at > Utc::now());
        assert_eq!(keys().verify(&token).unwrap(), "u-1");
    }

    #[test]
    fn oversized_ttl_is_clamped_to_a_year() {
        let keys = SessionKeys::new("0123456789abcdef0123456789abcdef", i64::MAX);
        let now = Utc::now();
        let (token, expires_at) = keys.issue_at(&user(Role::Donor, None), now).unwrap();
        assert_eq!(expires_at - now, Duration::hours(MAX_SESSION_TTL_HOURS));
        assert_eq!(keys.verify(&token).unwrap(), "u-1");
    }

    #[test]
    fn expiry_past_the_calendar_is_an_error_not_a_panic() {
        let err = keys()
            .issue_at(&user(Role::Donor, None), DateTime::<Utc>::MAX_UTC)
            .unwrap_err();
        assert!(matches!(err, AppError::Credentials(_)));
        assert_eq!(err.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let (token, _) = keys().issue(&user(Role::Donor, None)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD
            .encode(br#"{"sub":"admin","role":"HEAD_OFFICE_ADMIN","exp":99999999999}"#);
        let forged = format!("{}.{}", forged_claims, signature);

        assert_eq!(keys().verify(&forged).unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(keys().verify("u-1").unwrap_err().kind(), ErrorKind::Authentication);
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let other = SessionKeys::new("ffffffffffffffffffffffffffffffff", 12);
        let (token, _) = other.issue(&user(Role::Donor, None)).unwrap();
        assert!(keys().verify(&token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issued = Utc::now() - Duration::hours(13);
        let (token, _) = keys().issue_at(&user(Role::Donor, None), issued).unwrap();
        let err = keys().verify(&token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn password_hashes_verify_only_the_original_password() {
        let hash = hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
        assert!(!verify_password("secret1", "not-a-hash"));
    }

    #[test]
    fn branch_admin_without_branch_is_forbidden() {
        let err = Caller::from_user(user(Role::BranchAdmin, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let caller = Caller::from_user(user(Role::BranchAdmin, Some("b-1"))).unwrap();
        assert_eq!(caller.branch(), Some("b-1"));
        assert!(caller.manages_branch("b-1"));
        assert!(!caller.manages_branch("b-2"));
        assert!(caller.require_admin().is_ok());
        assert!(caller.require_head_office().is_err());
    }

    #[tokio::test]
    async fn resolve_user_distinguishes_missing_identity_from_unknown_user() {
        let store = MemoryStore::new();
        let missing = resolve_user(&store, None).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Authentication);

        let blank = resolve_user(&store, Some("  ")).await.unwrap_err();
        assert_eq!(blank.kind(), ErrorKind::Authentication);

        let unknown = resolve_user(&store, Some("nobody")).await.unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deactivated_users_cannot_act() {
        let store = MemoryStore::new();
        let mut inactive = user(Role::Donor, None);
        inactive.is_active = false;
        store::insert(&store, &inactive).await.unwrap();

        let err = resolve_caller(&store, Some("u-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }
}
