//! Users and the authenticated session consumed by the sync service.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Slot holding the persisted current session.
pub const SESSION_SLOT: &str = "current_session";

/// A catalog user. Emails are unique case-insensitively and kept lower-cased.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, email: &str, display_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: normalize_email(email),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity context for store and upload calls.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Build a session from a backend access token, trusting its claims for
    /// identity and expiry.
    pub fn from_access_token(
        access_token: String,
        refresh_token: Option<String>,
    ) -> Option<Self> {
        let claims = decode_claims(&access_token)?;
        let user_id = Uuid::parse_str(&claims.sub).ok()?;
        let expires_at = Utc.timestamp_opt(claims.exp, 0).single()?;
        Some(Self {
            user_id,
            email: claims.email.map(|e| normalize_email(&e)).unwrap_or_default(),
            access_token: Some(access_token),
            refresh_token,
            expires_at,
        })
    }
}

/// The subset of JWT claims the catalog relies on.
#[derive(Deserialize, Debug)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Read the payload segment of a JWT. The signature is not checked; the
/// backend does that on every request.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Result of an interactive (OAuth) sign-in.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInOutcome {
    Success(Session),
    Cancelled,
    Failed(String),
}

#[cfg(test)]
pub(crate) fn fake_jwt(sub: Uuid, email: &str, exp: i64) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": sub, "email": email, "exp": exp, "role": "authenticated" })
            .to_string(),
    );
    format!("{header}.{payload}.signature")
}
