//! Sign-in state and the identity providers behind it.
//!
//! [`AuthService`] owns the current [`Session`]: it restores it from the
//! key-value store at startup, replaces it on register/login/OAuth and clears
//! it on logout. The sync service only ever sees it through [`SessionSource`].

use crate::{
    errors::{AuthError, EMPTY_CREDENTIALS, INVALID_EMAIL, SHORT_PASSWORD},
    models::user::{SESSION_SLOT, Session, SignInOutcome, User, normalize_email},
    services::{
        backend_client::{BackendClient, BackendFailure},
        kv_store::KeyValueStore,
    },
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Slot holding locally registered accounts.
pub const ACCOUNTS_SLOT: &str = "luxury_collecting_users";

const MIN_PASSWORD_LEN: usize = 6;

/// Anything that can report who is signed in right now.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// The active session, or `None` when absent or expired.
    async fn current_session(&self) -> Option<Session>;
}

/// A completed sign-in.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedIn {
    pub session: Session,
    pub user: User,
}

/// Query parameters delivered to the OAuth redirect.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OAuthCallback {
    pub auth_code: Option<String>,
    pub code_verifier: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<SignedIn, AuthError>;

    async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AuthError>;

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str)
    -> Result<SignedIn, AuthError>;

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;
}

/// Apply the input rules shared by every provider.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AuthError::InvalidInput(EMPTY_CREDENTIALS));
    }
    if !email.contains('@') {
        return Err(AuthError::InvalidInput(INVALID_EMAIL));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(SHORT_PASSWORD));
    }
    Ok(())
}

pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    kv: KeyValueStore,
    current: RwLock<Option<Session>>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>, kv: KeyValueStore) -> Self {
        Self {
            provider,
            kv,
            current: RwLock::new(None),
        }
    }

    /// Load the persisted session, discarding it when expired or unreadable.
    pub async fn restore(&self) -> Option<Session> {
        let restored = match self.kv.get::<Session>(SESSION_SLOT).await {
            Ok(Some(session)) if session.is_valid() => Some(session),
            Ok(Some(_)) => {
                info!("persisted session expired; signing out");
                self.forget_persisted().await;
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!("discarding unreadable persisted session: {}", err);
                self.forget_persisted().await;
                None
            }
        };
        *self.current.write().await = restored.clone();
        restored
    }

    #[instrument(skip(self, password, display_name))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<SignedIn, AuthError> {
        validate_credentials(email, password)?;
        let signed_in = self
            .provider
            .register(email, password, display_name)
            .await?;
        self.activate(&signed_in.session).await?;
        info!(user = %signed_in.user.id, "registered");
        Ok(signed_in)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(EMPTY_CREDENTIALS));
        }
        let signed_in = self.provider.login(email, password).await?;
        self.activate(&signed_in.session).await?;
        info!(user = %signed_in.user.id, "signed in");
        Ok(signed_in)
    }

    /// Finish an interactive sign-in started outside this process.
    pub async fn complete_oauth(&self, callback: OAuthCallback) -> SignInOutcome {
        if let Some(error) = callback.error.as_deref() {
            if error == "access_denied" {
                return SignInOutcome::Cancelled;
            }
            let reason = callback
                .error_description
                .clone()
                .unwrap_or_else(|| error.to_string());
            return SignInOutcome::Failed(reason);
        }
        let (Some(code), Some(verifier)) = (
            callback.auth_code.as_deref(),
            callback.code_verifier.as_deref(),
        ) else {
            return SignInOutcome::Cancelled;
        };

        match self.provider.exchange_code(code, verifier).await {
            Ok(signed_in) => match self.activate(&signed_in.session).await {
                Ok(()) => SignInOutcome::Success(signed_in.session),
                Err(err) => SignInOutcome::Failed(err.to_string()),
            },
            Err(err) => SignInOutcome::Failed(err.to_string()),
        }
    }

    /// Drop the session locally; a failing remote sign-out is only logged.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let previous = self.current.write().await.take();
        if let Some(session) = previous {
            if let Err(err) = self.provider.sign_out(&session).await {
                warn!("remote sign-out failed, continuing: {}", err);
            }
        }
        self.kv.remove(SESSION_SLOT).await?;
        Ok(())
    }

    pub fn backend_tag(&self) -> &'static str {
        self.provider.backend_tag()
    }

    async fn activate(&self, session: &Session) -> Result<(), AuthError> {
        self.kv.set(SESSION_SLOT, session).await?;
        *self.current.write().await = Some(session.clone());
        Ok(())
    }

    async fn forget_persisted(&self) {
        if let Err(err) = self.kv.remove(SESSION_SLOT).await {
            warn!("could not clear persisted session: {}", err);
        }
    }
}

#[async_trait]
impl SessionSource for AuthService {
    async fn current_session(&self) -> Option<Session> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|session| session.is_valid())
            .cloned()
    }
}

/// An account created on this device only.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct LocalAccount {
    user: User,
    /// Argon2id PHC string.
    password_hash: String,
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Unavailable(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)
}

/// Accounts kept in a key-value slot. Gates the on-device catalog only;
/// there is no server to verify against.
pub struct LocalIdentity {
    kv: KeyValueStore,
    session_ttl: Duration,
}

impl LocalIdentity {
    pub fn new(kv: KeyValueStore, session_ttl: Duration) -> Self {
        Self { kv, session_ttl }
    }

    fn session_for(&self, user: &User) -> Session {
        Session {
            user_id: user.id,
            email: user.email.clone(),
            access_token: None,
            refresh_token: None,
            expires_at: Utc::now() + self.session_ttl,
        }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<SignedIn, AuthError> {
        let user = User::new(Uuid::new_v4(), email, display_name);
        let account = LocalAccount {
            user: user.clone(),
            password_hash: hash_password(password)?,
        };
        self.kv
            .update(ACCOUNTS_SLOT, |accounts: &mut Vec<LocalAccount>| {
                if accounts.iter().any(|a| a.user.email == account.user.email) {
                    return Err(AuthError::EmailTaken);
                }
                accounts.push(account);
                Ok(())
            })
            .await?;
        Ok(SignedIn {
            session: self.session_for(&user),
            user,
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let email = normalize_email(email);
        let accounts: Vec<LocalAccount> = self.kv.get(ACCOUNTS_SLOT).await?.unwrap_or_default();
        let account = accounts
            .into_iter()
            .find(|a| a.user.email == email)
            .ok_or(AuthError::InvalidCredentials)?;
        verify_password(password, &account.password_hash)?;
        Ok(SignedIn {
            session: self.session_for(&account.user),
            user: account.user,
        })
    }

    async fn exchange_code(&self, _code: &str, _verifier: &str) -> Result<SignedIn, AuthError> {
        Err(AuthError::Unavailable(
            "interactive sign-in needs a hosted backend".into(),
        ))
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl AuthUser {
    fn into_user(self, fallback_email: &str) -> User {
        let display_name = self
            .user_metadata
            .get("display_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let mut user = User::new(
            self.id,
            self.email.as_deref().unwrap_or(fallback_email),
            display_name,
        );
        if let Some(created) = self.created_at {
            user.created_at = created;
        }
        if let Some(updated) = self.updated_at {
            user.updated_at = updated;
        }
        user
    }
}

/// Body returned by signup and token endpoints. Signup answers with a bare
/// user object and no tokens while email confirmation is pending.
#[derive(Deserialize, Debug)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
}

/// Identity held by the hosted auth service.
pub struct RemoteIdentity {
    client: BackendClient,
}

impl RemoteIdentity {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    async fn post_auth(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<AuthResponse, BackendFailure> {
        let url = self.client.url(path)?;
        let response = self
            .client
            .send(self.client.anonymous(Method::POST, url).json(&body))
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendFailure::Decode(e.to_string()))
    }

    async fn finish(&self, response: AuthResponse, email: &str) -> Result<SignedIn, AuthError> {
        let Some(access_token) = response.access_token else {
            return Err(AuthError::ConfirmationRequired);
        };
        let session = Session::from_access_token(access_token, response.refresh_token)
            .ok_or_else(|| AuthError::Unavailable("malformed access token".into()))?;
        let user = match response.user {
            Some(user) => user.into_user(email),
            None => User::new(session.user_id, &session.email, None),
        };
        self.sync_profile(&user, &session).await;
        Ok(SignedIn { session, user })
    }

    /// Best-effort upsert of the profile row. Never blocks sign-in.
    async fn sync_profile(&self, user: &User, session: &Session) {
        let Some(token) = session.access_token.as_deref() else {
            return;
        };
        let url = match self.client.table_url(&self.client.config.profiles_table, &[]) {
            Ok(url) => url,
            Err(err) => {
                warn!("profile sync skipped: {}", err);
                return;
            }
        };
        let request = self
            .client
            .authorized(Method::POST, url, token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({
                "id": user.id,
                "email": user.email,
                "display_name": user.display_name,
                "is_active": user.is_active,
                "created_at": user.created_at,
                "updated_at": Utc::now(),
            }));
        match self.client.send(request).await {
            Ok(_) => debug!(user = %user.id, "profile synced"),
            Err(err) => warn!(user = %user.id, "profile sync failed, ignoring: {}", err),
        }
    }
}

fn signup_error(failure: BackendFailure) -> AuthError {
    match failure {
        BackendFailure::Status(StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, body)
            if body.contains("already") =>
        {
            AuthError::EmailTaken
        }
        other => AuthError::Unavailable(other.to_string()),
    }
}

fn token_error(failure: BackendFailure) -> AuthError {
    match failure {
        BackendFailure::Unauthorized | BackendFailure::Status(StatusCode::BAD_REQUEST, _) => {
            AuthError::InvalidCredentials
        }
        other => AuthError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentity {
    fn backend_tag(&self) -> &'static str {
        "remote"
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<SignedIn, AuthError> {
        let body = json!({
            "email": normalize_email(email),
            "password": password,
            "data": { "display_name": display_name },
        });
        let response = self
            .post_auth("auth/v1/signup", body)
            .await
            .map_err(signup_error)?;
        self.finish(response, email).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let body = json!({ "email": normalize_email(email), "password": password });
        let response = self
            .post_auth("auth/v1/token?grant_type=password", body)
            .await
            .map_err(token_error)?;
        self.finish(response, email).await
    }

    async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<SignedIn, AuthError> {
        let body = json!({ "auth_code": auth_code, "code_verifier": code_verifier });
        let response = self
            .post_auth("auth/v1/token?grant_type=pkce", body)
            .await
            .map_err(token_error)?;
        self.finish(response, "").await
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let Some(token) = session.access_token.as_deref() else {
            return Ok(());
        };
        let url = self
            .client
            .url("auth/v1/logout")
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        self.client
            .send(self.client.authorized(Method::POST, url, token))
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
