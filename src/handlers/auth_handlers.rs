//! Sign-in endpoints. Tokens stay inside the service; responses only carry a
//! session summary.

use crate::{
    errors::{AppError, CatalogError},
    models::user::{Session, SignInOutcome, User},
    services::auth_service::{OAuthCallback, SessionSource, SignedIn},
    state::AppState,
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// What clients get to see of a session.
#[derive(Debug, Serialize, PartialEq)]
pub struct SessionSummary {
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl SessionSummary {
    fn new(session: &Session, backend: &'static str, user: Option<User>) -> Self {
        Self {
            user_id: session.user_id,
            email: session.email.clone(),
            expires_at: session.expires_at,
            backend,
            user,
        }
    }

    fn signed_in(signed_in: SignedIn, backend: &'static str) -> Self {
        Self::new(&signed_in.session, backend, Some(signed_in.user))
    }
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let signed_in = state
        .auth
        .register(&req.email, &req.password, req.display_name)
        .await
        .map_err(|e| state.auth_error(e))?;
    state.view.reset().await;
    Ok((
        StatusCode::CREATED,
        Json(SessionSummary::signed_in(signed_in, state.auth.backend_tag())),
    ))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionSummary>, AppError> {
    let signed_in = state
        .auth
        .login(&req.email, &req.password)
        .await
        .map_err(|e| state.auth_error(e))?;
    state.view.reset().await;
    Ok(Json(SessionSummary::signed_in(
        signed_in,
        state.auth.backend_tag(),
    )))
}

/// `POST /auth/oauth/callback`
pub async fn oauth_callback(
    State(state): State<AppState>,
    Json(callback): Json<OAuthCallback>,
) -> Response {
    match state.auth.complete_oauth(callback).await {
        SignInOutcome::Success(session) => {
            state.view.reset().await;
            Json(SessionSummary::new(&session, state.auth.backend_tag(), None)).into_response()
        }
        SignInOutcome::Cancelled => {
            (StatusCode::OK, Json(json!({ "status": "cancelled" }))).into_response()
        }
        SignInOutcome::Failed(reason) => {
            tracing::warn!("oauth sign-in failed: {}", reason);
            AppError::new(StatusCode::UNAUTHORIZED, reason).into_response()
        }
    }
}

/// `POST /auth/logout`
pub async fn logout(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.auth.logout().await.map_err(|e| state.auth_error(e))?;
    state.view.reset().await;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/session`
pub async fn current_session(
    State(state): State<AppState>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = state
        .auth
        .current_session()
        .await
        .ok_or_else(|| state.catalog_error(CatalogError::NotAuthenticated))?;
    Ok(Json(SessionSummary::new(
        &session,
        state.auth.backend_tag(),
        None,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn summary_never_exposes_tokens() {
        let session = Session {
            user_id: Uuid::new_v4(),
            email: "a@b.co".into(),
            access_token: Some("secret-access".into()),
            refresh_token: Some("secret-refresh".into()),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let body = serde_json::to_string(&SessionSummary::new(&session, "remote", None)).unwrap();
        assert!(!body.contains("secret"));
        assert!(body.contains("\"backend\":\"remote\""));
        assert!(!body.contains("\"user\""));
    }
}
