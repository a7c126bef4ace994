use crate::services::kv_store::KvError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Language used for messages shown to the end user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    En,
    ZhCn,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "en" | "en-us" => Ok(Locale::En),
            "zh" | "zh-cn" => Ok(Locale::ZhCn),
            other => Err(format!("unsupported locale `{other}`")),
        }
    }
}

/// Failures of the item store, upload pipeline and sync service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("no valid session")]
    NotAuthenticated,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("image upload failed: {0}")]
    UploadFailed(String),
    #[error("image bytes could not be decoded")]
    DecodeFailed,
    #[error("invalid item: {0}")]
    InvalidItem(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

impl CatalogError {
    pub fn user_message(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (CatalogError::NotAuthenticated, Locale::En) => "Please sign in again.",
            (CatalogError::NotAuthenticated, Locale::ZhCn) => "请重新登录",
            (CatalogError::StoreUnavailable(_), Locale::En) => {
                "Your collection could not be reached. Please try again later."
            }
            (CatalogError::StoreUnavailable(_), Locale::ZhCn) => "无法连接到收藏数据，请稍后再试",
            (CatalogError::UploadFailed(_), Locale::En) => "The photo could not be uploaded.",
            (CatalogError::UploadFailed(_), Locale::ZhCn) => "图片上传失败",
            (CatalogError::DecodeFailed, Locale::En) => "The selected photo could not be read.",
            (CatalogError::DecodeFailed, Locale::ZhCn) => "无法读取所选图片",
            (CatalogError::InvalidItem(_), Locale::En) => "Please check the item details.",
            (CatalogError::InvalidItem(_), Locale::ZhCn) => "请检查物品信息",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CatalogError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            CatalogError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CatalogError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            CatalogError::DecodeFailed | CatalogError::InvalidItem(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }
}

impl From<KvError> for CatalogError {
    fn from(err: KvError) -> Self {
        CatalogError::StoreUnavailable(err.to_string())
    }
}

/// Failures of registration, login and session handling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("email already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email confirmation required before sign-in")]
    ConfirmationRequired,
    #[error("auth backend unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn user_message(&self, locale: Locale) -> String {
        match (self, locale) {
            (AuthError::InvalidInput(reason), Locale::En) => reason.to_string(),
            (AuthError::InvalidInput(reason), Locale::ZhCn) => match *reason {
                EMPTY_CREDENTIALS => "邮箱和密码不能为空".into(),
                INVALID_EMAIL => "请输入有效的邮箱地址".into(),
                SHORT_PASSWORD => "密码长度至少为6位".into(),
                other => other.to_string(),
            },
            (AuthError::EmailTaken, Locale::En) => "This email is already registered.".into(),
            (AuthError::EmailTaken, Locale::ZhCn) => "该邮箱已被注册".into(),
            (AuthError::InvalidCredentials, Locale::En) => "Incorrect email or password.".into(),
            (AuthError::InvalidCredentials, Locale::ZhCn) => "邮箱或密码错误".into(),
            (AuthError::ConfirmationRequired, Locale::En) => {
                "Check your inbox to confirm your email, then sign in.".into()
            }
            (AuthError::ConfirmationRequired, Locale::ZhCn) => "请先在邮箱中完成验证后再登录".into(),
            (AuthError::Unavailable(_), Locale::En) => {
                "Sign-in is unavailable right now. Please try again later.".into()
            }
            (AuthError::Unavailable(_), Locale::ZhCn) => "暂时无法登录，请稍后再试".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::ConfirmationRequired => StatusCode::ACCEPTED,
            AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<KvError> for AuthError {
    fn from(err: KvError) -> Self {
        AuthError::Unavailable(err.to_string())
    }
}

pub const EMPTY_CREDENTIALS: &str = "email and password must not be empty";
pub const INVALID_EMAIL: &str = "email address is not valid";
pub const SHORT_PASSWORD: &str = "password must be at least 6 characters";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn from_catalog(err: &CatalogError, locale: Locale) -> Self {
        Self::new(err.status(), err.user_message(locale))
    }

    pub fn from_auth(err: &AuthError, locale: Locale) -> Self {
        Self::new(err.status(), err.user_message(locale))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_parsing() {
        assert_eq!("zh_CN".parse::<Locale>().unwrap(), Locale::ZhCn);
        assert_eq!("EN".parse::<Locale>().unwrap(), Locale::En);
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn catalog_errors_map_to_statuses_and_messages() {
        let err = CatalogError::NotAuthenticated;
        let app = AppError::from_catalog(&err, Locale::ZhCn);
        assert_eq!(app.status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.message, "请重新登录");

        let err = CatalogError::StoreUnavailable("timeout".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.user_message(Locale::En).contains("timeout"));
    }

    #[test]
    fn auth_input_errors_are_localized() {
        let err = AuthError::InvalidInput(SHORT_PASSWORD);
        assert_eq!(err.user_message(Locale::ZhCn), "密码长度至少为6位");
        assert_eq!(err.user_message(Locale::En), SHORT_PASSWORD);
    }
}
