//! Thin HTTP client for the hosted backend (REST tables, auth, storage).

use crate::config::RemoteConfig;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use std::sync::Arc;
use url::Url;

/// Shared by the remote store, uploader and identity provider.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: Client,
    pub config: Arc<RemoteConfig>,
}

/// Coarse outcome of a backend call, before callers map it to their own errors.
#[derive(Debug, PartialEq)]
pub enum BackendFailure {
    /// Request never completed (DNS, TLS, connection reset, ...).
    Transport(String),
    /// 401 or 403.
    Unauthorized,
    /// Any other non-success status, with the response body for logs.
    Status(StatusCode, String),
    /// Success status but the body was not what we expected.
    Decode(String),
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFailure::Transport(msg) => write!(f, "request failed: {msg}"),
            BackendFailure::Unauthorized => write!(f, "unauthorized"),
            BackendFailure::Status(status, body) => write!(f, "status {status}: {body}"),
            BackendFailure::Decode(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl BackendClient {
    pub fn new(config: Arc<RemoteConfig>) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn url(&self, path: &str) -> Result<Url, BackendFailure> {
        self.config
            .endpoint(path)
            .map_err(|e| BackendFailure::Transport(format!("invalid backend url: {e}")))
    }

    /// URL of a REST table with query pairs appended.
    pub fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url, BackendFailure> {
        let mut url = self.url(&format!("rest/v1/{table}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Request carrying the project key only.
    pub fn anonymous(&self, method: Method, url: Url) -> RequestBuilder {
        let key = self.config.anon_key.expose_secret();
        self.http
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(key)
    }

    /// Request made on behalf of a signed-in user.
    pub fn authorized(&self, method: Method, url: Url, access_token: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", self.config.anon_key.expose_secret())
            .bearer_auth(access_token)
    }

    /// Send and reject non-success statuses.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, BackendFailure> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendFailure::Transport(e.to_string()))?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, BackendFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(BackendFailure::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendFailure::Status(status, body))
}

/// Public URL of an object in a public storage bucket.
pub fn public_object_url(config: &RemoteConfig, path: &str) -> Result<Url, url::ParseError> {
    config.endpoint(&format!(
        "storage/v1/object/public/{}/{}",
        config.storage_bucket, path
    ))
}

#[cfg(test)]
pub(crate) fn test_config() -> RemoteConfig {
    use secrecy::SecretString;
    RemoteConfig {
        base_url: Url::parse("https://demo.supabase.co").unwrap(),
        anon_key: SecretString::from("anon-key".to_string()),
        storage_bucket: "item-images".into(),
        items_table: "luxury_items".into(),
        profiles_table: "users".into(),
    }
}

/// Local HTTP server standing in for the hosted backend in tests.
#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use axum::{
        Router,
        body::{Bytes, to_bytes},
        extract::Request,
        http::{HeaderMap, header},
        response::IntoResponse,
    };
    use std::sync::Mutex;

    /// One request as the backend saw it.
    #[derive(Clone, Debug)]
    pub struct Recorded {
        pub method: Method,
        pub path: String,
        pub query: Vec<(String, String)>,
        pub headers: HeaderMap,
        pub body: Bytes,
    }

    impl Recorded {
        pub fn query_value(&self, key: &str) -> Option<&str> {
            self.query
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }

        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|v| v.to_str().ok())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    pub struct StubBackend {
        pub client: BackendClient,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl StubBackend {
        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }

        pub fn single_request(&self) -> Recorded {
            let requests = self.requests();
            assert_eq!(requests.len(), 1, "expected one request, got {requests:?}");
            requests[0].clone()
        }
    }

    /// Answer every request with `status` and a JSON-typed `body`.
    pub async fn stub_backend(status: u16, body: impl Into<String>) -> StubBackend {
        let status = StatusCode::from_u16(status).unwrap();
        let body: String = body.into();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let app = Router::new().fallback(move |request: Request| {
            let seen = seen.clone();
            let body = body.clone();
            async move {
                let (parts, payload) = request.into_parts();
                let payload = to_bytes(payload, usize::MAX).await.unwrap_or_default();
                seen.lock().unwrap().push(Recorded {
                    method: parts.method,
                    path: parts.uri.path().to_string(),
                    query: url::form_urlencoded::parse(parts.uri.query().unwrap_or("").as_bytes())
                        .into_owned()
                        .collect(),
                    headers: parts.headers,
                    body: payload,
                });
                (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = RemoteConfig {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            ..test_config()
        };
        StubBackend {
            client: BackendClient::new(Arc::new(config)),
            requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::stub_backend;
    use super::*;

    #[tokio::test]
    async fn send_passes_success_through() {
        let backend = stub_backend(200, r#"{"ok":true}"#).await;
        let url = backend.client.url("rest/v1/luxury_items").unwrap();
        let response = backend
            .client
            .send(backend.client.authorized(Method::GET, url, "user-token"))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), r#"{"ok":true}"#);

        let seen = backend.single_request();
        assert_eq!(seen.method, Method::GET);
        assert_eq!(seen.path, "/rest/v1/luxury_items");
        assert_eq!(seen.header("apikey"), Some("anon-key"));
        assert_eq!(seen.header("authorization"), Some("Bearer user-token"));
    }

    #[tokio::test]
    async fn send_classifies_failure_statuses() {
        for code in [401, 403] {
            let backend = stub_backend(code, "{}").await;
            let url = backend.client.url("auth/v1/logout").unwrap();
            let err = backend
                .client
                .send(backend.client.anonymous(Method::POST, url))
                .await
                .unwrap_err();
            assert_eq!(err, BackendFailure::Unauthorized);
        }

        let backend = stub_backend(500, "boom").await;
        let url = backend.client.url("rest/v1/luxury_items").unwrap();
        let err = backend
            .client
            .send(backend.client.anonymous(Method::GET, url))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendFailure::Status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into())
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = BackendClient::new(Arc::new(RemoteConfig {
            base_url: Url::parse(&format!("http://{addr}/")).unwrap(),
            ..test_config()
        }));
        let url = client.url("rest/v1/luxury_items").unwrap();
        let err = client
            .send(client.anonymous(Method::GET, url))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendFailure::Transport(_)));
    }

    #[test]
    fn table_url_encodes_filters() {
        let client = BackendClient::new(Arc::new(test_config()));
        let url = client
            .table_url(
                "luxury_items",
                &[
                    ("select", "*".into()),
                    ("owner_id", "eq.42".into()),
                    ("order", "purchase_date.desc".into()),
                ],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.supabase.co/rest/v1/luxury_items?select=*&owner_id=eq.42&order=purchase_date.desc"
        );
    }

    #[test]
    fn public_url_layout() {
        let cfg = test_config();
        let url = public_object_url(&cfg, "users/abc/photo.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.supabase.co/storage/v1/object/public/item-images/users/abc/photo.jpg"
        );
    }

    #[test]
    fn anonymous_requests_carry_project_key() {
        let client = BackendClient::new(Arc::new(test_config()));
        let url = client.url("auth/v1/signup").unwrap();
        let request = client.anonymous(Method::POST, url).build().unwrap();
        assert_eq!(request.headers()["apikey"], "anon-key");
        assert_eq!(request.headers()["authorization"], "Bearer anon-key");
    }
}
