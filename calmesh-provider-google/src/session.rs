//! Authenticated transport: attaches the bearer token and refreshes it when needed.

use std::sync::Arc;

use async_trait::async_trait;
use calmesh_core::{CalMeshError, CalMeshResult};
use chrono::{Duration, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{GoogleConfig, GoogleTokens, TokenResponse};

/// Called with the new tokens after every refresh, before the triggering call returns.
#[async_trait]
pub trait TokenRefreshHook: Send + Sync {
    async fn on_refresh(&self, tokens: &GoogleTokens) -> CalMeshResult<()>;
}

/// Hook for callers that don't persist tokens.
pub struct NoopRefreshHook;

#[async_trait]
impl TokenRefreshHook for NoopRefreshHook {
    async fn on_refresh(&self, _tokens: &GoogleTokens) -> CalMeshResult<()> {
        Ok(())
    }
}

pub struct Session {
    http: reqwest::Client,
    config: GoogleConfig,
    tokens: Mutex<GoogleTokens>,
    hook: Arc<dyn TokenRefreshHook>,
}

impl Session {
    pub fn new(config: GoogleConfig, tokens: GoogleTokens, hook: Arc<dyn TokenRefreshHook>) -> CalMeshResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CalMeshError::Transport(e.to_string()))?;

        Ok(Session {
            http,
            config,
            tokens: Mutex::new(tokens),
            hook,
        })
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    pub async fn tokens(&self) -> GoogleTokens {
        self.tokens.lock().await.clone()
    }

    /// Send a request built by `build`, refreshing the access token first if
    /// it has expired, and once more (with a single retry) on a 401.
    ///
    /// Non-2xx answers become `CalMeshError::Http`.
    pub async fn send<F>(&self, build: F) -> CalMeshResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        if self.is_expired().await {
            debug!("access token expired, refreshing");
            self.refresh().await?;
        }

        let response = self.send_once(&build).await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!("access token rejected, refreshing");
            self.refresh().await?;
            self.send_once(&build).await?
        } else {
            response
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = body.chars().take(200).collect::<String>();
        Err(CalMeshError::http(status.as_u16(), message))
    }

    async fn send_once<F>(&self, build: &F) -> CalMeshResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let access_token = self.tokens.lock().await.access_token.clone();
        build(&self.http)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| CalMeshError::Transport(e.to_string()))
    }

    async fn is_expired(&self) -> bool {
        self.tokens
            .lock()
            .await
            .expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now())
    }

    async fn refresh(&self) -> CalMeshResult<()> {
        let mut tokens = self.tokens.lock().await;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens.refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CalMeshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalMeshError::Auth(format!("token refresh failed ({status}): {body}")));
        }

        let refreshed: TokenResponse = response
            .json()
            .await
            .map_err(|e| CalMeshError::Auth(format!("invalid token response: {e}")))?;

        // Google typically doesn't return a new refresh_token on refresh
        *tokens = GoogleTokens {
            access_token: refreshed.access_token,
            refresh_token: refreshed
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| tokens.refresh_token.clone()),
            expires_at: refreshed
                .expires_in
                .filter(|secs| *secs > 0)
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        };
        info!("refreshed Google access token");

        self.hook.on_refresh(&tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every refresh it sees.
    #[derive(Default)]
    pub(crate) struct RecordingHook {
        pub seen: std::sync::Mutex<Vec<GoogleTokens>>,
    }

    #[async_trait]
    impl TokenRefreshHook for RecordingHook {
        async fn on_refresh(&self, tokens: &GoogleTokens) -> CalMeshResult<()> {
            self.seen.lock().unwrap().push(tokens.clone());
            Ok(())
        }
    }

    fn config(server: &MockServer) -> GoogleConfig {
        GoogleConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            token_url: format!("{}/token", server.uri()),
            api_base: server.uri(),
        }
    }

    fn tokens(expires_in_secs: i64) -> GoogleTokens {
        GoogleTokens {
            access_token: "old-access".into(),
            refresh_token: "refresh-1".into(),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
        }
    }

    async fn mount_token_endpoint(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn refreshes_on_401_and_retries_once() {
        let server = MockServer::start().await;
        mount_token_endpoint(
            &server,
            serde_json::json!({"access_token": "new-access", "expires_in": 3599}),
        )
        .await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("Authorization", "Bearer old-access"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("Authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hook = Arc::new(RecordingHook::default());
        let session = Session::new(config(&server), tokens(3600), hook.clone()).unwrap();
        let url = format!("{}/ping", server.uri());

        session.send(|http| http.get(&url)).await.unwrap();

        // The hook ran before send() returned, and the old refresh token was kept
        let seen = hook.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].access_token, "new-access");
        assert_eq!(seen[0].refresh_token, "refresh-1");
        assert!(seen[0].expires_at.is_some());
        assert_eq!(session.tokens().await, seen[0]);
    }

    #[tokio::test]
    async fn refreshes_proactively_when_expired() {
        let server = MockServer::start().await;
        mount_token_endpoint(
            &server,
            serde_json::json!({"access_token": "new-access", "refresh_token": "refresh-2", "expires_in": 3599}),
        )
        .await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("Authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hook = Arc::new(RecordingHook::default());
        let session = Session::new(config(&server), tokens(-60), hook.clone()).unwrap();
        let url = format!("{}/ping", server.uri());

        session.send(|http| http.get(&url)).await.unwrap();

        assert_eq!(session.tokens().await.refresh_token, "refresh-2");
        assert_eq!(hook.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_left_unset() {
        let server = MockServer::start().await;
        mount_token_endpoint(
            &server,
            serde_json::json!({"access_token": "new-access", "expires_in": i64::MAX}),
        )
        .await;

        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let session = Session::new(config(&server), tokens(-60), Arc::new(NoopRefreshHook)).unwrap();
        let url = format!("{}/ping", server.uri());

        session.send(|http| http.get(&url)).await.unwrap();

        let tokens = session.tokens().await;
        assert_eq!(tokens.access_token, "new-access");
        assert!(tokens.expires_at.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_is_an_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let session = Session::new(config(&server), tokens(-60), Arc::new(NoopRefreshHook)).unwrap();
        let url = format!("{}/ping", server.uri());

        let err = session.send(|http| http.get(&url)).await.unwrap_err();
        assert!(matches!(err, CalMeshError::Auth(_)));
    }

    #[tokio::test]
    async fn non_success_keeps_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let session = Session::new(config(&server), tokens(3600), Arc::new(NoopRefreshHook)).unwrap();
        let url = format!("{}/missing", server.uri());

        let err = session.send(|http| http.get(&url)).await.unwrap_err();
        assert!(err.is_gone());
    }
}
