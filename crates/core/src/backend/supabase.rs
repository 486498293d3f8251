//! HTTP adapter for a Supabase project (PostgREST, Storage, GoTrue).

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use super::{
    AssetProbe, AuthProvider, AuthUser, Credentials, OAuthProvider, RecordStore, Session,
    SessionCache,
};
use crate::{
    config::BackendConfig,
    resolver::{AudioLocator, StorageLayout},
    Result, SafiError, VocabularyEntry, VocabularyKind,
};

pub struct SupabaseClient {
    http: reqwest::Client,
    config: BackendConfig,
    cache: Arc<dyn SessionCache>,
    session: watch::Sender<Option<Session>>,
}

impl SupabaseClient {
    /// Builds the client and restores any cached session.
    pub fn new(config: BackendConfig, cache: Arc<dyn SessionCache>) -> Result<Self> {
        if !config.is_complete() {
            return Err(SafiError::Config(
                "backend url and anon key are required".to_string(),
            ));
        }

        let restored = cache.load().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring unreadable session cache");
            None
        });
        let (session, _) = watch::channel(restored);

        Ok(Self {
            http: reqwest::Client::new(),
            config,
            cache,
            session,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout::from_backend(&self.config)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let access_token = self
            .session
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone());
        let bearer = access_token.unwrap_or_else(|| self.config.anon_key.clone());

        self.http
            .request(method, url)
            .header("apikey", &self.config.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
    }

    fn publish(&self, session: Option<Session>) {
        let persisted = match &session {
            Some(session) => self.cache.save(session),
            None => self.cache.clear(),
        };
        if let Err(err) = persisted {
            tracing::warn!(error = %err, "failed to persist session");
        }
        self.session.send_replace(session);
    }

    async fn token_request(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let url = self.endpoint(&format!("auth/v1/token?grant_type={grant_type}"));
        let response = self.request(Method::POST, &url).json(&body).send().await?;
        let response = auth_error_for_status(response).await?;
        let token: TokenResponse = response.json().await?;
        Ok(token.into_session())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("url", &self.config.url)
            .field("bucket", &self.config.bucket)
            .field("signed_in", &self.session.borrow().is_some())
            .finish()
    }
}

#[async_trait]
impl RecordStore for SupabaseClient {
    async fn fetch_vocabulary(&self, kind: VocabularyKind) -> Result<Vec<VocabularyEntry>> {
        let url = self.endpoint(&format!("rest/v1/{}?select=*", kind.table()));
        let response = self
            .request(Method::GET, &url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SafiError::DataFetch(format!(
                "{}: {} {}",
                kind.table(),
                status.as_u16(),
                error_message(&body)
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AssetProbe for SupabaseClient {
    async fn exists(&self, locator: &AudioLocator) -> Result<bool> {
        let response = self.http.head(locator.as_str()).send().await?;
        tracing::debug!(url = %locator, status = response.status().as_u16(), "probed audio");
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>> {
        let current = self.session.borrow().clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.publish(None);
            return Ok(None);
        };
        match self.refresh(refresh_token).await {
            Ok(refreshed) => {
                self.publish(Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(err) => {
                tracing::warn!(error = %err, "session refresh failed");
                self.publish(None);
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session> {
        let session = self
            .token_request(
                "password",
                json!({ "email": credentials.email, "password": credentials.password }),
            )
            .await?;
        tracing::info!(user = %session.user.id, "signed in");
        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>> {
        let url = self.endpoint("auth/v1/signup");
        let response = self
            .request(Method::POST, &url)
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await?;
        let response = auth_error_for_status(response).await?;
        let body: serde_json::Value = response.json().await?;

        if body.get("access_token").is_none() {
            tracing::info!(email = %credentials.email, "sign up pending confirmation");
            return Ok(None);
        }
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
        self.publish(Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> Result<String> {
        let mut url = self.endpoint(&format!("auth/v1/authorize?provider={}", provider.as_str()));
        if let Some(redirect) = redirect_to {
            let encoded = reqwest::Url::parse_with_params("http://x", &[("redirect_to", redirect)])
                .map_err(|err| SafiError::Auth(err.to_string()))?;
            if let Some(query) = encoded.query() {
                url.push('&');
                url.push_str(query);
            }
        }
        Ok(url)
    }

    async fn sign_out(&self) -> Result<()> {
        let signed_in = self.session.borrow().is_some();
        if signed_in {
            let url = self.endpoint("auth/v1/logout");
            match self.request(Method::POST, &url).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = response.status().as_u16(), "logout rejected");
                }
                Err(err) => tracing::warn!(error = %err, "logout request failed"),
                Ok(_) => {}
            }
        }
        self.publish(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    provider: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
            self.expires_in.map(|secs| now + secs)
        });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: AuthUser {
                id: self.user.id,
                email: self.user.email,
                provider: self
                    .user
                    .app_metadata
                    .provider
                    .unwrap_or_else(|| "email".to_string()),
            },
        }
    }
}

async fn auth_error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SafiError::Auth(error_message(&body)))
}

/// Pulls the human-readable message out of a GoTrue / PostgREST error body.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemorySessionCache;

    fn config() -> BackendConfig {
        BackendConfig {
            url: "https://demo.supabase.co".to_string(),
            anon_key: "anon".to_string(),
            bucket: "safispeak_audio".to_string(),
        }
    }

    fn cached_session(expires_at: Option<u64>) -> Session {
        Session {
            access_token: "cached".to_string(),
            refresh_token: None,
            expires_at,
            user: AuthUser {
                id: "user-1".to_string(),
                email: None,
                provider: "email".to_string(),
            },
        }
    }

    #[test]
    fn requires_complete_config() {
        let cache = Arc::new(MemorySessionCache::new());
        let err = SupabaseClient::new(BackendConfig::default(), cache).unwrap_err();
        assert!(matches!(err, SafiError::Config(_)));
    }

    #[test]
    fn extracts_error_messages() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"msg":"User already registered"}"#), "User already registered");
        assert_eq!(error_message(" gateway timeout "), "gateway timeout");
    }

    #[test]
    fn token_response_defaults_provider_and_computes_expiry() {
        let token: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "user": { "id": "u1", "email": "learner@example.com" }
            }"#,
        )
        .unwrap();

        let session = token.into_session();
        assert_eq!(session.user.provider, "email");
        assert!(session.expires_at.unwrap() > 3600);
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn restores_cached_session_and_signs_out_locally() {
        let cache = Arc::new(MemorySessionCache::new());
        cache.save(&cached_session(None)).unwrap();
        let client = SupabaseClient::new(config(), cache.clone()).unwrap();
        let mut changes = client.subscribe();

        let session = client.get_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "cached");

        client.publish(None);
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
        assert!(cache.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_without_refresh_token_is_dropped() {
        let cache = Arc::new(MemorySessionCache::new());
        cache.save(&cached_session(Some(1))).unwrap();
        let client = SupabaseClient::new(config(), cache.clone()).unwrap();

        assert!(client.get_session().await.unwrap().is_none());
        assert!(cache.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn oauth_url_targets_authorize_endpoint() {
        let client = SupabaseClient::new(config(), Arc::new(MemorySessionCache::new())).unwrap();

        let url = client
            .sign_in_with_oauth(OAuthProvider::Google, Some("safispeak://auth"))
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://demo.supabase.co/auth/v1/authorize?provider=google&redirect_to=safispeak%3A%2F%2Fauth"
        );
    }

    #[test]
    fn storage_layout_matches_public_bucket() {
        let client = SupabaseClient::new(config(), Arc::new(MemorySessionCache::new())).unwrap();
        let locator = client.storage_layout().locate(1, "salam.mp3");
        assert_eq!(
            locator.as_str(),
            "https://demo.supabase.co/storage/v1/object/public/safispeak_audio/chapter_1/salam.mp3"
        );
    }
}
