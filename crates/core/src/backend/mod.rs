//! Collaborator seams for the hosted backend.
//!
//! The lesson engine never talks to the network directly. Records, storage
//! probes, authentication and notification permission are reached through the
//! traits below; [`SupabaseClient`] implements the backend-facing ones over
//! HTTP and tests substitute in-memory fakes.

mod session_cache;
mod supabase;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{resolver::AudioLocator, Result, VocabularyEntry, VocabularyKind};

pub use session_cache::{FileSessionCache, MemorySessionCache, SessionCache};
pub use supabase::SupabaseClient;

/// Relational record store holding the vocabulary tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_vocabulary(&self, kind: VocabularyKind) -> Result<Vec<VocabularyEntry>>;
}

/// Lightweight existence check for public storage objects.
#[async_trait]
pub trait AssetProbe: Send + Sync {
    async fn exists(&self, locator: &AudioLocator) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub provider: String,
}

/// Tokens for a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is stale.
    #[serde(default)]
    pub expires_at: Option<u64>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Apple,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Apple => "apple",
        }
    }
}

/// Authentication service. The lesson flow only consumes "is there a
/// session now"; the remaining methods back the sign-in surfaces.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>>;

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session>;

    /// Returns `None` when the account was created but still needs e-mail
    /// confirmation before a session is issued.
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>>;

    /// Returns the authorization URL the user must visit. Completion is
    /// observed later through [`get_session`](Self::get_session).
    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> Result<String>;

    async fn sign_out(&self) -> Result<()>;

    /// Auth state changes, starting with the current state.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Push-notification permission prompt.
#[async_trait]
pub trait NotificationPermission: Send + Sync {
    async fn request_permission(&self) -> Result<PermissionStatus>;
}
