//! Session persistence for the Campus API client.
//!
//! A [`TokenStore`] holds at most one [`StoredSession`]: the bearer token sent
//! with each request, an optional refresh token, and the opaque user payload
//! returned at login. [`MemoryTokenStore`] keeps it for the life of the
//! process; [`FileTokenStore`] persists it as JSON so a later process can pick
//! it up.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Distinguishes temporary files of concurrent saves within one process.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// The persisted authentication state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// Bearer token attached to every request.
    #[serde(rename = "authToken")]
    pub access_token: String,

    /// Longer-lived credential offered to the refresh endpoint.
    #[serde(
        rename = "refresh_token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,

    /// User payload returned by login, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,

    /// When the session was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredSession {
    /// Creates a session holding only an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            user: None,
            updated_at: Utc::now(),
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the user payload.
    #[must_use]
    pub fn with_user(mut self, user: serde_json::Value) -> Self {
        self.user = Some(user);
        self
    }

    /// Swaps in a refreshed access token, rotating the refresh token if the
    /// server issued a new one.
    pub fn rotate(&mut self, access_token: impl Into<String>, refresh_token: Option<String>) {
        self.access_token = access_token.into();
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        self.updated_at = Utc::now();
    }
}

/// Storage backend for the current session.
///
/// Implementations must be safe to share between concurrent requests.
pub trait TokenStore: Send + Sync + Debug {
    /// Returns the stored session, if any.
    fn load(&self) -> Result<Option<StoredSession>>;

    /// Replaces the stored session.
    fn save(&self, session: &StoredSession) -> Result<()>;

    /// Removes the stored session. Clearing an empty store succeeds.
    fn clear(&self) -> Result<()>;

    /// Returns just the access token.
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.map(|session| session.access_token))
    }

    /// Returns just the refresh token.
    fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.load()?.and_then(|session| session.refresh_token))
    }

    /// Writes a new access token, keeping the rest of the session.
    fn rotate(&self, access_token: &str, refresh_token: Option<String>) -> Result<()> {
        let session = match self.load()? {
            Some(mut session) => {
                session.rotate(access_token, refresh_token);
                session
            }
            None => {
                let mut session = StoredSession::new(access_token);
                session.refresh_token = refresh_token;
                session
            }
        };
        self.save(&session)
    }
}

// ============================================================================
// MemoryTokenStore
// ============================================================================

/// Process-local token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<Option<StoredSession>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `session`.
    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

// ============================================================================
// FileTokenStore
// ============================================================================

/// Token store backed by a JSON file.
///
/// A missing file means "no session". Writes go through a sibling temporary
/// file and a rename so a crash never leaves a half-written session behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store backed by `path`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a fresh sibling path for one save.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        name.push(format!(".{}.{sequence}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ApiError::token_store(&self.path, e.to_string())),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| ApiError::token_store(&self.path, format!("corrupted session: {e}")))
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApiError::token_store(&self.path, e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(session)
            .map_err(|e| ApiError::token_store(&self.path, e.to_string()))?;
        let temp = self.temp_path();
        std::fs::write(&temp, json).map_err(|e| ApiError::token_store(&temp, e.to_string()))?;
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            std::fs::remove_file(&temp).ok();
            return Err(ApiError::token_store(&self.path, e.to_string()));
        }

        tracing::debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Session cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::token_store(&self.path, e.to_string())),
        }
    }
}
