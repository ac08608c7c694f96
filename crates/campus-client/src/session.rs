//! Login, registration, and logout on top of [`ApiClient`].
//!
//! [`AuthSession`] owns the token lifecycle: it writes the session to the
//! client's [`TokenStore`](crate::TokenStore) after a successful login and
//! removes it on logout. Everything between those two points goes through the
//! refresh-aware client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::token_store::StoredSession;

/// Email and password sent to the login endpoint.
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates a credentials pair.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token-bearing response from the login and register endpoints.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(alias = "access_token")]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<Value>,
}

impl AuthResponse {
    fn into_session(self) -> Option<StoredSession> {
        let token = self.token.filter(|token| !token.is_empty())?;
        let mut session = StoredSession::new(token);
        session.refresh_token = self.refresh_token;
        session.user = self.user;
        Some(session)
    }
}

/// Authentication workflows for a single user.
#[derive(Debug, Clone)]
pub struct AuthSession {
    client: ApiClient,
    register_endpoint: String,
    logout_endpoint: String,
    me_endpoint: String,
    login_endpoint: String,
}

impl AuthSession {
    /// Creates a session over `client` using the endpoints from `config`.
    pub fn new(client: ApiClient, config: &ClientConfig) -> Self {
        Self {
            client,
            login_endpoint: config.login_endpoint.clone(),
            register_endpoint: config.register_endpoint.clone(),
            logout_endpoint: config.logout_endpoint.clone(),
            me_endpoint: config.me_endpoint.clone(),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Returns `true` if a session is stored.
    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    /// Logs in and stores the returned session.
    ///
    /// A 401 from the login endpoint is returned as-is; it never triggers a
    /// token refresh.
    ///
    /// # Errors
    ///
    /// Returns the API error from the login call, `ApiError::Network` if the
    /// response carries no token, or `ApiError::TokenStore` if the session
    /// cannot be saved.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<StoredSession> {
        let response: AuthResponse = self.client.post(&self.login_endpoint, credentials).await?;
        let session = response
            .into_session()
            .ok_or_else(|| ApiError::network("login response did not include a token"))?;

        self.client.token_store().save(&session)?;
        tracing::info!("Logged in");
        Ok(session)
    }

    /// Creates an account.
    ///
    /// Returns the new session when the server logs the user straight in,
    /// `None` when it expects a separate login.
    ///
    /// # Errors
    ///
    /// Returns the API error from the register call or `ApiError::TokenStore`
    /// if the session cannot be saved.
    #[instrument(skip_all)]
    pub async fn register(&self, payload: &Value) -> Result<Option<StoredSession>> {
        let response: AuthResponse = self.client.post(&self.register_endpoint, payload).await?;
        match response.into_session() {
            Some(session) => {
                self.client.token_store().save(&session)?;
                tracing::info!("Registered and logged in");
                Ok(Some(session))
            }
            None => {
                tracing::info!("Registered");
                Ok(None)
            }
        }
    }

    /// Ends the session.
    ///
    /// The server is told first, on a best-effort basis; the local session is
    /// removed whatever it answers.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::TokenStore` only if the local session cannot be
    /// removed.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        if self.client.is_authenticated() {
            if let Err(e) = self
                .client
                .post::<Value, _>(&self.logout_endpoint, &Value::Null)
                .await
            {
                tracing::warn!(error = %e, "Server-side logout failed, clearing local session anyway");
            }
        }

        self.client.clear_token()?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Fetches the authenticated user.
    ///
    /// On success the cached user in the stored session is updated.
    ///
    /// # Errors
    ///
    /// Returns the API error from the call, after any refresh attempt.
    pub async fn current_user(&self) -> Result<Value> {
        let user: Value = self.client.get(&self.me_endpoint).await?;

        let store = self.client.token_store();
        if let Some(mut session) = store.load()? {
            session.user = Some(user.clone());
            store.save(&session)?;
        }
        Ok(user)
    }

    /// Returns the user cached at login without calling the server.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::TokenStore` if the store cannot be read.
    pub fn cached_user(&self) -> Result<Option<Value>> {
        Ok(self.client.token_store().load()?.and_then(|session| session.user))
    }
}
