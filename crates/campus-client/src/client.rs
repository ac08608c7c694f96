//! Authenticated HTTP client for the Campus REST API.
//!
//! [`ApiClient`] attaches the stored bearer token to every request. When a
//! protected endpoint answers 401 it refreshes the token once, through the
//! shared [`RefreshCoordinator`], and retries the original request with the
//! new token. Callers only ever see the retried outcome.
//!
//! # Example
//!
//! ```no_run
//! use campus_client::ApiClient;
//!
//! # async fn example() -> campus_client::Result<()> {
//! let client = ApiClient::builder("http://localhost:5000/api").build()?;
//! client.set_token("eyJhbGciOi...")?;
//!
//! let dashboard: serde_json::Value = client.get("/student/dashboard").await?;
//! println!("{dashboard:#}");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, Span};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ApiError, Result, GENERIC_ERROR_MESSAGE};
use crate::refresh::RefreshCoordinator;
use crate::token_store::{MemoryTokenStore, TokenStore};

/// Default timeout for a single HTTP call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// RequestPhase
// ============================================================================

/// Where a logical request is in its lifecycle.
///
/// - `Sending` -> `Done` | `Failed`
/// - `Sending` -> `AwaitingRefresh` -> `Retrying` -> `Done` | `Failed`
///
/// `AwaitingRefresh` is shared: only the first request to enter it performs
/// the refresh call, the rest wait on its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// First attempt is in flight.
    Sending,
    /// Got a 401 and is waiting on a token refresh.
    AwaitingRefresh,
    /// Re-issuing the request with the refreshed token.
    Retrying,
    /// Finished with a successful response.
    Done,
    /// Finished with an error.
    Failed,
}

impl RequestPhase {
    /// Returns `true` for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns the snake_case name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::AwaitingRefresh => "awaiting_refresh",
            Self::Retrying => "retrying",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn settled<T>(result: &Result<T>) -> Self {
        if result.is_ok() {
            Self::Done
        } else {
            Self::Failed
        }
    }

    fn record(self) {
        Span::current().record("phase", self.as_str());
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RequestOptions
// ============================================================================

/// Per-request settings for [`ApiClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// HTTP method (defaults to `GET`).
    pub method: Method,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Extra headers added after the defaults.
    pub headers: Vec<(String, String)>,
    /// Query string parameters.
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    /// Creates options for the given method with no body.
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query string parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Body sent to the refresh endpoint when a refresh token is stored.
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Refresh endpoint response. Older backends answer with `access_token`.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Extracts a human-readable message from an error response body.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}

/// Strips any query string so endpoint comparisons look at the path only.
fn endpoint_path(endpoint: &str) -> &str {
    endpoint.split(['?', '#']).next().unwrap_or(endpoint)
}

// ============================================================================
// ApiClientBuilder
// ============================================================================

/// Builder for configuring an [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder {
    base_url: String,
    timeout: Duration,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<RefreshCoordinator>>,
    login_endpoint: String,
    refresh_endpoint: String,
}

impl ApiClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            store: None,
            refresher: None,
            login_endpoint: defaults.login_endpoint,
            refresh_endpoint: defaults.refresh_endpoint,
        }
    }

    /// Creates a builder from loaded configuration.
    ///
    /// The token store still defaults to memory; pass a
    /// [`FileTokenStore`](crate::FileTokenStore) to persist sessions.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            timeout: config.timeout(),
            login_endpoint: config.login_endpoint.clone(),
            refresh_endpoint: config.refresh_endpoint.clone(),
            ..Self::new(config.base_url.clone())
        }
    }

    /// Sets the timeout applied to every HTTP call.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets where the session is read from and written to.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares a refresh coordinator with other clients.
    ///
    /// Clients that share a token store should share a coordinator too, so
    /// that an expired token triggers one refresh between them.
    #[must_use]
    pub fn refresh_coordinator(mut self, refresher: Arc<RefreshCoordinator>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Sets the login endpoint, which never triggers a refresh.
    #[must_use]
    pub fn login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = endpoint.into();
        self
    }

    /// Sets the refresh endpoint.
    #[must_use]
    pub fn refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.refresh_endpoint = endpoint.into();
        self
    }

    /// Builds the [`ApiClient`].
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidRequest` if the base URL is not a valid URL
    /// or the HTTP client cannot be constructed.
    pub fn build(self) -> Result<ApiClient> {
        Url::parse(&self.base_url).map_err(|e| {
            ApiError::invalid_request(format!("invalid base URL '{}': {e}", self.base_url))
        })?;

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ApiError::invalid_request(format!("cannot build HTTP client: {e}")))?;

        Ok(ApiClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            timeout: self.timeout,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
            refresher: self.refresher.unwrap_or_default(),
            login_endpoint: self.login_endpoint,
            refresh_endpoint: self.refresh_endpoint,
        })
    }
}

// ============================================================================
// ApiClient
// ============================================================================

/// Async client for the Campus REST API with transparent token refresh.
///
/// Cloning is cheap: clones share the connection pool, token store, and
/// refresh coordinator.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn TokenStore>,
    refresher: Arc<RefreshCoordinator>,
    login_endpoint: String,
    refresh_endpoint: String,
}

impl ApiClient {
    /// Creates a builder for the given base URL.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Returns the base URL endpoints are appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the token store this client reads and writes.
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Returns the refresh coordinator this client uses.
    pub fn refresh_coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresher
    }

    // ------------------------------------------------------------------------
    // Token accessors
    // ------------------------------------------------------------------------

    /// Returns the stored access token.
    pub fn token(&self) -> Result<Option<String>> {
        self.store.access_token()
    }

    /// Stores `token` as the access token, keeping any refresh token.
    pub fn set_token(&self, token: &str) -> Result<()> {
        self.store.rotate(token, None)
    }

    /// Removes the stored session.
    pub fn clear_token(&self) -> Result<()> {
        self.store.clear()
    }

    /// Returns `true` if an access token is stored.
    ///
    /// An unreadable store counts as signed out.
    pub fn is_authenticated(&self) -> bool {
        match self.store.access_token() {
            Ok(token) => token.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read token store");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------------

    /// Sends a `GET` request.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(Method::GET))
            .await
    }

    /// Sends a `POST` request with a JSON body.
    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, RequestOptions::new(Method::POST).json(to_body(body)?))
            .await
    }

    /// Sends a `PUT` request with a JSON body.
    pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, RequestOptions::new(Method::PUT).json(to_body(body)?))
            .await
    }

    /// Sends a `PATCH` request with a JSON body.
    pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, RequestOptions::new(Method::PATCH).json(to_body(body)?))
            .await
    }

    /// Sends a `DELETE` request.
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request(endpoint, RequestOptions::new(Method::DELETE))
            .await
    }

    // ------------------------------------------------------------------------
    // Core request path
    // ------------------------------------------------------------------------

    /// Sends a request and decodes its JSON response.
    ///
    /// Empty response bodies decode as JSON `null`, so `()` and `Option<_>`
    /// work for endpoints that return nothing.
    ///
    /// A 401 from any endpoint other than login or refresh triggers a single
    /// token refresh followed by one retry. Every other failure is returned
    /// unchanged.
    #[instrument(
        name = "api_request",
        skip(self, options),
        fields(
            http.method = %options.method,
            phase = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
        )
    )]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request_value(endpoint, &options).await?;
        serde_json::from_value(value).map_err(ApiError::from)
    }

    async fn request_value(&self, endpoint: &str, options: &RequestOptions) -> Result<Value> {
        let result = self.attempt(endpoint, options).await;
        RequestPhase::settled(&result).record();
        result
    }

    /// Runs the first attempt and, after a 401, the refresh and single retry.
    async fn attempt(&self, endpoint: &str, options: &RequestOptions) -> Result<Value> {
        let token = self.store.access_token()?;

        RequestPhase::Sending.record();
        match self.send(endpoint, options, token.as_deref()).await {
            Err(ApiError::Authentication { message }) if !self.is_auth_endpoint(endpoint) => {
                tracing::debug!(endpoint, %message, "Access token rejected, refreshing");
                RequestPhase::AwaitingRefresh.record();
                let fresh = self.refresh_after_rejection(token.as_deref()).await?;

                RequestPhase::Retrying.record();
                self.send(endpoint, options, Some(&fresh)).await
            }
            other => other,
        }
    }

    /// Performs one HTTP exchange. No refresh handling happens here.
    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Value> {
        let url = self.url_for(endpoint)?;

        let mut builder = self
            .http
            .request(options.method.clone(), url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e, self.timeout))?;

        let status = response.status();
        Span::current().record("http.status_code", status.as_u16());

        if !status.is_success() {
            // An unreadable error body still carries its status
            let body = response.bytes().await.unwrap_or_default();
            let message = error_message(&body);
            tracing::debug!(endpoint, status = status.as_u16(), %message, "Request failed");
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_transport(&e, self.timeout))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(ApiError::from)
    }

    fn url_for(&self, endpoint: &str) -> Result<Url> {
        let raw = format!("{}{endpoint}", self.base_url);
        Url::parse(&raw)
            .map_err(|e| ApiError::invalid_request(format!("invalid URL '{raw}': {e}")))
    }

    fn is_auth_endpoint(&self, endpoint: &str) -> bool {
        let path = endpoint_path(endpoint);
        path == self.login_endpoint || path == self.refresh_endpoint
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Obtains a token to retry with after `rejected` drew a 401.
    ///
    /// The check for an already-rotated token runs inside the coordinator's
    /// leader slot, so a request that lost the race to a finished refresh
    /// reuses its token instead of starting another one.
    async fn refresh_after_rejection(&self, rejected: Option<&str>) -> Result<String> {
        self.refresher
            .run(|| self.refresh_unless_rotated(rejected))
            .await
    }

    /// Returns the stored token if it differs from `rejected`, otherwise
    /// performs a refresh.
    async fn refresh_unless_rotated(&self, rejected: Option<&str>) -> Result<String> {
        if let Some(current) = self.store.access_token()? {
            if Some(current.as_str()) != rejected {
                tracing::debug!("Token already refreshed by another request");
                return Ok(current);
            }
        }
        self.perform_refresh().await
    }

    /// Calls the refresh endpoint and stores the outcome.
    ///
    /// On failure the stored session is cleared.
    async fn perform_refresh(&self) -> Result<String> {
        tracing::info!(endpoint = %self.refresh_endpoint, "Refreshing access token");

        match self.call_refresh_endpoint().await {
            Ok((token, refresh_token)) => {
                self.store.rotate(&token, refresh_token)?;
                tracing::info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, clearing session");
                if let Err(clear_err) = self.store.clear() {
                    tracing::warn!(error = %clear_err, "Failed to clear session");
                }
                Err(e)
            }
        }
    }

    /// Returns the new access token and, if rotated, the new refresh token.
    async fn call_refresh_endpoint(&self) -> Result<(String, Option<String>)> {
        let token = self.store.access_token()?;
        let refresh_token = self.store.refresh_token()?;

        let mut options = RequestOptions::new(Method::POST);
        if let Some(refresh_token) = refresh_token.as_deref() {
            options = options.json(to_body(&RefreshRequest { refresh_token })?);
        }

        let value = self
            .send(&self.refresh_endpoint, &options, token.as_deref())
            .await?;
        let response: RefreshResponse = serde_json::from_value(value)?;

        match response.token {
            Some(token) if !token.is_empty() => Ok((token, response.refresh_token)),
            _ => Err(ApiError::network(
                "refresh response did not include a token",
            )),
        }
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::invalid_request(format!("cannot serialize request body: {e}")))
}
