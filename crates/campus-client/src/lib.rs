//! Campus API Client
//!
//! Authenticated REST client for the Campus learning platform, with bearer
//! token injection, typed errors, and transparent token refresh shared by
//! concurrent requests.

pub mod client;
pub mod config;
pub mod error;
pub mod refresh;
pub mod session;
pub mod token_store;

pub use client::{ApiClient, ApiClientBuilder, RequestOptions, RequestPhase};
pub use config::{ClientConfig, BASE_URL_ENV};
pub use error::{ApiError, Result, GENERIC_ERROR_MESSAGE};
pub use refresh::RefreshCoordinator;
pub use reqwest::Method;
pub use session::{AuthSession, Credentials};
pub use token_store::{FileTokenStore, MemoryTokenStore, StoredSession, TokenStore};
