//! Campus CLI
//!
//! Command-line front end for the Campus API: manages the stored session and
//! sends raw authenticated requests.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use campus_client::{
    ApiClientBuilder, ApiError, AuthSession, ClientConfig, Credentials, FileTokenStore, Method,
    RequestOptions,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Campus - Command-line client for the Campus learning platform API
///
/// Logs in once, stores the session on disk, and refreshes the access token
/// automatically when the server reports it expired.
#[derive(Parser, Debug)]
#[command(name = "campus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: campus.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// API base URL (overrides the config file and CAMPUS_API_URL)
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session
    Login {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "CAMPUS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the session and remove it from disk
    Logout,

    /// Show the authenticated user
    Whoami,

    /// Show whether a session is stored
    Status,

    /// Send a GET request
    Get {
        /// Endpoint path, e.g. /student/dashboard
        endpoint: String,
    },

    /// Send a DELETE request
    Delete {
        /// Endpoint path
        endpoint: String,
    },

    /// Send a POST request
    Post {
        /// Endpoint path
        endpoint: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,
    },

    /// Send a PUT request
    Put {
        /// Endpoint path
        endpoint: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,
    },

    /// Send a PATCH request
    Patch {
        /// Endpoint path
        endpoint: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (warn)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // Logs go to stderr so stdout stays parseable JSON
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if e
                .downcast_ref::<ApiError>()
                .is_some_and(ApiError::is_auth_failure)
            {
                eprintln!("Run 'campus login' to start a new session");
            }
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, builds the client, and dispatches the command.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    config.validate()?;

    tracing::debug!(base_url = %config.base_url, token_file = %config.token_file, "Configuration loaded");

    let store = Arc::new(FileTokenStore::new(config.token_path()));
    let client = ApiClientBuilder::from_config(&config)
        .token_store(store)
        .build()?;
    let session = AuthSession::new(client, &config);

    match args.command {
        Command::Login { email, password } => {
            let stored = session.login(&Credentials::new(email, password)).await?;
            println!("Logged in");
            if let Some(user) = stored.user {
                print_json(&user)?;
            }
        }
        Command::Logout => {
            session.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => {
            let user = session.current_user().await?;
            print_json(&user)?;
        }
        Command::Status => print_status(&session, &config)?,
        Command::Get { endpoint } => send(&session, Method::GET, &endpoint, None).await?,
        Command::Delete { endpoint } => send(&session, Method::DELETE, &endpoint, None).await?,
        Command::Post { endpoint, data } => {
            send(&session, Method::POST, &endpoint, data.as_deref()).await?;
        }
        Command::Put { endpoint, data } => {
            send(&session, Method::PUT, &endpoint, data.as_deref()).await?;
        }
        Command::Patch { endpoint, data } => {
            send(&session, Method::PATCH, &endpoint, data.as_deref()).await?;
        }
    }

    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<ClientConfig> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            ClientConfig::load_from_file(path)?
        }
        None => return Ok(ClientConfig::load()?),
    };
    config.apply_env_override()?;
    Ok(config)
}

/// Sends a raw request and prints the response body.
async fn send(
    session: &AuthSession,
    method: Method,
    endpoint: &str,
    data: Option<&str>,
) -> anyhow::Result<()> {
    let mut options = RequestOptions::new(method);
    if let Some(data) = data {
        let body: Value = serde_json::from_str(data).map_err(|e| {
            anyhow::anyhow!(
                "Invalid JSON in --data: {e}\n\nSuggestion: Quote the body, e.g. --data '{{\"title\": \"Intro\"}}'"
            )
        })?;
        options = options.json(body);
    }

    let response: Value = session.client().request(endpoint, options).await?;
    print_json(&response)
}

/// Prints whether a session is stored and who it belongs to.
fn print_status(session: &AuthSession, config: &ClientConfig) -> anyhow::Result<()> {
    println!("API: {}", config.base_url);
    println!("Session file: {}", config.token_file);

    if !session.is_authenticated() {
        println!("Status: logged out");
        return Ok(());
    }

    println!("Status: logged in");
    if let Some(stored) = session.client().token_store().load()? {
        println!("Updated: {}", stored.updated_at.to_rfc3339());
        println!(
            "Refresh token: {}",
            if stored.refresh_token.is_some() { "yes" } else { "no" }
        );
    }
    if let Some(user) = session.cached_user()? {
        println!("User:");
        print_json(&user)?;
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
