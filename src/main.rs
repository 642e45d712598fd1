//! Console CLI - drives the admin console API from a terminal
//!
//! Keeps a persisted session between invocations and sends authorized
//! calls through it.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use console_session::api::transport::ReqwestTransport;
use console_session::storage::FileStore;
use console_session::{ApiRequest, ApiResponse, SessionError, SessionManager, Settings};

#[derive(Parser)]
#[command(name = "console-cli")]
#[command(about = "Command-line client for the admin console API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// API base URL (overrides settings file and CONSOLE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with username and password
    Login {
        /// Account email or username
        username: String,

        /// Password (prompted on stdin if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log in with a third-party provider payload
    SocialLogin {
        /// Provider name, e.g. google
        provider: String,

        /// Provider payload as JSON
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Log in with a magic-link token
    MagicLink {
        token: String,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current session status
    Status,

    /// Show the logged-in user's profile (verify auth works)
    Whoami,

    /// Send an authorized request to the API
    Call {
        /// Path relative to the API base URL, e.g. user/all
        path: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short = 'q', long = "param")]
        params: Vec<String>,

        /// Write the raw response body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ask the server whether a password is strong enough
    CheckPassword {
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut settings = Settings::load()?;
    if let Some(url) = cli.api_url.as_deref() {
        settings.api_url = Settings::with_api_url(url).api_url;
    }
    let session = open_session(settings)?;

    match cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            session.login(&username, &password).await?;
            println!("Login successful.");
        }
        Commands::SocialLogin { provider, data } => {
            let payload: serde_json::Value =
                serde_json::from_str(&data).context("--data is not valid JSON")?;
            session.social_login(&provider, payload).await?;
            println!("Login successful.");
        }
        Commands::MagicLink { token } => {
            session.magic_link_login(&token).await?;
            println!("Login successful.");
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            session.logout();
            println!("Logged out.");
        }
        Commands::Status => {
            if let Err(e) = session.mount().await {
                tracing::warn!("Session check failed: {}", e);
            }
            status(&session);
        }
        Commands::Whoami => {
            require_session(&session).await?;
            let profile = session.client().get("user/me").await.map_err(login_hint)?;
            print_response(profile, None)?;
        }
        Commands::Call {
            path,
            method,
            data,
            params,
            output,
        } => {
            require_session(&session).await?;
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Unknown HTTP method '{}'", method))?;

            let mut request = ApiRequest::new(method, path);
            if let Some(data) = data {
                request = request.json(serde_json::from_str(&data).context("--data is not valid JSON")?);
            }
            for param in params {
                let (key, value) = param
                    .split_once('=')
                    .with_context(|| format!("Query parameter '{}' is not key=value", param))?;
                request = request.query(key, value);
            }
            if output.is_some() {
                request = request.binary();
            }

            let response = session
                .client()
                .execute(&request)
                .await
                .map_err(login_hint)?;
            print_response(response, output)?;
        }
        Commands::CheckPassword { password } => {
            let verdict = session.check_password_strength(&password).await?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }

    Ok(())
}

fn open_session(settings: Settings) -> Result<Arc<SessionManager>> {
    let state_path = settings.state_path()?;
    let store = FileStore::open(&state_path)
        .with_context(|| format!("Failed to open session state at {}", state_path.display()))?;

    Ok(Arc::new(SessionManager::new(
        settings,
        Arc::new(ReqwestTransport::new()),
        Arc::new(store),
    )))
}

/// Restore the persisted session, refreshing if needed.
async fn require_session(session: &SessionManager) -> Result<()> {
    session.mount().await?;
    if !session.is_authenticated() {
        bail!("Not logged in. Run 'console-cli login'.");
    }
    Ok(())
}

/// Point the user at `login` when a call ended the session.
fn login_hint(e: SessionError) -> anyhow::Error {
    if e.is_auth_failure() {
        anyhow::Error::new(e).context("Session ended. Run 'console-cli login'.")
    } else {
        e.into()
    }
}

fn status(session: &SessionManager) {
    let state = session.state();

    println!("Session:     {:?}", state.phase);
    match &state.current_subject {
        Some(subject) => println!("Subject:     {}", subject),
        None => println!("Subject:     none"),
    }
    if let Some(client_id) = &state.client_id {
        println!("Client ID:   {}", client_id);
    }
    if let Some(exp) = state
        .access_expires_at
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    {
        println!("  expires_at: {}", exp.to_rfc3339());
    }
    println!("Roles:       {}", join_or_none(&state.roles));
    println!("Scopes:      {}", join_or_none(&state.scopes));

    if !state.is_authenticated {
        println!("\nRun 'console-cli login' to authenticate.");
    }
}

fn join_or_none(names: &std::collections::BTreeSet<String>) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn print_response(response: ApiResponse, output: Option<PathBuf>) -> Result<()> {
    match response {
        ApiResponse::Json(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        ApiResponse::Binary(bytes) => match output {
            Some(path) => {
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote {} bytes to {}", bytes.len(), path.display());
            }
            None => {
                io::stdout().write_all(&bytes)?;
            }
        },
        ApiResponse::RateLimited(limited) => {
            eprintln!("{}: {} (HTTP {})", limited.error, limited.msg, limited.status);
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
