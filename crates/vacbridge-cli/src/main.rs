//! vacbridge - runs a robot vacuum session and logs state changes.
//!
//! This is the startup sequence a smart-home bridge runs against the core:
//! load configuration, sign in, discover devices, poll, and consume the
//! change event stream until shut down.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vacbridge_core::api::ApiClient;
use vacbridge_core::auth::{CredentialStore, LoginCredentials, SessionManager};
use vacbridge_core::models::TokenKind;
use vacbridge_core::{Bridge, Config};

const USAGE: &str = "\
Usage: vacbridge [--config <path>] [--login | --logout | --status]

  (no command)   sign in, poll configured devices, log every change
  --login        sign in with the configured method (prompting for
                 missing email/password) and store the token
  --logout       delete both stored tokens
  --status       refresh every device once and print its state as JSON";

enum Command {
    Run,
    Login,
    Logout,
    Status,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args() -> Result<Option<Args>> {
    let mut command = Command::Run;
    let mut config_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--login" => command = Command::Login,
            "--logout" => command = Command::Logout,
            "--status" => command = Command::Status,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument: {}\n\n{}", other, USAGE),
        }
    }

    Ok(Some(Args {
        command,
        config_path,
    }))
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the state directory is writable, to a daily
/// rolling file beside the token files. The returned guard flushes the
/// file writer on drop and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "vacbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .context("Failed to load configuration")?;
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let Some(args) = parse_args()? else {
        return Ok(());
    };
    let mut config = load_config(args.config_path.as_deref())?;

    let log_dir = config.state_dir().ok().map(|dir| dir.join("logs"));
    let _guard = init_tracing(log_dir.as_deref());
    info!("vacbridge starting");

    let result = match args.command {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
        Command::Login => {
            prompt_missing_credentials(&mut config)?;
            login(config).await
        }
        Command::Logout => logout(&config),
    };

    if let Err(ref e) = result {
        error!(error = %e, "vacbridge failed");
    }
    info!("vacbridge shutting down");
    result
}

/// Poll until interrupted, logging every change event.
async fn run(config: Config) -> Result<()> {
    let mut bridge = Bridge::init(config).await.context("Failed to start bridge")?;
    if bridge.vacuums().is_empty() {
        warn!("No manageable devices; add serial numbers to `dsns` in the config");
    }

    let mut events = bridge
        .take_events()
        .context("Change event stream already taken")?;
    bridge.start_polling();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                info!(
                    dsn = %event.dsn,
                    property = %event.property,
                    previous = ?event.previous,
                    current = %event.current,
                    "Device state changed"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    bridge.shutdown();
    Ok(())
}

/// Refresh every device once and print its typed state.
async fn status(config: Config) -> Result<()> {
    let bridge = Bridge::init(config).await.context("Failed to start bridge")?;

    let mut report = Vec::new();
    for vacuum in bridge.vacuums() {
        if let Err(e) = vacuum.refresh().await {
            warn!(dsn = %vacuum.dsn(), error = %e, "Refresh failed, showing cached state");
        }
        report.push(serde_json::json!({
            "dsn": vacuum.dsn(),
            "name": vacuum.identity().name,
            "model": vacuum.identity().model,
            "docked": vacuum.is_docked(),
            "charging": vacuum.is_charging(),
            "operating_mode": vacuum.operating_mode(),
            "power_mode": vacuum.power_mode(),
            "battery_level": vacuum.battery_level(),
            "error_code": vacuum.error_code(),
        }));
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Ask for whatever half of the email/password pair is missing, unless an
/// OAuth code is configured instead.
fn prompt_missing_credentials(config: &mut Config) -> Result<()> {
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if has(&config.oauth_code) && !has(&config.email) && !has(&config.password) {
        return Ok(());
    }

    if !has(&config.email) {
        print!("Email: ");
        io::stdout().flush()?;
        let mut email = String::new();
        io::stdin()
            .lock()
            .read_line(&mut email)
            .context("Failed to read email")?;
        config.email = Some(email.trim().to_string());
    }
    if !has(&config.password) {
        let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
        config.password = Some(password);
    }
    Ok(())
}

async fn login(config: Config) -> Result<()> {
    config.validate()?;
    let client = ApiClient::new(config.endpoints(), config.app.clone(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    let session = SessionManager::new(
        client,
        credential_store(&config)?,
        LoginCredentials::from_config(&config),
    );

    let signed_in = session.sign_in().await.context("Login failed")?;
    println!(
        "Signed in; token valid until {}.",
        signed_in.token.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

fn credential_store(config: &Config) -> Result<CredentialStore> {
    Ok(CredentialStore::new(
        config.primary_token_path()?,
        config.oauth_token_path()?,
    ))
}

fn logout(config: &Config) -> Result<()> {
    let store = credential_store(config)?;
    store.clear(TokenKind::Primary)?;
    store.clear(TokenKind::OAuth)?;
    println!("Stored tokens removed.");
    Ok(())
}
