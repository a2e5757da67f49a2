//! Depot CLI
//!
//! Command-line client for the Depot warehouse API.
//!
//! # Usage
//!
//! ```bash
//! # Sign in; the session is kept in the user data directory
//! depot login clerk@example.com
//!
//! # Call any endpoint with the stored session
//! depot request GET /inventory --query warehouse=north
//! depot request POST /products --data '{"sku": "PX-1", "quantity": 4}'
//!
//! # Show and end the session
//! depot status
//! depot logout
//! ```

mod config;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use depot_core::{Envelope, Method, RequestDescriptor};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::session::StoreArg;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Authenticated client for the Depot warehouse API")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the client configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Where the session credential is kept
    #[arg(long, global = true, value_enum, default_value_t = StoreArg::File)]
    store: StoreArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        /// Account email
        email: String,

        /// Account password (prompted for when omitted)
        #[arg(short, long, env = "DEPOT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session and forget the stored credential
    Logout,

    /// Show the configured API and the stored session
    Status,

    /// Call an API endpoint with the stored session
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
        method: String,

        /// Path relative to the base URL (e.g., /inventory)
        path: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,

        /// Query parameter, repeatable
        #[arg(short, long = "query", value_name = "KEY=VALUE", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,

        /// Send the request without credentials
        #[arg(long)]
        no_auth: bool,

        /// Return a 401 as-is instead of refreshing the session
        #[arg(long)]
        no_refresh: bool,

        /// Do not print failure notifications
        #[arg(long)]
        silent: bool,

        /// Per-request timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let loaded = config::load_config(cli.config.as_deref(), cli.base_url.as_deref())?;
    debug!(
        "Loaded configuration from {:?} (file present: {})",
        loaded.config_path, loaded.from_file
    );

    let dispatcher = session::build_dispatcher(&loaded, cli.store)?;

    let envelope = match cli.command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password()?,
            };
            dispatcher.login(&email, &password).await
        }
        Commands::Logout => dispatcher.logout().await?,
        Commands::Status => {
            print_status(&loaded, cli.store, &dispatcher).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Request {
            method,
            path,
            data,
            query,
            no_auth,
            no_refresh,
            silent,
            timeout,
        } => {
            let mut descriptor = RequestDescriptor::new(parse_method(&method)?, path);
            for (name, value) in query {
                descriptor = descriptor.query(name, value);
            }
            if let Some(data) = data {
                let body = serde_json::from_str(&data).context("--data is not valid JSON")?;
                descriptor = descriptor.json(body);
            }
            if no_auth {
                descriptor = descriptor.skip_auth();
            }
            if no_refresh {
                descriptor = descriptor.skip_refresh();
            }
            if silent {
                descriptor = descriptor.silent();
            }
            if let Some(secs) = timeout {
                descriptor = descriptor.timeout(Duration::from_secs(secs));
            }
            dispatcher.dispatch(descriptor).await
        }
    };

    print_envelope(&envelope)?;

    Ok(if envelope.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_envelope(envelope: &Envelope) -> Result<()> {
    let rendered = serde_json::to_string_pretty(envelope).context("Failed to render response")?;
    println!("{}", rendered);
    Ok(())
}

async fn print_status(
    loaded: &config::LoadedConfig,
    store: StoreArg,
    dispatcher: &depot_core::Dispatcher,
) -> Result<()> {
    println!("API:     {}", dispatcher.config().base_url);
    if loaded.from_file {
        println!("Config:  {}", loaded.config_path.display());
    } else {
        println!("Config:  defaults ({} not found)", loaded.config_path.display());
    }
    println!("Store:   {:?}", store);

    match dispatcher
        .credential()
        .await
        .context("Failed to read stored session")?
    {
        Some(credential) => println!(
            "Session: signed in since {}",
            credential
                .issued_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("Session: not signed in"),
    }
    Ok(())
}

fn prompt_password() -> Result<String> {
    // Prompt for password (hidden)
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    require_password(password)
}

fn require_password(password: String) -> Result<String> {
    if password.is_empty() {
        bail!("A password is required");
    }
    Ok(password)
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method {:?}", method))
}

fn parse_query_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", pair)),
    }
}
