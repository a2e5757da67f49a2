//! Session plumbing for one CLI invocation: where the credential lives and
//! how failures are reported to the terminal.

use anyhow::{Context, Result};
use clap::ValueEnum;
use depot_core::{Dispatcher, Envelope, FileCredentialStore, StoreKind, create_store};
use tracing::debug;

use crate::config::LoadedConfig;

/// Keyring service name the session is stored under.
const KEYRING_SERVICE: &str = "depot";

/// Credential backend selectable with `--store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// JSON file in the user data directory
    File,
    /// OS keyring, falling back to memory when unavailable
    Keyring,
    /// Process memory only; nothing survives the command
    Memory,
}

impl StoreArg {
    pub fn to_kind(self) -> Result<StoreKind> {
        Ok(match self {
            Self::File => StoreKind::File(
                FileCredentialStore::default_path()
                    .context("Cannot locate a data directory for the session file")?,
            ),
            Self::Keyring => StoreKind::Keyring(KEYRING_SERVICE.to_string()),
            Self::Memory => StoreKind::Memory,
        })
    }
}

/// Build the dispatcher for this invocation with terminal hooks attached.
pub fn build_dispatcher(config: &LoadedConfig, store: StoreArg) -> Result<Dispatcher> {
    let kind = store.to_kind()?;
    debug!(?kind, "Using credential store");

    Dispatcher::builder(config.client.clone())
        .store(create_store(kind))
        .notifier(notify_stderr)
        .on_logout(relogin_hint)
        .build()
        .context("Failed to build API client")
}

fn notify_stderr(envelope: &Envelope) {
    eprintln!("{}", describe_failure(envelope));
}

fn relogin_hint() {
    eprintln!("Session expired. Run `depot login <email>` to sign in again.");
}

/// One-line description of a failure envelope.
pub fn describe_failure(envelope: &Envelope) -> String {
    let message = envelope.message().unwrap_or("request failed");
    match envelope.status_code() {
        Some(status) => format!("error [{}]: {}", status, message),
        None => format!("error: {}", message),
    }
}
