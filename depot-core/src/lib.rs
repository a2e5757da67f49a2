//! # Depot Core
//!
//! Authenticated request pipeline for the Depot warehouse-management API.
//!
//! This crate provides:
//! - [`Dispatcher`] - attaches credentials, performs calls, and normalizes results
//! - [`RefreshCoordinator`] - single-flight credential refresh with a queue of parked callers
//! - [`classify`] - pure classification of failed calls
//! - [`Envelope`] - the uniform `{success, error, data, statusCode, message}` result
//! - [`CredentialStore`] - memory, file, and (optionally) keyring-backed session storage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use depot_core::{ClientConfig, Dispatcher};
//!
//! let dispatcher = Dispatcher::new(ClientConfig::new("https://depot.example.com/api")?)?;
//! dispatcher.login("clerk@example.com", "hunter2").await;
//!
//! let inventory = dispatcher.get("/inventory").await;
//! println!("{}", serde_json::to_string_pretty(&inventory)?);
//! ```

pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod refresh;
pub mod request;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use classify::{Classification, ErrorKind, Failure, classify};

pub use config::{ClientConfig, ConfigError};

pub use dispatcher::{Dispatcher, DispatcherBuilder};

pub use envelope::{Envelope, StatusCode, normalize, normalize_error};

pub use error::DepotError;

pub use hooks::{LogoutHandler, NoopHooks, Notifier};

pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome, RefreshState};

pub use request::RequestDescriptor;

pub use store::{
    Credential,
    CredentialStore,
    FileCredentialStore,
    MemoryCredentialStore,
    Secret,
    StoreError,
    StoreKind,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringCredentialStore;

pub use transport::{HttpRequest, HttpTransport, Method, RawResponse, Transport, TransportError};
