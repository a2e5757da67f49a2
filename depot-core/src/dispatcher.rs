//! The authenticated request dispatcher.
//!
//! [`Dispatcher`] is the single entry point for API calls. It attaches the
//! stored access credential, performs the call, and turns every outcome into
//! an [`Envelope`]. An expired credential (401) is recovered transparently:
//! the call waits on the shared [`RefreshCoordinator`] and is replayed once
//! with the new credential. A 401 that survives the replay, or a failed
//! refresh, ends the session: the store is cleared and the logout hook runs
//! once for the episode.
//!
//! # Example
//!
//! ```rust,no_run
//! use depot_core::{ClientConfig, Dispatcher, RequestDescriptor};
//!
//! # async fn example() -> Result<(), depot_core::DepotError> {
//! let config = ClientConfig::new("https://depot.example.com/api")?;
//! let dispatcher = Dispatcher::builder(config)
//!     .on_logout(|| eprintln!("session expired"))
//!     .build()?;
//!
//! dispatcher.login("clerk@example.com", "hunter2").await;
//!
//! let products = dispatcher
//!     .dispatch(RequestDescriptor::get("/products").query("page", "1"))
//!     .await;
//! if products.is_success() {
//!     println!("{}", products.data());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::classify::{Classification, ErrorKind, Failure, classify};
use crate::config::ClientConfig;
use crate::envelope::{Envelope, StatusCode, normalize, normalize_error};
use crate::error::DepotError;
use crate::hooks::{LogoutHandler, NoopHooks, Notifier};
use crate::refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
use crate::request::RequestDescriptor;
use crate::store::{Credential, CredentialStore, MemoryCredentialStore, Secret};
use crate::transport::{HttpRequest, HttpTransport, RawResponse, Transport, TransportError};

/// Builder for [`Dispatcher`].
///
/// Unset collaborators default to an [`HttpTransport`], a
/// [`MemoryCredentialStore`], and [`NoopHooks`].
pub struct DispatcherBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CredentialStore>>,
    logout: Arc<dyn LogoutHandler>,
    notifier: Arc<dyn Notifier>,
}

impl DispatcherBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Side effect run once per terminal authentication failure.
    pub fn on_logout(mut self, handler: impl LogoutHandler + 'static) -> Self {
        self.logout = Arc::new(handler);
        self
    }

    /// Collaborator shown user-facing failures.
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn build(self) -> Result<Dispatcher, DepotError> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config.user_agent)?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));

        Ok(Dispatcher {
            coordinator: RefreshCoordinator::new(store.clone()),
            config: self.config,
            transport,
            store,
            logout: self.logout,
            notifier: self.notifier,
            session_ended: AtomicBool::new(false),
        })
    }
}

/// Authenticated API client.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct Dispatcher {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
    logout: Arc<dyn LogoutHandler>,
    notifier: Arc<dyn Notifier>,
    /// Set once the current session has been torn down; cleared when a
    /// credential is stored again.
    session_ended: AtomicBool,
}

impl Dispatcher {
    pub fn builder(config: ClientConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            transport: None,
            store: None,
            logout: Arc::new(NoopHooks),
            notifier: Arc::new(NoopHooks),
        }
    }

    /// Dispatcher with default collaborators.
    pub fn new(config: ClientConfig) -> Result<Self, DepotError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Perform a call and normalize its outcome.
    ///
    /// Never fails: transport errors, HTTP errors and authentication
    /// failures all come back as failure envelopes.
    pub async fn dispatch(&self, descriptor: RequestDescriptor) -> Envelope {
        let span = tracing::debug_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %descriptor.method(),
            path = descriptor.path(),
        );
        self.run(descriptor).instrument(span).await
    }

    pub async fn get(&self, path: &str) -> Envelope {
        self.dispatch(RequestDescriptor::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Envelope {
        self.dispatch(RequestDescriptor::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Envelope {
        self.dispatch(RequestDescriptor::put(path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Envelope {
        self.dispatch(RequestDescriptor::patch(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Envelope {
        self.dispatch(RequestDescriptor::delete(path)).await
    }

    /// Exchange email and password for a session.
    ///
    /// On success the returned token pair is stored and a new session
    /// episode begins.
    pub async fn login(&self, email: &str, password: &str) -> Envelope {
        let descriptor = RequestDescriptor::post(&self.config.login_path)
            .json(json!({ "email": email, "password": password }))
            .skip_auth()
            .skip_refresh();

        let raw = match self.send(&descriptor, None).await {
            Ok(raw) if raw.is_success() => raw,
            Ok(raw) => return self.fail(&descriptor, &Failure::Status(raw), Classification::NonAuth),
            Err(e) => {
                return self.fail(&descriptor, &Failure::Transport(e), Classification::NonAuth);
            }
        };

        let envelope = normalize(&raw);
        if !envelope.is_success() {
            return envelope;
        }

        let credential = raw
            .body
            .as_ref()
            .and_then(|body| Credential::from_response_body(body, None));
        let Some(credential) = credential else {
            warn!("Login response did not contain a token pair");
            return Envelope::failure(
                Some(StatusCode::Http(raw.status)),
                "login response did not contain a token pair",
            );
        };

        if let Err(e) = self.set_credential(&credential).await {
            warn!("Failed to store session after login: {}", e);
            return Envelope::failure(None, format!("failed to store session: {}", e));
        }

        info!("Logged in as {}", email);
        envelope
    }

    /// End the session.
    ///
    /// Notifies the server on a best-effort basis, then clears the store.
    /// The logout hook is not invoked; it is reserved for sessions that end
    /// through authentication failure.
    pub async fn logout(&self) -> Result<Envelope, DepotError> {
        let Some(credential) = self.store.get().await? else {
            return Ok(Envelope::local_success("no active session"));
        };

        let descriptor = RequestDescriptor::post(&self.config.logout_path)
            .json(json!({ "refreshToken": credential.refresh_token.expose() }))
            .skip_refresh()
            .silent();
        let envelope = self.dispatch(descriptor).await;
        if !envelope.is_success() {
            debug!("Server-side logout failed; clearing local session anyway");
        }

        self.store.clear().await?;
        info!("Logged out");
        Ok(envelope)
    }

    /// Force a refresh, joining any cycle already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator
            .request_refresh(|| self.exchange_refresh_token())
            .await
    }

    /// Install a credential obtained elsewhere and begin a new session episode.
    pub async fn set_credential(&self, credential: &Credential) -> Result<(), DepotError> {
        self.store.set(credential).await?;
        self.session_ended.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The credential currently stored, if any.
    pub async fn credential(&self) -> Result<Option<Credential>, DepotError> {
        Ok(self.store.get().await?)
    }

    async fn run(&self, mut descriptor: RequestDescriptor) -> Envelope {
        loop {
            let bearer = self.bearer_for(&descriptor).await;
            let failure = match self.send(&descriptor, bearer.as_ref()).await {
                Ok(raw) if raw.is_success() => return normalize(&raw),
                Ok(raw) => Failure::Status(raw),
                Err(e) => Failure::Transport(e),
            };

            if descriptor.skips_refresh() {
                return self.fail(&descriptor, &failure, Classification::NonAuth);
            }

            let is_refresh_call = self.config.is_refresh_path(descriptor.path());
            match classify(&failure, descriptor.is_retried(), is_refresh_call) {
                Classification::NonAuth => {
                    return self.fail(&descriptor, &failure, Classification::NonAuth);
                }
                Classification::Terminal => {
                    self.end_session().await;
                    return self.fail(&descriptor, &failure, Classification::Terminal);
                }
                Classification::RefreshEligible => {
                    if self.rotated_since(bearer.as_ref()).await {
                        debug!("Credential was refreshed while the call was in flight; replaying");
                        descriptor = descriptor.to_retry();
                        continue;
                    }
                    debug!("Access credential rejected, requesting refresh");
                    match self.refresh().await {
                        Ok(_) => {
                            debug!("Replaying request with refreshed credential");
                            descriptor = descriptor.to_retry();
                        }
                        Err(e) => {
                            self.end_session().await;
                            let envelope = e.to_envelope();
                            self.maybe_notify(&descriptor, &envelope, ErrorKind::AuthTerminal);
                            return envelope;
                        }
                    }
                }
            }
        }
    }

    /// The access token to attach, unless the call opts out of auth.
    async fn bearer_for(&self, descriptor: &RequestDescriptor) -> Option<Secret> {
        if descriptor.skips_auth() {
            return None;
        }
        match self.store.get().await {
            Ok(Some(credential)) => Some(credential.access_token.clone()),
            Ok(None) => {
                debug!("No stored credential; sending unauthenticated");
                None
            }
            Err(e) => {
                warn!("Failed to read stored credential: {}", e);
                None
            }
        }
    }

    /// Whether the stored access token differs from the one a call carried.
    async fn rotated_since(&self, bearer: Option<&Secret>) -> bool {
        let Some(bearer) = bearer else {
            return false;
        };
        match self.store.get().await {
            Ok(Some(credential)) => credential.access_token.expose() != bearer.expose(),
            _ => false,
        }
    }

    /// Put one attempt on the wire.
    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        bearer: Option<&Secret>,
    ) -> Result<RawResponse, TransportError> {
        let mut url = self
            .config
            .endpoint(descriptor.path())
            .map_err(|e| TransportError::Network {
                message: e.to_string(),
            })?;
        if !descriptor.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.query_pairs());
        }

        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        headers.extend(descriptor.headers().iter().cloned());
        if let Some(bearer) = bearer {
            debug!("Attaching bearer credential");
            headers.push((
                "Authorization".to_string(),
                format!("Bearer {}", bearer.expose()),
            ));
        }

        let timeout = descriptor
            .timeout_override()
            .unwrap_or_else(|| self.config.timeout());
        let request = HttpRequest {
            method: descriptor.method().clone(),
            url,
            headers,
            body: descriptor.body().cloned(),
            timeout,
        };

        // The deadline holds whether or not the transport enforces it.
        tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .unwrap_or(Err(TransportError::Timeout { timeout }))
    }

    /// The refresh call itself. Runs only as a coordinator leader.
    async fn exchange_refresh_token(&self) -> RefreshOutcome {
        let refresh_token = match self.store.get().await {
            Ok(Some(credential)) if !credential.refresh_token.is_empty() => {
                credential.refresh_token.clone()
            }
            Ok(_) => return Err(RefreshError::MissingRefreshToken),
            Err(e) => {
                return Err(RefreshError::Storage {
                    message: e.to_string(),
                });
            }
        };

        let descriptor = RequestDescriptor::post(&self.config.refresh_path)
            .json(json!({ "refreshToken": refresh_token.expose() }))
            .skip_auth()
            .skip_refresh()
            .silent();

        let raw = match self.send(&descriptor, None).await {
            Ok(raw) if raw.is_success() => raw,
            Ok(raw) => return Err(RefreshError::Rejected(normalize_error(&Failure::Status(raw)))),
            Err(e) => return Err(RefreshError::Rejected(normalize_error(&Failure::Transport(e)))),
        };

        let envelope = normalize(&raw);
        if !envelope.is_success() {
            return Err(RefreshError::Rejected(envelope));
        }

        let credential = raw
            .body
            .as_ref()
            .and_then(|body| Credential::from_response_body(body, Some(&refresh_token)))
            .ok_or(RefreshError::MalformedResponse)?;

        self.session_ended.store(false, Ordering::SeqCst);
        Ok(credential)
    }

    /// Clear the session and run the logout hook, once per episode.
    async fn end_session(&self) {
        if self.session_ended.swap(true, Ordering::SeqCst) {
            debug!("Session already ended; skipping logout");
            return;
        }

        warn!("Authentication failed terminally; ending session");
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear stored credential: {}", e);
        }
        self.logout.on_logout();
    }

    fn fail(
        &self,
        descriptor: &RequestDescriptor,
        failure: &Failure,
        classification: Classification,
    ) -> Envelope {
        let envelope = normalize_error(failure);
        let kind = ErrorKind::of(failure, classification);
        debug!(
            "Request failed ({}): {}",
            kind,
            envelope.message().unwrap_or_default()
        );
        self.maybe_notify(descriptor, &envelope, kind);
        envelope
    }

    fn maybe_notify(&self, descriptor: &RequestDescriptor, envelope: &Envelope, kind: ErrorKind) {
        if descriptor.is_silent() || kind == ErrorKind::RateLimited {
            return;
        }

        let notify = match envelope.status_code().map(StatusCode::as_http) {
            Some(Some(status)) => self.config.notifies_status(status),
            Some(None) => self.config.notify_transport_errors,
            None => false,
        };
        if notify {
            self.notifier.notify(envelope);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.config.base_url.as_str())
            .field("coordinator", &self.coordinator)
            .field("session_ended", &self.session_ended.load(Ordering::SeqCst))
            .finish()
    }
}
