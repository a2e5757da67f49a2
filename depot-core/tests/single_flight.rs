//! Single-flight refresh through the dispatcher, driven by an in-process
//! transport so that every caller is provably parked before the refresh
//! call is allowed to complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use depot_core::{
    ClientConfig, Credential, CredentialStore, Dispatcher, Envelope, HttpRequest,
    MemoryCredentialStore, RawResponse, RefreshState, RequestDescriptor, StatusCode, Transport,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

/// Serves `/products/*` for `Bearer fresh-access` only, and answers the
/// refresh endpoint once a permit is released by the test. Calls under
/// `/slow/` are held until `slow_gate` releases them.
struct ScriptedTransport {
    refresh_gate: Semaphore,
    refresh_succeeds: bool,
    refresh_calls: AtomicUsize,
    seen_refresh_bodies: Mutex<Vec<serde_json::Value>>,
    slow_gate: Semaphore,
    slow_entered: AtomicUsize,
}

impl ScriptedTransport {
    fn new(refresh_succeeds: bool) -> Arc<Self> {
        Arc::new(Self {
            refresh_gate: Semaphore::new(0),
            refresh_succeeds,
            refresh_calls: AtomicUsize::new(0),
            seen_refresh_bodies: Mutex::new(Vec::new()),
            slow_gate: Semaphore::new(0),
            slow_entered: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let path = request.url.path().to_string();

        if path == "/api/auth/refresh" {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_refresh_bodies
                .lock()
                .push(request.body.clone().unwrap_or_default());
            assert!(request.header("authorization").is_none());

            let permit = self.refresh_gate.acquire().await.map_err(|e| {
                TransportError::Network {
                    message: e.to_string(),
                }
            })?;
            permit.forget();

            return Ok(if self.refresh_succeeds {
                RawResponse::json(
                    200,
                    json!({
                        "success": true,
                        "data": { "accessToken": "fresh-access", "refreshToken": "fresh-refresh" }
                    }),
                )
            } else {
                RawResponse::json(401, json!({ "success": false, "message": "Refresh token expired" }))
            });
        }

        if path.starts_with("/api/slow/") {
            self.slow_entered.fetch_add(1, Ordering::SeqCst);
            let permit = self.slow_gate.acquire().await.map_err(|e| {
                TransportError::Network {
                    message: e.to_string(),
                }
            })?;
            permit.forget();
        }

        match request.header("authorization") {
            Some("Bearer fresh-access") => Ok(RawResponse::json(
                200,
                json!({ "success": true, "data": { "path": path }, "message": "ok" }),
            )),
            _ => Ok(RawResponse::json(
                401,
                json!({ "success": false, "message": "Access token expired" }),
            )),
        }
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

fn dispatcher(
    transport: Arc<ScriptedTransport>,
    logouts: Arc<AtomicUsize>,
) -> (Arc<Dispatcher>, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
        "stale-access",
        "stale-refresh",
    )));
    let dispatcher = Dispatcher::builder(ClientConfig::default())
        .transport(transport)
        .store(store.clone())
        .on_logout(move || {
            logouts.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    (Arc::new(dispatcher), store)
}

fn spawn_calls(dispatcher: &Arc<Dispatcher>, n: usize) -> Vec<tokio::task::JoinHandle<Envelope>> {
    (0..n)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(RequestDescriptor::get(format!("/products/{}", i)))
                    .await
            })
        })
        .collect()
}

#[tokio::test]
async fn test_concurrent_expiry_triggers_one_refresh() {
    const CALLERS: usize = 10;

    let transport = ScriptedTransport::new(true);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, store) = dispatcher(transport.clone(), logouts.clone());

    let calls = spawn_calls(&dispatcher, CALLERS);
    wait_until(|| {
        dispatcher.coordinator().is_refreshing()
            && dispatcher.coordinator().queued() == CALLERS - 1
    })
    .await;

    transport.refresh_gate.add_permits(1);

    for (i, call) in calls.into_iter().enumerate() {
        let envelope = call.await.unwrap();
        assert!(envelope.is_success(), "call {} failed: {:?}", i, envelope);
        assert_eq!(envelope.data(), &json!({ "path": format!("/api/products/{}", i) }));
    }

    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.coordinator().cycles(), 1);
    assert_eq!(logouts.load(Ordering::SeqCst), 0);
    assert_eq!(
        transport.seen_refresh_bodies.lock().as_slice(),
        &[json!({ "refreshToken": "stale-refresh" })]
    );

    let stored = store.get().await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "fresh-access");
    assert_eq!(stored.refresh_token.expose(), "fresh-refresh");
}

#[tokio::test]
async fn test_failed_refresh_logs_out_once() {
    const CALLERS: usize = 6;

    let transport = ScriptedTransport::new(false);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, store) = dispatcher(transport.clone(), logouts.clone());

    let calls = spawn_calls(&dispatcher, CALLERS);
    wait_until(|| dispatcher.coordinator().queued() == CALLERS - 1).await;

    transport.refresh_gate.add_permits(1);

    for call in calls {
        let envelope = call.await.unwrap();
        assert!(envelope.is_error());
        assert_eq!(envelope.status_code(), Some(&StatusCode::Http(401)));
        assert_eq!(envelope.message(), Some("Refresh token expired"));
    }

    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
    assert!(store.get().await.unwrap().is_none());
}

#[tokio::test]
async fn test_session_episode_rearms_after_login_credential() {
    let transport = ScriptedTransport::new(false);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, _store) = dispatcher(transport.clone(), logouts.clone());
    transport.refresh_gate.add_permits(10);

    let first = dispatcher.get("/products/1").await;
    assert!(first.is_error());
    assert_eq!(logouts.load(Ordering::SeqCst), 1);

    // Without a credential the next refresh fails locally; same episode.
    let second = dispatcher.get("/products/2").await;
    assert!(second.is_error());
    assert_eq!(logouts.load(Ordering::SeqCst), 1);
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);

    // A new session starts a new episode.
    dispatcher
        .set_credential(&Credential::new("stale-again", "refresh-again"))
        .await
        .unwrap();
    let third = dispatcher.get("/products/3").await;
    assert!(third.is_error());
    assert_eq!(logouts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_forced_refresh_joins_in_flight_cycle() {
    let transport = ScriptedTransport::new(true);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, _store) = dispatcher(transport.clone(), logouts);

    let call = spawn_calls(&dispatcher, 1).remove(0);
    wait_until(|| dispatcher.coordinator().is_refreshing()).await;

    let forced = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.refresh().await })
    };
    wait_until(|| dispatcher.coordinator().queued() == 1).await;
    transport.refresh_gate.add_permits(1);

    let credential = forced.await.unwrap().unwrap();
    assert_eq!(credential.access_token.expose(), "fresh-access");
    assert!(call.await.unwrap().is_success());
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);

    // The next forced refresh starts a new cycle of its own.
    transport.refresh_gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), dispatcher.refresh())
        .await
        .expect("refresh should not hang")
        .unwrap();
    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.coordinator().cycles(), 2);
}

#[tokio::test]
async fn test_cancelled_leader_hands_refresh_to_waiting_caller() {
    let transport = ScriptedTransport::new(true);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, store) = dispatcher(transport.clone(), logouts.clone());

    let leader = spawn_calls(&dispatcher, 1).remove(0);
    wait_until(|| dispatcher.coordinator().is_refreshing()).await;

    let follower = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.get("/products/7").await })
    };
    wait_until(|| dispatcher.coordinator().queued() == 1).await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    wait_until(|| transport.refresh_calls.load(Ordering::SeqCst) == 2).await;
    transport.refresh_gate.add_permits(1);

    let envelope = follower.await.unwrap();
    assert!(envelope.is_success(), "follower failed: {:?}", envelope);
    assert_eq!(envelope.data(), &json!({ "path": "/api/products/7" }));

    assert_eq!(logouts.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.coordinator().cycles(), 2);
    let stored = store.get().await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "fresh-access");
}

#[tokio::test]
async fn test_late_stale_rejection_replays_without_second_refresh() {
    let transport = ScriptedTransport::new(true);
    let logouts = Arc::new(AtomicUsize::new(0));
    let (dispatcher, _store) = dispatcher(transport.clone(), logouts.clone());

    // Sent with the stale token, answered only after the refresh settles.
    let late = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.get("/slow/1").await })
    };
    wait_until(|| transport.slow_entered.load(Ordering::SeqCst) == 1).await;

    transport.refresh_gate.add_permits(1);
    assert!(dispatcher.get("/products/1").await.is_success());
    assert_eq!(dispatcher.coordinator().state(), RefreshState::Idle);

    transport.slow_gate.add_permits(2);
    let envelope = late.await.unwrap();
    assert!(envelope.is_success(), "late call failed: {:?}", envelope);

    assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.coordinator().cycles(), 1);
    assert_eq!(logouts.load(Ordering::SeqCst), 0);
}

/// Accepts every call and never answers.
struct SilentTransport;

#[async_trait]
impl Transport for SilentTransport {
    async fn send(&self, _request: HttpRequest) -> Result<RawResponse, TransportError> {
        std::future::pending::<Result<RawResponse, TransportError>>().await
    }
}

#[tokio::test]
async fn test_deadline_applies_to_any_transport() {
    let logouts = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
        "access", "refresh",
    )));
    let dispatcher = {
        let logouts = logouts.clone();
        Dispatcher::builder(ClientConfig::default())
            .transport(Arc::new(SilentTransport))
            .store(store.clone())
            .on_logout(move || {
                logouts.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
    };

    let envelope = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.dispatch(
            RequestDescriptor::get("/inventory").timeout(Duration::from_millis(50)),
        ),
    )
    .await
    .expect("dispatch should give up at the request deadline");

    assert!(envelope.is_error());
    assert_eq!(
        envelope.status_code(),
        Some(&StatusCode::Code("ETIMEDOUT".to_string()))
    );
    assert_eq!(logouts.load(Ordering::SeqCst), 0);
    assert!(store.get().await.unwrap().is_some());
}
