//! Test helpers for guard integration tests.
//!
//! Provides a guard harness on a manual clock, scripted verifiers, and a
//! stub identity provider served with axum for the remote client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;

use clinic_guard::{
    AuditEvent, AuditEventType, AuditError, AuditSink, AuthGuard, AuthGuardBuilder,
    CredentialVerifier, LocalTable, ManualClock, MemoryAuditSink, MemoryStore, Principal,
    Provider, SessionStore, VerifyError,
};

/// Fixed starting instant for the manual clock.
pub const START_MILLIS: i64 = 1_735_689_600_000;

/// Lockout window in milliseconds.
pub const LOCKOUT_MS: i64 = 15 * 60 * 1000;

/// Idle timeout in milliseconds.
pub const IDLE_MS: i64 = 24 * 60 * 60 * 1000;

/// A guard wired to inspectable collaborators.
pub struct TestGuard {
    pub guard: AuthGuard,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestGuard {
    /// Guard over the seeded local table.
    pub fn local() -> Self {
        Self::from_builder(AuthGuard::builder(Arc::new(LocalTable::seeded())))
    }

    /// Finish a builder with a manual clock, memory store and memory audit.
    pub fn from_builder(builder: AuthGuardBuilder) -> Self {
        let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let guard = builder
            .clock(clock.clone())
            .store(store.clone())
            .audit(audit.clone())
            .build();
        Self {
            guard,
            clock,
            store,
            audit,
        }
    }

    /// Rebuild a fresh guard over the same store and clock.
    pub fn reopen(&self, primary: Arc<dyn CredentialVerifier>) -> AuthGuard {
        AuthGuard::builder(primary)
            .clock(self.clock.clone())
            .store(self.store.clone() as Arc<dyn SessionStore>)
            .audit(self.audit.clone())
            .build()
    }

    /// Count recorded audit events of one kind.
    pub fn audited(&self, event_type: AuditEventType) -> usize {
        self.audit.events_of(event_type).len()
    }
}

/// Verifier delegating to the seeded table while counting calls.
pub struct CountingVerifier {
    inner: LocalTable,
    provider: Provider,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn new(provider: Provider) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalTable::seeded(),
            provider,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for CountingVerifier {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn verify(&self, key: &str, secret: &str) -> Result<Principal, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(key, secret).await
    }
}

/// Verifier that can never be reached.
pub struct UnavailableVerifier {
    calls: AtomicUsize,
}

impl UnavailableVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for UnavailableVerifier {
    fn provider(&self) -> Provider {
        Provider::Remote
    }

    async fn verify(&self, _key: &str, _secret: &str) -> Result<Principal, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(VerifyError::Unavailable("connection refused".into()))
    }
}

/// Verifier that never answers.
pub struct StalledVerifier;

#[async_trait]
impl CredentialVerifier for StalledVerifier {
    fn provider(&self) -> Provider {
        Provider::Remote
    }

    async fn verify(&self, _key: &str, _secret: &str) -> Result<Principal, VerifyError> {
        std::future::pending().await
    }
}

/// Audit sink that always fails.
pub struct BrokenAuditSink;

impl AuditSink for BrokenAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Encode("disk full".into()))
    }
}

/// One canned provider answer.
#[derive(Debug, Clone)]
pub struct Route {
    /// Request path, without query.
    pub path: &'static str,
    pub status: u16,
    pub body: String,
}

impl Route {
    pub fn new(path: &'static str, status: u16, body: impl Into<String>) -> Self {
        Self {
            path,
            status,
            body: body.into(),
        }
    }
}

/// Request log shared with the handlers.
type RequestLog = Arc<Mutex<Vec<String>>>;

/// Stub identity provider.
pub struct StubProvider {
    addr: SocketAddr,
    requests: RequestLog,
}

impl StubProvider {
    /// Serve `routes` on an ephemeral local port. Unmatched requests get 404.
    pub async fn start(routes: Vec<Route>) -> Self {
        let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));

        let router = routes
            .into_iter()
            .fold(Router::new(), |router, route| {
                let path = route.path;
                router.route(
                    path,
                    any(move |State(log): State<RequestLog>, method: Method, uri: Uri| {
                        let route = route.clone();
                        async move {
                            log.lock().unwrap().push(format!("{method} {uri}"));
                            canned(route.status, route.body)
                        }
                    }),
                )
            })
            .fallback(not_found)
            .with_state(requests.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { addr, requests }
    }

    /// Base URL for the remote verifier.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, as `METHOD path?query`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose target contains `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.contains(path)).count()
    }
}

fn canned(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn not_found(State(log): State<RequestLog>, method: Method, uri: Uri) -> Response {
    log.lock().unwrap().push(format!("{method} {uri}"));
    canned(404, r#"{"error":"not found"}"#.to_string())
}

/// Token response for a provider user.
pub fn token_body(id: &str, email: &str, name: &str, role: &str, permissions: &[&str]) -> String {
    serde_json::json!({
        "access_token": format!("token-{id}"),
        "token_type": "bearer",
        "user": {
            "id": id,
            "email": email,
            "user_metadata": {
                "name": name,
                "role": role,
                "permissions": permissions,
            }
        }
    })
    .to_string()
}
