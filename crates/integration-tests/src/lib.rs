//! Integration tests for Basket.
//!
//! Spins up an in-process mock of the storefront API and drives a real
//! [`ClientContext`](basket_client::ClientContext) against it over HTTP.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p basket-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `session_flow` - login, persistence, refresh and logout
//! - `cart_sync` - cart persistence and upstream pushes
//! - `offline_queue` - queueing and ordered replay
//! - `authenticated_fetch` - credential handling on API calls
//! - `offline_cache` - precaching and offline page fallback
//!
//! # Mock API
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `POST /api/auth/login` | Accepts [`PASSWORD`] for any email |
//! | `POST /api/auth/register` | Refuses [`TAKEN_EMAIL`] |
//! | `POST /api/auth/magic-link` | Records the email |
//! | `POST /api/auth/refresh` | Issues a new session for a known refresh token |
//! | `POST /api/auth/logout` | Records the bearer token |
//! | `GET /api/me` | 401 unless the bearer token is live |
//! | `POST /api/cart` | Records the command; 503 when unavailable |
//! | `GET /`, `/products`, `/offline.html`, `/manifest.json` | Static pages |

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use basket_client::ClientConfig;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

/// Password the mock accepts for every account.
pub const PASSWORD: &str = "correct horse battery staple";

/// Email the mock treats as already registered.
pub const TAKEN_EMAIL: &str = "taken@example.com";

/// Build an unsigned JWT carrying `sub` and `exp`.
#[must_use]
pub fn jwt(sub: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": exp }).to_string());
    format!("{header}.{payload}.signature")
}

/// A URL on localhost where nothing is listening.
///
/// # Panics
///
/// Panics if no local port can be bound.
pub async fn unreachable_api_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/api/")
}

/// Client configuration tuned for tests: short timeouts and debounce, and
/// background ticks slow enough that only explicit syncs run.
///
/// # Panics
///
/// Panics if `api_url` is not a valid URL.
#[must_use]
pub fn test_config(api_url: &str, data_dir: &Path) -> ClientConfig {
    let mut config = ClientConfig::new(api_url, data_dir).expect("valid api url");
    config.http_timeout = Duration::from_secs(5);
    config.cart.debounce = Duration::from_millis(10);
    config.sync.interval = Duration::from_secs(3600);
    config.refresh.interval = Duration::from_secs(3600);
    config
}

// =============================================================================
// Mock API
// =============================================================================

/// Shared, controllable state behind the mock routes.
#[derive(Debug)]
struct MockState {
    token_ttl: AtomicI64,
    next_token: AtomicU64,
    live_tokens: Mutex<HashSet<String>>,
    refresh_tokens: Mutex<HashSet<String>>,
    refresh_calls: AtomicUsize,
    reject_refresh: AtomicBool,
    logout_tokens: Mutex<Vec<Option<String>>>,
    magic_links: Mutex<Vec<String>>,
    cart_unavailable: AtomicBool,
    rejected_actions: Mutex<HashSet<String>>,
    cart_commands: Mutex<Vec<Value>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            token_ttl: AtomicI64::new(3600),
            next_token: AtomicU64::new(1),
            live_tokens: Mutex::default(),
            refresh_tokens: Mutex::default(),
            refresh_calls: AtomicUsize::new(0),
            reject_refresh: AtomicBool::new(false),
            logout_tokens: Mutex::default(),
            magic_links: Mutex::default(),
            cart_unavailable: AtomicBool::new(false),
            rejected_actions: Mutex::default(),
            cart_commands: Mutex::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockState {
    /// Mint a session for `email` and remember its tokens.
    fn issue_session(&self, email: &str, name: &str) -> Value {
        let n = self.next_token.fetch_add(1, Ordering::SeqCst);
        let expires_at = chrono::Utc::now().timestamp() + self.token_ttl.load(Ordering::SeqCst);
        let access_token = jwt(&format!("user-{n}"), expires_at);
        let refresh_token = format!("refresh-{n}");

        lock(&self.live_tokens).insert(access_token.clone());
        lock(&self.refresh_tokens).insert(refresh_token.clone());

        json!({
            "user": {
                "id": "user-1",
                "email": email,
                "name": name,
                "role": "customer",
                "emailVerified": true,
            },
            "accessToken": access_token,
            "refreshToken": refresh_token,
            "expiresAt": expires_at,
        })
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn field<'a>(body: &'a Value, name: &str) -> &'a str {
    body.get(name).and_then(Value::as_str).unwrap_or_default()
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if field(&body, "password") != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    Json(state.issue_session(field(&body, "email"), "Test Shopper")).into_response()
}

async fn register(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let email = field(&body, "email");
    if email == TAKEN_EMAIL {
        return error(StatusCode::CONFLICT, "Email already registered");
    }
    Json(state.issue_session(email, field(&body, "name"))).into_response()
}

async fn magic_link(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    lock(&state.magic_links).push(field(&body, "email").to_string());
    Json(json!({ "sent": true })).into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let token = field(&body, "refreshToken");
    let known = lock(&state.refresh_tokens).remove(token);
    if !known || state.reject_refresh.load(Ordering::SeqCst) {
        return error(StatusCode::UNAUTHORIZED, "Refresh token expired");
    }
    Json(state.issue_session("shopper@example.com", "Test Shopper")).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let token = bearer(&headers);
    if let Some(token) = &token {
        lock(&state.live_tokens).remove(token);
    }
    lock(&state.logout_tokens).push(token);
    StatusCode::NO_CONTENT.into_response()
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    match bearer(&headers) {
        Some(token) if lock(&state.live_tokens).contains(&token) => {
            Json(json!({ "id": "user-1", "email": "shopper@example.com" })).into_response()
        }
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response(),
    }
}

async fn cart(State(state): State<Arc<MockState>>, headers: HeaderMap, Json(command): Json<Value>) -> Response {
    // Anonymous carts are accepted; a stale token is not.
    if let Some(token) = bearer(&headers)
        && !lock(&state.live_tokens).contains(&token)
    {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    if state.cart_unavailable.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Cart service unavailable");
    }
    if lock(&state.rejected_actions).contains(field(&command, "action")) {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Invalid cart command");
    }
    lock(&state.cart_commands).push(command);
    Json(json!({ "ok": true })).into_response()
}

fn page(content_type: &'static str, body: &'static str) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn router(state: Arc<MockState>) -> Router {
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/magic-link", post(magic_link))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/me", get(me))
        .route("/cart", post(cart));

    Router::new()
        .nest("/api", api)
        .route("/", get(|| async { page("text/html", "<h1>Home</h1>") }))
        .route("/products", get(|| async { page("text/html", "<h1>Products</h1>") }))
        .route("/offline.html", get(|| async { page("text/html", "<h1>You are offline</h1>") }))
        .route("/manifest.json", get(|| async { page("application/json", r#"{"name":"Basket"}"#) }))
        .with_state(state)
}

/// A running mock API.
///
/// Dropping it aborts the server.
#[derive(Debug)]
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MockApi {
    /// Serve the mock on an ephemeral localhost port.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let (shutdown, rx) = oneshot::channel();
        let app = router(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Base URL of the API routes.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    /// Root of the site.
    ///
    /// # Panics
    ///
    /// Never in practice; the address always forms a valid URL.
    #[must_use]
    pub fn site_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("valid site url")
    }

    /// Test configuration pointed at this mock.
    #[must_use]
    pub fn config(&self, data_dir: &Path) -> ClientConfig {
        test_config(&self.api_url(), data_dir)
    }

    /// Lifetime, in seconds, of access tokens issued from now on.
    pub fn set_token_ttl(&self, seconds: i64) {
        self.state.token_ttl.store(seconds, Ordering::SeqCst);
    }

    /// Refuse every refresh from now on.
    pub fn reject_refresh(&self) {
        self.state.reject_refresh.store(true, Ordering::SeqCst);
    }

    /// Invalidate every access token issued so far.
    pub fn revoke_tokens(&self) {
        lock(&self.state.live_tokens).clear();
    }

    /// Make `POST /api/cart` answer 503.
    pub fn set_cart_unavailable(&self, unavailable: bool) {
        self.state.cart_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Answer 422 to cart commands with this `action`.
    pub fn reject_cart_action(&self, action: &str) {
        lock(&self.state.rejected_actions).insert(action.to_string());
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens seen by the logout route, in order.
    #[must_use]
    pub fn logout_tokens(&self) -> Vec<Option<String>> {
        lock(&self.state.logout_tokens).clone()
    }

    #[must_use]
    pub fn magic_links(&self) -> Vec<String> {
        lock(&self.state.magic_links).clone()
    }

    /// Cart commands accepted so far, in arrival order.
    #[must_use]
    pub fn cart_commands(&self) -> Vec<Value> {
        lock(&self.state.cart_commands).clone()
    }

    /// Stop serving and wait for the server to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}
