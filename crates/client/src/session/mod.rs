//! Authentication session store.
//!
//! [`SessionStore`] owns the current [`Session`], mirrors it to the
//! `session` collection of the foreground persistence chain, and publishes an
//! [`AuthState`] stream for consumers.
//!
//! # Lifecycle
//!
//! ```text
//! Anonymous --login/register--> Authenticated --refresh ok--> Authenticated
//!     ^                               |
//!     +------logout / refresh fail----+
//! ```
//!
//! Refreshes are serialized: a caller arriving while a refresh is in flight
//! waits for it and receives its outcome instead of issuing a second remote
//! call.

mod api;
mod error;
pub mod scheduler;
mod types;

pub use api::{AuthApi, HttpAuthApi, Registration};
pub use error::AuthError;
pub use scheduler::RefreshScheduler;
pub use types::{AuthState, RefreshOutcome, Session, User};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use basket_core::{AccessToken, Email, RefreshToken};
use secrecy::SecretString;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, instrument, warn};

use crate::persistence::Persistence;
use types::SessionRecord;

/// Collection holding the persisted session.
pub const SESSION_COLLECTION: &str = "session";

/// Owner of the authentication session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    api: Arc<dyn AuthApi>,
    persistence: Persistence,
    session: RwLock<Option<Session>>,
    /// Bumped whenever the session is replaced or discarded.
    generation: AtomicU64,
    /// Guards the remote refresh call and holds the last outcome.
    refresh: Mutex<RefreshOutcome>,
    /// Bumped when a refresh completes.
    refresh_epoch: AtomicU64,
    state: watch::Sender<AuthState>,
}

impl SessionStore {
    /// Create a store in the `Loading` state. Call [`initialize`](Self::initialize)
    /// to adopt a persisted session.
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, persistence: Persistence) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        Self {
            inner: Arc::new(SessionStoreInner {
                api,
                persistence,
                session: RwLock::new(None),
                generation: AtomicU64::new(0),
                refresh: Mutex::new(RefreshOutcome::Skipped),
                refresh_epoch: AtomicU64::new(0),
                state,
            }),
        }
    }

    /// Resolve the persisted session.
    ///
    /// A session whose access token expires within `startup_buffer_secs` is
    /// refreshed before this returns; otherwise it is adopted as-is. The store
    /// leaves `Loading` only after this completes.
    #[instrument(skip(self))]
    pub async fn initialize(&self, startup_buffer_secs: i64) -> AuthState {
        let persisted = self
            .inner
            .persistence
            .load_records::<SessionRecord>(SESSION_COLLECTION)
            .await
            .into_iter()
            .next()
            .map(|record| record.session);

        match persisted {
            None => {
                debug!("No persisted session");
                self.publish(None);
            }
            Some(session) => {
                let expired = session.is_expired(startup_buffer_secs);
                *self.inner.session.write().await = Some(session.clone());
                self.inner.generation.fetch_add(1, Ordering::SeqCst);

                if expired {
                    info!("Persisted session expired, refreshing before ready");
                    let outcome = self.refresh().await;
                    debug!(?outcome, "Startup refresh finished");
                    if outcome == RefreshOutcome::Skipped {
                        // Expired with nothing to refresh it with.
                        self.discard().await;
                    }
                } else {
                    info!(user_id = %session.user.id, "Adopted persisted session");
                    self.publish(Some(&session));
                }
            }
        }

        self.state()
    }

    /// Log in with email and password.
    ///
    /// On success the new session replaces any existing one and is persisted.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection message or the transport error. The
    /// current session is left untouched.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &Email, password: &SecretString) -> Result<Session, AuthError> {
        match self.inner.api.login(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "Logged in");
                self.replace(session.clone()).await;
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// Create an account and log in.
    ///
    /// # Errors
    ///
    /// Same contract as [`login`](Self::login).
    #[instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: &Registration) -> Result<Session, AuthError> {
        match self.inner.api.register(registration).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "Registered");
                self.replace(session.clone()).await;
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Registration failed");
                Err(e)
            }
        }
    }

    /// Request a magic sign-in link. No session is created here; the link is
    /// completed out of band.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection message or the transport error.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn login_with_magic_link(&self, email: &Email) -> Result<(), AuthError> {
        self.inner.api.magic_link(email).await
    }

    /// Log out.
    ///
    /// The remote call is best-effort; the local session and its persisted
    /// copy are always cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let token = self.access_token().await;
        if let Err(e) = self.inner.api.logout(token.as_ref()).await {
            warn!(error = %e, "Remote logout failed, clearing local session anyway");
        }
        self.discard().await;
        info!("Logged out");
    }

    /// Exchange the refresh token for a new session.
    ///
    /// Without a refresh token this is a no-op. A refused refresh discards the
    /// session. Concurrent callers share one remote call.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let observed_epoch = self.inner.refresh_epoch.load(Ordering::SeqCst);
        let mut last = self.inner.refresh.lock().await;

        if self.inner.refresh_epoch.load(Ordering::SeqCst) != observed_epoch {
            debug!(outcome = ?*last, "Joined refresh that completed while waiting");
            return *last;
        }

        let (token, generation) = {
            let session = self.inner.session.read().await;
            let token = session
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .filter(|t| !t.is_empty());
            (token, self.inner.generation.load(Ordering::SeqCst))
        };

        let outcome = match token {
            None => RefreshOutcome::Skipped,
            Some(token) => self.exchange(&token, generation).await,
        };

        *last = outcome;
        self.inner.refresh_epoch.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn exchange(&self, token: &RefreshToken, generation: u64) -> RefreshOutcome {
        let result = self.inner.api.refresh(token).await;

        let mut slot = self.inner.session.write().await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            // Login or logout won the race; their session is authoritative.
            debug!("Session changed during refresh, dropping refresh result");
            return if slot.is_some() {
                RefreshOutcome::Refreshed
            } else {
                RefreshOutcome::LoggedOut
            };
        }

        match result {
            Ok(session) => {
                info!(user_id = %session.user.id, "Session refreshed");
                self.store(&mut slot, Some(session)).await;
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, discarding session");
                self.store(&mut slot, None).await;
                RefreshOutcome::LoggedOut
            }
        }
    }

    /// Whether the access token is missing, undecodable, or expires within
    /// `buffer_seconds`.
    pub async fn is_expired(&self, buffer_seconds: i64) -> bool {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .is_none_or(|session| session.is_expired(buffer_seconds))
    }

    /// Whether a session is held and due for a proactive refresh.
    pub async fn needs_refresh(&self, buffer_seconds: i64) -> bool {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .is_some_and(|session| session.is_expired(buffer_seconds))
    }

    /// Snapshot of the current session.
    pub async fn current(&self) -> Option<Session> {
        self.inner.session.read().await.clone()
    }

    /// Current access token, if a session is held.
    pub async fn access_token(&self) -> Option<AccessToken> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Latest published auth state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user().cloned()
    }

    /// Whether a user is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(*self.inner.state.borrow(), AuthState::Authenticated(_))
    }

    /// Whether the persisted session is still being resolved.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(*self.inner.state.borrow(), AuthState::Loading)
    }

    /// Subscribe to auth state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub(crate) async fn replace(&self, session: Session) {
        let mut slot = self.inner.session.write().await;
        self.store(&mut slot, Some(session)).await;
    }

    async fn discard(&self) {
        let mut slot = self.inner.session.write().await;
        self.store(&mut slot, None).await;
    }

    /// Swap the session under the write lock and mirror it to storage, so
    /// persisted writes happen in the same order as in-memory ones.
    async fn store(&self, slot: &mut Option<Session>, session: Option<Session>) {
        match &session {
            Some(s) => {
                self.inner
                    .persistence
                    .save_records(SESSION_COLLECTION, &[SessionRecord::new(s.clone())])
                    .await;
            }
            None => self.inner.persistence.clear(SESSION_COLLECTION).await,
        }
        self.publish(session.as_ref());
        *slot = session;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn publish(&self, session: Option<&Session>) {
        let state = session.map_or(AuthState::Anonymous, |s| {
            AuthState::Authenticated(s.user.clone())
        });
        self.inner.state.send_replace(state);
    }
}
