//! A single authenticated session and its idle timer.
//!
//! A session owns exactly one backend instance. It stays active until it has
//! seen no activity for the idle timeout while no operation is in flight;
//! the timer task then closes the backend and the session turns inactive
//! for good.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filament_core::{PasswordVerifier, StorageBackend};
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::short_token;

type BackendSlot = Option<Box<dyn StorageBackend>>;

/// Exclusive access to a session's backend.
///
/// Owns its lock, so it can move into a spawned task. Only handed out while
/// the slot holds a backend; releasing the backend needs the same lock.
pub struct StorageGuard {
    slot: OwnedMutexGuard<BackendSlot>,
}

impl Deref for StorageGuard {
    type Target = dyn StorageBackend;

    fn deref(&self) -> &Self::Target {
        self.slot.as_deref().expect("storage guard over a released backend")
    }
}

impl DerefMut for StorageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_deref_mut()
            .expect("storage guard over a released backend")
    }
}

impl fmt::Debug for StorageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageGuard(..)")
    }
}

struct SessionState {
    active_operations: usize,
    is_active: bool,
    language: Option<String>,
}

pub struct Session {
    token: String,
    username: String,
    verifier: PasswordVerifier,
    idle_timeout: Duration,
    state: Mutex<SessionState>,
    backend: Arc<AsyncMutex<BackendSlot>>,
    /// Coalescing reset signal for the idle timer. Never blocks the sender.
    reset: Notify,
}

/// Outcome of the idle timer firing.
enum Tick {
    Busy,
    Expired,
    Closed,
}

impl Session {
    pub(crate) fn new(
        token: String,
        username: String,
        verifier: PasswordVerifier,
        backend: Box<dyn StorageBackend>,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            username,
            verifier,
            idle_timeout,
            state: Mutex::new(SessionState {
                active_operations: 0,
                is_active: true,
                language: None,
            }),
            backend: Arc::new(AsyncMutex::new(Some(backend))),
            reset: Notify::new(),
        })
    }

    /// Spawn the idle timer. Called once, right after the session is stored.
    pub(crate) fn start_idle_timer(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.idle_loop().await });
    }

    async fn idle_loop(&self) {
        loop {
            tokio::select! {
                _ = self.reset.notified() => {
                    if !self.is_active() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.idle_timeout) => {
                    match self.on_timeout() {
                        Tick::Busy => {
                            debug!(
                                "Session {} idle timeout with operations in flight",
                                short_token(&self.token)
                            );
                        }
                        Tick::Expired => {
                            info!(
                                "Session {} for {} expired",
                                short_token(&self.token),
                                self.username
                            );
                            self.release_backend().await;
                            break;
                        }
                        Tick::Closed => break,
                    }
                }
            }
        }
    }

    fn on_timeout(&self) -> Tick {
        let mut state = self.state.lock().expect("session state poisoned");
        if !state.is_active {
            Tick::Closed
        } else if state.active_operations > 0 {
            Tick::Busy
        } else {
            state.is_active = false;
            Tick::Expired
        }
    }

    async fn release_backend(&self) {
        let backend = self.backend.lock().await.take();
        if let Some(mut backend) = backend {
            if let Err(e) = backend.close().await {
                warn!(
                    "Failed to close backend of session {}: {}",
                    short_token(&self.token),
                    e
                );
            }
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().expect("session state poisoned").is_active
    }

    pub fn active_operations(&self) -> usize {
        self.state
            .lock()
            .expect("session state poisoned")
            .active_operations
    }

    /// Mark the start of an operation. The session cannot expire until the
    /// matching [`decrement`](Self::decrement).
    pub fn increment(&self) {
        let mut state = self.state.lock().expect("session state poisoned");
        state.active_operations += 1;
        self.reset.notify_one();
    }

    /// Mark the end of an operation started with [`increment`](Self::increment).
    pub fn decrement(&self) {
        let mut state = self.state.lock().expect("session state poisoned");
        match state.active_operations.checked_sub(1) {
            Some(n) => state.active_operations = n,
            None => warn!(
                "Unbalanced decrement on session {}",
                short_token(&self.token)
            ),
        }
        self.reset.notify_one();
    }

    /// Restart the idle timer without changing the operation count.
    pub fn touch(&self) {
        self.reset.notify_one();
    }

    /// Pin the session for as long as the returned guard lives.
    pub fn pin(self: &Arc<Self>) -> ActiveOperation {
        self.increment();
        ActiveOperation {
            session: Arc::clone(self),
        }
    }

    pub fn language(&self) -> Option<String> {
        self.state
            .lock()
            .expect("session state poisoned")
            .language
            .clone()
    }

    pub fn set_language(&self, language: impl Into<String>) {
        self.state.lock().expect("session state poisoned").language = Some(language.into());
    }

    /// Compare a candidate password with the cached verifier. Does not
    /// contact the backend; CPU-bound.
    pub fn verify_password(&self, password: &str) -> bool {
        self.verifier.verify(password)
    }

    /// The session's backend, or `None` once the session has expired.
    ///
    /// The guard gives exclusive access; operations on one session are
    /// serialized.
    pub async fn storage(&self) -> Option<StorageGuard> {
        let slot = Arc::clone(&self.backend).lock_owned().await;
        slot.is_some().then_some(StorageGuard { slot })
    }

    /// Same backend as [`storage`](Self::storage), used for credential
    /// operations such as password changes.
    pub async fn authenticator(&self) -> Option<StorageGuard> {
        self.storage().await
    }

    /// Log out: turn inactive, close the backend and stop the timer.
    ///
    /// Only the first call closes the backend.
    pub async fn close(&self) {
        let was_active = {
            let mut state = self.state.lock().expect("session state poisoned");
            std::mem::replace(&mut state.is_active, false)
        };
        if !was_active {
            return;
        }
        self.reset.notify_one();
        info!(
            "Session {} for {} closed",
            short_token(&self.token),
            self.username
        );
        self.release_backend().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &short_token(&self.token))
            .field("username", &self.username)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// RAII pin on a session: counts as an operation in flight until dropped.
#[derive(Debug)]
pub struct ActiveOperation {
    session: Arc<Session>,
}

impl ActiveOperation {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for ActiveOperation {
    fn drop(&mut self) {
        self.session.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Counters, MockBackend};
    use filament_core::{Authenticator, Storage, VerifierCost};
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    fn session(timeout_ms: u64, counters: &Arc<Counters>) -> Arc<Session> {
        let verifier = PasswordVerifier::hash("secret", VerifierCost::minimal()).unwrap();
        let session = Session::new(
            "0123456789abcdef".to_string(),
            "alice".to_string(),
            verifier,
            Box::new(MockBackend::new("alice", "secret", counters.clone())),
            Duration::from_millis(timeout_ms),
        );
        session.start_idle_timer();
        session
    }

    #[tokio::test]
    async fn test_increment_decrement_balance() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        session.increment();
        session.increment();
        assert_eq!(session.active_operations(), 2);
        session.decrement();
        session.decrement();
        assert_eq!(session.active_operations(), 0);

        // An unbalanced decrement is logged, not an underflow.
        session.decrement();
        assert_eq!(session.active_operations(), 0);
    }

    #[tokio::test]
    async fn test_pin_guard_counts_one_operation() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        {
            let pin = session.pin();
            assert_eq!(pin.session().active_operations(), 1);
        }
        assert_eq!(session.active_operations(), 0);
    }

    #[tokio::test]
    async fn test_expires_when_idle() {
        let counters = Arc::new(Counters::default());
        let session = session(50, &counters);

        assert!(session.is_active());
        sleep(Duration::from_millis(100)).await;

        assert!(!session.is_active());
        assert!(session.storage().await.is_none());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pinned_session_survives_timeout() {
        let counters = Arc::new(Counters::default());
        let session = session(50, &counters);

        session.increment();
        sleep(Duration::from_millis(100)).await;
        session.decrement();

        assert!(session.is_active());
        assert!(session.storage().await.is_some());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_touch_restarts_idle_window() {
        let counters = Arc::new(Counters::default());
        let session = session(80, &counters);

        sleep(Duration::from_millis(50)).await;
        session.touch();
        sleep(Duration::from_millis(50)).await;
        assert!(session.is_active());

        sleep(Duration::from_millis(100)).await;
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_close_releases_backend_once() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        session.close().await;
        session.close().await;

        assert!(!session.is_active());
        assert!(session.storage().await.is_none());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_storage_is_the_authenticated_backend() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        let storage = session.storage().await.unwrap();
        assert!(storage.is_logged_in_as("alice"));
        assert!(!storage.is_logged_in_as("bob"));
    }

    #[tokio::test]
    async fn test_storage_guard_moves_into_spawned_task() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        let storage = session.storage().await.unwrap();
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            storage.is_logged_in_as("alice")
        });

        // Held by the task until it finishes.
        assert!(session.backend.try_lock().is_err());
        assert!(task.await.unwrap());
        assert!(session.storage().await.is_some());
    }

    #[tokio::test]
    async fn test_change_password_through_authenticator() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        let mut authenticator = session.authenticator().await.unwrap();
        let err = authenticator.change_password("new").await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn test_language_and_password() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);

        assert_eq!(session.language(), None);
        session.set_language("fr-FR");
        assert_eq!(session.language().as_deref(), Some("fr-FR"));

        assert!(session.verify_password("secret"));
        assert!(!session.verify_password("wrong"));
    }

    #[tokio::test]
    async fn test_debug_shows_token_prefix_only() {
        let counters = Arc::new(Counters::default());
        let session = session(1_000, &counters);
        let debug = format!("{:?}", session);
        assert!(debug.contains("01234567"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
