//! Token to session mapping and authentication orchestration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filament_core::{
    Authenticator, BackendConfigs, BackendInstance, BackendRegistry, PasswordVerifier,
    StorageBackend, VerifierCost,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::Session;
use crate::short_token;

/// Tunables of a [`SessionStore`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Idle time after which a session with no operation in flight expires
    pub idle_timeout: Duration,
    /// Cost of the password verifier cached per session
    pub verifier_cost: VerifierCost,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            verifier_cost: VerifierCost::default(),
        }
    }
}

pub struct SessionStore {
    registry: Arc<BackendRegistry>,
    configs: BackendConfigs,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(
        registry: Arc<BackendRegistry>,
        configs: BackendConfigs,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            configs,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Exchange credentials for a session token.
    ///
    /// An existing session of the same account is reused when the password
    /// matches its cached verifier. Otherwise every registered backend is
    /// tried in registration order and the first one that accepts the
    /// credentials gets a new session. `None` means no backend accepted them.
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        if let Some(token) = self.reuse(username, password).await {
            return Some(token);
        }

        for descriptor in self.registry.get_all() {
            let id = descriptor.id.as_str();
            let instance = match descriptor.construct(self.configs.params_for(id)).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("Failed to construct backend {}: {}", id, e);
                    continue;
                }
            };

            let mut backend = match instance {
                BackendInstance::Full(backend) => backend,
                BackendInstance::AuthenticatorOnly(mut backend) => {
                    if check_credentials(id, backend.as_mut(), username, password).await {
                        warn!(
                            "Backend {} accepted {} but must be both authenticator and storage",
                            id, username
                        );
                    }
                    close_instance(id, BackendInstance::AuthenticatorOnly(backend)).await;
                    continue;
                }
                instance @ BackendInstance::StorageOnly(_) => {
                    warn!("Backend {} is not an authenticator, skipping", id);
                    close_instance(id, instance).await;
                    continue;
                }
            };

            if !check_credentials(id, backend.as_mut(), username, password).await {
                close_instance(id, BackendInstance::Full(backend)).await;
                continue;
            }

            return self.open_session(id, username, password, backend).await;
        }

        debug!("No backend accepted credentials for {}", username);
        None
    }

    /// Find a live session of `username` whose cached verifier accepts
    /// `password`, and restart its idle timer.
    async fn reuse(&self, username: &str, password: &str) -> Option<String> {
        let candidates: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().expect("session store poisoned");
            collect_garbage(&mut sessions);
            sessions
                .values()
                .filter(|s| s.username() == username)
                .cloned()
                .collect()
        };

        for session in candidates {
            let candidate = Arc::clone(&session);
            let password = password.to_string();
            let matches = tokio::task::spawn_blocking(move || candidate.verify_password(&password))
                .await
                .unwrap_or(false);

            if matches && session.is_active() {
                session.touch();
                debug!(
                    "Reusing session {} for {}",
                    short_token(session.token()),
                    username
                );
                return Some(session.token().to_string());
            }
        }

        None
    }

    async fn open_session(
        &self,
        id: &str,
        username: &str,
        password: &str,
        backend: Box<dyn StorageBackend>,
    ) -> Option<String> {
        let cost = self.settings.verifier_cost;
        let plaintext = password.to_string();
        let verifier = match tokio::task::spawn_blocking(move || {
            PasswordVerifier::hash(&plaintext, cost)
        })
        .await
        {
            Ok(Ok(verifier)) => verifier,
            Ok(Err(e)) => {
                warn!("Failed to hash password for {}: {}", username, e);
                close_instance(id, BackendInstance::Full(backend)).await;
                return None;
            }
            Err(e) => {
                warn!("Password hashing task failed for {}: {}", username, e);
                close_instance(id, BackendInstance::Full(backend)).await;
                return None;
            }
        };

        let token = Uuid::new_v4().simple().to_string();
        let session = Session::new(
            token.clone(),
            username.to_string(),
            verifier,
            backend,
            self.settings.idle_timeout,
        );

        self.sessions
            .lock()
            .expect("session store poisoned")
            .insert(token.clone(), Arc::clone(&session));
        session.start_idle_timer();

        info!(
            "Session {} opened for {} on backend {}",
            short_token(&token),
            username,
            id
        );
        Some(token)
    }

    /// Look up a live session. Expired sessions are collected first.
    pub fn get_by_token(&self, token: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        collect_garbage(&mut sessions);
        sessions.get(token).filter(|s| s.is_active()).cloned()
    }

    /// Number of sessions in the map, including expired ones not yet
    /// collected.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session. Used on graceful shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .expect("session store poisoned")
            .drain()
            .map(|(_, session)| session)
            .collect();

        info!("Closing {} session(s)", sessions.len());
        for session in sessions {
            session.close().await;
        }
    }
}

fn collect_garbage(sessions: &mut HashMap<String, Arc<Session>>) {
    sessions.retain(|token, session| {
        let keep = session.is_active();
        if !keep {
            debug!("Collected session {}", short_token(token));
        }
        keep
    });
}

/// Try credentials against one backend. Transport failures are logged apart
/// from clean rejections; both come back as `false`.
async fn check_credentials<A: Authenticator + ?Sized>(
    id: &str,
    backend: &mut A,
    username: &str,
    password: &str,
) -> bool {
    match backend.authenticate(username, password).await {
        Ok(true) => true,
        Ok(false) => {
            debug!("Backend {} rejected credentials for {}", id, username);
            false
        }
        Err(e) => {
            warn!("Backend {} failed to authenticate {}: {}", id, username, e);
            false
        }
    }
}

async fn close_instance(id: &str, instance: BackendInstance) {
    if let Err(e) = instance.close().await {
        warn!("Failed to close backend {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Counters};
    use filament_core::Storage;
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    fn store(registry: BackendRegistry, timeout_ms: u64) -> SessionStore {
        SessionStore::new(
            Arc::new(registry),
            BackendConfigs::new(),
            SessionSettings {
                idle_timeout: Duration::from_millis(timeout_ms),
                verifier_cost: VerifierCost::minimal(),
            },
        )
    }

    fn single_backend(counters: &Arc<Counters>, timeout_ms: u64) -> SessionStore {
        let registry = BackendRegistry::new();
        registry.register(testing::full("mock", "alice", "secret", counters));
        store(registry, timeout_ms)
    }

    #[tokio::test]
    async fn test_authenticate_then_lookup_is_active() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 1_000);

        let token = store.authenticate("alice", "secret").await.unwrap();
        assert!(!token.is_empty());

        let session = store.get_by_token(&token).unwrap();
        assert!(session.is_active());
        assert_eq!(session.username(), "alice");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_authentication_reuses_session() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 1_000);

        let first = store.authenticate("alice", "secret").await.unwrap();
        let second = store.authenticate("alice", "secret").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_never_reuses_session() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 1_000);

        let token = store.authenticate("alice", "secret").await.unwrap();
        assert!(store.authenticate("alice", "wrong").await.is_none());

        // The backend was asked again and its rejected instance closed.
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(store.get_by_token(&token).is_some());
    }

    #[tokio::test]
    async fn test_unknown_token_is_absent() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 1_000);
        assert!(store.get_by_token("nope").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_idle_session_expires_and_is_collected() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 50);

        let token = store.authenticate("alice", "secret").await.unwrap();
        assert!(store.get_by_token(&token).is_some());

        sleep(Duration::from_millis(100)).await;

        assert!(store.get_by_token(&token).is_none());
        assert!(store.is_empty());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_in_flight_prevents_expiry() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 50);

        let token = store.authenticate("alice", "secret").await.unwrap();
        let session = store.get_by_token(&token).unwrap();

        session.increment();
        sleep(Duration::from_millis(100)).await;
        session.decrement();

        assert!(session.is_active());
        assert!(store.get_by_token(&token).is_some());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reuse_restarts_idle_timer() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 150);

        let token = store.authenticate("alice", "secret").await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.authenticate("alice", "secret").await, Some(token.clone()));

        // Past the first deadline, within the one restarted by the reuse.
        sleep(Duration::from_millis(100)).await;
        assert!(store.get_by_token(&token).is_some());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(150)).await;
        assert!(store.get_by_token(&token).is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_not_reused() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 50);

        let first = store.authenticate("alice", "secret").await.unwrap();
        sleep(Duration::from_millis(100)).await;
        let second = store.authenticate("alice", "secret").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_falls_through_to_second_backend() {
        let first = Arc::new(Counters::default());
        let second = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::unreachable("broken", &first));
        registry.register(testing::full("mock", "bob", "pw", &second));
        let store = store(registry, 1_000);

        let token = store.authenticate("bob", "pw").await.unwrap();

        let session = store.get_by_token(&token).unwrap();
        assert!(session.storage().await.unwrap().is_logged_in_as("bob"));
        assert_eq!(first.closed.load(Ordering::SeqCst), 1);
        assert_eq!(second.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_falls_through_to_second_backend() {
        let first = Arc::new(Counters::default());
        let second = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::full("other", "carol", "pw", &first));
        registry.register(testing::full("mock", "bob", "pw", &second));
        let store = store(registry, 1_000);

        assert!(store.authenticate("bob", "pw").await.is_some());
        assert_eq!(first.closed.load(Ordering::SeqCst), 1);
        assert_eq!(second.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_success_stops_iteration() {
        let first = Arc::new(Counters::default());
        let second = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::full("a", "bob", "pw", &first));
        registry.register(testing::full("b", "bob", "pw", &second));
        let store = store(registry, 1_000);

        assert!(store.authenticate("bob", "pw").await.is_some());
        assert_eq!(second.constructed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authenticator_only_backend_never_yields_session() {
        let counters = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::authenticator_only("gate", "alice", "secret", &counters));
        let store = store(registry, 1_000);

        assert!(store.authenticate("alice", "secret").await.is_none());
        assert!(store.is_empty());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_storage_only_backend_is_skipped_and_closed() {
        let counters = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::storage_only("files", &counters));
        let store = store(registry, 1_000);

        assert!(store.authenticate("alice", "secret").await.is_none());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_construction_failure_is_skipped() {
        let broken = Arc::new(Counters::default());
        let working = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::unconstructible("broken", &broken));
        registry.register(testing::full("mock", "alice", "secret", &working));
        let store = store(registry, 1_000);

        assert!(store.authenticate("alice", "secret").await.is_some());
        assert_eq!(broken.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_backend_is_a_plain_rejection() {
        let store = store(BackendRegistry::new(), 1_000);
        assert!(store.authenticate("alice", "secret").await.is_none());
    }

    #[tokio::test]
    async fn test_sessions_of_different_users_are_independent() {
        let alice = Arc::new(Counters::default());
        let bob = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::full("a", "alice", "secret", &alice));
        registry.register(testing::full("b", "bob", "pw", &bob));
        let store = store(registry, 1_000);

        let a = store.authenticate("alice", "secret").await.unwrap();
        let b = store.authenticate("bob", "pw").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        store.get_by_token(&a).unwrap().set_language("de");
        assert_eq!(store.get_by_token(&b).unwrap().language(), None);
    }

    #[tokio::test]
    async fn test_logout_then_reauthenticate() {
        let counters = Arc::new(Counters::default());
        let store = single_backend(&counters, 1_000);

        let first = store.authenticate("alice", "secret").await.unwrap();
        store.get_by_token(&first).unwrap().close().await;

        assert!(store.get_by_token(&first).is_none());
        let second = store.authenticate("alice", "secret").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let alice = Arc::new(Counters::default());
        let bob = Arc::new(Counters::default());
        let registry = BackendRegistry::new();
        registry.register(testing::full("a", "alice", "secret", &alice));
        registry.register(testing::full("b", "bob", "pw", &bob));
        let store = store(registry, 1_000);

        store.authenticate("alice", "secret").await.unwrap();
        store.authenticate("bob", "pw").await.unwrap();
        store.shutdown().await;

        assert!(store.is_empty());
        assert_eq!(alice.closed.load(Ordering::SeqCst), 1);
        assert_eq!(bob.closed.load(Ordering::SeqCst), 1);
    }
}
