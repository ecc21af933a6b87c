//! Session management backed by durable client storage

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use common::storage::NamespacedStorage;
use tracing::{info, warn};

use crate::{
    error::{WorkflowError, WorkflowResult},
    models::{LoginGrant, Session},
    validation,
};

const TOKEN_KEY: &str = "token";
const EXPIRES_AT_KEY: &str = "expires_at";
const USERNAME_KEY: &str = "username";

/// Anything that can exchange credentials for a token
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Exchange username and password for a login grant
    async fn authenticate(&self, username: &str, password: &str) -> WorkflowResult<LoginGrant>;

    /// Tell the server a token is no longer in use
    async fn revoke(&self, _token: &str) -> WorkflowResult<()> {
        Ok(())
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> i64;

    fn now_epoch_millis(&self) -> i64 {
        self.now_epoch_seconds() * 1000
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn now_epoch_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

struct SessionInner {
    storage: NamespacedStorage,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
}

/// Session store for the current frontend variant
///
/// Holds the credential and its expiry, writing every change through to
/// durable storage so a restart restores the session without a server
/// round trip. Expiry is checked lazily on [`SessionStore::is_active`].
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl SessionStore {
    /// Create a session store, restoring any persisted session
    pub fn new(storage: NamespacedStorage, clock: Arc<dyn Clock>) -> WorkflowResult<Self> {
        let session = Self::restore(&storage)?;
        if session.token.is_some() {
            info!(
                "Restored persisted session for {} (namespace {})",
                session.subject_name,
                storage.prefix()
            );
        }

        Ok(Self {
            inner: Arc::new(SessionInner {
                storage,
                clock,
                session: Mutex::new(session),
            }),
        })
    }

    fn restore(storage: &NamespacedStorage) -> WorkflowResult<Session> {
        let token = storage.get(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let expires_at = storage
            .get(EXPIRES_AT_KEY)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        let subject_name = storage.get(USERNAME_KEY)?.unwrap_or_default();

        Ok(Session {
            token,
            expires_at,
            subject_name,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // A poisoned guard still holds a consistent session value
        self.inner
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Log in with the given credentials and persist the new session
    pub async fn login<A: Authenticator + ?Sized>(
        &self,
        authenticator: &A,
        username: &str,
        password: &str,
    ) -> WorkflowResult<Session> {
        validation::validate_username(username)?;
        validation::validate_password(password)?;

        info!("Login attempt for user: {}", username);

        let grant = authenticator
            .authenticate(username, password)
            .await
            .map_err(|e| match e {
                WorkflowError::Auth(msg) => WorkflowError::Auth(msg),
                other => WorkflowError::Auth(other.user_message()),
            })?;

        let now = self.inner.clock.now_epoch_seconds();
        if grant.token.is_empty() || grant.expires_at <= now {
            warn!("Login for {} returned an unusable token", username);
            return Err(WorkflowError::Auth(
                "server returned an expired or empty token".to_string(),
            ));
        }

        let session = Session {
            token: Some(grant.token.clone()),
            expires_at: grant.expires_at,
            subject_name: grant.subject_name(username),
        };

        self.persist(&session)?;
        *self.lock() = session.clone();

        info!(
            "User {} logged in, session valid until {}",
            session.subject_name, session.expires_at
        );
        Ok(session)
    }

    fn persist(&self, session: &Session) -> WorkflowResult<()> {
        let expires_at = session.expires_at.to_string();
        self.inner.storage.set_all(&[
            (TOKEN_KEY, session.token.as_deref().unwrap_or_default()),
            (EXPIRES_AT_KEY, &expires_at),
            (USERNAME_KEY, &session.subject_name),
        ])?;
        Ok(())
    }

    /// Whether the session holds a token that has not expired yet
    ///
    /// The first evaluation after expiry logs out and clears storage.
    pub fn is_active(&self) -> bool {
        let now = self.inner.clock.now_epoch_seconds();
        let expired = {
            let session = self.lock();
            if session.token.is_none() {
                return false;
            }
            !session.is_active_at(now)
        };

        if expired {
            info!("Session expired, logging out");
            if let Err(e) = self.logout() {
                warn!("Failed to clear expired session: {}", e);
            }
            return false;
        }

        true
    }

    /// Clear the session. Safe to call when already logged out.
    ///
    /// The persisted keys are removed as one group; a failed write leaves
    /// all of them in place and is returned, while the in-memory session is
    /// cleared regardless.
    pub fn logout(&self) -> WorkflowResult<()> {
        let cleared = self
            .inner
            .storage
            .remove_all(&[TOKEN_KEY, EXPIRES_AT_KEY, USERNAME_KEY]);

        let was_active = {
            let mut session = self.lock();
            let was_active = session.token.is_some();
            *session = Session::default();
            was_active
        };

        if let Err(e) = cleared {
            warn!("Failed to clear persisted session: {}", e);
            return Err(e.into());
        }
        if was_active {
            info!("Session cleared");
        }
        Ok(())
    }

    /// Log out locally and tell the server, ignoring server-side failures
    pub async fn logout_remote<A: Authenticator + ?Sized>(
        &self,
        authenticator: &A,
    ) -> WorkflowResult<()> {
        let token = self.lock().token.clone();
        if let Some(token) = token {
            if let Err(e) = authenticator.revoke(&token).await {
                warn!("Server-side logout failed: {}", e);
            }
        }
        self.logout()
    }

    /// The bearer token, if the session is active
    pub fn current_token(&self) -> Option<String> {
        if self.is_active() {
            self.lock().token.clone()
        } else {
            None
        }
    }

    pub fn subject_name(&self) -> Option<String> {
        if self.is_active() {
            Some(self.lock().subject_name.clone())
        } else {
            None
        }
    }

    /// Snapshot of the session without expiry side effects
    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::storage::{DurableStorage, FileStorage, MemoryStorage};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        pub(crate) fn at(seconds: i64) -> Arc<Self> {
            Arc::new(Self {
                now: AtomicI64::new(seconds),
            })
        }

        pub(crate) fn set(&self, seconds: i64) {
            self.now.store(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_epoch_seconds(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    struct FixedAuthenticator {
        expires_at: i64,
    }

    #[async_trait]
    impl Authenticator for FixedAuthenticator {
        async fn authenticate(&self, username: &str, password: &str) -> WorkflowResult<LoginGrant> {
            if username == "alice" && password == "pw1" {
                Ok(LoginGrant {
                    token: "token-alice".to_string(),
                    expires_at: self.expires_at,
                    user: None,
                })
            } else {
                Err(WorkflowError::Api {
                    code: 10004,
                    message: "用户名或密码错误".to_string(),
                })
            }
        }
    }

    fn store(clock: Arc<ManualClock>) -> (SessionStore, Arc<MemoryStorage>) {
        let backing = Arc::new(MemoryStorage::new());
        let storage = NamespacedStorage::new(backing.clone(), "admin_");
        (SessionStore::new(storage, clock).unwrap(), backing)
    }

    #[tokio::test]
    async fn test_login_persists_session() {
        let clock = ManualClock::at(1_000);
        let (store, backing) = store(clock);
        let auth = FixedAuthenticator { expires_at: 2_000 };

        let session = store.login(&auth, "alice", "pw1").await.unwrap();
        assert_eq!(session.subject_name, "alice");
        assert!(store.is_active());
        assert_eq!(store.current_token().as_deref(), Some("token-alice"));
        assert_eq!(
            backing.get("admin_token").unwrap().as_deref(),
            Some("token-alice")
        );
        assert_eq!(
            backing.get("admin_expires_at").unwrap().as_deref(),
            Some("2000")
        );
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let (store, backing) = store(ManualClock::at(1_000));
        let auth = FixedAuthenticator { expires_at: 2_000 };

        let err = store.login(&auth, "alice", "wrong").await.unwrap_err();
        assert!(err.is_auth());
        assert!(!store.is_active());
        assert!(backing.is_empty());

        let err = store.login(&auth, "", "pw1").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_expiry_clears_storage_on_first_check() {
        let clock = ManualClock::at(1_000);
        let (store, backing) = store(clock.clone());
        let auth = FixedAuthenticator { expires_at: 2_000 };
        store.login(&auth, "alice", "pw1").await.unwrap();

        clock.set(2_001);
        assert!(!backing.is_empty());
        assert!(!store.is_active());
        assert!(backing.is_empty());
        assert_eq!(store.current_token(), None);
        assert!(store.snapshot().is_logged_out());
    }

    #[tokio::test]
    async fn test_restore_and_idempotent_logout() {
        let clock = ManualClock::at(1_000);
        let backing = Arc::new(MemoryStorage::new());
        let auth = FixedAuthenticator { expires_at: 2_000 };

        let first = SessionStore::new(
            NamespacedStorage::new(backing.clone(), "feishu_user_"),
            clock.clone(),
        )
        .unwrap();
        first.login(&auth, "alice", "pw1").await.unwrap();

        let reloaded =
            SessionStore::new(NamespacedStorage::new(backing.clone(), "feishu_user_"), clock)
                .unwrap();
        assert!(reloaded.is_active());
        assert_eq!(reloaded.subject_name().as_deref(), Some("alice"));

        reloaded.logout().unwrap();
        reloaded.logout().unwrap();
        assert!(backing.is_empty());
    }

    #[tokio::test]
    async fn test_failed_logout_keeps_persisted_keys_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let clock = ManualClock::at(1_000);
        let auth = FixedAuthenticator { expires_at: 2_000 };

        let open = |clock: Arc<ManualClock>| {
            let backing = Arc::new(FileStorage::open(&path).unwrap());
            SessionStore::new(NamespacedStorage::new(backing, "dingtalk_user_"), clock).unwrap()
        };

        let store = open(clock.clone());
        store.login(&auth, "alice", "pw1").await.unwrap();

        // Block the temporary file so the next write fails
        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = store.logout().unwrap_err();
        assert!(matches!(err, WorkflowError::Storage(_)));
        assert!(!store.is_active());

        let on_disk = FileStorage::open(&path).unwrap();
        for key in ["dingtalk_user_token", "dingtalk_user_expires_at", "dingtalk_user_username"] {
            assert!(on_disk.get(key).unwrap().is_some(), "{} was removed alone", key);
        }

        std::fs::remove_dir(&blocker).unwrap();
        let retried = open(clock);
        assert!(retried.is_active());
        retried.logout().unwrap();

        let on_disk = FileStorage::open(&path).unwrap();
        assert_eq!(on_disk.get("dingtalk_user_token").unwrap(), None);
        assert_eq!(on_disk.get("dingtalk_user_username").unwrap(), None);
    }

    #[tokio::test]
    async fn test_already_expired_grant_is_rejected() {
        let (store, _) = store(ManualClock::at(5_000));
        let auth = FixedAuthenticator { expires_at: 2_000 };

        let err = store.login(&auth, "alice", "pw1").await.unwrap_err();
        assert!(err.is_auth());
        assert!(!store.is_active());
    }
}
