//! # Authentication Manager
//!
//! Cookie-based login against a GeoNature server.
//!
//! ## Overview
//!
//! `AuthManager` posts credentials to `{geonature}/api/auth/login`, keeps the
//! returned `token` cookie together with the user in a [`SessionStore`], and
//! publishes [`AuthEvent`]s so the host can react to sign-in, sign-out and
//! expiry. Remote sync calls obtain their `Cookie` header through
//! [`AuthManager::session_cookie`].
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthLogin, AuthManager};
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//! # use bridge_traits::{HttpClient, SecureStore};
//! # async fn example(http: Arc<dyn HttpClient>, store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let manager = AuthManager::new("https://geonature.example.org", http, store, EventBus::new(100));
//!
//! let session = manager.login(AuthLogin::new("agent", "password", 3)).await?;
//! println!("Signed in as {}", session.user.display_name());
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::session_store::SessionStore;
use crate::types::{parse_expiry, AuthLogin, AuthSession, LoginResponse};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::{Clock, SecureStore, SystemClock};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

/// Default timeout for the login round trip
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

const SESSION_COOKIE: &str = "token";

/// GeoNature authentication orchestrator.
pub struct AuthManager {
    geonature_url: RwLock<String>,
    http_client: Arc<dyn HttpClient>,
    session_store: SessionStore,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    /// Cached copy of the stored session
    current_session: Arc<RwLock<Option<AuthSession>>>,
    /// Held for the duration of a login
    login_lock: Mutex<()>,
    auth_timeout: Duration,
}

impl AuthManager {
    pub fn new(
        geonature_url: impl Into<String>,
        http_client: Arc<dyn HttpClient>,
        secure_store: Arc<dyn SecureStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            geonature_url: RwLock::new(base_url(geonature_url.into())),
            http_client,
            session_store: SessionStore::new(secure_store),
            event_bus,
            clock: Arc::new(SystemClock),
            current_session: Arc::new(RwLock::new(None)),
            login_lock: Mutex::new(()),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    /// Logs in and persists the resulting session.
    ///
    /// # Errors
    ///
    /// - `AuthError::LoginInProgress` when another login has not finished
    /// - `AuthError::InvalidCredentials` on 401/403
    /// - `AuthError::Remote` on transport failures and other statuses
    /// - `AuthError::InvalidResponse` when the body or cookie is missing
    #[instrument(skip(self, credentials), fields(login = %credentials.login))]
    pub async fn login(&self, credentials: AuthLogin) -> Result<AuthSession> {
        let _guard = self.login_lock.try_lock().map_err(|_| {
            warn!("Login rejected, another one is in progress");
            AuthError::LoginInProgress
        })?;

        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SigningIn {
                login: credentials.login.clone(),
            }))
            .ok();

        let session = match timeout(self.auth_timeout, self.request_session(&credentials)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.emit_error(&e);
                return Err(e);
            }
            Err(_) => {
                let e = AuthError::Timeout(self.auth_timeout.as_secs());
                error!("Login timed out");
                self.emit_error(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.session_store.save(&session).await {
            error!(error = %e, "Failed to persist session");
            self.emit_error(&e);
            return Err(e);
        }

        *self.current_session.write().await = Some(session.clone());

        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SignedIn {
                login: session.user.login.clone(),
                user_id: session.user.id,
                expires_at: session.expires_at.map(|expiry| expiry.timestamp()),
            }))
            .ok();

        info!(user_id = session.user.id, "Login completed successfully");
        Ok(session)
    }

    async fn request_session(&self, credentials: &AuthLogin) -> Result<AuthSession> {
        let url = format!("{}/api/auth/login", self.geonature_url.read().await);
        let request = HttpRequest::new(HttpMethod::Post, url)
            .json(credentials)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::Remote(e.to_string()))?;

        match response.status {
            401 | 403 => {
                info!(status = response.status, "Credentials rejected");
                return Err(AuthError::InvalidCredentials);
            }
            _ if !response.is_success() => {
                return Err(AuthError::Remote(format!(
                    "login returned HTTP {}",
                    response.status
                )));
            }
            _ => {}
        }

        let body: LoginResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let cookie = response.cookie(SESSION_COOKIE).ok_or_else(|| {
            AuthError::InvalidResponse("missing session cookie".to_string())
        })?;

        let expires_at = body.expires.as_deref().and_then(|raw| {
            let parsed = parse_expiry(raw);
            if parsed.is_none() {
                warn!(expires = raw, "Ignoring unparseable session expiry");
            }
            parsed
        });

        Ok(AuthSession {
            cookie,
            user: body.user,
            expires_at,
        })
    }

    /// Deletes the session and emits `SignedOut`. Succeeds when already signed out.
    pub async fn logout(&self) -> Result<()> {
        let previous = match self.current_session.read().await.clone() {
            Some(session) => Some(session),
            None => self.session_store.load().await.ok().flatten(),
        };

        self.session_store.clear().await.map_err(|e| {
            error!(error = %e, "Failed to delete session");
            e
        })?;
        *self.current_session.write().await = None;

        if let Some(session) = previous {
            self.event_bus
                .emit(CoreEvent::Auth(AuthEvent::SignedOut {
                    login: session.user.login,
                }))
                .ok();
        }

        info!("Logout completed");
        Ok(())
    }

    pub async fn geonature_url(&self) -> String {
        self.geonature_url.read().await.clone()
    }

    /// Points logins at another GeoNature instance.
    ///
    /// The current session was issued by the previous server, so it is
    /// signed out. Returns `false` when the URL is unchanged.
    pub async fn change_server(&self, geonature_url: impl Into<String>) -> Result<bool> {
        let url = base_url(geonature_url.into());
        {
            let mut current = self.geonature_url.write().await;
            if *current == url {
                return Ok(false);
            }
            info!(from = %current, to = %url, "GeoNature server changed");
            *current = url;
        }

        self.logout().await?;
        Ok(true)
    }

    /// Returns the active session, restoring it from storage on first use.
    ///
    /// An expired session is erased and reported through `SessionExpired`.
    pub async fn current_session(&self) -> Result<Option<AuthSession>> {
        let cached = self.current_session.read().await.clone();
        let session = match cached {
            Some(session) => session,
            None => match self.session_store.load().await? {
                Some(session) => {
                    debug!(user_id = session.user.id, "Session restored from storage");
                    *self.current_session.write().await = Some(session.clone());
                    session
                }
                None => return Ok(None),
            },
        };

        if session.is_expired(self.clock.now()) {
            self.expire_session("session expired").await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// `Cookie` header value for authenticated requests.
    pub async fn session_cookie(&self) -> Result<String> {
        self.current_session()
            .await?
            .map(|session| session.cookie_header())
            .ok_or(AuthError::NotAuthenticated)
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(self.current_session().await, Ok(Some(_)))
    }

    /// Drops the session after the server rejected it.
    pub async fn handle_unauthorized(&self, reason: &str) -> Result<()> {
        self.expire_session(reason).await
    }

    async fn expire_session(&self, reason: &str) -> Result<()> {
        self.session_store.clear().await?;
        *self.current_session.write().await = None;

        warn!(reason, "Session expired");
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::SessionExpired {
                reason: reason.to_string(),
            }))
            .ok();
        Ok(())
    }

    fn emit_error(&self, error: &AuthError) {
        let recoverable = matches!(
            error,
            AuthError::Remote(_) | AuthError::Timeout(_) | AuthError::SecureStorageUnavailable(_)
        );
        self.event_bus
            .emit(CoreEvent::Auth(AuthEvent::AuthError {
                message: error.to_string(),
                recoverable,
            }))
            .ok();
    }
}

fn base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::tests::{sample_session, MockSecureStore};
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpResponse;
    use bridge_traits::FixedClock;
    use chrono::{TimeZone, Utc};
    use mockall::mock;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    const LOGIN_BODY: &str = r#"{
        "user": {
            "id_role": 3,
            "identifiant": "agent",
            "nom_role": "Durand",
            "prenom_role": "Claire",
            "id_organisme": 1,
            "id_application": 14
        },
        "expires": "2026-10-17T12:00:00.000000"
    }"#;

    fn fixed_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn manager(http: MockHttp, store: MockSecureStore, bus: &EventBus) -> AuthManager {
        AuthManager::new(
            "https://geonature.test/",
            Arc::new(http),
            Arc::new(store),
            bus.clone(),
        )
        .with_clock(Arc::new(FixedClock(fixed_now())))
    }

    fn login_ok() -> MockHttp {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|request| {
                request.url == "https://geonature.test/api/auth/login"
                    && request.method == HttpMethod::Post
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(200, LOGIN_BODY)
                    .with_header("Set-Cookie", "token=abc123; HttpOnly; Path=/"))
            });
        http
    }

    #[tokio::test]
    async fn test_login_persists_session_and_emits_events() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let store = MockSecureStore::default();
        let manager = manager(login_ok(), store.clone(), &bus);

        let session = manager
            .login(AuthLogin::new("agent", "secret", 14))
            .await
            .unwrap();

        assert_eq!(session.cookie, "abc123");
        assert_eq!(session.user.id, 3);
        assert_eq!(
            session.expires_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap())
        );
        assert_eq!(store.storage.lock().await.len(), 1);
        assert_eq!(manager.session_cookie().await.unwrap(), "token=abc123");

        assert!(matches!(
            events.try_recv().unwrap(),
            CoreEvent::Auth(AuthEvent::SigningIn { .. })
        ));
        match events.try_recv().unwrap() {
            CoreEvent::Auth(AuthEvent::SignedIn { login, user_id, .. }) => {
                assert_eq!(login, "agent");
                assert_eq!(user_id, 3);
            }
            other => panic!("expected SignedIn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_rejected_credentials() {
        let bus = EventBus::new(16);
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(401, "{}")));
        let store = MockSecureStore::default();
        let manager = manager(http, store.clone(), &bus);

        let result = manager.login(AuthLogin::new("agent", "wrong", 14)).await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert!(store.storage.lock().await.is_empty());
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_transport_failure() {
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::OperationFailed("connection refused".to_string())));
        let manager = manager(http, MockSecureStore::default(), &bus);

        let result = manager.login(AuthLogin::new("agent", "secret", 14)).await;

        assert!(matches!(result, Err(AuthError::Remote(_))));
        let _signing_in = events.try_recv().unwrap();
        match events.try_recv().unwrap() {
            CoreEvent::Auth(AuthEvent::AuthError { recoverable, .. }) => assert!(recoverable),
            other => panic!("expected AuthError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_without_cookie_is_invalid() {
        let bus = EventBus::new(16);
        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Ok(HttpResponse::new(200, LOGIN_BODY)));
        let manager = manager(http, MockSecureStore::default(), &bus);

        let result = manager.login(AuthLogin::new("agent", "secret", 14)).await;
        assert!(matches!(result, Err(AuthError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let bus = EventBus::new(16);
        let store = MockSecureStore::default();
        let manager = manager(login_ok(), store.clone(), &bus);
        manager
            .login(AuthLogin::new("agent", "secret", 14))
            .await
            .unwrap();
        let mut events = bus.subscribe();

        manager.logout().await.unwrap();

        assert!(store.storage.lock().await.is_empty());
        assert!(matches!(
            manager.session_cookie().await,
            Err(AuthError::NotAuthenticated)
        ));
        match events.try_recv().unwrap() {
            CoreEvent::Auth(AuthEvent::SignedOut { login }) => assert_eq!(login, "agent"),
            other => panic!("expected SignedOut, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_change_server_signs_out_and_redirects_login() {
        let mut http = MockHttp::new();
        for url in [
            "https://geonature.test/api/auth/login",
            "https://other.test/api/auth/login",
        ] {
            http.expect_execute()
                .withf(move |request| request.url == url)
                .times(1)
                .returning(|_| {
                    Ok(HttpResponse::new(200, LOGIN_BODY)
                        .with_header("Set-Cookie", "token=abc123; HttpOnly; Path=/"))
                });
        }
        let bus = EventBus::new(16);
        let store = MockSecureStore::default();
        let manager = manager(http, store.clone(), &bus);
        manager
            .login(AuthLogin::new("agent", "secret", 14))
            .await
            .unwrap();

        assert!(manager.change_server("https://other.test/").await.unwrap());
        assert!(!manager.change_server("https://other.test").await.unwrap());
        assert_eq!(manager.geonature_url().await, "https://other.test");
        assert!(store.storage.lock().await.is_empty());
        assert!(!manager.is_authenticated().await);

        manager
            .login(AuthLogin::new("agent", "secret", 14))
            .await
            .unwrap();
        assert!(manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_session_restored_from_storage() {
        let bus = EventBus::new(16);
        let store = MockSecureStore::default();
        SessionStore::new(Arc::new(store.clone()))
            .save(&sample_session())
            .await
            .unwrap();
        let manager = manager(MockHttp::new(), store, &bus);

        let session = manager.current_session().await.unwrap();
        assert_eq!(session, Some(sample_session()));
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let bus = EventBus::new(16);
        let store = MockSecureStore::default();
        let mut expired = sample_session();
        expired.expires_at = Some(fixed_now() - chrono::Duration::minutes(1));
        SessionStore::new(Arc::new(store.clone()))
            .save(&expired)
            .await
            .unwrap();
        let mut events = bus.subscribe();
        let manager = manager(MockHttp::new(), store.clone(), &bus);

        assert_eq!(manager.current_session().await.unwrap(), None);
        assert!(store.storage.lock().await.is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            CoreEvent::Auth(AuthEvent::SessionExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_expires_session() {
        let bus = EventBus::new(16);
        let manager = manager(login_ok(), MockSecureStore::default(), &bus);
        manager
            .login(AuthLogin::new("agent", "secret", 14))
            .await
            .unwrap();

        manager.handle_unauthorized("HTTP 401").await.unwrap();

        assert!(!manager.is_authenticated().await);
    }
}
