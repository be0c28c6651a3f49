use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::prelude::*;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use super::Role;
use crate::clock::Clock;
use crate::debug::{redact, Scope};
use crate::debug_log;
use crate::errors::StorefrontError;
use crate::storage::TokenStorage;

/// The authenticated identity and its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub role: Role,
    /// Unix timestamp (seconds) at which the token stops being valid.
    pub expires_at: u64,
    /// The token's `sub` claim, if any.
    pub subject: Option<String>,
}

impl Session {
    /// Build a session from a JWT without verifying its signature.
    /// The server stays authoritative; this only reads `role`, `exp` and `sub`.
    pub fn decode(token: &str) -> Result<Self, StorefrontError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(StorefrontError::MalformedToken("expected three segments".to_string())),
        };

        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| StorefrontError::MalformedToken(format!("payload is not base64url: {}", e)))?;

        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| StorefrontError::MalformedToken(format!("payload is not JSON: {}", e)))?;

        let role = claims
            .role
            .ok_or_else(|| StorefrontError::MalformedToken("missing `role` claim".to_string()))?;
        let expires_at = claims
            .exp
            .ok_or_else(|| StorefrontError::MalformedToken("missing `exp` claim".to_string()))?;

        let subject = claims.sub.and_then(|sub| match sub {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Ok(Self {
            token: token.to_string(),
            role,
            expires_at,
            subject,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    exp: Option<u64>,
}

/// Notified once when the session ends (logout, expiry, or a 401).
pub trait SessionListener: Send + Sync {
    fn on_logout(&self);
}

/// Owns the current token and derived role. No network I/O happens here.
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Session>>,
    /// One-shot guard for the logout hook. Re-armed by `establish`.
    armed: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
    debug: bool,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn TokenStorage>, clock: Arc<dyn Clock>, debug: bool) -> Self {
        Self {
            storage,
            clock,
            current: Mutex::new(None),
            armed: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            debug,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.lock().push(listener);
    }

    /// The current session if one exists and has not expired.
    ///
    /// An expired session is logged out as a side effect. A persisted token that
    /// cannot be decoded yields `None` and is left in place.
    pub fn valid_session(&self) -> Option<Session> {
        let session = {
            let mut current = self.current.lock();
            if current.is_none() {
                *current = self.load_persisted();
            }
            current.clone()?
        };

        if session.is_expired_at(self.clock.now()) {
            debug_log!(
                self.debug,
                Scope::Auth,
                warn,
                "Token expired at {}. Logging out.",
                session.expires_at
            );
            self.logout();
            return None;
        }

        Some(session)
    }

    fn load_persisted(&self) -> Option<Session> {
        let token = match self.storage.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug_log!(self.debug, Scope::Auth, "No token found in storage.");
                return None;
            }
            Err(err) => {
                debug_log!(self.debug, Scope::Auth, error, "Failed to read token: {}", err);
                return None;
            }
        };

        match Session::decode(&token) {
            Ok(session) => Some(session),
            Err(err) => {
                debug_log!(self.debug, Scope::Auth, error, "Invalid stored token: {}", err);
                None
            }
        }
    }

    /// Decode and persist a freshly issued token.
    pub fn establish(&self, token: &str) -> Result<Session, StorefrontError> {
        let session = Session::decode(token)?;
        self.storage.save(token)?;
        *self.current.lock() = Some(session.clone());
        self.armed.store(true, Ordering::SeqCst);

        debug_log!(
            self.debug,
            Scope::Auth,
            "Session established for {:?} (token {}).",
            session.role,
            redact(token)
        );

        Ok(session)
    }

    /// Clear the persisted token and the in-memory session. Idempotent.
    pub fn teardown(&self) -> Result<(), StorefrontError> {
        self.current.lock().take();
        self.storage.clear()
    }

    /// Tear the session down and notify listeners, at most once per session.
    /// Returns whether the listeners ran.
    pub fn logout(&self) -> bool {
        if let Err(err) = self.teardown() {
            debug_log!(self.debug, Scope::Auth, error, "Failed to clear token: {}", err);
        }

        if !self.armed.swap(false, Ordering::SeqCst) {
            return false;
        }

        debug_log!(self.debug, Scope::Auth, "Logging out user...");
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_logout();
        }
        true
    }

    pub fn role(&self) -> Option<Role> {
        self.valid_session().map(|s| s.role)
    }
}

/// Logout listener that opens the login page in the user's browser.
pub struct BrowserRedirect {
    login_url: String,
}

impl BrowserRedirect {
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
        }
    }
}

impl SessionListener for BrowserRedirect {
    fn on_logout(&self) {
        if let Err(err) = open::that(&self.login_url) {
            log::warn!("failed to open {}: {}", self.login_url, err);
        }
    }
}
