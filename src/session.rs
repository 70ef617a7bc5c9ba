//!
//! Session registry
//! ----------------
//! In-process browser-session state: the anti-forgery token, the pending
//! flash bag, the two error-recovery anchors, and a small string attribute
//! map for application use (e.g. the last search URL).
//!
//! The registry itself is a read-mostly map guarded by an `RwLock`; every
//! `Session` carries its own `Mutex`, so compound operations such as the
//! token read-rotate-write are atomic per session and unrelated sessions are
//! never serialized against each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::{Mutex, RwLock};

fn gen_id() -> String {
    // 256-bit random id, base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Mutable per-session state. Only ever touched through `Session::with_state`
/// or the accessor methods, all of which take the session lock.
#[derive(Debug, Default)]
pub struct SessionState {
    pub csrf_token: Option<String>,
    pub flash: Option<HashMap<String, String>>,
    /// Fallback forward target for application errors (last rendered view).
    pub forward_path: Option<String>,
    /// Fallback redirect target for system errors (last redirect issued).
    pub redirect_url: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    expires_at: Mutex<Instant>,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: String, ttl: Duration) -> Self {
        Self {
            id,
            expires_at: Mutex::new(Instant::now() + ttl),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Run a closure under the session lock. Compound read-modify-write
    /// sequences (token rotation) must go through here so they stay atomic.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.state.lock().csrf_token.clone()
    }

    pub fn forward_path(&self) -> Option<String> {
        self.state.lock().forward_path.clone()
    }

    pub fn record_forward_path(&self, path: &str) {
        self.state.lock().forward_path = Some(path.to_string());
    }

    pub fn redirect_url(&self) -> Option<String> {
        self.state.lock().redirect_url.clone()
    }

    pub fn record_redirect_url(&self, url: &str) {
        self.state.lock().redirect_url = Some(url.to_string());
    }

    /// Park attributes for the very next request in this session.
    pub fn stash_flash(&self, map: HashMap<String, String>) {
        if !map.is_empty() {
            self.state.lock().flash = Some(map);
        }
    }

    /// Single consumption: returns the pending flash bag and clears it.
    pub fn take_flash(&self) -> Option<HashMap<String, String>> {
        self.state.lock().flash.take()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.lock().attributes.get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.state.lock().attributes.insert(name.to_string(), value.to_string());
    }

    fn touch(&self, ttl: Duration) -> bool {
        let mut exp = self.expires_at.lock();
        if *exp <= Instant::now() {
            return false;
        }
        *exp = Instant::now() + ttl;
        true
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the session for a request. A missing, unknown or expired id
    /// yields a fresh session flagged as new; expired entries are dropped.
    pub fn establish(&self, sid: Option<&str>, ttl: Duration) -> (Arc<Session>, bool) {
        if let Some(sid) = sid {
            let found = self.sessions.read().get(sid).cloned();
            if let Some(session) = found {
                if session.touch(ttl) {
                    return (session, false);
                }
                self.sessions.write().remove(sid);
            }
        }
        let id = gen_id();
        let session = Arc::new(Session::new(id.clone(), ttl));
        self.sessions.write().insert(id, session.clone());
        (session, true)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }
}
