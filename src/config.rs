//! Pipeline configuration.
//! Defaults are production-safe; the binary can override them from
//! `VESTIBULE_*` environment variables.

use std::time::Duration;

use crate::error::ErrorKind;

/// Fixed `SameSite` policy for the token cookie. A configuration choice made
/// once at startup, never per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Application root; the safe fallback target and the only path a fresh
    /// session may open directly.
    pub context_root: String,
    /// Session id cookie name.
    pub session_cookie: String,
    /// Anti-forgery token cookie name, readable by client script.
    pub csrf_cookie: String,
    pub same_site: SameSite,
    /// When true, system error text reaches the client over an encrypted
    /// channel; otherwise a generic message is shown. Insecure channels
    /// always get the generic message.
    pub expose_system_error_detail: bool,
    /// Error kinds that commit instead of rolling back.
    pub no_rollback: Vec<ErrorKind>,
    pub session_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_root: "/".to_string(),
            session_cookie: "vestibule_session".to_string(),
            csrf_cookie: "XSRF-TOKEN".to_string(),
            same_site: SameSite::Strict,
            expose_system_error_detail: false,
            no_rollback: Vec::new(),
            session_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl PipelineConfig {
    /// Build a config from `VESTIBULE_*` environment variables, falling back
    /// to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("VESTIBULE_SAME_SITE") {
            if v.eq_ignore_ascii_case("lax") {
                cfg.same_site = SameSite::Lax;
            }
        }
        if let Ok(v) = std::env::var("VESTIBULE_EXPOSE_ERROR_DETAIL") {
            cfg.expose_system_error_detail = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("VESTIBULE_SESSION_TTL_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                cfg.session_ttl = Duration::from_secs(secs);
            }
        }
        cfg
    }
}
