//!
//! Anti-forgery guard
//! ------------------
//! Synchronizer token plus a mirrored, script-readable cookie. The token
//! lives in the session; state-changing requests must echo it back through
//! the form field or one of two conventional headers. Full-page navigations
//! rotate the token so it doubles as a one-shot synchronizer; script callers
//! never rotate, so concurrent background calls stay valid against one value.
//!
//! Validation, rotation and the cookie-value read happen inside a single
//! critical section under the session's own lock; unrelated sessions are
//! never serialized.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SameSite;
use crate::error::{AppError, AppResult};
use crate::http::HttpRequest;
use crate::session::Session;

/// Parameter / form field name carrying the token.
pub const CSRF_PARAM: &str = "_csrf";
/// Header populated by script from the page's meta tag.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Header populated conventionally from the mirrored cookie.
pub const XSRF_HEADER: &str = "x-xsrf-token";

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    let _ = getrandom::getrandom(&mut bytes);
    let mut token = String::with_capacity(64);
    for b in &bytes {
        let _ = write!(&mut token, "{:02x}", b);
    }
    token
}

/// Candidate token from the request, in priority order: form field, explicit
/// header, cookie-mirrored header.
pub fn candidate_token(request: &HttpRequest) -> Option<&str> {
    request
        .param(CSRF_PARAM)
        .filter(|v| !v.is_empty())
        .or_else(|| request.header(CSRF_HEADER).filter(|v| !v.is_empty()))
        .or_else(|| request.header(XSRF_HEADER).filter(|v| !v.is_empty()))
}

pub struct CsrfGuard {
    cookie_name: String,
    same_site: SameSite,
}

impl CsrfGuard {
    pub fn new(cookie_name: &str, same_site: SameSite) -> Self {
        Self { cookie_name: cookie_name.to_string(), same_site }
    }

    /// Validate a POST against the session token, then rotate for full-page
    /// navigations (or issue the first token). One critical section per
    /// session: a concurrent request observes either the old or the new
    /// token, never a half-updated state.
    pub fn check_and_rotate(
        &self,
        session: &Session,
        request: &HttpRequest,
        is_script_caller: bool,
    ) -> AppResult<()> {
        session.with_state(|state| {
            if request.method == crate::http::Method::Post {
                let expected = state.csrf_token.as_deref();
                let provided = candidate_token(request);
                // Exact equality only; absence on either side is a mismatch.
                let ok = matches!((expected, provided), (Some(e), Some(p)) if e == p);
                if !ok {
                    return Err(AppError::csrf("request token missing or not matching"));
                }
            }
            if !is_script_caller || state.csrf_token.is_none() {
                state.csrf_token = Some(generate_token());
            }
            Ok(())
        })
    }

    /// `Set-Cookie` value mirroring the current token. Not `HttpOnly`:
    /// client script must be able to read it for manual submission.
    pub fn cookie_header(&self, token: &str, secure: bool) -> String {
        format!(
            "{}={};{} SameSite={}",
            self.cookie_name,
            token,
            if secure { " Secure;" } else { "" },
            self.same_site.as_str(),
        )
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }
}

static HEAD_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(<head>)").unwrap());
static POST_FORM_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)([ \t]*)(<form[^>]*\bmethod\s*=\s*['"]?post['"]?[^>]*>)"#).unwrap());

/// Render-time token embedding: a meta tag right after the opening `<head>`,
/// and a hidden field as the first child of every POST form. Markup with
/// exotic form tags may escape the tag patterns; see DESIGN.md.
pub fn inject_markup(html: &str, token: &str) -> String {
    let with_meta = HEAD_TAG.replace(html, |caps: &regex::Captures| {
        format!("{}\n<meta name=\"_csrf\" content=\"{}\">", &caps[1], token)
    });
    POST_FORM_TAG
        .replace_all(&with_meta, |caps: &regex::Captures| {
            format!(
                "{indent}{tag}\n{indent}\t<input type=\"hidden\" name=\"_csrf\" value=\"{token}\">",
                indent = &caps[1],
                tag = &caps[2],
                token = token,
            )
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::session::SessionRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    fn session() -> Arc<Session> {
        SessionRegistry::new().establish(None, Duration::from_secs(60)).0
    }

    fn guard() -> CsrfGuard {
        CsrfGuard::new("XSRF-TOKEN", SameSite::Strict)
    }

    #[test]
    fn first_full_page_request_issues_a_token() {
        let s = session();
        guard().check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let token = s.csrf_token().unwrap();
        assert_eq!(token.len(), 64);
    }

    #[test]
    fn full_page_navigation_rotates_script_call_does_not() {
        let s = session();
        let g = guard();
        g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let t1 = s.csrf_token().unwrap();
        g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let t2 = s.csrf_token().unwrap();
        assert_ne!(t1, t2);
        g.check_and_rotate(&s, &HttpRequest::get("/"), true).unwrap();
        g.check_and_rotate(&s, &HttpRequest::get("/"), true).unwrap();
        assert_eq!(s.csrf_token().unwrap(), t2);
    }

    #[test]
    fn script_call_with_no_token_yet_still_gets_one() {
        let s = session();
        guard().check_and_rotate(&s, &HttpRequest::get("/"), true).unwrap();
        assert!(s.csrf_token().is_some());
    }

    #[test]
    fn post_requires_exact_token_match() {
        let s = session();
        let g = guard();
        g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let token = s.csrf_token().unwrap();

        let ok = HttpRequest::post("/x").with_param(CSRF_PARAM, &token);
        assert!(g.check_and_rotate(&s, &ok, false).is_ok());

        // rotated above, so the old value must now be rejected
        let stale = HttpRequest::post("/x").with_param(CSRF_PARAM, &token);
        assert!(g.check_and_rotate(&s, &stale, false).is_err());

        let current = s.csrf_token().unwrap();
        let prefix = HttpRequest::post("/x").with_param(CSRF_PARAM, &current[..32]);
        assert!(g.check_and_rotate(&s, &prefix, false).is_err());

        let missing = HttpRequest::post("/x");
        assert!(g.check_and_rotate(&s, &missing, false).is_err());
    }

    #[test]
    fn candidate_priority_is_field_then_headers() {
        let req = HttpRequest::post("/x")
            .with_param(CSRF_PARAM, "from-field")
            .with_header("X-CSRF-TOKEN", "from-header")
            .with_header("X-XSRF-TOKEN", "from-cookie-header");
        assert_eq!(candidate_token(&req), Some("from-field"));

        let req = HttpRequest::post("/x")
            .with_header("X-CSRF-TOKEN", "from-header")
            .with_header("X-XSRF-TOKEN", "from-cookie-header");
        assert_eq!(candidate_token(&req), Some("from-header"));

        let req = HttpRequest::post("/x").with_header("X-XSRF-TOKEN", "from-cookie-header");
        assert_eq!(candidate_token(&req), Some("from-cookie-header"));
    }

    #[test]
    fn cookie_header_shape() {
        let g = CsrfGuard::new("XSRF-TOKEN", SameSite::Lax);
        assert_eq!(g.cookie_header("tok", false), "XSRF-TOKEN=tok; SameSite=Lax");
        assert_eq!(g.cookie_header("tok", true), "XSRF-TOKEN=tok; Secure; SameSite=Lax");
    }

    #[test]
    fn markup_injection_targets_head_and_post_forms() {
        let html = "<html><head></head><body>\n\
                    \t<form action=\"/create\" method=\"post\">\n\t</form>\n\
                    <form action=\"/search\" method=\"get\"></form>\n\
                    </body></html>";
        let out = inject_markup(html, "TOK");
        assert!(out.contains("<head>\n<meta name=\"_csrf\" content=\"TOK\">"));
        assert!(out.contains("method=\"post\">\n\t\t<input type=\"hidden\" name=\"_csrf\" value=\"TOK\">"));
        // the GET form stays untouched
        assert_eq!(out.matches("type=\"hidden\"").count(), 1);
    }

    #[test]
    fn rotation_invalidates_tokens_held_by_in_flight_script_calls() {
        // A full-page navigation interleaved with script calls on the same
        // session: after the rotation, a script POST still carrying the old
        // token loses. The ordering itself is first-come-first-served under
        // the session lock.
        let s = session();
        let g = guard();
        g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let old = s.csrf_token().unwrap();
        g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
        let new = s.csrf_token().unwrap();

        let stale = HttpRequest::post("/x").with_header("X-XSRF-TOKEN", &old);
        assert!(g.check_and_rotate(&s, &stale, true).is_err());
        let fresh = HttpRequest::post("/x").with_header("X-XSRF-TOKEN", &new);
        assert!(g.check_and_rotate(&s, &fresh, true).is_ok());
    }

    #[test]
    fn concurrent_rotations_leave_one_consistent_token() {
        let s = session();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = s.clone();
            handles.push(std::thread::spawn(move || {
                let g = guard();
                for _ in 0..50 {
                    g.check_and_rotate(&s, &HttpRequest::get("/"), false).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let token = s.csrf_token().unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn markup_injection_is_case_insensitive() {
        let html = "<HEAD></HEAD><FORM METHOD=POST></FORM>";
        let out = inject_markup(html, "TOK");
        assert!(out.contains("<meta name=\"_csrf\" content=\"TOK\">"));
        assert!(out.contains("value=\"TOK\""));
    }
}
