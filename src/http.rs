//!
//! Request/response exchange model
//! -------------------------------
//! Crate-owned value types for one HTTP exchange. The pipeline core is
//! synchronous and works only against these types, so every control-flow
//! path can be driven from tests without a listener; the Axum layer in
//! `server` converts real traffic to and from them.
//!
//! Responsibilities:
//! - Header and cookie access with case-insensitive header names.
//! - Merged query/form parameter lookup (the last write wins).
//! - Response assembly helpers for html, redirect, text and json bodies.
//! - Cache suppression headers so the browser back button refetches.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One inbound request, fully buffered. Header names are stored lowercased;
/// `params` merges the query string and any urlencoded form body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    headers: HashMap<String, String>,
    params: HashMap<String, String>,
    pub is_secure: bool,
}

impl HttpRequest {
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        let params = query.as_deref().map(parse_urlencoded).unwrap_or_default();
        Self { method, path, query, headers: HashMap::new(), params, is_secure: false }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn secure(mut self) -> Self {
        self.is_secure = true;
        self
    }

    /// Merge an `application/x-www-form-urlencoded` body into the parameters.
    pub fn with_form_body(mut self, body: &str) -> Self {
        for (k, v) in parse_urlencoded(body) {
            self.params.insert(k, v);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.header("cookie")?;
        for part in raw.split(';') {
            let p = part.trim();
            if let Some(eq) = p.find('=') {
                let (k, v) = p.split_at(eq);
                if k == name {
                    return Some(v[1..].to_string());
                }
            }
        }
        None
    }

    /// Path plus query string, as recorded for search-URL bookkeeping and the
    /// redirect-loop guard.
    pub fn full_uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let k = urlencoding::decode(&k.replace('+', " ")).map(|c| c.into_owned());
        let v = urlencoding::decode(&v.replace('+', " ")).map(|c| c.into_owned());
        if let (Ok(k), Ok(v)) = (k, v) {
            out.insert(k, v);
        }
    }
    out
}

/// One outbound response. Headers keep insertion order; `Set-Cookie` may
/// repeat, so they are a list rather than a map.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn html(status: u16, body: String) -> Self {
        let mut res = Self { status, headers: Vec::new(), body: body.into_bytes() };
        res.add_header("Content-Type", "text/html; charset=utf-8");
        res
    }

    pub fn text(status: u16, body: String) -> Self {
        let mut res = Self { status, headers: Vec::new(), body: body.into_bytes() };
        res.add_header("Content-Type", "text/plain; charset=utf-8");
        res
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut res = Self { status, headers: Vec::new(), body: value.to_string().into_bytes() };
        res.add_header("Content-Type", "application/json");
        res
    }

    pub fn redirect(url: &str) -> Self {
        let mut res = Self { status: 302, headers: Vec::new(), body: Vec::new() };
        res.add_header("Location", url);
        res
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a repeatable header (`Set-Cookie`).
    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Value of a cookie set on this response, if any.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        for raw in self.headers_named("Set-Cookie") {
            let first = raw.split(';').next().unwrap_or("");
            if let Some((k, v)) = first.split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
        None
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Disable bfcache so a back-button GET refetches from the server and picks
/// up the current token.
pub fn prevent_caching(res: &mut HttpResponse) {
    res.add_header("Cache-Control", "no-cache, no-store, must-revalidate");
    res.add_header("Pragma", "no-cache");
    res.add_header("Expires", "0");
}
