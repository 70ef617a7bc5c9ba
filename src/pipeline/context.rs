//! Per-request context: the buffered request, the owning session, the
//! request attribute space, and the one-shot navigation outcome latch.
//! Created at pipeline entry, passed explicitly to the handler, dropped at
//! exit. Never shared between requests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::HttpRequest;
use crate::session::Session;

/// A script/AJAX caller announces itself with the conventional header or by
/// asking for a structured-data response.
fn detect_script_caller(request: &HttpRequest) -> bool {
    request.header("x-requested-with") == Some("XMLHttpRequest")
        || request.header("accept").map(|a| a.contains("/json")).unwrap_or(false)
}

pub struct RequestContext {
    pub request: HttpRequest,
    pub is_script_caller: bool,
    pub request_id: String,
    pub session: Arc<Session>,
    attributes: HashMap<String, String>,
    /// Writes made after handler tracking started; becomes the flash bag on
    /// redirect. Pre-existing attributes are deliberately not carried.
    handler_writes: Option<HashMap<String, String>>,
    outcome_chosen: bool,
}

impl RequestContext {
    pub fn new(request: HttpRequest, session: Arc<Session>) -> Self {
        let is_script_caller = detect_script_caller(&request);
        Self {
            request,
            is_script_caller,
            request_id: uuid::Uuid::new_v4().to_string(),
            session,
            attributes: HashMap::new(),
            handler_writes: None,
            outcome_chosen: false,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
        if let Some(writes) = self.handler_writes.as_mut() {
            writes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
        if let Some(writes) = self.handler_writes.as_mut() {
            writes.remove(name);
        }
    }

    /// Full attribute space, handed to the view renderer.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// From this point on, attribute writes are candidates for flash
    /// carry-over. Called once, right before the handler runs.
    pub fn begin_handler_tracking(&mut self) {
        self.handler_writes = Some(HashMap::new());
    }

    /// Snapshot of the attributes the handler itself set.
    pub fn handler_writes(&self) -> HashMap<String, String> {
        self.handler_writes.clone().unwrap_or_default()
    }

    /// One terminal action per request. A second choice is a programming
    /// error in the handler and fails fast.
    pub fn mark_outcome_chosen(&mut self) {
        assert!(
            !self.outcome_chosen,
            "navigation outcome already chosen for this request"
        );
        self.outcome_chosen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use std::time::Duration;

    fn ctx(request: HttpRequest) -> RequestContext {
        let registry = SessionRegistry::new();
        let (session, _) = registry.establish(None, Duration::from_secs(60));
        RequestContext::new(request, session)
    }

    #[test]
    fn script_caller_detection() {
        assert!(ctx(HttpRequest::get("/").with_header("X-Requested-With", "XMLHttpRequest"))
            .is_script_caller);
        assert!(ctx(HttpRequest::get("/").with_header("Accept", "application/json")).is_script_caller);
        assert!(!ctx(HttpRequest::get("/").with_header("Accept", "text/html")).is_script_caller);
        assert!(!ctx(HttpRequest::get("/")).is_script_caller);
    }

    #[test]
    fn handler_writes_track_only_after_tracking_starts() {
        let mut c = ctx(HttpRequest::get("/"));
        c.set_attribute("early", "1");
        c.begin_handler_tracking();
        c.set_attribute("late", "2");
        c.set_attribute("gone", "3");
        c.remove_attribute("gone");
        let writes = c.handler_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes.get("late").map(String::as_str), Some("2"));
        assert_eq!(c.attribute("early"), Some("1"));
    }

    #[test]
    #[should_panic(expected = "navigation outcome already chosen")]
    fn second_outcome_choice_panics() {
        let mut c = ctx(HttpRequest::get("/"));
        c.mark_outcome_chosen();
        c.mark_outcome_chosen();
    }
}
