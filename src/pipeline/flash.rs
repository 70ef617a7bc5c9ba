//! Flash scope: request attributes carried across exactly one redirect hop
//! via the session. Captured on redirect, replayed and deleted on the next
//! request, silently absent otherwise.

use std::collections::HashMap;

use tracing::debug;

use super::context::RequestContext;

/// Copy a pending flash bag into the new request's attribute space and
/// delete it from the session. Absence is a normal no-op.
pub fn replay(ctx: &mut RequestContext) {
    if let Some(map) = ctx.session.take_flash() {
        debug!(target: "vestibule::flash", "replaying {} flash attribute(s)", map.len());
        for (name, value) in map {
            ctx.set_attribute(&name, &value);
        }
    }
}

/// Attributes the handler set during this request; what a redirect carries
/// forward. Pre-existing attributes (replayed flash, pipeline internals) are
/// excluded so container state never leaks into the next request.
pub fn capture(ctx: &RequestContext) -> HashMap<String, String> {
    ctx.handler_writes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::session::SessionRegistry;
    use std::time::Duration;

    #[test]
    fn replay_consumes_the_bag() {
        let registry = SessionRegistry::new();
        let (session, _) = registry.establish(None, Duration::from_secs(60));
        let mut bag = HashMap::new();
        bag.insert("MESSAGE".to_string(), "saved".to_string());
        session.stash_flash(bag);

        let mut ctx = RequestContext::new(HttpRequest::get("/"), session.clone());
        replay(&mut ctx);
        assert_eq!(ctx.attribute("MESSAGE"), Some("saved"));
        assert!(session.take_flash().is_none());

        // second request sees nothing
        let mut next = RequestContext::new(HttpRequest::get("/"), session);
        replay(&mut next);
        assert_eq!(next.attribute("MESSAGE"), None);
    }

    #[test]
    fn capture_excludes_pre_handler_attributes() {
        let registry = SessionRegistry::new();
        let (session, _) = registry.establish(None, Duration::from_secs(60));
        let mut ctx = RequestContext::new(HttpRequest::get("/"), session);
        ctx.set_attribute("replayed", "old");
        ctx.begin_handler_tracking();
        ctx.set_attribute("MESSAGE", "registered");

        let captured = capture(&ctx);
        assert_eq!(captured.len(), 1);
        assert_eq!(captured.get("MESSAGE").map(String::as_str), Some("registered"));
    }
}
