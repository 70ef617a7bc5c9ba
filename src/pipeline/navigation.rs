//!
//! Navigation primitives
//! ---------------------
//! The three ways a request concludes: forward (render a view in-process),
//! redirect (PRG hop with flash carry-over), and an inline body for script
//! callers. Each primitive records the session recovery anchor the error
//! router later falls back on, and each claims the request's single
//! navigation outcome.

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::AppResult;
use crate::render::ViewRenderer;

use super::context::RequestContext;
use super::{csrf, flash};

#[derive(Debug)]
pub enum InlineBody {
    Text(String),
    Json(serde_json::Value),
}

/// The terminal action chosen for a request. Exactly one per request.
#[derive(Debug)]
pub enum NavigationOutcome {
    Forward { path: String, html: String },
    Redirect { url: String },
    Inline { status: u16, body: InlineBody },
}

pub struct Navigator<'a, V: ViewRenderer> {
    renderer: &'a V,
    config: &'a PipelineConfig,
}

impl<'a, V: ViewRenderer> Navigator<'a, V> {
    pub fn new(renderer: &'a V, config: &'a PipelineConfig) -> Self {
        Self { renderer, config }
    }

    /// Render `view` with the current request attributes and buffer the
    /// markup, token-injected, into the outcome. The view path becomes the
    /// session's application-error fallback, so a later validation failure
    /// in the same flow returns to this screen.
    pub fn forward(&self, ctx: &mut RequestContext, view: &str) -> AppResult<NavigationOutcome> {
        ctx.session.record_forward_path(view);
        debug!(target: "vestibule::navigation", "forward {}", view);
        let rendered = self.renderer.render(view, ctx.attributes())?;
        let html = match ctx.session.csrf_token() {
            Some(token) => csrf::inject_markup(&rendered, &token),
            None => rendered,
        };
        ctx.mark_outcome_chosen();
        Ok(NavigationOutcome::Forward { path: view.to_string(), html })
    }

    /// Issue a redirect (None targets the application root). The URL becomes
    /// the session's system-error fallback, and every attribute the handler
    /// set during this request travels to the next one as flash.
    pub fn redirect(&self, ctx: &mut RequestContext, url: Option<&str>) -> NavigationOutcome {
        let url = url.unwrap_or(self.config.context_root.as_str()).to_string();
        debug!(target: "vestibule::navigation", "redirect {}", url);
        ctx.session.record_redirect_url(&url);
        ctx.session.stash_flash(flash::capture(ctx));
        ctx.mark_outcome_chosen();
        NavigationOutcome::Redirect { url }
    }

    /// Write a body straight back to a script caller; no forward, no
    /// redirect, success status.
    pub fn respond_inline(&self, ctx: &mut RequestContext, body: InlineBody) -> NavigationOutcome {
        ctx.mark_outcome_chosen();
        NavigationOutcome::Inline { status: 200, body }
    }
}
