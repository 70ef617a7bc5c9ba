//!
//! Request-processing pipeline
//! ---------------------------
//! The single front controller every application request passes through.
//! Order of operations per request:
//!
//! 1. Establish the session and the request context.
//! 2. Reject brand-new sessions on non-root paths (expired session).
//! 3. Validate the anti-forgery token on POST, rotate it for full-page
//!    navigations (one critical section per session).
//! 4. Replay pending flash attributes into the request.
//! 5. Open a unit of work and run the business handler with explicit
//!    context: `(ctx, navigator, transaction scope)`.
//! 6. Commit on success; on a thrown failure, roll back (unless the kind is
//!    allow-listed) and route: application errors re-render the originating
//!    form, system errors redirect to the last safe target, script callers
//!    get the message text inline.
//! 7. Convert the single `NavigationOutcome` into the response, attach the
//!    token cookie and cache-suppression headers.
//!
//! Handlers never see the session registry, the pool, or the renderer
//! directly; everything arrives as arguments, so each piece is testable in
//! isolation.

pub mod context;
pub mod csrf;
pub mod flash;
pub mod navigation;
pub mod transaction;

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::http::{self, HttpRequest, HttpResponse};
use crate::render::ViewRenderer;
use crate::session::SessionRegistry;

pub use context::RequestContext;
pub use csrf::CsrfGuard;
pub use navigation::{InlineBody, NavigationOutcome, Navigator};
pub use transaction::{TransactionScope, UnitOfWork, UnitOfWorkPool};

/// Request attribute holding the message a view displays. Handlers set it
/// themselves; on error the classified message is placed here.
pub const MESSAGE: &str = "MESSAGE";

const EXPIRED_MESSAGE: &str = "Your session has expired.";
const CSRF_REJECT_MESSAGE: &str = "Invalid data was submitted.";
const GENERIC_SYSTEM_MESSAGE: &str = "The system encountered an unexpected problem.";
const FATAL_MESSAGE: &str = "internal server error";

/// The handler contract: business code receives the request context, the
/// navigation primitives and the open transaction scope, and returns the
/// request's terminal action or a classified failure.
pub type HandlerResult = AppResult<NavigationOutcome>;

pub struct Pipeline<P: UnitOfWorkPool, V: ViewRenderer> {
    config: PipelineConfig,
    sessions: SessionRegistry,
    csrf: CsrfGuard,
    renderer: V,
    pool: P,
}

impl<P: UnitOfWorkPool, V: ViewRenderer> Pipeline<P, V> {
    pub fn new(config: PipelineConfig, renderer: V, pool: P) -> Self {
        let csrf = CsrfGuard::new(&config.csrf_cookie, config.same_site);
        Self { config, sessions: SessionRegistry::new(), csrf, renderer, pool }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Run one request through the full chain. Always produces a response;
    /// failures inside error routing degrade to a plain 500.
    pub fn handle<F>(&self, request: HttpRequest, handler: F) -> HttpResponse
    where
        F: FnOnce(&mut RequestContext, &Navigator<'_, V>, &mut TransactionScope<P::Handle>) -> HandlerResult,
    {
        let started = Instant::now();
        let sid = request.cookie(&self.config.session_cookie);
        let (session, is_new) = self.sessions.establish(sid.as_deref(), self.config.session_ttl);
        let mut ctx = RequestContext::new(request, session);
        let nav = Navigator::new(&self.renderer, &self.config);

        let outcome = self.process(&mut ctx, &nav, is_new, handler);
        let response = self.finalize(&ctx, is_new, outcome);

        debug!(
            target: "vestibule::pipeline",
            "{}ms [{}] {} {}",
            started.elapsed().as_millis(),
            ctx.request.method.as_str(),
            ctx.request.full_uri(),
            ctx.attribute(MESSAGE).unwrap_or(""),
        );
        response
    }

    fn process<F>(
        &self,
        ctx: &mut RequestContext,
        nav: &Navigator<'_, V>,
        is_new: bool,
        handler: F,
    ) -> NavigationOutcome
    where
        F: FnOnce(&mut RequestContext, &Navigator<'_, V>, &mut TransactionScope<P::Handle>) -> HandlerResult,
    {
        // A fresh session may only open the application root; anything else
        // means the previous session timed out mid-flow.
        if is_new && ctx.request.path != self.config.context_root {
            let err = AppError::expired("request on a brand-new session");
            return self.reject(ctx, &err, EXPIRED_MESSAGE);
        }

        if let Err(err) = self.csrf.check_and_rotate(&ctx.session, &ctx.request, ctx.is_script_caller) {
            return self.reject(ctx, &err, CSRF_REJECT_MESSAGE);
        }

        flash::replay(ctx);
        ctx.begin_handler_tracking();

        let handle = match self.pool.acquire() {
            Ok(handle) => handle,
            Err(err) => return self.route_failure(ctx, nav, err),
        };
        let mut scope = TransactionScope::new(handle);

        match handler(ctx, nav, &mut scope) {
            Ok(outcome) => match scope.commit() {
                Ok(()) => outcome,
                Err(err) => {
                    // The outcome is already chosen; all that is left is to
                    // refuse to pretend the work persisted.
                    error!(target: "vestibule::pipeline", "commit failed: {}", err.detail());
                    NavigationOutcome::Inline { status: 500, body: InlineBody::Text(FATAL_MESSAGE.into()) }
                }
            },
            Err(err) => {
                if let Err(tx_err) = scope.resolve_failure(err.kind(), &self.config.no_rollback) {
                    warn!(target: "vestibule::pipeline", "transaction resolution failed: {}", tx_err.detail());
                }
                self.route_failure(ctx, nav, err)
            }
        }
    }

    /// Pre-check rejection: nothing was started, so no rollback is needed.
    /// Script callers get the status immediately; full-page callers are sent
    /// to a safe target with the explanation in flash scope.
    fn reject(&self, ctx: &mut RequestContext, err: &AppError, user_message: &str) -> NavigationOutcome {
        debug!(target: "vestibule::pipeline", "rejected: {}", err.detail());
        ctx.set_attribute(MESSAGE, user_message);
        ctx.mark_outcome_chosen();
        if ctx.is_script_caller {
            return NavigationOutcome::Inline {
                status: err.http_status(),
                body: InlineBody::Text(user_message.to_string()),
            };
        }
        let url = match err.kind() {
            ErrorKind::SessionExpired => self.config.context_root.clone(),
            _ => ctx.session.redirect_url().unwrap_or_else(|| self.config.context_root.clone()),
        };
        let mut bag = HashMap::new();
        bag.insert(MESSAGE.to_string(), user_message.to_string());
        ctx.session.stash_flash(bag);
        NavigationOutcome::Redirect { url }
    }

    /// The exception router: convert a thrown failure into the terminal
    /// action. Application errors return to the originating screen when one
    /// is recorded; everything else falls back to the last safe redirect.
    fn route_failure(&self, ctx: &mut RequestContext, nav: &Navigator<'_, V>, err: AppError) -> NavigationOutcome {
        let message = self.client_message(ctx, &err);
        match err.kind() {
            ErrorKind::Application => {
                debug!(target: "vestibule::pipeline", "application error: {}", err.message())
            }
            _ => error!(
                target: "vestibule::pipeline",
                "system error [request {}]: {}",
                ctx.request_id,
                err.detail(),
            ),
        }
        ctx.set_attribute(MESSAGE, &message);

        if ctx.is_script_caller {
            // Success status by design: script callers read the body text and
            // decide for themselves.
            return NavigationOutcome::Inline { status: 200, body: InlineBody::Text(message) };
        }

        if err.kind() == ErrorKind::Application {
            if let Some(path) = ctx.session.forward_path() {
                match nav.forward(ctx, &path) {
                    Ok(outcome) => return outcome,
                    Err(render_err) => error!(
                        target: "vestibule::pipeline",
                        "error-routing forward to {} failed: {}",
                        path,
                        render_err.detail(),
                    ),
                }
            }
        }

        let url = ctx.session.redirect_url().unwrap_or_else(|| self.config.context_root.clone());
        if url == ctx.request.full_uri() {
            warn!(target: "vestibule::pipeline", "redirect loop detected at {}", url);
            return NavigationOutcome::Inline { status: 500, body: InlineBody::Text(FATAL_MESSAGE.into()) };
        }
        let mut bag = HashMap::new();
        bag.insert(MESSAGE.to_string(), message);
        ctx.session.stash_flash(bag);
        NavigationOutcome::Redirect { url }
    }

    /// What the caller is allowed to see. Application errors show their own
    /// message; system error detail never crosses an insecure channel and
    /// crosses a secure one only when explicitly enabled.
    fn client_message(&self, ctx: &RequestContext, err: &AppError) -> String {
        match err.kind() {
            ErrorKind::System => {
                if ctx.request.is_secure && self.config.expose_system_error_detail {
                    err.message().to_string()
                } else {
                    GENERIC_SYSTEM_MESSAGE.to_string()
                }
            }
            _ => err.message().to_string(),
        }
    }

    fn finalize(&self, ctx: &RequestContext, is_new: bool, outcome: NavigationOutcome) -> HttpResponse {
        let mut response = match outcome {
            NavigationOutcome::Forward { html, .. } => HttpResponse::html(200, html),
            NavigationOutcome::Redirect { url } => HttpResponse::redirect(&url),
            NavigationOutcome::Inline { status, body } => match body {
                InlineBody::Text(text) => HttpResponse::text(status, text),
                InlineBody::Json(value) => HttpResponse::json(status, &value),
            },
        };
        http::prevent_caching(&mut response);
        if is_new {
            response.add_header("Set-Cookie", &self.session_cookie_header(ctx));
        }
        if let Some(token) = ctx.session.csrf_token() {
            response.add_header("Set-Cookie", &self.csrf.cookie_header(&token, ctx.request.is_secure));
        }
        response
    }

    fn session_cookie_header(&self, ctx: &RequestContext) -> String {
        format!(
            "{}={}; HttpOnly;{} SameSite={}; Path=/",
            self.config.session_cookie,
            ctx.session.id,
            if ctx.request.is_secure { " Secure;" } else { "" },
            self.config.same_site.as_str(),
        )
    }
}
