//!
//! vestibule HTTP server
//! ---------------------
//! Axum front end over the synchronous pipeline, plus the demo item CRUD
//! handlers that exercise every pipeline path (forward, PRG redirect, inline
//! script responses, application and system errors).
//!
//! Responsibilities:
//! - Buffer each inbound request into the crate's exchange model and convert
//!   the pipeline's response back to Axum.
//! - Catch panics at the boundary and map them to a plain 500 without
//!   crashing the worker.
//! - Seed a few demo rows on first start so the list screen has content.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::item::Item;
use crate::pipeline::{
    HandlerResult, InlineBody, Navigator, Pipeline, RequestContext, TransactionScope, MESSAGE,
};
use crate::render::{escape_html, DirRenderer};
use crate::storage::{MemoryPool, MemoryUnitOfWork, SharedItemStore};

type DemoPipeline = Pipeline<MemoryPool, DirRenderer>;
type DemoHandler = fn(
    &mut RequestContext,
    &Navigator<'_, DirRenderer>,
    &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult;

/// Start the server with default port and view root.
pub async fn run() -> anyhow::Result<()> {
    let http_port = std::env::var("VESTIBULE_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7878);
    let views = std::env::var("VESTIBULE_VIEWS").unwrap_or_else(|_| "views".to_string());
    run_with_options(http_port, &views).await
}

pub async fn run_with_options(http_port: u16, views_root: &str) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let store = SharedItemStore::new();
    seed_demo_items(&store);

    let pool = MemoryPool::new(store, 32);
    let renderer = DirRenderer::new(views_root);
    let pipeline = Arc::new(Pipeline::new(config, renderer, pool));

    let app = Router::new()
        .route("/", get(index))
        .route("/create", get(create_page).post(create_submit))
        .route("/update", get(update_page).post(update_submit))
        .route("/delete", get(delete_submit))
        .route("/ajax", get(ajax_count).post(ajax_validate))
        .with_state(pipeline);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// First-start seed so the list screen is not empty.
fn seed_demo_items(store: &SharedItemStore) {
    let mut guard = store.0.lock();
    if !guard.is_empty() {
        return;
    }
    info!("Empty startup detected, seeding demo items");
    for (name, release_date, face_auth) in [
        ("Tablet 8 inch", "2023-11-02", false),
        ("Tablet Pro 11", "2024-03-01", false),
        ("iPhone Blue", "2024-05-20", true),
        ("Music Player mini", "2022-09-11", false),
    ] {
        guard.insert(Item {
            id: 0,
            name: name.to_string(),
            release_date: release_date.to_string(),
            face_auth,
        });
    }
}

//-------------------------------------------------------------------------
// Axum adapters
//-------------------------------------------------------------------------

async fn index(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, list).await
}

async fn create_page(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, show_detail_form).await
}

async fn create_submit(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, create).await
}

async fn update_page(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, edit).await
}

async fn update_submit(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, update).await
}

async fn delete_submit(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, delete).await
}

async fn ajax_count(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, count).await
}

async fn ajax_validate(State(app): State<Arc<DemoPipeline>>, req: Request) -> Response {
    dispatch(app, req, validate_only).await
}

async fn dispatch(app: Arc<DemoPipeline>, req: Request, handler: DemoHandler) -> Response {
    let request = buffer_request(req).await;
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| app.handle(request, handler)));
    match result {
        Ok(response) => into_axum(response),
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "panic"
            };
            error!(target: "panic", "pipeline panic: {}", msg);
            into_axum(HttpResponse::text(500, "internal server error".to_string()))
        }
    }
}

/// Buffer an Axum request into the crate's synchronous exchange model.
async fn buffer_request(req: Request) -> HttpRequest {
    let method = if req.method() == &axum::http::Method::POST { Method::Post } else { Method::Get };
    let uri = req.uri().clone();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = HttpRequest::new(method, &path_and_query);
    let mut form_urlencoded = false;
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            if name.as_str() == "content-type" && v.starts_with("application/x-www-form-urlencoded") {
                form_urlencoded = true;
            }
            request = request.with_header(name.as_str(), v);
        }
    }
    // Behind a terminating proxy, the original channel is announced here.
    if request.header("x-forwarded-proto") == Some("https") {
        request = request.secure();
    }
    if form_urlencoded {
        match axum::body::to_bytes(req.into_body(), 1024 * 1024).await {
            Ok(bytes) => {
                request = request.with_form_body(&String::from_utf8_lossy(&bytes));
            }
            Err(e) => debug!("request body read failed: {}", e),
        }
    }
    request
}

fn into_axum(res: HttpResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(res.status);
    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Body::from(res.body)) {
        Ok(response) => response,
        Err(e) => {
            error!("response conversion failed: {}", e);
            axum::http::Response::builder()
                .status(500)
                .body(Body::empty())
                .unwrap()
        }
    }
}

//-------------------------------------------------------------------------
// Demo handlers
//-------------------------------------------------------------------------

/// Search and list items; remembers the search URL so PRG redirects return
/// to the same filtered view.
fn list(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    let name = ctx.request.param("name").unwrap_or("").to_string();
    let release_date = ctx.request.param("release_date").unwrap_or("").to_string();
    let rows = tx.unit().items_ref().search(Some(&name), Some(&release_date));
    debug!("search matched {} item(s)", rows.len());

    ctx.set_attribute("search_name", &escape_html(&name));
    ctx.set_attribute("search_release_date", &escape_html(&release_date));
    ctx.set_attribute("item_count", &rows.len().to_string());
    ctx.set_attribute("item_rows", &render_rows(&rows));
    ctx.session.set_attribute("search_url", &ctx.request.full_uri());
    nav.forward(ctx, "list.html")
}

fn render_rows(rows: &[Item]) -> String {
    let mut html = String::new();
    for item in rows {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td>\
             <td><a href=\"/update?id={}\">Edit</a> <a href=\"/delete?id={}\">Delete</a></td></tr>\n",
            escape_html(&item.name),
            escape_html(&item.release_date),
            if item.face_auth { "yes" } else { "no" },
            item.id,
            item.id,
        ));
    }
    html
}

fn show_detail_form(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    _tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    ctx.set_attribute("form_action", "/create");
    nav.forward(ctx, "detail.html")
}

fn create(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    ctx.set_attribute("form_action", "/create");
    let item = Item::from_request(ctx).validate()?;
    tx.unit().items().insert(item);
    ctx.set_attribute(MESSAGE, "Registered.");
    let url = ctx.session.attribute("search_url");
    Ok(nav.redirect(ctx, url.as_deref()))
}

fn edit(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    ctx.set_attribute("form_action", "/update");
    let id = ctx.request.param("id").and_then(|v| v.parse().ok()).unwrap_or(0);
    let item = tx
        .unit()
        .items_ref()
        .find(id)
        .ok_or_else(|| AppError::system("The item does not exist."))?;
    ctx.set_attribute("item_id", &item.id.to_string());
    ctx.set_attribute("item_name", &escape_html(&item.name));
    ctx.set_attribute("item_release_date", &item.release_date);
    ctx.set_attribute("item_face_auth", if item.face_auth { "checked" } else { "" });
    nav.forward(ctx, "detail.html")
}

fn update(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    ctx.set_attribute("form_action", "/update");
    let item = Item::from_request(ctx).validate()?;
    if !tx.unit().items().update(&item) {
        return Err(AppError::system("The item does not exist."));
    }
    ctx.set_attribute(MESSAGE, "Updated.");
    let url = ctx.session.attribute("search_url");
    Ok(nav.redirect(ctx, url.as_deref()))
}

fn delete(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    let id = ctx.request.param("id").and_then(|v| v.parse().ok()).unwrap_or(0);
    tx.unit().items().delete(id);
    ctx.set_attribute(MESSAGE, "Deleted.");
    let url = ctx.session.attribute("search_url");
    Ok(nav.redirect(ctx, url.as_deref()))
}

/// Live result count for the search screen (script endpoint).
fn count(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    let name = ctx.request.param("name").unwrap_or("").to_string();
    let release_date = ctx.request.param("release_date").unwrap_or("").to_string();
    let total = tx.unit().items_ref().count(Some(&name), Some(&release_date));
    Ok(nav.respond_inline(ctx, InlineBody::Text(format!("Estimated results: {} item(s)", total))))
}

/// Live input validation for the detail screen (script endpoint). An empty
/// body means the input is acceptable; a failure's message text is routed
/// back inline by the pipeline.
fn validate_only(
    ctx: &mut RequestContext,
    nav: &Navigator<'_, DirRenderer>,
    _tx: &mut TransactionScope<MemoryUnitOfWork>,
) -> HandlerResult {
    Item::from_request(ctx).validate()?;
    Ok(nav.respond_inline(ctx, InlineBody::Text(String::new())))
}
