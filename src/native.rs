//! Native host: serves the same router over actix-web with in-memory collaborators.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use log::{info, warn};
use spin_sdk::http::{Method, Request, Response};

use crate::auth::IdentityEvents;
use crate::blobs::MemoryBlobHost;
use crate::config;
use crate::core::store::MemoryStore;
use crate::handlers::Services;
use crate::router;

/// Process-wide collaborators shared by every worker.
#[derive(Clone)]
pub struct AppState {
    pub store: MemoryStore,
    pub blobs: MemoryBlobHost,
    pub identity: IdentityEvents,
}

impl AppState {
    pub fn new(blob_base_url: &str) -> Self {
        AppState {
            store: MemoryStore::new(),
            blobs: MemoryBlobHost::new(blob_base_url),
            identity: IdentityEvents::new(),
        }
    }
}

pub fn actix_to_spin_request(req: &HttpRequest, body: web::Bytes) -> Request {
    let method = match req.method().as_str() {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "PUT" => Method::Put,
        "DELETE" => Method::Delete,
        "HEAD" => Method::Head,
        "OPTIONS" => Method::Options,
        "PATCH" => Method::Patch,
        other => Method::Other(other.to_string()),
    };

    let uri = req.uri().to_string();
    let mut builder = Request::builder();
    builder.method(method).uri(&uri);
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            builder.header(name.as_str(), value);
        }
    }
    builder.body(body.to_vec()).build()
}

pub fn spin_to_actix_response(resp: Response) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(*resp.status())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = HttpResponse::build(status);
    if let Some(content_type) = resp.header("content-type").and_then(|v| v.as_str()) {
        out.content_type(content_type.to_string());
    }
    out.body(resp.body().to_vec())
}

pub async fn handle_all(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let spin_req = actix_to_spin_request(&req, body);
    let svc = Services {
        store: &state.store,
        blobs: &state.blobs,
        identity: &state.identity,
    };
    spin_to_actix_response(router::route(&svc, &spin_req))
}

/// Registers the catch-all route. Used by the server and by in-process tests.
pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(state))
            .service(web::resource("/{tail:.*}").route(web::route().to(handle_all)));
    }
}

pub async fn run() -> std::io::Result<()> {
    let state = AppState::new(&config::blob_base_url());
    if config::seed_demo() {
        if let Err(e) = crate::core::db::seed_demo_data(&state.store, &state.blobs) {
            warn!("demo data not seeded: {}", e);
        }
    }

    let addr = config::bind_addr();
    info!("Server listening on http://{}", addr);

    HttpServer::new(move || App::new().configure(configure(state.clone())))
        .bind(addr)?
        .run()
        .await
}
