/// HTTP Transport
///
/// Actix Web front end over the shared dispatcher. Each POST body is one
/// request envelope and each response body one response envelope. Transport
/// faults (wrong method, undecodable body) are reported through the HTTP
/// status line; RPC-level errors always travel in a 200 body.

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header::ContentType,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::{Error, Result};
use crate::core::protocol::McpRequest;

/// State shared by every HTTP worker.
#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub rpc_path: String,
    pub health_path: String,
    pub max_body_bytes: usize,
    /// Key reported by the health endpoint, e.g. `rancher_configured`.
    pub collaborator_key: String,
    pub collaborator_configured: bool,
}

impl HttpState {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &Config) -> Self {
        Self {
            dispatcher,
            rpc_path: config.rpc_path.clone(),
            health_path: config.health_path.clone(),
            max_body_bytes: config.max_body_bytes,
            collaborator_key: "rancher_configured".to_string(),
            collaborator_configured: config.rancher.is_configured(),
        }
    }
}

/// Liveness check. Reports process health and collaborator configuration only.
async fn health(state: web::Data<HttpState>) -> HttpResponse {
    let mut body = Map::new();
    body.insert("status".into(), Value::from("ok"));
    body.insert(
        state.collaborator_key.clone(),
        Value::from(state.collaborator_configured),
    );
    HttpResponse::Ok().json(Value::Object(body))
}

/// Decoded by hand so a malformed envelope yields a plain-text 400.
async fn rpc(state: web::Data<HttpState>, body: web::Bytes) -> HttpResponse {
    let request: McpRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting undecodable request body");
            return HttpResponse::BadRequest()
                .content_type(ContentType::plaintext())
                .body(format!("Failed to parse request: {e}"));
        }
    };

    // The guard lives inside this future; if the connection goes away and
    // actix drops the future, the handler's token is cancelled.
    let cancel = CancelToken::new();
    let _guard = cancel.drop_guard();

    debug!(method = %request.method, "dispatching http request");
    let response = state.dispatcher.dispatch(request, &cancel).await;
    HttpResponse::Ok().json(response)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed()
        .content_type(ContentType::plaintext())
        .body("Method not allowed")
}

/// Register the MCP routes. Shared by the server and the tests.
pub fn configure(state: HttpState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let rpc_path = state.rpc_path.clone();
        let health_path = state.health_path.clone();
        let payload_limit = web::PayloadConfig::new(state.max_body_bytes);
        cfg.app_data(web::Data::new(state))
            .app_data(payload_limit)
            .service(
                web::resource(rpc_path)
                    .route(web::post().to(rpc))
                    .default_service(web::to(method_not_allowed)),
            )
            .service(web::resource(health_path).route(web::get().to(health)));
    }
}

/// Run the MCP server in HTTP mode.
pub async fn run_http(dispatcher: Arc<Dispatcher>, config: &Config) -> Result<()> {
    let bind_addr = config.bind_address();
    let workers = config.worker_count();
    let state = HttpState::new(dispatcher, config);

    info!(
        name = %config.server_name,
        version = %config.server_version,
        address = %bind_addr,
        workers,
        rpc_path = %state.rpc_path,
        health_path = %state.health_path,
        "MCP server starting (HTTP mode)"
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(DefaultHeaders::new().add(("X-Content-Type-Options", "nosniff")))
            // %r = request line, %s = status, %D = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure(state.clone()))
    })
    .workers(workers)
    .max_connections(10_000)
    .max_connection_rate(1_000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)
    .map_err(|e| Error::bind(&bind_addr, e))?;

    server.run().await?;
    info!("HTTP server stopped");
    Ok(())
}
