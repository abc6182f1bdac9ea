//! HTTP server for the healthcheck endpoint.
//!
//! Uses hyper http1 with TokioIo, one spawned task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Args;
use crate::custody::{AllowList, CustodyManager};
use crate::registration::material::KeyMaterialStore;
use crate::registration::RegistrationService;
use crate::registry::store::RegistryStore;
use crate::relay::MessageStore;
use crate::routes;
use crate::status::StatusReporter;
use crate::types::Result;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub custody: Arc<CustodyManager>,
    pub registry: Arc<RegistryStore>,
    pub material: Arc<KeyMaterialStore>,
    pub registration: RegistrationService,
    pub messages: Arc<MessageStore>,
    pub status: StatusReporter,
}

impl AppState {
    pub fn new(args: Args) -> Self {
        let custody = Arc::new(CustodyManager::new(
            &args.data_dir,
            Box::new(AllowList::from_config(args.operators.as_deref())),
        ));
        let registry = Arc::new(RegistryStore::new(&args.data_dir));
        let material = Arc::new(KeyMaterialStore::new(&args.data_dir));
        let registration = RegistrationService::new(
            Arc::clone(&custody),
            Arc::clone(&registry),
            Arc::clone(&material),
        );
        let messages = Arc::new(MessageStore::new());
        let status = StatusReporter::new(
            args.content_address.clone(),
            args.healthcheck_address.clone(),
            args.content_url.clone(),
            args.content_status_url.clone(),
            Arc::clone(&messages),
        );
        Self {
            args,
            custody,
            registry,
            material,
            registration,
            messages,
            status,
        }
    }
}

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(listen = %state.args.listen, "healthcheck endpoint listening");

    if !state.custody.is_unlocked() {
        info!("master key is locked; registrations will be refused until an operator unlocks");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/") | (Method::GET, "/status") => {
            to_boxed(routes::handle_status(state).await)
        }

        (Method::GET, "/health") | (Method::GET, "/healthz") => to_boxed(routes::json_response(
            StatusCode::OK,
            &serde_json::json!({
                "healthy": true,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )),

        (Method::POST, "/register") => {
            let body = req.collect().await?.to_bytes();
            to_boxed(routes::handle_register(state, body).await)
        }

        (Method::POST, "/message") => {
            let body = req.collect().await?.to_bytes();
            to_boxed(routes::handle_message(state, body).await)
        }

        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert Full<Bytes> response to BoxBody response
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap_or_default()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not Found", "path": path }),
    )
}
