//! Redirect responder for taken-over addresses.
//!
//! While a takeover is active, tor routes the peer's onion address to this
//! listener, which answers every request with a redirect into a web
//! archive snapshot of the original site. The responder holds no state
//! and never sees the peer's keys.

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::types::Result;

/// Archive used when no override is configured. An onion-native mirror of
/// the Wayback Machine, so redirected visitors stay inside tor.
pub const WAYBACK_ONION: &str =
    "archivep75mbjunhxcn6x4j5mwjmomyxb573v42baldlqu56ruil2oiad.onion";

/// Build the response for one request against the archive at `archive`.
///
/// The Host header tells us which taken-over address the visitor asked
/// for; without it there is nothing to redirect to.
pub fn redirect_response(
    host: Option<&str>,
    path: &str,
    archive: &str,
) -> Response<Full<Bytes>> {
    let Some(host) = host.and_then(|h| {
        let h = h.split(':').next().unwrap_or(h).trim();
        (!h.is_empty()).then_some(h)
    }) else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("Content-Type", "text/plain")
            .body(Full::new(Bytes::from("missing Host header")))
            .unwrap_or_default();
    };

    // "/web/2/" asks the archive for its most recent capture.
    let location = format!("http://{archive}/web/2/http://{host}{path}");
    let body = format!(
        "<html><body>This service is temporarily unavailable. \
         An archived copy is at <a href=\"{location}\">{location}</a>.</body></html>"
    );
    debug!(host, path, "redirecting to archive");

    Response::builder()
        .status(StatusCode::FOUND)
        .header("Location", location)
        .header("Content-Type", "text/html")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

/// Serve the redirect responder until the process exits.
pub async fn run(listen: SocketAddr, archive: String) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, archive = %archive, "redirect responder listening");

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let archive = archive.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let archive = archive.clone();
                async move {
                    let host = req
                        .headers()
                        .get(hyper::header::HOST)
                        .and_then(|h| h.to_str().ok())
                        .map(str::to_string);
                    let path = req.uri().path().to_string();
                    Ok::<_, std::convert::Infallible>(redirect_response(
                        host.as_deref(),
                        &path,
                        &archive,
                    ))
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(%remote, error = %e, "redirect connection error");
            }
        });
    }
}
