//! upload-server binary.
//!
//! Serves a local directory tree over HTTP for browsing and download and
//! accepts multipart uploads into it. The main entry point parses the CLI,
//! builds the Axum router and runs the listener until a shutdown signal.

mod access_log;
mod atomic;
mod config;
mod content_type;
mod copy;
mod error;
mod files;
mod listing;
mod logging;
mod storage;
mod upload;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::config::{Args, ServerConfig};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(args.dev);

    let config = Arc::new(ServerConfig::from_args(&args)?);
    let app = files::router(config.clone()).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let client_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        root = %config.root.display(),
        keep_upload_filename = config.keep_upload_filename,
        spa = config.spa,
        "serving directory"
    );
    info!("Listening on {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// 收到 Ctrl+C 或 SIGTERM 后让在途请求在宽限期内完成。
async fn shutdown_signal(handle: Handle) {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            // 无法监听时只依赖另一路信号
            warn!("Ctrl+C handler unavailable: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "interrupt",
        _ = terminate => "terminate",
    };

    info!(signal = received, "shutting down, draining connections");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
