//! Router assembly and the outer server with its TLS modes.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::header::{HeaderName, ORIGIN};
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures::StreamExt;
use rustls_acme::caches::DirCache;
use rustls_acme::AcmeConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{self, BrokerState};
use crate::error::BrokerResult;

/// Build the broker router with CORS and request tracing applied to every
/// endpoint.
pub fn build_broker_router(state: BrokerState) -> Router {
    Router::new()
        .route("/robots.txt", get(handlers::robots_txt))
        .route("/proxy", post(handlers::proxy_polls))
        .route("/client", post(handlers::client_offers))
        .route("/answer", post(handlers::proxy_answers))
        .route("/debug", get(handlers::debug_handler))
        .route("/metrics", get(handlers::metrics_file))
        .route("/prometheus", get(handlers::prometheus_handler))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-session-id"),
            HeaderName::from_static("snowflake-nat-type"),
        ])
}

/// TLS provisioning modes for the public listener. The legal
/// configurations are ACME hostnames (with optional email and cache dir),
/// certificate and key files together, or TLS disabled outright.
pub enum TlsMode {
    /// Plain HTTP.
    Disabled,
    /// PEM certificate and key files.
    CertFiles { cert: PathBuf, key: PathBuf },
    /// ACME (Let's Encrypt) provisioning for the given hostnames.
    Acme {
        hostnames: Vec<String>,
        email: Option<String>,
        cache_dir: PathBuf,
    },
}

/// The outer HTTP(S) server.
pub struct BrokerServer {
    pub addr: SocketAddr,
    pub tls: TlsMode,
}

impl BrokerServer {
    pub async fn run(self, app: Router) -> BrokerResult<()> {
        let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
        match self.tls {
            TlsMode::Disabled => {
                let listener = tokio::net::TcpListener::bind(self.addr).await?;
                info!("broker listening on http://{}", self.addr);
                axum::serve(listener, make_service).await?;
            }
            TlsMode::CertFiles { cert, key } => {
                let config = RustlsConfig::from_pem_file(cert, key).await?;
                info!("broker listening on https://{}", self.addr);
                axum_server::bind_rustls(self.addr, config)
                    .serve(make_service)
                    .await?;
            }
            TlsMode::Acme {
                hostnames,
                email,
                cache_dir,
            } => {
                info!("ACME hostnames: {:?}", hostnames);
                let mut acme_state = AcmeConfig::new(hostnames)
                    .contact(email.iter().map(|email| format!("mailto:{email}")))
                    .cache_option(Some(DirCache::new(cache_dir)))
                    .directory_lets_encrypt(true)
                    .state();
                let acceptor = acme_state.axum_acceptor(acme_state.default_rustls_config());
                tokio::spawn(async move {
                    loop {
                        match acme_state.next().await {
                            Some(Ok(event)) => info!("acme event: {event:?}"),
                            Some(Err(err)) => error!("acme error: {err}"),
                            None => break,
                        }
                    }
                });
                info!("broker listening on https://{}", self.addr);
                axum_server::bind(self.addr)
                    .acceptor(acceptor)
                    .serve(make_service)
                    .await?;
            }
        }
        Ok(())
    }
}
