//! Snowflake broker - headless signaling daemon.
//!
//! The broker acts as the HTTP signaling channel of the snowflake
//! transport: it matches clients and volunteer proxies by passing WebRTC
//! session descriptions between them, and never carries session traffic.
//!
//! Endpoints: /proxy (proxy polls), /client (client offers), /answer
//! (proxy answers), /debug, /metrics, /prometheus, /robots.txt.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use snowflake_core::broker::metrics::Metrics;
use snowflake_core::broker::{build_broker_router, prometheus, BrokerServer, BrokerState};
use snowflake_core::utils::logger::init_logger;
use snowflake_core::{BrokerConfig, BrokerContext};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_logger(args.unsafe_logging);
    let tls = args.tls_mode()?;

    prometheus::init_metrics();

    let metrics = Metrics::new(args.metrics_log.clone());
    if !args.disable_geoip {
        metrics
            .load_geoip(Some(&args.geoip_database), Some(&args.geoip6_database))
            .context("failed to load GeoIP databases")?;
    }

    let ctx = BrokerContext::new(metrics, BrokerConfig::default());
    tokio::spawn(Arc::clone(&ctx).run());

    if args.metrics_log.is_some() {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.metrics().run_summary_loop().await });
    }

    spawn_geoip_reload(Arc::clone(&ctx), &args);

    let state = BrokerState {
        ctx,
        metrics_log: args.metrics_log.clone(),
    };
    let app = build_broker_router(state);

    BrokerServer {
        addr: args.addr,
        tls,
    }
    .run(app)
    .await
    .context("broker server exited")?;

    Ok(())
}

/// SIGHUP reloads the GeoIP databases without a restart, so operators can
/// swap in updated files underneath a running broker.
#[cfg(unix)]
fn spawn_geoip_reload(ctx: Arc<BrokerContext>, args: &cli::Cli) {
    if args.disable_geoip {
        return;
    }
    let v4 = args.geoip_database.clone();
    let v6 = args.geoip6_database.clone();
    tokio::spawn(async move {
        let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(signal) => signal,
            Err(err) => {
                warn!("unable to install SIGHUP handler: {err}");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("received SIGHUP, reloading geoip databases");
            if let Err(err) = ctx.metrics().load_geoip(Some(&v4), Some(&v6)) {
                error!("geoip reload failed, keeping previous tables: {err}");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_geoip_reload(_ctx: Arc<BrokerContext>, _args: &cli::Cli) {}
