//! frankenrouter binary entry point: parses CLI args, loads config, wires
//! up every task, and drives the router core until the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use frankenrouter::catalogue::Catalogue;
use frankenrouter::config::{CliOverrides, Config};
use frankenrouter::events::RouterEvent;
use frankenrouter::filters::FilterFlags;
use frankenrouter::frdp::RouterIdentity;
use frankenrouter::net::listener::{self, SessionIdGen};
use frankenrouter::net::upstream_conn;
use frankenrouter::router::Router;
use frankenrouter::session::upstream::UpstreamTarget;
use frankenrouter::trafficlog::TrafficLogHandle;
use frankenrouter::{frdp, http, status, trafficlog};

/// Grace window for flushing the traffic log and closing connections on
/// shutdown (spec §5).
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "frankenrouter", version, about = "Flight-simulator TCP message broker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config-file", default_value = "frankenrouter.toml")]
    config_file: PathBuf,

    /// Override the configured variable catalogue file.
    #[arg(long = "variables-file")]
    variables_file: Option<PathBuf>,

    /// Force traffic logging on regardless of the config file.
    #[arg(long = "log-traffic")]
    log_traffic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let overrides = CliOverrides {
        variables_file: cli.variables_file,
        log_traffic: cli.log_traffic,
    };
    let config = Config::load(&cli.config_file, &overrides)
        .with_context(|| format!("loading config file {}", cli.config_file.display()))?;

    let catalogue = Arc::new(
        Catalogue::load(&config.psx.variables)
            .with_context(|| format!("loading variable catalogue {}", config.psx.variables.display()))?,
    );
    let filters = FilterFlags::with_defaults(
        config.psx.filter_elevation,
        config.psx.filter_traffic,
        config.psx.filter_flight_controls,
    );
    let access = config.build_access_control()?;
    let checks = config.build_checks()?;

    let host_id = format!("{}:{}", config.identity.simulator, config.identity.router);
    let identity = RouterIdentity {
        simulator: config.identity.simulator.clone(),
        router: config.identity.router.clone(),
        uuid: RouterIdentity::derive_uuid(&host_id, config.listen.port),
    };

    let default_upstream = config.default_upstream();
    let initial_upstream = UpstreamTarget {
        host: default_upstream.host.clone(),
        port: default_upstream.port,
        password: default_upstream.password.clone(),
    };

    let traffic_log = if config.log.traffic {
        let (handle, join) = trafficlog::spawn(
            config.log.directory.clone(),
            config.log.traffic_max_size,
            config.log.traffic_keep_versions,
        );
        std::mem::forget(join);
        handle
    } else {
        TrafficLogHandle::disabled()
    };

    let (router_events_tx, router_events_rx) = mpsc::unbounded_channel::<RouterEvent>();
    let (upstream_switch_tx, upstream_switch_rx) = mpsc::unbounded_channel::<UpstreamTarget>();

    let mut router = Router::new(
        catalogue,
        filters,
        access,
        checks,
        identity,
        initial_upstream.clone(),
        upstream_switch_tx,
        router_events_tx.clone(),
        traffic_log,
        config.identity.stop_minded,
    );

    if let Some(snapshot_path) = &config.psx.cache_snapshot_path {
        if let Ok(text) = std::fs::read_to_string(snapshot_path) {
            match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&text) {
                Ok(map) => router.load_cache_snapshot(map),
                Err(e) => log::warn!(
                    "[main] ignoring unreadable cache snapshot {}: {e}",
                    snapshot_path.display()
                ),
            }
        }
    }

    let session_ids = Arc::new(SessionIdGen::default());
    let listener_handle = listener::serve(config.listen.port, router_events_tx.clone(), session_ids).await?;

    let upstream_handle = tokio::spawn(upstream_conn::run(
        initial_upstream,
        upstream_switch_rx,
        router_events_tx.clone(),
    ));

    let (frdp_ping_handle, frdp_router_info_handle) = frdp::spawn_tickers(router_events_tx.clone());
    let status_handle = status::spawn(status::DEFAULT_INTERVAL, router_events_tx.clone());

    let http_port = config.listen.rest_api_port;
    let http_events = router_events_tx.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http::serve(http_port, http_events).await {
            log::error!("[http] server exited: {e}");
        }
    });

    log::info!(
        "[main] frankenrouter '{}' ready, listening on {} (API on {})",
        config.identity.router,
        config.listen.port,
        http_port
    );

    router.run(router_events_rx).await;

    listener_handle.abort();
    upstream_handle.abort();
    frdp_ping_handle.abort();
    frdp_router_info_handle.abort();
    status_handle.abort();
    http_handle.abort();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    Ok(())
}
