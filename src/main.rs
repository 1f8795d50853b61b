use autozone::{
    config::AutoConfig,
    dispatch::{DnsHandler, ZoneDispatcher},
    http_server::HttpServer,
    metrics::AutoMetrics,
    resolver::{NameResolver, UpstreamResolver},
    server,
    zone::{ReloadHandle, ZoneLoader, ZoneNotifier, ZoneTable, ZoneTransfer, loader},
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Authoritative DNS server for a directory of zone files
#[derive(Parser, Debug)]
#[command(name = "autozone", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address for the UDP and TCP listeners
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Directory holding the zone files
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Log level for this crate, RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load the zones once and never rescan
    #[arg(long)]
    no_reload: bool,
}

fn load_config(cli: &Cli) -> Result<AutoConfig, Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &cli.config {
        Some(path) => AutoConfig::from_file(path)?,
        None => AutoConfig::default(),
    };
    config.apply_env()?;

    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(directory) = &cli.directory {
        config.directory = directory.clone();
    }
    if cli.no_reload {
        config.no_reload = true;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("autozone={}", cli.log_level)))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    info!(
        "Serving zones from {} under origins {:?}",
        config.directory.display(),
        config.origins
    );

    let metrics = Arc::new(AutoMetrics::new()?);
    let table = Arc::new(ZoneTable::new(&config.origins)?);

    let notifier = Arc::new(
        ZoneNotifier::new(config.notify_targets()).with_metrics(metrics.clone()),
    );
    let transfer = ZoneTransfer::new(&config.transfer_to, config.transfer_message_size)
        .with_metrics(metrics.clone());
    let handler: Arc<dyn DnsHandler> = Arc::new(
        ZoneDispatcher::new(table.clone(), transfer).with_metrics(metrics.clone()),
    );

    let mut zone_loader = ZoneLoader::new(table.clone(), &config)?
        .with_notifier(notifier)
        .with_metrics(metrics.clone());
    if !config.upstream.is_empty() {
        let resolver: Arc<dyn NameResolver> = Arc::new(UpstreamResolver::new(
            config.upstream.clone(),
            config.upstream_timeout,
        ));
        zone_loader = zone_loader.with_resolver(resolver);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (reload_handle, reload_rx) = ReloadHandle::channel();
    let reloading = config.effective_reload_interval().is_some();

    // Keep the watcher alive for the lifetime of the server
    let _watcher = if config.watch && reloading {
        match loader::watch_directory(&config.directory, reload_handle.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Cannot watch {}: {}", config.directory.display(), e);
                None
            }
        }
    } else {
        None
    };
    if reloading {
        loader::reload_on_sighup(reload_handle.clone());
    }

    let loader_task = tokio::spawn(zone_loader.run(shutdown_tx.subscribe(), reload_rx));

    let udp = tokio::spawn(server::run_udp_server(
        config.bind_addr,
        handler.clone(),
        Some(metrics.clone()),
        shutdown_tx.subscribe(),
    ));
    let tcp = tokio::spawn(server::run_tcp_server(
        config.bind_addr,
        handler,
        Some(metrics.clone()),
        shutdown_tx.subscribe(),
    ));

    let http = config.http_bind_addr.map(|addr| {
        let server = HttpServer::new(
            table.clone(),
            metrics.clone(),
            reloading.then(|| reload_handle.clone()),
            addr,
        );
        tokio::spawn(server.start(shutdown_tx.subscribe()))
    });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");
    if let Err(e) = shutdown_tx.send(()) {
        warn!("Failed to send shutdown signal: {}", e);
    }

    let servers = [("udp", udp), ("tcp", tcp)]
        .into_iter()
        .chain(http.map(|handle| ("http", handle)));
    for (name, handle) in servers {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(Ok(()))) => info!("{} server stopped", name),
            Ok(Ok(Err(e))) => error!("{} server failed: {}", name, e),
            Ok(Err(e)) => error!("{} server task panicked: {}", name, e),
            Err(_) => warn!("{} server shutdown timed out", name),
        }
    }
    if tokio::time::timeout(Duration::from_secs(5), loader_task)
        .await
        .is_err()
    {
        warn!("Zone loader shutdown timed out");
    }

    info!("Shutdown complete");
    Ok(())
}
