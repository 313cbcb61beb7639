use anyhow::Result;
use relaymon::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        ports = ?app_config.traffic.ports,
        targets = app_config.latency.targets.len(),
        timezone = %app_config.billing.timezone,
        "starting relaymon"
    );

    let store = Arc::new(
        store::MetricsStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    store.init().await?;

    let command_timeout = Duration::from_millis(app_config.traffic.command_timeout_ms);
    if !app_config.traffic.ports.is_empty() {
        match sources::iptables::list_rules(command_timeout).await {
            Ok(listing) => {
                let health = query::port_rules_health(
                    &listing,
                    &app_config.traffic.chain,
                    &app_config.traffic.ports,
                );
                if !health.ok {
                    tracing::warn!(missing = ?health.missing, "port accounting rules incomplete");
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot list firewall rules; per-port traffic may be missing"),
        }
    }

    let host = Arc::new(host_repo::HostRepo::new());
    let traffic_source = Arc::new(sources::HostTrafficSource::new(
        host.clone(),
        app_config.traffic.excluded_interface_prefixes.clone(),
        app_config.traffic.chain.clone(),
        command_timeout,
    ));
    let probe = probe::select_probe(app_config.latency.strategy)?;

    let quota = if app_config.notifier.telegram_enabled() {
        let notifier = Arc::new(notifier::TelegramNotifier::new(&app_config.notifier)?);
        Some(Arc::new(quota::QuotaMonitor::new(
            store.clone(),
            notifier,
            app_config.billing.clone(),
            app_config.notifier.server_name.clone(),
            Duration::from_secs(app_config.notifier.timeout_secs),
        )?))
    } else {
        tracing::info!("no notifier configured; quota alerts disabled");
        None
    };

    let collector = collector::spawn(
        collector::CollectorDeps {
            store: store.clone(),
            traffic_source,
            host,
            probe,
            quota,
        },
        &app_config,
    )?;

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    collector.shutdown().await;
    store.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
