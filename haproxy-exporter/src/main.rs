//! Prometheus exporter for HAProxy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tokio::sync::watch;
use tracing::{error, info};

use haproxy_exporter::HttpServer;
use haproxy_exporter::config::{ExporterConfig, LogFormat, LoggingConfig, parse_timeout};

/// Prometheus exporter for HAProxy.
#[derive(Parser, Debug)]
#[command(name = "haproxy-exporter")]
#[command(about = "Export HAProxy statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on for web interface and telemetry.
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path")]
    telemetry_path: Option<String>,

    /// URI on which to scrape HAProxy.
    #[arg(long = "haproxy.scrape-uri")]
    scrape_uri: Option<String>,

    /// Verify the certificate of an https:// scrape URI.
    #[arg(long = "haproxy.ssl-verify", action = ArgAction::Set)]
    ssl_verify: Option<bool>,

    /// Comma-separated list of exported server metrics (column numbers).
    /// Every server column is exported when unset.
    #[arg(long = "haproxy.server-metric-fields")]
    server_metric_fields: Option<String>,

    /// Timeout for trying to get stats from HAProxy (e.g. 500ms, 5s).
    #[arg(long = "haproxy.timeout", value_parser = parse_timeout_arg)]
    timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_timeout_arg(s: &str) -> Result<Duration, String> {
    parse_timeout(s).ok_or_else(|| format!("invalid timeout: {s:?}"))
}

impl Args {
    /// Apply command line overrides on top of the file configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(listen) = self.listen_address {
            config.web.listen = listen;
        }
        if let Some(path) = self.telemetry_path {
            config.web.path = path;
        }
        if let Some(uri) = self.scrape_uri {
            config.haproxy.scrape_uri = uri;
        }
        if let Some(ssl_verify) = self.ssl_verify {
            config.haproxy.ssl_verify = ssl_verify;
        }
        if let Some(fields) = self.server_metric_fields {
            config.haproxy.server_metric_fields = Some(fields);
        }
        if let Some(timeout) = self.timeout {
            config.haproxy.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(
        scrape_uri = %config.haproxy.scrape_uri,
        timeout_ms = config.haproxy.timeout_ms,
        "Starting HAProxy exporter"
    );

    let exporter = Arc::new(config.haproxy.build_exporter()?);

    let server_metric_fields = match &config.haproxy.server_metric_fields {
        Some(fields) => fields.clone(),
        None => exporter.fields().server_fields_string(),
    };
    info!(fields = %server_metric_fields, "Exporting server metric columns");

    let listen_addr = config.web.listen_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(exporter.clone(), listen_addr, config.web.path.clone());
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    tokio::select! {
        _ = wait_for_signal() => {}
        result = &mut http_task => {
            // The server only stops on its own when it failed to start.
            return result?;
        }
    }
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    if let Some(outcome) = exporter.last_outcome() {
        info!(
            total_scrapes = outcome.total_scrapes,
            parse_failures = outcome.parse_failures,
            "Final statistics"
        );
    }

    info!("Exporter stopped");
    Ok(())
}
