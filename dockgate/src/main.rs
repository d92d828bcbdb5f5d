//! Dockgate - host-addressed reverse proxy for Docker clusters
//!
//! This is the main entry point: it wires the configuration store, the
//! discovery snapshot, the ACME client and the three frontends together,
//! runs the periodic reload and renewal schedules and supervises the
//! listeners.

use anyhow::Context;
use clap::Parser;
use dockgate_core::config::ConfigLoader;
use dockgate_proxy::server::{
    run_http_frontend, run_https_frontend, run_metrics_frontend, Frontend, ListenerExit,
};
use dockgate_proxy::{metrics, AppContext};
use dockgate_tls::{directory, group_by_second_level, AcmeClient, CertCache, CertStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration and endpoint pool are refreshed on this schedule
const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// The SNI frontend is restarted on this schedule so certificates get
/// re-checked for expiry (a no-op for fresh entries, a renewal otherwise)
const SNI_RESTART_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Dockgate - reverse proxy with Docker discovery and automatic HTTPS
#[derive(Parser)]
#[command(name = "dockgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Location of the configuration file
    #[arg(long = "configfile", default_value = "./config.json")]
    configfile: PathBuf,

    /// ACME directory endpoint
    #[arg(long = "letsencrypt-server", default_value = directory::LETS_ENCRYPT_PRODUCTION)]
    letsencrypt_server: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config =
        ConfigLoader::load(&cli.configfile).context("unable to parse configuration")?;

    let cache = CertCache::load(CertCache::default_path())
        .context("unable to load certificate cache")?;
    let acme = Arc::new(AcmeClient::new(cli.letsencrypt_server, cache));

    metrics::init();

    let ctx = Arc::new(AppContext::new(config));
    let pool = dockgate_discovery::collect(&ctx.config()).await;
    ctx.publish_endpoints(pool);

    let (exit_tx, mut exit_rx) = mpsc::channel::<(Frontend, ListenerExit)>(4);
    let sni_stop = Arc::new(Notify::new());

    // Plaintext and metrics frontends run for the lifetime of the process
    {
        let ctx = ctx.clone();
        let exit_tx = exit_tx.clone();
        let addr = ctx.config().listen_http.clone();
        tokio::spawn(async move {
            let exit = run_http_frontend(ctx, addr).await;
            let _ = exit_tx.send((Frontend::Http, exit)).await;
        });
    }
    {
        let exit_tx = exit_tx.clone();
        let addr = ctx.config().listen_metrics.clone();
        tokio::spawn(async move {
            let exit = run_metrics_frontend(addr).await;
            let _ = exit_tx.send((Frontend::Metrics, exit)).await;
        });
    }

    // The SNI frontend gets restarted after every cooperative stop
    start_ssl_server(&ctx, &acme, &sni_stop, &exit_tx)
        .await
        .context("unable to start SNI frontend")?;

    spawn_schedules(&ctx, cli.configfile.clone(), &sni_stop);

    // Supervisor: a Stopped SNI frontend is restarted with a rebuilt
    // certificate store, everything else is fatal.
    while let Some((frontend, exit)) = exit_rx.recv().await {
        match (frontend, exit) {
            (Frontend::Https, ListenerExit::Stopped) => {
                tracing::info!("rebuilding certificate store and restarting SNI frontend");
                start_ssl_server(&ctx, &acme, &sni_stop, &exit_tx)
                    .await
                    .context("unable to restart SNI frontend")?;
            }
            (frontend, ListenerExit::Fatal(e)) => {
                return Err(e).context(format!("{} frontend failed", frontend));
            }
            (frontend, ListenerExit::Stopped) => {
                anyhow::bail!("{} frontend stopped unexpectedly", frontend);
            }
        }
    }

    Ok(())
}

/// Prime the certificate store and launch the SNI frontend with it.
///
/// Store priming runs the ACME acquisition pass, so a failure here is
/// surfaced to the caller (fatal at startup and on scheduled restart).
async fn start_ssl_server(
    ctx: &Arc<AppContext>,
    acme: &Arc<AcmeClient>,
    sni_stop: &Arc<Notify>,
    exit_tx: &mpsc::Sender<(Frontend, ListenerExit)>,
) -> anyhow::Result<()> {
    let store = build_cert_store(ctx, acme).await?;
    tracing::info!("certificate store ready for {} server name(s)", store.len());

    let tls_config = store
        .into_server_config()
        .context("unable to build TLS configuration")?;

    let ctx = ctx.clone();
    let sni_stop = sni_stop.clone();
    let exit_tx = exit_tx.clone();
    let addr = ctx.config().listen_https.clone();
    tokio::spawn(async move {
        let exit = run_https_frontend(ctx, addr, tls_config, sni_stop).await;
        let _ = exit_tx.send((Frontend::Https, exit)).await;
    });

    Ok(())
}

/// Collect certificates from disk, then one multi-SAN ACME certificate per
/// second-level group of letsencrypt-enabled domains.
async fn build_cert_store(
    ctx: &Arc<AppContext>,
    acme: &Arc<AcmeClient>,
) -> anyhow::Result<CertStore> {
    let config = ctx.config();
    let mut store = CertStore::new();

    for (domain, domain_config) in &config.domains {
        if !domain_config.ssl.cert.is_empty() {
            store
                .load_pem_pair(&domain_config.ssl.cert, &domain_config.ssl.key)
                .with_context(|| format!("loading certificate for {}", domain))?;
        }
    }

    for group in group_by_second_level(&config.letsencrypt_domains()) {
        let bundle = acme
            .fetch_multi_domain(&group, &ctx.challenges)
            .await
            .with_context(|| format!("obtaining certificate for {:?}", group))?;
        store.add_bundle(&bundle)?;
    }

    Ok(store)
}

/// The two periodic jobs: configuration + discovery reload, and the
/// long-cycle SNI restart. Both run concurrently with request handling.
fn spawn_schedules(ctx: &Arc<AppContext>, configfile: PathBuf, sni_stop: &Arc<Notify>) {
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RELOAD_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                reload_configuration(&ctx, &configfile).await;
            }
        });
    }

    {
        let sni_stop = sni_stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SNI_RESTART_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::info!("scheduled SNI frontend restart");
                sni_stop.notify_one();
            }
        });
    }
}

/// Re-read the configuration (keeping the previous snapshot on failure)
/// and rebuild the endpoint pool from scratch.
async fn reload_configuration(ctx: &AppContext, configfile: &PathBuf) {
    match ConfigLoader::load(configfile) {
        Ok(config) => ctx.publish_config(config),
        Err(e) => tracing::error!("configuration reload failed, keeping previous: {}", e),
    }

    let pool = dockgate_discovery::collect(&ctx.config()).await;
    ctx.publish_endpoints(pool);
}
