use std::sync::Arc;

use anyhow::Context;

use switchboard::channels::Channel;
use switchboard::config::{AppConfig, ProviderSettings, StorageConfig};
use switchboard::pipeline::{AcknowledgementResponder, InboundProcessor};
use switchboard::router::{
    ChannelRouters, HttpEmailProvider, OutboundProvider, ProviderEntry, SmtpProvider, TwilioSmsProvider,
};
use switchboard::safety::{Allowlist, AutoReplyDetector, LoopGuard, RateLimiter};
use switchboard::store::LibSqlStore;
use switchboard::tools::ToolRegistry;
use switchboard::tools::builtin::register_builtin_tools;
use switchboard::webhook::webhook_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), bind = %config.bind_addr, "Starting switchboard");

    // ── Storage ─────────────────────────────────────────────────────────
    let store = match &config.storage {
        StorageConfig::Memory => LibSqlStore::new_memory().await,
        StorageConfig::File(path) => LibSqlStore::new_local(path).await,
    };
    let store = Arc::new(store.context("Failed to open database")?);
    tracing::info!(storage = ?config.storage, "Database ready");

    // ── Guard services ──────────────────────────────────────────────────
    let allowlist = Arc::new(Allowlist::new(store.clone()));
    let loaded = allowlist.load().await.context("Failed to load allow-list")?;
    tracing::info!(entries = loaded, "Allow-list loaded");

    let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window));
    limiter.spawn_cleanup(config.cleanup_interval);

    // ── Outbound providers ──────────────────────────────────────────────
    let routers = Arc::new(ChannelRouters::new());
    if let Some(smtp) = &config.smtp {
        let provider = Arc::new(SmtpProvider::new(&smtp.name, smtp.config.clone()));
        register(&routers, Channel::Email, provider, smtp).await;
    }
    if let Some(api) = &config.email_api {
        let provider = Arc::new(HttpEmailProvider::new(&api.name, api.config.clone()));
        register(&routers, Channel::Email, provider, api).await;
    }
    if let Some(twilio) = &config.twilio {
        let provider = Arc::new(TwilioSmsProvider::new(&twilio.name, twilio.config.clone()));
        register(&routers, Channel::Sms, provider.clone(), twilio).await;
        // Calls are followed up by text message.
        register(&routers, Channel::Voice, provider, twilio).await;
    }
    for channel in Channel::ALL {
        if routers.router(channel).is_empty().await {
            tracing::warn!(channel = %channel, "No outbound providers configured");
        }
    }

    // ── Tools & pipeline ────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, routers.clone(), store.clone()).await;

    let guard = LoopGuard::new(AutoReplyDetector::default_rules(), allowlist.clone(), limiter.clone());
    let processor = Arc::new(InboundProcessor::new(
        store.clone(),
        guard,
        tools,
        Arc::new(AcknowledgementResponder::new(config.acknowledgement.clone())),
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Webhook server listening");

    axum::serve(listener, webhook_routes(processor))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Webhook server failed")?;

    limiter.dispose();
    match allowlist.flush().await {
        Ok(written) => tracing::info!(written, "Allow-list flushed"),
        Err(e) => {
            let pending = allowlist.pending().await;
            tracing::warn!(error = %e, pending, "Allow-list flush failed on shutdown");
        }
    }
    Ok(())
}

async fn register<T>(
    routers: &ChannelRouters,
    channel: Channel,
    provider: Arc<dyn OutboundProvider>,
    settings: &ProviderSettings<T>,
) {
    let entry = ProviderEntry::new(provider, settings.priority)
        .with_tags(settings.tags.iter().cloned())
        .with_domains(settings.domains.iter().cloned());
    routers.router(channel).register(entry).await;
}
