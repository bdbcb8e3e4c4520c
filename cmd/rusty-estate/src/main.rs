//! # rusty-estate
//!
//! Assembles the messaging server from the adapters selected at compile time
//! and the settings loaded at start-up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api_adapters::{build_router, AppState, Backends};
use auth_adapters::JwtIdentity;
use configs::{LogFormat, LoggingSettings, MessagingSettings, Settings};
use domains::SendThrottle;
use secrecy::ExposeSecret;
use services::{MessagingPolicy, SlidingWindowLimiter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(not(feature = "auth-jwt"))]
compile_error!("rusty-estate needs an identity verifier; enable the `auth-jwt` feature");

/// How often idle senders are dropped from the in-process throttle.
const THROTTLE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.logging);

    let backends = backends(&settings).await?;
    let jwt = JwtIdentity::new(
        settings.auth.jwt_secret.expose_secret(),
        settings.auth.issuer.clone(),
        settings.auth.token_ttl_secs,
    )?;
    let state = AppState::assemble(backends, policy(&settings.messaging), Arc::new(jwt));
    let app = build_router(state, &settings.server.cors_origins);

    let addr = settings.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "rusty-estate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rusty-estate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn policy(messaging: &MessagingSettings) -> MessagingPolicy {
    MessagingPolicy {
        max_body_chars: messaging.max_body_chars,
        default_page_size: messaging.default_page_size,
        max_page_size: messaging.max_page_size,
        list_marks_read: messaging.list_marks_read,
    }
}

#[cfg(feature = "db-postgres")]
async fn backends(settings: &Settings) -> anyhow::Result<Backends> {
    use storage_adapters::{PgConversationRepository, PgListingDirectory, PgMessageRepository, PgUserDirectory};

    let pool = storage_adapters::postgres::connect(
        settings.database.url.expose_secret(),
        settings.database.max_connections,
    )
    .await?;
    tracing::info!("postgres storage ready");

    Ok(Backends {
        conversations: Arc::new(PgConversationRepository::new(pool.clone())),
        messages: Arc::new(PgMessageRepository::new(pool.clone())),
        listings: Arc::new(PgListingDirectory::new(pool.clone())),
        users: Arc::new(PgUserDirectory::new(pool)),
        throttle: throttle(settings)?,
    })
}

#[cfg(not(feature = "db-postgres"))]
async fn backends(settings: &Settings) -> anyhow::Result<Backends> {
    use storage_adapters::{
        MemoryConversationRepository, MemoryListingDirectory, MemoryMessageRepository, MemoryUserDirectory,
    };

    tracing::warn!("db-postgres disabled; conversations live in memory only");
    Ok(Backends {
        conversations: Arc::new(MemoryConversationRepository::new()),
        messages: Arc::new(MemoryMessageRepository::new()),
        listings: Arc::new(MemoryListingDirectory::new()),
        users: Arc::new(MemoryUserDirectory::new()),
        throttle: throttle(settings)?,
    })
}

/// Redis when a URL is configured (shared across instances), otherwise a
/// per-process sliding window.
fn throttle(settings: &Settings) -> anyhow::Result<Arc<dyn SendThrottle>> {
    let messaging = &settings.messaging;

    #[cfg(feature = "redis")]
    if let Some(url) = &settings.redis.url {
        let pool = storage_adapters::redis::create_pool(url.expose_secret())?;
        tracing::info!("send throttle backed by redis");
        return Ok(Arc::new(storage_adapters::RedisSendThrottle::new(
            pool,
            messaging.rate_limit_max_sends,
            messaging.rate_limit_window(),
        )));
    }

    let limiter = Arc::new(SlidingWindowLimiter::new(
        messaging.rate_limit_max_sends,
        messaging.rate_limit_window(),
    ));
    let janitor = Arc::clone(&limiter);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(THROTTLE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            janitor.purge_idle();
        }
    });
    Ok(limiter)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
