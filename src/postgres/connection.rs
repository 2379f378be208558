// ABOUTME: PostgreSQL connection setup with TLS and retry
// ABOUTME: The TLS policy is fixed once per process from the CLI flag

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use crate::utils::{retry_with_backoff, sanitize_url};

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Set whether self-signed server certificates are accepted. Only the first
/// call has an effect.
pub fn init_tls_policy(allow_self_signed: bool) {
    if ALLOW_SELF_SIGNED.set(allow_self_signed).is_err() {
        tracing::debug!("TLS policy already initialized, ignoring");
    } else if allow_self_signed {
        tracing::warn!("Accepting self-signed TLS certificates - use only for testing");
    }
}

fn allow_self_signed() -> bool {
    ALLOW_SELF_SIGNED.get().copied().unwrap_or(false)
}

/// Open one connection and drive it on a background task.
pub async fn connect(url: &str) -> Result<Client> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed())
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// [`connect`] with three retries and exponential backoff from one second.
pub async fn connect_with_retry(url: &str) -> Result<Client> {
    retry_with_backoff(|| connect(url), 3, Duration::from_secs(1))
        .await
        .with_context(|| format!("Giving up on {}", sanitize_url(url)))
}
