use anyhow::{Context, Result};
use reqwest::{Client, Proxy, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::logging::LogSink;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a HEAD request to `url` and return the status it answered with.
pub async fn probe_connectivity(
    url: &str,
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<StatusCode> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("mediaq/", env!("CARGO_PKG_VERSION")));

    builder = match proxy {
        Some(address) => builder.proxy(
            Proxy::all(address).with_context(|| format!("Invalid proxy address: {}", address))?,
        ),
        None => builder.no_proxy(),
    };

    let client = builder.build().context("Failed to build HTTP client")?;
    let response = client
        .head(url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    Ok(response.status())
}

/// Report reachability of `url` to the sink. Never fails.
pub async fn run_probe(url: String, proxy: Option<String>, sink: Arc<LogSink>) {
    sink.info(format!("Pinging {} to check network access...", url));

    match probe_connectivity(&url, proxy.as_deref(), PROBE_TIMEOUT).await {
        Ok(status) if status.is_success() || status.is_redirection() => {
            sink.info(format!("Network check passed ({})", status));
        }
        Ok(status) => {
            sink.warning(format!("Network check: {} answered {}", url, status));
        }
        Err(e) => {
            sink.warning(format!(
                "Network check failed: {:#}. Downloads may not work.",
                e
            ));
        }
    }
}
