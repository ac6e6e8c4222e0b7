//! Node Address Bootstrap
//!
//! When no bind address is configured, the node's primary IP is fetched from
//! the container metadata service, which may not answer during early startup.

use crate::error::{Error, Result};
use backoff::backoff::Constant;
use backoff::future::retry_notify;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration of the metadata lookup
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// URL returning the node's primary IP as plain text
    pub url: String,
    /// Number of attempts before giving up
    pub attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
    /// Timeout of a single request
    pub request_timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            url: "http://rancher-metadata/2015-07-25/self/container/primary_ip".to_string(),
            attempts: 10,
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Fetch this node's primary IP from the metadata service
pub async fn resolve_node_address(config: &MetadataConfig) -> Result<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| Error::Configuration(format!("metadata client: {}", e)))?;

    let client = &client;
    let url = config.url.as_str();
    let mut remaining = config.attempts.max(1);
    let fetch = move || {
        remaining -= 1;
        let last = remaining == 0;
        async move {
            fetch_address(client, url).await.map_err(|e| {
                if last {
                    backoff::Error::permanent(e)
                } else {
                    backoff::Error::transient(e)
                }
            })
        }
    };

    let address = retry_notify(Constant::new(config.interval), fetch, |e, _| {
        warn!("Metadata lookup failed, retrying: {}", e)
    })
    .await?;

    info!("Node address from metadata: {}", address);
    Ok(address)
}

async fn fetch_address(client: &reqwest::Client, url: &str) -> Result<IpAddr> {
    let response = client.get(url).send().await?.error_for_status()?;
    let body = response.text().await?;
    body.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("metadata returned invalid address {:?}", body)))
}
