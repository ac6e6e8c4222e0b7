//! Replica REST Client
//!
//! The controller's view of replica peers: ACL grant and revoke over the
//! replica control API.

use super::iscsiadm::{join_host_port, split_peer};
use crate::api::ApiErrorResponse;
use crate::domain::ports::{AclLocation, ReplicaApi, CONTROL_PORT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, Response};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the replica client
#[derive(Debug, Clone)]
pub struct ReplicaClientConfig {
    /// Control port used for peers given without an explicit port
    pub control_port: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for ReplicaClientConfig {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// HTTP client for replica peers
pub struct ReplicaClient {
    config: ReplicaClientConfig,
    http_client: reqwest::Client,
}

impl ReplicaClient {
    /// Create a new replica client
    pub fn new(config: ReplicaClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("replica client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Base URL of a peer's control API
    pub fn base_url(&self, peer: &str) -> String {
        let (host, port) = split_peer(peer);
        format!(
            "http://{}",
            join_host_port(host, port.unwrap_or(self.config.control_port))
        )
    }

    async fn send(
        &self,
        method: Method,
        peer: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url(peer), path);
        debug!("{} {} {:?}", method, url, query);

        let response = self
            .http_client
            .request(method, &url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::PeerUnreachable {
                peer: peer.to_string(),
                reason: if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                },
            })?;

        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(rejection(peer, response).await);
        }
        Ok(response)
    }
}

/// Turn an error response into a typed rejection, keeping the peer's code
async fn rejection(peer: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ApiErrorResponse>(&body) {
        Ok(parsed) => Error::PeerRejected {
            peer: peer.to_string(),
            status,
            code: Some(parsed.error),
            message: parsed.message,
        },
        Err(_) => Error::PeerRejected {
            peer: peer.to_string(),
            status,
            code: None,
            message: body,
        },
    }
}

#[async_trait]
impl ReplicaApi for ReplicaClient {
    async fn add_acl(&self, peer: &str, target: &str, initiator: &str) -> Result<()> {
        self.send(
            Method::POST,
            peer,
            "/v1/target/acl",
            &[("target", target), ("initiator", initiator)],
        )
        .await?;
        info!("Peer {} granted {} on {}", peer, initiator, target);
        Ok(())
    }

    async fn remove_acl(&self, peer: &str, initiator: &str) -> Result<()> {
        self.send(
            Method::DELETE,
            peer,
            "/v1/target/acl",
            &[("initiator", initiator)],
        )
        .await?;
        info!("Peer {} revoked {}", peer, initiator);
        Ok(())
    }

    async fn find_acl(&self, peer: &str, initiator: &str) -> Result<Option<AclLocation>> {
        let result = self
            .send(
                Method::GET,
                peer,
                "/v1/target/acl",
                &[("initiator", initiator)],
            )
            .await;

        match result {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(e) if e.is_missing_acl() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
