//! open-iscsi Initiator
//!
//! Drives the host initiator through `iscsiadm`: sendtargets discovery,
//! CHAP setup on the node record, login and logout.

use super::command::HostCommand;
use crate::domain::ports::{BlockInitiator, ChapCredentials, ISCSI_PORT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// iscsiadm exit code for "no records/sessions found"
const ISCSI_ERR_NO_OBJS_FOUND: i32 = 21;

/// Configuration for the iscsiadm initiator
#[derive(Debug, Clone)]
pub struct InitiatorConfig {
    /// iscsiadm command line, including any namespace wrapper
    pub command: String,
    /// File holding this host's `InitiatorName=` line
    pub initiator_name_file: PathBuf,
    /// Directory of persistent by-path device links
    pub by_path_dir: PathBuf,
    /// iSCSI portal port of replicas
    pub portal_port: u16,
}

impl Default for InitiatorConfig {
    fn default() -> Self {
        Self {
            command: "iscsiadm".to_string(),
            initiator_name_file: PathBuf::from("/etc/iscsi/initiatorname.iscsi"),
            by_path_dir: PathBuf::from("/dev/disk/by-path"),
            portal_port: ISCSI_PORT,
        }
    }
}

// =============================================================================
// Iscsiadm Initiator
// =============================================================================

/// Block initiator backed by open-iscsi
pub struct IscsiadmInitiator {
    config: InitiatorConfig,
    command: HostCommand,
}

impl IscsiadmInitiator {
    /// Create a new initiator
    pub fn new(config: InitiatorConfig) -> Result<Self> {
        let command = HostCommand::parse(&config.command)?;
        Ok(Self { config, command })
    }

    fn portal(&self, peer: &str) -> String {
        join_host_port(&peer_host(peer), self.config.portal_port)
    }

    async fn update_node(&self, target: &str, portal: &str, name: &str, value: &str) -> Result<()> {
        self.command
            .run(&[
                "-m", "node", "--targetname", target, "-p", portal, "--op", "update", "--name",
                name, "--value", value,
            ])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BlockInitiator for IscsiadmInitiator {
    async fn initiator_name(&self) -> Result<String> {
        let path = &self.config.initiator_name_file;
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::InitiatorName(format!("{}: {}", path.display(), e)))?;
        parse_initiator_name(&contents)
            .ok_or_else(|| Error::InitiatorName(format!("no InitiatorName in {}", path.display())))
    }

    async fn discover_target(&self, peer: &str) -> Result<String> {
        let portal = self.portal(peer);
        let output = self
            .command
            .run(&["-m", "discovery", "-t", "sendtargets", "-p", &portal])
            .await?;

        let target = parse_sendtargets(&output.stdout, &portal).ok_or_else(|| {
            Error::Discovery {
                peer: peer.to_string(),
            }
        })?;
        debug!("Discovered {} on {}", target, portal);
        Ok(target)
    }

    async fn configure_chap(
        &self,
        peer: &str,
        target: &str,
        chap: &ChapCredentials,
    ) -> Result<()> {
        let portal = self.portal(peer);
        self.update_node(target, &portal, "node.session.auth.authmethod", "CHAP")
            .await?;
        self.update_node(target, &portal, "node.session.auth.username", &chap.userid)
            .await?;
        self.update_node(target, &portal, "node.session.auth.password", &chap.password)
            .await
    }

    async fn login(&self, peer: &str, target: &str) -> Result<()> {
        let portal = self.portal(peer);
        self.command
            .run(&["-m", "node", "--targetname", target, "-p", &portal, "--login"])
            .await?;
        info!("Logged in to {} at {}", target, portal);
        Ok(())
    }

    async fn logout(&self, peer: &str, target: &str) -> Result<()> {
        let portal = self.portal(peer);
        let args = ["-m", "node", "--targetname", target, "-p", portal.as_str(), "--logout"];
        let output = self.command.output(&args).await?;

        match output.code {
            Some(0) => {
                info!("Logged out of {} at {}", target, portal);
                Ok(())
            }
            Some(ISCSI_ERR_NO_OBJS_FOUND) => {
                warn!("No session for {} at {}, nothing to log out", target, portal);
                Ok(())
            }
            _ => Err(self.command.failure(&args, &output)),
        }
    }

    fn device_link(&self, peer: &str, target: &str) -> PathBuf {
        self.config.by_path_dir.join(format!(
            "ip-{}-iscsi-{}-lun-0",
            self.portal(peer),
            target
        ))
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Split a peer into its host and optional control port.
///
/// Accepts `host`, `host:port`, a bare IPv6 address and `[v6]:port`.
pub fn split_peer(peer: &str) -> (&str, Option<u16>) {
    if let Some((host, tail)) = peer.strip_prefix('[').and_then(|r| r.split_once(']')) {
        return (host, tail.strip_prefix(':').and_then(|p| p.parse().ok()));
    }
    match peer.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (peer, None),
        },
        _ => (peer, None),
    }
}

/// Host part of a peer address
pub fn peer_host(peer: &str) -> String {
    split_peer(peer).0.to_string()
}

/// `host:port`, bracketing IPv6 hosts
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Pick the target served on `portal` from sendtargets output
/// (`10.0.0.2:3260,1 iqn.2015-10.io.example:vol1`)
pub fn parse_sendtargets(output: &str, portal: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.starts_with(portal))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(String::from)
        .next()
}

/// Extract the initiator name from `initiatorname.iscsi` contents
pub fn parse_initiator_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("InitiatorName="))
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}
