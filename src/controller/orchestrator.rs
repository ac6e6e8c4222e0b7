//! Mirror Orchestrator
//!
//! Joins two replica peers into a local RAID1 array and takes it apart again:
//! - Setup: reserve ACLs on both peers, attach both LUNs, assemble the mirror
//! - Teardown: dismantle the array, then release every peer
//! - Query: report the configured array device
//!
//! Setup and Teardown are serialized by an operation lock; Query only reads
//! the session and never waits for them.

use super::session::{MirrorLayout, MirrorSession};
use super::wait::{wait_for_device, DeviceWaitConfig};
use crate::domain::ports::{BlockInitiator, ChapCredentials, RaidAssembler, ReplicaApi};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the controller orchestrator
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory array devices must live in
    pub md_dir: PathBuf,
    /// CHAP pair presented to every replica
    pub chap: ChapCredentials,
    /// Wait for LUN devices after login
    pub device_wait: DeviceWaitConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            md_dir: PathBuf::from("/dev/md"),
            chap: ChapCredentials::default(),
            device_wait: DeviceWaitConfig::default(),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Controller that owns the single mirror session of this host
pub struct MirrorOrchestrator {
    config: ControllerConfig,
    initiator: Arc<dyn BlockInitiator>,
    raid: Arc<dyn RaidAssembler>,
    replicas: Arc<dyn ReplicaApi>,
    session: RwLock<MirrorSession>,
    /// Serializes Setup and Teardown
    op_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl MirrorOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: ControllerConfig,
        initiator: Arc<dyn BlockInitiator>,
        raid: Arc<dyn RaidAssembler>,
        replicas: Arc<dyn ReplicaApi>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            initiator,
            raid,
            replicas,
            session: RwLock::new(MirrorSession::new()),
            op_lock: Mutex::new(()),
            shutdown,
        })
    }

    /// Configured array device, or an empty string
    pub fn query(&self) -> String {
        self.session.read().device_name()
    }

    /// Snapshot of the session
    pub fn session(&self) -> MirrorSession {
        self.session.read().clone()
    }

    /// Build a mirror from two replica peers at `device_name`
    pub async fn setup(&self, peers: &[String], device_name: &str) -> Result<PathBuf> {
        let peers = require_pair(peers)?;
        let _guard = self.op_lock.lock().await;

        self.session.write().begin_join()?;
        let result = self.join(&peers, device_name).await;

        let mut session = self.session.write();
        match result {
            Ok(layout) => {
                let device = layout.device.clone();
                session.complete_join(layout)?;
                info!("Mirror {} is up", device.display());
                Ok(device)
            }
            Err(e) => {
                session.abort_join();
                error!("Setup of {} failed: {}", device_name, e);
                Err(e)
            }
        }
    }

    /// Take the mirror apart and release both peers
    pub async fn teardown(&self, peers: &[String]) -> Result<()> {
        let peers = require_pair(peers)?;
        let _guard = self.op_lock.lock().await;

        if let Some(layout) = self.session.read().layout() {
            if !same_pair(&layout.peers, &peers) {
                return Err(Error::Validation(format!(
                    "mirror {} is built from {} and {}, not {} and {}",
                    layout.device.display(),
                    layout.peers[0],
                    layout.peers[1],
                    peers[0],
                    peers[1]
                )));
            }
        }

        let layout = self.session.write().begin_teardown()?;
        if let Some(layout) = &layout {
            self.dismantle_array(layout).await;
        }
        self.session.write().complete_teardown();

        let result = self.release_peers(&peers, layout.as_ref()).await;
        match &result {
            Ok(()) => info!("Teardown of {} and {} complete", peers[0], peers[1]),
            Err(e) => error!("Teardown failed: {}", e),
        }
        result
    }

    /// Resolve a device name to a free path under the md directory
    pub fn resolve_device(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        let invalid = |reason: &str| Error::InvalidDevice {
            device: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("empty device name"));
        }

        let path = if name.starts_with('/') {
            PathBuf::from(name)
        } else if name.contains('/') {
            return Err(invalid("bare device names cannot contain '/'"));
        } else {
            self.config.md_dir.join(name)
        };

        let md_dir = &self.config.md_dir;
        if !path.starts_with(md_dir) || path == *md_dir {
            return Err(invalid(&format!("must be under {}", md_dir.display())));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return Err(invalid("relative components are not allowed"));
        }

        if std::fs::symlink_metadata(&path).is_ok() {
            return Err(Error::DeviceExists {
                device: path.display().to_string(),
            });
        }
        Ok(path)
    }

    // =========================================================================
    // Setup
    // =========================================================================

    async fn join(&self, peers: &[String; 2], device_name: &str) -> Result<MirrorLayout> {
        let device = self.resolve_device(device_name)?;
        let initiator = self.initiator.initiator_name().await?;
        info!(
            "Setting up mirror {} from {} and {} as {}",
            device.display(),
            peers[0],
            peers[1],
            initiator
        );

        // Phase 1: discover and reserve on both peers
        let (first, second) = tokio::join!(
            self.reserve(&peers[0], &initiator),
            self.reserve(&peers[1], &initiator)
        );
        let reserved = match (first, second) {
            (Ok(a), Ok(b)) => [a, b],
            (first, second) => {
                let granted: Vec<&str> = peers
                    .iter()
                    .zip([&first, &second])
                    .filter(|(_, reservation)| matches!(reservation, Ok(r) if r.granted))
                    .map(|(peer, _)| peer.as_str())
                    .collect();
                self.revoke(&granted, &initiator).await;
                return Err(first_error(first, second));
            }
        };
        let targets = [reserved[0].target.clone(), reserved[1].target.clone()];
        let granted: Vec<&str> = peers
            .iter()
            .zip(&reserved)
            .filter(|(_, r)| r.granted)
            .map(|(peer, _)| peer.as_str())
            .collect();

        // Phase 2: log in and wait for both LUNs
        let (first, second) = tokio::join!(
            self.attach(&peers[0], &targets[0]),
            self.attach(&peers[1], &targets[1])
        );
        let components = match (first, second) {
            (Ok(a), Ok(b)) => [a, b],
            (first, second) => {
                self.rollback(peers, &targets, &granted, &initiator).await;
                return Err(first_error(first, second));
            }
        };

        if components[0] == components[1] {
            self.rollback(peers, &targets, &granted, &initiator).await;
            return Err(Error::Validation(format!(
                "both peers resolved to the same device {}",
                components[0].display()
            )));
        }

        if let Err(e) = self.raid.create_mirror(&device, &components).await {
            self.rollback(peers, &targets, &granted, &initiator).await;
            return Err(e);
        }

        Ok(MirrorLayout {
            peers: peers.clone(),
            targets,
            device,
            components,
            assembled_at: Utc::now(),
        })
    }

    async fn reserve(&self, peer: &str, initiator: &str) -> Result<Reservation> {
        let target = self.initiator.discover_target(peer).await?;
        let held = match self.replicas.find_acl(peer, initiator).await {
            Ok(acl) => acl.is_some_and(|acl| acl.wwn == target),
            Err(e) => {
                warn!("ACL lookup on {} failed, treating grant as new: {}", peer, e);
                false
            }
        };
        if held {
            debug!("{} already holds an ACL on {}", initiator, peer);
        }

        self.replicas.add_acl(peer, &target, initiator).await?;
        Ok(Reservation {
            target,
            granted: !held,
        })
    }

    async fn attach(&self, peer: &str, target: &str) -> Result<PathBuf> {
        self.initiator
            .configure_chap(peer, target, &self.config.chap)
            .await?;
        self.initiator.login(peer, target).await?;

        let link = self.initiator.device_link(peer, target);
        let device = wait_for_device(&link, &self.config.device_wait, &self.shutdown).await?;
        debug!("Peer {} attached as {}", peer, device.display());
        Ok(device)
    }

    async fn rollback(
        &self,
        peers: &[String; 2],
        targets: &[String; 2],
        granted: &[&str],
        initiator: &str,
    ) {
        for (peer, target) in peers.iter().zip(targets) {
            if let Err(e) = self.initiator.logout(peer, target).await {
                warn!("Rollback logout from {} failed: {}", peer, e);
            }
        }
        self.revoke(granted, initiator).await;
    }

    async fn revoke(&self, peers: &[&str], initiator: &str) {
        for peer in peers {
            match self.replicas.remove_acl(peer, initiator).await {
                Ok(()) => debug!("Rolled back ACL on {}", peer),
                Err(e) => warn!("Rollback of ACL on {} failed: {}", peer, e),
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn dismantle_array(&self, layout: &MirrorLayout) {
        let device = &layout.device;
        info!("Stopping mirror {}", device.display());

        if let Err(e) = self.raid.stop(device).await {
            warn!("Failed to stop {}: {}", device.display(), e);
        }

        match tokio::fs::symlink_metadata(device).await {
            Ok(meta) if meta.file_type().is_symlink() && !device.exists() => {
                debug!("Unlinking dangling {}", device.display());
                if let Err(e) = tokio::fs::remove_file(device).await {
                    warn!("Failed to unlink {}: {}", device.display(), e);
                }
            }
            Ok(_) => {
                if let Err(e) = self.raid.remove(device).await {
                    warn!("Failed to remove {}: {}", device.display(), e);
                }
            }
            Err(_) => debug!("{} is gone after stop", device.display()),
        }

        for component in &layout.components {
            if let Err(e) = self.raid.zero_superblock(component).await {
                warn!(
                    "Failed to clear superblock on {}: {}",
                    component.display(),
                    e
                );
            }
        }
    }

    async fn release_peers(&self, peers: &[String; 2], layout: Option<&MirrorLayout>) -> Result<()> {
        let initiator = self.initiator.initiator_name().await?;
        let mut deferred: Option<Error> = None;

        for peer in peers {
            let known = layout.and_then(|l| {
                l.peers
                    .iter()
                    .position(|p| p == peer)
                    .map(|i| l.targets[i].clone())
            });

            match self.release(peer, known, &initiator).await {
                Ok(()) => {}
                Err(e @ Error::PeerRejected { status: 400, .. }) => return Err(e),
                Err(e) => {
                    warn!("Releasing {} failed, continuing: {}", peer, e);
                    deferred.get_or_insert(e);
                }
            }
        }

        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release(&self, peer: &str, known: Option<String>, initiator: &str) -> Result<()> {
        let target = match known {
            Some(target) => Ok(target),
            None => self.initiator.discover_target(peer).await,
        };

        let revoked = match self.replicas.remove_acl(peer, initiator).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_missing_acl() => {
                debug!("No ACL for {} on {}", initiator, peer);
                Ok(())
            }
            Err(e @ Error::PeerRejected { status: 400, .. }) => return Err(e),
            Err(e) => Err(e),
        };

        let logged_out = match target {
            Ok(target) => self.initiator.logout(peer, &target).await,
            Err(e) => Err(e),
        };
        revoked.and(logged_out)
    }
}

/// A target reserved on a peer during Setup
struct Reservation {
    target: String,
    /// The ACL was created by this Setup rather than held beforehand
    granted: bool,
}

/// Exactly two peers are supported
pub fn require_pair(peers: &[String]) -> Result<[String; 2]> {
    match peers {
        [a, b] if a == b => Err(Error::Validation(format!(
            "peers must be distinct, got {} twice",
            a
        ))),
        [a, b] => Ok([a.clone(), b.clone()]),
        _ => Err(Error::PeerCount { count: peers.len() }),
    }
}

fn same_pair(a: &[String; 2], b: &[String; 2]) -> bool {
    (a[0] == b[0] && a[1] == b[1]) || (a[0] == b[1] && a[1] == b[0])
}

fn first_error<A, B>(first: Result<A>, second: Result<B>) -> Error {
    match (first, second) {
        (Err(e), _) | (_, Err(e)) => e,
        _ => Error::Internal("no error to report".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::fakes::{Fault, Rig, PEER_A, PEER_B};
    use crate::controller::session::SessionState;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn peers() -> Vec<String> {
        vec![PEER_A.to_string(), PEER_B.to_string()]
    }

    #[tokio::test]
    async fn test_setup_and_query() {
        let rig = Rig::new();
        assert_eq!(rig.orchestrator.query(), "");

        let device = rig.orchestrator.setup(&peers(), "data0").await.unwrap();
        assert_eq!(device, rig.md_dir().join("data0"));
        assert_eq!(rig.orchestrator.query(), device.display().to_string());

        let session = rig.orchestrator.session();
        assert_eq!(session.state(), SessionState::Mirrored);
        let layout = session.layout().unwrap();
        assert_ne!(layout.components[0], layout.components[1]);
        assert_eq!(rig.raid.array(&device), Some(layout.components.clone()));

        assert!(rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert_eq!(rig.initiator.sessions().len(), 2);
        assert!(rig
            .initiator
            .chap_configured()
            .iter()
            .all(|chap| *chap == ChapCredentials::default()));
    }

    #[tokio::test]
    async fn test_peer_count_rejected() {
        let rig = Rig::new();

        let one = vec![PEER_A.to_string()];
        assert_matches!(
            rig.orchestrator.setup(&one, "data0").await,
            Err(Error::PeerCount { count: 1 })
        );
        let three = vec![PEER_A.into(), PEER_B.into(), "10.0.0.4".into()];
        assert_matches!(
            rig.orchestrator.setup(&three, "data0").await,
            Err(Error::PeerCount { count: 3 })
        );
        assert_matches!(
            rig.orchestrator.teardown(&one).await,
            Err(Error::PeerCount { count: 1 })
        );

        assert!(rig.raid.arrays().is_empty());
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
    }

    #[tokio::test]
    async fn test_existing_device_rejected_before_side_effects() {
        let rig = Rig::new();
        std::fs::write(rig.md_dir().join("data0"), b"").unwrap();

        let err = rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert_matches!(err, Error::DeviceExists { .. });
        assert_eq!(err.http_status(), 400);

        assert!(rig.replicas.calls().is_empty());
        assert!(rig.initiator.sessions().is_empty());
        assert_eq!(rig.orchestrator.session().state(), SessionState::Unconfigured);
    }

    #[tokio::test]
    async fn test_device_name_resolution() {
        let rig = Rig::new();
        let md_dir = rig.md_dir();

        assert_eq!(
            rig.orchestrator.resolve_device("data0").unwrap(),
            md_dir.join("data0")
        );
        let absolute = md_dir.join("data1").display().to_string();
        assert_eq!(
            rig.orchestrator.resolve_device(&absolute).unwrap(),
            md_dir.join("data1")
        );

        assert_matches!(
            rig.orchestrator.resolve_device("/dev/sda"),
            Err(Error::InvalidDevice { .. })
        );
        assert_matches!(
            rig.orchestrator.resolve_device("md/data0"),
            Err(Error::InvalidDevice { .. })
        );
        let escape = format!("{}/../data0", md_dir.display());
        assert_matches!(
            rig.orchestrator.resolve_device(&escape),
            Err(Error::InvalidDevice { .. })
        );
        assert_matches!(
            rig.orchestrator.resolve_device(" "),
            Err(Error::InvalidDevice { .. })
        );
    }

    #[test]
    fn test_default_md_dir_accepts_absolute_name() {
        let config = ControllerConfig::default();
        let path = PathBuf::from("/dev/md/data0");
        assert!(path.starts_with(&config.md_dir));
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let rig = Rig::new();
        let device = rig.orchestrator.setup(&peers(), "data0").await.unwrap();

        rig.orchestrator.teardown(&peers()).await.unwrap();

        assert_eq!(rig.orchestrator.query(), "");
        assert!(rig.raid.array(&device).is_none());
        assert!(!device.exists());
        assert_eq!(rig.raid.zeroed().len(), 2);
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert!(rig.initiator.sessions().is_empty());

        let device = rig.orchestrator.setup(&peers(), "data1").await.unwrap();
        assert_eq!(rig.orchestrator.query(), device.display().to_string());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let rig = Rig::new();
        rig.orchestrator.setup(&peers(), "data0").await.unwrap();

        rig.orchestrator.teardown(&peers()).await.unwrap();
        rig.orchestrator.teardown(&peers()).await.unwrap();
        assert_eq!(rig.raid.zeroed().len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_without_mirror_repairs_peers() {
        let rig = Rig::new();
        rig.replicas
            .service(PEER_A)
            .add_acl(Some(rig.target(PEER_A)), Some(rig.initiator.name.as_str()))
            .unwrap();

        rig.orchestrator.teardown(&peers()).await.unwrap();
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(rig.raid.zeroed().is_empty());
    }

    #[tokio::test]
    async fn test_second_setup_rejected() {
        let rig = Rig::new();
        rig.orchestrator.setup(&peers(), "data0").await.unwrap();

        let err = rig.orchestrator.setup(&peers(), "data1").await.unwrap_err();
        assert_matches!(err, Error::MirrorConfigured { .. });
        assert_eq!(rig.raid.arrays().len(), 1);
        assert_eq!(
            rig.orchestrator.query(),
            rig.md_dir().join("data0").display().to_string()
        );
    }

    #[tokio::test]
    async fn test_concurrent_setups_never_mix() {
        let rig = Rig::new();
        let (first, second) = (peers(), peers());
        let (a, b) = tokio::join!(
            rig.orchestrator.setup(&first, "data0"),
            rig.orchestrator.setup(&second, "data1")
        );

        let winner = match (a, b) {
            (Ok(device), Err(e)) | (Err(e), Ok(device)) => {
                assert_matches!(e, Error::MirrorConfigured { .. });
                device
            }
            other => panic!("expected exactly one setup to win, got {:?}", other),
        };

        assert_eq!(rig.orchestrator.query(), winner.display().to_string());
        assert_eq!(rig.raid.arrays().len(), 1);
        assert_eq!(rig.initiator.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_acl_rejection_rolls_back() {
        let rig = Rig::new();
        rig.replicas.inject(PEER_B, Fault::RejectGrant);

        let err = rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert_matches!(err, Error::PeerRejected { status: 400, .. });

        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(rig.initiator.sessions().is_empty());
        assert!(rig.raid.arrays().is_empty());
        assert_eq!(rig.orchestrator.session().state(), SessionState::Unconfigured);
    }

    #[tokio::test]
    async fn test_discovery_failure_rolls_back() {
        let rig = Rig::new();
        let peers = vec![PEER_A.to_string(), "10.0.0.9".to_string()];

        let err = rig.orchestrator.setup(&peers, "data0").await.unwrap_err();
        assert_matches!(err, Error::Discovery { peer } if peer == "10.0.0.9");
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
    }

    #[tokio::test]
    async fn test_device_timeout_rolls_back() {
        let rig = Rig::new();
        rig.initiator.withhold_device(PEER_B);

        let err = rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert_matches!(err, Error::DeviceTimeout { .. });
        assert_eq!(err.http_status(), 400);

        assert!(rig.initiator.sessions().is_empty());
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert!(rig.raid.arrays().is_empty());

        let device = rig.orchestrator.setup(&peers(), "data0").await;
        assert_matches!(device, Err(Error::DeviceTimeout { .. }));
    }

    #[tokio::test]
    async fn test_assembly_failure_rolls_back() {
        let rig = Rig::new();
        rig.raid.fail_create(true);

        let err = rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert_matches!(err, Error::Command { .. });
        assert!(rig.initiator.sessions().is_empty());
        assert!(!rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));

        rig.raid.fail_create(false);
        rig.orchestrator.setup(&peers(), "data0").await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_device_wait() {
        let rig = Rig::with_wait(DeviceWaitConfig {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(30),
        });
        rig.initiator.withhold_device(PEER_A);
        rig.shutdown.cancel();

        let err = rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert_matches!(err, Error::Cancelled(_));
        assert!(rig.initiator.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_aborts_on_peer_rejection() {
        let rig = Rig::new();
        rig.orchestrator.setup(&peers(), "data0").await.unwrap();
        rig.replicas.inject(PEER_A, Fault::RejectRevoke);

        let err = rig.orchestrator.teardown(&peers()).await.unwrap_err();
        assert_matches!(err, Error::PeerRejected { ref peer, .. } if peer == PEER_A);

        // The array is gone, the second peer was never released
        assert_eq!(rig.orchestrator.query(), "");
        assert!(rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
    }

    #[tokio::test]
    async fn test_teardown_continues_past_unreachable_peer() {
        let rig = Rig::new();
        rig.orchestrator.setup(&peers(), "data0").await.unwrap();
        rig.replicas.inject(PEER_A, Fault::Unreachable);

        let err = rig.orchestrator.teardown(&peers()).await.unwrap_err();
        assert_matches!(err, Error::PeerUnreachable { .. });
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert_eq!(rig.initiator.sessions().len(), 0);
    }

    #[tokio::test]
    async fn test_teardown_rejects_foreign_peers() {
        let rig = Rig::new();
        let device = rig.orchestrator.setup(&peers(), "data0").await.unwrap();

        let foreign = vec![PEER_A.to_string(), "10.0.0.9".to_string()];
        let err = rig.orchestrator.teardown(&foreign).await.unwrap_err();
        assert_matches!(err, Error::Validation(_));
        assert_eq!(err.http_status(), 400);

        assert_eq!(rig.orchestrator.query(), device.display().to_string());
        assert!(rig.raid.array(&device).is_some());
        assert!(rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert_eq!(rig.initiator.sessions().len(), 2);

        let reversed = vec![PEER_B.to_string(), PEER_A.to_string()];
        rig.orchestrator.teardown(&reversed).await.unwrap();
        assert_eq!(rig.orchestrator.query(), "");
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert!(rig.initiator.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_keeps_preexisting_acl() {
        let rig = Rig::new();
        rig.replicas
            .service(PEER_A)
            .add_acl(Some(rig.target(PEER_A)), Some(rig.initiator.name.as_str()))
            .unwrap();
        rig.replicas.inject(PEER_B, Fault::RejectGrant);

        rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert!(rig.replicas.holds_acl(PEER_A, &rig.initiator.name));

        rig.replicas.clear(PEER_B);
        rig.raid.fail_create(true);
        rig.orchestrator.setup(&peers(), "data0").await.unwrap_err();
        assert!(rig.replicas.holds_acl(PEER_A, &rig.initiator.name));
        assert!(!rig.replicas.holds_acl(PEER_B, &rig.initiator.name));
        assert!(rig.initiator.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_array_link_removed() {
        let rig = Rig::new();
        let device = rig.orchestrator.setup(&peers(), "data0").await.unwrap();
        rig.raid.leave_dangling_link(true);

        rig.orchestrator.teardown(&peers()).await.unwrap();
        assert!(std::fs::symlink_metadata(&device).is_err());
        assert!(rig.raid.removed().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_lifecycle_example() {
        let rig = Rig::new();
        let peers = vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()];

        let device = rig.orchestrator.setup(&peers, "data0").await.unwrap();
        assert!(device.ends_with("md/data0"));
        assert_eq!(rig.orchestrator.query(), device.display().to_string());

        rig.orchestrator.teardown(&peers).await.unwrap();
        assert_eq!(rig.orchestrator.query(), "");
        for peer in &peers {
            assert!(!rig.replicas.holds_acl(peer, &rig.initiator.name));
        }
    }

    #[test]
    fn test_require_pair() {
        assert!(require_pair(&peers()).is_ok());
        assert_matches!(
            require_pair(&[PEER_A.into(), PEER_A.into()]),
            Err(Error::Validation(_))
        );
        assert_matches!(require_pair(&[]), Err(Error::PeerCount { count: 0 }));
    }
}
