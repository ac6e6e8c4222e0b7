//! In-process stand-ins for the controller's host facilities.

use super::iscsiadm::peer_host;
use super::orchestrator::{ControllerConfig, MirrorOrchestrator};
use super::wait::DeviceWaitConfig;
use crate::domain::ports::{
    AclLocation, BlockInitiator, ChapCredentials, RaidAssembler, ReplicaApi,
};
use crate::error::{Error, Result};
use crate::replica::{CreateTargetRequest, MemoryFabric, ReplicaConfig, ReplicaService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const PEER_A: &str = "10.0.0.2";
pub const PEER_B: &str = "10.0.0.3";

// =============================================================================
// Initiator
// =============================================================================

/// Initiator whose logins create device links in a scratch directory
pub struct FakeInitiator {
    pub name: String,
    by_path: PathBuf,
    devices: PathBuf,
    targets: Mutex<BTreeMap<String, String>>,
    sessions: Mutex<BTreeSet<(String, String)>>,
    chap: Mutex<Vec<ChapCredentials>>,
    withheld: Mutex<BTreeSet<String>>,
}

impl FakeInitiator {
    pub fn new(root: &Path, name: &str) -> Self {
        let by_path = root.join("by-path");
        let devices = root.join("dev");
        std::fs::create_dir_all(&by_path).unwrap();
        std::fs::create_dir_all(&devices).unwrap();
        Self {
            name: name.to_string(),
            by_path,
            devices,
            targets: Mutex::new(BTreeMap::new()),
            sessions: Mutex::new(BTreeSet::new()),
            chap: Mutex::new(Vec::new()),
            withheld: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make `wwn` discoverable on `peer`
    pub fn export(&self, peer: &str, wwn: &str) {
        self.targets.lock().insert(peer.to_string(), wwn.to_string());
    }

    /// Logins to `peer` succeed but its device never shows up
    pub fn withhold_device(&self, peer: &str) {
        self.withheld.lock().insert(peer.to_string());
    }

    pub fn sessions(&self) -> Vec<(String, String)> {
        self.sessions.lock().iter().cloned().collect()
    }

    pub fn chap_configured(&self) -> Vec<ChapCredentials> {
        self.chap.lock().clone()
    }
}

#[async_trait]
impl BlockInitiator for FakeInitiator {
    async fn initiator_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    async fn discover_target(&self, peer: &str) -> Result<String> {
        self.targets
            .lock()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::Discovery {
                peer: peer.to_string(),
            })
    }

    async fn configure_chap(&self, _peer: &str, _target: &str, chap: &ChapCredentials) -> Result<()> {
        self.chap.lock().push(chap.clone());
        Ok(())
    }

    async fn login(&self, peer: &str, target: &str) -> Result<()> {
        self.sessions
            .lock()
            .insert((peer.to_string(), target.to_string()));

        if !self.withheld.lock().contains(peer) {
            let device = self.devices.join(format!("sd-{}", peer.replace(':', "-")));
            std::fs::write(&device, b"")?;
            let link = self.device_link(peer, target);
            if !link.exists() {
                std::os::unix::fs::symlink(&device, &link)?;
            }
        }
        Ok(())
    }

    async fn logout(&self, peer: &str, target: &str) -> Result<()> {
        self.sessions
            .lock()
            .remove(&(peer.to_string(), target.to_string()));
        let _ = std::fs::remove_file(self.device_link(peer, target));
        Ok(())
    }

    fn device_link(&self, peer: &str, target: &str) -> PathBuf {
        self.by_path
            .join(format!("ip-{}:3260-iscsi-{}-lun-0", peer_host(peer), target))
    }
}

// =============================================================================
// RAID
// =============================================================================

/// Assembler that materializes arrays as plain files
#[derive(Default)]
pub struct FakeRaid {
    arrays: Mutex<BTreeMap<PathBuf, [PathBuf; 2]>>,
    zeroed: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
    fail_create: Mutex<bool>,
    dangling: Mutex<bool>,
}

impl FakeRaid {
    pub fn fail_create(&self, fail: bool) {
        *self.fail_create.lock() = fail;
    }

    /// `stop` leaves a dangling link in place of the array node
    pub fn leave_dangling_link(&self, dangling: bool) {
        *self.dangling.lock() = dangling;
    }

    pub fn array(&self, device: &Path) -> Option<[PathBuf; 2]> {
        self.arrays.lock().get(device).cloned()
    }

    pub fn arrays(&self) -> Vec<PathBuf> {
        self.arrays.lock().keys().cloned().collect()
    }

    pub fn zeroed(&self) -> Vec<PathBuf> {
        self.zeroed.lock().clone()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl RaidAssembler for FakeRaid {
    async fn create_mirror(&self, device: &Path, components: &[PathBuf; 2]) -> Result<()> {
        if *self.fail_create.lock() {
            return Err(Error::Command {
                command: "mdadm --create".into(),
                reason: "injected failure".into(),
            });
        }
        std::fs::write(device, b"")?;
        self.arrays
            .lock()
            .insert(device.to_path_buf(), components.clone());
        Ok(())
    }

    async fn stop(&self, device: &Path) -> Result<()> {
        self.arrays.lock().remove(device);
        std::fs::remove_file(device)?;
        if *self.dangling.lock() {
            std::os::unix::fs::symlink(device.with_extension("gone"), device)?;
        }
        Ok(())
    }

    async fn remove(&self, device: &Path) -> Result<()> {
        self.removed.lock().push(device.to_path_buf());
        Ok(())
    }

    async fn zero_superblock(&self, component: &Path) -> Result<()> {
        self.zeroed.lock().push(component.to_path_buf());
        Ok(())
    }
}

// =============================================================================
// Replicas
// =============================================================================

/// Failure injected into a replica peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    RejectGrant,
    RejectRevoke,
    Unreachable,
}

/// Replica peers served in-process over memory fabrics
#[derive(Default)]
pub struct LocalReplicas {
    services: BTreeMap<String, Arc<ReplicaService>>,
    faults: Mutex<BTreeMap<String, Fault>>,
    calls: Mutex<Vec<String>>,
}

impl LocalReplicas {
    pub fn add(&mut self, peer: &str, service: Arc<ReplicaService>) {
        self.services.insert(peer.to_string(), service);
    }

    pub fn inject(&self, peer: &str, fault: Fault) {
        self.faults.lock().insert(peer.to_string(), fault);
    }

    pub fn clear(&self, peer: &str) {
        self.faults.lock().remove(peer);
    }

    pub fn service(&self, peer: &str) -> &Arc<ReplicaService> {
        &self.services[peer]
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn holds_acl(&self, peer: &str, initiator: &str) -> bool {
        self.service(peer)
            .find_acl(Some(initiator))
            .unwrap()
            .is_some()
    }

    fn enter(&self, peer: &str, call: &str) -> Result<&Arc<ReplicaService>> {
        self.calls.lock().push(format!("{} {}", call, peer));
        let fault = self.faults.lock().get(peer).copied();
        match (fault, self.services.get(peer)) {
            (Some(Fault::Unreachable), _) | (_, None) => Err(Error::PeerUnreachable {
                peer: peer.to_string(),
                reason: "connection refused".into(),
            }),
            (Some(Fault::RejectGrant), _) if call == "add_acl" => Err(injected(peer)),
            (Some(Fault::RejectRevoke), _) if call == "remove_acl" => Err(injected(peer)),
            (_, Some(service)) => Ok(service),
        }
    }
}

fn injected(peer: &str) -> Error {
    Error::PeerRejected {
        peer: peer.to_string(),
        status: 400,
        code: Some("fabric_error".into()),
        message: "injected failure".into(),
    }
}

/// Report a replica error the way it arrives over the wire
fn over_wire(peer: &str, e: Error) -> Error {
    Error::PeerRejected {
        peer: peer.to_string(),
        status: e.http_status(),
        code: Some(e.code().to_string()),
        message: e.to_string(),
    }
}

#[async_trait]
impl ReplicaApi for LocalReplicas {
    async fn add_acl(&self, peer: &str, target: &str, initiator: &str) -> Result<()> {
        self.enter(peer, "add_acl")?
            .add_acl(Some(target), Some(initiator))
            .map_err(|e| over_wire(peer, e))
    }

    async fn remove_acl(&self, peer: &str, initiator: &str) -> Result<()> {
        self.enter(peer, "remove_acl")?
            .remove_acl(Some(initiator))
            .map_err(|e| over_wire(peer, e))
    }

    async fn find_acl(&self, peer: &str, initiator: &str) -> Result<Option<AclLocation>> {
        self.enter(peer, "find_acl")?
            .find_acl(Some(initiator))
            .map_err(|e| over_wire(peer, e))
    }
}

// =============================================================================
// Test Rig
// =============================================================================

/// An orchestrator wired to two in-process replicas
pub struct Rig {
    pub dir: TempDir,
    pub initiator: Arc<FakeInitiator>,
    pub raid: Arc<FakeRaid>,
    pub replicas: Arc<LocalReplicas>,
    pub shutdown: CancellationToken,
    pub orchestrator: Arc<MirrorOrchestrator>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_wait(DeviceWaitConfig {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
        })
    }

    pub fn with_wait(device_wait: DeviceWaitConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let md_dir = dir.path().join("md");
        std::fs::create_dir_all(&md_dir).unwrap();

        let initiator = Arc::new(FakeInitiator::new(
            dir.path(),
            "iqn.2016-01.io.example:controller",
        ));

        let mut replicas = LocalReplicas::default();
        for peer in [PEER_A, PEER_B] {
            let service = local_replica(dir.path(), peer, target_for(peer));
            initiator.export(peer, target_for(peer));
            replicas.add(peer, service);
        }

        let raid = Arc::new(FakeRaid::default());
        let replicas = Arc::new(replicas);
        let shutdown = CancellationToken::new();
        let orchestrator = MirrorOrchestrator::new(
            ControllerConfig {
                md_dir,
                device_wait,
                ..Default::default()
            },
            initiator.clone(),
            raid.clone(),
            replicas.clone(),
            shutdown.clone(),
        );

        Self {
            dir,
            initiator,
            raid,
            replicas,
            shutdown,
            orchestrator,
        }
    }

    pub fn md_dir(&self) -> PathBuf {
        self.dir.path().join("md")
    }

    pub fn target(&self, peer: &str) -> &'static str {
        target_for(peer)
    }
}

/// A replica over a memory fabric exporting `wwn` from an image under `root`
pub fn local_replica(root: &Path, peer: &str, wwn: &str) -> Arc<ReplicaService> {
    let images = root.join(format!("images-{}", peer.replace(':', "-")));
    std::fs::create_dir_all(&images).unwrap();

    let service = ReplicaService::new(
        ReplicaConfig {
            portal_ip: peer_host(peer).parse().unwrap(),
            ..Default::default()
        },
        Arc::new(MemoryFabric::new()),
    );
    service
        .create_target(&CreateTargetRequest {
            target: Some(wwn.to_string()),
            file: Some("vol1".into()),
            dir: Some(images),
            size: Some(1 << 20),
            initiator: None,
        })
        .unwrap();
    service
}

fn target_for(peer: &str) -> &'static str {
    match peer {
        PEER_A => "iqn.2016-01.io.example:replica-a",
        _ => "iqn.2016-01.io.example:replica-b",
    }
}
