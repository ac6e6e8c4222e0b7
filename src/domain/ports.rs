//! Domain Ports - Core trait definitions for mirrorvol
//!
//! These traits define the boundaries between the replica/controller logic
//! and the host facilities they drive (kernel target fabric, iSCSI initiator,
//! md RAID assembler, remote replica peers). Adapters implement these traits
//! to provide concrete functionality.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// =============================================================================
// Well-known Constants
// =============================================================================

/// iSCSI portal port exposed by every replica
pub const ISCSI_PORT: u16 = 3260;

/// REST control port shared by the replica and controller services
pub const CONTROL_PORT: u16 = 3140;

/// Tag of the single portal group each target owns
pub const DEFAULT_TPG_TAG: u16 = 1;

/// Index of the single LUN each target exposes
pub const DEFAULT_LUN: u32 = 0;

// =============================================================================
// CHAP Credentials
// =============================================================================

/// CHAP userid/password pair used for every replica session.
///
/// The pair is deployment-wide rather than per-peer. The defaults match the
/// values existing replicas are provisioned with, so changing them breaks
/// login against replicas that were not reconfigured at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapCredentials {
    pub userid: String,
    pub password: String,
}

impl Default for ChapCredentials {
    fn default() -> Self {
        Self {
            userid: "convoy".to_string(),
            password: "shorthorn".to_string(),
        }
    }
}

// =============================================================================
// Target Fabric Types
// =============================================================================

/// A file-backed storage object registered with the target fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Storage object name (the file id)
    pub name: String,
    /// Backing image path
    pub path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Snapshot of a target as seen by the fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub wwn: String,
    pub tpgs: Vec<TpgInfo>,
}

impl TargetInfo {
    /// First portal group, if any
    pub fn first_tpg(&self) -> Option<&TpgInfo> {
        self.tpgs.first()
    }
}

/// Target portal group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpgInfo {
    pub tag: u16,
    pub enabled: bool,
    pub portals: Vec<SocketAddr>,
    pub luns: Vec<LunInfo>,
    pub acls: Vec<AclInfo>,
}

/// LUN inside a portal group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunInfo {
    pub index: u32,
    pub storage_object: String,
}

/// Node ACL inside a portal group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclInfo {
    pub initiator: String,
    pub mapped_luns: Vec<u32>,
}

/// Location of a node ACL: target, portal group and initiator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclLocation {
    pub wwn: String,
    pub tpg: u16,
    pub initiator: String,
}

// =============================================================================
// Target Fabric
// =============================================================================

/// Block-target fabric that exports storage objects over iSCSI.
///
/// Methods are the primitive configuration steps; ordering and validation
/// live in the replica service.
pub trait TargetFabric: Send + Sync {
    /// Fabric name for logging
    fn name(&self) -> &'static str;

    /// Register a file-backed storage object
    fn create_storage_object(&self, object: &StorageObject) -> Result<()>;

    /// Look up a storage object by name
    fn find_storage_object(&self, name: &str) -> Result<Option<StorageObject>>;

    /// Unregister a storage object (the image file is left in place)
    fn delete_storage_object(&self, name: &str) -> Result<()>;

    /// Create an (empty) iSCSI target
    fn create_target(&self, wwn: &str) -> Result<()>;

    /// Create a portal group under a target
    fn create_tpg(&self, wwn: &str, tag: u16) -> Result<()>;

    /// Bind a network portal to a portal group
    fn create_portal(&self, wwn: &str, tag: u16, addr: SocketAddr) -> Result<()>;

    /// Create a LUN over a storage object
    fn create_lun(&self, wwn: &str, tag: u16, lun: u32, storage_object: &str) -> Result<()>;

    /// Create (or reuse) a node ACL carrying CHAP credentials
    fn create_acl(&self, acl: &AclLocation, chap: &ChapCredentials) -> Result<()>;

    /// Map a portal-group LUN into a node ACL
    fn map_lun(&self, acl: &AclLocation, mapped_lun: u32, tpg_lun: u32) -> Result<()>;

    /// Enable a portal group; the target accepts logins afterwards
    fn enable_tpg(&self, wwn: &str, tag: u16) -> Result<()>;

    /// Look up a target by WWN
    fn find_target(&self, wwn: &str) -> Result<Option<TargetInfo>>;

    /// Delete a target and everything beneath it
    fn delete_target(&self, wwn: &str) -> Result<()>;

    /// Find the first node ACL for an initiator across all targets
    fn find_acl(&self, initiator: &str) -> Result<Option<AclLocation>>;

    /// Delete a node ACL and its mapped LUNs
    fn delete_acl(&self, acl: &AclLocation) -> Result<()>;
}

// =============================================================================
// Controller Host Facilities
// =============================================================================

/// Local iSCSI initiator
#[async_trait]
pub trait BlockInitiator: Send + Sync {
    /// Initiator name this host presents to targets
    async fn initiator_name(&self) -> Result<String>;

    /// Discover the target WWN exposed by a peer on the iSCSI port
    async fn discover_target(&self, peer: &str) -> Result<String>;

    /// Configure CHAP for a discovered target node record
    async fn configure_chap(&self, peer: &str, target: &str, chap: &ChapCredentials)
        -> Result<()>;

    /// Log in to a target
    async fn login(&self, peer: &str, target: &str) -> Result<()>;

    /// Log out of a target; succeeds if no session exists
    async fn logout(&self, peer: &str, target: &str) -> Result<()>;

    /// Stable by-path link the kernel creates for LUN 0 after login
    fn device_link(&self, peer: &str, target: &str) -> PathBuf;
}

/// Local md RAID assembler
#[async_trait]
pub trait RaidAssembler: Send + Sync {
    /// Create and start a 2-way mirror
    async fn create_mirror(&self, device: &Path, components: &[PathBuf; 2]) -> Result<()>;

    /// Stop a running array
    async fn stop(&self, device: &Path) -> Result<()>;

    /// Remove a stopped array device
    async fn remove(&self, device: &Path) -> Result<()>;

    /// Wipe md metadata from a component device
    async fn zero_superblock(&self, component: &Path) -> Result<()>;
}

/// Remote replica target service, as seen by the controller
#[async_trait]
pub trait ReplicaApi: Send + Sync {
    /// Grant an initiator access to a peer's target
    async fn add_acl(&self, peer: &str, target: &str, initiator: &str) -> Result<()>;

    /// Revoke an initiator's access on a peer
    async fn remove_acl(&self, peer: &str, initiator: &str) -> Result<()>;

    /// Where an initiator holds an ACL on a peer, if anywhere
    async fn find_acl(&self, peer: &str, initiator: &str) -> Result<Option<AclLocation>>;
}
