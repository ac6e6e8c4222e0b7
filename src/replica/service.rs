//! Replica Target Service
//!
//! Exposes a file-backed storage object as an iSCSI target and manages the
//! per-initiator access-control entries on it.

use super::storage::StorageObjectManager;
use crate::domain::ports::{
    AclLocation, ChapCredentials, TargetFabric, DEFAULT_LUN, DEFAULT_TPG_TAG, ISCSI_PORT,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the replica service
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Address the network portal binds to (the node's own address)
    pub portal_ip: IpAddr,
    /// iSCSI portal port
    pub portal_port: u16,
    /// Tag of the portal group created per target
    pub tpg_tag: u16,
    /// CHAP pair stamped on every ACL
    pub chap: ChapCredentials,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            portal_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            portal_port: ISCSI_PORT,
            tpg_tag: DEFAULT_TPG_TAG,
            chap: ChapCredentials::default(),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Parameters of a target creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTargetRequest {
    /// Target WWN
    pub target: Option<String>,
    /// Storage object id
    pub file: Option<String>,
    /// Directory holding the backing image
    pub dir: Option<PathBuf>,
    /// Image size in bytes
    pub size: Option<u64>,
    /// Initiator granted access at creation
    pub initiator: Option<String>,
}

// =============================================================================
// Replica Service
// =============================================================================

/// Replica target service over a target fabric
pub struct ReplicaService {
    config: ReplicaConfig,
    fabric: Arc<dyn TargetFabric>,
    /// Serializes multi-step fabric changes
    lock: Mutex<()>,
}

impl ReplicaService {
    /// Create a new replica service
    pub fn new(config: ReplicaConfig, fabric: Arc<dyn TargetFabric>) -> Arc<Self> {
        Arc::new(Self {
            config,
            fabric,
            lock: Mutex::new(()),
        })
    }

    /// Underlying fabric
    pub fn fabric(&self) -> &Arc<dyn TargetFabric> {
        &self.fabric
    }

    /// Create a target exporting a new file-backed storage object.
    ///
    /// The portal group is enabled last, so initiators cannot log in before
    /// the LUN and optional ACL are in place.
    pub fn create_target(&self, request: &CreateTargetRequest) -> Result<String> {
        let wwn = required(request.target.as_deref(), "target")?;
        let (file, dir, size) = match (&request.file, &request.dir, request.size) {
            (Some(file), Some(dir), Some(size)) => (file.as_str(), dir, size),
            _ => return Err(Error::Validation("missing required parameter".into())),
        };

        let _guard = self.lock.lock();

        let prepared = StorageObjectManager::prepare(dir, file, size)?;
        let object = prepared.object;

        info!(
            "Creating target {} over {} via {} fabric",
            wwn,
            object.path.display(),
            self.fabric.name()
        );

        self.fabric.create_storage_object(&object)?;
        if let Err(e) = self.export(wwn, &object.name, request.initiator.as_deref()) {
            warn!("Target {} creation failed, rolling back: {}", wwn, e);
            if let Err(cleanup) = self.fabric.delete_storage_object(&object.name) {
                warn!("Failed to remove storage object {}: {}", object.name, cleanup);
            }
            if prepared.created {
                if let Err(cleanup) = StorageObjectManager::remove_image(&object.path) {
                    warn!("Failed to remove image {}: {}", object.path.display(), cleanup);
                }
            }
            return Err(e);
        }

        info!("Target {} is enabled", wwn);
        Ok(wwn.to_string())
    }

    fn export(&self, wwn: &str, storage_object: &str, initiator: Option<&str>) -> Result<()> {
        let tag = self.config.tpg_tag;
        let portal = SocketAddr::new(self.config.portal_ip, self.config.portal_port);

        self.fabric.create_target(wwn)?;

        let populate = || -> Result<()> {
            self.fabric.create_tpg(wwn, tag)?;
            self.fabric.create_portal(wwn, tag, portal)?;
            self.fabric.create_lun(wwn, tag, DEFAULT_LUN, storage_object)?;
            if let Some(initiator) = initiator {
                self.grant(wwn, tag, DEFAULT_LUN, initiator)?;
            }
            self.fabric.enable_tpg(wwn, tag)
        };

        let result = populate();
        if result.is_err() {
            if let Err(cleanup) = self.fabric.delete_target(wwn) {
                warn!("Failed to remove partial target {}: {}", wwn, cleanup);
            }
        }
        result
    }

    /// Delete a target, then its storage object
    pub fn delete_target(&self, wwn: Option<&str>, file: Option<&str>) -> Result<()> {
        let wwn = required(wwn, "target")?;
        let file = file.ok_or_else(|| Error::Validation("missing require file parameter".into()))?;

        let _guard = self.lock.lock();

        if self.fabric.find_target(wwn)?.is_none() {
            return Err(Error::TargetNotFound { wwn: wwn.into() });
        }
        if self.fabric.find_storage_object(file)?.is_none() {
            return Err(Error::StorageObjectNotFound { name: file.into() });
        }

        self.fabric.delete_target(wwn)?;
        self.fabric.delete_storage_object(file)?;

        info!("Deleted target {} and storage object {}", wwn, file);
        Ok(())
    }

    /// Grant an initiator access to LUN 0 of a target's first portal group
    pub fn add_acl(&self, wwn: Option<&str>, initiator: Option<&str>) -> Result<()> {
        let initiator = initiator.ok_or_else(|| {
            Error::Validation("missing required initiator name parameter".into())
        })?;
        let wwn = required(wwn, "target")?;

        let _guard = self.lock.lock();

        let target = self
            .fabric
            .find_target(wwn)?
            .ok_or_else(|| Error::TargetNotFound { wwn: wwn.into() })?;
        let tpg = target
            .first_tpg()
            .ok_or_else(|| Error::TpgNotFound { wwn: wwn.into() })?;
        let lun = tpg
            .luns
            .first()
            .ok_or_else(|| Error::LunNotFound { wwn: wwn.into() })?;

        self.grant(wwn, tpg.tag, lun.index, initiator)?;

        info!("Granted {} access to {}", initiator, wwn);
        Ok(())
    }

    fn grant(&self, wwn: &str, tag: u16, tpg_lun: u32, initiator: &str) -> Result<()> {
        let acl = AclLocation {
            wwn: wwn.to_string(),
            tpg: tag,
            initiator: initiator.to_string(),
        };
        self.fabric.create_acl(&acl, &self.config.chap)?;
        self.fabric.map_lun(&acl, DEFAULT_LUN, tpg_lun)
    }

    /// Revoke an initiator's ACL.
    ///
    /// The lookup is by initiator only: the first ACL found for it on any
    /// target is removed.
    pub fn remove_acl(&self, initiator: Option<&str>) -> Result<()> {
        let initiator = initiator.ok_or_else(|| {
            Error::Validation("missing required initiator name parameter".into())
        })?;

        let _guard = self.lock.lock();

        let acl = self
            .fabric
            .find_acl(initiator)?
            .ok_or_else(|| Error::AclNotFound {
                initiator: initiator.into(),
            })?;
        self.fabric.delete_acl(&acl)?;

        info!("Revoked {} access to {}", initiator, acl.wwn);
        Ok(())
    }

    /// Look up the ACL held by an initiator, if any
    pub fn find_acl(&self, initiator: Option<&str>) -> Result<Option<AclLocation>> {
        let initiator = initiator.ok_or_else(|| {
            Error::Validation("missing required initiator name parameter".into())
        })?;
        self.fabric.find_acl(initiator)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!(
            "missing required parameter {}",
            name
        ))),
    }
}
