//! In-memory Target Fabric
//!
//! Tracks targets, portal groups, LUNs and ACLs without touching the kernel.
//! Used for dry runs and as the fabric behind replica tests.

use crate::domain::ports::{
    AclInfo, AclLocation, ChapCredentials, LunInfo, StorageObject, TargetFabric, TargetInfo,
    TpgInfo,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::debug;

// =============================================================================
// Fabric State
// =============================================================================

#[derive(Debug, Default)]
struct MemoryAcl {
    chap: Option<ChapCredentials>,
    /// mapped LUN -> portal group LUN
    mapped_luns: BTreeMap<u32, u32>,
}

#[derive(Debug, Default)]
struct MemoryTpg {
    enabled: bool,
    portals: Vec<SocketAddr>,
    /// LUN index -> storage object name
    luns: BTreeMap<u32, String>,
    acls: BTreeMap<String, MemoryAcl>,
}

#[derive(Debug, Default)]
struct MemoryTarget {
    tpgs: BTreeMap<u16, MemoryTpg>,
}

#[derive(Debug, Default)]
struct FabricState {
    storage_objects: BTreeMap<String, StorageObject>,
    targets: BTreeMap<String, MemoryTarget>,
}

impl FabricState {
    fn tpg_mut(&mut self, wwn: &str, tag: u16) -> Result<&mut MemoryTpg> {
        self.targets
            .get_mut(wwn)
            .ok_or_else(|| Error::TargetNotFound { wwn: wwn.into() })?
            .tpgs
            .get_mut(&tag)
            .ok_or_else(|| Error::TpgNotFound { wwn: wwn.into() })
    }
}

// =============================================================================
// Memory Fabric
// =============================================================================

/// Target fabric held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryFabric {
    state: RwLock<FabricState>,
}

impl MemoryFabric {
    /// Create an empty fabric
    pub fn new() -> Self {
        Self::default()
    }

    /// CHAP credentials attached to an ACL, if it exists
    pub fn acl_chap(&self, acl: &AclLocation) -> Option<ChapCredentials> {
        let state = self.state.read();
        state
            .targets
            .get(&acl.wwn)?
            .tpgs
            .get(&acl.tpg)?
            .acls
            .get(&acl.initiator)?
            .chap
            .clone()
    }
}

impl TargetFabric for MemoryFabric {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_storage_object(&self, object: &StorageObject) -> Result<()> {
        let mut state = self.state.write();
        if state.storage_objects.contains_key(&object.name) {
            return Err(Error::Fabric(format!(
                "storage object {} already exists",
                object.name
            )));
        }
        state
            .storage_objects
            .insert(object.name.clone(), object.clone());
        debug!("memory fabric: storage object {} created", object.name);
        Ok(())
    }

    fn find_storage_object(&self, name: &str) -> Result<Option<StorageObject>> {
        Ok(self.state.read().storage_objects.get(name).cloned())
    }

    fn delete_storage_object(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let in_use = state.targets.values().any(|target| {
            target
                .tpgs
                .values()
                .any(|tpg| tpg.luns.values().any(|so| so == name))
        });
        if in_use {
            return Err(Error::Fabric(format!(
                "storage object {} is still exported",
                name
            )));
        }
        state
            .storage_objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::StorageObjectNotFound { name: name.into() })
    }

    fn create_target(&self, wwn: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.targets.contains_key(wwn) {
            return Err(Error::Fabric(format!("target {} already exists", wwn)));
        }
        state.targets.insert(wwn.to_string(), MemoryTarget::default());
        Ok(())
    }

    fn create_tpg(&self, wwn: &str, tag: u16) -> Result<()> {
        let mut state = self.state.write();
        let target = state
            .targets
            .get_mut(wwn)
            .ok_or_else(|| Error::TargetNotFound { wwn: wwn.into() })?;
        target.tpgs.entry(tag).or_default();
        Ok(())
    }

    fn create_portal(&self, wwn: &str, tag: u16, addr: SocketAddr) -> Result<()> {
        let mut state = self.state.write();
        let tpg = state.tpg_mut(wwn, tag)?;
        if !tpg.portals.contains(&addr) {
            tpg.portals.push(addr);
        }
        Ok(())
    }

    fn create_lun(&self, wwn: &str, tag: u16, lun: u32, storage_object: &str) -> Result<()> {
        let mut state = self.state.write();
        if !state.storage_objects.contains_key(storage_object) {
            return Err(Error::StorageObjectNotFound {
                name: storage_object.into(),
            });
        }
        let tpg = state.tpg_mut(wwn, tag)?;
        if tpg.luns.contains_key(&lun) {
            return Err(Error::Fabric(format!("lun {} of {} already exists", lun, wwn)));
        }
        tpg.luns.insert(lun, storage_object.to_string());
        Ok(())
    }

    fn create_acl(&self, acl: &AclLocation, chap: &ChapCredentials) -> Result<()> {
        let mut state = self.state.write();
        let tpg = state.tpg_mut(&acl.wwn, acl.tpg)?;
        let entry = tpg.acls.entry(acl.initiator.clone()).or_default();
        entry.chap = Some(chap.clone());
        Ok(())
    }

    fn map_lun(&self, acl: &AclLocation, mapped_lun: u32, tpg_lun: u32) -> Result<()> {
        let mut state = self.state.write();
        let tpg = state.tpg_mut(&acl.wwn, acl.tpg)?;
        if !tpg.luns.contains_key(&tpg_lun) {
            return Err(Error::LunNotFound {
                wwn: acl.wwn.clone(),
            });
        }
        let entry = tpg
            .acls
            .get_mut(&acl.initiator)
            .ok_or_else(|| Error::AclNotFound {
                initiator: acl.initiator.clone(),
            })?;
        entry.mapped_luns.insert(mapped_lun, tpg_lun);
        Ok(())
    }

    fn enable_tpg(&self, wwn: &str, tag: u16) -> Result<()> {
        let mut state = self.state.write();
        state.tpg_mut(wwn, tag)?.enabled = true;
        Ok(())
    }

    fn find_target(&self, wwn: &str) -> Result<Option<TargetInfo>> {
        let state = self.state.read();
        let target = match state.targets.get(wwn) {
            Some(t) => t,
            None => return Ok(None),
        };

        let tpgs = target
            .tpgs
            .iter()
            .map(|(tag, tpg)| TpgInfo {
                tag: *tag,
                enabled: tpg.enabled,
                portals: tpg.portals.clone(),
                luns: tpg
                    .luns
                    .iter()
                    .map(|(index, so)| LunInfo {
                        index: *index,
                        storage_object: so.clone(),
                    })
                    .collect(),
                acls: tpg
                    .acls
                    .iter()
                    .map(|(initiator, acl)| AclInfo {
                        initiator: initiator.clone(),
                        mapped_luns: acl.mapped_luns.keys().copied().collect(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Some(TargetInfo {
            wwn: wwn.to_string(),
            tpgs,
        }))
    }

    fn delete_target(&self, wwn: &str) -> Result<()> {
        self.state
            .write()
            .targets
            .remove(wwn)
            .map(|_| ())
            .ok_or_else(|| Error::TargetNotFound { wwn: wwn.into() })
    }

    fn find_acl(&self, initiator: &str) -> Result<Option<AclLocation>> {
        let state = self.state.read();
        for (wwn, target) in &state.targets {
            for (tag, tpg) in &target.tpgs {
                if tpg.acls.contains_key(initiator) {
                    return Ok(Some(AclLocation {
                        wwn: wwn.clone(),
                        tpg: *tag,
                        initiator: initiator.to_string(),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn delete_acl(&self, acl: &AclLocation) -> Result<()> {
        let mut state = self.state.write();
        let tpg = state.tpg_mut(&acl.wwn, acl.tpg)?;
        tpg.acls
            .remove(&acl.initiator)
            .map(|_| ())
            .ok_or_else(|| Error::AclNotFound {
                initiator: acl.initiator.clone(),
            })
    }
}
