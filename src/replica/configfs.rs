//! LIO Target Fabric
//!
//! Drives the kernel LIO target through configfs. Every fabric object is a
//! directory; attributes are small files written one value at a time, and
//! LUN/ACL links are symlinks between object directories.
//!
//! ```text
//! <root>/core/fileio_0/<object>/               storage object
//! <root>/iscsi/<wwn>/tpgt_<tag>/               portal group
//! <root>/iscsi/<wwn>/tpgt_<tag>/np/<ip:port>   network portal
//! <root>/iscsi/<wwn>/tpgt_<tag>/lun/lun_<n>/   LUN -> storage object
//! <root>/iscsi/<wwn>/tpgt_<tag>/acls/<iqn>/    node ACL (auth/, lun_<m>/)
//! ```

use crate::domain::ports::{
    AclInfo, AclLocation, ChapCredentials, LunInfo, StorageObject, TargetFabric, TargetInfo,
    TpgInfo,
};
use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Constants
// =============================================================================

/// Default configfs mount point of the target subsystem
pub const DEFAULT_CONFIGFS_ROOT: &str = "/sys/kernel/config/target";

/// HBA that hosts every file-backed storage object created here
const FILEIO_HBA: &str = "fileio_0";

const TPG_PREFIX: &str = "tpgt_";
const LUN_PREFIX: &str = "lun_";

// =============================================================================
// ConfigFs Fabric
// =============================================================================

/// Target fabric backed by the kernel LIO configfs tree
#[derive(Debug, Clone)]
pub struct ConfigFsFabric {
    root: PathBuf,
}

impl ConfigFsFabric {
    /// Create a fabric rooted at a configfs target directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Configfs root in use
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn storage_dir(&self, name: &str) -> PathBuf {
        self.root.join("core").join(FILEIO_HBA).join(name)
    }

    fn target_dir(&self, wwn: &str) -> PathBuf {
        self.root.join("iscsi").join(wwn)
    }

    fn tpg_dir(&self, wwn: &str, tag: u16) -> PathBuf {
        self.target_dir(wwn).join(format!("{}{}", TPG_PREFIX, tag))
    }

    fn lun_dir(&self, wwn: &str, tag: u16, lun: u32) -> PathBuf {
        self.tpg_dir(wwn, tag)
            .join("lun")
            .join(format!("{}{}", LUN_PREFIX, lun))
    }

    fn acl_dir(&self, acl: &AclLocation) -> PathBuf {
        self.tpg_dir(&acl.wwn, acl.tpg)
            .join("acls")
            .join(&acl.initiator)
    }

    /// Locate the directory of a storage object in any fileio HBA
    fn locate_storage_dir(&self, name: &str) -> Result<Option<PathBuf>> {
        for (hba, _) in list_dirs(&self.root.join("core"))? {
            if !hba.starts_with("fileio_") {
                continue;
            }
            let dir = self.root.join("core").join(&hba).join(name);
            if dir.is_dir() {
                return Ok(Some(dir));
            }
        }
        Ok(None)
    }

    fn read_tpg(&self, wwn: &str, tag: u16) -> Result<TpgInfo> {
        let dir = self.tpg_dir(wwn, tag);

        let enabled = read_attr(&dir.join("enable"))?.as_deref() == Some("1");

        let mut portals = Vec::new();
        for (name, _) in list_dirs(&dir.join("np"))? {
            if let Ok(addr) = name.parse::<SocketAddr>() {
                portals.push(addr);
            }
        }

        let mut luns = Vec::new();
        for (name, path) in list_dirs(&dir.join("lun"))? {
            if let Some(index) = parse_index(&name, LUN_PREFIX) {
                let storage_object = first_link_name(&path)?.unwrap_or_default();
                luns.push(LunInfo {
                    index,
                    storage_object,
                });
            }
        }
        luns.sort_by_key(|l| l.index);

        let mut acls = Vec::new();
        for (initiator, path) in list_dirs(&dir.join("acls"))? {
            let mut mapped_luns: Vec<u32> = list_dirs(&path)?
                .iter()
                .filter_map(|(name, _)| parse_index(name, LUN_PREFIX))
                .collect();
            mapped_luns.sort_unstable();
            acls.push(AclInfo {
                initiator,
                mapped_luns,
            });
        }

        Ok(TpgInfo {
            tag,
            enabled,
            portals,
            luns,
            acls,
        })
    }

    fn tpg_tags(&self, wwn: &str) -> Result<Vec<u16>> {
        let mut tags: Vec<u16> = list_dirs(&self.target_dir(wwn))?
            .iter()
            .filter_map(|(name, _)| name.strip_prefix(TPG_PREFIX)?.parse().ok())
            .collect();
        tags.sort_unstable();
        Ok(tags)
    }
}

impl Default for ConfigFsFabric {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIGFS_ROOT)
    }
}

impl TargetFabric for ConfigFsFabric {
    fn name(&self) -> &'static str {
        "configfs"
    }

    fn create_storage_object(&self, object: &StorageObject) -> Result<()> {
        let dir = self.storage_dir(&object.name);
        make_dir(&dir)?;

        write_attr(
            &dir.join("control"),
            &format!("fd_dev_name={}", object.path.display()),
        )?;
        write_attr(
            &dir.join("control"),
            &format!("fd_dev_size={}", object.size_bytes),
        )?;
        write_attr(&dir.join("udev_path"), &object.path.display().to_string())?;
        write_attr(&dir.join("enable"), "1")?;

        info!(
            "Registered fileio storage object {} -> {}",
            object.name,
            object.path.display()
        );
        Ok(())
    }

    fn find_storage_object(&self, name: &str) -> Result<Option<StorageObject>> {
        let dir = match self.locate_storage_dir(name)? {
            Some(dir) => dir,
            None => return Ok(None),
        };

        let path = read_attr(&dir.join("udev_path"))?.unwrap_or_default();
        let size_bytes = read_attr(&dir.join("info"))?
            .as_deref()
            .and_then(parse_info_size)
            .unwrap_or(0);

        Ok(Some(StorageObject {
            name: name.to_string(),
            path: PathBuf::from(path),
            size_bytes,
        }))
    }

    fn delete_storage_object(&self, name: &str) -> Result<()> {
        let dir = self
            .locate_storage_dir(name)?
            .ok_or_else(|| Error::StorageObjectNotFound { name: name.into() })?;
        remove_dir(&dir)?;
        info!("Removed fileio storage object {}", name);
        Ok(())
    }

    fn create_target(&self, wwn: &str) -> Result<()> {
        let dir = self.target_dir(wwn);
        if dir.exists() {
            return Err(Error::Fabric(format!("target {} already exists", wwn)));
        }
        make_dir(&dir)
    }

    fn create_tpg(&self, wwn: &str, tag: u16) -> Result<()> {
        if !self.target_dir(wwn).is_dir() {
            return Err(Error::TargetNotFound { wwn: wwn.into() });
        }
        make_dir(&self.tpg_dir(wwn, tag))
    }

    fn create_portal(&self, wwn: &str, tag: u16, addr: SocketAddr) -> Result<()> {
        make_dir(&self.tpg_dir(wwn, tag).join("np").join(addr.to_string()))
    }

    fn create_lun(&self, wwn: &str, tag: u16, lun: u32, storage_object: &str) -> Result<()> {
        let object_dir = self
            .locate_storage_dir(storage_object)?
            .ok_or_else(|| Error::StorageObjectNotFound {
                name: storage_object.into(),
            })?;

        let lun_dir = self.lun_dir(wwn, tag, lun);
        make_dir(&lun_dir)?;
        make_link(&object_dir, &lun_dir.join(storage_object))
    }

    fn create_acl(&self, acl: &AclLocation, chap: &ChapCredentials) -> Result<()> {
        let dir = self.acl_dir(acl);
        if !dir.is_dir() {
            make_dir(&dir)?;
        }
        write_attr(&dir.join("auth").join("userid"), &chap.userid)?;
        write_attr(&dir.join("auth").join("password"), &chap.password)?;
        write_attr(
            &self.tpg_dir(&acl.wwn, acl.tpg).join("attrib").join("authentication"),
            "1",
        )?;
        debug!("Created node ACL {} on {}", acl.initiator, acl.wwn);
        Ok(())
    }

    fn map_lun(&self, acl: &AclLocation, mapped_lun: u32, tpg_lun: u32) -> Result<()> {
        let lun_dir = self.lun_dir(&acl.wwn, acl.tpg, tpg_lun);
        if !lun_dir.is_dir() {
            return Err(Error::LunNotFound {
                wwn: acl.wwn.clone(),
            });
        }

        let mapped_dir = self
            .acl_dir(acl)
            .join(format!("{}{}", LUN_PREFIX, mapped_lun));
        if mapped_dir.is_dir() {
            return Ok(());
        }
        make_dir(&mapped_dir)?;
        make_link(&lun_dir, &mapped_dir.join(format!("{}{}", LUN_PREFIX, tpg_lun)))
    }

    fn enable_tpg(&self, wwn: &str, tag: u16) -> Result<()> {
        write_attr(&self.tpg_dir(wwn, tag).join("enable"), "1")
    }

    fn find_target(&self, wwn: &str) -> Result<Option<TargetInfo>> {
        if !self.target_dir(wwn).is_dir() {
            return Ok(None);
        }

        let tpgs = self
            .tpg_tags(wwn)?
            .into_iter()
            .map(|tag| self.read_tpg(wwn, tag))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(TargetInfo {
            wwn: wwn.to_string(),
            tpgs,
        }))
    }

    fn delete_target(&self, wwn: &str) -> Result<()> {
        let target_dir = self.target_dir(wwn);
        if !target_dir.is_dir() {
            return Err(Error::TargetNotFound { wwn: wwn.into() });
        }

        // configfs refuses to remove populated directories: children go first
        for tag in self.tpg_tags(wwn)? {
            let tpg_dir = self.tpg_dir(wwn, tag);
            write_attr(&tpg_dir.join("enable"), "0")?;

            for (initiator, _) in list_dirs(&tpg_dir.join("acls"))? {
                self.delete_acl(&AclLocation {
                    wwn: wwn.to_string(),
                    tpg: tag,
                    initiator,
                })?;
            }
            for (_, lun_dir) in list_dirs(&tpg_dir.join("lun"))? {
                remove_links(&lun_dir)?;
                remove_dir(&lun_dir)?;
            }
            for (_, np_dir) in list_dirs(&tpg_dir.join("np"))? {
                remove_dir(&np_dir)?;
            }
            remove_dir(&tpg_dir)?;
        }
        remove_dir(&target_dir)?;

        info!("Removed target {}", wwn);
        Ok(())
    }

    fn find_acl(&self, initiator: &str) -> Result<Option<AclLocation>> {
        for (wwn, _) in list_dirs(&self.root.join("iscsi"))? {
            for tag in self.tpg_tags(&wwn)? {
                let location = AclLocation {
                    wwn: wwn.clone(),
                    tpg: tag,
                    initiator: initiator.to_string(),
                };
                if self.acl_dir(&location).is_dir() {
                    return Ok(Some(location));
                }
            }
        }
        Ok(None)
    }

    fn delete_acl(&self, acl: &AclLocation) -> Result<()> {
        let dir = self.acl_dir(acl);
        if !dir.is_dir() {
            return Err(Error::AclNotFound {
                initiator: acl.initiator.clone(),
            });
        }

        for (name, mapped_dir) in list_dirs(&dir)? {
            if parse_index(&name, LUN_PREFIX).is_some() {
                remove_links(&mapped_dir)?;
                remove_dir(&mapped_dir)?;
            }
        }
        remove_dir(&dir)?;

        info!("Removed node ACL {} from {}", acl.initiator, acl.wwn);
        Ok(())
    }
}

// =============================================================================
// Configfs Helpers
// =============================================================================

fn fabric_io(path: &Path, e: std::io::Error) -> Error {
    Error::Fabric(format!("{}: {}", path.display(), e))
}

fn make_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| fabric_io(path, e))
}

fn remove_dir(path: &Path) -> Result<()> {
    fs::remove_dir(path).map_err(|e| fabric_io(path, e))
}

fn make_link(original: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(original, link).map_err(|e| fabric_io(link, e))
}

/// Write one attribute value. Attribute groups (`auth/`, `attrib/`) are
/// created by the kernel; the parent is only created when missing.
fn write_attr(path: &Path, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.is_dir() {
            make_dir(parent)?;
        }
    }
    fs::write(path, value).map_err(|e| fabric_io(path, e))
}

fn read_attr(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(fabric_io(path, e)),
    }
}

/// Subdirectories of `path` as (name, path); a missing directory is empty
fn list_dirs(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(fabric_io(path, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| fabric_io(path, e))?;
        let file_type = entry.file_type().map_err(|e| fabric_io(path, e))?;
        if file_type.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn remove_links(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| fabric_io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| fabric_io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| fabric_io(dir, e))?;
        if file_type.is_symlink() {
            fs::remove_file(entry.path()).map_err(|e| fabric_io(&entry.path(), e))?;
        }
    }
    Ok(())
}

/// Name of the object the first symlink in `dir` points at
fn first_link_name(dir: &Path) -> Result<Option<String>> {
    let entries = fs::read_dir(dir).map_err(|e| fabric_io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| fabric_io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| fabric_io(dir, e))?;
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|e| fabric_io(&entry.path(), e))?;
            return Ok(target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()));
        }
    }
    Ok(None)
}

fn parse_index(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// Extract the byte size from a fileio `info` attribute
/// (e.g. `... File: /var/lib/vol1.img  Size: 1073741824  Mode: ...`)
fn parse_info_size(info: &str) -> Option<u64> {
    let mut tokens = info.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "Size:" {
            return tokens.next()?.parse().ok();
        }
    }
    None
}
