//! Replica Target Service Module
//!
//! Exports a local file-backed storage object as an iSCSI target:
//! - Backing image management
//! - Target fabrics: kernel LIO (configfs) and in-memory
//! - Target and ACL lifecycle service

pub mod configfs;
pub mod memory;
pub mod service;
pub mod storage;

pub use configfs::*;
pub use memory::*;
pub use service::*;
pub use storage::*;

use crate::domain::ports::TargetFabric;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Factory for creating target fabrics
pub struct FabricFactory;

impl FabricFactory {
    /// Create a fabric by name
    pub fn create(name: &str, configfs_root: PathBuf) -> Result<Arc<dyn TargetFabric>> {
        match name.to_lowercase().as_str() {
            "configfs" | "lio" => Ok(Arc::new(ConfigFsFabric::new(configfs_root))),
            "memory" => Ok(Arc::new(MemoryFabric::new())),
            _ => Err(Error::Configuration(format!("unknown target fabric: {}", name))),
        }
    }
}
