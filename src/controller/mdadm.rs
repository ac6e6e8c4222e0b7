//! md RAID Assembler
//!
//! Creates and dismantles the RAID1 array through `mdadm`.

use super::command::HostCommand;
use crate::domain::ports::RaidAssembler;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration for the mdadm assembler
#[derive(Debug, Clone)]
pub struct RaidConfig {
    /// mdadm command line, including any namespace wrapper
    pub command: String,
}

impl Default for RaidConfig {
    fn default() -> Self {
        Self {
            command: "mdadm".to_string(),
        }
    }
}

/// RAID assembler backed by mdadm
pub struct MdadmAssembler {
    command: HostCommand,
}

impl MdadmAssembler {
    /// Create a new assembler
    pub fn new(config: RaidConfig) -> Result<Self> {
        Ok(Self {
            command: HostCommand::parse(&config.command)?,
        })
    }
}

/// Arguments of `mdadm --create` for a 2-way mirror
pub fn create_args(device: &Path, components: &[PathBuf; 2]) -> Vec<String> {
    let mut args: Vec<String> = [
        "--create",
        &device.display().to_string(),
        "--verbose",
        "--run",
        "--level",
        "mirror",
        "--raid-devices",
        "2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(components.iter().map(|c| c.display().to_string()));
    args
}

#[async_trait]
impl RaidAssembler for MdadmAssembler {
    async fn create_mirror(&self, device: &Path, components: &[PathBuf; 2]) -> Result<()> {
        let args = create_args(device, components);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.command.run(&args).await?;
        info!(
            "Assembled mirror {} from {} and {}",
            device.display(),
            components[0].display(),
            components[1].display()
        );
        Ok(())
    }

    async fn stop(&self, device: &Path) -> Result<()> {
        let device = device.display().to_string();
        self.command.run(&["--stop", &device]).await?;
        info!("Stopped mirror {}", device);
        Ok(())
    }

    async fn remove(&self, device: &Path) -> Result<()> {
        let device = device.display().to_string();
        self.command.run(&["--remove", &device]).await?;
        Ok(())
    }

    async fn zero_superblock(&self, component: &Path) -> Result<()> {
        let component = component.display().to_string();
        self.command.run(&["--zero-superblock", &component]).await?;
        info!("Cleared md superblock on {}", component);
        Ok(())
    }
}
