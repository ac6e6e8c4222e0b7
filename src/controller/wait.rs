//! Device Readiness Wait
//!
//! After an iSCSI login the kernel creates the LUN's by-path symlink
//! asynchronously. The wait polls for it with exponential backoff under a
//! hard deadline and can be cancelled from outside.

use crate::error::{Error, Result};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration of the device wait
#[derive(Debug, Clone)]
pub struct DeviceWaitConfig {
    /// First poll interval
    pub initial_interval: Duration,
    /// Upper bound of a single poll interval
    pub max_interval: Duration,
    /// Total time allowed for the device to appear
    pub timeout: Duration,
}

impl Default for DeviceWaitConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(400),
            timeout: Duration::from_secs(2),
        }
    }
}

impl DeviceWaitConfig {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }
}

/// Wait until `link` exists, then resolve it to the real device path
pub async fn wait_for_device(
    link: &Path,
    config: &DeviceWaitConfig,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let started = Instant::now();

    let poll = backoff::future::retry(config.backoff(), || async {
        if link.exists() {
            Ok(())
        } else {
            debug!("Device {} not present yet", link.display());
            Err(backoff::Error::transient(()))
        }
    });

    tokio::select! {
        result = poll => {
            if result.is_err() {
                return Err(Error::DeviceTimeout {
                    path: link.display().to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        _ = cancel.cancelled() => {
            return Err(Error::Cancelled(format!(
                "wait for device {}",
                link.display()
            )));
        }
    }

    let device = tokio::fs::canonicalize(link).await?;
    info!(
        "Device {} resolved to {} after {:?}",
        link.display(),
        device.display(),
        started.elapsed()
    );
    Ok(device)
}
