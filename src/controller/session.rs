//! Mirror Session
//!
//! The controller's record of the one mirror it manages. A session is either
//! empty or holds a complete layout (two peers, two component devices); the
//! joining and tearing-down states are transient and only observable while
//! an operation holds the orchestrator's operation lock.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a mirror session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Unconfigured,
    PeersJoining,
    Mirrored,
    TearingDown,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unconfigured => write!(f, "unconfigured"),
            SessionState::PeersJoining => write!(f, "peersJoining"),
            SessionState::Mirrored => write!(f, "mirrored"),
            SessionState::TearingDown => write!(f, "tearingDown"),
        }
    }
}

/// A fully assembled 2-way mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorLayout {
    /// Replica peer addresses, in request order
    pub peers: [String; 2],
    /// Target WWN exported by each peer
    pub targets: [String; 2],
    /// Array device path
    pub device: PathBuf,
    /// Resolved component block devices, one per peer
    pub components: [PathBuf; 2],
    pub assembled_at: DateTime<Utc>,
}

/// In-memory session of a controller process
#[derive(Debug, Clone)]
pub struct MirrorSession {
    state: SessionState,
    layout: Option<MirrorLayout>,
}

impl Default for MirrorSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorSession {
    /// Create an unconfigured session
    pub fn new() -> Self {
        Self {
            state: SessionState::Unconfigured,
            layout: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Assembled layout, present only while mirrored
    pub fn layout(&self) -> Option<&MirrorLayout> {
        self.layout.as_ref()
    }

    /// Array device path, or an empty string when nothing is configured
    pub fn device_name(&self) -> String {
        match (&self.state, &self.layout) {
            (SessionState::Mirrored, Some(layout)) => layout.device.display().to_string(),
            _ => String::new(),
        }
    }

    /// Unconfigured -> PeersJoining
    pub fn begin_join(&mut self) -> Result<()> {
        match self.state {
            SessionState::Unconfigured => {
                self.state = SessionState::PeersJoining;
                Ok(())
            }
            SessionState::Mirrored => Err(Error::MirrorConfigured {
                device: self.device_name(),
            }),
            other => Err(Error::Internal(format!(
                "cannot start setup while session is {}",
                other
            ))),
        }
    }

    /// PeersJoining -> Mirrored
    pub fn complete_join(&mut self, layout: MirrorLayout) -> Result<()> {
        if self.state != SessionState::PeersJoining {
            return Err(Error::Internal(format!(
                "cannot complete setup while session is {}",
                self.state
            )));
        }
        self.layout = Some(layout);
        self.state = SessionState::Mirrored;
        Ok(())
    }

    /// PeersJoining -> Unconfigured
    pub fn abort_join(&mut self) {
        if self.state == SessionState::PeersJoining {
            self.state = SessionState::Unconfigured;
        }
    }

    /// Mirrored | Unconfigured -> TearingDown, handing out the layout to dismantle
    pub fn begin_teardown(&mut self) -> Result<Option<MirrorLayout>> {
        match self.state {
            SessionState::Mirrored | SessionState::Unconfigured => {
                self.state = SessionState::TearingDown;
                Ok(self.layout.take())
            }
            other => Err(Error::Internal(format!(
                "cannot start teardown while session is {}",
                other
            ))),
        }
    }

    /// TearingDown -> Unconfigured
    pub fn complete_teardown(&mut self) {
        self.layout = None;
        self.state = SessionState::Unconfigured;
    }
}
