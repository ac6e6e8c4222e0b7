//! Error types for mirrorvol
//!
//! Provides structured error types for both services: the replica target
//! service, the controller orchestrator and the host tooling they drive.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the replica and controller services
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Request Validation Errors
    // =========================================================================
    #[error("{0}")]
    Validation(String),

    #[error("only support 2 peers, got {count}")]
    PeerCount { count: usize },

    #[error("device {device} already exists")]
    DeviceExists { device: String },

    #[error("device {device} is invalid: {reason}")]
    InvalidDevice { device: String, reason: String },

    #[error("mirror already configured at {device}")]
    MirrorConfigured { device: String },

    // =========================================================================
    // Replica Target Errors
    // =========================================================================
    #[error("cannot find target {wwn}")]
    TargetNotFound { wwn: String },

    #[error("cannot find tpg of target {wwn}")]
    TpgNotFound { wwn: String },

    #[error("cannot find lun of tpg of target {wwn}")]
    LunNotFound { wwn: String },

    #[error("cannot find file storage object {name}")]
    StorageObjectNotFound { name: String },

    #[error("cannot find node acl for initiator {initiator}")]
    AclNotFound { initiator: String },

    #[error("Target fabric error: {0}")]
    Fabric(String),

    // =========================================================================
    // Remote Peer Errors
    // =========================================================================
    #[error("peer {peer} rejected request with status {status}: {message}")]
    PeerRejected {
        peer: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    // =========================================================================
    // Host Tooling Errors
    // =========================================================================
    #[error("cannot find target from peer {peer}")]
    Discovery { peer: String },

    #[error("command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("cannot find initiator name: {0}")]
    InitiatorName(String),

    #[error("timed out after {waited:?} waiting for device {path}")]
    DeviceTimeout { path: String, waited: Duration },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Transport / Parse / IO Errors
    // =========================================================================
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status reported by the REST layer for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Internal(_) | Error::Configuration(_) => 500,
            // Everything the services detect is reported as a bad request,
            // which is what replica peers and existing automation expect.
            _ => 400,
        }
    }

    /// Stable machine-readable code carried in error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal_error",
            Error::Configuration(_) => "configuration_error",
            Error::Validation(_) => "invalid_request",
            Error::PeerCount { .. } => "invalid_peer_count",
            Error::DeviceExists { .. } => "device_exists",
            Error::InvalidDevice { .. } => "invalid_device",
            Error::MirrorConfigured { .. } => "mirror_configured",
            Error::TargetNotFound { .. } => "target_not_found",
            Error::TpgNotFound { .. } => "tpg_not_found",
            Error::LunNotFound { .. } => "lun_not_found",
            Error::StorageObjectNotFound { .. } => "storage_object_not_found",
            Error::AclNotFound { .. } => "acl_not_found",
            Error::Fabric(_) => "fabric_error",
            Error::PeerRejected { .. } => "peer_rejected",
            Error::PeerUnreachable { .. } => "peer_unreachable",
            Error::Discovery { .. } => "discovery_failed",
            Error::Command { .. } => "command_failed",
            Error::InitiatorName(_) => "initiator_name",
            Error::DeviceTimeout { .. } => "device_timeout",
            Error::Cancelled(_) => "cancelled",
            Error::Http(_) => "http_error",
            Error::JsonParse(_) => "json_parse",
            Error::Io(_) => "io_error",
        }
    }

    /// Check if a caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                Error::Discovery { .. } | Error::Command { .. } | Error::PeerRejected { .. }
            )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable { .. }
                | Error::Http(_)
                | Error::DeviceTimeout { .. }
        )
    }

    /// Check if a peer reported that the requested ACL does not exist
    pub fn is_missing_acl(&self) -> bool {
        match self {
            Error::AclNotFound { .. } => true,
            Error::PeerRejected { code, .. } => code.as_deref() == Some("acl_not_found"),
            _ => false,
        }
    }
}

/// Result type alias for mirrorvol
pub type Result<T> = std::result::Result<T, Error>;
