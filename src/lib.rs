//! mirrorvol - Replicated iSCSI Volumes on md RAID1
//!
//! Two cooperating services build a network-replicated block device:
//!
//! ```text
//! ┌──────────────────────────────── controller host ─────────────────────────┐
//! │  REST /v1/controller ──► MirrorOrchestrator ──► mdadm  /dev/md/<name>     │
//! │                               │        │              ▲        ▲          │
//! │                               │        └── iscsiadm ──┴────────┘          │
//! └───────────────────────────────┼──────────────────────┼────────┼──────────┘
//!                    ACL grant/revoke (HTTP)        iSCSI :3260   │
//!                ┌────────────────┴───────────┐  ┌────────┴──┐ ┌──┴────────┐
//!                │ replica A  REST /v1/target │  │ target A  │ │ target B  │
//!                │ replica B  REST /v1/target │  │ (LIO)     │ │ (LIO)     │
//!                └────────────────────────────┘  └───────────┘ └───────────┘
//! ```
//!
//! # Modules
//!
//! - [`replica`]: backing images, target fabrics and the replica target service
//! - [`controller`]: initiator, RAID assembler, replica client and orchestrator
//! - [`api`]: REST routers, server and metrics
//! - [`bootstrap`]: node address lookup from the metadata service
//! - [`domain`]: core types and port traits
//! - [`error`]: error types and handling

pub mod api;
pub mod bootstrap;
pub mod controller;
pub mod domain;
pub mod error;
pub mod replica;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, ControllerRouter, ReplicaRouter};

pub use bootstrap::{resolve_node_address, MetadataConfig};

pub use controller::{
    ControllerConfig, ControllerFactory, ControllerStack, DeviceWaitConfig, InitiatorConfig,
    MirrorOrchestrator, MirrorSession, RaidConfig, ReplicaClientConfig, SessionState,
};

pub use domain::ports::{
    BlockInitiator, ChapCredentials, RaidAssembler, ReplicaApi, TargetFabric, CONTROL_PORT,
    ISCSI_PORT,
};

pub use error::{Error, Result};

pub use replica::{
    CreateTargetRequest, FabricFactory, ReplicaConfig, ReplicaService, DEFAULT_CONFIGFS_ROOT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
