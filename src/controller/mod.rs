//! Mirror Controller Module
//!
//! Builds a local RAID1 array out of two replica targets:
//! - Host tooling: iscsiadm initiator, mdadm assembler
//! - Replica REST client
//! - Mirror session and orchestration

pub mod client;
pub mod command;
pub mod iscsiadm;
pub mod mdadm;
pub mod orchestrator;
pub mod session;
pub mod wait;

#[cfg(test)]
pub(crate) mod fakes;

pub use client::*;
pub use command::*;
pub use iscsiadm::*;
pub use mdadm::*;
pub use orchestrator::*;
pub use session::*;
pub use wait::*;

use crate::error::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything needed to wire a controller against the host
#[derive(Debug, Clone, Default)]
pub struct ControllerStack {
    pub controller: ControllerConfig,
    pub initiator: InitiatorConfig,
    pub raid: RaidConfig,
    pub client: ReplicaClientConfig,
}

/// Factory for host-backed orchestrators
pub struct ControllerFactory;

impl ControllerFactory {
    /// Build an orchestrator driving iscsiadm, mdadm and replica peers over HTTP
    pub fn create(
        stack: ControllerStack,
        shutdown: CancellationToken,
    ) -> Result<Arc<MirrorOrchestrator>> {
        let initiator = Arc::new(IscsiadmInitiator::new(stack.initiator)?);
        let raid = Arc::new(MdadmAssembler::new(stack.raid)?);
        let replicas = Arc::new(ReplicaClient::new(stack.client)?);

        Ok(MirrorOrchestrator::new(
            stack.controller,
            initiator,
            raid,
            replicas,
            shutdown,
        ))
    }
}
