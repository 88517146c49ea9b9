use std::time::Duration;
pub mod gateway;
pub mod gateway_class;
mod handlers;
mod ownership;
mod reconciler;

mod utils;

pub use ownership::{OwnershipFilter, has_finalizer};
pub use reconciler::GatewayReconciler;

use crate::{backends::SyncError, services::ClusterError};

use self::utils::BuildError;

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    InvalidPayload(String),
    ClusterRead(ClusterError),
    Topology(BuildError),
    FinalizerPatchFailed(ClusterError),
    PatchFailed(ClusterError),
    CleanupFailed(SyncError),
}

const RECONCILE_LONG_WAIT: Duration = Duration::from_secs(3600);
const RECONCILE_ERROR_WAIT: Duration = Duration::from_secs(10);

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
