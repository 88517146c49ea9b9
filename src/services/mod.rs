pub mod cluster;
pub mod events;
pub mod patchers;

pub use cluster::{ClusterError, ClusterReader, KubeClusterReader};
#[cfg(test)]
pub use cluster::MockClusterReader;
pub use events::{EventPublisher, KubeEventPublisher};
pub use patchers::{GatewayPatcher, KubeGatewayPatcher};
