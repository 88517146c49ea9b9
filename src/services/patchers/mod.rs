mod gateway_patcher;

#[cfg(test)]
pub use gateway_patcher::MockGatewayPatcher;
pub use gateway_patcher::{GatewayPatcher, KubeGatewayPatcher, patch_status};
