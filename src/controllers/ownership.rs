use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway};
use kube::ResourceExt;

use crate::common::GATEWAY_FINALIZER;

pub fn has_finalizer(gateway: &Gateway) -> bool {
    gateway.finalizers().iter().any(|f| f == GATEWAY_FINALIZER)
}

/// Decides whether a Gateway belongs to this controller instance.
#[derive(Clone, Debug)]
pub struct OwnershipFilter {
    controller_name: String,
    gateway_class_name: Option<String>,
}

impl OwnershipFilter {
    pub fn new(controller_name: &str, gateway_class_name: Option<&str>) -> Self {
        Self { controller_name: controller_name.to_owned(), gateway_class_name: gateway_class_name.map(ToOwned::to_owned) }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    /// A missing class is never ours.
    pub fn owns_class(&self, gateway_class: Option<&GatewayClass>) -> bool {
        gateway_class.is_some_and(|class| {
            class.spec.controller_name == self.controller_name && self.gateway_class_name.as_ref().is_none_or(|name| *name == class.name_any())
        })
    }

    /// Unmanaged Gateways are still worth a pass while they carry our finalizer or are being deleted.
    pub fn should_reconcile(&self, gateway: &Gateway, gateway_class: Option<&GatewayClass>) -> bool {
        self.owns_class(gateway_class) || gateway.metadata.deletion_timestamp.is_some() || has_finalizer(gateway)
    }
}
