use std::{sync::Arc, time::Duration};

use backends::{ProviderLbSynchronizer, ProviderTlsSynchronizer, provider::ServersComClient};
pub use configuration::{Configuration, LeaderElectionConfiguration, ProviderConfiguration};
use configuration::ConfigurationError;
use controllers::{
    GatewayReconciler, OwnershipFilter,
    gateway::{GatewayController, GatewayControllerContext},
    gateway_class::{GatewayClassController, GatewayClassControllerContext},
};
use futures::future;
use kube::Client;
use services::{KubeClusterReader, KubeEventPublisher, KubeGatewayPatcher};
use tracing::info;

pub mod backends;
mod common;
pub mod configuration;
mod controllers;
#[cfg(feature = "leader_election")]
mod leader_election;
mod services;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

pub async fn start(configuration: Configuration) -> Result<()> {
    let controller_name = configuration.controller_name.clone();
    info!("api-gateway-controller started {controller_name}");
    let client = Client::try_default().await?;

    let provider = &configuration.provider;
    let access_token = provider.access_token().ok_or(ConfigurationError::AccessToken)?;
    let user_agent = format!("{controller_name}/{}", env!("CARGO_PKG_VERSION"));
    let provider_client =
        Arc::new(ServersComClient::new(&provider.api_url, &access_token, &user_agent, Duration::from_secs(provider.request_timeout_seconds))?);
    let location_id = provider.location_id();
    info!("provider {} location {location_id}", provider.api_url);

    let ownership = OwnershipFilter::new(&controller_name, configuration.gateway_class_name());
    let reconciler = GatewayReconciler::builder()
        .ownership(ownership.clone())
        .cluster(Arc::new(KubeClusterReader::new(client.clone())))
        .patcher(Arc::new(KubeGatewayPatcher::new(client.clone())))
        .events(Arc::new(KubeEventPublisher::new(client.clone(), &controller_name)))
        .tls_synchronizer(Arc::new(ProviderTlsSynchronizer::new(Arc::<ServersComClient>::clone(&provider_client))))
        .lb_synchronizer(Arc::new(ProviderLbSynchronizer::new(provider_client, location_id)))
        .build();

    let gateway_class_controller = GatewayClassController::builder()
        .ctx(Arc::new(GatewayClassControllerContext::builder().controller_name(controller_name.clone()).client(client.clone()).build()))
        .build();

    let gateway_controller = GatewayController::builder()
        .ctx(Arc::new(
            GatewayControllerContext::builder()
                .controller_name(controller_name.clone())
                .client(client.clone())
                .ownership(ownership)
                .reconciler(Arc::new(reconciler))
                .build(),
        ))
        .build();

    let controllers = async {
        future::join_all(vec![gateway_class_controller.get_controller(), gateway_controller.get_controller()]).await;
    };

    #[cfg(feature = "leader_election")]
    if let Some(leader_election) = &configuration.leader_election {
        let holder_id = leader_election.holder_id().ok_or(ConfigurationError::HolderId)?;
        return leader_election::run_while_leading(client, leader_election, holder_id, controllers).await;
    }

    controllers.await;
    info!("api-gateway-controller stopped {controller_name}");
    Ok(())
}
