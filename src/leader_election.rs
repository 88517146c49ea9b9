use std::{future::Future, time::Duration};

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{Result, configuration::LeaderElectionConfiguration};

#[derive(Error, Debug)]
enum LeaderElectionError {
    #[error("lease {0} was taken over by another replica")]
    Lost(String),
    #[error("lease {lease} could not be renewed: {message}")]
    Renew { lease: String, message: String },
}

/// Waits for the lease, then drives `work` for as long as the lease is held.
/// Losing the lease is an error so the process restarts as a follower.
pub async fn run_while_leading<F>(client: Client, configuration: &LeaderElectionConfiguration, holder_id: String, work: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let lease_name = configuration.lease_name.clone();
    let lease_ttl = Duration::from_secs(configuration.lease_ttl_seconds);
    let renew_interval = lease_ttl / 3;
    let lease = LeaseLock::new(
        client,
        &configuration.namespace,
        LeaseLockParams { holder_id: holder_id.clone(), lease_name: lease_name.clone(), lease_ttl },
    );

    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => break,
            Ok(_) => debug!("leader_election: {holder_id} waiting for lease {lease_name}"),
            Err(e) => warn!("leader_election: {holder_id} can't acquire lease {lease_name} {e}"),
        }
        tokio::time::sleep(renew_interval).await;
    }
    info!("leader_election: {holder_id} leading with lease {lease_name}");

    let keep_leading = async {
        loop {
            tokio::time::sleep(renew_interval).await;
            match lease.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {},
                Ok(_) => return LeaderElectionError::Lost(lease_name.clone()),
                Err(e) => return LeaderElectionError::Renew { lease: lease_name.clone(), message: e.to_string() },
            }
        }
    };

    tokio::select! {
        () = work => {
            if let Err(e) = lease.step_down().await {
                warn!("leader_election: {holder_id} can't release lease {lease_name} {e}");
            }
            Ok(())
        },
        e = keep_leading => Err(e.into()),
    }
}
