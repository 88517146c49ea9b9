use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{Result, common::DEFAULT_CONTROLLER_NAME};

const ACCESS_TOKEN_ENV: &str = "SC_ACCESS_TOKEN";
const LOCATION_ID_ENV: &str = "SC_LOCATION_ID";
const HOSTNAME_ENV: &str = "HOSTNAME";
const DEFAULT_API_URL: &str = "https://api.servers.com/v1";
const DEFAULT_LOCATION_ID: i64 = 1;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_LEASE_TTL_SECONDS: u64 = 15;
// renewals run every third of the ttl
const MIN_LEASE_TTL_SECONDS: u64 = 3;

fn default_controller_name() -> String {
    DEFAULT_CONTROLLER_NAME.to_owned()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

fn default_request_timeout_seconds() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

fn default_lease_ttl_seconds() -> u64 {
    DEFAULT_LEASE_TTL_SECONDS
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn resolve_access_token(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    non_empty(configured.map(ToOwned::to_owned)).or_else(|| non_empty(from_env))
}

fn resolve_location_id(configured: Option<i64>, from_env: Option<String>) -> i64 {
    configured.or_else(|| from_env.and_then(|value| value.trim().parse().ok())).unwrap_or(DEFAULT_LOCATION_ID)
}

#[derive(Clone, TypedBuilder, Deserialize)]
pub struct ProviderConfiguration {
    #[builder(default = default_api_url())]
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    access_token: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    location_id: Option<i64>,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_SECONDS)]
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ProviderConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for ProviderConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfiguration")
            .field("api_url", &self.api_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("location_id", &self.location_id)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl ProviderConfiguration {
    /// The file value wins, `SC_ACCESS_TOKEN` is the fallback.
    pub fn access_token(&self) -> Option<String> {
        resolve_access_token(self.access_token.as_deref(), std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    pub fn location_id(&self) -> i64 {
        resolve_location_id(self.location_id, std::env::var(LOCATION_ID_ENV).ok())
    }
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct LeaderElectionConfiguration {
    pub namespace: String,
    pub lease_name: String,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    holder_id: Option<String>,
    #[builder(default = DEFAULT_LEASE_TTL_SECONDS)]
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
}

impl LeaderElectionConfiguration {
    pub fn holder_id(&self) -> Option<String> {
        non_empty(self.holder_id.clone()).or_else(|| non_empty(std::env::var(HOSTNAME_ENV).ok()))
    }
}

#[derive(Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    #[builder(default = default_controller_name())]
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub gateway_class_name: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub enable_open_telemetry: Option<bool>,
    #[builder(default)]
    #[serde(default)]
    pub provider: ProviderConfiguration,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub leader_election: Option<LeaderElectionConfiguration>,
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("provider access token must be configured or set in SC_ACCESS_TOKEN")]
    AccessToken,
    #[error("invalid provider api url {0}")]
    ApiUrl(String),
    #[error("leader election needs a holder id or HOSTNAME")]
    HolderId,
    #[error("lease ttl must be at least 3 seconds, got {0}")]
    LeaseTtl(u64),
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.trim().is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.provider.access_token().is_none() {
            return Err(ConfigurationError::AccessToken.into());
        }
        if Url::parse(&self.provider.api_url).is_err() {
            return Err(ConfigurationError::ApiUrl(self.provider.api_url.clone()).into());
        }
        if let Some(leader_election) = &self.leader_election {
            if leader_election.holder_id().is_none() {
                return Err(ConfigurationError::HolderId.into());
            }
            if leader_election.lease_ttl_seconds < MIN_LEASE_TTL_SECONDS {
                return Err(ConfigurationError::LeaseTtl(leader_election.lease_ttl_seconds).into());
            }
        }
        Ok(())
    }

    /// An empty restriction means any class pointing at this controller.
    pub fn gateway_class_name(&self) -> Option<&str> {
        self.gateway_class_name.as_deref().filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_minimal_file() {
        let configuration: Configuration = serde_yaml::from_str(
            r"
provider:
  access_token: secret-token
",
        )
        .unwrap();
        assert_eq!(configuration.controller_name, DEFAULT_CONTROLLER_NAME);
        assert_eq!(configuration.provider.api_url, DEFAULT_API_URL);
        assert_eq!(configuration.provider.request_timeout_seconds, 30);
        assert_eq!(configuration.gateway_class_name(), None);
        assert!(configuration.leader_election.is_none());
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn access_token_is_not_printed() {
        let provider = ProviderConfiguration::builder().access_token("secret-token".to_owned()).build();
        let printed = format!("{provider:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn file_values_win_over_environment() {
        assert_eq!(resolve_access_token(Some("file"), Some("env".to_owned())), Some("file".to_owned()));
        assert_eq!(resolve_access_token(Some(""), Some("env".to_owned())), Some("env".to_owned()));
        assert_eq!(resolve_access_token(None, Some("  ".to_owned())), None);

        assert_eq!(resolve_location_id(Some(7), Some("3".to_owned())), 7);
        assert_eq!(resolve_location_id(None, Some("3".to_owned())), 3);
        assert_eq!(resolve_location_id(None, Some("dc-3".to_owned())), DEFAULT_LOCATION_ID);
        assert_eq!(resolve_location_id(None, None), DEFAULT_LOCATION_ID);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let provider = || ProviderConfiguration::builder().access_token("token".to_owned()).build();

        let configuration = Configuration::builder().controller_name(String::new()).provider(provider()).build();
        assert!(configuration.validate().unwrap_err().to_string().contains("controller name"));

        let configuration =
            Configuration::builder().provider(ProviderConfiguration::builder().api_url("not a url".to_owned()).access_token("token".to_owned()).build()).build();
        assert!(configuration.validate().unwrap_err().to_string().contains("invalid provider api url"));

        let configuration = Configuration::builder()
            .provider(provider())
            .gateway_class_name(String::new())
            .leader_election(LeaderElectionConfiguration::builder().namespace("kube-system".to_owned()).lease_name("gw".to_owned()).holder_id("pod-0".to_owned()).build())
            .build();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.gateway_class_name(), None);
    }

    #[test]
    fn rejects_lease_ttl_too_short_to_renew() {
        let with_ttl = |lease_ttl_seconds: u64| {
            Configuration::builder()
                .provider(ProviderConfiguration::builder().access_token("token".to_owned()).build())
                .leader_election(
                    LeaderElectionConfiguration::builder()
                        .namespace("kube-system".to_owned())
                        .lease_name("gw".to_owned())
                        .holder_id("pod-0".to_owned())
                        .lease_ttl_seconds(lease_ttl_seconds)
                        .build(),
                )
                .build()
        };
        assert!(with_ttl(0).validate().unwrap_err().to_string().contains("lease ttl must be at least 3 seconds, got 0"));
        assert!(with_ttl(2).validate().is_err());
        assert!(with_ttl(MIN_LEASE_TTL_SECONDS).validate().is_ok());
    }
}
