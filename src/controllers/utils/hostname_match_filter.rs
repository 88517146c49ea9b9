use eater_domainmatcher::DomainPattern;
use tracing::{debug, warn};

pub struct HostnameMatchFilter<'a> {
    listener_hostname: &'a str,
    route_hostname: &'a str,
}

impl<'a> HostnameMatchFilter<'a> {
    pub fn new(listener_hostname: &'a str, route_hostname: &'a str) -> Self {
        Self { listener_hostname, route_hostname }
    }

    /// `*.suffix` matches any host ending in `.suffix` at any depth, never the apex `suffix` itself.
    pub fn filter(&self) -> bool {
        if self.listener_hostname.is_empty() || self.listener_hostname == self.route_hostname {
            return true;
        }

        let Some(suffix) = self.listener_hostname.strip_prefix("*.").filter(|suffix| !suffix.is_empty()) else {
            return false;
        };

        let pattern = format!("**+.{suffix}");
        match DomainPattern::<'_, '.'>::try_from(pattern.as_str()) {
            Ok(pattern) => {
                let res = pattern.matches(self.route_hostname);
                debug!("Comparing hostnames {} {} {}", self.listener_hostname, self.route_hostname, res);
                res
            },
            Err(_) => {
                warn!("Hostname is not a valid domain {}", self.listener_hostname);
                false
            },
        }
    }
}

pub fn host_matches(listener_hostname: &str, route_hostname: &str) -> bool {
    HostnameMatchFilter::new(listener_hostname, route_hostname).filter()
}
