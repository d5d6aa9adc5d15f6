use anyhow::{bail, Result};
use std::env;

use super::az;
use super::config::Config;
use crate::arm::client::DEFAULT_ENDPOINT;
use crate::arm::ArmClient;

/// Resolved Resource Manager credentials
pub struct Credentials {
    pub token: String,
    pub subscription_id: String,
    pub endpoint: String,
}

/// Resolve token and subscription from the environment, the config file, then az
pub fn resolve_credentials(subscription: Option<String>, config: &Config) -> Result<Credentials> {
    let endpoint = config
        .arm_endpoint
        .clone()
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    let subscription_id = match pick_subscription(subscription, config) {
        Some(id) => id,
        None => az::get_subscription_id()?,
    };
    if subscription_id.is_empty() {
        bail!("No subscription selected. Pass --subscription or run 'az account set'");
    }

    // Try AZURE_ACCESS_TOKEN first
    let token = match env::var("AZURE_ACCESS_TOKEN") {
        Ok(token) if !token.is_empty() => token,
        _ => az::get_access_token(&format!("{}/", endpoint.trim_end_matches('/')))?,
    };

    Ok(Credentials {
        token,
        subscription_id,
        endpoint,
    })
}

/// Subscription from the flag (or AZURE_SUBSCRIPTION_ID), then the config file
fn pick_subscription(flag: Option<String>, config: &Config) -> Option<String> {
    flag.filter(|s| !s.is_empty())
        .or_else(|| config.subscription_id.clone())
}

impl Credentials {
    pub fn arm_client(&self) -> Result<ArmClient> {
        Ok(ArmClient::new(self.subscription_id.clone(), self.token.clone())?
            .with_endpoint(&self.endpoint))
    }
}
