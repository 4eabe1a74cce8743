//! JSON documents exchanged with the cloud backend.
//!
//! Every collection tolerates both a missing key and an explicit `null`.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Full runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfigDocument {
    #[serde(default)]
    pub config_updated_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked_user_ids: Vec<String>,
    /// Global bypass list.
    #[serde(
        default,
        rename = "allowedIPAddresses",
        deserialize_with = "null_as_default"
    )]
    pub bypassed_ips: Vec<String>,
    #[serde(default)]
    pub block: Option<bool>,
    /// Firewall lists, when delivered inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lists: Option<FirewallLists>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub force_protection_off: bool,
    #[serde(
        default,
        rename = "allowedIPAddresses",
        deserialize_with = "null_as_default"
    )]
    pub allowed_ip_addresses: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rate_limiting: RateLimitingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_requests: u64,
    #[serde(default, rename = "windowSizeInMS")]
    pub window_size_in_ms: u64,
}

/// Firewall lists, inline under `lists` or from the separate lists endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallLists {
    #[serde(
        default,
        rename = "blockedIPAddresses",
        deserialize_with = "null_as_default"
    )]
    pub blocked_ip_addresses: Vec<IpListData>,
    #[serde(
        default,
        rename = "allowedIPAddresses",
        deserialize_with = "null_as_default"
    )]
    pub allowed_ip_addresses: Vec<IpListData>,
    #[serde(
        default,
        rename = "monitoredIPAddresses",
        alias = "monitoredIpAddresses",
        deserialize_with = "null_as_default"
    )]
    pub monitored_ip_addresses: Vec<IpListData>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocked_user_agents: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub monitored_user_agents: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_agent_details: Vec<UserAgentDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpListData {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ips: Vec<String>,
}

impl IpListData {
    /// Lists are identified by `key`, falling back to `source`.
    pub fn name(&self) -> &str {
        if self.key.is_empty() {
            &self.source
        } else {
            &self.key
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAgentDetail {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub pattern: String,
}

/// Response of the lightweight version check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersion {
    #[serde(default)]
    pub config_updated_at: i64,
}
