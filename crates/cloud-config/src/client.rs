//! HTTP access to the cloud backend.

use std::time::Duration;

use async_trait::async_trait;
use rasp_common::{CloudSettings, RaspError, RaspResult};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::events::CloudEvent;
use crate::wire::{CloudConfigDocument, ConfigVersion, FirewallLists};

const VERSION_PATH: &str = "config";
const CONFIG_PATH: &str = "api/runtime/config";
const LISTS_PATH: &str = "api/runtime/firewall/lists";
const EVENTS_PATH: &str = "api/runtime/events";

/// Where configuration comes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Cheap request returning only the remote `configUpdatedAt`.
    async fn fetch_version(&self) -> RaspResult<i64>;

    async fn fetch_config(&self) -> RaspResult<CloudConfigDocument>;

    async fn fetch_lists(&self) -> RaspResult<FirewallLists>;
}

/// Where detection events go. The backend may answer with a fresh config.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_event(&self, event: &CloudEvent) -> RaspResult<Option<CloudConfigDocument>>;
}

/// `reqwest`-backed client for one tenant token.
#[derive(Clone)]
pub struct HttpCloudClient {
    client: Client,
    endpoint: String,
    config_endpoint: String,
    token: String,
}

impl HttpCloudClient {
    pub fn new(
        endpoint: &str,
        config_endpoint: &str,
        token: &str,
        timeout: Duration,
    ) -> RaspResult<Self> {
        if token.is_empty() {
            return Err(RaspError::Config("no token set".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            config_endpoint: config_endpoint.to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_settings(settings: &CloudSettings, token: &str) -> RaspResult<Self> {
        Self::new(
            &settings.endpoint,
            &settings.config_endpoint,
            token,
            settings.request_timeout(),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, base: &str, path: &str) -> RaspResult<T> {
        let url = join_url(base, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(&url, response)?;
        response.json::<T>().await.map_err(transport)
    }
}

#[async_trait]
impl ConfigSource for HttpCloudClient {
    async fn fetch_version(&self) -> RaspResult<i64> {
        let version: ConfigVersion = self.get_json(&self.config_endpoint, VERSION_PATH).await?;
        Ok(version.config_updated_at)
    }

    async fn fetch_config(&self) -> RaspResult<CloudConfigDocument> {
        self.get_json(&self.endpoint, CONFIG_PATH).await
    }

    async fn fetch_lists(&self) -> RaspResult<FirewallLists> {
        self.get_json(&self.endpoint, LISTS_PATH).await
    }
}

#[async_trait]
impl EventSink for HttpCloudClient {
    async fn send_event(&self, event: &CloudEvent) -> RaspResult<Option<CloudConfigDocument>> {
        let url = join_url(&self.endpoint, EVENTS_PATH);
        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.token)
            .json(event)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(&url, response)?;
        let body = response.bytes().await.map_err(transport)?;

        // The backend may piggy-back a config; anything else is just an ack.
        Ok(serde_json::from_slice::<CloudConfigDocument>(&body)
            .ok()
            .filter(|doc| doc.config_updated_at > 0))
    }
}

fn transport(e: reqwest::Error) -> RaspError {
    RaspError::Transport(e.to_string())
}

fn check_status(url: &str, response: Response) -> RaspResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RaspError::Transport(format!(
            "request to '{}' returned status {}",
            url,
            response.status()
        )))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
