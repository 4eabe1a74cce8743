//! Cloud-delivered protection configuration: the wire format, immutable
//! snapshots, the versioned store, and the HTTP client that feeds it.

pub mod client;
pub mod events;
pub mod refresh;
pub mod snapshot;
pub mod store;
pub mod wire;

pub use client::{ConfigSource, EventSink, HttpCloudClient};
pub use events::{CloudEvent, EventLimiter, EventReporter, ATTACK_WAVE_EVENT};
pub use refresh::{refresh, RefreshOutcome};
pub use snapshot::{BlockFlag, CloudConfigSnapshot, CompiledLists, EndpointPolicy, EndpointSummary};
pub use store::{ApplyHook, CloudConfigStore};
pub use wire::{
    CloudConfigDocument, ConfigVersion, EndpointConfig, FirewallLists, IpListData,
    RateLimitingConfig, UserAgentDetail,
};
