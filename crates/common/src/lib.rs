//! Shared building blocks for the protection daemon: bootstrap configuration,
//! the error taxonomy, and wildcard route handling.

pub mod config;
pub mod error;
pub mod route;

pub use config::{
    AgentConfig, AttackWaveSettings, CloudSettings, LogConfig, ProtectionSettings,
    RateLimitSettings, ServerConfig, TenantSettings,
};
pub use error::{RaspError, RaspResult};
pub use route::{
    compile_route_pattern, is_wildcard_endpoint, is_wildcard_route, token_fingerprint, WILDCARD,
};
