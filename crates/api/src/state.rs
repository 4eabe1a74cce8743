use std::sync::Arc;
use std::time::Instant;

use rasp_protection::TenantRegistry;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<ApiState>;

pub struct ApiState {
    pub registry: Arc<TenantRegistry>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            registry,
            start_time: Instant::now(),
        }
    }
}
