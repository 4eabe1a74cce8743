use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rasp_ip_lists::IpListMatch;
use rasp_rate_limit::RuleBounds;

use crate::snapshot::{BlockFlag, CloudConfigSnapshot, EndpointPolicy};
use crate::wire::CloudConfigDocument;

/// Called with every newly applied snapshot, in version order.
pub type ApplyHook = Box<dyn Fn(&CloudConfigSnapshot) + Send + Sync>;

/// Versioned holder of the current [`CloudConfigSnapshot`].
///
/// Readers load the current `Arc` without locking. Writers are serialized so
/// the version comparison, the swap and the apply hook happen as one step.
pub struct CloudConfigStore {
    current: ArcSwap<CloudConfigSnapshot>,
    writer: Mutex<()>,
    bounds: RuleBounds,
    on_apply: Option<ApplyHook>,
}

impl CloudConfigStore {
    pub fn new(bounds: RuleBounds) -> Self {
        Self {
            current: ArcSwap::from_pointee(CloudConfigSnapshot::default()),
            writer: Mutex::new(()),
            bounds,
            on_apply: None,
        }
    }

    pub fn with_apply_hook(mut self, hook: ApplyHook) -> Self {
        self.on_apply = Some(hook);
        self
    }

    pub fn snapshot(&self) -> Arc<CloudConfigSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> i64 {
        self.current.load().version()
    }

    /// Parse and apply a raw payload. Malformed payloads are logged and
    /// leave the current snapshot in place.
    pub fn ingest(&self, payload: &[u8]) -> bool {
        match serde_json::from_slice::<CloudConfigDocument>(payload) {
            Ok(doc) => self.ingest_document(doc).is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed cloud config");
                false
            }
        }
    }

    /// Apply `doc` if it is strictly newer than the current snapshot.
    pub fn ingest_document(&self, doc: CloudConfigDocument) -> Option<Arc<CloudConfigSnapshot>> {
        let _writer = self.writer.lock();

        let current = self.current.load_full();
        if doc.config_updated_at <= current.version() {
            tracing::debug!(
                incoming = doc.config_updated_at,
                current = current.version(),
                "cloud config not newer, ignored"
            );
            return None;
        }

        let snapshot = Arc::new(CloudConfigSnapshot::build(
            &doc,
            Some(current.lists()),
            &self.bounds,
        ));
        self.current.store(Arc::clone(&snapshot));

        if let Some(hook) = &self.on_apply {
            hook(&snapshot);
        }
        tracing::info!(
            version = snapshot.version(),
            endpoints = doc.endpoints.len(),
            "applied cloud config"
        );
        Some(snapshot)
    }

    pub fn endpoint_policy(&self, method: &str, route: &str) -> Option<Arc<EndpointPolicy>> {
        self.current.load().endpoint_policy(method, route)
    }

    pub fn wildcard_policies(&self, method: &str, route: &str) -> Vec<Arc<EndpointPolicy>> {
        self.current.load().wildcard_policies(method, route)
    }

    pub fn is_ip_bypassed(&self, ip: &str) -> bool {
        self.current.load().is_ip_bypassed(ip)
    }

    pub fn is_ip_blocked(&self, ip: &str) -> Option<IpListMatch> {
        self.current.load().is_ip_blocked(ip)
    }

    pub fn is_user_blocked(&self, user_id: &str) -> bool {
        self.current.load().is_user_blocked(user_id)
    }

    pub fn is_user_agent_blocked(&self, user_agent: &str) -> Option<Vec<String>> {
        self.current.load().is_user_agent_blocked(user_agent)
    }

    pub fn block_flag(&self) -> BlockFlag {
        self.current.load().block_flag()
    }
}

impl Default for CloudConfigStore {
    fn default() -> Self {
        Self::new(RuleBounds::default())
    }
}
