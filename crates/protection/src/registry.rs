use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rasp_cloud_config::HttpCloudClient;
use rasp_common::{token_fingerprint, AgentConfig, CloudSettings, RaspError, RaspResult};

use crate::metrics::ProtectionMetrics;
use crate::tenant::{CloudLink, Tenant};

/// Opens a tenant's cloud link. `None` means the tenant runs offline.
pub trait CloudConnector: Send + Sync {
    fn connect(&self, token: &str) -> RaspResult<Option<CloudLink>>;
}

pub struct HttpCloudConnector {
    settings: CloudSettings,
}

impl HttpCloudConnector {
    pub fn new(settings: CloudSettings) -> Self {
        Self { settings }
    }
}

impl CloudConnector for HttpCloudConnector {
    fn connect(&self, token: &str) -> RaspResult<Option<CloudLink>> {
        let client = Arc::new(HttpCloudClient::from_settings(&self.settings, token)?);
        Ok(Some(CloudLink {
            source: client.clone(),
            events: client,
        }))
    }
}

pub struct OfflineConnector;

impl CloudConnector for OfflineConnector {
    fn connect(&self, _token: &str) -> RaspResult<Option<CloudLink>> {
        Ok(None)
    }
}

/// Connector matching the daemon configuration.
pub fn connector_for(settings: &CloudSettings) -> Arc<dyn CloudConnector> {
    if settings.enabled {
        Arc::new(HttpCloudConnector::new(settings.clone()))
    } else {
        Arc::new(OfflineConnector)
    }
}

/// Every live tenant, keyed by token.
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<Tenant>>>,
    settings: Arc<AgentConfig>,
    connector: Arc<dyn CloudConnector>,
    metrics: Arc<ProtectionMetrics>,
}

impl TenantRegistry {
    pub fn new(
        settings: Arc<AgentConfig>,
        connector: Arc<dyn CloudConnector>,
        metrics: Arc<ProtectionMetrics>,
    ) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            settings,
            connector,
            metrics,
        }
    }

    pub fn settings(&self) -> &AgentConfig {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<ProtectionMetrics> {
        &self.metrics
    }

    /// Create the tenant and start its tasks, or return the existing one.
    /// Must run inside a tokio runtime.
    pub fn register(&self, token: &str) -> RaspResult<Arc<Tenant>> {
        if token.is_empty() {
            return Err(RaspError::Config("no token set".into()));
        }
        if let Some(tenant) = self.tenants.read().get(token) {
            return Ok(Arc::clone(tenant));
        }

        let mut tenants = self.tenants.write();
        if let Some(tenant) = tenants.get(token) {
            return Ok(Arc::clone(tenant));
        }

        let cloud = self.connector.connect(token)?;
        let tenant = Arc::new(Tenant::new(
            token,
            &self.settings,
            Arc::clone(&self.metrics),
            cloud,
        ));
        tenant.start_tasks(&self.settings);
        tenants.insert(token.to_string(), Arc::clone(&tenant));
        self.metrics.active_tenants.set(tenants.len() as i64);

        tracing::info!(token = %tenant.fingerprint(), tenants = tenants.len(), "tenant registered");
        Ok(tenant)
    }

    pub fn get(&self, token: &str) -> Option<Arc<Tenant>> {
        self.tenants.read().get(token).cloned()
    }

    /// Like [`get`](Self::get), but an unknown token is an error.
    pub fn lookup(&self, token: &str) -> RaspResult<Arc<Tenant>> {
        self.get(token)
            .ok_or_else(|| RaspError::UnknownTenant(token_fingerprint(token)))
    }

    pub async fn remove(&self, token: &str) -> bool {
        let removed = {
            let mut tenants = self.tenants.write();
            let removed = tenants.remove(token);
            self.metrics.active_tenants.set(tenants.len() as i64);
            removed
        };
        match removed {
            Some(tenant) => {
                tenant.shutdown(self.settings.tenants.task_stop_grace()).await;
                true
            }
            None => false,
        }
    }

    /// Drop tenants with no activity for at least `grace`.
    pub async fn sweep_inactive(&self, grace: Duration) -> usize {
        let idle: Vec<Arc<Tenant>> = {
            let mut tenants = self.tenants.write();
            let tokens: Vec<String> = tenants
                .iter()
                .filter(|(_, tenant)| tenant.idle_for() >= grace)
                .map(|(token, _)| token.clone())
                .collect();
            let idle = tokens
                .iter()
                .filter_map(|token| tenants.remove(token))
                .collect();
            self.metrics.active_tenants.set(tenants.len() as i64);
            idle
        };

        let stop_grace = self.settings.tenants.task_stop_grace();
        for tenant in &idle {
            tracing::info!(token = %tenant.fingerprint(), idle_secs = tenant.idle_for().as_secs(), "removing inactive tenant");
            tenant.shutdown(stop_grace).await;
        }
        idle.len()
    }

    pub async fn shutdown_all(&self) {
        let all: Vec<Arc<Tenant>> = {
            let mut tenants = self.tenants.write();
            self.metrics.active_tenants.set(0);
            tenants.drain().map(|(_, tenant)| tenant).collect()
        };
        let grace = self.settings.tenants.task_stop_grace();
        for tenant in &all {
            tenant.shutdown(grace).await;
        }
        tracing::info!(stopped = all.len(), "all tenants stopped");
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}
