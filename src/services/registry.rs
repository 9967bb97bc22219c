use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{
    normalize_host, ExitReason, HealthStatus, RouteEntry, ServiceDefinition, ServiceInstance,
    ServiceState,
};

/// What the user asked for, as opposed to what the process is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Running,
    #[default]
    Stopped,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Status row for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub desired: DesiredState,
    pub state: ServiceState,
    pub health: HealthStatus,
    pub instance_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_exit: Option<ExitReason>,
    pub last_error: Option<String>,
}

impl ServiceRecord {
    fn from_definition(def: &ServiceDefinition) -> Self {
        Self {
            name: def.name.clone(),
            hostname: def.hostname.clone(),
            port: def.port,
            desired: DesiredState::Stopped,
            state: ServiceState::Stopped,
            health: HealthStatus::Unknown,
            instance_id: None,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_exit: None,
            last_error: None,
        }
    }

    fn apply(&mut self, instance: &ServiceInstance) {
        self.state = instance.state;
        self.health = instance.health;
        self.instance_id = Some(instance.id);
        self.pid = instance.pid;
        self.started_at = instance.started_at;
        self.restart_count = instance.restart_count;
        self.last_exit = instance.last_exit;
        self.last_error.clone_from(&instance.last_error);
    }
}

#[derive(Debug, Default)]
struct ServiceTable {
    /// Start order
    order: Vec<String>,
    records: HashMap<String, ServiceRecord>,
}

/// Live service state and the route table consulted by the proxy.
///
/// Route entries are immutable `Arc`s swapped under the lock, so a reader
/// either sees the old entry or the new one.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    routes: RwLock<HashMap<String, Arc<RouteEntry>>>,
    services: RwLock<ServiceTable>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the service set with `definitions` (already in start order).
    ///
    /// Records for services that remain keep their runtime fields; removed
    /// services lose their record and any route.
    pub async fn seed(&self, definitions: &[ServiceDefinition]) {
        let mut table = self.services.write().await;
        let mut records = HashMap::with_capacity(definitions.len());

        for def in definitions {
            let mut record = ServiceRecord::from_definition(def);
            if let Some(previous) = table.records.remove(&def.name) {
                record = ServiceRecord {
                    hostname: def.hostname.clone(),
                    port: def.port,
                    ..previous
                };
            }
            records.insert(def.name.clone(), record);
        }

        let removed: Vec<String> = table.records.keys().cloned().collect();
        table.order = definitions.iter().map(|d| d.name.clone()).collect();
        table.records = records;
        drop(table);

        if !removed.is_empty() {
            let mut routes = self.routes.write().await;
            routes.retain(|_, route| !removed.contains(&route.service));
        }
    }

    /// Publish a route, replacing any previous entry for the hostname.
    pub async fn register(&self, route: RouteEntry) {
        let hostname = normalize_host(&route.hostname);
        tracing::info!(
            host = %hostname,
            service = %route.service,
            backend = %route.backend,
            tls = %route.tls,
            "route registered"
        );
        self.routes.write().await.insert(hostname, Arc::new(route));
    }

    /// Remove every route owned by `service`.
    pub async fn unregister(&self, service: &str) -> Vec<Arc<RouteEntry>> {
        let mut routes = self.routes.write().await;
        let hosts: Vec<String> = routes
            .iter()
            .filter(|(_, route)| route.service == service)
            .map(|(host, _)| host.clone())
            .collect();

        let removed: Vec<Arc<RouteEntry>> =
            hosts.iter().filter_map(|host| routes.remove(host)).collect();
        drop(routes);

        for route in &removed {
            tracing::info!(host = %route.hostname, service = %service, "route removed");
        }
        removed
    }

    /// Look up the route for a Host header or SNI name.
    pub async fn resolve(&self, hostname: &str) -> Option<Arc<RouteEntry>> {
        let key = normalize_host(hostname);
        self.routes.read().await.get(&key).cloned()
    }

    /// All routes ordered by hostname.
    pub async fn snapshot(&self) -> Vec<RouteEntry> {
        let routes = self.routes.read().await;
        let mut entries: Vec<RouteEntry> = routes.values().map(|r| (**r).clone()).collect();
        drop(routes);
        entries.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        entries
    }

    /// Copy runtime fields from an instance snapshot into its record.
    pub async fn update_instance(&self, instance: &ServiceInstance) {
        let mut table = self.services.write().await;
        if let Some(record) = table.records.get_mut(&instance.name) {
            record.apply(instance);
        }
    }

    pub async fn set_desired(&self, name: &str, desired: DesiredState) {
        let mut table = self.services.write().await;
        if let Some(record) = table.records.get_mut(name) {
            record.desired = desired;
        }
    }

    pub async fn service(&self, name: &str) -> Option<ServiceRecord> {
        self.services.read().await.records.get(name).cloned()
    }

    /// Service records in start order.
    pub async fn services(&self) -> Vec<ServiceRecord> {
        let table = self.services.read().await;
        table
            .order
            .iter()
            .filter_map(|name| table.records.get(name).cloned())
            .collect()
    }
}
