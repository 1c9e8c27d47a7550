/// Docker integration
///
/// Lists local containers in a stable order and forwards lifecycle commands
/// (start/stop/restart/update) to the Docker engine. The engine owns the
/// truth; nothing here caches container state.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerSummary, HostConfig, PortBinding as BollardPortBinding, PortTypeEnum, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::core::update::{self, UpdateReport};
use crate::error::{DashboardError, Result};

const SHORT_ID_LEN: usize = 12;

/// Container lifecycle state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Exited,
    Created,
    Restarting,
    Paused,
    Removing,
    Dead,
}

impl From<&str> for ContainerStatus {
    fn from(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "created" => ContainerStatus::Created,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "removing" => ContainerStatus::Removing,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Exited,
        }
    }
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Created => "created",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Dead => "dead",
        }
    }

    /// Get color for terminal display
    pub fn color(&self) -> &'static str {
        match self {
            ContainerStatus::Running => "green",
            ContainerStatus::Exited => "bright black",
            ContainerStatus::Created => "white",
            ContainerStatus::Paused => "yellow",
            ContainerStatus::Restarting => "cyan",
            ContainerStatus::Removing | ContainerStatus::Dead => "red",
        }
    }
}

/// A published port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

/// Normalized view of one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Published ports, ascending by host port
    pub ports: Vec<PortMapping>,
    pub created: DateTime<Utc>,
}

impl ContainerRecord {
    /// Lowest published host port, if any
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.host_port)
    }
}

/// Host port binding as configured on a container, e.g. "80/tcp" -> 0.0.0.0:8080
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: String,
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

/// Configuration needed to recreate a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    pub binds: Vec<String>,
    pub network_mode: Option<String>,
    pub restart_policy: Option<String>,
}

/// Operations the dashboard needs from a container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Every container, running or not, in engine order
    async fn list(&self) -> Result<Vec<ContainerRecord>>;

    async fn inspect(&self, id: &str) -> Result<ContainerSpec>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str, grace_secs: u64) -> Result<()>;

    async fn restart(&self, id: &str, grace_secs: u64) -> Result<()>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Create (not start) a container, returning its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;
}

/// Sort containers for display
///
/// Running containers first; inside each group ascending by lowest host
/// port with portless containers last; ties broken by name.
pub fn sort_containers(containers: &mut [ContainerRecord]) {
    containers.sort_by(|a, b| {
        b.status
            .is_running()
            .cmp(&a.status.is_running())
            .then_with(|| match (a.primary_port(), b.primary_port()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.name.cmp(&b.name))
    });
}

pub fn short_id(id: &str) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Limits applied to container operations
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Grace period handed to the engine before it kills a stopping container
    pub stop_grace_secs: u64,
    pub request_timeout: Duration,
    pub pull_timeout: Duration,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: 10,
            request_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

/// Bound an engine call by `limit`; elapsing counts as an upstream failure
pub(crate) async fn with_timeout<T>(
    what: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DashboardError::timeout(what, limit)),
    }
}

/// Container control adapter
///
/// Commands on the same container are serialized, whether it is addressed by
/// name or by id; commands on different containers run independently.
#[derive(Clone)]
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    settings: ContainerSettings,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ContainerSettings) -> Self {
        Self {
            runtime,
            locks: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Connect to the local Docker engine
    pub fn connect(settings: ContainerSettings) -> Result<Self> {
        let runtime = BollardRuntime::connect()?;
        Ok(Self::new(Arc::new(runtime), settings))
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// All containers, sorted for display
    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut containers = with_timeout(
            "container list",
            self.settings.request_timeout,
            self.runtime.list(),
        )
        .await?;
        sort_containers(&mut containers);
        Ok(containers)
    }

    /// Re-enumerate after confirming the engine is reachable
    pub async fn refresh(&self) -> Result<Vec<ContainerRecord>> {
        with_timeout("engine ping", self.settings.request_timeout, self.runtime.ping()).await?;
        debug!("container engine reachable, re-enumerating");
        self.list().await
    }

    pub async fn start(&self, id: &str) -> Result<String> {
        let _guard = self.lock(id).await?;
        with_timeout("container start", self.settings.request_timeout, self.runtime.start(id))
            .await?;
        info!(container = %id, "started container");
        Ok(id.to_string())
    }

    pub async fn stop(&self, id: &str) -> Result<String> {
        let _guard = self.lock(id).await?;
        with_timeout(
            "container stop",
            self.stop_limit(),
            self.runtime.stop(id, self.settings.stop_grace_secs),
        )
        .await?;
        info!(container = %id, "stopped container");
        Ok(id.to_string())
    }

    pub async fn restart(&self, id: &str) -> Result<String> {
        let _guard = self.lock(id).await?;
        with_timeout(
            "container restart",
            self.stop_limit(),
            self.runtime.restart(id, self.settings.stop_grace_secs),
        )
        .await?;
        info!(container = %id, "restarted container");
        Ok(id.to_string())
    }

    /// Pull the container's image and recreate it with the same configuration
    pub async fn update(&self, id: &str) -> Result<UpdateReport> {
        let _guard = self.lock(id).await?;
        update::run_update(self.runtime.as_ref(), id, &self.settings).await
    }

    /// Stop/restart may legitimately take the whole grace period
    fn stop_limit(&self) -> Duration {
        self.settings.request_timeout + Duration::from_secs(self.settings.stop_grace_secs)
    }

    /// Engine id behind a name or id prefix
    async fn resolve(&self, id: &str) -> Result<String> {
        let spec = with_timeout(
            "container inspect",
            self.settings.request_timeout,
            self.runtime.inspect(id),
        )
        .await?;
        if spec.id.is_empty() {
            Ok(id.to_string())
        } else {
            Ok(spec.id)
        }
    }

    /// Exclusive access to one container for the duration of a command
    ///
    /// Keyed by the engine id, so a name and an id for the same container
    /// share one lock.
    async fn lock(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let key = self.resolve(id).await?;
        let entry = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Drop entries nobody is holding or waiting on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(key)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        Ok(entry.lock_owned().await)
    }
}

/// Docker engine access through bollard
#[derive(Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            DashboardError::UpstreamUnavailable(format!(
                "Failed to connect to Docker daemon. Is Docker running? ({})",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Convert ContainerSummary to ContainerRecord
    fn summary_to_record(summary: ContainerSummary) -> ContainerRecord {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let image = summary
            .image
            .map(|image| {
                if image.starts_with("sha256:") {
                    short_id(&image)
                } else {
                    image
                }
            })
            .unwrap_or_else(|| "unknown".to_string());

        let status = summary
            .state
            .as_deref()
            .map(ContainerStatus::from)
            .unwrap_or(ContainerStatus::Exited);

        // IPv4 and IPv6 bindings show up as separate entries for the same port
        let mut ports: Vec<PortMapping> = summary
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                p.public_port.map(|host_port| PortMapping {
                    host_port,
                    container_port: p.private_port,
                    protocol: match p.typ {
                        Some(PortTypeEnum::UDP) => "udp",
                        Some(PortTypeEnum::SCTP) => "sctp",
                        _ => "tcp",
                    }
                    .to_string(),
                })
            })
            .collect();
        ports.sort();
        ports.dedup();

        ContainerRecord {
            container_id: short_id(summary.id.as_deref().unwrap_or_default()),
            name,
            image,
            status,
            ports,
            created: summary
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_default(),
        }
    }
}

/// Translate engine errors into the dashboard taxonomy
fn map_engine_error(id: &str, err: BollardError) -> DashboardError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => DashboardError::NotFound(format!("container {}: {}", id, message)),
        BollardError::DockerResponseServerError {
            status_code: 304, ..
        } => DashboardError::InvalidState(format!(
            "container {} is already in the requested state",
            id
        )),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => DashboardError::InvalidState(format!("container {}: {}", id, message)),
        other => DashboardError::UpstreamUnavailable(other.to_string()),
    }
}

fn restart_policy_name(policy: &RestartPolicyNameEnum) -> Option<&'static str> {
    match policy {
        RestartPolicyNameEnum::NO => Some("no"),
        RestartPolicyNameEnum::ALWAYS => Some("always"),
        RestartPolicyNameEnum::UNLESS_STOPPED => Some("unless-stopped"),
        RestartPolicyNameEnum::ON_FAILURE => Some("on-failure"),
        _ => None,
    }
}

fn restart_policy_from_name(name: &str) -> Option<RestartPolicyNameEnum> {
    match name {
        "no" => Some(RestartPolicyNameEnum::NO),
        "always" => Some(RestartPolicyNameEnum::ALWAYS),
        "unless-stopped" => Some(RestartPolicyNameEnum::UNLESS_STOPPED),
        "on-failure" => Some(RestartPolicyNameEnum::ON_FAILURE),
        _ => None,
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DashboardError::UpstreamUnavailable(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let options = Some(ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        });

        let containers = self
            .docker
            .list_containers(options)
            .await
            .map_err(|e| DashboardError::UpstreamUnavailable(e.to_string()))?;

        Ok(containers.into_iter().map(Self::summary_to_record).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerSpec> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_engine_error(id, e))?;

        let config = inspect.config.unwrap_or_default();
        let host = inspect.host_config.unwrap_or_default();

        let mut port_bindings: Vec<PortBinding> = host
            .port_bindings
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(container_port, bindings)| {
                let bindings = bindings.unwrap_or_default();
                if bindings.is_empty() {
                    vec![PortBinding {
                        container_port,
                        host_ip: None,
                        host_port: None,
                    }]
                } else {
                    bindings
                        .into_iter()
                        .map(|b| PortBinding {
                            container_port: container_port.clone(),
                            host_ip: b.host_ip,
                            host_port: b.host_port,
                        })
                        .collect()
                }
            })
            .collect();
        port_bindings.sort_by(|a, b| a.container_port.cmp(&b.container_port));

        Ok(ContainerSpec {
            id: short_id(inspect.id.as_deref().unwrap_or(id)),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            port_bindings,
            binds: host.binds.unwrap_or_default(),
            network_mode: host.network_mode,
            restart_policy: host
                .restart_policy
                .and_then(|rp| rp.name)
                .and_then(|name| restart_policy_name(&name))
                .map(str::to_string),
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_engine_error(id, e))
    }

    async fn stop(&self, id: &str, grace_secs: u64) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: grace_secs as i64 }))
            .await
            .map_err(|e| map_engine_error(id, e))
    }

    async fn restart(&self, id: &str, grace_secs: u64) -> Result<()> {
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: grace_secs as isize }))
            .await
            .map_err(|e| map_engine_error(id, e))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let info = progress
                .map_err(|e| DashboardError::UpstreamUnavailable(format!("pull {}: {}", image, e)))?;
            if let Some(status) = info.status {
                debug!(image = %image, status = %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| map_engine_error(id, e))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_map: HashMap<String, Option<Vec<BollardPortBinding>>> = HashMap::new();
        for binding in &spec.port_bindings {
            exposed_ports.insert(binding.container_port.clone(), HashMap::new());
            let entry = port_map.entry(binding.container_port.clone()).or_insert_with(|| Some(Vec::new()));
            if binding.host_ip.is_some() || binding.host_port.is_some() {
                if let Some(list) = entry.as_mut() {
                    list.push(BollardPortBinding {
                        host_ip: binding.host_ip.clone(),
                        host_port: binding.host_port.clone(),
                    });
                }
            }
        }

        let host_config = HostConfig {
            port_bindings: Some(port_map),
            binds: Some(spec.binds.clone()),
            network_mode: spec.network_mode.clone(),
            restart_policy: spec
                .restart_policy
                .as_deref()
                .and_then(restart_policy_from_name)
                .map(|name| RestartPolicy {
                    name: Some(name),
                    maximum_retry_count: None,
                }),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| map_engine_error(&spec.name, e))?;

        Ok(response.id)
    }
}
