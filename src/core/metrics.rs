/// Host metrics collection
///
/// Reads CPU, memory, disk, uptime and temperature for the host. When the
/// dashboard runs inside a container the host filesystem is expected to be
/// mounted read-only and pointed to by `HOST_ROOT`; uptime, temperature,
/// hostname and disk usage are then read through that root.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use crate::error::{DashboardError, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One reading of the host, stamped with the unix second it was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub uptime: u64,
    pub temperature: f64,
    pub timestamp: i64,
}

/// Static host identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub system: String,
    pub release: String,
    pub version: String,
    pub machine: String,
    pub memory_total: f64,
    pub disk_total: f64,
}

/// Anything that can produce a sample on demand
pub trait MetricsSource: Send + Sync + 'static {
    fn sample(&self) -> Result<MetricSample>;

    fn system_info(&self) -> Result<SystemInfo>;
}

/// Paths into the host filesystem, relative to `HOST_ROOT`
#[derive(Debug, Clone)]
pub struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from the `HOST_ROOT` environment variable, defaulting to `/`
    pub fn from_env() -> Self {
        Self::new(std::env::var("HOST_ROOT").unwrap_or_else(|_| "/".to_string()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Uptime in seconds from `proc/uptime`, if readable
    pub fn read_uptime(&self) -> Option<u64> {
        let path = self.join("proc/uptime");
        match std::fs::read_to_string(&path) {
            Ok(content) => parse_uptime(&content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "uptime file not readable");
                None
            }
        }
    }

    /// CPU temperature in Celsius from the first thermal zone, if readable
    pub fn read_temperature(&self) -> Option<f64> {
        let path = self.join("sys/class/thermal/thermal_zone0/temp");
        match std::fs::read_to_string(&path) {
            Ok(content) => parse_millidegrees(&content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "thermal zone not readable");
                None
            }
        }
    }

    /// Hostname from `etc/hostname`, if readable and non-empty
    pub fn read_hostname(&self) -> Option<String> {
        std::fs::read_to_string(self.join("etc/hostname"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Parse the first field of `/proc/uptime` ("12345.67 54321.00")
pub fn parse_uptime(content: &str) -> Option<u64> {
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64)
}

/// Parse a thermal zone reading in millidegrees Celsius
pub fn parse_millidegrees(content: &str) -> Option<f64> {
    content
        .trim()
        .parse::<i64>()
        .ok()
        .map(|m| m as f64 / 1000.0)
}

/// Usage percentage clamped to [0, 100]
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// (total, available) bytes for the disk whose mount point best covers `path`
fn disk_space_for(path: &Path) -> Option<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.total_space(), d.available_space()))
}

/// Collects metrics from the OS via sysinfo and the host filesystem
///
/// Keeps one `System` alive between samples so CPU usage is measured over
/// the interval since the previous refresh.
pub struct MetricsCollector {
    host: HostPaths,
    system: Mutex<System>,
}

impl MetricsCollector {
    pub fn new(host: HostPaths) -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a baseline
        system.refresh_cpu();
        Self {
            host,
            system: Mutex::new(system),
        }
    }

    pub fn host(&self) -> &HostPaths {
        &self.host
    }

    /// Take an instantaneous sample of the host
    pub fn collect(&self) -> Result<MetricSample> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| DashboardError::InvalidState("metrics collector lock poisoned".into()))?;

        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_usage = (sys.global_cpu_info().cpu_usage() as f64).clamp(0.0, 100.0);
        let memory_usage = percent(sys.used_memory(), sys.total_memory());
        drop(sys);

        let disk_usage = match disk_space_for(self.host.root()) {
            Some((total, available)) => percent(total.saturating_sub(available), total),
            None => {
                warn!(root = %self.host.root().display(), "no disk found for host root");
                0.0
            }
        };

        let uptime = self.host.read_uptime().unwrap_or_else(System::uptime);
        let temperature = self.host.read_temperature().unwrap_or(0.0);

        Ok(MetricSample {
            cpu_usage,
            memory_usage,
            disk_usage,
            uptime,
            temperature,
            timestamp: Utc::now().timestamp(),
        })
    }

    /// Static identity of the host
    pub fn system_info(&self) -> Result<SystemInfo> {
        let memory_total = {
            let mut sys = self
                .system
                .lock()
                .map_err(|_| DashboardError::InvalidState("metrics collector lock poisoned".into()))?;
            sys.refresh_memory();
            sys.total_memory() as f64 / BYTES_PER_GB
        };

        let disk_total = disk_space_for(self.host.root())
            .map(|(total, _)| total as f64 / BYTES_PER_GB)
            .unwrap_or(0.0);

        let hostname = self
            .host
            .read_hostname()
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".to_string());

        Ok(SystemInfo {
            hostname,
            system: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            release: System::kernel_version().unwrap_or_default(),
            version: System::os_version().unwrap_or_default(),
            machine: System::cpu_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            memory_total,
            disk_total,
        })
    }
}

impl MetricsSource for MetricsCollector {
    fn sample(&self) -> Result<MetricSample> {
        self.collect()
    }

    fn system_info(&self) -> Result<SystemInfo> {
        MetricsCollector::system_info(self)
    }
}
