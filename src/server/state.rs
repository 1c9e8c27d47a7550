use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::docker::ContainerManager;
use crate::core::history::MetricsHistory;
use crate::core::metrics::MetricsSource;
use crate::core::notes::NotesStore;
use crate::core::weather::WeatherService;

/// Services shared by every request
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<dyn MetricsSource>,
    pub history: Arc<MetricsHistory>,
    /// Sampling period; history samples younger than this are served as current
    pub metrics_interval: Duration,
    pub containers: ContainerManager,
    pub notes: Arc<NotesStore>,
    pub weather: Arc<WeatherService>,
    /// Config file that receives weather location changes
    pub config_path: Option<PathBuf>,
}
