pub mod config;
pub mod docker;
pub mod history;
pub mod metrics;
pub mod notes;
pub mod sampler;
pub mod update;
pub mod weather;

pub use config::DashboardConfig;
pub use docker::{BollardRuntime, ContainerManager, ContainerRuntime};
pub use history::MetricsHistory;
pub use metrics::{HostPaths, MetricsCollector, MetricsSource};
pub use notes::NotesStore;
pub use weather::{OpenMeteoClient, WeatherProvider, WeatherService};
