/// homedash: home-server dashboard backend
///
/// System metrics with a rolling history, Docker container control, a
/// notes store and a cached weather proxy, served over a small REST API.

pub mod core;
pub mod error;
pub mod server;
pub mod utils;

pub use error::{DashboardError, Result};
