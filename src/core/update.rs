/// Container update: pull the image, then recreate the container
///
/// The sequence is `PullPending -> Pulled -> Stopping -> Removed -> Creating
/// -> Started`. A failed pull or stop aborts before anything is torn down.
/// A failure in any later step is reported as a partial failure naming that
/// step, and the old container is left the way that step left it (removed,
/// or removed with an unstarted replacement). Nothing is restarted
/// automatically.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::docker::{short_id, with_timeout, ContainerRuntime, ContainerSettings};
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStep {
    PullPending,
    Pulled,
    Stopping,
    Removed,
    Creating,
    Started,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStep::PullPending => "pull_pending",
            UpdateStep::Pulled => "pulled",
            UpdateStep::Stopping => "stopping",
            UpdateStep::Removed => "removed",
            UpdateStep::Creating => "creating",
            UpdateStep::Started => "started",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful update
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    /// Short id of the replacement container
    pub container_id: String,
    pub name: String,
    pub image: String,
    /// Steps that completed, in order
    pub completed: Vec<UpdateStep>,
}

/// Tracks progress so a failure can name the step it happened in
struct UpdateRun<'a> {
    runtime: &'a dyn ContainerRuntime,
    settings: &'a ContainerSettings,
    name: String,
    completed: Vec<UpdateStep>,
}

impl<'a> UpdateRun<'a> {
    fn fail(&self, step: UpdateStep, err: DashboardError) -> DashboardError {
        error!(
            container = %self.name,
            step = %step,
            completed = ?self.completed,
            error = %err,
            "container update stopped part-way, not restarting"
        );
        DashboardError::PartialFailure {
            container: self.name.clone(),
            step,
            reason: err.to_string(),
        }
    }

    fn request_limit(&self) -> Duration {
        self.settings.request_timeout
    }
}

/// Give a bare image reference an explicit tag
///
/// An untagged `from_image` makes the engine pull every tag of the
/// repository, so `nginx` becomes `nginx:latest`. References that already
/// carry a tag or a digest are returned unchanged. A `:` before the last `/`
/// is a registry port, not a tag.
pub fn pinned_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

pub(crate) async fn run_update(
    runtime: &dyn ContainerRuntime,
    id: &str,
    settings: &ContainerSettings,
) -> Result<UpdateReport> {
    let mut spec = with_timeout("container inspect", settings.request_timeout, runtime.inspect(id)).await?;

    if spec.image.is_empty() || spec.image.starts_with("sha256:") {
        return Err(DashboardError::InvalidState(format!(
            "container {} has an image with no tag; cannot update",
            spec.name
        )));
    }

    // The replacement is created from exactly the reference that was pulled
    spec.image = pinned_reference(&spec.image);

    let mut run = UpdateRun {
        runtime,
        settings,
        name: spec.name.clone(),
        completed: Vec::new(),
    };

    info!(container = %run.name, image = %spec.image, "pulling latest image");
    if let Err(e) = with_timeout("image pull", settings.pull_timeout, runtime.pull_image(&spec.image)).await {
        warn!(
            container = %run.name,
            image = %spec.image,
            step = %UpdateStep::PullPending,
            error = %e,
            "pull failed, container left untouched"
        );
        let reason = match e {
            DashboardError::UpstreamUnavailable(msg) => msg,
            other => other.to_string(),
        };
        return Err(DashboardError::UpstreamUnavailable(format!(
            "pull of {} failed: {}",
            spec.image, reason
        )));
    }
    run.completed.push(UpdateStep::Pulled);

    // An already-stopped container is fine here. A failed stop has torn
    // nothing down yet, so it surfaces as the engine error itself.
    info!(container = %run.name, "stopping container");
    let stop_limit = run.request_limit() + Duration::from_secs(settings.stop_grace_secs);
    match with_timeout("container stop", stop_limit, run.runtime.stop(id, settings.stop_grace_secs)).await {
        Ok(()) | Err(DashboardError::InvalidState(_)) => run.completed.push(UpdateStep::Stopping),
        Err(e) => {
            warn!(container = %run.name, error = %e, "stop failed, container left as it was");
            return Err(e);
        }
    }

    info!(container = %run.name, "removing container");
    if let Err(e) = with_timeout("container remove", run.request_limit(), run.runtime.remove(id)).await {
        return Err(run.fail(UpdateStep::Removed, e));
    }
    run.completed.push(UpdateStep::Removed);

    info!(container = %run.name, image = %spec.image, "creating container with updated image");
    let new_id = match with_timeout("container create", run.request_limit(), run.runtime.create(&spec)).await {
        Ok(new_id) => new_id,
        Err(e) => return Err(run.fail(UpdateStep::Creating, e)),
    };
    run.completed.push(UpdateStep::Creating);

    if let Err(e) = with_timeout("container start", run.request_limit(), run.runtime.start(&new_id)).await {
        return Err(run.fail(UpdateStep::Started, e));
    }
    run.completed.push(UpdateStep::Started);

    let container_id = short_id(&new_id);
    info!(container = %run.name, new_id = %container_id, "container updated");

    Ok(UpdateReport {
        container_id,
        name: run.name,
        image: spec.image,
        completed: run.completed,
    })
}
