//! Queue observation — job-queue depth filtered by fleet labels.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use runnergrid_state::{FleetSpec, QueueMetrics};

use crate::client::ProviderClient;
use crate::error::QueueError;

/// Read-only view of the CI provider's job queue.
#[async_trait]
pub trait QueueObserver: Send + Sync {
    /// Fetch current queue depth for the fleet's label set.
    ///
    /// On timeout or transport failure the caller treats the tick as "no
    /// decision this cycle", never as "zero jobs".
    async fn metrics(&self, fleet: &FleetSpec) -> Result<QueueMetrics, QueueError>;
}

#[derive(Debug, Deserialize)]
struct JobList {
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    #[allow(dead_code)]
    id: u64,
    status: String,
    labels: Vec<String>,
}

/// HTTP implementation backed by the provider's job-listing endpoint.
pub struct HttpQueueObserver {
    client: ProviderClient,
}

impl HttpQueueObserver {
    pub fn new(client: ProviderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueObserver for HttpQueueObserver {
    async fn metrics(&self, fleet: &FleetSpec) -> Result<QueueMetrics, QueueError> {
        let path = format!("/repos/{}/actions/jobs", fleet.repo);
        let resp = self.client.get(&path).await?;

        if !resp.status.is_success() {
            return Err(QueueError::Provider {
                status: resp.status.as_u16(),
                body: self.client.error_body(&resp),
            });
        }

        let list: JobList = resp.json().map_err(QueueError::Decode)?;
        let metrics = summarize(fleet, &list.jobs, epoch_secs());
        debug!(
            fleet_id = %fleet.id,
            pending = metrics.pending,
            queued = metrics.queued,
            in_progress = metrics.in_progress,
            "queue observed"
        );
        Ok(metrics)
    }
}

/// A job counts for a fleet only if it requires all of the fleet's labels.
/// Partial overlap does not count.
fn job_matches(fleet_labels: &[String], job_labels: &[String]) -> bool {
    fleet_labels
        .iter()
        .all(|l| job_labels.iter().any(|j| j == l))
}

/// Reduce a job listing to the fleet's queue metrics.
fn summarize(fleet: &FleetSpec, jobs: &[JobEntry], observed_at: u64) -> QueueMetrics {
    let mut pending = 0u64;
    let mut in_progress = 0u64;
    let mut queued = 0u64;
    let mut total = 0u64;

    for job in jobs {
        if !job_matches(&fleet.labels, &job.labels) {
            continue;
        }
        total += 1;
        match job.status.as_str() {
            "pending" => pending += 1,
            "queued" => queued += 1,
            "in_progress" => in_progress += 1,
            _ => {}
        }
    }

    QueueMetrics {
        fleet_id: fleet.id.clone(),
        pending,
        in_progress,
        queued,
        total,
        observed_at,
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
