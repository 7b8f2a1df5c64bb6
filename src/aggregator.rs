use crate::probe::{MetricsProbe, SampleError};
use crate::snapshot::{ProcessInfo, SystemSnapshot};
use tokio::sync::Mutex;
use tracing::warn;

/// Assembles one consistent snapshot per call from the probe's three
/// sampling operations. No caching, no retries: retry policy belongs to
/// the polling client.
pub struct Aggregator {
    probe: Mutex<Box<dyn MetricsProbe>>,
}

impl Aggregator {
    pub fn new(probe: Box<dyn MetricsProbe>) -> Self {
        Self {
            probe: Mutex::new(probe),
        }
    }

    /// Resources and filesystems are foundational: either failing fails
    /// the whole snapshot. Process enumeration races with process exit
    /// all the time, so it degrades to an empty list instead.
    pub async fn snapshot(&self) -> Result<SystemSnapshot, SampleError> {
        let mut probe = self.probe.lock().await;

        let resources = probe.sample_resources()?;
        let filesystems = probe.sample_filesystems()?;
        let processes: Vec<ProcessInfo> = probe
            .sample_processes()
            .into_iter()
            .map(ProcessInfo::from)
            .collect();
        if processes.is_empty() {
            warn!("process enumeration returned nothing, serving empty list");
        }

        Ok(SystemSnapshot {
            resources,
            processes,
            filesystems,
        })
    }
}
