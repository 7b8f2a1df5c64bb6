use serde::Serialize;

/// One complete, internally consistent read of all monitored metrics.
///
/// Rebuilt from scratch on every request; no field ever carries data
/// from a previous poll.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub resources: Resources,
    pub processes: Vec<ProcessInfo>,
    pub filesystems: Vec<FilesystemInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resources {
    pub local_ip: String,
    pub uptime: Uptime,
    pub battery: BatteryStats,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Uptime {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

impl Uptime {
    pub fn from_seconds(secs: u64) -> Self {
        Self {
            days: secs / 86_400,
            hours: (secs % 86_400) / 3600,
            minutes: (secs % 3600) / 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargingState {
    Charging,
    Discharging,
    Full,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryStats {
    pub charging_state: ChargingState,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuStats {
    pub model: String,
    pub core_count: usize,
    pub per_core_usage: Vec<f32>,
}

/// Wire form of a process row. Fields that could not be read for this
/// process are zero/empty, never cause the row to be dropped.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    pub username: String,
    pub pid: u32,
    pub cpu_usage: f32,
    pub memory_usage: f32,
}

/// Internal per-process reading. Each field is tagged so callers can tell
/// "measured zero" from "unavailable"; the wire contract flattens `None`
/// to the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: Option<String>,
    pub username: Option<String>,
    pub cpu_usage: Option<f32>,
    pub memory_usage: Option<f32>,
}

impl From<ProcessSample> for ProcessInfo {
    fn from(sample: ProcessSample) -> Self {
        Self {
            name: sample.name.unwrap_or_default(),
            username: sample.username.unwrap_or_default(),
            pid: sample.pid,
            cpu_usage: sample.cpu_usage.unwrap_or(0.0),
            memory_usage: sample.memory_usage.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemInfo {
    pub path: String,
    pub disk_type: String,
    pub device: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub used_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_splits_into_components() {
        let up = Uptime::from_seconds(2 * 86_400 + 3 * 3600 + 7 * 60 + 41);
        assert_eq!(
            up,
            Uptime {
                days: 2,
                hours: 3,
                minutes: 7
            }
        );
    }

    #[test]
    fn uptime_zero() {
        let up = Uptime::from_seconds(0);
        assert_eq!(up.days, 0);
        assert_eq!(up.hours, 0);
        assert_eq!(up.minutes, 0);
    }

    #[test]
    fn process_sample_defaults_failed_fields() {
        let sample = ProcessSample {
            pid: 42,
            name: None,
            username: Some("root".to_string()),
            cpu_usage: Some(0.0),
            memory_usage: None,
        };
        // `cpu_usage` was measured as zero while `memory_usage` was
        // unavailable; both end up as 0.0 on the wire.
        assert!(sample.cpu_usage.is_some());
        assert!(sample.memory_usage.is_none());

        let info = ProcessInfo::from(sample);
        assert_eq!(info.pid, 42);
        assert_eq!(info.name, "");
        assert_eq!(info.username, "root");
        assert_eq!(info.cpu_usage, 0.0);
        assert_eq!(info.memory_usage, 0.0);
    }
}
