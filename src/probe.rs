use crate::snapshot::{
    BatteryStats, ChargingState, CpuStats, FilesystemInfo, MemoryStats, ProcessSample, Resources,
    Uptime,
};
use std::net::UdpSocket;
use sysinfo::{CpuExt, DiskExt, DiskKind, PidExt, ProcessExt, System, SystemExt, UserExt};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cpu probe returned no cores")]
    NoCpus,
    #[error("memory probe returned zero total bytes")]
    MemoryUnavailable,
    #[error("filesystem probe failed: {0}")]
    Filesystems(String),
}

/// Seam between the aggregator and the host OS. All calls are synchronous
/// and may block briefly on OS queries.
pub trait MetricsProbe: Send {
    fn sample_resources(&mut self) -> Result<Resources, SampleError>;

    /// Per-process attribute failures are swallowed per field; a process
    /// is always included with whatever fields could be read.
    fn sample_processes(&mut self) -> Vec<ProcessSample>;

    fn sample_filesystems(&mut self) -> Result<Vec<FilesystemInfo>, SampleError>;
}

/// `MetricsProbe` backed by one long-lived `sysinfo::System`.
///
/// Per-core usage is the delta since the previous refresh of this probe,
/// i.e. effectively instantaneous load, not an interval average.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_users_list();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProbe for SysinfoProbe {
    fn sample_resources(&mut self) -> Result<Resources, SampleError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(SampleError::NoCpus);
        }
        let cpu = CpuStats {
            model: cpus[0].brand().trim().to_string(),
            core_count: cpus.len(),
            per_core_usage: cpus.iter().map(|c| c.cpu_usage()).collect(),
        };

        let total = self.system.total_memory();
        if total == 0 {
            return Err(SampleError::MemoryUnavailable);
        }
        let used = self.system.used_memory();
        let memory = MemoryStats {
            total_bytes: total,
            used_bytes: used,
            free_bytes: self.system.free_memory(),
            used_percentage: (used as f64 / total as f64) * 100.0,
        };

        Ok(Resources {
            local_ip: local_ip(),
            uptime: Uptime::from_seconds(self.system.uptime()),
            battery: sample_battery(),
            memory,
            cpu,
        })
    }

    fn sample_processes(&mut self) -> Vec<ProcessSample> {
        self.system.refresh_processes();
        let total_memory = self.system.total_memory();

        self.system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let username = process
                    .user_id()
                    .and_then(|uid| self.system.get_user_by_id(uid))
                    .map(|user| user.name().to_string());
                let memory_usage = if total_memory > 0 {
                    Some((process.memory() as f64 / total_memory as f64 * 100.0) as f32)
                } else {
                    None
                };
                ProcessSample {
                    pid: pid.as_u32(),
                    name: Some(process.name().to_string()),
                    username,
                    cpu_usage: Some(process.cpu_usage()),
                    memory_usage,
                }
            })
            .collect()
    }

    fn sample_filesystems(&mut self) -> Result<Vec<FilesystemInfo>, SampleError> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let filesystems: Vec<FilesystemInfo> = self
            .system
            .disks()
            .iter()
            .filter(|d| !is_virtual_device(&d.name().to_string_lossy()))
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space();
                let used = total.saturating_sub(free);
                FilesystemInfo {
                    path: d.mount_point().to_string_lossy().to_string(),
                    disk_type: disk_kind_label(d.kind()).to_string(),
                    device: d.name().to_string_lossy().to_string(),
                    total_bytes: total,
                    free_bytes: free,
                    used_bytes: used,
                    used_percentage: if total > 0 {
                        (used as f64 / total as f64) * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        Ok(filesystems)
    }
}

/// Loopback and similar pseudo devices carry no useful capacity data.
fn is_virtual_device(device: &str) -> bool {
    device.contains("loop")
}

fn disk_kind_label(kind: DiskKind) -> &'static str {
    match kind {
        DiskKind::HDD => "HDD",
        DiskKind::SSD => "SSD",
        DiskKind::Unknown(_) => "Unknown",
    }
}

fn sample_battery() -> BatteryStats {
    match read_batteries() {
        Ok(readings) => battery_stats(Some(readings)),
        Err(err) => {
            debug!(error = %err, "battery query failed");
            battery_stats(None)
        }
    }
}

fn read_batteries() -> Result<Vec<(ChargingState, f32)>, battery::Error> {
    let manager = battery::Manager::new()?;
    let mut readings = Vec::new();
    for item in manager.batteries()? {
        let bat = item?;
        let state = match bat.state() {
            battery::State::Charging => ChargingState::Charging,
            battery::State::Discharging | battery::State::Empty => ChargingState::Discharging,
            battery::State::Full => ChargingState::Full,
            _ => ChargingState::Unknown,
        };
        let percent = bat
            .state_of_charge()
            .get::<battery::units::ratio::percent>();
        readings.push((state, percent));
    }
    Ok(readings)
}

/// `None` means the battery query itself failed. No batteries at all is
/// not an error: a machine on mains power reports a full battery.
fn battery_stats(readings: Option<Vec<(ChargingState, f32)>>) -> BatteryStats {
    match readings {
        None => BatteryStats {
            charging_state: ChargingState::Unknown,
            percent: 0,
        },
        Some(readings) => match readings.first() {
            None => BatteryStats {
                charging_state: ChargingState::Full,
                percent: 100,
            },
            Some(&(state, percent)) => BatteryStats {
                charging_state: state,
                percent: percent.clamp(0.0, 100.0).round() as u8,
            },
        },
    }
}

/// Best-effort primary interface address. The connect never sends a
/// packet; it only asks the kernel which source address it would pick.
fn local_ip() -> String {
    fn probe() -> Option<String> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        Some(socket.local_addr().ok()?.ip().to_string())
    }
    probe().unwrap_or_else(|| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_batteries_means_full_at_100() {
        let stats = battery_stats(Some(Vec::new()));
        assert_eq!(stats.charging_state, ChargingState::Full);
        assert_eq!(stats.percent, 100);
    }

    #[test]
    fn battery_query_failure_means_unknown_at_0() {
        let stats = battery_stats(None);
        assert_eq!(stats.charging_state, ChargingState::Unknown);
        assert_eq!(stats.percent, 0);
    }

    #[test]
    fn first_battery_wins() {
        let stats = battery_stats(Some(vec![
            (ChargingState::Discharging, 73.4),
            (ChargingState::Charging, 10.0),
        ]));
        assert_eq!(stats.charging_state, ChargingState::Discharging);
        assert_eq!(stats.percent, 73);
    }

    #[test]
    fn battery_percent_is_clamped() {
        let stats = battery_stats(Some(vec![(ChargingState::Charging, 104.2)]));
        assert_eq!(stats.percent, 100);
        let stats = battery_stats(Some(vec![(ChargingState::Discharging, -3.0)]));
        assert_eq!(stats.percent, 0);
    }

    #[test]
    fn loop_devices_are_virtual() {
        assert!(is_virtual_device("/dev/loop0"));
        assert!(is_virtual_device("loop12"));
        assert!(!is_virtual_device("/dev/nvme0n1p2"));
        assert!(!is_virtual_device("/dev/sda1"));
    }

    #[test]
    fn resources_respect_documented_ranges() {
        let mut probe = SysinfoProbe::new();
        let resources = probe.sample_resources().expect("host has cpu and memory");
        assert_eq!(
            resources.cpu.per_core_usage.len(),
            resources.cpu.core_count
        );
        assert!(resources.memory.used_percentage >= 0.0);
        assert!(resources.memory.used_percentage <= 100.0);
        assert!(resources.battery.percent <= 100);
        assert!(!resources.local_ip.is_empty());
    }

    #[test]
    fn filesystems_never_include_loop_devices() {
        let mut probe = SysinfoProbe::new();
        let filesystems = probe.sample_filesystems().expect("disk probe");
        assert!(filesystems.iter().all(|fs| !fs.device.contains("loop")));
    }

    #[test]
    fn processes_include_this_one() {
        let mut probe = SysinfoProbe::new();
        let processes = probe.sample_processes();
        let me = std::process::id();
        assert!(processes.iter().any(|p| p.pid == me));
    }
}
