//! Host resource sampling
//!
//! A [`ResourceProbe`] reads the current host counters; the [`ResourceSampler`]
//! runs a probe on a fixed interval in a background task and appends every
//! reading to a [`MetricsStore`]. A failed reading is logged and skipped, it
//! never ends the sampling loop.

use super::{MetricsStore, ResourceMetric};
use crate::{LoadTestError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default time between two snapshots
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Default time the sampler is given to exit once monitoring stops
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of host resource readings
///
/// Sampling may block; the sampler always calls it off the async workers.
pub trait ResourceProbe: Send {
    /// Read every available metric once
    fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>>;
}

/// Probe backed by `sysinfo`, plus `/proc/diskstats` for disk I/O on Linux
///
/// CPU usage is measured between two consecutive refreshes. A reading taken
/// sooner than [`MINIMUM_CPU_UPDATE_INTERVAL`] after the previous refresh
/// first sleeps out the remainder, so even the first sample is meaningful.
pub struct SysinfoProbe {
    system: System,
    networks: Networks,
    cpu_refreshed_at: Instant,
    diskstats: Option<PathBuf>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            cpu_refreshed_at: Instant::now(),
            diskstats: cfg!(target_os = "linux").then(|| PathBuf::from("/proc/diskstats")),
        }
    }

    fn refresh_cpu(&mut self) {
        let since_refresh = self.cpu_refreshed_at.elapsed();
        if since_refresh < MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL - since_refresh);
        }
        self.system.refresh_cpu_all();
        self.cpu_refreshed_at = Instant::now();
    }

    fn network_totals(&mut self) -> (u64, u64) {
        self.networks.refresh();
        self.networks
            .list()
            .values()
            .fold((0, 0), |(sent, recv), data| {
                (
                    sent + data.total_transmitted(),
                    recv + data.total_received(),
                )
            })
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>> {
        self.refresh_cpu();
        self.system.refresh_memory();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(LoadTestError::sampler_error(
                "Total memory reported as 0",
            ));
        }
        let used_memory = self.system.used_memory();
        let (bytes_sent, bytes_recv) = self.network_totals();

        let mut samples = vec![
            (
                ResourceMetric::CpuPercent,
                self.system.global_cpu_usage() as f64,
            ),
            (
                ResourceMetric::MemoryPercent,
                used_memory as f64 / total_memory as f64 * 100.0,
            ),
            (ResourceMetric::MemoryUsedGb, used_memory as f64 / BYTES_PER_GB),
            (ResourceMetric::NetworkBytesSent, bytes_sent as f64),
            (ResourceMetric::NetworkBytesRecv, bytes_recv as f64),
        ];

        // Disk counters are optional; their absence never costs the other metrics
        if let Some(path) = &self.diskstats {
            match disk_io_totals(path) {
                Ok((read_bytes, write_bytes)) => {
                    samples.push((ResourceMetric::DiskReadBytes, read_bytes as f64));
                    samples.push((ResourceMetric::DiskWriteBytes, write_bytes as f64));
                }
                Err(e) => warn!(error = %e, "Disk I/O counters unavailable"),
            }
        }

        Ok(samples)
    }
}

/// Cumulative bytes read and written across whole block devices
fn disk_io_totals(path: &Path) -> Result<(u64, u64)> {
    let stats = std::fs::read_to_string(path).map_err(|e| {
        LoadTestError::sampler_error(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(parse_diskstats(&stats, |device| {
        Path::new("/sys/block").join(device).exists()
    }))
}

/// Sum sector counts of `/proc/diskstats` lines whose device passes `is_disk`
fn parse_diskstats(stats: &str, is_disk: impl Fn(&str) -> bool) -> (u64, u64) {
    // Sector size in /proc/diskstats is always 512 bytes
    const SECTOR_SIZE: u64 = 512;

    stats
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let device = fields[2];
            if device.starts_with("loop") || device.starts_with("ram") || !is_disk(device) {
                return None;
            }
            let sectors_read: u64 = fields[5].parse().ok()?;
            let sectors_written: u64 = fields[9].parse().ok()?;
            Some((sectors_read, sectors_written))
        })
        .fold((0, 0), |(read, written), (r, w)| {
            (read + r * SECTOR_SIZE, written + w * SECTOR_SIZE)
        })
}

/// Read `probe` once and append the result to `store`
fn record_sample(probe: &mut dyn ResourceProbe, store: &MetricsStore) -> bool {
    match probe.sample() {
        Ok(samples) => {
            store.append_snapshots(Utc::now(), &samples);
            debug!(metrics = samples.len(), "Resource snapshot recorded");
            true
        }
        Err(e) => {
            warn!(error = %e, "Resource sampling failed, skipping snapshot");
            false
        }
    }
}

/// Periodic resource sampler
pub struct ResourceSampler {
    probe: Box<dyn ResourceProbe>,
    interval: Duration,
    stop_grace: Duration,
}

impl ResourceSampler {
    /// Sampler over a custom probe
    pub fn new(probe: impl ResourceProbe + 'static, interval: Duration) -> Self {
        Self {
            probe: Box::new(probe),
            interval,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Sampler over the host's real counters
    pub fn system(interval: Duration) -> Self {
        Self::new(SysinfoProbe::new(), interval)
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Take one reading on the calling thread and append it to the store
    ///
    /// Returns whether a snapshot was stored.
    pub fn sample_once(&mut self, store: &MetricsStore) -> bool {
        record_sample(self.probe.as_mut(), store)
    }

    /// Sample until `token` is cancelled
    ///
    /// The first snapshot is taken immediately; the rest follow every interval.
    /// Each reading runs on the blocking pool and the probe is handed back when
    /// it completes. Cancellation is observed between readings, so a reading in
    /// progress delays the exit until it finishes.
    pub fn spawn(self, store: Arc<MetricsStore>, token: CancellationToken) -> JoinHandle<()> {
        let Self {
            mut probe,
            interval,
            ..
        } = self;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let target = Arc::clone(&store);
                let reading = tokio::task::spawn_blocking(move || {
                    record_sample(probe.as_mut(), &target);
                    probe
                });

                match reading.await {
                    Ok(returned) => probe = returned,
                    Err(e) => {
                        warn!(error = %e, "Resource probe panicked, sampling stopped");
                        break;
                    }
                }
            }

            debug!("Resource sampler stopped");
        })
    }
}
