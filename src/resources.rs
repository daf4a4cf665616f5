//! Process resource sampling
//!
//! Each monitoring batch records how much memory and CPU the monitor itself
//! has used so far. This is a side payload: failures to read the values are
//! reported as zeros and never affect a cycle.

use log::debug;
use serde::{Deserialize, Serialize};

/// Point-in-time resource usage of the monitor process
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    /// Resident set size in bytes
    pub memory_rss_bytes: u64,
    /// Accumulated user CPU time in seconds
    pub cpu_user_seconds: f64,
    /// Accumulated system CPU time in seconds
    pub cpu_system_seconds: f64,
}

impl ResourceUsage {
    /// Resident memory in megabytes
    pub fn memory_rss_mb(&self) -> f64 {
        self.memory_rss_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Samples resource usage of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSampler;

impl ResourceSampler {
    pub fn new() -> Self {
        Self
    }

    /// Take a sample of current process resource usage
    pub fn sample(&self) -> ResourceUsage {
        let (rusage_rss, cpu_user_seconds, cpu_system_seconds) = Self::rusage();
        let memory_rss_bytes = Self::current_rss().unwrap_or(rusage_rss);

        debug!(
            "Resource sample: rss={}B user={:.3}s system={:.3}s",
            memory_rss_bytes, cpu_user_seconds, cpu_system_seconds
        );

        ResourceUsage {
            memory_rss_bytes,
            cpu_user_seconds,
            cpu_system_seconds,
        }
    }

    /// Current resident memory from /proc, where available
    fn current_rss() -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            let status = std::fs::read_to_string("/proc/self/status").ok()?;
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb = rest.split_whitespace().next()?.parse::<u64>().ok()?;
                    return Some(kb * 1024);
                }
            }
        }

        None
    }

    /// Peak RSS and CPU times from getrusage
    fn rusage() -> (u64, f64, f64) {
        #[cfg(unix)]
        {
            // SAFETY: getrusage only writes into the zeroed struct we own
            unsafe {
                let mut usage: libc::rusage = std::mem::zeroed();
                if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                    let to_secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1e6;

                    // ru_maxrss is in KB on Linux, bytes on macOS
                    #[cfg(target_os = "macos")]
                    let rss = usage.ru_maxrss as u64;
                    #[cfg(not(target_os = "macos"))]
                    let rss = (usage.ru_maxrss as u64) * 1024;

                    return (rss, to_secs(usage.ru_utime), to_secs(usage.ru_stime));
                }
            }
        }

        (0, 0.0, 0.0)
    }
}
