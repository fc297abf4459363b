use std::fs;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One resource sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Source of CPU/memory samples for the pool controller. Injected so tests
/// and non-Linux hosts can supply their own.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Fixed sample, for tests and embedders that do their own monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSampler(pub ResourceSample);

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

/// Best-effort system sampler reading /proc. Returns zeros on hosts where
/// /proc is unavailable, which makes the pool controller a no-op on load
/// watermarks while the task-ratio rule keeps working.
#[derive(Default)]
pub struct ProcFsSampler {
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcFsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_cpu_times() -> Option<CpuTimes> {
        let stat = fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        Some(CpuTimes {
            busy: total - idle,
            total,
        })
    }

    fn read_memory_percent() -> Option<f64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let mut total_kb = None;
        let mut available_kb = None;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = rest.split_whitespace().next()?.parse::<f64>().ok();
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kb = rest.split_whitespace().next()?.parse::<f64>().ok();
            }
        }
        let total = total_kb?;
        let available = available_kb?;
        if total <= 0.0 {
            return None;
        }
        Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
    }
}

impl ResourceSampler for ProcFsSampler {
    fn sample(&self) -> ResourceSample {
        let memory_percent = Self::read_memory_percent().unwrap_or(0.0);
        let cpu_percent = match Self::read_cpu_times() {
            Some(current) => {
                let mut last = self.last_cpu.lock().unwrap_or_else(|e| e.into_inner());
                let percent = match *last {
                    Some(prev) if current.total > prev.total => {
                        let busy = current.busy.saturating_sub(prev.busy) as f64;
                        let total = (current.total - prev.total) as f64;
                        (busy / total * 100.0).clamp(0.0, 100.0)
                    }
                    // first sample has no delta to compare against
                    _ => 0.0,
                };
                *last = Some(current);
                percent
            }
            None => {
                debug!("/proc/stat unavailable, reporting zero cpu");
                0.0
            }
        };
        ResourceSample {
            cpu_percent,
            memory_percent,
        }
    }
}
