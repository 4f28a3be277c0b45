//! Host CPU and memory utilization, read fresh at every flush.
//!
//! CPU comes from the aggregate `cpu` line of `/proc/stat`: busy share of all
//! ticks across every logical core since boot. Memory is
//! `(MemTotal - MemFree) / MemTotal` from `/proc/meminfo`. Both are
//! percentages in `[0, 100]` rounded to two decimals.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::Result;

/// Reads host utilization. Implementations must not cache.
pub trait SystemSampler: Send + Sync {
    fn cpu_usage(&self) -> Result<f64>;
    fn memory_usage(&self) -> Result<f64>;
}

/// procfs-backed sampler.
#[derive(Debug, Clone)]
pub struct ProcSampler {
    stat_path: PathBuf,
    meminfo_path: PathBuf,
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self {
            stat_path: PathBuf::from("/proc/stat"),
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl ProcSampler {
    /// Sampler reading from fixture files.
    #[cfg(test)]
    pub fn with_paths(stat_path: impl Into<PathBuf>, meminfo_path: impl Into<PathBuf>) -> Self {
        Self {
            stat_path: stat_path.into(),
            meminfo_path: meminfo_path.into(),
        }
    }
}

impl SystemSampler for ProcSampler {
    fn cpu_usage(&self) -> Result<f64> {
        let stat = fs::read_to_string(&self.stat_path)?;
        parse_cpu_usage(&stat).ok_or_else(|| invalid("no aggregate cpu line in /proc/stat"))
    }

    fn memory_usage(&self) -> Result<f64> {
        let meminfo = fs::read_to_string(&self.meminfo_path)?;
        parse_memory_usage(&meminfo).ok_or_else(|| invalid("MemTotal/MemFree missing in /proc/meminfo"))
    }
}

fn invalid(msg: &str) -> crate::error::MetricsError {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned()).into()
}

/// `(1 - idle / total) * 100` over user, nice, system, idle, iowait, irq,
/// softirq and steal. Guest time is already folded into user/nice.
pub fn parse_cpu_usage(stat: &str) -> Option<f64> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let ticks: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if ticks.len() < 4 {
        return None;
    }

    let total: u64 = ticks.iter().sum();
    if total == 0 {
        return None;
    }
    let idle = ticks[3] as f64 / total as f64;
    Some(round2(((1.0 - idle) * 100.0).clamp(0.0, 100.0)))
}

pub fn parse_memory_usage(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|v| v.parse().ok())
    };

    let total = field("MemTotal")?;
    let free = field("MemFree")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(free) as f64 / total as f64;
    Some(round2((used * 100.0).clamp(0.0, 100.0)))
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
